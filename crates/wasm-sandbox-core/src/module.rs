//! WebAssembly module loading.
//!
//! This module provides [`CompiledModule`], the immutable artifact produced
//! from raw bytecode. Compilation validates the bytecode, translates it to
//! machine code and records the module's [`ExportTable`] so that exports can
//! later be resolved by name without reflection.

use std::sync::Arc;
use std::time::Instant;

use sha2::{Digest, Sha256};
use tracing::{info, instrument};
use wasmtime::{ImportType, Module};

use crate::WasmEngine;
use crate::engine::{Tracked, TrackingGuard};
use crate::invoke::ExportTable;
use wasm_sandbox_common::SandboxError;

/// A compiled WebAssembly module.
///
/// # Thread Safety
///
/// `CompiledModule` is immutable and cheap to clone; clones share the
/// compiled code and count as a single live artifact on the owning engine.
#[derive(Clone)]
pub struct CompiledModule {
    /// The compiled Wasmtime module.
    module: Module,

    /// SHA-256 of the original bytes, lowercase hex.
    content_hash: String,

    /// Exported functions by name.
    exports: Arc<ExportTable>,

    /// Keeps the artifact counted on its engine.
    guard: Arc<TrackingGuard>,
}

impl CompiledModule {
    /// Compile a core module from WebAssembly bytes.
    ///
    /// # Errors
    ///
    /// - [`SandboxError::EngineClosed`] if the engine has been shut down
    /// - [`SandboxError::Compile`] if the bytes are not a valid module
    #[instrument(skip(engine, bytes), fields(bytes_len = bytes.len()))]
    pub fn compile(engine: &WasmEngine, bytes: &[u8]) -> Result<Self, SandboxError> {
        engine.ensure_open()?;
        Self::validate_wasm_header(bytes)?;

        let start = Instant::now();
        let module = Module::new(engine.inner(), bytes).map_err(|e| {
            SandboxError::compile(format!("Core module compilation failed: {e}"))
        })?;

        Ok(Self::finish(engine, module, content_hash(bytes), start))
    }

    /// Compile a core module from WAT (WebAssembly Text Format).
    ///
    /// This is primarily for testing purposes.
    #[instrument(skip(engine, wat))]
    pub fn from_wat(engine: &WasmEngine, wat: &str) -> Result<Self, SandboxError> {
        engine.ensure_open()?;

        let start = Instant::now();
        let module = Module::new(engine.inner(), wat)
            .map_err(|e| SandboxError::compile(format!("WAT compilation failed: {e}")))?;

        Ok(Self::finish(engine, module, content_hash(wat.as_bytes()), start))
    }

    fn finish(engine: &WasmEngine, module: Module, content_hash: String, start: Instant) -> Self {
        let exports = ExportTable::from_module(&module);

        info!(
            content_hash = %content_hash,
            exports = exports.len(),
            duration_ms = start.elapsed().as_millis(),
            "Module compiled"
        );

        Self {
            module,
            content_hash,
            exports: Arc::new(exports),
            guard: Arc::new(engine.track(Tracked::Artifact)),
        }
    }

    /// Get the content hash of the original bytes.
    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    /// Get the exported functions.
    pub fn exports(&self) -> &Arc<ExportTable> {
        &self.exports
    }

    /// Iterate over the imports this module requires.
    pub fn imports(&self) -> impl ExactSizeIterator<Item = ImportType<'_>> {
        self.module.imports()
    }

    /// Get the inner Wasmtime module.
    pub fn inner(&self) -> &Module {
        &self.module
    }

    /// The engine this artifact was compiled by.
    pub fn engine(&self) -> &WasmEngine {
        self.guard.engine()
    }

    /// Validate WebAssembly header (magic number).
    fn validate_wasm_header(bytes: &[u8]) -> Result<(), SandboxError> {
        if bytes.len() < 8 {
            return Err(SandboxError::compile("Invalid Wasm: file too small"));
        }

        if &bytes[0..4] != b"\0asm" {
            return Err(SandboxError::compile("Invalid Wasm: bad magic number"));
        }

        Ok(())
    }
}

impl std::fmt::Debug for CompiledModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledModule")
            .field("content_hash", &self.content_hash)
            .field("exports", &self.exports.names())
            .finish_non_exhaustive()
    }
}

/// SHA-256 of the given bytes as lowercase hex.
pub fn content_hash(bytes: &[u8]) -> String {
    use std::fmt::Write;

    Sha256::digest(bytes)
        .iter()
        .fold(String::with_capacity(64), |mut out, byte| {
            let _ = write!(out, "{byte:02x}");
            out
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wasm_sandbox_common::EngineConfig;

    // Minimal valid Wasm module (empty module)
    const MINIMAL_WASM: &[u8] = &[
        0x00, 0x61, 0x73, 0x6d, // magic: \0asm
        0x01, 0x00, 0x00, 0x00, // version: 1
    ];

    fn test_engine() -> WasmEngine {
        let engine_config = EngineConfig {
            pooling_allocator: false,
            ..Default::default()
        };
        WasmEngine::new(&engine_config).unwrap()
    }

    #[test]
    fn test_validate_wasm_header_valid() {
        assert!(CompiledModule::validate_wasm_header(MINIMAL_WASM).is_ok());
    }

    #[test]
    fn test_validate_wasm_header_too_small() {
        let result = CompiledModule::validate_wasm_header(&[0x00, 0x61]);
        assert!(matches!(result, Err(SandboxError::Compile { .. })));
    }

    #[test]
    fn test_validate_wasm_header_bad_magic() {
        let bad_wasm = &[0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00];
        let result = CompiledModule::validate_wasm_header(bad_wasm);
        assert!(matches!(result, Err(SandboxError::Compile { .. })));
    }

    #[test]
    fn test_content_hash() {
        let hash1 = content_hash(b"hello");
        let hash2 = content_hash(b"hello");
        let hash3 = content_hash(b"world");

        assert_eq!(hash1, hash2);
        assert_ne!(hash1, hash3);
        assert_eq!(hash1.len(), 64);
        assert_eq!(
            hash1,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_module_compilation() {
        let engine = test_engine();

        let module = CompiledModule::compile(&engine, MINIMAL_WASM).unwrap();
        assert!(module.exports().is_empty());
        assert_eq!(module.content_hash(), content_hash(MINIMAL_WASM));
        assert!(module.engine().owns(engine.inner()));
    }

    #[test]
    fn test_invalid_body_is_compile_error() {
        let engine = test_engine();
        // Valid header followed by a truncated section
        let bytes = [0x00, 0x61, 0x73, 0x6d, 0x01, 0x00, 0x00, 0x00, 0x01, 0x05];

        let result = CompiledModule::compile(&engine, &bytes);
        assert!(matches!(result, Err(SandboxError::Compile { .. })));
        assert_eq!(engine.live_artifacts(), 0);
    }

    #[test]
    fn test_artifact_tracking() {
        let engine = test_engine();

        let module = CompiledModule::compile(&engine, MINIMAL_WASM).unwrap();
        let clone = module.clone();
        assert_eq!(engine.live_artifacts(), 1);

        drop(module);
        assert_eq!(engine.live_artifacts(), 1);
        drop(clone);
        assert_eq!(engine.live_artifacts(), 0);
    }

    #[test]
    fn test_compile_after_shutdown() {
        let engine = test_engine();
        engine.shutdown();

        let result = CompiledModule::compile(&engine, MINIMAL_WASM);
        assert!(matches!(result, Err(SandboxError::EngineClosed)));
    }

    #[test]
    fn test_from_wat_exports() {
        let engine = test_engine();
        let module = CompiledModule::from_wat(
            &engine,
            r#"(module (func (export "noop")) (func (export "one") (result i32) i32.const 1))"#,
        )
        .unwrap();

        assert_eq!(module.exports().names(), vec!["noop", "one"]);

        let debug_str = format!("{module:?}");
        assert!(debug_str.contains("CompiledModule"));
        assert!(debug_str.contains("content_hash"));
    }
}
