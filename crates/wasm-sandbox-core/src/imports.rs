//! The host capability table.
//!
//! [`HostImports`] wraps the Wasmtime linker every instance is resolved
//! against, together with the [`Capabilities`] it was built for. Host
//! functions are registered through [`HostImports::linker_mut`] while the
//! table is being built; afterwards the table is shared behind an `Arc` and
//! never changes.

use wasmtime::Linker;

use crate::WasmEngine;
use crate::store::WorkerContext;
use wasm_sandbox_common::Capabilities;

/// Host functions available to guest modules.
pub struct HostImports {
    linker: Linker<WorkerContext>,
    capabilities: Capabilities,
    engine: WasmEngine,
}

impl HostImports {
    /// Create an empty table for `engine`.
    pub fn new(engine: &WasmEngine, capabilities: Capabilities) -> Self {
        Self {
            linker: Linker::new(engine.inner()),
            capabilities,
            engine: engine.clone(),
        }
    }

    /// Get a mutable reference to the linker.
    ///
    /// Use this to register host functions while building the table.
    pub fn linker_mut(&mut self) -> &mut Linker<WorkerContext> {
        &mut self.linker
    }

    /// Get the linker.
    pub fn linker(&self) -> &Linker<WorkerContext> {
        &self.linker
    }

    /// Capabilities this table was built for.
    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// Returns `true` if this table was built for `engine`.
    pub fn belongs_to(&self, engine: &WasmEngine) -> bool {
        engine.owns(self.engine.inner())
    }
}

impl std::fmt::Debug for HostImports {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostImports")
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}
