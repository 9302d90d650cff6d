//! The runtime lifecycle manager.
//!
//! [`Runtime`] owns the shared [`WasmEngine`] and the host capability table,
//! which is built exactly once at creation and frozen. Each call to
//! [`Runtime::execute`] walks one invocation through
//! `Loaded -> Compiled -> Instantiated -> Running -> {Completed | Trapped}`
//! and releases the instance and artifact before returning.

use std::sync::Arc;
use std::time::Instant;

use tracing::{Span, debug, field, info, instrument, warn};
use uuid::Uuid;

use wasm_sandbox_common::{ExecutionConfig, RuntimeConfig, SandboxError};
use wasm_sandbox_core::{CompiledModule, HostImports, LiveInstance, LogEntry, Phase, WasmEngine};
use wasm_sandbox_host::host_imports;

use crate::cache::ModuleCache;
use crate::request::{InvocationFailure, InvocationOutcome, InvocationRequest};

/// Shared handle to an engine and its host capability table.
///
/// Cloning is cheap; all clones drive the same engine.
#[derive(Clone)]
pub struct Runtime {
    engine: WasmEngine,
    imports: Arc<HostImports>,
    cache: Option<Arc<ModuleCache>>,
    exec_config: ExecutionConfig,
}

impl Runtime {
    /// Create the engine and install the host capability table.
    ///
    /// # Errors
    ///
    /// - [`SandboxError::InvalidConfig`] if the engine cannot be configured
    /// - [`SandboxError::HostBinding`] if the capability table cannot be
    ///   installed
    pub fn create(config: &RuntimeConfig) -> Result<Self, SandboxError> {
        let engine = WasmEngine::new(&config.engine)?;
        let imports = Arc::new(host_imports(&engine, config.capabilities.clone())?);

        let cache = config
            .engine
            .cache_compiled_modules
            .then(|| Arc::new(ModuleCache::new(config.engine.cache_capacity)));

        info!(
            cache = cache.is_some(),
            fuel_metering = config.engine.fuel_metering,
            "Runtime created"
        );

        Ok(Self {
            engine,
            imports,
            cache,
            exec_config: config.execution.clone(),
        })
    }

    /// Compile `bytes`, going through the artifact cache when enabled.
    ///
    /// # Errors
    ///
    /// - [`SandboxError::EngineClosed`] after shutdown
    /// - [`SandboxError::Compile`] for malformed bytecode
    pub fn compile(&self, bytes: &[u8]) -> Result<CompiledModule, SandboxError> {
        match &self.cache {
            Some(cache) => cache.get_or_compile(&self.engine, bytes),
            None => CompiledModule::compile(&self.engine, bytes),
        }
    }

    /// Instantiate `module` against the host capability table.
    ///
    /// # Errors
    ///
    /// See [`LiveInstance::instantiate`].
    pub fn instantiate(
        &self,
        module: &CompiledModule,
        request_id: impl Into<String>,
    ) -> Result<LiveInstance, SandboxError> {
        LiveInstance::instantiate(
            &self.engine,
            module,
            &self.imports,
            &self.exec_config,
            request_id,
        )
    }

    /// Compile, instantiate and invoke in one call.
    ///
    /// The instance and, unless cached, the artifact are released before
    /// this returns, whatever the outcome.
    ///
    /// # Errors
    ///
    /// An [`InvocationFailure`] wrapping the [`SandboxError`] from the stage
    /// that failed. If the function ran, the failure carries the logs it
    /// recorded before faulting.
    #[instrument(
        skip(self, request),
        fields(function = %request.function, request_id = field::Empty)
    )]
    pub fn execute(
        &self,
        request: &InvocationRequest,
    ) -> Result<InvocationOutcome, InvocationFailure> {
        let start = Instant::now();
        let request_id = request
            .request_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        Span::current().record("request_id", request_id.as_str());

        debug!(phase = %Phase::Loaded, bytes = request.bytecode.len(), "Executing");

        let failed = |error: SandboxError, logs: Vec<LogEntry>| {
            warn!(error = %error, class = ?error.class(), "Execution failed");
            InvocationFailure::new(request_id.clone(), error, logs)
        };

        let module = self
            .compile(&request.bytecode)
            .map_err(|e| failed(e, Vec::new()))?;
        debug!(phase = %Phase::Compiled, content_hash = %module.content_hash(), "Artifact ready");

        let mut instance = self
            .instantiate(&module, request_id.clone())
            .map_err(|e| failed(e, Vec::new()))?;
        let result = instance.invoke(&request.function, &request.args);
        let report = instance.finish();

        match result {
            Ok(results) => {
                info!(
                    duration_us = start.elapsed().as_micros(),
                    results = results.len(),
                    logs = report.logs.len(),
                    "Execution completed"
                );
                Ok(InvocationOutcome::new(request_id, results, report))
            }
            Err(e) => Err(failed(e, report.logs)),
        }
    }

    /// Close the engine and drop every cached artifact.
    ///
    /// Returns `true` on the first call and `false` afterwards.
    pub fn shutdown(&self) -> bool {
        if !self.engine.shutdown() {
            return false;
        }

        if let Some(cache) = &self.cache {
            cache.clear();
        }

        info!(
            live_artifacts = self.engine.live_artifacts(),
            live_instances = self.engine.live_instances(),
            "Runtime shut down"
        );
        true
    }

    /// The shared engine.
    pub fn engine(&self) -> &WasmEngine {
        &self.engine
    }

    /// The frozen host capability table.
    pub fn imports(&self) -> &HostImports {
        &self.imports
    }

    /// The artifact cache, if enabled.
    pub fn cache(&self) -> Option<&ModuleCache> {
        self.cache.as_deref()
    }

    /// Returns `true` once [`Runtime::shutdown`] has run.
    pub fn is_closed(&self) -> bool {
        self.engine.is_closed()
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("engine", &self.engine)
            .field("capabilities", self.imports.capabilities())
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}
