//! WebAssembly instance lifecycle management.
//!
//! This module provides [`LiveInstance`], which covers one invocation from
//! instantiation to release:
//!
//! 1. Resolve every import against the [`HostImports`] table
//! 2. Instantiate the module in a fresh store (runs its start function)
//! 3. Run the `_initialize` export if the module has one
//! 4. Invoke the requested export and collect results
//! 5. Release the store and instance when the value drops, on every path

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, instrument, warn};
use wasmtime::{Instance, Store};

use crate::engine::{Tracked, TrackingGuard};
use crate::invoke::{ExportTable, decode_results};
use crate::store::{
    ExecutionMetrics, LogEntry, Phase, WorkerContext, calculate_fuel_consumed, create_store,
    get_remaining_fuel,
};
use crate::trap::{execution_trap, instantiate_failure, is_clean_exit};
use crate::{CompiledModule, HostImports, WasmEngine};
use wasm_sandbox_common::{Capabilities, ExecutionConfig, SandboxError, Word};

/// Export name of the WASI reactor initialization routine.
const INITIALIZE_EXPORT: &str = "_initialize";

/// One live, isolated instance of a compiled module.
///
/// The instance owns its store: linear memory, tables and globals belong to
/// this value alone and are freed when it drops. Dropping also removes the
/// instance from its engine's live count.
pub struct LiveInstance {
    // Field order matters: the store is released before the guard
    // decrements the engine's live-instance count.
    store: Store<WorkerContext>,
    instance: Instance,
    exports: Arc<ExportTable>,
    content_hash: String,
    guard: TrackingGuard,
}

/// Logs and metrics left behind by a finished instance.
#[derive(Debug, Clone, Default)]
pub struct InstanceReport {
    pub logs: Vec<LogEntry>,
    pub metrics: ExecutionMetrics,
}

impl LiveInstance {
    /// Instantiate `module` against `imports`.
    ///
    /// Console output produced by the module's initialization is forwarded
    /// to the log before this returns, with [`Phase::Instantiated`].
    ///
    /// # Errors
    ///
    /// - [`SandboxError::EngineClosed`] if the engine has been shut down
    /// - [`SandboxError::Instantiate`] if an import is unresolved, the
    ///   artifact or imports belong to another engine, or initialization
    ///   traps
    #[instrument(
        skip(engine, module, imports, config, request_id),
        fields(content_hash = %module.content_hash())
    )]
    pub fn instantiate(
        engine: &WasmEngine,
        module: &CompiledModule,
        imports: &HostImports,
        config: &ExecutionConfig,
        request_id: impl Into<String>,
    ) -> Result<Self, SandboxError> {
        engine.ensure_open()?;

        if !engine.owns(module.inner().engine()) {
            return Err(SandboxError::instantiate(
                "artifact was compiled by a different engine",
            ));
        }
        if !imports.belongs_to(engine) {
            return Err(SandboxError::instantiate(
                "host imports were built for a different engine",
            ));
        }

        // Declared before the store so that, on early return, the store is
        // released before the count drops.
        let guard = engine.track(Tracked::Instance);
        let mut store = create_store(engine, config, imports.capabilities(), request_id.into())?;

        resolve_imports(module, imports, &mut store, imports.capabilities())?;

        debug!("Instantiating module");

        let instance = match imports.linker().instantiate(&mut store, module.inner()) {
            Ok(instance) => instance,
            Err(e) => {
                store.data_mut().drain_console();
                warn!(error = %e, "Instantiation failed");
                return Err(instantiate_failure(&e));
            }
        };

        let mut live = Self {
            store,
            instance,
            exports: Arc::clone(module.exports()),
            content_hash: module.content_hash().to_string(),
            guard,
        };

        live.run_initializer()?;
        // Initialization has finished, so an unterminated line is complete.
        live.store.data_mut().set_phase(Phase::Instantiated);
        live.store.data_mut().drain_console();

        Ok(live)
    }

    /// Call the `_initialize` export, if present.
    fn run_initializer(&mut self) -> Result<(), SandboxError> {
        if !self
            .exports
            .get(INITIALIZE_EXPORT)
            .is_some_and(|sig| sig.is_nullary())
        {
            return Ok(());
        }

        let init = self
            .instance
            .get_typed_func::<(), ()>(&mut self.store, INITIALIZE_EXPORT)
            .map_err(|e| instantiate_failure(&e))?;

        init.call(&mut self.store, ()).map_err(|e| {
            self.store.data_mut().drain_console();
            warn!(error = %e, "Module initializer trapped");
            instantiate_failure(&e)
        })
    }

    /// Invoke the exported function `name` with `args`.
    ///
    /// # Errors
    ///
    /// - [`SandboxError::EngineClosed`] if the engine has been shut down
    /// - [`SandboxError::FunctionNotFound`] if no such function is exported
    /// - [`SandboxError::ArgumentMismatch`] if `args` do not fit the signature
    /// - [`SandboxError::ExecutionTrap`] if the guest faults or exits
    ///
    /// A WASI `proc_exit(0)` from a function with no results counts as
    /// completion and returns no words.
    #[instrument(skip(self, args), fields(function = %name, request_id = %self.request_id()))]
    pub fn invoke(&mut self, name: &str, args: &[Word]) -> Result<Vec<Word>, SandboxError> {
        self.guard.engine().ensure_open()?;

        let signature = self.exports.resolve(name)?;
        let params = signature.encode_args(name, args)?;
        let mut results = signature.result_slots(name)?;

        let func = self
            .instance
            .get_func(&mut self.store, name)
            .ok_or_else(|| SandboxError::function_not_found(name))?;

        let start = Instant::now();
        let initial_fuel = get_remaining_fuel(&self.store).unwrap_or(0);

        self.store.data_mut().set_phase(Phase::Running);
        let outcome = func.call(&mut self.store, &params, &mut results);
        self.store.data_mut().drain_console();

        let fuel_consumed = calculate_fuel_consumed(initial_fuel, &self.store);
        let memory_used_bytes = self.memory_size();
        {
            let ctx = self.store.data_mut();
            ctx.metrics.fuel_consumed = fuel_consumed;
            ctx.metrics.memory_used_bytes = memory_used_bytes;
            ctx.finalize_metrics();
        }

        let duration = start.elapsed();

        match outcome {
            Ok(()) => {
                self.store.data_mut().set_phase(Phase::Completed);
                info!(
                    duration_us = duration.as_micros(),
                    fuel_consumed, "Invocation completed"
                );
                decode_results(name, &results)
            }
            // `proc_exit(0)` ends a function without results successfully.
            Err(e) if results.is_empty() && is_clean_exit(&e) => {
                self.store.data_mut().set_phase(Phase::Completed);
                info!(
                    duration_us = duration.as_micros(),
                    fuel_consumed, "Invocation exited cleanly"
                );
                Ok(Vec::new())
            }
            Err(e) => {
                self.store.data_mut().set_phase(Phase::Trapped);
                let trap = execution_trap(&e);
                error!(
                    duration_us = duration.as_micros(),
                    fuel_consumed,
                    cause = ?trap.trap_cause(),
                    error = %e,
                    "Invocation trapped"
                );
                Err(trap)
            }
        }
    }

    /// Size of the exported `memory`, if any.
    fn memory_size(&mut self) -> usize {
        self.instance
            .get_memory(&mut self.store, "memory")
            .map_or(0, |memory| memory.data_size(&self.store))
    }

    /// Release the instance, returning its logs and metrics.
    pub fn finish(mut self) -> InstanceReport {
        let ctx = self.store.data_mut();
        InstanceReport {
            logs: std::mem::take(&mut ctx.logs),
            metrics: std::mem::take(&mut ctx.metrics),
        }
    }

    /// Exported functions of this instance.
    pub fn exports(&self) -> &ExportTable {
        &self.exports
    }

    /// Logs recorded so far.
    pub fn logs(&self) -> &[LogEntry] {
        &self.store.data().logs
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> Phase {
        self.store.data().phase()
    }

    /// Request identifier this instance was created for.
    pub fn request_id(&self) -> &str {
        &self.store.data().request_id
    }

    /// Content hash of the artifact this instance was created from.
    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }
}

/// Check every import against the host table before instantiating.
fn resolve_imports(
    module: &CompiledModule,
    imports: &HostImports,
    store: &mut Store<WorkerContext>,
    capabilities: &Capabilities,
) -> Result<(), SandboxError> {
    for import in module.imports() {
        if imports.linker().get_by_import(&mut *store, &import).is_none() {
            warn!(
                module = import.module(),
                name = import.name(),
                ?capabilities,
                "Unresolved import"
            );
            return Err(SandboxError::instantiate(format!(
                "unresolved import `{}::{}`",
                import.module(),
                import.name()
            )));
        }
    }
    Ok(())
}

impl Drop for LiveInstance {
    fn drop(&mut self) {
        let ctx = self.store.data_mut();
        ctx.set_phase(Phase::Released);
    }
}

impl std::fmt::Debug for LiveInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveInstance")
            .field("content_hash", &self.content_hash)
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}
