//! Wasmtime engine configuration and lifecycle.
//!
//! The [`WasmEngine`] is the foundation of the runtime. It is:
//! - Thread-safe and shared across all invocations
//! - The owner of every artifact and instance created through it
//! - Closed exactly once, after which nothing created from it can run

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tracing::{debug, info, warn};
use wasmtime::{Config, Engine, InstanceAllocationStrategy, PoolingAllocationConfig};

use wasm_sandbox_common::{EngineConfig, SandboxError};

/// Thread-safe WebAssembly engine handle.
///
/// Cloning the handle is cheap; all clones share the same Wasmtime
/// [`Engine`], the same open/closed state and the same live-resource
/// counters.
///
/// # Configuration
///
/// - **Pooling Allocator**: Pre-allocates instance slots for fast instantiation
/// - **Fuel Metering**: Optional deterministic CPU budget (off by default)
/// - **Stack Limit**: Bounds guest recursion so it traps instead of crashing
///
/// # Example
///
/// ```ignore
/// use wasm_sandbox_common::EngineConfig;
/// use wasm_sandbox_core::WasmEngine;
///
/// let engine = WasmEngine::new(&EngineConfig::default())?;
/// // ... compile, instantiate, invoke ...
/// engine.shutdown();
/// ```
#[derive(Clone)]
pub struct WasmEngine {
    shared: Arc<EngineShared>,
}

struct EngineShared {
    engine: Engine,
    config: EngineConfig,
    closed: AtomicBool,
    live_artifacts: AtomicUsize,
    live_instances: AtomicUsize,
}

/// What a [`TrackingGuard`] accounts for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Tracked {
    Artifact,
    Instance,
}

/// Keeps one artifact or instance counted as live until dropped.
pub(crate) struct TrackingGuard {
    engine: WasmEngine,
    kind: Tracked,
}

impl WasmEngine {
    /// Create a new WebAssembly engine with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::InvalidConfig`] if Wasmtime rejects the
    /// configuration.
    pub fn new(config: &EngineConfig) -> Result<Self, SandboxError> {
        let mut wasmtime_config = Config::new();

        wasmtime_config.consume_fuel(config.fuel_metering);
        wasmtime_config.max_wasm_stack(config.max_wasm_stack_bytes());
        wasmtime_config.cranelift_opt_level(wasmtime::OptLevel::Speed);

        if config.pooling_allocator {
            let pooling_config = Self::create_pooling_config(config);

            wasmtime_config
                .allocation_strategy(InstanceAllocationStrategy::Pooling(pooling_config));

            info!(
                max_instances = config.max_instances,
                instance_memory_mb = config.instance_memory_mb,
                "Pooling allocator enabled"
            );
        }

        let engine = Engine::new(&wasmtime_config).map_err(|e| {
            SandboxError::invalid_config(format!("Failed to create Wasmtime engine: {e}"))
        })?;

        info!(
            fuel_metering = config.fuel_metering,
            max_wasm_stack_kb = config.max_wasm_stack_kb,
            "Wasmtime engine initialized"
        );

        Ok(Self {
            shared: Arc::new(EngineShared {
                engine,
                config: config.clone(),
                closed: AtomicBool::new(false),
                live_artifacts: AtomicUsize::new(0),
                live_instances: AtomicUsize::new(0),
            }),
        })
    }

    /// Create pooling allocation configuration.
    fn create_pooling_config(config: &EngineConfig) -> PoolingAllocationConfig {
        let mut pooling = PoolingAllocationConfig::default();

        pooling.total_core_instances(config.max_instances);
        pooling.total_memories(config.max_instances);
        pooling.total_tables(config.max_instances);

        let max_memory_bytes = (config.instance_memory_mb as usize) * 1024 * 1024;
        pooling.max_memory_size(max_memory_bytes);

        pooling
    }

    /// Get a reference to the inner Wasmtime engine.
    pub fn inner(&self) -> &Engine {
        &self.shared.engine
    }

    /// Get the engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    /// Returns `true` if `engine` is the Wasmtime engine behind this handle.
    pub fn owns(&self, engine: &Engine) -> bool {
        Engine::same(&self.shared.engine, engine)
    }

    /// Returns `true` once [`shutdown`](Self::shutdown) has been called.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Fail with [`SandboxError::EngineClosed`] if the engine is closed.
    pub fn ensure_open(&self) -> Result<(), SandboxError> {
        if self.is_closed() {
            return Err(SandboxError::EngineClosed);
        }
        Ok(())
    }

    /// Close the engine.
    ///
    /// Every artifact and instance created through this engine becomes
    /// unusable: further compile, instantiate and invoke calls fail with
    /// [`SandboxError::EngineClosed`]. Returns `true` on the call that closed
    /// the engine and `false` on every later call.
    ///
    /// No invocation may be in flight across this call.
    pub fn shutdown(&self) -> bool {
        if self
            .shared
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Engine already closed");
            return false;
        }

        let live_instances = self.live_instances();
        if live_instances > 0 {
            warn!(live_instances, "Engine closed with live instances outstanding");
        }

        info!(
            live_artifacts = self.live_artifacts(),
            live_instances, "Engine shut down"
        );
        true
    }

    /// Number of compiled artifacts currently alive.
    pub fn live_artifacts(&self) -> usize {
        self.shared.live_artifacts.load(Ordering::Acquire)
    }

    /// Number of instances currently alive.
    pub fn live_instances(&self) -> usize {
        self.shared.live_instances.load(Ordering::Acquire)
    }

    /// Count one more live artifact or instance until the guard drops.
    pub(crate) fn track(&self, kind: Tracked) -> TrackingGuard {
        self.counter(kind).fetch_add(1, Ordering::AcqRel);
        TrackingGuard {
            engine: self.clone(),
            kind,
        }
    }

    fn counter(&self, kind: Tracked) -> &AtomicUsize {
        match kind {
            Tracked::Artifact => &self.shared.live_artifacts,
            Tracked::Instance => &self.shared.live_instances,
        }
    }
}

impl TrackingGuard {
    /// The engine this guard reports to.
    pub(crate) fn engine(&self) -> &WasmEngine {
        &self.engine
    }
}

impl Drop for TrackingGuard {
    fn drop(&mut self) {
        self.engine.counter(self.kind).fetch_sub(1, Ordering::AcqRel);
    }
}

impl std::fmt::Debug for WasmEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasmEngine")
            .field("pooling_allocator", &self.config().pooling_allocator)
            .field("fuel_metering", &self.config().fuel_metering)
            .field("closed", &self.is_closed())
            .field("live_instances", &self.live_instances())
            .finish_non_exhaustive()
    }
}
