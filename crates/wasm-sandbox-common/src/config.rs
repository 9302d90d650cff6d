//! Configuration structures for wasm-sandbox.
//!
//! This module defines configuration options for various components:
//! - [`RuntimeConfig`]: Top-level configuration containing all settings
//! - [`EngineConfig`]: Wasmtime engine settings (pooling, fuel, artifact cache)
//! - [`ExecutionConfig`]: Per-invocation limits (fuel budget, memory, console buffer)
//! - [`Capabilities`]: Which host capability groups are linked

use serde::{Deserialize, Serialize};

/// Top-level runtime configuration.
///
/// This structure contains all configuration options for the sandbox.
/// It can be loaded from files (TOML, JSON).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RuntimeConfig {
    /// Wasmtime engine configuration.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Per-invocation execution configuration.
    #[serde(default)]
    pub execution: ExecutionConfig,

    /// Host capabilities exposed to modules.
    #[serde(default)]
    pub capabilities: Capabilities,
}

/// Wasmtime engine configuration.
///
/// These settings affect the global Wasmtime engine behavior,
/// including memory allocation strategy and the artifact cache.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Enable pooling allocator for high-performance instance creation.
    ///
    /// When enabled, memory is pre-allocated for a pool of instances.
    #[serde(default = "defaults::pooling_allocator")]
    pub pooling_allocator: bool,

    /// Maximum concurrent instances in the pool.
    ///
    /// Only effective when `pooling_allocator` is enabled.
    #[serde(default = "defaults::max_instances")]
    pub max_instances: u32,

    /// Memory per instance slot in megabytes.
    ///
    /// Only effective when `pooling_allocator` is enabled.
    #[serde(default = "defaults::instance_memory_mb")]
    pub instance_memory_mb: u32,

    /// Enable fuel metering.
    ///
    /// When disabled (the default) guest execution is unbounded.
    #[serde(default)]
    pub fuel_metering: bool,

    /// Maximum native stack, in kilobytes, available to guest code.
    #[serde(default = "defaults::max_wasm_stack_kb")]
    pub max_wasm_stack_kb: u32,

    /// Keep compiled artifacts in memory, keyed by content hash.
    ///
    /// Disabled by default: every execution recompiles its bytecode.
    #[serde(default)]
    pub cache_compiled_modules: bool,

    /// Maximum number of cached artifacts before the oldest is evicted.
    #[serde(default = "defaults::cache_capacity")]
    pub cache_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pooling_allocator: defaults::pooling_allocator(),
            max_instances: defaults::max_instances(),
            instance_memory_mb: defaults::instance_memory_mb(),
            fuel_metering: false,
            max_wasm_stack_kb: defaults::max_wasm_stack_kb(),
            cache_compiled_modules: false,
            cache_capacity: defaults::cache_capacity(),
        }
    }
}

impl EngineConfig {
    /// Maximum wasm stack size in bytes.
    pub fn max_wasm_stack_bytes(&self) -> usize {
        (self.max_wasm_stack_kb as usize) * 1024
    }
}

/// Per-invocation execution configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExecutionConfig {
    /// Fuel budget per invocation.
    ///
    /// Only effective when [`EngineConfig::fuel_metering`] is enabled.
    #[serde(default = "defaults::max_fuel")]
    pub max_fuel: u64,

    /// Maximum linear memory in megabytes.
    #[serde(default = "defaults::max_memory_mb")]
    pub max_memory_mb: u32,

    /// Bytes each console stream (stdout, stderr) may buffer during one
    /// initialization or one call; drained output is released.
    #[serde(default = "defaults::console_buffer_bytes")]
    pub console_buffer_bytes: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_fuel: defaults::max_fuel(),
            max_memory_mb: defaults::max_memory_mb(),
            console_buffer_bytes: defaults::console_buffer_bytes(),
        }
    }
}

impl ExecutionConfig {
    /// Maximum linear memory in bytes.
    pub fn max_memory_bytes(&self) -> usize {
        (self.max_memory_mb as usize) * 1024 * 1024
    }
}

/// Host capability groups linked into every instance.
///
/// Nothing outside these groups is reachable from guest code: no
/// filesystem, no network, no environment. Turning a group off removes its
/// imports from the linker entirely, so modules that need it fail to
/// instantiate instead of silently running without it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Capabilities {
    /// `env.log` leveled logging.
    #[serde(default = "defaults::enabled")]
    pub logging: bool,

    /// `wasi_snapshot_preview1` shims with stdout/stderr redirected to the logger.
    #[serde(default = "defaults::enabled")]
    pub console: bool,

    /// Real wall and monotonic clocks for the WASI shims.
    ///
    /// When disabled the clocks read as zero.
    #[serde(default)]
    pub clock: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            logging: true,
            console: true,
            clock: false,
        }
    }
}

impl Capabilities {
    /// A capability set with every group disabled.
    pub fn none() -> Self {
        Self {
            logging: false,
            console: false,
            clock: false,
        }
    }
}

/// Default value functions for serde.
mod defaults {
    pub const fn pooling_allocator() -> bool {
        true
    }

    pub const fn max_instances() -> u32 {
        1000
    }

    pub const fn instance_memory_mb() -> u32 {
        64
    }

    pub const fn max_wasm_stack_kb() -> u32 {
        512
    }

    pub const fn cache_capacity() -> usize {
        128
    }

    pub const fn max_fuel() -> u64 {
        10_000_000
    }

    pub const fn max_memory_mb() -> u32 {
        64
    }

    pub const fn console_buffer_bytes() -> usize {
        1024 * 1024
    }

    pub const fn enabled() -> bool {
        true
    }
}
