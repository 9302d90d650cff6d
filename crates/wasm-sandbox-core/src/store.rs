//! Per-instance execution context and store management.
//!
//! This module provides:
//! - [`WorkerContext`]: Per-instance state accessible from host functions
//! - [`LogEntry`], [`LogLevel`] and [`LogSource`]: Guest output as structured logs
//! - [`ExecutionMetrics`]: Performance metrics for each invocation
//! - [`Phase`]: Where an invocation is in its lifecycle

use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};
use wasmtime::{Store, StoreLimits, StoreLimitsBuilder};
use wasmtime_wasi::preview1::WasiP1Ctx;
use wasmtime_wasi::{HostMonotonicClock, HostWallClock, WasiCtxBuilder};

use crate::WasmEngine;
use crate::console::{ConsoleCapture, ConsoleStream};
use wasm_sandbox_common::{Capabilities, ExecutionConfig, SandboxError};

/// Lifecycle phase of one invocation.
///
/// `Loaded -> Compiled -> Instantiated -> Running -> {Completed | Trapped}`,
/// always followed by `Released`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Loaded,
    Compiled,
    Instantiated,
    Running,
    Completed,
    Trapped,
    Released,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::Loaded => "loaded",
            Phase::Compiled => "compiled",
            Phase::Instantiated => "instantiated",
            Phase::Running => "running",
            Phase::Completed => "completed",
            Phase::Trapped => "trapped",
            Phase::Released => "released",
        };
        f.write_str(name)
    }
}

/// Per-instance execution context.
///
/// This struct holds all state specific to a single instance. It is created
/// with the store and destroyed with it.
///
/// Host functions can access this context through the [`wasmtime::Caller`] API.
pub struct WorkerContext {
    /// WASI preview1 context (console shims).
    wasi: WasiP1Ctx,

    /// Captured stdout/stderr.
    console: ConsoleCapture,

    /// Resource limits enforced by the store.
    limits: StoreLimits,

    /// Unique request identifier for tracing.
    pub request_id: String,

    /// Logs collected from guest code, in emission order.
    pub logs: Vec<LogEntry>,

    /// Execution metrics.
    pub metrics: ExecutionMetrics,

    /// Current lifecycle phase.
    phase: Phase,

    /// Context creation time.
    start_time: Instant,
}

/// A single log entry from guest code.
#[derive(Debug, Clone)]
pub struct LogEntry {
    /// Log level (debug, info, warn, error).
    pub level: LogLevel,

    /// Where the entry came from.
    pub source: LogSource,

    /// Log message content.
    pub message: String,

    /// Phase the instance was in when the entry was recorded.
    pub phase: Phase,

    /// Timestamp when the log was recorded.
    pub timestamp: Instant,
}

/// Log level for guest logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug-level messages.
    Debug,
    /// Informational messages.
    Info,
    /// Warning messages.
    Warn,
    /// Error messages.
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

/// Origin of a guest log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogSource {
    /// The `env.log` host function.
    Guest,
    /// A line written to stdout.
    Stdout,
    /// A line written to stderr.
    Stderr,
}

impl LogSource {
    /// Short name used in structured log fields.
    pub const fn as_str(self) -> &'static str {
        match self {
            LogSource::Guest => "log",
            LogSource::Stdout => "stdout",
            LogSource::Stderr => "stderr",
        }
    }
}

/// Execution performance metrics.
#[derive(Debug, Clone, Default)]
pub struct ExecutionMetrics {
    /// Fuel consumed during execution (zero without fuel metering).
    pub fuel_consumed: u64,

    /// Linear memory size in bytes after the call.
    pub memory_used_bytes: usize,

    /// Time from instance creation to the end of the call.
    pub duration: Option<Duration>,
}

/// Clock that always reads zero, used when the clock capability is off.
struct FrozenClock;

impl HostWallClock for FrozenClock {
    fn resolution(&self) -> Duration {
        Duration::from_secs(1)
    }

    fn now(&self) -> Duration {
        Duration::ZERO
    }
}

impl HostMonotonicClock for FrozenClock {
    fn resolution(&self) -> u64 {
        1_000_000_000
    }

    fn now(&self) -> u64 {
        0
    }
}

impl WorkerContext {
    /// Create a new worker context.
    ///
    /// The WASI context has no preopened directories, no environment, no
    /// arguments and no network access; stdout and stderr go to the
    /// console capture.
    pub fn new(request_id: String, capabilities: &Capabilities, config: &ExecutionConfig) -> Self {
        let console = ConsoleCapture::new(config.console_buffer_bytes);

        let mut builder = WasiCtxBuilder::new();
        builder
            .stdout(console.stdout_pipe())
            .stderr(console.stderr_pipe())
            .allow_tcp(false)
            .allow_udp(false)
            .allow_ip_name_lookup(false);

        if !capabilities.clock {
            builder.wall_clock(FrozenClock).monotonic_clock(FrozenClock);
        }

        let limits = StoreLimitsBuilder::new()
            .memory_size(config.max_memory_bytes())
            .build();

        Self {
            wasi: builder.build_p1(),
            console,
            limits,
            request_id,
            logs: Vec::new(),
            metrics: ExecutionMetrics::default(),
            phase: Phase::Compiled,
            start_time: Instant::now(),
        }
    }

    /// Access the WASI preview1 context.
    pub fn wasi_mut(&mut self) -> &mut WasiP1Ctx {
        &mut self.wasi
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub(crate) fn set_phase(&mut self, phase: Phase) {
        debug!(request_id = %self.request_id, %phase, "Phase transition");
        self.phase = phase;
    }

    /// Record a guest log entry and emit it through `tracing`.
    pub fn record(&mut self, level: LogLevel, source: LogSource, message: &str) {
        self.logs.push(LogEntry {
            level,
            source,
            message: message.to_string(),
            phase: self.phase,
            timestamp: Instant::now(),
        });

        let request_id = &self.request_id;
        let stream = source.as_str();
        match level {
            LogLevel::Debug => debug!(request_id, stream, guest_log = true, "{}", message),
            LogLevel::Info => info!(request_id, stream, guest_log = true, "{}", message),
            LogLevel::Warn => warn!(request_id, stream, guest_log = true, "{}", message),
            LogLevel::Error => error!(request_id, stream, guest_log = true, "{}", message),
        }
    }

    /// Forward console output captured since the last drain to the log.
    ///
    /// Stdout lines are logged at info, stderr lines at warn.
    pub fn drain_console(&mut self) {
        for (stream, line) in self.console.drain() {
            match stream {
                ConsoleStream::Stdout => self.record(LogLevel::Info, LogSource::Stdout, &line),
                ConsoleStream::Stderr => self.record(LogLevel::Warn, LogSource::Stderr, &line),
            }
        }
    }

    /// Finalize metrics after execution.
    pub fn finalize_metrics(&mut self) {
        self.metrics.duration = Some(self.start_time.elapsed());
    }
}

/// Create a new Wasmtime store for one instance.
///
/// Installs the memory limiter and, when the engine meters fuel, the
/// invocation's fuel budget.
///
/// # Errors
///
/// Returns an error if fuel cannot be set on the store.
pub fn create_store(
    engine: &WasmEngine,
    config: &ExecutionConfig,
    capabilities: &Capabilities,
    request_id: String,
) -> Result<Store<WorkerContext>, SandboxError> {
    let context = WorkerContext::new(request_id, capabilities, config);
    let mut store = Store::new(engine.inner(), context);
    store.limiter(|ctx| &mut ctx.limits);

    if engine.config().fuel_metering {
        store
            .set_fuel(config.max_fuel)
            .map_err(|e| SandboxError::invalid_config(format!("Failed to set fuel: {e}")))?;
    }

    Ok(store)
}

/// Get remaining fuel from a store.
pub fn get_remaining_fuel(store: &Store<WorkerContext>) -> Option<u64> {
    store.get_fuel().ok()
}

/// Calculate fuel consumed.
pub fn calculate_fuel_consumed(initial_fuel: u64, store: &Store<WorkerContext>) -> u64 {
    let remaining = get_remaining_fuel(store).unwrap_or(0);
    initial_fuel.saturating_sub(remaining)
}
