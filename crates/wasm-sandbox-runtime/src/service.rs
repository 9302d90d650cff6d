//! Service lifecycle around a [`Runtime`].
//!
//! [`RuntimeService`] is the boundary an orchestration layer (CLI, network
//! service, scheduled job) talks to. It accepts work only while running,
//! runs each invocation on Tokio's blocking pool, and on `stop` waits for
//! every in-flight invocation before shutting the runtime down.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, info};

use wasm_sandbox_common::{RuntimeConfig, SandboxError};

use crate::request::{InvocationFailure, InvocationOutcome, InvocationRequest};
use crate::runtime::Runtime;

/// Lifecycle state of a [`RuntimeService`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    /// Built but not yet accepting work.
    Created,
    /// Accepting work.
    Running,
    /// Draining in-flight work before shutdown.
    Stopping,
    /// Runtime shut down.
    Stopped,
}

/// Runtime with a start/stop lifecycle and async execution.
///
/// Cloning is cheap; all clones share state.
#[derive(Clone)]
pub struct RuntimeService {
    inner: Arc<ServiceInner>,
}

struct ServiceInner {
    runtime: Runtime,
    state: Mutex<ServiceState>,
    in_flight: AtomicUsize,
    drained: Notify,
}

/// Marks one admitted invocation; dropping it completes the invocation.
struct InFlight {
    inner: Arc<ServiceInner>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if self.inner.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.inner.drained.notify_waiters();
        }
    }
}

impl RuntimeService {
    /// Wrap an existing runtime.
    pub fn new(runtime: Runtime) -> Self {
        Self {
            inner: Arc::new(ServiceInner {
                runtime,
                state: Mutex::new(ServiceState::Created),
                in_flight: AtomicUsize::new(0),
                drained: Notify::new(),
            }),
        }
    }

    /// Create the runtime from configuration and wrap it.
    ///
    /// # Errors
    ///
    /// See [`Runtime::create`].
    pub fn from_config(config: &RuntimeConfig) -> Result<Self, SandboxError> {
        Ok(Self::new(Runtime::create(config)?))
    }

    /// Start accepting work.
    ///
    /// Starting a running service is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::ServiceUnavailable`] once the service has
    /// been stopped; a stopped service cannot be restarted.
    pub fn start(&self) -> Result<(), SandboxError> {
        let mut state = self.inner.state.lock();
        match *state {
            ServiceState::Created => {
                *state = ServiceState::Running;
                info!("Runtime service started");
                Ok(())
            }
            ServiceState::Running => Ok(()),
            ServiceState::Stopping | ServiceState::Stopped => Err(
                SandboxError::service_unavailable("service has been stopped"),
            ),
        }
    }

    /// Execute a request on the blocking pool.
    ///
    /// # Errors
    ///
    /// - [`SandboxError::ServiceUnavailable`] if the service is not running
    /// - any failure from [`Runtime::execute`]
    pub async fn execute(
        &self,
        request: InvocationRequest,
    ) -> Result<InvocationOutcome, InvocationFailure> {
        let permit = self.admit()?;
        let runtime = self.inner.runtime.clone();

        // The permit moves into the task so a cancelled caller cannot end the
        // drain while the invocation is still running.
        let task = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            runtime.execute(&request)
        });

        task.await.map_err(|e| {
            InvocationFailure::from(SandboxError::service_unavailable(format!(
                "execution task failed: {e}"
            )))
        })?
    }

    /// Admit one invocation if the service is running.
    fn admit(&self) -> Result<InFlight, SandboxError> {
        let state = self.inner.state.lock();
        if *state != ServiceState::Running {
            debug!(state = ?*state, "Rejecting invocation");
            return Err(SandboxError::service_unavailable(format!(
                "service is {}",
                state_name(*state)
            )));
        }

        self.inner.in_flight.fetch_add(1, Ordering::AcqRel);
        Ok(InFlight {
            inner: Arc::clone(&self.inner),
        })
    }

    /// Stop accepting work, wait for in-flight invocations, then shut the
    /// runtime down.
    ///
    /// Returns `true` if this call performed the stop, `false` if the
    /// service was already stopping or stopped.
    pub async fn stop(&self) -> bool {
        {
            let mut state = self.inner.state.lock();
            match *state {
                ServiceState::Stopping | ServiceState::Stopped => return false,
                ServiceState::Created | ServiceState::Running => {
                    *state = ServiceState::Stopping;
                }
            }
        }

        info!(in_flight = self.in_flight(), "Stopping runtime service");

        loop {
            let notified = self.inner.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.inner.in_flight.load(Ordering::Acquire) == 0 {
                break;
            }
            notified.await;
        }

        self.inner.runtime.shutdown();
        *self.inner.state.lock() = ServiceState::Stopped;

        info!("Runtime service stopped");
        true
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ServiceState {
        *self.inner.state.lock()
    }

    /// Number of invocations currently executing.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::Acquire)
    }

    /// The wrapped runtime.
    pub fn runtime(&self) -> &Runtime {
        &self.inner.runtime
    }
}

fn state_name(state: ServiceState) -> &'static str {
    match state {
        ServiceState::Created => "not started",
        ServiceState::Running => "running",
        ServiceState::Stopping => "stopping",
        ServiceState::Stopped => "stopped",
    }
}

impl std::fmt::Debug for RuntimeService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeService")
            .field("state", &self.state())
            .field("in_flight", &self.in_flight())
            .finish_non_exhaustive()
    }
}
