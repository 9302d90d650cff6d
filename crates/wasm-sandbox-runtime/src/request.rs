//! Invocation request and outcome types.

use wasm_sandbox_common::{ErrorClass, SandboxError, TrapCause, Word};
use wasm_sandbox_core::{ExecutionMetrics, InstanceReport, LogEntry};

/// One `compile + instantiate + invoke` request.
#[derive(Debug, Clone)]
pub struct InvocationRequest {
    /// Raw WebAssembly bytecode.
    pub bytecode: Vec<u8>,

    /// Name of the exported function to call.
    pub function: String,

    /// Arguments, in declaration order.
    pub args: Vec<Word>,

    /// Request identifier; generated when absent.
    pub request_id: Option<String>,
}

impl InvocationRequest {
    /// Create a request with no arguments.
    pub fn new(bytecode: impl Into<Vec<u8>>, function: impl Into<String>) -> Self {
        Self {
            bytecode: bytecode.into(),
            function: function.into(),
            args: Vec::new(),
            request_id: None,
        }
    }

    /// Set the call arguments.
    #[must_use]
    pub fn with_args(mut self, args: Vec<Word>) -> Self {
        self.args = args;
        self
    }

    /// Set an explicit request identifier.
    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}

/// Result of a successful invocation.
#[derive(Debug, Clone)]
pub struct InvocationOutcome {
    pub request_id: String,

    /// Result words, in declaration order.
    pub results: Vec<Word>,

    /// Guest logs and console lines, in emission order.
    pub logs: Vec<LogEntry>,

    pub metrics: ExecutionMetrics,
}

impl InvocationOutcome {
    pub(crate) fn new(request_id: String, results: Vec<Word>, report: InstanceReport) -> Self {
        Self {
            request_id,
            results,
            logs: report.logs,
            metrics: report.metrics,
        }
    }
}

/// A failed invocation, with whatever the guest logged before it failed.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct InvocationFailure {
    /// `None` when the request was rejected before it was assigned one.
    pub request_id: Option<String>,

    pub error: SandboxError,

    /// Guest logs and console lines recorded up to the failure.
    pub logs: Vec<LogEntry>,
}

impl InvocationFailure {
    pub(crate) fn new(request_id: String, error: SandboxError, logs: Vec<LogEntry>) -> Self {
        Self {
            request_id: Some(request_id),
            error,
            logs,
        }
    }

    /// Class of the underlying error.
    pub fn class(&self) -> ErrorClass {
        self.error.class()
    }

    /// Trap cause, if the guest faulted.
    pub fn trap_cause(&self) -> Option<TrapCause> {
        self.error.trap_cause()
    }

    /// Whether the request itself was at fault.
    pub fn is_bad_input(&self) -> bool {
        self.error.is_bad_input()
    }
}

impl From<SandboxError> for InvocationFailure {
    fn from(error: SandboxError) -> Self {
        Self {
            request_id: None,
            error,
            logs: Vec::new(),
        }
    }
}
