//! Error types for wasm-sandbox.
//!
//! Every stage of an invocation (engine start-up, compilation, instantiation,
//! dispatch, execution) reports failures through [`SandboxError`]. Errors are
//! grouped into three [`ErrorClass`]es so that orchestration layers can tell
//! bad input from runtime faults from system failures without matching on
//! every variant.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Top-level sandbox errors.
#[derive(Error, Debug)]
pub enum SandboxError {
    /// The host capability table could not be installed into the engine.
    ///
    /// Fatal at start-up; never retried.
    #[error("Host binding failed: {reason}")]
    HostBinding {
        /// Description of the binding failure.
        reason: String,
    },

    /// The bytecode failed validation or compilation.
    #[error("Compilation failed: {reason}")]
    Compile {
        /// Diagnostic message from the loader.
        reason: String,
    },

    /// The module could not be instantiated against the host imports.
    #[error("Instantiation failed: {reason}")]
    Instantiate {
        /// Description of the failure (unresolved import, init trap, ...).
        reason: String,
        /// Trap cause when the module's initialization routine trapped.
        cause: Option<TrapCause>,
    },

    /// The requested export does not exist or is not a function.
    #[error("Function not found: {name}")]
    FunctionNotFound {
        /// The missing export name.
        name: String,
    },

    /// The supplied arguments do not fit the export's signature.
    #[error("Argument mismatch for '{function}': {reason}")]
    ArgumentMismatch {
        /// The function being invoked.
        function: String,
        /// What did not match.
        reason: String,
    },

    /// The guest faulted while executing.
    #[error("Execution trapped ({cause}): {message}")]
    ExecutionTrap {
        /// Classified trap cause.
        cause: TrapCause,
        /// Message reported by the execution engine.
        message: String,
    },

    /// The engine has been shut down.
    #[error("Engine is closed")]
    EngineClosed,

    /// The runtime service is not accepting work.
    #[error("Service unavailable: {reason}")]
    ServiceUnavailable {
        /// Why the work was refused.
        reason: String,
    },

    /// Invalid configuration was provided.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        /// Description of the configuration error.
        reason: String,
    },
}

/// Cause tag carried by [`SandboxError::ExecutionTrap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TrapCause {
    /// Out-of-bounds memory or table access.
    OutOfBounds,
    /// Integer division by zero, overflow, or invalid conversion.
    DivideFault,
    /// The guest requested termination (`env.abort`, `proc_exit`).
    ExplicitAbort,
    /// An `unreachable` instruction was executed.
    Unreachable,
    /// The call stack was exhausted.
    StackExhaustion,
    /// A host function returned an error.
    HostCallFailure,
    /// The fuel budget was exhausted.
    OutOfFuel,
    /// Any other engine trap.
    Other,
}

impl TrapCause {
    /// Stable kebab-case tag for this cause.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OutOfBounds => "out-of-bounds",
            Self::DivideFault => "divide-fault",
            Self::ExplicitAbort => "explicit-abort",
            Self::Unreachable => "unreachable",
            Self::StackExhaustion => "stack-exhaustion",
            Self::HostCallFailure => "host-call-failure",
            Self::OutOfFuel => "out-of-fuel",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for TrapCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse classification of a [`SandboxError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The caller supplied bytecode, a name, or arguments that cannot work.
    BadInput,
    /// The module faulted while running.
    RuntimeFault,
    /// Start-up, lifecycle or configuration failure.
    System,
}

impl SandboxError {
    /// Create a new `HostBinding` error.
    pub fn host_binding(reason: impl Into<String>) -> Self {
        Self::HostBinding {
            reason: reason.into(),
        }
    }

    /// Create a new `Compile` error.
    pub fn compile(reason: impl Into<String>) -> Self {
        Self::Compile {
            reason: reason.into(),
        }
    }

    /// Create a new `Instantiate` error without a trap cause.
    pub fn instantiate(reason: impl Into<String>) -> Self {
        Self::Instantiate {
            reason: reason.into(),
            cause: None,
        }
    }

    /// Create a new `FunctionNotFound` error.
    pub fn function_not_found(name: impl Into<String>) -> Self {
        Self::FunctionNotFound { name: name.into() }
    }

    /// Create a new `ArgumentMismatch` error.
    pub fn argument_mismatch(function: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ArgumentMismatch {
            function: function.into(),
            reason: reason.into(),
        }
    }

    /// Create a new `ExecutionTrap` error.
    pub fn trap(cause: TrapCause, message: impl Into<String>) -> Self {
        Self::ExecutionTrap {
            cause,
            message: message.into(),
        }
    }

    /// Create a new `ServiceUnavailable` error.
    pub fn service_unavailable(reason: impl Into<String>) -> Self {
        Self::ServiceUnavailable {
            reason: reason.into(),
        }
    }

    /// Create a new `InvalidConfig` error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Classify this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Compile { .. }
            | Self::Instantiate { .. }
            | Self::FunctionNotFound { .. }
            | Self::ArgumentMismatch { .. } => ErrorClass::BadInput,
            Self::ExecutionTrap { .. } => ErrorClass::RuntimeFault,
            Self::HostBinding { .. }
            | Self::EngineClosed
            | Self::ServiceUnavailable { .. }
            | Self::InvalidConfig { .. } => ErrorClass::System,
        }
    }

    /// Returns the trap cause if this error is an execution trap.
    pub fn trap_cause(&self) -> Option<TrapCause> {
        match self {
            Self::ExecutionTrap { cause, .. } => Some(*cause),
            Self::Instantiate { cause, .. } => *cause,
            _ => None,
        }
    }

    /// Returns `true` if this error was caused by the caller's input.
    pub fn is_bad_input(&self) -> bool {
        self.class() == ErrorClass::BadInput
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SandboxError::function_not_found("missing");
        assert_eq!(err.to_string(), "Function not found: missing");

        let err = SandboxError::trap(TrapCause::OutOfBounds, "memory fault");
        assert_eq!(
            err.to_string(),
            "Execution trapped (out-of-bounds): memory fault"
        );

        assert_eq!(SandboxError::EngineClosed.to_string(), "Engine is closed");
    }

    #[test]
    fn test_error_class() {
        assert_eq!(SandboxError::compile("bad").class(), ErrorClass::BadInput);
        assert_eq!(
            SandboxError::instantiate("unresolved").class(),
            ErrorClass::BadInput
        );
        assert_eq!(
            SandboxError::argument_mismatch("add", "expected 2").class(),
            ErrorClass::BadInput
        );
        assert_eq!(
            SandboxError::trap(TrapCause::Unreachable, "x").class(),
            ErrorClass::RuntimeFault
        );
        assert_eq!(
            SandboxError::host_binding("x").class(),
            ErrorClass::System
        );
        assert_eq!(SandboxError::EngineClosed.class(), ErrorClass::System);
    }

    #[test]
    fn test_trap_cause_accessor() {
        let err = SandboxError::trap(TrapCause::StackExhaustion, "deep");
        assert_eq!(err.trap_cause(), Some(TrapCause::StackExhaustion));

        let err = SandboxError::Instantiate {
            reason: "start trapped".into(),
            cause: Some(TrapCause::Unreachable),
        };
        assert_eq!(err.trap_cause(), Some(TrapCause::Unreachable));

        assert_eq!(SandboxError::compile("x").trap_cause(), None);
    }

    #[test]
    fn test_trap_cause_tags() {
        assert_eq!(TrapCause::DivideFault.to_string(), "divide-fault");
        assert_eq!(TrapCause::HostCallFailure.as_str(), "host-call-failure");

        let json = serde_json::to_string(&TrapCause::ExplicitAbort).unwrap();
        assert_eq!(json, "\"explicit-abort\"");
    }
}
