// Script errors
//
// Every failure inside the engine is one of these. None of them is allowed to
// escape into the host tick loop; public entry points log and report them.

use std::time::Duration;

use codeblock_types::TypeConversionError;

use crate::host::HostError;

/// Errors raised while executing scripts
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScriptError {
    /// A parameter was missing or unusable
    #[error("Invalid parameter '{param}': {reason}")]
    Validation { param: String, reason: String },

    /// A value could not be coerced
    #[error("Conversion failed: {0}")]
    Conversion(#[from] TypeConversionError),

    /// No handler is registered for the action id
    #[error("Unknown action: {0}")]
    UnknownAction(String),

    /// The chain ran deeper than the recursion budget
    #[error("Recursion limit of {limit} blocks exceeded")]
    RecursionLimit { limit: usize },

    /// The owner already runs the maximum number of loops
    #[error("{owner} already has {limit} active loops")]
    ConcurrencyLimit { owner: String, limit: usize },

    /// A handler failed or panicked
    #[error("Action '{action}' failed: {message}")]
    RuntimeHandler { action: String, message: String },

    /// A loop ran past its wall-clock ceiling
    #[error("Loop {loop_id} timed out after {elapsed:?}")]
    Timeout { loop_id: u64, elapsed: Duration },
}

impl ScriptError {
    /// Create a validation error
    pub fn validation(param: impl Into<String>, reason: impl Into<String>) -> Self {
        ScriptError::Validation {
            param: param.into(),
            reason: reason.into(),
        }
    }

    /// Create a handler failure
    pub fn handler(action: impl Into<String>, message: impl Into<String>) -> Self {
        ScriptError::RuntimeHandler {
            action: action.into(),
            message: message.into(),
        }
    }

    /// Wrap a host failure raised while running `action`
    pub fn host(action: &str, err: HostError) -> Self {
        ScriptError::handler(action, err.to_string())
    }

    /// Whether this error stops the rest of the chain
    ///
    /// Validation and conversion failures stay local to the action.
    pub fn is_chain_stopping(&self) -> bool {
        !matches!(
            self,
            ScriptError::Validation { .. } | ScriptError::Conversion(_)
        )
    }
}

/// Result type for script operations
pub type ScriptResult<T> = Result<T, ScriptError>;

#[cfg(test)]
mod tests {
    use super::*;
    use codeblock_types::ValueKind;

    #[test]
    fn test_chain_stopping_classification() {
        assert!(!ScriptError::validation("amount", "missing").is_chain_stopping());
        assert!(
            !ScriptError::from(TypeConversionError::Incompatible {
                from: ValueKind::Location,
                to: ValueKind::Number,
            })
            .is_chain_stopping()
        );
        assert!(ScriptError::UnknownAction("nope".into()).is_chain_stopping());
        assert!(ScriptError::RecursionLimit { limit: 50 }.is_chain_stopping());
    }

    #[test]
    fn test_messages_are_readable() {
        let err = ScriptError::validation("message", "required parameter is missing");
        assert_eq!(
            err.to_string(),
            "Invalid parameter 'message': required parameter is missing"
        );
    }
}
