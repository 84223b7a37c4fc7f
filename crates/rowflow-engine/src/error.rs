//! Engine error model.

use rowflow_types::StepError;
use thiserror::Error;

/// Categorized engine error.
///
/// `Step` wraps a typed [`StepError`] with the name of the step it came
/// from. `Lifecycle` flags misuse of the single-use pipeline state
/// machine. `Infrastructure` wraps opaque host-side errors (config
/// parsing, thread spawn failures, poisoned locks).
#[derive(Debug, Error)]
pub enum EngineError {
    /// Typed error from a named step.
    #[error("step '{step}': {source}")]
    Step {
        step: String,
        #[source]
        source: StepError,
    },
    /// Pipeline operation called in the wrong lifecycle state.
    #[error("invalid pipeline operation: {0}")]
    Lifecycle(String),
    /// An extension handler aborted the run.
    #[error("extension point '{event}' handler '{handler}' aborted: {message}")]
    ExtensionAbort {
        event: String,
        handler: String,
        message: String,
    },
    /// Infrastructure error (config, I/O, threading).
    #[error(transparent)]
    Infrastructure(#[from] anyhow::Error),
}

impl EngineError {
    pub fn step(step: impl Into<String>, source: StepError) -> Self {
        Self::Step {
            step: step.into(),
            source,
        }
    }

    /// Returns the typed step error if this is a `Step` variant.
    #[must_use]
    pub fn as_step_error(&self) -> Option<&StepError> {
        match self {
            Self::Step { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_error_display_includes_step_name() {
        let err = EngineError::step("replace values", StepError::data_row("BAD_FIELD", "oops"));
        let msg = err.to_string();
        assert!(msg.contains("replace values"));
        assert!(msg.contains("BAD_FIELD"));
    }

    #[test]
    fn test_from_anyhow() {
        let err: EngineError = anyhow::anyhow!("thread spawn failed").into();
        assert!(matches!(err, EngineError::Infrastructure(_)));
        assert!(err.as_step_error().is_none());
    }
}
