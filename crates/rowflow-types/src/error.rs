//! Typed step error model shared between the engine and step
//! implementations.
//!
//! The `scope` decides how the engine reacts: a [`ErrorScope::Row`]
//! error may be redirected to an error queue when the step is
//! configured for it; everything else escalates to a pipeline-wide
//! abort.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, Error, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Bad or unresolvable step configuration.
    #[error("config")]
    Config,
    /// A row failed a transformation.
    #[error("data")]
    Data,
    /// A step-local resource (file, connection) failed or became unusable.
    #[error("resource")]
    Resource,
    /// Engine or handler bug.
    #[error("internal")]
    Internal,
}

#[derive(Debug, Clone, Copy, Error, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorScope {
    /// The whole step is unusable; always escalates.
    #[error("step")]
    Step,
    /// A single row failed; recoverable via error-row redirection.
    #[error("row")]
    Row,
}

/// Opaque error code following SCREAMING_SNAKE_CASE convention.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct ErrorCode(pub String);

impl ErrorCode {
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ErrorCode {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ErrorCode {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq)]
#[error("[{category}/{scope}] {code}: {message}")]
pub struct StepError {
    pub category: ErrorCategory,
    pub scope: ErrorScope,
    pub code: ErrorCode,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl StepError {
    /// Configuration error; detected at prepare/init, aborts before any
    /// row flows.
    pub fn config(code: impl Into<ErrorCode>, message: impl Into<String>) -> Self {
        Self {
            category: ErrorCategory::Config,
            scope: ErrorScope::Step,
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    /// A single row failed a transformation; candidate for redirection.
    pub fn data_row(code: impl Into<ErrorCode>, message: impl Into<String>) -> Self {
        Self {
            category: ErrorCategory::Data,
            scope: ErrorScope::Row,
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    /// A step-local resource became unusable; always fatal.
    pub fn resource(code: impl Into<ErrorCode>, message: impl Into<String>) -> Self {
        Self {
            category: ErrorCategory::Resource,
            scope: ErrorScope::Step,
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    /// Unexpected engine/handler condition; always fatal.
    pub fn internal(code: impl Into<ErrorCode>, message: impl Into<String>) -> Self {
        Self {
            category: ErrorCategory::Internal,
            scope: ErrorScope::Step,
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// True when the error is row-scoped and may be redirected instead
    /// of aborting the pipeline.
    #[must_use]
    pub fn is_row_scoped(&self) -> bool {
        self.scope == ErrorScope::Row
    }
}
