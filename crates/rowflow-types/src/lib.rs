//! Shared rowflow data model: values, rows, schemas, errors, and results.
//!
//! This crate is dependency-boundary-safe for both the engine and step
//! implementations.

pub mod error;
pub mod result;
pub mod row;
pub mod schema;
pub mod value;

pub use error::{ErrorCategory, ErrorCode, ErrorScope, StepError};
pub use result::{ExecutionResult, ResultFile, StepCopyCounters, StepCounters};
pub use row::Row;
pub use schema::{Field, FieldType, RowSchema};
pub use value::Value;
