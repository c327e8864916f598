//! Error types for building a context.
//!
//! Errors raised while *running* use cases are
//! [`UseCaseError`](oneway_core::error::UseCaseError)s from the core crate.

use thiserror::Error;

/// Errors that can occur while assembling a context or its store group
#[derive(Error, Debug)]
pub enum ContextError {
    /// Two stores were registered under the same state name
    ///
    /// The composite state has exactly one key per state name.
    #[error("State name {0:?} is already registered")]
    DuplicateStateName(String),

    /// A store was registered under an empty state name
    #[error("State name must not be empty")]
    EmptyStateName,

    /// A configuration document could not be parsed
    #[error("Invalid context configuration: {0}")]
    InvalidConfig(#[from] serde_json::Error),
}
