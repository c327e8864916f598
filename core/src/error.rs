//! Error types shared by every layer.
//!
//! Errors raised inside a use case travel twice: once as an
//! [`Payload::Error`](crate::payload::Payload::Error) through the dispatcher so
//! stores and observers can react, and once as the `Err` returned to the caller
//! of `execute`. Both channels carry the same value, so [`UseCaseError`] is
//! cheaply clonable.

use std::fmt;
use std::rc::Rc;
use thiserror::Error;

/// Errors surfaced by use case execution
#[derive(Error, Debug, Clone)]
pub enum UseCaseError {
    /// The caller misused the API
    #[error("Invalid usage: {0}")]
    InvalidUsage(String),

    /// The use case itself failed
    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl UseCaseError {
    /// Build an [`UseCaseError::InvalidUsage`]
    #[must_use]
    pub fn invalid_usage(message: impl Into<String>) -> Self {
        Self::InvalidUsage(message.into())
    }

    /// Build a domain error from a message
    #[must_use]
    pub fn domain(message: impl fmt::Display + fmt::Debug + Send + Sync + 'static) -> Self {
        Self::Domain(DomainError::msg(message))
    }

    /// The domain error, if this is one
    #[must_use]
    pub const fn as_domain(&self) -> Option<&DomainError> {
        match self {
            Self::Domain(error) => Some(error),
            Self::InvalidUsage(_) => None,
        }
    }
}

impl From<anyhow::Error> for UseCaseError {
    fn from(error: anyhow::Error) -> Self {
        Self::Domain(DomainError::new(error))
    }
}

/// An error raised by application code inside a use case.
///
/// Wraps an [`anyhow::Error`] behind an `Rc`; clones share the same error, so
/// [`ptr_eq`](Self::ptr_eq) tells whether two values are the same failure.
#[derive(Clone)]
pub struct DomainError {
    inner: Rc<anyhow::Error>,
}

impl DomainError {
    /// Wrap any error
    #[must_use]
    pub fn new(error: impl Into<anyhow::Error>) -> Self {
        Self {
            inner: Rc::new(error.into()),
        }
    }

    /// Build from a message
    #[must_use]
    pub fn msg(message: impl fmt::Display + fmt::Debug + Send + Sync + 'static) -> Self {
        Self {
            inner: Rc::new(anyhow::Error::msg(message)),
        }
    }

    /// Borrow the underlying error as `E`
    #[must_use]
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        self.inner.downcast_ref::<E>()
    }

    /// Whether both values are clones of the same failure
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// The wrapped error
    #[must_use]
    pub fn as_anyhow(&self) -> &anyhow::Error {
        &self.inner
    }
}

impl fmt::Debug for DomainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.inner, f)
    }
}

impl fmt::Display for DomainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.inner, f)
    }
}

impl std::error::Error for DomainError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.inner.source()
    }
}
