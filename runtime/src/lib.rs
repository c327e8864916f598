//! # Oneway Runtime
//!
//! Execution engine for the Oneway unidirectional-dataflow architecture.
//!
//! ## Core Components
//!
//! - **Use case**: a unit of application work that dispatches payloads
//! - **Executor**: drives one run through its lifecycle payloads
//!   (will-execute, did-execute, completed, error)
//! - **Store group**: aggregates stores, runs write and read phases and
//!   announces one coalesced change per execution cycle
//! - **Unit of work**: batches payloads and commits them in order, either
//!   automatically or at the end of a transaction
//! - **Context**: the composition root tying all of the above together
//!
//! ## Threading
//!
//! The runtime is single-threaded and cooperative. Futures returned by
//! [`UseCaseExecutor::execute`](executor::UseCaseExecutor::execute) are not
//! `Send`; drive them on a current-thread executor such as
//! `tokio::runtime::Builder::new_current_thread` or a `LocalSet`.

pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod metrics;
pub mod store_group;
pub mod unit_of_work;
pub mod use_case;

/// Commonly used types
pub mod prelude {
    pub use crate::config::ContextConfig;
    pub use crate::context::{Context, TransactionContext};
    pub use crate::error::ContextError;
    pub use crate::executor::UseCaseExecutor;
    pub use crate::store_group::{GroupState, StoreGroup, StoreGroupLike};
    pub use crate::use_case::{
        FnUseCase, UseCase, UseCaseContext, UseCaseInstance, UseCaseOutcome, UseCaseResult,
    };
}
