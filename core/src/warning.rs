//! Programmer warnings.
//!
//! Misuse that should not stop the application (a duplicate `execute`, a
//! dispatch through an already released parent, a store mutating outside
//! its write phase, ...) is reported as a [`Warning`]. Warnings are logged
//! through `tracing` under the `oneway::warning` target in development builds
//! and compiled out of release builds.

use std::fmt;

/// Tracing target used for every warning
pub const TARGET: &str = "oneway::warning";

/// A non-fatal misuse of the runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Warning {
    /// `execute` was called twice on the same executor
    DuplicateExecution {
        /// Use case display name
        use_case: String,
    },

    /// A nested use case dispatched after its parent had been released
    ReleasedParent {
        /// The dispatching use case
        use_case: String,
        /// The released ancestor
        parent: String,
    },

    /// The same use case instance started while an earlier run was in flight
    ConcurrentInstanceExecution {
        /// Use case display name
        use_case: String,
    },

    /// A store announced a change outside its `receive_payload` window (strict mode)
    MutationOutsideReceivePayload {
        /// Store name
        store: String,
    },

    /// A store emitted a change but its state equals the cached one (strict mode)
    UnchangedStateEmitted {
        /// Store name
        store: String,
    },

    /// A payload reached a unit of work after it was released
    CommitmentAfterRelease {
        /// Type of the dropped payload
        payload_type: String,
    },

    /// A use case context dispatched after every run of its tree was released
    DispatchAfterScopeClosed {
        /// The dispatching use case
        use_case: String,
        /// Type of the dropped payload
        payload_type: String,
    },

    /// A transaction ended with payloads that were never committed
    UncommittedPayloadsDiscarded {
        /// Transaction name
        transaction: String,
        /// Number of discarded payloads
        count: usize,
    },

    /// Store changes kept arriving during reconciliation
    ReconcilePassesExhausted {
        /// Passes run before giving up
        passes: usize,
    },
}

impl Warning {
    /// Short stable identifier, used as a structured log field
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::DuplicateExecution { .. } => "duplicate_execution",
            Self::ReleasedParent { .. } => "released_parent",
            Self::ConcurrentInstanceExecution { .. } => "concurrent_instance_execution",
            Self::MutationOutsideReceivePayload { .. } => "mutation_outside_receive_payload",
            Self::UnchangedStateEmitted { .. } => "unchanged_state_emitted",
            Self::CommitmentAfterRelease { .. } => "commitment_after_release",
            Self::DispatchAfterScopeClosed { .. } => "dispatch_after_scope_closed",
            Self::UncommittedPayloadsDiscarded { .. } => "uncommitted_payloads_discarded",
            Self::ReconcilePassesExhausted { .. } => "reconcile_passes_exhausted",
        }
    }

    /// Log the warning. A no-op in release builds.
    pub fn report(&self) {
        #[cfg(debug_assertions)]
        tracing::warn!(target: TARGET, code = self.code(), "{self}");
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateExecution { use_case } => write!(
                f,
                "{use_case} was executed twice by the same executor; create a new executor per run"
            ),
            Self::ReleasedParent { use_case, parent } => write!(
                f,
                "{use_case} dispatched after its parent {parent} was released; \
                 the payload is not delivered to the parent"
            ),
            Self::ConcurrentInstanceExecution { use_case } => write!(
                f,
                "{use_case} started while a previous run of the same instance is still in flight"
            ),
            Self::MutationOutsideReceivePayload { store } => write!(
                f,
                "{store} changed its state outside receive_payload; \
                 update store state only in response to payloads"
            ),
            Self::UnchangedStateEmitted { store } => write!(
                f,
                "{store} emitted a change but its state equals the previous state; \
                 state should be immutable and replaced with set_state"
            ),
            Self::CommitmentAfterRelease { payload_type } => write!(
                f,
                "payload {payload_type} arrived after the unit of work was released and was dropped"
            ),
            Self::DispatchAfterScopeClosed { use_case, payload_type } => write!(
                f,
                "{use_case} dispatched {payload_type} after its run was released; \
                 a use case context must not be kept past its run"
            ),
            Self::UncommittedPayloadsDiscarded { transaction, count } => write!(
                f,
                "transaction {transaction} ended with {count} uncommitted payload(s); call commit() before it ends"
            ),
            Self::ReconcilePassesExhausted { passes } => write!(
                f,
                "stores kept changing after {passes} reconcile passes; remaining changes wait for the next cycle"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_offender() {
        let warning = Warning::MutationOutsideReceivePayload {
            store: "CartStore".to_string(),
        };
        assert!(warning.to_string().starts_with("CartStore changed"));
        assert_eq!(warning.code(), "mutation_outside_receive_payload");
    }

    #[test]
    fn discarded_count_is_reported() {
        let warning = Warning::UncommittedPayloadsDiscarded {
            transaction: "bulk".to_string(),
            count: 2,
        };
        assert!(warning.to_string().contains("2 uncommitted"));
    }

    #[test]
    fn late_dispatch_names_the_use_case() {
        let warning = Warning::DispatchAfterScopeClosed {
            use_case: "SaveCart".to_string(),
            payload_type: "cart/saved".to_string(),
        };
        assert!(warning.to_string().starts_with("SaveCart dispatched cart/saved after"));
        assert_eq!(warning.code(), "dispatch_after_scope_closed");
    }
}
