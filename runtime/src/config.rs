//! Context configuration.

use crate::error::ContextError;
use serde::{Deserialize, Serialize};

/// Default bound on follow-up read phases within one reconciliation
pub const DEFAULT_MAX_RECONCILE_PASSES: usize = 8;

/// Configuration for a [`Context`](crate::context::Context)
///
/// # Example
///
/// ```
/// use oneway_runtime::config::ContextConfig;
///
/// let config = ContextConfig::default()
///     .with_strict(true)
///     .with_max_reconcile_passes(4);
///
/// assert!(config.strict);
/// assert_eq!(config.max_reconcile_passes, Some(4));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Enable the store group's development checks
    pub strict: bool,
    /// How many times a store group re-reads its stores when changes keep
    /// arriving during its own emission.
    ///
    /// `None` keeps whatever the store group was built with
    /// ([`DEFAULT_MAX_RECONCILE_PASSES`] unless set on the builder).
    pub max_reconcile_passes: Option<usize>,
}

impl ContextConfig {
    /// Create a configuration with custom values
    #[must_use]
    pub const fn new(strict: bool, max_reconcile_passes: usize) -> Self {
        Self {
            strict,
            max_reconcile_passes: Some(max_reconcile_passes),
        }
    }

    /// Enable or disable strict mode
    #[must_use]
    pub const fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Set the follow-up pass bound. Values below one are treated as one.
    #[must_use]
    pub const fn with_max_reconcile_passes(mut self, passes: usize) -> Self {
        self.max_reconcile_passes = Some(passes);
        self
    }

    /// Parse a configuration from JSON; missing fields keep their defaults
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::InvalidConfig`] if the document is malformed.
    pub fn from_json(json: &str) -> Result<Self, ContextError> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config = ContextConfig::from_json(r#"{ "strict": true }"#);
        assert!(matches!(
            config,
            Ok(ContextConfig {
                strict: true,
                max_reconcile_passes: None,
            })
        ));
    }

    #[test]
    fn pass_bound_is_read_from_json() {
        let config = ContextConfig::from_json(r#"{ "max_reconcile_passes": 2 }"#);
        assert!(matches!(
            config,
            Ok(ContextConfig {
                strict: false,
                max_reconcile_passes: Some(2),
            })
        ));
    }

    #[test]
    fn malformed_json_is_rejected() {
        let config = ContextConfig::from_json("{ strict: yes }");
        assert!(matches!(config, Err(ContextError::InvalidConfig(_))));
    }
}
