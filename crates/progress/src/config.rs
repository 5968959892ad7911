//! Progress source configuration.

use serde::{Deserialize, Serialize};

/// Total units used when nothing else is specified.
pub const DEFAULT_TOTAL_UNITS: i64 = 100;

/// Initial settings for a new progress source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Total units of work; non-positive means indeterminate
    pub total_units: i64,

    /// Whether consumers may cancel
    pub cancellable: bool,

    /// Whether consumers may pause
    pub pausable: bool,

    /// Optional caller-defined kind
    pub kind: Option<String>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            total_units: DEFAULT_TOTAL_UNITS,
            cancellable: true,
            pausable: false,
            kind: None,
        }
    }
}

impl SourceConfig {
    /// Create a config with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set total units.
    pub fn with_total_units(mut self, total_units: i64) -> Self {
        self.total_units = total_units;
        self
    }

    /// Set cancellable.
    pub fn with_cancellable(mut self, cancellable: bool) -> Self {
        self.cancellable = cancellable;
        self
    }

    /// Set pausable.
    pub fn with_pausable(mut self, pausable: bool) -> Self {
        self.pausable = pausable;
        self
    }

    /// Set kind.
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SourceConfig::default();
        assert_eq!(config.total_units, 100);
        assert!(config.cancellable);
        assert!(!config.pausable);
        assert!(config.kind.is_none());
    }

    #[test]
    fn test_builder() {
        let config = SourceConfig::new()
            .with_total_units(12)
            .with_cancellable(false)
            .with_pausable(true)
            .with_kind("download");
        assert_eq!(config.total_units, 12);
        assert!(!config.cancellable);
        assert!(config.pausable);
        assert_eq!(config.kind.as_deref(), Some("download"));
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: SourceConfig = serde_json::from_str(r#"{"total_units": 7}"#).unwrap();
        assert_eq!(config.total_units, 7);
        assert!(config.cancellable);
        assert!(!config.pausable);
    }
}
