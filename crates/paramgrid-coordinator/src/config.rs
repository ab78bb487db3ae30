//! coordinator.toml configuration.
//!
//! Every field has a default, so an empty file is a valid config.
//!
//! ```toml
//! barrier_timeout = "300s"   # or "off"
//! shutdown_timeout = "10s"
//! inbox_capacity = 512
//! outbound_capacity = 64
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CoordinatorError, CoordinatorResult};

/// Disables the barrier timer when used as `barrier_timeout`.
pub const TIMEOUT_OFF: &str = "off";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Upper bound on a load/save round, or `"off"`.
    pub barrier_timeout: String,
    /// How long shutdown waits for stop acknowledgements.
    pub shutdown_timeout: String,
    /// Bounded size of the coordinator inbox.
    pub inbox_capacity: usize,
    /// Channel size for in-process participants.
    pub outbound_capacity: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            barrier_timeout: "300s".to_string(),
            shutdown_timeout: "10s".to_string(),
            inbox_capacity: 512,
            outbound_capacity: 64,
        }
    }
}

impl CoordinatorConfig {
    pub fn from_file(path: &Path) -> CoordinatorResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CoordinatorError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> CoordinatorResult<Self> {
        let config: CoordinatorConfig =
            toml::from_str(content).map_err(|e| CoordinatorError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> CoordinatorResult<String> {
        toml::to_string_pretty(self).map_err(|e| CoordinatorError::Config(e.to_string()))
    }

    /// Check every field resolves to a usable value.
    pub fn validate(&self) -> CoordinatorResult<()> {
        self.barrier_timeout()?;
        self.shutdown_timeout()?;
        if self.inbox_capacity == 0 {
            return Err(CoordinatorError::Config(
                "inbox_capacity must be at least 1".to_string(),
            ));
        }
        if self.outbound_capacity == 0 {
            return Err(CoordinatorError::Config(
                "outbound_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolved barrier timeout; `None` when disabled.
    pub fn barrier_timeout(&self) -> CoordinatorResult<Option<Duration>> {
        if self.barrier_timeout.trim().eq_ignore_ascii_case(TIMEOUT_OFF) {
            return Ok(None);
        }
        require_duration("barrier_timeout", &self.barrier_timeout).map(Some)
    }

    pub fn shutdown_timeout(&self) -> CoordinatorResult<Duration> {
        require_duration("shutdown_timeout", &self.shutdown_timeout)
    }

    /// Builder-style override, mostly for tests and the driver binary.
    ///
    /// Stored at millisecond resolution, rounded up.
    pub fn with_barrier_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.barrier_timeout = match timeout {
            Some(d) => millis_string(d),
            None => TIMEOUT_OFF.to_string(),
        };
        self
    }

    /// Stored at millisecond resolution, rounded up.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = millis_string(timeout);
        self
    }
}

fn millis_string(d: Duration) -> String {
    format!("{}ms", d.as_nanos().div_ceil(1_000_000))
}

fn require_duration(field: &str, value: &str) -> CoordinatorResult<Duration> {
    match parse_duration(value) {
        Some(d) if !d.is_zero() => Ok(d),
        _ => Err(CoordinatorError::Config(format!(
            "{field}: invalid duration {value:?}"
        ))),
    }
}

/// Parse `"500ms"`, `"30s"`, `"2m"`, or a bare number of seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(secs) = s.strip_suffix('s') {
        if let Some(ms) = secs.strip_suffix('m') {
            ms.parse::<u64>().ok().map(Duration::from_millis)
        } else {
            secs.parse::<u64>().ok().map(Duration::from_secs)
        }
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = CoordinatorConfig::default();
        config.validate().unwrap();
        assert_eq!(
            config.barrier_timeout().unwrap(),
            Some(Duration::from_secs(300))
        );
        assert_eq!(config.shutdown_timeout().unwrap(), Duration::from_secs(10));
    }

    #[test]
    fn empty_file_uses_defaults() {
        let config = CoordinatorConfig::from_toml_str("").unwrap();
        assert_eq!(config, CoordinatorConfig::default());
    }

    #[test]
    fn parse_full_file() {
        let toml_str = r#"
barrier_timeout = "off"
shutdown_timeout = "750ms"
inbox_capacity = 16
outbound_capacity = 4
"#;
        let config = CoordinatorConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.barrier_timeout().unwrap(), None);
        assert_eq!(
            config.shutdown_timeout().unwrap(),
            Duration::from_millis(750)
        );
        assert_eq!(config.inbox_capacity, 16);
        assert_eq!(config.outbound_capacity, 4);
    }

    #[test]
    fn invalid_duration_rejected() {
        let err = CoordinatorConfig::from_toml_str(r#"shutdown_timeout = "soon""#).unwrap_err();
        assert!(matches!(err, CoordinatorError::Config(_)));
    }

    #[test]
    fn zero_duration_rejected() {
        let err = CoordinatorConfig::from_toml_str(r#"barrier_timeout = "0s""#).unwrap_err();
        assert!(matches!(err, CoordinatorError::Config(_)));
    }

    #[test]
    fn huge_minutes_rejected() {
        let err = CoordinatorConfig::from_toml_str(r#"shutdown_timeout = "307445734561825861m""#)
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::Config(_)));
        assert_eq!(parse_duration("307445734561825861m"), None);
    }

    #[test]
    fn sub_millisecond_builder_rounds_up() {
        let config = CoordinatorConfig::default()
            .with_shutdown_timeout(Duration::from_micros(500))
            .with_barrier_timeout(Some(Duration::from_micros(1500)));
        config.validate().unwrap();
        assert_eq!(config.shutdown_timeout().unwrap(), Duration::from_millis(1));
        assert_eq!(
            config.barrier_timeout().unwrap(),
            Some(Duration::from_millis(2))
        );
    }

    #[test]
    fn zero_inbox_rejected() {
        let err = CoordinatorConfig::from_toml_str("inbox_capacity = 0").unwrap_err();
        assert!(matches!(err, CoordinatorError::Config(_)));
    }

    #[test]
    fn round_trips_through_toml() {
        let config = CoordinatorConfig::default()
            .with_barrier_timeout(Some(Duration::from_secs(5)))
            .with_shutdown_timeout(Duration::from_millis(250));
        let text = config.to_toml_string().unwrap();
        let parsed = CoordinatorConfig::from_toml_str(&text).unwrap();
        assert_eq!(parsed.barrier_timeout().unwrap(), Some(Duration::from_secs(5)));
        assert_eq!(parsed.shutdown_timeout().unwrap(), Duration::from_millis(250));
    }

    #[test]
    fn parse_duration_units() {
        assert_eq!(parse_duration("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("2m"), Some(Duration::from_secs(120)));
        assert_eq!(parse_duration("10"), Some(Duration::from_secs(10)));
        assert_eq!(parse_duration("later"), None);
    }
}
