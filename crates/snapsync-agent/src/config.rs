//! Session configuration.

use std::time::Duration;

/// Default synchronization interval baseline.
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(50);

/// Configuration for one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Fixed synchronization interval; must be positive.
    pub interval: Duration,

    /// Retain the last computed delta set for inspection via
    /// `Session::delta_cache`. Never changes production semantics.
    pub diagnostics: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            diagnostics: false,
        }
    }
}

impl SessionConfig {
    /// Load configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `SNAPSYNC_INTERVAL_MS`: synchronization interval in milliseconds
    /// - `SNAPSYNC_DIAGNOSTICS`: `1`/`true` to retain the delta cache
    ///
    /// # Errors
    ///
    /// Returns error if a variable is present but unparseable.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(ms) = std::env::var("SNAPSYNC_INTERVAL_MS") {
            let ms: u64 = ms
                .parse()
                .map_err(|_| ConfigError::InvalidInterval(ms.clone()))?;
            if ms == 0 {
                return Err(ConfigError::InvalidInterval(ms.to_string()));
            }
            config.interval = Duration::from_millis(ms);
        }

        if let Ok(flag) = std::env::var("SNAPSYNC_DIAGNOSTICS") {
            config.diagnostics = matches!(flag.as_str(), "1" | "true" | "yes");
        }

        Ok(config)
    }
}

/// Errors for configuration loading.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// The interval variable is not a positive millisecond count.
    #[error("invalid SNAPSYNC_INTERVAL_MS '{0}'")]
    InvalidInterval(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.interval, DEFAULT_INTERVAL);
        assert!(!config.diagnostics);
    }
}
