use std::{env, path::Path, time::Duration};

use tracing::{info, warn};

pub const DEFAULT_CAPACITY: usize = 1;
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_millis(100);

pub const CAPACITY_VAR: &str = "CONVEYER_CAPACITY";
pub const SEND_TIMEOUT_VAR: &str = "CONVEYER_SEND_TIMEOUT_MS";

/// Pipeline-wide settings fixed at construction time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConveyerConfig {
    /// Buffer size of every channel.
    pub capacity: usize,
    /// How long an external `send` may wait for space. Zero means reject
    /// immediately with `ChannelError::Full`.
    pub send_timeout: Duration,
}

impl Default for ConveyerConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }
}

impl ConveyerConfig {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    pub fn with_send_timeout(mut self, send_timeout: Duration) -> Self {
        self.send_timeout = send_timeout;
        self
    }

    /// Read `CONVEYER_CAPACITY` / `CONVEYER_SEND_TIMEOUT_MS`, loading
    /// `env_file` first when it exists. Bad values fall back to the defaults.
    pub fn from_env(env_file: Option<&Path>) -> Self {
        if let Some(env_file) = env_file {
            if env_file.exists() {
                dotenvy::from_path(env_file).ok();
                info!("Loaded .env from {}", env_file.display());
            } else {
                warn!("could not load .env from {}", env_file.display());
            }
        }
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(raw) = lookup(CAPACITY_VAR) {
            match raw.trim().parse::<usize>() {
                Ok(capacity) => config.capacity = capacity,
                Err(_) => warn!(value = %raw, "ignoring invalid {CAPACITY_VAR}"),
            }
        }

        if let Some(raw) = lookup(SEND_TIMEOUT_VAR) {
            match raw.trim().parse::<u64>() {
                Ok(ms) => config.send_timeout = Duration::from_millis(ms),
                Err(_) => warn!(value = %raw, "ignoring invalid {SEND_TIMEOUT_VAR}"),
            }
        }

        config
    }

    /// tokio channels need a positive bound.
    pub(crate) fn normalized(mut self) -> Self {
        if self.capacity == 0 {
            warn!("channel capacity 0 is not supported, using 1");
            self.capacity = 1;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_in(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ConveyerConfig::from_lookup(lookup_in(&[]));
        assert_eq!(config, ConveyerConfig::default());
        assert_eq!(config.send_timeout, Duration::from_millis(100));
    }

    #[test]
    fn test_reads_values() {
        let config = ConveyerConfig::from_lookup(lookup_in(&[
            (CAPACITY_VAR, "16"),
            (SEND_TIMEOUT_VAR, " 0 "),
        ]));
        assert_eq!(config.capacity, 16);
        assert_eq!(config.send_timeout, Duration::ZERO);
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = ConveyerConfig::from_lookup(lookup_in(&[
            (CAPACITY_VAR, "many"),
            (SEND_TIMEOUT_VAR, "-5"),
        ]));
        assert_eq!(config, ConveyerConfig::default());
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        assert_eq!(ConveyerConfig::new(0).normalized().capacity, 1);
        assert_eq!(ConveyerConfig::new(5).normalized().capacity, 5);
    }

    #[test]
    fn test_env_file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let env_file = dir.path().join(".env");
        std::fs::write(&env_file, "CONVEYER_TEST_ONLY_MARKER=1\n").unwrap();

        ConveyerConfig::from_env(Some(&env_file));
        assert_eq!(env::var("CONVEYER_TEST_ONLY_MARKER").as_deref(), Ok("1"));
    }
}
