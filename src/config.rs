//! Worker configuration.
//!
//! The worker is launched by a supervisor and takes everything from
//! defaults, environment variables, and CLI flags — there is no config
//! file to go stale between restarts.
//!
//! Environment overrides:
//!
//! - `BOTWORKER_SOCKET` — broker socket path
//! - `BOTWORKER_PRUNE_LIMIT` — session capacity before eviction

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::broker::default_socket_path;
use crate::constants::SESSIONS_PRUNE_LIMIT;

/// Configuration for the botworker processes.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Config {
    /// Unix socket the broker listens on.
    pub socket_path: PathBuf,
    /// Number of sessions the registry retains before evicting.
    pub prune_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            prune_limit: SESSIONS_PRUNE_LIMIT,
        }
    }
}

impl Config {
    /// Defaults with environment variable overrides applied.
    pub fn load() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(socket) = std::env::var("BOTWORKER_SOCKET") {
            self.socket_path = PathBuf::from(socket);
        }
        if let Ok(limit) = std::env::var("BOTWORKER_PRUNE_LIMIT") {
            match limit.parse() {
                Ok(parsed) => self.prune_limit = parsed,
                Err(_) => {
                    log::warn!("[config] ignoring invalid BOTWORKER_PRUNE_LIMIT: {limit}");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.prune_limit, SESSIONS_PRUNE_LIMIT);
        assert!(config.socket_path.to_string_lossy().ends_with("broker.sock"));
    }
}
