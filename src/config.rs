//! Ambient configuration (SPEC_FULL.md §4.K "Configuration", spec.md §6):
//! two environment variables with documented fallbacks, read once at
//! server start rather than polled.

use std::path::PathBuf;

const DEFAULT_LOG_PREFIX: &str = "finesse";
const DEFAULT_LOG_DIR: &str = "/tmp";

/// Read once, at server start. `FinesseServer::new` takes one of these
/// rather than reaching into the environment itself, so tests can build
/// a config without touching process-global state.
#[derive(Debug, Clone)]
pub struct FinesseConfig {
    /// Prefix used both for the registration socket name and the
    /// server-stat CSV filename.
    pub log_prefix: String,
    /// Directory the server-stat CSV is written into on shutdown.
    pub log_dir: PathBuf,
}

impl FinesseConfig {
    pub fn from_env() -> Self {
        FinesseConfig {
            log_prefix: std::env::var("FINESSE_LOG_PREFIX").unwrap_or_else(|_| DEFAULT_LOG_PREFIX.to_string()),
            log_dir: std::env::var("FINESSE_LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_LOG_DIR)),
        }
    }
}

impl Default for FinesseConfig {
    fn default() -> Self {
        FinesseConfig {
            log_prefix: DEFAULT_LOG_PREFIX.to_string(),
            log_dir: PathBuf::from(DEFAULT_LOG_DIR),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = FinesseConfig::default();
        assert_eq!(cfg.log_prefix, "finesse");
        assert_eq!(cfg.log_dir, PathBuf::from("/tmp"));
    }
}
