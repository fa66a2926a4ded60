//! Runtime configuration read from environment variables.
//!
//! Every tunable the retrieval engine consumes lives here; nothing reads
//! the environment directly outside this module (API keys excepted, see
//! `embedding::get_api_key`).

use std::path::PathBuf;
use std::time::Duration;

/// Data directory (~/.lexrag/ by default, LEXRAG_DATA_DIR overrides).
pub fn get_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("LEXRAG_DATA_DIR") {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".lexrag")
}

/// Engine settings with safe defaults.
#[derive(Debug, Clone)]
pub struct Settings {
    /// External cache entry lifetime, in days.
    pub external_cache_ttl_days: u64,
    /// Default number of results returned by a search.
    pub top_k_results: usize,
    /// Whether answer events and feedback are persisted at all.
    pub telemetry_enabled: bool,
    /// Upper bound on any single retrieval branch (local or external).
    pub branch_timeout: Duration,
    /// Where SQLite and LanceDB files live.
    pub data_dir: PathBuf,
}

impl Settings {
    /// Read settings from the environment, falling back to defaults for
    /// anything missing or unparseable.
    pub fn from_env() -> Self {
        Self {
            external_cache_ttl_days: env_parse("EXTERNAL_CACHE_TTL_DAYS", 7),
            top_k_results: env_parse("TOP_K_RESULTS", 5),
            telemetry_enabled: env_parse("TELEMETRY_ENABLED", true),
            branch_timeout: Duration::from_secs(env_parse("BRANCH_TIMEOUT_SECS", 20)),
            data_dir: get_data_dir(),
        }
    }

    /// Cache TTL in seconds, the unit the cache filter actually uses.
    pub fn cache_ttl_seconds(&self) -> i64 {
        (self.external_cache_ttl_days * 86_400) as i64
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            external_cache_ttl_days: 7,
            top_k_results: 5,
            telemetry_enabled: true,
            branch_timeout: Duration::from_secs(20),
            data_dir: get_data_dir(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(v) if !v.is_empty() => v.parse().unwrap_or(default),
        _ => default,
    }
}

// ============================================================================
// Tests
// ============================================================================
