//! Runtime tuning knobs, loaded from environment variables.
//!
//! DESIGN
//! ======
//! Compiled defaults cover every knob; `from_env` overrides them one by one
//! from `PAGESYNC_*` variables so deployments can retune without a rebuild.
//! Tests construct `SyncConfig` directly with tight timings.

use crate::election::ElectionTuning;
use crate::presence::PresenceTtl;

const DEFAULT_STABILIZATION_INTERVAL_MS: u64 = 150;
const DEFAULT_STABILIZATION_MAX_SAMPLES: u32 = 10;
const DEFAULT_ELECTION_DEBOUNCE_MS: u64 = 200;
const DEFAULT_PERSIST_INTERVAL_MS: u64 = 1_000;
const DEFAULT_RECONNECT_BACKOFF_MS: u64 = 2_000;
const DEFAULT_RECONNECT_MAX_RETRIES: u32 = 3;
const DEFAULT_CURSOR_TTL_MS: i64 = 5_000;
const DEFAULT_SELECTION_TTL_MS: i64 = 10_000;
const DEFAULT_CHAT_TTL_MS: i64 = 10_000;

/// Parse an environment variable, falling back to `default` when the
/// variable is absent or malformed.
pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

/// Timing and policy knobs for one Room client.
#[derive(Debug, Clone, Copy)]
pub struct SyncConfig {
    /// Resample spacing inside the election stabilization wait.
    pub stabilization_interval_ms: u64,
    /// Hard cap on stabilization samples per election cycle.
    pub stabilization_max_samples: u32,
    /// Coalescing window for membership-triggered re-elections.
    pub election_debounce_ms: u64,
    /// Leader write spacing; floors at one write per window.
    pub persist_interval_ms: u64,
    /// Fixed wait between reconnection attempts.
    pub reconnect_backoff_ms: u64,
    /// Automatic reconnection attempts before degrading.
    pub reconnect_max_retries: u32,
    pub cursor_ttl_ms: i64,
    pub selection_ttl_ms: i64,
    pub chat_ttl_ms: i64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            stabilization_interval_ms: DEFAULT_STABILIZATION_INTERVAL_MS,
            stabilization_max_samples: DEFAULT_STABILIZATION_MAX_SAMPLES,
            election_debounce_ms: DEFAULT_ELECTION_DEBOUNCE_MS,
            persist_interval_ms: DEFAULT_PERSIST_INTERVAL_MS,
            reconnect_backoff_ms: DEFAULT_RECONNECT_BACKOFF_MS,
            reconnect_max_retries: DEFAULT_RECONNECT_MAX_RETRIES,
            cursor_ttl_ms: DEFAULT_CURSOR_TTL_MS,
            selection_ttl_ms: DEFAULT_SELECTION_TTL_MS,
            chat_ttl_ms: DEFAULT_CHAT_TTL_MS,
        }
    }
}

impl SyncConfig {
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            stabilization_interval_ms: env_parse(
                "PAGESYNC_STABILIZATION_INTERVAL_MS",
                defaults.stabilization_interval_ms,
            ),
            stabilization_max_samples: env_parse(
                "PAGESYNC_STABILIZATION_MAX_SAMPLES",
                defaults.stabilization_max_samples,
            ),
            election_debounce_ms: env_parse("PAGESYNC_ELECTION_DEBOUNCE_MS", defaults.election_debounce_ms),
            persist_interval_ms: env_parse("PAGESYNC_PERSIST_INTERVAL_MS", defaults.persist_interval_ms),
            reconnect_backoff_ms: env_parse("PAGESYNC_RECONNECT_BACKOFF_MS", defaults.reconnect_backoff_ms),
            reconnect_max_retries: env_parse("PAGESYNC_RECONNECT_MAX_RETRIES", defaults.reconnect_max_retries),
            cursor_ttl_ms: env_parse("PAGESYNC_CURSOR_TTL_MS", defaults.cursor_ttl_ms),
            selection_ttl_ms: env_parse("PAGESYNC_SELECTION_TTL_MS", defaults.selection_ttl_ms),
            chat_ttl_ms: env_parse("PAGESYNC_CHAT_TTL_MS", defaults.chat_ttl_ms),
        }
    }

    #[must_use]
    pub fn election_tuning(&self) -> ElectionTuning {
        ElectionTuning {
            stabilization_interval_ms: self.stabilization_interval_ms,
            stabilization_max_samples: self.stabilization_max_samples,
            debounce_ms: self.election_debounce_ms,
        }
    }

    #[must_use]
    pub fn presence_ttl(&self) -> PresenceTtl {
        PresenceTtl {
            cursor_ms: self.cursor_ttl_ms,
            selection_ms: self.selection_ttl_ms,
            chat_ms: self.chat_ttl_ms,
        }
    }

    /// Tight timings for tests that drive whole Rooms.
    #[cfg(test)]
    #[must_use]
    pub(crate) fn fast() -> Self {
        Self {
            stabilization_interval_ms: 10,
            stabilization_max_samples: 5,
            election_debounce_ms: 10,
            persist_interval_ms: 25,
            reconnect_backoff_ms: 30,
            reconnect_max_retries: 3,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_hold_without_env() {
        let config = SyncConfig::default();
        assert_eq!(config.persist_interval_ms, 1_000);
        assert_eq!(config.reconnect_max_retries, 3);
        assert_eq!(config.cursor_ttl_ms, 5_000);
        assert_eq!(config.selection_ttl_ms, 10_000);
        assert_eq!(config.chat_ttl_ms, 10_000);
    }

    #[test]
    fn env_parse_falls_back_on_garbage() {
        // SAFETY: test-local variable name, no concurrent reader cares.
        unsafe {
            std::env::set_var("PAGESYNC_TEST_GARBAGE_KNOB", "not-a-number");
        }
        assert_eq!(env_parse("PAGESYNC_TEST_GARBAGE_KNOB", 42u64), 42);
        assert_eq!(env_parse("PAGESYNC_TEST_MISSING_KNOB", 7u32), 7);
    }

    #[test]
    fn env_parse_reads_valid_values() {
        unsafe {
            std::env::set_var("PAGESYNC_TEST_VALID_KNOB", "250");
        }
        assert_eq!(env_parse("PAGESYNC_TEST_VALID_KNOB", 0u64), 250);
    }

    #[test]
    fn presence_ttl_mirrors_config() {
        let config = SyncConfig { cursor_ttl_ms: 1, selection_ttl_ms: 2, chat_ttl_ms: 3, ..SyncConfig::default() };
        let ttl = config.presence_ttl();
        assert_eq!(ttl.cursor_ms, 1);
        assert_eq!(ttl.selection_ms, 2);
        assert_eq!(ttl.chat_ms, 3);
    }
}
