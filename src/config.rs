//! Configuration file parser.
//!
//! The config file is optional — a missing file yields `Config::default()`.
//! Unknown keys are accepted by serde but logged as a warning so typos are
//! visible. The legacy `default_corn_exp` key is resolved into the canonical
//! `default_cron_exp` here, once, so the rest of the crate only ever sees a
//! single validated default cron expression.

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::schedule::CronExpr;

/// Cron expression applied when a subscription is created without one and
/// when the configured default fails validation.
pub const FALLBACK_CRON: &str = "*/30 * * * *";

/// Default number of baseline items seeded into the checkpoint on first
/// subscribe.
pub const DEFAULT_INIT_FETCH_COUNT: usize = 20;

/// Default render-time cap on summary length, in characters.
pub const DEFAULT_SUMMARY_MAX_CHARS: usize = 150;

/// Default bounded request timeout for feed fetches.
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),
}

// ============================================================================
// Configuration
// ============================================================================

/// Resolved application configuration.
///
/// Produced by [`Config::load`]; every field has already been normalized
/// (legacy keys folded in, minimums enforced, default cron validated).
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Default cron expression for subscriptions created without one.
    pub default_cron_exp: String,

    /// Number of baseline items seeded on first subscribe.
    pub init_fetch_count: usize,

    /// Cap on items considered per scheduled cycle.
    pub poll_fetch_count: usize,

    /// Render-time cap on summary length, in characters.
    pub summary_max_chars: usize,

    /// Bounded request timeout for feed fetches, in seconds.
    pub fetch_timeout_secs: u64,

    /// User-Agent header sent with feed requests.
    pub user_agent: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_cron_exp: FALLBACK_CRON.to_string(),
            init_fetch_count: DEFAULT_INIT_FETCH_COUNT,
            poll_fetch_count: DEFAULT_INIT_FETCH_COUNT,
            summary_max_chars: DEFAULT_SUMMARY_MAX_CHARS,
            fetch_timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
            user_agent: concat!("feedrelay/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Raw on-disk shape. All keys optional; the legacy `default_corn_exp`
/// alias is only consulted when the canonical key is absent.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawConfig {
    default_cron_exp: Option<String>,
    default_corn_exp: Option<String>,
    init_fetch_count: Option<usize>,
    poll_fetch_count: Option<usize>,
    summary_max_chars: Option<usize>,
    fetch_timeout_secs: Option<u64>,
    user_agent: Option<String>,
}

const KNOWN_KEYS: &[&str] = &[
    "default_cron_exp",
    "default_corn_exp",
    "init_fetch_count",
    "poll_fetch_count",
    "summary_max_chars",
    "fetch_timeout_secs",
    "user_agent",
];

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// - Missing or empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as a warning
    /// - Invalid `default_cron_exp` → falls back to [`FALLBACK_CRON`] with
    ///   a warning, never fails startup
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let raw: RawConfig = toml::from_str(&content)?;
        let config = Self::from_raw(raw);
        tracing::info!(
            path = %path.display(),
            default_cron = %config.default_cron_exp,
            init_fetch_count = config.init_fetch_count,
            "Loaded configuration"
        );
        Ok(config)
    }

    fn from_raw(raw: RawConfig) -> Self {
        let defaults = Self::default();

        let mut default_cron_exp = raw
            .default_cron_exp
            .or(raw.default_corn_exp)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| FALLBACK_CRON.to_string());

        if let Err(e) = CronExpr::parse(&default_cron_exp) {
            tracing::warn!(
                expr = %default_cron_exp,
                error = %e,
                fallback = FALLBACK_CRON,
                "Configured default cron is invalid, using fallback"
            );
            default_cron_exp = FALLBACK_CRON.to_string();
        }

        let init_fetch_count = raw
            .init_fetch_count
            .unwrap_or(defaults.init_fetch_count)
            .max(1);

        Self {
            default_cron_exp,
            // Per-cycle cap defaults to the seed size.
            poll_fetch_count: raw.poll_fetch_count.unwrap_or(init_fetch_count).max(1),
            init_fetch_count,
            summary_max_chars: raw
                .summary_max_chars
                .unwrap_or(defaults.summary_max_chars)
                .max(1),
            fetch_timeout_secs: raw
                .fetch_timeout_secs
                .unwrap_or(defaults.fetch_timeout_secs)
                .max(1),
            user_agent: raw
                .user_agent
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .unwrap_or(defaults.user_agent),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
