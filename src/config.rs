//! Configuration loaded from environment variables (see `spec.md` §6),
//! mirroring the teacher's `Config::load` + `validate()` pattern but env- not
//! TOML-driven, since the original spec names environment variables as the
//! sole external configuration surface.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::model::MarketType;

/// Resource/scale profile, the way the teacher's `app::config::Profile`
/// scales defaults without a bespoke mechanism per-component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Profile {
    #[default]
    Local,
    Production,
}

#[derive(Debug, Clone)]
pub struct ReadinessConfig {
    pub warmup_window_ms: i64,
    pub startup_grace_ms: i64,
    pub stability_window_ms: i64,
    pub lag_ewma_alpha: f64,
    pub confidence_threshold: f64,
}

impl ReadinessConfig {
    fn for_profile(profile: Profile) -> Self {
        let warmup_window_ms = match profile {
            Profile::Production => 30 * 60_000,
            Profile::Local => 15_000,
        };
        Self {
            warmup_window_ms,
            startup_grace_ms: 10_000,
            stability_window_ms: 10_000,
            lag_ewma_alpha: 0.2,
            confidence_threshold: 0.6,
        }
    }
}

/// Parsed form of `BOT_EXPECTED_SOURCES_CONFIG`: topic -> expected source ids.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExpectedSourcesConfig(pub HashMap<String, Vec<String>>);

impl ExpectedSourcesConfig {
    pub fn expected_for(&self, topic: &str) -> &[String] {
        self.0.get(topic).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub symbols: Vec<String>,
    pub target_market_type: MarketType,
    pub spot_enabled: bool,
    pub oi_enabled: bool,
    pub funding_enabled: bool,
    pub liquidations_enabled: bool,
    pub journal_dir: PathBuf,
    pub global_ttl_ms: i64,
    pub cvd_bucket_ms: i64,
    pub liq_bucket_ms: i64,
    pub readiness: ReadinessConfig,
    pub log_dir: PathBuf,
    pub log_level: String,
    pub log_rotate_max_bytes: u64,
    pub log_rotate_max_files: u32,
    pub health_snapshot_interval_ms: u64,
    pub console_transition_cooldown_ms: u64,
    pub global_weights: HashMap<String, f64>,
    pub expected_sources: ExpectedSourcesConfig,
    pub profile: Profile,
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_or(name: &str, default: &str) -> String {
    env_var(name).unwrap_or_else(|| default.to_string())
}

fn env_parse_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    match env_var(name) {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(name, raw, "failed to parse env var, using default");
            default
        }),
        None => default,
    }
}

fn env_bool(name: &str, default: bool) -> bool {
    match env_var(name) {
        Some(raw) => matches!(raw.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        None => default,
    }
}

fn parse_weights(raw: &str) -> HashMap<String, f64> {
    raw.split(',')
        .filter_map(|pair| {
            let (src, w) = pair.split_once(':')?;
            let weight: f64 = w.trim().parse().ok()?;
            Some((src.trim().to_string(), weight))
        })
        .collect()
}

impl Config {
    /// Load configuration from the process environment, loading a local
    /// `.env` file first (teacher's `main.rs` pattern) if present.
    pub fn load() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let profile = match env_var("BOT_PROFILE").as_deref() {
            Some("production") => Profile::Production,
            _ => Profile::Local,
        };

        let symbols: Vec<String> = env_var("BOT_SYMBOLS")
            .map(|raw| raw.split(',').map(|s| s.trim().to_string()).collect())
            .unwrap_or_default();

        let target_market_type = match env_var("BOT_TARGET_MARKET_TYPE").as_deref() {
            Some("spot") => MarketType::Spot,
            Some("futures") => MarketType::Futures,
            _ => MarketType::Futures,
        };

        let expected_sources = env_var("BOT_EXPECTED_SOURCES_CONFIG")
            .map(|raw| serde_json::from_str(&raw))
            .transpose()
            .map_err(|e| Error::Config(format!("BOT_EXPECTED_SOURCES_CONFIG: {e}")))?
            .unwrap_or_default();

        let config = Config {
            symbols,
            target_market_type,
            spot_enabled: env_bool("BOT_SPOT_ENABLED", false),
            oi_enabled: env_bool("BOT_OI_ENABLED", true),
            funding_enabled: env_bool("BOT_FUNDING_ENABLED", true),
            liquidations_enabled: env_bool("BOT_LIQUIDATIONS_ENABLED", true),
            journal_dir: PathBuf::from(env_or("BOT_JOURNAL_DIR", "./journal")),
            global_ttl_ms: env_parse_or("BOT_GLOBAL_TTL_MS", 60_000),
            cvd_bucket_ms: env_parse_or("BOT_CVD_BUCKET_MS", 1_000),
            liq_bucket_ms: env_parse_or("BOT_LIQ_BUCKET_MS", 1_000),
            readiness: ReadinessConfig::for_profile(profile),
            log_dir: PathBuf::from(env_or("LOG_DIR", "./logs")),
            log_level: env_or("LOG_LEVEL", "info"),
            log_rotate_max_bytes: env_parse_or("LOG_ROTATE_MAX_BYTES", 10 * 1024 * 1024),
            log_rotate_max_files: env_parse_or("LOG_ROTATE_MAX_FILES", 5),
            health_snapshot_interval_ms: env_parse_or("HEALTH_SNAPSHOT_INTERVAL_MS", 30_000),
            console_transition_cooldown_ms: env_parse_or("CONSOLE_TRANSITION_COOLDOWN_MS", 5_000),
            global_weights: env_var("BOT_GLOBAL_WEIGHTS")
                .map(|raw| parse_weights(&raw))
                .unwrap_or_default(),
            expected_sources,
            profile,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.symbols.is_empty() {
            return Err(Error::Config("BOT_SYMBOLS must list at least one symbol".into()));
        }
        if self.global_ttl_ms <= 0 || self.cvd_bucket_ms <= 0 || self.liq_bucket_ms <= 0 {
            return Err(Error::Config("TTL/bucket intervals must be positive".into()));
        }
        Ok(())
    }

    pub fn init_logging(&self) {
        use tracing_subscriber::{fmt, EnvFilter};

        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.log_level));

        if env_var("LOG_FORMAT").as_deref() == Some("json") {
            fmt().json().with_env_filter(filter).init();
        } else {
            fmt().with_env_filter(filter).init();
        }
    }
}
