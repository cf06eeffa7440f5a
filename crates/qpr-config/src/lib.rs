// SPDX-License-Identifier: MIT OR Apache-2.0
//! Configuration loading, validation, and merging for the pattern
//! orchestration runtime.
//!
//! This crate provides [`RuntimeConfig`] — the top-level runtime settings —
//! together with helpers for loading from TOML files, merging overlays, and
//! producing advisory [`ConfigWarning`]s.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::path::Path;
use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during configuration loading or validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The requested configuration file was not found.
    #[error("config file not found: {path}")]
    FileNotFound {
        /// Path that was requested.
        path: String,
    },

    /// The file could not be parsed as valid TOML.
    #[error("failed to parse config: {reason}")]
    ParseError {
        /// Human-readable parse error detail.
        reason: String,
    },

    /// Semantic validation failed (one or more problems).
    #[error("config validation failed: {reasons:?}")]
    ValidationError {
        /// Individual validation failure messages.
        reasons: Vec<String>,
    },
}

// ---------------------------------------------------------------------------
// Warnings
// ---------------------------------------------------------------------------

/// Advisory-level issues that do not prevent operation but deserve attention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// A recommended optional field is missing.
    MissingOptionalField {
        /// Name of the missing field.
        field: String,
        /// Why it matters.
        hint: String,
    },
    /// The execution cache ceiling is unusually large.
    LargeCacheCeiling {
        /// Configured ceiling.
        max_entries: usize,
    },
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigWarning::MissingOptionalField { field, hint } => {
                write!(f, "missing optional field '{field}': {hint}")
            }
            ConfigWarning::LargeCacheCeiling { max_entries } => {
                write!(f, "execution cache ceiling is unusually large ({max_entries} entries)")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Config types
// ---------------------------------------------------------------------------

/// Top-level runtime configuration for the orchestrator process.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct RuntimeConfig {
    /// Directory the Pattern Loader scans for `*.json` pattern documents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern_dir: Option<String>,

    /// Directory backing the Pricing Pack Store (spec §4.1).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pricing_pack_dir: Option<String>,

    /// Log level override (e.g. `"debug"`, `"info"`, `"warn"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    /// Process-wide LRU ceiling on Execution Cache entries (spec §4.7).
    #[serde(default = "default_cache_max_entries")]
    pub cache_max_entries: usize,

    /// Maximum number of requests the daemon admits concurrently (spec §5
    /// "Maximum in-flight requests: tunable; excess returns `Backpressure`
    /// without being routed to an agent"). A request that arrives once
    /// this ceiling is saturated is rejected at entry, before any
    /// capability is invoked.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    /// Agent Runtime retry policy overrides (spec §4.4.2).
    #[serde(default)]
    pub retry: RetryPolicyConfig,

    /// Circuit breaker tuning overrides (spec §4.4.1).
    #[serde(default)]
    pub circuit_breaker: BreakerPolicyConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            pattern_dir: None,
            pricing_pack_dir: None,
            log_level: Some("info".into()),
            cache_max_entries: default_cache_max_entries(),
            max_in_flight: default_max_in_flight(),
            retry: RetryPolicyConfig::default(),
            circuit_breaker: BreakerPolicyConfig::default(),
        }
    }
}

fn default_cache_max_entries() -> usize {
    10_000
}

fn default_max_in_flight() -> usize {
    64
}

/// Retry policy knobs, expressed in plain numeric/second fields so the TOML
/// surface doesn't need a `Duration` serde adapter (spec §4.4.2 defaults:
/// 3 attempts, 250ms base, 5s cap).
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct RetryPolicyConfig {
    /// Maximum attempts, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base exponential backoff delay in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Cap on any single backoff delay in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryPolicyConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    250
}
fn default_max_delay_ms() -> u64 {
    5_000
}

impl RetryPolicyConfig {
    /// Build the runtime's [`qpr_retry::RetryPolicy`] from this config.
    pub fn to_policy(&self) -> qpr_retry::RetryPolicy {
        qpr_retry::RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

/// Circuit breaker knobs (spec §4.4.1 defaults: N=20, F=0.5, M=5, 30s
/// cooldown doubling to a 10-minute ceiling).
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct BreakerPolicyConfig {
    /// Sliding window size.
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    /// Failure rate threshold (0.0–1.0) that trips the breaker.
    #[serde(default = "default_failure_rate_threshold")]
    pub failure_rate_threshold: f64,
    /// Minimum absolute failure count to trip the breaker.
    #[serde(default = "default_min_failures")]
    pub min_failures: u32,
    /// Initial cooldown once OPEN, in seconds.
    #[serde(default = "default_base_cooldown_secs")]
    pub base_cooldown_secs: u64,
    /// Ceiling the doubling cooldown never exceeds, in seconds.
    #[serde(default = "default_cooldown_ceiling_secs")]
    pub cooldown_ceiling_secs: u64,
}

impl Default for BreakerPolicyConfig {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            failure_rate_threshold: default_failure_rate_threshold(),
            min_failures: default_min_failures(),
            base_cooldown_secs: default_base_cooldown_secs(),
            cooldown_ceiling_secs: default_cooldown_ceiling_secs(),
        }
    }
}

fn default_window_size() -> usize {
    20
}
fn default_failure_rate_threshold() -> f64 {
    0.5
}
fn default_min_failures() -> u32 {
    5
}
fn default_base_cooldown_secs() -> u64 {
    30
}
fn default_cooldown_ceiling_secs() -> u64 {
    600
}

impl BreakerPolicyConfig {
    /// Build the runtime's [`qpr_retry::BreakerConfig`] from this config.
    pub fn to_config(&self) -> qpr_retry::BreakerConfig {
        qpr_retry::BreakerConfig {
            window_size: self.window_size,
            failure_rate_threshold: self.failure_rate_threshold,
            min_failures: self.min_failures,
            base_cooldown: Duration::from_secs(self.base_cooldown_secs),
            cooldown_ceiling: Duration::from_secs(self.cooldown_ceiling_secs),
        }
    }
}

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Recognised log levels.
const VALID_LOG_LEVELS: &[&str] = &["error", "warn", "info", "debug", "trace"];

/// Above this ceiling, a large cache warrants an advisory warning rather
/// than an error — memory use scales with the number of entries, not
/// correctness.
const LARGE_CACHE_CEILING_THRESHOLD: usize = 1_000_000;

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Load a [`RuntimeConfig`] from an optional TOML file path.
///
/// * If `path` is `Some`, reads and parses the file.
/// * If `path` is `None`, returns [`RuntimeConfig::default()`].
///
/// Environment variable overrides are applied on top in both cases.
pub fn load_config(path: Option<&Path>) -> Result<RuntimeConfig, ConfigError> {
    let mut config = match path {
        Some(p) => {
            let content = std::fs::read_to_string(p).map_err(|_| ConfigError::FileNotFound {
                path: p.display().to_string(),
            })?;
            parse_toml(&content)?
        }
        None => RuntimeConfig::default(),
    };
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Parse a TOML string into a [`RuntimeConfig`].
pub fn parse_toml(content: &str) -> Result<RuntimeConfig, ConfigError> {
    toml::from_str::<RuntimeConfig>(content).map_err(|e| ConfigError::ParseError { reason: e.to_string() })
}

// ---------------------------------------------------------------------------
// Env overrides
// ---------------------------------------------------------------------------

/// Apply environment variable overrides.
///
/// Recognised variables:
/// - `QPR_PATTERN_DIR`
/// - `QPR_PRICING_PACK_DIR`
/// - `QPR_LOG_LEVEL`
pub fn apply_env_overrides(config: &mut RuntimeConfig) {
    if let Ok(val) = std::env::var("QPR_PATTERN_DIR") {
        config.pattern_dir = Some(val);
    }
    if let Ok(val) = std::env::var("QPR_PRICING_PACK_DIR") {
        config.pricing_pack_dir = Some(val);
    }
    if let Ok(val) = std::env::var("QPR_LOG_LEVEL") {
        config.log_level = Some(val);
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a parsed configuration, returning advisory warnings.
///
/// Hard errors (invalid log level, out-of-range retry/breaker knobs) are
/// returned as a [`ConfigError::ValidationError`]; soft issues come back as
/// warnings.
pub fn validate_config(config: &RuntimeConfig) -> Result<Vec<ConfigWarning>, ConfigError> {
    let mut errors: Vec<String> = Vec::new();
    let mut warnings: Vec<ConfigWarning> = Vec::new();

    if let Some(ref level) = config.log_level
        && !VALID_LOG_LEVELS.contains(&level.as_str())
    {
        errors.push(format!("invalid log_level '{level}'"));
    }

    if config.cache_max_entries == 0 {
        errors.push("cache_max_entries must be at least 1".into());
    } else if config.cache_max_entries > LARGE_CACHE_CEILING_THRESHOLD {
        warnings.push(ConfigWarning::LargeCacheCeiling {
            max_entries: config.cache_max_entries,
        });
    }

    if config.max_in_flight == 0 {
        errors.push("max_in_flight must be at least 1".into());
    }

    if config.retry.max_attempts == 0 {
        errors.push("retry.max_attempts must be at least 1".into());
    }
    if config.retry.base_delay_ms > config.retry.max_delay_ms {
        errors.push("retry.base_delay_ms must not exceed retry.max_delay_ms".into());
    }

    if config.circuit_breaker.window_size == 0 {
        errors.push("circuit_breaker.window_size must be at least 1".into());
    }
    if !(0.0..=1.0).contains(&config.circuit_breaker.failure_rate_threshold) {
        errors.push("circuit_breaker.failure_rate_threshold must be between 0.0 and 1.0".into());
    }
    if config.circuit_breaker.base_cooldown_secs > config.circuit_breaker.cooldown_ceiling_secs {
        errors.push("circuit_breaker.base_cooldown_secs must not exceed cooldown_ceiling_secs".into());
    }

    if config.pattern_dir.is_none() {
        warnings.push(ConfigWarning::MissingOptionalField {
            field: "pattern_dir".into(),
            hint: "callers must always specify --pattern-dir explicitly".into(),
        });
    }
    if config.pricing_pack_dir.is_none() {
        warnings.push(ConfigWarning::MissingOptionalField {
            field: "pricing_pack_dir".into(),
            hint: "pricing packs will not be persisted across restarts".into(),
        });
    }

    if errors.is_empty() {
        Ok(warnings)
    } else {
        Err(ConfigError::ValidationError { reasons: errors })
    }
}

// ---------------------------------------------------------------------------
// Merging
// ---------------------------------------------------------------------------

/// Merge two configurations. Values in `overlay` take precedence over
/// `base`; scalar knobs with no "unset" representation (cache ceiling,
/// retry/breaker policy) always come from `overlay` since they carry
/// defaults rather than `Option`.
pub fn merge_configs(base: RuntimeConfig, overlay: RuntimeConfig) -> RuntimeConfig {
    RuntimeConfig {
        pattern_dir: overlay.pattern_dir.or(base.pattern_dir),
        pricing_pack_dir: overlay.pricing_pack_dir.or(base.pricing_pack_dir),
        log_level: overlay.log_level.or(base.log_level),
        cache_max_entries: overlay.cache_max_entries,
        max_in_flight: overlay.max_in_flight,
        retry: overlay.retry,
        circuit_breaker: overlay.circuit_breaker,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
#[allow(clippy::field_reassign_with_default)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let cfg = RuntimeConfig::default();
        let warnings = validate_config(&cfg).expect("default config should be valid");
        assert!(!warnings.is_empty(), "should have advisory warnings");
    }

    #[test]
    fn default_config_has_sensible_defaults() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.log_level.as_deref(), Some("info"));
        assert_eq!(cfg.cache_max_entries, 10_000);
        assert_eq!(cfg.max_in_flight, 64);
        assert_eq!(cfg.retry.max_attempts, 3);
        assert_eq!(cfg.circuit_breaker.window_size, 20);
    }

    #[test]
    fn parse_valid_toml_string() {
        let toml_str = r#"
            pattern_dir = "./patterns"
            log_level = "debug"

            [retry]
            max_attempts = 5
        "#;
        let cfg = parse_toml(toml_str).unwrap();
        assert_eq!(cfg.pattern_dir.as_deref(), Some("./patterns"));
        assert_eq!(cfg.log_level.as_deref(), Some("debug"));
        assert_eq!(cfg.retry.max_attempts, 5);
        assert_eq!(cfg.retry.base_delay_ms, 250);
    }

    #[test]
    fn parse_invalid_toml_gives_parse_error() {
        let bad = "this is [not valid toml =";
        let err = parse_toml(bad).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn validation_catches_invalid_log_level() {
        let cfg = RuntimeConfig {
            log_level: Some("verbose".into()),
            ..Default::default()
        };
        let err = validate_config(&cfg).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { .. }));
    }

    #[test]
    fn validation_catches_zero_cache_ceiling() {
        let cfg = RuntimeConfig {
            cache_max_entries: 0,
            ..Default::default()
        };
        let err = validate_config(&cfg).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { .. }));
    }

    #[test]
    fn validation_catches_zero_max_in_flight() {
        let cfg = RuntimeConfig {
            max_in_flight: 0,
            ..Default::default()
        };
        let err = validate_config(&cfg).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { .. }));
    }

    #[test]
    fn large_cache_ceiling_produces_warning() {
        let cfg = RuntimeConfig {
            pattern_dir: Some("p".into()),
            pricing_pack_dir: Some("pp".into()),
            cache_max_entries: 2_000_000,
            ..Default::default()
        };
        let warnings = validate_config(&cfg).unwrap();
        assert!(warnings.iter().any(|w| matches!(w, ConfigWarning::LargeCacheCeiling { .. })));
    }

    #[test]
    fn validation_catches_invalid_failure_rate_threshold() {
        let mut cfg = RuntimeConfig::default();
        cfg.circuit_breaker.failure_rate_threshold = 1.5;
        let err = validate_config(&cfg).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { .. }));
    }

    #[test]
    fn validation_catches_cooldown_inversion() {
        let mut cfg = RuntimeConfig::default();
        cfg.circuit_breaker.base_cooldown_secs = 700;
        let err = validate_config(&cfg).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { .. }));
    }

    #[test]
    fn merge_overlay_overrides_base() {
        let base = RuntimeConfig {
            pattern_dir: Some("./a".into()),
            log_level: Some("info".into()),
            ..Default::default()
        };
        let overlay = RuntimeConfig {
            pattern_dir: Some("./b".into()),
            log_level: None,
            ..Default::default()
        };
        let merged = merge_configs(base, overlay);
        assert_eq!(merged.pattern_dir.as_deref(), Some("./b"));
        assert_eq!(merged.log_level.as_deref(), Some("info"));
    }

    #[test]
    fn merge_preserves_base_when_overlay_fields_are_none() {
        let base = RuntimeConfig {
            pattern_dir: Some("./a".into()),
            pricing_pack_dir: Some("./packs".into()),
            ..Default::default()
        };
        let merged = merge_configs(base.clone(), RuntimeConfig::default());
        assert_eq!(merged.pattern_dir, base.pattern_dir);
        assert_eq!(merged.pricing_pack_dir, base.pricing_pack_dir);
    }

    #[test]
    fn retry_config_converts_to_runtime_policy() {
        let cfg = RetryPolicyConfig {
            max_attempts: 4,
            base_delay_ms: 100,
            max_delay_ms: 2_000,
        };
        let policy = cfg.to_policy();
        assert_eq!(policy.max_attempts, 4);
        assert_eq!(policy.base_delay, Duration::from_millis(100));
        assert_eq!(policy.max_delay, Duration::from_millis(2_000));
    }

    #[test]
    fn breaker_config_converts_to_runtime_config() {
        let cfg = BreakerPolicyConfig::default();
        let breaker = cfg.to_config();
        assert_eq!(breaker.window_size, 20);
        assert_eq!(breaker.base_cooldown, Duration::from_secs(30));
        assert_eq!(breaker.cooldown_ceiling, Duration::from_secs(600));
    }

    #[test]
    fn load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runtime.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "pattern_dir = \"./patterns\"\nlog_level = \"warn\"").unwrap();
        let cfg = load_config(Some(&path)).unwrap();
        assert_eq!(cfg.pattern_dir.as_deref(), Some("./patterns"));
        assert_eq!(cfg.log_level.as_deref(), Some("warn"));
    }

    #[test]
    fn load_missing_file_gives_file_not_found() {
        let err = load_config(Some(Path::new("/nonexistent/runtime.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound { .. }));
    }

    #[test]
    fn load_none_returns_default() {
        let cfg = load_config(None).unwrap();
        assert_eq!(cfg.log_level.as_deref(), Some("info"));
    }

    #[test]
    fn toml_roundtrip() {
        let cfg = RuntimeConfig {
            pattern_dir: Some("./patterns".into()),
            pricing_pack_dir: Some("./packs".into()),
            log_level: Some("debug".into()),
            cache_max_entries: 5_000,
            max_in_flight: 64,
            retry: RetryPolicyConfig::default(),
            circuit_breaker: BreakerPolicyConfig::default(),
        };
        let serialized = toml::to_string(&cfg).unwrap();
        let deserialized: RuntimeConfig = toml::from_str(&serialized).unwrap();
        assert_eq!(cfg, deserialized);
    }

    #[test]
    fn config_error_display() {
        let e = ConfigError::FileNotFound { path: "/foo".into() };
        assert!(e.to_string().contains("/foo"));
        let e = ConfigError::ParseError { reason: "bad toml".into() };
        assert!(e.to_string().contains("bad toml"));
    }

    #[test]
    fn config_warning_display() {
        let w = ConfigWarning::MissingOptionalField {
            field: "f".into(),
            hint: "h".into(),
        };
        assert!(w.to_string().contains('f'));
        let w = ConfigWarning::LargeCacheCeiling { max_entries: 9999 };
        assert!(w.to_string().contains("9999"));
    }
}
