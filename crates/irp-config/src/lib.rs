// SPDX-License-Identifier: MIT OR Apache-2.0
//! Pipeline configuration for the inspection pipeline.
//!
//! This crate provides [`PipelineConfig`] — a fixed struct enumerating every
//! recognized option — together with helpers for loading from TOML files,
//! applying environment overrides, and producing advisory
//! [`ConfigWarning`]s. There is deliberately no open-ended options map.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use irp_core::{PurgeMode, RetentionPolicy};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;

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
    /// A provider credential is absent from the environment.
    MissingCredential {
        /// Environment variable that was empty.
        var: String,
        /// What stops working without it.
        hint: String,
    },
    /// Raw response storage is enabled with a very large cap.
    LargeRawCap {
        /// The configured cap in bytes.
        bytes: u64,
    },
    /// Retention is configured to delete aggressively.
    AggressiveRetention {
        /// Why this looks aggressive.
        reason: String,
    },
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigWarning::MissingCredential { var, hint } => {
                write!(f, "missing credential '{var}': {hint}")
            }
            ConfigWarning::LargeRawCap { bytes } => {
                write!(f, "raw-response cap is large ({bytes} bytes)")
            }
            ConfigWarning::AggressiveRetention { reason } => {
                write!(f, "aggressive retention: {reason}")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Config types
// ---------------------------------------------------------------------------

/// How much of a provider's raw response the intake store retains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RawStorageLevel {
    /// Record neither the raw response nor its hash.
    None,
    /// Record the hash only.
    Minimal,
    /// Record the (possibly truncated) raw response and its hash.
    Full,
}

/// Top-level runtime configuration for the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Sleep between `.job_json.lock/` acquisition attempts, in milliseconds.
    #[serde(default = "default_lock_retry_interval_ms")]
    pub lock_retry_interval_ms: u64,

    /// Maximum `.job_json.lock/` acquisition attempts before
    /// `JOB_JSON_LOCK_TIMEOUT`.
    #[serde(default = "default_lock_max_retries")]
    pub lock_max_retries: u32,

    /// Raw provider-response retention level in intake sessions.
    #[serde(default = "default_raw_storage_level")]
    pub raw_storage_level: RawStorageLevel,

    /// Byte cap on stored raw responses (truncation is flagged).
    #[serde(default = "default_max_raw_bytes")]
    pub max_raw_bytes: u64,

    /// Whether the renderer should additionally emit a PDF.
    #[serde(default)]
    pub generate_pdf: bool,

    /// Fallback retention policy when the field contract declares none.
    #[serde(default)]
    pub retention: RetentionPolicy,
}

fn default_lock_retry_interval_ms() -> u64 {
    50
}
fn default_lock_max_retries() -> u32 {
    40
}
fn default_raw_storage_level() -> RawStorageLevel {
    RawStorageLevel::Full
}
fn default_max_raw_bytes() -> u64 {
    256 * 1024
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            lock_retry_interval_ms: default_lock_retry_interval_ms(),
            lock_max_retries: default_lock_max_retries(),
            raw_storage_level: default_raw_storage_level(),
            max_raw_bytes: default_max_raw_bytes(),
            generate_pdf: false,
            retention: RetentionPolicy::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// Provider credentials, read once at process start.
#[derive(Debug, Clone, Default)]
pub struct ProviderCredentials {
    /// Key for the field-extraction (LLM) provider.
    pub llm_api_key: Option<String>,
    /// Key for the OCR provider.
    pub ocr_api_key: Option<String>,
}

impl ProviderCredentials {
    /// Read `IRP_LLM_API_KEY` and `IRP_OCR_API_KEY` from the environment.
    #[must_use]
    pub fn from_env() -> Self {
        let read = |var: &str| std::env::var(var).ok().filter(|v| !v.trim().is_empty());
        Self {
            llm_api_key: read("IRP_LLM_API_KEY"),
            ocr_api_key: read("IRP_OCR_API_KEY"),
        }
    }

    /// Advisory warnings for absent credentials.
    #[must_use]
    pub fn warnings(&self) -> Vec<ConfigWarning> {
        let mut out = Vec::new();
        if self.llm_api_key.is_none() {
            out.push(ConfigWarning::MissingCredential {
                var: "IRP_LLM_API_KEY".into(),
                hint: "field extraction will be unavailable".into(),
            });
        }
        if self.ocr_api_key.is_none() {
            out.push(ConfigWarning::MissingCredential {
                var: "IRP_OCR_API_KEY".into(),
                hint: "OCR confidence boosting will be unavailable".into(),
            });
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Load a [`PipelineConfig`] from an optional TOML file path.
///
/// * If `path` is `Some`, reads and parses the file.
/// * If `path` is `None`, returns [`PipelineConfig::default()`].
///
/// Environment variable overrides are applied on top in both cases.
///
/// # Errors
///
/// Returns [`ConfigError`] on unreadable or unparseable files.
pub fn load_config(path: Option<&Path>) -> Result<PipelineConfig, ConfigError> {
    let mut config = match path {
        Some(p) => {
            let content = std::fs::read_to_string(p).map_err(|_| ConfigError::FileNotFound {
                path: p.display().to_string(),
            })?;
            parse_toml(&content)?
        }
        None => PipelineConfig::default(),
    };
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Parse a TOML string into a [`PipelineConfig`].
///
/// # Errors
///
/// Returns [`ConfigError::ParseError`] on invalid TOML.
pub fn parse_toml(content: &str) -> Result<PipelineConfig, ConfigError> {
    toml::from_str::<PipelineConfig>(content).map_err(|e| ConfigError::ParseError {
        reason: e.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Env overrides
// ---------------------------------------------------------------------------

/// Apply environment variable overrides.
///
/// Recognised variables:
/// - `IRP_LOCK_RETRY_INTERVAL_MS`
/// - `IRP_LOCK_MAX_RETRIES`
/// - `IRP_RAW_STORAGE_LEVEL` (`none` | `minimal` | `full`)
/// - `IRP_GENERATE_PDF` (`true` | `false`)
pub fn apply_env_overrides(config: &mut PipelineConfig) {
    if let Ok(val) = std::env::var("IRP_LOCK_RETRY_INTERVAL_MS")
        && let Ok(ms) = val.parse()
    {
        config.lock_retry_interval_ms = ms;
    }
    if let Ok(val) = std::env::var("IRP_LOCK_MAX_RETRIES")
        && let Ok(n) = val.parse()
    {
        config.lock_max_retries = n;
    }
    if let Ok(val) = std::env::var("IRP_RAW_STORAGE_LEVEL") {
        match val.as_str() {
            "none" => config.raw_storage_level = RawStorageLevel::None,
            "minimal" => config.raw_storage_level = RawStorageLevel::Minimal,
            "full" => config.raw_storage_level = RawStorageLevel::Full,
            _ => {}
        }
    }
    if let Ok(val) = std::env::var("IRP_GENERATE_PDF") {
        config.generate_pdf = val == "true" || val == "1";
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a configuration, returning advisory warnings.
///
/// Hard errors (a zero lock budget, a zero raw cap at full storage) come
/// back as [`ConfigError::ValidationError`]; soft issues as warnings.
///
/// # Errors
///
/// Returns [`ConfigError::ValidationError`] when the config is unusable.
pub fn validate_config(config: &PipelineConfig) -> Result<Vec<ConfigWarning>, ConfigError> {
    let mut errors: Vec<String> = Vec::new();
    let mut warnings: Vec<ConfigWarning> = Vec::new();

    if config.lock_max_retries == 0 {
        errors.push("lock_max_retries must be at least 1".into());
    }
    if config.lock_retry_interval_ms == 0 {
        errors.push("lock_retry_interval_ms must be at least 1".into());
    }
    if config.raw_storage_level == RawStorageLevel::Full && config.max_raw_bytes == 0 {
        errors.push("max_raw_bytes must be non-zero at raw_storage_level = full".into());
    }

    if config.max_raw_bytes > 16 * 1024 * 1024 {
        warnings.push(ConfigWarning::LargeRawCap {
            bytes: config.max_raw_bytes,
        });
    }
    if config.retention.days == 0 && config.retention.mode == PurgeMode::Delete {
        warnings.push(ConfigWarning::AggressiveRetention {
            reason: "retention.days = 0 with delete mode evicts every non-protected bucket".into(),
        });
    }
    if config.retention.min_keep_count == 0 {
        warnings.push(ConfigWarning::AggressiveRetention {
            reason: "retention.min_keep_count = 0 keeps no archive floor".into(),
        });
    }

    if errors.is_empty() {
        Ok(warnings)
    } else {
        Err(ConfigError::ValidationError { reasons: errors })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    // -- 1. Default config is valid ------------------------------------------

    #[test]
    fn default_config_is_valid() {
        let cfg = PipelineConfig::default();
        let warnings = validate_config(&cfg).expect("default config should be valid");
        assert!(warnings.is_empty());
    }

    // -- 2. Defaults match the documented lock window ------------------------

    #[test]
    fn defaults_match_documented_lock_window() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.lock_retry_interval_ms, 50);
        assert_eq!(cfg.lock_max_retries, 40);
        // 50 ms x 40 = the documented 2 s acquisition window.
        assert_eq!(cfg.lock_retry_interval_ms * u64::from(cfg.lock_max_retries), 2000);
    }

    // -- 3. TOML parsing with partial overrides ------------------------------

    #[test]
    fn parse_partial_toml() {
        let cfg = parse_toml(
            r#"
            lock_max_retries = 10
            raw_storage_level = "minimal"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.lock_max_retries, 10);
        assert_eq!(cfg.raw_storage_level, RawStorageLevel::Minimal);
        assert_eq!(cfg.lock_retry_interval_ms, 50);
    }

    // -- 4. Invalid TOML gives ParseError ------------------------------------

    #[test]
    fn invalid_toml_gives_parse_error() {
        let err = parse_toml("lock_max_retries = [not").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    // -- 5. Zero lock budget is a hard error ---------------------------------

    #[test]
    fn zero_lock_budget_is_hard_error() {
        let cfg = PipelineConfig {
            lock_max_retries: 0,
            ..Default::default()
        };
        let err = validate_config(&cfg).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { .. }));
    }

    // -- 6. Aggressive retention warns ---------------------------------------

    #[test]
    fn aggressive_retention_warns() {
        let mut cfg = PipelineConfig::default();
        cfg.retention.days = 0;
        cfg.retention.mode = PurgeMode::Delete;
        let warnings = validate_config(&cfg).unwrap();
        assert!(
            warnings
                .iter()
                .any(|w| matches!(w, ConfigWarning::AggressiveRetention { .. }))
        );
    }

    // -- 7. Load from file on disk -------------------------------------------

    #[test]
    fn load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "generate_pdf = true\nmax_raw_bytes = 1024").unwrap();
        let cfg = load_config(Some(&path)).unwrap();
        assert!(cfg.generate_pdf);
        assert_eq!(cfg.max_raw_bytes, 1024);
    }

    // -- 8. Missing file gives FileNotFound ----------------------------------

    #[test]
    fn load_missing_file_gives_file_not_found() {
        let err = load_config(Some(Path::new("/nonexistent/pipeline.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound { .. }));
    }

    // -- 9. Retention TOML round-trip ----------------------------------------

    #[test]
    fn retention_toml_roundtrip() {
        let cfg = PipelineConfig::default();
        let serialized = toml::to_string(&cfg).unwrap();
        let back: PipelineConfig = toml::from_str(&serialized).unwrap();
        assert_eq!(cfg, back);
    }

    // -- 10. Credential warnings name the variable ---------------------------

    #[test]
    fn credential_warnings_name_the_variable() {
        let creds = ProviderCredentials::default();
        let warnings = creds.warnings();
        assert_eq!(warnings.len(), 2);
        assert!(warnings.iter().any(|w| w.to_string().contains("IRP_LLM_API_KEY")));
    }
}
