//! Service configuration.
//!
//! ## Responsibility
//! Parse and validate the TOML service configuration loaded at startup.
//! Every field has a documented default, so an absent file or empty table
//! still yields a runnable configuration.
//!
//! ## Guarantees
//! - A successfully loaded config is always validated
//! - I/O, parse, and validation errors are distinguished in the error type
//! - Validation collects *all* violations before returning (no
//!   short-circuit); messages include the field path and the invalid value
//!
//! ## NOT Responsible For
//! - Building the runtime pipeline from config (that belongs to `main`)
//! - Managing backend connections (that belongs to `backend`)

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::pipeline::TesterMode;

/// Errors arising from configuration parsing, validation, or I/O.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parsing failed.
    #[error("Parse error in {file}: {source}")]
    Parse {
        /// Path of the file that failed to parse.
        file: String,
        /// Underlying TOML deserialization error.
        #[source]
        source: toml::de::Error,
    },

    /// One or more semantic validation rules failed.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A specific field has an out-of-range or contradictory value.
    #[error("Field '{field}' has invalid value {value}: {reason}")]
    InvalidField {
        /// Dot-separated field path (e.g., "pipeline.proposals_to_test").
        field: String,
        /// String representation of the invalid value.
        value: String,
        /// Human-readable explanation of the constraint.
        reason: String,
    },

    /// File I/O error.
    #[error("IO error reading {file}: {source}")]
    Io {
        /// Path of the file that could not be read.
        file: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

// ── Default value functions ──────────────────────────────────────────────

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

/// Default maximum request body size: 1 MB.
fn default_max_request_size() -> usize {
    1024 * 1024
}

fn default_db_path() -> String {
    "clientpulse.db".to_string()
}

fn default_model() -> String {
    "gpt-3.5-turbo".to_string()
}

/// Default generation-backend timeout: 30 seconds.
fn default_generation_timeout() -> u64 {
    30
}

fn default_temperature() -> f32 {
    0.7
}

/// Default K: test the top 2 proposals per run.
fn default_proposals_to_test() -> usize {
    2
}

fn default_tester_mode() -> TesterMode {
    TesterMode::Generative
}

/// Default webhook delivery timeout: 5 seconds.
fn default_webhook_timeout() -> u64 {
    5
}

// ── Config schema ────────────────────────────────────────────────────────

/// Root configuration for the service.
///
/// Deserialized from a TOML file and validated before use.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ServiceConfig {
    /// HTTP server settings.
    pub server: ServerSection,
    /// Database settings.
    pub database: DatabaseSection,
    /// Generation-backend settings.
    pub generation: GenerationSection,
    /// Pipeline tuning.
    pub pipeline: PipelineSection,
    /// Webhook delivery settings.
    pub webhook: WebhookSection,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerSection {
    /// IP address or hostname to bind to.
    pub host: String,
    /// TCP port the server listens on.
    pub port: u16,
    /// Maximum allowed request body size in bytes.
    pub max_request_size: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_request_size: default_max_request_size(),
        }
    }
}

/// Database settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DatabaseSection {
    /// Path of the SQLite database file.
    pub path: String,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Which generation backend to construct at startup.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// OpenAI-compatible chat-completions API (requires `OPENAI_API_KEY`).
    OpenAi,
    /// Scripted offline backend, for demos and smoke tests.
    Canned,
}

/// Generation-backend settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GenerationSection {
    /// Backend implementation to use.
    pub backend: BackendKind,
    /// Model identifier passed to the backend.
    pub model: String,
    /// Override of the API base URL (e.g. a proxy or mock server).
    pub base_url: Option<String>,
    /// Per-call timeout in seconds.
    pub timeout_seconds: u64,
    /// Sampling temperature (0.0 - 2.0).
    pub temperature: f32,
}

impl Default for GenerationSection {
    fn default() -> Self {
        Self {
            backend: BackendKind::OpenAi,
            model: default_model(),
            base_url: None,
            timeout_seconds: default_generation_timeout(),
            temperature: default_temperature(),
        }
    }
}

/// Pipeline tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineSection {
    /// K: how many proposals are tested and recorded per run.
    /// Production deployments use 1 or 2.
    pub proposals_to_test: usize,
    /// Whether the intervention tester calls the backend or returns the
    /// fixed placeholder result.
    pub tester_mode: TesterMode,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            proposals_to_test: default_proposals_to_test(),
            tester_mode: default_tester_mode(),
        }
    }
}

/// Webhook delivery settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WebhookSection {
    /// Per-delivery timeout in seconds.
    pub timeout_seconds: u64,
}

impl Default for WebhookSection {
    fn default() -> Self {
        Self {
            timeout_seconds: default_webhook_timeout(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────────────

/// Load a [`ServiceConfig`] from a TOML file.
///
/// # Errors
///
/// - [`ConfigError::Io`] if the file cannot be read.
/// - [`ConfigError::Parse`] if the TOML is malformed.
/// - [`ConfigError::Validation`] if semantic constraints are violated.
///
/// # Panics
///
/// This function never panics.
pub fn load_from_file(path: &Path) -> Result<ServiceConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        file: path.display().to_string(),
        source: e,
    })?;

    load_from_str(&content, &path.display().to_string())
}

/// Load a [`ServiceConfig`] from a TOML string.
///
/// Useful for testing or embedding configs without file I/O.
///
/// # Errors
///
/// - [`ConfigError::Parse`] if the TOML is malformed.
/// - [`ConfigError::Validation`] if semantic constraints are violated.
pub fn load_from_str(content: &str, source_name: &str) -> Result<ServiceConfig, ConfigError> {
    let config: ServiceConfig = toml::from_str(content).map_err(|e| ConfigError::Parse {
        file: source_name.to_string(),
        source: e,
    })?;

    validate(&config).map_err(|errors| {
        ConfigError::Validation(
            errors
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("\n"),
        )
    })?;

    Ok(config)
}

// ── Validation ───────────────────────────────────────────────────────────

/// Validate all semantic constraints on a [`ServiceConfig`].
///
/// Collects every violation before returning so the caller sees the full
/// scope of issues at once.
///
/// # Errors
///
/// Returns every violation found, as [`ConfigError::InvalidField`] values.
pub fn validate(config: &ServiceConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    if config.pipeline.proposals_to_test == 0 {
        errors.push(ConfigError::InvalidField {
            field: "pipeline.proposals_to_test".into(),
            value: "0".into(),
            reason: "must be at least 1".into(),
        });
    }

    if config.generation.timeout_seconds == 0 {
        errors.push(ConfigError::InvalidField {
            field: "generation.timeout_seconds".into(),
            value: "0".into(),
            reason: "must be at least 1".into(),
        });
    }

    if !(0.0..=2.0).contains(&config.generation.temperature) {
        errors.push(ConfigError::InvalidField {
            field: "generation.temperature".into(),
            value: config.generation.temperature.to_string(),
            reason: "must be within [0.0, 2.0]".into(),
        });
    }

    if config.webhook.timeout_seconds == 0 {
        errors.push(ConfigError::InvalidField {
            field: "webhook.timeout_seconds".into(),
            value: "0".into(),
            reason: "must be at least 1".into(),
        });
    }

    if config.database.path.is_empty() {
        errors.push(ConfigError::InvalidField {
            field: "database.path".into(),
            value: "\"\"".into(),
            reason: "must not be empty".into(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_yields_defaults() {
        let config = load_from_str("", "inline").unwrap();
        assert_eq!(config, ServiceConfig::default());
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.pipeline.proposals_to_test, 2);
        assert_eq!(config.pipeline.tester_mode, TesterMode::Generative);
        assert_eq!(config.generation.backend, BackendKind::OpenAi);
    }

    #[test]
    fn test_full_toml_round_trip() {
        let toml = r#"
            [server]
            host = "127.0.0.1"
            port = 9100

            [database]
            path = "/var/lib/clientpulse/data.db"

            [generation]
            backend = "canned"
            model = "gpt-4"
            timeout_seconds = 10
            temperature = 0.2

            [pipeline]
            proposals_to_test = 1
            tester_mode = "fixed"

            [webhook]
            timeout_seconds = 3
        "#;
        let config = load_from_str(toml, "inline").unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.generation.backend, BackendKind::Canned);
        assert_eq!(config.pipeline.proposals_to_test, 1);
        assert_eq!(config.pipeline.tester_mode, TesterMode::Fixed);
        assert_eq!(config.webhook.timeout_seconds, 3);
    }

    #[test]
    fn test_malformed_toml_is_parse_error() {
        let result = load_from_str("[server\nport = 1", "inline");
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_zero_proposals_to_test_is_rejected() {
        let result = load_from_str("[pipeline]\nproposals_to_test = 0", "inline");
        let Err(ConfigError::Validation(message)) = result else {
            panic!("expected validation error");
        };
        assert!(message.contains("pipeline.proposals_to_test"));
    }

    #[test]
    fn test_validation_collects_all_errors() {
        let config = ServiceConfig {
            pipeline: PipelineSection {
                proposals_to_test: 0,
                ..PipelineSection::default()
            },
            generation: GenerationSection {
                temperature: 9.0,
                timeout_seconds: 0,
                ..GenerationSection::default()
            },
            ..ServiceConfig::default()
        };
        let errors = validate(&config).unwrap_err();
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn test_unknown_tester_mode_is_parse_error() {
        let result = load_from_str("[pipeline]\ntester_mode = \"simulated\"", "inline");
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }
}
