//! Service configuration
//!
//! Loaded from TOML, then selected fields are overridden from `OUTBOX_*`
//! environment variables.

use outbox_ledger::{check_date_format, NumberingRules, DEFAULT_DATE_FORMAT};
use outbox_signing::OrchestratorConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Used when no `--config` is given and the file exists
pub const DEFAULT_CONFIG_FILE: &str = "outbox.toml";

pub const DEFAULT_STAMP_TEXT: &str = "DOCUMENT SIGNED\nWITH A QUALIFIED ELECTRONIC SIGNATURE";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub numbering: NumberingRules,
    pub signing: SigningConfig,
    pub board: BoardConfig,
    pub render: RenderConfig,
    pub retention: RetentionConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// Accepted bearer tokens for `/api`; empty disables the check
    pub api_tokens: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            api_tokens: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
        }
    }
}

impl StorageConfig {
    #[must_use]
    pub fn ledger_path(&self) -> PathBuf {
        self.data_dir.join("ledger.json")
    }
}

/// A public key the committer accepts signatures from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustedKey {
    /// Hex-encoded ed25519 public key
    pub public_key: String,
    #[serde(default)]
    pub common_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SigningConfig {
    pub discovery_interval_ms: u64,
    pub discovery_attempts: u32,
    pub submit_attempts: u32,
    pub submit_backoff_ms: u64,
    pub sign_attempts: u32,
    pub trusted_keys: Vec<TrustedKey>,
}

impl Default for SigningConfig {
    fn default() -> Self {
        let defaults = OrchestratorConfig::default();
        Self {
            discovery_interval_ms: duration_ms(defaults.discovery_interval),
            discovery_attempts: defaults.discovery_attempts,
            submit_attempts: defaults.submit_attempts,
            submit_backoff_ms: duration_ms(defaults.submit_backoff),
            sign_attempts: defaults.sign_attempts,
            trusted_keys: Vec::new(),
        }
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl SigningConfig {
    #[must_use]
    pub fn orchestrator(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            discovery_interval: Duration::from_millis(self.discovery_interval_ms),
            discovery_attempts: self.discovery_attempts,
            submit_attempts: self.submit_attempts,
            submit_backoff: Duration::from_millis(self.submit_backoff_ms),
            sign_attempts: self.sign_attempts,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoardConfig {
    pub base_url: Option<String>,
    pub token: Option<String>,
    /// Participant type read as the card's executor
    pub executor_role: u8,
    /// Serve cards from memory instead of the board API
    pub mock: bool,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            token: None,
            executor_role: 2,
            mock: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConverterKind {
    #[default]
    Passthrough,
    Soffice,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub converter: ConverterKind,
    /// Located on `PATH` or in the usual install folders when unset
    pub soffice_binary: Option<PathBuf>,
    pub soffice_timeout_secs: u64,
    pub stamp_text: String,
    pub date_format: String,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            converter: ConverterKind::Passthrough,
            soffice_binary: None,
            soffice_timeout_secs: 30,
            stamp_text: DEFAULT_STAMP_TEXT.to_string(),
            date_format: DEFAULT_DATE_FORMAT.to_string(),
        }
    }
}

/// What happens to numbers allocated for sessions that never commit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AbandonedNumbers {
    /// The number stays a permanent gap
    #[default]
    Gap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub abandoned_numbers: AbandonedNumbers,
    /// Reservations and staged artifacts older than this are released
    pub abandoned_after_hours: u64,
    /// Period of the background sweep; 0 turns it off
    pub sweep_interval_secs: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            abandoned_numbers: AbandonedNumbers::Gap,
            abandoned_after_hours: 24,
            sweep_interval_secs: 3600,
        }
    }
}

impl RetentionConfig {
    #[must_use]
    pub fn abandoned_after(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::try_from(self.abandoned_after_hours).unwrap_or(i64::MAX / 3600))
    }

    /// `None` when the sweep is off
    #[must_use]
    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_secs > 0).then(|| Duration::from_secs(self.sweep_interval_secs))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directive; `RUST_LOG` wins when set
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

impl ServiceConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// # Errors
    ///
    /// Returns an error if the TOML is invalid, including any
    /// `abandoned_numbers` policy other than `gap`.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Explicit path, else `outbox.toml` if present, else defaults; then
    /// environment overrides and validation.
    ///
    /// # Errors
    ///
    /// Read, parse or validation failures.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply `OUTBOX_*` overrides from `lookup`
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(bind) = lookup("OUTBOX_BIND") {
            self.server.bind = bind;
        }
        if let Some(dir) = lookup("OUTBOX_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(dir);
        }
        if let Some(level) = lookup("OUTBOX_LOG") {
            self.log.level = level;
        }
        if let Some(url) = lookup("OUTBOX_BOARD_URL") {
            self.board.base_url = Some(url);
        }
        if let Some(token) = lookup("OUTBOX_BOARD_TOKEN") {
            self.board.token = Some(token);
        }
    }

    /// # Errors
    ///
    /// `Validation` naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.bind.parse::<std::net::SocketAddr>().is_err() {
            return Err(ConfigError::Validation(format!(
                "server.bind is not a socket address: {}",
                self.server.bind
            )));
        }
        if self.signing.discovery_attempts == 0 || self.signing.submit_attempts == 0 {
            return Err(ConfigError::Validation(
                "signing attempt budgets must be at least 1".to_string(),
            ));
        }
        if self.numbering.default.start_number == 0
            || self.numbering.executors.values().any(|r| r.start_number == 0)
        {
            return Err(ConfigError::Validation(
                "numbering.start_number must be at least 1".to_string(),
            ));
        }
        if check_date_format(&self.render.date_format).is_err() {
            return Err(ConfigError::Validation(format!(
                "render.date_format is not a valid strftime pattern: {}",
                self.render.date_format
            )));
        }
        if self.retention.abandoned_after_hours == 0 {
            return Err(ConfigError::Validation(
                "retention.abandoned_after_hours must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = r#"
[server]
bind = "0.0.0.0:9000"
api_tokens = ["secret"]

[storage]
data_dir = "/var/lib/outbox"

[numbering.default]
executor_code = "00"
format = "{number}"

[numbering.executors.17]
executor_code = "10"
format = "{number}-{executor_code}"
start_number = 40

[signing]
discovery_attempts = 10

[[signing.trusted_keys]]
public_key = "00"
common_name = "Ivanov"

[board]
mock = true

[render]
converter = "soffice"
stamp_text = "SIGNED"

[retention]
abandoned_numbers = "gap"
abandoned_after_hours = 48
"#;

    #[test]
    fn parses_all_sections() {
        let config = ServiceConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(config.server.bind, "0.0.0.0:9000");
        assert_eq!(config.storage.ledger_path(), PathBuf::from("/var/lib/outbox/ledger.json"));
        assert_eq!(config.numbering.rule_for("17").format_number(42, 2024), "42-10");
        assert_eq!(config.numbering.rule_for("99").executor_code, "00");
        assert_eq!(config.signing.discovery_attempts, 10);
        assert_eq!(config.signing.submit_attempts, 3);
        assert_eq!(config.signing.trusted_keys.len(), 1);
        assert_eq!(config.render.converter, ConverterKind::Soffice);
        assert_eq!(config.render.date_format, "%d.%m.%Y");
        assert_eq!(config.board.executor_role, 2);
        assert_eq!(config.retention.abandoned_after(), chrono::Duration::hours(48));
        assert_eq!(config.retention.sweep_interval(), Some(Duration::from_secs(3600)));
        config.validate().unwrap();
    }

    #[test]
    fn only_gap_retention_is_accepted() {
        let err = ServiceConfig::from_toml("[retention]\nabandoned_numbers = \"reuse\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn environment_overrides_win() {
        let mut config = ServiceConfig::from_toml(SAMPLE).unwrap();
        config.apply_overrides(|key| match key {
            "OUTBOX_BIND" => Some("127.0.0.1:7000".to_string()),
            "OUTBOX_BOARD_TOKEN" => Some("tok".to_string()),
            _ => None,
        });
        assert_eq!(config.server.bind, "127.0.0.1:7000");
        assert_eq!(config.board.token.as_deref(), Some("tok"));
        assert_eq!(config.storage.data_dir, PathBuf::from("/var/lib/outbox"));
    }

    #[test]
    fn rejects_bad_bind_and_zero_start() {
        let mut config = ServiceConfig::default();
        config.validate().unwrap();
        config.numbering.default.start_number = 0;
        assert!(config.validate().unwrap_err().to_string().contains("start_number"));
        config.numbering.default.start_number = 1;
        config.server.bind = "localhost".to_string();
        assert!(config.validate().unwrap_err().to_string().contains("server.bind"));
    }

    #[test]
    fn rejects_unrenderable_date_format() {
        let mut config = ServiceConfig::default();
        config.render.date_format = "%d.%m.%Q".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("render.date_format"));

        config.render.date_format = "%Y-%m-%d".to_string();
        config.validate().unwrap();
        config.render.date_format = "%".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_abandon_window_is_rejected() {
        let mut config = ServiceConfig::default();
        config.retention.abandoned_after_hours = 0;
        assert!(config.validate().unwrap_err().to_string().contains("abandoned_after_hours"));
        config.retention.abandoned_after_hours = 1;
        config.retention.sweep_interval_secs = 0;
        config.validate().unwrap();
        assert_eq!(config.retention.sweep_interval(), None);
    }

    #[test]
    fn orchestrator_config_from_signing_section() {
        let signing = SigningConfig {
            discovery_interval_ms: 250,
            ..SigningConfig::default()
        };
        let orchestrator = signing.orchestrator();
        assert_eq!(orchestrator.discovery_interval, Duration::from_millis(250));
        assert_eq!(orchestrator.discovery_attempts, 30);
    }
}
