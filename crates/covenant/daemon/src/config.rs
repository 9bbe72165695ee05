//! Configuration for covenantd
//!
//! Sources are layered: built-in defaults, then an optional TOML file, then
//! `COVENANT_*` environment variables (`__` separates nested keys, e.g.
//! `COVENANT_POLICY__VERSION=2.0`). CLI flags are applied last by the binary.

use crate::error::{DaemonError, DaemonResult};
use covenant_gate::{ExecutionMode, GatePolicy, NoticeTexts, DEFAULT_CALL_TIMEOUT};
use covenant_ledger::SheetsOptions;
use covenant_types::{MemberId, PolicyVersion, RestorationScope, SpaceId};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Environment prefix for configuration overrides
pub const ENV_PREFIX: &str = "COVENANT";

/// Main daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Policy being enforced
    #[serde(default)]
    pub policy: PolicyConfig,

    /// Ledger backend
    #[serde(default)]
    pub storage: StorageConfig,

    /// Chat platform access
    #[serde(default)]
    pub platform: PlatformConfig,

    /// Live or rehearsal
    #[serde(default)]
    pub mode: ExecutionMode,

    /// Reconciliation schedule
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Current policy version members must acknowledge
    #[serde(default = "default_version")]
    pub version: String,

    /// Link to the policy document
    #[serde(default)]
    pub link: Option<String>,

    /// Capabilities handed back on acknowledgement
    #[serde(default)]
    pub restoration: RestorationScope,

    /// Members never restricted (administrators)
    #[serde(default, deserialize_with = "id_list")]
    pub exempt: Vec<i64>,

    /// Spaces under enforcement; empty means every group space
    #[serde(default, deserialize_with = "id_list")]
    pub enforced_spaces: Vec<i64>,

    #[serde(default)]
    pub texts: NoticeTexts,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            link: None,
            restoration: RestorationScope::default(),
            exempt: Vec::new(),
            enforced_spaces: Vec::new(),
            texts: NoticeTexts::default(),
        }
    }
}

impl PolicyConfig {
    /// Build the engine policy, validating the version
    pub fn to_policy(&self) -> DaemonResult<GatePolicy> {
        let version = PolicyVersion::new(self.version.clone())
            .map_err(|e| DaemonError::Config(format!("Invalid policy version: {}", e)))?;

        let mut policy = GatePolicy::new(version)
            .with_restoration(self.restoration)
            .with_exempt(self.exempt.iter().copied().map(MemberId::new))
            .with_enforced_spaces(self.enforced_spaces.iter().copied().map(SpaceId::new))
            .with_texts(self.texts.clone());
        if let Some(link) = &self.link {
            policy = policy.with_link(link.clone());
        }
        Ok(policy)
    }
}

/// Storage configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory ledger (development and rehearsal only)
    #[default]
    Memory,

    /// SQLite database file
    Sqlite {
        /// Connection URL, e.g. `sqlite://covenant.db`
        #[serde(default = "default_sqlite_url")]
        url: String,

        /// Maximum connections in pool
        #[serde(default = "default_pool_size")]
        max_connections: u32,

        /// Connection timeout in seconds
        #[serde(default = "default_connection_timeout")]
        connect_timeout_secs: u64,
    },

    /// Google Sheets worksheet
    Sheets {
        spreadsheet_id: String,

        /// OAuth bearer token with spreadsheet scope
        access_token: String,

        #[serde(default = "default_worksheet")]
        worksheet: String,

        #[serde(default = "default_sheets_api")]
        api_base: String,
    },
}

impl StorageConfig {
    pub fn sheets_options(&self) -> Option<SheetsOptions> {
        match self {
            StorageConfig::Sheets {
                spreadsheet_id,
                access_token,
                worksheet,
                api_base,
            } => Some(
                SheetsOptions::new(spreadsheet_id.clone(), access_token.clone())
                    .with_worksheet(worksheet.clone())
                    .with_api_base(api_base.clone()),
            ),
            _ => None,
        }
    }
}

/// Chat platform configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    /// Bot API root
    #[serde(default = "default_telegram_api")]
    pub api_base: String,

    /// Bot token; may stay empty only for offline rehearsal
    #[serde(default)]
    pub bot_token: String,

    /// Upper bound for any single platform call, in milliseconds
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
}

impl PlatformConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn has_token(&self) -> bool {
        !self.bot_token.trim().is_empty()
    }
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            api_base: default_telegram_api(),
            bot_token: String::new(),
            call_timeout_ms: default_call_timeout_ms(),
        }
    }
}

impl std::fmt::Debug for PlatformConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlatformConfig")
            .field("api_base", &self.api_base)
            .field("bot_token", &if self.has_token() { "<set>" } else { "<empty>" })
            .field("call_timeout_ms", &self.call_timeout_ms)
            .finish()
    }
}

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Run a sweep as soon as `watch` starts
    #[serde(default = "default_true")]
    pub sweep_on_start: bool,

    /// Reconciliation interval in seconds
    #[serde(default = "default_sweep_interval")]
    pub interval_secs: u64,
}

impl SchedulerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sweep_on_start: true,
            interval_secs: default_sweep_interval(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or filter directive
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Accept `[1, 2]` from files and `"1,2"` from the environment
fn id_list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<i64>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum IdList {
        List(Vec<i64>),
        Text(String),
    }

    match IdList::deserialize(deserializer)? {
        IdList::List(ids) => Ok(ids),
        IdList::Text(text) => text
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| s.parse::<i64>().map_err(serde::de::Error::custom))
            .collect(),
    }
}

// Default value helpers
fn default_true() -> bool {
    true
}

fn default_version() -> String {
    "1.0".to_string()
}

fn default_sqlite_url() -> String {
    "sqlite://coc_agreements.db".to_string()
}

fn default_pool_size() -> u32 {
    4
}

fn default_connection_timeout() -> u64 {
    5
}

fn default_worksheet() -> String {
    "Agreements".to_string()
}

fn default_sheets_api() -> String {
    "https://sheets.googleapis.com".to_string()
}

fn default_telegram_api() -> String {
    "https://api.telegram.org".to_string()
}

fn default_call_timeout_ms() -> u64 {
    DEFAULT_CALL_TIMEOUT.as_millis() as u64
}

fn default_sweep_interval() -> u64 {
    3600
}

fn default_log_level() -> String {
    "info".to_string()
}

impl DaemonConfig {
    /// Load configuration from defaults, an optional file and the process
    /// environment
    pub fn load(path: Option<&str>) -> DaemonResult<Self> {
        Self::load_with(path, None)
    }

    /// Like `load`, reading variables from `env` instead of the process
    /// environment when given
    pub fn load_with(path: Option<&str>, env: Option<HashMap<String, String>>) -> DaemonResult<Self> {
        let mut builder = config::Config::builder();

        // Add default configuration
        builder = builder.add_source(config::Config::try_from(&DaemonConfig::default())?);

        // Add file configuration if provided
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(true));
        }

        // Add environment variables with COVENANT_ prefix
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .source(env),
        );

        let config: DaemonConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings no component could run with
    pub fn validate(&self) -> DaemonResult<()> {
        self.policy.to_policy()?;

        if self.platform.call_timeout_ms == 0 {
            return Err(DaemonError::Config(
                "platform.call_timeout_ms must be positive".to_string(),
            ));
        }

        if let StorageConfig::Sheets {
            spreadsheet_id,
            access_token,
            ..
        } = &self.storage
        {
            if spreadsheet_id.trim().is_empty() || access_token.trim().is_empty() {
                return Err(DaemonError::Config(
                    "sheets storage needs spreadsheet_id and access_token".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> Option<HashMap<String, String>> {
        Some(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_default_config() {
        let config = DaemonConfig::default();
        assert_eq!(config.policy.version, "1.0");
        assert!(matches!(config.storage, StorageConfig::Memory));
        assert_eq!(config.mode, ExecutionMode::Live);
        assert_eq!(config.platform.call_timeout(), Duration::from_secs(5));
        assert!(config.scheduler.sweep_on_start);
    }

    #[test]
    fn test_defaults_survive_layering() {
        let config = DaemonConfig::load_with(None, env(&[])).unwrap();
        assert_eq!(config.policy.restoration, RestorationScope::Participation);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_file_then_environment() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
mode = "rehearsal"

[policy]
version = "1.1"
link = "https://example.org/coc"
restoration = "full"
exempt = [42]

[storage]
type = "sqlite"
url = "sqlite://agreements.db"

[scheduler]
interval_secs = 60
"#
        )
        .unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let config = DaemonConfig::load_with(
            Some(&path),
            env(&[
                ("COVENANT_POLICY__VERSION", "2.0"),
                ("COVENANT_POLICY__ENFORCED_SPACES", "-1001,-1002"),
            ]),
        )
        .unwrap();

        assert_eq!(config.mode, ExecutionMode::Rehearsal);
        assert_eq!(config.policy.version, "2.0");
        assert_eq!(config.policy.exempt, vec![42]);
        assert_eq!(config.policy.enforced_spaces, vec![-1001, -1002]);
        assert_eq!(config.scheduler.interval(), Duration::from_secs(60));
        match &config.storage {
            StorageConfig::Sqlite { url, max_connections, .. } => {
                assert_eq!(url, "sqlite://agreements.db");
                assert_eq!(*max_connections, 4);
            }
            other => panic!("unexpected storage {:?}", other),
        }

        let policy = config.policy.to_policy().unwrap();
        assert!(policy.is_exempt(MemberId::new(42)));
        assert!(policy.enforces(SpaceId::new(-1002)));
        assert!(!policy.enforces(SpaceId::new(-3)));
        assert_eq!(policy.link(), Some("https://example.org/coc"));
    }

    #[test]
    fn test_sentinel_version_rejected() {
        let result = DaemonConfig::load_with(None, env(&[("COVENANT_POLICY__VERSION", "discovered")]));
        assert!(matches!(result, Err(DaemonError::Config(_))));
    }

    #[test]
    fn test_sheets_storage_needs_credentials() {
        let config = DaemonConfig {
            storage: StorageConfig::Sheets {
                spreadsheet_id: "sheet".to_string(),
                access_token: " ".to_string(),
                worksheet: default_worksheet(),
                api_base: default_sheets_api(),
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bot_token_redacted() {
        let platform = PlatformConfig {
            bot_token: "123:secret".to_string(),
            ..Default::default()
        };
        let printed = format!("{:?}", platform);
        assert!(!printed.contains("secret"));
        assert!(printed.contains("<set>"));
    }
}
