//! HostPilot Configuration
//!
//! Loads the control plane configuration from an optional TOML file, applies
//! `HP_*` environment overrides, then validates the result.
//!
//! ```toml
//! [http]
//! api_port = 8080
//!
//! [domains]
//! suffix = "hostpilot.app"
//!
//! [[domains.default_services]]
//! name = "frontend"
//! port = 3000
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// Default config file looked up when `HP_CONFIG` is not set
pub const DEFAULT_CONFIG_FILE: &str = "hostpilot.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {key}: {value}")]
    InvalidOverride { key: String, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Root configuration for the control plane
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlPlaneConfig {
    pub http: HttpConfig,
    pub dispatch: DispatchConfig,
    pub domains: DomainConfig,
    pub deploy: DeployConfig,
    pub polling: PollingConfig,
    pub hosting: HostingConfig,
    pub keystore: KeyStoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub api_port: u16,
    pub metrics_port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            api_port: 8080,
            metrics_port: 9090,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Cap on pre-commit fixed-point passes per unit of work
    pub max_passes: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self { max_passes: 10 }
    }
}

/// A service every new project starts with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultService {
    pub name: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DomainConfig {
    /// Suffix all internal domains are issued under
    pub suffix: String,
    /// Service whose domain becomes the project's primary domain
    pub primary_service: String,
    /// Service exposed under the `api.` prefix
    pub secondary_service: String,
    pub default_services: Vec<DefaultService>,
}

impl Default for DomainConfig {
    fn default() -> Self {
        Self {
            suffix: "hostpilot.app".to_string(),
            primary_service: "frontend".to_string(),
            secondary_service: "backend".to_string(),
            default_services: vec![
                DefaultService { name: "frontend".to_string(), port: 3000 },
                DefaultService { name: "backend".to_string(), port: 8000 },
            ],
        }
    }
}

/// How post-commit deploy dispatch is executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// Spawn the deploy call on the runtime and return immediately
    Background,
    /// Run the deploy call inside the post-commit phase
    Inline,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    pub timeout_secs: u64,
    pub mode: DispatchMode,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 600,
            mode: DispatchMode::Background,
        }
    }
}

impl DeployConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub usage_interval_secs: u64,
    pub sweep_interval_secs: u64,
    /// A deployment still `Deploying` after this long is failed by the sweeper
    pub deploying_timeout_secs: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            usage_interval_secs: 60,
            sweep_interval_secs: 60,
            deploying_timeout_secs: 900,
        }
    }
}

impl PollingConfig {
    pub fn usage_interval(&self) -> Duration {
        Duration::from_secs(self.usage_interval_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn deploying_timeout(&self) -> Duration {
        Duration::from_secs(self.deploying_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostingConfig {
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    /// Base address for newly provisioned servers; `{server_id}` and
    /// `{location}` are substituted
    pub server_address_template: String,
    pub default_location: String,
}

impl Default for HostingConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 5,
            request_timeout_secs: 30,
            server_address_template: "https://{server_id}.{location}.nodes.hostpilot.app".to_string(),
            default_location: "eu-central".to_string(),
        }
    }
}

impl HostingConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn server_address(&self, server_id: &str, location: &str) -> String {
        self.server_address_template
            .replace("{server_id}", server_id)
            .replace("{location}", location)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyStoreConfig {
    /// `memory` or `encrypted`
    pub provider: String,
    pub data_dir: String,
    /// Base64 AES-256 key; prefer `HP_KEYSTORE_KEY` over the file
    pub encryption_key: Option<String>,
}

impl Default for KeyStoreConfig {
    fn default() -> Self {
        Self {
            provider: "memory".to_string(),
            data_dir: "./data/keys".to_string(),
            encryption_key: None,
        }
    }
}

impl ControlPlaneConfig {
    /// Load from `path` (or `HP_CONFIG`, or `hostpilot.toml` if present),
    /// apply environment overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let explicit = path
            .map(|p| p.to_path_buf())
            .or_else(|| std::env::var("HP_CONFIG").ok().map(Into::into));

        let mut config = match explicit {
            Some(path) => Self::from_file(&path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => {
                info!("No config file found, using defaults");
                Self::default()
            }
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        info!("Loaded configuration from {}", path.display());
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Apply `HP_*` overrides read through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("HP_API_PORT") {
            self.http.api_port = parse_override("HP_API_PORT", &v)?;
        }
        if let Some(v) = lookup("HP_METRICS_PORT") {
            self.http.metrics_port = parse_override("HP_METRICS_PORT", &v)?;
        }
        if let Some(v) = lookup("HP_DOMAIN_SUFFIX") {
            self.domains.suffix = v;
        }
        if let Some(v) = lookup("HP_KEYSTORE_PROVIDER") {
            self.keystore.provider = v;
        }
        if let Some(v) = lookup("HP_KEYSTORE_DIR") {
            self.keystore.data_dir = v;
        }
        if let Some(v) = lookup("HP_KEYSTORE_KEY") {
            self.keystore.encryption_key = Some(v);
        }
        if let Some(v) = lookup("HP_DEPLOY_TIMEOUT_SECS") {
            self.deploy.timeout_secs = parse_override("HP_DEPLOY_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("HP_USAGE_POLL_SECS") {
            self.polling.usage_interval_secs = parse_override("HP_USAGE_POLL_SECS", &v)?;
        }
        debug!("Environment overrides applied");
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.dispatch.max_passes == 0 {
            return Err(ConfigError::Invalid("dispatch.max_passes must be at least 1".to_string()));
        }
        if self.polling.usage_interval_secs == 0 || self.polling.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid("polling intervals must be non-zero".to_string()));
        }
        if self.deploy.timeout_secs == 0 {
            return Err(ConfigError::Invalid("deploy.timeout_secs must be non-zero".to_string()));
        }
        if !self.hosting.server_address_template.contains("{server_id}") {
            return Err(ConfigError::Invalid(
                "hosting.server_address_template must contain {server_id}".to_string(),
            ));
        }
        if self.domains.suffix.trim().is_empty() {
            return Err(ConfigError::Invalid("domains.suffix must not be empty".to_string()));
        }
        Ok(())
    }
}

fn parse_override<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| ConfigError::InvalidOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = ControlPlaneConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.dispatch.max_passes, 10);
        assert_eq!(config.polling.usage_interval(), Duration::from_secs(60));
        assert_eq!(config.domains.default_services.len(), 2);
        assert_eq!(config.deploy.mode, DispatchMode::Background);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = ControlPlaneConfig::from_toml_str(
            r#"
            [domains]
            suffix = "apps.example.dev"

            [deploy]
            mode = "inline"
            "#,
        )
        .unwrap();

        assert_eq!(config.domains.suffix, "apps.example.dev");
        assert_eq!(config.domains.primary_service, "frontend");
        assert_eq!(config.deploy.mode, DispatchMode::Inline);
        assert_eq!(config.http.api_port, 8080);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[http]\napi_port = 9999\n[dispatch]\nmax_passes = 4").unwrap();

        let config = ControlPlaneConfig::from_file(file.path()).unwrap();
        assert_eq!(config.http.api_port, 9999);
        assert_eq!(config.dispatch.max_passes, 4);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = ControlPlaneConfig::from_file(Path::new("/nonexistent/hostpilot.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("HP_API_PORT", "7000"),
            ("HP_DOMAIN_SUFFIX", "preview.example.com"),
            ("HP_KEYSTORE_KEY", "c2VjcmV0"),
        ]);
        let mut config = ControlPlaneConfig::default();
        config
            .apply_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.http.api_port, 7000);
        assert_eq!(config.domains.suffix, "preview.example.com");
        assert_eq!(config.keystore.encryption_key.as_deref(), Some("c2VjcmV0"));
    }

    #[test]
    fn test_bad_override_rejected() {
        let mut config = ControlPlaneConfig::default();
        let err = config
            .apply_overrides(|k| (k == "HP_API_PORT").then(|| "not-a-port".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidOverride { .. }));
    }

    #[test]
    fn test_validation_rejects_zero_passes() {
        let mut config = ControlPlaneConfig::default();
        config.dispatch.max_passes = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_server_address_template() {
        let hosting = HostingConfig::default();
        assert_eq!(
            hosting.server_address("srv-1", "us-east"),
            "https://srv-1.us-east.nodes.hostpilot.app"
        );
    }
}
