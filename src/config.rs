//! Configuration loader and validator for the STIX→Notion service.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::model::ObjectKind;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub server: Server,
    pub notion: Notion,
    pub cookies: Cookies,
    #[serde(default)]
    pub store: Store,
    pub stix: Stix,
    #[serde(default)]
    pub import: Import,
    #[serde(default)]
    pub http: Http,
}

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Server {
    pub host: String,
    pub port: u16,
    /// Where the browser lands after a successful OAuth callback.
    pub post_connect_redirect: String,
}

impl Default for Server {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
            post_connect_redirect: "/".into(),
        }
    }
}

/// Notion OAuth integration and API settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Notion {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    #[serde(default = "default_notion_version")]
    pub version: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Used when the token response carries no duplicated template page.
    #[serde(default)]
    pub default_parent_page_id: Option<String>,
}

fn default_notion_version() -> String {
    "2022-06-28".into()
}

fn default_api_base() -> String {
    "https://api.notion.com/".into()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Cookies {
    pub secret: String,
    #[serde(default = "default_true")]
    pub secure: bool,
    #[serde(default = "default_cookie_max_age")]
    pub max_age_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_cookie_max_age() -> u64 {
    60 * 60 * 24 * 30
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Sqlite,
    Memory,
}

/// Key-value store and task queue location.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Store {
    pub backend: StoreBackend,
    pub path: String,
    pub compaction_interval_secs: u64,
}

impl Default for Store {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Sqlite,
            path: "./data/notion-stix.db".into(),
            compaction_interval_secs: 15 * 60,
        }
    }
}

impl Store {
    pub fn database_url(&self) -> String {
        format!("sqlite://{}?mode=rwc", self.path)
    }

    pub fn compaction_interval(&self) -> Duration {
        Duration::from_secs(self.compaction_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Stix {
    pub bundle_path: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ImportMode {
    #[default]
    Inline,
    Queued,
}

/// Import orchestration knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Import {
    pub mode: ImportMode,
    pub kinds: Vec<ObjectKind>,
    pub rate_per_second: u32,
    pub burst: u32,
    pub max_objects_per_run: Option<usize>,
    pub log_every: usize,
    pub worker_concurrency: usize,
    pub worker_poll_interval_ms: u64,
    pub events_idle_timeout_secs: u64,
}

impl Default for Import {
    fn default() -> Self {
        Self {
            mode: ImportMode::Inline,
            kinds: ObjectKind::DEFAULT_RUN.to_vec(),
            rate_per_second: 3,
            burst: 3,
            max_objects_per_run: None,
            log_every: 10,
            worker_concurrency: 10,
            worker_poll_interval_ms: 500,
            events_idle_timeout_secs: 300,
        }
    }
}

/// Outbound HTTP retry policy for transport errors.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Http {
    pub retry_max: u32,
    pub retry_wait_min_ms: u64,
    pub retry_wait_max_ms: u64,
    pub timeout_secs: u64,
}

impl Default for Http {
    fn default() -> Self {
        Self {
            retry_max: 3,
            retry_wait_min_ms: 500,
            retry_wait_max_ms: 2_000,
            timeout_secs: 30,
        }
    }
}

impl Config {
    /// Ensure the directory holding the store file exists.
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.store.backend == StoreBackend::Memory {
            return Ok(());
        }
        match Path::new(&self.store.path).parent() {
            Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
            _ => Ok(()),
        }
    }

    /// Override file values with the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(v) = lookup("NOTION_OAUTH_CLIENT_ID") {
            self.notion.client_id = v;
        }
        if let Some(v) = lookup("NOTION_OAUTH_CLIENT_SECRET") {
            self.notion.client_secret = v;
        }
        if let Some(v) = lookup("NOTION_REDIRECT_URI") {
            self.notion.redirect_uri = v;
        }
        if let Some(v) = lookup("COOKIE_SECRET") {
            self.cookies.secret = v;
        }
        if let Some(port) = lookup("PORT") {
            self.server.port = port
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid("PORT must be a port number"))?;
        }
        if let Some(v) = lookup("DB") {
            self.store.path = v;
        }
        if let Some(v) = lookup("STIX_BUNDLE") {
            self.stix.bundle_path = v;
        }
        Ok(())
    }
}

/// Load configuration from a YAML file, apply environment overrides and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let mut cfg: Config = serde_yaml::from_str(&content)?;
    cfg.apply_env()?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.notion.client_id.trim().is_empty() {
        return Err(ConfigError::Invalid("notion.client_id must be non-empty"));
    }
    if cfg.notion.client_secret.trim().is_empty() {
        return Err(ConfigError::Invalid("notion.client_secret must be non-empty"));
    }
    if cfg.notion.redirect_uri.trim().is_empty() {
        return Err(ConfigError::Invalid("notion.redirect_uri must be non-empty"));
    }
    if cfg.notion.version.trim().is_empty() {
        return Err(ConfigError::Invalid("notion.version must be non-empty"));
    }
    if reqwest::Url::parse(&cfg.notion.api_base).is_err() {
        return Err(ConfigError::Invalid("notion.api_base must be a valid URL"));
    }
    if cfg.cookies.secret.trim().is_empty() {
        return Err(ConfigError::Invalid("cookies.secret must be non-empty"));
    }
    if cfg.stix.bundle_path.trim().is_empty() {
        return Err(ConfigError::Invalid("stix.bundle_path must be non-empty"));
    }
    if cfg.store.backend == StoreBackend::Sqlite && cfg.store.path.trim().is_empty() {
        return Err(ConfigError::Invalid("store.path must be non-empty"));
    }
    if cfg.store.compaction_interval_secs == 0 {
        return Err(ConfigError::Invalid(
            "store.compaction_interval_secs must be > 0",
        ));
    }
    if cfg.import.mode == ImportMode::Queued && cfg.store.backend == StoreBackend::Memory {
        return Err(ConfigError::Invalid(
            "import.mode queued requires store.backend sqlite",
        ));
    }
    if cfg.import.kinds.is_empty() {
        return Err(ConfigError::Invalid("import.kinds must list at least one kind"));
    }
    if cfg.import.rate_per_second == 0 {
        return Err(ConfigError::Invalid("import.rate_per_second must be > 0"));
    }
    if cfg.import.burst == 0 {
        return Err(ConfigError::Invalid("import.burst must be > 0"));
    }
    if cfg.import.log_every == 0 {
        return Err(ConfigError::Invalid("import.log_every must be > 0"));
    }
    if cfg.import.worker_concurrency == 0 {
        return Err(ConfigError::Invalid("import.worker_concurrency must be > 0"));
    }
    if cfg.import.worker_poll_interval_ms == 0 {
        return Err(ConfigError::Invalid(
            "import.worker_poll_interval_ms must be > 0",
        ));
    }
    if cfg.import.events_idle_timeout_secs == 0 {
        return Err(ConfigError::Invalid(
            "import.events_idle_timeout_secs must be > 0",
        ));
    }
    if cfg.http.retry_wait_max_ms < cfg.http.retry_wait_min_ms {
        return Err(ConfigError::Invalid(
            "http.retry_wait_max_ms must be >= http.retry_wait_min_ms",
        ));
    }
    Ok(())
}

/// Returns a complete example YAML file.
pub fn example() -> &'static str {
    r#"server:
  host: "0.0.0.0"
  port: 8080
  post_connect_redirect: "/"

notion:
  client_id: "YOUR_NOTION_OAUTH_CLIENT_ID"
  client_secret: "YOUR_NOTION_OAUTH_CLIENT_SECRET"
  redirect_uri: "http://localhost:8080/auth/notion/callback"
  version: "2022-06-28"

cookies:
  secret: "change-me-to-a-long-random-string"
  secure: false

store:
  backend: sqlite
  path: "./data/notion-stix.db"
  compaction_interval_secs: 900

stix:
  bundle_path: "./data/enterprise-attack-sample.json"

import:
  mode: inline
  kinds:
    - attack-pattern
    - campaign
    - group
    - malware
  rate_per_second: 3
  burst: 3
  log_every: 10
  worker_concurrency: 10

http:
  retry_max: 3
  retry_wait_min_ms: 500
  retry_wait_max_ms: 2000
"#
}
