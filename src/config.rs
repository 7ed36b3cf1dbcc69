use axum::http::HeaderName;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use crate::merge::TiePolicy;
use crate::server::auth::{DEFAULT_PSK_HEADER, DEFAULT_SHARE_SALT, DEFAULT_SYNC_SALT};
use crate::server::routes::RESERVED_PATHS;
use crate::server::AuthScheme;
use crate::store::{FileStore, KvStore, MemoryStore};

/// Which store adapter backs the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    #[default]
    File,
}

impl StoreBackend {
    /// Parse from string name.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "memory" => Some(StoreBackend::Memory),
            "file" => Some(StoreBackend::File),
            _ => None,
        }
    }
}

/// Server configuration
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Port to listen on
    pub port: u16,
    /// Directory for the file store
    pub data_dir: PathBuf,
    /// Store backend
    pub store: StoreBackend,
    /// Shared secret. Unset means every authenticated route answers 503.
    pub secret: Option<String>,
    /// Credential scheme for write routes
    pub auth_scheme: AuthScheme,
    /// Header carrying the raw secret under the plain scheme
    pub psk_header: String,
    /// Salt for sync-write tokens
    pub sync_salt: String,
    /// Salt for share-read tokens
    pub share_salt: String,
    /// Winner on equal timestamps
    pub tie_policy: TiePolicy,
    /// Named resources: route name -> store key
    pub resources: BTreeMap<String, String>,
    /// Store key served by the share export
    pub share_key: String,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("port", &self.port)
            .field("data_dir", &self.data_dir)
            .field("store", &self.store)
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .field("auth_scheme", &self.auth_scheme)
            .field("psk_header", &self.psk_header)
            .field("tie_policy", &self.tie_policy)
            .field("resources", &self.resources)
            .field("share_key", &self.share_key)
            .finish_non_exhaustive()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("kvsync");

        let mut resources = BTreeMap::new();
        resources.insert("rules".to_string(), "kvsync-rules".to_string());
        resources.insert("setting".to_string(), "kvsync-setting".to_string());

        Self {
            port: 8080,
            data_dir,
            store: StoreBackend::default(),
            secret: None,
            auth_scheme: AuthScheme::default(),
            psk_header: DEFAULT_PSK_HEADER.to_string(),
            sync_salt: DEFAULT_SYNC_SALT.to_string(),
            share_salt: DEFAULT_SHARE_SALT.to_string(),
            tie_policy: TiePolicy::default(),
            resources,
            share_key: "kvsync-rules-share".to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration with priority: env vars > config file > defaults
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let path = config_path.unwrap_or_else(Self::default_config_path);
        let mut config = Self::from_file(path)?;
        config.apply_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Reads a YAML config file, falling back to defaults if it doesn't exist.
    pub fn from_file(path: PathBuf) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents =
            std::fs::read_to_string(&path).map_err(|e| ConfigError::Read(path.clone(), e))?;
        let mut config: Self =
            serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse(path, e))?;
        config.secret = config.secret.filter(|s| !s.is_empty());
        Ok(config)
    }

    /// Applies `KVSYNC_*` overrides using `lookup` to read variables.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("KVSYNC_PORT") {
            self.port = port
                .parse()
                .map_err(|_| ConfigError::invalid_env("KVSYNC_PORT", &port))?;
        }
        if let Some(dir) = lookup("KVSYNC_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(secret) = lookup("KVSYNC_SECRET") {
            self.secret = Some(secret).filter(|s| !s.is_empty());
        }
        if let Some(store) = lookup("KVSYNC_STORE") {
            self.store = StoreBackend::parse(&store)
                .ok_or_else(|| ConfigError::invalid_env("KVSYNC_STORE", &store))?;
        }
        if let Some(scheme) = lookup("KVSYNC_AUTH_SCHEME") {
            self.auth_scheme = AuthScheme::parse(&scheme)
                .ok_or_else(|| ConfigError::invalid_env("KVSYNC_AUTH_SCHEME", &scheme))?;
        }
        if let Some(policy) = lookup("KVSYNC_TIE_POLICY") {
            self.tie_policy = TiePolicy::parse(&policy)
                .ok_or_else(|| ConfigError::invalid_env("KVSYNC_TIE_POLICY", &policy))?;
        }
        Ok(())
    }

    /// Checks the route table and header name.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.psk_header_name()?;

        if self.share_key.is_empty() {
            return Err(ConfigError::InvalidResource(
                "share_key must not be empty".to_string(),
            ));
        }

        for (name, key) in &self.resources {
            let valid_name = !name.is_empty()
                && name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
            if !valid_name {
                return Err(ConfigError::InvalidResource(format!(
                    "resource name '{}' must be a single path segment",
                    name
                )));
            }
            if RESERVED_PATHS.contains(&name.as_str()) {
                return Err(ConfigError::InvalidResource(format!(
                    "resource name '{}' is reserved",
                    name
                )));
            }
            if key.is_empty() {
                return Err(ConfigError::InvalidResource(format!(
                    "resource '{}' has an empty store key",
                    name
                )));
            }
        }

        Ok(())
    }

    /// The plain-scheme header as an HTTP header name.
    pub fn psk_header_name(&self) -> Result<HeaderName, ConfigError> {
        HeaderName::from_bytes(self.psk_header.as_bytes())
            .map_err(|_| ConfigError::InvalidHeader(self.psk_header.clone()))
    }

    /// Instantiates the configured store adapter.
    pub fn build_store(&self) -> Arc<dyn KvStore> {
        match self.store {
            StoreBackend::Memory => Arc::new(MemoryStore::new()),
            StoreBackend::File => Arc::new(FileStore::new(self.data_dir.clone())),
        }
    }

    /// Default config file path: `$KVSYNC_CONFIG`, else ~/.config/kvsync/config.yaml
    pub fn default_config_path() -> PathBuf {
        std::env::var("KVSYNC_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::config_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("kvsync")
                    .join("config.yaml")
            })
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {}", .0.display(), .1)]
    Read(PathBuf, #[source] std::io::Error),
    #[error("Failed to parse config file '{}': {}", .0.display(), .1)]
    Parse(PathBuf, #[source] serde_yaml::Error),
    #[error("Invalid value for {var}: '{value}'")]
    InvalidEnv { var: &'static str, value: String },
    #[error("Invalid header name: '{0}'")]
    InvalidHeader(String),
    #[error("Invalid resource table: {0}")]
    InvalidResource(String),
}

impl ConfigError {
    fn invalid_env(var: &'static str, value: &str) -> Self {
        ConfigError::InvalidEnv {
            var,
            value: value.to_string(),
        }
    }
}
