//! Alias management
//!
//! Aliases are named references to S3-compatible endpoints. They live in
//! the `[[aliases]]` table of the config file and are the first segment of
//! every cloud location (`alias/bucket/prefix`).

use serde::{Deserialize, Serialize};

use crate::config::ConfigManager;
use crate::error::{Error, Result};

/// Retry policy applied by the transfer primitive for one alias
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 10000,
        }
    }
}

/// A named storage endpoint with credentials
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alias {
    pub name: String,
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,

    #[serde(default = "default_region")]
    pub region: String,

    /// Bucket addressing style: auto, path or dns
    #[serde(default = "default_bucket_lookup")]
    pub bucket_lookup: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryConfig>,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_bucket_lookup() -> String {
    "auto".to_string()
}

impl Alias {
    /// Create an alias with default region and bucket lookup
    pub fn new(
        name: impl Into<String>,
        endpoint: impl Into<String>,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            region: default_region(),
            bucket_lookup: default_bucket_lookup(),
            retry: None,
        }
    }

    /// Retry policy for this alias, falling back to the default one
    pub fn retry_config(&self) -> RetryConfig {
        self.retry.unwrap_or_default()
    }

    /// Validate name, endpoint URL and lookup style
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::Config("Alias name cannot be empty".into()));
        }
        if self.name.contains('/') {
            return Err(Error::Config(format!(
                "Alias name '{}' must not contain '/'",
                self.name
            )));
        }

        let url = url::Url::parse(&self.endpoint)
            .map_err(|e| Error::Config(format!("Invalid endpoint '{}': {e}", self.endpoint)))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(Error::Config(format!(
                "Endpoint must use http or https: {}",
                self.endpoint
            )));
        }

        match self.bucket_lookup.as_str() {
            "auto" | "path" | "dns" => Ok(()),
            other => Err(Error::Config(format!(
                "Bucket lookup must be 'auto', 'path', or 'dns', got '{other}'"
            ))),
        }
    }
}

/// Reads and writes aliases through the config file
pub struct AliasManager {
    config_manager: ConfigManager,
}

impl AliasManager {
    /// Create a manager backed by the default config location
    pub fn new() -> Result<Self> {
        Ok(Self {
            config_manager: ConfigManager::new()?,
        })
    }

    pub fn with_config_manager(config_manager: ConfigManager) -> Self {
        Self { config_manager }
    }

    /// Add or replace an alias
    pub fn set(&self, alias: Alias) -> Result<()> {
        alias.validate()?;

        let mut config = self.config_manager.load()?;
        config.aliases.retain(|a| a.name != alias.name);
        config.aliases.push(alias);
        config.aliases.sort_by(|a, b| a.name.cmp(&b.name));
        self.config_manager.save(&config)
    }

    pub fn get(&self, name: &str) -> Result<Alias> {
        let config = self.config_manager.load()?;
        config
            .aliases
            .into_iter()
            .find(|a| a.name == name)
            .ok_or_else(|| Error::AliasNotFound(name.to_string()))
    }

    /// All aliases, sorted by name
    pub fn list(&self) -> Result<Vec<Alias>> {
        let mut aliases = self.config_manager.load()?.aliases;
        aliases.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(aliases)
    }

    pub fn remove(&self, name: &str) -> Result<()> {
        let mut config = self.config_manager.load()?;
        let before = config.aliases.len();
        config.aliases.retain(|a| a.name != name);
        if config.aliases.len() == before {
            return Err(Error::AliasNotFound(name.to_string()));
        }
        self.config_manager.save(&config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manager(dir: &TempDir) -> AliasManager {
        AliasManager::with_config_manager(ConfigManager::with_path(
            dir.path().join("config.toml"),
        ))
    }

    #[test]
    fn test_alias_defaults() {
        let alias = Alias::new("local", "http://localhost:9000", "ak", "sk");
        assert_eq!(alias.region, "us-east-1");
        assert_eq!(alias.bucket_lookup, "auto");
        assert_eq!(alias.retry_config(), RetryConfig::default());
    }

    #[test]
    fn test_alias_validation() {
        let mut alias = Alias::new("local", "http://localhost:9000", "ak", "sk");
        assert!(alias.validate().is_ok());

        alias.endpoint = "ftp://localhost".into();
        assert!(alias.validate().is_err());

        alias.endpoint = "not a url".into();
        assert!(alias.validate().is_err());

        let mut alias = Alias::new("a/b", "http://localhost:9000", "ak", "sk");
        assert!(alias.validate().is_err());

        alias.name = "ok".into();
        alias.bucket_lookup = "virtual".into();
        assert!(alias.validate().is_err());
    }

    #[test]
    fn test_set_get_list_remove() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);

        manager
            .set(Alias::new("zeta", "http://z:9000", "ak", "sk"))
            .unwrap();
        manager
            .set(Alias::new("alpha", "https://a.example.com", "ak", "sk"))
            .unwrap();

        let names: Vec<String> = manager.list().unwrap().into_iter().map(|a| a.name).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);

        // Setting again replaces
        let mut updated = Alias::new("zeta", "http://z:9001", "ak2", "sk2");
        updated.region = "eu-west-1".into();
        manager.set(updated).unwrap();
        let zeta = manager.get("zeta").unwrap();
        assert_eq!(zeta.endpoint, "http://z:9001");
        assert_eq!(zeta.region, "eu-west-1");
        assert_eq!(manager.list().unwrap().len(), 2);

        manager.remove("alpha").unwrap();
        assert!(matches!(
            manager.get("alpha"),
            Err(Error::AliasNotFound(_))
        ));
        assert!(matches!(
            manager.remove("alpha"),
            Err(Error::AliasNotFound(_))
        ));
    }
}
