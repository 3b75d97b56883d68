//! Configuration is read once at startup: an optional TOML file named by
//! `TAVERN_CONFIG`, overridden by `TAVERN__`-prefixed environment variables.

use anyhow::{anyhow, Context};
use config::{Config, Environment, File};
use serde::Deserialize;

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub listen_addr: String,
    pub auth: AuthConfig,
    pub storage: StorageBackendConfig,
    pub llm: LlmConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8787".to_string(),
            auth: AuthConfig::default(),
            storage: StorageBackendConfig::default(),
            llm: LlmConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Privileged service secret: literal value, `env:NAME`, or `file:/path`.
    pub service_secret: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StorageBackendConfig {
    Memory,
    Rest {
        base_url: String,
        /// Secret source, same forms as `service_secret`.
        service_key: String,
        #[serde(default)]
        bucket: Option<String>,
    },
}

impl Default for StorageBackendConfig {
    fn default() -> Self {
        StorageBackendConfig::Memory
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub request_timeout_secs: u64,
    pub max_concurrent_requests: usize,
    pub history_limit: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 60,
            max_concurrent_requests: 8,
            history_limit: 10,
        }
    }
}

impl GatewayConfig {
    pub fn load() -> anyhow::Result<Self> {
        let mut builder = Config::builder();
        if let Ok(path) = std::env::var("TAVERN_CONFIG") {
            builder = builder.add_source(File::with_name(&path));
        }
        builder
            .add_source(
                Environment::with_prefix("TAVERN")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()
            .context("assemble configuration sources")?
            .try_deserialize()
            .context("deserialize gateway configuration")
    }
}

/// `env:NAME` reads the variable, `file:/path` reads the file (trimmed),
/// anything else is the literal secret.
pub fn resolve_secret_source(raw: &str) -> anyhow::Result<String> {
    if let Some(name) = raw.strip_prefix("env:") {
        return std::env::var(name).map_err(|_| anyhow!("secret env var '{name}' is not set"));
    }
    if let Some(path) = raw.strip_prefix("file:") {
        let value = std::fs::read_to_string(path)
            .with_context(|| format!("read secret file '{path}'"))?;
        return Ok(value.trim().to_string());
    }
    Ok(raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn literal_secret_passes_through() {
        assert_eq!(resolve_secret_source("s3cret").unwrap(), "s3cret");
    }

    #[test]
    #[serial]
    fn env_secret_is_read_from_the_environment() {
        std::env::set_var("TAVERN_TEST_SECRET", "from-env");
        assert_eq!(
            resolve_secret_source("env:TAVERN_TEST_SECRET").unwrap(),
            "from-env"
        );
        std::env::remove_var("TAVERN_TEST_SECRET");
        assert!(resolve_secret_source("env:TAVERN_TEST_SECRET").is_err());
    }

    #[test]
    fn file_secret_is_trimmed() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "  from-file  ").unwrap();
        let source = format!("file:{}", file.path().display());
        assert_eq!(resolve_secret_source(&source).unwrap(), "from-file");
    }

    #[test]
    #[serial]
    fn defaults_apply_without_any_source() {
        std::env::remove_var("TAVERN_CONFIG");
        let config = GatewayConfig::load().unwrap();
        assert_eq!(config.listen_addr, "0.0.0.0:8787");
        assert_eq!(config.llm.request_timeout_secs, 60);
        assert!(matches!(config.storage, StorageBackendConfig::Memory));
    }
}
