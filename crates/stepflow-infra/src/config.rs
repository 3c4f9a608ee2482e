//! Configuration loader for stepflow.
//!
//! Reads `stepflow.toml` and deserializes it into [`StepflowConfig`]. Falls
//! back to defaults when the file is missing or malformed, then applies
//! environment overrides.

use std::path::{Path, PathBuf};

use stepflow_types::config::StepflowConfig;

use crate::sqlite::pool::{default_data_dir, default_database_url};

/// Config file name inside the data directory.
pub const CONFIG_FILE_NAME: &str = "stepflow.toml";

/// Env var overriding the database URL.
pub const DATABASE_URL_ENV: &str = "STEPFLOW_DATABASE_URL";

/// Env var overriding the worker namespace.
pub const NAMESPACE_ENV: &str = "STEPFLOW_NAMESPACE";

/// `{data_dir}/stepflow.toml`.
pub fn default_config_path() -> PathBuf {
    default_data_dir().join(CONFIG_FILE_NAME)
}

/// Load configuration from `path`.
///
/// - Missing file: defaults.
/// - Unreadable or unparsable file: a warning, then defaults.
///
/// Environment overrides are applied in every case.
pub async fn load_config(path: &Path) -> StepflowConfig {
    let mut config = read_config_file(path).await;
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    config
}

async fn read_config_file(path: &Path) -> StepflowConfig {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config file at {}, using defaults", path.display());
            return StepflowConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", path.display());
            return StepflowConfig::default();
        }
    };

    match toml::from_str::<StepflowConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!("Failed to parse {}: {err}, using defaults", path.display());
            StepflowConfig::default()
        }
    }
}

/// Apply `STEPFLOW_*` overrides using `lookup` to read variables.
pub fn apply_env_overrides<F>(config: &mut StepflowConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(url) = lookup(DATABASE_URL_ENV).filter(|v| !v.is_empty()) {
        config.database.url = Some(url);
    }
    if let Some(namespace) = lookup(NAMESPACE_ENV).filter(|v| !v.is_empty()) {
        config.worker.namespace = namespace;
    }
}

/// The configured database URL, or the default location.
pub fn resolve_database_url(config: &StepflowConfig) -> String {
    config
        .database
        .url
        .clone()
        .unwrap_or_else(default_database_url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[tokio::test]
    async fn missing_file_returns_defaults() {
        let tmp = TempDir::new().unwrap();
        let config = read_config_file(&tmp.path().join(CONFIG_FILE_NAME)).await;
        assert_eq!(config.worker.concurrency, 10);
        assert!(config.database.url.is_none());
    }

    #[tokio::test]
    async fn valid_toml_is_parsed() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(CONFIG_FILE_NAME);
        tokio::fs::write(
            &path,
            r#"
[database]
url = "sqlite:///tmp/flows.db"

[worker]
namespace = "billing"
concurrency = 4
lease_duration_ms = 60000
"#,
        )
        .await
        .unwrap();

        let config = read_config_file(&path).await;
        assert_eq!(config.database.url.as_deref(), Some("sqlite:///tmp/flows.db"));
        assert_eq!(config.worker.namespace, "billing");
        assert_eq!(config.worker.concurrency, 4);
        assert_eq!(config.worker.lease_duration_ms, 60_000);
        assert_eq!(config.worker.poll_interval_ms, 1_000);
    }

    #[tokio::test]
    async fn malformed_toml_falls_back_to_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(CONFIG_FILE_NAME);
        tokio::fs::write(&path, "[worker\nconcurrency = ").await.unwrap();

        let config = read_config_file(&path).await;
        assert_eq!(config.worker.namespace, "default");
    }

    #[test]
    fn env_overrides_take_precedence() {
        let mut config = StepflowConfig::default();
        config.database.url = Some("sqlite://file.db".to_string());

        let env: HashMap<&str, &str> = HashMap::from([
            (DATABASE_URL_ENV, "sqlite://env.db"),
            (NAMESPACE_ENV, "ops"),
        ]);
        apply_env_overrides(&mut config, |key| env.get(key).map(|v| v.to_string()));

        assert_eq!(resolve_database_url(&config), "sqlite://env.db");
        assert_eq!(config.worker.namespace, "ops");
    }

    #[test]
    fn empty_env_values_are_ignored() {
        let mut config = StepflowConfig::default();
        apply_env_overrides(&mut config, |_| Some(String::new()));
        assert!(config.database.url.is_none());
        assert_eq!(config.worker.namespace, "default");
        assert!(resolve_database_url(&config).ends_with("stepflow.db"));
    }
}
