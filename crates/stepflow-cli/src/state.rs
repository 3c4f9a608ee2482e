//! Application state for CLI commands.
//!
//! Loads `stepflow.toml`, opens the SQLite store and binds an [`Engine`] to
//! the selected namespace.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use stepflow_core::engine::Engine;
use stepflow_core::store::Store;
use stepflow_infra::config::{default_config_path, load_config, resolve_database_url};
use stepflow_infra::sqlite::SqliteStore;
use stepflow_infra::sqlite::pool::default_data_dir;

pub struct AppState {
    pub database_url: String,
    pub store: Arc<SqliteStore>,
    pub engine: Engine,
}

impl AppState {
    /// Load configuration, connect to the store and build the engine.
    ///
    /// `namespace` overrides both the config file and `STEPFLOW_NAMESPACE`.
    pub async fn init(config_path: Option<&Path>, namespace: Option<String>) -> anyhow::Result<Self> {
        let config_path = config_path
            .map(Path::to_path_buf)
            .unwrap_or_else(default_config_path);

        let mut config = load_config(&config_path).await;
        if let Some(namespace) = namespace {
            config.worker.namespace = namespace;
        }

        // The default database lives in the data directory, which may not
        // exist yet on first use.
        if config.database.url.is_none() {
            let data_dir = default_data_dir();
            tokio::fs::create_dir_all(&data_dir)
                .await
                .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;
        }

        let database_url = resolve_database_url(&config);
        let store = SqliteStore::connect(&database_url)
            .await
            .with_context(|| format!("Failed to open store at {database_url}"))?;
        let store = Arc::new(store);

        let engine = Engine::builder()
            .store(store.clone() as Arc<dyn Store>)
            .namespace(config.worker.namespace.clone())
            .build()?;

        tracing::debug!(
            namespace = engine.namespace(),
            database = %database_url,
            "cli state ready"
        );

        Ok(Self {
            database_url,
            store,
            engine,
        })
    }

    pub fn namespace(&self) -> &str {
        self.engine.namespace()
    }

    pub async fn close(&self) {
        self.store.pool().close().await;
    }
}
