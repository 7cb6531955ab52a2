use std::sync::Arc;

use mailrotor_store::RelayStore;
use mailrotor_store_memory::MemoryRelayStore;
#[cfg(feature = "postgres")]
use mailrotor_store_postgres::{PostgresConfig, PostgresRelayStore};

use crate::config::{ConfigError, StoreConfig};

/// Construct a `RelayStore` from configuration.
///
/// The postgres backend runs its migrations on construction.
pub async fn create_store(config: &StoreConfig) -> Result<Arc<dyn RelayStore>, ConfigError> {
    match config.backend.as_str() {
        "memory" => Ok(Arc::new(MemoryRelayStore::new())),
        #[cfg(feature = "postgres")]
        "postgres" => create_postgres(config).await,
        other => Err(ConfigError::Store(format!(
            "unsupported store backend: {other} (is the feature enabled?)"
        ))),
    }
}

#[cfg(feature = "postgres")]
async fn create_postgres(config: &StoreConfig) -> Result<Arc<dyn RelayStore>, ConfigError> {
    let url = config
        .url
        .as_deref()
        .ok_or_else(|| ConfigError::Store("postgres backend requires 'url' in [store]".into()))?;

    let defaults = PostgresConfig::default();
    let pg_config = PostgresConfig {
        url: url.to_owned(),
        pool_size: config.pool_size.unwrap_or(defaults.pool_size),
        schema: config.schema.clone().unwrap_or(defaults.schema),
        table_prefix: config.table_prefix.clone().unwrap_or(defaults.table_prefix),
    };

    let store = PostgresRelayStore::new(pg_config)
        .await
        .map_err(|e| ConfigError::Store(format!("postgres store: {e}")))?;
    Ok(Arc::new(store))
}
