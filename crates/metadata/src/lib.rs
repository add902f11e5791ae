//! Node store for archivist.
//!
//! Persists DAG nodes keyed by cid together with their root/head grouping,
//! encoded payload, publish receipt and archival location, plus the
//! per-object archived flag. Two interchangeable backends are provided:
//! SQLite for tests and small deployments, PostgreSQL for production.
//!
//! Every write is an idempotent upsert or a guarded update so that
//! concurrent or replayed writers converge on the same state.

pub mod error;
pub mod models;
pub mod postgres;
pub mod repos;
pub mod store;

pub use error::{MetadataError, MetadataResult};
pub use postgres::PostgresStore;
pub use repos::{NodeRepo, ObjectRepo};
pub use store::{MetadataStore, SqliteStore};

use archivist_core::config::MetadataConfig;
use std::sync::Arc;

/// SQLite caps bound parameters per statement; IN-lists are split at this size.
pub(crate) const IN_LIST_BATCH_SIZE: usize = 900;

/// Create a node store from configuration.
pub async fn from_config(config: &MetadataConfig) -> MetadataResult<Arc<dyn MetadataStore>> {
    config.validate().map_err(MetadataError::Config)?;

    match config {
        MetadataConfig::Sqlite {
            path,
            query_timeout_secs,
        } => {
            let store = SqliteStore::new(path, *query_timeout_secs).await?;
            Ok(Arc::new(store) as Arc<dyn MetadataStore>)
        }
        MetadataConfig::Postgres {
            url,
            host,
            port,
            username,
            password,
            database,
            ssl_mode,
            max_connections,
            statement_timeout_ms,
        } => {
            let store = if let Some(url) = url {
                tracing::info!("Connecting to PostgreSQL using connection URL");
                PostgresStore::from_url(url, *max_connections, *statement_timeout_ms).await?
            } else if let (Some(host), Some(database)) = (host.as_ref(), database.as_ref()) {
                PostgresStore::from_params(
                    host,
                    port.unwrap_or(5432),
                    username.as_deref(),
                    password.as_deref(),
                    database,
                    *ssl_mode,
                    *max_connections,
                    *statement_timeout_ms,
                )
                .await?
            } else {
                return Err(MetadataError::Config(
                    "postgres config requires either 'url' or 'host' + 'database'".to_string(),
                ));
            };
            Ok(Arc::new(store) as Arc<dyn MetadataStore>)
        }
    }
}
