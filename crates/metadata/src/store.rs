//! Node store trait and the SQLite implementation.

use crate::IN_LIST_BATCH_SIZE;
use crate::error::{MetadataError, MetadataResult};
use crate::repos::{NodeRepo, ObjectRepo};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::{Duration, Instant};

/// Combined node store trait.
#[async_trait]
pub trait MetadataStore: NodeRepo + ObjectRepo + Send + Sync {
    /// Run database migrations.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// SQLite-based node store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
    query_timeout: Duration,
}

impl SqliteStore {
    /// Open (creating if needed) a SQLite node store and migrate it.
    pub async fn new(
        path: impl AsRef<Path>,
        query_timeout_secs: Option<u64>,
    ) -> MetadataResult<Self> {
        let path = path.as_ref();
        let query_timeout_secs = query_timeout_secs.unwrap_or(60);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        // One connection: SQLite serializes writers anyway and this avoids
        // "database is locked" under concurrent handlers.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self {
            pool,
            query_timeout: Duration::from_secs(query_timeout_secs),
        };
        store.migrate().await?;

        tracing::debug!(
            path = %path.display(),
            query_timeout_secs,
            "SQLite node store ready (query timeout is advisory only)"
        );

        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// SQLite cannot cancel statements; slow ones are only reported.
    fn warn_if_slow(&self, operation: &'static str, started: Instant) {
        let elapsed = started.elapsed();
        if elapsed > self.query_timeout {
            tracing::warn!(
                operation,
                elapsed_ms = elapsed.as_millis() as u64,
                timeout_ms = self.query_timeout.as_millis() as u64,
                "SQLite query exceeded advisory timeout"
            );
        }
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

const UPSERT_NODE_SQL: &str = r#"
INSERT INTO nodes (
    cid, root_cid, head_cid, node_type, payload, piece_index, piece_offset,
    block_published_on, tx_published_on, created_at, updated_at
)
VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
ON CONFLICT(cid) DO UPDATE SET
    root_cid = excluded.root_cid,
    head_cid = excluded.head_cid,
    node_type = excluded.node_type,
    payload = COALESCE(excluded.payload, nodes.payload),
    piece_offset = CASE WHEN nodes.piece_index IS NULL
        THEN excluded.piece_offset ELSE nodes.piece_offset END,
    piece_index = COALESCE(nodes.piece_index, excluded.piece_index),
    block_published_on = COALESCE(excluded.block_published_on, nodes.block_published_on),
    tx_published_on = COALESCE(excluded.tx_published_on, nodes.tx_published_on),
    updated_at = excluded.updated_at
"#;

const REOPEN_OBJECT_SQL: &str = r#"
UPDATE objects SET archived = 0, updated_at = ?
WHERE root_cid = ? AND archived = 1
  AND EXISTS (
    SELECT 1 FROM nodes
    WHERE nodes.root_cid = objects.root_cid AND nodes.piece_index IS NULL
  )
"#;

mod sqlite_impl {
    use super::*;
    use crate::models::*;
    use crate::repos::nodes::check_archival_pair;
    use time::OffsetDateTime;

    impl SqliteStore {
        async fn upsert_node<'e, E>(
            executor: E,
            node: &NodeRow,
            root_cid: &str,
            head_cid: &str,
        ) -> MetadataResult<()>
        where
            E: sqlx::Executor<'e, Database = Sqlite>,
        {
            sqlx::query(UPSERT_NODE_SQL)
                .bind(&node.cid)
                .bind(root_cid)
                .bind(head_cid)
                .bind(&node.node_type)
                .bind(&node.payload)
                .bind(node.piece_index)
                .bind(node.piece_offset)
                .bind(node.block_published_on)
                .bind(&node.tx_published_on)
                .bind(node.created_at)
                .bind(OffsetDateTime::now_utc())
                .execute(executor)
                .await?;
            Ok(())
        }

        /// Clear the archived flag of a root that has gained unarchived nodes.
        async fn reopen_object<'e, E>(executor: E, root_cid: &str) -> MetadataResult<()>
        where
            E: sqlx::Executor<'e, Database = Sqlite>,
        {
            let result = sqlx::query(REOPEN_OBJECT_SQL)
                .bind(OffsetDateTime::now_utc())
                .bind(root_cid)
                .execute(executor)
                .await?;
            if result.rows_affected() > 0 {
                tracing::info!(root_cid = %root_cid, "Archived object gained unarchived nodes, reopened");
            }
            Ok(())
        }
    }

    #[async_trait]
    impl NodeRepo for SqliteStore {
        async fn save_node(&self, node: &NodeRow) -> MetadataResult<()> {
            check_archival_pair(node)?;
            let now = OffsetDateTime::now_utc();

            let mut tx = self.pool.begin().await?;
            Self::upsert_node(&mut *tx, node, &node.root_cid, &node.head_cid).await?;
            sqlx::query(
                "INSERT INTO objects (root_cid, head_cid, archived, created_at, updated_at) \
                 VALUES (?, ?, 0, ?, ?) ON CONFLICT(root_cid) DO NOTHING",
            )
            .bind(&node.root_cid)
            .bind(&node.head_cid)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await?;
            Self::reopen_object(&mut *tx, &node.root_cid).await?;
            tx.commit().await?;
            Ok(())
        }

        async fn save_nodes(
            &self,
            root_cid: &str,
            head_cid: &str,
            nodes: &[NodeRow],
        ) -> MetadataResult<()> {
            for node in nodes {
                check_archival_pair(node)?;
            }
            let started = Instant::now();
            let now = OffsetDateTime::now_utc();

            let mut tx = self.pool.begin().await?;
            sqlx::query(
                r#"
                INSERT INTO objects (root_cid, head_cid, archived, created_at, updated_at)
                VALUES (?, ?, 0, ?, ?)
                ON CONFLICT(root_cid) DO UPDATE SET
                    head_cid = excluded.head_cid,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(root_cid)
            .bind(head_cid)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await?;

            for node in nodes {
                Self::upsert_node(&mut *tx, node, root_cid, head_cid).await?;
            }
            Self::reopen_object(&mut *tx, root_cid).await?;
            tx.commit().await?;

            self.warn_if_slow("save_nodes", started);
            Ok(())
        }

        async fn get_node(&self, cid: &str) -> MetadataResult<Option<NodeRow>> {
            let row = sqlx::query_as::<_, NodeRow>("SELECT * FROM nodes WHERE cid = ?")
                .bind(cid)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn get_nodes_by_root_cid(&self, root_cid: &str) -> MetadataResult<Vec<NodeRow>> {
            let rows = sqlx::query_as::<_, NodeRow>(
                "SELECT * FROM nodes WHERE root_cid = ? ORDER BY created_at, cid",
            )
            .bind(root_cid)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn get_nodes_by_head_cid(&self, head_cid: &str) -> MetadataResult<Vec<NodeRow>> {
            let rows = sqlx::query_as::<_, NodeRow>(
                "SELECT * FROM nodes WHERE head_cid = ? ORDER BY created_at, cid",
            )
            .bind(head_cid)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn get_nodes_by_cids(&self, cids: &[String]) -> MetadataResult<Vec<NodeRow>> {
            if cids.is_empty() {
                return Ok(Vec::new());
            }
            let started = Instant::now();

            let mut result = Vec::with_capacity(cids.len());
            for batch in cids.chunks(IN_LIST_BATCH_SIZE) {
                let placeholders: Vec<&str> = batch.iter().map(|_| "?").collect();
                let query = format!(
                    "SELECT * FROM nodes WHERE cid IN ({})",
                    placeholders.join(", ")
                );

                let mut query_builder = sqlx::query_as::<_, NodeRow>(&query);
                for cid in batch {
                    query_builder = query_builder.bind(cid);
                }
                result.extend(query_builder.fetch_all(&self.pool).await?);
            }

            self.warn_if_slow("get_nodes_by_cids", started);
            Ok(result)
        }

        async fn get_node_count(&self, filter: &NodeCountFilter) -> MetadataResult<NodeCount> {
            let conditions = filter.conditions();
            let mut query = String::from(
                "SELECT COUNT(*), COUNT(block_published_on), COUNT(piece_index) FROM nodes",
            );
            if !conditions.is_empty() {
                let clauses: Vec<String> = conditions
                    .iter()
                    .map(|(column, _)| format!("{column} = ?"))
                    .collect();
                query.push_str(" WHERE ");
                query.push_str(&clauses.join(" AND "));
            }

            let mut query_builder = sqlx::query_as::<_, (i64, i64, i64)>(&query);
            for (_, value) in &conditions {
                query_builder = query_builder.bind(*value);
            }
            let row = query_builder.fetch_one(&self.pool).await?;
            Ok(NodeCount::from_row(row))
        }

        async fn set_node_archiving_data(
            &self,
            data: &ArchivingData,
        ) -> MetadataResult<Option<String>> {
            let root_cid: Option<String> = sqlx::query_scalar(
                r#"
                UPDATE nodes
                SET piece_index = ?, piece_offset = ?, updated_at = ?
                WHERE cid = ? AND piece_index IS NULL
                RETURNING root_cid
                "#,
            )
            .bind(data.piece_index)
            .bind(data.piece_offset)
            .bind(OffsetDateTime::now_utc())
            .bind(&data.cid)
            .fetch_optional(&self.pool)
            .await?;
            Ok(root_cid)
        }

        async fn update_node_published_on(
            &self,
            cid: &str,
            block_number: i64,
            tx_hash: &str,
        ) -> MetadataResult<()> {
            let result = sqlx::query(
                "UPDATE nodes SET block_published_on = ?, tx_published_on = ?, updated_at = ? \
                 WHERE cid = ?",
            )
            .bind(block_number)
            .bind(tx_hash)
            .bind(OffsetDateTime::now_utc())
            .bind(cid)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!("node {cid} not found")));
            }
            Ok(())
        }

        async fn remove_node_data_by_root_cid(&self, root_cid: &str) -> MetadataResult<u64> {
            let started = Instant::now();
            let result = sqlx::query(
                "UPDATE nodes SET payload = NULL, updated_at = ? \
                 WHERE root_cid = ? AND payload IS NOT NULL AND piece_index IS NOT NULL",
            )
            .bind(OffsetDateTime::now_utc())
            .bind(root_cid)
            .execute(&self.pool)
            .await?;
            self.warn_if_slow("remove_node_data_by_root_cid", started);
            Ok(result.rows_affected())
        }

        async fn get_archiving_nodes_cid(&self) -> MetadataResult<Vec<String>> {
            let cids = sqlx::query_scalar(
                "SELECT cid FROM nodes \
                 WHERE block_published_on IS NOT NULL AND piece_index IS NULL \
                 ORDER BY block_published_on, cid",
            )
            .fetch_all(&self.pool)
            .await?;
            Ok(cids)
        }

        async fn get_last_archived_piece_node(&self) -> MetadataResult<Option<NodeRow>> {
            let row = sqlx::query_as::<_, NodeRow>(
                "SELECT * FROM nodes WHERE piece_index IS NOT NULL \
                 ORDER BY piece_index DESC, piece_offset DESC LIMIT 1",
            )
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn get_uploaded_nodes_by_root_cid(
            &self,
            root_cid: &str,
        ) -> MetadataResult<Vec<NodeRow>> {
            let rows = sqlx::query_as::<_, NodeRow>(
                "SELECT * FROM nodes WHERE root_cid = ? AND block_published_on IS NOT NULL \
                 ORDER BY created_at, cid",
            )
            .bind(root_cid)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }
    }

    #[async_trait]
    impl ObjectRepo for SqliteStore {
        async fn get_object(&self, root_cid: &str) -> MetadataResult<Option<ObjectRow>> {
            let row = sqlx::query_as::<_, ObjectRow>("SELECT * FROM objects WHERE root_cid = ?")
                .bind(root_cid)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn get_non_archived_objects(
            &self,
            after: Option<&str>,
            limit: u32,
        ) -> MetadataResult<Vec<ObjectRow>> {
            let rows = sqlx::query_as::<_, ObjectRow>(
                "SELECT * FROM objects WHERE archived = 0 AND root_cid > ? \
                 ORDER BY root_cid LIMIT ?",
            )
            .bind(after.unwrap_or(""))
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn set_object_archived(&self, root_cid: &str) -> MetadataResult<bool> {
            let now = OffsetDateTime::now_utc();
            let result = sqlx::query(
                r#"
                INSERT INTO objects (root_cid, head_cid, archived, archived_at, created_at, updated_at)
                SELECT ?, NULL, 1, ?, ?, ?
                WHERE NOT EXISTS (
                    SELECT 1 FROM nodes WHERE root_cid = ? AND piece_index IS NULL
                )
                ON CONFLICT(root_cid) DO UPDATE SET
                    archived = 1,
                    archived_at = COALESCE(objects.archived_at, excluded.archived_at),
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(root_cid)
            .bind(now)
            .bind(now)
            .bind(now)
            .bind(root_cid)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() > 0)
        }
    }
}

const SCHEMA_SQL: &str = r#"
-- DAG nodes, keyed by content identifier
CREATE TABLE IF NOT EXISTS nodes (
    cid TEXT PRIMARY KEY,
    root_cid TEXT NOT NULL,
    head_cid TEXT NOT NULL,
    node_type TEXT NOT NULL,
    payload BLOB,
    piece_index INTEGER,
    piece_offset INTEGER,
    block_published_on INTEGER,
    tx_published_on TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_nodes_root_cid ON nodes(root_cid);
CREATE INDEX IF NOT EXISTS idx_nodes_head_cid ON nodes(head_cid);
CREATE INDEX IF NOT EXISTS idx_nodes_piece ON nodes(piece_index, piece_offset);
CREATE INDEX IF NOT EXISTS idx_nodes_archiving ON nodes(block_published_on) WHERE piece_index IS NULL;

-- Object archival flags, keyed by root cid
CREATE TABLE IF NOT EXISTS objects (
    root_cid TEXT PRIMARY KEY,
    head_cid TEXT,
    archived INTEGER NOT NULL DEFAULT 0,
    archived_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_objects_pending ON objects(root_cid) WHERE archived = 0;
"#;
