//! PostgreSQL-based node store implementation.

use crate::IN_LIST_BATCH_SIZE;
use crate::error::{MetadataError, MetadataResult};
use crate::models::*;
use crate::repos::nodes::check_archival_pair;
use crate::repos::{NodeRepo, ObjectRepo};
use crate::store::MetadataStore;
use archivist_core::config::PgSslMode;
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode as SqlxPgSslMode};
use sqlx::{Pool, Postgres};
use std::str::FromStr;
use time::OffsetDateTime;

/// PostgreSQL schema (embedded).
const POSTGRES_SCHEMA: &str = include_str!("postgres_schema.sql");

fn postgres_schema_statements(schema: &str) -> Vec<&str> {
    schema
        .split(';')
        .filter_map(|statement| {
            let trimmed = statement.trim();
            if trimmed.is_empty() {
                return None;
            }
            let has_sql = trimmed.lines().any(|line| {
                let line = line.trim();
                !line.is_empty() && !line.starts_with("--")
            });
            has_sql.then_some(trimmed)
        })
        .collect()
}

const UPSERT_NODE_SQL: &str = r#"
INSERT INTO nodes (
    cid, root_cid, head_cid, node_type, payload, piece_index, piece_offset,
    block_published_on, tx_published_on, created_at, updated_at
)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
ON CONFLICT(cid) DO UPDATE SET
    root_cid = EXCLUDED.root_cid,
    head_cid = EXCLUDED.head_cid,
    node_type = EXCLUDED.node_type,
    payload = COALESCE(EXCLUDED.payload, nodes.payload),
    piece_offset = CASE WHEN nodes.piece_index IS NULL
        THEN EXCLUDED.piece_offset ELSE nodes.piece_offset END,
    piece_index = COALESCE(nodes.piece_index, EXCLUDED.piece_index),
    block_published_on = COALESCE(EXCLUDED.block_published_on, nodes.block_published_on),
    tx_published_on = COALESCE(EXCLUDED.tx_published_on, nodes.tx_published_on),
    updated_at = EXCLUDED.updated_at
"#;

const REOPEN_OBJECT_SQL: &str = r#"
UPDATE objects SET archived = FALSE, updated_at = $1
WHERE root_cid = $2 AND archived
  AND EXISTS (
    SELECT 1 FROM nodes
    WHERE nodes.root_cid = objects.root_cid AND nodes.piece_index IS NULL
  )
"#;

/// PostgreSQL-based node store.
pub struct PostgresStore {
    pool: Pool<Postgres>,
}

impl PostgresStore {
    /// Connect using a full connection URL.
    pub async fn from_url(
        url: &str,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        let opts = PgConnectOptions::from_str(url)?;
        Self::connect(opts, max_connections, statement_timeout_ms).await
    }

    /// Connect using individual parameters, so the password can come from
    /// the environment rather than a URL in a config file.
    #[allow(clippy::too_many_arguments)]
    pub async fn from_params(
        host: &str,
        port: u16,
        username: Option<&str>,
        password: Option<&str>,
        database: &str,
        ssl_mode: Option<PgSslMode>,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        let mut opts = PgConnectOptions::new()
            .host(host)
            .port(port)
            .database(database);

        if let Some(user) = username {
            opts = opts.username(user);
        }

        if let Some(pass) = password {
            opts = opts.password(pass);
        }

        if let Some(mode) = ssl_mode {
            let sqlx_mode = match mode {
                PgSslMode::Disable => SqlxPgSslMode::Disable,
                PgSslMode::Prefer => SqlxPgSslMode::Prefer,
                PgSslMode::Require => SqlxPgSslMode::Require,
            };
            opts = opts.ssl_mode(sqlx_mode);
        }

        tracing::info!(
            host = host,
            port = port,
            database = database,
            username = username.unwrap_or("<none>"),
            ssl_mode = ?ssl_mode,
            "Connecting to PostgreSQL with individual parameters"
        );

        Self::connect(opts, max_connections, statement_timeout_ms).await
    }

    async fn connect(
        mut opts: PgConnectOptions,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        if let Some(timeout_ms) = statement_timeout_ms {
            opts = opts.options([("statement_timeout", format!("{}ms", timeout_ms))]);
            tracing::info!("PostgreSQL statement_timeout set to {}ms", timeout_ms);
        }

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;

        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }

    async fn upsert_node<'e, E>(
        executor: E,
        node: &NodeRow,
        root_cid: &str,
        head_cid: &str,
    ) -> MetadataResult<()>
    where
        E: sqlx::Executor<'e, Database = Postgres>,
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
        E: sqlx::Executor<'e, Database = Postgres>,
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
impl MetadataStore for PostgresStore {
    async fn migrate(&self) -> MetadataResult<()> {
        // Prepared statements cannot hold several commands.
        for statement in postgres_schema_statements(POSTGRES_SCHEMA) {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl NodeRepo for PostgresStore {
    async fn save_node(&self, node: &NodeRow) -> MetadataResult<()> {
        check_archival_pair(node)?;
        let now = OffsetDateTime::now_utc();

        let mut tx = self.pool.begin().await?;
        Self::upsert_node(&mut *tx, node, &node.root_cid, &node.head_cid).await?;
        sqlx::query(
            "INSERT INTO objects (root_cid, head_cid, archived, created_at, updated_at) \
             VALUES ($1, $2, FALSE, $3, $4) ON CONFLICT(root_cid) DO NOTHING",
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
        let now = OffsetDateTime::now_utc();

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO objects (root_cid, head_cid, archived, created_at, updated_at)
            VALUES ($1, $2, FALSE, $3, $4)
            ON CONFLICT(root_cid) DO UPDATE SET
                head_cid = EXCLUDED.head_cid,
                updated_at = EXCLUDED.updated_at
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
        Ok(())
    }

    async fn get_node(&self, cid: &str) -> MetadataResult<Option<NodeRow>> {
        let row = sqlx::query_as::<_, NodeRow>("SELECT * FROM nodes WHERE cid = $1")
            .bind(cid)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn get_nodes_by_root_cid(&self, root_cid: &str) -> MetadataResult<Vec<NodeRow>> {
        let rows = sqlx::query_as::<_, NodeRow>(
            "SELECT * FROM nodes WHERE root_cid = $1 ORDER BY created_at, cid",
        )
        .bind(root_cid)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn get_nodes_by_head_cid(&self, head_cid: &str) -> MetadataResult<Vec<NodeRow>> {
        let rows = sqlx::query_as::<_, NodeRow>(
            "SELECT * FROM nodes WHERE head_cid = $1 ORDER BY created_at, cid",
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

        let mut result = Vec::with_capacity(cids.len());
        for batch in cids.chunks(IN_LIST_BATCH_SIZE) {
            let rows = sqlx::query_as::<_, NodeRow>("SELECT * FROM nodes WHERE cid = ANY($1)")
                .bind(batch)
                .fetch_all(&self.pool)
                .await?;
            result.extend(rows);
        }
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
                .enumerate()
                .map(|(i, (column, _))| format!("{column} = ${}", i + 1))
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
            SET piece_index = $1, piece_offset = $2, updated_at = $3
            WHERE cid = $4 AND piece_index IS NULL
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
            "UPDATE nodes SET block_published_on = $1, tx_published_on = $2, updated_at = $3 \
             WHERE cid = $4",
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
        let result = sqlx::query(
            "UPDATE nodes SET payload = NULL, updated_at = $1 \
             WHERE root_cid = $2 AND payload IS NOT NULL AND piece_index IS NOT NULL",
        )
        .bind(OffsetDateTime::now_utc())
        .bind(root_cid)
        .execute(&self.pool)
        .await?;
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

    async fn get_uploaded_nodes_by_root_cid(&self, root_cid: &str) -> MetadataResult<Vec<NodeRow>> {
        let rows = sqlx::query_as::<_, NodeRow>(
            "SELECT * FROM nodes WHERE root_cid = $1 AND block_published_on IS NOT NULL \
             ORDER BY created_at, cid",
        )
        .bind(root_cid)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[async_trait]
impl ObjectRepo for PostgresStore {
    async fn get_object(&self, root_cid: &str) -> MetadataResult<Option<ObjectRow>> {
        let row = sqlx::query_as::<_, ObjectRow>("SELECT * FROM objects WHERE root_cid = $1")
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
            "SELECT * FROM objects WHERE NOT archived AND root_cid > $1 \
             ORDER BY root_cid LIMIT $2",
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
            SELECT $1, NULL, TRUE, $2, $2, $2
            WHERE NOT EXISTS (
                SELECT 1 FROM nodes WHERE root_cid = $1 AND piece_index IS NULL
            )
            ON CONFLICT(root_cid) DO UPDATE SET
                archived = TRUE,
                archived_at = COALESCE(objects.archived_at, EXCLUDED.archived_at),
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(root_cid)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
