//! SQLite-backed catalog.
//!
//! Segment records are stored as a JSON payload column alongside indexed
//! scalar columns used by listing and GC queries. Multi-record writes
//! (`alter_segments`, the drop-channel batch) run inside one transaction,
//! which is what gives the engine its atomic multi-key contract.

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{query, Executor, Row, Sqlite, SqlitePool};

use strata_core::traits::BinlogsIncrement;
use strata_core::{
    Catalog, CollectionId, IndexMeta, MetaError, MetaResult, PartitionId, SegmentIndexMeta,
    SegmentRecord, StreamPosition,
};

/// SQLite-backed catalog.
pub struct SqliteCatalog {
    pool: SqlitePool,
}

impl SqliteCatalog {
    /// Opens (and creates, when missing) the catalog database at `url` and
    /// bootstraps the schema.
    ///
    /// # Errors
    ///
    /// Returns `MetaError::Catalog` when the database cannot be opened or
    /// the schema cannot be created.
    pub async fn connect(url: &str) -> MetaResult<Self> {
        let options = url
            .parse::<SqliteConnectOptions>()
            .map_err(|e| MetaError::Catalog(format!("invalid catalog url `{url}`: {e}")))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .connect_with(options)
            .await
            .map_err(|e| MetaError::Catalog(format!("failed to open catalog: {e}")))?;
        let catalog = Self { pool };
        catalog.ensure_schema().await?;
        Ok(catalog)
    }

    /// Wraps an existing pool (useful for tests sharing a `:memory:` pool).
    pub async fn with_pool(pool: SqlitePool) -> MetaResult<Self> {
        let catalog = Self { pool };
        catalog.ensure_schema().await?;
        Ok(catalog)
    }

    /// Returns the underlying pool.
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn ensure_schema(&self) -> MetaResult<()> {
        let ddl = r#"
            CREATE TABLE IF NOT EXISTS segments (
                segment_id    INTEGER PRIMARY KEY,
                collection_id INTEGER NOT NULL,
                partition_id  INTEGER NOT NULL,
                insert_channel TEXT NOT NULL,
                state         TEXT NOT NULL,
                level         TEXT NOT NULL,
                payload       TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_segments_collection
                ON segments (collection_id, partition_id);
            CREATE TABLE IF NOT EXISTS segment_log_index (
                segment_id INTEGER NOT NULL,
                field_id   INTEGER NOT NULL,
                log_id     INTEGER NOT NULL,
                log_kind   TEXT NOT NULL,
                PRIMARY KEY (segment_id, log_kind, field_id, log_id)
            );
            CREATE TABLE IF NOT EXISTS channel_checkpoints (
                channel TEXT PRIMARY KEY,
                payload TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS deleted_channels (
                channel TEXT PRIMARY KEY
            );
            CREATE TABLE IF NOT EXISTS indexes (
                index_id INTEGER PRIMARY KEY,
                payload  TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS segment_indexes (
                segment_id INTEGER NOT NULL,
                index_id   INTEGER NOT NULL,
                payload    TEXT NOT NULL,
                PRIMARY KEY (segment_id, index_id)
            );
        "#;
        self.pool
            .execute(ddl)
            .await
            .map(|_| ())
            .map_err(|e| MetaError::Catalog(format!("failed to bootstrap schema: {e}")))
    }

    /// Inserts or replaces a segment record via the supplied executor.
    async fn upsert_segment_with_executor<'e, E>(
        executor: E,
        segment: &SegmentRecord,
    ) -> MetaResult<()>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let payload = serde_json::to_string(segment)?;
        query(
            r#"
            INSERT INTO segments (
                segment_id, collection_id, partition_id, insert_channel, state, level, payload
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT (segment_id) DO UPDATE SET
                collection_id = excluded.collection_id,
                partition_id = excluded.partition_id,
                insert_channel = excluded.insert_channel,
                state = excluded.state,
                level = excluded.level,
                payload = excluded.payload
            "#,
        )
        .bind(segment.id.as_i64())
        .bind(segment.collection_id.as_i64())
        .bind(segment.partition_id.as_i64())
        .bind(&segment.insert_channel)
        .bind(segment.state.as_str())
        .bind(segment.level.as_str())
        .bind(payload)
        .execute(executor)
        .await
        .map(|_| ())
        .map_err(|err| map_sqlx_error("segment", segment.id.to_string(), err))
    }

    /// Records the current log listing of an incremented segment.
    async fn index_segment_logs(
        conn: &mut sqlx::SqliteConnection,
        increment: &BinlogsIncrement,
    ) -> MetaResult<()> {
        let segment = &increment.segment;
        query("DELETE FROM segment_log_index WHERE segment_id = ?1")
            .bind(segment.id.as_i64())
            .execute(&mut *conn)
            .await
            .map_err(|err| map_sqlx_error("segment", segment.id.to_string(), err))?;

        let kinds = [
            ("insert", &segment.binlogs),
            ("stats", &segment.statslogs),
            ("delta", &segment.deltalogs),
        ];
        for (kind, field_binlogs) in kinds {
            for field in field_binlogs.iter() {
                for log in &field.logs {
                    query(
                        r#"
                        INSERT OR REPLACE INTO segment_log_index
                            (segment_id, field_id, log_id, log_kind)
                        VALUES (?1, ?2, ?3, ?4)
                        "#,
                    )
                    .bind(segment.id.as_i64())
                    .bind(field.field_id.as_i64())
                    .bind(log.log_id.as_i64())
                    .bind(kind)
                    .execute(&mut *conn)
                    .await
                    .map_err(|err| map_sqlx_error("segment", segment.id.to_string(), err))?;
                }
            }
        }
        Ok(())
    }

    fn decode_segment(row: &SqliteRow) -> MetaResult<SegmentRecord> {
        let payload: String = row
            .try_get("payload")
            .map_err(|err| map_sqlx_error("segment", "?", err))?;
        Ok(serde_json::from_str(&payload)?)
    }
}

#[async_trait]
impl Catalog for SqliteCatalog {
    async fn list_segments(&self) -> MetaResult<Vec<SegmentRecord>> {
        let rows = query("SELECT payload FROM segments")
            .fetch_all(&self.pool)
            .await
            .map_err(|err| map_sqlx_error("segment", "*", err))?;
        rows.iter().map(Self::decode_segment).collect()
    }

    async fn add_segment(&self, segment: &SegmentRecord) -> MetaResult<()> {
        Self::upsert_segment_with_executor(&self.pool, segment).await
    }

    async fn alter_segments(
        &self,
        segments: &[SegmentRecord],
        increments: &[BinlogsIncrement],
    ) -> MetaResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|err| map_sqlx_error("segment", "*", err))?;
        for segment in segments {
            Self::upsert_segment_with_executor(&mut *tx, segment).await?;
        }
        for increment in increments {
            Self::index_segment_logs(&mut *tx, increment).await?;
        }
        tx.commit()
            .await
            .map_err(|err| map_sqlx_error("segment", "*", err))
    }

    async fn drop_segment(&self, segment: &SegmentRecord) -> MetaResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|err| map_sqlx_error("segment", segment.id.to_string(), err))?;
        query("DELETE FROM segments WHERE segment_id = ?1")
            .bind(segment.id.as_i64())
            .execute(&mut *tx)
            .await
            .map_err(|err| map_sqlx_error("segment", segment.id.to_string(), err))?;
        query("DELETE FROM segment_log_index WHERE segment_id = ?1")
            .bind(segment.id.as_i64())
            .execute(&mut *tx)
            .await
            .map_err(|err| map_sqlx_error("segment", segment.id.to_string(), err))?;
        tx.commit()
            .await
            .map_err(|err| map_sqlx_error("segment", segment.id.to_string(), err))
    }

    async fn save_dropped_segments_in_batch(&self, segments: &[SegmentRecord]) -> MetaResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|err| map_sqlx_error("segment", "*", err))?;
        for segment in segments {
            Self::upsert_segment_with_executor(&mut *tx, segment).await?;
        }
        tx.commit()
            .await
            .map_err(|err| map_sqlx_error("segment", "*", err))
    }

    async fn mark_channel_deleted(&self, channel: &str) -> MetaResult<()> {
        query("INSERT OR IGNORE INTO deleted_channels (channel) VALUES (?1)")
            .bind(channel)
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(|err| map_sqlx_error("channel", channel, err))
    }

    async fn is_channel_deleted(&self, channel: &str) -> MetaResult<bool> {
        let row = query("SELECT channel FROM deleted_channels WHERE channel = ?1")
            .bind(channel)
            .fetch_optional(&self.pool)
            .await
            .map_err(|err| map_sqlx_error("channel", channel, err))?;
        Ok(row.is_some())
    }

    async fn list_channel_checkpoints(&self) -> MetaResult<HashMap<String, StreamPosition>> {
        let rows = query("SELECT channel, payload FROM channel_checkpoints")
            .fetch_all(&self.pool)
            .await
            .map_err(|err| map_sqlx_error("checkpoint", "*", err))?;
        let mut checkpoints = HashMap::with_capacity(rows.len());
        for row in rows {
            let channel: String = row
                .try_get("channel")
                .map_err(|err| map_sqlx_error("checkpoint", "?", err))?;
            let payload: String = row
                .try_get("payload")
                .map_err(|err| map_sqlx_error("checkpoint", channel.clone(), err))?;
            let pos: StreamPosition = serde_json::from_str(&payload)?;
            checkpoints.insert(channel, pos);
        }
        Ok(checkpoints)
    }

    async fn save_channel_checkpoint(&self, channel: &str, pos: &StreamPosition) -> MetaResult<()> {
        let payload = serde_json::to_string(pos)?;
        query(
            r#"
            INSERT INTO channel_checkpoints (channel, payload)
            VALUES (?1, ?2)
            ON CONFLICT (channel) DO UPDATE SET payload = excluded.payload
            "#,
        )
        .bind(channel)
        .bind(payload)
        .execute(&self.pool)
        .await
        .map(|_| ())
        .map_err(|err| map_sqlx_error("checkpoint", channel, err))
    }

    async fn drop_channel_checkpoint(&self, channel: &str) -> MetaResult<()> {
        query("DELETE FROM channel_checkpoints WHERE channel = ?1")
            .bind(channel)
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(|err| map_sqlx_error("checkpoint", channel, err))
    }

    async fn list_indexes(&self) -> MetaResult<Vec<IndexMeta>> {
        let rows = query("SELECT payload FROM indexes")
            .fetch_all(&self.pool)
            .await
            .map_err(|err| map_sqlx_error("index", "*", err))?;
        rows.iter()
            .map(|row| {
                let payload: String = row
                    .try_get("payload")
                    .map_err(|err| map_sqlx_error("index", "?", err))?;
                Ok(serde_json::from_str(&payload)?)
            })
            .collect()
    }

    async fn list_segment_indexes(&self) -> MetaResult<Vec<SegmentIndexMeta>> {
        let rows = query("SELECT payload FROM segment_indexes")
            .fetch_all(&self.pool)
            .await
            .map_err(|err| map_sqlx_error("segment index", "*", err))?;
        rows.iter()
            .map(|row| {
                let payload: String = row
                    .try_get("payload")
                    .map_err(|err| map_sqlx_error("segment index", "?", err))?;
                Ok(serde_json::from_str(&payload)?)
            })
            .collect()
    }

    async fn gc_confirm(
        &self,
        collection_id: CollectionId,
        partition_id: PartitionId,
    ) -> MetaResult<bool> {
        let row = query(
            "SELECT COUNT(*) AS remaining FROM segments WHERE collection_id = ?1 AND partition_id = ?2",
        )
        .bind(collection_id.as_i64())
        .bind(partition_id.as_i64())
        .fetch_one(&self.pool)
        .await
        .map_err(|err| map_sqlx_error("segment", collection_id.to_string(), err))?;
        let remaining: i64 = row
            .try_get("remaining")
            .map_err(|err| map_sqlx_error("segment", collection_id.to_string(), err))?;
        Ok(remaining == 0)
    }
}

impl SqliteCatalog {
    /// Persists an index definition (used by catalog seeding and tests).
    pub async fn save_index(&self, index: &IndexMeta) -> MetaResult<()> {
        let payload = serde_json::to_string(index)?;
        query(
            r#"
            INSERT INTO indexes (index_id, payload)
            VALUES (?1, ?2)
            ON CONFLICT (index_id) DO UPDATE SET payload = excluded.payload
            "#,
        )
        .bind(index.index_id.as_i64())
        .bind(payload)
        .execute(&self.pool)
        .await
        .map(|_| ())
        .map_err(|err| map_sqlx_error("index", index.index_id.to_string(), err))
    }

    /// Persists a per-segment index build record.
    pub async fn save_segment_index(&self, segment_index: &SegmentIndexMeta) -> MetaResult<()> {
        let payload = serde_json::to_string(segment_index)?;
        query(
            r#"
            INSERT INTO segment_indexes (segment_id, index_id, payload)
            VALUES (?1, ?2, ?3)
            ON CONFLICT (segment_id, index_id) DO UPDATE SET payload = excluded.payload
            "#,
        )
        .bind(segment_index.segment_id.as_i64())
        .bind(segment_index.index_id.as_i64())
        .bind(payload)
        .execute(&self.pool)
        .await
        .map(|_| ())
        .map_err(|err| {
            map_sqlx_error("segment index", segment_index.segment_id.to_string(), err)
        })
    }
}

fn map_sqlx_error(entity: &'static str, id: impl Into<String>, err: sqlx::Error) -> MetaError {
    match err {
        sqlx::Error::RowNotFound => MetaError::not_found(entity, id),
        other => MetaError::Catalog(format!("{entity} `{}`: {other}", id.into())),
    }
}
