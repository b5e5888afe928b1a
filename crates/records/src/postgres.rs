//! PostgreSQL record store implementation.

use crate::error::{RecordsError, RecordsResult};
use crate::models::{AggregateRow, DealRow, InclusionRow};
use crate::repos::{AggregateRepo, DealRepo, PieceQueueRepo};
use crate::store::{RecordStore, classify_failed_transition, parse_state, validate_batch};
use async_trait::async_trait;
use barge_core::{
    Aggregate, AggregateId, AggregateState, CommitmentProof, DealKey, DealRecord, Inclusion,
    Piece, PieceInfo, PieceLink, batch_size,
};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};
use time::OffsetDateTime;

/// PostgreSQL-based record store.
///
/// Same semantics as the SQLite store; write contention is handled with
/// row locks (`SELECT ... FOR UPDATE`) instead of a single-writer pool.
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect to PostgreSQL and run migrations.
    pub async fn new(url: &str, max_connections: u32) -> RecordsResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn lock_aggregate(
        tx: &mut Transaction<'_, Postgres>,
        id: &str,
    ) -> RecordsResult<Option<AggregateRow>> {
        let row = sqlx::query_as::<_, AggregateRow>(
            "SELECT * FROM aggregates WHERE aggregate_id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?;
        Ok(row)
    }
}

#[async_trait]
impl RecordStore for PostgresStore {
    async fn migrate(&self) -> RecordsResult<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS pieces (
                link TEXT PRIMARY KEY,
                size_bytes BIGINT NOT NULL,
                group_key TEXT,
                priority INTEGER NOT NULL DEFAULT 0,
                inserted_at TIMESTAMPTZ NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS aggregates (
                aggregate_id TEXT PRIMARY KEY,
                group_key TEXT NOT NULL,
                size_bytes BIGINT NOT NULL DEFAULT 0,
                piece_count BIGINT NOT NULL DEFAULT 0,
                state TEXT NOT NULL,
                commitment_proof TEXT,
                inserted_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS inclusions (
                piece TEXT NOT NULL REFERENCES pieces(link),
                aggregate TEXT REFERENCES aggregates(aggregate_id),
                priority INTEGER NOT NULL DEFAULT 0,
                inserted_at TIMESTAMPTZ NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_inclusions_piece_aggregate
                ON inclusions (piece, COALESCE(aggregate, '0'))",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_inclusions_aggregate ON inclusions (aggregate)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_aggregates_state ON aggregates (state, updated_at)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS deals (
                piece TEXT NOT NULL,
                deal_id BIGINT NOT NULL,
                group_key TEXT NOT NULL,
                provider TEXT,
                inserted_at TIMESTAMPTZ NOT NULL,
                PRIMARY KEY (piece, deal_id)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_deals_piece ON deals (piece)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn health_check(&self) -> RecordsResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl PieceQueueRepo for PostgresStore {
    async fn put_pieces(&self, pieces: &[Piece]) -> RecordsResult<()> {
        if pieces.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;

        for piece in pieces {
            sqlx::query(
                "INSERT INTO pieces (link, size_bytes, group_key, priority, inserted_at)
                 VALUES ($1, $2, $3, $4, $5)
                 ON CONFLICT (link) DO NOTHING",
            )
            .bind(piece.link.to_string())
            .bind(piece.size as i64)
            .bind(piece.group.as_deref())
            .bind(piece.priority)
            .bind(piece.inserted_at)
            .execute(&mut *tx)
            .await
            .map_err(RecordsError::classify)?;

            sqlx::query(
                "INSERT INTO inclusions (piece, aggregate, priority, inserted_at)
                 VALUES ($1, NULL, $2, $3)
                 ON CONFLICT (piece, COALESCE(aggregate, '0')) DO NOTHING",
            )
            .bind(piece.link.to_string())
            .bind(piece.priority)
            .bind(piece.inserted_at)
            .execute(&mut *tx)
            .await
            .map_err(RecordsError::classify)?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn peek_pending(&self, limit: u32) -> RecordsResult<Vec<Inclusion>> {
        let rows = sqlx::query_as::<_, InclusionRow>(
            "SELECT piece, aggregate, priority, inserted_at FROM inclusions
             WHERE aggregate IS NULL
             ORDER BY priority DESC, inserted_at ASC
             LIMIT $1",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(InclusionRow::to_inclusion).collect()
    }

    async fn pending_count(&self) -> RecordsResult<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM inclusions WHERE aggregate IS NULL")
                .fetch_one(&self.pool)
                .await?;
        Ok(count as u64)
    }
}

#[async_trait]
impl AggregateRepo for PostgresStore {
    async fn add(
        &self,
        aggregate_id: AggregateId,
        group: &str,
        pieces: &[PieceInfo],
        max_size: u64,
    ) -> RecordsResult<()> {
        validate_batch(pieces, max_size)?;
        let batch = batch_size(pieces);
        let id = aggregate_id.to_string();
        let now = OffsetDateTime::now_utc();

        let mut tx = self.pool.begin().await?;

        let current_size = match Self::lock_aggregate(&mut tx, &id).await? {
            Some(ref row) => {
                let state = parse_state(row)?;
                if !state.accepts_pieces() {
                    return Err(RecordsError::NotIngesting {
                        aggregate: id,
                        state: row.state.clone(),
                    });
                }
                let current = row.size_bytes as u64;
                if current + batch > max_size {
                    return Err(RecordsError::MaxSizeExceeded {
                        aggregate: id,
                        current_size: current,
                        batch_size: batch,
                        max_size,
                    });
                }
                current
            }
            None => {
                sqlx::query(
                    "INSERT INTO aggregates
                        (aggregate_id, group_key, size_bytes, piece_count, state, inserted_at, updated_at)
                     VALUES ($1, $2, 0, 0, $3, $4, $4)",
                )
                .bind(&id)
                .bind(group)
                .bind(AggregateState::Ingesting.as_str())
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(RecordsError::classify)?;
                0
            }
        };

        let mut applied_size: i64 = 0;
        let mut applied_count: i64 = 0;
        for piece in pieces {
            sqlx::query(
                "INSERT INTO pieces (link, size_bytes, group_key, priority, inserted_at)
                 VALUES ($1, $2, $3, 0, $4)
                 ON CONFLICT (link) DO NOTHING",
            )
            .bind(piece.link.to_string())
            .bind(piece.size as i64)
            .bind(group)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(RecordsError::classify)?;

            // A piece already in this aggregate keeps its pending inclusion
            // (if any) untouched; the insert below then conflicts and the
            // piece is skipped.
            let assigned = sqlx::query(
                "UPDATE inclusions SET aggregate = $1
                 WHERE piece = $2 AND aggregate IS NULL
                   AND NOT EXISTS
                       (SELECT 1 FROM inclusions WHERE piece = $2 AND aggregate = $1)",
            )
            .bind(&id)
            .bind(piece.link.to_string())
            .execute(&mut *tx)
            .await
            .map_err(RecordsError::classify)?;

            let newly_applied = if assigned.rows_affected() > 0 {
                true
            } else {
                let inserted = sqlx::query(
                    "INSERT INTO inclusions (piece, aggregate, priority, inserted_at)
                     VALUES ($1, $2, 0, $3)
                     ON CONFLICT (piece, COALESCE(aggregate, '0')) DO NOTHING",
                )
                .bind(piece.link.to_string())
                .bind(&id)
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(RecordsError::classify)?;
                inserted.rows_affected() > 0
            };

            if newly_applied {
                applied_size += piece.size as i64;
                applied_count += 1;
            }
        }

        let updated = sqlx::query(
            "UPDATE aggregates
             SET size_bytes = size_bytes + $1, piece_count = piece_count + $2, updated_at = $3
             WHERE aggregate_id = $4 AND state = $5 AND size_bytes = $6",
        )
        .bind(applied_size)
        .bind(applied_count)
        .bind(now)
        .bind(&id)
        .bind(AggregateState::Ingesting.as_str())
        .bind(current_size as i64)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(RecordsError::Conflict(format!(
                "aggregate {id} mutated concurrently during add"
            )));
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_aggregate(&self, aggregate_id: AggregateId) -> RecordsResult<Option<Aggregate>> {
        let row = sqlx::query_as::<_, AggregateRow>(
            "SELECT * FROM aggregates WHERE aggregate_id = $1",
        )
        .bind(aggregate_id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| r.to_aggregate()).transpose()
    }

    async fn list_by_state(
        &self,
        state: AggregateState,
        limit: u32,
    ) -> RecordsResult<Vec<Aggregate>> {
        let rows = sqlx::query_as::<_, AggregateRow>(
            "SELECT * FROM aggregates WHERE state = $1 ORDER BY updated_at ASC LIMIT $2",
        )
        .bind(state.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(AggregateRow::to_aggregate).collect()
    }

    async fn set_as_ready(&self, aggregate_id: AggregateId, min_size: u64) -> RecordsResult<()> {
        let id = aggregate_id.to_string();
        let updated = sqlx::query(
            "UPDATE aggregates SET state = $1, updated_at = $2
             WHERE aggregate_id = $3 AND state = $4 AND size_bytes >= $5",
        )
        .bind(AggregateState::Ready.as_str())
        .bind(OffsetDateTime::now_utc())
        .bind(&id)
        .bind(AggregateState::Ingesting.as_str())
        .bind(min_size as i64)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() > 0 {
            return Ok(());
        }
        let aggregate = self.get_aggregate(aggregate_id).await?;
        classify_failed_transition(&id, aggregate, AggregateState::Ready, Some(min_size))
    }

    async fn set_as_deal_pending(&self, aggregate_id: AggregateId) -> RecordsResult<()> {
        let id = aggregate_id.to_string();
        let updated = sqlx::query(
            "UPDATE aggregates SET state = $1, updated_at = $2
             WHERE aggregate_id = $3 AND state = $4",
        )
        .bind(AggregateState::DealPending.as_str())
        .bind(OffsetDateTime::now_utc())
        .bind(&id)
        .bind(AggregateState::Ready.as_str())
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() > 0 {
            return Ok(());
        }
        let aggregate = self.get_aggregate(aggregate_id).await?;
        classify_failed_transition(&id, aggregate, AggregateState::DealPending, None)
    }

    async fn close_aggregate(
        &self,
        aggregate_id: AggregateId,
        proof: &CommitmentProof,
    ) -> RecordsResult<()> {
        let id = aggregate_id.to_string();
        let updated = sqlx::query(
            "UPDATE aggregates SET state = $1, commitment_proof = $2, updated_at = $3
             WHERE aggregate_id = $4 AND state = $5",
        )
        .bind(AggregateState::DealProcessed.as_str())
        .bind(proof.as_str())
        .bind(OffsetDateTime::now_utc())
        .bind(&id)
        .bind(AggregateState::DealPending.as_str())
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() > 0 {
            return Ok(());
        }
        let aggregate = self.get_aggregate(aggregate_id).await?;
        classify_failed_transition(&id, aggregate, AggregateState::DealProcessed, None)
    }
}

#[async_trait]
impl DealRepo for PostgresStore {
    async fn put_deal(&self, record: &DealRecord) -> RecordsResult<()> {
        sqlx::query(
            "INSERT INTO deals (piece, deal_id, group_key, provider, inserted_at)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(record.piece.to_string())
        .bind(record.deal_id as i64)
        .bind(&record.group)
        .bind(record.provider.as_deref())
        .bind(record.inserted_at)
        .execute(&self.pool)
        .await
        .map_err(RecordsError::classify)?;
        Ok(())
    }

    async fn get_deal(&self, key: &DealKey) -> RecordsResult<Option<DealRecord>> {
        let row = sqlx::query_as::<_, DealRow>(
            "SELECT * FROM deals WHERE piece = $1 AND deal_id = $2",
        )
        .bind(key.piece.to_string())
        .bind(key.deal_id as i64)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| r.to_deal()).transpose()
    }

    async fn query_deals_by_piece(&self, piece: &PieceLink) -> RecordsResult<Vec<DealRecord>> {
        let rows = sqlx::query_as::<_, DealRow>(
            "SELECT * FROM deals WHERE piece = $1 ORDER BY deal_id ASC",
        )
        .bind(piece.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(DealRow::to_deal).collect()
    }
}
