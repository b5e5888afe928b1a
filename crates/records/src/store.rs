//! Record store trait and the SQLite implementation.

use crate::error::{RecordsError, RecordsResult};
use crate::models::{AggregateRow, DealRow, InclusionRow};
use crate::repos::{AggregateRepo, DealRepo, PieceQueueRepo};
use async_trait::async_trait;
use barge_core::{
    Aggregate, AggregateId, AggregateState, CommitmentProof, DealKey, DealRecord, Inclusion,
    Piece, PieceInfo, PieceLink, batch_size,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use time::OffsetDateTime;

/// Combined record store trait: the single source of truth for pipeline
/// state. All mutation goes through conditional writes or transactions;
/// callers never cache authoritative state between calls.
#[async_trait]
pub trait RecordStore: PieceQueueRepo + AggregateRepo + DealRepo + Send + Sync {
    /// Create the schema if needed.
    async fn migrate(&self) -> RecordsResult<()>;

    /// Check database connectivity.
    async fn health_check(&self) -> RecordsResult<()>;
}

/// SQLite-based record store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Create a new SQLite store backed by a file.
    pub async fn new(path: impl AsRef<Path>) -> RecordsResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| RecordsError::Config(format!("cannot create {parent:?}: {e}")))?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            // Prevent transient "database is locked" errors under concurrent access.
            .busy_timeout(Duration::from_secs(5));

        Self::with_options(opts).await
    }

    /// Create an in-memory store (testing).
    pub async fn in_memory() -> RecordsResult<Self> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        Self::with_options(opts).await
    }

    async fn with_options(opts: SqliteConnectOptions) -> RecordsResult<Self> {
        let pool = SqlitePoolOptions::new()
            // SQLite permits limited write concurrency; a single connection
            // serializes writers and avoids "database is locked" failures.
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn migrate(&self) -> RecordsResult<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS pieces (
                link TEXT PRIMARY KEY,
                size_bytes INTEGER NOT NULL,
                group_key TEXT,
                priority INTEGER NOT NULL DEFAULT 0,
                inserted_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS aggregates (
                aggregate_id TEXT PRIMARY KEY,
                group_key TEXT NOT NULL,
                size_bytes INTEGER NOT NULL DEFAULT 0,
                piece_count INTEGER NOT NULL DEFAULT 0,
                state TEXT NOT NULL,
                commitment_proof TEXT,
                inserted_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS inclusions (
                piece TEXT NOT NULL REFERENCES pieces(link),
                aggregate TEXT REFERENCES aggregates(aggregate_id),
                priority INTEGER NOT NULL DEFAULT 0,
                inserted_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        // A piece may appear once per aggregate and have at most one
        // pending (unassigned) inclusion.
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
                deal_id INTEGER NOT NULL,
                group_key TEXT NOT NULL,
                provider TEXT,
                inserted_at TEXT NOT NULL,
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
impl PieceQueueRepo for SqliteStore {
    async fn put_pieces(&self, pieces: &[Piece]) -> RecordsResult<()> {
        if pieces.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;

        for piece in pieces {
            sqlx::query(
                "INSERT INTO pieces (link, size_bytes, group_key, priority, inserted_at)
                 VALUES (?, ?, ?, ?, ?)
                 ON CONFLICT(link) DO NOTHING",
            )
            .bind(piece.link.to_string())
            .bind(piece.size as i64)
            .bind(piece.group.as_deref())
            .bind(piece.priority)
            .bind(piece.inserted_at)
            .execute(&mut *tx)
            .await
            .map_err(RecordsError::classify)?;

            // The coalesced uniqueness makes a second pending inclusion for
            // the same piece a no-op.
            sqlx::query(
                "INSERT INTO inclusions (piece, aggregate, priority, inserted_at)
                 VALUES (?, NULL, ?, ?)
                 ON CONFLICT DO NOTHING",
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
             LIMIT ?",
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
impl AggregateRepo for SqliteStore {
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

        let existing = sqlx::query_as::<_, AggregateRow>(
            "SELECT * FROM aggregates WHERE aggregate_id = ?",
        )
        .bind(&id)
        .fetch_optional(&mut *tx)
        .await?;

        let current_size = match existing {
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
                     VALUES (?, ?, 0, 0, ?, ?, ?)",
                )
                .bind(&id)
                .bind(group)
                .bind(AggregateState::Ingesting.as_str())
                .bind(now)
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(RecordsError::classify)?;
                0
            }
        };

        // Assign inclusions first, counting only newly applied pieces, so a
        // redelivered batch never double-counts the running size.
        let mut applied_size: i64 = 0;
        let mut applied_count: i64 = 0;
        for piece in pieces {
            sqlx::query(
                "INSERT INTO pieces (link, size_bytes, group_key, priority, inserted_at)
                 VALUES (?, ?, ?, 0, ?)
                 ON CONFLICT(link) DO NOTHING",
            )
            .bind(piece.link.to_string())
            .bind(piece.size as i64)
            .bind(group)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(RecordsError::classify)?;

            // Consume the pending inclusion if one exists; otherwise create
            // an assigned one. A piece already in this aggregate keeps its
            // pending inclusion (if any) untouched, so it stays routable to
            // a different aggregate; the insert then conflicts and the piece
            // is skipped.
            let assigned = sqlx::query(
                "UPDATE inclusions SET aggregate = ?
                 WHERE piece = ? AND aggregate IS NULL
                   AND NOT EXISTS
                       (SELECT 1 FROM inclusions WHERE piece = ? AND aggregate = ?)",
            )
            .bind(&id)
            .bind(piece.link.to_string())
            .bind(piece.link.to_string())
            .bind(&id)
            .execute(&mut *tx)
            .await
            .map_err(RecordsError::classify)?;

            let newly_applied = if assigned.rows_affected() > 0 {
                true
            } else {
                let inserted = sqlx::query(
                    "INSERT INTO inclusions (piece, aggregate, priority, inserted_at)
                     VALUES (?, ?, 0, ?)
                     ON CONFLICT DO NOTHING",
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

        // Conditional bump guarded by the observed size: correctness comes
        // from this check, not from any pointer being accurate.
        let updated = sqlx::query(
            "UPDATE aggregates
             SET size_bytes = size_bytes + ?, piece_count = piece_count + ?, updated_at = ?
             WHERE aggregate_id = ? AND state = ? AND size_bytes = ?",
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
            "SELECT * FROM aggregates WHERE aggregate_id = ?",
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
            "SELECT * FROM aggregates WHERE state = ? ORDER BY updated_at ASC LIMIT ?",
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
            "UPDATE aggregates SET state = ?, updated_at = ?
             WHERE aggregate_id = ? AND state = ? AND size_bytes >= ?",
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
            "UPDATE aggregates SET state = ?, updated_at = ?
             WHERE aggregate_id = ? AND state = ?",
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
            "UPDATE aggregates SET state = ?, commitment_proof = ?, updated_at = ?
             WHERE aggregate_id = ? AND state = ?",
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
impl DealRepo for SqliteStore {
    async fn put_deal(&self, record: &DealRecord) -> RecordsResult<()> {
        sqlx::query(
            "INSERT INTO deals (piece, deal_id, group_key, provider, inserted_at)
             VALUES (?, ?, ?, ?, ?)",
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
            "SELECT * FROM deals WHERE piece = ? AND deal_id = ?",
        )
        .bind(key.piece.to_string())
        .bind(key.deal_id as i64)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| r.to_deal()).transpose()
    }

    async fn query_deals_by_piece(&self, piece: &PieceLink) -> RecordsResult<Vec<DealRecord>> {
        let rows = sqlx::query_as::<_, DealRow>(
            "SELECT * FROM deals WHERE piece = ? ORDER BY deal_id ASC",
        )
        .bind(piece.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(DealRow::to_deal).collect()
    }
}

/// Reject over-limit batches before touching the database.
pub(crate) fn validate_batch(pieces: &[PieceInfo], max_size: u64) -> RecordsResult<()> {
    if pieces.is_empty() {
        return Err(RecordsError::Validation("empty piece batch".to_string()));
    }
    let batch = batch_size(pieces);
    if batch > max_size {
        return Err(RecordsError::BatchTooLarge {
            batch_size: batch,
            max_size,
        });
    }
    Ok(())
}

pub(crate) fn parse_state(row: &AggregateRow) -> RecordsResult<AggregateState> {
    AggregateState::parse(&row.state).map_err(|e| {
        RecordsError::Internal(format!(
            "corrupt state for aggregate {}: {e}",
            row.aggregate_id
        ))
    })
}

/// Classify why a conditional transition updated zero rows.
///
/// Observing the target state is success: retried and duplicate lifecycle
/// events must be idempotent rather than erroring spuriously. Any state that
/// is neither the required prior nor the target is an out-of-order attempt.
pub(crate) fn classify_failed_transition(
    id: &str,
    aggregate: Option<Aggregate>,
    target: AggregateState,
    min_size: Option<u64>,
) -> RecordsResult<()> {
    let aggregate = match aggregate {
        Some(aggregate) => aggregate,
        None => return Err(RecordsError::NotFound(format!("aggregate {id}"))),
    };

    if aggregate.state == target {
        return Ok(());
    }
    if Some(aggregate.state) == target.required_prior() {
        if let Some(min_size) = min_size {
            if aggregate.size < min_size {
                return Err(RecordsError::MinSizeNotReached {
                    aggregate: id.to_string(),
                    current_size: aggregate.size,
                    min_size,
                });
            }
        }
        // Prior state with its guard met: another writer moved the row
        // between our update and re-read. Retryable.
        return Err(RecordsError::Conflict(format!(
            "aggregate {id} transition to {target} raced; state is {}",
            aggregate.state
        )));
    }
    Err(RecordsError::InvalidStateTransition {
        aggregate: id.to_string(),
        from: aggregate.state.to_string(),
        to: target.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(seed: &[u8], size: u64) -> PieceInfo {
        PieceInfo::new(PieceLink::compute(seed), size)
    }

    #[test]
    fn test_validate_batch() {
        assert!(matches!(
            validate_batch(&[], 100),
            Err(RecordsError::Validation(_))
        ));
        assert!(matches!(
            validate_batch(&[info(b"a", 101)], 100),
            Err(RecordsError::BatchTooLarge { .. })
        ));
        assert!(validate_batch(&[info(b"a", 100)], 100).is_ok());
    }

    fn aggregate_in(state: AggregateState) -> Aggregate {
        let now = OffsetDateTime::now_utc();
        Aggregate {
            aggregate_id: AggregateId::new(),
            group: "g".to_string(),
            size: 10,
            piece_count: 1,
            state,
            commitment_proof: None,
            inserted_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_classify_transition_idempotent_on_target() {
        let aggregate = aggregate_in(AggregateState::Ready);
        assert!(
            classify_failed_transition("a", Some(aggregate), AggregateState::Ready, Some(5))
                .is_ok()
        );
    }

    #[test]
    fn test_classify_transition_out_of_order() {
        let aggregate = aggregate_in(AggregateState::Ingesting);
        assert!(matches!(
            classify_failed_transition("a", Some(aggregate), AggregateState::DealProcessed, None),
            Err(RecordsError::InvalidStateTransition { .. })
        ));
    }

    #[test]
    fn test_classify_transition_missing_row() {
        assert!(matches!(
            classify_failed_transition("a", None, AggregateState::Ready, Some(5)),
            Err(RecordsError::NotFound(_))
        ));
    }
}
