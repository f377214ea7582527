//! PostgreSQL tracker store implementation
//!
//! Expected tables:
//!
//! - `position_trackers(id bigint, segment text, security_id text, symbol text,
//!   side text, order_no text, entry_price float8, quantity bigint, paper bool,
//!   status text, entry_at timestamptz, last_pnl_rupees float8,
//!   last_pnl_pct float8, high_water_mark_pnl float8, meta jsonb,
//!   updated_at timestamptz)`
//! - `watchlist_items(segment text, security_id text, active bool)`

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::info;

use common::{InstrumentKey, TrackerId, TrackerSnapshot, WatchlistEntry};

use super::traits::{PnlWriteback, SyncOutcome, TrackerStatus, TrackerStore};
use crate::StorageResult;

/// PostgreSQL tracker store
#[derive(Clone)]
pub struct PostgresTrackerStore {
    pool: PgPool,
}

impl PostgresTrackerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool from the database section of the config
    pub async fn connect(config: &config::DatabaseConfig) -> StorageResult<Self> {
        info!(max_connections = config.max_connections, "Connecting to PostgreSQL");
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await?;
        Ok(Self::new(pool))
    }

    fn row_to_snapshot(row: &PgRow) -> StorageResult<TrackerSnapshot> {
        let segment: String = row.try_get("segment")?;
        let security_id: String = row.try_get("security_id")?;

        Ok(TrackerSnapshot {
            id: TrackerId(row.try_get("id")?),
            instrument: InstrumentKey::new(segment, security_id),
            entry_price: row.try_get::<Option<f64>, _>("entry_price")?.unwrap_or(0.0),
            quantity: row.try_get::<Option<i64>, _>("quantity")?.unwrap_or(0),
            symbol: row.try_get("symbol")?,
            side: row.try_get("side")?,
            order_no: row.try_get("order_no")?,
            paper: row.try_get::<Option<bool>, _>("paper")?.unwrap_or(false),
            entry_at: row.try_get("entry_at")?,
        })
    }
}

#[async_trait]
impl TrackerStore for PostgresTrackerStore {
    async fn active_trackers(&self) -> StorageResult<Vec<TrackerSnapshot>> {
        let rows = sqlx::query(
            r#"
            SELECT id, segment, security_id, symbol, side, order_no,
                   entry_price, quantity, paper, entry_at
            FROM position_trackers
            WHERE status = 'active'
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_snapshot).collect()
    }

    async fn tracker_status(&self, id: TrackerId) -> StorageResult<Option<TrackerStatus>> {
        let row = sqlx::query("SELECT status FROM position_trackers WHERE id = $1")
            .bind(id.as_i64())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let status: String = row.try_get("status")?;
                Ok(TrackerStatus::parse(&status))
            }
            None => Ok(None),
        }
    }

    async fn apply_pnl(&self, id: TrackerId, writeback: &PnlWriteback) -> StorageResult<SyncOutcome> {
        // Status check and write in one statement so an exit racing the
        // write-back cannot be overwritten
        let result = sqlx::query(
            r#"
            UPDATE position_trackers SET
                last_pnl_rupees = $2,
                last_pnl_pct = $3,
                high_water_mark_pnl = $4,
                meta = COALESCE(meta, '{}'::jsonb) || $5,
                updated_at = NOW()
            WHERE id = $1 AND status = 'active'
            "#,
        )
        .bind(id.as_i64())
        .bind(writeback.last_pnl_rupees)
        .bind(writeback.last_pnl_pct)
        .bind(writeback.high_water_mark_pnl)
        .bind(&writeback.meta)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(SyncOutcome::Applied);
        }

        Ok(match self.tracker_status(id).await? {
            Some(_) => SyncOutcome::SkippedInactive,
            None => SyncOutcome::NotFound,
        })
    }

    async fn active_watchlist(&self) -> StorageResult<Vec<WatchlistEntry>> {
        let rows = sqlx::query(
            "SELECT segment, security_id FROM watchlist_items WHERE active = TRUE ORDER BY segment, security_id",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in &rows {
            let segment: String = row.try_get("segment")?;
            let security_id: String = row.try_get("security_id")?;
            if let Ok(entry) = WatchlistEntry::try_new(segment, security_id) {
                entries.push(entry);
            }
        }
        Ok(entries)
    }
}
