//! SQLite storage backend for ChainHook.
//!
//! Persists subscriptions, captured events and delivery attempts to a single
//! SQLite file. Uses `sqlx` with WAL mode for concurrent read performance.
//!
//! # Usage
//! ```rust,no_run
//! use chainhook_storage::sqlite::SqliteStorage;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStorage::open("./chainhook.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStorage::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use chainhook_core::error::HookError;
use chainhook_core::state::{DeliveryStatus, Resolution};
use chainhook_core::store::{AttemptLog, EventStore, SubscriptionStore};
use chainhook_core::types::{
    CapturedEvent, DeliveryAttempt, EventId, EventPayload, OwnerId, Subscription, SubscriptionId,
    SubscriptionStatus,
};

fn storage_err(e: impl std::fmt::Display) -> HookError {
    HookError::Storage(e.to_string())
}

/// SQLite-backed store.
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./chainhook.db"`) or a full
    /// SQLite URL (`"sqlite:./chainhook.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, HookError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url).await.map_err(storage_err)?;
        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Open an in-memory SQLite database.
    ///
    /// Every SQLite connection to `:memory:` is its own database, so the pool
    /// is pinned to one connection that is never recycled.
    pub async fn in_memory() -> Result<Self, HookError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(storage_err)?;

        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Create tables and enable WAL mode.
    async fn init_schema(&self) -> Result<(), HookError> {
        let statements = [
            "PRAGMA journal_mode=WAL;",
            "CREATE TABLE IF NOT EXISTS subscriptions (
                id                   TEXT    PRIMARY KEY,
                owner                TEXT    NOT NULL,
                chain_id             INTEGER NOT NULL,
                contract_address     TEXT    NOT NULL,
                abi                  TEXT    NOT NULL,
                webhook_url          TEXT    NOT NULL,
                event_filters        TEXT    NOT NULL,
                last_processed_block INTEGER NOT NULL,
                status               TEXT    NOT NULL,
                created_at           INTEGER NOT NULL
            );",
            "CREATE INDEX IF NOT EXISTS idx_subscriptions_owner ON subscriptions (owner);",
            "CREATE TABLE IF NOT EXISTS events (
                id              TEXT    PRIMARY KEY,
                subscription_id TEXT    NOT NULL,
                block_number    INTEGER NOT NULL,
                block_hash      TEXT    NOT NULL,
                tx_hash         TEXT    NOT NULL,
                log_index       INTEGER NOT NULL,
                event_name      TEXT    NOT NULL,
                payload         TEXT    NOT NULL,
                status          TEXT    NOT NULL,
                next_retry_at   INTEGER NOT NULL,
                retry_count     INTEGER NOT NULL,
                created_at      INTEGER NOT NULL,
                UNIQUE (subscription_id, tx_hash, log_index)
            );",
            "CREATE INDEX IF NOT EXISTS idx_events_due ON events (status, next_retry_at);",
            "CREATE INDEX IF NOT EXISTS idx_events_subscription ON events (subscription_id, created_at);",
            "CREATE TABLE IF NOT EXISTS delivery_attempts (
                id              TEXT    PRIMARY KEY,
                event_id        TEXT    NOT NULL,
                response_status INTEGER,
                response_body   TEXT,
                success         INTEGER NOT NULL,
                error           TEXT,
                attempted_at    INTEGER NOT NULL
            );",
            "CREATE INDEX IF NOT EXISTS idx_attempts_event ON delivery_attempts (event_id, attempted_at);",
        ];
        for sql in statements {
            sqlx::query(sql).execute(&self.pool).await.map_err(storage_err)?;
        }
        Ok(())
    }

    /// Total number of captured events.
    pub async fn event_count(&self) -> Result<u64, HookError> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM events")
            .fetch_one(&self.pool)
            .await
            .map_err(storage_err)?;
        let cnt: i64 = row.try_get("cnt").map_err(storage_err)?;
        Ok(cnt as u64)
    }
}

// ─── Row mapping ──────────────────────────────────────────────────────────────

fn millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>, HookError> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| HookError::Storage(format!("timestamp out of range: {ms}")))
}

fn parse_uuid(s: &str) -> Result<Uuid, HookError> {
    Uuid::parse_str(s).map_err(storage_err)
}

fn subscription_from_row(row: &SqliteRow) -> Result<Subscription, HookError> {
    let id: String = row.try_get("id").map_err(storage_err)?;
    let abi: String = row.try_get("abi").map_err(storage_err)?;
    let filters: String = row.try_get("event_filters").map_err(storage_err)?;
    let status: String = row.try_get("status").map_err(storage_err)?;
    Ok(Subscription {
        id: SubscriptionId(parse_uuid(&id)?),
        owner: OwnerId(row.try_get("owner").map_err(storage_err)?),
        chain_id: row.try_get::<i64, _>("chain_id").map_err(storage_err)? as u64,
        contract_address: row.try_get("contract_address").map_err(storage_err)?,
        abi: serde_json::from_str(&abi).map_err(storage_err)?,
        webhook_url: row.try_get("webhook_url").map_err(storage_err)?,
        event_filters: serde_json::from_str(&filters).map_err(storage_err)?,
        last_processed_block: row.try_get::<i64, _>("last_processed_block").map_err(storage_err)? as u64,
        status: SubscriptionStatus::parse(&status)?,
        created_at: from_millis(row.try_get("created_at").map_err(storage_err)?)?,
    })
}

fn event_from_row(row: &SqliteRow) -> Result<CapturedEvent, HookError> {
    let id: String = row.try_get("id").map_err(storage_err)?;
    let sub_id: String = row.try_get("subscription_id").map_err(storage_err)?;
    let payload: String = row.try_get("payload").map_err(storage_err)?;
    let status: String = row.try_get("status").map_err(storage_err)?;
    let payload: EventPayload = serde_json::from_str(&payload).map_err(storage_err)?;
    Ok(CapturedEvent {
        id: EventId(parse_uuid(&id)?),
        subscription_id: SubscriptionId(parse_uuid(&sub_id)?),
        block_number: row.try_get::<i64, _>("block_number").map_err(storage_err)? as u64,
        block_hash: row.try_get("block_hash").map_err(storage_err)?,
        tx_hash: row.try_get("tx_hash").map_err(storage_err)?,
        log_index: row.try_get::<i64, _>("log_index").map_err(storage_err)? as u64,
        event_name: row.try_get("event_name").map_err(storage_err)?,
        payload,
        status: DeliveryStatus::parse(&status)?,
        next_retry_at: from_millis(row.try_get("next_retry_at").map_err(storage_err)?)?,
        retry_count: row.try_get::<i64, _>("retry_count").map_err(storage_err)? as u32,
        created_at: from_millis(row.try_get("created_at").map_err(storage_err)?)?,
    })
}

fn attempt_from_row(row: &SqliteRow) -> Result<DeliveryAttempt, HookError> {
    let id: String = row.try_get("id").map_err(storage_err)?;
    let event_id: String = row.try_get("event_id").map_err(storage_err)?;
    let status: Option<i64> = row.try_get("response_status").map_err(storage_err)?;
    Ok(DeliveryAttempt {
        id: parse_uuid(&id)?,
        event_id: EventId(parse_uuid(&event_id)?),
        response_status: status.map(|s| s as u16),
        response_body: row.try_get("response_body").map_err(storage_err)?,
        success: row.try_get::<i64, _>("success").map_err(storage_err)? != 0,
        error: row.try_get("error").map_err(storage_err)?,
        attempted_at: from_millis(row.try_get("attempted_at").map_err(storage_err)?)?,
    })
}

const EVENT_COLUMNS: &str = "e.id, e.subscription_id, e.block_number, e.block_hash, e.tx_hash, \
     e.log_index, e.event_name, e.payload, e.status, e.next_retry_at, e.retry_count, e.created_at";

// ─── SubscriptionStore impl ───────────────────────────────────────────────────

#[async_trait]
impl SubscriptionStore for SqliteStorage {
    async fn insert_subscription(&self, sub: &Subscription) -> Result<(), HookError> {
        let abi = serde_json::to_string(&sub.abi).map_err(storage_err)?;
        let filters = serde_json::to_string(&sub.event_filters).map_err(storage_err)?;
        sqlx::query(
            "INSERT INTO subscriptions
             (id, owner, chain_id, contract_address, abi, webhook_url, event_filters,
              last_processed_block, status, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(sub.id.to_string())
        .bind(sub.owner.as_str())
        .bind(sub.chain_id as i64)
        .bind(&sub.contract_address)
        .bind(&abi)
        .bind(&sub.webhook_url)
        .bind(&filters)
        .bind(sub.last_processed_block as i64)
        .bind(sub.status.as_str())
        .bind(millis(sub.created_at))
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        debug!(subscription = %sub.id, "subscription stored");
        Ok(())
    }

    async fn subscription(&self, id: SubscriptionId) -> Result<Option<Subscription>, HookError> {
        let row = sqlx::query("SELECT * FROM subscriptions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        row.as_ref().map(subscription_from_row).transpose()
    }

    async fn active_subscriptions(&self) -> Result<Vec<Subscription>, HookError> {
        let rows = sqlx::query("SELECT * FROM subscriptions WHERE status = 'active' ORDER BY created_at")
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;
        rows.iter().map(subscription_from_row).collect()
    }

    async fn subscriptions_for_owner(&self, owner: &OwnerId) -> Result<Vec<Subscription>, HookError> {
        let rows = sqlx::query("SELECT * FROM subscriptions WHERE owner = ? ORDER BY created_at DESC")
            .bind(owner.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;
        rows.iter().map(subscription_from_row).collect()
    }

    async fn advance_cursor(&self, id: SubscriptionId, block: u64) -> Result<bool, HookError> {
        let result = sqlx::query(
            "UPDATE subscriptions SET last_processed_block = ?
             WHERE id = ? AND last_processed_block <= ?",
        )
        .bind(block as i64)
        .bind(id.to_string())
        .bind(block as i64)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(result.rows_affected() == 1)
    }

    async fn reset_cursor(&self, id: SubscriptionId, block: u64) -> Result<bool, HookError> {
        let result = sqlx::query("UPDATE subscriptions SET last_processed_block = ? WHERE id = ?")
            .bind(block as i64)
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(result.rows_affected() == 1)
    }

    async fn update_subscription(&self, sub: &Subscription) -> Result<bool, HookError> {
        let filters = serde_json::to_string(&sub.event_filters).map_err(storage_err)?;
        let result = sqlx::query(
            "UPDATE subscriptions SET webhook_url = ?, event_filters = ?, status = ? WHERE id = ?",
        )
        .bind(&sub.webhook_url)
        .bind(&filters)
        .bind(sub.status.as_str())
        .bind(sub.id.to_string())
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_subscription(&self, id: SubscriptionId) -> Result<bool, HookError> {
        let result = sqlx::query("DELETE FROM subscriptions WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(result.rows_affected() == 1)
    }
}

// ─── EventStore impl ──────────────────────────────────────────────────────────

#[async_trait]
impl EventStore for SqliteStorage {
    async fn insert_events(&self, events: &[CapturedEvent]) -> Result<usize, HookError> {
        if events.is_empty() {
            return Ok(0);
        }
        let mut tx = self.pool.begin().await.map_err(storage_err)?;
        let mut inserted = 0usize;
        for ev in events {
            let payload = serde_json::to_string(&ev.payload).map_err(storage_err)?;
            let result = sqlx::query(
                "INSERT OR IGNORE INTO events
                 (id, subscription_id, block_number, block_hash, tx_hash, log_index, event_name,
                  payload, status, next_retry_at, retry_count, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(ev.id.to_string())
            .bind(ev.subscription_id.to_string())
            .bind(ev.block_number as i64)
            .bind(&ev.block_hash)
            .bind(ev.tx_hash.to_ascii_lowercase())
            .bind(ev.log_index as i64)
            .bind(&ev.event_name)
            .bind(&payload)
            .bind(ev.status.as_str())
            .bind(millis(ev.next_retry_at))
            .bind(ev.retry_count as i64)
            .bind(millis(ev.created_at))
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;
            inserted += result.rows_affected() as usize;
        }
        tx.commit().await.map_err(storage_err)?;
        debug!(offered = events.len(), inserted, "events stored");
        Ok(inserted)
    }

    async fn event(&self, id: EventId) -> Result<Option<CapturedEvent>, HookError> {
        let row = sqlx::query(&format!("SELECT {EVENT_COLUMNS} FROM events e WHERE e.id = ?"))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        row.as_ref().map(event_from_row).transpose()
    }

    async fn due_events(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<CapturedEvent>, HookError> {
        let rows = sqlx::query(&format!(
            "SELECT {EVENT_COLUMNS} FROM events e
             JOIN subscriptions s ON s.id = e.subscription_id
             WHERE e.status = 'PENDING' AND e.next_retry_at <= ? AND s.status = 'active'
             ORDER BY e.next_retry_at ASC, e.created_at ASC, e.block_number ASC, e.log_index ASC
             LIMIT ?"
        ))
        .bind(millis(now))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;
        rows.iter().map(event_from_row).collect()
    }

    async fn claim(&self, id: EventId) -> Result<bool, HookError> {
        let result = sqlx::query(
            "UPDATE events SET status = 'PROCESSING' WHERE id = ? AND status = 'PENDING'",
        )
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(result.rows_affected() == 1)
    }

    async fn resolve(&self, id: EventId, resolution: &Resolution) -> Result<bool, HookError> {
        let query = match resolution {
            Resolution::Retry {
                retry_count,
                next_retry_at,
            } => sqlx::query(
                "UPDATE events SET status = ?, retry_count = ?, next_retry_at = ?
                 WHERE id = ? AND status = 'PROCESSING'",
            )
            .bind(resolution.status().as_str())
            .bind(*retry_count as i64)
            .bind(millis(*next_retry_at)),
            Resolution::Delivered | Resolution::Failed | Resolution::Deferred => sqlx::query(
                "UPDATE events SET status = ? WHERE id = ? AND status = 'PROCESSING'",
            )
            .bind(resolution.status().as_str()),
        };
        let result = query
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(result.rows_affected() == 1)
    }

    async fn replay(&self, id: EventId, now: DateTime<Utc>) -> Result<bool, HookError> {
        let result = sqlx::query(
            "UPDATE events SET status = 'PENDING', retry_count = 0, next_retry_at = ? WHERE id = ?",
        )
        .bind(millis(now))
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(result.rows_affected() == 1)
    }

    async fn events_for_subscription(
        &self,
        subscription: SubscriptionId,
        status: Option<DeliveryStatus>,
        limit: usize,
    ) -> Result<Vec<CapturedEvent>, HookError> {
        let rows = sqlx::query(&format!(
            "SELECT {EVENT_COLUMNS} FROM events e
             WHERE e.subscription_id = ? AND (? IS NULL OR e.status = ?)
             ORDER BY e.created_at DESC, e.block_number DESC, e.log_index DESC
             LIMIT ?"
        ))
        .bind(subscription.to_string())
        .bind(status.map(|s| s.as_str()))
        .bind(status.map(|s| s.as_str()))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;
        rows.iter().map(event_from_row).collect()
    }

    async fn requeue_processing(&self) -> Result<Vec<EventId>, HookError> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;
        let rows = sqlx::query("SELECT id FROM events WHERE status = 'PROCESSING'")
            .fetch_all(&mut *tx)
            .await
            .map_err(storage_err)?;
        sqlx::query("UPDATE events SET status = 'PENDING' WHERE status = 'PROCESSING'")
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;
        tx.commit().await.map_err(storage_err)?;

        rows.iter()
            .map(|r| {
                let id: String = r.try_get("id").map_err(storage_err)?;
                Ok(EventId(parse_uuid(&id)?))
            })
            .collect()
    }
}

// ─── AttemptLog impl ──────────────────────────────────────────────────────────

#[async_trait]
impl AttemptLog for SqliteStorage {
    async fn append_attempt(&self, attempt: &DeliveryAttempt) -> Result<(), HookError> {
        sqlx::query(
            "INSERT INTO delivery_attempts
             (id, event_id, response_status, response_body, success, error, attempted_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(attempt.id.to_string())
        .bind(attempt.event_id.to_string())
        .bind(attempt.response_status.map(i64::from))
        .bind(attempt.response_body.as_deref())
        .bind(attempt.success as i64)
        .bind(attempt.error.as_deref())
        .bind(millis(attempt.attempted_at))
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn attempts_for_event(&self, event: EventId) -> Result<Vec<DeliveryAttempt>, HookError> {
        let rows = sqlx::query(
            "SELECT * FROM delivery_attempts WHERE event_id = ?
             ORDER BY attempted_at DESC, rowid DESC",
        )
        .bind(event.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;
        rows.iter().map(attempt_from_row).collect()
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
