pub mod lottery_store;
pub mod registry;
pub mod winner_store;

pub use lottery_store::{DrawSnapshot, LotteryStore};
pub use registry::ParticipationRegistry;
pub use winner_store::WinnerStore;

use crate::error::{Result, TombolaError};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use std::path::Path;
use tokio::sync::Mutex;

pub struct Storage {
    conn: Mutex<Connection>,
}

impl Storage {
    pub async fn new(db_path: &Path) -> Result<Self> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                TombolaError::internal(format!("Failed to create directory: {}", e))
            })?;
        }

        let conn = Connection::open(db_path)?;
        Self::from_connection(conn).await
    }

    pub async fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn).await
    }

    async fn from_connection(conn: Connection) -> Result<Self> {
        let storage = Self {
            conn: Mutex::new(conn),
        };

        storage.init_schema().await?;
        Ok(storage)
    }

    async fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().await;

        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS lotteries (
                id TEXT PRIMARY KEY,
                owner_id INTEGER NOT NULL,
                topic_id INTEGER,
                title TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                prize TEXT NOT NULL DEFAULT '',
                winner_count INTEGER NOT NULL CHECK (winner_count > 0),
                min_participants INTEGER NOT NULL CHECK (min_participants > 0),
                draw_strategy TEXT NOT NULL
                    CHECK (draw_strategy IN ('random', 'specific_posts')),
                insufficient_strategy TEXT NOT NULL
                    CHECK (insufficient_strategy IN ('cancel', 'proceed')),
                specific_post_numbers TEXT NOT NULL DEFAULT '[]',
                end_time INTEGER NOT NULL,
                status TEXT NOT NULL
                    CHECK (status IN ('active', 'drawing', 'completed', 'cancelled')),
                participant_count INTEGER NOT NULL DEFAULT 0 CHECK (participant_count >= 0),
                drawn_at INTEGER,
                draw_seed INTEGER,
                verification_record TEXT,
                cancel_reason TEXT,
                winners_notified_at INTEGER,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                CHECK (winner_count <= min_participants),
                CHECK ((draw_seed IS NULL) = (verification_record IS NULL))
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS lottery_participants (
                lottery_id TEXT NOT NULL,
                user_id INTEGER NOT NULL,
                joined_at INTEGER NOT NULL,
                FOREIGN KEY (lottery_id) REFERENCES lotteries(id) ON DELETE CASCADE,
                PRIMARY KEY (lottery_id, user_id)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS lottery_winners (
                lottery_id TEXT NOT NULL,
                user_id INTEGER NOT NULL,
                position INTEGER NOT NULL CHECK (position > 0),
                drawn_at INTEGER NOT NULL,
                verification_hash TEXT NOT NULL,
                FOREIGN KEY (lottery_id) REFERENCES lotteries(id) ON DELETE CASCADE,
                PRIMARY KEY (lottery_id, position),
                UNIQUE (lottery_id, user_id)
            )",
            [],
        )?;

        // Scheduler sweep and cleanup lookups
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_lotteries_status_end_time
             ON lotteries (status, end_time)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_lotteries_status_created_at
             ON lotteries (status, created_at)",
            [],
        )?;

        Ok(())
    }

    pub async fn get_connection(&self) -> tokio::sync::MutexGuard<'_, Connection> {
        self.conn.lock().await
    }
}

pub(crate) fn timestamp_column(
    secs: i64,
    idx: usize,
    column: &str,
) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0).ok_or_else(|| {
        rusqlite::Error::InvalidColumnType(idx, column.to_string(), rusqlite::types::Type::Integer)
    })
}

pub(crate) fn text_column<T: std::str::FromStr>(
    value: &str,
    idx: usize,
    column: &str,
) -> rusqlite::Result<T> {
    value.parse::<T>().map_err(|_| {
        rusqlite::Error::InvalidColumnType(idx, column.to_string(), rusqlite::types::Type::Text)
    })
}

pub(crate) fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}
