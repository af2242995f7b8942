//! Progress ledger persistence in SQLite.
//!
//! One row per identity, keyed by [`Identity::to_key`]. Every `put` is a
//! single committed upsert, so a crash never loses an acknowledged update.
//!
//! `last_seen_id` is stored as decimal TEXT: item ids span the full `u64`
//! range and SQLite integers are signed 64-bit.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use mneme_core::error::AppError;
use mneme_core::{Identity, LedgerEntry};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite, SqlitePool};

const CREATE_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS harvest_ledger (
        identity TEXT PRIMARY KEY NOT NULL,
        processed INTEGER NOT NULL,
        last_seen_id TEXT,
        failed INTEGER NOT NULL,
        error_message TEXT,
        updated_at TEXT NOT NULL
    )
"#;

/// Repository for ledger entries in SQLite.
///
/// # Examples
///
/// ```no_run
/// use mneme_store::LedgerRepository;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let repo = LedgerRepository::open("ledger.db".as_ref()).await?;
/// let ledger = mneme_core::ProgressLedger::load(repo).await?;
/// println!("{} identities recorded", ledger.len());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct LedgerRepository {
    pool: Pool<Sqlite>,
}

impl LedgerRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Opens (creating if needed) the ledger database at `path` and
    /// ensures the schema exists.
    pub async fn open(path: &Path) -> Result<Self, AppError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                AppError::LedgerError(format!("Cannot create '{}': {}", parent.display(), e))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full);

        // A single writer keeps upserts strictly ordered.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(ledger_error)?;

        let repo = Self::new(pool);
        repo.migrate().await?;
        tracing::debug!(path = %path.display(), "Opened ledger database");
        Ok(repo)
    }

    /// Creates the `harvest_ledger` table if it does not exist.
    pub async fn migrate(&self) -> Result<(), AppError> {
        sqlx::query(CREATE_TABLE)
            .execute(&self.pool)
            .await
            .map_err(ledger_error)?;
        Ok(())
    }

    /// Inserts or replaces the entry for `identity`.
    pub async fn upsert(&self, identity: &Identity, entry: &LedgerEntry) -> Result<(), AppError> {
        let last_seen_id = entry.last_seen_id.map(|id| id.to_string());

        sqlx::query(
            r#"
            INSERT INTO harvest_ledger (
                identity,
                processed,
                last_seen_id,
                failed,
                error_message,
                updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT (identity)
            DO UPDATE SET
                processed = EXCLUDED.processed,
                last_seen_id = EXCLUDED.last_seen_id,
                failed = EXCLUDED.failed,
                error_message = EXCLUDED.error_message,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(identity.to_key())
        .bind(entry.processed)
        .bind(last_seen_id)
        .bind(entry.failed)
        .bind(&entry.error_message)
        .bind(entry.updated_at)
        .execute(&self.pool)
        .await
        .map_err(ledger_error)?;

        Ok(())
    }

    /// Returns every entry, keyed by identity.
    pub async fn get_all(&self) -> Result<HashMap<Identity, LedgerEntry>, AppError> {
        let rows: Vec<LedgerRow> = sqlx::query_as(
            r#"
            SELECT identity, processed, last_seen_id, failed, error_message, updated_at
            FROM harvest_ledger
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(ledger_error)?;

        rows.into_iter().map(LedgerRow::into_entry).collect()
    }

    /// Retrieves one entry.
    pub async fn get(&self, identity: &Identity) -> Result<Option<LedgerEntry>, AppError> {
        let row: Option<LedgerRow> = sqlx::query_as(
            r#"
            SELECT identity, processed, last_seen_id, failed, error_message, updated_at
            FROM harvest_ledger
            WHERE identity = ?1
            "#,
        )
        .bind(identity.to_key())
        .fetch_optional(&self.pool)
        .await
        .map_err(ledger_error)?;

        row.map(|r| r.into_entry().map(|(_, entry)| entry))
            .transpose()
    }

    /// Deletes the entry for `identity`. Returns true if a row was deleted.
    pub async fn delete(&self, identity: &Identity) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM harvest_ledger WHERE identity = ?1")
            .bind(identity.to_key())
            .execute(&self.pool)
            .await
            .map_err(ledger_error)?;

        Ok(result.rows_affected() > 0)
    }

    /// Checks that the database answers.
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(ledger_error)?;
        Ok(())
    }
}

fn ledger_error(e: sqlx::Error) -> AppError {
    AppError::LedgerError(e.to_string())
}

#[derive(sqlx::FromRow)]
struct LedgerRow {
    identity: String,
    processed: bool,
    last_seen_id: Option<String>,
    failed: bool,
    error_message: Option<String>,
    updated_at: DateTime<Utc>,
}

impl LedgerRow {
    fn into_entry(self) -> Result<(Identity, LedgerEntry), AppError> {
        let identity = Identity::from_key(&self.identity).map_err(|_| {
            AppError::LedgerError(format!("corrupt identity key '{}'", self.identity))
        })?;
        let last_seen_id = self
            .last_seen_id
            .map(|id| {
                id.parse::<u64>().map_err(|_| {
                    AppError::LedgerError(format!(
                        "corrupt id '{}' stored for {}",
                        id, self.identity
                    ))
                })
            })
            .transpose()?;

        Ok((
            identity,
            LedgerEntry {
                processed: self.processed,
                last_seen_id,
                failed: self.failed,
                error_message: self.error_message,
                updated_at: self.updated_at,
            },
        ))
    }
}

// =============================================================================
// Trait Implementation: LedgerStore
// =============================================================================

impl mneme_core::traits::LedgerStore for LedgerRepository {
    async fn load_all(&self) -> Result<HashMap<Identity, LedgerEntry>, AppError> {
        LedgerRepository::get_all(self).await
    }

    async fn put(&self, identity: &Identity, entry: &LedgerEntry) -> Result<(), AppError> {
        LedgerRepository::upsert(self, identity, entry).await
    }

    async fn remove(&self, identity: &Identity) -> Result<bool, AppError> {
        LedgerRepository::delete(self, identity).await
    }
}
