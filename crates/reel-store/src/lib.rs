#![forbid(unsafe_code)]

//! Durable projection of streaming sessions.
//!
//! One row per content hash, stored in SQLite with WAL journaling and
//! `synchronous=FULL`, so an awaited write is on disk before the registry
//! reports the transition. Rows that fail to decode are skipped with a
//! warning at load time instead of aborting startup.

mod error;

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reel_events::SessionState;
use reel_torrent_core::{ContentDescriptor, InfoHash, SelectedFile};
use sqlx::Row;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
    SqliteSynchronous,
};
use tracing::{debug, warn};

pub use error::{StoreError, StoreResult};

const MAX_CONNECTIONS: u32 = 4;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const UPSERT_SESSION_SQL: &str = r"
    INSERT INTO sessions (
        hash,
        descriptor,
        title,
        selected_file,
        storage_path,
        state,
        state_message,
        created_at,
        updated_at
    )
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
    ON CONFLICT (hash) DO UPDATE
    SET
        descriptor = EXCLUDED.descriptor,
        title = EXCLUDED.title,
        selected_file = EXCLUDED.selected_file,
        storage_path = EXCLUDED.storage_path,
        state = EXCLUDED.state,
        state_message = EXCLUDED.state_message,
        updated_at = EXCLUDED.updated_at
";

const DELETE_SESSION_SQL: &str = r"
    DELETE FROM sessions
    WHERE hash = ?1
";

const SELECT_SESSIONS_SQL: &str = r"
    SELECT
        hash,
        descriptor,
        title,
        selected_file,
        storage_path,
        state,
        state_message,
        created_at
    FROM sessions
    WHERE state <> 'deleted'
    ORDER BY created_at
";

/// Persisted fields of one session.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredSession {
    pub hash: InfoHash,
    pub descriptor: ContentDescriptor,
    pub selected_file: Option<SelectedFile>,
    pub storage_path: PathBuf,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
}

/// Durable key-value projection keyed by content hash.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert or replace the row for `session.hash`; returns once durable.
    async fn upsert(&self, session: &StoredSession) -> StoreResult<()>;

    /// Remove the row for `hash`. Missing rows are not an error.
    async fn remove(&self, hash: &InfoHash) -> StoreResult<()>;

    /// Every decodable, non-deleted row.
    async fn load_all(&self) -> StoreResult<Vec<StoredSession>>;
}

/// SQLite-backed [`SessionStore`].
#[derive(Clone)]
pub struct SqliteSessionStore {
    pool: SqlitePool,
}

impl SqliteSessionStore {
    /// Open (creating if missing) the database at `path` and apply migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or migrations fail.
    pub async fn open(path: &Path) -> StoreResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await
            .map_err(|source| StoreError::Connect {
                path: path.to_path_buf(),
                source,
            })?;
        Self::with_pool(pool).await
    }

    /// Wrap an existing pool, applying migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if migrations fail.
    pub async fn with_pool(pool: SqlitePool) -> StoreResult<Self> {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|source| StoreError::Migrate { source })?;
        Ok(Self { pool })
    }

    /// Access the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn upsert(&self, session: &StoredSession) -> StoreResult<()> {
        let selected_file = session
            .selected_file
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|source| StoreError::Encode {
                field: "selected_file",
                source,
            })?;
        let storage_path = session
            .storage_path
            .to_str()
            .ok_or_else(|| StoreError::NonUtf8Path {
                path: session.storage_path.clone(),
            })?;
        let (state_label, state_message) = serialize_state(&session.state);

        sqlx::query(UPSERT_SESSION_SQL)
            .bind(session.hash.as_str())
            .bind(session.descriptor.uri.as_str())
            .bind(session.descriptor.title.as_str())
            .bind(selected_file)
            .bind(storage_path)
            .bind(state_label)
            .bind(state_message)
            .bind(session.created_at.to_rfc3339())
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(|source| StoreError::Query {
                operation: "upsert_session",
                source,
            })?;

        debug!(hash = %session.hash, state = state_label, "session row persisted");
        Ok(())
    }

    async fn remove(&self, hash: &InfoHash) -> StoreResult<()> {
        sqlx::query(DELETE_SESSION_SQL)
            .bind(hash.as_str())
            .execute(&self.pool)
            .await
            .map_err(|source| StoreError::Query {
                operation: "remove_session",
                source,
            })?;
        Ok(())
    }

    async fn load_all(&self) -> StoreResult<Vec<StoredSession>> {
        let rows = sqlx::query(SELECT_SESSIONS_SQL)
            .fetch_all(&self.pool)
            .await
            .map_err(|source| StoreError::Query {
                operation: "load_sessions",
                source,
            })?;

        let mut sessions = Vec::with_capacity(rows.len());
        for row in rows {
            match decode_row(&row) {
                Ok(session) => sessions.push(session),
                Err(reason) => {
                    let hash: Option<String> = row.try_get("hash").ok();
                    warn!(hash = ?hash, reason, "skipping malformed session row");
                }
            }
        }
        Ok(sessions)
    }
}

fn decode_row(row: &SqliteRow) -> Result<StoredSession, &'static str> {
    let text = |column: &'static str| -> Result<String, &'static str> {
        row.try_get::<Option<String>, _>(column)
            .ok()
            .flatten()
            .ok_or(column)
    };

    let hash = InfoHash::from_str(&text("hash")?).map_err(|_| "hash")?;
    let descriptor = ContentDescriptor::new(text("descriptor")?, text("title")?);
    descriptor.parse().map_err(|_| "descriptor")?;

    let selected_file = match row.try_get::<Option<String>, _>("selected_file") {
        Ok(Some(raw)) => Some(
            serde_json::from_str::<SelectedFile>(&raw).map_err(|_| "selected_file")?,
        ),
        Ok(None) => None,
        Err(_) => return Err("selected_file"),
    };
    let state_message: Option<String> = row.try_get("state_message").map_err(|_| "state_message")?;
    let state = deserialize_state(&text("state")?, state_message).ok_or("state")?;
    let created_at = DateTime::parse_from_rfc3339(&text("created_at")?)
        .map_err(|_| "created_at")?
        .with_timezone(&Utc);

    Ok(StoredSession {
        hash,
        descriptor,
        selected_file,
        storage_path: PathBuf::from(text("storage_path")?),
        state,
        created_at,
    })
}

fn serialize_state(state: &SessionState) -> (&'static str, Option<&str>) {
    match state {
        SessionState::Failed { message } => ("failed", Some(message.as_str())),
        other => (other.label(), None),
    }
}

fn deserialize_state(label: &str, message: Option<String>) -> Option<SessionState> {
    Some(match label {
        "pending" => SessionState::Pending,
        "downloading" => SessionState::Downloading,
        "paused" => SessionState::Paused,
        "completed" => SessionState::Completed,
        "deleted" => SessionState::Deleted,
        "failed" => SessionState::Failed {
            message: message.unwrap_or_default(),
        },
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_labels_round_trip() {
        for state in [
            SessionState::Pending,
            SessionState::Downloading,
            SessionState::Paused,
            SessionState::Completed,
            SessionState::Failed {
                message: "no peers".into(),
            },
        ] {
            let (label, message) = serialize_state(&state);
            assert_eq!(
                deserialize_state(label, message.map(str::to_string)),
                Some(state)
            );
        }
        assert_eq!(deserialize_state("seeding", None), None);
    }
}
