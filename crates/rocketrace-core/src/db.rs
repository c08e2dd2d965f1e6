// SQLite persistence for the race session and the cross-tab sync log.

use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::warn;

use crate::replicator::SyncFrame;
use crate::session::SessionState;

/// Rows kept in `sync_log`; older frames are pruned on append.
const SYNC_LOG_RETAIN: i64 = 512;

/// SQLite-backed key-value session store plus an append-only frame log
/// shared by every client process using the same file.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a SQLite database at `path` and ensure all tables
    /// exist. Pass `":memory:"` for an ephemeral in-memory database.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {path}"))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to set database pragmas")?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS session_state (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sync_log (
                seq        INTEGER PRIMARY KEY AUTOINCREMENT,
                namespace  TEXT NOT NULL,
                origin     TEXT NOT NULL,
                payload    TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            );
            ",
        )
        .context("failed to create database schema")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Panics if the mutex is poisoned.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("database mutex poisoned")
    }

    // ------------------------------------------------------------------
    // Key-value state
    // ------------------------------------------------------------------

    pub fn save_state(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        let conn = self.conn();
        let json_str = serde_json::to_string(value).context("failed to serialize state value")?;
        conn.execute(
            "INSERT OR REPLACE INTO session_state (key, value) VALUES (?1, ?2)",
            params![key, json_str],
        )
        .context("failed to save state")?;
        Ok(())
    }

    /// Load a previously saved JSON value by `key`. Returns `None` if the key
    /// does not exist.
    pub fn load_state(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let conn = self.conn();
        let json_str: Option<String> = conn
            .query_row(
                "SELECT value FROM session_state WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .context("failed to query session state")?;

        json_str
            .map(|s| serde_json::from_str(&s).context("failed to deserialize state value"))
            .transpose()
    }

    /// Persist the session snapshot under `namespace`.
    pub fn save_session(&self, namespace: &str, state: &SessionState) -> Result<()> {
        let value = serde_json::to_value(state).context("failed to serialize session")?;
        self.save_state(namespace, &value)
    }

    /// Load the session snapshot under `namespace`. A missing or unreadable
    /// snapshot yields an empty session.
    pub fn load_session(&self, namespace: &str) -> SessionState {
        let value = match self.load_state(namespace) {
            Ok(Some(value)) => value,
            Ok(None) => return SessionState::default(),
            Err(e) => {
                warn!(namespace, "Failed to load saved session, starting fresh: {e:#}");
                return SessionState::default();
            }
        };
        match serde_json::from_value(value) {
            Ok(state) => state,
            Err(e) => {
                warn!(namespace, "Saved session has an unexpected shape, starting fresh: {e}");
                SessionState::default()
            }
        }
    }

    /// Remember the race whose result lookup was given up on, or forget it
    /// with `None`.
    pub fn save_stuck_race(&self, namespace: &str, race_id: Option<&str>) -> Result<()> {
        self.save_state(&stuck_key(namespace), &serde_json::json!(race_id))
    }

    pub fn load_stuck_race(&self, namespace: &str) -> Option<String> {
        match self.load_state(&stuck_key(namespace)) {
            Ok(value) => value.and_then(|v| v.as_str().map(String::from)),
            Err(e) => {
                warn!(namespace, "Failed to load stuck race marker: {e:#}");
                None
            }
        }
    }

    // ------------------------------------------------------------------
    // Sync log
    // ------------------------------------------------------------------

    /// Append a frame and prune everything older than the retention window.
    pub fn append_sync_frame(&self, frame: &SyncFrame) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to begin sync transaction")?;
        tx.execute(
            "INSERT INTO sync_log (namespace, origin, payload) VALUES (?1, ?2, ?3)",
            params![frame.namespace, frame.origin, frame.payload],
        )
        .context("failed to append sync frame")?;
        tx.execute(
            "DELETE FROM sync_log WHERE seq <= (SELECT MAX(seq) FROM sync_log) - ?1",
            params![SYNC_LOG_RETAIN],
        )
        .context("failed to prune sync log")?;
        tx.commit().context("failed to commit sync frame")?;
        Ok(())
    }

    /// Highest sequence number in the log, or 0 when empty.
    pub fn latest_sync_seq(&self) -> Result<i64> {
        let conn = self.conn();
        conn.query_row("SELECT COALESCE(MAX(seq), 0) FROM sync_log", [], |row| row.get(0))
            .context("failed to read latest sync seq")
    }

    /// Frames with `seq > after`, oldest first, at most `limit` of them.
    pub fn read_sync_frames(&self, after: i64, limit: usize) -> Result<Vec<(i64, SyncFrame)>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT seq, namespace, origin, payload FROM sync_log
                 WHERE seq > ?1 ORDER BY seq LIMIT ?2",
            )
            .context("failed to prepare read_sync_frames query")?;

        let rows = stmt
            .query_map(params![after, limit as i64], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    SyncFrame {
                        namespace: row.get(1)?,
                        origin: row.get(2)?,
                        payload: row.get(3)?,
                    },
                ))
            })
            .context("failed to query sync log")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to read sync log row")?;
        Ok(rows)
    }
}

fn stuck_key(namespace: &str) -> String {
    format!("{namespace}:stuck")
}
