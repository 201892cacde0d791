//! SQLite-backed [`ScoreStore`].
//!
//! Scores sit in a single `video_hot` table next to the metadata database.
//! SQLite gives us the two primitives the ledger relies on: a single-statement
//! upsert that increments in place (so concurrent writers never lose an
//! update) and an index on `score` for ranked reads. Ties are ordered by
//! `seq`, an `INTEGER PRIMARY KEY` assigned on first insert. The upsert never
//! rewrites it, and unlike an implicit rowid it survives `VACUUM`.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, params};
use tokio::task;

use super::{HotnessEntry, HotnessError, Result, ScoreStore};

/// How long a connection waits on a locked database before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Cloneable handle that opens a short-lived connection per operation so no
/// connection is shared across blocking tasks.
#[derive(Debug, Clone)]
pub struct SqliteScoreStore {
    db_path: PathBuf,
}

impl SqliteScoreStore {
    /// Opens (creating if needed) the score database and its schema.
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating hotness directory {}", parent.display()))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("opening hotness DB {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .context("enabling WAL mode for hotness DB")?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS video_hot (
                seq INTEGER PRIMARY KEY,
                videoid TEXT NOT NULL UNIQUE,
                score INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_video_hot_score ON video_hot(score DESC, seq ASC);
            "#,
        )
        .context("creating hotness schema")?;

        Ok(Self {
            db_path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    async fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db_path = self.db_path.clone();
        task::spawn_blocking(move || {
            let conn = Connection::open(&db_path)?;
            conn.busy_timeout(BUSY_TIMEOUT)?;
            f(&conn)
        })
        .await
        .map_err(|err| HotnessError::StoreUnavailable(format!("task join error: {err}")))?
        .map_err(|err| HotnessError::StoreUnavailable(err.to_string()))
    }
}

#[async_trait]
impl ScoreStore for SqliteScoreStore {
    async fn increment_or_insert(&self, key: &str, delta: i64) -> Result<i64> {
        let key = key.to_owned();
        self.with_connection(move |conn| {
            conn.query_row(
                r#"
                INSERT INTO video_hot (videoid, score) VALUES (?1, ?2)
                ON CONFLICT(videoid) DO UPDATE SET score = CASE
                    WHEN excluded.score > 0
                        AND score > 9223372036854775807 - excluded.score
                        THEN 9223372036854775807
                    WHEN excluded.score < 0
                        AND score < (-9223372036854775807 - 1) - excluded.score
                        THEN (-9223372036854775807 - 1)
                    ELSE score + excluded.score
                END
                RETURNING score
                "#,
                params![key, delta],
                |row| row.get(0),
            )
        })
        .await
    }

    async fn score(&self, key: &str) -> Result<Option<i64>> {
        let key = key.to_owned();
        self.with_connection(move |conn| {
            conn.query_row(
                "SELECT score FROM video_hot WHERE videoid = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
        })
        .await
    }

    async fn range_descending(&self, limit: usize) -> Result<Vec<HotnessEntry>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.with_connection(move |conn| {
            let mut stmt = conn.prepare(
                r#"
                SELECT videoid, score
                FROM video_hot
                ORDER BY score DESC, seq ASC
                LIMIT ?1
                "#,
            )?;
            let rows = stmt.query_map(params![limit], |row| {
                Ok(HotnessEntry {
                    video_id: row.get(0)?,
                    score: row.get(1)?,
                })
            })?;
            let entries = rows.collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(entries)
        })
        .await
    }
}
