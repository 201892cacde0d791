//! Metadata persistence layer.
//!
//! Videos, comments, like/dislike reactions and collections live in one
//! SQLite database. Every engagement write is a single transaction that also
//! keeps the denormalized counters on the `videos` row current, so a video
//! detail read never needs to aggregate.
//!
//! Hotness is deliberately absent from this module: handlers notify the
//! [`HotnessLedger`](crate::hotness::HotnessLedger) after these writes commit.

use std::path::Path;

use anyhow::Context;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_PAGE_SIZE: u32 = 10;
const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("video {0} not found")]
    VideoNotFound(String),
    #[error("comment {0} not found")]
    CommentNotFound(i64),
    #[error("comment {comment_id} does not belong to video {videoid}")]
    CommentVideoMismatch { comment_id: i64, videoid: String },
    #[error("only the author may delete comment {0}")]
    NotCommentAuthor(i64),
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, MetadataError>;

/// Row stored in the `videos` table. The counters are maintained by the
/// engagement writes below, never set by callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoRecord {
    pub videoid: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default)]
    pub like_count: i64,
    #[serde(default)]
    pub dislike_count: i64,
    #[serde(default)]
    pub collect_count: i64,
    #[serde(default)]
    pub comment_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

/// Caller-editable part of a video.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VideoDraft {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub author: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentRecord {
    pub id: i64,
    pub videoid: String,
    pub author: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_posted: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reaction {
    Like,
    Dislike,
}

impl Reaction {
    fn value(self) -> i64 {
        match self {
            Reaction::Like => 1,
            Reaction::Dislike => -1,
        }
    }
}

/// What pressing a reaction button did to the user's stored reaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReactionOutcome {
    /// No previous reaction; this one was stored.
    Added,
    /// The opposite reaction was replaced by this one.
    Switched,
    /// The same reaction was pressed again and has been withdrawn.
    Removed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionSummary {
    pub reaction: Reaction,
    pub outcome: ReactionOutcome,
    pub like_count: i64,
    pub dislike_count: i64,
}

/// 1-based page selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub number: u32,
    pub size: u32,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            number: 1,
            size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl Page {
    /// Clamps out-of-range values instead of rejecting them.
    pub fn new(number: Option<u32>, size: Option<u32>) -> Self {
        Self {
            number: number.unwrap_or(1).max(1),
            size: size.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
        }
    }

    fn offset(&self) -> i64 {
        i64::from(self.number - 1) * i64::from(self.size)
    }

    fn limit(&self) -> i64 {
        i64::from(self.size)
    }
}

/// Wrapper around the SQLite connection that performs read/write operations.
#[derive(Debug)]
pub struct MetadataStore {
    conn: Connection,
}

impl MetadataStore {
    /// Opens (and if necessary creates) the SQLite DB and ensures the expected
    /// schema exists.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating metadata directory {}", parent.display()))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("opening metadata DB {}", path.display()))?;
        Self::from_connection(conn)
    }

    /// Private, throwaway database.
    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory().context("opening in-memory metadata DB")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> anyhow::Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL")
            .context("enabling WAL mode for metadata DB")?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .context("setting metadata DB synchronous mode")?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .context("enabling foreign keys for metadata DB")?;

        let mut store = Self { conn };
        store.ensure_tables().context("creating metadata schema")?;
        Ok(store)
    }

    /// Wrapped in a transaction so a failure leaves the DB untouched.
    fn ensure_tables(&mut self) -> Result<()> {
        let tx = self.conn.transaction()?;

        tx.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS videos (
                videoid TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                author TEXT,
                like_count INTEGER NOT NULL DEFAULT 0,
                dislike_count INTEGER NOT NULL DEFAULT 0,
                collect_count INTEGER NOT NULL DEFAULT 0,
                comment_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT
            );

            CREATE TABLE IF NOT EXISTS comments (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                videoid TEXT NOT NULL,
                author TEXT NOT NULL,
                text TEXT NOT NULL DEFAULT '',
                time_posted TEXT,
                FOREIGN KEY (videoid) REFERENCES videos(videoid) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS reactions (
                userid TEXT NOT NULL,
                videoid TEXT NOT NULL,
                value INTEGER NOT NULL CHECK (value IN (1, -1)),
                reacted_at TEXT,
                PRIMARY KEY (userid, videoid),
                FOREIGN KEY (videoid) REFERENCES videos(videoid) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS collects (
                userid TEXT NOT NULL,
                videoid TEXT NOT NULL,
                collected_at TEXT,
                PRIMARY KEY (userid, videoid),
                FOREIGN KEY (videoid) REFERENCES videos(videoid) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_comments_videoid ON comments(videoid);
            CREATE INDEX IF NOT EXISTS idx_reactions_videoid ON reactions(videoid, value);
            "#,
        )?;

        tx.commit()?;
        Ok(())
    }

    /// Inserts a video or updates its editable fields. Counters and the
    /// creation time of an existing video are kept.
    pub fn upsert_video(&self, videoid: &str, draft: &VideoDraft) -> Result<VideoRecord> {
        self.conn.execute(
            r#"
            INSERT INTO videos (videoid, title, description, author, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(videoid) DO UPDATE SET
                title = excluded.title,
                description = excluded.description,
                author = excluded.author
            "#,
            params![
                videoid,
                draft.title,
                draft.description,
                draft.author,
                now_timestamp(),
            ],
        )?;

        self.get_video(videoid)?
            .ok_or_else(|| MetadataError::VideoNotFound(videoid.to_owned()))
    }

    pub fn get_video(&self, videoid: &str) -> Result<Option<VideoRecord>> {
        let record = self
            .conn
            .query_row(
                r#"
                SELECT videoid, title, description, author, like_count, dislike_count,
                       collect_count, comment_count, created_at
                FROM videos
                WHERE videoid = ?1
                "#,
                params![videoid],
                row_to_video_record,
            )
            .optional()?;
        Ok(record)
    }

    /// Newest uploads first, with the total number of videos.
    pub fn list_videos(&self, page: Page) -> Result<(Vec<VideoRecord>, i64)> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT videoid, title, description, author, like_count, dislike_count,
                   collect_count, comment_count, created_at
            FROM videos
            ORDER BY created_at DESC, rowid DESC
            LIMIT ?1 OFFSET ?2
            "#,
        )?;
        let videos = stmt
            .query_map(params![page.limit(), page.offset()], row_to_video_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let total: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM videos", [], |row| row.get(0))?;
        Ok((videos, total))
    }

    /// Stores a comment and bumps the video's comment counter.
    pub fn add_comment(
        &mut self,
        videoid: &str,
        author: &str,
        text: &str,
    ) -> Result<CommentRecord> {
        let tx = self.conn.transaction()?;
        require_video(&tx, videoid)?;

        let time_posted = now_timestamp();
        tx.execute(
            "INSERT INTO comments (videoid, author, text, time_posted) VALUES (?1, ?2, ?3, ?4)",
            params![videoid, author, text, time_posted],
        )?;
        let id = tx.last_insert_rowid();
        tx.execute(
            "UPDATE videos SET comment_count = comment_count + 1 WHERE videoid = ?1",
            params![videoid],
        )?;
        tx.commit()?;

        Ok(CommentRecord {
            id,
            videoid: videoid.to_owned(),
            author: author.to_owned(),
            text: text.to_owned(),
            time_posted: Some(time_posted),
        })
    }

    /// One page of a video's comments, oldest first, plus the total count.
    pub fn list_comments(&self, videoid: &str, page: Page) -> Result<(Vec<CommentRecord>, i64)> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, videoid, author, text, time_posted
            FROM comments
            WHERE videoid = ?1
            ORDER BY id ASC
            LIMIT ?2 OFFSET ?3
            "#,
        )?;
        let comments = stmt
            .query_map(params![videoid, page.limit(), page.offset()], row_to_comment)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let total: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM comments WHERE videoid = ?1",
            params![videoid],
            |row| row.get(0),
        )?;
        Ok((comments, total))
    }

    /// Deletes a comment on behalf of `user`, who must be its author.
    pub fn delete_comment(&mut self, videoid: &str, comment_id: i64, user: &str) -> Result<()> {
        let tx = self.conn.transaction()?;
        require_video(&tx, videoid)?;

        let (owner_video, author): (String, String) = tx
            .query_row(
                "SELECT videoid, author FROM comments WHERE id = ?1",
                params![comment_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?
            .ok_or(MetadataError::CommentNotFound(comment_id))?;
        if owner_video != videoid {
            return Err(MetadataError::CommentVideoMismatch {
                comment_id,
                videoid: videoid.to_owned(),
            });
        }
        if author != user {
            return Err(MetadataError::NotCommentAuthor(comment_id));
        }

        tx.execute("DELETE FROM comments WHERE id = ?1", params![comment_id])?;
        tx.execute(
            "UPDATE videos SET comment_count = MAX(comment_count - 1, 0) WHERE videoid = ?1",
            params![videoid],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Applies a like/dislike button press. Pressing the current reaction
    /// again withdraws it; pressing the other one switches. Counters are
    /// recomputed from the reaction rows afterwards.
    pub fn react(
        &mut self,
        videoid: &str,
        user: &str,
        reaction: Reaction,
    ) -> Result<ReactionSummary> {
        let tx = self.conn.transaction()?;
        require_video(&tx, videoid)?;

        let current: Option<i64> = tx
            .query_row(
                "SELECT value FROM reactions WHERE userid = ?1 AND videoid = ?2",
                params![user, videoid],
                |row| row.get(0),
            )
            .optional()?;

        let outcome = match current {
            Some(value) if value == reaction.value() => {
                tx.execute(
                    "DELETE FROM reactions WHERE userid = ?1 AND videoid = ?2",
                    params![user, videoid],
                )?;
                ReactionOutcome::Removed
            }
            Some(_) => {
                tx.execute(
                    "UPDATE reactions SET value = ?3, reacted_at = ?4 WHERE userid = ?1 AND videoid = ?2",
                    params![user, videoid, reaction.value(), now_timestamp()],
                )?;
                ReactionOutcome::Switched
            }
            None => {
                tx.execute(
                    "INSERT INTO reactions (userid, videoid, value, reacted_at) VALUES (?1, ?2, ?3, ?4)",
                    params![user, videoid, reaction.value(), now_timestamp()],
                )?;
                ReactionOutcome::Added
            }
        };

        let (like_count, dislike_count): (i64, i64) = tx.query_row(
            r#"
            UPDATE videos SET
                like_count = (SELECT COUNT(*) FROM reactions WHERE videoid = ?1 AND value = 1),
                dislike_count = (SELECT COUNT(*) FROM reactions WHERE videoid = ?1 AND value = -1)
            WHERE videoid = ?1
            RETURNING like_count, dislike_count
            "#,
            params![videoid],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        tx.commit()?;

        Ok(ReactionSummary {
            reaction,
            outcome,
            like_count,
            dislike_count,
        })
    }

    /// Videos `user` currently likes (or dislikes), most recent first.
    pub fn list_reacted(
        &self,
        user: &str,
        reaction: Reaction,
        page: Page,
    ) -> Result<(Vec<VideoRecord>, i64)> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT v.videoid, v.title, v.description, v.author, v.like_count, v.dislike_count,
                   v.collect_count, v.comment_count, v.created_at
            FROM reactions r
            JOIN videos v ON v.videoid = r.videoid
            WHERE r.userid = ?1 AND r.value = ?2
            ORDER BY r.reacted_at DESC, r.rowid DESC
            LIMIT ?3 OFFSET ?4
            "#,
        )?;
        let videos = stmt
            .query_map(
                params![user, reaction.value(), page.limit(), page.offset()],
                row_to_video_record,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let total: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM reactions WHERE userid = ?1 AND value = ?2",
            params![user, reaction.value()],
            |row| row.get(0),
        )?;
        Ok((videos, total))
    }

    /// Adds the video to the user's collection. Returns `false` when it was
    /// already collected, in which case nothing changes.
    pub fn collect(&mut self, videoid: &str, user: &str) -> Result<bool> {
        let tx = self.conn.transaction()?;
        require_video(&tx, videoid)?;

        let inserted = tx.execute(
            "INSERT OR IGNORE INTO collects (userid, videoid, collected_at) VALUES (?1, ?2, ?3)",
            params![user, videoid, now_timestamp()],
        )?;
        if inserted == 0 {
            return Ok(false);
        }
        tx.execute(
            "UPDATE videos SET collect_count = collect_count + 1 WHERE videoid = ?1",
            params![videoid],
        )?;
        tx.commit()?;
        Ok(true)
    }
}

fn require_video(conn: &Connection, videoid: &str) -> Result<()> {
    conn.query_row(
        "SELECT 1 FROM videos WHERE videoid = ?1",
        params![videoid],
        |_| Ok(()),
    )
    .optional()?
    .ok_or_else(|| MetadataError::VideoNotFound(videoid.to_owned()))
}

fn now_timestamp() -> String {
    Utc::now().to_rfc3339()
}

fn row_to_video_record(row: &Row<'_>) -> rusqlite::Result<VideoRecord> {
    Ok(VideoRecord {
        videoid: row.get("videoid")?,
        title: row.get("title")?,
        description: row.get("description")?,
        author: row.get("author")?,
        like_count: row.get("like_count")?,
        dislike_count: row.get("dislike_count")?,
        collect_count: row.get("collect_count")?,
        comment_count: row.get("comment_count")?,
        created_at: row.get("created_at")?,
    })
}

fn row_to_comment(row: &Row<'_>) -> rusqlite::Result<CommentRecord> {
    Ok(CommentRecord {
        id: row.get("id")?,
        videoid: row.get("videoid")?,
        author: row.get("author")?,
        text: row.get("text")?,
        time_posted: row.get("time_posted")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store_with_video(videoid: &str) -> MetadataStore {
        let store = MetadataStore::open_in_memory().unwrap();
        store
            .upsert_video(
                videoid,
                &VideoDraft {
                    title: "First upload".into(),
                    ..VideoDraft::default()
                },
            )
            .unwrap();
        store
    }

    #[test]
    fn upsert_keeps_counters_and_creation_time() {
        let mut store = store_with_video("v1");
        store.collect("v1", "alice").unwrap();
        let before = store.get_video("v1").unwrap().unwrap();

        let updated = store
            .upsert_video(
                "v1",
                &VideoDraft {
                    title: "Renamed".into(),
                    description: "now with words".into(),
                    author: Some("bob".into()),
                },
            )
            .unwrap();
        assert_eq!(updated.title, "Renamed");
        assert_eq!(updated.author.as_deref(), Some("bob"));
        assert_eq!(updated.collect_count, 1);
        assert_eq!(updated.created_at, before.created_at);
    }

    #[test]
    fn videos_are_listed_newest_first() {
        let store = store_with_video("v1");
        store.upsert_video("v2", &VideoDraft::default()).unwrap();
        store.upsert_video("v3", &VideoDraft::default()).unwrap();

        let (videos, total) = store.list_videos(Page::default()).unwrap();
        assert_eq!(total, 3);
        let ids: Vec<_> = videos.iter().map(|video| video.videoid.as_str()).collect();
        assert_eq!(ids, ["v3", "v2", "v1"]);

        let (second, total) = store.list_videos(Page::new(Some(2), Some(2))).unwrap();
        assert_eq!(total, 3);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].videoid, "v1");
    }

    #[test]
    fn missing_video_is_reported() {
        let mut store = MetadataStore::open_in_memory().unwrap();
        assert!(store.get_video("nope").unwrap().is_none());
        assert!(matches!(
            store.add_comment("nope", "alice", "hi"),
            Err(MetadataError::VideoNotFound(id)) if id == "nope"
        ));
        assert!(matches!(
            store.react("nope", "alice", Reaction::Like),
            Err(MetadataError::VideoNotFound(_))
        ));
        assert!(matches!(
            store.collect("nope", "alice"),
            Err(MetadataError::VideoNotFound(_))
        ));
    }

    #[test]
    fn comments_page_and_count() {
        let mut store = store_with_video("v1");
        for i in 0..12 {
            store.add_comment("v1", "alice", &format!("comment {i}")).unwrap();
        }

        let (first, total) = store.list_comments("v1", Page::default()).unwrap();
        assert_eq!(total, 12);
        assert_eq!(first.len(), 10);
        assert_eq!(first[0].text, "comment 0");

        let (second, _) = store.list_comments("v1", Page::new(Some(2), None)).unwrap();
        assert_eq!(second.len(), 2);
        assert_eq!(second[1].text, "comment 11");
        assert_eq!(store.get_video("v1").unwrap().unwrap().comment_count, 12);
    }

    #[test]
    fn only_the_author_deletes_a_comment() {
        let mut store = store_with_video("v1");
        store.upsert_video("v2", &VideoDraft::default()).unwrap();
        let comment = store.add_comment("v1", "alice", "mine").unwrap();

        assert!(matches!(
            store.delete_comment("v1", comment.id, "bob"),
            Err(MetadataError::NotCommentAuthor(_))
        ));
        assert!(matches!(
            store.delete_comment("v2", comment.id, "alice"),
            Err(MetadataError::CommentVideoMismatch { .. })
        ));
        assert!(matches!(
            store.delete_comment("v1", comment.id + 100, "alice"),
            Err(MetadataError::CommentNotFound(_))
        ));

        store.delete_comment("v1", comment.id, "alice").unwrap();
        assert_eq!(store.get_video("v1").unwrap().unwrap().comment_count, 0);
    }

    #[test]
    fn reactions_toggle_and_switch() {
        let mut store = store_with_video("v1");

        let added = store.react("v1", "alice", Reaction::Like).unwrap();
        assert_eq!(added.outcome, ReactionOutcome::Added);
        assert_eq!((added.like_count, added.dislike_count), (1, 0));

        let switched = store.react("v1", "alice", Reaction::Dislike).unwrap();
        assert_eq!(switched.outcome, ReactionOutcome::Switched);
        assert_eq!((switched.like_count, switched.dislike_count), (0, 1));

        let back = store.react("v1", "alice", Reaction::Like).unwrap();
        assert_eq!(back.outcome, ReactionOutcome::Switched);
        assert_eq!((back.like_count, back.dislike_count), (1, 0));

        let removed = store.react("v1", "alice", Reaction::Like).unwrap();
        assert_eq!(removed.outcome, ReactionOutcome::Removed);
        assert_eq!((removed.like_count, removed.dislike_count), (0, 0));
    }

    #[test]
    fn reacted_videos_are_listed_per_user() {
        let mut store = store_with_video("v1");
        store.upsert_video("v2", &VideoDraft::default()).unwrap();
        store.react("v1", "alice", Reaction::Like).unwrap();
        store.react("v2", "alice", Reaction::Dislike).unwrap();
        store.react("v2", "bob", Reaction::Like).unwrap();

        let (liked, total) = store
            .list_reacted("alice", Reaction::Like, Page::default())
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(liked[0].videoid, "v1");

        let (disliked, _) = store
            .list_reacted("alice", Reaction::Dislike, Page::default())
            .unwrap();
        assert_eq!(disliked[0].videoid, "v2");
        assert_eq!(disliked[0].like_count, 1);
    }

    #[test]
    fn collecting_twice_is_refused() {
        let mut store = store_with_video("v1");
        assert!(store.collect("v1", "alice").unwrap());
        assert!(!store.collect("v1", "alice").unwrap());
        assert!(store.collect("v1", "bob").unwrap());
        assert_eq!(store.get_video("v1").unwrap().unwrap().collect_count, 2);
    }

    #[test]
    fn open_creates_parent_directories() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let path = temp.path().join("db").join("metadata.db");
        {
            let store = MetadataStore::open(&path)?;
            store.upsert_video("v1", &VideoDraft::default())?;
        }
        let store = MetadataStore::open(&path)?;
        assert!(store.get_video("v1")?.is_some());
        Ok(())
    }

    #[test]
    fn page_clamps_bad_values() {
        assert_eq!(Page::new(Some(0), Some(0)), Page { number: 1, size: 1 });
        assert_eq!(Page::new(None, Some(1000)).size, MAX_PAGE_SIZE);
    }
}
