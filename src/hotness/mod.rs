//! Video hotness ledger.
//!
//! Every engagement with a video (watching it, liking it, collecting it or
//! commenting on it) adds a fixed weight to that video's score. The scores live
//! in a [`ScoreStore`], an ordered key/score index injected at construction so
//! the server can keep them in SQLite while tests run against memory.
//!
//! The ledger is a derived index: it is updated after the primary metadata
//! write succeeds and never takes part in that write's transaction. Scores only
//! ever grow; there is no undo for an engagement.

pub mod memory;
pub mod sqlite;

use std::{fmt, future::Future, str::FromStr, sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

pub use memory::MemoryScoreStore;
pub use sqlite::SqliteScoreStore;

/// Number of entries returned by a rank query when the caller gives no limit.
pub const DEFAULT_RANK_LIMIT: i64 = 10;
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum HotnessError {
    #[error("unknown engagement event type `{0}`")]
    InvalidEventType(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("score store unavailable: {0}")]
    StoreUnavailable(String),
}

pub type Result<T> = std::result::Result<T, HotnessError>;

/// A user action that contributes to a video's hotness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngagementEvent {
    Watch,
    Like,
    Collect,
    Comment,
}

impl EngagementEvent {
    pub const ALL: [EngagementEvent; 4] = [
        EngagementEvent::Watch,
        EngagementEvent::Like,
        EngagementEvent::Collect,
        EngagementEvent::Comment,
    ];

    /// Score added to the video for one occurrence of this event.
    pub const fn weight(self) -> i64 {
        match self {
            EngagementEvent::Watch => 1,
            EngagementEvent::Like => 2,
            EngagementEvent::Collect | EngagementEvent::Comment => 3,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            EngagementEvent::Watch => "watch",
            EngagementEvent::Like => "like",
            EngagementEvent::Collect => "collect",
            EngagementEvent::Comment => "comment",
        }
    }
}

impl fmt::Display for EngagementEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngagementEvent {
    type Err = HotnessError;

    fn from_str(value: &str) -> Result<Self> {
        EngagementEvent::ALL
            .into_iter()
            .find(|event| event.as_str() == value)
            .ok_or_else(|| HotnessError::InvalidEventType(value.to_owned()))
    }
}

/// One row of the ranking, serialized as `{"videoId": .., "hot": ..}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HotnessEntry {
    #[serde(rename = "videoId")]
    pub video_id: String,
    #[serde(rename = "hot")]
    pub score: i64,
}

impl HotnessEntry {
    pub fn new(video_id: impl Into<String>, score: i64) -> Self {
        Self {
            video_id: video_id.into(),
            score,
        }
    }
}

/// Ordered key/score index backing the ledger.
///
/// Implementations must apply `increment_or_insert` atomically per key so two
/// racing events for the same video never lose an update, and must order equal
/// scores by the time the key was first inserted.
#[async_trait]
pub trait ScoreStore: Send + Sync + fmt::Debug {
    /// Adds `delta` to the score under `key`, creating the entry with `delta`
    /// as its score when the key is new. Returns the updated score. The score
    /// saturates at `i64::MIN` and `i64::MAX` instead of wrapping.
    async fn increment_or_insert(&self, key: &str, delta: i64) -> Result<i64>;

    async fn score(&self, key: &str) -> Result<Option<i64>>;

    /// Up to `limit` entries, highest score first.
    async fn range_descending(&self, limit: usize) -> Result<Vec<HotnessEntry>>;
}

/// Popularity ranking of videos fed by engagement events.
#[derive(Debug, Clone)]
pub struct HotnessLedger {
    store: Arc<dyn ScoreStore>,
    timeout: Duration,
}

impl HotnessLedger {
    pub fn new(store: Arc<dyn ScoreStore>) -> Self {
        Self::with_timeout(store, DEFAULT_STORE_TIMEOUT)
    }

    /// Every store round-trip is bounded by `timeout`; an expired call is
    /// reported as [`HotnessError::StoreUnavailable`].
    pub fn with_timeout(store: Arc<dyn ScoreStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Adds the weight of `event` to the score of `video_id` and returns the
    /// new score. Not idempotent: each call counts.
    pub async fn record(&self, video_id: &str, event: EngagementEvent) -> Result<i64> {
        let key = validate_video_id(video_id)?;
        let score = self
            .bounded(self.store.increment_or_insert(key, event.weight()))
            .await?;
        debug!(video_id = key, %event, score, "recorded engagement");
        Ok(score)
    }

    /// Like [`HotnessLedger::record`], taking the event by its wire name.
    pub async fn record_event(&self, video_id: &str, event_type: &str) -> Result<i64> {
        let event = event_type.parse()?;
        self.record(video_id, event).await
    }

    /// Records `event` and swallows any failure after logging it. Engagement
    /// handlers call this once their own write has committed; a hotness
    /// failure must not fail the user's action.
    pub async fn record_best_effort(&self, video_id: &str, event: EngagementEvent) {
        if let Err(err) = self.record(video_id, event).await {
            warn!(video_id, %event, error = %err, "hotness update failed");
        }
    }

    /// Current score of `video_id`, or `None` when nothing was ever recorded
    /// for it.
    pub async fn get_score(&self, video_id: &str) -> Result<Option<i64>> {
        let key = validate_video_id(video_id)?;
        self.bounded(self.store.score(key)).await
    }

    /// The `k` hottest videos, highest score first. Equal scores keep the
    /// order in which the videos first received an event.
    pub async fn get_top_k(&self, k: i64) -> Result<Vec<HotnessEntry>> {
        let limit = usize::try_from(k).map_err(|_| {
            HotnessError::InvalidArgument(format!("rank limit must not be negative, got {k}"))
        })?;
        if limit == 0 {
            return Ok(Vec::new());
        }
        self.bounded(self.store.range_descending(limit)).await
    }

    async fn bounded<T>(&self, op: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.timeout, op).await {
            Ok(result) => result,
            Err(_) => Err(HotnessError::StoreUnavailable(format!(
                "no response within {:?}",
                self.timeout
            ))),
        }
    }
}

fn validate_video_id(video_id: &str) -> Result<&str> {
    if video_id.trim().is_empty() {
        return Err(HotnessError::InvalidArgument(
            "video id must not be empty".to_owned(),
        ));
    }
    Ok(video_id)
}
