//! HTTP surface of the backend.
//!
//! Engagement handlers (video detail, comment, like, collect) write to the
//! metadata store first and only then feed the hotness ledger. A ledger
//! failure is logged and never changes the response of the primary action.
//!
//! Authentication happens upstream: the token service in front of this API
//! verifies the session and forwards the caller's id in [`USER_HEADER`].

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{FromRequestParts, Path, Query, State},
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task;
use tracing::error;

use crate::{
    hotness::{DEFAULT_RANK_LIMIT, EngagementEvent, HotnessEntry, HotnessError, HotnessLedger},
    metadata::{
        CommentRecord, MetadataError, MetadataStore, Page, Reaction, ReactionSummary,
        VideoDraft, VideoRecord,
    },
};

pub const USER_HEADER: &str = "x-user-id";

#[derive(Clone)]
pub struct AppState {
    metadata: Arc<Mutex<MetadataStore>>,
    ledger: HotnessLedger,
}

impl AppState {
    pub fn new(metadata: MetadataStore, ledger: HotnessLedger) -> Self {
        Self {
            metadata: Arc::new(Mutex::new(metadata)),
            ledger,
        }
    }

    pub fn ledger(&self) -> &HotnessLedger {
        &self.ledger
    }

    /// Runs a metadata operation on the blocking pool.
    async fn with_metadata<F, T>(&self, f: F) -> ApiResult<T>
    where
        F: FnOnce(&mut MetadataStore) -> Result<T, MetadataError> + Send + 'static,
        T: Send + 'static,
    {
        let metadata = self.metadata.clone();
        task::spawn_blocking(move || f(&mut metadata.lock()))
            .await
            .map_err(|err| ApiError::internal(format!("task join error: {err}")))?
            .map_err(ApiError::from)
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/videos", get(list_videos))
        .route("/api/videos/{id}", get(get_video).put(put_video))
        .route(
            "/api/videos/{id}/comments",
            get(list_comments).post(post_comment),
        )
        .route(
            "/api/videos/{id}/comments/{comment_id}",
            delete(delete_comment),
        )
        .route("/api/videos/{id}/like", post(like_video))
        .route("/api/videos/{id}/dislike", post(dislike_video))
        .route("/api/videos/{id}/collect", post(collect_video))
        .route("/api/videos/{id}/hot", get(get_video_hot))
        .route("/api/hot-rank", get(get_hot_rank))
        .route("/api/me/likes", get(list_my_likes))
        .route("/api/me/dislikes", get(list_my_dislikes))
        .with_state(state)
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl From<MetadataError> for ApiError {
    fn from(err: MetadataError) -> Self {
        match err {
            MetadataError::VideoNotFound(_) | MetadataError::CommentNotFound(_) => {
                Self::not_found(err.to_string())
            }
            MetadataError::CommentVideoMismatch { .. } | MetadataError::NotCommentAuthor(_) => {
                Self::new(StatusCode::FORBIDDEN, err.to_string())
            }
            MetadataError::Sqlite(_) => {
                error!(error = %err, "metadata query failed");
                Self::internal("metadata store error")
            }
        }
    }
}

impl From<HotnessError> for ApiError {
    fn from(err: HotnessError) -> Self {
        match err {
            HotnessError::InvalidEventType(_) | HotnessError::InvalidArgument(_) => {
                Self::bad_request(err.to_string())
            }
            HotnessError::StoreUnavailable(_) => {
                error!(error = %err, "hotness read failed");
                Self::new(StatusCode::SERVICE_UNAVAILABLE, err.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.message,
        });
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Caller identity forwarded by the token service.
#[derive(Debug, Clone)]
pub struct UserId(pub String);

impl<S> FromRequestParts<S> for UserId
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(|value| UserId(value.to_owned()))
            .ok_or_else(|| ApiError::new(StatusCode::UNAUTHORIZED, "missing user identity"))
    }
}

#[derive(Debug, Default, Deserialize)]
struct PageQuery {
    page: Option<u32>,
    page_size: Option<u32>,
}

impl PageQuery {
    fn page(&self) -> Page {
        Page::new(self.page, self.page_size)
    }
}

#[derive(Debug, Default, Deserialize)]
struct RankQuery {
    limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct NewComment {
    text: String,
}

#[derive(Debug, Serialize)]
struct CommentPage {
    comments: Vec<CommentRecord>,
    total: i64,
}

#[derive(Debug, Serialize)]
struct VideoPage {
    videos: Vec<VideoRecord>,
    total: i64,
}

#[derive(Debug, Serialize)]
struct VideoHot {
    #[serde(rename = "videoId")]
    video_id: String,
    hot: Option<i64>,
}

#[derive(Debug, Serialize)]
struct CollectResponse {
    collected: bool,
}

async fn list_videos(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<VideoPage>> {
    let page = query.page();
    let (videos, total) = state
        .with_metadata(move |store| store.list_videos(page))
        .await?;
    Ok(Json(VideoPage { videos, total }))
}

async fn get_video(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<VideoRecord>> {
    let record = state
        .with_metadata({
            let id = id.clone();
            move |store| store.get_video(&id)
        })
        .await?
        .ok_or_else(|| ApiError::not_found("video not found"))?;

    state.ledger.record_best_effort(&id, EngagementEvent::Watch).await;
    Ok(Json(record))
}

async fn put_video(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(draft): Json<VideoDraft>,
) -> ApiResult<Json<VideoRecord>> {
    if draft.title.trim().is_empty() {
        return Err(ApiError::bad_request("title must not be empty"));
    }
    let record = state
        .with_metadata(move |store| store.upsert_video(&id, &draft))
        .await?;
    Ok(Json(record))
}

async fn list_comments(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<CommentPage>> {
    let page = query.page();
    let (comments, total) = state
        .with_metadata(move |store| store.list_comments(&id, page))
        .await?;
    Ok(Json(CommentPage { comments, total }))
}

async fn post_comment(
    State(state): State<AppState>,
    Path(id): Path<String>,
    UserId(user): UserId,
    Json(body): Json<NewComment>,
) -> ApiResult<(StatusCode, Json<CommentRecord>)> {
    let text = body.text.trim().to_owned();
    if text.is_empty() {
        return Err(ApiError::bad_request("comment text must not be empty"));
    }
    let comment = state
        .with_metadata({
            let id = id.clone();
            move |store| store.add_comment(&id, &user, &text)
        })
        .await?;

    state.ledger.record_best_effort(&id, EngagementEvent::Comment).await;
    Ok((StatusCode::CREATED, Json(comment)))
}

async fn delete_comment(
    State(state): State<AppState>,
    Path((id, comment_id)): Path<(String, i64)>,
    UserId(user): UserId,
) -> ApiResult<StatusCode> {
    state
        .with_metadata(move |store| store.delete_comment(&id, comment_id, &user))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn like_video(
    State(state): State<AppState>,
    Path(id): Path<String>,
    user: UserId,
) -> ApiResult<Json<ReactionSummary>> {
    react(state, id, user, Reaction::Like).await
}

async fn dislike_video(
    State(state): State<AppState>,
    Path(id): Path<String>,
    user: UserId,
) -> ApiResult<Json<ReactionSummary>> {
    react(state, id, user, Reaction::Dislike).await
}

/// Every committed press of the like button counts towards hotness, including
/// the one that withdraws a like. Dislikes never touch the ledger.
async fn react(
    state: AppState,
    id: String,
    UserId(user): UserId,
    reaction: Reaction,
) -> ApiResult<Json<ReactionSummary>> {
    let summary = state
        .with_metadata({
            let id = id.clone();
            move |store| store.react(&id, &user, reaction)
        })
        .await?;

    if summary.reaction == Reaction::Like {
        state.ledger.record_best_effort(&id, EngagementEvent::Like).await;
    }
    Ok(Json(summary))
}

async fn collect_video(
    State(state): State<AppState>,
    Path(id): Path<String>,
    UserId(user): UserId,
) -> ApiResult<Json<CollectResponse>> {
    let collected = state
        .with_metadata({
            let id = id.clone();
            move |store| store.collect(&id, &user)
        })
        .await?;
    if !collected {
        return Err(ApiError::new(StatusCode::CONFLICT, "video already collected"));
    }

    state.ledger.record_best_effort(&id, EngagementEvent::Collect).await;
    Ok(Json(CollectResponse { collected }))
}

async fn get_video_hot(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<VideoHot>> {
    let hot = state.ledger.get_score(&id).await?;
    Ok(Json(VideoHot { video_id: id, hot }))
}

async fn get_hot_rank(
    State(state): State<AppState>,
    Query(query): Query<RankQuery>,
) -> ApiResult<Json<Vec<HotnessEntry>>> {
    let rank = state
        .ledger
        .get_top_k(query.limit.unwrap_or(DEFAULT_RANK_LIMIT))
        .await?;
    Ok(Json(rank))
}

async fn list_my_likes(
    State(state): State<AppState>,
    user: UserId,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<VideoPage>> {
    list_reacted(state, user, Reaction::Like, query.page()).await
}

async fn list_my_dislikes(
    State(state): State<AppState>,
    user: UserId,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<VideoPage>> {
    list_reacted(state, user, Reaction::Dislike, query.page()).await
}

async fn list_reacted(
    state: AppState,
    UserId(user): UserId,
    reaction: Reaction,
    page: Page,
) -> ApiResult<Json<VideoPage>> {
    let (videos, total) = state
        .with_metadata(move |store| store.list_reacted(&user, reaction, page))
        .await?;
    Ok(Json(VideoPage { videos, total }))
}
