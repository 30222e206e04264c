use axum::{
    Json,
    extract::{Multipart, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use axum_extra::extract::cookie::CookieJar;
use bytes::Bytes;
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use reel_db::models::VideoRow;
use reel_media::MediaKind;
use reel_types::api::{ApiResponse, UpdateVideoRequest, VideoResponse};

use crate::error::ApiError;
use crate::middleware::{CurrentUser, authenticate};
use crate::parse_db_timestamp;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct VideoQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    50
}

/// GET /videos — published videos, newest first.
pub async fn list_videos(
    State(state): State<AppState>,
    Query(query): Query<VideoQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let rows = state.db.list_published_videos(query.limit)?;
    let videos: Vec<VideoResponse> = rows.into_iter().map(present).collect();

    Ok(Json(ApiResponse::ok(videos, "videos fetched")))
}

/// GET /videos/{id} — single video; each successful read bumps the view
/// counter. Unpublished videos look identical to missing ones for everyone
/// but their owner.
pub async fn get_video(
    State(state): State<AppState>,
    Path(video_id): Path<String>,
    jar: CookieJar,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let video_id = parse_video_id(&video_id)?;
    let row = state
        .db
        .get_video(&video_id.to_string())?
        .ok_or_else(video_not_found)?;

    if !row.published {
        let viewer = authenticate(&state, &jar, &headers).ok();
        if viewer.map(|u| u.id.to_string()).as_deref() != Some(row.owner_id.as_str()) {
            return Err(video_not_found());
        }
    }

    state.db.increment_views(&row.id)?;

    let mut video = present(row);
    video.views += 1;

    Ok(Json(ApiResponse::ok(video, "video fetched")))
}

#[derive(Default)]
struct UploadForm {
    title: Option<String>,
    description: Option<String>,
    duration_secs: Option<String>,
    video: Option<Bytes>,
    thumbnail: Option<Bytes>,
}

/// POST /videos — multipart: `title`, `description`, `durationSecs`, plus
/// `video` and `thumbnail` files. Both files make the media-host round trip
/// before any metadata is written.
pub async fn create_video(
    State(state): State<AppState>,
    jar: CookieJar,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let user = authenticate(&state, &jar, &headers)?;

    let mut form = UploadForm::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::Validation(format!("malformed multipart body: {e}")))?
    {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        match name.as_str() {
            "title" => form.title = Some(text_field(field).await?),
            "description" => form.description = Some(text_field(field).await?),
            "durationSecs" => form.duration_secs = Some(text_field(field).await?),
            "video" => form.video = Some(file_field(field).await?),
            "thumbnail" => form.thumbnail = Some(file_field(field).await?),
            other => {
                return Err(ApiError::Validation(format!("unexpected field '{other}'")));
            }
        }
    }

    let title = form
        .title
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| ApiError::Validation("title is required".into()))?;
    let description = form.description.unwrap_or_default();
    let duration_secs: i64 = form
        .duration_secs
        .ok_or_else(|| ApiError::Validation("missing required field 'durationSecs'".into()))?
        .parse()
        .map_err(|_| ApiError::Validation("durationSecs must be a whole number".into()))?;
    let video_data = form
        .video
        .ok_or_else(|| ApiError::Validation("missing required field 'video'".into()))?;
    let thumbnail_data = form
        .thumbnail
        .ok_or_else(|| ApiError::Validation("missing required field 'thumbnail'".into()))?;

    if duration_secs < 0 {
        return Err(ApiError::Validation("durationSecs must not be negative".into()));
    }

    let video_url = reel_media::store(&state.staging, &state.media, video_data, MediaKind::Video)
        .await?
        .url;
    let thumbnail_url =
        reel_media::store(&state.staging, &state.media, thumbnail_data, MediaKind::Image)
            .await?
            .url;

    let video_id = Uuid::new_v4();
    state.db.insert_video(
        &video_id.to_string(),
        &user.id.to_string(),
        &video_url,
        &thumbnail_url,
        &title,
        &description,
        duration_secs,
    )?;

    let row = state
        .db
        .get_video(&video_id.to_string())?
        .ok_or_else(|| anyhow::anyhow!("video {video_id} missing right after insert"))?;

    info!("Video '{}' published by {}", title, user.username);

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::ok(present(row), "video published")),
    ))
}

/// PATCH /videos/{id} — owner-only metadata update.
pub async fn update_video(
    State(state): State<AppState>,
    Path(video_id): Path<String>,
    jar: CookieJar,
    headers: HeaderMap,
    Json(req): Json<UpdateVideoRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = authenticate(&state, &jar, &headers)?;
    let row = owned_video(&state, &parse_video_id(&video_id)?, &user)?;

    if let Some(title) = req.title.as_deref()
        && title.trim().is_empty()
    {
        return Err(ApiError::Validation("title must not be empty".into()));
    }

    state
        .db
        .update_video(&row.id, req.title.as_deref(), req.description.as_deref())?;

    let updated = state
        .db
        .get_video(&row.id)?
        .ok_or_else(|| anyhow::anyhow!("video {} missing right after update", row.id))?;

    Ok(Json(ApiResponse::ok(present(updated), "video updated")))
}

/// POST /videos/{id}/toggle-publish — owner-only publication flip.
pub async fn toggle_publish(
    State(state): State<AppState>,
    Path(video_id): Path<String>,
    jar: CookieJar,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let user = authenticate(&state, &jar, &headers)?;
    let row = owned_video(&state, &parse_video_id(&video_id)?, &user)?;

    let published = state
        .db
        .toggle_published(&row.id)?
        .ok_or_else(video_not_found)?;

    info!(
        "Video '{}' {} by {}",
        row.title,
        if published { "published" } else { "unpublished" },
        user.username
    );

    Ok(Json(ApiResponse::ok(
        serde_json::json!({ "published": published }),
        "publication state updated",
    )))
}

/// DELETE /videos/{id} — owner-only removal.
pub async fn delete_video(
    State(state): State<AppState>,
    Path(video_id): Path<String>,
    jar: CookieJar,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let user = authenticate(&state, &jar, &headers)?;
    let row = owned_video(&state, &parse_video_id(&video_id)?, &user)?;

    state.db.delete_video(&row.id)?;

    info!("Video '{}' deleted by {}", row.title, user.username);

    Ok(Json(ApiResponse::ok((), "video deleted")))
}

// ── Helpers ─────────────────────────────────────────────────────────────

fn owned_video(state: &AppState, video_id: &Uuid, user: &CurrentUser) -> Result<VideoRow, ApiError> {
    let row = state
        .db
        .get_video(&video_id.to_string())?
        .ok_or_else(video_not_found)?;

    if row.owner_id != user.id.to_string() {
        return Err(ApiError::Forbidden(
            "only the owner can modify this video".into(),
        ));
    }

    Ok(row)
}

fn present(row: VideoRow) -> VideoResponse {
    VideoResponse {
        id: row.id.parse().unwrap_or_else(|e| {
            warn!("Corrupt video id '{}': {}", row.id, e);
            Uuid::default()
        }),
        owner_id: row.owner_id.parse().unwrap_or_else(|e| {
            warn!("Corrupt owner_id '{}' on video '{}': {}", row.owner_id, row.id, e);
            Uuid::default()
        }),
        created_at: parse_db_timestamp(&row.created_at, &row.id),
        duration_secs: row.duration_secs.max(0) as u32,
        views: row.views.max(0) as u64,
        owner_username: row.owner_username,
        video_url: row.video_url,
        thumbnail_url: row.thumbnail_url,
        title: row.title,
        description: row.description,
        published: row.published,
    }
}

fn video_not_found() -> ApiError {
    ApiError::NotFound("video not found".into())
}

/// Ids arrive as raw path text so that a malformed one still produces the
/// standard response envelope instead of an extractor rejection.
fn parse_video_id(raw: &str) -> Result<Uuid, ApiError> {
    raw.parse().map_err(|_| video_not_found())
}

async fn text_field(field: axum::extract::multipart::Field<'_>) -> Result<String, ApiError> {
    field
        .text()
        .await
        .map_err(|e| ApiError::Validation(format!("unreadable field: {e}")))
}

async fn file_field(field: axum::extract::multipart::Field<'_>) -> Result<Bytes, ApiError> {
    field
        .bytes()
        .await
        .map_err(|e| ApiError::Validation(format!("unreadable file field: {e}")))
}
