use std::{collections::BTreeMap, sync::Arc};

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
};
use serde_json::json;
use tracing::debug;

use crate::{
    cache::{PageCover, WebsiteConfig},
    detail::AggregatedDetail,
    error::AppError,
    keys::LikeKind,
    state::State as AppState,
    utils::{EntityId, UserId, fingerprint, normalize_region},
};

const USER_HEADER: &str = "x-user-id";
const FORWARDED_FOR: &str = "x-forwarded-for";
const REAL_IP: &str = "x-real-ip";
const REGION_HEADER: &str = "x-region";
const UNKNOWN_CLIENT: &str = "unknown";

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/articles/{id}", get(article_handler))
        .route("/articles/{id}/like", post(article_like_handler))
        .route("/comments/{id}/like", post(comment_like_handler))
        .route("/talks/{id}/like", post(talk_like_handler))
        .route("/likes/{kind}", get(like_counts_handler))
        .route("/users/{user}/likes", get(user_likes_handler))
        .route("/config", get(get_config_handler).put(put_config_handler))
        .route("/pages", get(get_pages_handler).put(put_pages_handler))
        .route("/report", post(report_handler))
        .route("/admin/visitors", get(visitors_handler))
        .with_state(state)
}

pub async fn article_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<AggregatedDetail>, AppError> {
    let id: EntityId = id.parse()?;

    Ok(Json(state.details.article_detail(id).await?))
}

pub async fn article_like_handler(
    state: State<Arc<AppState>>,
    id: Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    toggle_like(LikeKind::Article, state, id, headers).await
}

pub async fn comment_like_handler(
    state: State<Arc<AppState>>,
    id: Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    toggle_like(LikeKind::Comment, state, id, headers).await
}

pub async fn talk_like_handler(
    state: State<Arc<AppState>>,
    id: Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    toggle_like(LikeKind::Talk, state, id, headers).await
}

async fn toggle_like(
    kind: LikeKind,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let id: EntityId = id.parse()?;
    let user = header(&headers, USER_HEADER)
        .ok_or_else(|| AppError::Validation(format!("Missing {USER_HEADER} header")))
        .and_then(UserId::new)?;

    let outcome = state.counters.toggle_like(kind, &user, id).await?;
    debug!("{user} {kind} {id} liked={}", outcome.liked);

    Ok(Json(outcome))
}

pub async fn like_counts_handler(
    State(state): State<Arc<AppState>>,
    Path(kind): Path<String>,
) -> Result<Json<BTreeMap<EntityId, i64>>, AppError> {
    let kind: LikeKind = kind.parse().map_err(AppError::Validation)?;
    let counts = state.counters.like_counts(kind).await?;

    Ok(Json(counts.into_iter().collect()))
}

pub async fn user_likes_handler(
    State(state): State<Arc<AppState>>,
    Path(user): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let user = UserId::new(&user)?;

    Ok(Json(state.counters.liked_by(&user).await?))
}

pub async fn get_config_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<WebsiteConfig>, AppError> {
    Ok(Json(state.website_config.get().await?))
}

pub async fn put_config_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<WebsiteConfig>,
) -> Result<impl IntoResponse, AppError> {
    state.website_config.update(&payload).await?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_pages_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<PageCover>>, AppError> {
    Ok(Json(state.pages.get().await?))
}

pub async fn put_pages_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<Vec<PageCover>>,
) -> Result<impl IntoResponse, AppError> {
    state.pages.update(&payload).await?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn report_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let ip = header(&headers, FORWARDED_FOR)
        .and_then(|forwarded| forwarded.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .or_else(|| header(&headers, REAL_IP))
        .unwrap_or(UNKNOWN_CLIENT);
    let user_agent = header(&headers, "user-agent").unwrap_or(UNKNOWN_CLIENT);
    let region = normalize_region(header(&headers, REGION_HEADER));

    let fresh = state
        .visitors
        .report_visit(&fingerprint(ip, user_agent), &region)
        .await?;

    Ok(Json(json!({ "fresh": fresh })))
}

pub async fn visitors_handler(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.visitors.stats().await?))
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}
