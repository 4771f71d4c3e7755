//! Axum router and page handlers.
//!
//! ```text
//! /health                                   liveness
//! /api/pages                          POST  create
//! /api/pages/{id}                     GET   read (view; published pages public)
//!                                     PATCH metadata (edit, version-gated)
//!                                     DELETE archive (owner)
//! /api/pages/{id}/blocks              PUT   replace blocks (edit, version-gated)
//! /api/pages/{id}/publish             PUT   publish flags (owner)
//! /api/pages/{id}/restore             POST  un-archive (owner)
//! /api/pages/{id}/purge               DELETE hard delete (owner, archived only)
//! /api/pages/{id}/shares              GET/POST list / create share links (owner)
//! /api/pages/{id}/shares/{token}      DELETE revoke (owner)
//! /api/pages/{id}/events              GET   SSE stream (view)
//! /api/pages/{id}/typing              POST  typing indicator (edit)
//! /api/pages/{id}/presence            POST  presence (view)
//! ```

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::trace::TraceLayer;

use folio_kernel::{PageError, ShareLinkStore};
use folio_types::{AccessLevel, BlockInput, MetaPatch, Page, PageId, ShareLink, Version};

use crate::error::ApiError;
use crate::extract::{AppJson, AppPath, Caller};
use crate::sse;
use crate::state::AppState;

type ApiResult<T> = Result<T, ApiError>;

/// Build the complete router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/pages", post(create_page))
        .route(
            "/api/pages/{id}",
            get(get_page).patch(update_page).delete(archive_page),
        )
        .route("/api/pages/{id}/blocks", put(replace_blocks))
        .route("/api/pages/{id}/publish", put(set_published))
        .route("/api/pages/{id}/restore", post(restore_page))
        .route("/api/pages/{id}/purge", delete(purge_page))
        .route("/api/pages/{id}/shares", get(list_shares).post(create_share))
        .route("/api/pages/{id}/shares/{token}", delete(revoke_share))
        .route("/api/pages/{id}/events", get(sse::page_events))
        .route("/api/pages/{id}/typing", post(typing))
        .route("/api/pages/{id}/presence", post(presence))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ============================================================================
// Bodies
// ============================================================================

/// A page and its version stamp, the shape of every successful write.
#[derive(Debug, Serialize)]
pub struct PageEnvelope {
    pub page: Page,
    pub updated_at: Version,
}

impl From<Page> for PageEnvelope {
    fn from(page: Page) -> Self {
        let updated_at = page.updated_at;
        Self { page, updated_at }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CreatePageRequest {
    pub title: Option<String>,
    pub blocks: Vec<BlockInput>,
}

#[derive(Debug, Deserialize)]
pub struct ReplaceBlocksRequest {
    pub blocks: Vec<BlockInput>,
    /// Stamp the client last saw. Absent, null or empty forces the write.
    #[serde(default)]
    pub base_updated_at: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePageRequest {
    #[serde(flatten)]
    pub patch: MetaPatch,
    #[serde(default)]
    pub base_updated_at: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PublishRequest {
    pub published: bool,
    #[serde(default)]
    pub unlisted: bool,
}

#[derive(Debug, Deserialize)]
pub struct CreateShareRequest {
    pub access: AccessLevel,
}

#[derive(Debug, Deserialize)]
pub struct TypingRequest {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_true")]
    pub typing: bool,
}

#[derive(Debug, Deserialize)]
pub struct PresenceRequest {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_true")]
    pub online: bool,
}

fn default_true() -> bool {
    true
}

/// Parse `base_updated_at`. Blank means force-write.
fn expected_version(raw: Option<&str>) -> ApiResult<Option<Version>> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => Ok(Some(Version::parse(s).map_err(PageError::from)?)),
    }
}

/// Attach the winning page to a conflict; pass anything else through.
async fn conflict_with_current(state: &AppState, page_id: PageId, error: PageError) -> ApiError {
    match error {
        PageError::Conflict => match state.guard.current(page_id).await {
            Ok(current) => ApiError::conflict(current),
            Err(e) => e.into(),
        },
        other => other.into(),
    }
}

// ============================================================================
// Handlers
// ============================================================================

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn create_page(
    State(state): State<AppState>,
    caller: Caller,
    AppJson(req): AppJson<CreatePageRequest>,
) -> ApiResult<(StatusCode, Json<PageEnvelope>)> {
    let page = state
        .guard
        .create_page(caller.actor(), req.title.as_deref(), req.blocks)
        .await?;
    Ok((StatusCode::CREATED, Json(page.into())))
}

async fn get_page(
    State(state): State<AppState>,
    caller: Caller,
    AppPath(page_id): AppPath<PageId>,
) -> ApiResult<Json<PageEnvelope>> {
    let access = state
        .resolver
        .resolve_read(caller.actor(), page_id, caller.share())
        .await?;
    Ok(Json(access.page.into()))
}

async fn replace_blocks(
    State(state): State<AppState>,
    caller: Caller,
    AppPath(page_id): AppPath<PageId>,
    AppJson(req): AppJson<ReplaceBlocksRequest>,
) -> ApiResult<Json<PageEnvelope>> {
    state
        .resolver
        .resolve(caller.actor(), page_id, caller.share(), AccessLevel::Edit)
        .await?;
    let expected = expected_version(req.base_updated_at.as_deref())?;

    match state.guard.replace_blocks(page_id, req.blocks, expected).await {
        Ok(page) => Ok(Json(page.into())),
        Err(e) => Err(conflict_with_current(&state, page_id, e).await),
    }
}

async fn update_page(
    State(state): State<AppState>,
    caller: Caller,
    AppPath(page_id): AppPath<PageId>,
    AppJson(req): AppJson<UpdatePageRequest>,
) -> ApiResult<Json<PageEnvelope>> {
    state
        .resolver
        .resolve(caller.actor(), page_id, caller.share(), AccessLevel::Edit)
        .await?;
    let expected = expected_version(req.base_updated_at.as_deref())?;

    match state.guard.update_meta(page_id, req.patch, expected).await {
        Ok(page) => Ok(Json(page.into())),
        Err(e) => Err(conflict_with_current(&state, page_id, e).await),
    }
}

async fn set_published(
    State(state): State<AppState>,
    caller: Caller,
    AppPath(page_id): AppPath<PageId>,
    AppJson(req): AppJson<PublishRequest>,
) -> ApiResult<Json<PageEnvelope>> {
    state.resolver.require_owner(caller.actor(), page_id).await?;
    let page = state
        .guard
        .set_published(page_id, req.published, req.unlisted)
        .await?;
    Ok(Json(page.into()))
}

async fn archive_page(
    State(state): State<AppState>,
    caller: Caller,
    AppPath(page_id): AppPath<PageId>,
) -> ApiResult<Json<PageEnvelope>> {
    state.resolver.require_owner(caller.actor(), page_id).await?;
    let page = state.guard.archive(page_id).await?;
    Ok(Json(page.into()))
}

async fn restore_page(
    State(state): State<AppState>,
    caller: Caller,
    AppPath(page_id): AppPath<PageId>,
) -> ApiResult<Json<PageEnvelope>> {
    state
        .resolver
        .require_owner_any(caller.actor(), page_id)
        .await?;
    let page = state.guard.restore(page_id).await?;
    Ok(Json(page.into()))
}

async fn purge_page(
    State(state): State<AppState>,
    caller: Caller,
    AppPath(page_id): AppPath<PageId>,
) -> ApiResult<StatusCode> {
    state
        .resolver
        .require_owner_any(caller.actor(), page_id)
        .await?;
    state.guard.purge(page_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_shares(
    State(state): State<AppState>,
    caller: Caller,
    AppPath(page_id): AppPath<PageId>,
) -> ApiResult<Json<Vec<ShareLink>>> {
    state.resolver.require_owner(caller.actor(), page_id).await?;
    Ok(Json(state.store.list_share_links(page_id).await?))
}

async fn create_share(
    State(state): State<AppState>,
    caller: Caller,
    AppPath(page_id): AppPath<PageId>,
    AppJson(req): AppJson<CreateShareRequest>,
) -> ApiResult<(StatusCode, Json<ShareLink>)> {
    state.resolver.require_owner(caller.actor(), page_id).await?;
    let creator = caller.actor().unwrap_or_default().to_string();
    let link = state
        .store
        .create_share_link(page_id, req.access, creator)
        .await?;
    tracing::info!(page_id = %page_id, access = %link.access, "share link created");
    Ok((StatusCode::CREATED, Json(link)))
}

async fn revoke_share(
    State(state): State<AppState>,
    caller: Caller,
    AppPath((page_id, token)): AppPath<(PageId, String)>,
) -> ApiResult<StatusCode> {
    state.resolver.require_owner(caller.actor(), page_id).await?;
    if state.store.revoke_share_link(page_id, token).await? {
        tracing::info!(page_id = %page_id, "share link revoked");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(PageError::NotFound.into())
    }
}

async fn typing(
    State(state): State<AppState>,
    caller: Caller,
    AppPath(page_id): AppPath<PageId>,
    AppJson(req): AppJson<TypingRequest>,
) -> ApiResult<StatusCode> {
    state
        .resolver
        .resolve(caller.actor(), page_id, caller.share(), AccessLevel::Edit)
        .await?;
    state
        .guard
        .publisher()
        .publish_typing(
            page_id,
            req.session_id.as_deref().unwrap_or_default(),
            req.name.as_deref().unwrap_or_default(),
            req.typing,
        )
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn presence(
    State(state): State<AppState>,
    caller: Caller,
    AppPath(page_id): AppPath<PageId>,
    AppJson(req): AppJson<PresenceRequest>,
) -> ApiResult<StatusCode> {
    state
        .resolver
        .resolve_read(caller.actor(), page_id, caller.share())
        .await?;
    state
        .guard
        .publisher()
        .publish_presence(
            page_id,
            req.session_id.as_deref().unwrap_or_default(),
            req.name.as_deref().unwrap_or_default(),
            req.online,
        )
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expected_version_blank_forces() {
        assert_eq!(expected_version(None).unwrap(), None);
        assert_eq!(expected_version(Some("")).unwrap(), None);
        assert_eq!(expected_version(Some("  ")).unwrap(), None);
    }

    #[test]
    fn test_expected_version_parses_or_rejects() {
        let v = expected_version(Some("2026-03-01T12:00:00.000042Z")).unwrap().unwrap();
        assert_eq!(v.to_rfc3339(), "2026-03-01T12:00:00.000042Z");

        let err = expected_version(Some("last tuesday")).unwrap_err();
        assert!(matches!(err, ApiError::Page(PageError::InvalidInput(_))));
    }

    #[test]
    fn test_update_request_flattens_patch() {
        let req: UpdatePageRequest = serde_json::from_value(json!({
            "title": "New",
            "cover": null,
            "mood": 9,
            "base_updated_at": "2026-03-01T12:00:00Z"
        }))
        .unwrap();
        assert_eq!(req.patch.title.as_deref(), Some("New"));
        assert_eq!(req.patch.cover, Some(None));
        assert_eq!(req.patch.mood, Some(9));
        assert!(req.base_updated_at.is_some());
    }
}
