//! Server-sent events for one page.
//!
//! Each connection gets its own relay task. Frames come out as
//! `event: page|typing|presence` with the tagged JSON as data; idle
//! heartbeats are SSE comments. The relay stops when the client goes away
//! (the frame receiver is dropped with the response body) or the server
//! shuts down.

use std::convert::Infallible;

use axum::extract::State;
use axum::response::sse::{Event, Sse};
use futures::Stream;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;

use folio_kernel::{PageError, RelayFrame, spawn_relay};
use folio_types::PageId;

use crate::constants::HEARTBEAT_COMMENT;
use crate::error::ApiError;
use crate::extract::{AppPath, Caller};
use crate::state::AppState;

/// `GET /api/pages/{id}/events`
pub async fn page_events(
    State(state): State<AppState>,
    caller: Caller,
    AppPath(page_id): AppPath<PageId>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    state
        .resolver
        .resolve_read(caller.actor(), page_id, caller.share())
        .await?;

    let cancel = state.shutdown.child_token();
    let frames = spawn_relay(&state.event_bus(), page_id, state.heartbeat, cancel)
        .await
        .map_err(|e| {
            tracing::warn!(page_id = %page_id, error = %e, "cannot open event stream");
            PageError::RealtimeUnavailable
        })?;

    tracing::debug!(page_id = %page_id, "event stream opened");
    let stream = ReceiverStream::new(frames).map(|frame| Ok(to_sse(frame)));
    Ok(Sse::new(stream))
}

fn to_sse(frame: RelayFrame) -> Event {
    match frame {
        RelayFrame::Event { kind, data } => Event::default().event(kind.as_str()).data(data),
        RelayFrame::Heartbeat => Event::default().comment(HEARTBEAT_COMMENT),
    }
}
