//! Publish side of the realtime channel.
//!
//! Page events follow a durable write and are advisory: a failed publish is
//! logged and swallowed. Typing and presence events exist only on the bus, so
//! a failed publish is reported as [`PageError::RealtimeUnavailable`].

use std::sync::Arc;

use chrono::Utc;

use folio_types::{ChangeEvent, Page, PageId, PresenceEvent, TypingEvent};

use crate::error::{PageError, PageResult};
use crate::flows::{EventBus, HasSubject, Payload};

/// Serializes [`ChangeEvent`]s onto an [`EventBus`].
#[derive(Clone)]
pub struct EventPublisher {
    bus: Arc<dyn EventBus>,
}

impl EventPublisher {
    pub fn new(bus: Arc<dyn EventBus>) -> Self {
        Self { bus }
    }

    pub fn bus(&self) -> &Arc<dyn EventBus> {
        &self.bus
    }

    /// Publish one event under its subject.
    pub async fn publish(&self, event: &ChangeEvent) -> PageResult<()> {
        let json = event
            .to_json()
            .map_err(|e| PageError::InvalidInput(e.to_string()))?;
        let payload: Payload = Arc::from(json.into_bytes());
        self.bus
            .publish(event.subject(), payload)
            .await
            .map_err(|e| {
                tracing::debug!(error = %e, subject = event.subject(), "bus rejected event");
                PageError::RealtimeUnavailable
            })
    }

    /// Announce a persisted snapshot. Never fails the caller.
    pub async fn publish_page(&self, page: &Page) {
        let event = ChangeEvent::page(page.clone());
        if let Err(e) = self.publish(&event).await {
            tracing::warn!(page_id = %page.id, version = %page.updated_at, error = %e, "page event dropped");
        }
    }

    /// Broadcast a typing indicator.
    pub async fn publish_typing(
        &self,
        page_id: PageId,
        session_id: &str,
        name: &str,
        typing: bool,
    ) -> PageResult<()> {
        let (session_id, name) = ephemeral_identity(session_id, name)?;
        let event = ChangeEvent::Typing(TypingEvent {
            page_id,
            session_id,
            name,
            typing,
            ts: Some(Utc::now()),
        });
        self.publish(&event).await
    }

    /// Broadcast a presence change.
    pub async fn publish_presence(
        &self,
        page_id: PageId,
        session_id: &str,
        name: &str,
        online: bool,
    ) -> PageResult<()> {
        let (session_id, name) = ephemeral_identity(session_id, name)?;
        let event = ChangeEvent::Presence(PresenceEvent {
            page_id,
            session_id,
            name,
            online,
            ts: Some(Utc::now()),
        });
        self.publish(&event).await
    }
}

impl std::fmt::Debug for EventPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventPublisher").finish_non_exhaustive()
    }
}

fn ephemeral_identity(session_id: &str, name: &str) -> PageResult<(String, String)> {
    let session_id = session_id.trim();
    let name = name.trim();
    if session_id.is_empty() {
        return Err(PageError::InvalidInput("session_id is required".into()));
    }
    if name.is_empty() {
        return Err(PageError::InvalidInput("name is required".into()));
    }
    Ok((session_id.to_string(), name.to_string()))
}
