//! Per-subscriber relay from the shared bus to one live connection.
//!
//! Each connection owns its own bus subscription and its own output sink;
//! relays share nothing with each other. The loop waits on the bus with a
//! deadline, and an idle deadline becomes a heartbeat frame rather than an
//! error.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use folio_types::{ChangeEvent, Decoded, EventKind, PageId};

use crate::flows::{BusError, BusSubscription, EventBus, FlowMessage, RELAY_PATTERN};

/// Idle interval after which a heartbeat frame is sent.
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(15);

/// Frames buffered between a spawned relay and its connection.
pub const RELAY_BUFFER: usize = 64;

/// One unit of output for a live connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RelayFrame {
    /// A named event frame; `data` is the tagged event JSON.
    Event { kind: EventKind, data: String },
    /// Keep-alive with no payload.
    Heartbeat,
}

/// Why a relay loop ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelayExit {
    /// The caller's context was cancelled.
    Cancelled,
    /// The connection went away.
    Disconnected,
    /// The bus shut down.
    BusClosed,
}

/// The connection is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("frame sink closed")]
pub struct SinkClosed;

/// Where relay frames go.
#[async_trait]
pub trait FrameSink: Send + Sync {
    async fn send(&mut self, frame: RelayFrame) -> Result<(), SinkClosed>;

    /// Resolves once the receiving side is gone.
    async fn closed(&self);
}

#[async_trait]
impl FrameSink for mpsc::Sender<RelayFrame> {
    async fn send(&mut self, frame: RelayFrame) -> Result<(), SinkClosed> {
        mpsc::Sender::send(self, frame).await.map_err(|_| SinkClosed)
    }

    async fn closed(&self) {
        mpsc::Sender::closed(self).await
    }
}

/// Forwards events about one page to one connection.
#[derive(Clone, Debug)]
pub struct RealtimeRelay {
    page_id: PageId,
    heartbeat: Duration,
}

impl RealtimeRelay {
    pub fn new(page_id: PageId, heartbeat: Duration) -> Self {
        Self { page_id, heartbeat }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Run until cancelled, disconnected, or the bus closes.
    ///
    /// The subscription is dropped on return.
    pub async fn run<S: FrameSink>(
        &self,
        mut subscription: Box<dyn BusSubscription>,
        mut sink: S,
        cancel: CancellationToken,
    ) -> RelayExit {
        let mut deadline = Instant::now() + self.heartbeat;

        loop {
            let wait = deadline.saturating_duration_since(Instant::now());
            let received = tokio::select! {
                biased;
                _ = cancel.cancelled() => return RelayExit::Cancelled,
                _ = sink.closed() => return RelayExit::Disconnected,
                received = subscription.recv_timeout(wait) => received,
            };

            let frame = match received {
                Ok(Some(msg)) => match self.frame_for(&msg) {
                    Some(frame) => frame,
                    None => continue,
                },
                Ok(None) => RelayFrame::Heartbeat,
                Err(BusError::Closed | BusError::Unavailable) => return RelayExit::BusClosed,
            };

            // A connection that stops reading fills the sink; cancel must still win.
            let sent = tokio::select! {
                biased;
                _ = cancel.cancelled() => return RelayExit::Cancelled,
                sent = sink.send(frame) => sent,
            };
            if sent.is_err() {
                return RelayExit::Disconnected;
            }
            deadline = Instant::now() + self.heartbeat;
        }
    }

    /// Decode, filter to this page, stamp, serialize. `None` means skip.
    fn frame_for(&self, msg: &FlowMessage) -> Option<RelayFrame> {
        let mut event = match ChangeEvent::decode(&msg.payload) {
            Decoded::Event(event) => event,
            Decoded::Unknown(tag) => {
                tracing::debug!(subject = %msg.subject, tag = %tag, "skipping unknown event type");
                return None;
            }
            Decoded::Malformed(error) => {
                tracing::debug!(subject = %msg.subject, error = %error, "skipping malformed event");
                return None;
            }
        };

        if *event.page_id() != self.page_id {
            return None;
        }

        event.stamp_if_missing(Utc::now());
        match event.to_json() {
            Ok(data) => Some(RelayFrame::Event {
                kind: event.kind(),
                data,
            }),
            Err(e) => {
                tracing::warn!(page_id = %self.page_id, error = %e, "failed to serialize event");
                None
            }
        }
    }
}

/// Subscribe and run a relay on its own task, returning the frame stream.
///
/// The relay stops when the receiver is dropped or `cancel` fires.
pub async fn spawn_relay(
    bus: &Arc<dyn EventBus>,
    page_id: PageId,
    heartbeat: Duration,
    cancel: CancellationToken,
) -> Result<mpsc::Receiver<RelayFrame>, BusError> {
    let subscription = bus.subscribe(RELAY_PATTERN).await?;
    let (tx, rx) = mpsc::channel(RELAY_BUFFER);
    let relay = RealtimeRelay::new(page_id, heartbeat);

    tokio::spawn(async move {
        tracing::debug!(page_id = %page_id, "relay started");
        let exit = relay.run(subscription, tx, cancel).await;
        tracing::debug!(page_id = %page_id, exit = ?exit, "relay stopped");
    });

    Ok(rx)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use folio_types::{PresenceEvent, TypingEvent};
    use serde_json::json;

    use super::*;
    use crate::flows::{FlowBus, Payload, SUBJECT_PERSISTED, SUBJECT_PRESENCE, SUBJECT_TYPING};

    fn typing(page_id: PageId, ts: bool) -> ChangeEvent {
        ChangeEvent::Typing(TypingEvent {
            page_id,
            session_id: "s1".into(),
            name: "Amy".into(),
            typing: true,
            ts: ts.then(Utc::now),
        })
    }

    fn payload(event: &ChangeEvent) -> Payload {
        Arc::from(event.to_json().unwrap().into_bytes())
    }

    async fn start(bus: &Arc<FlowBus>, page_id: PageId, heartbeat: Duration) -> (mpsc::Receiver<RelayFrame>, CancellationToken) {
        let cancel = CancellationToken::new();
        let dyn_bus: Arc<dyn EventBus> = bus.clone();
        let rx = spawn_relay(&dyn_bus, page_id, heartbeat, cancel.clone())
            .await
            .unwrap();
        (rx, cancel)
    }

    #[tokio::test]
    async fn test_relay_forwards_only_watched_page() {
        let bus = Arc::new(FlowBus::new(64));
        let watched = PageId::new();
        let other = PageId::new();
        let (mut rx, _cancel) = start(&bus, watched, DEFAULT_HEARTBEAT).await;

        bus.publish(SUBJECT_TYPING, payload(&typing(other, true))).await.unwrap();
        bus.publish(SUBJECT_TYPING, payload(&typing(watched, true))).await.unwrap();

        let frame = rx.recv().await.unwrap();
        let RelayFrame::Event { kind, data } = frame else {
            panic!("expected event frame");
        };
        assert_eq!(kind, EventKind::Typing);
        let Decoded::Event(event) = ChangeEvent::decode(data.as_bytes()) else {
            panic!("relay emitted undecodable data");
        };
        assert_eq!(*event.page_id(), watched);
    }

    #[tokio::test]
    async fn test_relay_skips_garbage_and_stamps_missing_ts() {
        let bus = Arc::new(FlowBus::new(64));
        let page_id = PageId::new();
        let (mut rx, _cancel) = start(&bus, page_id, DEFAULT_HEARTBEAT).await;

        bus.publish(SUBJECT_TYPING, Arc::from(&b"not json"[..])).await.unwrap();
        let unknown = json!({ "type": "cursor", "page_id": page_id });
        bus.publish(SUBJECT_TYPING, Arc::from(unknown.to_string().into_bytes()))
            .await
            .unwrap();
        let presence = ChangeEvent::Presence(PresenceEvent {
            page_id,
            session_id: "s2".into(),
            name: "Bo".into(),
            online: true,
            ts: None,
        });
        bus.publish(SUBJECT_PRESENCE, payload(&presence)).await.unwrap();

        let RelayFrame::Event { kind, data } = rx.recv().await.unwrap() else {
            panic!("expected event frame");
        };
        assert_eq!(kind, EventKind::Presence);
        let Decoded::Event(event) = ChangeEvent::decode(data.as_bytes()) else {
            panic!("relay emitted undecodable data");
        };
        assert!(event.ts().is_some());
    }

    #[tokio::test]
    async fn test_relay_lifts_legacy_page_shape() {
        let bus = Arc::new(FlowBus::new(64));
        let page_id = PageId::new();
        let (mut rx, _cancel) = start(&bus, page_id, DEFAULT_HEARTBEAT).await;

        let legacy = json!({
            "id": page_id,
            "owner_id": null,
            "title": "Old",
            "cover": null,
            "published": false,
            "unlisted": false,
            "mood": 0,
            "intensity": 0,
            "created_at": "2026-01-01T00:00:00Z",
            "updated_at": "2026-01-01T00:00:00.000001Z",
            "blocks": []
        });
        bus.publish(SUBJECT_PERSISTED, Arc::from(legacy.to_string().into_bytes()))
            .await
            .unwrap();

        let RelayFrame::Event { kind, data } = rx.recv().await.unwrap() else {
            panic!("expected event frame");
        };
        assert_eq!(kind, EventKind::Page);
        let value: serde_json::Value = serde_json::from_str(&data).unwrap();
        assert_eq!(value["type"], "page");
        assert_eq!(value["page"]["title"], "Old");
        assert!(value["ts"].is_string());
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_relay_sends_heartbeats() {
        let bus = Arc::new(FlowBus::new(64));
        let (mut rx, _cancel) = start(&bus, PageId::new(), Duration::from_secs(15)).await;

        assert_eq!(rx.recv().await.unwrap(), RelayFrame::Heartbeat);
        assert_eq!(rx.recv().await.unwrap(), RelayFrame::Heartbeat);
    }

    #[tokio::test(start_paused = true)]
    async fn test_foreign_traffic_does_not_starve_heartbeat() {
        let bus = Arc::new(FlowBus::new(64));
        let watched = PageId::new();
        let cancel = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel(8);
        let relay = RealtimeRelay::new(watched, Duration::from_secs(15));
        let subscription = bus.subscribe(RELAY_PATTERN).await.unwrap();
        let handle = tokio::spawn({
            let cancel = cancel.clone();
            async move { relay.run(subscription, tx, cancel).await }
        });

        let noisy = bus.clone();
        tokio::spawn(async move {
            loop {
                let _ = noisy
                    .publish(SUBJECT_TYPING, payload(&typing(PageId::new(), true)))
                    .await;
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
        });

        assert_eq!(rx.recv().await.unwrap(), RelayFrame::Heartbeat);
        cancel.cancel();
        assert_eq!(handle.await.unwrap(), RelayExit::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_relay_blocked_on_full_sink() {
        let bus = Arc::new(FlowBus::new(64));
        let cancel = CancellationToken::new();
        let (tx, _rx) = mpsc::channel(1);
        let relay = RealtimeRelay::new(PageId::new(), Duration::from_secs(15));
        let subscription = bus.subscribe(RELAY_PATTERN).await.unwrap();
        let handle = tokio::spawn({
            let cancel = cancel.clone();
            async move { relay.run(subscription, tx, cancel).await }
        });

        // First heartbeat fills the sink, the second blocks in send.
        tokio::time::sleep(Duration::from_secs(40)).await;
        cancel.cancel();

        let exit = tokio::time::timeout(Duration::from_secs(60), handle)
            .await
            .expect("relay ignored cancellation")
            .unwrap();
        assert_eq!(exit, RelayExit::Cancelled);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_dropping_receiver_disconnects_and_releases_subscription() {
        let bus = Arc::new(FlowBus::new(64));
        let (tx, rx) = mpsc::channel(8);
        let relay = RealtimeRelay::new(PageId::new(), DEFAULT_HEARTBEAT);
        let subscription = bus.subscribe(RELAY_PATTERN).await.unwrap();
        assert_eq!(bus.subscriber_count(), 1);

        let handle = tokio::spawn(async move { relay.run(subscription, tx, CancellationToken::new()).await });
        drop(rx);

        assert_eq!(handle.await.unwrap(), RelayExit::Disconnected);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_bus_close_ends_relay() {
        let bus = Arc::new(FlowBus::new(64));
        let (tx, _rx) = mpsc::channel(8);
        let relay = RealtimeRelay::new(PageId::new(), DEFAULT_HEARTBEAT);
        let subscription = bus.subscribe(RELAY_PATTERN).await.unwrap();

        let handle = tokio::spawn(async move { relay.run(subscription, tx, CancellationToken::new()).await });
        bus.close();

        assert_eq!(handle.await.unwrap(), RelayExit::BusClosed);
    }
}
