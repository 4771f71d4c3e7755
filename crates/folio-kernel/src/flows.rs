//! FlowBus pub/sub for page change, typing and presence events.
//!
//! One process-wide broadcast channel carries every event. Subscribers filter
//! by subject with NATS-style patterns; filtering by page happens further out,
//! in the relay.
//!
//! # Pattern Matching
//!
//! Patterns use dot-separated tokens with wildcards:
//! - `*` matches exactly one token: `page.*` matches `page.typing` but not `page.typing.start`
//! - `>` matches one or more tokens (only at end): `page.>` matches both
//! - Exact match: `page.persisted` only matches `page.persisted`
//!
//! # Delivery
//!
//! At-most-once. A subscriber that falls more than `capacity` messages behind
//! skips the overflow and logs it. Publishing with no subscribers succeeds.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use folio_types::{ChangeEvent, EventKind};

// ============================================================================
// Subjects
// ============================================================================

/// A page snapshot was persisted.
pub const SUBJECT_PERSISTED: &str = "page.persisted";
/// Someone started or stopped typing.
pub const SUBJECT_TYPING: &str = "page.typing";
/// Someone joined or left.
pub const SUBJECT_PRESENCE: &str = "page.presence";
/// Everything the relay forwards.
pub const RELAY_PATTERN: &str = "page.>";

/// Default channel capacity.
pub const DEFAULT_BUS_CAPACITY: usize = 1024;

/// Check if a subject matches a pattern.
///
/// Patterns use NATS-style wildcards:
/// - `*` matches exactly one token
/// - `>` matches one or more tokens (only at end)
pub fn matches_pattern(pattern: &str, subject: &str) -> bool {
    let pattern_tokens: Vec<&str> = pattern.split('.').collect();
    let subject_tokens: Vec<&str> = subject.split('.').collect();

    let mut pi = 0;
    let mut si = 0;

    while pi < pattern_tokens.len() && si < subject_tokens.len() {
        match pattern_tokens[pi] {
            // `>` must be last and swallows the remaining (non-empty) tail
            ">" => return pi == pattern_tokens.len() - 1,
            "*" => {
                pi += 1;
                si += 1;
            }
            token => {
                if token != subject_tokens[si] {
                    return false;
                }
                pi += 1;
                si += 1;
            }
        }
    }

    pi == pattern_tokens.len() && si == subject_tokens.len()
}

// ============================================================================
// Messages
// ============================================================================

/// Trait for payloads that know their subject.
pub trait HasSubject {
    fn subject(&self) -> &str;
}

impl HasSubject for ChangeEvent {
    fn subject(&self) -> &str {
        subject_for(self.kind())
    }
}

/// Subject an event kind is published under.
pub fn subject_for(kind: EventKind) -> &'static str {
    match kind {
        EventKind::Page => SUBJECT_PERSISTED,
        EventKind::Typing => SUBJECT_TYPING,
        EventKind::Presence => SUBJECT_PRESENCE,
    }
}

/// Opaque payload bytes, shared between all receivers of one publish.
pub type Payload = Arc<[u8]>;

/// A message on the bus.
#[derive(Clone, Debug)]
pub struct FlowMessage {
    pub subject: String,
    pub payload: Payload,
    /// When this message was published.
    pub timestamp: Instant,
}

impl FlowMessage {
    pub fn new(subject: impl Into<String>, payload: Payload) -> Self {
        Self {
            subject: subject.into(),
            payload,
            timestamp: Instant::now(),
        }
    }
}

// ============================================================================
// Bus contract
// ============================================================================

/// Transport failures.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusError {
    /// The bus cannot take new publishers or subscribers.
    #[error("event bus unavailable")]
    Unavailable,
    /// The bus went away under a live subscription.
    #[error("event bus closed")]
    Closed,
}

/// Publish/subscribe transport.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Push a payload under `subject`. Succeeds with zero subscribers.
    async fn publish(&self, subject: &str, payload: Payload) -> Result<(), BusError>;

    /// Open an independent receive handle. Dropping it closes it.
    async fn subscribe(&self, pattern: &str) -> Result<Box<dyn BusSubscription>, BusError>;
}

/// A receive handle on an [`EventBus`].
#[async_trait]
pub trait BusSubscription: Send {
    /// Next matching message, or `Ok(None)` if `timeout` passes first.
    async fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<FlowMessage>, BusError>;
}

// ============================================================================
// FlowBus
// ============================================================================

/// In-process [`EventBus`] over a tokio broadcast channel.
#[derive(Clone)]
pub struct FlowBus {
    tx: broadcast::Sender<FlowMessage>,
    closed: CancellationToken,
    capacity: usize,
}

impl FlowBus {
    /// Create a new flow bus with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            closed: CancellationToken::new(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Get the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Take the bus down. Later publishes and subscribes fail with
    /// [`BusError::Unavailable`]; live subscriptions see [`BusError::Closed`].
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Subscribe with the concrete handle type.
    pub fn subscribe_local(&self, pattern: &str) -> Result<Subscription, BusError> {
        if self.is_closed() {
            return Err(BusError::Unavailable);
        }
        Ok(Subscription {
            pattern: pattern.to_string(),
            rx: self.tx.subscribe(),
            closed: self.closed.clone(),
        })
    }
}

impl Default for FlowBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}

#[async_trait]
impl EventBus for FlowBus {
    async fn publish(&self, subject: &str, payload: Payload) -> Result<(), BusError> {
        if self.is_closed() {
            return Err(BusError::Unavailable);
        }
        // Err here only means nobody is listening
        let receivers = self.tx.send(FlowMessage::new(subject, payload)).unwrap_or(0);
        tracing::trace!(subject, receivers, "flow published");
        Ok(())
    }

    async fn subscribe(&self, pattern: &str) -> Result<Box<dyn BusSubscription>, BusError> {
        Ok(Box::new(self.subscribe_local(pattern)?))
    }
}

impl std::fmt::Debug for FlowBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowBus")
            .field("capacity", &self.capacity)
            .field("subscribers", &self.subscriber_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

// ============================================================================
// Subscription
// ============================================================================

/// A subscription to a FlowBus with pattern filtering.
///
/// Only messages whose subject matches the subscription pattern are delivered.
pub struct Subscription {
    pattern: String,
    rx: broadcast::Receiver<FlowMessage>,
    closed: CancellationToken,
}

impl Subscription {
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Receive the next matching message, waiting as long as it takes.
    pub async fn recv(&mut self) -> Result<FlowMessage, BusError> {
        loop {
            let received = tokio::select! {
                biased;
                _ = self.closed.cancelled() => return Err(BusError::Closed),
                received = self.rx.recv() => received,
            };
            match received {
                Ok(msg) => {
                    if matches_pattern(&self.pattern, &msg.subject) {
                        return Ok(msg);
                    }
                }
                Err(broadcast::error::RecvError::Closed) => return Err(BusError::Closed),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(
                        pattern = %self.pattern,
                        lagged = n,
                        "Flow subscription lagged behind"
                    );
                }
            }
        }
    }

    /// Try to receive the next matching message without blocking.
    pub fn try_recv(&mut self) -> Result<Option<FlowMessage>, BusError> {
        if self.closed.is_cancelled() {
            return Err(BusError::Closed);
        }
        loop {
            match self.rx.try_recv() {
                Ok(msg) => {
                    if matches_pattern(&self.pattern, &msg.subject) {
                        return Ok(Some(msg));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return Ok(None),
                Err(broadcast::error::TryRecvError::Closed) => return Err(BusError::Closed),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    tracing::warn!(
                        pattern = %self.pattern,
                        lagged = n,
                        "Flow subscription lagged behind"
                    );
                }
            }
        }
    }
}

#[async_trait]
impl BusSubscription for Subscription {
    async fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<FlowMessage>, BusError> {
        match tokio::time::timeout(timeout, self.recv()).await {
            Ok(received) => received.map(Some),
            Err(_elapsed) => Ok(None),
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("pattern", &self.pattern)
            .finish_non_exhaustive()
    }
}
