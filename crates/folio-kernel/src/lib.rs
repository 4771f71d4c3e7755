//! # folio-kernel
//!
//! The concurrency, access and realtime core behind shared pages.
//!
//! A write goes resolver, then guard, then bus:
//! - [`AccessResolver`] decides whether the caller is the owner, holds a
//!   share link strong enough for the operation, or is turned away
//! - [`ConcurrencyGuard`] applies the mutation as one compare-and-swap on
//!   the page's version stamp and announces the new snapshot
//! - [`EventPublisher`] puts tagged JSON on the shared [`EventBus`]
//!
//! A live viewer gets a [`RealtimeRelay`] that reads the shared bus, keeps
//! only its page's events, and heartbeats when idle.

pub mod access;
pub mod db;
pub mod error;
pub mod flows;
pub mod guard;
pub mod publish;
pub mod relay;
pub mod store;

pub use access::{Access, AccessResolver};
pub use db::PageDb;
pub use error::{PageError, PageResult};
pub use flows::{
    BusError, BusSubscription, EventBus, FlowBus, FlowMessage, HasSubject, Payload, Subscription,
    matches_pattern, subject_for,
};
pub use guard::{ConcurrencyGuard, DEFAULT_TITLE};
pub use publish::EventPublisher;
pub use relay::{
    DEFAULT_HEARTBEAT, FrameSink, RealtimeRelay, RelayExit, RelayFrame, SinkClosed, spawn_relay,
};
pub use store::{ShareLinkStore, SqliteStore, VersionedStore, generate_share_token};
