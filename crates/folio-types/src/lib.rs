//! Shared types for Folio.
//!
//! Leaf crate with no internal dependencies: typed IDs, the version stamp
//! used for optimistic concurrency, pages and blocks, share links, and the
//! change events the realtime relay forwards.
//!
//! # Key Types
//!
//! |-------------------|------------------------------------------------|
//! | Type              | Purpose                                        |
//! |-------------------|------------------------------------------------|
//! | [`Page`]          | The collaboratively edited document            |
//! | [`Block`]         | Ordered, typed content unit of a page          |
//! | [`Version`]       | Last-modified stamp, the compare-and-swap token |
//! | [`ShareLink`]     | Revocable view/edit capability for one page    |
//! | [`ChangeEvent`]   | Tagged page/typing/presence event              |
//! |-------------------|------------------------------------------------|

pub mod event;
pub mod ids;
pub mod page;
pub mod share;
pub mod version;

pub use event::{ChangeEvent, Decoded, EventKind, PageChanged, PresenceEvent, TypingEvent};
pub use ids::{BlockId, PageId};
pub use page::{
    Block, BlockInput, MAX_INTENSITY, MOOD_BOUND, MetaPatch, MetaUpdate, Page, ValidationError,
    clamp_intensity, clamp_mood, normalize_blocks,
};
pub use share::{AccessLevel, Grant, ShareLink};
pub use version::{Version, VersionParseError};
