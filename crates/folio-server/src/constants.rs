//! Server configuration constants.
//!
//! Centralizes hardcoded values for easier configuration and documentation.

/// Default HTTP port for the folio server.
pub const DEFAULT_PORT: u16 = 7410;

/// Default bind address (localhost only; put a proxy in front for public use).
pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1";

/// Default SQLite database path.
pub const DEFAULT_DATABASE: &str = "folio.db";

/// Broadcast channel capacity of the event bus.
pub use folio_kernel::flows::DEFAULT_BUS_CAPACITY;

/// Idle seconds before an SSE stream gets a heartbeat comment.
pub const DEFAULT_HEARTBEAT_SECS: u64 = folio_kernel::DEFAULT_HEARTBEAT.as_secs();

/// Header carrying the authenticated actor id, set by the upstream proxy.
pub const ACTOR_HEADER: &str = "x-folio-actor";

/// Comment text of SSE heartbeat frames.
pub const HEARTBEAT_COMMENT: &str = "heartbeat";
