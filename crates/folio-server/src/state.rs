//! Shared application state handed to every handler.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use folio_kernel::{
    AccessResolver, ConcurrencyGuard, EventBus, EventPublisher, FlowBus, PageResult, SqliteStore,
};

use crate::config::ServerConfig;

/// Everything a request needs: the store, the bus, and the core services
/// wired on top of them.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<SqliteStore>,
    pub bus: Arc<FlowBus>,
    pub resolver: AccessResolver,
    pub guard: ConcurrencyGuard,
    pub heartbeat: Duration,
    /// Cancelled on shutdown; every live relay hangs off a child token.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Build state from config, opening (or creating) the database.
    pub fn from_config(config: &ServerConfig) -> PageResult<Self> {
        let store = if config.is_in_memory() {
            SqliteStore::in_memory()?
        } else {
            SqliteStore::open(&config.database)?
        };
        let bus = FlowBus::new(config.bus_capacity);
        Ok(Self::assemble(store, bus, config.heartbeat()))
    }

    /// In-memory state (for testing).
    pub fn in_memory(heartbeat: Duration) -> PageResult<Self> {
        Ok(Self::assemble(
            SqliteStore::in_memory()?,
            FlowBus::default(),
            heartbeat,
        ))
    }

    fn assemble(store: SqliteStore, bus: FlowBus, heartbeat: Duration) -> Self {
        let store = Arc::new(store);
        let bus = Arc::new(bus);
        let resolver = AccessResolver::new(store.clone(), store.clone());
        let guard = ConcurrencyGuard::new(store.clone(), EventPublisher::new(bus.clone()));
        Self {
            store,
            bus,
            resolver,
            guard,
            heartbeat,
            shutdown: CancellationToken::new(),
        }
    }

    /// The bus as the relay sees it.
    pub fn event_bus(&self) -> Arc<dyn EventBus> {
        self.bus.clone()
    }
}
