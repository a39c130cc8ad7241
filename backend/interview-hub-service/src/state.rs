use crate::{
    config::Config,
    services::{BroadcastRouter, SequenceAllocator, SessionLifecycleCoordinator},
    store::{InMemoryInteractionStore, InMemorySessionStore, InteractionStore, SessionStore},
    websocket::{Broadcaster, SessionRegistry},
};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub router: Arc<BroadcastRouter>,
    pub lifecycle: Arc<SessionLifecycleCoordinator>,
    pub registry: SessionRegistry,
    pub config: Arc<Config>,
}

impl AppState {
    /// Wire the hub on top of the given stores.
    pub fn new(
        config: Config,
        sessions: Arc<dyn SessionStore>,
        interactions: Arc<dyn InteractionStore>,
    ) -> Self {
        let registry = SessionRegistry::new(config.inbox_capacity);
        let broadcaster = Broadcaster::new(registry.clone());
        let allocator = Arc::new(SequenceAllocator::new(
            sessions.clone(),
            interactions.clone(),
        ));
        let lifecycle = Arc::new(SessionLifecycleCoordinator::new(
            sessions,
            allocator.clone(),
            broadcaster.clone(),
        ));
        let router = Arc::new(BroadcastRouter::new(
            interactions,
            allocator,
            lifecycle.clone(),
            broadcaster,
            config.limits,
        ));

        Self {
            router,
            lifecycle,
            registry,
            config: Arc::new(config),
        }
    }

    pub fn in_memory(config: Config) -> Self {
        Self::new(
            config,
            Arc::new(InMemorySessionStore::new()),
            Arc::new(InMemoryInteractionStore::new()),
        )
    }
}
