//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor and
//! cloned into every connection task. It holds the room store, the presence
//! registry behind one `RwLock`, the store worker's queue sender and the
//! loaded configuration.

use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};

use crate::config::Config;
use crate::services::persistence::StoreOp;
use crate::services::presence::PresenceRegistry;
use crate::services::store::RoomStore;

/// Clone is required by Axum; every field is Arc-wrapped or cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn RoomStore>,
    pub presence: Arc<RwLock<PresenceRegistry>>,
    /// Store worker queue. `None` disables background writes.
    pub store_tx: Option<mpsc::Sender<StoreOp>>,
    pub config: Arc<Config>,
}

impl AppState {
    #[must_use]
    pub fn new(store: Arc<dyn RoomStore>, store_tx: Option<mpsc::Sender<StoreOp>>, config: Config) -> Self {
        Self { store, presence: Arc::new(RwLock::new(PresenceRegistry::new())), store_tx, config: Arc::new(config) }
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================
