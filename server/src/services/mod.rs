//! Domain services used by the WebSocket and HTTP routes.
//!
//! ARCHITECTURE
//! ============
//! Service modules own room membership, relay rules and persistence so route
//! handlers stay focused on protocol translation.

pub mod persistence;
pub mod presence;
pub mod relay;
pub mod store;
