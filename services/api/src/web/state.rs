//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use crate::config::Config;
use socratic_core::Backend;
use std::sync::Arc;

//=========================================================================================
// AppState (Shared Across All Connections)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Store, change feed and completion handles; each dialogue view clones these.
    pub backend: Backend,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(backend: Backend, config: Arc<Config>) -> Self {
        Self { backend, config }
    }
}
