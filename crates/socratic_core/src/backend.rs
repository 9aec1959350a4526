//! crates/socratic_core/src/backend.rs

use std::sync::Arc;

use crate::ports::{CompletionService, DatabaseService, RealtimeService};

/// The explicitly constructed handles every operation runs against.
///
/// Built once at application start and cloned into each view; cloning only
/// bumps reference counts.
#[derive(Clone)]
pub struct Backend {
    pub db: Arc<dyn DatabaseService>,
    pub realtime: Arc<dyn RealtimeService>,
    pub completion: Arc<dyn CompletionService>,
}

impl Backend {
    pub fn new(
        db: Arc<dyn DatabaseService>,
        realtime: Arc<dyn RealtimeService>,
        completion: Arc<dyn CompletionService>,
    ) -> Self {
        Self {
            db,
            realtime,
            completion,
        }
    }
}
