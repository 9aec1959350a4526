//! crates/socratic_core/src/catalog.rs
//!
//! Reads the topic catalog for the topic picker.

use tracing::{error, info};

use crate::domain::Topic;
use crate::ports::DatabaseService;
use crate::view::{Notice, ViewEvent, ViewSink};

/// Loads every topic, ordered by title.
///
/// A failed fetch is reported to the sink and leaves the list empty. Nothing is
/// cached; each mount asks the store again.
pub async fn load_topics(db: &dyn DatabaseService, sink: &dyn ViewSink) -> Vec<Topic> {
    match db.list_topics().await {
        Ok(topics) => {
            info!("Loaded {} topics.", topics.len());
            topics
        }
        Err(e) => {
            error!("Failed to load topics: {:?}", e);
            sink.emit(ViewEvent::Notice(Notice::error("Error loading topics", &e)));
            Vec::new()
        }
    }
}
