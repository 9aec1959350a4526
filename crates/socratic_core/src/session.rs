//! crates/socratic_core/src/session.rs
//!
//! Starts a new dialogue for the signed-in user.

use tracing::{error, info};
use uuid::Uuid;

use crate::domain::{Dialogue, User};
use crate::ports::{DatabaseService, PortError, PortResult};
use crate::view::{Notice, Route, ViewEvent, ViewSink};

/// Inserts one active dialogue bound to `user` and `topic_id`.
///
/// Fails with `Unauthenticated` before touching the store when there is no
/// user. Not idempotent: every call creates a new dialogue.
pub async fn create_dialogue(
    db: &dyn DatabaseService,
    user: Option<&User>,
    topic_id: Uuid,
) -> PortResult<Dialogue> {
    let user = user.ok_or(PortError::Unauthenticated)?;
    let dialogue = db.create_dialogue(user.user_id, topic_id).await?;
    info!(
        "Created dialogue {} for user {} on topic {}.",
        dialogue.id, user.user_id, topic_id
    );
    Ok(dialogue)
}

/// Handles a topic selection: creates the dialogue and navigates to it.
///
/// Failures become an error notice; no retry.
pub async fn select_topic(
    db: &dyn DatabaseService,
    user: Option<&User>,
    topic_id: Uuid,
    sink: &dyn ViewSink,
) -> Option<Uuid> {
    match create_dialogue(db, user, topic_id).await {
        Ok(dialogue) => {
            sink.emit(ViewEvent::Navigate(Route::Dialogue(dialogue.id)));
            Some(dialogue.id)
        }
        Err(e) => {
            error!("Failed to start dialogue on topic {}: {:?}", topic_id, e);
            sink.emit(ViewEvent::Notice(Notice::error("Error starting dialogue", &e)));
            None
        }
    }
}
