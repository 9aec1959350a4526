//! crates/socratic_core/src/auth.rs
//!
//! Resolves the current user from a browser session token and signs them out.

use tracing::{error, info};

use crate::domain::User;
use crate::ports::{DatabaseService, PortError, PortResult};
use crate::view::{Route, ViewEvent, ViewSink};

/// Returns the user behind `session_token`, or `None` when there is no live session.
///
/// Missing, unknown and expired tokens all read as "not signed in"; only
/// backend failures are errors.
pub async fn current_user(
    db: &dyn DatabaseService,
    session_token: Option<&str>,
) -> PortResult<Option<User>> {
    let Some(token) = session_token else {
        return Ok(None);
    };

    let user_id = match db.validate_auth_session(token).await {
        Ok(user_id) => user_id,
        Err(PortError::NotFound(_)) | Err(PortError::Unauthorized) => return Ok(None),
        Err(e) => return Err(e),
    };

    match db.get_user_by_id(user_id).await {
        Ok(user) => Ok(Some(user)),
        Err(PortError::NotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Ends the browser session and returns to the landing page.
///
/// The navigation happens even if the store could not delete the session.
pub async fn sign_out(db: &dyn DatabaseService, session_token: Option<&str>, sink: &dyn ViewSink) {
    if let Some(token) = session_token {
        match db.delete_auth_session(token).await {
            Ok(()) => info!("Signed out."),
            Err(e) => error!("Failed to delete auth session: {:?}", e),
        }
    }
    sink.emit(ViewEvent::Navigate(Route::Landing));
}
