//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the REST API endpoints and the master
//! definition for the OpenAPI specification.

use crate::web::{
    auth::{AuthResponse, LoginRequest, LogoutResponse, SignupRequest},
    middleware::MaybeUser,
    protocol::{DialoguePayload, MessagePayload, NoticePayload, TopicPayload},
    state::AppState,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    Extension,
};
use serde::{Deserialize, Serialize};
use socratic_core::{
    catalog, session, DialogueView, DialogueWithTopic, Notice, PortError, RecordingSink, User,
};
use std::sync::Arc;
use tracing::{error, warn};
use utoipa::{OpenApi, ToSchema};
use uuid::Uuid;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        list_topics_handler,
        start_dialogue_handler,
        get_dialogue_handler,
        end_dialogue_handler,
        crate::web::auth::signup_handler,
        crate::web::auth::login_handler,
        crate::web::auth::logout_handler,
    ),
    components(
        schemas(
            TopicPayload,
            MessagePayload,
            DialoguePayload,
            NoticePayload,
            StartDialogueRequest,
            StartDialogueResponse,
            DialogueDetailResponse,
            EndDialogueResponse,
            SignupRequest,
            LoginRequest,
            AuthResponse,
            LogoutResponse,
        )
    ),
    tags(
        (name = "Socratic Tutor API", description = "Topics, dialogues and the dialogue channel.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// Error Responses
//=========================================================================================

/// Every failed request answers with a status and the notice the client should show.
pub type ErrorResponse = (StatusCode, Json<NoticePayload>);

pub fn status_for(e: &PortError) -> StatusCode {
    match e {
        PortError::NotFound(_) => StatusCode::NOT_FOUND,
        PortError::Unauthenticated => StatusCode::UNAUTHORIZED,
        PortError::Unauthorized => StatusCode::FORBIDDEN,
        PortError::Completion(_) => StatusCode::BAD_GATEWAY,
        PortError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn error_response(title: &str, e: &PortError) -> ErrorResponse {
    (status_for(e), Json(Notice::error(title, e).into()))
}

/// Loads a dialogue, treating someone else's dialogue as missing.
pub async fn load_owned_dialogue(
    app_state: &AppState,
    user: &User,
    dialogue_id: Uuid,
) -> Result<DialogueWithTopic, PortError> {
    let loaded = app_state
        .backend
        .db
        .get_dialogue_with_topic(dialogue_id)
        .await?;
    if loaded.dialogue.user_id != user.user_id {
        warn!(
            "User {} asked for dialogue {} owned by someone else.",
            user.user_id, dialogue_id
        );
        return Err(PortError::NotFound(format!("Dialogue {} not found", dialogue_id)));
    }
    Ok(loaded)
}

//=========================================================================================
// API Request and Response Structs
//=========================================================================================

#[derive(Deserialize, ToSchema)]
pub struct StartDialogueRequest {
    pub topic_id: Uuid,
}

/// The response payload sent after successfully starting a dialogue.
#[derive(Serialize, ToSchema)]
pub struct StartDialogueResponse {
    pub dialogue_id: Uuid,
    /// Where the client should navigate next.
    pub path: String,
}

#[derive(Serialize, ToSchema)]
pub struct DialogueDetailResponse {
    pub dialogue: DialoguePayload,
    pub messages: Vec<MessagePayload>,
}

#[derive(Serialize, ToSchema)]
pub struct EndDialogueResponse {
    pub notice: NoticePayload,
    pub path: String,
}

//=========================================================================================
// REST API Handlers
//=========================================================================================

/// List every topic in the catalog, ordered by title.
#[utoipa::path(
    get,
    path = "/api/topics",
    responses(
        (status = 200, description = "The topic catalog", body = [TopicPayload]),
        (status = 500, description = "The catalog could not be read", body = NoticePayload)
    )
)]
pub async fn list_topics_handler(
    State(app_state): State<Arc<AppState>>,
) -> Result<Json<Vec<TopicPayload>>, ErrorResponse> {
    let sink = RecordingSink::new();
    let topics = catalog::load_topics(app_state.backend.db.as_ref(), &sink).await;
    if let Some(notice) = sink.notices().into_iter().next() {
        return Err((StatusCode::INTERNAL_SERVER_ERROR, Json(notice.into())));
    }
    Ok(Json(topics.into_iter().map(Into::into).collect()))
}

/// Start a new dialogue on a topic for the signed-in user.
///
/// Every call creates a new dialogue, even for the same topic.
#[utoipa::path(
    post,
    path = "/api/dialogues",
    request_body = StartDialogueRequest,
    responses(
        (status = 201, description = "Dialogue created", body = StartDialogueResponse),
        (status = 401, description = "Not signed in", body = NoticePayload),
        (status = 500, description = "The dialogue could not be created", body = NoticePayload)
    )
)]
pub async fn start_dialogue_handler(
    State(app_state): State<Arc<AppState>>,
    MaybeUser(user): MaybeUser,
    Json(req): Json<StartDialogueRequest>,
) -> Result<impl IntoResponse, ErrorResponse> {
    let sink = RecordingSink::new();
    let started = session::select_topic(
        app_state.backend.db.as_ref(),
        user.as_ref(),
        req.topic_id,
        &sink,
    )
    .await;

    match (started, sink.last_navigation()) {
        (Some(dialogue_id), Some(route)) => Ok((
            StatusCode::CREATED,
            Json(StartDialogueResponse {
                dialogue_id,
                path: route.to_string(),
            }),
        )),
        _ => {
            let status = if user.is_none() {
                StatusCode::UNAUTHORIZED
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            };
            let notice = sink.notices().into_iter().next().unwrap_or_else(|| {
                Notice::error(
                    "Error starting dialogue",
                    &PortError::Unexpected("no dialogue was created".to_string()),
                )
            });
            Err((status, Json(notice.into())))
        }
    }
}

/// Fetch one of the caller's dialogues with its topic and full history.
#[utoipa::path(
    get,
    path = "/api/dialogues/{id}",
    params(("id" = Uuid, Path, description = "The dialogue id.")),
    responses(
        (status = 200, description = "The dialogue and its messages in creation order", body = DialogueDetailResponse),
        (status = 401, description = "Not signed in"),
        (status = 404, description = "No such dialogue for this user", body = NoticePayload)
    )
)]
pub async fn get_dialogue_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path(dialogue_id): Path<Uuid>,
) -> Result<Json<DialogueDetailResponse>, ErrorResponse> {
    let result = async {
        let loaded = load_owned_dialogue(&app_state, &user, dialogue_id).await?;
        let messages = app_state.backend.db.list_messages(dialogue_id).await?;
        Ok::<_, PortError>((loaded, messages))
    }
    .await;

    match result {
        Ok((loaded, messages)) => Ok(Json(DialogueDetailResponse {
            dialogue: loaded.into(),
            messages: messages.into_iter().map(Into::into).collect(),
        })),
        Err(e) => {
            error!("Failed to load dialogue {}: {:?}", dialogue_id, e);
            Err(error_response("Error loading dialogue", &e))
        }
    }
}

/// Mark one of the caller's dialogues completed.
#[utoipa::path(
    post,
    path = "/api/dialogues/{id}/end",
    params(("id" = Uuid, Path, description = "The dialogue id.")),
    responses(
        (status = 200, description = "Dialogue completed", body = EndDialogueResponse),
        (status = 401, description = "Not signed in"),
        (status = 404, description = "No such dialogue for this user", body = NoticePayload),
        (status = 500, description = "The status could not be updated", body = NoticePayload)
    )
)]
pub async fn end_dialogue_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path(dialogue_id): Path<Uuid>,
) -> Result<Json<EndDialogueResponse>, ErrorResponse> {
    if let Err(e) = load_owned_dialogue(&app_state, &user, dialogue_id).await {
        return Err(error_response("Error", &e));
    }

    let sink = Arc::new(RecordingSink::new());
    let view = DialogueView::new(app_state.backend.clone(), dialogue_id, sink.clone());
    let ended = view.end_dialogue().await;

    let notice = sink.notices().into_iter().next();
    match (ended, notice) {
        (true, Some(notice)) => Ok(Json(EndDialogueResponse {
            notice: notice.into(),
            path: sink
                .last_navigation()
                .map(|route| route.to_string())
                .unwrap_or_else(|| "/topics".to_string()),
        })),
        (_, notice) => {
            let notice = notice.unwrap_or_else(|| {
                Notice::error("Error", &PortError::Unexpected("dialogue not ended".to_string()))
            });
            Err((StatusCode::INTERNAL_SERVER_ERROR, Json(notice.into())))
        }
    }
}
