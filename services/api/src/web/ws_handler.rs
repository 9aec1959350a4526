//! services/api/src/web/ws_handler.rs
//!
//! The control loop for one dialogue channel. A connection drives exactly one
//! `DialogueView`: view events are pushed to the browser by a forwarding task,
//! while this loop turns client frames into turns and the end action.

use crate::web::{
    protocol::{ClientMessage, ServerMessage},
    rest::load_owned_dialogue,
    state::AppState,
};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::Response,
    Extension,
};
use futures::{
    stream::{SplitSink, Stream, StreamExt},
    SinkExt,
};
use socratic_core::{DialogueView, Notice, Route, SessionPhase, User, ViewEvent};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// The handler for upgrading HTTP requests to WebSocket connections.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path(dialogue_id): Path<Uuid>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, app_state, user, dialogue_id))
}

async fn handle_socket(
    socket: WebSocket,
    app_state: Arc<AppState>,
    user: User,
    dialogue_id: Uuid,
) {
    info!(
        "New dialogue channel for user {} on dialogue {}.",
        user.user_id, dialogue_id
    );
    let (mut sender, mut receiver) = socket.split();

    // --- 1. Ownership ---
    if let Err(e) = load_owned_dialogue(&app_state, &user, dialogue_id).await {
        error!("Refusing dialogue channel {}: {:?}", dialogue_id, e);
        let rejection = [
            ViewEvent::Notice(Notice::error("Error loading dialogue", &e)),
            ViewEvent::Navigate(Route::Topics),
        ];
        for event in rejection {
            if let Err(e) = send_json(&mut sender, &ServerMessage::from(event)).await {
                warn!("Failed to notify client: {}", e);
                break;
            }
        }
        return;
    }

    // --- 2. Mount ---
    let (events_tx, events_rx) = mpsc::unbounded_channel::<ViewEvent>();
    let forwarder = tokio::spawn(forward_events(events_rx, sender));

    let view = DialogueView::new(app_state.backend.clone(), dialogue_id, Arc::new(events_tx));
    if view.mount().await != SessionPhase::Failed {
        // --- 3. Main Message Loop ---
        while let Some(command) = next_command(&mut receiver).await {
            let end_requested = match command {
                ClientMessage::SendMessage { content } => {
                    match turn_while_listening(&view, &content, &mut receiver).await {
                        AfterTurn::Continue => false,
                        AfterTurn::EndRequested => true,
                        AfterTurn::Closed => break,
                    }
                }
                ClientMessage::EndDialogue => true,
            };
            if end_requested && view.end_dialogue().await {
                break;
            }
        }
    }

    // --- 4. Cleanup ---
    view.teardown().await;
    drop(view);
    // The forwarder drains what the view already emitted, e.g. the closing navigation.
    if let Err(e) = forwarder.await {
        error!("Event forwarder for dialogue {} panicked: {:?}", dialogue_id, e);
    }
    info!("Dialogue channel {} closed.", dialogue_id);
}

#[derive(Debug, PartialEq, Eq)]
enum AfterTurn {
    Continue,
    /// The client asked to end while the reply was pending.
    EndRequested,
    Closed,
}

/// Runs one turn while still reading the socket, so extra submissions are
/// dropped instead of queued. A disconnect tears the view down but the turn
/// runs to completion, so its reply is still persisted.
async fn turn_while_listening<S>(
    view: &DialogueView,
    content: &str,
    receiver: &mut S,
) -> AfterTurn
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let turn = view.send_message(content);
    tokio::pin!(turn);
    let mut end_requested = false;

    let outcome = loop {
        tokio::select! {
            outcome = &mut turn => break outcome,
            command = next_command(receiver) => match command {
                Some(ClientMessage::SendMessage { .. }) => {
                    warn!("Ignoring message sent while awaiting a reply.");
                }
                Some(ClientMessage::EndDialogue) => end_requested = true,
                None => {
                    info!(
                        "Client left dialogue {} mid-turn; finishing the turn.",
                        view.dialogue_id()
                    );
                    view.teardown().await;
                    let outcome = (&mut turn).await;
                    info!("Turn on dialogue {} finished: {:?}", view.dialogue_id(), outcome);
                    return if end_requested {
                        AfterTurn::EndRequested
                    } else {
                        AfterTurn::Closed
                    };
                }
            },
        }
    };
    info!("Turn on dialogue {} finished: {:?}", view.dialogue_id(), outcome);
    if end_requested {
        AfterTurn::EndRequested
    } else {
        AfterTurn::Continue
    }
}

/// Reads frames until the next well-formed client command. `None` means the
/// client went away.
async fn next_command<S>(receiver: &mut S) -> Option<ClientMessage>
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    while let Some(frame) = receiver.next().await {
        match frame {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(command) => return Some(command),
                Err(e) => warn!("Failed to deserialize client message: {}", e),
            },
            Ok(Message::Close(_)) => {
                info!("Client sent close message.");
                return None;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("Dialogue channel read failed: {}", e);
                return None;
            }
        }
    }
    None
}

/// Pushes view events to the browser until every sender is gone.
async fn forward_events(
    mut events: mpsc::UnboundedReceiver<ViewEvent>,
    mut sender: SplitSink<WebSocket, Message>,
) {
    while let Some(event) = events.recv().await {
        if let Err(e) = send_json(&mut sender, &ServerMessage::from(event)).await {
            warn!("Failed to push event to client: {}", e);
            return;
        }
    }
    let _ = sender.close().await;
}

async fn send_json(
    sender: &mut SplitSink<WebSocket, Message>,
    message: &ServerMessage,
) -> Result<(), axum::Error> {
    let json = serde_json::to_string(message).map_err(axum::Error::new)?;
    sender.send(Message::Text(json.into())).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use socratic_core::{
        Backend, CompletionRequest, CompletionService, DatabaseService, MemoryBackend,
        MessageRole, PortResult, RecordingSink,
    };
    use std::time::Duration;

    const REPLY: &str = "What do you mean by fair?";

    /// Answers only after the client frames have run out.
    struct SlowReplies;

    #[async_trait]
    impl CompletionService for SlowReplies {
        async fn complete(&self, _request: &CompletionRequest) -> PortResult<String> {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(REPLY.to_string())
        }
    }

    async fn mounted_view() -> (Arc<MemoryBackend>, Arc<RecordingSink>, DialogueView) {
        let memory = Arc::new(MemoryBackend::with_topics(MemoryBackend::sample_topics()));
        let user = memory.add_user(Uuid::new_v4(), "student@example.com");
        let topic_id = memory.list_topics().await.unwrap()[0].id;
        let dialogue = memory.create_dialogue(user.user_id, topic_id).await.unwrap();
        let backend = Backend::new(memory.clone(), memory.clone(), Arc::new(SlowReplies));
        let sink = Arc::new(RecordingSink::new());
        let view = DialogueView::new(backend, dialogue.id, sink.clone());
        assert_eq!(view.mount().await, SessionPhase::AwaitingInput);
        (memory, sink, view)
    }

    fn frames(texts: &[&str]) -> impl Stream<Item = Result<Message, axum::Error>> + Unpin {
        let frames: Vec<Result<Message, axum::Error>> = texts
            .iter()
            .map(|text| Ok(Message::Text(text.to_string().into())))
            .collect();
        futures::stream::iter(frames)
    }

    fn roles(memory: &MemoryBackend, dialogue_id: Uuid) -> Vec<MessageRole> {
        memory
            .stored_messages(dialogue_id)
            .iter()
            .map(|m| m.role)
            .collect()
    }

    #[tokio::test]
    async fn disconnect_mid_turn_still_persists_the_reply() {
        let (memory, sink, view) = mounted_view().await;
        let mut socket = frames(&[]);

        let after = turn_while_listening(&view, "Justice is fairness", &mut socket).await;

        assert_eq!(after, AfterTurn::Closed);
        assert!(view.is_torn_down());
        let stored = memory.stored_messages(view.dialogue_id());
        assert_eq!(
            roles(&memory, view.dialogue_id()),
            vec![MessageRole::Assistant, MessageRole::User, MessageRole::Assistant]
        );
        assert_eq!(stored[2].content, REPLY);
        // The reply lands in the store but never reaches a torn-down view.
        assert!(!view.messages().iter().any(|m| m.id == stored[2].id));
        assert!(!sink
            .events()
            .iter()
            .any(|e| matches!(e, ViewEvent::MessageAppended(m) if m.id == stored[2].id)));
    }

    #[tokio::test]
    async fn end_sent_before_a_disconnect_is_kept() {
        let (memory, _sink, view) = mounted_view().await;
        let mut socket = frames(&[r#"{"type":"end_dialogue"}"#]);

        let after = turn_while_listening(&view, "Justice is fairness", &mut socket).await;

        assert_eq!(after, AfterTurn::EndRequested);
        assert_eq!(memory.stored_messages(view.dialogue_id()).len(), 3);
    }

    #[tokio::test]
    async fn submissions_during_a_turn_are_dropped() {
        let (memory, _sink, view) = mounted_view().await;
        let mut socket = frames(&[
            r#"{"type":"send_message","content":"Also, laws"}"#,
            r#"{"type":"send_message","content":"And courts"}"#,
        ]);

        turn_while_listening(&view, "Justice is fairness", &mut socket).await;

        let roles = roles(&memory, view.dialogue_id());
        assert_eq!(roles.iter().filter(|r| **r == MessageRole::User).count(), 1);
        assert_eq!(roles.len(), 3);
    }
}
