//! crates/socratic_core/src/dialogue.rs
//!
//! The dialogue view: loads a dialogue and its history, mirrors live inserts
//! into an ordered message list, runs user turns through the completion
//! endpoint and closes the dialogue.
//!
//! Persisted messages reach the list only through the realtime subscription
//! (plus the initial history load). Sending a message never pushes it into the
//! list directly.

use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::backend::Backend;
use crate::domain::{ChatTurn, CompletionRequest, DialogueStatus, Message, MessageRole, Topic};
use crate::ports::{PortError, PortResult};
use crate::realtime::Subscription;
use crate::view::{Notice, Route, SessionPhase, ViewEvent, ViewSink};

/// The seeded first assistant message for a dialogue with no history.
pub fn opening_message(question: &str) -> String {
    format!(
        "Welcome! Let's explore the question: \"{}\"\n\nTo begin, what are your initial thoughts on this topic?",
        question
    )
}

/// What happened to a submitted user message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Blank input, or the view was not accepting input.
    Ignored,
    /// The user message and the assistant reply were both persisted.
    Replied,
    /// The user message could not be stored; nothing was sent.
    SendFailed,
    /// The user message was stored but no assistant reply was persisted.
    ReplyFailed,
}

struct ViewState {
    phase: SessionPhase,
    topic: Option<Topic>,
    messages: Vec<Message>,
    torn_down: bool,
}

/// State shared between the view and its subscription task.
#[derive(Clone)]
struct SharedView {
    state: Arc<Mutex<ViewState>>,
    sink: Arc<dyn ViewSink>,
}

impl SharedView {
    fn lock(&self) -> MutexGuard<'_, ViewState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Appends a delivered row unless the view is gone or already holds it.
    fn apply_insert(&self, message: Message) {
        let mut state = self.lock();
        if state.torn_down {
            return;
        }
        if state.messages.iter().any(|m| m.id == message.id) {
            return;
        }
        state.messages.push(message.clone());
        drop(state);
        self.sink.emit(ViewEvent::MessageAppended(message));
    }

    fn set_phase(&self, phase: SessionPhase) {
        let mut state = self.lock();
        if state.torn_down || state.phase == phase {
            return;
        }
        state.phase = phase;
        drop(state);
        self.sink.emit(ViewEvent::PhaseChanged(phase));
    }

    /// Emits unless the view has been torn down.
    fn emit(&self, event: ViewEvent) {
        if self.lock().torn_down {
            return;
        }
        self.sink.emit(event);
    }
}

pub struct DialogueView {
    dialogue_id: Uuid,
    backend: Backend,
    shared: SharedView,
    subscription: Mutex<Option<Subscription>>,
}

impl DialogueView {
    pub fn new(backend: Backend, dialogue_id: Uuid, sink: Arc<dyn ViewSink>) -> Self {
        Self {
            dialogue_id,
            backend,
            shared: SharedView {
                state: Arc::new(Mutex::new(ViewState {
                    phase: SessionPhase::Loading,
                    topic: None,
                    messages: Vec::new(),
                    torn_down: false,
                })),
                sink,
            },
            subscription: Mutex::new(None),
        }
    }

    pub fn dialogue_id(&self) -> Uuid {
        self.dialogue_id
    }

    pub fn phase(&self) -> SessionPhase {
        self.shared.lock().phase
    }

    /// A snapshot of the rendered message list.
    pub fn messages(&self) -> Vec<Message> {
        self.shared.lock().messages.clone()
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription()
            .as_ref()
            .map(Subscription::is_active)
            .unwrap_or(false)
    }

    fn subscription(&self) -> MutexGuard<'_, Option<Subscription>> {
        self.subscription
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_torn_down(&self) -> bool {
        self.shared.lock().torn_down
    }

    /// Loads the dialogue, opens the live feed and seeds the opening message.
    ///
    /// The subscription is opened before the history is read so that the
    /// seeded message and anything inserted meanwhile are delivered. Rows
    /// seen by both paths are kept once. Calling `mount` again replaces the
    /// subscription rather than adding a second one.
    pub async fn mount(&self) -> SessionPhase {
        if self.is_torn_down() {
            warn!("Ignoring mount of torn-down view for dialogue {}.", self.dialogue_id);
            return self.phase();
        }
        self.shared.set_phase(SessionPhase::Loading);

        let previous = self.subscription().take();
        if let Some(previous) = previous {
            previous.unsubscribe().await;
        }

        let feed = self.shared.clone();
        let opened = Subscription::open(
            self.backend.realtime.as_ref(),
            self.dialogue_id,
            move |message| feed.apply_insert(message),
        )
        .await;
        match opened {
            Ok(subscription) => {
                *self.subscription() = Some(subscription);
            }
            Err(e) => {
                self.fail_loading(e).await;
                return SessionPhase::Failed;
            }
        }

        if let Err(e) = self.load_and_seed().await {
            self.fail_loading(e).await;
            return SessionPhase::Failed;
        }

        self.shared.set_phase(SessionPhase::AwaitingInput);
        info!("Dialogue {} is active.", self.dialogue_id);
        self.phase()
    }

    async fn load_and_seed(&self) -> PortResult<()> {
        let db = self.backend.db.as_ref();
        let loaded = db.get_dialogue_with_topic(self.dialogue_id).await?;
        let history = db.list_messages(self.dialogue_id).await?;
        let topic = loaded.topic;

        let needs_seed;
        {
            let mut state = self.shared.lock();
            if state.torn_down {
                return Ok(());
            }
            // Keep anything the feed delivered before the load resolved.
            let early: Vec<Message> = state
                .messages
                .drain(..)
                .filter(|m| !history.iter().any(|h| h.id == m.id))
                .collect();
            state.messages = history;
            state.messages.extend(early);
            needs_seed = state.messages.is_empty();
            state.topic = Some(topic.clone());
            let snapshot = state.messages.clone();
            drop(state);
            self.shared.emit(ViewEvent::Loaded {
                topic: topic.clone(),
                messages: snapshot,
            });
        }

        if needs_seed {
            let greeting = opening_message(&topic.question);
            db.insert_message(self.dialogue_id, MessageRole::Assistant, &greeting)
                .await?;
            info!("Seeded opening message for dialogue {}.", self.dialogue_id);
        }
        Ok(())
    }

    async fn fail_loading(&self, e: PortError) {
        error!("Failed to load dialogue {}: {:?}", self.dialogue_id, e);
        self.shared
            .emit(ViewEvent::Notice(Notice::error("Error loading dialogue", &e)));
        self.shared.set_phase(SessionPhase::Failed);
        self.shared.emit(ViewEvent::Navigate(Route::Topics));
        self.teardown().await;
    }

    /// Runs one user turn: store the message, ask the completion endpoint,
    /// store the reply.
    ///
    /// The two writes are independent; a failed completion leaves the user
    /// message in place without a reply. Nothing is retried.
    pub async fn send_message(&self, content: &str) -> TurnOutcome {
        let content = content.trim();
        if content.is_empty() {
            return TurnOutcome::Ignored;
        }

        // Checking and leaving `AwaitingInput` under one lock keeps a second
        // submission from slipping in while a reply is pending.
        let (topic, history) = {
            let mut state = self.shared.lock();
            if state.torn_down || !state.phase.accepts_input() {
                return TurnOutcome::Ignored;
            }
            let Some(topic) = state.topic.clone() else {
                return TurnOutcome::Ignored;
            };
            let history: Vec<ChatTurn> = state.messages.iter().map(ChatTurn::from).collect();
            state.phase = SessionPhase::AwaitingReply;
            (topic, history)
        };
        self.shared
            .emit(ViewEvent::PhaseChanged(SessionPhase::AwaitingReply));

        let outcome = self.run_turn(&topic, content, history).await;
        self.shared.set_phase(SessionPhase::AwaitingInput);
        outcome
    }

    async fn run_turn(
        &self,
        topic: &Topic,
        content: &str,
        mut history: Vec<ChatTurn>,
    ) -> TurnOutcome {
        let db = self.backend.db.as_ref();

        if let Err(e) = db
            .insert_message(self.dialogue_id, MessageRole::User, content)
            .await
        {
            error!("Failed to save user message for dialogue {}: {:?}", self.dialogue_id, e);
            self.shared.emit(ViewEvent::Notice(Notice::error("Error", &e)));
            return TurnOutcome::SendFailed;
        }

        history.push(ChatTurn {
            role: MessageRole::User,
            content: content.to_string(),
        });
        let request = CompletionRequest {
            messages: history,
            topic: topic.question.clone(),
            common_fallacies: topic.common_fallacies.clone(),
        };

        let reply = match self.backend.completion.complete(&request).await {
            Ok(reply) => reply,
            Err(e) => {
                error!("Completion failed for dialogue {}: {:?}", self.dialogue_id, e);
                self.shared.emit(ViewEvent::Notice(Notice::error("Error", &e)));
                return TurnOutcome::ReplyFailed;
            }
        };

        match db
            .insert_message(self.dialogue_id, MessageRole::Assistant, &reply)
            .await
        {
            Ok(_) => TurnOutcome::Replied,
            Err(e) => {
                error!(
                    "Failed to save assistant reply for dialogue {}: {:?}",
                    self.dialogue_id, e
                );
                self.shared.emit(ViewEvent::Notice(Notice::error("Error", &e)));
                TurnOutcome::ReplyFailed
            }
        }
    }

    /// Marks the dialogue completed and leaves for the topic list.
    ///
    /// Returns `false` (and stays on the view) when the update fails.
    pub async fn end_dialogue(&self) -> bool {
        if let Err(e) = self
            .backend
            .db
            .update_dialogue_status(self.dialogue_id, DialogueStatus::Completed)
            .await
        {
            error!("Failed to complete dialogue {}: {:?}", self.dialogue_id, e);
            self.shared.emit(ViewEvent::Notice(Notice::error("Error", &e)));
            return false;
        }

        info!("Dialogue {} completed.", self.dialogue_id);
        self.shared.emit(ViewEvent::Notice(Notice::info(
            "Dialogue completed",
            "Your philosophical journey has been saved.",
        )));
        self.shared.set_phase(SessionPhase::Completed);
        self.shared.emit(ViewEvent::Navigate(Route::Topics));
        self.teardown().await;
        true
    }

    /// Releases the subscription. After this no event reaches the sink and
    /// late results of in-flight calls leave the state untouched. A turn
    /// still running keeps going and persists its reply.
    pub async fn teardown(&self) {
        self.shared.lock().torn_down = true;
        let subscription = self.subscription().take();
        if let Some(subscription) = subscription {
            subscription.unsubscribe().await;
        }
    }
}

impl Drop for DialogueView {
    fn drop(&mut self) {
        self.shared.lock().torn_down = true;
        let subscription = self
            .subscription
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(mut subscription) = subscription.take() {
            subscription.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opening_message_quotes_the_question() {
        let text = opening_message("What is justice?");
        assert!(text.contains("\"What is justice?\""));
        assert!(text.ends_with("what are your initial thoughts on this topic?"));
    }
}
