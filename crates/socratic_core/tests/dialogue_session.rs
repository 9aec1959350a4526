//! End-to-end dialogue sessions against the in-process backend.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use uuid::Uuid;

use socratic_core::auth::{current_user, sign_out};
use socratic_core::catalog::load_topics;
use socratic_core::session::select_topic;
use socratic_core::{
    opening_message, Backend, CompletionRequest, CompletionService, DatabaseService, Dialogue,
    DialogueStatus, DialogueView, DialogueWithTopic, MemoryBackend, Message, MessageRole,
    PortError, PortResult, RecordingSink, Route, SessionPhase, Topic, TurnOutcome, User,
    UserCredentials, ViewEvent,
};

//=========================================================================================
// Fakes and helpers
//=========================================================================================

#[derive(Default)]
struct ScriptedCompletion {
    replies: Mutex<VecDeque<PortResult<String>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedCompletion {
    fn replying(replies: Vec<PortResult<String>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionService for ScriptedCompletion {
    async fn complete(&self, request: &CompletionRequest) -> PortResult<String> {
        self.requests.lock().unwrap().push(request.clone());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(PortError::Completion("no scripted reply".to_string())))
    }
}

/// Holds every completion until the test opens the gate.
struct GatedCompletion {
    gate: Notify,
}

#[async_trait]
impl CompletionService for GatedCompletion {
    async fn complete(&self, _request: &CompletionRequest) -> PortResult<String> {
        self.gate.notified().await;
        Ok("Why do you think so?".to_string())
    }
}

enum Quirk {
    /// The topic catalog is unreachable.
    CatalogDown,
    /// Another writer appends this row while the history is being read.
    InsertWhileListing(&'static str),
}

/// A memory store with one misbehaving call.
struct QuirkyStore {
    inner: Arc<MemoryBackend>,
    quirk: Quirk,
}

#[async_trait]
impl DatabaseService for QuirkyStore {
    async fn create_user_with_email(&self, email: &str, hashed: &str) -> PortResult<User> {
        self.inner.create_user_with_email(email, hashed).await
    }
    async fn get_user_by_email(&self, email: &str) -> PortResult<UserCredentials> {
        self.inner.get_user_by_email(email).await
    }
    async fn get_user_by_id(&self, user_id: Uuid) -> PortResult<User> {
        self.inner.get_user_by_id(user_id).await
    }
    async fn create_auth_session(
        &self,
        session_id: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()> {
        self.inner.create_auth_session(session_id, user_id, expires_at).await
    }
    async fn validate_auth_session(&self, session_id: &str) -> PortResult<Uuid> {
        self.inner.validate_auth_session(session_id).await
    }
    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()> {
        self.inner.delete_auth_session(session_id).await
    }
    async fn list_topics(&self) -> PortResult<Vec<Topic>> {
        match self.quirk {
            Quirk::CatalogDown => Err(PortError::Unexpected("connection refused".to_string())),
            _ => self.inner.list_topics().await,
        }
    }
    async fn create_dialogue(&self, user_id: Uuid, topic_id: Uuid) -> PortResult<Dialogue> {
        self.inner.create_dialogue(user_id, topic_id).await
    }
    async fn get_dialogue_with_topic(&self, dialogue_id: Uuid) -> PortResult<DialogueWithTopic> {
        self.inner.get_dialogue_with_topic(dialogue_id).await
    }
    async fn update_dialogue_status(
        &self,
        dialogue_id: Uuid,
        status: DialogueStatus,
    ) -> PortResult<()> {
        self.inner.update_dialogue_status(dialogue_id, status).await
    }
    async fn list_messages(&self, dialogue_id: Uuid) -> PortResult<Vec<Message>> {
        if let Quirk::InsertWhileListing(content) = self.quirk {
            self.inner
                .insert_message(dialogue_id, MessageRole::User, content)
                .await?;
        }
        self.inner.list_messages(dialogue_id).await
    }
    async fn insert_message(
        &self,
        dialogue_id: Uuid,
        role: MessageRole,
        content: &str,
    ) -> PortResult<Message> {
        self.inner.insert_message(dialogue_id, role, content).await
    }
}

fn justice() -> Topic {
    Topic {
        id: Uuid::new_v4(),
        title: "Justice".to_string(),
        question: "What is justice?".to_string(),
        description: "Giving each their due?".to_string(),
        common_fallacies: vec!["Appeal to authority".to_string(), "False dilemma".to_string()],
    }
}

struct Fixture {
    store: Arc<MemoryBackend>,
    topic: Topic,
    user: User,
}

impl Fixture {
    fn new() -> Self {
        let topic = justice();
        let store = Arc::new(MemoryBackend::with_topics(vec![topic.clone()]));
        let user = store.add_user(Uuid::new_v4(), "student@example.com");
        Self { store, topic, user }
    }

    fn backend(&self, completion: Arc<dyn CompletionService>) -> Backend {
        Backend::new(self.store.clone(), self.store.clone(), completion)
    }

    async fn new_dialogue(&self) -> Uuid {
        self.store
            .create_dialogue(self.user.user_id, self.topic.id)
            .await
            .unwrap()
            .id
    }
}

async fn wait_for_messages(view: &DialogueView, count: usize) -> Vec<Message> {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let messages = view.messages();
            if messages.len() >= count {
                return messages;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("messages did not reach the view")
}

fn count_role(messages: &[Message], role: MessageRole) -> usize {
    messages.iter().filter(|m| m.role == role).count()
}

//=========================================================================================
// Topic catalog and session start
//=========================================================================================

#[tokio::test]
async fn catalog_failure_leaves_list_empty_and_notifies() {
    let store = QuirkyStore {
        inner: Arc::new(MemoryBackend::with_topics(vec![justice()])),
        quirk: Quirk::CatalogDown,
    };
    let sink = RecordingSink::new();

    let topics = load_topics(&store, &sink).await;

    assert!(topics.is_empty());
    let notices = sink.notices();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].title, "Error loading topics");
    assert!(notices[0].description.contains("connection refused"));
}

#[tokio::test]
async fn unauthenticated_selection_creates_nothing() {
    let fixture = Fixture::new();
    let sink = RecordingSink::new();

    let started = select_topic(fixture.store.as_ref(), None, fixture.topic.id, &sink).await;

    assert!(started.is_none());
    assert_eq!(fixture.store.dialogue_count(), 0);
    let notices = sink.notices();
    assert_eq!(notices[0].title, "Error starting dialogue");
    assert_eq!(notices[0].description, "Not authenticated");
    assert_eq!(sink.last_navigation(), None);
}

#[tokio::test]
async fn selecting_twice_creates_two_dialogues() {
    let fixture = Fixture::new();
    let sink = RecordingSink::new();

    let first = select_topic(fixture.store.as_ref(), Some(&fixture.user), fixture.topic.id, &sink)
        .await
        .unwrap();
    let second = select_topic(fixture.store.as_ref(), Some(&fixture.user), fixture.topic.id, &sink)
        .await
        .unwrap();

    assert_ne!(first, second);
    assert_eq!(fixture.store.dialogue_count(), 2);
    assert_eq!(
        fixture.store.dialogue(first).unwrap().status,
        DialogueStatus::Active
    );
    assert_eq!(sink.last_navigation(), Some(Route::Dialogue(second)));
}

//=========================================================================================
// Loading and seeding
//=========================================================================================

#[tokio::test]
async fn fresh_dialogue_is_seeded_exactly_once() {
    let fixture = Fixture::new();
    let dialogue_id = fixture.new_dialogue().await;
    let sink = Arc::new(RecordingSink::new());
    let view = DialogueView::new(
        fixture.backend(ScriptedCompletion::replying(vec![])),
        dialogue_id,
        sink.clone(),
    );

    assert_eq!(view.mount().await, SessionPhase::AwaitingInput);
    let shown = wait_for_messages(&view, 1).await;

    assert_eq!(shown.len(), 1);
    assert_eq!(shown[0].role, MessageRole::Assistant);
    assert!(shown[0].content.contains("What is justice?"));
    assert_eq!(shown[0].content, opening_message("What is justice?"));

    // Mounting again must neither reseed nor stack a second subscription.
    view.mount().await;
    assert_eq!(fixture.store.stored_messages(dialogue_id).len(), 1);
    assert_eq!(fixture.store.subscriber_count(dialogue_id), 1);
    assert_eq!(view.messages().len(), 1);
}

#[tokio::test]
async fn existing_history_is_loaded_in_creation_order_without_seeding() {
    let fixture = Fixture::new();
    let dialogue_id = fixture.new_dialogue().await;
    for (role, text) in [
        (MessageRole::Assistant, "Welcome"),
        (MessageRole::User, "Justice is fairness"),
        (MessageRole::Assistant, "Fair to whom?"),
    ] {
        fixture
            .store
            .insert_message(dialogue_id, role, text)
            .await
            .unwrap();
    }
    let sink = Arc::new(RecordingSink::new());
    let view = DialogueView::new(
        fixture.backend(ScriptedCompletion::replying(vec![])),
        dialogue_id,
        sink.clone(),
    );

    view.mount().await;

    let contents: Vec<String> = view.messages().into_iter().map(|m| m.content).collect();
    assert_eq!(contents, vec!["Welcome", "Justice is fairness", "Fair to whom?"]);
    assert_eq!(fixture.store.stored_messages(dialogue_id).len(), 3);
    assert!(sink
        .events()
        .iter()
        .any(|e| matches!(e, ViewEvent::Loaded { messages, .. } if messages.len() == 3)));
}

#[tokio::test]
async fn row_seen_by_history_and_feed_is_shown_once() {
    let fixture = Fixture::new();
    let dialogue_id = fixture.new_dialogue().await;
    let store = Arc::new(QuirkyStore {
        inner: fixture.store.clone(),
        quirk: Quirk::InsertWhileListing("I was typing in another tab"),
    });
    let backend = Backend::new(
        store,
        fixture.store.clone(),
        ScriptedCompletion::replying(vec![]),
    );
    let sink = Arc::new(RecordingSink::new());
    let view = DialogueView::new(backend, dialogue_id, sink.clone());

    assert_eq!(view.mount().await, SessionPhase::AwaitingInput);
    // Give the feed time to deliver the same row a second time.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let shown = view.messages();
    assert_eq!(shown.len(), 1);
    assert_eq!(shown[0].content, "I was typing in another tab");
    assert_eq!(fixture.store.stored_messages(dialogue_id).len(), 1);
    let appended_after_load = sink
        .events()
        .iter()
        .skip_while(|e| !matches!(e, ViewEvent::Loaded { .. }))
        .filter(|e| matches!(e, ViewEvent::MessageAppended(m) if m.id == shown[0].id))
        .count();
    assert_eq!(appended_after_load, 0);
}

#[tokio::test]
async fn unknown_dialogue_fails_and_returns_to_topics() {
    let fixture = Fixture::new();
    let missing = Uuid::new_v4();
    let sink = Arc::new(RecordingSink::new());
    let view = DialogueView::new(
        fixture.backend(ScriptedCompletion::replying(vec![])),
        missing,
        sink.clone(),
    );

    assert_eq!(view.mount().await, SessionPhase::Failed);

    assert_eq!(sink.last_navigation(), Some(Route::Topics));
    assert_eq!(sink.notices()[0].title, "Error loading dialogue");
    assert!(!view.is_subscribed());
    assert_eq!(fixture.store.subscriber_count(missing), 0);
}

//=========================================================================================
// Turns
//=========================================================================================

#[tokio::test]
async fn successful_turn_persists_reply_once_and_shows_it() {
    let fixture = Fixture::new();
    let dialogue_id = fixture.new_dialogue().await;
    let completion = ScriptedCompletion::replying(vec![Ok("Consider this...".to_string())]);
    let view = DialogueView::new(
        fixture.backend(completion.clone()),
        dialogue_id,
        Arc::new(RecordingSink::new()),
    );
    view.mount().await;
    wait_for_messages(&view, 1).await;

    let outcome = view.send_message("  Justice is fairness  ").await;
    assert_eq!(outcome, TurnOutcome::Replied);

    let shown = wait_for_messages(&view, 3).await;
    assert_eq!(shown[1].role, MessageRole::User);
    assert_eq!(shown[1].content, "Justice is fairness");
    assert_eq!(shown[2].role, MessageRole::Assistant);
    assert_eq!(shown[2].content, "Consider this...");

    let stored = fixture.store.stored_messages(dialogue_id);
    let replies: Vec<&Message> = stored
        .iter()
        .filter(|m| m.content == "Consider this...")
        .collect();
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].role, MessageRole::Assistant);

    let requests = completion.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].topic, "What is justice?");
    assert_eq!(requests[0].common_fallacies, fixture.topic.common_fallacies);
    let roles: Vec<MessageRole> = requests[0].messages.iter().map(|t| t.role).collect();
    assert_eq!(roles, vec![MessageRole::Assistant, MessageRole::User]);
    assert_eq!(requests[0].messages[1].content, "Justice is fairness");
    assert_eq!(view.phase(), SessionPhase::AwaitingInput);
}

#[tokio::test]
async fn failed_invocation_keeps_user_message_only() {
    let fixture = Fixture::new();
    let dialogue_id = fixture.new_dialogue().await;
    let completion = ScriptedCompletion::replying(vec![Err(PortError::Completion(
        "function returned 500".to_string(),
    ))]);
    let sink = Arc::new(RecordingSink::new());
    let view = DialogueView::new(fixture.backend(completion), dialogue_id, sink.clone());
    view.mount().await;
    wait_for_messages(&view, 1).await;
    let before = fixture.store.stored_messages(dialogue_id);

    let outcome = view.send_message("Justice is fairness").await;

    assert_eq!(outcome, TurnOutcome::ReplyFailed);
    let after = fixture.store.stored_messages(dialogue_id);
    let added = &after[before.len()..];
    assert_eq!(added.len(), 1);
    assert_eq!(added[0].role, MessageRole::User);
    assert_eq!(
        count_role(&after, MessageRole::Assistant),
        count_role(&before, MessageRole::Assistant)
    );

    let errors: Vec<_> = sink.notices().into_iter().filter(|n| n.is_error()).collect();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].description.contains("function returned 500"));
    assert_eq!(view.phase(), SessionPhase::AwaitingInput);
}

#[tokio::test]
async fn blank_input_is_ignored() {
    let fixture = Fixture::new();
    let dialogue_id = fixture.new_dialogue().await;
    let completion = ScriptedCompletion::replying(vec![]);
    let view = DialogueView::new(
        fixture.backend(completion.clone()),
        dialogue_id,
        Arc::new(RecordingSink::new()),
    );
    view.mount().await;

    assert_eq!(view.send_message("   \n ").await, TurnOutcome::Ignored);
    assert!(completion.requests().is_empty());
    assert_eq!(fixture.store.stored_messages(dialogue_id).len(), 1);
}

#[tokio::test]
async fn input_is_disabled_while_a_reply_is_pending() {
    let fixture = Fixture::new();
    let dialogue_id = fixture.new_dialogue().await;
    let completion = Arc::new(GatedCompletion { gate: Notify::new() });
    let view = DialogueView::new(
        fixture.backend(completion.clone()),
        dialogue_id,
        Arc::new(RecordingSink::new()),
    );
    view.mount().await;
    let view = Arc::new(view);

    let pending = tokio::spawn({
        let view = view.clone();
        async move { view.send_message("first thought").await }
    });
    tokio::time::timeout(Duration::from_secs(2), async {
        while view.phase() != SessionPhase::AwaitingReply {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("turn never started");

    assert_eq!(view.send_message("second thought").await, TurnOutcome::Ignored);

    completion.gate.notify_one();
    assert_eq!(pending.await.unwrap(), TurnOutcome::Replied);
    let users = count_role(&fixture.store.stored_messages(dialogue_id), MessageRole::User);
    assert_eq!(users, 1);
}

#[tokio::test]
async fn rendered_messages_follow_creation_order() {
    let fixture = Fixture::new();
    let dialogue_id = fixture.new_dialogue().await;
    let completion = ScriptedCompletion::replying(vec![
        Ok("Why?".to_string()),
        Ok("Is that always so?".to_string()),
        Ok("What follows?".to_string()),
    ]);
    let view = DialogueView::new(
        fixture.backend(completion),
        dialogue_id,
        Arc::new(RecordingSink::new()),
    );
    view.mount().await;

    for (turn, text) in ["one", "two", "three"].into_iter().enumerate() {
        wait_for_messages(&view, 1 + 2 * turn).await;
        assert_eq!(view.send_message(text).await, TurnOutcome::Replied);
    }

    let shown = wait_for_messages(&view, 7).await;
    assert!(shown.windows(2).all(|w| w[0].created_at <= w[1].created_at));
    let stored_ids: Vec<Uuid> = fixture
        .store
        .stored_messages(dialogue_id)
        .into_iter()
        .map(|m| m.id)
        .collect();
    let shown_ids: Vec<Uuid> = shown.into_iter().map(|m| m.id).collect();
    assert_eq!(shown_ids, stored_ids);
}

//=========================================================================================
// Ending and teardown
//=========================================================================================

#[tokio::test]
async fn ending_marks_completed_and_is_idempotent() {
    let fixture = Fixture::new();
    let dialogue_id = fixture.new_dialogue().await;
    let sink = Arc::new(RecordingSink::new());
    let view = DialogueView::new(
        fixture.backend(ScriptedCompletion::replying(vec![])),
        dialogue_id,
        sink.clone(),
    );
    view.mount().await;

    assert!(view.end_dialogue().await);
    assert_eq!(
        fixture.store.dialogue(dialogue_id).unwrap().status,
        DialogueStatus::Completed
    );
    assert_eq!(sink.last_navigation(), Some(Route::Topics));
    assert!(sink
        .notices()
        .iter()
        .any(|n| n.title == "Dialogue completed" && !n.is_error()));
    assert_eq!(fixture.store.subscriber_count(dialogue_id), 0);

    assert!(view.end_dialogue().await);
    assert_eq!(
        fixture.store.dialogue(dialogue_id).unwrap().status,
        DialogueStatus::Completed
    );
}

#[tokio::test]
async fn teardown_stops_all_further_updates() {
    let fixture = Fixture::new();
    let dialogue_id = fixture.new_dialogue().await;
    let sink = Arc::new(RecordingSink::new());
    let view = DialogueView::new(
        fixture.backend(ScriptedCompletion::replying(vec![])),
        dialogue_id,
        sink.clone(),
    );
    view.mount().await;
    wait_for_messages(&view, 1).await;
    let events_before = sink.events().len();

    view.teardown().await;
    fixture
        .store
        .insert_message(dialogue_id, MessageRole::User, "from another tab")
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(view.messages().len(), 1);
    assert_eq!(sink.events().len(), events_before);
    assert_eq!(fixture.store.subscriber_count(dialogue_id), 0);
    assert!(!view.is_subscribed());
}

#[tokio::test]
async fn turn_finishing_after_teardown_leaves_the_view_alone() {
    let fixture = Fixture::new();
    let dialogue_id = fixture.new_dialogue().await;
    let completion = Arc::new(GatedCompletion { gate: Notify::new() });
    let sink = Arc::new(RecordingSink::new());
    let view = DialogueView::new(fixture.backend(completion.clone()), dialogue_id, sink.clone());
    view.mount().await;
    wait_for_messages(&view, 1).await;
    let view = Arc::new(view);

    let pending = tokio::spawn({
        let view = view.clone();
        async move { view.send_message("Justice is fairness").await }
    });
    tokio::time::timeout(Duration::from_secs(2), async {
        while fixture.store.stored_messages(dialogue_id).len() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("user message never stored");

    view.teardown().await;
    let events_before = sink.events().len();
    let messages_before = view.messages();

    completion.gate.notify_one();
    assert_eq!(pending.await.unwrap(), TurnOutcome::Replied);
    tokio::time::sleep(Duration::from_millis(50)).await;

    // The reply is persisted, but nothing reaches the torn-down view.
    assert_eq!(fixture.store.stored_messages(dialogue_id).len(), 3);
    assert_eq!(sink.events().len(), events_before);
    assert_eq!(view.messages(), messages_before);
    assert_eq!(view.phase(), SessionPhase::AwaitingReply);
}

#[tokio::test]
async fn dropping_the_view_releases_its_subscription() {
    let fixture = Fixture::new();
    let dialogue_id = fixture.new_dialogue().await;
    let view = DialogueView::new(
        fixture.backend(ScriptedCompletion::replying(vec![])),
        dialogue_id,
        Arc::new(RecordingSink::new()),
    );
    view.mount().await;
    assert_eq!(fixture.store.subscriber_count(dialogue_id), 1);

    drop(view);
    tokio::time::timeout(Duration::from_secs(2), async {
        while fixture.store.subscriber_count(dialogue_id) != 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("subscription leaked after drop");
}

//=========================================================================================
// Auth
//=========================================================================================

#[tokio::test]
async fn sign_out_invalidates_the_session() {
    let fixture = Fixture::new();
    let store = fixture.store.as_ref();
    store
        .create_auth_session("cookie", fixture.user.user_id, Utc::now() + ChronoDuration::days(1))
        .await
        .unwrap();
    assert_eq!(
        current_user(store, Some("cookie")).await.unwrap(),
        Some(fixture.user.clone())
    );

    let sink = RecordingSink::new();
    sign_out(store, Some("cookie"), &sink).await;

    assert_eq!(current_user(store, Some("cookie")).await.unwrap(), None);
    assert_eq!(current_user(store, None).await.unwrap(), None);
    assert_eq!(sink.last_navigation(), Some(Route::Landing));
}
