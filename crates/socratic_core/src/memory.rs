//! crates/socratic_core/src/memory.rs
//!
//! An in-process backend implementing the store and realtime ports.
//!
//! Rows live in memory for the lifetime of the process. Each dialogue gets its
//! own broadcast channel, so a subscriber only ever sees inserts for the
//! dialogue it asked for. A channel is dropped as soon as its last subscriber
//! goes away. Used when no database is configured and by tests.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use tracing::warn;
use uuid::Uuid;

use crate::domain::{
    Dialogue, DialogueStatus, DialogueWithTopic, Message, MessageRole, Topic, User,
    UserCredentials,
};
use crate::ports::{DatabaseService, MessageStream, PortError, PortResult, RealtimeService};

/// Inserts a subscriber may fall behind by before it skips rows. A view
/// consumes its feed on a dedicated task, so only a stalled subscriber lags;
/// skipped rows show up again on the next load.
const FEED_CAPACITY: usize = 256;

type Feeds = Arc<Mutex<HashMap<Uuid, broadcast::Sender<Message>>>>;

fn lock_feeds(feeds: &Feeds) -> MutexGuard<'_, HashMap<Uuid, broadcast::Sender<Message>>> {
    feeds.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One subscriber's end of a dialogue feed. The last one out removes the
/// dialogue's channel.
struct FeedReceiver {
    receiver: Option<broadcast::Receiver<Message>>,
    dialogue_id: Uuid,
    feeds: Feeds,
}

impl FeedReceiver {
    async fn next(&mut self) -> Option<Message> {
        let receiver = self.receiver.as_mut()?;
        loop {
            match receiver.recv().await {
                Ok(message) => return Some(message),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(
                        "Feed for dialogue {} skipped {} inserts.",
                        self.dialogue_id, skipped
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

impl Drop for FeedReceiver {
    fn drop(&mut self) {
        self.receiver.take();
        let mut feeds = lock_feeds(&self.feeds);
        if feeds
            .get(&self.dialogue_id)
            .is_some_and(|sender| sender.receiver_count() == 0)
        {
            feeds.remove(&self.dialogue_id);
        }
    }
}

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, UserCredentials>,
    auth_sessions: HashMap<String, (Uuid, DateTime<Utc>)>,
    topics: Vec<Topic>,
    dialogues: HashMap<Uuid, Dialogue>,
    messages: Vec<Message>,
    last_created_at: Option<DateTime<Utc>>,
}

impl Tables {
    /// A creation timestamp strictly after every earlier one.
    fn next_timestamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let stamp = match self.last_created_at {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        };
        self.last_created_at = Some(stamp);
        stamp
    }
}

#[derive(Default)]
pub struct MemoryBackend {
    tables: Mutex<Tables>,
    feeds: Feeds,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_topics(topics: Vec<Topic>) -> Self {
        let backend = Self::new();
        backend.tables().topics = topics;
        backend
    }

    /// A small starter catalog for local development.
    pub fn sample_topics() -> Vec<Topic> {
        vec![
            Topic {
                id: Uuid::new_v4(),
                title: "Justice".to_string(),
                question: "What is justice?".to_string(),
                description: "Is justice giving each their due, the advantage of the stronger, or something else entirely?".to_string(),
                common_fallacies: vec![
                    "Appeal to authority".to_string(),
                    "False dilemma".to_string(),
                    "Begging the question".to_string(),
                ],
            },
            Topic {
                id: Uuid::new_v4(),
                title: "Free Will".to_string(),
                question: "Are our choices truly our own?".to_string(),
                description: "Weigh determinism against the experience of deliberate choice.".to_string(),
                common_fallacies: vec![
                    "Slippery slope".to_string(),
                    "Equivocation".to_string(),
                ],
            },
            Topic {
                id: Uuid::new_v4(),
                title: "Knowledge".to_string(),
                question: "What does it mean to know something?".to_string(),
                description: "Separate knowledge from true belief and ask what justification adds.".to_string(),
                common_fallacies: vec![
                    "Circular reasoning".to_string(),
                    "Hasty generalization".to_string(),
                ],
            },
        ]
    }

    pub fn add_user(&self, user_id: Uuid, email: &str) -> User {
        self.tables().users.insert(
            user_id,
            UserCredentials {
                user_id,
                email: email.to_string(),
                hashed_password: String::new(),
            },
        );
        User {
            user_id,
            email: Some(email.to_string()),
        }
    }

    pub fn dialogue(&self, dialogue_id: Uuid) -> Option<Dialogue> {
        self.tables().dialogues.get(&dialogue_id).cloned()
    }

    pub fn dialogue_count(&self) -> usize {
        self.tables().dialogues.len()
    }

    /// Stored messages of one dialogue, in creation order.
    pub fn stored_messages(&self, dialogue_id: Uuid) -> Vec<Message> {
        self.tables()
            .messages
            .iter()
            .filter(|m| m.dialogue_id == dialogue_id)
            .cloned()
            .collect()
    }

    /// Number of dialogues with at least one live subscriber.
    pub fn feed_count(&self) -> usize {
        self.feeds().len()
    }

    /// Number of live subscribers on a dialogue's feed.
    pub fn subscriber_count(&self, dialogue_id: Uuid) -> usize {
        self.feeds()
            .get(&dialogue_id)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn feeds(&self) -> MutexGuard<'_, HashMap<Uuid, broadcast::Sender<Message>>> {
        lock_feeds(&self.feeds)
    }

    fn publish(&self, message: &Message) {
        if let Some(sender) = self.feeds().get(&message.dialogue_id) {
            // An error only means nobody is listening.
            let _ = sender.send(message.clone());
        }
    }
}

#[async_trait]
impl DatabaseService for MemoryBackend {
    async fn create_user_with_email(
        &self,
        email: &str,
        hashed_password: &str,
    ) -> PortResult<User> {
        let mut tables = self.tables();
        if tables.users.values().any(|u| u.email == email) {
            return Err(PortError::Unexpected(format!(
                "A user with email {} already exists",
                email
            )));
        }
        let user_id = Uuid::new_v4();
        tables.users.insert(
            user_id,
            UserCredentials {
                user_id,
                email: email.to_string(),
                hashed_password: hashed_password.to_string(),
            },
        );
        Ok(User {
            user_id,
            email: Some(email.to_string()),
        })
    }

    async fn get_user_by_email(&self, email: &str) -> PortResult<UserCredentials> {
        self.tables()
            .users
            .values()
            .find(|u| u.email == email)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("User {} not found", email)))
    }

    async fn get_user_by_id(&self, user_id: Uuid) -> PortResult<User> {
        self.tables()
            .users
            .get(&user_id)
            .map(|u| User {
                user_id: u.user_id,
                email: Some(u.email.clone()),
            })
            .ok_or_else(|| PortError::NotFound(format!("User {} not found", user_id)))
    }

    async fn create_auth_session(
        &self,
        session_id: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()> {
        self.tables()
            .auth_sessions
            .insert(session_id.to_string(), (user_id, expires_at));
        Ok(())
    }

    async fn validate_auth_session(&self, session_id: &str) -> PortResult<Uuid> {
        match self.tables().auth_sessions.get(session_id) {
            Some((user_id, expires_at)) if *expires_at > Utc::now() => Ok(*user_id),
            Some(_) => Err(PortError::Unauthorized),
            None => Err(PortError::NotFound("Auth session not found".to_string())),
        }
    }

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()> {
        self.tables().auth_sessions.remove(session_id);
        Ok(())
    }

    async fn list_topics(&self) -> PortResult<Vec<Topic>> {
        let mut topics = self.tables().topics.clone();
        topics.sort_by(|a, b| a.title.cmp(&b.title));
        Ok(topics)
    }

    async fn create_dialogue(&self, user_id: Uuid, topic_id: Uuid) -> PortResult<Dialogue> {
        let mut tables = self.tables();
        if !tables.users.contains_key(&user_id) {
            return Err(PortError::NotFound(format!("User {} not found", user_id)));
        }
        if !tables.topics.iter().any(|t| t.id == topic_id) {
            return Err(PortError::NotFound(format!("Topic {} not found", topic_id)));
        }
        let dialogue = Dialogue {
            id: Uuid::new_v4(),
            user_id,
            topic_id,
            status: DialogueStatus::Active,
            created_at: tables.next_timestamp(),
        };
        tables.dialogues.insert(dialogue.id, dialogue.clone());
        Ok(dialogue)
    }

    async fn get_dialogue_with_topic(&self, dialogue_id: Uuid) -> PortResult<DialogueWithTopic> {
        let tables = self.tables();
        let dialogue = tables
            .dialogues
            .get(&dialogue_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Dialogue {} not found", dialogue_id)))?;
        let topic = tables
            .topics
            .iter()
            .find(|t| t.id == dialogue.topic_id)
            .cloned()
            .ok_or_else(|| {
                PortError::NotFound(format!("Topic {} not found", dialogue.topic_id))
            })?;
        Ok(DialogueWithTopic { dialogue, topic })
    }

    async fn update_dialogue_status(
        &self,
        dialogue_id: Uuid,
        status: DialogueStatus,
    ) -> PortResult<()> {
        // Filter semantics: an update matching no row is not an error.
        if let Some(dialogue) = self.tables().dialogues.get_mut(&dialogue_id) {
            dialogue.status = status;
        }
        Ok(())
    }

    async fn list_messages(&self, dialogue_id: Uuid) -> PortResult<Vec<Message>> {
        Ok(self.stored_messages(dialogue_id))
    }

    async fn insert_message(
        &self,
        dialogue_id: Uuid,
        role: MessageRole,
        content: &str,
    ) -> PortResult<Message> {
        let message = {
            let mut tables = self.tables();
            if !tables.dialogues.contains_key(&dialogue_id) {
                return Err(PortError::NotFound(format!(
                    "Dialogue {} not found",
                    dialogue_id
                )));
            }
            let message = Message {
                id: Uuid::new_v4(),
                dialogue_id,
                role,
                content: content.to_string(),
                created_at: tables.next_timestamp(),
            };
            tables.messages.push(message.clone());
            message
        };
        self.publish(&message);
        Ok(message)
    }
}

#[async_trait]
impl RealtimeService for MemoryBackend {
    async fn subscribe_message_inserts(&self, dialogue_id: Uuid) -> PortResult<MessageStream> {
        // Registered here, not inside the stream, so inserts made right after
        // this call returns are not missed.
        let receiver = self
            .feeds()
            .entry(dialogue_id)
            .or_insert_with(|| broadcast::channel(FEED_CAPACITY).0)
            .subscribe();
        let mut feed = FeedReceiver {
            receiver: Some(receiver),
            dialogue_id,
            feeds: self.feeds.clone(),
        };

        let stream = async_stream::stream! {
            while let Some(message) = feed.next().await {
                yield message;
            }
        };
        Ok(Box::pin(stream))
    }
}
