//! services/api/src/web/protocol.rs
//!
//! Defines the JSON shapes shared by the REST endpoints and the WebSocket
//! dialogue channel between the browser client and the API server.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use socratic_core::{
    DialogueWithTopic, Message, Notice, NoticeVariant, SessionPhase, Topic, ViewEvent,
};
use utoipa::ToSchema;
use uuid::Uuid;

//=========================================================================================
// Payloads
//=========================================================================================

#[derive(Serialize, Debug, Clone, PartialEq, ToSchema)]
pub struct TopicPayload {
    pub id: Uuid,
    pub title: String,
    pub question: String,
    pub description: String,
    pub common_fallacies: Vec<String>,
}

impl From<Topic> for TopicPayload {
    fn from(topic: Topic) -> Self {
        Self {
            id: topic.id,
            title: topic.title,
            question: topic.question,
            description: topic.description,
            common_fallacies: topic.common_fallacies,
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq, ToSchema)]
pub struct MessagePayload {
    pub id: Uuid,
    pub dialogue_id: Uuid,
    /// `user` or `assistant`.
    pub role: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl From<Message> for MessagePayload {
    fn from(message: Message) -> Self {
        Self {
            id: message.id,
            dialogue_id: message.dialogue_id,
            role: message.role.as_str().to_string(),
            content: message.content,
            created_at: message.created_at,
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq, ToSchema)]
pub struct DialoguePayload {
    pub id: Uuid,
    pub topic_id: Uuid,
    /// `active` or `completed`.
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub topic: TopicPayload,
}

impl From<DialogueWithTopic> for DialoguePayload {
    fn from(loaded: DialogueWithTopic) -> Self {
        Self {
            id: loaded.dialogue.id,
            topic_id: loaded.dialogue.topic_id,
            status: loaded.dialogue.status.as_str().to_string(),
            created_at: loaded.dialogue.created_at,
            topic: loaded.topic.into(),
        }
    }
}

/// A transient toast as the browser renders it.
#[derive(Serialize, Debug, Clone, PartialEq, Eq, ToSchema)]
pub struct NoticePayload {
    pub title: String,
    pub description: String,
    /// `default` or `destructive`.
    pub variant: String,
}

impl From<Notice> for NoticePayload {
    fn from(notice: Notice) -> Self {
        let variant = match notice.variant {
            NoticeVariant::Default => "default",
            NoticeVariant::Destructive => "destructive",
        };
        Self {
            title: notice.title,
            description: notice.description,
            variant: variant.to_string(),
        }
    }
}

fn phase_name(phase: SessionPhase) -> &'static str {
    match phase {
        SessionPhase::Loading => "loading",
        SessionPhase::AwaitingInput => "awaiting_input",
        SessionPhase::AwaitingReply => "awaiting_reply",
        SessionPhase::Completed => "completed",
        SessionPhase::Failed => "failed",
    }
}

//=========================================================================================
// Messages Sent FROM the Client (Browser) TO the Server
//=========================================================================================

/// Represents the structured text messages a client can send on the dialogue channel.
#[derive(Deserialize, Debug, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Submits the input box contents. Blank content is ignored.
    SendMessage { content: String },

    /// Marks the dialogue completed and leaves the view.
    EndDialogue,
}

//=========================================================================================
// Messages Sent FROM the Server TO the Client (Browser)
//=========================================================================================

/// Represents the structured text messages the server can send to the client.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// The topic header and the full history, sent once after the view mounts.
    Loaded {
        topic: TopicPayload,
        messages: Vec<MessagePayload>,
    },

    /// A row arrived on the dialogue's change feed.
    MessageAppended { message: MessagePayload },

    /// `awaiting_reply` drives the "Thinking..." indicator and disables input.
    Phase { phase: &'static str },

    Notice { notice: NoticePayload },

    /// The client should leave for `path`.
    Navigate { path: String },
}

impl From<ViewEvent> for ServerMessage {
    fn from(event: ViewEvent) -> Self {
        match event {
            ViewEvent::Loaded { topic, messages } => ServerMessage::Loaded {
                topic: topic.into(),
                messages: messages.into_iter().map(Into::into).collect(),
            },
            ViewEvent::MessageAppended(message) => ServerMessage::MessageAppended {
                message: message.into(),
            },
            ViewEvent::PhaseChanged(phase) => ServerMessage::Phase {
                phase: phase_name(phase),
            },
            ViewEvent::Notice(notice) => ServerMessage::Notice {
                notice: notice.into(),
            },
            ViewEvent::Navigate(route) => ServerMessage::Navigate {
                path: route.to_string(),
            },
        }
    }
}
