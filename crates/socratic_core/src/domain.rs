//! crates/socratic_core/src/domain.rs
//!
//! Defines the pure, core data structures for the application.
//! These structs are independent of any database or serialization format.

use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// A philosophical prompt the user can open a dialogue about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topic {
    pub id: Uuid,
    pub title: String,
    /// The provocation statement quoted back to the user.
    pub question: String,
    pub description: String,
    pub common_fallacies: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogueStatus {
    Active,
    Completed,
}

impl DialogueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DialogueStatus::Active => "active",
            DialogueStatus::Completed => "completed",
        }
    }
}

impl FromStr for DialogueStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(DialogueStatus::Active),
            "completed" => Ok(DialogueStatus::Completed),
            other => Err(format!("unknown dialogue status '{}'", other)),
        }
    }
}

impl fmt::Display for DialogueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One tutoring session tying a user to a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dialogue {
    pub id: Uuid,
    pub user_id: Uuid,
    pub topic_id: Uuid,
    pub status: DialogueStatus,
    pub created_at: DateTime<Utc>,
}

/// A dialogue joined with the topic it references.
#[derive(Debug, Clone)]
pub struct DialogueWithTopic {
    pub dialogue: Dialogue,
    pub topic: Topic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

impl FromStr for MessageRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            other => Err(format!("unknown message role '{}'", other)),
        }
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single persisted message. Append-only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: Uuid,
    pub dialogue_id: Uuid,
    pub role: MessageRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// The role/content pair sent to the completion endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatTurn {
    pub role: MessageRole,
    pub content: String,
}

impl From<&Message> for ChatTurn {
    fn from(message: &Message) -> Self {
        ChatTurn {
            role: message.role,
            content: message.content.clone(),
        }
    }
}

/// Everything the completion endpoint needs to produce the next reply.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<ChatTurn>,
    /// The topic's question text.
    pub topic: String,
    pub common_fallacies: Vec<String>,
}

// Represents a user - used throughout app
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub user_id: Uuid,
    pub email: Option<String>,
}

// Only used internally for login/signup - contains sensitive data
#[derive(Debug, Clone)]
pub struct UserCredentials {
    pub user_id: Uuid,
    pub email: String,
    pub hashed_password: String,
}
