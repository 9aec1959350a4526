//! crates/socratic_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of the backend that stores rows, pushes change events and
//! produces assistant replies.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;
use std::pin::Pin;
use uuid::Uuid;

use crate::domain::{
    CompletionRequest, Dialogue, DialogueStatus, DialogueWithTopic, Message, MessageRole, Topic,
    User, UserCredentials,
};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, Clone, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Not authenticated")]
    Unauthenticated,
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Completion failed: {0}")]
    Completion(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

/// Live message inserts for one dialogue, in arrival order.
pub type MessageStream = Pin<Box<dyn Stream<Item = Message> + Send>>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

#[async_trait]
pub trait DatabaseService: Send + Sync {
    // --- Auth Methods ---
    async fn create_user_with_email(&self, email: &str, hashed_password: &str)
        -> PortResult<User>;

    async fn get_user_by_email(&self, email: &str) -> PortResult<UserCredentials>;

    async fn get_user_by_id(&self, user_id: Uuid) -> PortResult<User>;

    async fn create_auth_session(
        &self,
        session_id: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()>;

    /// Returns the owner of a live (unexpired) auth session.
    async fn validate_auth_session(&self, session_id: &str) -> PortResult<Uuid>;

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()>;

    // --- Topic Catalog ---
    /// All topics, ordered by title ascending.
    async fn list_topics(&self) -> PortResult<Vec<Topic>>;

    // --- Dialogues ---
    async fn create_dialogue(&self, user_id: Uuid, topic_id: Uuid) -> PortResult<Dialogue>;

    async fn get_dialogue_with_topic(&self, dialogue_id: Uuid) -> PortResult<DialogueWithTopic>;

    async fn update_dialogue_status(
        &self,
        dialogue_id: Uuid,
        status: DialogueStatus,
    ) -> PortResult<()>;

    // --- Messages ---
    /// All messages of a dialogue, ordered by creation time ascending.
    async fn list_messages(&self, dialogue_id: Uuid) -> PortResult<Vec<Message>>;

    async fn insert_message(
        &self,
        dialogue_id: Uuid,
        role: MessageRole,
        content: &str,
    ) -> PortResult<Message>;
}

#[async_trait]
pub trait RealtimeService: Send + Sync {
    /// Opens a live feed of message inserts filtered to one dialogue.
    ///
    /// The feed ends when the stream is dropped; dropping releases any
    /// backend-side listener.
    async fn subscribe_message_inserts(&self, dialogue_id: Uuid) -> PortResult<MessageStream>;
}

#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Produces the next assistant reply from the full conversation context.
    async fn complete(&self, request: &CompletionRequest) -> PortResult<String>;
}
