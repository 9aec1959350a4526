//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `DatabaseService` port from the `core` crate. It handles all interactions
//! with the PostgreSQL database using `sqlx`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use socratic_core::domain::{
    Dialogue, DialogueStatus, DialogueWithTopic, Message, MessageRole, Topic, User,
    UserCredentials,
};
use socratic_core::ports::{DatabaseService, PortError, PortResult};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

const MESSAGE_COLUMNS: &str = "id, dialogue_id, role, content, created_at";
const DIALOGUE_COLUMNS: &str = "id, user_id, topic_id, status, created_at";

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `DatabaseService` port.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Fetches one message row; used by the change feed to resolve notifications.
    pub async fn get_message_by_id(&self, message_id: Uuid) -> PortResult<Message> {
        let record = sqlx::query_as::<_, MessageRecord>(&format!(
            "SELECT {} FROM messages WHERE id = $1",
            MESSAGE_COLUMNS
        ))
        .bind(message_id)
        .fetch_one(&self.pool)
        .await
        .map_err(not_found_or_unexpected(format!("Message {} not found", message_id)))?;
        record.into_domain()
    }
}

/// Maps `RowNotFound` to `PortError::NotFound` and everything else to `Unexpected`.
fn not_found_or_unexpected(what: String) -> impl FnOnce(sqlx::Error) -> PortError {
    move |e| match e {
        sqlx::Error::RowNotFound => PortError::NotFound(what),
        _ => PortError::Unexpected(e.to_string()),
    }
}

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct UserRecord {
    user_id: Uuid,
    email: Option<String>,
}
impl UserRecord {
    fn to_domain(self) -> User {
        User {
            user_id: self.user_id,
            email: self.email,
        }
    }
}

#[derive(FromRow)]
struct CredentialsRecord {
    user_id: Uuid,
    email: String,
    hashed_password: Option<String>,
}

#[derive(FromRow)]
struct TopicRecord {
    id: Uuid,
    title: String,
    question: String,
    description: String,
    common_fallacies: Vec<String>,
}
impl TopicRecord {
    fn to_domain(self) -> Topic {
        Topic {
            id: self.id,
            title: self.title,
            question: self.question,
            description: self.description,
            common_fallacies: self.common_fallacies,
        }
    }
}

#[derive(FromRow)]
struct DialogueRecord {
    id: Uuid,
    user_id: Uuid,
    topic_id: Uuid,
    status: String,
    created_at: DateTime<Utc>,
}
impl DialogueRecord {
    fn into_domain(self) -> PortResult<Dialogue> {
        Ok(Dialogue {
            id: self.id,
            user_id: self.user_id,
            topic_id: self.topic_id,
            status: self.status.parse().map_err(PortError::Unexpected)?,
            created_at: self.created_at,
        })
    }
}

#[derive(FromRow)]
struct DialogueTopicRecord {
    id: Uuid,
    user_id: Uuid,
    topic_id: Uuid,
    status: String,
    created_at: DateTime<Utc>,
    title: String,
    question: String,
    description: String,
    common_fallacies: Vec<String>,
}
impl DialogueTopicRecord {
    fn into_domain(self) -> PortResult<DialogueWithTopic> {
        Ok(DialogueWithTopic {
            dialogue: Dialogue {
                id: self.id,
                user_id: self.user_id,
                topic_id: self.topic_id,
                status: self.status.parse().map_err(PortError::Unexpected)?,
                created_at: self.created_at,
            },
            topic: Topic {
                id: self.topic_id,
                title: self.title,
                question: self.question,
                description: self.description,
                common_fallacies: self.common_fallacies,
            },
        })
    }
}

#[derive(FromRow)]
struct MessageRecord {
    id: Uuid,
    dialogue_id: Uuid,
    role: String,
    content: String,
    created_at: DateTime<Utc>,
}
impl MessageRecord {
    fn into_domain(self) -> PortResult<Message> {
        Ok(Message {
            id: self.id,
            dialogue_id: self.dialogue_id,
            role: self.role.parse().map_err(PortError::Unexpected)?,
            content: self.content,
            created_at: self.created_at,
        })
    }
}

//=========================================================================================
// `DatabaseService` Trait Implementation
//=========================================================================================

#[async_trait]
impl DatabaseService for DbAdapter {
    async fn create_user_with_email(
        &self,
        email: &str,
        hashed_password: &str,
    ) -> PortResult<User> {
        let record = sqlx::query_as::<_, UserRecord>(
            "INSERT INTO users (email, hashed_password) VALUES ($1, $2) RETURNING user_id, email",
        )
        .bind(email)
        .bind(hashed_password)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(record.to_domain())
    }

    async fn get_user_by_email(&self, email: &str) -> PortResult<UserCredentials> {
        let record = sqlx::query_as::<_, CredentialsRecord>(
            "SELECT user_id, email, hashed_password FROM users WHERE email = $1",
        )
        .bind(email)
        .fetch_one(&self.pool)
        .await
        .map_err(not_found_or_unexpected(format!("User {} not found", email)))?;

        let hashed_password = record
            .hashed_password
            .ok_or_else(|| PortError::NotFound(format!("User {} has no password", email)))?;
        Ok(UserCredentials {
            user_id: record.user_id,
            email: record.email,
            hashed_password,
        })
    }

    async fn get_user_by_id(&self, user_id: Uuid) -> PortResult<User> {
        let record = sqlx::query_as::<_, UserRecord>(
            "SELECT user_id, email FROM users WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(not_found_or_unexpected(format!("User {} not found", user_id)))?;
        Ok(record.to_domain())
    }

    async fn create_auth_session(
        &self,
        session_id: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()> {
        sqlx::query("INSERT INTO auth_sessions (id, user_id, expires_at) VALUES ($1, $2, $3)")
            .bind(session_id)
            .bind(user_id)
            .bind(expires_at)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }

    async fn validate_auth_session(&self, session_id: &str) -> PortResult<Uuid> {
        let user_id: Uuid = sqlx::query_scalar(
            "SELECT user_id FROM auth_sessions WHERE id = $1 AND expires_at > now()",
        )
        .bind(session_id)
        .fetch_one(&self.pool)
        .await
        .map_err(not_found_or_unexpected("Auth session not found".to_string()))?;
        Ok(user_id)
    }

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()> {
        sqlx::query("DELETE FROM auth_sessions WHERE id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }

    async fn list_topics(&self) -> PortResult<Vec<Topic>> {
        let records = sqlx::query_as::<_, TopicRecord>(
            "SELECT id, title, question, description, common_fallacies FROM topics ORDER BY title ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        let topics = records.into_iter().map(|r| r.to_domain()).collect();
        Ok(topics)
    }

    async fn create_dialogue(&self, user_id: Uuid, topic_id: Uuid) -> PortResult<Dialogue> {
        let record = sqlx::query_as::<_, DialogueRecord>(&format!(
            "INSERT INTO dialogues (user_id, topic_id) VALUES ($1, $2) RETURNING {}",
            DIALOGUE_COLUMNS
        ))
        .bind(user_id)
        .bind(topic_id)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;
        record.into_domain()
    }

    async fn get_dialogue_with_topic(&self, dialogue_id: Uuid) -> PortResult<DialogueWithTopic> {
        let record = sqlx::query_as::<_, DialogueTopicRecord>(
            "SELECT d.id, d.user_id, d.topic_id, d.status, d.created_at, \
                    t.title, t.question, t.description, t.common_fallacies \
             FROM dialogues d JOIN topics t ON t.id = d.topic_id \
             WHERE d.id = $1",
        )
        .bind(dialogue_id)
        .fetch_one(&self.pool)
        .await
        .map_err(not_found_or_unexpected(format!("Dialogue {} not found", dialogue_id)))?;
        record.into_domain()
    }

    async fn update_dialogue_status(
        &self,
        dialogue_id: Uuid,
        status: DialogueStatus,
    ) -> PortResult<()> {
        sqlx::query("UPDATE dialogues SET status = $1 WHERE id = $2")
            .bind(status.as_str())
            .bind(dialogue_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }

    async fn list_messages(&self, dialogue_id: Uuid) -> PortResult<Vec<Message>> {
        let records = sqlx::query_as::<_, MessageRecord>(&format!(
            "SELECT {} FROM messages WHERE dialogue_id = $1 ORDER BY created_at ASC",
            MESSAGE_COLUMNS
        ))
        .bind(dialogue_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        records.into_iter().map(|r| r.into_domain()).collect()
    }

    async fn insert_message(
        &self,
        dialogue_id: Uuid,
        role: MessageRole,
        content: &str,
    ) -> PortResult<Message> {
        let record = sqlx::query_as::<_, MessageRecord>(&format!(
            "INSERT INTO messages (dialogue_id, role, content) VALUES ($1, $2, $3) RETURNING {}",
            MESSAGE_COLUMNS
        ))
        .bind(dialogue_id)
        .bind(role.as_str())
        .bind(content)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;
        record.into_domain()
    }
}
