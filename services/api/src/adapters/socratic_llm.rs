//! services/api/src/adapters/socratic_llm.rs
//!
//! This module contains the adapter that asks an OpenAI chat model for the next
//! Socratic reply. It implements the `CompletionService` port from the `core` crate.

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::chat::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use socratic_core::{
    domain::{CompletionRequest, MessageRole},
    ports::{CompletionService, PortError, PortResult},
};

const SYSTEM_TEMPLATE: &str = r#"You are a Socratic tutor guiding a student through the question: "{topic}".

Your role:
- Never lecture and never hand over a conclusion. Ask one probing question at a time.
- Build on what the student just said. Quote their words back when it sharpens the point.
- When the student's reasoning shows one of the known fallacies listed below, name it plainly, explain in a sentence why the step does not follow, and ask a question that lets them repair it.
- Acknowledge good reasoning briefly before pushing further.
- Keep replies short: two to four sentences, ending with a question.

Known fallacies for this topic:
{fallacies}"#;

/// Renders the system prompt for one topic.
fn system_prompt(topic: &str, fallacies: &[String]) -> String {
    let fallacies = if fallacies.is_empty() {
        "- (none listed)".to_string()
    } else {
        fallacies
            .iter()
            .map(|f| format!("- {}", f))
            .collect::<Vec<_>>()
            .join("\n")
    };
    SYSTEM_TEMPLATE
        .replace("{topic}", topic)
        .replace("{fallacies}", &fallacies)
}

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `CompletionService` using an OpenAI-compatible LLM.
#[derive(Clone)]
pub struct OpenAiSocraticAdapter {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiSocraticAdapter {
    /// Creates a new `OpenAiSocraticAdapter`.
    pub fn new(client: Client<OpenAIConfig>, model: String) -> Self {
        Self { client, model }
    }
}

//=========================================================================================
// `CompletionService` Trait Implementation
//=========================================================================================

#[async_trait]
impl CompletionService for OpenAiSocraticAdapter {
    async fn complete(&self, request: &CompletionRequest) -> PortResult<String> {
        let mut messages: Vec<ChatCompletionRequestMessage> =
            Vec::with_capacity(request.messages.len() + 1);
        messages.push(
            ChatCompletionRequestSystemMessageArgs::default()
                .content(system_prompt(&request.topic, &request.common_fallacies))
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?
                .into(),
        );

        for turn in &request.messages {
            let message: ChatCompletionRequestMessage = match turn.role {
                MessageRole::User => ChatCompletionRequestUserMessageArgs::default()
                    .content(turn.content.clone())
                    .build()
                    .map_err(|e| PortError::Unexpected(e.to_string()))?
                    .into(),
                MessageRole::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
                    .content(turn.content.clone())
                    .build()
                    .map_err(|e| PortError::Unexpected(e.to_string()))?
                    .into(),
            };
            messages.push(message);
        }

        let chat_request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .n(1)
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        // Map the error by hand; the orphan rule keeps us from a From impl.
        let response = self
            .client
            .chat()
            .create(chat_request)
            .await
            .map_err(|e: OpenAIError| PortError::Completion(e.to_string()))?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or_else(|| {
                PortError::Completion("Completion model returned no text content.".to_string())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_prompt_names_topic_and_fallacies() {
        let prompt = system_prompt(
            "What is justice?",
            &["False dilemma".to_string(), "Equivocation".to_string()],
        );
        assert!(prompt.contains("\"What is justice?\""));
        assert!(prompt.contains("- False dilemma\n- Equivocation"));
    }

    #[test]
    fn system_prompt_without_fallacies_says_so() {
        assert!(system_prompt("Why?", &[]).contains("- (none listed)"));
    }
}
