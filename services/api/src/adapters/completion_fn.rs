//! services/api/src/adapters/completion_fn.rs
//!
//! Calls an external completion function over HTTP. Implements the
//! `CompletionService` port from the `core` crate.
//!
//! Request: `{ "messages": [{ "role", "content" }], "topic", "commonFallacies" }`.
//! Response: `{ "message": "..." }`. Any non-2xx status or a body without
//! `message` is an error; nothing is retried.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use socratic_core::domain::CompletionRequest;
use socratic_core::ports::{CompletionService, PortError, PortResult};
use tracing::info;

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct FunctionRequest<'a> {
    messages: Vec<FunctionTurn<'a>>,
    topic: &'a str,
    common_fallacies: &'a [String],
}

#[derive(Serialize, Debug)]
struct FunctionTurn<'a> {
    role: &'a str,
    content: &'a str,
}

impl<'a> From<&'a CompletionRequest> for FunctionRequest<'a> {
    fn from(request: &'a CompletionRequest) -> Self {
        Self {
            messages: request
                .messages
                .iter()
                .map(|turn| FunctionTurn {
                    role: turn.role.as_str(),
                    content: &turn.content,
                })
                .collect(),
            topic: &request.topic,
            common_fallacies: &request.common_fallacies,
        }
    }
}

#[derive(Deserialize, Debug)]
struct FunctionResponse {
    message: String,
}

/// Extracts the reply text from a success body.
fn parse_reply(body: &str) -> PortResult<String> {
    serde_json::from_str::<FunctionResponse>(body)
        .map(|response| response.message)
        .map_err(|e| PortError::Completion(format!("malformed response body: {}", e)))
}

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `CompletionService` by invoking an HTTP function.
#[derive(Clone)]
pub struct FunctionCompletionAdapter {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

impl FunctionCompletionAdapter {
    /// Creates a new `FunctionCompletionAdapter`.
    pub fn new(client: reqwest::Client, url: String, api_key: Option<String>) -> Self {
        Self {
            client,
            url,
            api_key,
        }
    }
}

//=========================================================================================
// `CompletionService` Trait Implementation
//=========================================================================================

#[async_trait]
impl CompletionService for FunctionCompletionAdapter {
    async fn complete(&self, request: &CompletionRequest) -> PortResult<String> {
        let body = FunctionRequest::from(request);
        let mut call = self.client.post(&self.url).json(&body);
        if let Some(key) = &self.api_key {
            call = call.bearer_auth(key);
        }

        let response = call
            .send()
            .await
            .map_err(|e| PortError::Completion(e.to_string()))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| PortError::Completion(e.to_string()))?;

        if !status.is_success() {
            return Err(PortError::Completion(format!(
                "function returned {}: {}",
                status,
                text.trim()
            )));
        }

        let reply = parse_reply(&text)?;
        info!("Completion function replied with {} characters.", reply.len());
        Ok(reply)
    }
}
