//! Reasoning-engine client: Gemini `generateContent` wire types and the
//! [`ReasoningEngine`] seam the agent loop talks through.

use async_trait::async_trait;
use futures::future::{select, Either};
use gloo_timers::future::TimeoutFuture;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error};

use crate::config::AgentConfig;
use crate::tools::ToolInvocation;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("No API key configured. Please set your Gemini API key in the extension settings.")]
    MissingCredential,
    #[error("Request error: {0}")]
    Network(String),
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("Failed to parse response: {0}")]
    Decode(String),
    #[error("Engine did not answer within {ms}ms")]
    Timeout { ms: u32 },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    #[default]
    Model,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionResponse {
    pub name: String,
    pub response: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_response: Option<FunctionResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thought: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thought_signature: Option<String>,
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Part { text: Some(text.into()), ..Default::default() }
    }

    pub fn function_call(call: &ToolInvocation) -> Self {
        Part {
            function_call: Some(FunctionCall {
                name: call.name.clone(),
                args: call.arguments.clone(),
            }),
            ..Default::default()
        }
    }

    pub fn function_response(name: impl Into<String>, response: Value) -> Self {
        Part {
            function_response: Some(FunctionResponse { name: name.into(), response }),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Content {
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Content {
    pub fn user_text(text: impl Into<String>) -> Self {
        Content { role: Role::User, parts: vec![Part::text(text)] }
    }

    pub fn model_text(text: impl Into<String>) -> Self {
        Content { role: Role::Model, parts: vec![Part::text(text)] }
    }

    /// A model reply carrying optional prose followed by tool calls.
    pub fn model_calls(text: Option<&str>, calls: &[ToolInvocation]) -> Self {
        let mut parts: Vec<Part> = text.map(Part::text).into_iter().collect();
        parts.extend(calls.iter().map(Part::function_call));
        Content { role: Role::Model, parts }
    }

    /// Prose of this content, excluding thought summaries.
    pub fn prose(&self) -> String {
        self.parts
            .iter()
            .filter(|p| p.thought != Some(true))
            .filter_map(|p| p.text.as_deref())
            .collect()
    }

    pub fn tool_invocations(&self) -> Vec<ToolInvocation> {
        self.parts
            .iter()
            .filter_map(|p| p.function_call.as_ref())
            .map(|c| ToolInvocation::new(c.name.clone(), c.args.clone()))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiTool<'a> {
    function_declarations: &'a [FunctionDeclaration],
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct SystemInstruction<'a> {
    parts: [TextPart<'a>; 1],
}

#[derive(Debug, Clone, Serialize)]
struct TextPart<'a> {
    text: &'a str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: &'a [Content],
    system_instruction: SystemInstruction<'a>,
    tools: [GeminiTool<'a>; 1],
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct GeminiError {
    error: GeminiErrorDetail,
}

#[derive(Debug, Clone, Deserialize)]
struct GeminiErrorDetail {
    message: String,
}

/// One engine round: everything the engine needs to produce its next reply.
#[derive(Debug, Clone, Copy)]
pub struct EngineRequest<'a> {
    pub system_instruction: &'a str,
    pub contents: &'a [Content],
    pub tools: &'a [FunctionDeclaration],
}

#[async_trait(?Send)]
pub trait ReasoningEngine {
    /// Returns the first candidate's content, or `None` when the reply has no
    /// candidate to process.
    async fn generate(&self, request: &EngineRequest<'_>) -> Result<Option<Content>, EngineError>;
}

/// Extracts the first candidate from a raw `generateContent` body.
fn first_candidate(body: &str) -> Result<Option<Content>, EngineError> {
    let response: GenerateContentResponse =
        serde_json::from_str(body).map_err(|e| EngineError::Decode(e.to_string()))?;
    let Some(candidate) = response.candidates.into_iter().next() else {
        return Ok(None);
    };
    if let Some(reason) = &candidate.finish_reason {
        debug!("Engine finish reason: {}", reason);
    }
    Ok(candidate.content)
}

pub struct GeminiEngine {
    client: Client,
    api_key: String,
    model: String,
    api_base: String,
    timeout_ms: u32,
}

impl GeminiEngine {
    pub fn new(api_key: &str, config: &AgentConfig) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.to_string(),
            model: config.model.clone(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            timeout_ms: config.request_timeout_ms,
        }
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    async fn post(&self, request: &GenerateContentRequest<'_>) -> Result<Option<Content>, EngineError> {
        let url = format!("{}/models/{}:generateContent", self.api_base, self.model);
        debug!("Gemini generate_content: model={} contents={}", self.model, request.contents.len());

        let res = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                error!("Request error: {}", e);
                EngineError::Network(e.to_string())
            })?;

        let status = res.status();
        let body = res.text().await.map_err(|e| EngineError::Network(e.to_string()))?;

        if !status.is_success() {
            let message = serde_json::from_str::<GeminiError>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            error!("API error ({}): {}", status, message);
            return Err(EngineError::Api { status: status.as_u16(), message });
        }

        first_candidate(&body)
    }
}

#[async_trait(?Send)]
impl ReasoningEngine for GeminiEngine {
    async fn generate(&self, request: &EngineRequest<'_>) -> Result<Option<Content>, EngineError> {
        let body = GenerateContentRequest {
            contents: request.contents,
            system_instruction: SystemInstruction {
                parts: [TextPart { text: request.system_instruction }],
            },
            tools: [GeminiTool { function_declarations: request.tools }],
        };

        if self.timeout_ms == 0 {
            return self.post(&body).await;
        }
        let outcome = match select(Box::pin(self.post(&body)), TimeoutFuture::new(self.timeout_ms)).await {
            Either::Left((result, _)) => result,
            Either::Right((_, _)) => Err(EngineError::Timeout { ms: self.timeout_ms }),
        };
        outcome
    }
}

#[cfg(any(test, feature = "mock-llm"))]
pub use scripted::ScriptedEngine;

#[cfg(any(test, feature = "mock-llm"))]
mod scripted {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    /// Replays queued replies in order and records every request it receives.
    #[derive(Default)]
    pub struct ScriptedEngine {
        replies: RefCell<VecDeque<Result<Option<Content>, EngineError>>>,
        requests: RefCell<Vec<Vec<Content>>>,
    }

    impl ScriptedEngine {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn push_reply(&self, content: Content) -> &Self {
            self.replies.borrow_mut().push_back(Ok(Some(content)));
            self
        }

        pub fn push_text(&self, text: &str) -> &Self {
            self.push_reply(Content::model_text(text))
        }

        pub fn push_calls(&self, text: Option<&str>, calls: &[ToolInvocation]) -> &Self {
            self.push_reply(Content::model_calls(text, calls))
        }

        /// A reply without candidates.
        pub fn push_empty(&self) -> &Self {
            self.replies.borrow_mut().push_back(Ok(None));
            self
        }

        pub fn push_error(&self, err: EngineError) -> &Self {
            self.replies.borrow_mut().push_back(Err(err));
            self
        }

        /// The `contents` of every request received so far.
        pub fn requests(&self) -> Vec<Vec<Content>> {
            self.requests.borrow().clone()
        }
    }

    #[async_trait(?Send)]
    impl ReasoningEngine for ScriptedEngine {
        async fn generate(&self, request: &EngineRequest<'_>) -> Result<Option<Content>, EngineError> {
            self.requests.borrow_mut().push(request.contents.to_vec());
            self.replies.borrow_mut().pop_front().unwrap_or(Ok(None))
        }
    }
}
