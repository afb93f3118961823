//! Deterministic offline provider
//!
//! [`ScriptedProvider`] replays predetermined replies instead of calling a model
//! service, which makes every workflow testable offline. Replies come either from
//! a queue (consumed in call order) or from a responder closure that inspects the
//! request. Every request is recorded for later assertions.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{AgentflowError, Result};
use crate::llm::{LLMProvider, LLMRequest, LLMResponse, ModelInfo, ToolCall};

/// One predetermined reply
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptedReply {
    Text(String),
    ToolCalls(Vec<ToolCall>),
    /// Fails the call with a transport error
    Failure(String),
}

impl ScriptedReply {
    pub fn text(content: impl Into<String>) -> Self {
        ScriptedReply::Text(content.into())
    }

    /// Text reply holding serialized JSON
    pub fn json(value: serde_json::Value) -> Self {
        ScriptedReply::Text(value.to_string())
    }

    pub fn tool_calls(calls: Vec<ToolCall>) -> Self {
        ScriptedReply::ToolCalls(calls)
    }

    pub fn failure(message: impl Into<String>) -> Self {
        ScriptedReply::Failure(message.into())
    }
}

type Responder = dyn Fn(&LLMRequest) -> ScriptedReply + Send + Sync;
type Latency = dyn Fn(&LLMRequest) -> Duration + Send + Sync;

enum Script {
    Queue(Mutex<VecDeque<ScriptedReply>>),
    Responder(Box<Responder>),
}

/// Provider that replays scripted replies
pub struct ScriptedProvider {
    script: Script,
    latency: Option<Box<Latency>>,
    requests: Mutex<Vec<LLMRequest>>,
}

impl ScriptedProvider {
    /// Replay `replies` in call order; once exhausted, calls fail
    pub fn new(replies: Vec<ScriptedReply>) -> Self {
        Self {
            script: Script::Queue(Mutex::new(replies.into())),
            latency: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Answer every call from `responder`
    pub fn with_responder<F>(responder: F) -> Self
    where
        F: Fn(&LLMRequest) -> ScriptedReply + Send + Sync + 'static,
    {
        Self {
            script: Script::Responder(Box::new(responder)),
            latency: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Simulate per-request latency before replying
    pub fn with_latency<F>(mut self, latency: F) -> Self
    where
        F: Fn(&LLMRequest) -> Duration + Send + Sync + 'static,
    {
        self.latency = Some(Box::new(latency));
        self
    }

    /// Requests received so far, in arrival order
    pub fn requests(&self) -> Vec<LLMRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }

    fn next_reply(&self, request: &LLMRequest) -> ScriptedReply {
        match &self.script {
            Script::Queue(queue) => queue
                .lock()
                .ok()
                .and_then(|mut q| q.pop_front())
                .unwrap_or_else(|| ScriptedReply::failure("no scripted reply left")),
            Script::Responder(responder) => responder(request),
        }
    }
}

impl std::fmt::Debug for ScriptedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedProvider")
            .field("calls", &self.call_count())
            .finish()
    }
}

#[async_trait]
impl LLMProvider for ScriptedProvider {
    async fn generate_request(&self, request: &LLMRequest) -> Result<LLMResponse> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }

        let reply = self.next_reply(request);

        if let Some(latency) = &self.latency {
            tokio::time::sleep(latency(request)).await;
        }

        match reply {
            ScriptedReply::Text(content) => Ok(LLMResponse::text(content)),
            ScriptedReply::ToolCalls(tool_calls) => Ok(LLMResponse {
                tool_calls,
                ..Default::default()
            }),
            ScriptedReply::Failure(message) => Err(AgentflowError::transport("scripted", message)),
        }
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            provider: "scripted".to_string(),
            model_name: "scripted".to_string(),
        }
    }
}
