use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::schema::Schema;

/// Message role in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    /// The human side of the conversation
    User,
    /// The model side of the conversation
    Assistant,
    /// Result of a tool invocation fed back to the model
    Tool,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MessageRole::System => "system",
            MessageRole::User => "human",
            MessageRole::Assistant => "ai",
            MessageRole::Tool => "tool",
        };
        f.write_str(name)
    }
}

/// A message in a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,

    /// Tool invocations requested by the model (assistant messages only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    /// Call this message answers (tool messages only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    /// Assistant message carrying tool-call requests
    pub fn assistant_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::assistant(content)
        }
    }

    /// Tool-result message answering `call_id`
    pub fn tool(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(call_id.into()),
            ..Self::new(MessageRole::Tool, content)
        }
    }
}

/// Request to an LLM provider
#[derive(Debug, Clone, Default)]
pub struct LLMRequest {
    /// Messages in the conversation
    pub messages: Vec<Message>,

    /// Temperature for generation (0.0-2.0)
    pub temperature: Option<f32>,

    /// Maximum tokens to generate
    pub max_tokens: Option<usize>,

    /// Stop sequences
    pub stop_sequences: Vec<String>,

    /// Requested shape of the reply; `None` asks for free text
    pub response_schema: Option<Schema>,

    /// Tools the model may call
    pub tools: Vec<ToolDefinition>,
}

impl LLMRequest {
    /// Create a request over an existing message sequence
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    /// Create a simple request from a single prompt
    pub fn from_prompt(prompt: impl Into<String>) -> Self {
        Self::new(vec![Message::user(prompt)])
    }

    /// Create a request with system prompt
    pub fn with_system_prompt(
        system_prompt: impl Into<String>,
        user_prompt: impl Into<String>,
    ) -> Self {
        Self::new(vec![Message::system(system_prompt), Message::user(user_prompt)])
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature.clamp(0.0, 2.0));
        self
    }

    pub fn max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn schema(mut self, schema: Schema) -> Self {
        self.response_schema = Some(schema);
        self
    }

    pub fn tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    /// Text of the last user message, if any
    pub fn last_user_message(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::User)
            .map(|m| m.content.as_str())
    }
}

/// Response from an LLM provider
#[derive(Debug, Clone, Default)]
pub struct LLMResponse {
    /// Generated content
    pub content: String,

    /// Tool invocations requested instead of (or alongside) content
    pub tool_calls: Vec<ToolCall>,

    /// Token usage information
    pub usage: Option<TokenUsage>,
}

impl LLMResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }
}

/// Token usage information
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

impl std::ops::AddAssign for TokenUsage {
    fn add_assign(&mut self, other: Self) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// Trait for LLM provider implementations.
///
/// A provider turns a message sequence (plus an optional response schema and
/// tool definitions) into a reply. Any failure to reach the service or to get
/// a well-formed reply from it is a [`crate::error::AgentflowError::Transport`]
/// error. Providers do not validate replies against the schema; that happens
/// in [`crate::completion::StructuredCompletion`].
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Generate a reply for a structured request
    async fn generate_request(&self, request: &LLMRequest) -> Result<LLMResponse>;

    /// Generate text from a single prompt
    async fn generate(&self, prompt: &str) -> Result<String> {
        let response = self.generate_request(&LLMRequest::from_prompt(prompt)).await?;
        Ok(response.content)
    }

    /// Get model information
    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            provider: "unknown".to_string(),
            model_name: "unknown".to_string(),
        }
    }
}

/// Model information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelInfo {
    pub provider: String,
    pub model_name: String,
}

pub mod factory;
pub mod providers;
pub mod retry;
pub mod scripted;
pub mod tools;

pub use factory::LLMProviderFactory;
pub use retry::{RetryConfig, RetryState, RetryingProvider, with_retry};
pub use scripted::{ScriptedProvider, ScriptedReply};
pub use tools::{FnTool, ToolCall, ToolCallingSession, ToolDefinition, ToolHandler, ToolRegistry};
