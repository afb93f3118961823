//! OpenAI-compatible chat completions provider
//!
//! Works against the OpenAI API and any endpoint that speaks the same protocol
//! (Azure OpenAI, Ollama's `/v1` endpoint, local gateways). Structured requests
//! are sent as a JSON-schema `response_format`; tool definitions as function
//! tools. Credentials are passed through as a bearer token and never inspected.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::error::{AgentflowError, Result};
use crate::llm::{
    LLMProvider, LLMRequest, LLMResponse, Message, MessageRole, ModelInfo, TokenUsage, ToolCall,
    ToolDefinition,
};
use crate::schema::Schema;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const OLLAMA_BASE_URL: &str = "http://localhost:11434/v1";

/// OpenAI-compatible LLM provider
pub struct OpenAIProvider {
    client: reqwest::Client,
    api_key: Option<String>,
    model: String,
    base_url: String,
    provider_name: &'static str,
    default_temperature: Option<f32>,
    default_max_tokens: Option<usize>,
}

impl OpenAIProvider {
    /// Create a new OpenAI provider.
    ///
    /// # Arguments
    ///
    /// * `api_key` - OpenAI API key
    /// * `model` - Model name (e.g., "gpt-4o-mini")
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self::with_base_url(api_key, model, OPENAI_BASE_URL)
    }

    /// Create with a custom base URL (for Azure OpenAI or compatible APIs).
    pub fn with_base_url(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: Some(api_key.into()),
            model: model.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            provider_name: "openai",
            default_temperature: None,
            default_max_tokens: None,
        }
    }

    /// Local Ollama through its OpenAI-compatible endpoint (no credentials).
    pub fn ollama(model: impl Into<String>, base_url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: None,
            model: model.into(),
            base_url: base_url
                .unwrap_or_else(|| OLLAMA_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            provider_name: "ollama",
            default_temperature: None,
            default_max_tokens: None,
        }
    }

    /// Create from environment variables.
    ///
    /// Reads from:
    /// - `OPENAI_API_KEY` - API key (required)
    /// - `OPENAI_MODEL` - Model name (optional, defaults to "gpt-4o-mini")
    /// - `OPENAI_BASE_URL` - Custom base URL (optional)
    ///
    /// # Errors
    ///
    /// Returns an error if OPENAI_API_KEY is not set.
    pub fn from_env(model: Option<impl Into<String>>) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
            AgentflowError::Configuration("OPENAI_API_KEY environment variable not set".to_string())
        })?;

        let model = model
            .map(|m| m.into())
            .or_else(|| std::env::var("OPENAI_MODEL").ok())
            .unwrap_or_else(|| "gpt-4o-mini".to_string());

        let base_url =
            std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| OPENAI_BASE_URL.to_string());

        Ok(Self::with_base_url(api_key, model, base_url))
    }

    /// Apply a per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AgentflowError::Configuration(format!("Failed to build HTTP client: {}", e)))?;
        Ok(self)
    }

    /// Sampling defaults used when a request leaves them unset
    pub fn with_generation_defaults(mut self, temperature: f32, max_tokens: Option<usize>) -> Self {
        self.default_temperature = Some(temperature);
        self.default_max_tokens = max_tokens;
        self
    }

    /// Get the model name.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn build_request(&self, request: &LLMRequest) -> OpenAIRequest {
        OpenAIRequest {
            model: self.model.clone(),
            messages: convert_messages(&request.messages),
            temperature: request.temperature.or(self.default_temperature),
            max_tokens: request.max_tokens.or(self.default_max_tokens),
            stop: if request.stop_sequences.is_empty() {
                None
            } else {
                Some(request.stop_sequences.clone())
            },
            response_format: request.response_schema.as_ref().map(response_format),
            tools: if request.tools.is_empty() {
                None
            } else {
                Some(request.tools.iter().map(convert_tool).collect())
            },
        }
    }

    fn transport(&self, message: impl Into<String>) -> AgentflowError {
        AgentflowError::transport(self.provider_name, message)
    }
}

#[derive(Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Value>>,
}

#[derive(Serialize)]
struct OpenAIMessage {
    role: &'static str,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OpenAIToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct OpenAIToolCall {
    id: String,
    #[serde(rename = "type", default = "function_type")]
    call_type: String,
    function: OpenAIFunctionCall,
}

#[derive(Serialize, Deserialize)]
struct OpenAIFunctionCall {
    name: String,
    /// JSON-encoded argument object
    arguments: String,
}

fn function_type() -> String {
    "function".to_string()
}

#[derive(Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
    usage: Option<OpenAIUsage>,
}

#[derive(Deserialize)]
struct OpenAIChoice {
    message: Option<OpenAIMessageResponse>,
}

#[derive(Deserialize)]
struct OpenAIMessageResponse {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<OpenAIToolCall>,
}

#[derive(Deserialize)]
struct OpenAIUsage {
    prompt_tokens: usize,
    completion_tokens: usize,
    total_tokens: usize,
}

#[derive(Deserialize)]
struct OpenAIError {
    error: OpenAIErrorDetail,
}

#[derive(Deserialize)]
struct OpenAIErrorDetail {
    message: String,
    #[serde(rename = "type")]
    error_type: Option<String>,
}

fn convert_messages(messages: &[Message]) -> Vec<OpenAIMessage> {
    messages
        .iter()
        .map(|m| OpenAIMessage {
            role: match m.role {
                MessageRole::System => "system",
                MessageRole::User => "user",
                MessageRole::Assistant => "assistant",
                MessageRole::Tool => "tool",
            },
            content: m.content.clone(),
            tool_calls: if m.tool_calls.is_empty() {
                None
            } else {
                Some(
                    m.tool_calls
                        .iter()
                        .map(|call| OpenAIToolCall {
                            id: call.id.clone(),
                            call_type: function_type(),
                            function: OpenAIFunctionCall {
                                name: call.name.clone(),
                                arguments: call.arguments.to_string(),
                            },
                        })
                        .collect(),
                )
            },
            tool_call_id: m.tool_call_id.clone(),
        })
        .collect()
}

fn response_format(schema: &Schema) -> Value {
    serde_json::json!({
        "type": "json_schema",
        "json_schema": {
            "name": sanitize_name(&schema.name),
            "schema": schema.to_json_schema(),
            "strict": schema.is_strict(),
        }
    })
}

fn convert_tool(tool: &ToolDefinition) -> Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters.to_json_schema(),
        }
    })
}

/// Schema names may only contain `[a-zA-Z0-9_-]`
fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect();
    if cleaned.is_empty() { "response".to_string() } else { cleaned }
}

fn parse_tool_call(call: OpenAIToolCall) -> ToolCall {
    // Unparseable arguments are kept raw; schema validation rejects them later.
    let arguments = serde_json::from_str(&call.function.arguments)
        .unwrap_or(Value::String(call.function.arguments));
    ToolCall::new(call.id, call.function.name, arguments)
}

#[async_trait]
impl LLMProvider for OpenAIProvider {
    async fn generate_request(&self, request: &LLMRequest) -> Result<LLMResponse> {
        let openai_request = self.build_request(request);
        let url = format!("{}/chat/completions", self.base_url);

        tracing::debug!(
            provider = self.provider_name,
            model = %self.model,
            messages = request.messages.len(),
            structured = request.response_schema.is_some(),
            tools = request.tools.len(),
            "Sending chat completion request"
        );

        let mut http = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&openai_request);
        if let Some(key) = &self.api_key {
            http = http.bearer_auth(key);
        }

        let response = http
            .send()
            .await
            .map_err(|e| self.transport(format!("Failed to send request: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());

            if let Ok(error) = serde_json::from_str::<OpenAIError>(&text) {
                return Err(self.transport(format!(
                    "API error ({}): {}",
                    error.error.error_type.unwrap_or_else(|| status.to_string()),
                    error.error.message
                )));
            }

            return Err(self.transport(format!("API error ({}): {}", status, text)));
        }

        let openai_response: OpenAIResponse = response
            .json()
            .await
            .map_err(|e| self.transport(format!("Failed to parse response: {}", e)))?;

        let usage = openai_response.usage.map(|u| TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });

        let message = openai_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .ok_or_else(|| self.transport("API returned no choices"))?;

        Ok(LLMResponse {
            content: message.content.unwrap_or_default(),
            tool_calls: message.tool_calls.into_iter().map(parse_tool_call).collect(),
            usage,
        })
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            provider: self.provider_name.to_string(),
            model_name: self.model.clone(),
        }
    }
}
