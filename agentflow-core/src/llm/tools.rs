//! Tool calling
//!
//! Tools are local functions the model may ask to invoke. A [`ToolRegistry`]
//! maps unique tool names to handlers; a [`ToolCallingSession`] binds the
//! registry's definitions to a request, executes every call the model asks for,
//! feeds the results back as tool messages and performs the final invocation.
//!
//! Tool arguments come from the model and are validated against the tool's
//! parameter schema before the handler runs. Unknown tools, invalid arguments
//! and handler failures are reported back to the model as tool results rather
//! than aborting the session.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{AgentflowError, Result};
use crate::llm::{LLMProvider, Message};
use crate::schema::{Schema, StructuredResult};
use crate::transcript::Transcript;

/// Description of a tool offered to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Schema,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Schema) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// A tool invocation requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// Handler for a single tool
#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn definition(&self) -> &ToolDefinition;

    /// Execute with arguments already validated against the parameter schema
    async fn call(&self, args: &StructuredResult) -> Result<Value>;
}

type ToolFn = dyn Fn(&StructuredResult) -> Result<Value> + Send + Sync;

/// Tool backed by a synchronous closure
pub struct FnTool {
    definition: ToolDefinition,
    func: Box<ToolFn>,
}

impl FnTool {
    pub fn new<F>(definition: ToolDefinition, func: F) -> Self
    where
        F: Fn(&StructuredResult) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            definition,
            func: Box::new(func),
        }
    }
}

impl std::fmt::Debug for FnTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnTool")
            .field("name", &self.definition.name)
            .finish()
    }
}

#[async_trait]
impl ToolHandler for FnTool {
    fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    async fn call(&self, args: &StructuredResult) -> Result<Value> {
        (self.func)(args)
    }
}

/// Registry of tools keyed by unique name
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn ToolHandler>>,
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool; names must be unique
    pub fn register(&mut self, tool: Arc<dyn ToolHandler>) -> Result<()> {
        let name = tool.definition().name.clone();
        if self.tools.contains_key(&name) {
            return Err(AgentflowError::Tool(format!(
                "Tool '{}' is already registered",
                name
            )));
        }
        self.order.push(name.clone());
        self.tools.insert(name, tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn ToolHandler>> {
        self.tools.get(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Definitions in registration order
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| tool.definition().clone())
            .collect()
    }

    /// Execute a call and render its result as tool-message content
    pub async fn execute(&self, call: &ToolCall) -> String {
        let Some(tool) = self.tools.get(&call.name) else {
            tracing::warn!(tool = %call.name, "Model requested unknown tool");
            return format!("Error: unknown tool '{}'", call.name);
        };

        let args = match tool.definition().parameters.validate(&call.arguments) {
            Ok(args) => args,
            Err(violation) => {
                tracing::warn!(tool = %call.name, %violation, "Invalid tool arguments");
                return format!("Error: invalid arguments: {}", violation);
            }
        };

        match tool.call(&args).await {
            Ok(Value::String(s)) => s,
            Ok(value) => value.to_string(),
            Err(e) => {
                tracing::warn!(tool = %call.name, error = %e, "Tool execution failed");
                format!("Error: {}", e)
            }
        }
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.order)
            .finish()
    }
}

/// Invoke a model with tools bound and resolve its tool calls
pub struct ToolCallingSession {
    provider: Arc<dyn LLMProvider>,
    registry: Arc<ToolRegistry>,
    max_rounds: usize,
}

impl ToolCallingSession {
    pub fn new(provider: Arc<dyn LLMProvider>, registry: Arc<ToolRegistry>) -> Self {
        Self {
            provider,
            registry,
            max_rounds: 5,
        }
    }

    /// Maximum number of tool-call rounds before forcing a text answer
    pub fn with_max_rounds(mut self, rounds: usize) -> Self {
        self.max_rounds = rounds.max(1);
        self
    }

    /// Run the tool-calling flow, appending every exchanged message to
    /// `transcript`, and return the final text answer.
    pub async fn run(&self, transcript: &mut Transcript) -> Result<String> {
        if transcript.is_empty() {
            return Err(AgentflowError::Configuration(
                "Tool-calling transcript must not be empty".to_string(),
            ));
        }

        let definitions = self.registry.definitions();

        for round in 1..=self.max_rounds {
            let request = transcript.to_request().tools(definitions.clone());
            let response = self.provider.generate_request(&request).await?;

            if response.tool_calls.is_empty() {
                transcript.ai(response.content.clone());
                return Ok(response.content);
            }

            tracing::debug!(
                round,
                calls = response.tool_calls.len(),
                "Executing requested tool calls"
            );

            let calls = response.tool_calls.clone();
            transcript.push(Message::assistant_tool_calls(response.content, calls.clone()));

            for call in &calls {
                let output = self.registry.execute(call).await;
                transcript.push(Message::tool(&call.id, output));
            }
        }

        // Out of rounds: ask for an answer without offering tools again.
        let response = self.provider.generate_request(&transcript.to_request()).await?;
        transcript.ai(response.content.clone());
        Ok(response.content)
    }
}

/// Arithmetic tools used by the CLI demo and tests
pub fn arithmetic_tools() -> Result<ToolRegistry> {
    use crate::schema::Field;

    fn operands(name: &str) -> Schema {
        Schema::new(name)
            .field(Field::number("a").describe("First operand"))
            .field(Field::number("b").describe("Second operand"))
    }

    fn operand(args: &StructuredResult, key: &str) -> Result<f64> {
        args.get(key)
            .and_then(Value::as_f64)
            .ok_or_else(|| AgentflowError::Tool(format!("missing operand '{}'", key)))
    }

    let add = FnTool::new(
        ToolDefinition::new("add", "Adds a and b.", operands("add")),
        |args| Ok(serde_json::json!(operand(args, "a")? + operand(args, "b")?)),
    );
    let multiply = FnTool::new(
        ToolDefinition::new("multiply", "Multiplies a and b.", operands("multiply")),
        |args| Ok(serde_json::json!(operand(args, "a")? * operand(args, "b")?)),
    );

    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(add))?;
    registry.register(Arc::new(multiply))?;
    Ok(registry)
}
