//! Router Workflow Pattern
//!
//! Classifies a task against a registry of assistants and dispatches it to
//! exactly one. The classification is a structured completion whose
//! `assistant_id` field is an enum built from the registry at call time. The
//! model's choice is still treated as untrusted: a value outside the registry
//! is always surfaced as [`WorkflowError::RouteNotFound`], never defaulted.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::time::Instant;

use crate::completion::StructuredCompletion;
use crate::schema::{Field, Schema, ViolationKind};
use crate::transcript::Transcript;

use super::execution::{ExecutionTrace, StageExt, StepTrace, WorkflowError, WorkflowResult};

/// Prompt used to select a route; `{task}` and `{routes}` are substituted
pub const DEFAULT_ROUTE_PROMPT: &str = "Given a user prompt/query: {task}, select the best option out of the following routes:\n{routes}\nAnswer only in JSON format.";

/// A named capability unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assistant {
    /// Unique identity within a registry
    pub id: String,
    /// What the assistant is good at, shown to the classifier
    pub description: String,
    /// System prompt the assistant runs tasks with
    pub system_prompt: String,
}

impl Assistant {
    pub fn new(
        id: impl Into<String>,
        description: impl Into<String>,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            system_prompt: system_prompt.into(),
        }
    }
}

/// Assistants keyed by unique id, in registration order
#[derive(Debug, Clone, Default)]
pub struct AssistantRegistry {
    assistants: Vec<Assistant>,
    index: HashMap<String, usize>,
}

impl AssistantRegistry {
    /// Build a registry, rejecting duplicate ids
    pub fn new(assistants: impl IntoIterator<Item = Assistant>) -> WorkflowResult<Self> {
        let mut registry = Self::default();
        for assistant in assistants {
            registry.register(assistant)?;
        }
        Ok(registry)
    }

    /// Add an assistant; its id must not already be registered
    pub fn register(&mut self, assistant: Assistant) -> WorkflowResult<()> {
        if self.index.contains_key(&assistant.id) {
            return Err(WorkflowError::DuplicateAssistant(assistant.id));
        }
        self.index.insert(assistant.id.clone(), self.assistants.len());
        self.assistants.push(assistant);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&Assistant> {
        self.index.get(id).map(|&i| &self.assistants[i])
    }

    pub fn ids(&self) -> Vec<String> {
        self.assistants.iter().map(|a| a.id.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Assistant> {
        self.assistants.iter()
    }

    pub fn len(&self) -> usize {
        self.assistants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assistants.is_empty()
    }
}

/// The classifier's decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteSelection {
    pub assistant_id: String,
    /// Kept for observability only; never used for control flow
    pub reason: String,
}

/// Result of routing with its trace
#[derive(Debug, Clone)]
pub struct RouteOutcome {
    pub selection: RouteSelection,
    pub output: String,
    pub trace: ExecutionTrace,
}

/// Router workflow that dispatches a task to one assistant
pub struct Router {
    name: String,
    prompt_template: String,
    completion: StructuredCompletion,
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router").field("name", &self.name).finish()
    }
}

impl Router {
    /// Create a new router builder
    pub fn builder(completion: StructuredCompletion) -> RouterBuilder {
        RouterBuilder::new(completion)
    }

    /// Get the router name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Route `task` to one assistant and return its response.
    ///
    /// # Errors
    ///
    /// [`WorkflowError::RouteNotFound`] if the selection names an unregistered
    /// assistant; transport and schema errors from either stage.
    pub async fn route(&self, task: &str, assistants: &AssistantRegistry) -> WorkflowResult<String> {
        Ok(self.route_with_trace(task, assistants).await?.output)
    }

    /// Route and return the selection and trace alongside the response
    pub async fn route_with_trace(
        &self,
        task: &str,
        assistants: &AssistantRegistry,
    ) -> WorkflowResult<RouteOutcome> {
        let mut trace = ExecutionTrace::new(&self.name);

        let start = Instant::now();
        let selection = self.select(task, assistants).await?;
        trace.add_step(StepTrace::success(
            "classify",
            json!({ "task": task, "routes": assistants.ids() }),
            json!(selection),
            start.elapsed().as_millis() as u64,
        ));

        let assistant = assistants
            .get(&selection.assistant_id)
            .ok_or_else(|| WorkflowError::RouteNotFound {
                assistant_id: selection.assistant_id.clone(),
                available: assistants.ids(),
            })
            .stage(&self.name, "dispatch")?;

        let start = Instant::now();
        let output = self.dispatch(assistant, task).await?;
        trace.add_step(StepTrace::success(
            format!("dispatch:{}", assistant.id),
            json!({ "task": task }),
            json!(output),
            start.elapsed().as_millis() as u64,
        ));

        Ok(RouteOutcome {
            selection,
            output,
            trace,
        })
    }

    /// Ask the model which assistant should handle `task`
    pub async fn select(
        &self,
        task: &str,
        assistants: &AssistantRegistry,
    ) -> WorkflowResult<RouteSelection> {
        if assistants.is_empty() {
            return Err(WorkflowError::InvalidConfig(
                "router needs at least one assistant".to_string(),
            )
            .in_stage(&self.name, "classify"));
        }

        let schema = selection_schema(assistants);
        let routes = assistants
            .iter()
            .map(|a| format!("ID: {}, Description: {}", a.id, a.description))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = self
            .prompt_template
            .replace("{task}", task)
            .replace("{routes}", &routes);

        let mut transcript = Transcript::new();
        transcript.human(prompt);

        let result = self
            .completion
            .structured(&transcript, &schema)
            .await
            .map_err(|e| route_violation(e, assistants))
            .stage(&self.name, "classify")?;

        let selection = RouteSelection {
            assistant_id: result.get_str("assistant_id").unwrap_or_default().to_string(),
            reason: result.get_str("reason").unwrap_or_default().to_string(),
        };

        tracing::info!(
            router = %self.name,
            assistant_id = %selection.assistant_id,
            reason = %selection.reason,
            "Route selected"
        );

        Ok(selection)
    }

    /// Run `task` on `assistant` with a fresh single-turn transcript
    pub async fn dispatch(&self, assistant: &Assistant, task: &str) -> WorkflowResult<String> {
        let transcript = Transcript::single_turn(&assistant.system_prompt, task);
        self.completion
            .text(&transcript)
            .await
            .stage(&self.name, format!("dispatch:{}", assistant.id))
    }
}

fn selection_schema(assistants: &AssistantRegistry) -> Schema {
    Schema::new("route_selection")
        .field(Field::string("reason").describe("The reason for choosing this route."))
        .field(
            Field::enumeration("assistant_id", assistants.ids())
                .describe("The ID of the assistant to route the request to."),
        )
}

/// An out-of-enum selection is a routing failure, not a generic schema one
fn route_violation(err: WorkflowError, assistants: &AssistantRegistry) -> WorkflowError {
    match err {
        WorkflowError::SchemaViolation(violation) if violation.field == "assistant_id" => {
            match violation.kind {
                ViolationKind::NotInEnum { value } => WorkflowError::RouteNotFound {
                    assistant_id: value,
                    available: assistants.ids(),
                },
                _ => WorkflowError::SchemaViolation(violation),
            }
        }
        other => other,
    }
}

/// Builder for creating routers
pub struct RouterBuilder {
    name: String,
    prompt_template: String,
    completion: StructuredCompletion,
}

impl RouterBuilder {
    pub fn new(completion: StructuredCompletion) -> Self {
        Self {
            name: "router".to_string(),
            prompt_template: DEFAULT_ROUTE_PROMPT.to_string(),
            completion,
        }
    }

    /// Set the router name
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Override the selection prompt (`{task}` and `{routes}` placeholders)
    pub fn prompt_template(mut self, template: impl Into<String>) -> Self {
        self.prompt_template = template.into();
        self
    }

    /// Build the router
    pub fn build(self) -> Router {
        Router {
            name: self.name,
            prompt_template: self.prompt_template,
            completion: self.completion,
        }
    }
}
