//! Orchestrator-Workers Workflow Pattern
//!
//! The model first decomposes a task into a variable number of typed subtasks
//! (a structured completion), then one worker completion per subtask runs
//! concurrently. Unlike [`super::Parallelizer`] used directly, the number and
//! nature of the subtasks is unknown until decomposition finishes.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Instant;

use crate::completion::StructuredCompletion;
use crate::schema::{Field, FieldType, Schema, SchemaViolation};
use crate::transcript::Transcript;

use super::execution::{ExecutionTrace, StageExt, StepTrace, WorkflowResult};
use super::parallel::Parallelizer;

/// Decomposition prompt; `{task}` is substituted
pub const DEFAULT_ORCHESTRATOR_PROMPT: &str = "Analyze this task and break it down into 2-3 distinct approaches:

Task: {task}

Provide an Analysis:

Explain your understanding of the task and which variations would be valuable.
Focus on how each approach serves different aspects of the task.

Along with the analysis, provide 2-3 approaches to tackle the task, each with a brief description:

Formal style: Write technically and precisely, focusing on detailed specifications
Conversational style: Write in a friendly and engaging way that connects with the reader
Hybrid style: Tell a story that includes technical details, combining emotional elements with specifications

Return only JSON output.";

/// Worker prompt; `{original_task}`, `{task_type}` and `{task_description}` are substituted
pub const DEFAULT_WORKER_PROMPT: &str = "Generate content based on:
Task: {original_task}
Style: {task_type}
Guidelines: {task_description}

Return only your response:
[Your content here, maintaining the specified style and fully addressing requirements.]";

/// A unit of work produced by decomposition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subtask {
    pub reasoning: String,
    #[serde(rename = "type")]
    pub task_type: String,
    pub description: String,
}

/// The orchestrator's analysis and subtasks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decomposition {
    pub analysis: String,
    pub subtasks: Vec<Subtask>,
}

/// Result of an orchestrator run
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorRun {
    pub decomposition: Decomposition,
    /// Worker outputs, `outputs[i]` for `decomposition.subtasks[i]`
    pub outputs: Vec<String>,
    pub trace: ExecutionTrace,
}

/// Orchestrator workflow
pub struct Orchestrator {
    name: String,
    orchestrator_prompt: String,
    worker_prompt: String,
    task_types: Vec<String>,
    completion: StructuredCompletion,
    parallelizer: Parallelizer,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("name", &self.name)
            .field("task_types", &self.task_types)
            .finish()
    }
}

impl Orchestrator {
    /// Create a new orchestrator builder
    pub fn builder(completion: StructuredCompletion) -> OrchestratorBuilder {
        OrchestratorBuilder::new(completion)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Decompose `task` and return the worker outputs in subtask order.
    ///
    /// # Errors
    ///
    /// Fails fast on any decomposition or worker error.
    pub async fn run(&self, task: &str) -> WorkflowResult<Vec<String>> {
        Ok(self.execute(task).await?.outputs)
    }

    /// Decompose and execute, returning the decomposition and trace too
    pub async fn execute(&self, task: &str) -> WorkflowResult<OrchestratorRun> {
        let mut trace = ExecutionTrace::new(&self.name);

        let start = Instant::now();
        let decomposition = self.decompose(task).await?;
        trace.add_step(StepTrace::success(
            "decompose",
            json!({ "task": task }),
            json!(decomposition),
            start.elapsed().as_millis() as u64,
        ));

        tracing::info!(
            orchestrator = %self.name,
            subtasks = decomposition.subtasks.len(),
            "Task decomposed"
        );
        if decomposition.subtasks.is_empty() {
            tracing::warn!(orchestrator = %self.name, "Decomposition produced no subtasks");
        }

        let start = Instant::now();
        let outputs = self
            .parallelizer
            .run(decomposition.subtasks.clone(), |subtask| self.work(task, subtask))
            .await
            .stage(&self.name, "workers")?;
        trace.add_step(StepTrace::success(
            "workers",
            json!({ "subtasks": decomposition.subtasks.len() }),
            json!(outputs),
            start.elapsed().as_millis() as u64,
        ));

        Ok(OrchestratorRun {
            decomposition,
            outputs,
            trace,
        })
    }

    /// Ask the model for an analysis and subtasks
    pub async fn decompose(&self, task: &str) -> WorkflowResult<Decomposition> {
        let mut transcript = Transcript::new();
        transcript.human(self.orchestrator_prompt.replace("{task}", task));

        let result = self
            .completion
            .structured(&transcript, &self.decomposition_schema())
            .await
            .stage(&self.name, "decompose")?;

        result
            .deserialize::<Decomposition>()
            .map_err(|e| SchemaViolation::malformed(e.to_string()))
            .stage(&self.name, "decompose")
    }

    async fn work(&self, task: &str, subtask: Subtask) -> WorkflowResult<String> {
        let prompt = self
            .worker_prompt
            .replace("{original_task}", task)
            .replace("{task_type}", &subtask.task_type)
            .replace("{task_description}", &subtask.description);

        let mut transcript = Transcript::new();
        transcript.human(prompt);

        tracing::debug!(orchestrator = %self.name, task_type = %subtask.task_type, "Worker started");
        self.completion.text(&transcript).await
    }

    fn decomposition_schema(&self) -> Schema {
        let type_field = if self.task_types.is_empty() {
            Field::string("type")
        } else {
            Field::enumeration("type", self.task_types.iter().cloned())
        };

        let subtask = Schema::new("subtask")
            .field(Field::string("reasoning").describe("The reasoning for the task"))
            .field(type_field.describe("The type of the task"))
            .field(
                Field::string("description")
                    .describe("The description of the task and how it serves the original task"),
            );

        Schema::new("decomposition")
            .field(Field::string("analysis"))
            .field(Field::array("subtasks", FieldType::Object(subtask)))
    }
}

/// Builder for orchestrators
pub struct OrchestratorBuilder {
    name: String,
    orchestrator_prompt: String,
    worker_prompt: String,
    task_types: Vec<String>,
    completion: StructuredCompletion,
    max_concurrency: Option<usize>,
}

impl OrchestratorBuilder {
    pub fn new(completion: StructuredCompletion) -> Self {
        Self {
            name: "orchestrator".to_string(),
            orchestrator_prompt: DEFAULT_ORCHESTRATOR_PROMPT.to_string(),
            worker_prompt: DEFAULT_WORKER_PROMPT.to_string(),
            task_types: vec![
                "Formal".to_string(),
                "Conversational".to_string(),
                "Hybrid".to_string(),
            ],
            completion,
            max_concurrency: None,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Override the decomposition prompt (`{task}` placeholder)
    pub fn orchestrator_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.orchestrator_prompt = prompt.into();
        self
    }

    /// Override the worker prompt
    pub fn worker_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.worker_prompt = prompt.into();
        self
    }

    /// Permitted subtask types; empty allows any string
    pub fn task_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.task_types = types.into_iter().map(Into::into).collect();
        self
    }

    /// Limit concurrent workers
    pub fn max_concurrency(mut self, limit: Option<usize>) -> Self {
        self.max_concurrency = limit;
        self
    }

    pub fn build(self) -> Orchestrator {
        let parallelizer = Parallelizer::new()
            .with_name(format!("{}.workers", self.name))
            .with_max_concurrency(self.max_concurrency);

        Orchestrator {
            name: self.name,
            orchestrator_prompt: self.orchestrator_prompt,
            worker_prompt: self.worker_prompt,
            task_types: self.task_types,
            completion: self.completion,
            parallelizer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LLMRequest;
    use crate::llm::scripted::{ScriptedProvider, ScriptedReply};
    use std::sync::Arc;
    use std::time::Duration;

    fn decomposition_reply() -> ScriptedReply {
        ScriptedReply::json(json!({
            "analysis": "Three angles on a water bottle",
            "subtasks": [
                {"reasoning": "specs", "type": "Formal", "description": "List the specifications"},
                {"reasoning": "reach", "type": "Conversational", "description": "Talk to millennials"},
                {"reasoning": "story", "type": "Hybrid", "description": "Tell a story"}
            ]
        }))
    }

    fn style_of(req: &LLMRequest) -> String {
        req.last_user_message()
            .and_then(|m| m.lines().find(|l| l.starts_with("Style: ")))
            .map(|l| l.trim_start_matches("Style: ").to_string())
            .unwrap_or_default()
    }

    #[tokio::test(start_paused = true)]
    async fn test_outputs_follow_subtask_order() {
        let provider = Arc::new(
            ScriptedProvider::with_responder(|req| {
                if req.response_schema.is_some() {
                    decomposition_reply()
                } else {
                    ScriptedReply::text(format!("{} copy", style_of(req)))
                }
            })
            .with_latency(|req| match style_of(req).as_str() {
                // First subtask finishes last
                "Formal" => Duration::from_millis(300),
                "Conversational" => Duration::from_millis(200),
                _ => Duration::from_millis(100),
            }),
        );

        let run = Orchestrator::builder(StructuredCompletion::new(provider.clone()))
            .build()
            .execute("Write a product description for an eco-friendly water bottle")
            .await
            .unwrap();

        assert_eq!(run.decomposition.subtasks.len(), 3);
        assert_eq!(
            run.outputs,
            vec!["Formal copy", "Conversational copy", "Hybrid copy"]
        );
        assert_eq!(provider.call_count(), 4);
    }

    #[tokio::test]
    async fn test_worker_prompt_carries_original_task() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            ScriptedReply::json(json!({
                "analysis": "one angle",
                "subtasks": [{"reasoning": "r", "type": "Formal", "description": "Be precise"}]
            })),
            ScriptedReply::text("done"),
        ]));

        let outputs = Orchestrator::builder(StructuredCompletion::new(provider.clone()))
            .build()
            .run("Describe a bottle")
            .await
            .unwrap();

        assert_eq!(outputs, vec!["done"]);
        let worker_prompt = provider.requests()[1].last_user_message().unwrap().to_string();
        assert!(worker_prompt.contains("Task: Describe a bottle"));
        assert!(worker_prompt.contains("Style: Formal"));
        assert!(worker_prompt.contains("Guidelines: Be precise"));
    }

    #[tokio::test]
    async fn test_unknown_task_type_is_schema_violation() {
        let provider = Arc::new(ScriptedProvider::with_responder(|_| {
            ScriptedReply::json(json!({
                "analysis": "a",
                "subtasks": [{"reasoning": "r", "type": "Poetic", "description": "d"}]
            }))
        }));

        let err = Orchestrator::builder(StructuredCompletion::new(provider).with_schema_retries(0))
            .build()
            .run("task")
            .await
            .unwrap_err();

        assert!(err.is_schema_violation());
        assert_eq!(err.stages(), vec!["orchestrator/decompose"]);
    }

    #[tokio::test]
    async fn test_worker_failure_fails_whole_run() {
        let provider = Arc::new(ScriptedProvider::with_responder(|req| {
            if req.response_schema.is_some() {
                decomposition_reply()
            } else if style_of(req) == "Hybrid" {
                ScriptedReply::failure("rate limited")
            } else {
                ScriptedReply::text("ok")
            }
        }));

        let err = Orchestrator::builder(StructuredCompletion::new(provider))
            .build()
            .run("task")
            .await
            .unwrap_err();

        assert!(err.is_transport());
        assert_eq!(
            err.stages(),
            vec!["orchestrator/workers", "orchestrator.workers/item 2"]
        );
    }

    #[tokio::test]
    async fn test_free_form_task_types() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            ScriptedReply::json(json!({
                "analysis": "a",
                "subtasks": [{"reasoning": "r", "type": "Haiku", "description": "d"}]
            })),
            ScriptedReply::text("five seven five"),
        ]));

        let outputs = Orchestrator::builder(StructuredCompletion::new(provider))
            .task_types(Vec::<String>::new())
            .build()
            .run("task")
            .await
            .unwrap();
        assert_eq!(outputs, vec!["five seven five"]);
    }
}
