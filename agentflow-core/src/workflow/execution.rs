//! Workflow execution types and error handling

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::AgentflowError;
use crate::llm::TokenUsage;
use crate::schema::SchemaViolation;

/// Error type for workflow operations
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// The model service was unreachable or failed at the transport level
    #[error("Transport error: {0}")]
    Transport(String),

    /// A structured reply failed validation after all retries
    #[error("Schema violation: {0}")]
    SchemaViolation(SchemaViolation),

    /// The router's selection names no registered assistant
    #[error("Route not found: selected '{assistant_id}', registered [{}]", .available.join(", "))]
    RouteNotFound {
        assistant_id: String,
        available: Vec<String>,
    },

    /// Two assistants share an id
    #[error("Duplicate assistant id '{0}'")]
    DuplicateAssistant(String),

    /// A completion was requested over an empty transcript
    #[error("Transcript must not be empty")]
    EmptyTranscript,

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Failure annotated with the component and stage it happened in
    #[error("{workflow} failed at {stage}: {source}")]
    Stage {
        workflow: String,
        stage: String,
        #[source]
        source: Box<WorkflowError>,
    },
}

impl WorkflowError {
    /// Annotate with the workflow component and stage
    pub fn in_stage(self, workflow: impl Into<String>, stage: impl Into<String>) -> Self {
        WorkflowError::Stage {
            workflow: workflow.into(),
            stage: stage.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, beneath any stage annotations
    pub fn root(&self) -> &WorkflowError {
        match self {
            WorkflowError::Stage { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_transport(&self) -> bool {
        matches!(self.root(), WorkflowError::Transport(_))
    }

    pub fn is_schema_violation(&self) -> bool {
        matches!(self.root(), WorkflowError::SchemaViolation(_))
    }

    pub fn is_route_not_found(&self) -> bool {
        matches!(self.root(), WorkflowError::RouteNotFound { .. })
    }

    /// Outermost-first list of `workflow/stage` annotations
    pub fn stages(&self) -> Vec<String> {
        let mut stages = Vec::new();
        let mut current = self;
        while let WorkflowError::Stage {
            workflow,
            stage,
            source,
        } = current
        {
            stages.push(format!("{}/{}", workflow, stage));
            current = source.as_ref();
        }
        stages
    }
}

impl From<SchemaViolation> for WorkflowError {
    fn from(violation: SchemaViolation) -> Self {
        WorkflowError::SchemaViolation(violation)
    }
}

impl From<AgentflowError> for WorkflowError {
    fn from(err: AgentflowError) -> Self {
        match err {
            AgentflowError::Configuration(message) => WorkflowError::InvalidConfig(message),
            // Everything else surfaced by a provider is a failure to get a usable reply.
            other => WorkflowError::Transport(other.to_string()),
        }
    }
}

/// Result type for workflow operations
pub type WorkflowResult<T> = Result<T, WorkflowError>;

/// Attach stage context to a workflow result
pub trait StageExt<T> {
    fn stage(self, workflow: &str, stage: impl Into<String>) -> WorkflowResult<T>;
}

impl<T, E: Into<WorkflowError>> StageExt<T> for Result<T, E> {
    fn stage(self, workflow: &str, stage: impl Into<String>) -> WorkflowResult<T> {
        self.map_err(|e| e.into().in_stage(workflow, stage))
    }
}

/// Trace of a single step execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepTrace {
    /// Step name
    pub step_name: String,

    /// Step input (serialized)
    pub input: serde_json::Value,

    /// Step output (serialized)
    pub output: serde_json::Value,

    /// Duration of step execution
    pub duration_ms: u64,

    /// Whether the step succeeded
    pub success: bool,

    /// Error message if failed
    pub error: Option<String>,

    /// Token usage if available
    pub token_usage: Option<TokenUsage>,
}

impl StepTrace {
    /// Create a successful step trace
    pub fn success(
        step_name: impl Into<String>,
        input: serde_json::Value,
        output: serde_json::Value,
        duration_ms: u64,
    ) -> Self {
        Self {
            step_name: step_name.into(),
            input,
            output,
            duration_ms,
            success: true,
            error: None,
            token_usage: None,
        }
    }

    /// Create a failed step trace
    pub fn failure(
        step_name: impl Into<String>,
        input: serde_json::Value,
        error: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            step_name: step_name.into(),
            input,
            output: serde_json::Value::Null,
            duration_ms,
            success: false,
            error: Some(error.into()),
            token_usage: None,
        }
    }

    /// Add token usage to the trace
    pub fn with_token_usage(mut self, usage: Option<TokenUsage>) -> Self {
        self.token_usage = usage;
        self
    }
}

/// Complete execution trace for a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionTrace {
    /// Workflow name
    pub workflow_name: String,

    /// Step traces in execution order
    pub steps: Vec<StepTrace>,

    /// Total duration
    pub total_duration_ms: u64,

    /// Whether the workflow completed successfully
    pub success: bool,

    /// Final error if failed
    pub error: Option<String>,
}

impl ExecutionTrace {
    /// Create a new execution trace
    pub fn new(workflow_name: impl Into<String>) -> Self {
        Self {
            workflow_name: workflow_name.into(),
            steps: Vec::new(),
            total_duration_ms: 0,
            success: true,
            error: None,
        }
    }

    /// Add a step trace
    pub fn add_step(&mut self, step: StepTrace) {
        self.total_duration_ms += step.duration_ms;
        if !step.success {
            self.success = false;
            self.error = step.error.clone();
        }
        self.steps.push(step);
    }

    /// Get total token usage across all steps
    pub fn total_token_usage(&self) -> Option<TokenUsage> {
        self.steps
            .iter()
            .filter_map(|s| s.token_usage)
            .reduce(|mut total, usage| {
                total += usage;
                total
            })
    }

    /// Get the number of completed steps
    pub fn completed_steps(&self) -> usize {
        self.steps.iter().filter(|s| s.success).count()
    }
}
