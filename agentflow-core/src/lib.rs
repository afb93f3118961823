//! # Agentflow - Composable Workflow Patterns for LLM Completions
//!
//! Agentflow orchestrates calls to a chat-completion model through a small set
//! of control-flow patterns:
//! - Prompt chaining over a shared transcript
//! - Routing to one of a set of registered assistants
//! - Concurrent fan-out/fan-in with order-preserving joins
//! - Orchestrator-worker decomposition
//! - Evaluator-optimizer refinement loops with a bounded iteration count
//!
//! All of them share one leaf operation, [`completion::StructuredCompletion`],
//! which enforces typed, schema-validated model output.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use agentflow_core::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = AgentflowConfig::load()?;
//!     let provider = LLMProviderFactory::from_config(&config)?;
//!     let completion = StructuredCompletion::new(provider);
//!
//!     let chain = PromptChain::builder(completion).build();
//!     let answer = chain
//!         .run("2+2?", &["show your work", "give final answer only"])
//!         .await?;
//!     println!("{}", answer);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! - `llm-openai` (default): OpenAI-compatible chat completions provider,
//!   also used for Ollama

pub mod completion;
pub mod config;
pub mod documents;
pub mod error;
pub mod llm;
pub mod schema;
pub mod trace;
pub mod transcript;
pub mod workflow;

/// Current library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export commonly used types
pub mod prelude {
    pub use crate::completion::{Completion, CompletionOutput, StructuredCompletion};
    pub use crate::config::{
        AgentflowConfig, LLMProviderConfig, LLMProviderKind, RetrySettings, WorkflowConfig,
    };
    pub use crate::documents::{
        Document, DocumentLoader, FileLoader, HttpLoader, RecursiveCharacterSplitter, loader_for,
    };
    pub use crate::error::{AgentflowError, Result};
    pub use crate::llm::{
        FnTool, LLMProvider, LLMProviderFactory, LLMRequest, LLMResponse, Message, MessageRole,
        ModelInfo, RetryConfig, RetryingProvider, TokenUsage, ToolCall, ToolCallingSession,
        ToolDefinition, ToolHandler, ToolRegistry,
    };
    pub use crate::schema::{
        Field, FieldType, Schema, SchemaViolation, StructuredResult, ViolationKind,
    };
    pub use crate::trace::{InMemoryTraceSink, LogTraceSink, TraceRecord, TraceSink, traced};
    pub use crate::transcript::Transcript;
    pub use crate::workflow::{
        Artifact, Assistant, AssistantRegistry, Decomposition, Evaluation, Evaluator,
        EvaluatorOptimizer, ExecutionTrace, Generator, LLMEvaluator, LLMGenerator, Orchestrator,
        Outcome, Parallelizer, PromptChain, RouteSelection, Router, StageExt, StepTrace, Subtask,
        Summarizer, Termination, Verdict, WorkflowError, WorkflowResult,
    };
}
