//! Workflow Patterns for LLM Completions
//!
//! Composable control-flow patterns built on [`StructuredCompletion`]:
//!
//! - **Prompt chain**: sequential prompts over one growing transcript
//! - **Router**: model-selected dispatch to one registered assistant
//! - **Parallelizer**: concurrent fan-out with an order-preserving join
//! - **Orchestrator**: model-driven decomposition into concurrently run subtasks
//! - **Evaluator-Optimizer**: generate/evaluate loop bounded by an iteration cap
//! - **Summarizer**: map-reduce summarization over split documents
//!
//! Every pattern except the evaluator-optimizer fails fast. Errors carry the
//! workflow and stage they came from (see [`WorkflowError::stages`]).
//!
//! # Example
//!
//! ```rust,ignore
//! use agentflow_core::prelude::*;
//!
//! let completion = StructuredCompletion::new(provider);
//!
//! let answer = PromptChain::builder(completion.clone())
//!     .build()
//!     .run("2+2?", &["show your work", "give final answer only"])
//!     .await?;
//!
//! let router = Router::builder(completion).build();
//! let registry = AssistantRegistry::new([
//!     Assistant::new("math", "Solves arithmetic", "You are a careful mathematician."),
//!     Assistant::new("story", "Writes stories", "You are a storyteller."),
//! ])?;
//! let story = router.route("tell me a story", &registry).await?;
//! ```
//!
//! [`StructuredCompletion`]: crate::completion::StructuredCompletion

mod chain;
mod evaluator_optimizer;
mod execution;
mod orchestrator;
mod parallel;
mod router;
mod summarize;

pub use chain::{ChainRun, DEFAULT_CHAIN_SYSTEM_PROMPT, PromptChain, PromptChainBuilder};
pub use evaluator_optimizer::{
    Artifact, DEFAULT_EVALUATOR_PROMPT, DEFAULT_GENERATOR_PROMPT, Evaluation, Evaluator,
    EvaluatorOptimizer, EvaluatorOptimizerBuilder, EvaluatorOptimizerConfig, Generator,
    IterationState, LLMEvaluator, LLMGenerator, LoopState, Outcome, Round, Termination, Verdict,
};
pub use execution::{ExecutionTrace, StageExt, StepTrace, WorkflowError, WorkflowResult};
pub use orchestrator::{
    DEFAULT_ORCHESTRATOR_PROMPT, DEFAULT_WORKER_PROMPT, Decomposition, Orchestrator,
    OrchestratorBuilder, OrchestratorRun, Subtask,
};
pub use parallel::{ParallelConfig, Parallelizer};
pub use router::{
    Assistant, AssistantRegistry, DEFAULT_ROUTE_PROMPT, RouteOutcome, RouteSelection, Router,
    RouterBuilder,
};
pub use summarize::{DEFAULT_CHUNK_PROMPT, DEFAULT_REDUCE_PROMPT, Summarizer, SummarizerBuilder};
