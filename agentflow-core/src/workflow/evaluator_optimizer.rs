//! Evaluator-Optimizer Workflow Pattern
//!
//! A generate-evaluate loop run as an explicit state machine:
//!
//! ```text
//! Generating -> Evaluating -> Passed
//!      ^             |
//!      +-- feedback -+-> Capped (after max_iterations rounds)
//! ```
//!
//! Generation and evaluation are separate completions with disjoint schemas.
//! A non-`PASS` verdict is never an error: reaching the cap ends the run with
//! [`Termination::Capped`] and the last generated artifact.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::time::Instant;

use crate::completion::StructuredCompletion;
use crate::schema::{Field, Schema, SchemaViolation};
use crate::transcript::Transcript;

use super::execution::{ExecutionTrace, StageExt, StepTrace, WorkflowResult};

/// Generator system prompt; `{task}` is substituted
pub const DEFAULT_GENERATOR_PROMPT: &str = "Your goal is to complete the task based on <user input>. If there are feedback from your previous generations, you should reflect on them to improve your solution

Task:
{task}";

/// Evaluator system prompt
pub const DEFAULT_EVALUATOR_PROMPT: &str = "Evaluate this following code implementation for:
1. code correctness
2. time complexity
3. style and best practices

You should be evaluating only and not attempting to solve the task.

Only output \"PASS\" if all criteria are met and you have no further suggestions for improvements.

Provide detailed feedback if there are areas that need improvement. You should specify what needs improvement and why.

Only output JSON.";

/// Evaluator's categorical judgment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Pass,
    Fail,
    NeedsImprovement,
}

impl Verdict {
    pub const ALL: [Verdict; 3] = [Verdict::Pass, Verdict::Fail, Verdict::NeedsImprovement];

    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Pass => "PASS",
            Verdict::Fail => "FAIL",
            Verdict::NeedsImprovement => "NEEDS_IMPROVEMENT",
        }
    }

    pub fn is_pass(&self) -> bool {
        matches!(self, Verdict::Pass)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One evaluation round's result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evaluation {
    pub verdict: Verdict,
    pub feedback: String,
}

impl Evaluation {
    pub fn new(verdict: Verdict, feedback: impl Into<String>) -> Self {
        Self {
            verdict,
            feedback: feedback.into(),
        }
    }
}

/// A generated solution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// The generator's reading of the task and feedback
    pub thoughts: String,
    pub code: String,
}

/// Loop state; terminal states carry the artifact they return
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopState {
    Generating,
    Evaluating(Artifact),
    Passed(Artifact),
    Capped(Artifact),
}

impl LoopState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LoopState::Passed(_) | LoopState::Capped(_))
    }
}

/// Mutable state owned by a single run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IterationState {
    /// Completed generate/evaluate rounds without a pass
    pub round: usize,
    /// Latest artifact that failed evaluation
    pub artifact: Option<Artifact>,
    /// Feedback on `artifact`
    pub feedback: Option<String>,
}

impl IterationState {
    /// Previous artifact and its feedback, when a round has been rejected
    pub fn previous(&self) -> Option<(&Artifact, &str)> {
        match (&self.artifact, &self.feedback) {
            (Some(artifact), Some(feedback)) => Some((artifact, feedback.as_str())),
            _ => None,
        }
    }
}

/// How the loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    Passed,
    Capped,
}

/// Record of one generate/evaluate round
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Round {
    /// 1-indexed
    pub round: usize,
    pub artifact: Artifact,
    pub evaluation: Evaluation,
}

/// Result of an evaluator-optimizer run
#[derive(Debug, Clone, Serialize)]
pub struct Outcome {
    pub termination: Termination,
    /// Last generated artifact
    pub artifact: Artifact,
    pub history: Vec<Round>,
    pub trace: ExecutionTrace,
}

impl Outcome {
    pub fn passed(&self) -> bool {
        self.termination == Termination::Passed
    }

    /// Generate/evaluate rounds executed
    pub fn rounds(&self) -> usize {
        self.history.len()
    }
}

/// Produces an artifact for a task
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, task: &str, state: &IterationState) -> WorkflowResult<Artifact>;
}

/// Judges an artifact against a task
#[async_trait]
pub trait Evaluator: Send + Sync {
    async fn evaluate(&self, task: &str, artifact: &Artifact) -> WorkflowResult<Evaluation>;
}

/// Model-backed generator (schema: thoughts, code)
#[derive(Debug, Clone)]
pub struct LLMGenerator {
    completion: StructuredCompletion,
    prompt: String,
}

impl LLMGenerator {
    pub fn new(completion: StructuredCompletion) -> Self {
        Self {
            completion,
            prompt: DEFAULT_GENERATOR_PROMPT.to_string(),
        }
    }

    /// Override the system prompt (`{task}` placeholder)
    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    pub fn schema() -> Schema {
        Schema::new("generation")
            .field(
                Field::string("thoughts")
                    .describe("Your understanding of the task and feedback and how you plan to improve"),
            )
            .field(Field::string("code").describe("Your code implementation here"))
    }
}

#[async_trait]
impl Generator for LLMGenerator {
    async fn generate(&self, task: &str, state: &IterationState) -> WorkflowResult<Artifact> {
        let mut transcript = Transcript::with_system(self.prompt.replace("{task}", task));
        if let Some((artifact, feedback)) = state.previous() {
            transcript.human(format!(
                "Code: {} \n\n Feedback: {}",
                artifact.code, feedback
            ));
        }

        self.completion
            .structured(&transcript, &Self::schema())
            .await?
            .deserialize::<Artifact>()
            .map_err(|e| SchemaViolation::malformed(e.to_string()).into())
    }
}

/// Model-backed evaluator (schema: feedback, verdict)
#[derive(Debug, Clone)]
pub struct LLMEvaluator {
    completion: StructuredCompletion,
    prompt: String,
}

impl LLMEvaluator {
    pub fn new(completion: StructuredCompletion) -> Self {
        Self {
            completion,
            prompt: DEFAULT_EVALUATOR_PROMPT.to_string(),
        }
    }

    /// Override the system prompt
    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    pub fn schema() -> Schema {
        Schema::new("evaluation")
            .field(Field::string("feedback"))
            .field(Field::enumeration(
                "verdict",
                Verdict::ALL.iter().map(|v| v.as_str()),
            ))
    }
}

#[async_trait]
impl Evaluator for LLMEvaluator {
    async fn evaluate(&self, task: &str, artifact: &Artifact) -> WorkflowResult<Evaluation> {
        let transcript = Transcript::single_turn(
            self.prompt.clone(),
            format!("Task: {} \n\n Code: {}", task, artifact.code),
        );

        self.completion
            .structured(&transcript, &Self::schema())
            .await?
            .deserialize::<Evaluation>()
            .map_err(|e| SchemaViolation::malformed(e.to_string()).into())
    }
}

/// Evaluator-optimizer configuration
#[derive(Debug, Clone)]
pub struct EvaluatorOptimizerConfig {
    /// Round cap, at least 1
    pub max_iterations: usize,
}

impl Default for EvaluatorOptimizerConfig {
    fn default() -> Self {
        Self { max_iterations: 3 }
    }
}

/// Evaluator-optimizer workflow
pub struct EvaluatorOptimizer<G: Generator, E: Evaluator> {
    name: String,
    generator: G,
    evaluator: E,
    config: EvaluatorOptimizerConfig,
}

impl<G: Generator, E: Evaluator> fmt::Debug for EvaluatorOptimizer<G, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvaluatorOptimizer")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish()
    }
}

impl EvaluatorOptimizer<LLMGenerator, LLMEvaluator> {
    /// Builder with model-backed generator and evaluator sharing `completion`
    pub fn with_completion(
        completion: StructuredCompletion,
    ) -> EvaluatorOptimizerBuilder<LLMGenerator, LLMEvaluator> {
        EvaluatorOptimizerBuilder::new(
            LLMGenerator::new(completion.clone()),
            LLMEvaluator::new(completion),
        )
    }
}

impl<G: Generator, E: Evaluator> EvaluatorOptimizer<G, E> {
    /// Create a new evaluator-optimizer builder
    pub fn builder(generator: G, evaluator: E) -> EvaluatorOptimizerBuilder<G, E> {
        EvaluatorOptimizerBuilder::new(generator, evaluator)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_iterations(&self) -> usize {
        self.config.max_iterations
    }

    /// Run the loop until a `PASS` verdict or the round cap.
    ///
    /// # Errors
    ///
    /// Only when a generator or evaluator call fails; verdicts never error.
    pub async fn run(&self, task: &str) -> WorkflowResult<Outcome> {
        let mut trace = ExecutionTrace::new(&self.name);
        let mut history: Vec<Round> = Vec::new();
        let mut state = IterationState::default();
        let mut phase = LoopState::Generating;

        loop {
            let round = state.round + 1;
            phase = match phase {
                LoopState::Generating => {
                    let start = Instant::now();
                    let artifact = self
                        .generator
                        .generate(task, &state)
                        .await
                        .stage(&self.name, format!("round {} generate", round))?;
                    trace.add_step(StepTrace::success(
                        format!("round {} generate", round),
                        json!({ "task": task, "has_feedback": state.feedback.is_some() }),
                        json!(artifact),
                        start.elapsed().as_millis() as u64,
                    ));
                    LoopState::Evaluating(artifact)
                }
                LoopState::Evaluating(artifact) => {
                    let start = Instant::now();
                    let evaluation = self
                        .evaluator
                        .evaluate(task, &artifact)
                        .await
                        .stage(&self.name, format!("round {} evaluate", round))?;
                    trace.add_step(StepTrace::success(
                        format!("round {} evaluate", round),
                        json!({ "code": artifact.code }),
                        json!(evaluation),
                        start.elapsed().as_millis() as u64,
                    ));

                    tracing::info!(
                        workflow = %self.name,
                        round,
                        verdict = %evaluation.verdict,
                        "Evaluation round completed"
                    );

                    history.push(Round {
                        round,
                        artifact: artifact.clone(),
                        evaluation: evaluation.clone(),
                    });

                    if evaluation.verdict.is_pass() {
                        LoopState::Passed(artifact)
                    } else {
                        state.round += 1;
                        if state.round >= self.config.max_iterations {
                            LoopState::Capped(artifact)
                        } else {
                            state.artifact = Some(artifact);
                            state.feedback = Some(evaluation.feedback);
                            LoopState::Generating
                        }
                    }
                }
                LoopState::Passed(artifact) => {
                    return Ok(Outcome {
                        termination: Termination::Passed,
                        artifact,
                        history,
                        trace,
                    });
                }
                LoopState::Capped(artifact) => {
                    tracing::warn!(
                        workflow = %self.name,
                        rounds = history.len(),
                        "Iteration cap reached without a passing evaluation"
                    );
                    return Ok(Outcome {
                        termination: Termination::Capped,
                        artifact,
                        history,
                        trace,
                    });
                }
            };
        }
    }
}

/// Builder for evaluator-optimizers
pub struct EvaluatorOptimizerBuilder<G: Generator, E: Evaluator> {
    name: String,
    generator: G,
    evaluator: E,
    config: EvaluatorOptimizerConfig,
}

impl<G: Generator, E: Evaluator> EvaluatorOptimizerBuilder<G, E> {
    pub fn new(generator: G, evaluator: E) -> Self {
        Self {
            name: "evaluator_optimizer".to_string(),
            generator,
            evaluator,
            config: EvaluatorOptimizerConfig::default(),
        }
    }

    /// Set the workflow name
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the round cap (values below 1 are raised to 1)
    pub fn max_iterations(mut self, max: usize) -> Self {
        self.config.max_iterations = max.max(1);
        self
    }

    pub fn build(self) -> EvaluatorOptimizer<G, E> {
        EvaluatorOptimizer {
            name: self.name,
            generator: self.generator,
            evaluator: self.evaluator,
            config: self.config,
        }
    }
}
