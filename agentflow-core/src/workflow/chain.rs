//! Prompt Chaining Pattern
//!
//! A fixed sequence of prompts run over one growing transcript. Each step sees
//! the full conversation so far: the system message, the initial query, and
//! every earlier prompt/response pair.

use serde_json::json;
use std::time::Instant;

use crate::completion::StructuredCompletion;
use crate::transcript::Transcript;

use super::execution::{ExecutionTrace, StageExt, StepTrace, WorkflowResult};

/// System message used when none is configured
pub const DEFAULT_CHAIN_SYSTEM_PROMPT: &str =
    "You are a helpful assistant. Work through each request step by step, building on the conversation so far.";

/// Outcome of a chain run
#[derive(Debug, Clone)]
pub struct ChainRun {
    /// Final response (the initial query when there are no steps)
    pub output: String,
    /// Full conversation: system, initial query, then one human/ai pair per step
    pub transcript: Transcript,
    pub trace: ExecutionTrace,
}

/// Sequential prompt chain over a shared transcript
pub struct PromptChain {
    name: String,
    system_prompt: String,
    completion: StructuredCompletion,
}

impl std::fmt::Debug for PromptChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromptChain")
            .field("name", &self.name)
            .field("system_prompt", &self.system_prompt)
            .finish()
    }
}

impl PromptChain {
    /// Create a new chain builder
    pub fn builder(completion: StructuredCompletion) -> PromptChainBuilder {
        PromptChainBuilder::new(completion)
    }

    /// Get the chain name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run every step in order and return the final response.
    ///
    /// # Errors
    ///
    /// Any completion failure aborts the run; no partial result is returned.
    pub async fn run<S: AsRef<str>>(&self, initial_query: &str, steps: &[S]) -> WorkflowResult<String> {
        Ok(self.execute(initial_query, steps).await?.output)
    }

    /// Run every step in order, returning the transcript and trace as well
    pub async fn execute<S: AsRef<str>>(
        &self,
        initial_query: &str,
        steps: &[S],
    ) -> WorkflowResult<ChainRun> {
        let mut trace = ExecutionTrace::new(&self.name);
        let mut transcript = Transcript::single_turn(&self.system_prompt, initial_query);
        let mut output = initial_query.to_string();

        tracing::debug!(chain = %self.name, steps = steps.len(), "Starting prompt chain");

        for (index, step) in steps.iter().enumerate() {
            let prompt = step.as_ref();
            transcript.human(prompt);

            let start = Instant::now();
            let result = self
                .completion
                .complete_with_usage(&transcript, None)
                .await
                .stage(&self.name, format!("step {}", index));
            let duration_ms = start.elapsed().as_millis() as u64;

            let completion = match result {
                Ok(c) => c,
                Err(e) => {
                    trace.add_step(StepTrace::failure(
                        format!("step {}", index),
                        json!({ "prompt": prompt }),
                        e.to_string(),
                        duration_ms,
                    ));
                    tracing::warn!(chain = %self.name, step = index, error = %e, "Chain step failed");
                    return Err(e);
                }
            };

            output = completion.completion.as_text().unwrap_or_default().to_string();
            transcript.ai(output.clone());

            trace.add_step(
                StepTrace::success(
                    format!("step {}", index),
                    json!({ "prompt": prompt }),
                    json!(output),
                    duration_ms,
                )
                .with_token_usage(completion.usage),
            );

            tracing::debug!(
                chain = %self.name,
                step = index,
                transcript_len = transcript.len(),
                "Chain step completed"
            );
        }

        Ok(ChainRun {
            output,
            transcript,
            trace,
        })
    }
}

/// Builder for creating prompt chains
pub struct PromptChainBuilder {
    name: String,
    system_prompt: String,
    completion: StructuredCompletion,
}

impl PromptChainBuilder {
    pub fn new(completion: StructuredCompletion) -> Self {
        Self {
            name: "prompt_chain".to_string(),
            system_prompt: DEFAULT_CHAIN_SYSTEM_PROMPT.to_string(),
            completion,
        }
    }

    /// Set the chain name
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the system message that seeds every run
    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Build the chain
    pub fn build(self) -> PromptChain {
        PromptChain {
            name: self.name,
            system_prompt: self.system_prompt,
            completion: self.completion,
        }
    }
}
