//! Structured completion
//!
//! The leaf every workflow builds on: invoke the model over a transcript,
//! optionally with an output [`Schema`], and return either free text or a
//! validated [`StructuredResult`].
//!
//! Structured replies are untrusted. A reply that is not JSON, or that does not
//! match the schema, is re-requested up to `schema_retries` more times before
//! the last [`SchemaViolation`] is surfaced. Transport errors are never retried
//! here; wrap the provider in [`crate::llm::RetryingProvider`] for that.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::sync::Arc;

use crate::llm::{LLMProvider, Message, TokenUsage};
use crate::schema::{Schema, SchemaViolation, StructuredResult};
use crate::transcript::Transcript;
use crate::workflow::{WorkflowError, WorkflowResult};

static CODE_FENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^\s*```[a-zA-Z]*\s*(.*?)\s*```\s*$").expect("Invalid code fence regex")
});

/// Result of a completion
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    Text(String),
    Structured(StructuredResult),
}

impl Completion {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Completion::Text(text) => Some(text),
            Completion::Structured(_) => None,
        }
    }

    pub fn into_structured(self) -> Option<StructuredResult> {
        match self {
            Completion::Structured(result) => Some(result),
            Completion::Text(_) => None,
        }
    }
}

/// Completion result with the usage it consumed
#[derive(Debug, Clone)]
pub struct CompletionOutput {
    pub completion: Completion,
    pub usage: Option<TokenUsage>,
    /// Attempts made, including schema retries
    pub attempts: usize,
}

/// Model invocation with schema enforcement
#[derive(Clone)]
pub struct StructuredCompletion {
    provider: Arc<dyn LLMProvider>,
    schema_retries: usize,
    temperature: Option<f32>,
}

impl StructuredCompletion {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self {
            provider,
            schema_retries: 2,
            temperature: None,
        }
    }

    /// Extra attempts after a reply fails validation
    pub fn with_schema_retries(mut self, retries: usize) -> Self {
        self.schema_retries = retries;
        self
    }

    /// Temperature sent with every request
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature.clamp(0.0, 2.0));
        self
    }

    pub fn provider(&self) -> &Arc<dyn LLMProvider> {
        &self.provider
    }

    pub fn schema_retries(&self) -> usize {
        self.schema_retries
    }

    /// Invoke the model over `transcript`.
    ///
    /// # Errors
    ///
    /// - [`WorkflowError::EmptyTranscript`] if the transcript has no messages
    /// - [`WorkflowError::Transport`] if the provider fails
    /// - [`WorkflowError::SchemaViolation`] if every attempt fails validation
    pub async fn complete(
        &self,
        transcript: &Transcript,
        schema: Option<&Schema>,
    ) -> WorkflowResult<Completion> {
        Ok(self.complete_with_usage(transcript, schema).await?.completion)
    }

    /// Free-text completion
    pub async fn text(&self, transcript: &Transcript) -> WorkflowResult<String> {
        match self.complete(transcript, None).await? {
            Completion::Text(text) => Ok(text),
            Completion::Structured(result) => Ok(result.into_value().to_string()),
        }
    }

    /// Schema-validated completion
    pub async fn structured(
        &self,
        transcript: &Transcript,
        schema: &Schema,
    ) -> WorkflowResult<StructuredResult> {
        match self.complete(transcript, Some(schema)).await? {
            Completion::Structured(result) => Ok(result),
            Completion::Text(text) => schema
                .validate(&parse_json(&text)?)
                .map_err(WorkflowError::from),
        }
    }

    /// Like [`complete`](Self::complete), also reporting usage and attempts
    pub async fn complete_with_usage(
        &self,
        transcript: &Transcript,
        schema: Option<&Schema>,
    ) -> WorkflowResult<CompletionOutput> {
        if transcript.is_empty() {
            return Err(WorkflowError::EmptyTranscript);
        }

        let mut request = transcript.to_request();
        request.temperature = self.temperature;
        request.response_schema = schema.cloned();

        let Some(schema) = schema else {
            let response = self.provider.generate_request(&request).await?;
            return Ok(CompletionOutput {
                completion: Completion::Text(response.content),
                usage: response.usage,
                attempts: 1,
            });
        };

        let max_attempts = self.schema_retries + 1;
        let mut usage: Option<TokenUsage> = None;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let response = self.provider.generate_request(&request).await?;
            if let Some(u) = response.usage {
                *usage.get_or_insert_with(TokenUsage::default) += u;
            }

            let violation = match parse_json(&response.content) {
                Ok(value) => match schema.validate(&value) {
                    Ok(result) => {
                        return Ok(CompletionOutput {
                            completion: Completion::Structured(result),
                            usage,
                            attempts: attempt,
                        });
                    }
                    Err(violation) => violation,
                },
                Err(violation) => violation,
            };

            if attempt >= max_attempts {
                tracing::warn!(
                    schema = %schema.name,
                    attempts = attempt,
                    %violation,
                    "Structured reply failed validation, giving up"
                );
                return Err(WorkflowError::SchemaViolation(violation));
            }

            tracing::debug!(
                schema = %schema.name,
                attempt,
                %violation,
                "Structured reply failed validation, retrying"
            );

            // Later attempts see the rejected reply and what was wrong with it
            request.messages.push(Message::assistant(response.content));
            request.messages.push(Message::user(correction(schema, &violation)));
        }
    }
}

impl std::fmt::Debug for StructuredCompletion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StructuredCompletion")
            .field("provider", &self.provider.model_info())
            .field("schema_retries", &self.schema_retries)
            .finish()
    }
}

fn correction(schema: &Schema, violation: &SchemaViolation) -> String {
    format!(
        "Your previous reply did not match the `{}` schema ({}). \
         Reply again with only a JSON object that matches the schema.",
        schema.name, violation
    )
}

/// Parse a reply as JSON, tolerating a surrounding markdown code fence
fn parse_json(content: &str) -> Result<Value, SchemaViolation> {
    let body = CODE_FENCE
        .captures(content)
        .and_then(|c| c.get(1))
        .map_or(content, |m| m.as_str());

    serde_json::from_str(body.trim()).map_err(|e| SchemaViolation::malformed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MessageRole;
    use crate::llm::scripted::{ScriptedProvider, ScriptedReply};
    use crate::schema::{Field, ViolationKind};
    use serde_json::json;

    fn verdict_schema() -> Schema {
        Schema::new("verdict")
            .field(Field::string("feedback"))
            .field(Field::enumeration("verdict", ["PASS", "FAIL"]))
    }

    fn transcript() -> Transcript {
        Transcript::single_turn("You grade code.", "fn main() {}")
    }

    #[tokio::test]
    async fn test_text_completion() {
        let provider = Arc::new(ScriptedProvider::new(vec![ScriptedReply::text("hello")]));
        let completion = StructuredCompletion::new(provider.clone());

        let result = completion.complete(&transcript(), None).await.unwrap();
        assert_eq!(result.as_text(), Some("hello"));
        assert!(provider.requests()[0].response_schema.is_none());
    }

    #[tokio::test]
    async fn test_structured_completion_sends_schema() {
        let provider = Arc::new(ScriptedProvider::new(vec![ScriptedReply::json(
            json!({"feedback": "fine", "verdict": "PASS"}),
        )]));
        let completion = StructuredCompletion::new(provider.clone());

        let result = completion.structured(&transcript(), &verdict_schema()).await.unwrap();
        assert_eq!(result.get_str("verdict"), Some("PASS"));
        assert_eq!(
            provider.requests()[0].response_schema.as_ref().map(|s| s.name.as_str()),
            Some("verdict")
        );
    }

    #[tokio::test]
    async fn test_code_fenced_json_is_accepted() {
        let provider = Arc::new(ScriptedProvider::new(vec![ScriptedReply::text(
            "```json\n{\"feedback\": \"ok\", \"verdict\": \"FAIL\"}\n```",
        )]));
        let completion = StructuredCompletion::new(provider);

        let result = completion.structured(&transcript(), &verdict_schema()).await.unwrap();
        assert_eq!(result.get_str("verdict"), Some("FAIL"));
    }

    #[tokio::test]
    async fn test_schema_retry_then_success() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            ScriptedReply::text("I think it passes"),
            ScriptedReply::json(json!({"feedback": "ok", "verdict": "MAYBE"})),
            ScriptedReply::json(json!({"feedback": "ok", "verdict": "PASS"})),
        ]));
        let completion = StructuredCompletion::new(provider.clone());

        let output = completion
            .complete_with_usage(&transcript(), Some(&verdict_schema()))
            .await
            .unwrap();
        assert_eq!(output.attempts, 3);
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test]
    async fn test_schema_retry_carries_correction() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            ScriptedReply::json(json!({"feedback": "ok", "verdict": "MAYBE"})),
            ScriptedReply::json(json!({"feedback": "ok", "verdict": "PASS"})),
        ]));
        let completion = StructuredCompletion::new(provider.clone()).with_schema_retries(1);

        completion.structured(&transcript(), &verdict_schema()).await.unwrap();

        let requests = provider.requests();
        assert_eq!(requests[0].messages.len(), 2);
        assert_eq!(requests[1].messages.len(), 4);
        assert_eq!(requests[1].messages[2].role, MessageRole::Assistant);
        assert!(requests[1].messages[2].content.contains("MAYBE"));
        let correction = requests[1].last_user_message().unwrap();
        assert!(correction.contains("`verdict` schema"));
        assert!(correction.contains("field `verdict`"));
    }

    #[tokio::test]
    async fn test_schema_violation_surfaces_after_retries() {
        let provider = Arc::new(ScriptedProvider::with_responder(|_| {
            ScriptedReply::json(json!({"feedback": 42, "verdict": "PASS"}))
        }));
        let completion = StructuredCompletion::new(provider.clone()).with_schema_retries(1);

        let err = completion
            .structured(&transcript(), &verdict_schema())
            .await
            .unwrap_err();

        match err {
            WorkflowError::SchemaViolation(v) => {
                assert_eq!(v.field, "feedback");
                assert_eq!(v.kind, ViolationKind::TypeMismatch);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn test_transport_error_not_retried() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            ScriptedReply::failure("connection refused"),
            ScriptedReply::json(json!({"feedback": "ok", "verdict": "PASS"})),
        ]));
        let completion = StructuredCompletion::new(provider.clone());

        let err = completion
            .structured(&transcript(), &verdict_schema())
            .await
            .unwrap_err();
        assert!(err.is_transport());
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_empty_transcript_rejected() {
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let completion = StructuredCompletion::new(provider.clone());

        let err = completion.complete(&Transcript::new(), None).await.unwrap_err();
        assert!(matches!(err, WorkflowError::EmptyTranscript));
        assert_eq!(provider.call_count(), 0);
    }

    #[test]
    fn test_parse_json_malformed() {
        let err = parse_json("not json").unwrap_err();
        assert!(matches!(err.kind, ViolationKind::Malformed { .. }));
    }
}
