//! Map-reduce summarization
//!
//! Documents are split into chunks, every chunk is summarized concurrently,
//! and the chunk summaries are distilled into one. Built on
//! [`Parallelizer::map_reduce`], so a single failed chunk fails the whole run.

use crate::completion::StructuredCompletion;
use crate::config::WorkflowConfig;
use crate::documents::{Document, DocumentLoader, RecursiveCharacterSplitter};
use crate::transcript::Transcript;

use super::execution::{StageExt, WorkflowResult};
use super::parallel::Parallelizer;

/// Per-chunk prompt; `{chunk}` is substituted
pub const DEFAULT_CHUNK_PROMPT: &str = "Write a concise summary of the following: {chunk}";

/// Aggregation prompt; `{docs}` is substituted with the chunk summaries
pub const DEFAULT_REDUCE_PROMPT: &str = "The following is a set of summaries:
{docs}
Take these and distill it into a final, consolidated summary of the main themes.";

/// Map-reduce summarizer
pub struct Summarizer {
    name: String,
    completion: StructuredCompletion,
    splitter: RecursiveCharacterSplitter,
    parallelizer: Parallelizer,
    chunk_prompt: String,
    reduce_prompt: String,
}

impl std::fmt::Debug for Summarizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Summarizer")
            .field("name", &self.name)
            .field("splitter", &self.splitter)
            .finish()
    }
}

impl Summarizer {
    pub fn builder(completion: StructuredCompletion) -> SummarizerBuilder {
        SummarizerBuilder::new(completion)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Load `source` with `loader` and summarize it
    pub async fn summarize_source(
        &self,
        loader: &dyn DocumentLoader,
        source: &str,
    ) -> WorkflowResult<String> {
        let documents = loader.load(source).await.stage(&self.name, "load")?;
        self.summarize(&documents).await
    }

    /// Summarize already loaded documents.
    ///
    /// Documents without any text produce an empty summary and no model calls.
    pub async fn summarize(&self, documents: &[Document]) -> WorkflowResult<String> {
        let chunks = self.splitter.split_documents(documents);

        tracing::info!(
            summarizer = %self.name,
            documents = documents.len(),
            chunks = chunks.len(),
            "Summarizing"
        );

        if chunks.is_empty() {
            tracing::warn!(summarizer = %self.name, "No content to summarize");
            return Ok(String::new());
        }

        self.parallelizer
            .map_reduce(
                chunks,
                |chunk| self.summarize_chunk(chunk),
                |summaries| self.reduce(summaries),
            )
            .await
    }

    async fn summarize_chunk(&self, chunk: Document) -> WorkflowResult<String> {
        let mut transcript = Transcript::new();
        transcript.human(self.chunk_prompt.replace("{chunk}", &chunk.content));
        self.completion.text(&transcript).await
    }

    async fn reduce(&self, summaries: Vec<String>) -> WorkflowResult<String> {
        let mut transcript = Transcript::new();
        transcript.human(self.reduce_prompt.replace("{docs}", &summaries.join("\n\n")));
        self.completion.text(&transcript).await
    }
}

/// Builder for summarizers
pub struct SummarizerBuilder {
    name: String,
    completion: StructuredCompletion,
    chunk_size: usize,
    chunk_overlap: usize,
    max_concurrency: Option<usize>,
    chunk_prompt: String,
    reduce_prompt: String,
}

impl SummarizerBuilder {
    pub fn new(completion: StructuredCompletion) -> Self {
        let defaults = WorkflowConfig::default();
        Self {
            name: "summarizer".to_string(),
            completion,
            chunk_size: defaults.chunk_size,
            chunk_overlap: defaults.chunk_overlap,
            max_concurrency: defaults.max_concurrency,
            chunk_prompt: DEFAULT_CHUNK_PROMPT.to_string(),
            reduce_prompt: DEFAULT_REDUCE_PROMPT.to_string(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Take chunking and concurrency from workflow configuration
    pub fn config(mut self, config: &WorkflowConfig) -> Self {
        self.chunk_size = config.chunk_size;
        self.chunk_overlap = config.chunk_overlap;
        self.max_concurrency = config.max_concurrency;
        self
    }

    pub fn chunk_size(mut self, chunk_size: usize, chunk_overlap: usize) -> Self {
        self.chunk_size = chunk_size;
        self.chunk_overlap = chunk_overlap;
        self
    }

    pub fn max_concurrency(mut self, limit: Option<usize>) -> Self {
        self.max_concurrency = limit;
        self
    }

    pub fn chunk_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.chunk_prompt = prompt.into();
        self
    }

    pub fn reduce_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.reduce_prompt = prompt.into();
        self
    }

    /// # Errors
    ///
    /// `InvalidConfig` when the chunk overlap is not smaller than the chunk size.
    pub fn build(self) -> WorkflowResult<Summarizer> {
        let splitter = RecursiveCharacterSplitter::new(self.chunk_size, self.chunk_overlap)?;
        let parallelizer = Parallelizer::new()
            .with_name(self.name.clone())
            .with_max_concurrency(self.max_concurrency);

        Ok(Summarizer {
            name: self.name,
            completion: self.completion,
            splitter,
            parallelizer,
            chunk_prompt: self.chunk_prompt,
            reduce_prompt: self.reduce_prompt,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::scripted::{ScriptedProvider, ScriptedReply};
    use crate::workflow::WorkflowError;
    use std::sync::Arc;

    fn echo_provider() -> Arc<ScriptedProvider> {
        Arc::new(ScriptedProvider::with_responder(|req| {
            let prompt = req.last_user_message().unwrap_or_default();
            if let Some(chunk) = prompt.strip_prefix("Write a concise summary of the following: ") {
                ScriptedReply::text(format!("<{}>", chunk))
            } else {
                ScriptedReply::text(format!("FINAL {}", prompt.lines().count()))
            }
        }))
    }

    #[tokio::test]
    async fn test_chunks_summarized_then_reduced_in_order() {
        let provider = echo_provider();
        let summarizer = Summarizer::builder(StructuredCompletion::new(provider.clone()))
            .chunk_size(12, 0)
            .build()
            .unwrap();

        let docs = vec![Document::new("alpha beta\n\ngamma delta", "doc")];
        let summary = summarizer.summarize(&docs).await.unwrap();

        assert!(summary.starts_with("FINAL"));
        assert_eq!(provider.call_count(), 3);

        let reduce = provider.requests().last().cloned().unwrap();
        let prompt = reduce.last_user_message().unwrap().to_string();
        let alpha = prompt.find("<alpha beta>").unwrap();
        let gamma = prompt.find("<gamma delta>").unwrap();
        assert!(alpha < gamma);
        assert!(prompt.contains("<alpha beta>\n\n<gamma delta>"));
    }

    #[tokio::test]
    async fn test_chunk_failure_skips_reduce() {
        let provider = Arc::new(ScriptedProvider::with_responder(|req| {
            if req.last_user_message().unwrap_or_default().contains("bad") {
                ScriptedReply::failure("overloaded")
            } else {
                ScriptedReply::text("fine")
            }
        }));
        let summarizer = Summarizer::builder(StructuredCompletion::new(provider.clone()))
            .chunk_size(10, 0)
            .build()
            .unwrap();

        let err = summarizer
            .summarize(&[Document::new("good one\n\nbad one", "doc")])
            .await
            .unwrap_err();

        assert!(err.is_transport());
        assert_eq!(err.stages(), vec!["summarizer/item 1"]);
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn test_empty_documents_make_no_calls() {
        let provider = echo_provider();
        let summarizer = Summarizer::builder(StructuredCompletion::new(provider.clone()))
            .build()
            .unwrap();

        assert_eq!(summarizer.summarize(&[]).await.unwrap(), "");
        assert_eq!(provider.call_count(), 0);
    }

    #[test]
    fn test_invalid_chunking_rejected() {
        let provider = echo_provider();
        let err = Summarizer::builder(StructuredCompletion::new(provider))
            .chunk_size(100, 200)
            .build()
            .unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidConfig(_)));
    }
}
