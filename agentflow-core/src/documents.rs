//! Document loading and splitting
//!
//! Loaders turn a source (a file path or an `http(s)` URL) into [`Document`]s;
//! [`RecursiveCharacterSplitter`] cuts them into overlapping chunks sized for a
//! single completion.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::time::Duration;

use crate::config::WorkflowConfig;
use crate::error::{AgentflowError, Result};

/// A loaded document or a chunk of one
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub content: String,
    /// Path or URL the content came from
    pub source: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Document {
    pub fn new(content: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            source: source.into(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Source of documents
#[async_trait]
pub trait DocumentLoader: Send + Sync {
    async fn load(&self, source: &str) -> Result<Vec<Document>>;
}

/// Reads a UTF-8 file from disk
#[derive(Debug, Default, Clone, Copy)]
pub struct FileLoader;

#[async_trait]
impl DocumentLoader for FileLoader {
    async fn load(&self, source: &str) -> Result<Vec<Document>> {
        let content = tokio::fs::read_to_string(source).await?;
        let mut document = Document::new(content, source);
        if let Some(ext) = Path::new(source).extension().and_then(|e| e.to_str()) {
            document = document.with_metadata("extension", ext);
        }
        Ok(vec![document])
    }
}

static SCRIPT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<script[^>]*>.*?</script>").expect("Invalid script regex"));
static STYLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<style[^>]*>.*?</style>").expect("Invalid style regex"));
static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").expect("Invalid tag regex"));
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]+").expect("Invalid whitespace regex"));
static BLANK_LINES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*\n\s*\n\s*").expect("Invalid blank line regex"));

/// Extract readable text from HTML, dropping scripts, styles and markup.
///
/// Paragraph breaks survive as blank lines so the splitter can cut on them.
pub fn html_to_text(html: &str) -> String {
    let mut text = html.to_string();
    for (pattern, replacement) in [
        (&*SCRIPT, ""),
        (&*STYLE, ""),
        (&*TAG, "\n"),
        (&*WHITESPACE, " "),
        (&*BLANK_LINES, "\n\n"),
    ] {
        text = pattern.replace_all(&text, replacement).into_owned();
    }
    text.lines()
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Fetches a web page and keeps its text
#[derive(Debug, Clone)]
pub struct HttpLoader {
    client: reqwest::Client,
}

impl HttpLoader {
    pub fn new() -> Result<Self> {
        Self::with_timeout(Duration::from_secs(30))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("agentflow/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                AgentflowError::Configuration(format!("Failed to build HTTP client: {}", e))
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl DocumentLoader for HttpLoader {
    async fn load(&self, source: &str) -> Result<Vec<Document>> {
        let response = self
            .client
            .get(source)
            .send()
            .await
            .map_err(|e| AgentflowError::transport("http", format!("Failed to fetch {}: {}", source, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AgentflowError::transport(
                "http",
                format!("HTTP error {} for {}", status, source),
            ));
        }

        let body = response
            .text()
            .await
            .map_err(|e| AgentflowError::transport("http", format!("Failed to read response: {}", e)))?;

        tracing::debug!(source, bytes = body.len(), "Fetched document");

        Ok(vec![
            Document::new(html_to_text(&body), source).with_metadata("status", status.as_u16().to_string()),
        ])
    }
}

/// Pick a loader for `source`: URLs go over HTTP, everything else is a path
pub fn loader_for(source: &str) -> Result<Box<dyn DocumentLoader>> {
    if source.starts_with("http://") || source.starts_with("https://") {
        Ok(Box::new(HttpLoader::new()?))
    } else {
        Ok(Box::new(FileLoader))
    }
}

/// Default separators, coarsest first
pub const DEFAULT_SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

/// Splits text on the coarsest separator that keeps chunks under
/// `chunk_size` characters, falling back to finer separators for oversized
/// pieces. Consecutive chunks share up to `chunk_overlap` characters.
#[derive(Debug, Clone)]
pub struct RecursiveCharacterSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: Vec<String>,
}

impl RecursiveCharacterSplitter {
    /// # Errors
    ///
    /// `Configuration` when `chunk_size` is zero or `chunk_overlap >= chunk_size`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(AgentflowError::Configuration(
                "chunk_size must be greater than zero".to_string(),
            ));
        }
        if chunk_overlap >= chunk_size {
            return Err(AgentflowError::Configuration(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                chunk_overlap, chunk_size
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
            separators: DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
        })
    }

    pub fn from_config(config: &WorkflowConfig) -> Result<Self> {
        Self::new(config.chunk_size, config.chunk_overlap)
    }

    pub fn with_separators<I, S>(mut self, separators: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.separators = separators.into_iter().map(Into::into).collect();
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    pub fn split_text(&self, text: &str) -> Vec<String> {
        self.split_recursive(text, &self.separators)
    }

    /// Split every document; chunks keep the source and metadata and gain a `chunk` index
    pub fn split_documents(&self, documents: &[Document]) -> Vec<Document> {
        documents
            .iter()
            .flat_map(|doc| {
                self.split_text(&doc.content)
                    .into_iter()
                    .enumerate()
                    .map(move |(index, content)| Document {
                        content,
                        source: doc.source.clone(),
                        metadata: doc.metadata.clone(),
                    }
                    .with_metadata("chunk", index.to_string()))
            })
            .collect()
    }

    fn split_recursive(&self, text: &str, separators: &[String]) -> Vec<String> {
        let (separator, finer) = match separators
            .iter()
            .position(|s| s.is_empty() || text.contains(s.as_str()))
        {
            Some(i) => (separators[i].as_str(), &separators[i + 1..]),
            None => ("", &separators[separators.len()..]),
        };

        let pieces: Vec<&str> = if separator.is_empty() {
            text.char_indices()
                .map(|(i, c)| &text[i..i + c.len_utf8()])
                .collect()
        } else {
            text.split(separator).filter(|s| !s.is_empty()).collect()
        };

        let mut chunks = Vec::new();
        let mut pending: Vec<&str> = Vec::new();

        for piece in pieces {
            if char_len(piece) < self.chunk_size {
                pending.push(piece);
                continue;
            }
            if !pending.is_empty() {
                chunks.extend(self.merge(&pending, separator));
                pending.clear();
            }
            if finer.is_empty() {
                chunks.push(piece.to_string());
            } else {
                chunks.extend(self.split_recursive(piece, finer));
            }
        }

        if !pending.is_empty() {
            chunks.extend(self.merge(&pending, separator));
        }
        chunks
    }

    /// Greedily pack pieces into chunks, carrying a tail of up to
    /// `chunk_overlap` characters into the next chunk.
    fn merge(&self, pieces: &[&str], separator: &str) -> Vec<String> {
        let separator_len = char_len(separator);
        let mut chunks = Vec::new();
        let mut window: VecDeque<&str> = VecDeque::new();
        let mut total = 0;

        for piece in pieces {
            let len = char_len(piece);
            let joiner = |window: &VecDeque<&str>| if window.is_empty() { 0 } else { separator_len };

            if total + len + joiner(&window) > self.chunk_size && !window.is_empty() {
                push_joined(&mut chunks, &window, separator);

                while total > self.chunk_overlap
                    || (total > 0 && total + len + joiner(&window) > self.chunk_size)
                {
                    let dropped = if window.len() > 1 { separator_len } else { 0 };
                    match window.pop_front() {
                        Some(front) => total -= char_len(front) + dropped,
                        None => break,
                    }
                }
            }

            total += len + joiner(&window);
            window.push_back(piece);
        }

        push_joined(&mut chunks, &window, separator);
        chunks
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn push_joined(chunks: &mut Vec<String>, window: &VecDeque<&str>, separator: &str) {
    let joined = window.iter().copied().collect::<Vec<_>>().join(separator);
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_short_text_is_one_chunk() {
        let splitter = RecursiveCharacterSplitter::new(100, 10).unwrap();
        assert_eq!(splitter.split_text("hello world"), vec!["hello world"]);
        assert!(splitter.split_text("").is_empty());
    }

    #[test]
    fn test_packs_words_without_overlap() {
        let splitter = RecursiveCharacterSplitter::new(10, 0).unwrap();
        assert_eq!(
            splitter.split_text("one two three four five"),
            vec!["one two", "three four", "five"]
        );
    }

    #[test]
    fn test_character_overlap() {
        let splitter = RecursiveCharacterSplitter::new(4, 2)
            .unwrap()
            .with_separators([""]);
        assert_eq!(
            splitter.split_text("abcdefghij"),
            vec!["abcd", "cdef", "efgh", "ghij"]
        );
    }

    #[test]
    fn test_prefers_paragraph_boundaries() {
        let splitter = RecursiveCharacterSplitter::new(30, 0).unwrap();
        let text = "First paragraph here.\n\nSecond paragraph here.\n\nThird one.";
        let chunks = splitter.split_text(text);
        assert_eq!(
            chunks,
            vec!["First paragraph here.", "Second paragraph here.", "Third one."]
        );
    }

    #[test]
    fn test_oversized_paragraph_falls_back_to_words() {
        let splitter = RecursiveCharacterSplitter::new(12, 0).unwrap();
        let chunks = splitter.split_text("short\n\nthis paragraph is much too long");
        assert_eq!(chunks[0], "short");
        assert!(chunks.iter().all(|c| c.chars().count() <= 12));
        assert_eq!(chunks.join(" "), "short this paragraph is much too long");
    }

    #[test]
    fn test_invalid_sizes_rejected() {
        assert!(RecursiveCharacterSplitter::new(0, 0).is_err());
        assert!(RecursiveCharacterSplitter::new(100, 100).is_err());
        assert!(RecursiveCharacterSplitter::from_config(&WorkflowConfig::default()).is_ok());
    }

    #[test]
    fn test_split_documents_keeps_source() {
        let splitter = RecursiveCharacterSplitter::new(10, 0).unwrap();
        let docs = vec![Document::new("one two three four", "notes.txt").with_metadata("lang", "en")];
        let chunks = splitter.split_documents(&docs);

        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| c.source == "notes.txt"));
        assert_eq!(chunks[1].metadata.get("chunk").map(String::as_str), Some("1"));
        assert_eq!(chunks[1].metadata.get("lang").map(String::as_str), Some("en"));
    }

    #[test]
    fn test_html_to_text() {
        let html = r#"<html><head><style>p { color: red; }</style>
            <script type="text/javascript">var x = "<p>";</script></head>
            <body><h1>Agents</h1><p>Planning and   memory.</p></body></html>"#;
        let text = html_to_text(html);
        assert!(text.contains("Agents"));
        assert!(text.contains("Planning and memory."));
        assert!(!text.contains("color"));
        assert!(!text.contains("var x"));
        assert!(!text.contains('<'));
    }

    #[tokio::test]
    async fn test_file_loader() {
        let mut file = tempfile::Builder::new().suffix(".md").tempfile().unwrap();
        write!(file, "# Notes\n\nSome content").unwrap();
        let path = file.path().to_string_lossy().to_string();

        let docs = loader_for(&path).unwrap().load(&path).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].content, "# Notes\n\nSome content");
        assert_eq!(docs[0].metadata.get("extension").map(String::as_str), Some("md"));
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let err = FileLoader.load("/definitely/not/here.txt").await.unwrap_err();
        assert!(matches!(err, AgentflowError::Io(_)));
    }
}
