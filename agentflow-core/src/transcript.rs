//! Append-only conversation transcripts
//!
//! A transcript is the ordered, causal history of one workflow run. Messages can
//! only be appended; nothing reorders or removes them. Each run owns its own
//! transcript, and concurrent workers never share one.

use serde::{Deserialize, Serialize};

use crate::llm::{LLMRequest, Message, MessageRole};

/// Ordered sequence of role-tagged messages
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Transcript {
    messages: Vec<Message>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a transcript with a system message
    pub fn with_system(content: impl Into<String>) -> Self {
        let mut transcript = Self::new();
        transcript.push(Message::system(content));
        transcript
    }

    /// Single-turn transcript: system prompt followed by one human message
    pub fn single_turn(system: impl Into<String>, human: impl Into<String>) -> Self {
        let mut transcript = Self::with_system(system);
        transcript.human(human);
        transcript
    }

    /// Append a message
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn human(&mut self, content: impl Into<String>) {
        self.push(Message::user(content));
    }

    pub fn ai(&mut self, content: impl Into<String>) {
        self.push(Message::assistant(content));
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Count of messages with the given role
    pub fn count_role(&self, role: MessageRole) -> usize {
        self.messages.iter().filter(|m| m.role == role).count()
    }

    /// Build a provider request over the current messages
    pub fn to_request(&self) -> LLMRequest {
        LLMRequest::new(self.messages.clone())
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }
}

impl From<Vec<Message>> for Transcript {
    fn from(messages: Vec<Message>) -> Self {
        Self { messages }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_turn() {
        let transcript = Transcript::single_turn("be brief", "hello");
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript.messages()[0].role, MessageRole::System);
        assert_eq!(transcript.last().unwrap().content, "hello");
    }

    #[test]
    fn test_append_preserves_order() {
        let mut transcript = Transcript::with_system("sys");
        transcript.human("q1");
        transcript.ai("a1");
        transcript.human("q2");

        let contents: Vec<_> = transcript.messages().iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["sys", "q1", "a1", "q2"]);
        assert_eq!(transcript.count_role(MessageRole::User), 2);
    }

    #[test]
    fn test_serializes_as_message_array() {
        let transcript = Transcript::single_turn("s", "h");
        let json = serde_json::to_value(&transcript).unwrap();
        assert!(json.is_array());
        assert_eq!(json[1]["role"], "user");
    }
}
