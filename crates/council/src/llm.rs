//! LLM provider interface.
//!
//! The council only needs one capability from a provider: a single
//! system+user chat turn returning text. Concrete transports implement
//! [`LlmClient`]; the built-in [`MockLlm`] backs mock mode and tests.

use async_trait::async_trait;
use forge_core::Result;
use std::collections::VecDeque;
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmMessage {
    pub role: String,
    pub content: String,
}

impl LlmMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: String,
}

/// One chat completion turn. Implementations may suspend on network I/O;
/// callers own timeout and retry policy.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, messages: &[LlmMessage], temperature: f32) -> Result<LlmResponse>;
}

/// Scripted in-process client. Pops queued responses in order; when the
/// queue is empty it falls back to the default response.
pub struct MockLlm {
    default_response: String,
    queued: Mutex<VecDeque<Result<String>>>,
}

impl MockLlm {
    pub fn new(default_response: impl Into<String>) -> Self {
        Self {
            default_response: default_response.into(),
            queued: Mutex::new(VecDeque::new()),
        }
    }

    /// A mock whose every completion is a valid tri-perspective APPROVE with
    /// confidence 0.8.
    pub fn approving() -> Self {
        Self::new(
            serde_json::json!({
                "perspectives": {
                    "optimistic": {
                        "assessment": "Clear upside with manageable rollout effort.",
                        "key_points": ["improves throughput", "low migration cost"],
                        "confidence": 0.8
                    },
                    "balanced": {
                        "assessment": "Benefits outweigh the known trade-offs.",
                        "key_points": ["moderate complexity"],
                        "confidence": 0.8
                    },
                    "critical": {
                        "assessment": "Failure modes are contained and reversible.",
                        "key_points": ["needs monitoring"],
                        "confidence": 0.8
                    }
                },
                "synthesis": {
                    "vote": "APPROVE",
                    "reasoning": "Benefits clearly outweigh the identified risks.",
                    "confidence": 0.8,
                    "primary_benefits": ["throughput", "simplicity"],
                    "primary_concerns": ["monitoring gap"]
                }
            })
            .to_string(),
        )
    }

    /// Queue a one-shot response (or error) ahead of the default.
    pub fn push_response(&self, response: Result<String>) {
        self.queued
            .lock()
            .expect("mock queue poisoned")
            .push_back(response);
    }
}

#[async_trait]
impl LlmClient for MockLlm {
    async fn complete(&self, _messages: &[LlmMessage], _temperature: f32) -> Result<LlmResponse> {
        let queued = self
            .queued
            .lock()
            .expect("mock queue poisoned")
            .pop_front();
        match queued {
            Some(Ok(content)) => Ok(LlmResponse { content }),
            Some(Err(e)) => Err(e),
            None => Ok(LlmResponse {
                content: self.default_response.clone(),
            }),
        }
    }
}

/// Strip a markdown code fence from a model reply, if present.
pub fn strip_code_fence(content: &str) -> String {
    let trimmed = content.trim();
    if trimmed.starts_with("```") {
        let lines: Vec<&str> = trimmed.lines().collect();
        if lines.len() >= 2 {
            return lines[1..lines.len() - 1].join("\n");
        }
    }
    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_pops_queue_then_falls_back() {
        let mock = MockLlm::new("default");
        mock.push_response(Ok("first".into()));

        let first = mock.complete(&[LlmMessage::user("hi")], 0.4).await.unwrap();
        assert_eq!(first.content, "first");
        let second = mock.complete(&[LlmMessage::user("hi")], 0.4).await.unwrap();
        assert_eq!(second.content, "default");
    }

    #[test]
    fn code_fence_is_stripped() {
        let fenced = "```json\n{\"a\": 1}\n```";
        assert_eq!(strip_code_fence(fenced), "{\"a\": 1}");
        assert_eq!(strip_code_fence("{\"a\": 1}"), "{\"a\": 1}");
    }
}
