//! Offline provider for dry runs and tests.
//!
//! Replies with `[echo]` followed by the last non-empty line of the task
//! prompt, which is where every task template states what to write.

use crate::llm::{LlmResponse, LlmUsage, ProviderError};

#[derive(Debug, Clone, Copy, Default)]
pub struct DummyProvider;

impl DummyProvider {
    pub async fn complete(&self, content: &str) -> Result<LlmResponse, ProviderError> {
        let instruction = content.lines().rev().map(str::trim).find(|l| !l.is_empty()).unwrap_or("");
        Ok(LlmResponse {
            text: format!("[echo] {instruction}"),
            usage: Some(LlmUsage {
                input_tokens: content.split_whitespace().count() as u64,
                output_tokens: instruction.split_whitespace().count() as u64 + 1,
            }),
        })
    }
}
