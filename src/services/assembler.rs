// src/services/assembler.rs
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::trace;

use super::openai::LlmError;

/// Accumulates streamed completion deltas into the growing assistant reply.
///
/// Fragments are concatenated strictly in arrival order; `current` exposes
/// the text accumulated so far after each push, for progressive display.
#[derive(Debug, Default)]
pub struct ResponseAssembler {
    text: String,
}

impl ResponseAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one fragment and return the text accumulated so far.
    pub fn push(&mut self, fragment: &str) -> &str {
        self.text.push_str(fragment);
        &self.text
    }

    pub fn current(&self) -> &str {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Consume the assembler, yielding the complete assistant response.
    pub fn finish(self) -> String {
        self.text
    }
}

/// Drain a delta channel into the final response text.
///
/// A mid-stream error aborts the turn: the partial text is dropped and never
/// scanned for meals.
pub async fn collect_stream(
    mut rx: UnboundedReceiver<Result<String, LlmError>>,
) -> Result<String, LlmError> {
    let mut assembler = ResponseAssembler::new();
    while let Some(delta) = rx.recv().await {
        let fragment = delta?;
        let so_far = assembler.push(&fragment);
        trace!(accumulated = so_far.len(), "assistant delta");
    }
    Ok(assembler.finish())
}
