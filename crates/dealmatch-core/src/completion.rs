//! The external text-completion capability: prompt in, text out.
//!
//! Nothing about the returned text is guaranteed. Callers validate
//! it and keep a deterministic fallback.

use std::future::Future;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CompletionError {
  /// No completion backend is configured.
  #[error("text completion is disabled")]
  Disabled,

  #[error("transport error: {0}")]
  Transport(String),

  #[error("upstream returned {status}: {body}")]
  Upstream { status: u16, body: String },

  #[error("malformed completion response: {0}")]
  Malformed(String),
}

pub trait TextCompleter: Send + Sync {
  /// Complete `prompt`, producing at most roughly `max_tokens` tokens.
  fn complete<'a>(
    &'a self,
    prompt: &'a str,
    max_tokens: u32,
  ) -> impl Future<Output = Result<String, CompletionError>> + Send + 'a;
}

/// A completer that always reports [`CompletionError::Disabled`]; every AI
/// path then takes its fallback.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledCompleter;

impl TextCompleter for DisabledCompleter {
  async fn complete(&self, _prompt: &str, _max_tokens: u32) -> Result<String, CompletionError> {
    Err(CompletionError::Disabled)
  }
}
