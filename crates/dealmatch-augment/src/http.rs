//! [`HttpCompleter`]: a [`TextCompleter`] over any OpenAI-compatible
//! chat-completions endpoint.

use std::time::Duration;

use dealmatch_core::completion::{CompletionError, TextCompleter};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct HttpCompleterConfig {
  /// Base URL, e.g. `https://api.openai.com`.
  pub api_url: String,
  pub api_key: String,
  pub model:   String,
  /// Transport-level timeout; the augmenter applies its own bound as well.
  pub timeout: Duration,
}

// ─── Wire types ──────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
  role:    &'static str,
  content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
  model:       &'a str,
  messages:    [ChatMessage<'a>; 2],
  max_tokens:  u32,
  temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
  #[serde(default)]
  choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
  message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
  content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
  error: ApiErrorDetails,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetails {
  message: String,
}

const SYSTEM_PROMPT: &str =
  "You help people structure creative real-estate and business deals. Follow output format instructions exactly.";

// ─── Client ──────────────────────────────────────────────────────────────────

/// Cheap to clone: the inner [`reqwest::Client`] is `Arc`-based.
#[derive(Clone)]
pub struct HttpCompleter {
  client: Client,
  config: HttpCompleterConfig,
}

impl HttpCompleter {
  pub fn new(config: HttpCompleterConfig) -> Result<Self, CompletionError> {
    let client = Client::builder()
      .timeout(config.timeout)
      .build()
      .map_err(|e| CompletionError::Transport(format!("failed to build HTTP client: {e}")))?;
    Ok(Self { client, config })
  }

  fn url(&self) -> String {
    format!("{}/v1/chat/completions", self.config.api_url.trim_end_matches('/'))
  }
}

impl TextCompleter for HttpCompleter {
  async fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String, CompletionError> {
    let request = ChatCompletionRequest {
      model: &self.config.model,
      messages: [
        ChatMessage { role: "system", content: SYSTEM_PROMPT },
        ChatMessage { role: "user", content: prompt },
      ],
      max_tokens,
      temperature: 0.4,
    };

    debug!(model = %self.config.model, prompt_len = prompt.len(), "sending completion request");

    let response = self
      .client
      .post(self.url())
      .bearer_auth(&self.config.api_key)
      .json(&request)
      .send()
      .await
      .map_err(|e| CompletionError::Transport(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
      let text = response.text().await.unwrap_or_default();
      let body = serde_json::from_str::<ApiErrorBody>(&text)
        .map(|e| e.error.message)
        .unwrap_or(text);
      return Err(CompletionError::Upstream { status: status.as_u16(), body });
    }

    let completion: ChatCompletionResponse = response
      .json()
      .await
      .map_err(|e| CompletionError::Malformed(e.to_string()))?;

    completion
      .choices
      .into_iter()
      .next()
      .and_then(|c| c.message.content)
      .ok_or_else(|| CompletionError::Malformed("response has no message content".into()))
  }
}
