//! A scripted [`TextCompleter`] for tests.

use std::{
  sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
  },
  time::Duration,
};

use dealmatch_core::completion::{CompletionError, TextCompleter};

type Script = dyn Fn(&str) -> Result<String, CompletionError> + Send + Sync;

/// Answers every prompt through a closure and counts the calls. Clones share
/// the counter.
#[derive(Clone)]
pub struct ScriptedCompleter {
  script: Arc<Script>,
  calls:  Arc<AtomicUsize>,
  delay:  Option<Duration>,
}

impl ScriptedCompleter {
  pub fn new(
    script: impl Fn(&str) -> Result<String, CompletionError> + Send + Sync + 'static,
  ) -> Self {
    Self { script: Arc::new(script), calls: Arc::new(AtomicUsize::new(0)), delay: None }
  }

  /// Reply to every prompt with the same text.
  pub fn replying(text: impl Into<String>) -> Self {
    let text = text.into();
    Self::new(move |_| Ok(text.clone()))
  }

  /// Plausible model behaviour: a valid structures array for structure
  /// prompts, a short document for drafting prompts, prose otherwise.
  pub fn well_behaved() -> Self {
    Self::new(|prompt| {
      if prompt.contains("JSON array") {
        Ok(
          r#"[{"name": "Seller Carry", "howItWorks": "Seller finances part of the price.",
               "keyTerms": ["10% down"], "risks": ["Buyer default"],
               "nextSteps": ["Draft the note"]}]"#
            .to_owned(),
        )
      } else if prompt.starts_with("Draft a plain-language deal agreement") {
        Ok("1. Parties\n2. Structure\n6. Signatures".to_owned())
      } else {
        Ok("The asset's assumable debt fits the buyer's goals.".to_owned())
      }
    })
  }

  /// Sleep before answering, to exercise timeouts and races.
  pub fn with_delay(mut self, delay: Duration) -> Self {
    self.delay = Some(delay);
    self
  }

  pub fn calls(&self) -> usize { self.calls.load(Ordering::SeqCst) }
}

impl TextCompleter for ScriptedCompleter {
  async fn complete(&self, prompt: &str, _max_tokens: u32) -> Result<String, CompletionError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    if let Some(delay) = self.delay {
      tokio::time::sleep(delay).await;
    }
    (self.script)(prompt)
  }
}
