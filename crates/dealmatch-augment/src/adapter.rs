//! [`Augmenter`]: turns a scored pair into a rationale and suggested
//! structures, and a chosen structure into an agreement draft.

use std::time::Duration;

use dealmatch_core::{
  completion::TextCompleter,
  listing::{Asset, Want},
  matching::SuggestedStructure,
  scoring::ScoreCard,
};
use tracing::{debug, warn};

use crate::{
  drafting::{self, DraftRequest, DraftedAgreement},
  fallback, parse, prompt, Error, Result,
};

#[derive(Debug, Clone, Copy)]
pub struct AugmentConfig {
  /// Bound on each individual completion call.
  pub timeout:    Duration,
  pub max_tokens: u32,
}

impl Default for AugmentConfig {
  fn default() -> Self { Self { timeout: Duration::from_secs(20), max_tokens: 800 } }
}

impl AugmentConfig {
  /// Longest [`Augmenter::augment`] can run: the structures completion and
  /// its strict retry are sequential, the rationale runs alongside them.
  pub fn worst_case(&self) -> Duration { self.timeout * 2 }
}

/// Output of [`Augmenter::augment`]. Always schema-valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Augmentation {
  pub rationale:  String,
  /// Never empty.
  pub structures: Vec<SuggestedStructure>,
  /// Whether any part came from the deterministic fallback.
  pub degraded:   bool,
}

pub struct Augmenter<C> {
  completer: C,
  config:    AugmentConfig,
}

impl<C: TextCompleter> Augmenter<C> {
  pub fn new(completer: C, config: AugmentConfig) -> Self { Self { completer, config } }

  pub fn completer(&self) -> &C { &self.completer }

  /// Generate a rationale and structures for `have` × `want`.
  ///
  /// Never fails. Callers must consult the match cache first; every call
  /// costs at least two completions.
  pub async fn augment(&self, have: &Asset, want: &Want, card: &ScoreCard) -> Augmentation {
    let (rationale, structures) = tokio::join!(
      self.rationale(have, want, card),
      self.structures(have, want, card),
    );

    let mut degraded = false;
    let rationale = rationale.unwrap_or_else(|e| {
      warn!(error = %e, "rationale completion failed; using fallback");
      degraded = true;
      fallback::rationale(have, want, card)
    });
    let structures = structures.unwrap_or_else(|e| {
      warn!(error = %e, "structure completion failed; using Direct Exchange fallback");
      degraded = true;
      vec![fallback::structure(have, want, card)]
    });

    Augmentation { rationale, structures, degraded }
  }

  async fn rationale(&self, have: &Asset, want: &Want, card: &ScoreCard) -> Result<String> {
    let text = self.complete_bounded(&prompt::rationale_prompt(have, want, card)).await?;
    let text = text.trim();
    if text.is_empty() {
      return Err(Error::Schema("empty rationale".into()));
    }
    Ok(text.to_owned())
  }

  async fn structures(
    &self,
    have: &Asset,
    want: &Want,
    card: &ScoreCard,
  ) -> Result<Vec<SuggestedStructure>> {
    let first = self
      .complete_bounded(&prompt::structures_prompt(have, want, card, false))
      .await
      .and_then(|text| parse::parse_structures(&text));

    match first {
      Ok(structures) => Ok(structures),
      Err(e) if e.warrants_strict_retry() => {
        debug!(error = %e, "structures response rejected; retrying with strict prompt");
        let text = self
          .complete_bounded(&prompt::structures_prompt(have, want, card, true))
          .await?;
        parse::parse_structures(&text)
      }
      Err(e) => Err(e),
    }
  }

  /// Draft agreement content for the chosen structure, falling back to the
  /// fixed template.
  pub async fn draft_agreement(&self, request: &DraftRequest) -> DraftedAgreement {
    let title = request.title();
    match self.complete_bounded(&prompt::drafting_prompt(request)).await {
      Ok(text) if !text.trim().is_empty() => DraftedAgreement {
        title,
        content: text.trim().to_owned(),
        degraded: false,
      },
      outcome => {
        if let Err(e) = outcome {
          warn!(error = %e, "drafting completion failed; using template");
        }
        DraftedAgreement { title, content: drafting::template(request), degraded: true }
      }
    }
  }

  async fn complete_bounded(&self, prompt: &str) -> Result<String> {
    match tokio::time::timeout(
      self.config.timeout,
      self.completer.complete(prompt, self.config.max_tokens),
    )
    .await
    {
      Ok(result) => Ok(result?),
      Err(_) => Err(dealmatch_core::Error::UpstreamTimeout(self.config.timeout).into()),
    }
  }
}
