//! Deterministic output used whenever the completion capability is
//! unavailable, slow, or returns something unusable.

use dealmatch_core::{
  listing::{Asset, Want},
  matching::SuggestedStructure,
  scoring::{Dimension, ScoreCard},
};

/// A rationale assembled from the strongest scored dimensions.
pub fn rationale(have: &Asset, want: &Want, card: &ScoreCard) -> String {
  let strongest = card.breakdown.strongest();
  if strongest.is_empty() {
    return format!(
      "\"{}\" and \"{}\" share no structured attributes, so this is a weak, \
       exploratory match (score {:.2}).",
      have.title, want.title, card.score
    );
  }

  let reasons: Vec<&str> = strongest
    .iter()
    .filter(|d| d.score >= 0.5)
    .take(3)
    .map(|d| d.detail.as_str())
    .collect();

  let mut out = format!(
    "\"{}\" scores {:.2} against \"{}\" across {} comparable attribute(s).",
    have.title,
    card.score,
    want.title,
    strongest.len()
  );
  if reasons.is_empty() {
    out.push_str(" No single attribute lines up strongly.");
  } else {
    out.push_str(" Strongest overlap: ");
    out.push_str(&reasons.join("; "));
    out.push('.');
  }
  if let Some(weakest) = strongest.last()
    && weakest.score < 0.5
  {
    out.push_str(&format!(" Biggest gap: {}.", weakest.detail));
  }
  out
}

/// The generic "Direct Exchange" structure, derived from the breakdown.
pub fn structure(have: &Asset, want: &Want, card: &ScoreCard) -> SuggestedStructure {
  let mut key_terms: Vec<String> = card
    .breakdown
    .strongest()
    .into_iter()
    .filter(|d| d.score > 0.0)
    .map(|d| d.detail.clone())
    .collect();
  if let Some(value) = have.estimated_value {
    key_terms.push(format!("Asset value around ${value:.0}"));
  }
  if let Some(value) = want.target_value {
    key_terms.push(format!("Buyer target around ${value:.0}"));
  }

  let mut risks = vec!["Terms below are a starting point generated without AI review".to_owned()];
  for dimension in Dimension::ALL {
    if card.breakdown.get(dimension).is_none() {
      risks.push(format!("{dimension:?} not stated on both sides; confirm before committing"));
    }
  }
  if let Some(value) = card.breakdown.get(Dimension::Value)
    && value.score < 0.5
  {
    risks.push("Price expectations are far apart".to_owned());
  }

  SuggestedStructure {
    name: "Direct Exchange".to_owned(),
    how_it_works: format!(
      "The owner of \"{}\" transfers it to the party seeking \"{}\" on mutually \
       agreed price and terms, closing through a neutral escrow.",
      have.title, want.title
    ),
    key_terms,
    risks,
    next_steps: vec![
      "Exchange property and financial documents".to_owned(),
      "Agree on price and closing timeline".to_owned(),
      "Open escrow and complete due diligence".to_owned(),
    ],
  }
}
