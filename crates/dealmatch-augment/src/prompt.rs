//! Prompt builders. Each prompt carries the listings' text and their
//! structured attributes so the model never has to guess at terms.

use std::fmt::Write as _;

use dealmatch_core::{
  listing::{Asset, Want},
  scoring::ScoreCard,
  terms::Terms,
};

use crate::drafting::DraftRequest;

fn push_side(out: &mut String, heading: &str, title: &str, body: &str, extra: &[String]) {
  let _ = writeln!(out, "{heading}: {title}");
  if !body.trim().is_empty() {
    let _ = writeln!(out, "  description: {}", body.trim());
  }
  for line in extra {
    let _ = writeln!(out, "  {line}");
  }
}

fn side_lines(category: Option<&str>, value_label: &str, value: Option<f64>, terms: &Terms) -> Vec<String> {
  let mut lines = Vec::new();
  if let Some(category) = category {
    lines.push(format!("category: {category}"));
  }
  if let Some(value) = value {
    lines.push(format!("{value_label}: ${value:.0}"));
  }
  lines.extend(terms.describe());
  lines
}

/// Shared listing summary used by both augmentation prompts.
pub fn pair_summary(have: &Asset, want: &Want, card: &ScoreCard) -> String {
  let mut out = String::new();
  push_side(
    &mut out,
    "HAVE",
    &have.title,
    &have.description,
    &side_lines(have.category.as_deref(), "estimated value", have.estimated_value, &have.terms),
  );
  push_side(
    &mut out,
    "WANT",
    &want.title,
    &want.description,
    &side_lines(want.category.as_deref(), "target value", want.target_value, &want.terms),
  );

  let _ = writeln!(out, "Compatibility score: {:.2}", card.score);
  for dim in card.breakdown.strongest() {
    let _ = writeln!(
      out,
      "  {:?} ({:.2}, weight {:.2}): {}",
      dim.dimension, dim.score, dim.weight, dim.detail
    );
  }
  if let Some(note) = &card.breakdown.note {
    let _ = writeln!(out, "  note: {note}");
  }
  out
}

pub fn rationale_prompt(have: &Asset, want: &Want, card: &ScoreCard) -> String {
  format!(
    "You are a creative real-estate and business deal analyst.\n\
     Explain in 2-4 sentences why the following HAVE and WANT could work \
     together, naming the specific terms that line up and the biggest gap.\n\
     Plain prose only.\n\n{}",
    pair_summary(have, want, card)
  )
}

const STRUCTURE_SHAPE: &str = r#"[{"name": string, "howItWorks": string, "keyTerms": [string], "risks": [string], "nextSteps": [string]}]"#;

/// `strict` is used for the single retry after a schema violation.
pub fn structures_prompt(have: &Asset, want: &Want, card: &ScoreCard, strict: bool) -> String {
  let mut out = String::new();
  let _ = writeln!(
    out,
    "You are a creative real-estate and business deal analyst.\n\
     Suggest 1 to 3 deal structures (for example subject-to, wrap note, \
     seller carry, lease option, joint venture) that connect this HAVE with \
     this WANT.\n"
  );
  out.push_str(&pair_summary(have, want, card));
  let _ = writeln!(out, "\nReturn a JSON array shaped exactly like:\n{STRUCTURE_SHAPE}");
  if strict {
    let _ = writeln!(
      out,
      "Your previous answer could not be parsed. Respond with the JSON array \
       only: no markdown, no code fences, no commentary. Every object must \
       have all five keys, and keyTerms, risks and nextSteps must be arrays \
       of strings."
    );
  }
  out
}

pub fn drafting_prompt(request: &DraftRequest) -> String {
  let mut out = String::new();
  let _ = writeln!(
    out,
    "Draft a plain-language deal agreement between the parties below, based \
     on the selected structure. Use numbered sections: Parties, Structure, \
     Key Terms, Risks and Disclosures, Next Steps, Signatures. Do not invent \
     dollar amounts that are not given.\n"
  );
  for party in &request.parties {
    let _ = writeln!(out, "Party ({}): {}, listing \"{}\"", party.role, party.name, party.listing_title);
  }
  let s = &request.structure;
  let _ = writeln!(out, "\nStructure: {}\n{}", s.name, s.how_it_works);
  for (label, items) in [
    ("Key terms", &request.key_terms),
    ("Risks", &s.risks),
    ("Next steps", &s.next_steps),
  ] {
    if !items.is_empty() {
      let _ = writeln!(out, "{label}:");
      for item in items {
        let _ = writeln!(out, "  - {item}");
      }
    }
  }
  out
}

#[cfg(test)]
mod tests {
  use dealmatch_core::{scoring, terms::Benefit};

  use super::*;

  fn pair() -> (Asset, Want) {
    let have = Asset {
      title:           "12-unit apartment".into(),
      description:     "Fully leased".into(),
      category:        Some("multifamily".into()),
      estimated_value: Some(2_200_000.0),
      terms:           Terms { noi: Some(165_000.0), ..Terms::default() },
    };
    let want = Want {
      title:        "Rental with assumable loan".into(),
      description:  String::new(),
      category:     Some("single family".into()),
      target_value: Some(350_000.0),
      terms:        Terms { benefits_sought: vec![Benefit::DebtAssumption], ..Terms::default() },
    };
    (have, want)
  }

  #[test]
  fn summary_carries_both_sides_and_score() {
    let (have, want) = pair();
    let card = scoring::score(&have, &want);
    let summary = pair_summary(&have, &want, &card);
    assert!(summary.contains("HAVE: 12-unit apartment"));
    assert!(summary.contains("WANT: Rental with assumable loan"));
    assert!(summary.contains("NOI: $165000"));
    assert!(summary.contains("Compatibility score"));
  }

  #[test]
  fn strict_prompt_adds_json_only_instruction() {
    let (have, want) = pair();
    let card = scoring::score(&have, &want);
    let lenient = structures_prompt(&have, &want, &card, false);
    let strict = structures_prompt(&have, &want, &card, true);
    assert!(lenient.contains("JSON array"));
    assert!(!lenient.contains("JSON array only"));
    assert!(strict.contains("JSON array only"));
  }
}
