//! Lenient parsing of completion output into [`SuggestedStructure`]s.
//!
//! Completion text is untrusted. It may be wrapped in markdown fences,
//! prefixed with chatter, use camelCase or snake_case keys, or be missing
//! fields entirely. Anything that does not yield at least one structure with
//! all five fields is a [`Error::Schema`].

use dealmatch_core::matching::SuggestedStructure;
use serde::Deserialize;
use serde_json::Value;

use crate::{Error, Result};

/// Upper bound on structures kept from a single response.
pub const MAX_STRUCTURES: usize = 5;

#[derive(Deserialize)]
struct RawStructure {
  name:         String,
  #[serde(rename = "howItWorks", alias = "how_it_works")]
  how_it_works: String,
  #[serde(rename = "keyTerms", alias = "key_terms")]
  key_terms:    Vec<String>,
  risks:        Vec<String>,
  #[serde(rename = "nextSteps", alias = "next_steps")]
  next_steps:   Vec<String>,
}

impl RawStructure {
  fn into_structure(self) -> Result<SuggestedStructure> {
    let structure = SuggestedStructure {
      name:         self.name.trim().to_owned(),
      how_it_works: self.how_it_works.trim().to_owned(),
      key_terms:    clean_list(self.key_terms),
      risks:        clean_list(self.risks),
      next_steps:   clean_list(self.next_steps),
    };
    structure
      .validate()
      .map_err(|e| Error::Schema(e.to_string()))?;
    Ok(structure)
  }
}

fn clean_list(items: Vec<String>) -> Vec<String> {
  items
    .into_iter()
    .map(|s| s.trim().to_owned())
    .filter(|s| !s.is_empty())
    .collect()
}

/// Parse a structures response.
///
/// Accepts a bare JSON array, an object with a `structures` array, or a
/// single structure object, optionally surrounded by prose or code fences.
pub fn parse_structures(raw: &str) -> Result<Vec<SuggestedStructure>> {
  let value = extract_json(raw)
    .ok_or_else(|| Error::Schema("no JSON value found in response".into()))?;

  let items = match value {
    Value::Array(items) => items,
    Value::Object(mut map) => match map.remove("structures") {
      Some(Value::Array(items)) => items,
      Some(_) => return Err(Error::Schema("`structures` is not an array".into())),
      None => vec![Value::Object(map)],
    },
    other => {
      return Err(Error::Schema(format!("expected an array of structures, got {other}")));
    }
  };

  if items.is_empty() {
    return Err(Error::Schema("response contained no structures".into()));
  }

  items
    .into_iter()
    .take(MAX_STRUCTURES)
    .enumerate()
    .map(|(i, item)| {
      serde_json::from_value::<RawStructure>(item)
        .map_err(|e| Error::Schema(format!("structure {i}: {e}")))?
        .into_structure()
    })
    .collect()
}

/// Find the first parseable JSON object or array in `raw`.
fn extract_json(raw: &str) -> Option<Value> {
  let body = strip_fences(raw);
  if let Ok(v) = serde_json::from_str(body) {
    return Some(v);
  }

  // Fall back to the widest bracketed span of either kind.
  [('[', ']'), ('{', '}')].into_iter().find_map(|(open, close)| {
    let start = body.find(open)?;
    let end = body.rfind(close)?;
    (end > start)
      .then(|| serde_json::from_str(&body[start..=end]).ok())
      .flatten()
  })
}

/// Return the contents of the first fenced code block, or the trimmed input.
fn strip_fences(raw: &str) -> &str {
  let trimmed = raw.trim();
  let Some(start) = trimmed.find("```") else {
    return trimmed;
  };
  let after = &trimmed[start + 3..];
  // Skip an info string such as `json`.
  let after = after.find('\n').map_or(after, |nl| &after[nl + 1..]);
  match after.find("```") {
    Some(end) => after[..end].trim(),
    None => after.trim(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const ONE: &str = r#"[{
    "name": "Subject-To Acquisition",
    "howItWorks": "Buyer takes title while the existing loan stays in place.",
    "keyTerms": ["Assume $1.4M balance", " "],
    "risks": ["Due-on-sale clause"],
    "nextSteps": ["Order title report"]
  }]"#;

  #[test]
  fn parses_bare_array() {
    let parsed = parse_structures(ONE).unwrap();
    assert_eq!(parsed.len(), 1);
    assert_eq!(parsed[0].name, "Subject-To Acquisition");
    // Blank entries are dropped.
    assert_eq!(parsed[0].key_terms, vec!["Assume $1.4M balance".to_owned()]);
  }

  #[test]
  fn parses_fenced_and_chatty_output() {
    let raw = format!("Sure! Here you go:\n```json\n{ONE}\n```\nLet me know.");
    assert_eq!(parse_structures(&raw).unwrap().len(), 1);

    let raw = format!("Here are the options: {ONE} Hope that helps.");
    assert_eq!(parse_structures(&raw).unwrap().len(), 1);
  }

  #[test]
  fn accepts_wrapper_object_and_snake_case() {
    let raw = r#"{"structures": [{
      "name": "Seller Carry",
      "how_it_works": "Seller finances 20% of the price.",
      "key_terms": [], "risks": [], "next_steps": []
    }]}"#;
    let parsed = parse_structures(raw).unwrap();
    assert_eq!(parsed[0].name, "Seller Carry");
  }

  #[test]
  fn rejects_missing_field() {
    let raw = r#"[{"name": "JV", "howItWorks": "Split equity.", "keyTerms": [], "risks": []}]"#;
    assert!(matches!(parse_structures(raw), Err(Error::Schema(_))));
  }

  #[test]
  fn rejects_non_list_terms() {
    let raw = r#"[{"name": "JV", "howItWorks": "Split.", "keyTerms": "50/50",
                   "risks": [], "nextSteps": []}]"#;
    assert!(matches!(parse_structures(raw), Err(Error::Schema(_))));
  }

  #[test]
  fn rejects_blank_name_prose_and_empty_list() {
    let blank = r#"[{"name": " ", "howItWorks": "x", "keyTerms": [], "risks": [], "nextSteps": []}]"#;
    assert!(parse_structures(blank).is_err());
    assert!(parse_structures("I cannot help with that.").is_err());
    assert!(parse_structures("[]").is_err());
  }

  #[test]
  fn caps_structure_count() {
    let item = r#"{"name": "N", "howItWorks": "H", "keyTerms": [], "risks": [], "nextSteps": []}"#;
    let raw = format!("[{}]", vec![item; 8].join(","));
    assert_eq!(parse_structures(&raw).unwrap().len(), MAX_STRUCTURES);
  }
}
