//! Agreement drafting inputs and the template used when no model output is
//! available.

use std::fmt::{self, Write as _};

use dealmatch_core::matching::SuggestedStructure;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartyRole {
  /// Owner of the HAVE listing.
  Offering,
  /// Owner of the WANT listing.
  Seeking,
}

impl fmt::Display for PartyRole {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      Self::Offering => "offering",
      Self::Seeking => "seeking",
    })
  }
}

#[derive(Debug, Clone)]
pub struct Party {
  pub role:          PartyRole,
  pub name:          String,
  pub listing_title: String,
}

#[derive(Debug, Clone)]
pub struct DraftRequest {
  pub structure: SuggestedStructure,
  pub parties:   Vec<Party>,
  /// The structure's key terms, optionally amended by the creator.
  pub key_terms: Vec<String>,
  pub title:     Option<String>,
}

impl DraftRequest {
  pub fn title(&self) -> String {
    match self.title.as_deref().map(str::trim) {
      Some(t) if !t.is_empty() => t.to_owned(),
      _ => format!("{} Agreement", self.structure.name),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftedAgreement {
  pub title:    String,
  pub content:  String,
  /// Whether the template was used instead of model output.
  pub degraded: bool,
}

/// Fill the fixed agreement template from the request.
pub fn template(request: &DraftRequest) -> String {
  let s = &request.structure;
  let mut out = String::new();

  let _ = writeln!(out, "{}\n", request.title());
  let _ = writeln!(out, "1. Parties");
  for party in &request.parties {
    let _ = writeln!(
      out,
      "   {} ({} party, listing \"{}\")",
      party.name, party.role, party.listing_title
    );
  }
  let _ = writeln!(out, "\n2. Structure: {}\n   {}", s.name, s.how_it_works);

  let sections = [
    ("3. Key Terms", &request.key_terms),
    ("4. Risks and Disclosures", &s.risks),
    ("5. Next Steps", &s.next_steps),
  ];
  for (heading, items) in sections {
    let _ = writeln!(out, "\n{heading}");
    if items.is_empty() {
      let _ = writeln!(out, "   To be agreed.");
    }
    for (i, item) in items.iter().enumerate() {
      let _ = writeln!(out, "   {}. {item}", i + 1);
    }
  }

  let _ = writeln!(out, "\n6. Signatures");
  for party in &request.parties {
    let _ = writeln!(out, "   ____________________  {}", party.name);
  }
  let _ = write!(
    out,
    "\nThis draft is not legal advice and is not binding until signed by all parties."
  );
  out
}

#[cfg(test)]
mod tests {
  use super::*;

  fn request() -> DraftRequest {
    DraftRequest {
      structure: SuggestedStructure {
        name:         "Wrap Note".into(),
        how_it_works: "Seller keeps the underlying loan and carries a new note.".into(),
        key_terms:    vec!["6.5% interest".into()],
        risks:        vec![],
        next_steps:   vec!["Engage a servicer".into()],
      },
      parties:   vec![
        Party { role: PartyRole::Offering, name: "Alice".into(), listing_title: "Fourplex".into() },
        Party { role: PartyRole::Seeking, name: "Bob".into(), listing_title: "Starter rental".into() },
      ],
      key_terms: vec!["6.5% interest".into(), "5 year balloon".into()],
      title:     None,
    }
  }

  #[test]
  fn title_defaults_to_structure_name() {
    let mut r = request();
    assert_eq!(r.title(), "Wrap Note Agreement");
    r.title = Some("  ".into());
    assert_eq!(r.title(), "Wrap Note Agreement");
    r.title = Some("LOI".into());
    assert_eq!(r.title(), "LOI");
  }

  #[test]
  fn template_lists_parties_terms_and_empty_sections() {
    let text = template(&request());
    assert!(text.starts_with("Wrap Note Agreement"));
    assert!(text.contains("Alice (offering party"));
    assert!(text.contains("2. 5 year balloon"));
    assert!(text.contains("To be agreed."));
    assert!(text.contains("6. Signatures"));
  }
}
