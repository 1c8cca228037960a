//! Structured terms attached to an Asset or a Want.
//!
//! Listings arrive with loosely shaped key/value attributes. The known keys
//! are modelled as typed fields so the scorer can reason over them; anything
//! else lands in [`Terms::notes`].

use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};

// ─── Urgency ─────────────────────────────────────────────────────────────────

/// How soon the owner needs the deal done.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
  Low,
  Medium,
  High,
  Immediate,
}

impl Urgency {
  /// Position on a 0..=3 scale.
  pub fn level(self) -> u8 {
    match self {
      Self::Low => 0,
      Self::Medium => 1,
      Self::High => 2,
      Self::Immediate => 3,
    }
  }
}

// ─── Benefit ─────────────────────────────────────────────────────────────────

/// A benefit a party either seeks or can offer the counterparty.
///
/// Parsed leniently from free text ("1031", "sub-to", "assume debt") into a
/// fixed vocabulary; unrecognised text is kept verbatim in [`Benefit::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Benefit {
  TaxDeferral,
  DebtAssumption,
  SellerFinancing,
  Cashflow,
  Equity,
  QuickClose,
  Partnership,
  Other(String),
}

impl Benefit {
  pub fn parse(raw: &str) -> Self {
    let lowered = raw.trim().to_lowercase();
    if let Some(rest) = lowered.strip_prefix("other:") {
      return Self::Other(rest.trim().to_owned());
    }
    let text = lowered.replace(['_', '-'], " ");

    let has = |needles: &[&str]| needles.iter().any(|n| text.contains(n));

    if has(&["1031", "tax defer", "tax deferral", "like kind"]) {
      Self::TaxDeferral
    } else if has(&["sub to", "subto", "subject to", "assum"]) {
      Self::DebtAssumption
    } else if has(&["seller financ", "owner financ", "seller carry", "wrap"]) {
      Self::SellerFinancing
    } else if has(&["cash flow", "cashflow", "income"]) {
      Self::Cashflow
    } else if has(&["equity"]) {
      Self::Equity
    } else if has(&["quick close", "fast close", "quick sale"]) {
      Self::QuickClose
    } else if has(&["partner", "joint venture"]) || text == "jv" {
      Self::Partnership
    } else {
      Self::Other(text.trim().to_owned())
    }
  }

  pub fn as_label(&self) -> &str {
    match self {
      Self::TaxDeferral => "tax_deferral",
      Self::DebtAssumption => "debt_assumption",
      Self::SellerFinancing => "seller_financing",
      Self::Cashflow => "cashflow",
      Self::Equity => "equity",
      Self::QuickClose => "quick_close",
      Self::Partnership => "partnership",
      Self::Other(text) => text,
    }
  }
}

impl fmt::Display for Benefit {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Other(text) => write!(f, "other:{text}"),
      known => f.write_str(known.as_label()),
    }
  }
}

impl From<String> for Benefit {
  fn from(raw: String) -> Self { Self::parse(&raw) }
}

impl From<Benefit> for String {
  fn from(b: Benefit) -> Self { b.to_string() }
}

// ─── Debt and value range ────────────────────────────────────────────────────

/// Existing financing attached to an asset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebtTerms {
  pub balance:      Option<f64>,
  /// Whether a buyer can take the loan over.
  pub assumable:    bool,
  pub rate_percent: Option<f64>,
}

/// An inclusive value band, e.g. a budget.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValueRange {
  pub min: f64,
  pub max: f64,
}

impl ValueRange {
  /// Returns the band with its bounds ordered, or `None` if either bound is
  /// not a finite non-negative number.
  pub fn normalized(self) -> Option<Self> {
    if !self.min.is_finite() || !self.max.is_finite() {
      return None;
    }
    if self.min < 0.0 || self.max < 0.0 {
      return None;
    }
    Some(Self { min: self.min.min(self.max), max: self.min.max(self.max) })
  }
}

// ─── Terms ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Terms {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub location:         Option<String>,
  /// Net operating income, annual.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub noi:              Option<f64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub debt:             Option<DebtTerms>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub urgency:          Option<Urgency>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub timeline_months:  Option<u32>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub value_range:      Option<ValueRange>,
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub benefits_sought:  Vec<Benefit>,
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub benefits_offered: Vec<Benefit>,
  /// Escape hatch for attributes outside the known vocabulary.
  #[serde(skip_serializing_if = "BTreeMap::is_empty")]
  pub notes:            BTreeMap<String, String>,
}

impl Terms {
  /// Human-readable `key: value` lines for every populated attribute, in a
  /// stable order.
  pub fn describe(&self) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(location) = &self.location {
      lines.push(format!("location: {location}"));
    }
    if let Some(noi) = self.noi {
      lines.push(format!("NOI: ${noi:.0}"));
    }
    if let Some(debt) = &self.debt {
      let mut parts = Vec::new();
      if let Some(balance) = debt.balance {
        parts.push(format!("balance ${balance:.0}"));
      }
      if let Some(rate) = debt.rate_percent {
        parts.push(format!("{rate}% rate"));
      }
      parts.push(if debt.assumable { "assumable" } else { "not assumable" }.to_owned());
      lines.push(format!("debt: {}", parts.join(", ")));
    }
    if let Some(urgency) = self.urgency {
      lines.push(format!("urgency: {urgency:?}").to_lowercase());
    }
    if let Some(months) = self.timeline_months {
      lines.push(format!("timeline: {months} months"));
    }
    if let Some(range) = self.value_range {
      lines.push(format!("value range: ${:.0} - ${:.0}", range.min, range.max));
    }
    if !self.benefits_sought.is_empty() {
      lines.push(format!("seeks: {}", join_benefits(&self.benefits_sought)));
    }
    if !self.benefits_offered.is_empty() {
      lines.push(format!("offers: {}", join_benefits(&self.benefits_offered)));
    }
    for (key, value) in &self.notes {
      lines.push(format!("{key}: {value}"));
    }
    lines
  }
}

fn join_benefits(benefits: &[Benefit]) -> String {
  benefits.iter().map(Benefit::as_label).collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn benefit_vocabulary_parses_common_phrasings() {
    assert_eq!(Benefit::parse("1031 exchange"), Benefit::TaxDeferral);
    assert_eq!(Benefit::parse("Tax deferral"), Benefit::TaxDeferral);
    assert_eq!(Benefit::parse("sub-to"), Benefit::DebtAssumption);
    assert_eq!(Benefit::parse("Assume debt"), Benefit::DebtAssumption);
    assert_eq!(Benefit::parse("seller_financing"), Benefit::SellerFinancing);
    assert_eq!(Benefit::parse("JV"), Benefit::Partnership);
    assert_eq!(
      Benefit::parse("naming rights"),
      Benefit::Other("naming rights".into())
    );
  }

  #[test]
  fn benefit_serde_uses_labels() {
    let json = serde_json::to_string(&vec![
      Benefit::DebtAssumption,
      Benefit::Other("naming rights".into()),
    ])
    .unwrap();
    assert_eq!(json, r#"["debt_assumption","other:naming rights"]"#);

    let back: Vec<Benefit> = serde_json::from_str(&json).unwrap();
    assert_eq!(back[0], Benefit::DebtAssumption);
    assert_eq!(back[1], Benefit::Other("naming rights".into()));
  }

  #[test]
  fn terms_deserialise_with_missing_keys() {
    let terms: Terms =
      serde_json::from_str(r#"{"location":"Austin, TX","urgency":"high"}"#).unwrap();
    assert_eq!(terms.location.as_deref(), Some("Austin, TX"));
    assert_eq!(terms.urgency, Some(Urgency::High));
    assert!(terms.benefits_sought.is_empty());
  }

  #[test]
  fn value_range_rejects_nonsense() {
    assert!(ValueRange { min: f64::NAN, max: 1.0 }.normalized().is_none());
    assert!(ValueRange { min: -5.0, max: 1.0 }.normalized().is_none());
    let r = ValueRange { min: 10.0, max: 2.0 }.normalized().unwrap();
    assert_eq!((r.min, r.max), (2.0, 10.0));
  }
}
