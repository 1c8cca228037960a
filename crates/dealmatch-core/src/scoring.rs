//! Compatibility scorer. Pure and deterministic; it performs no I/O.
//!
//! A HAVE and a WANT are compared across a fixed set of [`Dimension`]s. A
//! dimension contributes only when both sides carry the data it needs; the
//! final score is the weighted mean of the contributing dimensions. Listings
//! sharing no comparable data at all score [`BASELINE_SCORE`].

use std::{cmp::Ordering, collections::BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
  listing::{Asset, Listing, Want},
  terms::{Benefit, ValueRange},
};

/// Score given to a pair with no comparable dimensions.
pub const BASELINE_SCORE: f64 = 0.1;

/// Half-width of the band placed around a point value, as a fraction.
const POINT_VALUE_SPREAD: f64 = 0.15;

// ─── Dimensions ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
  Category,
  Value,
  Location,
  Timeline,
  Urgency,
  Benefits,
}

impl Dimension {
  pub const ALL: [Dimension; 6] = [
    Self::Category,
    Self::Value,
    Self::Location,
    Self::Timeline,
    Self::Urgency,
    Self::Benefits,
  ];

  pub fn weight(self) -> f64 {
    match self {
      Self::Category => 0.15,
      Self::Value => 0.20,
      Self::Location => 0.15,
      Self::Timeline => 0.10,
      Self::Urgency => 0.15,
      Self::Benefits => 0.25,
    }
  }
}

/// One dimension's contribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionScore {
  pub dimension: Dimension,
  pub weight:    f64,
  /// Sub-score in `[0, 1]`.
  pub score:     f64,
  /// Short explanation, used to seed rationale prompts and fallbacks.
  pub detail:    String,
}

/// The structured "why" behind a score.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureBreakdown {
  pub dimensions: Vec<DimensionScore>,
  /// Set when the pair fell back to the baseline.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub note:       Option<String>,
}

impl FeatureBreakdown {
  /// Number of dimensions that were comparable on both sides.
  pub fn populated(&self) -> usize { self.dimensions.len() }

  pub fn get(&self, dimension: Dimension) -> Option<&DimensionScore> {
    self.dimensions.iter().find(|d| d.dimension == dimension)
  }

  /// Contributing dimensions ordered from strongest to weakest.
  pub fn strongest(&self) -> Vec<&DimensionScore> {
    let mut dims: Vec<&DimensionScore> = self.dimensions.iter().collect();
    dims.sort_by(|a, b| b.score.total_cmp(&a.score));
    dims
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreCard {
  /// Aggregate score in `[0, 1]`.
  pub score:     f64,
  pub breakdown: FeatureBreakdown,
}

impl ScoreCard {
  fn baseline(note: &str) -> Self {
    Self {
      score:     BASELINE_SCORE,
      breakdown: FeatureBreakdown { dimensions: Vec::new(), note: Some(note.to_owned()) },
    }
  }
}

// ─── Entry points ────────────────────────────────────────────────────────────

/// Score a HAVE payload against a WANT payload. Never fails.
pub fn score(have: &Asset, want: &Want) -> ScoreCard {
  let mut dimensions = Vec::new();

  for dimension in Dimension::ALL {
    let scored = match dimension {
      Dimension::Category => category(have, want),
      Dimension::Value => value(have, want),
      Dimension::Location => location(have, want),
      Dimension::Timeline => timeline(have, want),
      Dimension::Urgency => urgency(have, want),
      Dimension::Benefits => benefits(have, want),
    };
    if let Some((sub, detail)) = scored
      && sub.is_finite()
    {
      dimensions.push(DimensionScore {
        dimension,
        weight: dimension.weight(),
        score: sub.clamp(0.0, 1.0),
        detail,
      });
    }
  }

  if dimensions.is_empty() {
    return ScoreCard::baseline("no comparable attributes on both sides");
  }

  let total_weight: f64 = dimensions.iter().map(|d| d.weight).sum();
  let weighted: f64 = dimensions.iter().map(|d| d.weight * d.score).sum();
  let aggregate = weighted / total_weight;

  if !aggregate.is_finite() {
    return ScoreCard::baseline("malformed attributes");
  }

  ScoreCard {
    score:     aggregate.clamp(0.0, 1.0),
    breakdown: FeatureBreakdown { dimensions, note: None },
  }
}

/// Score two listings in either order. Returns `None` unless exactly one is a
/// HAVE and the other a WANT.
pub fn score_listings(a: &Listing, b: &Listing) -> Option<ScoreCard> {
  match (a.as_asset(), b.as_want(), a.as_want(), b.as_asset()) {
    (Some(have), Some(want), _, _) | (_, _, Some(want), Some(have)) => {
      Some(score(have, want))
    }
    _ => None,
  }
}

// ─── Ranking ─────────────────────────────────────────────────────────────────

/// What a candidate pair is ranked by.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankKey {
  pub score:             f64,
  pub populated:         usize,
  /// Creation time of the more recently created listing in the pair.
  pub newest_listing_at: DateTime<Utc>,
}

/// Orders best-first: higher score, then more populated dimensions, then the
/// more recently created listing.
pub fn compare_rank(a: &RankKey, b: &RankKey) -> Ordering {
  b.score
    .total_cmp(&a.score)
    .then_with(|| b.populated.cmp(&a.populated))
    .then_with(|| b.newest_listing_at.cmp(&a.newest_listing_at))
}

// ─── Dimension scorers ───────────────────────────────────────────────────────

const CATEGORY_FAMILIES: &[(&str, &[&str])] = &[
  ("residential", &[
    "singlefamily", "sfr", "sfh", "multifamily", "duplex", "triplex",
    "fourplex", "quadplex", "condo", "townhouse", "townhome", "apartment",
    "mobilehome", "residential", "house",
  ]),
  ("commercial", &[
    "retail", "office", "industrial", "warehouse", "commercial", "mixeduse",
    "selfstorage", "storage", "hotel", "hospitality",
  ]),
  ("land", &["land", "lot", "acreage", "farm", "ranch"]),
  ("business", &["business", "franchise", "saas", "ecommerce", "restaurant", "agency"]),
  ("equipment", &["equipment", "machinery", "vehicle", "truck", "tools"]),
  ("capital", &["capital", "cash", "funding", "financing", "loan", "equity"]),
];

fn compact(raw: &str) -> String {
  raw
    .to_lowercase()
    .chars()
    .filter(|c| c.is_alphanumeric())
    .collect()
}

fn category_family(compacted: &str) -> Option<&'static str> {
  CATEGORY_FAMILIES
    .iter()
    .find(|(_, members)| members.iter().any(|m| compacted.contains(m)))
    .map(|(family, _)| *family)
}

fn category(have: &Asset, want: &Want) -> Option<(f64, String)> {
  let h = compact(have.category.as_deref()?);
  let w = compact(want.category.as_deref()?);
  if h.is_empty() || w.is_empty() {
    return None;
  }
  if h == w {
    return Some((1.0, format!("same category ({h})")));
  }
  match (category_family(&h), category_family(&w)) {
    (Some(a), Some(b)) if a == b => Some((0.6, format!("both {a} ({h} vs {w})"))),
    _ => Some((0.0, format!("different categories ({h} vs {w})"))),
  }
}

fn value_band(point: Option<f64>, range: Option<ValueRange>) -> Option<ValueRange> {
  if let Some(range) = range.and_then(ValueRange::normalized)
    && range.max > 0.0
  {
    return Some(range);
  }
  let v = point?;
  if !v.is_finite() || v <= 0.0 {
    return None;
  }
  Some(ValueRange {
    min: v * (1.0 - POINT_VALUE_SPREAD),
    max: v * (1.0 + POINT_VALUE_SPREAD),
  })
}

fn value(have: &Asset, want: &Want) -> Option<(f64, String)> {
  let h = value_band(have.estimated_value, have.terms.value_range)?;
  let w = value_band(want.target_value, want.terms.value_range)?;

  let overlap = h.max.min(w.max) - h.min.max(w.min);
  if overlap >= 0.0 {
    let narrower = (h.max - h.min).min(w.max - w.min);
    let score = if narrower <= 0.0 { 1.0 } else { overlap / narrower };
    return Some((score, "value ranges overlap".to_owned()));
  }

  // Disjoint: decay with the gap between the nearest edges, capped below the
  // weakest overlapping score.
  let (lower, upper) = if h.max < w.min { (h, w) } else { (w, h) };
  let score = 0.5 * lower.max / upper.min;
  Some((
    score,
    format!("value gap (${:.0} vs ${:.0})", lower.max, upper.min),
  ))
}

fn normalize_location(raw: &str) -> Vec<String> {
  raw
    .split(',')
    .map(|part| part.trim().to_lowercase())
    .filter(|part| !part.is_empty())
    .collect()
}

fn location(have: &Asset, want: &Want) -> Option<(f64, String)> {
  let h = normalize_location(have.terms.location.as_deref()?);
  let w = normalize_location(want.terms.location.as_deref()?);
  if h.is_empty() || w.is_empty() {
    return None;
  }
  if h == w {
    return Some((1.0, format!("same location ({})", h.join(", "))));
  }
  match (h.last(), w.last()) {
    (Some(a), Some(b)) if a == b => Some((0.5, format!("same region ({a})"))),
    _ => Some((0.0, "different locations".to_owned())),
  }
}

fn timeline(have: &Asset, want: &Want) -> Option<(f64, String)> {
  let h = have.terms.timeline_months?;
  let w = want.terms.timeline_months?;
  let (lo, hi) = (h.min(w), h.max(w));
  let score = if hi == 0 { 1.0 } else { f64::from(lo) / f64::from(hi) };
  Some((score, format!("timelines {h} vs {w} months")))
}

fn urgency(have: &Asset, want: &Want) -> Option<(f64, String)> {
  let h = have.terms.urgency?;
  let w = want.terms.urgency?;
  let distance = f64::from(h.level().abs_diff(w.level()));
  Some((
    1.0 - distance / 3.0,
    format!("urgency {h:?} vs {w:?}").to_lowercase(),
  ))
}

/// What the asset side can hand over, declared or implied by its terms.
fn offered_by_asset(have: &Asset) -> BTreeSet<Benefit> {
  let mut offered: BTreeSet<Benefit> =
    have.terms.benefits_offered.iter().cloned().collect();
  if have.terms.debt.as_ref().is_some_and(|d| d.assumable) {
    offered.insert(Benefit::DebtAssumption);
  }
  if have.terms.noi.is_some_and(|noi| noi.is_finite() && noi > 0.0) {
    offered.insert(Benefit::Cashflow);
  }
  offered
}

fn coverage(sought: &[Benefit], offered: &BTreeSet<Benefit>) -> Option<(f64, Vec<String>)> {
  let sought: BTreeSet<&Benefit> = sought.iter().collect();
  if sought.is_empty() || offered.is_empty() {
    return None;
  }
  let met: Vec<String> = sought
    .iter()
    .filter(|b| offered.contains(**b))
    .map(|b| b.as_label().to_owned())
    .collect();
  Some((met.len() as f64 / sought.len() as f64, met))
}

fn benefits(have: &Asset, want: &Want) -> Option<(f64, String)> {
  let asset_offers = offered_by_asset(have);
  let want_offers: BTreeSet<Benefit> =
    want.terms.benefits_offered.iter().cloned().collect();

  let directions = [
    coverage(&want.terms.benefits_sought, &asset_offers),
    coverage(&have.terms.benefits_sought, &want_offers),
  ];

  let mut total = 0.0;
  let mut counted = 0.0;
  let mut met = Vec::new();
  for (score, labels) in directions.into_iter().flatten() {
    total += score;
    counted += 1.0;
    met.extend(labels);
  }
  if counted == 0.0 {
    return None;
  }

  let detail = if met.is_empty() {
    "no sought benefit is offered".to_owned()
  } else {
    format!("benefits aligned: {}", met.join(", "))
  };
  Some((total / counted, detail))
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;
  use crate::terms::{DebtTerms, Terms, Urgency};

  fn asset(category: Option<&str>, value: Option<f64>, terms: Terms) -> Asset {
    Asset {
      title: "asset".into(),
      description: String::new(),
      category: category.map(Into::into),
      estimated_value: value,
      terms,
    }
  }

  fn want(category: Option<&str>, value: Option<f64>, terms: Terms) -> Want {
    Want {
      title: "want".into(),
      description: String::new(),
      category: category.map(Into::into),
      target_value: value,
      terms,
    }
  }

  fn multifamily_have() -> Asset {
    asset(
      Some("multifamily"),
      Some(2_200_000.0),
      Terms {
        noi: Some(165_000.0),
        debt: Some(DebtTerms {
          balance:      Some(1_400_000.0),
          assumable:    true,
          rate_percent: Some(3.25),
        }),
        urgency: Some(Urgency::High),
        benefits_sought: vec![Benefit::parse("1031 exchange"), Benefit::parse("tax deferral")],
        ..Terms::default()
      },
    )
  }

  fn single_family_want() -> Want {
    want(
      Some("single-family"),
      Some(350_000.0),
      Terms {
        urgency: Some(Urgency::High),
        benefits_sought: vec![Benefit::parse("sub-to"), Benefit::parse("assume debt")],
        ..Terms::default()
      },
    )
  }

  #[test]
  fn debt_assumption_and_urgency_overlap_scores_above_half() {
    let card = score(&multifamily_have(), &single_family_want());
    assert!(card.score > 0.5, "score was {}", card.score);
    assert_eq!(card.breakdown.get(Dimension::Benefits).unwrap().score, 1.0);
    assert_eq!(card.breakdown.get(Dimension::Urgency).unwrap().score, 1.0);
    assert!(card.breakdown.get(Dimension::Location).is_none());
  }

  #[test]
  fn zero_shared_attributes_yields_baseline() {
    let have = asset(None, None, Terms { location: Some("Austin, TX".into()), ..Terms::default() });
    let want = want(None, None, Terms { timeline_months: Some(6), ..Terms::default() });
    let card = score(&have, &want);
    assert_eq!(card.score, BASELINE_SCORE);
    assert_eq!(card.breakdown.populated(), 0);
    assert!(card.breakdown.note.is_some());
  }

  #[test]
  fn malformed_values_are_skipped_not_fatal() {
    let have = asset(None, Some(f64::NAN), Terms::default());
    let want = want(None, Some(f64::INFINITY), Terms::default());
    let card = score(&have, &want);
    assert_eq!(card.score, BASELINE_SCORE);
  }

  #[test]
  fn scores_stay_in_unit_interval() {
    let values = [None, Some(0.0), Some(1.0), Some(50_000.0), Some(9e12)];
    let urgencies = [None, Some(Urgency::Low), Some(Urgency::Immediate)];
    for hv in values {
      for wv in values {
        for hu in urgencies {
          for wu in urgencies {
            let have = asset(
              Some("office"),
              hv,
              Terms { urgency: hu, ..Terms::default() },
            );
            let want = want(
              Some("retail"),
              wv,
              Terms { urgency: wu, ..Terms::default() },
            );
            let s = score(&have, &want).score;
            assert!((0.0..=1.0).contains(&s), "out of range: {s}");
          }
        }
      }
    }
  }

  #[test]
  fn scoring_is_deterministic() {
    let a = score(&multifamily_have(), &single_family_want());
    let b = score(&multifamily_have(), &single_family_want());
    assert_eq!(a, b);
  }

  #[test]
  fn exact_category_and_overlapping_value() {
    let have = asset(Some("Duplex"), Some(400_000.0), Terms::default());
    let want = want(Some("duplex"), Some(410_000.0), Terms::default());
    let card = score(&have, &want);
    assert_eq!(card.breakdown.get(Dimension::Category).unwrap().score, 1.0);
    assert!(card.breakdown.get(Dimension::Value).unwrap().score > 0.8);
  }

  #[test]
  fn location_region_match_is_partial() {
    let have = asset(None, None, Terms { location: Some("Austin, TX".into()), ..Terms::default() });
    let want = want(None, None, Terms { location: Some("Dallas, TX".into()), ..Terms::default() });
    assert_eq!(score(&have, &want).score, 0.5);
  }

  #[test]
  fn rank_prefers_score_then_richness_then_recency() {
    let old = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let new = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
    let mut keys = vec![
      RankKey { score: 0.5, populated: 2, newest_listing_at: new },
      RankKey { score: 0.5, populated: 4, newest_listing_at: old },
      RankKey { score: 0.9, populated: 1, newest_listing_at: old },
      RankKey { score: 0.5, populated: 2, newest_listing_at: old },
    ];
    keys.sort_by(compare_rank);
    assert_eq!(keys[0].score, 0.9);
    assert_eq!(keys[1].populated, 4);
    assert_eq!(keys[2].newest_listing_at, new);
    assert_eq!(keys[3].newest_listing_at, old);
  }
}
