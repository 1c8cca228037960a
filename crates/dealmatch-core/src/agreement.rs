//! Agreement drafts and their status state machine.
//!
//! ```text
//! DRAFT ──▶ IN_REVIEW ──▶ FINALIZED
//!   │           │
//!   └──▶ VOID ◀─┘
//! ```
//!
//! FINALIZED and VOID are terminal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result, matching::SuggestedStructure, user::UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgreementStatus {
  Draft,
  InReview,
  Finalized,
  Void,
}

impl AgreementStatus {
  pub fn is_terminal(self) -> bool { matches!(self, Self::Finalized | Self::Void) }

  pub fn can_transition_to(self, next: Self) -> bool {
    use AgreementStatus::*;
    matches!(
      (self, next),
      (Draft, InReview) | (InReview, Finalized) | (Draft, Void) | (InReview, Void)
    )
  }

  /// Validate a requested status change. Requesting the current status of a
  /// non-terminal draft is a no-op.
  pub fn transition(self, next: Self) -> Result<Self> {
    if self.is_terminal() {
      return Err(Error::InvalidState(format!("agreement is {self:?} and can no longer change")));
    }
    if self == next || self.can_transition_to(next) {
      Ok(next)
    } else {
      Err(Error::InvalidState(format!("cannot move agreement from {self:?} to {next:?}")))
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgreementDraft {
  pub agreement_id: Uuid,
  pub match_id:     Uuid,
  /// One of the two listing owners; the only user who may edit or delete.
  pub creator_id:   UserId,
  pub title:        String,
  pub content:      String,
  pub status:       AgreementStatus,
  /// The structure the draft was generated from.
  pub structure:    SuggestedStructure,
  pub created_at:   DateTime<Utc>,
  pub updated_at:   DateTime<Utc>,
}

/// Input to [`crate::store::MarketStore::create_agreement`]. Always persisted
/// as [`AgreementStatus::Draft`].
#[derive(Debug, Clone)]
pub struct NewAgreement {
  pub match_id:   Uuid,
  pub creator_id: UserId,
  pub title:      String,
  pub content:    String,
  pub structure:  SuggestedStructure,
}

/// A creator's edit. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgreementChanges {
  pub title:   Option<String>,
  pub content: Option<String>,
  pub status:  Option<AgreementStatus>,
}

#[cfg(test)]
mod tests {
  use super::AgreementStatus::*;
  use super::*;

  #[test]
  fn legal_transitions() {
    assert_eq!(Draft.transition(InReview).unwrap(), InReview);
    assert_eq!(InReview.transition(Finalized).unwrap(), Finalized);
    assert_eq!(Draft.transition(Void).unwrap(), Void);
    assert_eq!(InReview.transition(Void).unwrap(), Void);
    assert_eq!(Draft.transition(Draft).unwrap(), Draft);
  }

  #[test]
  fn finalized_cannot_return_to_draft() {
    assert!(matches!(Finalized.transition(Draft), Err(Error::InvalidState(_))));
  }

  #[test]
  fn terminal_states_reject_everything() {
    for next in [Draft, InReview, Finalized, Void] {
      assert!(Finalized.transition(next).is_err());
      assert!(Void.transition(next).is_err());
    }
  }

  #[test]
  fn skipping_review_is_rejected() {
    assert!(matches!(Draft.transition(Finalized), Err(Error::InvalidState(_))));
    assert!(matches!(InReview.transition(Draft), Err(Error::InvalidState(_))));
  }
}
