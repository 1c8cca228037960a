//! [`AgreementWorkflow`]: participant-only creation and creator-only edits
//! of agreement drafts.
//!
//! Status changes follow [`AgreementStatus::transition`]. Edits are applied
//! with a compare-and-set on the status the edit was validated against, so
//! two concurrent transitions cannot both succeed.

use std::sync::Arc;

use dealmatch_augment::{
  Augmenter,
  drafting::{DraftRequest, Party, PartyRole},
};
use dealmatch_core::{
  Error, Result,
  agreement::{AgreementChanges, AgreementDraft, AgreementStatus, NewAgreement},
  completion::TextCompleter,
  matching::{Match, SuggestedStructure},
  store::MarketStore,
  user::UserId,
};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::match_repo::participants;

/// Which structure a new draft starts from.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum StructureChoice {
  /// Index into the match's suggested structures.
  Index(usize),
  /// A structure supplied by the caller, e.g. an edited suggestion.
  Custom(SuggestedStructure),
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateDraft {
  pub match_id:  Uuid,
  pub structure: StructureChoice,
  /// Replaces the structure's key terms when present.
  #[serde(default)]
  pub key_terms: Option<Vec<String>>,
  #[serde(default)]
  pub title:     Option<String>,
}

pub struct AgreementWorkflow<S, C> {
  store:     Arc<S>,
  augmenter: Arc<Augmenter<C>>,
}

impl<S: MarketStore, C: TextCompleter> AgreementWorkflow<S, C> {
  pub fn new(store: Arc<S>, augmenter: Arc<Augmenter<C>>) -> Self { Self { store, augmenter } }

  async fn load_match(&self, id: Uuid) -> Result<Match> {
    self
      .store
      .get_match(id)
      .await
      .map_err(Error::store)?
      .ok_or_else(|| Error::not_found("match", id))
  }

  async fn load_draft(&self, id: Uuid) -> Result<AgreementDraft> {
    self
      .store
      .get_agreement(id)
      .await
      .map_err(Error::store)?
      .ok_or_else(|| Error::not_found("agreement", id))
  }

  async fn require_participant(&self, caller: &UserId, m: &Match) -> Result<[UserId; 2]> {
    let owners = participants(self.store.as_ref(), m).await?;
    if owners.contains(caller) {
      Ok(owners)
    } else {
      Err(Error::Authorization(format!(
        "only the owners of the listings in match {} may do this",
        m.match_id
      )))
    }
  }

  /// Creator-only access to an existing draft.
  async fn load_own_draft(&self, caller: &UserId, id: Uuid) -> Result<AgreementDraft> {
    let draft = self.load_draft(id).await?;
    if &draft.creator_id != caller {
      return Err(Error::Authorization(format!(
        "only the creator of agreement {id} may change it"
      )));
    }
    Ok(draft)
  }

  async fn parties(&self, m: &Match, owners: &[UserId; 2]) -> Result<Vec<Party>> {
    let roles = [
      (PartyRole::Offering, m.have_listing_id, &owners[0]),
      (PartyRole::Seeking, m.want_listing_id, &owners[1]),
    ];
    let mut parties = Vec::with_capacity(2);
    for (role, listing_id, owner) in roles {
      let name = self
        .store
        .get_user(owner.clone())
        .await
        .map_err(Error::store)?
        .map_or_else(|| owner.to_string(), |u| u.label().to_owned());
      let listing_title = self
        .store
        .get_listing(listing_id)
        .await
        .map_err(Error::store)?
        .map(|l| l.payload.title().to_owned())
        .unwrap_or_default();
      parties.push(Party { role, name, listing_title });
    }
    Ok(parties)
  }

  /// Draft an agreement from one structure of a match. Either participant
  /// may create; the caller becomes the creator.
  pub async fn create(&self, caller: &UserId, input: CreateDraft) -> Result<AgreementDraft> {
    let m = self.load_match(input.match_id).await?;
    let owners = self.require_participant(caller, &m).await?;

    let structure = match input.structure {
      StructureChoice::Index(i) => m.structures.get(i).cloned().ok_or_else(|| {
        Error::Validation(format!(
          "match {} has {} suggested structures; index {i} is out of range",
          m.match_id,
          m.structures.len()
        ))
      })?,
      StructureChoice::Custom(s) => {
        s.validate()?;
        s
      }
    };

    let key_terms = input.key_terms.unwrap_or_else(|| structure.key_terms.clone());
    let request = DraftRequest {
      parties: self.parties(&m, &owners).await?,
      structure: structure.clone(),
      key_terms,
      title: input.title,
    };
    let drafted = self.augmenter.draft_agreement(&request).await;

    let draft = self
      .store
      .create_agreement(NewAgreement {
        match_id: m.match_id,
        creator_id: caller.clone(),
        title: drafted.title,
        content: drafted.content,
        structure,
      })
      .await
      .map_err(Error::store)?;

    info!(
      agreement_id = %draft.agreement_id,
      match_id = %m.match_id,
      user_id = %caller,
      degraded = drafted.degraded,
      "agreement draft created"
    );
    Ok(draft)
  }

  pub async fn get(&self, caller: &UserId, id: Uuid) -> Result<AgreementDraft> {
    let draft = self.load_draft(id).await?;
    let m = self.load_match(draft.match_id).await?;
    self.require_participant(caller, &m).await?;
    Ok(draft)
  }

  pub async fn list_for_match(&self, caller: &UserId, match_id: Uuid) -> Result<Vec<AgreementDraft>> {
    let m = self.load_match(match_id).await?;
    self.require_participant(caller, &m).await?;
    self
      .store
      .list_agreements_for_match(match_id)
      .await
      .map_err(Error::store)
  }

  /// Apply the creator's edit of title, content and/or status.
  pub async fn update(
    &self,
    caller: &UserId,
    id: Uuid,
    changes: AgreementChanges,
  ) -> Result<AgreementDraft> {
    let draft = self.load_own_draft(caller, id).await?;
    if changes.title.is_none() && changes.content.is_none() && changes.status.is_none() {
      return Err(Error::Validation("nothing to update".into()));
    }
    if changes.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
      return Err(Error::Validation("agreement title must not be empty".into()));
    }

    let current = draft.status;
    if current.is_terminal() {
      return Err(Error::InvalidState(format!(
        "agreement {id} is {current:?} and can no longer be edited"
      )));
    }
    if let Some(next) = changes.status {
      current.transition(next)?;
    }

    let updated = self
      .store
      .update_agreement(id, current, changes)
      .await
      .map_err(Error::store)?;

    match updated {
      Some(draft) => {
        info!(agreement_id = %id, status = ?draft.status, "agreement draft updated");
        Ok(draft)
      }
      None => {
        // Either deleted or moved on since we read it.
        self.load_draft(id).await?;
        Err(Error::InvalidState(format!("agreement {id} changed concurrently; reload and retry")))
      }
    }
  }

  /// Remove a non-terminal draft. The match is untouched.
  pub async fn delete(&self, caller: &UserId, id: Uuid) -> Result<()> {
    let draft = self.load_own_draft(caller, id).await?;
    if draft.status.is_terminal() {
      return Err(Error::InvalidState(format!(
        "agreement {id} is {:?} and cannot be deleted",
        draft.status
      )));
    }
    if !self.store.delete_agreement(id).await.map_err(Error::store)? {
      return Err(Error::not_found("agreement", id));
    }
    info!(agreement_id = %id, match_id = %draft.match_id, "agreement draft deleted");
    Ok(())
  }
}
