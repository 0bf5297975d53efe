//! Side effects run once an approval request is approved.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crewbook_approvals::{ApprovalKind, ApprovalRequest, ApprovalTarget, EffectOutcome};
use crewbook_auth::{Membership, Role};
use crewbook_core::{DomainResult, ProfileId};

use crate::store::{MembershipStore, StoreError};

/// A downstream mutation gated behind an approval kind.
///
/// Implementations report business failures as [`EffectOutcome::Failed`];
/// `Err` is reserved for infrastructure failures, which are recorded as
/// failures too so the request never stays claimed but unresolved.
#[async_trait::async_trait]
pub trait ApprovalEffect: Send + Sync {
    async fn apply(&self, request: &ApprovalRequest, now: DateTime<Utc>) -> DomainResult<EffectOutcome>;
}

fn target_profile(request: &ApprovalRequest) -> DomainResult<Option<ProfileId>> {
    Ok(match request.target()? {
        ApprovalTarget::Profile(p) => Some(p),
        ApprovalTarget::Reference(_) => None,
    })
}

/// Deletes the target's owner membership, never the company's last owner.
pub struct OwnerRemovalEffect {
    memberships: Arc<dyn MembershipStore>,
}

impl OwnerRemovalEffect {
    pub fn new(memberships: Arc<dyn MembershipStore>) -> Self {
        Self { memberships }
    }
}

#[async_trait::async_trait]
impl ApprovalEffect for OwnerRemovalEffect {
    async fn apply(&self, request: &ApprovalRequest, _now: DateTime<Utc>) -> DomainResult<EffectOutcome> {
        let Some(target) = target_profile(request)? else {
            return Ok(EffectOutcome::Failed("target is not a profile".to_string()));
        };

        if self
            .memberships
            .remove_owner_if_not_last(target, request.company_id)
            .await?
        {
            info!(company_id = %request.company_id, profile_id = %target, "owner removed");
            return Ok(EffectOutcome::Applied);
        }

        let still_owner = self
            .memberships
            .members_of(request.company_id)
            .await?
            .iter()
            .any(|m| m.is(target, request.company_id, Role::Owner));
        let reason = if still_owner {
            "cannot remove the company's last owner"
        } else {
            "target is no longer an owner"
        };
        warn!(company_id = %request.company_id, profile_id = %target, reason, "owner removal failed");
        Ok(EffectOutcome::Failed(reason.to_string()))
    }
}

/// Inserts an owner membership for the target.
pub struct OwnerAdditionEffect {
    memberships: Arc<dyn MembershipStore>,
}

impl OwnerAdditionEffect {
    pub fn new(memberships: Arc<dyn MembershipStore>) -> Self {
        Self { memberships }
    }
}

#[async_trait::async_trait]
impl ApprovalEffect for OwnerAdditionEffect {
    async fn apply(&self, request: &ApprovalRequest, now: DateTime<Utc>) -> DomainResult<EffectOutcome> {
        let Some(target) = target_profile(request)? else {
            return Ok(EffectOutcome::Failed("target is not a profile".to_string()));
        };

        match self
            .memberships
            .insert(Membership::new(target, request.company_id, Role::Owner, now))
            .await
        {
            Ok(()) => {
                info!(company_id = %request.company_id, profile_id = %target, "owner added");
                Ok(EffectOutcome::Applied)
            }
            Err(StoreError::Conflict(_)) => Ok(EffectOutcome::Failed("target is already an owner".to_string())),
            Err(StoreError::NotFound(_)) => Ok(EffectOutcome::Failed("company no longer exists".to_string())),
            Err(e) => Err(e.into()),
        }
    }
}

/// Effects keyed by approval kind. Kinds without an entry have no effect.
#[derive(Default, Clone)]
pub struct EffectRegistry {
    effects: HashMap<ApprovalKind, Arc<dyn ApprovalEffect>>,
}

impl EffectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Owner removal and owner addition backed by `memberships`.
    pub fn standard(memberships: Arc<dyn MembershipStore>) -> Self {
        Self::new()
            .with(
                ApprovalKind::OwnerRemoval,
                Arc::new(OwnerRemovalEffect::new(memberships.clone())),
            )
            .with(
                ApprovalKind::OwnerAddition,
                Arc::new(OwnerAdditionEffect::new(memberships)),
            )
    }

    pub fn with(mut self, kind: ApprovalKind, effect: Arc<dyn ApprovalEffect>) -> Self {
        self.effects.insert(kind, effect);
        self
    }

    pub fn get(&self, kind: ApprovalKind) -> Option<Arc<dyn ApprovalEffect>> {
        self.effects.get(&kind).cloned()
    }
}
