use serde::{Deserialize, Serialize};

use crewbook_core::{DomainError, DomainResult, ProfileId};

use crate::{ApprovalRequest, ApprovalStatus, Decision};

/// Decision policy applied to every request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalPolicy {
    /// Distinct approving owners required before a request is `approved`.
    pub min_approvers: u32,
    /// Whether the requester may decide their own request.
    pub allow_self_approval: bool,
}

impl Default for ApprovalPolicy {
    fn default() -> Self {
        Self {
            min_approvers: 1,
            allow_self_approval: false,
        }
    }
}

impl ApprovalPolicy {
    pub fn new(min_approvers: u32, allow_self_approval: bool) -> DomainResult<Self> {
        if min_approvers == 0 {
            return Err(DomainError::validation("min_approvers", "must be at least 1"));
        }
        Ok(Self {
            min_approvers,
            allow_self_approval,
        })
    }

    /// Whether `approver` may vote on `request`.
    ///
    /// `owner_count` is the number of owners the company currently has. A
    /// requester who is the company's only owner may decide their own request,
    /// otherwise a single-owner company could never change owners.
    pub fn check_decider(
        &self,
        request: &ApprovalRequest,
        approver: ProfileId,
        owner_count: usize,
    ) -> DomainResult<()> {
        if request.requested_by != approver || self.allow_self_approval || owner_count <= 1 {
            return Ok(());
        }
        Err(DomainError::unauthorized(
            "the requester cannot decide their own approval request",
        ))
    }

    /// Owners able to vote on a request, the requester excluded unless allowed.
    pub fn eligible_approvers(&self, owner_count: usize) -> usize {
        if self.allow_self_approval || owner_count <= 1 {
            owner_count
        } else {
            owner_count - 1
        }
    }

    /// Approvals needed given how many owners can vote.
    ///
    /// Capped so a threshold above the owner count cannot strand a request.
    pub fn required_approvals(&self, eligible_approvers: usize) -> u32 {
        let eligible = u32::try_from(eligible_approvers).unwrap_or(u32::MAX).max(1);
        self.min_approvers.min(eligible)
    }
}

/// Status a pending request moves to after a vote is recorded.
///
/// `approve_count` includes the vote just cast.
pub fn status_after_vote(decision: Decision, approve_count: u32, required: u32) -> ApprovalStatus {
    match decision {
        Decision::Reject => ApprovalStatus::Rejected,
        Decision::Approve if approve_count >= required => ApprovalStatus::Approved,
        Decision::Approve => ApprovalStatus::Pending,
    }
}

/// Result of running an approved request's side effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EffectOutcome {
    Applied,
    Failed(String),
}

impl EffectOutcome {
    pub fn status(&self) -> ApprovalStatus {
        match self {
            EffectOutcome::Applied => ApprovalStatus::Applied,
            EffectOutcome::Failed(_) => ApprovalStatus::Failed,
        }
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match self {
            EffectOutcome::Applied => None,
            EffectOutcome::Failed(reason) => Some(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use crewbook_core::{ApprovalRequestId, CompanyId};

    use super::*;
    use crate::{ApprovalKind, ApprovalTarget, NewApprovalRequest};

    fn request_by(requester: ProfileId) -> ApprovalRequest {
        NewApprovalRequest {
            company_id: CompanyId::new(),
            kind: ApprovalKind::SignOff,
            target_ref: "year-end".to_string(),
            reason: None,
        }
        .into_request(
            &ApprovalTarget::Reference("year-end".to_string()),
            requester,
            ApprovalRequestId::new(),
            Utc::now(),
        )
    }

    #[test]
    fn zero_threshold_is_rejected() {
        assert!(ApprovalPolicy::new(0, false).is_err());
        assert_eq!(ApprovalPolicy::new(1, false).unwrap(), ApprovalPolicy::default());
    }

    #[test]
    fn requester_cannot_self_decide_when_other_owners_exist() {
        let requester = ProfileId::new();
        let req = request_by(requester);
        let policy = ApprovalPolicy::default();

        assert!(matches!(
            policy.check_decider(&req, requester, 2),
            Err(DomainError::Unauthorized(_))
        ));
        assert!(policy.check_decider(&req, ProfileId::new(), 2).is_ok());
    }

    #[test]
    fn sole_owner_may_self_decide() {
        let requester = ProfileId::new();
        let req = request_by(requester);
        assert!(ApprovalPolicy::default().check_decider(&req, requester, 1).is_ok());
    }

    #[test]
    fn self_approval_can_be_enabled() {
        let requester = ProfileId::new();
        let req = request_by(requester);
        let policy = ApprovalPolicy::new(1, true).unwrap();
        assert!(policy.check_decider(&req, requester, 3).is_ok());
    }

    #[test]
    fn threshold_is_capped_by_eligible_owners() {
        let policy = ApprovalPolicy::new(3, false).unwrap();
        assert_eq!(policy.required_approvals(5), 3);
        assert_eq!(policy.required_approvals(2), 2);
        assert_eq!(policy.required_approvals(0), 1);
    }

    #[test]
    fn requester_is_not_counted_as_eligible() {
        let policy = ApprovalPolicy::new(2, false).unwrap();
        assert_eq!(policy.eligible_approvers(3), 2);
        assert_eq!(policy.eligible_approvers(1), 1);
        assert_eq!(ApprovalPolicy::new(2, true).unwrap().eligible_approvers(3), 3);
    }

    #[test]
    fn votes_resolve_status() {
        assert_eq!(status_after_vote(Decision::Reject, 0, 2), ApprovalStatus::Rejected);
        assert_eq!(status_after_vote(Decision::Approve, 1, 2), ApprovalStatus::Pending);
        assert_eq!(status_after_vote(Decision::Approve, 2, 2), ApprovalStatus::Approved);
    }
}
