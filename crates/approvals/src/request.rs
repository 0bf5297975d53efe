use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crewbook_core::{
    ApprovalRequestId, CompanyId, DecisionId, DomainError, DomainResult, ProfileId, ValidationReport,
};

use crate::{ApprovalKind, ApprovalStatus, ApprovalTarget};

/// A generic approval request gating a sensitive mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: ApprovalRequestId,
    pub company_id: CompanyId,
    pub kind: ApprovalKind,
    pub target_ref: String,
    pub reason: Option<String>,
    pub requested_by: ProfileId,
    pub status: ApprovalStatus,
    pub created_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
    pub decided_by: Option<ProfileId>,
    pub effect_attempted_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
}

impl ApprovalRequest {
    /// Parsed target. Stored rows were validated on creation.
    pub fn target(&self) -> DomainResult<ApprovalTarget> {
        self.kind
            .parse_target(&self.target_ref)
            .map_err(|e| DomainError::internal(format!("stored target_ref is invalid: {}", e.message)))
    }

    pub fn is_pending(&self) -> bool {
        self.status == ApprovalStatus::Pending
    }

    /// Whether no further transition can happen.
    pub fn is_final(&self) -> bool {
        self.status.is_terminal() || (self.status == ApprovalStatus::Approved && !self.kind.has_effect())
    }

    /// Approved, effect-bearing and not yet claimed.
    pub fn awaits_effect(&self) -> bool {
        self.status == ApprovalStatus::Approved && self.kind.has_effect() && self.effect_attempted_at.is_none()
    }

    pub fn ensure_pending(&self) -> DomainResult<()> {
        if self.is_pending() {
            Ok(())
        } else {
            Err(DomainError::conflict(format!(
                "approval request {} is {}, not pending",
                self.id, self.status
            )))
        }
    }
}

/// Input for creating an approval request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewApprovalRequest {
    pub company_id: CompanyId,
    pub kind: ApprovalKind,
    pub target_ref: String,
    pub reason: Option<String>,
}

impl NewApprovalRequest {
    pub const MAX_REASON_LEN: usize = 1000;

    /// Kind-specific validation. Returns the parsed target.
    pub fn validate(&self) -> DomainResult<ApprovalTarget> {
        let mut report = ValidationReport::new();
        let target = match self.kind.parse_target(&self.target_ref) {
            Ok(t) => Some(t),
            Err(e) => {
                report.push(e);
                None
            }
        };
        if let Some(reason) = &self.reason {
            report.check(
                reason.chars().count() <= Self::MAX_REASON_LEN,
                "reason",
                "must be at most 1000 characters",
            );
        }
        report.finish()?;
        target.ok_or_else(|| DomainError::internal("target missing after validation"))
    }

    /// Build the pending record from the target [`Self::validate`] returned.
    pub fn into_request(
        self,
        target: &ApprovalTarget,
        requested_by: ProfileId,
        id: ApprovalRequestId,
        now: DateTime<Utc>,
    ) -> ApprovalRequest {
        let reason = self
            .reason
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty());
        ApprovalRequest {
            id,
            company_id: self.company_id,
            kind: self.kind,
            target_ref: target.to_ref(),
            reason,
            requested_by,
            status: ApprovalStatus::Pending,
            created_at: now,
            decided_at: None,
            decided_by: None,
            effect_attempted_at: None,
            resolved_at: None,
            failure_reason: None,
        }
    }
}

/// One approver's vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Reject,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Approve => "approve",
            Decision::Reject => "reject",
        }
    }
}

impl core::fmt::Display for Decision {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Decision {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "approve" => Ok(Decision::Approve),
            "reject" => Ok(Decision::Reject),
            _ => Err(DomainError::validation("decision", "must be one of: approve, reject")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalDecision {
    pub id: DecisionId,
    pub request_id: ApprovalRequestId,
    pub approver_id: ProfileId,
    pub decision: Decision,
    pub comment: Option<String>,
    pub decided_at: DateTime<Utc>,
}

impl ApprovalDecision {
    pub fn new(
        request_id: ApprovalRequestId,
        approver_id: ProfileId,
        decision: Decision,
        comment: Option<String>,
        decided_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: DecisionId::new(),
            request_id,
            approver_id,
            decision,
            comment: comment.map(|c| c.trim().to_string()).filter(|c| !c.is_empty()),
            decided_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_request(kind: ApprovalKind, target_ref: &str) -> NewApprovalRequest {
        NewApprovalRequest {
            company_id: CompanyId::new(),
            kind,
            target_ref: target_ref.to_string(),
            reason: Some("  leaving the business ".to_string()),
        }
    }

    fn pending(kind: ApprovalKind, target_ref: &str) -> ApprovalRequest {
        let input = new_request(kind, target_ref);
        let target = input.validate().unwrap();
        input.into_request(&target, ProfileId::new(), ApprovalRequestId::new(), Utc::now())
    }

    #[test]
    fn into_request_starts_pending_and_normalizes() {
        let target = ProfileId::new();
        let input = new_request(ApprovalKind::OwnerRemoval, &format!(" {target} "));
        assert_eq!(input.validate().unwrap(), ApprovalTarget::Profile(target));

        let requester = ProfileId::new();
        let parsed = input.validate().unwrap();
        let req = input.into_request(&parsed, requester, ApprovalRequestId::new(), Utc::now());
        assert_eq!(req.status, ApprovalStatus::Pending);
        assert_eq!(req.target_ref, target.to_string());
        assert_eq!(req.reason.as_deref(), Some("leaving the business"));
        assert_eq!(req.requested_by, requester);
        assert!(req.decided_at.is_none() && req.effect_attempted_at.is_none());
    }

    #[test]
    fn profile_targets_are_stored_canonically() {
        let target = ProfileId::new();
        let hyphenless = target.as_uuid().simple().to_string();
        for spelling in [target.to_string().to_uppercase(), hyphenless, format!("{{{target}}}")] {
            assert_eq!(pending(ApprovalKind::OwnerAddition, &spelling).target_ref, target.to_string());
        }
        assert_eq!(pending(ApprovalKind::SignOff, "  Invoice 7 ").target_ref, "Invoice 7");
    }

    #[test]
    fn validate_reports_every_bad_field() {
        let mut input = new_request(ApprovalKind::OwnerAddition, "someone");
        input.reason = Some("x".repeat(1001));

        let Err(DomainError::Validation(fields)) = input.validate() else {
            panic!("expected validation error");
        };
        let names: Vec<_> = fields.iter().map(|f| f.field.as_str()).collect();
        assert_eq!(names, vec!["target_ref", "reason"]);
    }

    #[test]
    fn approved_sign_off_is_final_but_owner_change_is_not() {
        let mut sign_off = pending(ApprovalKind::SignOff, "march payroll");
        sign_off.status = ApprovalStatus::Approved;
        assert!(sign_off.is_final());
        assert!(!sign_off.awaits_effect());

        let mut removal = pending(ApprovalKind::OwnerRemoval, &ProfileId::new().to_string());
        removal.status = ApprovalStatus::Approved;
        assert!(!removal.is_final());
        assert!(removal.awaits_effect());
    }

    #[test]
    fn ensure_pending_is_conflict_otherwise() {
        let mut req = pending(ApprovalKind::SignOff, "q3 close");
        assert!(req.ensure_pending().is_ok());
        req.status = ApprovalStatus::Cancelled;
        assert!(matches!(req.ensure_pending(), Err(DomainError::Conflict(_))));
    }

    #[test]
    fn blank_comments_are_dropped() {
        let d = ApprovalDecision::new(
            ApprovalRequestId::new(),
            ProfileId::new(),
            Decision::Approve,
            Some("   ".to_string()),
            Utc::now(),
        );
        assert!(d.comment.is_none());
        assert_eq!(serde_json::to_value(d.decision).unwrap(), "approve");
    }
}
