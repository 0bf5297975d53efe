use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crewbook_core::{CompanyId, ProfileId};

use crate::{ApprovalKind, ApprovalRequest, ApprovalStatus};

/// Resolved list filter. The company is always fixed by the caller's scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalFilter {
    pub company_id: CompanyId,
    pub status: Option<ApprovalStatus>,
    pub kind: Option<ApprovalKind>,
    pub requested_by: Option<ProfileId>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
}

impl ApprovalFilter {
    pub fn matches(&self, request: &ApprovalRequest) -> bool {
        request.company_id == self.company_id
            && self.status.is_none_or(|s| request.status == s)
            && self.kind.is_none_or(|k| request.kind == k)
            && self.requested_by.is_none_or(|p| request.requested_by == p)
            && self.created_after.is_none_or(|t| request.created_at > t)
            && self.created_before.is_none_or(|t| request.created_at < t)
    }
}
