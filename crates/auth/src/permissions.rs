use serde::Serialize;

/// Permission identifier.
///
/// Permissions are never stored on memberships; they are derived from the
/// membership's [`crate::Role`] at check time.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum Permission {
    #[serde(rename = "company.read")]
    CompanyRead,
    #[serde(rename = "members.read")]
    MembersRead,
    #[serde(rename = "members.manage")]
    MembersManage,
    /// Read every approval request of the company.
    #[serde(rename = "approvals.read")]
    ApprovalsRead,
    /// Read only the approval requests the profile authored.
    #[serde(rename = "approvals.read_own")]
    ApprovalsReadOwn,
    #[serde(rename = "approvals.request")]
    ApprovalsRequest,
    #[serde(rename = "approvals.decide")]
    ApprovalsDecide,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::CompanyRead => "company.read",
            Permission::MembersRead => "members.read",
            Permission::MembersManage => "members.manage",
            Permission::ApprovalsRead => "approvals.read",
            Permission::ApprovalsReadOwn => "approvals.read_own",
            Permission::ApprovalsRequest => "approvals.request",
            Permission::ApprovalsDecide => "approvals.decide",
        }
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}
