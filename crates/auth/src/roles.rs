use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crewbook_core::DomainError;

use crate::Permission;

/// Role a profile holds within a company.
///
/// Closed set: unknown role strings are rejected at the boundary.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Owner,
    Employee,
}

const OWNER_PERMISSIONS: &[Permission] = &[
    Permission::CompanyRead,
    Permission::MembersRead,
    Permission::MembersManage,
    Permission::ApprovalsRead,
    Permission::ApprovalsReadOwn,
    Permission::ApprovalsRequest,
    Permission::ApprovalsDecide,
];

const EMPLOYEE_PERMISSIONS: &[Permission] = &[
    Permission::CompanyRead,
    Permission::MembersRead,
    Permission::ApprovalsReadOwn,
];

impl Role {
    pub const ALL: [Role; 2] = [Role::Owner, Role::Employee];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Owner => "owner",
            Role::Employee => "employee",
        }
    }

    pub fn permissions(&self) -> &'static [Permission] {
        match self {
            Role::Owner => OWNER_PERMISSIONS,
            Role::Employee => EMPLOYEE_PERMISSIONS,
        }
    }

    pub fn grants(&self, permission: Permission) -> bool {
        self.permissions().contains(&permission)
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "owner" => Ok(Role::Owner),
            "employee" => Ok(Role::Employee),
            _ => Err(DomainError::validation("role", "must be one of: owner, employee")),
        }
    }
}
