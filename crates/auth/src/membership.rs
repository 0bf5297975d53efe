use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crewbook_core::{CompanyId, DomainResult, ProfileId, ValidationReport};

use crate::Role;

/// A tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Company {
    pub id: CompanyId,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl Company {
    pub const MAX_NAME_LEN: usize = 120;

    /// Validate and normalize a new company.
    pub fn new(id: CompanyId, name: &str, created_at: DateTime<Utc>) -> DomainResult<Self> {
        let name = name.trim();
        let mut report = ValidationReport::new();
        report.check(!name.is_empty(), "name", "cannot be empty");
        report.check(
            name.chars().count() <= Self::MAX_NAME_LEN,
            "name",
            "must be at most 120 characters",
        );
        report.finish()?;

        Ok(Self {
            id,
            name: name.to_string(),
            created_at,
        })
    }
}

/// A profile's membership in a company.
///
/// This is an authorization boundary object: it states *which company* the
/// profile may act within and in which role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub profile_id: ProfileId,
    pub company_id: CompanyId,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

impl Membership {
    pub fn new(profile_id: ProfileId, company_id: CompanyId, role: Role, created_at: DateTime<Utc>) -> Self {
        Self {
            profile_id,
            company_id,
            role,
            created_at,
        }
    }

    pub fn is(&self, profile_id: ProfileId, company_id: CompanyId, role: Role) -> bool {
        self.profile_id == profile_id && self.company_id == company_id && self.role == role
    }
}

/// The (company, role) pair a profile has selected to scope its requests.
///
/// One record per profile, overwritten on change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveContext {
    pub profile_id: ProfileId,
    pub company_id: CompanyId,
    pub role: Role,
    pub updated_at: DateTime<Utc>,
}

impl ActiveContext {
    /// Whether `memberships` still backs this context.
    pub fn is_backed_by(&self, memberships: &[Membership]) -> bool {
        memberships
            .iter()
            .any(|m| m.is(self.profile_id, self.company_id, self.role))
    }
}
