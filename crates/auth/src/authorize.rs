use thiserror::Error;

use crewbook_core::{CompanyId, DomainError};

use crate::{Membership, Permission};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("not a member of company {0}")]
    NotAMember(CompanyId),

    #[error("forbidden: missing permission '{0}'")]
    Forbidden(Permission),
}

impl From<AuthzError> for DomainError {
    fn from(e: AuthzError) -> Self {
        DomainError::unauthorized(e.to_string())
    }
}

/// Authorize a profile for `required` within `company_id`.
///
/// `memberships` must be the profile's memberships as freshly read from the
/// store; never pass identifiers supplied by the client.
///
/// - No IO
/// - No panics
/// - No business logic (pure policy check)
pub fn authorize(
    memberships: &[Membership],
    company_id: CompanyId,
    required: Permission,
) -> Result<Membership, AuthzError> {
    let in_company: Vec<&Membership> = memberships
        .iter()
        .filter(|m| m.company_id == company_id)
        .collect();

    if in_company.is_empty() {
        return Err(AuthzError::NotAMember(company_id));
    }

    in_company
        .into_iter()
        .filter(|m| m.role.grants(required))
        .min_by_key(|m| m.role)
        .cloned()
        .ok_or(AuthzError::Forbidden(required))
}
