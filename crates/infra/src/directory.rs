//! Companies and their members.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, instrument};

use crewbook_auth::{Company, Membership, Permission, Role};
use crewbook_core::{CompanyId, DomainError, DomainResult, ProfileId};

use crate::resolver::TenantResolver;
use crate::store::{CompanyStore, MembershipStore};

/// A company together with the roles the caller holds in it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompanyWithRoles {
    #[serde(flatten)]
    pub company: Company,
    pub roles: Vec<Role>,
}

#[derive(Clone)]
pub struct CompanyDirectory {
    companies: Arc<dyn CompanyStore>,
    memberships: Arc<dyn MembershipStore>,
    resolver: TenantResolver,
}

impl CompanyDirectory {
    pub fn new(
        companies: Arc<dyn CompanyStore>,
        memberships: Arc<dyn MembershipStore>,
        resolver: TenantResolver,
    ) -> Self {
        Self {
            companies,
            memberships,
            resolver,
        }
    }

    /// Create a company owned by `actor`.
    #[instrument(skip_all, fields(actor = %actor), err)]
    pub async fn create_company(&self, actor: ProfileId, name: &str) -> DomainResult<Company> {
        let now = Utc::now();
        let company = Company::new(CompanyId::new(), name, now)?;
        let owner = Membership::new(actor, company.id, Role::Owner, now);
        self.companies.create_with_owner(company.clone(), owner).await?;
        info!(company_id = %company.id, "company created");
        Ok(company)
    }

    pub async fn companies(&self, actor: ProfileId) -> DomainResult<Vec<CompanyWithRoles>> {
        let memberships = self.resolver.memberships(actor).await?;
        let ids: Vec<CompanyId> = memberships.iter().map(|m| m.company_id).collect();
        let companies = self.companies.list_by_ids(&ids).await?;

        Ok(companies
            .into_iter()
            .map(|company| {
                let mut roles: Vec<Role> = memberships
                    .iter()
                    .filter(|m| m.company_id == company.id)
                    .map(|m| m.role)
                    .collect();
                roles.sort();
                CompanyWithRoles { company, roles }
            })
            .collect())
    }

    pub async fn members(&self, actor: ProfileId, company_id: CompanyId) -> DomainResult<Vec<Membership>> {
        self.resolver
            .require_membership(actor, company_id, Permission::MembersRead)
            .await?;
        self.resolver.members_of(company_id).await
    }

    #[instrument(skip_all, fields(actor = %actor, company_id = %company_id, profile_id = %profile_id), err)]
    pub async fn add_employee(
        &self,
        actor: ProfileId,
        company_id: CompanyId,
        profile_id: ProfileId,
    ) -> DomainResult<Membership> {
        self.resolver
            .require_membership(actor, company_id, Permission::MembersManage)
            .await?;

        let membership = Membership::new(profile_id, company_id, Role::Employee, Utc::now());
        self.memberships.insert(membership.clone()).await?;
        info!("employee added");
        Ok(membership)
    }

    /// Owners are never removed here; that goes through an owner-removal approval.
    #[instrument(skip_all, fields(actor = %actor, company_id = %company_id, profile_id = %profile_id), err)]
    pub async fn remove_employee(
        &self,
        actor: ProfileId,
        company_id: CompanyId,
        profile_id: ProfileId,
    ) -> DomainResult<()> {
        self.resolver
            .require_membership(actor, company_id, Permission::MembersManage)
            .await?;

        if !self.memberships.remove(profile_id, company_id, Role::Employee).await? {
            return Err(DomainError::not_found(format!(
                "employee {profile_id} in company {company_id}"
            )));
        }
        info!("employee removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    fn directory() -> CompanyDirectory {
        let store = Arc::new(InMemoryStore::new());
        let resolver = TenantResolver::new(store.clone(), store.clone());
        CompanyDirectory::new(store.clone(), store, resolver)
    }

    #[tokio::test]
    async fn creator_becomes_owner() {
        let dir = directory();
        let actor = ProfileId::new();
        let company = dir.create_company(actor, "  Fixit Plumbing ").await.unwrap();
        assert_eq!(company.name, "Fixit Plumbing");

        let mine = dir.companies(actor).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].roles, vec![Role::Owner]);

        assert!(matches!(
            dir.create_company(actor, "").await,
            Err(DomainError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn employee_management_requires_owner() {
        let dir = directory();
        let owner = ProfileId::new();
        let company = dir.create_company(owner, "Fixit Plumbing").await.unwrap().id;
        let employee = ProfileId::new();

        dir.add_employee(owner, company, employee).await.unwrap();
        assert!(matches!(
            dir.add_employee(owner, company, employee).await,
            Err(DomainError::Conflict(_))
        ));
        assert!(matches!(
            dir.add_employee(employee, company, ProfileId::new()).await,
            Err(DomainError::Unauthorized(_))
        ));
        assert_eq!(dir.members(employee, company).await.unwrap().len(), 2);

        dir.remove_employee(owner, company, employee).await.unwrap();
        assert!(matches!(
            dir.remove_employee(owner, company, employee).await,
            Err(DomainError::NotFound(_))
        ));
        assert!(matches!(
            dir.members(employee, company).await,
            Err(DomainError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn owners_are_not_removed_as_employees() {
        let dir = directory();
        let owner = ProfileId::new();
        let company = dir.create_company(owner, "Fixit Plumbing").await.unwrap().id;

        assert!(matches!(
            dir.remove_employee(owner, company, owner).await,
            Err(DomainError::NotFound(_))
        ));
    }
}
