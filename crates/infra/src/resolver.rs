//! Tenant/role resolution.
//!
//! The allowed set is re-derived from the membership store on every call.
//! Company ids and roles supplied by clients are only ever checked against it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};

use crewbook_auth::{authorize, ActiveContext, Membership, Permission, Role};
use crewbook_core::{CompanyId, DomainError, DomainResult, ProfileId};

use crate::store::{ActiveContextStore, MembershipStore};

#[derive(Clone)]
pub struct TenantResolver {
    memberships: Arc<dyn MembershipStore>,
    contexts: Arc<dyn ActiveContextStore>,
}

impl TenantResolver {
    pub fn new(memberships: Arc<dyn MembershipStore>, contexts: Arc<dyn ActiveContextStore>) -> Self {
        Self { memberships, contexts }
    }

    /// Every (company, role) pair the profile holds.
    pub async fn memberships(&self, profile_id: ProfileId) -> DomainResult<Vec<Membership>> {
        Ok(self.memberships.memberships_for(profile_id).await?)
    }

    /// Members of a company, without any permission check.
    pub async fn members_of(&self, company_id: CompanyId) -> DomainResult<Vec<Membership>> {
        Ok(self.memberships.members_of(company_id).await?)
    }

    pub async fn owner_count(&self, company_id: CompanyId) -> DomainResult<usize> {
        Ok(self
            .members_of(company_id)
            .await?
            .iter()
            .filter(|m| m.role == Role::Owner)
            .count())
    }

    pub async fn is_owner(&self, profile_id: ProfileId, company_id: CompanyId) -> DomainResult<bool> {
        Ok(self
            .memberships(profile_id)
            .await?
            .iter()
            .any(|m| m.is(profile_id, company_id, Role::Owner)))
    }

    #[instrument(skip_all, fields(profile_id = %profile_id, company_id = %company_id, role = %role))]
    pub async fn set_active_context(
        &self,
        profile_id: ProfileId,
        company_id: CompanyId,
        role: Role,
        now: DateTime<Utc>,
    ) -> DomainResult<ActiveContext> {
        let memberships = self.memberships(profile_id).await?;
        if !memberships.iter().any(|m| m.is(profile_id, company_id, role)) {
            warn!("active context rejected: no matching membership");
            return Err(DomainError::unauthorized(format!(
                "no {role} membership in company {company_id}"
            )));
        }

        let context = ActiveContext {
            profile_id,
            company_id,
            role,
            updated_at: now,
        };
        self.contexts.upsert(context.clone()).await.map_err(|e| match DomainError::from(e) {
            // Membership removed between the check and the write.
            DomainError::NotFound(_) => DomainError::unauthorized(format!(
                "no {role} membership in company {company_id}"
            )),
            other => other,
        })?;
        info!("active context set");
        Ok(context)
    }

    /// The profile's active context, if it is still backed by a membership.
    ///
    /// A stale record is cleared and reported as absent.
    pub async fn active_context(&self, profile_id: ProfileId) -> DomainResult<Option<ActiveContext>> {
        let Some(context) = self.contexts.get(profile_id).await? else {
            return Ok(None);
        };
        let memberships = self.memberships(profile_id).await?;
        if context.is_backed_by(&memberships) {
            return Ok(Some(context));
        }

        warn!(
            profile_id = %profile_id,
            company_id = %context.company_id,
            role = %context.role,
            "clearing stale active context"
        );
        self.contexts.clear(profile_id).await?;
        Ok(None)
    }

    pub async fn clear_active_context(&self, profile_id: ProfileId) -> DomainResult<()> {
        self.contexts.clear(profile_id).await?;
        Ok(())
    }

    /// The membership through which `profile_id` holds `permission` in `company_id`.
    pub async fn require_membership(
        &self,
        profile_id: ProfileId,
        company_id: CompanyId,
        permission: Permission,
    ) -> DomainResult<Membership> {
        let memberships = self.memberships(profile_id).await?;
        authorize(&memberships, company_id, permission).map_err(|e| {
            warn!(profile_id = %profile_id, company_id = %company_id, error = %e, "authorization denied");
            DomainError::from(e)
        })
    }

    /// Companies where the profile holds `permission`.
    pub async fn allowed_companies(
        &self,
        profile_id: ProfileId,
        permission: Permission,
    ) -> DomainResult<Vec<CompanyId>> {
        let mut companies: Vec<CompanyId> = self
            .memberships(profile_id)
            .await?
            .into_iter()
            .filter(|m| m.role.grants(permission))
            .map(|m| m.company_id)
            .collect();
        companies.sort();
        companies.dedup();
        Ok(companies)
    }
}

#[cfg(test)]
mod tests {
    use crewbook_auth::Company;

    use super::*;
    use crate::store::{CompanyStore, InMemoryStore};

    async fn setup() -> (Arc<InMemoryStore>, TenantResolver, CompanyId, ProfileId) {
        let store = Arc::new(InMemoryStore::new());
        let owner = ProfileId::new();
        let company = Company::new(CompanyId::new(), "Northwind Cleaning", Utc::now()).unwrap();
        let company_id = company.id;
        store
            .create_with_owner(company, Membership::new(owner, company_id, Role::Owner, Utc::now()))
            .await
            .unwrap();
        let resolver = TenantResolver::new(store.clone(), store.clone());
        (store, resolver, company_id, owner)
    }

    #[tokio::test]
    async fn context_requires_exact_membership() {
        let (_, resolver, company, owner) = setup().await;

        let ctx = resolver
            .set_active_context(owner, company, Role::Owner, Utc::now())
            .await
            .unwrap();
        assert_eq!(resolver.active_context(owner).await.unwrap(), Some(ctx));

        let err = resolver
            .set_active_context(owner, company, Role::Employee, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Unauthorized(_)));

        let stranger = ProfileId::new();
        assert!(resolver
            .set_active_context(stranger, company, Role::Owner, Utc::now())
            .await
            .is_err());
        assert_eq!(resolver.active_context(stranger).await.unwrap(), None);
    }

    #[tokio::test]
    async fn revoked_membership_invalidates_context() {
        let (store, resolver, company, _) = setup().await;
        let employee = ProfileId::new();
        store
            .insert(Membership::new(employee, company, Role::Employee, Utc::now()))
            .await
            .unwrap();
        resolver
            .set_active_context(employee, company, Role::Employee, Utc::now())
            .await
            .unwrap();

        store.remove(employee, company, Role::Employee).await.unwrap();
        assert_eq!(resolver.active_context(employee).await.unwrap(), None);
        assert!(resolver
            .require_membership(employee, company, Permission::CompanyRead)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn allowed_companies_follow_permissions() {
        let (store, resolver, company, owner) = setup().await;
        let employee = ProfileId::new();
        store
            .insert(Membership::new(employee, company, Role::Employee, Utc::now()))
            .await
            .unwrap();

        assert_eq!(
            resolver.allowed_companies(owner, Permission::ApprovalsDecide).await.unwrap(),
            vec![company]
        );
        assert!(resolver
            .allowed_companies(employee, Permission::ApprovalsDecide)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            resolver.allowed_companies(employee, Permission::CompanyRead).await.unwrap(),
            vec![company]
        );
    }

    #[tokio::test]
    async fn require_membership_returns_granting_role() {
        let (_, resolver, company, owner) = setup().await;
        let m = resolver
            .require_membership(owner, company, Permission::MembersManage)
            .await
            .unwrap();
        assert_eq!(m.role, Role::Owner);
        assert_eq!(resolver.owner_count(company).await.unwrap(), 1);
        assert!(resolver.is_owner(owner, company).await.unwrap());
    }
}
