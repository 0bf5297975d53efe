use std::sync::Arc;

use anyhow::Context;

use crewbook_approvals::ApprovalPolicy;
use crewbook_infra::store::{ActiveContextStore, ApprovalStore, CompanyStore, MembershipStore};
use crewbook_infra::{ApprovalWorkflow, CompanyDirectory, EffectRegistry, InMemoryStore, PostgresStore, TenantResolver};

use crate::config::AppConfig;

/// Service handles shared by every handler.
#[derive(Clone)]
pub struct AppServices {
    pub resolver: TenantResolver,
    pub approvals: ApprovalWorkflow,
    pub directory: CompanyDirectory,
}

impl AppServices {
    /// Wire every service over a single backing store.
    pub fn from_store<S>(store: Arc<S>, policy: ApprovalPolicy) -> Self
    where
        S: CompanyStore + MembershipStore + ActiveContextStore + ApprovalStore + 'static,
    {
        let resolver = TenantResolver::new(store.clone(), store.clone());
        let effects = EffectRegistry::standard(store.clone());
        let approvals = ApprovalWorkflow::new(store.clone(), resolver.clone(), effects, policy);
        let directory = CompanyDirectory::new(store.clone(), store, resolver.clone());

        Self {
            resolver,
            approvals,
            directory,
        }
    }
}

/// Postgres when `DATABASE_URL` is set, in-memory otherwise.
pub async fn build_services(config: &AppConfig) -> anyhow::Result<AppServices> {
    match config.database_url.as_deref() {
        Some(url) => {
            let store = PostgresStore::connect(url)
                .await
                .context("failed to connect to postgres")?;
            store
                .ensure_schema()
                .await
                .context("failed to apply database schema")?;
            tracing::info!("using postgres store");
            Ok(AppServices::from_store(Arc::new(store), config.approvals))
        }
        None => {
            tracing::warn!("DATABASE_URL not set; state is in-memory and lost on restart");
            Ok(AppServices::from_store(Arc::new(InMemoryStore::new()), config.approvals))
        }
    }
}
