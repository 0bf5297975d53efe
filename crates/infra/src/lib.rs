//! `crewbook-infra` — stores and services behind the HTTP layer.
//!
//! - [`store`]: persistence traits with in-memory and Postgres implementations
//! - [`resolver`]: tenant/role resolution and the active context
//! - [`workflow`]: the approval state machine and its effects
//! - [`directory`]: companies and their members

pub mod directory;
pub mod effects;
pub mod resolver;
pub mod store;
pub mod workflow;

pub use directory::{CompanyDirectory, CompanyWithRoles};
pub use effects::{ApprovalEffect, EffectRegistry, OwnerAdditionEffect, OwnerRemovalEffect};
pub use resolver::TenantResolver;
pub use store::{InMemoryStore, PostgresStore, StoreError};
pub use workflow::{ApprovalQuery, ApprovalWorkflow};
