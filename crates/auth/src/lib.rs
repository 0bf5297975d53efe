//! `crewbook-auth` — pure authentication/authorization boundary (zero-trust).
//!
//! This crate is intentionally decoupled from HTTP and storage: it knows what
//! a membership grants and how to validate a token, never where either lives.

pub mod authorize;
pub mod claims;
pub mod jwt;
pub mod membership;
pub mod permissions;
pub mod roles;

pub use authorize::{authorize, AuthzError};
pub use claims::{JwtClaims, TokenValidationError, validate_claims};
pub use jwt::{Hs256JwtValidator, JwtValidator};
pub use membership::{ActiveContext, Company, Membership};
pub use permissions::Permission;
pub use roles::Role;
