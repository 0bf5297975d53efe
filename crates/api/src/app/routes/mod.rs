use axum::{routing::get, Router};

pub mod approvals;
pub mod companies;
pub mod context;
pub mod system;

/// Router for all authenticated endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .nest("/context", context::router())
        .nest("/companies", companies::router())
        .nest("/approvals", approvals::router())
}
