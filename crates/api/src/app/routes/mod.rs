use axum::{Router, routing::get};

pub mod accounts;
pub mod actions;
pub mod system;
pub mod tiers;

/// Router for all ledger endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/actions", get(actions::list_actions))
        .nest("/accounts", accounts::router())
        .nest("/tiers", tiers::router())
}
