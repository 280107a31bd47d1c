//! HTTP routes

pub mod health;
pub mod hooks;

use axum::{Router, routing};

use crate::SharedState;

pub use health::root;
pub use hooks::handle_hook;

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/", routing::get(root))
        .route("/hooks/{branch}", routing::post(handle_hook))
        .with_state(state)
}
