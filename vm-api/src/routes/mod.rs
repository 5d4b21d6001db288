pub mod health;
pub mod rpc;

use crate::{auth::caller_middleware, state::AppState};
use axum::{middleware, Router};
use tower_http::trace::TraceLayer;
use vm_orchestrator::Handlers;

pub fn create_app(handlers: Handlers) -> Router {
    let state = AppState::new(handlers);

    Router::new()
        .merge(health::routes())
        .merge(rpc::routes().layer(middleware::from_fn(caller_middleware)))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
