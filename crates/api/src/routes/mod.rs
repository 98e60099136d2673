pub mod deliveries;
pub mod events;
pub mod health;
pub mod subscriptions;

use axum::Router;

use crate::state::AppState;

pub fn v1_router(state: AppState) -> Router {
    Router::new()
        .merge(subscriptions::router(state.clone()))
        .merge(deliveries::router(state.clone()))
        .merge(events::router(state))
}

pub fn health_router(state: AppState) -> Router {
    health::router(state)
}
