use hooks_core::clock::Clock;
use hooks_worker::{Dispatcher, Executor};
use sqlx::PgPool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub dispatcher: Dispatcher,
    pub executor: Executor,
    pub clock: Arc<dyn Clock>,
    pub hooks_env: String,
    pub admin_token: Arc<str>,
}

#[derive(Debug, Clone)]
pub struct RequestId(pub String);
