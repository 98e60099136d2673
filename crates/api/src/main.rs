use anyhow::Context;
use axum::{
    middleware::{from_fn, from_fn_with_state},
    Router,
};
use hooks_core::clock::{Clock, SystemClock};
use hooks_core::config::Settings;
use hooks_db::PgStore;
use hooks_worker::{DeliveryContext, Dispatcher, Executor};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

mod error;
mod extract;
mod middleware;
mod routes;
mod state;

use crate::middleware::auth::admin_auth;
use crate::middleware::request_id::request_id;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    let settings = Settings::from_env().context("DATABASE_URL or HOOKS_DATABASE_URL must be set")?;
    let admin_token = settings
        .admin_token
        .clone()
        .context("HOOKS_ADMIN_TOKEN must be set")?;

    let db = hooks_db::connect(&settings.database_url, 10).await?;
    hooks_db::migrate(&db).await?;

    let store = Arc::new(PgStore::new(db.clone()));
    let executor =
        Executor::new(settings.delivery_timeout())?.with_body_limit(settings.response_body_limit);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let dispatcher = Dispatcher::new(DeliveryContext::new(
        store.clone(),
        store,
        executor.clone(),
        clock.clone(),
    ));

    let state = AppState {
        db,
        dispatcher: dispatcher.clone(),
        executor,
        clock,
        hooks_env: settings.hooks_env.clone(),
        admin_token: Arc::from(admin_token),
    };

    let v1 = routes::v1_router(state.clone()).layer(from_fn_with_state(state.clone(), admin_auth));

    let app = Router::new()
        .merge(routes::health_router(state))
        .merge(v1)
        .layer(from_fn(request_id));

    let addr: SocketAddr = settings.api_bind.parse()?;

    info!(%addr, env = %settings.hooks_env, "starting api");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await?;

    dispatcher.drain().await;
    info!("api stopped");

    Ok(())
}
