mod config;
mod db;
mod event;
mod routes;
mod services;
mod state;

use std::sync::Arc;

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt::init();

    let config = config::RelayConfig::from_env().expect("invalid relay configuration");

    let pool = db::init_pool(&config.database_url, db::PoolSettings::from_env())
        .await
        .expect("database init failed");
    let store = Arc::new(services::store::PgStore::new(pool));

    let state = state::AppState::new(store, &config);
    let [first, second] = config.participants.handles();
    tracing::info!(
        first,
        second,
        refresh_secs = config.presence_refresh.as_secs(),
        "participant pair configured"
    );

    let app = routes::app(state);
    let port = config.port;
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .expect("failed to bind");

    tracing::info!(%port, "duet-relay listening");
    axum::serve(listener, app).await.expect("server failed");
}
