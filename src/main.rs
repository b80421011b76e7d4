mod config;
mod db;
mod entities;
mod error;
mod models;
mod movies;
mod rating;
mod reviews;
mod routes;

use std::sync::Arc;

use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{config::Config, movies::MovieStore, reviews::ReviewStore};

#[derive(Clone)]
pub struct AppState {
    pub movies: MovieStore,
    pub reviews: ReviewStore,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "info,moviecritic=debug,sqlx=warn".to_string()),
        )
        .init();

    let config = Config::from_env()?;

    let db = db::connect_and_migrate(&config.database_url, config.db_max_connections).await?;

    let state = Arc::new(AppState { movies: MovieStore::new(db.clone()), reviews: ReviewStore::new(db) });

    let app = routes::router(state)
        .layer(CorsLayer::new().allow_origin(Any).allow_headers(Any).allow_methods(Any))
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    tracing::info!(addr = %config.addr, "listening");
    axum::serve(listener, app).await?;

    Ok(())
}
