use std::sync::Arc;

use pagesync::state::AppState;
use pagesync::storage::{DurableStore, MemoryStore, PgStore};
use pagesync::{db, routes};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let port: u16 = std::env::var("PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()
        .expect("invalid PORT");

    let store: Arc<dyn DurableStore> = match std::env::var("DATABASE_URL") {
        Ok(url) => {
            let pool = db::init_pool(&url).await.expect("database init failed");
            Arc::new(PgStore::new(pool))
        }
        Err(_) => {
            tracing::warn!("DATABASE_URL not set; room content will not survive restarts");
            Arc::new(MemoryStore::new())
        }
    };

    let state = AppState::new(store);
    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .expect("failed to bind");

    tracing::info!(%port, "pagesync relay listening");
    axum::serve(listener, app).await.expect("server failed");
}
