use axum::routing::get;
use axum::Router;

pub fn router() -> Router {
    Router::new()
        .route("/", get(index))
        .route("/healthz", get(health))
}

async fn index() -> &'static str {
    "Bot is running!"
}

async fn health() -> &'static str {
    "OK"
}
