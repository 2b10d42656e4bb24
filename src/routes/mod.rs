// src/routes/mod.rs
pub mod chat;

use crate::state::SharedState;
use axum::{
    Router,
    extract::Request,
    http::StatusCode,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
};
use chat::{chat_handler, get_meals_handler, get_metrics_handler, reset_handler};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

pub fn create_router() -> Router<SharedState> {
    let admin_routes = Router::new()
        .route("/metrics", get(get_metrics_handler))
        .layer(middleware::from_fn(auth_middleware));

    Router::new()
        .route("/chat", post(chat_handler))
        .route("/reset", post(reset_handler))
        .route("/meals/{session_id}", get(get_meals_handler))
        .nest("/admin", admin_routes)
        .route("/health", get(|| async { "OK" }))
        .fallback_service(ServeDir::new("public"))
        .layer(TraceLayer::new_for_http())
}

async fn auth_middleware(req: Request, next: Next) -> Result<Response, StatusCode> {
    // API Key check. With ADMIN_API_KEY unset everything is rejected.
    let expected = std::env::var("ADMIN_API_KEY").map_err(|_| StatusCode::UNAUTHORIZED)?;
    match req.headers().get("x-admin-key") {
        Some(val) if val.as_bytes() == expected.as_bytes() => Ok(next.run(req).await),
        _ => Err(StatusCode::UNAUTHORIZED),
    }
}
