pub mod chat;
pub mod health;

use axum::Router;

use crate::state::AppState;

pub fn api_router() -> Router<AppState> {
    Router::new()
        .nest("/chat", chat::router())
        .nest("/health", health::router())
}
