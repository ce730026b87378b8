use std::sync::Arc;

use docbrain_core::Brain;

/// Shared application state accessible from all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub brain: Arc<Brain>,
}
