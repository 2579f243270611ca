use std::sync::Arc;

use crate::auth::Secret;
use crate::store::LocalStore;

/// Shared application state passed to all handlers via the axum State
/// extractor.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<LocalStore>,
    pub secret: Secret,
}
