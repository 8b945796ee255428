use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use crate::allowlist::AllowListSource;
use crate::trigger::RedeployTrigger;

/// Shared state passed as `Arc<AppState>` to the handlers.
pub struct AppState {
    /// HMAC secret shared with GitHub. `None` disables the deploy webhook.
    pub secret: Option<String>,
    pub allow_list: Arc<dyn AllowListSource>,
    pub trigger: Arc<dyn RedeployTrigger>,
}

impl AppState {
    pub fn new(
        secret: Option<String>,
        allow_list: Arc<dyn AllowListSource>,
        trigger: Arc<dyn RedeployTrigger>,
    ) -> Self {
        Self {
            // An empty secret would make every signature trivially forgeable.
            secret: secret.filter(|s| !s.is_empty()),
            allow_list,
            trigger,
        }
    }
}

/// Assemble the Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route("/deploy_api/", post(crate::http::webhooks::deploy_handler))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
