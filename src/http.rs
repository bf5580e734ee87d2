//! HTTP surface: one `POST` route per enabled module plus `GET /health`.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::HEALTH_ENDPOINT;
use crate::dispatch::QueueSender;
use crate::input::{self, Module, WebhookRequest};
use crate::irc::{version_string, ConnectionState, ConnectionStatus};

/// Shared state accessible from Axum handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Enabled modules, indexed by route.
    pub modules: Arc<Vec<Module>>,
    /// Producer side of the dispatch queue.
    pub queue: QueueSender,
    /// Connection state published by the manager.
    pub status: watch::Receiver<ConnectionStatus>,
}

/// Body of `GET /health`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Current connection state.
    pub state: ConnectionState,
    /// Channels the bot is in.
    pub joined: BTreeSet<String>,
    /// Bot name and build metadata.
    pub version: String,
}

/// Body of a successful webhook response.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookResponse {
    /// Messages placed on the dispatch queue.
    pub queued: usize,
}

/// Build the router for every module in `state`.
pub fn router(state: AppState) -> Router {
    let mut router = Router::new().route(HEALTH_ENDPOINT, get(health_handler));

    for (index, module) in state.modules.iter().enumerate() {
        info!(
            module = %module.name,
            kind = module.source.kind(),
            endpoint = %module.endpoint,
            "registering webhook endpoint"
        );
        router = router.route(
            &module.endpoint,
            post(
                move |State(state): State<AppState>,
                      Query(query): Query<BTreeMap<String, String>>,
                      headers: HeaderMap,
                      body: Bytes| async move {
                    let request = WebhookRequest {
                        headers,
                        query,
                        body,
                    };
                    webhook_handler(state, index, request).await
                },
            ),
        );
    }

    router.with_state(state)
}

/// Bind `listen` and serve until `shutdown` resolves.
///
/// # Errors
///
/// Returns an error if the address cannot be bound or the server fails.
pub async fn serve(
    listen: &str,
    router: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(listen)
        .await
        .map_err(|e| anyhow::anyhow!("failed to bind {listen}: {e}"))?;
    info!(address = %listener.local_addr()?, "http listener started");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let status = state.status.borrow().clone();
    Json(HealthResponse {
        state: status.state,
        joined: status.joined,
        version: version_string(),
    })
}

/// POST /<module>
async fn webhook_handler(state: AppState, index: usize, request: WebhookRequest) -> Response {
    let Some(module) = state.modules.get(index) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let notifications = match module.source.render(&request) {
        Ok(notifications) => notifications,
        Err(e) => {
            warn!(module = %module.name, error = %e, "rejecting webhook");
            return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
    };

    match input::dispatch(&module.name, notifications, &state.queue).await {
        Ok(queued) => Json(WebhookResponse { queued }).into_response(),
        Err(e) => {
            warn!(module = %module.name, error = %e, "dispatch queue unavailable");
            (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response()
        }
    }
}
