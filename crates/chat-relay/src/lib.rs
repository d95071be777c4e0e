//! HTTP boundary of the chat relay.
//!
//! Serves the conversation API and streams completions to the browser
//! as server-sent events. See [`routes`] for the endpoints.

#[macro_use]
extern crate tracing;

mod config;
mod error;
pub mod routes;
mod state;

use std::future::Future;

use axum::Router;
use axum::http::HeaderValue;
use chat_relay_core::ModelClient;
use chat_relay_openai_model::OpenAIProvider;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

pub use config::{ConfigError, ServerConfig};
pub use error::ApiError;
pub use routes::router;
pub use state::AppState;

/// Builds the complete application: the API router with CORS and request
/// tracing applied.
pub fn app(state: AppState, allowed_origins: Vec<HeaderValue>) -> Router {
    // Wildcards cannot be combined with credentials, so methods and
    // headers are mirrored from the preflight request instead.
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed_origins))
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true);

    router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Runs the server until `shutdown_signal` completes.
///
/// In-flight streams are dropped on shutdown, which cancels their
/// exchanges.
///
/// # Errors
///
/// Returns an error if the listener cannot be bound or the server fails.
pub async fn run_server_with_shutdown<F>(
    config: ServerConfig,
    shutdown_signal: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let upstream_url = config.openai.base_url().to_owned();
    let model_client = ModelClient::new(OpenAIProvider::new(config.openai));
    let state = AppState::new(model_client, upstream_url);
    let app = app(state, config.allowed_origins);

    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    info!("chat relay listening on http://{}", config.addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
}
