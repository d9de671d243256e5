pub mod config;
pub mod cookies;
pub mod csrf;
pub mod error;
pub mod forward;
pub mod handlers;
pub mod identity;
pub mod policy;
pub mod render;
pub mod session;
pub mod state;

use anyhow::Result;
use axum::{
    body::Body,
    extract::{DefaultBodyLimit, MatchedPath},
    http::{HeaderName, HeaderValue, Request},
    middleware,
    routing::{any, get},
    Router,
};
use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer, services::ServeDir, set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{info, info_span, Span};
use ulid::Ulid;

use self::{
    handlers::{gateway, health, login, logout},
    state::GatewayState,
};

/// Build the gateway router.
///
/// Everything except `/sso/health` runs behind the HTTPS redirect and the CSRF
/// guard, in that order. Buffered form bodies are capped at
/// [`csrf::MAX_FORM_BYTES`]; proxied bodies stream without a cap.
#[must_use]
pub fn router(state: Arc<GatewayState>) -> Router {
    let gateway = Router::new()
        .nest_service(
            gateway::STATIC_BASE_PATH,
            ServeDir::new(state.config().static_path()),
        )
        .route("/favicon.ico", any(handlers::favicon))
        .route("/sso/login", any(login::login))
        .route("/sso/logout", any(logout::logout))
        .fallback(gateway::handle_request)
        .layer(middleware::from_fn_with_state(state.clone(), csrf::protect))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            handlers::require_tls,
        ))
        .layer(DefaultBodyLimit::max(csrf::MAX_FORM_BYTES));

    Router::new()
        .route("/sso/health", get(health::health))
        .merge(gateway)
        .with_state(state)
}

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn new(listen: SocketAddr, state: Arc<GatewayState>) -> Result<()> {
    let app = router(state).layer(
        ServiceBuilder::new()
            .layer(SetRequestHeaderLayer::if_not_present(
                HeaderName::from_static("x-request-id"),
                |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
            ))
            .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                "x-request-id",
            )))
            .layer(TraceLayer::new_for_http().make_span_with(make_span)),
    );

    let listener = TcpListener::bind(listen).await?;

    info!("Listening on {}", listen);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl-c: {}", err);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!("Failed to listen for SIGTERM: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Gracefully shutdown");
}
