use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Query, State},
    http::{HeaderMap, HeaderName, Method, StatusCode, Uri, header},
    response::{
        IntoResponse,
        sse::{Event, Sse},
    },
    routing::{any, get, post},
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use tracing::info;

use crate::AppState;
use crate::config::AppConfig;
use crate::error::RelayError;
use crate::session::Frame;
use crate::tools;

/// Hint for reverse proxies (nginx) not to buffer the event stream.
static X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");

/// Start the Axum server with the provided configuration.
pub async fn start_server(config: Arc<AppConfig>) -> anyhow::Result<()> {
    let tools = tools::default_registry(&config.search)?;
    for tool in tools.list() {
        info!(name: "mcp.tool.registered", tool = %tool.name, "Tool registered");
    }

    let state = AppState::new(Arc::clone(&config), tools);
    let lifecycle = state.lifecycle.clone();
    let app = build_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(
        name: "server.started",
        address = %addr,
        sse_path = %config.relay.sse_path,
        messages_path = %config.relay.messages_path,
        "Server started"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            // Ends every open event stream so in-flight responses can finish.
            lifecycle.shutdown();
        })
        .await?;

    info!(name: "server.stopped", "Server stopped");
    Ok(())
}

/// Build the HTTP surface around `state`.
pub fn build_router(state: AppState) -> Router {
    let relay = &state.config.relay;
    let server = &state.config.server;

    let mut app = Router::new()
        .route("/", get(status))
        .route(&relay.sse_path, get(open_stream))
        .route(&relay.messages_path, post(post_message))
        .route("/debug", any(echo_request))
        .layer(DefaultBodyLimit::max(server.body_limit_bytes))
        .layer(TraceLayer::new_for_http());

    if server.cors_enabled {
        app = app.layer(CorsLayer::permissive());
    }

    app.with_state(state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
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
    info!(name: "server.shutdown", "Shutdown signal received");
}

// ─────────────────────────────────────────────────────────────────────────────
// API Handlers
// ─────────────────────────────────────────────────────────────────────────────

fn frame_to_event(frame: Frame) -> Event {
    match frame {
        Frame::Keepalive => Event::default().comment("keepalive"),
        Frame::Event { event, data } => Event::default().event(event).data(data),
    }
}

/// GET /sse - Open a streaming connection.
async fn open_stream(State(state): State<AppState>) -> Result<impl IntoResponse, RelayError> {
    let stream = state.lifecycle.establish()?;
    let events = stream.map(|frame| Ok::<_, Infallible>(frame_to_event(frame)));

    Ok((
        [
            (header::CONNECTION, "keep-alive"),
            (X_ACCEL_BUFFERING.clone(), "no"),
        ],
        Sse::new(events),
    ))
}

/// Session id carried on the message endpoint's query string.
#[derive(Debug, Default, Deserialize)]
struct MessageQuery {
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
    /// Legacy alias.
    #[serde(rename = "session_id")]
    legacy_session_id: Option<String>,
}

impl MessageQuery {
    fn session_hint(&self) -> Option<&str> {
        [&self.session_id, &self.legacy_session_id]
            .into_iter()
            .flatten()
            .map(String::as_str)
            .find(|id| !id.is_empty())
    }
}

/// POST /messages - Deliver a JSON-RPC message to an open session.
async fn post_message(
    State(state): State<AppState>,
    Query(query): Query<MessageQuery>,
    Json(payload): Json<serde_json::Value>,
) -> Result<impl IntoResponse, RelayError> {
    let hint = query.session_hint();
    tracing::debug!(session_id = ?hint, "Received message");

    state.router.route(hint, payload).await?;
    Ok((StatusCode::ACCEPTED, "Accepted"))
}

#[derive(Debug, Serialize)]
struct Endpoints {
    status: &'static str,
    sse: String,
    messages: String,
    debug: &'static str,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    name: &'static str,
    version: &'static str,
    endpoints: Endpoints,
    active_sessions: usize,
}

/// GET / - Service metadata.
async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        endpoints: Endpoints {
            status: "/",
            sse: state.config.relay.sse_path.clone(),
            messages: state.config.relay.messages_path.clone(),
            debug: "/debug",
        },
        active_sessions: state.sessions.len(),
    })
}

#[derive(Debug, Serialize)]
struct EchoResponse {
    method: String,
    path: String,
    query: BTreeMap<String, String>,
    headers: BTreeMap<String, String>,
}

/// ANY /debug - Echo the request back, for proxy troubleshooting.
async fn echo_request(
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    Query(query): Query<BTreeMap<String, String>>,
) -> Json<EchoResponse> {
    let echoed = headers
        .keys()
        .map(|name| {
            let values: Vec<_> = headers
                .get_all(name)
                .iter()
                .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
                .collect();
            (name.as_str().to_string(), values.join(", "))
        })
        .collect();

    Json(EchoResponse {
        method: method.to_string(),
        path: uri.path().to_string(),
        query,
        headers: echoed,
    })
}
