//! API Server module
//!
//! This module provides the HTTP API for the idea tree: the tree view, a
//! single command endpoint, exports, the prompt log, settings, a server-sent
//! event stream and a read-only HTML view.

use std::collections::{HashMap, HashSet};
use std::convert::Infallible;
use std::net::SocketAddr;

use axum::{
    extract::State,
    http::{header, HeaderValue, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use futures::{stream, Stream};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::broadcast::{self, error::RecvError};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use crate::command::Command;
use crate::core::{CoreError, TreeEvent, TreeView};
use crate::models::Node;
use crate::visibility::{children_map, root_ids};
use crate::Core;

/// Request to replace the global instruction
#[derive(Serialize, Deserialize)]
pub struct SettingsRequest {
    pub instruction: String,
}

/// Request-gate summary, cheap to poll
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub any_expanding: bool,
    pub status: Option<String>,
    pub can_undo: bool,
    pub can_redo: bool,
}

/// Server configuration
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub address: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: ([127, 0, 0, 1], 3000).into(),
        }
    }
}

/// API responses
#[derive(Serialize, Deserialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

fn status_for(error: &CoreError) -> StatusCode {
    match error {
        CoreError::Busy(_) => StatusCode::CONFLICT,
        CoreError::Connect(_) => StatusCode::BAD_REQUEST,
        CoreError::Generation(_) => StatusCode::BAD_GATEWAY,
        CoreError::Serialization(_) | CoreError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Helper function to map Core results to Axum responses
fn map_core_result_to_response<T: Serialize>(result: Result<T, CoreError>) -> Response {
    match result {
        Ok(data) => (StatusCode::OK, Json(ApiResponse::success(data))).into_response(),
        Err(e) => (status_for(&e), Json(ApiResponse::<T>::error(e.to_string()))).into_response(),
    }
}

/// Builds the application router
pub fn router(core: Core) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(|| async { Redirect::temporary("/ui") }))
        .route("/api/tree", get(get_tree))
        .route("/api/command", post(run_command))
        .route("/api/export", get(export_tree))
        .route("/api/logs", get(get_logs))
        .route("/api/settings", get(get_settings).post(set_settings))
        .route("/api/status", get(get_status))
        .route("/api/events", get(events_handler))
        .route("/ui", get(ui_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(core)
}

/// Starts the API server
pub async fn serve(core: Core, config: ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing, unless the caller already did
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();

    let app = router(core);

    // Start server
    tracing::info!("Starting server on {}", config.address);
    let listener = TcpListener::bind(config.address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn get_tree(State(core): State<Core>) -> impl IntoResponse {
    map_core_result_to_response(Ok(core.view()))
}

async fn run_command(State(core): State<Core>, Json(command): Json<Command>) -> impl IntoResponse {
    tracing::debug!(?command, "dispatching command");
    map_core_result_to_response(core.dispatch(command).await)
}

async fn export_tree(State(core): State<Core>) -> Response {
    match core.export() {
        Ok(export) => {
            let disposition = format!("attachment; filename=\"{}\"", export.file_name);
            let disposition = HeaderValue::from_str(&disposition)
                .unwrap_or_else(|_| HeaderValue::from_static("attachment"));
            (
                [
                    (
                        header::CONTENT_TYPE,
                        HeaderValue::from_static("application/json"),
                    ),
                    (header::CONTENT_DISPOSITION, disposition),
                ],
                export.contents,
            )
                .into_response()
        }
        Err(e) => map_core_result_to_response::<()>(Err(e)),
    }
}

async fn get_logs(State(core): State<Core>) -> impl IntoResponse {
    map_core_result_to_response(Ok(core.logs()))
}

async fn get_settings(State(core): State<Core>) -> impl IntoResponse {
    map_core_result_to_response(Ok(core.settings()))
}

async fn set_settings(
    State(core): State<Core>,
    Json(payload): Json<SettingsRequest>,
) -> impl IntoResponse {
    map_core_result_to_response(Ok(core.set_instruction(&payload.instruction)))
}

async fn get_status(State(core): State<Core>) -> impl IntoResponse {
    let view = core.view();
    map_core_result_to_response(Ok(StatusResponse {
        any_expanding: view.any_expanding,
        status: view.status,
        can_undo: view.can_undo,
        can_redo: view.can_redo,
    }))
}

// --- Events --- //

fn format_event(event: &TreeEvent) -> String {
    let name = match event {
        TreeEvent::Changed => "update",
        TreeEvent::ExpansionStarted { .. } => "expansion_started",
        TreeEvent::ExpansionFinished { .. } => "expansion_finished",
        TreeEvent::ExpansionFailed { .. } => "expansion_failed",
    };
    let data = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    format!("event: {}\ndata: {}\n\n", name, data)
}

/// Relays broadcast events as server-sent event frames
fn event_stream(
    receiver: broadcast::Receiver<TreeEvent>,
) -> impl Stream<Item = Result<String, Infallible>> {
    stream::unfold(receiver, |mut receiver| async move {
        match receiver.recv().await {
            Ok(event) => Some((Ok(format_event(&event)), receiver)),
            // Some messages were missed, just tell the client something changed
            Err(RecvError::Lagged(_)) => Some((Ok(format_event(&TreeEvent::Changed)), receiver)),
            Err(RecvError::Closed) => None,
        }
    })
}

async fn events_handler(State(core): State<Core>) -> impl IntoResponse {
    let stream = event_stream(core.subscribe());

    // Set headers for event stream
    let headers = [
        (
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/event-stream"),
        ),
        (header::CACHE_CONTROL, HeaderValue::from_static("no-cache")),
    ];

    (headers, axum::body::Body::from_stream(stream))
}

// --- UI --- //

async fn ui_handler(State(core): State<Core>) -> impl IntoResponse {
    Html(render_ui_template(&core.view()))
}

fn render_ui_template(view: &TreeView) -> String {
    let mut html = String::from(HTML_TEMPLATE_HEADER);

    html.push_str("<h1>Thoughtree</h1>");
    if let Some(status) = &view.status {
        html.push_str(&format!(
            "<p class='status'>{}</p>",
            html_escape::encode_text(status)
        ));
    }

    let children = children_map(&view.edges);
    let roots = root_ids(&view.nodes, &view.edges);
    if roots.is_empty() {
        html.push_str("<p>No ideas yet.</p>");
    } else {
        html.push_str("<ul class='tree'>");
        let mut visited = HashSet::new();
        for root in roots {
            render_node_html(&mut html, view, &children, &mut visited, root);
        }
        html.push_str("</ul>");
    }

    html.push_str(HTML_TEMPLATE_FOOTER);
    html
}

fn render_node_html<'a>(
    html: &mut String,
    view: &TreeView,
    children: &HashMap<&'a str, Vec<&'a str>>,
    visited: &mut HashSet<&'a str>,
    id: &'a str,
) {
    // Each node is drawn once even if the edges loop back on themselves
    if !visited.insert(id) {
        return;
    }
    let Some(node) = view.nodes.iter().find(|n| n.id == id) else {
        return;
    };
    if node.hidden {
        return;
    }

    html.push_str(&format!("<li class='{}'>", node_classes(node)));
    if node.is_pinned {
        html.push_str("<span class='pin'>📌</span>");
    }
    if let Some(mode) = node.generated_by {
        html.push_str(&format!("<span class='mode mode-{}'>{}</span>", mode, mode));
    }
    html.push_str(&format!(
        "<span class='text'>{}</span>",
        html_escape::encode_text(&node.text)
    ));
    if node.is_collapsed && node.has_children {
        html.push_str(&format!(
            "<span class='hidden-count'>+{}</span>",
            node.descendant_count
        ));
    }

    if let Some(kids) = children.get(id) {
        if !node.is_collapsed && !kids.is_empty() {
            html.push_str("<ul>");
            for kid in kids {
                render_node_html(html, view, children, visited, *kid);
            }
            html.push_str("</ul>");
        }
    }
    html.push_str("</li>");
}

fn node_classes(node: &Node) -> String {
    let mut classes = vec!["node"];
    if node.is_expanding {
        classes.push("expanding");
    }
    if node.is_collapsed {
        classes.push("collapsed");
    }
    if node.is_pinned {
        classes.push("pinned");
    }
    classes.join(" ")
}

// HTML template header with CSS styles
const HTML_TEMPLATE_HEADER: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Thoughtree</title>
    <style>
        body { font-family: system-ui, sans-serif; margin: 2rem; color: #1f2937; }
        .status { color: #6366f1; font-style: italic; }
        ul.tree, ul.tree ul { list-style: none; padding-left: 1.5rem; border-left: 1px solid #e5e7eb; }
        li.node { margin: 0.4rem 0; }
        .text { padding: 0.2rem 0.5rem; border-radius: 4px; background: #f3f4f6; }
        li.pinned > .text { background: #fef3c7; }
        li.expanding > .text { background: #e0e7ff; }
        .mode { font-size: 0.7rem; text-transform: uppercase; margin-right: 0.4rem; color: #6b7280; }
        .hidden-count { margin-left: 0.4rem; font-size: 0.8rem; color: #9ca3af; }
    </style>
</head>
<body>
    <div class="container">
"#;

// HTML template footer with EventSource JavaScript for reactive refreshing
const HTML_TEMPLATE_FOOTER: &str = r#"
    </div>
    <script>
        let eventSource;

        function connectEvents() {
            eventSource = new EventSource('/api/events');

            const reload = () => window.location.reload();
            eventSource.addEventListener('update', reload);
            eventSource.addEventListener('expansion_finished', reload);
            eventSource.addEventListener('expansion_failed', (event) => {
                console.error('Expansion failed', JSON.parse(event.data));
                reload();
            });

            eventSource.onerror = () => {
                eventSource.close();
                setTimeout(connectEvents, 3000);
            };
        }

        window.addEventListener('load', connectEvents);
        window.addEventListener('beforeunload', () => {
            if (eventSource) {
                eventSource.close();
            }
        });
    </script>
</body>
</html>
"#;
