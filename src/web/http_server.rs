//! HTTP server for stream upgrades and health checks
//!
//! `GET /ws/{*path}` upgrades to a WebSocket attached to the stream named by
//! the last path segment. `/health`, `/metrics` and `/streams` serve
//! monitoring data.

use crate::transport::{read_pump, Connection, ExitReason};
use crate::web::shared::SharedState;
use axum::{
    extract::ws::{WebSocket, WebSocketUpgrade},
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures::StreamExt;
use log::{debug, info, warn};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Diagnostic query parameters sent by the player
#[derive(Debug, Default, Deserialize)]
pub struct StreamQuery {
    pub client_id: Option<String>,
    pub access_token: Option<String>,
    pub model_id: Option<String>,
}

/// Build the application router
pub fn router(state: Arc<SharedState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/streams", get(streams_handler))
        .route("/ws/{*path}", get(stream_handler))
        .with_state(state)
}

/// Serve on an already bound listener
pub async fn serve(
    listener: TcpListener,
    state: Arc<SharedState>,
) -> Result<(), Box<dyn std::error::Error>> {
    axum::serve(listener, router(state))
        .await
        .map_err(|e| Box::new(e) as Box<dyn std::error::Error>)?;
    Ok(())
}

/// Bind the configured address and serve
pub async fn run_http_server(
    host: &str,
    port: u16,
    state: Arc<SharedState>,
) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", host, port);
    let listener = TcpListener::bind(&addr).await?;
    info!("HTTP server listening on http://{}", addr);
    serve(listener, state).await
}

/// Final non-empty segment of the upgrade path
pub fn stream_id_from_path(path: &str) -> Option<&str> {
    path.split('/').filter(|segment| !segment.is_empty()).last()
}

fn redact(token: Option<&str>) -> String {
    match token {
        Some(token) if !token.is_empty() => format!("<{} chars>", token.chars().count()),
        _ => "<none>".to_string(),
    }
}

async fn stream_handler(
    ws: WebSocketUpgrade,
    Path(path): Path<String>,
    Query(query): Query<StreamQuery>,
    State(state): State<Arc<SharedState>>,
) -> Response {
    let Some(stream_id) = stream_id_from_path(&path).map(str::to_owned) else {
        return (StatusCode::NOT_FOUND, "missing stream id").into_response();
    };

    info!(
        "Stream request for {} (client_id={:?}, model_id={:?}, access_token={})",
        stream_id,
        query.client_id,
        query.model_id,
        redact(query.access_token.as_deref())
    );

    if !state.registry.is_live(&stream_id) {
        warn!("Rejecting request for unknown stream {}", stream_id);
        return (StatusCode::NOT_FOUND, format!("unknown stream {}", stream_id)).into_response();
    }

    let max_size = state.connection.max_message_size;
    ws.max_message_size(max_size)
        .max_frame_size(max_size)
        .on_upgrade(move |socket| serve_connection(socket, stream_id, state))
}

async fn serve_connection(socket: WebSocket, stream_id: String, state: Arc<SharedState>) {
    let (sink, inbound) = socket.split();
    let (connection, handle) = Connection::new(sink, &state.connection);
    let id = connection.id();

    let reader = tokio::spawn(read_pump(
        inbound,
        handle.error_sender(),
        state.connection.pong_wait,
    ));

    // On failure the handle is dropped, so the writer sends a close frame and exits.
    if let Err(e) = state.registry.register(&stream_id, handle).await {
        warn!("Connection {} could not join stream: {}", id, e);
    }

    let reason = connection.run().await;
    if reason == ExitReason::WriteFailed {
        state.metrics.write_failures.inc();
    }
    reader.abort();
    debug!("Connection {} on stream {} ended: {:?}", id, stream_id, reason);
}

/// Health check handler
async fn health_handler(State(state): State<Arc<SharedState>>) -> String {
    format!(
        r#"{{
  "status": "healthy",
  "uptime_seconds": {:.2},
  "streams": {},
  "connections": {},
  "version": "{}"
}}"#,
        state.uptime().as_secs_f64(),
        state.registry.len(),
        state.connection_count(),
        env!("CARGO_PKG_VERSION")
    )
}

/// Metrics handler (Prometheus format)
async fn metrics_handler(State(state): State<Arc<SharedState>>) -> String {
    state.metrics.render()
}

async fn streams_handler(State(state): State<Arc<SharedState>>) -> Json<serde_json::Value> {
    Json(json!({ "streams": state.registry.ids() }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::stats::Metrics;
    use crate::stream::{hub, StreamRegistry};
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request};
    use tower::ServiceExt;

    fn state() -> Arc<SharedState> {
        Arc::new(SharedState::new(
            Arc::new(Config::default()),
            Arc::new(StreamRegistry::new()),
            Metrics::new().expect("metrics"),
        ))
    }

    async fn body_text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        String::from_utf8(bytes.to_vec()).expect("utf8")
    }

    #[test]
    fn stream_id_is_last_segment() {
        assert_eq!(stream_id_from_path("cam"), Some("cam"));
        assert_eq!(stream_id_from_path("site/floor-2/cam"), Some("cam"));
        assert_eq!(stream_id_from_path("site/cam/"), Some("cam"));
        assert_eq!(stream_id_from_path("//"), None);
    }

    #[test]
    fn tokens_are_never_echoed() {
        assert_eq!(redact(Some("secret")), "<6 chars>");
        assert_eq!(redact(None), "<none>");
        assert!(!redact(Some("secret")).contains("secret"));
    }

    #[tokio::test]
    async fn health_reports_status() {
        let response = router(state())
            .oneshot(Request::get("/health").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let value: serde_json::Value =
            serde_json::from_str(&body_text(response).await).expect("json");
        assert_eq!(value["status"], "healthy");
        assert_eq!(value["connections"], 0);
    }

    #[tokio::test]
    async fn streams_lists_registered_ids() {
        let state = state();
        let (handle, _inputs, _media) = hub::channel("cam");
        state.registry.insert("cam", handle).expect("insert");

        let response = router(state)
            .oneshot(Request::get("/streams").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        let value: serde_json::Value =
            serde_json::from_str(&body_text(response).await).expect("json");
        assert_eq!(value["streams"], json!(["cam"]));
    }

    #[tokio::test]
    async fn non_get_upgrade_is_rejected() {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/ws/cam")
            .body(Body::empty())
            .expect("request");
        let response = router(state()).oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn metrics_are_exposed() {
        let state = state();
        state.metrics.connections_total.inc();
        let response = router(state)
            .oneshot(Request::get("/metrics").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert!(body_text(response)
            .await
            .contains("mjpeg_player_connections_total 1"));
    }
}
