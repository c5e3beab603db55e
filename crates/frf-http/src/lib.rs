//! Inbound HTTP surface: GET /get/{fileName}/{fileId} → dispatch, GET /status.
//!
//! Routing and CORS only; retry/backoff and session lifecycle live in
//! `frf-core`. Every dispatch terminates in a concrete outcome, so no
//! request is left hanging: 200 on accepted dispatch, 500 otherwise.

use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;

use frf_core::{dispatch::Dispatcher, status::StatusReporter};

/// Response body for `/get/{fileName}/{fileId}`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRequestResponse {
    pub file_name: String,
    pub file_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub status: Arc<StatusReporter>,
}

async fn request_file(
    State(state): State<AppState>,
    Path((file_name, file_id)): Path<(String, String)>,
) -> (StatusCode, Json<FileRequestResponse>) {
    tracing::info!("received request to fetch file: {file_name} id: {file_id}");

    let command = format!("/get {file_id}");
    let outcome = state.dispatcher.send(&command).await;

    if outcome.success {
        tracing::info!("[REQUESTED] File: {file_name}");
        (
            StatusCode::OK,
            Json(FileRequestResponse {
                file_name,
                file_id,
                status: Some("File is requested".to_string()),
                error: None,
            }),
        )
    } else {
        let error = outcome
            .message
            .unwrap_or_else(|| "failed to dispatch command".to_string());
        tracing::error!("dispatch failed for file {file_name}: {error}");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(FileRequestResponse {
                file_name,
                file_id,
                status: None,
                error: Some(error),
            }),
        )
    }
}

async fn health_check(
    State(state): State<AppState>,
) -> (StatusCode, Json<frf_core::status::StatusReport>) {
    let report = state.status.report().await;
    let code = if report.ready {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (code, Json(report))
}

/// Build the router. CORS is permissive: the service fronts a download UI
/// served from arbitrary origins.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/get/{file_name}/{file_id}", get(request_file))
        .route("/status", get(health_check))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Run the HTTP server on `bind_addr`. Graceful shutdown on Ctrl+C/SIGTERM;
/// in-flight dispatches complete before exit.
pub async fn serve(bind_addr: &str, state: AppState) -> Result<()> {
    let app = router(state);
    let listener = TcpListener::bind(bind_addr).await?;
    tracing::info!("listening on {bind_addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let ctrl_c = tokio::signal::ctrl_c();
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to listen for SIGTERM");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to listen for Ctrl+C");
    }
}
