//! Thin JSON API for the browser UI
//!
//! Storage listing, preference editing, lifecycle buttons, and a status
//! endpoint. Everything here is a thin shim over state the supervisor owns:
//! lifecycle buttons raise flags the supervisor consumes on its next
//! iteration, and status is whatever snapshot it last published.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::broadcast;

use crate::emulator::{prefs, storage};
use crate::error::{GatewayError, Result};
use crate::state::GatewayState;

#[derive(Debug, Serialize)]
struct StatusResponse {
    emulator_running: bool,
    emulator_connected: bool,
    emulator_state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    emulator_pid: Option<u32>,
    video: VideoStatus,
}

#[derive(Debug, Serialize)]
struct VideoStatus {
    width: u32,
    height: u32,
    frame_count: u64,
}

pub fn router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/api/status", get(get_status))
        .route("/api/storage", get(get_storage))
        .route("/api/config", get(get_config).post(set_config))
        .route("/api/emulator/start", post(start_emulator))
        .route("/api/emulator/stop", post(stop_emulator))
        .route("/api/emulator/restart", post(restart_emulator))
        .with_state(state)
}

/// Serve the HTTP API until shutdown.
pub async fn serve(
    state: Arc<GatewayState>,
    port: u16,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<tokio::task::JoinHandle<()>> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .map_err(|e| GatewayError::Startup(format!("HTTP port {}: {}", port, e)))?;

    tracing::info!("HTTP API on port {}", port);

    Ok(tokio::spawn(async move {
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        });
        if let Err(e) = server.await {
            tracing::error!("HTTP server error: {}", e);
        }
    }))
}

async fn get_status(State(state): State<Arc<GatewayState>>) -> Json<StatusResponse> {
    let snapshot = state.status.snapshot().await;
    let response = match snapshot {
        Some(s) => StatusResponse {
            emulator_running: s.pid.is_some(),
            emulator_connected: s.connected,
            emulator_state: s.state.to_string(),
            emulator_pid: s.pid,
            video: VideoStatus {
                width: s.width,
                height: s.height,
                frame_count: s.frame_count,
            },
        },
        None => StatusResponse {
            emulator_running: false,
            emulator_connected: false,
            emulator_state: "absent".to_string(),
            emulator_pid: None,
            video: VideoStatus {
                width: 0,
                height: 0,
                frame_count: 0,
            },
        },
    };
    Json(response)
}

async fn get_storage(State(state): State<Arc<GatewayState>>) -> Json<storage::StorageListing> {
    let listing = storage::scan_storage(&state.config.roms_dir, &state.config.images_dir);
    Json(listing)
}

async fn get_config(State(state): State<Arc<GatewayState>>) -> Json<prefs::EmulatorSettings> {
    Json(prefs::read_prefs(&state.config.prefs_path))
}

async fn set_config(
    State(state): State<Arc<GatewayState>>,
    Json(settings): Json<prefs::EmulatorSettings>,
) -> Json<Value> {
    match prefs::write_prefs(
        &settings,
        &state.config.prefs_path,
        &state.config.roms_dir,
        &state.config.images_dir,
    ) {
        Ok(()) => Json(json!({"success": true})),
        Err(e) => {
            tracing::error!("Config write failed: {}", e);
            Json(json!({"success": false, "message": e.to_string()}))
        }
    }
}

async fn start_emulator(State(state): State<Arc<GatewayState>>) -> Json<Value> {
    state.lifecycle.request_start();
    Json(json!({"success": true, "message": "Start requested"}))
}

async fn stop_emulator(State(state): State<Arc<GatewayState>>) -> Json<Value> {
    state.lifecycle.request_stop();
    Json(json!({"success": true, "message": "Stop requested"}))
}

async fn restart_emulator(State(state): State<Arc<GatewayState>>) -> Json<Value> {
    state.lifecycle.request_restart();
    Json(json!({"success": true, "message": "Restart requested"}))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;

    fn test_state(dir: &std::path::Path) -> Arc<GatewayState> {
        let mut config = GatewayConfig::default();
        config.prefs_path = dir.join("test.prefs");
        config.roms_dir = dir.join("roms");
        config.images_dir = dir.join("images");
        GatewayState::new(config)
    }

    #[tokio::test]
    async fn lifecycle_buttons_raise_supervisor_flags() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());

        start_emulator(State(state.clone())).await;
        assert!(state.lifecycle.take_start());

        stop_emulator(State(state.clone())).await;
        assert!(state.lifecycle.take_stop());

        restart_emulator(State(state.clone())).await;
        assert!(state.lifecycle.take_restart());
    }

    #[tokio::test]
    async fn config_roundtrips_through_the_api() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());

        let mut settings = prefs::EmulatorSettings::default();
        settings.rom = "quadra.rom".to_string();
        settings.ram = 64;

        let Json(result) = set_config(State(state.clone()), Json(settings.clone())).await;
        assert_eq!(result["success"], true);

        let Json(read_back) = get_config(State(state)).await;
        assert_eq!(read_back.rom, "quadra.rom");
        assert_eq!(read_back.ram, 64);
    }

    #[tokio::test]
    async fn status_defaults_before_first_supervisor_tick() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        let Json(status) = get_status(State(state)).await;
        assert!(!status.emulator_running);
        assert_eq!(status.emulator_state, "absent");
    }
}
