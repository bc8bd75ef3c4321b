//! Thin HTTP wiring over the core operations. No business logic lives here;
//! handlers validate input, call into the managers, and map the error
//! taxonomy onto status codes.

use crate::error::AppError;
use crate::managers::history::HistoryManager;
use crate::managers::synthesis::{SynthesisOrchestrator, TranscriptionEvent};
use crate::playback::PlaybackQueue;
use crate::resolve::client::ResolveClient;
use crate::settings::{AppSettings, SettingsStore};
use crate::subtitle::{cues_from_records, render_srt};
use crate::voicevox::SynthesisApi;
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{delete, get, patch, post},
    Router,
};
use log::{error, info};
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<SettingsStore>,
    pub history: Arc<HistoryManager>,
    pub orchestrator: Arc<SynthesisOrchestrator>,
    pub gateway: Arc<dyn SynthesisApi>,
    pub resolve: Arc<ResolveClient>,
    pub playback: Arc<PlaybackQueue>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
            AppError::Synthesis(_) => StatusCode::BAD_GATEWAY,
            AppError::EditorNotConnected
            | AppError::EditorNoProjectOrTimeline
            | AppError::FrameResolution(_)
            | AppError::Editor(_) => StatusCode::CONFLICT,
            AppError::OutputDirUnset => StatusCode::PRECONDITION_FAILED,
            AppError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Filesystem(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/status", get(get_status))
        .route("/transcriptions", post(post_transcription))
        .route("/records", get(list_records))
        .route("/records/log", get(get_log))
        .route("/records/export.srt", get(export_srt))
        .route("/records/:id/synthesize", post(synthesize_record))
        .route("/records/:id/text", patch(update_record_text))
        .route("/records/:id", delete(delete_record))
        .route("/records/:id/insert", post(insert_record))
        .route("/records/:id/play", post(play_record))
        .route("/speakers", get(get_speakers))
        .route("/settings", get(get_settings).put(put_settings))
        .with_state(state)
}

pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = TcpListener::bind(addr).await?;
    info!("listening on http://{}", addr);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await?;
    Ok(())
}

async fn get_status(State(state): State<AppState>) -> Json<serde_json::Value> {
    let engine_available = state.gateway.is_available().await;
    Json(json!({
        "engine_available": engine_available,
        "editor": state.resolve.status().as_str(),
        "records": state.orchestrator.log_entries().len(),
    }))
}

async fn post_transcription(
    State(state): State<AppState>,
    Json(event): Json<TranscriptionEvent>,
) -> Result<Json<serde_json::Value>, AppError> {
    let id = state.orchestrator.on_transcription(event).await?;
    Ok(Json(json!({ "id": id })))
}

#[derive(Deserialize)]
struct ListQuery {
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    50
}

async fn list_records(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Json<serde_json::Value> {
    let records: Vec<_> = state
        .history
        .recent(query.limit)
        .into_iter()
        .map(|r| {
            json!({
                "id": r.id,
                "created_at": r.created_at,
                "text": r.text,
                "speaker": r.speaker_name,
                "style": r.style_name,
                "output_path": r.output_path,
                "duration": r.duration,
                "complete": r.is_complete(),
            })
        })
        .collect();
    Json(json!({ "records": records }))
}

async fn get_log(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "entries": state.orchestrator.log_entries() }))
}

async fn export_srt(State(state): State<AppState>) -> Response {
    let mut records = state.history.recent(10_000);
    records.reverse();
    let srt = render_srt(&cues_from_records(&records));
    ([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], srt).into_response()
}

async fn synthesize_record(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, AppError> {
    let (path, duration) = state.orchestrator.synthesize_now(id).await?;
    Ok(Json(json!({ "path": path, "duration": duration })))
}

#[derive(Deserialize)]
struct TextUpdate {
    text: String,
}

async fn update_record_text(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<TextUpdate>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.orchestrator.update_text(id, &body.text).await?;
    Ok(Json(json!({ "id": id })))
}

async fn delete_record(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, AppError> {
    let removed = state.orchestrator.delete(id).await?;
    Ok(Json(json!({ "removed": removed })))
}

async fn insert_record(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, AppError> {
    let record = state.history.get(id).ok_or(AppError::NotFound(id))?;
    let path = record
        .output_path
        .clone()
        .filter(|_| record.is_complete())
        .ok_or_else(|| AppError::Validation("record has no synthesized audio yet".to_string()))?;

    // The bridge speaks blocking line IO; keep it off the async workers.
    let resolve = state.resolve.clone();
    let text = record.text.clone();
    let outcome = tokio::task::spawn_blocking(move || resolve.insert(&path, &text))
        .await
        .map_err(|e| {
            error!("insertion task failed: {}", e);
            AppError::Editor("insertion task failed".to_string())
        })??;

    Ok(Json(json!({
        "audio_appended": outcome.audio_appended,
        "overlay_appended": outcome.overlay_appended,
    })))
}

async fn play_record(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, AppError> {
    let record = state.history.get(id).ok_or(AppError::NotFound(id))?;
    let path = record
        .output_path
        .ok_or_else(|| AppError::Validation("record has no synthesized audio yet".to_string()))?;
    let volume = state.settings.get().playback_volume;
    let _ = state.playback.enqueue(PathBuf::from(path), volume)?;
    Ok(Json(json!({ "queued": true })))
}

async fn get_speakers(State(state): State<AppState>) -> Json<serde_json::Value> {
    let speakers = state.gateway.speakers(false).await;
    Json(json!({ "speakers": speakers }))
}

async fn get_settings(State(state): State<AppState>) -> Json<AppSettings> {
    Json(state.settings.get())
}

async fn put_settings(
    State(state): State<AppState>,
    Json(settings): Json<AppSettings>,
) -> Json<AppSettings> {
    state.settings.replace(settings);
    // The output directory may have changed; the mirror follows the store.
    state.orchestrator.reload_history();
    Json(state.settings.get())
}
