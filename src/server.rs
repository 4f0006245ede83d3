//! HTTP surface: `POST /v1/audio/speech` and `GET /health`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};

use crate::backend::BackendRegistry;
use crate::config::Settings;
use crate::device::DeviceProbe;
use crate::error::{TtsError, TtsResult};
use crate::loader::ModelProvider;
use crate::params::GenerationOverrides;
use crate::voices::{is_default_voice, voice_prompt_path};

/// Response header carrying the lowercased model name.
pub const MODEL_HEADER: &str = "x-local-tts-model";

/// Shared server state: settings plus the backend registry.
pub struct AppState {
    pub settings: Settings,
    pub registry: BackendRegistry,
}

impl AppState {
    pub fn new(
        settings: Settings,
        provider: Arc<dyn ModelProvider>,
        probe: Box<dyn DeviceProbe>,
    ) -> Self {
        let registry = BackendRegistry::new(provider, probe, settings.backend_options());
        Self { settings, registry }
    }

    /// Create the voices directory and, if configured, load the default model.
    ///
    /// Blocks while the model loads.
    pub fn startup(&self) -> TtsResult<()> {
        std::fs::create_dir_all(&self.settings.voices_dir)?;
        log::info!("Voices directory: {}", self.settings.voices_dir.display());

        if self.settings.preload {
            log::info!("Preloading model '{}'", self.settings.model);
            self.registry.get(&self.settings.model)?.load()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeechRequest {
    /// Model name; the configured default when absent.
    #[serde(default)]
    pub model: Option<String>,
    pub input: String,
    #[serde(default = "default_voice")]
    pub voice: String,
    #[serde(default = "default_response_format")]
    pub response_format: String,
    #[serde(flatten)]
    pub overrides: GenerationOverrides,
}

fn default_voice() -> String {
    "default".to_string()
}

fn default_response_format() -> String {
    "wav".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub model_default: String,
    pub device: String,
    pub voices_dir: String,
    pub loaded_models: BTreeMap<String, u32>,
}

pub fn create_router(state: Arc<AppState>) -> Router {
    log::info!("Creating API router with endpoints:");
    log::info!("  GET  /health");
    log::info!("  POST /v1/audio/speech");

    Router::new()
        .route("/health", get(health))
        .route("/v1/audio/speech", post(create_speech))
        .with_state(state)
}

/// Bind the configured host and port and serve until Ctrl-C.
pub async fn serve(state: Arc<AppState>) -> TtsResult<()> {
    let host = state.settings.host.clone();
    let listener = tokio::net::TcpListener::bind((host.as_str(), state.settings.port)).await?;
    log::info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    log::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    log::info!("Shutdown signal received");
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    log::debug!("Health check endpoint called");
    Json(HealthResponse {
        status: "ok".to_string(),
        model_default: state.settings.model.clone(),
        device: state.settings.device.clone(),
        voices_dir: state.settings.voices_dir.display().to_string(),
        loaded_models: state.registry.loaded_sample_rates(),
    })
}

async fn create_speech(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<SpeechRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let start = Instant::now();
    let Json(payload) = payload.map_err(|rejection| {
        log::debug!("Rejected speech request body: {}", rejection.body_text());
        ApiError::Unprocessable(rejection.body_text())
    })?;

    if payload.input.is_empty() {
        return Err(ApiError::Unprocessable(
            "input must contain at least 1 character".to_string(),
        ));
    }
    if !payload.response_format.eq_ignore_ascii_case("wav") {
        return Err(ApiError::BadRequest(
            "Only response_format='wav' is currently supported.".to_string(),
        ));
    }

    let voices_dir = &state.settings.voices_dir;
    let prompt_path = voice_prompt_path(voices_dir, &payload.voice);
    if !is_default_voice(&payload.voice) && prompt_path.is_none() {
        return Err(TtsError::VoiceNotFound {
            voice: payload.voice.clone(),
            voices_dir: voices_dir.clone(),
        }
        .into());
    }

    let model = payload
        .model
        .clone()
        .unwrap_or_else(|| state.settings.model.clone());
    let model_header = HeaderValue::from_str(&model.to_lowercase())
        .map_err(|_| ApiError::BadRequest(format!("Invalid model name: {model:?}")))?;

    let backend = state.registry.get(&model)?;
    let kwargs = state
        .settings
        .generation_defaults()
        .resolve(&payload.overrides)
        .to_param_bag();

    let text = payload.input.clone();
    let audio = tokio::task::spawn_blocking(move || {
        backend.synthesize(&text, prompt_path.as_deref(), kwargs)
    })
    .await
    .map_err(|e| ApiError::synthesis(format!("task join error: {e}")))?
    .map_err(|e| {
        log::error!("Synthesis with '{model}' failed: {e}");
        ApiError::synthesis(synthesis_message(e))
    })?;

    log::info!(
        "Synthesized {} chars with '{}' (voice '{}') in {:.2}s, {} bytes",
        payload.input.chars().count(),
        model,
        payload.voice,
        start.elapsed().as_secs_f64(),
        audio.len()
    );

    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("audio/wav")),
            (HeaderName::from_static(MODEL_HEADER), model_header),
        ],
        audio,
    )
        .into_response())
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Unprocessable(String),
    Internal(String),
}

impl ApiError {
    fn synthesis(err: impl std::fmt::Display) -> Self {
        ApiError::Internal(format!("TTS generation failed: {err}"))
    }
}

/// The message of a failed synthesis, without the error variant's own prefix.
fn synthesis_message(err: TtsError) -> String {
    match err {
        TtsError::Generation(msg) => msg,
        other => other.to_string(),
    }
}

impl From<TtsError> for ApiError {
    fn from(err: TtsError) -> Self {
        match err {
            TtsError::Validation(msg) => ApiError::BadRequest(msg),
            err @ TtsError::VoiceNotFound { .. } => ApiError::NotFound(err.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Unprocessable(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(serde_json::json!({
            "detail": detail
        }));

        (status, body).into_response()
    }
}
