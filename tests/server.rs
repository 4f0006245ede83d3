use std::io::Cursor;
use std::path::Path;
use std::sync::{Arc, Mutex};

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use ndarray::Array1;
use tower::ServiceExt;

use local_tts::device::CpuOnlyProbe;
use local_tts::server::{create_router, AppState, HealthResponse, MODEL_HEADER};
use local_tts::{
    BoxError, ConstructError, ConstructorCall, Generator, ModelConstructor, ModelFamily,
    ModelProvider, ParamBag, RawOutput, SettingsBuilder, SpeechModel,
};

const FAMILY: ModelFamily = ModelFamily {
    name: "Stub",
    standard_variant: "stub",
    turbo_variant: "stub-turbo",
    turbo_aliases: &["turbo"],
};

type Calls = Arc<Mutex<Vec<(String, ParamBag)>>>;

/// Returns the same buffer for every request and records what it was given.
struct FixedModel {
    calls: Calls,
    fail: bool,
}

impl SpeechModel for FixedModel {
    fn property(&self, name: &str) -> Option<serde_json::Value> {
        (name == "sr").then(|| serde_json::json!(22_050))
    }

    fn generator(&mut self) -> Option<&mut dyn Generator> {
        Some(self)
    }
}

impl Generator for FixedModel {
    fn accepted_params(&self) -> Option<&[&str]> {
        Some(&["temperature", "exaggeration", "audio_prompt_path"])
    }

    fn generate(&mut self, text: &str, params: &ParamBag) -> Result<RawOutput, BoxError> {
        self.calls
            .lock()
            .unwrap()
            .push((text.to_string(), params.clone()));
        if self.fail {
            return Err("CUDA out of memory".into());
        }
        let samples: Vec<f32> = (0..480).map(|i| (i as f32 * 0.05).sin() * 0.3).collect();
        Ok(RawOutput::Samples(Array1::from(samples).into_dyn()))
    }
}

struct StubProvider {
    calls: Calls,
    fail: bool,
}

impl ModelConstructor for StubProvider {
    fn construct(&self, call: ConstructorCall<'_>) -> Result<Box<dyn SpeechModel>, ConstructError> {
        match call {
            ConstructorCall::NoArgs => Ok(Box::new(FixedModel {
                calls: Arc::clone(&self.calls),
                fail: self.fail,
            })),
            other => Err(ConstructError::SignatureMismatch(format!(
                "unexpected {}",
                other.label()
            ))),
        }
    }
}

impl ModelProvider for StubProvider {
    fn family(&self) -> &ModelFamily {
        &FAMILY
    }

    fn entry_point(&self, variant: &str) -> Option<&dyn ModelConstructor> {
        (variant == "stub").then_some(self as &dyn ModelConstructor)
    }
}

struct Harness {
    app: Router,
    calls: Calls,
    _voices: tempfile::TempDir,
}

fn harness(fail: bool) -> Harness {
    let voices = tempfile::tempdir().unwrap();
    std::fs::write(voices.path().join("alice.wav"), b"RIFF").unwrap();

    let settings = SettingsBuilder::default()
        .model("stub")
        .device("auto")
        .voices_dir(voices.path())
        .build()
        .unwrap();
    let calls: Calls = Arc::default();
    let provider = Arc::new(StubProvider {
        calls: Arc::clone(&calls),
        fail,
    });
    let state = Arc::new(AppState::new(settings, provider, Box::new(CpuOnlyProbe)));
    state.startup().unwrap();

    Harness {
        app: create_router(state),
        calls,
        _voices: voices,
    }
}

async fn post_speech(app: &Router, body: serde_json::Value) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
    let request = Request::builder()
        .method("POST")
        .uri("/v1/audio/speech")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, headers, bytes.to_vec())
}

async fn detail(app: &Router, body: serde_json::Value) -> (StatusCode, String) {
    let (status, _, bytes) = post_speech(app, body).await;
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    (status, json["detail"].as_str().unwrap_or_default().to_string())
}

async fn health(app: &Router) -> HealthResponse {
    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn default_voice_returns_identical_wav_each_time() {
    let h = harness(false);
    let body = serde_json::json!({"input": "hello world", "voice": "default"});

    let (status, headers, first) = post_speech(&h.app, body.clone()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "audio/wav");
    let (_, _, second) = post_speech(&h.app, body).await;
    assert_eq!(first, second);

    let reader = hound::WavReader::new(Cursor::new(&first)).unwrap();
    let spec = reader.spec();
    assert_eq!(spec.channels, 1);
    assert_eq!(spec.bits_per_sample, 16);
    assert_eq!(spec.sample_rate, 22_050);
    assert_eq!(reader.len(), 480);
}

#[tokio::test]
async fn model_header_is_lowercased_request_model() {
    let h = harness(false);
    let (status, headers, _) =
        post_speech(&h.app, serde_json::json!({"input": "hi", "model": "STUB"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[MODEL_HEADER], "stub");

    let (_, headers, _) = post_speech(&h.app, serde_json::json!({"input": "hi"})).await;
    assert_eq!(headers[MODEL_HEADER], "stub");
}

#[tokio::test]
async fn voice_file_is_passed_as_prompt_and_kwargs_are_filtered() {
    let h = harness(false);
    let (status, _, _) = post_speech(
        &h.app,
        serde_json::json!({"input": "hello", "voice": "alice", "temperature": 0.9, "top_p": null}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let calls = h.calls.lock().unwrap();
    let (text, params) = &calls[0];
    assert_eq!(text, "hello");
    let keys: Vec<&str> = params.keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["audio_prompt_path", "exaggeration", "temperature"]);
    assert_eq!(params["temperature"].as_f64(), Some(0.9));
    assert_eq!(params["exaggeration"].as_f64(), Some(0.5));
    let prompt = params["audio_prompt_path"].as_str().unwrap();
    assert!(Path::new(prompt).ends_with("alice.wav"), "{prompt}");
}

#[tokio::test]
async fn unknown_voice_is_not_found() {
    let h = harness(false);
    let (status, message) =
        detail(&h.app, serde_json::json!({"input": "hi", "voice": "missing_voice"})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(message.contains("missing_voice"), "{message}");
    assert!(h.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn only_wav_is_supported() {
    let h = harness(false);
    let (status, _) =
        detail(&h.app, serde_json::json!({"input": "hi", "response_format": "mp3"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _, _) =
        post_speech(&h.app, serde_json::json!({"input": "hi", "response_format": "WAV"})).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn empty_input_is_rejected_before_loading() {
    let h = harness(false);
    let (status, _) = detail(&h.app, serde_json::json!({"input": ""})).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(health(&h.app).await.loaded_models.is_empty());
}

#[tokio::test]
async fn generation_failure_is_a_server_error() {
    let h = harness(true);
    let (status, message) = detail(&h.app, serde_json::json!({"input": "hi"})).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(message, "TTS generation failed: CUDA out of memory");
}

async fn post_raw(app: &Router, body: &'static str) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("POST")
        .uri("/v1/audio/speech")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn unreadable_body_is_unprocessable_with_detail() {
    let h = harness(false);

    let (status, json) = post_raw(&h.app, r#"{"voice": "alice"}"#).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(json["detail"].as_str().unwrap().contains("input"), "{json}");

    let (status, json) = post_raw(&h.app, r#"{"input": "hi""#).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(json["detail"].is_string(), "{json}");

    assert!(h.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn health_lists_only_loaded_models() {
    let h = harness(false);
    let before = health(&h.app).await;
    assert_eq!(before.status, "ok");
    assert_eq!(before.model_default, "stub");
    assert_eq!(before.device, "auto");
    assert!(before.loaded_models.is_empty());

    post_speech(&h.app, serde_json::json!({"input": "hi"})).await;
    let after = health(&h.app).await;
    assert_eq!(after.loaded_models.len(), 1);
    assert_eq!(after.loaded_models["stub"], 22_050);
}
