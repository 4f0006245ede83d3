//! # local-tts
//!
//! A local text-to-speech server library: loads a speech model on demand,
//! resolves per-request generation parameters, and returns loudness-normalized
//! 16-bit mono WAV audio over an HTTP API shaped like `POST /v1/audio/speech`.
//!
//! ## Features
//!
//! - **Adaptive loading**: model constructors are probed with several calling
//!   conventions, and the turbo or standard variant is chosen by model name
//! - **Parameter filtering**: callers pass the full set of generation knobs;
//!   each model only receives the keywords it declares
//! - **Deterministic output**: peak-safe RMS normalization and bit-exact WAV
//!   encoding
//! - **Kokoro**: a built-in ONNX model family behind the `kokoro` feature
//!
//! ## Quick Start
//!
//! ```toml
//! [dependencies]
//! local-tts = { version = "0.1", features = ["kokoro"] }
//! ```
//!
//! ```ignore
//! use std::sync::Arc;
//! use local_tts::{device, engines::kokoro::KokoroProvider, server, Settings};
//!
//! let settings = Settings::from_env()?;
//! let provider = Arc::new(KokoroProvider::new(&settings.model_dir));
//! let state = Arc::new(server::AppState::new(settings, provider, device::default_probe()));
//! state.startup()?;
//! server::serve(state).await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod audio;
pub mod backend;
pub mod config;
pub mod device;
pub mod engines;
pub mod error;
pub mod loader;
pub mod model;
pub mod params;
pub mod server;
pub mod voices;

pub use audio::{OutputValue, RawOutput};
pub use backend::{Backend, BackendOptions, BackendRegistry};
pub use config::{Settings, SettingsBuilder};
pub use error::{BoxError, TtsError, TtsResult};
pub use loader::{
    ConstructError, ConstructorCall, ModelConstructor, ModelFamily, ModelProvider,
};
pub use model::{Generator, SpeechModel};
pub use params::{GenerationOverrides, GenerationParams, ParamBag, ParamValue};
