//! Process-wide settings, read from `LOCAL_TTS_*` environment variables.

use std::path::{Path, PathBuf};

use derive_builder::Builder;

use crate::backend::BackendOptions;
use crate::error::{TtsError, TtsResult};
use crate::params::GenerationParams;

pub const ENV_MODEL: &str = "LOCAL_TTS_MODEL";
pub const ENV_DEVICE: &str = "LOCAL_TTS_DEVICE";
pub const ENV_HOST: &str = "LOCAL_TTS_HOST";
pub const ENV_PORT: &str = "LOCAL_TTS_PORT";
pub const ENV_VOICES_DIR: &str = "LOCAL_TTS_VOICES_DIR";
pub const ENV_MODEL_DIR: &str = "LOCAL_TTS_MODEL_DIR";
pub const ENV_PRELOAD: &str = "LOCAL_TTS_PRELOAD";
pub const ENV_TEMPERATURE: &str = "LOCAL_TTS_TEMPERATURE";
pub const ENV_TOP_P: &str = "LOCAL_TTS_TOP_P";
pub const ENV_MIN_P: &str = "LOCAL_TTS_MIN_P";
pub const ENV_REPETITION_PENALTY: &str = "LOCAL_TTS_REPETITION_PENALTY";
pub const ENV_CFG_WEIGHT: &str = "LOCAL_TTS_CFG_WEIGHT";
pub const ENV_EXAGGERATION: &str = "LOCAL_TTS_EXAGGERATION";
pub const ENV_OUTPUT_RMS_DB: &str = "LOCAL_TTS_OUTPUT_RMS_DB";
pub const ENV_OUTPUT_PEAK_DB: &str = "LOCAL_TTS_OUTPUT_PEAK_DB";

/// Server and synthesis settings.
///
/// Fields left unset on a [`SettingsBuilder`] take their value from
/// [`Settings::default`].
#[derive(Debug, Clone, PartialEq, Builder)]
#[builder(default, setter(into))]
pub struct Settings {
    /// Model name used when a request does not name one.
    pub model: String,
    /// Requested compute device (`auto`, `cpu`, `cuda`, `mps`).
    pub device: String,
    pub host: String,
    pub port: u16,
    /// Directory holding voice prompt files.
    pub voices_dir: PathBuf,
    /// Directory holding the model weights.
    pub model_dir: PathBuf,
    /// Load the default model at startup instead of on first request.
    pub preload: bool,
    pub temperature: f64,
    pub top_p: f64,
    pub min_p: f64,
    pub repetition_penalty: f64,
    pub cfg_weight: f64,
    pub exaggeration: f64,
    /// Target RMS loudness of the output, in dBFS.
    pub output_rms_db: f64,
    /// Ceiling for the output peak, in dBFS.
    pub output_peak_db: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            model: "kokoro".to_string(),
            device: "auto".to_string(),
            host: "127.0.0.1".to_string(),
            port: 8000,
            voices_dir: PathBuf::from("voices"),
            model_dir: PathBuf::from("models/kokoro"),
            preload: false,
            temperature: 0.65,
            top_p: 0.9,
            min_p: 0.05,
            repetition_penalty: 1.15,
            cfg_weight: 0.6,
            exaggeration: 0.5,
            output_rms_db: -16.0,
            output_peak_db: -1.0,
        }
    }
}

impl Settings {
    /// Read settings from the process environment.
    ///
    /// Relative directories are resolved against the current working directory.
    pub fn from_env() -> TtsResult<Self> {
        let base_dir = std::env::current_dir()?;
        Self::from_lookup(|key| std::env::var(key).ok(), &base_dir)
    }

    /// Read settings through `lookup`, resolving relative directories against `base_dir`.
    pub fn from_lookup<F>(lookup: F, base_dir: &Path) -> TtsResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut builder = SettingsBuilder::default();

        if let Some(model) = lookup(ENV_MODEL) {
            builder.model(model);
        }
        if let Some(device) = lookup(ENV_DEVICE) {
            builder.device(device);
        }
        if let Some(host) = lookup(ENV_HOST) {
            builder.host(host);
        }
        if let Some(port) = lookup(ENV_PORT) {
            let port: u16 = port
                .trim()
                .parse()
                .map_err(|e| TtsError::Config(format!("{ENV_PORT}={port:?}: {e}")))?;
            builder.port(port);
        }
        let voices_dir = lookup(ENV_VOICES_DIR).unwrap_or_else(|| "voices".to_string());
        builder.voices_dir(resolve_dir(&voices_dir, base_dir));
        let model_dir = lookup(ENV_MODEL_DIR).unwrap_or_else(|| "models/kokoro".to_string());
        builder.model_dir(resolve_dir(&model_dir, base_dir));
        if let Some(preload) = lookup(ENV_PRELOAD) {
            builder.preload(parse_bool(&preload));
        }

        let floats: [(&str, fn(&mut SettingsBuilder, f64)); 8] = [
            (ENV_TEMPERATURE, |b, v| {
                b.temperature(v);
            }),
            (ENV_TOP_P, |b, v| {
                b.top_p(v);
            }),
            (ENV_MIN_P, |b, v| {
                b.min_p(v);
            }),
            (ENV_REPETITION_PENALTY, |b, v| {
                b.repetition_penalty(v);
            }),
            (ENV_CFG_WEIGHT, |b, v| {
                b.cfg_weight(v);
            }),
            (ENV_EXAGGERATION, |b, v| {
                b.exaggeration(v);
            }),
            (ENV_OUTPUT_RMS_DB, |b, v| {
                b.output_rms_db(v);
            }),
            (ENV_OUTPUT_PEAK_DB, |b, v| {
                b.output_peak_db(v);
            }),
        ];
        for (key, set) in floats {
            if let Some(raw) = lookup(key) {
                let value: f64 = raw
                    .trim()
                    .parse()
                    .map_err(|e| TtsError::Config(format!("{key}={raw:?}: {e}")))?;
                set(&mut builder, value);
            }
        }

        builder
            .build()
            .map_err(|e| TtsError::Config(e.to_string()))
    }

    /// Process-wide generation defaults.
    pub fn generation_defaults(&self) -> GenerationParams {
        GenerationParams {
            temperature: self.temperature,
            top_p: self.top_p,
            min_p: self.min_p,
            repetition_penalty: self.repetition_penalty,
            cfg_weight: self.cfg_weight,
            exaggeration: self.exaggeration,
        }
    }

    /// Options shared by every backend this process creates.
    pub fn backend_options(&self) -> BackendOptions {
        BackendOptions {
            device: self.device.clone(),
            output_rms_db: self.output_rms_db,
            output_peak_db: self.output_peak_db,
        }
    }
}

fn parse_bool(raw: &str) -> bool {
    matches!(
        raw.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "y" | "on"
    )
}

/// Expand a leading `~` and anchor relative paths at `base_dir`.
fn resolve_dir(raw: &str, base_dir: &Path) -> PathBuf {
    let expanded = match raw.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => match dirs::home_dir() {
            Some(home) => home.join(rest.trim_start_matches('/')),
            None => PathBuf::from(raw),
        },
        _ => PathBuf::from(raw),
    };

    if expanded.is_absolute() {
        expanded
    } else {
        base_dir.join(expanded)
    }
}
