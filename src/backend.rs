//! Per-model synthesis backends and the process-wide registry that owns them.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::audio::{self, DEFAULT_SAMPLE_RATE};
use crate::device::{select_device, DeviceProbe};
use crate::error::{TtsError, TtsResult};
use crate::loader::{load_model, ModelProvider};
use crate::model::SpeechModel;
use crate::params::{filter_kwargs, ParamBag, ParamValue, AUDIO_PROMPT_PATH};

/// Settings shared by every backend.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendOptions {
    /// Requested device; `"auto"` is resolved per backend.
    pub device: String,
    pub output_rms_db: f64,
    pub output_peak_db: f64,
}

impl Default for BackendOptions {
    fn default() -> Self {
        Self {
            device: "auto".to_string(),
            output_rms_db: -16.0,
            output_peak_db: -1.0,
        }
    }
}

enum ModelState {
    Unloaded,
    Loaded(Box<dyn SpeechModel>),
    /// Load failed; the error is replayed until the process restarts.
    Failed(String),
}

/// Normalize a model name into a cache key.
pub fn normalize_model_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// A single model name's synthesis pipeline.
///
/// The model is loaded lazily by the first [`Backend::synthesize`] call, or
/// eagerly through [`Backend::load`].
pub struct Backend {
    model_name: String,
    device: String,
    output_rms_db: f64,
    output_peak_db: f64,
    provider: Arc<dyn ModelProvider>,
    state: Mutex<ModelState>,
    loaded: AtomicBool,
    sample_rate: AtomicU32,
}

impl Backend {
    pub fn new(
        model_name: &str,
        options: &BackendOptions,
        provider: Arc<dyn ModelProvider>,
        probe: &dyn DeviceProbe,
    ) -> Self {
        Self {
            model_name: normalize_model_name(model_name),
            device: select_device(&options.device, probe),
            output_rms_db: options.output_rms_db,
            output_peak_db: options.output_peak_db,
            provider,
            state: Mutex::new(ModelState::Unloaded),
            loaded: AtomicBool::new(false),
            sample_rate: AtomicU32::new(DEFAULT_SAMPLE_RATE),
        }
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    /// The model's native sample rate, or the default until it reports one.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate.load(Ordering::Acquire)
    }

    /// Whether the model has been loaded. Does not wait on an in-flight request.
    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    /// Load the model if it is not loaded yet.
    pub fn load(&self) -> TtsResult<()> {
        let mut state = self.lock_state()?;
        self.ensure_loaded(&mut state)?;
        Ok(())
    }

    /// Synthesize `text` and return a complete WAV file.
    ///
    /// `generation_kwargs` may contain keywords the model does not accept;
    /// they are dropped before the call.
    pub fn synthesize(
        &self,
        text: &str,
        voice_prompt_path: Option<&Path>,
        generation_kwargs: ParamBag,
    ) -> TtsResult<Vec<u8>> {
        let mut state = self.lock_state()?;
        let model = self.ensure_loaded(&mut state)?;

        let generator = model.generator().ok_or_else(|| {
            TtsError::Generation(format!(
                "loaded model '{}' does not expose a generate entry point",
                self.model_name
            ))
        })?;

        let mut kwargs = generation_kwargs;
        if let Some(path) = voice_prompt_path {
            kwargs.insert(
                AUDIO_PROMPT_PATH.to_string(),
                ParamValue::Text(path.display().to_string()),
            );
        }
        let kwargs = filter_kwargs(&*generator, kwargs);
        log::debug!(
            "Generating with '{}' ({} chars, kwargs: {:?})",
            self.model_name,
            text.chars().count(),
            kwargs.keys().collect::<Vec<_>>()
        );

        let output = generator
            .generate(text, &kwargs)
            .map_err(|e| TtsError::Generation(e.to_string()))?;
        drop(state);

        let sample_rate = output.effective_sample_rate(self.sample_rate())?;
        audio::to_wav(output, sample_rate, self.output_rms_db, self.output_peak_db)
    }

    fn ensure_loaded<'a>(
        &self,
        state: &'a mut MutexGuard<'_, ModelState>,
    ) -> TtsResult<&'a mut Box<dyn SpeechModel>> {
        if let ModelState::Failed(reason) = &**state {
            return Err(TtsError::Load {
                family: self.provider.family().name.to_string(),
                reason: reason.clone(),
            });
        }

        if matches!(**state, ModelState::Unloaded) {
            match load_model(self.provider.as_ref(), &self.model_name, &self.device) {
                Ok(loaded) => {
                    if let Some(rate) = loaded.sample_rate {
                        self.sample_rate.store(rate, Ordering::Release);
                    }
                    **state = ModelState::Loaded(loaded.model);
                    self.loaded.store(true, Ordering::Release);
                }
                Err(err) => {
                    log::error!("Loading model '{}' failed: {err}", self.model_name);
                    let reason = match &err {
                        TtsError::Load { reason, .. } => reason.clone(),
                        other => other.to_string(),
                    };
                    **state = ModelState::Failed(reason);
                    return Err(err);
                }
            }
        }

        match &mut **state {
            ModelState::Loaded(model) => Ok(model),
            _ => Err(TtsError::Lock(format!(
                "model '{}' is in an unexpected state",
                self.model_name
            ))),
        }
    }

    fn lock_state(&self) -> TtsResult<MutexGuard<'_, ModelState>> {
        self.state
            .lock()
            .map_err(|e| TtsError::Lock(format!("model '{}': {e}", self.model_name)))
    }
}

/// Backends keyed by normalized model name. Entries are never evicted.
pub struct BackendRegistry {
    provider: Arc<dyn ModelProvider>,
    probe: Box<dyn DeviceProbe>,
    options: BackendOptions,
    backends: Mutex<HashMap<String, Arc<Backend>>>,
}

impl BackendRegistry {
    pub fn new(
        provider: Arc<dyn ModelProvider>,
        probe: Box<dyn DeviceProbe>,
        options: BackendOptions,
    ) -> Self {
        Self {
            provider,
            probe,
            options,
            backends: Mutex::new(HashMap::new()),
        }
    }

    /// The backend for `model_name`, created on first use.
    pub fn get(&self, model_name: &str) -> TtsResult<Arc<Backend>> {
        let key = normalize_model_name(model_name);
        let mut backends = self
            .backends
            .lock()
            .map_err(|e| TtsError::Lock(format!("backend registry: {e}")))?;

        let backend = backends.entry(key).or_insert_with_key(|key| {
            log::info!("Creating backend for model '{key}'");
            Arc::new(Backend::new(
                key,
                &self.options,
                Arc::clone(&self.provider),
                self.probe.as_ref(),
            ))
        });
        Ok(Arc::clone(backend))
    }

    /// Sample rates of every backend whose model is actually loaded.
    pub fn loaded_sample_rates(&self) -> BTreeMap<String, u32> {
        let backends: Vec<Arc<Backend>> = match self.backends.lock() {
            Ok(map) => map.values().cloned().collect(),
            Err(_) => return BTreeMap::new(),
        };
        backends
            .into_iter()
            .filter(|backend| backend.is_loaded())
            .map(|backend| (backend.model_name().to_string(), backend.sample_rate()))
            .collect()
    }
}
