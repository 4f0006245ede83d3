//! Signature-adaptive model loading.
//!
//! A [`ModelProvider`] exposes construction entry points by variant name.
//! Different releases of a model family disagree on whether the device is a
//! named argument, a positional argument, or not accepted at all, so each
//! entry point is probed with every [`ConstructorCall`] in turn. Only a
//! [`ConstructError::SignatureMismatch`] moves on to the next convention.

use crate::error::{BoxError, TtsError, TtsResult};
use crate::model::SpeechModel;

/// Attribute names probed, in order, for the model's native sample rate.
pub const SAMPLE_RATE_ATTRIBUTES: [&str; 3] = ["sample_rate", "sampling_rate", "sr"];

/// A calling convention for a model constructor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstructorCall<'a> {
    /// `from_pretrained(device=...)`
    DeviceKeyword(&'a str),
    /// `from_pretrained(...)` with the device as the only argument
    DevicePositional(&'a str),
    /// `from_pretrained()`
    NoArgs,
}

impl<'a> ConstructorCall<'a> {
    /// All conventions in the order they are attempted.
    pub fn attempts(device: &'a str) -> [ConstructorCall<'a>; 3] {
        [
            ConstructorCall::DeviceKeyword(device),
            ConstructorCall::DevicePositional(device),
            ConstructorCall::NoArgs,
        ]
    }

    pub fn label(&self) -> &'static str {
        match self {
            ConstructorCall::DeviceKeyword(_) => "device keyword",
            ConstructorCall::DevicePositional(_) => "positional device",
            ConstructorCall::NoArgs => "no arguments",
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConstructError {
    /// Wrong arity or an unknown keyword. The loader tries the next convention.
    #[error("signature mismatch: {0}")]
    SignatureMismatch(String),
    /// The constructor ran and failed.
    #[error(transparent)]
    Failed(BoxError),
}

impl ConstructError {
    pub fn failed(err: impl Into<BoxError>) -> Self {
        ConstructError::Failed(err.into())
    }
}

/// A named way of building a model instance.
pub trait ModelConstructor: Send + Sync {
    fn construct(&self, call: ConstructorCall<'_>) -> Result<Box<dyn SpeechModel>, ConstructError>;
}

/// Names describing one model family and its variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelFamily {
    /// Human-readable family name used in errors.
    pub name: &'static str,
    /// Variant tried first for ordinary model names.
    pub standard_variant: &'static str,
    /// Variant tried first for turbo aliases.
    pub turbo_variant: &'static str,
    /// Logical model names that select the turbo variant first.
    pub turbo_aliases: &'static [&'static str],
}

impl ModelFamily {
    /// Variant names to try for `model_name`, most preferred first.
    pub fn variant_order(&self, model_name: &str) -> [&'static str; 2] {
        let normalized = model_name.trim().to_lowercase();
        if self.turbo_aliases.iter().any(|alias| *alias == normalized) {
            [self.turbo_variant, self.standard_variant]
        } else {
            [self.standard_variant, self.turbo_variant]
        }
    }
}

/// Source of model constructors, looked up by variant name.
pub trait ModelProvider: Send + Sync {
    fn family(&self) -> &ModelFamily;

    /// The constructor for `variant`, or `None` if that variant is not installed.
    fn entry_point(&self, variant: &str) -> Option<&dyn ModelConstructor>;
}

/// A freshly constructed model and the sample rate it advertises.
pub struct LoadedModel {
    pub model: Box<dyn SpeechModel>,
    pub variant: &'static str,
    pub sample_rate: Option<u32>,
}

impl std::fmt::Debug for LoadedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedModel")
            .field("variant", &self.variant)
            .field("sample_rate", &self.sample_rate)
            .finish_non_exhaustive()
    }
}

/// Instantiate the best available variant of `provider`'s family for `model_name`.
pub fn load_model(
    provider: &dyn ModelProvider,
    model_name: &str,
    device: &str,
) -> TtsResult<LoadedModel> {
    let family = provider.family();
    let mut last_mismatch: Option<String> = None;

    for variant in family.variant_order(model_name) {
        let Some(constructor) = provider.entry_point(variant) else {
            log::debug!("Variant '{variant}' is not installed, skipping");
            continue;
        };

        match construct_with_fallback(constructor, variant, device) {
            Ok(mut model) => {
                model
                    .to_device(device)
                    .map_err(|e| TtsError::load(family.name, e))?;
                let sample_rate = probe_sample_rate(model.as_ref());
                log::info!(
                    "Loaded {} variant '{variant}' on '{device}' (sample rate: {})",
                    family.name,
                    sample_rate.map_or_else(|| "unreported".to_string(), |r| r.to_string())
                );
                return Ok(LoadedModel {
                    model,
                    variant,
                    sample_rate,
                });
            }
            Err(ConstructError::SignatureMismatch(reason)) => {
                log::warn!("No calling convention matched variant '{variant}': {reason}");
                last_mismatch = Some(reason);
            }
            Err(ConstructError::Failed(err)) => {
                log::error!("Constructing {} variant '{variant}' failed: {err}", family.name);
                return Err(TtsError::load(family.name, err));
            }
        }
    }

    let reason = match last_mismatch {
        Some(reason) => format!("no constructor accepted the available calling conventions ({reason})"),
        None => "no model variant is installed".to_string(),
    };
    Err(TtsError::load(family.name, reason))
}

fn construct_with_fallback(
    constructor: &dyn ModelConstructor,
    variant: &str,
    device: &str,
) -> Result<Box<dyn SpeechModel>, ConstructError> {
    let mut last = None;
    for call in ConstructorCall::attempts(device) {
        match constructor.construct(call) {
            Ok(model) => {
                log::debug!("Variant '{variant}' constructed with {}", call.label());
                return Ok(model);
            }
            Err(ConstructError::SignatureMismatch(reason)) => {
                log::debug!("Variant '{variant}' rejected {}: {reason}", call.label());
                last = Some(reason);
            }
            Err(err) => return Err(err),
        }
    }
    Err(ConstructError::SignatureMismatch(
        last.unwrap_or_else(|| "no calling convention attempted".to_string()),
    ))
}

/// First positive integer among [`SAMPLE_RATE_ATTRIBUTES`].
fn probe_sample_rate(model: &dyn SpeechModel) -> Option<u32> {
    SAMPLE_RATE_ATTRIBUTES.iter().find_map(|name| {
        model
            .property(name)
            .and_then(|value| value.as_u64())
            .filter(|rate| *rate > 0)
            .and_then(|rate| u32::try_from(rate).ok())
    })
}
