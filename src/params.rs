//! Generation parameters: process-wide defaults, per-request overrides, and
//! the keyword bag handed to a model's generator.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::Generator;

/// Names of the tunable generation knobs, in canonical order.
pub const GENERATION_PARAM_NAMES: [&str; 6] = [
    "temperature",
    "top_p",
    "min_p",
    "repetition_penalty",
    "cfg_weight",
    "exaggeration",
];

/// Keyword under which a voice prompt path is passed to generators.
pub const AUDIO_PROMPT_PATH: &str = "audio_prompt_path";

/// A fully resolved set of generation knobs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub temperature: f64,
    pub top_p: f64,
    pub min_p: f64,
    pub repetition_penalty: f64,
    pub cfg_weight: f64,
    pub exaggeration: f64,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.65,
            top_p: 0.9,
            min_p: 0.05,
            repetition_penalty: 1.15,
            cfg_weight: 0.6,
            exaggeration: 0.5,
        }
    }
}

/// Per-request overrides. `None` (absent or JSON `null`) keeps the default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationOverrides {
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub top_p: Option<f64>,
    #[serde(default)]
    pub min_p: Option<f64>,
    #[serde(default)]
    pub repetition_penalty: Option<f64>,
    #[serde(default)]
    pub cfg_weight: Option<f64>,
    #[serde(default)]
    pub exaggeration: Option<f64>,
}

impl GenerationParams {
    /// Merge overrides on top of these defaults. `self` is left untouched.
    pub fn resolve(&self, overrides: &GenerationOverrides) -> GenerationParams {
        GenerationParams {
            temperature: overrides.temperature.unwrap_or(self.temperature),
            top_p: overrides.top_p.unwrap_or(self.top_p),
            min_p: overrides.min_p.unwrap_or(self.min_p),
            repetition_penalty: overrides
                .repetition_penalty
                .unwrap_or(self.repetition_penalty),
            cfg_weight: overrides.cfg_weight.unwrap_or(self.cfg_weight),
            exaggeration: overrides.exaggeration.unwrap_or(self.exaggeration),
        }
    }

    /// Look up a knob by name.
    pub fn get(&self, name: &str) -> Option<f64> {
        match name {
            "temperature" => Some(self.temperature),
            "top_p" => Some(self.top_p),
            "min_p" => Some(self.min_p),
            "repetition_penalty" => Some(self.repetition_penalty),
            "cfg_weight" => Some(self.cfg_weight),
            "exaggeration" => Some(self.exaggeration),
            _ => None,
        }
    }

    /// Convert into a keyword bag for [`Backend::synthesize`](crate::Backend::synthesize).
    pub fn to_param_bag(&self) -> ParamBag {
        GENERATION_PARAM_NAMES
            .iter()
            .filter_map(|name| {
                self.get(name)
                    .map(|value| (name.to_string(), ParamValue::Float(value)))
            })
            .collect()
    }
}

/// A single keyword argument value.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Float(f64),
    Text(String),
}

impl ParamValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Float(v) => Some(*v),
            ParamValue::Text(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Text(s) => Some(s),
            ParamValue::Float(_) => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Float(v) => write!(f, "{v}"),
            ParamValue::Text(s) => write!(f, "{s}"),
        }
    }
}

/// Keyword arguments for a generator call.
pub type ParamBag = BTreeMap<String, ParamValue>;

/// Keep only the keywords `generator` declares it accepts.
///
/// A generator that publishes no parameter list gets the bag unchanged and is
/// responsible for rejecting anything it does not understand.
pub fn filter_kwargs<G: Generator + ?Sized>(generator: &G, params: ParamBag) -> ParamBag {
    let Some(accepted) = generator.accepted_params() else {
        return params;
    };

    params
        .into_iter()
        .filter(|(key, _)| accepted.iter().any(|name| *name == key.as_str()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::RawOutput;
    use crate::error::BoxError;

    struct Listed(&'static [&'static str]);

    impl Generator for Listed {
        fn accepted_params(&self) -> Option<&[&str]> {
            Some(self.0)
        }

        fn generate(&mut self, _text: &str, _params: &ParamBag) -> Result<RawOutput, BoxError> {
            unreachable!()
        }
    }

    struct Opaque;

    impl Generator for Opaque {
        fn generate(&mut self, _text: &str, _params: &ParamBag) -> Result<RawOutput, BoxError> {
            unreachable!()
        }
    }

    fn full_bag() -> ParamBag {
        let mut bag = GenerationParams::default().to_param_bag();
        bag.insert(
            AUDIO_PROMPT_PATH.to_string(),
            ParamValue::Text("/voices/alice.wav".to_string()),
        );
        bag
    }

    #[test]
    fn temperature_only_override_keeps_other_defaults() {
        let defaults = GenerationParams::default();
        let overrides = GenerationOverrides {
            temperature: Some(0.9),
            ..Default::default()
        };

        let resolved = defaults.resolve(&overrides);
        assert_eq!(resolved.temperature, 0.9);
        assert_eq!(resolved.top_p, defaults.top_p);
        assert_eq!(resolved.min_p, defaults.min_p);
        assert_eq!(resolved.repetition_penalty, defaults.repetition_penalty);
        assert_eq!(resolved.cfg_weight, defaults.cfg_weight);
        assert_eq!(resolved.exaggeration, defaults.exaggeration);
        // defaults are not mutated
        assert_eq!(defaults.temperature, 0.65);
    }

    #[test]
    fn null_overrides_deserialize_as_absent() {
        let overrides: GenerationOverrides =
            serde_json::from_str(r#"{"top_p": null, "cfg_weight": 0.3}"#).unwrap();
        assert_eq!(overrides.top_p, None);
        assert_eq!(overrides.cfg_weight, Some(0.3));

        let resolved = GenerationParams::default().resolve(&overrides);
        assert_eq!(resolved.top_p, 0.9);
        assert_eq!(resolved.cfg_weight, 0.3);
    }

    #[test]
    fn param_bag_has_all_six_knobs() {
        let bag = GenerationParams::default().to_param_bag();
        assert_eq!(bag.len(), GENERATION_PARAM_NAMES.len());
        assert_eq!(bag["repetition_penalty"], ParamValue::Float(1.15));
    }

    #[test]
    fn filter_keeps_only_accepted_keys() {
        let generator = Listed(&["temperature", "audio_prompt_path", "unused"]);
        let filtered = filter_kwargs(&generator, full_bag());

        let keys: Vec<&str> = filtered.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["audio_prompt_path", "temperature"]);
        assert_eq!(
            filtered[AUDIO_PROMPT_PATH].as_str(),
            Some("/voices/alice.wav")
        );
    }

    #[test]
    fn filter_is_idempotent() {
        let generator = Listed(&["top_p", "exaggeration"]);
        let once = filter_kwargs(&generator, full_bag());
        let twice = filter_kwargs(&generator, once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn opaque_generator_receives_everything() {
        let bag = full_bag();
        assert_eq!(filter_kwargs(&Opaque, bag.clone()), bag);
    }
}
