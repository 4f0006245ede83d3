use std::path::{Path, PathBuf};

use ndarray::{Array1, Array2, ArrayView2};
use ort::execution_providers::{
    CPUExecutionProvider, CUDAExecutionProvider, CoreMLExecutionProvider,
    ExecutionProviderDispatch,
};
use ort::inputs;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::TensorRef;

use crate::audio::{OutputValue, RawOutput};
use crate::error::BoxError;
use crate::model::{Generator, SpeechModel};
use crate::params::{ParamBag, AUDIO_PROMPT_PATH};

use super::phonemizer::{phonemize, voice_lang};
use super::vocab::{load_vocab, Vocab};
use super::voices::{load_style_table, style_for, StyleVector, VoiceStore};

/// Maximum number of phoneme tokens per inference call, before padding.
pub const MAX_PHONEME_LEN: usize = 510;

/// Style vector dimension for Kokoro.
pub const STYLE_DIM: usize = 256;

/// Output sample rate of every Kokoro graph.
pub const SAMPLE_RATE: u32 = 24000;

/// Voice used when a request carries no prompt.
pub const DEFAULT_VOICE: &str = "af_heart";

/// Voice archive expected next to the graph.
pub const VOICES_FILE: &str = "voices-v1.0.bin";

/// Vocabulary file expected next to the graph.
pub const CONFIG_FILE: &str = "config.json";

const CHUNK_CROSSFADE_SAMPLES: usize = 240; // 10ms @ 24kHz

/// Symbols a long token sequence may be split after.
const BREAK_SYMBOLS: [char; 6] = [';', ':', ',', '.', '!', '?'];

const ACCEPTED_PARAMS: &[&str] = &[AUDIO_PROMPT_PATH];

#[derive(thiserror::Error, Debug)]
pub enum KokoroError {
    #[error("ONNX runtime error: {0}")]
    Ort(#[from] ort::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
    #[error(
        "espeak-ng not found. Install: Linux: `sudo apt-get install espeak-ng`, \
         macOS: `brew install espeak-ng`, Windows: https://espeak-ng.org/download"
    )]
    EspeakNotFound,
    #[error("Phonemization failed: {0}")]
    PhonemizerFailed(String),
    #[error("Voice '{0}' not found in {VOICES_FILE}")]
    VoiceNotFound(String),
    #[error("Required file {} is missing", .0.display())]
    MissingFile(PathBuf),
    #[error("Unsupported device '{0}' (expected cpu, cuda or mps)")]
    UnsupportedDevice(String),
    #[error("Invalid config.json: {0}")]
    Config(String),
    #[error("Failed to parse voice file: {0}")]
    VoiceParse(String),
}

/// Where a request's style vectors come from.
enum VoicePrompt {
    /// A voice in the bundled archive.
    Named(String),
    /// A standalone `.npy` style table.
    Table { name: String, styles: Vec<StyleVector> },
}

impl VoicePrompt {
    /// `.npy` prompts are read as style tables; any other file selects the
    /// archive voice named by its stem.
    fn from_prompt_path(path: Option<&str>) -> Result<Self, KokoroError> {
        let Some(path) = path.map(Path::new) else {
            return Ok(VoicePrompt::Named(DEFAULT_VOICE.to_string()));
        };
        let name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .filter(|stem| !stem.is_empty())
            .ok_or_else(|| KokoroError::VoiceNotFound(path.display().to_string()))?;

        if path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("npy")) {
            let styles = load_style_table(path)?;
            Ok(VoicePrompt::Table { name, styles })
        } else {
            Ok(VoicePrompt::Named(name))
        }
    }

    fn name(&self) -> &str {
        match self {
            VoicePrompt::Named(name) | VoicePrompt::Table { name, .. } => name,
        }
    }
}

/// A Kokoro ONNX graph plus its voices and vocabulary.
pub struct KokoroModel {
    session: Session,
    voice_store: VoiceStore,
    vocab: Vocab,
    break_ids: Vec<i64>,
    device: String,
    /// "input_ids" or "tokens", depending on the export.
    tokens_input_name: String,
    speed_is_int32: bool,
}

impl KokoroModel {
    /// Load `graph_path` on `device`, reading voices and vocabulary from `model_dir`.
    pub fn load(graph_path: &Path, model_dir: &Path, device: &str) -> Result<Self, KokoroError> {
        let voices_path = required_file(model_dir, VOICES_FILE)?;
        let config_path = required_file(model_dir, CONFIG_FILE)?;
        let providers = execution_providers(device)?;

        log::info!(
            "Loading Kokoro graph {} on '{device}'",
            graph_path.display()
        );
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_execution_providers(providers)?
            .commit_from_file(graph_path)?;

        let tokens_input_name = detect_tokens_input(&session);
        let speed_is_int32 = detect_speed_type(&session);
        log::debug!("Detected: tokens_input='{tokens_input_name}', speed_is_int32={speed_is_int32}");

        let voice_store = VoiceStore::load(&voices_path)?;
        log::debug!("Kokoro voices: {}", voice_store.list_voices().join(", "));
        let vocab = load_vocab(&config_path)?;
        let break_ids = BREAK_SYMBOLS
            .iter()
            .filter_map(|symbol| vocab.get(symbol).copied())
            .collect();

        Ok(Self {
            session,
            voice_store,
            vocab,
            break_ids,
            device: device.to_string(),
            tokens_input_name,
            speed_is_int32,
        })
    }

    fn synthesize_text(&mut self, text: &str, voice: &VoicePrompt) -> Result<Vec<f32>, KokoroError> {
        let ids = phonemize(text, voice_lang(voice.name()), &self.vocab)?;
        if ids.is_empty() {
            log::warn!("No phoneme tokens produced for text: {text:?}");
            return Ok(Vec::new());
        }

        // One style for the whole utterance so chunk boundaries keep the same prosody.
        let table = match voice {
            VoicePrompt::Named(name) => self
                .voice_store
                .styles(name)
                .ok_or_else(|| KokoroError::VoiceNotFound(name.clone()))?,
            VoicePrompt::Table { styles, .. } => styles.as_slice(),
        };
        let style = style_for(table, ids.len()).ok_or_else(|| {
            KokoroError::VoiceParse(format!("voice '{}' has no style vectors", voice.name()))
        })?;

        let chunks = split_chunks(&ids, &self.break_ids);
        if chunks.len() > 1 {
            log::debug!(
                "Split {} phoneme tokens into {} chunks",
                ids.len(),
                chunks.len()
            );
        }

        let mut combined = Vec::with_capacity(ids.len() * 300);
        for chunk in chunks {
            let audio = self.infer(chunk, &style)?;
            append_with_crossfade(&mut combined, &audio, CHUNK_CROSSFADE_SAMPLES);
        }
        Ok(combined)
    }

    /// Run the graph on one chunk of token ids.
    fn infer(&mut self, tokens: &[i64], style: &StyleVector) -> Result<Vec<f32>, KokoroError> {
        let mut padded = Vec::with_capacity(tokens.len() + 2);
        padded.push(0);
        padded.extend_from_slice(tokens);
        padded.push(0);
        let tokens_arr = Array2::from_shape_vec((1, padded.len()), padded)?;
        let style_view = ArrayView2::from_shape((1, STYLE_DIM), style.as_slice())?;

        let outputs = if self.speed_is_int32 {
            let speed = Array1::from_elem(1, 1i32);
            self.session.run(inputs![
                self.tokens_input_name.as_str() => TensorRef::from_array_view(tokens_arr.view())?,
                "style" => TensorRef::from_array_view(style_view)?,
                "speed" => TensorRef::from_array_view(speed.view())?,
            ])?
        } else {
            let speed = Array1::from_elem(1, 1.0f32);
            self.session.run(inputs![
                self.tokens_input_name.as_str() => TensorRef::from_array_view(tokens_arr.view())?,
                "style" => TensorRef::from_array_view(style_view)?,
                "speed" => TensorRef::from_array_view(speed.view())?,
            ])?
        };

        let (_, waveform) = outputs
            .iter()
            .next()
            .ok_or_else(|| KokoroError::Ort(ort::Error::new("Kokoro graph produced no outputs")))?;
        let waveform = waveform.try_extract_array::<f32>()?;
        Ok(waveform.iter().copied().collect())
    }
}

impl SpeechModel for KokoroModel {
    fn property(&self, name: &str) -> Option<serde_json::Value> {
        match name {
            "sample_rate" => Some(serde_json::json!(SAMPLE_RATE)),
            "device" => Some(serde_json::json!(self.device)),
            _ => None,
        }
    }

    fn generator(&mut self) -> Option<&mut dyn Generator> {
        Some(self)
    }
}

impl Generator for KokoroModel {
    fn accepted_params(&self) -> Option<&[&str]> {
        Some(ACCEPTED_PARAMS)
    }

    fn generate(&mut self, text: &str, params: &ParamBag) -> Result<RawOutput, BoxError> {
        let prompt = params.get(AUDIO_PROMPT_PATH).and_then(|value| value.as_str());
        let voice = VoicePrompt::from_prompt_path(prompt)?;
        log::debug!("Kokoro voice '{}' for {} chars", voice.name(), text.chars().count());

        let samples = self.synthesize_text(text, &voice)?;
        Ok(RawOutput::WithRate(
            Array1::from(samples).into_dyn(),
            OutputValue::Integer(i64::from(SAMPLE_RATE)),
        ))
    }
}

fn required_file(model_dir: &Path, name: &str) -> Result<PathBuf, KokoroError> {
    let path = model_dir.join(name);
    if path.is_file() {
        Ok(path)
    } else {
        Err(KokoroError::MissingFile(path))
    }
}

/// ONNX Runtime execution providers for a symbolic device, CPU last as fallback.
fn execution_providers(device: &str) -> Result<Vec<ExecutionProviderDispatch>, KokoroError> {
    let cpu = CPUExecutionProvider::default().build();
    match device {
        "cpu" => Ok(vec![cpu]),
        "cuda" => Ok(vec![CUDAExecutionProvider::default().build(), cpu]),
        "mps" => Ok(vec![CoreMLExecutionProvider::default().build(), cpu]),
        other => Err(KokoroError::UnsupportedDevice(other.to_string())),
    }
}

fn detect_tokens_input(session: &Session) -> String {
    session
        .inputs()
        .iter()
        .map(|input| input.name())
        .find(|name| *name == "input_ids" || *name == "tokens")
        .unwrap_or("input_ids")
        .to_string()
}

/// Whether the `speed` input is int32. Recent exports use int32.
fn detect_speed_type(session: &Session) -> bool {
    session
        .inputs()
        .iter()
        .find(|input| input.name() == "speed")
        .map(|input| format!("{:?}", input.dtype()).to_lowercase().contains("int32"))
        .unwrap_or(true)
}

/// Split token ids into chunks of at most [`MAX_PHONEME_LEN`], cutting after
/// the last break symbol in each window when there is one.
fn split_chunks<'a>(ids: &'a [i64], break_ids: &[i64]) -> Vec<&'a [i64]> {
    let mut chunks = Vec::new();
    let mut rest = ids;

    while rest.len() > MAX_PHONEME_LEN {
        let window = &rest[..MAX_PHONEME_LEN];
        let cut = window
            .iter()
            .rposition(|id| break_ids.contains(id))
            .map_or(MAX_PHONEME_LEN, |pos| pos + 1);
        let (head, tail) = rest.split_at(cut);
        chunks.push(head);
        rest = tail;
    }
    if !rest.is_empty() {
        chunks.push(rest);
    }
    chunks
}

/// Append `src` to `dst`, blending the first `crossfade_samples` linearly into
/// the tail of `dst`.
fn append_with_crossfade(dst: &mut Vec<f32>, src: &[f32], crossfade_samples: usize) {
    let overlap = crossfade_samples.min(dst.len()).min(src.len());
    let tail_start = dst.len() - overlap;

    for (i, (out, incoming)) in dst[tail_start..].iter_mut().zip(src).enumerate() {
        let t = (i + 1) as f32 / (overlap + 1) as f32;
        *out = *out * (1.0 - t) + incoming * t;
    }
    dst.extend_from_slice(&src[overlap..]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::kokoro::voices::tests::npy_bytes;

    #[test]
    fn short_sequences_are_one_chunk() {
        let ids: Vec<i64> = (0..20).collect();
        assert_eq!(split_chunks(&ids, &[4]), vec![&ids[..]]);
        assert!(split_chunks(&[], &[4]).is_empty());
    }

    #[test]
    fn long_sequences_split_after_last_break() {
        let mut ids = vec![50i64; 1200];
        ids[300] = 4;
        ids[700] = 3;
        let chunks = split_chunks(&ids, &[3, 4]);
        assert_eq!(
            chunks.iter().map(|c| c.len()).collect::<Vec<_>>(),
            vec![301, 400, 499]
        );
        assert!(chunks.iter().all(|c| c.len() <= MAX_PHONEME_LEN));
        assert_eq!(chunks.concat(), ids);
    }

    #[test]
    fn sequences_without_breaks_split_at_limit() {
        let ids = vec![50i64; MAX_PHONEME_LEN * 2 + 1];
        let lens: Vec<usize> = split_chunks(&ids, &[4]).iter().map(|c| c.len()).collect();
        assert_eq!(lens, vec![MAX_PHONEME_LEN, MAX_PHONEME_LEN, 1]);
    }

    #[test]
    fn crossfade_blends_overlap() {
        let mut dst = vec![1.0f32; 4];
        append_with_crossfade(&mut dst, &[0.0; 5], 3);
        assert_eq!(dst.len(), 6);
        assert_eq!(dst[0], 1.0);
        assert!((dst[1] - 0.75).abs() < 1e-6);
        assert!((dst[2] - 0.5).abs() < 1e-6);
        assert!((dst[3] - 0.25).abs() < 1e-6);
        assert_eq!(&dst[4..], &[0.0, 0.0]);

        let mut empty = Vec::new();
        append_with_crossfade(&mut empty, &[0.5, 0.5], 240);
        assert_eq!(empty, vec![0.5, 0.5]);
    }

    #[test]
    fn only_known_devices_map_to_providers() {
        assert_eq!(execution_providers("cpu").unwrap().len(), 1);
        assert_eq!(execution_providers("cuda").unwrap().len(), 2);
        assert_eq!(execution_providers("mps").unwrap().len(), 2);
        assert!(matches!(
            execution_providers("tpu"),
            Err(KokoroError::UnsupportedDevice(_))
        ));
    }

    #[test]
    fn prompt_paths_select_voices() {
        let voice = VoicePrompt::from_prompt_path(None).unwrap();
        assert!(matches!(voice, VoicePrompt::Named(ref name) if name == DEFAULT_VOICE));

        let voice = VoicePrompt::from_prompt_path(Some("/voices/bf_emma.wav")).unwrap();
        assert!(matches!(voice, VoicePrompt::Named(ref name) if name == "bf_emma"));

        let dir = tempfile::tempdir().unwrap();
        let table = dir.path().join("narrator.npy");
        std::fs::write(&table, npy_bytes(&[[0.3; STYLE_DIM]])).unwrap();
        let voice = VoicePrompt::from_prompt_path(table.to_str()).unwrap();
        match voice {
            VoicePrompt::Table { name, styles } => {
                assert_eq!(name, "narrator");
                assert_eq!(styles.len(), 1);
            }
            VoicePrompt::Named(name) => panic!("expected a style table, got '{name}'"),
        }
    }

    #[test]
    fn missing_model_files_fail_before_onnx() {
        let dir = tempfile::tempdir().unwrap();
        let err = KokoroModel::load(&dir.path().join("kokoro-v1.0.onnx"), dir.path(), "cpu")
            .err()
            .unwrap();
        assert!(matches!(err, KokoroError::MissingFile(ref p) if p.ends_with(VOICES_FILE)));
    }
}
