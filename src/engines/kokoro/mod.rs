//! Kokoro-82M model family, run through ONNX Runtime.
//!
//! Text is phonemized with espeak-ng and synthesized with a style vector
//! chosen from the voice archive (or a custom `.npy` table). Output is mono
//! audio at 24 kHz.
//!
//! # System Requirements
//!
//! **espeak-ng** must be installed on your system:
//! - **Linux**: `sudo apt-get install espeak-ng`
//! - **macOS**: `brew install espeak-ng`
//! - **Windows**: Download installer from <https://espeak-ng.org/download>
//!
//! # Model Directory Layout
//!
//! ```text
//! models/kokoro/
//! ├── kokoro-v1.0.onnx                 # standard variant ("kokoro")
//! ├── kokoro-quant-convinteger.onnx    # 8-bit quantized turbo variant ("kokoro-turbo", "turbo")
//! ├── voices-v1.0.bin                  # voice archive (.npz)
//! └── config.json                      # phoneme vocabulary
//! ```
//!
//! Either graph may be missing; the loader falls back to whichever variant
//! is installed.
//!
//! # Voices
//!
//! A request's voice prompt is interpreted by file type:
//! - `voices/narrator.npy` is read as a `[N, 256]` float32 style table.
//! - `voices/bf_emma.wav` (any other extension) selects the archive voice `bf_emma`.
//! - no prompt uses `af_heart`.
//!
//! The first letter of an archive voice picks the espeak-ng language
//! (`a` American English, `b` British English, `e` Spanish, `f` French,
//! `h` Hindi, `i` Italian, `j` Japanese, `p` Brazilian Portuguese,
//! `z` Mandarin).
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use local_tts::engines::kokoro::KokoroProvider;
//! use local_tts::{device::CpuOnlyProbe, BackendOptions, BackendRegistry};
//!
//! let registry = BackendRegistry::new(
//!     Arc::new(KokoroProvider::new("models/kokoro")),
//!     Box::new(CpuOnlyProbe),
//!     BackendOptions::default(),
//! );
//! let wav = registry.get("kokoro")?.synthesize("Hello, world!", None, Default::default())?;
//! std::fs::write("hello.wav", wav)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod model;
pub mod phonemizer;
pub mod provider;
pub mod vocab;
pub mod voices;

pub use model::{KokoroError, KokoroModel, SAMPLE_RATE};
pub use provider::{KokoroConstructor, KokoroProvider, KOKORO_FAMILY};
