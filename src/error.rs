use std::path::PathBuf;

/// Boxed error returned by model adapters.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(thiserror::Error, Debug)]
pub enum TtsError {
    #[error("Invalid request: {0}")]
    Validation(String),
    #[error("Voice prompt not found for '{voice}'. Expected file in {}.", voices_dir.display())]
    VoiceNotFound { voice: String, voices_dir: PathBuf },
    #[error("Unable to load a {family} model: {reason}")]
    Load { family: String, reason: String },
    #[error("Generation failed: {0}")]
    Generation(String),
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("WAV encoding error: {0}")]
    Wav(#[from] hound::Error),
    #[error("Backend state lock poisoned: {0}")]
    Lock(String),
}

impl TtsError {
    pub(crate) fn load(family: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Load {
            family: family.into(),
            reason: reason.to_string(),
        }
    }
}

pub type TtsResult<T> = Result<T, TtsError>;
