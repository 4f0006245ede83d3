//! Voice prompt lookup under the configured voices directory.

use std::path::{Path, PathBuf};

/// Identifiers that mean "no voice prompt" when no matching file exists.
pub const DEFAULT_VOICE_IDS: [&str; 2] = ["", "default"];

/// Map a voice identifier to an existing prompt file.
///
/// Only the final path component of `voice` is used. A name without an
/// extension gets `.wav` appended. Returns `None` when the identifier is
/// blank or the file does not exist.
pub fn voice_prompt_path(voices_dir: &Path, voice: &str) -> Option<PathBuf> {
    let normalized = voice.trim();
    if normalized.is_empty() {
        return None;
    }

    let candidate = Path::new(normalized);
    let file_name = candidate.file_name()?;
    let prompt_path = if candidate.extension().is_some_and(|ext| !ext.is_empty()) {
        voices_dir.join(file_name)
    } else {
        let mut name = file_name.to_os_string();
        name.push(".wav");
        voices_dir.join(name)
    };

    prompt_path.exists().then_some(prompt_path)
}

/// Whether `voice` may fall back to synthesis without a prompt.
pub fn is_default_voice(voice: &str) -> bool {
    DEFAULT_VOICE_IDS.iter().any(|id| *id == voice)
}
