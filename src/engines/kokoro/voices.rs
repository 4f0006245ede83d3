use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use super::model::{KokoroError, STYLE_DIM};

/// One 256-float style vector.
pub type StyleVector = [f32; STYLE_DIM];

/// Style tables for every voice in a `voices-v1.0.bin` archive.
///
/// Row `i` of a table is the style to use for an utterance of `i` phoneme
/// tokens.
pub struct VoiceStore {
    voices: HashMap<String, Vec<StyleVector>>,
}

impl VoiceStore {
    /// Load every `<voice>.npy` entry of an npz archive.
    pub fn load(path: &Path) -> Result<Self, KokoroError> {
        let file = File::open(path)?;
        let mut archive = zip::ZipArchive::new(file)
            .map_err(|e| KokoroError::VoiceParse(format!("{}: {e}", path.display())))?;

        let mut voices = HashMap::with_capacity(archive.len());
        for index in 0..archive.len() {
            let mut entry = archive
                .by_index(index)
                .map_err(|e| KokoroError::VoiceParse(format!("archive entry {index}: {e}")))?;
            if entry.is_dir() {
                continue;
            }

            let entry_name = entry.name().to_string();
            let voice = entry_name.strip_suffix(".npy").unwrap_or(&entry_name);
            if voice.is_empty() {
                continue;
            }

            let mut data = Vec::with_capacity(entry.size() as usize);
            entry.read_to_end(&mut data)?;
            voices.insert(voice.to_string(), parse_style_table(&data, &entry_name)?);
        }

        log::info!("Loaded {} Kokoro voices from {}", voices.len(), path.display());
        Ok(Self { voices })
    }

    /// The style table for `voice`.
    pub fn styles(&self, voice: &str) -> Option<&[StyleVector]> {
        self.voices.get(voice).map(Vec::as_slice)
    }

    /// Voice names in sorted order.
    pub fn list_voices(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.voices.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Read a standalone `.npy` style table, as used for custom voice prompts.
pub fn load_style_table(path: &Path) -> Result<Vec<StyleVector>, KokoroError> {
    let data = std::fs::read(path)?;
    parse_style_table(&data, &path.display().to_string())
}

/// Pick the row for a `token_count`-token utterance, clamped to the table.
pub fn style_for(table: &[StyleVector], token_count: usize) -> Option<StyleVector> {
    let last = table.len().checked_sub(1)?;
    Some(table[token_count.min(last)])
}

/// Parse a little-endian float32 `.npy` array whose row width is [`STYLE_DIM`].
///
/// Format versions 1.0 (u16 header length) and 2.0/3.0 (u32) are accepted.
fn parse_style_table(data: &[u8], name: &str) -> Result<Vec<StyleVector>, KokoroError> {
    let invalid = |reason: String| KokoroError::VoiceParse(format!("{name}: {reason}"));

    if data.len() < 10 || &data[..6] != b"\x93NUMPY" {
        return Err(invalid("not a numpy array file".to_string()));
    }

    let (header_len, prefix) = match data[6] {
        1 => (u16::from_le_bytes([data[8], data[9]]) as usize, 10),
        2 | 3 if data.len() >= 12 => (
            u32::from_le_bytes([data[8], data[9], data[10], data[11]]) as usize,
            12,
        ),
        major => return Err(invalid(format!("unsupported format version {major}"))),
    };
    let body_start = prefix + header_len;
    let header = data
        .get(prefix..body_start)
        .ok_or_else(|| invalid("truncated header".to_string()))?;

    let header = String::from_utf8_lossy(header);
    if !header.contains("<f4") {
        return Err(invalid(format!("expected little-endian float32, header is {}", header.trim())));
    }
    if header.contains("'fortran_order': True") {
        return Err(invalid("fortran-ordered arrays are not supported".to_string()));
    }

    let body = &data[body_start..];
    let row_bytes = STYLE_DIM * 4;
    if body.is_empty() || body.len() % row_bytes != 0 {
        return Err(invalid(format!(
            "{} data bytes is not a whole number of {STYLE_DIM}-float rows",
            body.len()
        )));
    }

    Ok(body
        .chunks_exact(row_bytes)
        .map(|row| {
            let mut style = [0f32; STYLE_DIM];
            for (value, bytes) in style.iter_mut().zip(row.chunks_exact(4)) {
                *value = f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            }
            style
        })
        .collect())
}
