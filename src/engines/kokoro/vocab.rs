use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use super::model::KokoroError;

/// Phoneme symbol to token id.
pub type Vocab = HashMap<char, i64>;

#[derive(Deserialize)]
struct KokoroConfig {
    vocab: HashMap<String, i64>,
}

/// Load the phoneme vocabulary from a Kokoro `config.json`.
pub fn load_vocab(config_path: &Path) -> Result<Vocab, KokoroError> {
    let content = std::fs::read_to_string(config_path)?;
    parse_vocab(&content)
}

fn parse_vocab(content: &str) -> Result<Vocab, KokoroError> {
    let config: KokoroConfig =
        serde_json::from_str(content).map_err(|e| KokoroError::Config(e.to_string()))?;

    config
        .vocab
        .into_iter()
        .map(|(symbol, id)| {
            let mut chars = symbol.chars();
            match (chars.next(), chars.next()) {
                (Some(ch), None) => Ok((ch, id)),
                _ => Err(KokoroError::Config(format!(
                    "vocab key {symbol:?} is not a single character"
                ))),
            }
        })
        .collect()
}
