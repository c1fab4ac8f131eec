//! Phoneme vocabulary from the Kokoro `config.json`.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{ensure, Context, Result};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct KokoroConfig {
    vocab: HashMap<String, i64>,
}

/// Maps phoneme symbols to model token ids
#[derive(Debug, Clone, Default)]
pub struct PhonemeVocab {
    ids: HashMap<char, i64>,
}

impl PhonemeVocab {
    /// Load the `vocab` table of a Kokoro config file.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be read or holds no vocabulary.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Cannot read model config {}", path.display()))?;
        Self::from_json(&bytes).with_context(|| format!("Invalid model config {}", path.display()))
    }

    /// Parse a Kokoro config document.
    ///
    /// # Errors
    ///
    /// Fails on malformed JSON or an empty vocabulary.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let config: KokoroConfig = serde_json::from_slice(bytes)?;
        let ids: HashMap<char, i64> = config
            .vocab
            .into_iter()
            .filter_map(|(symbol, id)| {
                let mut chars = symbol.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Some((c, id)),
                    _ => None,
                }
            })
            .collect();
        ensure!(!ids.is_empty(), "vocabulary is empty");
        Ok(Self { ids })
    }

    /// Token ids for a phoneme string; symbols outside the vocabulary are dropped
    #[must_use]
    pub fn encode(&self, phonemes: &str) -> Vec<i64> {
        phonemes.chars().filter_map(|c| self.ids.get(&c).copied()).collect()
    }

    /// Number of symbols
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether no symbols are mapped
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
