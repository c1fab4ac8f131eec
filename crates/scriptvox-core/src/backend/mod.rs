//! Synthesis backend boundary.
//!
//! The pipeline talks to speech models only through the traits in this
//! module. [`SpeechBackend`] turns phonemes plus a voice into samples,
//! [`Phonemizer`] turns text into phonemes, and [`BackendLoader`] builds a
//! backend from a catalogue [`BackendDescriptor`]. The Kokoro ONNX adapter
//! lives in [`kokoro`].

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::ScriptvoxResult;
use crate::voice_resolver::VoiceTarget;

pub mod kokoro;
pub mod npz;
pub mod phonemizer;
pub mod vocab;

pub use kokoro::{KokoroBackend, KokoroLoader};
#[cfg(feature = "espeak")]
pub use phonemizer::EspeakPhonemizer;
pub use phonemizer::IpaPassthrough;

/// Numeric precision of a model export
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    /// 32-bit float weights
    Full,
    /// 16-bit float weights
    Half,
    /// 8-bit quantized weights
    Quantized,
}

impl Precision {
    /// Guess the precision from a model file name
    #[must_use]
    pub fn from_filename(filename: &str) -> Self {
        let lower = filename.to_ascii_lowercase();
        if lower.contains("int8") || lower.contains("quant") {
            Self::Quantized
        } else if lower.contains("fp16") || lower.contains("half") {
            Self::Half
        } else {
            Self::Full
        }
    }

    /// Short label used in reports
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Full => "FP32",
            Self::Half => "FP16",
            Self::Quantized => "INT8",
        }
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Catalogue entry for a loadable backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendDescriptor {
    /// Unique id, e.g. `kokoro-v1.0-fp16`
    pub id: String,
    /// Model file name inside the models directory
    pub filename: String,
    /// Weight precision
    pub precision: Precision,
    /// Human-readable description
    #[serde(default)]
    pub description: String,
    /// Optional hex SHA-256 of the model file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

impl BackendDescriptor {
    /// Create a descriptor, deriving precision from the file name
    pub fn new<I: Into<String>, F: Into<String>>(id: I, filename: F) -> Self {
        let filename = filename.into();
        Self {
            id: id.into(),
            precision: Precision::from_filename(&filename),
            filename,
            description: String::new(),
            sha256: None,
        }
    }

    /// Attach a description
    #[must_use]
    pub fn with_description<S: Into<String>>(mut self, description: S) -> Self {
        self.description = description.into();
        self
    }
}

/// A loaded speech model.
///
/// Implementations are shared read-only between concurrent requests and
/// are called from blocking threads only.
pub trait SpeechBackend: Send + Sync + fmt::Debug {
    /// Output sample rate in Hz
    fn sample_rate(&self) -> u32 {
        crate::SAMPLE_RATE
    }

    /// Voice identities this backend knows
    fn known_voices(&self) -> Vec<String>;

    /// Style embedding of a known voice
    fn embedding(&self, voice: &str) -> Option<&[f32]>;

    /// Length of every embedding returned by [`SpeechBackend::embedding`]
    fn embedding_len(&self) -> usize;

    /// Synthesize mono samples for a phoneme string.
    ///
    /// # Errors
    ///
    /// Returns an inference error when the model run fails or the voice
    /// target cannot be used.
    fn synthesize(&self, phonemes: &str, voice: &VoiceTarget, speed: f32)
        -> ScriptvoxResult<Vec<f32>>;
}

/// Text to phoneme conversion
pub trait Phonemizer: Send + Sync + fmt::Debug {
    /// Convert `text` into a phoneme string for `locale`.
    ///
    /// An empty result means there is nothing to speak.
    ///
    /// # Errors
    ///
    /// Returns an error when the phonemizer itself fails.
    fn phonemize(&self, text: &str, locale: &str) -> ScriptvoxResult<String>;
}

/// Builds backends from catalogue descriptors
pub trait BackendLoader: Send + Sync + fmt::Debug {
    /// Load the backend described by `descriptor`.
    ///
    /// Blocking; callers run it off the async executor.
    ///
    /// # Errors
    ///
    /// Returns [`crate::ScriptvoxError::ModelLoadError`] when the model is
    /// missing or corrupt.
    fn load(&self, descriptor: &BackendDescriptor) -> ScriptvoxResult<Arc<dyn SpeechBackend>>;

    /// Size of the model file on disk, when known
    fn artifact_size(&self, _descriptor: &BackendDescriptor) -> Option<u64> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precision_from_filename() {
        assert_eq!(Precision::from_filename("kokoro-v1.0.onnx"), Precision::Full);
        assert_eq!(Precision::from_filename("kokoro-v1.0.fp16.onnx"), Precision::Half);
        assert_eq!(Precision::from_filename("kokoro-v1.0.int8.onnx"), Precision::Quantized);
        assert_eq!(Precision::from_filename("KOKORO.INT8.onnx"), Precision::Quantized);
    }

    #[test]
    fn test_descriptor_serde_uses_lowercase_precision() {
        let descriptor = BackendDescriptor::new("kokoro-v1.0-fp16", "kokoro-v1.0.fp16.onnx");
        let json = serde_json::to_string(&descriptor).unwrap();
        assert!(json.contains("\"precision\":\"half\""));
        let back: BackendDescriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(back, descriptor);
    }
}
