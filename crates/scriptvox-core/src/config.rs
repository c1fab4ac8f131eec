//! Service configuration.
//!
//! Configuration is read from TOML. Lookup order:
//!
//! 1. the file named by `SCRIPTVOX_CONFIG`, if set
//! 2. `scriptvox.toml` in the platform config directory, if present
//! 3. built-in defaults
//!
//! Afterwards `SCRIPTVOX_MODELS_DIR`, `SCRIPTVOX_ACTIVE_MODEL` and
//! `SCRIPTVOX_LOG` override the corresponding fields.
//!
//! ```toml
//! [models]
//! dir = "/var/lib/scriptvox/models"
//! active = "kokoro-v1.0-fp16"
//!
//! [synthesis]
//! output_format = "pcm16"
//!
//! [benchmark]
//! apply_recommendation = true
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::backend::BackendDescriptor;
use crate::benchmark::{DEFAULT_BENCHMARK_TEXT, DEFAULT_BENCHMARK_VOICE};
use crate::download::Artifact;
use crate::error::{ScriptvoxError, ScriptvoxResult};
use crate::wav_writer::OutputFormat;
use crate::STREAM_CHANNEL_CAPACITY;

const CONFIG_FILE_NAME: &str = "scriptvox.toml";

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("ai", "Scriptvox", "scriptvox")
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Model files and catalogue
    pub models: ModelsConfig,
    /// Synthesis settings
    pub synthesis: SynthesisConfig,
    /// Benchmark settings
    pub benchmark: BenchmarkConfig,
    /// Logging settings
    pub logging: LoggingConfig,
}

/// Where models live and which ones exist
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    /// Directory holding model, voices and config files
    pub dir: PathBuf,
    /// Release URL the model and voices files are fetched from
    pub base_url: String,
    /// URL prefix the vocabulary config is fetched from
    pub vocab_base_url: String,
    /// Download missing files at startup
    pub download_missing: bool,
    /// Backend made active at startup
    pub active: String,
    /// Voices archive file name
    pub voices_file: String,
    /// Optional SHA-256 of the voices archive
    pub voices_sha256: Option<String>,
    /// Vocabulary config file name
    pub config_file: String,
    /// Loadable backends in declaration order
    pub catalog: Vec<BackendDescriptor>,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        let dir = project_dirs()
            .map_or_else(|| PathBuf::from("models"), |dirs| dirs.data_dir().join("models"));
        Self {
            dir,
            base_url: "https://github.com/thewh1teagle/kokoro-onnx/releases/download/model-files-v1.0"
                .to_string(),
            vocab_base_url: "https://huggingface.co/hexgrad/Kokoro-82M/resolve/main".to_string(),
            download_missing: true,
            active: "kokoro-v1.0-fp16".to_string(),
            voices_file: "voices-v1.0.bin".to_string(),
            voices_sha256: None,
            config_file: "config.json".to_string(),
            catalog: default_catalog(),
        }
    }
}

/// The three Kokoro v1.0 exports
#[must_use]
pub fn default_catalog() -> Vec<BackendDescriptor> {
    vec![
        BackendDescriptor::new("kokoro-v1.0", "kokoro-v1.0.onnx")
            .with_description("Full precision, largest file, reference quality"),
        BackendDescriptor::new("kokoro-v1.0-fp16", "kokoro-v1.0.fp16.onnx")
            .with_description("Half precision, half the size with near-reference quality"),
        BackendDescriptor::new("kokoro-v1.0-int8", "kokoro-v1.0.int8.onnx")
            .with_description("8-bit quantized, smallest file"),
    ]
}

/// Which phonemizer turns text into phonemes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhonemizerKind {
    /// eSpeak NG, needs the `espeak` feature
    #[default]
    Espeak,
    /// Text is already IPA
    Ipa,
}

/// Synthesis settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    /// Phonemizer locale, e.g. `en-us`
    pub locale: String,
    /// Sample encoding of batch output
    pub output_format: OutputFormat,
    /// Bounded channel size of each stream
    pub channel_capacity: usize,
    /// Phonemizer implementation
    pub phonemizer: PhonemizerKind,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            locale: "en-us".to_string(),
            output_format: OutputFormat::Float32,
            channel_capacity: STREAM_CHANNEL_CAPACITY,
            phonemizer: PhonemizerKind::Espeak,
        }
    }
}

/// Benchmark settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchmarkConfig {
    /// Sentence synthesized by every candidate
    pub text: String,
    /// Voice used by every candidate
    pub voice: String,
    /// Candidate ids; empty means the whole catalogue
    pub candidates: Vec<String>,
    /// Switch to the best-balanced backend after a run
    pub apply_recommendation: bool,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            text: DEFAULT_BENCHMARK_TEXT.to_string(),
            voice: DEFAULT_BENCHMARK_VOICE.to_string(),
            candidates: Vec::new(),
            apply_recommendation: false,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl ServiceConfig {
    /// Load configuration from the standard locations and the environment.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for unreadable or invalid files.
    pub fn load() -> ScriptvoxResult<Self> {
        let explicit = std::env::var_os("SCRIPTVOX_CONFIG").map(PathBuf::from);
        let default_path = project_dirs().map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME));

        let mut config = match (explicit, default_path) {
            (Some(path), _) => Self::load_from(&path)?,
            (None, Some(path)) if path.is_file() => Self::load_from(&path)?,
            _ => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file without applying environment overrides.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the file is missing or malformed.
    pub fn load_from(path: &Path) -> ScriptvoxResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            ScriptvoxError::configuration(format!("Cannot read {}: {e}", path.display()))
        })?;
        tracing::debug!(path = %path.display(), "Loaded configuration file");
        Self::from_toml_str(&text)
    }

    /// Parse a TOML document.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for malformed TOML.
    pub fn from_toml_str(text: &str) -> ScriptvoxResult<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Apply overrides from an environment lookup
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("SCRIPTVOX_MODELS_DIR") {
            self.models.dir = PathBuf::from(dir);
        }
        if let Some(active) = lookup("SCRIPTVOX_ACTIVE_MODEL") {
            self.models.active = active;
        }
        if let Some(level) = lookup("SCRIPTVOX_LOG") {
            self.logging.level = level;
        }
    }

    /// Check cross-field consistency.
    ///
    /// # Errors
    ///
    /// Returns a configuration error describing the first problem found.
    pub fn validate(&self) -> ScriptvoxResult<()> {
        if self.synthesis.channel_capacity == 0 {
            return Err(ScriptvoxError::configuration(
                "synthesis.channel_capacity must be at least 1",
            ));
        }
        if self.models.catalog.is_empty() {
            return Err(ScriptvoxError::configuration("models.catalog is empty"));
        }
        let mut seen = HashSet::new();
        for descriptor in &self.models.catalog {
            if !seen.insert(descriptor.id.as_str()) {
                return Err(ScriptvoxError::configuration(format!(
                    "duplicate backend id '{}' in models.catalog",
                    descriptor.id
                )));
            }
        }
        if !seen.contains(self.models.active.as_str()) {
            return Err(ScriptvoxError::configuration(format!(
                "models.active '{}' is not in models.catalog",
                self.models.active
            )));
        }
        if let Some(unknown) = self
            .benchmark
            .candidates
            .iter()
            .find(|id| !seen.contains(id.as_str()))
        {
            return Err(ScriptvoxError::configuration(format!(
                "benchmark candidate '{unknown}' is not in models.catalog"
            )));
        }
        Ok(())
    }

    /// Benchmark candidates in declaration order
    #[must_use]
    pub fn benchmark_candidates(&self) -> Vec<BackendDescriptor> {
        if self.benchmark.candidates.is_empty() {
            return self.models.catalog.clone();
        }
        self.models
            .catalog
            .iter()
            .filter(|d| self.benchmark.candidates.contains(&d.id))
            .cloned()
            .collect()
    }

    /// Download descriptor of a catalogued model file
    #[must_use]
    pub fn model_artifact(descriptor: &BackendDescriptor) -> Artifact {
        Artifact {
            filename: descriptor.filename.clone(),
            sha256: descriptor.sha256.clone(),
        }
    }

    /// Download descriptor of the voices archive
    #[must_use]
    pub fn voices_artifact(&self) -> Artifact {
        Artifact {
            filename: self.models.voices_file.clone(),
            sha256: self.models.voices_sha256.clone(),
        }
    }

    /// Catalogue entry of the backend made active at startup
    #[must_use]
    pub fn active_descriptor(&self) -> Option<&BackendDescriptor> {
        self.models.catalog.iter().find(|d| d.id == self.models.active)
    }
}
