//! Kokoro speech backend on ONNX Runtime.
//!
//! Three files make up a backend: the ONNX export named by the catalogue
//! descriptor, the shared voices archive (see [`super::npz`]) and the
//! shared `config.json` carrying the phoneme vocabulary.
//!
//! ## Model inputs
//!
//! | name                    | shape      | dtype              |
//! |-------------------------|------------|--------------------|
//! | `tokens` / `input_ids`  | `[1, n+2]` | int64              |
//! | `style`                 | `[1, 256]` | float32            |
//! | `speed`                 | `[1]`      | float32 (int32 for `input_ids` exports) |
//!
//! Token sequences are padded with id `0` on both ends. The model accepts at
//! most [`MAX_PHONEME_LENGTH`] phonemes per run, so longer strings are split
//! at word boundaries and the outputs concatenated.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use anyhow::{anyhow, Context, Result};
use ort::session::{builder::GraphOptimizationLevel, Session};
use parking_lot::Mutex;

use crate::backend::npz::{self, VoiceTable};
use crate::backend::vocab::PhonemeVocab;
use crate::backend::{BackendDescriptor, BackendLoader, Precision, SpeechBackend};
use crate::error::{ScriptvoxError, ScriptvoxResult};
use crate::voice_resolver::VoiceTarget;

/// Longest phoneme string a single model run accepts
pub const MAX_PHONEME_LENGTH: usize = 510;

static ORT_INIT: OnceLock<Result<(), String>> = OnceLock::new();

fn init_runtime() -> Result<()> {
    ORT_INIT
        .get_or_init(|| match ort::init().with_name("scriptvox").commit() {
            Ok(_) => {
                tracing::info!("ONNX Runtime initialized");
                Ok(())
            }
            Err(e) => Err(format!(
                "Failed to initialize ONNX Runtime: {e}. \
                 Make sure libonnxruntime is available or ORT_DYLIB_PATH is set correctly."
            )),
        })
        .clone()
        .map_err(|e| anyhow!(e))
}

/// Which input naming the export uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputLayout {
    /// `tokens`, `style`, float `speed`
    Tokens,
    /// `input_ids`, `style`, int32 `speed`
    InputIds,
}

/// A loaded Kokoro export
#[derive(Debug)]
pub struct KokoroBackend {
    id: String,
    session: Mutex<Session>,
    layout: InputLayout,
    voices: Arc<VoiceTable>,
    vocab: Arc<PhonemeVocab>,
}

impl KokoroBackend {
    /// Build an ONNX session for `model_path` and attach voices and vocabulary.
    ///
    /// # Errors
    ///
    /// Fails when ONNX Runtime cannot start or the model cannot be read.
    pub fn open(
        id: &str,
        model_path: &Path,
        precision: Precision,
        voices: Arc<VoiceTable>,
        vocab: Arc<PhonemeVocab>,
    ) -> Result<Self> {
        init_runtime()?;

        let physical_cores = num_cpus::get_physical();
        // Quantized exports misbehave under aggressive graph fusion
        let (level, intra_threads) = match precision {
            Precision::Quantized => (GraphOptimizationLevel::Level1, physical_cores.min(4)),
            Precision::Full | Precision::Half => {
                (GraphOptimizationLevel::Level3, physical_cores.min(8))
            }
        };
        tracing::debug!(
            backend = id,
            ?level,
            intra_threads,
            "Creating ONNX session"
        );

        let session = Session::builder()?
            .with_optimization_level(level)?
            .with_intra_threads(intra_threads)?
            .commit_from_file(model_path)
            .with_context(|| format!("Failed to load model {}", model_path.display()))?;

        let layout = if session.inputs.iter().any(|input| input.name == "input_ids") {
            InputLayout::InputIds
        } else {
            InputLayout::Tokens
        };

        Ok(Self {
            id: id.to_string(),
            session: Mutex::new(session),
            layout,
            voices,
            vocab,
        })
    }

    /// Catalogue id this backend was loaded for
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    fn run_chunk(&self, token_ids: &[i64], style: &[f32], speed: f32) -> Result<Vec<f32>> {
        let mut padded = Vec::with_capacity(token_ids.len() + 2);
        padded.push(0_i64);
        padded.extend_from_slice(token_ids);
        padded.push(0);

        let mut inputs: HashMap<String, ort::value::Value> = HashMap::new();
        let tokens_tensor = ort::value::Tensor::from_array(([1, padded.len()], padded))
            .context("Failed to create tokens tensor")?;
        let style_tensor = ort::value::Tensor::from_array(([1, style.len()], style.to_vec()))
            .context("Failed to create style tensor")?;

        match self.layout {
            InputLayout::Tokens => {
                inputs.insert("tokens".to_string(), tokens_tensor.into());
                let speed_tensor = ort::value::Tensor::from_array(([1], vec![speed]))
                    .context("Failed to create speed tensor")?;
                inputs.insert("speed".to_string(), speed_tensor.into());
            }
            InputLayout::InputIds => {
                inputs.insert("input_ids".to_string(), tokens_tensor.into());
                #[allow(clippy::cast_possible_truncation)]
                let whole_speed = speed.round().max(1.0) as i32;
                let speed_tensor = ort::value::Tensor::from_array(([1], vec![whole_speed]))
                    .context("Failed to create speed tensor")?;
                inputs.insert("speed".to_string(), speed_tensor.into());
            }
        }
        inputs.insert("style".to_string(), style_tensor.into());

        let mut session = self.session.lock();
        let outputs = session
            .run(inputs)
            .map_err(|e| anyhow!("ONNX inference failed: {e}"))?;

        let audio = if let Some(output) = outputs.get("audio") {
            output.try_extract_tensor::<f32>()?.1.to_vec()
        } else if let Some((_, output)) = outputs.iter().next() {
            output.try_extract_tensor::<f32>()?.1.to_vec()
        } else {
            return Err(anyhow!("Model produced no outputs"));
        };
        Ok(audio)
    }

    fn synthesize_inner(
        &self,
        phonemes: &str,
        voice: &VoiceTarget,
        speed: f32,
    ) -> Result<Vec<f32>> {
        let table: &[f32] = match voice {
            VoiceTarget::Named(name) => self
                .voices
                .get(name)
                .ok_or_else(|| anyhow!("Voice '{name}' is not in the voices archive"))?,
            VoiceTarget::Embedding(embedding) => embedding,
        };
        let style_dim = self.voices.style_dim();
        if style_dim == 0 || table.len() % style_dim != 0 {
            return Err(anyhow!(
                "Style embedding of length {} is not a multiple of {style_dim}",
                table.len()
            ));
        }

        let mut audio = Vec::new();
        for chunk in split_phonemes(phonemes, MAX_PHONEME_LENGTH) {
            let token_ids = self.vocab.encode(&chunk);
            if token_ids.is_empty() {
                continue;
            }
            let style = npz::style_row(table, style_dim, token_ids.len());
            audio.extend(self.run_chunk(&token_ids, style, speed)?);
        }
        tracing::debug!(
            backend = %self.id,
            samples = audio.len(),
            "Kokoro synthesis finished"
        );
        Ok(audio)
    }
}

impl SpeechBackend for KokoroBackend {
    fn known_voices(&self) -> Vec<String> {
        self.voices.names().map(str::to_string).collect()
    }

    fn embedding(&self, voice: &str) -> Option<&[f32]> {
        self.voices.get(voice)
    }

    fn embedding_len(&self) -> usize {
        self.voices.table_len()
    }

    fn synthesize(
        &self,
        phonemes: &str,
        voice: &VoiceTarget,
        speed: f32,
    ) -> ScriptvoxResult<Vec<f32>> {
        self.synthesize_inner(phonemes, voice, speed)
            .map_err(|e| ScriptvoxError::inference(format!("{e:#}")))
    }
}

/// Split a phoneme string into pieces of at most `max_len` characters,
/// preferring whitespace boundaries.
#[must_use]
pub fn split_phonemes(phonemes: &str, max_len: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for word in phonemes.split_whitespace() {
        let word_len = word.chars().count();
        if word_len > max_len {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
                current_len = 0;
            }
            let chars: Vec<char> = word.chars().collect();
            chunks.extend(chars.chunks(max_len).map(|piece| piece.iter().collect::<String>()));
            continue;
        }
        let needed = if current.is_empty() { word_len } else { word_len + 1 };
        if current_len + needed > max_len {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if !current.is_empty() {
            current.push(' ');
            current_len += 1;
        }
        current.push_str(word);
        current_len += word_len;
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Loads Kokoro exports from a models directory.
///
/// The voices archive and vocabulary are read once and shared by every
/// backend the loader produces.
#[derive(Debug)]
pub struct KokoroLoader {
    models_dir: PathBuf,
    voices_file: String,
    config_file: String,
    shared: Mutex<Option<(Arc<VoiceTable>, Arc<PhonemeVocab>)>>,
}

impl KokoroLoader {
    /// Loader for files under `models_dir`
    pub fn new<P: Into<PathBuf>, V: Into<String>, C: Into<String>>(
        models_dir: P,
        voices_file: V,
        config_file: C,
    ) -> Self {
        Self {
            models_dir: models_dir.into(),
            voices_file: voices_file.into(),
            config_file: config_file.into(),
            shared: Mutex::new(None),
        }
    }

    /// Path of a model file
    #[must_use]
    pub fn model_path(&self, descriptor: &BackendDescriptor) -> PathBuf {
        self.models_dir.join(&descriptor.filename)
    }

    fn shared_assets(&self) -> Result<(Arc<VoiceTable>, Arc<PhonemeVocab>)> {
        let mut shared = self.shared.lock();
        if let Some(assets) = shared.as_ref() {
            return Ok(assets.clone());
        }
        let voices = npz::load_voices(&self.models_dir.join(&self.voices_file))?;
        let vocab = PhonemeVocab::load(&self.models_dir.join(&self.config_file))?;
        tracing::info!(
            voices = voices.len(),
            style_dim = voices.style_dim(),
            symbols = vocab.len(),
            "Loaded Kokoro voices and vocabulary"
        );
        let assets = (Arc::new(voices), Arc::new(vocab));
        *shared = Some(assets.clone());
        Ok(assets)
    }
}

impl BackendLoader for KokoroLoader {
    fn load(&self, descriptor: &BackendDescriptor) -> ScriptvoxResult<Arc<dyn SpeechBackend>> {
        let model_path = self.model_path(descriptor);
        if !model_path.is_file() {
            return Err(ScriptvoxError::model_load(
                &descriptor.id,
                format!("model file {} does not exist", model_path.display()),
            ));
        }

        let result = self.shared_assets().and_then(|(voices, vocab)| {
            KokoroBackend::open(&descriptor.id, &model_path, descriptor.precision, voices, vocab)
        });
        match result {
            Ok(backend) => Ok(Arc::new(backend)),
            Err(e) => Err(ScriptvoxError::model_load(&descriptor.id, format!("{e:#}"))),
        }
    }

    fn artifact_size(&self, descriptor: &BackendDescriptor) -> Option<u64> {
        std::fs::metadata(self.model_path(descriptor)).ok().map(|m| m.len())
    }
}
