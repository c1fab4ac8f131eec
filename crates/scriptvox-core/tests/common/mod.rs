//! Shared fixtures: an in-memory backend and loader that never touch ONNX.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use scriptvox_core::{
    ActiveBackend, BackendDescriptor, BackendLoader, IpaPassthrough, ModelRegistry,
    ScriptPipeline, ScriptvoxError, ScriptvoxResult, SpeechBackend, VoiceTarget,
};

/// Samples produced per phoneme character
pub const SAMPLES_PER_CHAR: usize = 100;

/// Voices every fake backend knows, with 4-dim embeddings
pub fn voice_table() -> HashMap<String, Vec<f32>> {
    HashMap::from([
        ("af_heart".to_string(), vec![0.2, 0.0, 0.0, 0.0]),
        ("af_nova".to_string(), vec![0.8, 0.2, 0.0, 0.0]),
        ("af_sky".to_string(), vec![0.3, 0.0, 0.0, 0.0]),
        ("am_adam".to_string(), vec![0.6, 0.0, 0.0, 0.0]),
        ("bf_emma".to_string(), vec![0.4, 0.1, 0.1, 0.1]),
    ])
}

/// Deterministic backend.
///
/// Each call produces `SAMPLES_PER_CHAR` samples per phoneme character, all
/// equal to `gain * embedding[0]`, and records the embedding it was given.
#[derive(Debug)]
pub struct FakeBackend {
    pub voices: HashMap<String, Vec<f32>>,
    pub gain: f32,
    pub calls: Arc<AtomicUsize>,
    pub delay: Duration,
    pub fail_on: Option<String>,
    pub seen: Mutex<Vec<Vec<f32>>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            voices: voice_table(),
            gain: 1.0,
            calls: Arc::new(AtomicUsize::new(0)),
            delay: Duration::ZERO,
            fail_on: None,
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing_on(mut self, phonemes: &str) -> Self {
        self.fail_on = Some(phonemes.to_string());
        self
    }

    pub fn with_gain(mut self, gain: f32) -> Self {
        self.gain = gain;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl SpeechBackend for FakeBackend {
    fn known_voices(&self) -> Vec<String> {
        self.voices.keys().cloned().collect()
    }

    fn embedding(&self, voice: &str) -> Option<&[f32]> {
        self.voices.get(voice).map(Vec::as_slice)
    }

    fn embedding_len(&self) -> usize {
        4
    }

    fn synthesize(
        &self,
        phonemes: &str,
        voice: &VoiceTarget,
        _speed: f32,
    ) -> ScriptvoxResult<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        if self.fail_on.as_deref() == Some(phonemes) {
            return Err(ScriptvoxError::inference(format!("cannot say {phonemes}")));
        }

        let embedding = match voice {
            VoiceTarget::Named(name) => self
                .voices
                .get(name)
                .cloned()
                .ok_or_else(|| ScriptvoxError::inference(format!("unknown voice {name}")))?,
            VoiceTarget::Embedding(values) => values.to_vec(),
        };
        let level = self.gain * embedding[0];
        self.seen.lock().push(embedding);
        Ok(vec![level; phonemes.chars().count() * SAMPLES_PER_CHAR])
    }
}

/// Loader handing out fake backends keyed by descriptor id
#[derive(Debug, Default)]
pub struct FakeLoader {
    pub gains: HashMap<String, f32>,
    pub broken: HashSet<String>,
    /// Ids that load this many times and fail afterwards
    pub broken_after: HashMap<String, usize>,
    pub loads: AtomicUsize,
    pub loads_by_id: Mutex<HashMap<String, usize>>,
}

impl FakeLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_gain(mut self, id: &str, gain: f32) -> Self {
        self.gains.insert(id.to_string(), gain);
        self
    }

    pub fn broken(mut self, id: &str) -> Self {
        self.broken.insert(id.to_string());
        self
    }

    pub fn broken_after(mut self, id: &str, loads: usize) -> Self {
        self.broken_after.insert(id.to_string(), loads);
        self
    }
}

impl BackendLoader for FakeLoader {
    fn load(&self, descriptor: &BackendDescriptor) -> ScriptvoxResult<Arc<dyn SpeechBackend>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let previous = {
            let mut by_id = self.loads_by_id.lock();
            let count = by_id.entry(descriptor.id.clone()).or_insert(0);
            *count += 1;
            *count - 1
        };
        let worn_out = self
            .broken_after
            .get(&descriptor.id)
            .is_some_and(|limit| previous >= *limit);
        if self.broken.contains(&descriptor.id) || worn_out {
            return Err(ScriptvoxError::model_load(&descriptor.id, "corrupt model file"));
        }
        let gain = self.gains.get(&descriptor.id).copied().unwrap_or(1.0);
        Ok(Arc::new(FakeBackend::new().with_gain(gain)))
    }
}

pub fn catalog() -> Vec<BackendDescriptor> {
    vec![
        BackendDescriptor::new("full", "kokoro-v1.0.onnx"),
        BackendDescriptor::new("half", "kokoro-v1.0.fp16.onnx"),
        BackendDescriptor::new("int8", "kokoro-v1.0.int8.onnx"),
    ]
}

/// Registry whose active backend is `backend`, registered as `full`
pub fn registry_with(backend: Arc<FakeBackend>, loader: FakeLoader) -> Arc<ModelRegistry> {
    let descriptor = catalog().remove(0);
    Arc::new(ModelRegistry::with_active(
        catalog(),
        Arc::new(loader),
        ActiveBackend::new(descriptor, backend),
    ))
}

/// Pipeline over `backend` with the IPA passthrough phonemizer
pub fn pipeline_with(backend: Arc<FakeBackend>) -> ScriptPipeline {
    ScriptPipeline::new(
        registry_with(backend, FakeLoader::new()),
        Arc::new(IpaPassthrough),
    )
}
