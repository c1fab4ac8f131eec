//! Shared per-line synthesis used by the streaming and batch paths.

use std::sync::Arc;

use crate::backend::Phonemizer;
use crate::error::{ScriptvoxError, ScriptvoxResult};
use crate::registry::{ActiveBackend, ModelRegistry};
use crate::script::{Line, MAX_DELAY_SECONDS};
use crate::voice_resolver::{self, Resolution, VoiceTarget};
use crate::{SAMPLE_RATE, STREAM_CHANNEL_CAPACITY};

/// Whether a unit is inter-line silence or speech
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitKind {
    /// Zero samples produced by a line delay
    Silence,
    /// Synthesized speech
    Speech,
}

/// A contiguous span of mono samples at [`SAMPLE_RATE`]
#[derive(Debug, Clone, PartialEq)]
pub struct AudioUnit {
    /// Index of the originating script line
    pub line_index: usize,
    /// Position of this unit within its line
    pub sub_index: usize,
    /// Silence or speech
    pub kind: UnitKind,
    /// Samples
    pub samples: Vec<f32>,
}

impl AudioUnit {
    /// Silence unit of `delay_seconds` for a line
    #[must_use]
    pub fn silence(line_index: usize, delay_seconds: f32) -> Self {
        Self {
            line_index,
            sub_index: 0,
            kind: UnitKind::Silence,
            samples: vec![0.0; silence_len(delay_seconds)],
        }
    }

    /// Duration in seconds
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration_seconds(&self) -> f64 {
        self.samples.len() as f64 / f64::from(SAMPLE_RATE)
    }

    /// Samples as little-endian `f32` bytes
    #[must_use]
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }
}

/// Number of samples in `delay_seconds` of silence, capped at
/// [`MAX_DELAY_SECONDS`]
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn silence_len(delay_seconds: f32) -> usize {
    let delay = delay_seconds.clamp(0.0, MAX_DELAY_SECONDS);
    (f64::from(delay) * f64::from(SAMPLE_RATE)).round() as usize
}

/// Outcome of one blocking synthesis call
#[derive(Debug)]
pub(crate) enum Synthesized {
    Audio(Vec<f32>),
    /// The phonemizer produced nothing to speak
    Silent,
    /// The request was cancelled before inference started
    Cancelled,
}

/// Everything needed to turn validated scripts into audio.
///
/// Cheap to clone; each clone shares the registry and phonemizer.
#[derive(Debug, Clone)]
pub struct ScriptPipeline {
    registry: Arc<ModelRegistry>,
    phonemizer: Arc<dyn Phonemizer>,
    locale: String,
    channel_capacity: usize,
}

impl ScriptPipeline {
    /// Pipeline over `registry` using `phonemizer`, locale `en-us` and the
    /// default channel capacity
    pub fn new(registry: Arc<ModelRegistry>, phonemizer: Arc<dyn Phonemizer>) -> Self {
        Self {
            registry,
            phonemizer,
            locale: "en-us".to_string(),
            channel_capacity: STREAM_CHANNEL_CAPACITY,
        }
    }

    /// Set the phonemizer locale
    #[must_use]
    pub fn with_locale<S: Into<String>>(mut self, locale: S) -> Self {
        self.locale = locale.into();
        self
    }

    /// Set the stream channel capacity (minimum 1)
    #[must_use]
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    /// Stream channel capacity
    #[must_use]
    pub const fn channel_capacity(&self) -> usize {
        self.channel_capacity
    }

    /// Registry backing this pipeline
    #[must_use]
    pub const fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    /// Snapshot the active backend and resolve the line's voice against it
    pub(crate) fn prepare(&self, line: &Line) -> (Arc<ActiveBackend>, Resolution) {
        let active = self.registry.get_active();
        let resolution = voice_resolver::resolve(line.voice(), active.backend().as_ref());
        (active, resolution)
    }

    /// Phonemize and synthesize `text` on a blocking thread.
    ///
    /// `cancelled` is polled on that thread before phonemizing and again
    /// before inference, so a request cancelled while the task waited for a
    /// thread never reaches the backend.
    pub(crate) async fn synthesize_text<C>(
        &self,
        active: &Arc<ActiveBackend>,
        text: String,
        target: VoiceTarget,
        speed: f32,
        cancelled: C,
    ) -> ScriptvoxResult<Synthesized>
    where
        C: Fn() -> bool + Send + 'static,
    {
        let active = Arc::clone(active);
        let phonemizer = Arc::clone(&self.phonemizer);
        let locale = self.locale.clone();

        tokio::task::spawn_blocking(move || -> ScriptvoxResult<Synthesized> {
            if cancelled() {
                return Ok(Synthesized::Cancelled);
            }
            let phonemes = phonemizer.phonemize(&text, &locale)?;
            if phonemes.trim().is_empty() {
                return Ok(Synthesized::Silent);
            }
            if cancelled() {
                return Ok(Synthesized::Cancelled);
            }
            active
                .backend()
                .synthesize(&phonemes, &target, speed)
                .map(Synthesized::Audio)
        })
        .await
        .map_err(|e| ScriptvoxError::concurrency(format!("Inference task failed: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::backend::{BackendDescriptor, BackendLoader, IpaPassthrough, SpeechBackend};

    #[derive(Debug, Default)]
    struct CountingBackend {
        calls: AtomicUsize,
    }

    impl SpeechBackend for CountingBackend {
        fn known_voices(&self) -> Vec<String> {
            vec!["af_heart".into()]
        }
        fn embedding(&self, _: &str) -> Option<&[f32]> {
            None
        }
        fn embedding_len(&self) -> usize {
            0
        }
        fn synthesize(&self, _: &str, _: &VoiceTarget, _: f32) -> ScriptvoxResult<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![0.5; 10])
        }
    }

    #[derive(Debug)]
    struct NoLoader;

    impl BackendLoader for NoLoader {
        fn load(&self, d: &BackendDescriptor) -> ScriptvoxResult<Arc<dyn SpeechBackend>> {
            Err(ScriptvoxError::model_load(&d.id, "not available"))
        }
    }

    fn pipeline_over(backend: Arc<CountingBackend>) -> ScriptPipeline {
        let descriptor = BackendDescriptor::new("full", "kokoro-v1.0.onnx");
        let registry = ModelRegistry::with_active(
            vec![descriptor.clone()],
            Arc::new(NoLoader),
            ActiveBackend::new(descriptor, backend),
        );
        ScriptPipeline::new(Arc::new(registry), Arc::new(IpaPassthrough))
    }

    fn heart() -> VoiceTarget {
        VoiceTarget::Named("af_heart".into())
    }

    #[tokio::test]
    async fn test_cancelled_before_start_skips_backend() {
        let backend = Arc::new(CountingBackend::default());
        let pipeline = pipeline_over(Arc::clone(&backend));
        let active = pipeline.registry().get_active();

        let outcome = pipeline
            .synthesize_text(&active, "hɛlˈoʊ".into(), heart(), 1.0, || true)
            .await
            .unwrap();
        assert!(matches!(outcome, Synthesized::Cancelled));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);

        let outcome = pipeline
            .synthesize_text(&active, "hɛlˈoʊ".into(), heart(), 1.0, || false)
            .await
            .unwrap();
        assert!(matches!(outcome, Synthesized::Audio(ref s) if s.len() == 10));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_after_phonemizing_skips_backend() {
        let backend = Arc::new(CountingBackend::default());
        let pipeline = pipeline_over(Arc::clone(&backend));
        let active = pipeline.registry().get_active();

        // first poll passes, the one before inference sees the cancel
        let polls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&polls);
        let outcome = pipeline
            .synthesize_text(&active, "hɛlˈoʊ".into(), heart(), 1.0, move || {
                seen.fetch_add(1, Ordering::SeqCst) >= 1
            })
            .await
            .unwrap();
        assert!(matches!(outcome, Synthesized::Cancelled));
        assert_eq!(polls.load(Ordering::SeqCst), 2);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_blank_phonemes_are_silent() {
        let backend = Arc::new(CountingBackend::default());
        let pipeline = pipeline_over(Arc::clone(&backend));
        let active = pipeline.registry().get_active();

        let outcome = pipeline
            .synthesize_text(&active, "  ".into(), heart(), 1.0, || false)
            .await
            .unwrap();
        assert!(matches!(outcome, Synthesized::Silent));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_silence_length_rounds() {
        assert_eq!(silence_len(0.0), 0);
        assert_eq!(silence_len(0.2), 4_800);
        assert_eq!(silence_len(1.5), 36_000);
        // 1e-5 s is 0.24 samples
        assert_eq!(silence_len(0.000_01), 0);
    }

    #[test]
    fn test_silence_length_is_capped() {
        assert_eq!(silence_len(1.0e30), silence_len(MAX_DELAY_SECONDS));
        assert_eq!(silence_len(MAX_DELAY_SECONDS), 1_440_000);
        assert_eq!(silence_len(-3.0), 0);
    }

    #[test]
    fn test_unit_bytes_are_little_endian_f32() {
        let unit = AudioUnit {
            line_index: 0,
            sub_index: 0,
            kind: UnitKind::Speech,
            samples: vec![1.0, -0.5],
        };
        let bytes = unit.to_le_bytes();
        assert_eq!(bytes.len(), 8);
        assert_eq!(&bytes[..4], &1.0_f32.to_le_bytes());
        assert_eq!(&bytes[4..], &(-0.5_f32).to_le_bytes());
    }

    #[test]
    fn test_silence_unit() {
        let unit = AudioUnit::silence(3, 0.5);
        assert_eq!(unit.kind, UnitKind::Silence);
        assert_eq!(unit.line_index, 3);
        assert_eq!(unit.samples.len(), 12_000);
        assert!((unit.duration_seconds() - 0.5).abs() < 1e-9);
        assert!(unit.samples.iter().all(|s| *s == 0.0));
    }
}
