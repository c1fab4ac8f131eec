//! The service facade: batch and streaming synthesis, voices, benchmarking
//! and backend switching behind one handle.

use std::sync::Arc;

#[cfg(feature = "espeak")]
use crate::backend::EspeakPhonemizer;
use crate::backend::{BackendLoader, IpaPassthrough, KokoroLoader, Phonemizer};
use crate::benchmark::{BenchmarkEngine, BenchmarkReport, MemoryProbe, SysinfoProbe};
use crate::config::{PhonemizerKind, ServiceConfig, SynthesisConfig};
use crate::download::{Artifact, AssetDownloader};
use crate::error::ScriptvoxResult;
use crate::registry::ModelRegistry;
use crate::script::{RawLine, Script};
use crate::stream::SynthesisStream;
use crate::synthesis::ScriptPipeline;

/// Dialogue synthesis service
#[derive(Debug)]
pub struct ScriptService {
    config: ServiceConfig,
    pipeline: ScriptPipeline,
    benchmark: BenchmarkEngine,
}

impl ScriptService {
    /// Validate configuration, fetch missing assets and load the configured
    /// backend.
    ///
    /// # Errors
    ///
    /// Configuration, download-integrity and model-load errors are fatal and
    /// returned as-is.
    pub async fn start(config: ServiceConfig) -> ScriptvoxResult<Self> {
        config.validate()?;
        let phonemizer = build_phonemizer(&config.synthesis)?;
        tracing::info!(
            models_dir = %config.models.dir.display(),
            active = %config.models.active,
            "Starting script service"
        );

        if config.models.download_missing {
            fetch_startup_assets(&config).await?;
        }

        let loader: Arc<dyn BackendLoader> = Arc::new(KokoroLoader::new(
            &config.models.dir,
            &config.models.voices_file,
            &config.models.config_file,
        ));

        let registry = ModelRegistry::initialize(
            config.models.catalog.clone(),
            loader,
            &config.models.active,
        )
        .await?;

        Ok(Self::from_parts(
            config,
            Arc::new(registry),
            phonemizer,
            Arc::new(SysinfoProbe::new()),
        ))
    }

    /// Assemble a service from already constructed parts
    pub fn from_parts(
        config: ServiceConfig,
        registry: Arc<ModelRegistry>,
        phonemizer: Arc<dyn Phonemizer>,
        probe: Arc<dyn MemoryProbe>,
    ) -> Self {
        let pipeline = ScriptPipeline::new(Arc::clone(&registry), Arc::clone(&phonemizer))
            .with_locale(&config.synthesis.locale)
            .with_channel_capacity(config.synthesis.channel_capacity);
        let benchmark = BenchmarkEngine::new(registry.loader(), phonemizer, probe)
            .with_text(&config.benchmark.text)
            .with_voice(&config.benchmark.voice)
            .with_locale(&config.synthesis.locale);

        Self {
            config,
            pipeline,
            benchmark,
        }
    }

    /// Render a whole script to a WAV file in memory.
    ///
    /// A script that produces no audio yields an empty vector.
    ///
    /// # Errors
    ///
    /// Validation errors are returned before any synthesis; inference errors
    /// abort the request.
    pub async fn synthesize_wav(&self, lines: Vec<RawLine>) -> ScriptvoxResult<Vec<u8>> {
        let script = Script::validate(lines)?;
        self.pipeline
            .assemble_wav(&script, self.config.synthesis.output_format)
            .await
    }

    /// Start streaming a script.
    ///
    /// # Errors
    ///
    /// Validation errors are returned before the producer starts; later
    /// failures arrive through the stream.
    pub fn synthesize_stream(&self, lines: Vec<RawLine>) -> ScriptvoxResult<SynthesisStream> {
        let script = Script::validate(lines)?;
        Ok(self.pipeline.stream(script))
    }

    /// Voices of the active backend, sorted
    #[must_use]
    pub fn voices(&self) -> Vec<String> {
        let mut voices = self.registry().get_active().backend().known_voices();
        voices.sort();
        voices
    }

    /// Measure the configured candidates and store the recommendation.
    ///
    /// When `benchmark.apply_recommendation` is set the best-balanced
    /// backend becomes active afterwards. A failed switch leaves the current
    /// backend active and is noted in the report.
    ///
    /// # Errors
    ///
    /// Returns run-level failures; per-candidate failures are in the report.
    pub async fn run_benchmark(&self) -> ScriptvoxResult<BenchmarkReport> {
        let candidates = self.config.benchmark_candidates();

        if self.config.models.download_missing {
            let downloader =
                AssetDownloader::new(&self.config.models.base_url, &self.config.models.dir);
            for candidate in &candidates {
                let artifact = ServiceConfig::model_artifact(candidate);
                if let Err(err) = downloader.ensure(&artifact).await {
                    tracing::warn!(
                        backend = %candidate.id,
                        error = %err,
                        "Candidate download failed"
                    );
                }
            }
        }

        let mut report = self.benchmark.run(&candidates).await?;
        let Some(recommendation) = report.recommendation.clone() else {
            return Ok(report);
        };
        self.registry().record_recommendation(recommendation.clone());
        if self.config.benchmark.apply_recommendation {
            if let Err(err) = self.registry().set_active(&recommendation.best_balanced).await {
                tracing::error!(
                    backend = %recommendation.best_balanced,
                    error = %err,
                    "Could not apply benchmark recommendation"
                );
                report.notes.push(format!(
                    "Recommendation {} was not applied: {err}",
                    recommendation.best_balanced
                ));
            }
        }
        Ok(report)
    }

    /// Make another catalogued backend active.
    ///
    /// # Errors
    ///
    /// Returns a model load error; the current backend stays active.
    pub async fn switch_model(&self, id: &str) -> ScriptvoxResult<()> {
        self.registry().set_active(id).await
    }

    /// Id of the active backend
    #[must_use]
    pub fn active_model(&self) -> String {
        self.registry().active_id()
    }

    /// Model registry
    #[must_use]
    pub fn registry(&self) -> &Arc<ModelRegistry> {
        self.pipeline.registry()
    }

    /// Pipeline used for synthesis
    #[must_use]
    pub const fn pipeline(&self) -> &ScriptPipeline {
        &self.pipeline
    }

    /// Effective configuration
    #[must_use]
    pub const fn config(&self) -> &ServiceConfig {
        &self.config
    }
}

fn build_phonemizer(config: &SynthesisConfig) -> ScriptvoxResult<Arc<dyn Phonemizer>> {
    match config.phonemizer {
        #[cfg(feature = "espeak")]
        PhonemizerKind::Espeak => {
            let espeak = EspeakPhonemizer::new();
            if let Err(err) = espeak.probe(&config.locale) {
                tracing::warn!(error = %err, "Phonemizer unavailable, synthesis will fail");
            }
            Ok(Arc::new(espeak))
        }
        #[cfg(not(feature = "espeak"))]
        PhonemizerKind::Espeak => Err(crate::error::ScriptvoxError::configuration(
            "synthesis.phonemizer = \"espeak\" needs the `espeak` feature; \
             rebuild with it or use \"ipa\"",
        )),
        PhonemizerKind::Ipa => Ok(Arc::new(IpaPassthrough)),
    }
}

async fn fetch_startup_assets(config: &ServiceConfig) -> ScriptvoxResult<()> {
    let models = &config.models;
    let mut release = vec![config.voices_artifact()];
    if let Some(active) = config.active_descriptor() {
        release.insert(0, ServiceConfig::model_artifact(active));
    }
    AssetDownloader::new(&models.base_url, &models.dir)
        .ensure_all(&release)
        .await?;
    AssetDownloader::new(&models.vocab_base_url, &models.dir)
        .ensure(&Artifact::new(&models.config_file))
        .await?;
    Ok(())
}
