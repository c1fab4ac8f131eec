//! Benchmark engine for comparing backend exports.
//!
//! Every candidate is measured the same way, strictly one after another:
//!
//! 1. sample resident memory (baseline)
//! 2. load the backend, timing the load
//! 3. sample memory again
//! 4. synthesize a fixed sentence with a fixed voice, timing the call
//! 5. sample memory a third time
//! 6. release the backend
//!
//! The real-time factor (RTF) is inference time divided by the duration of
//! the produced audio; lower is faster. A candidate that fails to load or
//! infer is reported on its own and the run carries on with the next one.
//!
//! ```rust,no_run
//! # async fn demo(engine: scriptvox_core::BenchmarkEngine,
//! #               catalog: Vec<scriptvox_core::BackendDescriptor>) -> anyhow::Result<()> {
//! let report = engine.run(&catalog).await?;
//! println!("{}", report.render_table());
//! if let Some(rec) = &report.recommendation {
//!     println!("best balanced: {}", rec.best_balanced);
//! }
//! # Ok(()) }
//! ```

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sysinfo::{Pid, Process, ProcessRefreshKind, ProcessesToUpdate, System};

use crate::backend::{BackendDescriptor, BackendLoader, Phonemizer, Precision};
use crate::error::{ScriptvoxError, ScriptvoxResult};
use crate::voice_resolver::VoiceTarget;

/// Sentence synthesized for every candidate
pub const DEFAULT_BENCHMARK_TEXT: &str =
    "This is a standard sentence for benchmarking the performance of different models.";

/// Voice used for every candidate
pub const DEFAULT_BENCHMARK_VOICE: &str = "am_adam";

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Source of process memory readings
#[cfg_attr(test, mockall::automock)]
pub trait MemoryProbe: Send + Sync {
    /// Current resident set size of this process in bytes
    fn resident_bytes(&self) -> u64;
}

/// Reads this process's resident memory through `sysinfo`
pub struct SysinfoProbe {
    system: Mutex<System>,
    pid: Option<Pid>,
}

impl SysinfoProbe {
    /// Probe for the current process
    #[must_use]
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
            pid: sysinfo::get_current_pid().ok(),
        }
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for SysinfoProbe {
    fn resident_bytes(&self) -> u64 {
        let Some(pid) = self.pid else {
            return 0;
        };
        let mut system = self.system.lock();
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::new().with_memory(),
        );
        system.process(pid).map_or(0, Process::memory)
    }
}

/// Measurements for one candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkResult {
    /// Catalogue id
    pub backend_id: String,
    /// Precision tag of the export
    pub precision: Precision,
    /// Model file size in bytes (0 when unknown)
    pub size_bytes: u64,
    /// Seconds spent loading
    pub load_time_seconds: f64,
    /// Seconds spent in the single inference call
    pub inference_time_seconds: f64,
    /// Seconds of audio produced
    pub audio_duration_seconds: f64,
    /// `inference_time_seconds / audio_duration_seconds`
    pub real_time_factor: f64,
    /// Largest resident memory growth over the baseline, in MB
    pub peak_memory_delta_mb: f64,
}

/// A candidate that could not be measured
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateFailure {
    /// Catalogue id
    pub backend_id: String,
    /// Error category, see [`ScriptvoxError::category`]
    pub category: String,
    /// Error message
    pub message: String,
}

/// Which backends the run recommends
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendation {
    /// Lowest real-time factor
    pub fastest: String,
    /// Full-precision candidate, when one was measured
    pub highest_quality: Option<String>,
    /// Half-precision candidate, otherwise the fastest
    pub best_balanced: String,
}

/// Apply the selection policy to measured results.
///
/// Ties are broken by declaration order. Returns `None` when nothing was
/// measured.
#[must_use]
pub fn recommend(results: &[BenchmarkResult]) -> Option<Recommendation> {
    let mut fastest = results.first()?;
    for result in &results[1..] {
        if result.real_time_factor < fastest.real_time_factor {
            fastest = result;
        }
    }
    let highest_quality = results
        .iter()
        .find(|r| r.precision == Precision::Full)
        .map(|r| r.backend_id.clone());
    let best_balanced = results
        .iter()
        .find(|r| r.precision == Precision::Half)
        .unwrap_or(fastest)
        .backend_id
        .clone();

    Some(Recommendation {
        fastest: fastest.backend_id.clone(),
        highest_quality,
        best_balanced,
    })
}

/// Host description recorded with each report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemSnapshot {
    /// CPU brand string
    pub cpu_brand: String,
    /// Physical cores
    pub physical_cores: usize,
    /// Logical cores
    pub logical_cores: usize,
    /// Installed memory in MB
    pub total_memory_mb: u64,
    /// Operating system description
    pub os: String,
}

impl SystemSnapshot {
    /// Describe the current host
    #[must_use]
    pub fn capture() -> Self {
        let mut system = System::new();
        system.refresh_cpu_all();
        system.refresh_memory();
        Self {
            cpu_brand: system
                .cpus()
                .first()
                .map(|cpu| cpu.brand().trim().to_string())
                .unwrap_or_default(),
            physical_cores: num_cpus::get_physical(),
            logical_cores: num_cpus::get(),
            total_memory_mb: system.total_memory() / (1024 * 1024),
            os: System::long_os_version().unwrap_or_else(|| std::env::consts::OS.to_string()),
        }
    }
}

/// Outcome of a full benchmark run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkReport {
    /// When the run finished
    pub timestamp: DateTime<Utc>,
    /// Host the run happened on
    pub system: SystemSnapshot,
    /// Measured candidates in declaration order
    pub results: Vec<BenchmarkResult>,
    /// Candidates that failed, in declaration order
    pub failures: Vec<CandidateFailure>,
    /// Policy outcome; `None` when every candidate failed
    pub recommendation: Option<Recommendation>,
    /// Human-readable observations
    pub notes: Vec<String>,
}

impl BenchmarkReport {
    /// Results table sorted by real-time factor, fastest first
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn render_table(&self) -> String {
        let mut sorted: Vec<&BenchmarkResult> = self.results.iter().collect();
        sorted.sort_by(|a, b| a.real_time_factor.total_cmp(&b.real_time_factor));

        let mut out = String::new();
        let _ = writeln!(
            out,
            "{:<24} {:<6} {:>10} {:>9} {:>12} {:>8} {:>12}",
            "Backend", "Prec", "Size (MB)", "Load (s)", "Infer (s)", "RTF", "Mem +MB"
        );
        for r in sorted {
            let _ = writeln!(
                out,
                "{:<24} {:<6} {:>10.1} {:>9.2} {:>12.3} {:>8.3} {:>12.1}",
                r.backend_id,
                r.precision.label(),
                r.size_bytes as f64 / BYTES_PER_MB,
                r.load_time_seconds,
                r.inference_time_seconds,
                r.real_time_factor,
                r.peak_memory_delta_mb
            );
        }
        for f in &self.failures {
            let _ = writeln!(out, "{:<24} FAILED ({}): {}", f.backend_id, f.category, f.message);
        }
        out
    }
}

/// Measures candidates one at a time
pub struct BenchmarkEngine {
    loader: Arc<dyn BackendLoader>,
    phonemizer: Arc<dyn Phonemizer>,
    probe: Arc<dyn MemoryProbe>,
    text: String,
    voice: String,
    locale: String,
    run_lock: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for BenchmarkEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BenchmarkEngine")
            .field("loader", &self.loader)
            .field("text", &self.text)
            .field("voice", &self.voice)
            .field("locale", &self.locale)
            .finish_non_exhaustive()
    }
}

impl BenchmarkEngine {
    /// Engine with the default sentence, voice and locale
    pub fn new(
        loader: Arc<dyn BackendLoader>,
        phonemizer: Arc<dyn Phonemizer>,
        probe: Arc<dyn MemoryProbe>,
    ) -> Self {
        Self {
            loader,
            phonemizer,
            probe,
            text: DEFAULT_BENCHMARK_TEXT.to_string(),
            voice: DEFAULT_BENCHMARK_VOICE.to_string(),
            locale: "en-us".to_string(),
            run_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Use a different sentence
    #[must_use]
    pub fn with_text<S: Into<String>>(mut self, text: S) -> Self {
        self.text = text.into();
        self
    }

    /// Use a different voice
    #[must_use]
    pub fn with_voice<S: Into<String>>(mut self, voice: S) -> Self {
        self.voice = voice.into();
        self
    }

    /// Use a different phonemizer locale
    #[must_use]
    pub fn with_locale<S: Into<String>>(mut self, locale: S) -> Self {
        self.locale = locale.into();
        self
    }

    /// Measure every candidate in declaration order.
    ///
    /// Concurrent calls queue behind each other.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an empty candidate list or a text
    /// that phonemizes to nothing, and the phonemizer's error if it fails.
    /// Per-candidate failures are part of the report instead.
    pub async fn run(&self, candidates: &[BackendDescriptor]) -> ScriptvoxResult<BenchmarkReport> {
        if candidates.is_empty() {
            return Err(ScriptvoxError::configuration("no benchmark candidates"));
        }
        let _running = self.run_lock.lock().await;
        tracing::info!(candidates = candidates.len(), voice = %self.voice, "Benchmark started");

        let loader = Arc::clone(&self.loader);
        let phonemizer = Arc::clone(&self.phonemizer);
        let probe = Arc::clone(&self.probe);
        let candidates = candidates.to_vec();
        let (text, voice, locale) = (self.text.clone(), self.voice.clone(), self.locale.clone());

        let outcomes = tokio::task::spawn_blocking(move || -> ScriptvoxResult<Vec<_>> {
            let phonemes = phonemizer.phonemize(&text, &locale)?;
            if phonemes.trim().is_empty() {
                return Err(ScriptvoxError::configuration(
                    "benchmark text produced no phonemes",
                ));
            }
            Ok(candidates
                .iter()
                .map(|candidate| {
                    let span = tracing::info_span!("candidate", backend = %candidate.id);
                    let _entered = span.enter();
                    let outcome =
                        measure(loader.as_ref(), probe.as_ref(), candidate, &phonemes, &voice);
                    (candidate.id.clone(), outcome)
                })
                .collect::<Vec<_>>())
        })
        .await??;

        let mut results = Vec::new();
        let mut failures = Vec::new();
        for (backend_id, outcome) in outcomes {
            match outcome {
                Ok(result) => results.push(result),
                Err(err) => {
                    tracing::error!(backend = %backend_id, error = %err, "Candidate failed");
                    failures.push(CandidateFailure {
                        backend_id,
                        category: err.category().to_string(),
                        message: err.to_string(),
                    });
                }
            }
        }

        let recommendation = recommend(&results);
        let notes = observations(&results, recommendation.as_ref());
        if let Some(rec) = &recommendation {
            tracing::info!(
                fastest = %rec.fastest,
                best_balanced = %rec.best_balanced,
                highest_quality = rec.highest_quality.as_deref().unwrap_or("-"),
                "Benchmark finished"
            );
        } else {
            tracing::warn!("Benchmark finished without any measured candidate");
        }

        Ok(BenchmarkReport {
            timestamp: Utc::now(),
            system: SystemSnapshot::capture(),
            results,
            failures,
            recommendation,
            notes,
        })
    }
}

#[allow(clippy::cast_precision_loss)]
fn measure(
    loader: &dyn BackendLoader,
    probe: &dyn MemoryProbe,
    candidate: &BackendDescriptor,
    phonemes: &str,
    voice: &str,
) -> ScriptvoxResult<BenchmarkResult> {
    let baseline = probe.resident_bytes();

    let started = Instant::now();
    let backend = loader.load(candidate)?;
    let load_time = started.elapsed().as_secs_f64();
    let after_load = probe.resident_bytes();
    tracing::info!(load_seconds = load_time, "Candidate loaded");

    if backend.embedding(voice).is_none() {
        return Err(ScriptvoxError::inference(format!(
            "voice '{voice}' is unknown to this backend"
        )));
    }

    let started = Instant::now();
    let samples = backend.synthesize(phonemes, &VoiceTarget::Named(voice.to_string()), 1.0)?;
    let inference_time = started.elapsed().as_secs_f64();
    let after_inference = probe.resident_bytes();
    let sample_rate = backend.sample_rate();
    drop(backend);

    if samples.is_empty() {
        return Err(ScriptvoxError::inference("backend produced no audio"));
    }
    let audio_duration = samples.len() as f64 / f64::from(sample_rate);
    let peak_delta = after_load.max(after_inference).saturating_sub(baseline);

    Ok(BenchmarkResult {
        backend_id: candidate.id.clone(),
        precision: candidate.precision,
        size_bytes: loader.artifact_size(candidate).unwrap_or(0),
        load_time_seconds: load_time,
        inference_time_seconds: inference_time,
        audio_duration_seconds: audio_duration,
        real_time_factor: inference_time / audio_duration,
        peak_memory_delta_mb: peak_delta as f64 / BYTES_PER_MB,
    })
}

fn observations(
    results: &[BenchmarkResult],
    recommendation: Option<&Recommendation>,
) -> Vec<String> {
    let Some(rec) = recommendation else {
        return vec!["No candidate could be measured.".to_string()];
    };
    let mut notes = Vec::new();
    for quantized in results.iter().filter(|r| r.precision == Precision::Quantized) {
        if quantized.backend_id != rec.fastest {
            notes.push(format!(
                "{} is quantized but slower than {} on this hardware; \
                 quantized kernels are not always faster on CPU.",
                quantized.backend_id, rec.fastest
            ));
        }
    }
    if !results.iter().any(|r| r.precision == Precision::Half) {
        notes.push(
            "No half-precision candidate measured; best balanced falls back to fastest."
                .to_string(),
        );
    }
    notes
}
