//! # Scriptvox Core
//!
//! Turns multi-speaker dialogue scripts into speech with a Kokoro ONNX
//! model.
//!
//! ## Features
//!
//! - Script validation with per-line voices, voice blends, delays and speed
//! - Streaming synthesis over a bounded channel with backpressure and
//!   cancellation
//! - Whole-script WAV rendering with peak normalization
//! - Benchmarking of model variants with a recommendation
//! - Atomic switching of the active model while requests are in flight
//!
//! ## Example
//!
//! ```rust,no_run
//! use scriptvox_core::{RawLine, ScriptService, ServiceConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let service = ScriptService::start(ServiceConfig::load()?).await?;
//!
//!     let script = vec![
//!         RawLine::with_voice("Hi.", "af_heart"),
//!         RawLine::with_voice("Bye.", "am_adam").delay(0.2),
//!     ];
//!     let mut stream = service.synthesize_stream(script)?;
//!     while let Some(unit) = stream.next_unit().await {
//!         let unit = unit?;
//!         println!("line {} -> {} samples", unit.line_index, unit.samples.len());
//!     }
//!
//!     Ok(())
//! }
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod batch;
pub mod benchmark;
pub mod config;
pub mod download;
pub mod error;
pub mod registry;
pub mod script;
pub mod segmenter;
pub mod service;
pub mod stream;
pub mod synthesis;
pub mod telemetry;
pub mod voice_resolver;
pub mod wav_writer;

// Re-export main types for convenience
#[cfg(feature = "espeak")]
pub use backend::EspeakPhonemizer;
pub use backend::{
    BackendDescriptor, BackendLoader, IpaPassthrough, KokoroLoader, Phonemizer, Precision,
    SpeechBackend,
};
pub use benchmark::{
    BenchmarkEngine, BenchmarkReport, BenchmarkResult, CandidateFailure, MemoryProbe,
    Recommendation, SysinfoProbe,
};
pub use config::ServiceConfig;
pub use download::{Artifact, AssetDownloader};
pub use error::{ScriptvoxError, ScriptvoxResult, ValidationError};
pub use registry::{ActiveBackend, ModelRegistry};
pub use script::{BlendComponent, Line, RawLine, Script, VoiceRef};
pub use service::ScriptService;
pub use stream::SynthesisStream;
pub use synthesis::{AudioUnit, ScriptPipeline, UnitKind};
pub use voice_resolver::{Resolution, VoiceTarget};
pub use wav_writer::OutputFormat;

/// Version information for the scriptvox-core crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Output sample rate of every backend (24 kHz mono)
pub const SAMPLE_RATE: u32 = 24_000;

/// Bounded capacity of the per-stream channel between producer and consumer
pub const STREAM_CHANNEL_CAPACITY: usize = 20;
