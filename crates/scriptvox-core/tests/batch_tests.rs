//! Whole-script WAV assembly

mod common;

use std::io::Cursor;
use std::sync::Arc;

use common::{FakeBackend, SAMPLES_PER_CHAR};
use scriptvox_core::wav_writer::OutputFormat;
use scriptvox_core::{RawLine, Script, SAMPLE_RATE};

fn read_samples(wav: &[u8]) -> (hound::WavSpec, Vec<f32>) {
    let mut reader = hound::WavReader::new(Cursor::new(wav)).expect("valid wav");
    let spec = reader.spec();
    let samples = reader.samples::<f32>().map(Result::unwrap).collect();
    (spec, samples)
}

#[tokio::test]
async fn test_assembled_wav_is_peak_normalized() {
    let backend = Arc::new(FakeBackend::new());
    let pipeline = common::pipeline_with(Arc::clone(&backend));

    let script = Script::validate(vec![
        RawLine::with_voice("Quiet.", "af_heart"),
        RawLine::with_voice("Loud.", "am_adam").delay(0.1),
    ])
    .unwrap();

    let wav = pipeline.assemble_wav(&script, OutputFormat::Float32).await.unwrap();
    let (spec, samples) = read_samples(&wav);

    assert_eq!(spec.sample_rate, SAMPLE_RATE);
    assert_eq!(spec.channels, 1);
    assert_eq!(samples.len(), 6 * SAMPLES_PER_CHAR + 2_400 + 5 * SAMPLES_PER_CHAR);

    let peak = samples.iter().fold(0.0_f32, |p, s| p.max(s.abs()));
    assert!((peak - 1.0).abs() < 1e-6);
    // 0.2 relative to a 0.6 peak
    assert!((samples[0] - 1.0 / 3.0).abs() < 1e-5);
    assert!(samples[6 * SAMPLES_PER_CHAR..6 * SAMPLES_PER_CHAR + 2_400]
        .iter()
        .all(|s| *s == 0.0));
}

#[tokio::test]
async fn test_batch_synthesizes_each_line_once() {
    let backend = Arc::new(FakeBackend::new());
    let pipeline = common::pipeline_with(Arc::clone(&backend));

    let script = Script::validate(vec![
        RawLine::with_voice("First. Second. Third.", "bf_emma"),
        RawLine::with_voice("Fourth!", "bf_emma"),
    ])
    .unwrap();

    let samples = pipeline.render_samples(&script).await.unwrap();
    assert_eq!(backend.calls(), 2);
    assert_eq!(
        samples.len(),
        ("First. Second. Third.".len() + "Fourth!".len()) * SAMPLES_PER_CHAR
    );
}

#[tokio::test]
async fn test_no_audio_gives_empty_artifact() {
    let backend = Arc::new(FakeBackend::new());
    let pipeline = common::pipeline_with(Arc::clone(&backend));

    let script = Script::validate(vec![
        RawLine::with_voice("Nobody speaks.", "ghost"),
        RawLine::with_voice("   ", "af_heart"),
    ])
    .unwrap();

    let wav = pipeline.assemble_wav(&script, OutputFormat::Float32).await.unwrap();
    assert!(wav.is_empty());
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn test_pcm16_output() {
    let backend = Arc::new(FakeBackend::new());
    let pipeline = common::pipeline_with(backend);

    let script = Script::validate(vec![RawLine::with_voice("Hey.", "am_adam")]).unwrap();
    let wav = pipeline.assemble_wav(&script, OutputFormat::Pcm16).await.unwrap();

    let mut reader = hound::WavReader::new(Cursor::new(wav)).unwrap();
    assert_eq!(reader.spec().bits_per_sample, 16);
    let samples: Vec<i16> = reader.samples::<i16>().map(Result::unwrap).collect();
    assert!(samples.iter().all(|s| *s == i16::MAX));
}

#[tokio::test]
async fn test_batch_failure_produces_nothing() {
    let backend = Arc::new(FakeBackend::new().failing_on("Broken."));
    let pipeline = common::pipeline_with(backend);

    let script = Script::validate(vec![
        RawLine::with_voice("Fine.", "af_heart"),
        RawLine::with_voice("Broken.", "af_heart"),
    ])
    .unwrap();

    let err = pipeline
        .assemble_wav(&script, OutputFormat::Float32)
        .await
        .unwrap_err();
    assert_eq!(err.category(), "inference");
}
