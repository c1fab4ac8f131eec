//! Batch assembly of a whole script into one WAV file.

use crate::error::ScriptvoxResult;
use crate::script::Script;
use crate::synthesis::{silence_len, ScriptPipeline, Synthesized};
use crate::voice_resolver::Resolution;
use crate::wav_writer::{encode_wav, OutputFormat};
use crate::SAMPLE_RATE;

/// Scale samples so the loudest one has magnitude 1.0.
///
/// All-zero input is left untouched.
pub fn peak_normalize(samples: &mut [f32]) {
    let peak = samples.iter().fold(0.0_f32, |peak, s| peak.max(s.abs()));
    if peak > 0.0 {
        for sample in samples.iter_mut() {
            *sample /= peak;
        }
    }
}

impl ScriptPipeline {
    /// Synthesize every line in order, one call per line, and concatenate
    /// the results including delay silence. No normalization is applied.
    ///
    /// # Errors
    ///
    /// Returns the first inference error; nothing is produced in that case.
    pub async fn render_samples(&self, script: &Script) -> ScriptvoxResult<Vec<f32>> {
        let mut samples = Vec::new();

        for (line_index, line) in script.lines().iter().enumerate() {
            if line.delay_seconds() > 0.0 {
                samples.resize(samples.len() + silence_len(line.delay_seconds()), 0.0);
            }

            let (active, resolution) = self.prepare(line);
            let Resolution::Resolved(target) = resolution else {
                tracing::warn!(line = line_index, "Voice unresolved, skipping line");
                continue;
            };

            match self
                .synthesize_text(
                    &active,
                    line.text().to_string(),
                    target,
                    line.speed(),
                    || false,
                )
                .await?
            {
                Synthesized::Audio(audio) => {
                    tracing::debug!(line = line_index, samples = audio.len(), "Line synthesized");
                    samples.extend(audio);
                }
                Synthesized::Silent | Synthesized::Cancelled => {
                    tracing::debug!(line = line_index, "Empty phonemes, line skipped");
                }
            }
        }
        Ok(samples)
    }

    /// Render `script` to a peak-normalized mono WAV at 24 kHz.
    ///
    /// A script that produces no samples at all yields an empty byte vector
    /// rather than a header-only file.
    ///
    /// # Errors
    ///
    /// Returns the first inference error or an encoder failure.
    pub async fn assemble_wav(
        &self,
        script: &Script,
        format: OutputFormat,
    ) -> ScriptvoxResult<Vec<u8>> {
        let mut samples = self.render_samples(script).await?;
        if samples.is_empty() {
            tracing::info!("Script produced no audio");
            return Ok(Vec::new());
        }
        peak_normalize(&mut samples);
        let wav = encode_wav(&samples, SAMPLE_RATE, format)?;
        tracing::info!(
            lines = script.len(),
            samples = samples.len(),
            bytes = wav.len(),
            "Assembled WAV"
        );
        Ok(wav)
    }
}
