//! In-memory WAV encoding.

use std::io::Cursor;

use serde::{Deserialize, Serialize};

use crate::error::{ScriptvoxError, ScriptvoxResult};

/// Sample encoding of produced WAV files
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// 32-bit IEEE float samples
    #[default]
    Float32,
    /// 16-bit signed integer samples
    Pcm16,
}

impl OutputFormat {
    fn spec(self, sample_rate: u32) -> hound::WavSpec {
        let (bits_per_sample, sample_format) = match self {
            Self::Float32 => (32, hound::SampleFormat::Float),
            Self::Pcm16 => (16, hound::SampleFormat::Int),
        };
        hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample,
            sample_format,
        }
    }
}

/// Encode mono samples as a complete WAV file.
///
/// # Errors
///
/// Returns a file error if the encoder fails.
pub fn encode_wav(
    samples: &[f32],
    sample_rate: u32,
    format: OutputFormat,
) -> ScriptvoxResult<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::with_capacity(44 + samples.len() * 4));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, format.spec(sample_rate))
            .map_err(|e| ScriptvoxError::file(format!("Failed to start WAV stream: {e}")))?;
        match format {
            OutputFormat::Float32 => {
                for &sample in samples {
                    writer.write_sample(sample).map_err(wav_error)?;
                }
            }
            OutputFormat::Pcm16 => {
                for &sample in samples {
                    writer.write_sample(to_pcm16(sample)).map_err(wav_error)?;
                }
            }
        }
        writer.finalize().map_err(wav_error)?;
    }
    Ok(cursor.into_inner())
}

#[allow(clippy::cast_possible_truncation)]
fn to_pcm16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)).round() as i16
}

fn wav_error(err: hound::Error) -> ScriptvoxError {
    ScriptvoxError::file(format!("Failed to write WAV data: {err}"))
}
