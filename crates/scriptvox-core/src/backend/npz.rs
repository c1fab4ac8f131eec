//! Reader for the Kokoro voices archive.
//!
//! `voices-v1.0.bin` is an NPZ file: a zip whose members are `<voice>.npy`
//! arrays of little-endian `float32`, each shaped `(rows, 1, style_dim)`.
//! Every voice is kept as one flat row-major table.

use std::collections::HashMap;
use std::io::{Read, Seek};
use std::path::Path;

use anyhow::{anyhow, bail, ensure, Context, Result};
use zip::ZipArchive;

const NPY_MAGIC: &[u8] = b"\x93NUMPY";

/// Style tables of every voice in an archive
#[derive(Debug, Clone, Default)]
pub struct VoiceTable {
    style_dim: usize,
    table_len: usize,
    voices: HashMap<String, Vec<f32>>,
}

impl VoiceTable {
    /// Width of a single style row
    #[must_use]
    pub const fn style_dim(&self) -> usize {
        self.style_dim
    }

    /// Length of every flattened voice table
    #[must_use]
    pub const fn table_len(&self) -> usize {
        self.table_len
    }

    /// Flattened table of a voice
    #[must_use]
    pub fn get(&self, voice: &str) -> Option<&[f32]> {
        self.voices.get(voice).map(Vec::as_slice)
    }

    /// Voice names, unordered
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.voices.keys().map(String::as_str)
    }

    /// Number of voices
    #[must_use]
    pub fn len(&self) -> usize {
        self.voices.len()
    }

    /// Whether the archive held no voices
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.voices.is_empty()
    }
}

/// Pick the style row for an utterance of `token_count` tokens.
///
/// Tables hold one row per possible token count; counts past the last row
/// use the last row. A table exactly one row wide is returned whole.
#[must_use]
pub fn style_row(table: &[f32], style_dim: usize, token_count: usize) -> &[f32] {
    if style_dim == 0 || table.len() <= style_dim {
        return table;
    }
    let rows = table.len() / style_dim;
    let row = token_count.min(rows - 1);
    &table[row * style_dim..(row + 1) * style_dim]
}

/// Load a voices archive from disk.
///
/// # Errors
///
/// Fails when the file is not a zip of float32 NPY arrays or when voices
/// disagree on shape.
pub fn load_voices(path: &Path) -> Result<VoiceTable> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Cannot open voices archive {}", path.display()))?;
    read_voices(file).with_context(|| format!("Invalid voices archive {}", path.display()))
}

/// Read a voices archive from any seekable reader.
///
/// # Errors
///
/// See [`load_voices`].
pub fn read_voices<R: Read + Seek>(reader: R) -> Result<VoiceTable> {
    let mut archive = ZipArchive::new(reader).context("Not a zip archive")?;
    let mut table = VoiceTable::default();

    for index in 0..archive.len() {
        let mut member = archive.by_index(index)?;
        let Some(voice) = member.name().strip_suffix(".npy").map(str::to_string) else {
            continue;
        };
        let mut bytes = Vec::with_capacity(usize::try_from(member.size()).unwrap_or(0));
        member.read_to_end(&mut bytes)?;

        let (shape, values) =
            decode_npy(&bytes).with_context(|| format!("Voice '{voice}'"))?;
        let style_dim = shape.last().copied().unwrap_or(values.len());

        if table.voices.is_empty() {
            table.style_dim = style_dim;
            table.table_len = values.len();
        } else {
            ensure!(
                style_dim == table.style_dim && values.len() == table.table_len,
                "voice '{voice}' has shape {shape:?}, expected {} values of width {}",
                table.table_len,
                table.style_dim
            );
        }
        table.voices.insert(voice, values);
    }

    ensure!(!table.voices.is_empty(), "archive contains no .npy voices");
    Ok(table)
}

/// Decode one little-endian float32, C-order `.npy` array.
fn decode_npy(bytes: &[u8]) -> Result<(Vec<usize>, Vec<f32>)> {
    ensure!(
        bytes.len() >= 10 && bytes.starts_with(NPY_MAGIC),
        "missing NPY magic"
    );
    let (header_len, offset) = match bytes[6] {
        1 => (usize::from(u16::from_le_bytes([bytes[8], bytes[9]])), 10),
        2 | 3 => {
            ensure!(bytes.len() >= 12, "truncated NPY v2 preamble");
            let len = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
            (usize::try_from(len)?, 12)
        }
        other => bail!("unsupported NPY version {other}"),
    };
    let body_start = offset + header_len;
    let header = bytes
        .get(offset..body_start)
        .ok_or_else(|| anyhow!("truncated NPY header"))?;
    let header = std::str::from_utf8(header).context("NPY header is not UTF-8")?;

    let descr = header_value(header, "descr").ok_or_else(|| anyhow!("no descr"))?;
    let descr = descr.trim_matches(|c| c == '\'' || c == '"');
    ensure!(
        matches!(descr, "<f4" | "=f4"),
        "dtype {descr} unsupported, expected little-endian float32"
    );
    if let Some(order) = header_value(header, "fortran_order") {
        ensure!(order == "False", "Fortran-ordered arrays are unsupported");
    }

    let shape = header_value(header, "shape").ok_or_else(|| anyhow!("no shape"))?;
    let shape = shape
        .trim_start_matches('(')
        .trim_end_matches(')')
        .split(',')
        .map(str::trim)
        .filter(|dim| !dim.is_empty())
        .map(str::parse::<usize>)
        .collect::<Result<Vec<_>, _>>()
        .context("bad shape")?;

    let count: usize = shape.iter().product();
    let body = &bytes[body_start..];
    ensure!(
        body.len() >= count * 4,
        "expected {} data bytes, found {}",
        count * 4,
        body.len()
    );
    let values = body[..count * 4]
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    Ok((shape, values))
}

/// Raw text of `key` in the Python dict literal of an NPY header.
fn header_value<'a>(header: &'a str, key: &str) -> Option<&'a str> {
    let quoted = format!("'{key}'");
    let start = header.find(&quoted)? + quoted.len();
    let rest = header[start..].trim_start().strip_prefix(':')?.trim_start();
    let end = if rest.starts_with('(') {
        rest.find(')')? + 1
    } else {
        rest.find([',', '}']).unwrap_or(rest.len())
    };
    Some(rest[..end].trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};

    pub(crate) fn npy_bytes(shape: &[usize], values: &[f32]) -> Vec<u8> {
        let dims: Vec<String> = shape.iter().map(ToString::to_string).collect();
        let mut header = format!(
            "{{'descr': '<f4', 'fortran_order': False, 'shape': ({},), }}",
            dims.join(", ")
        );
        while (10 + header.len() + 1) % 64 != 0 {
            header.push(' ');
        }
        header.push('\n');

        let mut out = NPY_MAGIC.to_vec();
        out.extend_from_slice(&[1, 0]);
        out.extend_from_slice(&u16::try_from(header.len()).unwrap().to_le_bytes());
        out.extend_from_slice(header.as_bytes());
        for v in values {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out
    }

    pub(crate) fn npz_bytes(voices: &[(&str, &[usize], &[f32])]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored);
        for (name, shape, values) in voices {
            writer.start_file(format!("{name}.npy"), options).unwrap();
            writer.write_all(&npy_bytes(shape, values)).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn test_reads_voice_tables() {
        let adam: Vec<f32> = (0..12).map(|i| i as f32).collect();
        let nova: Vec<f32> = (0..12).map(|i| -(i as f32)).collect();
        let bytes = npz_bytes(&[("am_adam", &[3, 1, 4], &adam), ("af_nova", &[3, 1, 4], &nova)]);

        let table = read_voices(Cursor::new(bytes)).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.style_dim(), 4);
        assert_eq!(table.table_len(), 12);
        assert_eq!(table.get("am_adam").unwrap(), adam.as_slice());
        assert!(table.get("missing").is_none());
    }

    #[test]
    fn test_rejects_mismatched_shapes() {
        let bytes = npz_bytes(&[
            ("am_adam", &[2, 1, 4], &[0.0; 8]),
            ("af_nova", &[3, 1, 4], &[0.0; 12]),
        ]);
        let err = read_voices(Cursor::new(bytes)).unwrap_err();
        assert!(format!("{err:#}").contains("expected 8 values"));
    }

    #[test]
    fn test_rejects_non_npz() {
        assert!(read_voices(Cursor::new(b"plain text".to_vec())).is_err());
    }

    #[test]
    fn test_rejects_wrong_dtype() {
        let mut bytes = npy_bytes(&[2], &[1.0, 2.0]);
        let pos = bytes.windows(3).position(|w| w == b"<f4").unwrap();
        bytes[pos + 2] = b'8';
        assert!(decode_npy(&bytes).is_err());
    }

    #[test]
    fn test_style_row_selection() {
        let table: Vec<f32> = (0..12).map(|i| i as f32).collect();
        assert_eq!(style_row(&table, 4, 0), &[0.0, 1.0, 2.0, 3.0]);
        assert_eq!(style_row(&table, 4, 1), &[4.0, 5.0, 6.0, 7.0]);
        // clamps past the final row
        assert_eq!(style_row(&table, 4, 50), &[8.0, 9.0, 10.0, 11.0]);
        // single-row embeddings are used as-is
        assert_eq!(style_row(&table[..4], 4, 7), &[0.0, 1.0, 2.0, 3.0]);
    }
}
