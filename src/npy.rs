//! Minimal NPY reader/writer for cached audio.
//!
//! Cache entries are single one-dimensional `float32` arrays, stored in the
//! NumPy array format so they stay inspectable with standard tooling:
//!   - NPY format version 1.0 (2.0 accepted on read)
//!   - `float32` dtype (`<f4`, `=f4`)
//!   - C-contiguous, one dimension

use anyhow::{bail, Context, Result};
use std::path::Path;

// ─────────────────────────────────────────────────────────────────────────────
// Reader
// ─────────────────────────────────────────────────────────────────────────────

/// Parse a raw `.npy` byte buffer into a flat sample vector.
///
/// Rejects anything that is not a 1-D float32 array — a cache entry with any
/// other shape is corrupt by definition.
pub fn parse_npy_1d(data: &[u8]) -> Result<Vec<f32>> {
    // Magic: 6 bytes "\x93NUMPY"
    if data.len() < 10 || &data[..6] != b"\x93NUMPY" {
        bail!("not a valid NPY file (bad magic)");
    }

    let major = data[6];
    let minor = data[7];

    // Header length: 2 bytes (v1) or 4 bytes (v2), little-endian.
    let (header_len, header_start) = match (major, minor) {
        (1, _) => (u16::from_le_bytes([data[8], data[9]]) as usize, 10),
        (2, _) => {
            if data.len() < 12 {
                bail!("NPY v2 file too short");
            }
            let len = u32::from_le_bytes([data[8], data[9], data[10], data[11]]) as usize;
            (len, 12)
        }
        _ => bail!("unsupported NPY version {}.{}", major, minor),
    };

    let header_end = header_start + header_len;
    if data.len() < header_end {
        bail!("NPY file truncated in header");
    }
    let header = std::str::from_utf8(&data[header_start..header_end])
        .context("NPY header is not valid UTF-8")?;

    let dtype = extract_header_field(header, "descr").context("NPY header missing 'descr'")?;
    let dtype = dtype.trim().trim_matches('\'').trim_matches('"');
    if !matches!(dtype, "<f4" | "=f4" | "|f4") {
        bail!("unsupported dtype '{}' — expected little-endian float32", dtype);
    }

    let fortran = extract_header_field(header, "fortran_order")
        .unwrap_or("False")
        .trim()
        .to_ascii_lowercase();
    if fortran == "true" {
        bail!("Fortran-order arrays are not supported");
    }

    let shape_str = extract_header_field(header, "shape").context("NPY header missing 'shape'")?;
    let shape = parse_shape(shape_str.trim())?;
    if shape.len() != 1 {
        bail!("expected a 1-D sample array, got shape {:?}", shape);
    }
    let n_elements = shape[0];

    let data_bytes = &data[header_end..];
    if data_bytes.len() < n_elements * 4 {
        bail!(
            "NPY data section too short: expected {} bytes, got {}",
            n_elements * 4,
            data_bytes.len()
        );
    }

    Ok(data_bytes[..n_elements * 4]
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

/// Read a 1-D float32 `.npy` file from disk.
pub fn read_npy_1d(path: &Path) -> Result<Vec<f32>> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("cannot read NPY file: {}", path.display()))?;
    parse_npy_1d(&bytes)
}

/// Extract the value of a field from a Python-literal dict header string.
///
/// e.g. `extract_header_field("{'descr': '<f4', 'shape': (3,)}", "descr")`
/// returns `Some("<f4")`.
fn extract_header_field<'a>(header: &'a str, field: &str) -> Option<&'a str> {
    let key_sq = format!("'{}':", field);
    let key_dq = format!("\"{}\":", field);

    let start = header
        .find(key_sq.as_str())
        .map(|p| p + key_sq.len())
        .or_else(|| header.find(key_dq.as_str()).map(|p| p + key_dq.len()))?;

    let rest = header[start..].trim_start();

    // Value is either a Python string (quoted), tuple (parentheses), or a bare word.
    if rest.starts_with('(') {
        let end = rest.find(')')?;
        Some(&rest[..end + 1])
    } else if rest.starts_with('\'') || rest.starts_with('"') {
        let quote = rest.chars().next()?;
        let inner = &rest[1..];
        let end = inner.find(quote)?;
        Some(&inner[..end])
    } else {
        let end = rest.find([',', '}']).unwrap_or(rest.len());
        Some(rest[..end].trim())
    }
}

/// Parse a Python-style shape tuple like `(100,)` or `(256, 512)`.
fn parse_shape(s: &str) -> Result<Vec<usize>> {
    let inner = s.trim_start_matches('(').trim_end_matches(')');
    if inner.trim().is_empty() {
        return Ok(vec![]);
    }
    inner
        .split(',')
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .map(|t| t.parse::<usize>().with_context(|| format!("bad shape dim: '{}'", t)))
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Writer
// ─────────────────────────────────────────────────────────────────────────────

/// Serialize samples as an NPY v1.0 buffer (`<f4`, 1-D, C-order).
pub fn to_npy_1d(samples: &[f32]) -> Vec<u8> {
    let header_str = format!(
        "{{'descr': '<f4', 'fortran_order': False, 'shape': ({},), }}",
        samples.len()
    );
    // The header block (magic + version + length + text) is padded with spaces
    // to a multiple of 64 bytes and terminated with '\n', per the NPY spec.
    let unpadded = 10 + header_str.len() + 1;
    let padding = (64 - unpadded % 64) % 64;

    let mut header = header_str;
    header.extend(std::iter::repeat(' ').take(padding));
    header.push('\n');

    let mut buf = Vec::with_capacity(10 + header.len() + samples.len() * 4);
    buf.extend_from_slice(b"\x93NUMPY");
    buf.push(1); // major
    buf.push(0); // minor
    buf.extend_from_slice(&(header.len() as u16).to_le_bytes());
    buf.extend_from_slice(header.as_bytes());
    for &s in samples {
        buf.extend_from_slice(&s.to_le_bytes());
    }
    buf
}

/// Write samples to a 1-D float32 `.npy` file.
pub fn write_npy_1d(path: &Path, samples: &[f32]) -> Result<()> {
    std::fs::write(path, to_npy_1d(samples))
        .with_context(|| format!("cannot write NPY file: {}", path.display()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
