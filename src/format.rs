//! Serialized model wire format.
//!
//! Fixed little-endian layout with no magic and no version field; breaking
//! changes require out-of-band negotiation:
//!
//! ```text
//! dimension:   u32
//! dict_size:   u32
//! entries:     dict_size × { len: u32, utf8_bytes: [u8; len] }
//! has_unknown: u8 (0|1)   unknown row present, its id is dict_size
//! subword:     u8 (0|1)   subword decomposition enabled
//! weights:     [f32] × dimension × (dict_size + has_unknown), row-major by id
//! ```
//!
//! Composed rows are runtime-only and never serialized. Any truncation,
//! size inconsistency, or trailing slack is a fatal decode error; there is
//! no partial-load recovery.

use std::io::Write;

use crate::error::{EmbedError, Result};
use crate::vocab::Vocab;

/// Decoded wire-level model parts, before semantic assembly.
#[derive(Debug)]
pub(crate) struct RawModel {
    pub dimension: usize,
    pub words: Vec<String>,
    pub has_unknown: bool,
    pub subword: bool,
    /// Packed base rows: `dimension * (words.len() + has_unknown)` floats.
    pub weights: Vec<f32>,
}

fn take_u32(data: &[u8], pos: &mut usize, what: &str) -> Result<u32> {
    let end = *pos + 4;
    if end > data.len() {
        return Err(EmbedError::decode(format!("{what} truncated")));
    }
    let v = u32::from_le_bytes(data[*pos..end].try_into().unwrap());
    *pos = end;
    Ok(v)
}

fn take_flag(data: &[u8], pos: &mut usize, what: &str) -> Result<bool> {
    if *pos >= data.len() {
        return Err(EmbedError::decode(format!("{what} truncated")));
    }
    let b = data[*pos];
    *pos += 1;
    match b {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(EmbedError::decode(format!(
            "{what}: expected 0 or 1, got {other}"
        ))),
    }
}

/// Parse a serialized model from a byte buffer.
pub(crate) fn read_model_from_bytes(data: &[u8]) -> Result<RawModel> {
    let mut pos = 0;

    let dimension = take_u32(data, &mut pos, "dimension")? as usize;
    if dimension == 0 {
        return Err(EmbedError::decode("dimension must be nonzero"));
    }

    let dict_size = take_u32(data, &mut pos, "dictionary size")? as usize;
    let mut words = Vec::with_capacity(dict_size.min(1 << 20));
    for i in 0..dict_size {
        let len = take_u32(data, &mut pos, "dictionary entry length")? as usize;
        if pos + len > data.len() {
            return Err(EmbedError::decode(format!(
                "dictionary entry {i} truncated"
            )));
        }
        let word = std::str::from_utf8(&data[pos..pos + len])
            .map_err(|e| EmbedError::decode(format!("dictionary entry {i}: invalid UTF-8: {e}")))?;
        words.push(word.to_string());
        pos += len;
    }

    let has_unknown = take_flag(data, &mut pos, "unknown-row flag")?;
    let subword = take_flag(data, &mut pos, "subword flag")?;

    let rows = dict_size + usize::from(has_unknown);
    if rows > i32::MAX as usize {
        return Err(EmbedError::decode("dictionary too large for id space"));
    }
    let floats = rows
        .checked_mul(dimension)
        .ok_or_else(|| EmbedError::decode("weight block size overflow"))?;
    let expected = floats
        .checked_mul(4)
        .ok_or_else(|| EmbedError::decode("weight block size overflow"))?;
    let remaining = data.len() - pos;
    if remaining < expected {
        return Err(EmbedError::decode(format!(
            "weight block truncated: {remaining} bytes, expected {expected} \
             ({rows} rows × {dimension} dims)"
        )));
    }
    if remaining > expected {
        return Err(EmbedError::decode(format!(
            "{} trailing bytes after weight block",
            remaining - expected
        )));
    }

    let weights = data[pos..]
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes(c.try_into().unwrap()))
        .collect();

    Ok(RawModel {
        dimension,
        words,
        has_unknown,
        subword,
        weights,
    })
}

/// Write a model in the wire layout. `weights` must hold exactly the base
/// rows, row-major by id.
pub(crate) fn write_model<W: Write>(
    writer: &mut W,
    dimension: usize,
    vocab: &Vocab,
    has_unknown: bool,
    subword: bool,
    weights: &[f32],
) -> Result<()> {
    writer.write_all(&(dimension as u32).to_le_bytes())?;
    writer.write_all(&(vocab.len() as u32).to_le_bytes())?;
    for (_, word) in vocab.iter() {
        writer.write_all(&(word.len() as u32).to_le_bytes())?;
        writer.write_all(word.as_bytes())?;
    }
    writer.write_all(&[u8::from(has_unknown)])?;
    writer.write_all(&[u8::from(subword)])?;
    for &v in weights {
        writer.write_all(&v.to_le_bytes())?;
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
