//! Capture file loading
//!
//! Two formats are understood:
//! - Text: one `0`/`1` character per sample, whitespace ignored, lines
//!   starting with `#` are comments.
//! - Binary (`.bin`): samples packed 8 per byte, least significant bit first.

use can_bit_decoder::{DecoderError, Result};
use std::fs;
use std::path::Path;

/// Load the samples of a capture file, picking the format from the extension
pub fn load_capture(path: &Path) -> Result<Vec<bool>> {
    let is_binary = path
        .extension()
        .and_then(|e| e.to_str())
        .map_or(false, |e| e.eq_ignore_ascii_case("bin"));

    let samples = if is_binary {
        unpack_samples(&fs::read(path)?)
    } else {
        parse_text(&fs::read_to_string(path)?)?
    };

    if samples.is_empty() {
        return Err(DecoderError::InvalidCapture(format!(
            "{} contains no samples",
            path.display()
        )));
    }
    log::debug!("Loaded {} samples from {:?}", samples.len(), path);
    Ok(samples)
}

/// Parse the text capture format
pub fn parse_text(content: &str) -> Result<Vec<bool>> {
    let mut samples = Vec::with_capacity(content.len());

    for (line_no, line) in content.lines().enumerate() {
        if line.trim_start().starts_with('#') {
            continue;
        }
        for c in line.chars() {
            match c {
                '0' => samples.push(false),
                '1' => samples.push(true),
                c if c.is_whitespace() => {}
                other => {
                    return Err(DecoderError::InvalidCapture(format!(
                        "unexpected character {:?} on line {}",
                        other,
                        line_no + 1
                    )))
                }
            }
        }
    }
    Ok(samples)
}

/// Expand packed bytes into samples, LSB first
pub fn unpack_samples(bytes: &[u8]) -> Vec<bool> {
    bytes
        .iter()
        .flat_map(|&byte| (0..8).map(move |bit| byte >> bit & 1 == 1))
        .collect()
}

/// Pack samples into bytes, LSB first; the last byte is padded with zeros
#[cfg(test)]
pub fn pack_samples(samples: &[bool]) -> Vec<u8> {
    samples
        .chunks(8)
        .map(|chunk| {
            chunk
                .iter()
                .enumerate()
                .fold(0u8, |byte, (bit, &s)| byte | (s as u8) << bit)
        })
        .collect()
}
