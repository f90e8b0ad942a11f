//! ASCII-hex capture blocks
//!
//! A text block holds seven `|` separated parts: the sequence number as
//! 8 hex digits, the decimal status bytes, three groups of hex bytes
//! (receiver, sensor info, sensor data) and the decimal channel values.
//! Converting it yields the same layout as a binary block.

use crate::error::{HottError, Result};

const PART_COUNT: usize = 7;

/// Convert one ASCII block into a raw block of `raw_size` bytes
///
/// # Errors
///
/// Returns [`HottError::Capture`] for a malformed block; the reader logs
/// and skips it.
pub fn ascii_block_to_raw(block: &[u8], raw_size: usize) -> Result<Vec<u8>> {
    let text = String::from_utf8_lossy(block);
    let text = text.trim_matches(|c: char| c == '\0' || c.is_whitespace());
    let parts: Vec<&str> = text.split('|').collect();
    if parts.len() != PART_COUNT || parts[0].trim().len() != 8 {
        return Err(malformed(text, "expected 7 parts led by an 8 digit sequence"));
    }

    let sequence = u32::from_str_radix(parts[0].trim(), 16)
        .map_err(|e| malformed(text, &format!("sequence: {}", e)))?;

    let mut raw = RawWriter::new(raw_size);
    raw.put(&sequence.to_le_bytes(), text)?;
    for token in tokens(parts[1]) {
        let value: i32 = token.parse().map_err(|e| malformed(text, &format!("status {:?}: {}", token, e)))?;
        raw.put(&[value as u8], text)?;
    }
    for part in &parts[2..5] {
        for token in tokens(part) {
            let value = u32::from_str_radix(token, 16)
                .map_err(|e| malformed(text, &format!("byte {:?}: {}", token, e)))?;
            raw.put(&[value as u8], text)?;
        }
    }
    for token in tokens(parts[5]) {
        let value: i32 = token.parse().map_err(|e| malformed(text, &format!("channel {:?}: {}", token, e)))?;
        raw.put(&(value as u16).to_le_bytes(), text)?;
    }

    Ok(raw.buf)
}

fn tokens(part: &str) -> impl Iterator<Item = &str> {
    part.split(',').map(str::trim).filter(|token| !token.is_empty())
}

fn malformed(text: &str, reason: &str) -> HottError {
    let preview: String = text.chars().take(40).collect();
    HottError::Capture(format!("invalid ASCII block {:?}: {}", preview, reason))
}

struct RawWriter {
    buf: Vec<u8>,
    index: usize,
}

impl RawWriter {
    fn new(size: usize) -> Self {
        Self {
            buf: vec![0; size],
            index: 0,
        }
    }

    fn put(&mut self, bytes: &[u8], text: &str) -> Result<()> {
        let end = self.index + bytes.len();
        if end > self.buf.len() {
            return Err(malformed(text, &format!("more than {} bytes", self.buf.len())));
        }
        self.buf[self.index..end].copy_from_slice(bytes);
        self.index = end;
        Ok(())
    }
}
