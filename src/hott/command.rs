//! # HoTT Command Framing
//!
//! Builds outgoing command frames for the fast variant and the bulk
//! transfer sub-protocol.
//!
//! Frame layout:
//! ```text
//! [0x00, up, down, len_lo, len_hi, op0, op1, body.., crc_lo, crc_hi]
//! ```
//! The CRC16-CCITT covers everything from the length field on.

use bytes::BufMut;

use super::crc::crc16_ccitt;

/// Number of bytes written before the command gap
pub const FIRST_CHUNK_LEN: usize = 7;

/// Number of bytes of a model-data write sent before the command gap
pub const MDL_WRITE_FIRST_CHUNK_LEN: usize = 11;

/// Offset of the length field, start of the checksummed region
const CRC_START: usize = 3;

/// Up/down command sequence counter pair
///
/// Owned by one link session. Every built frame advances the pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceCounter {
    up: u8,
    down: u8,
}

impl Default for SequenceCounter {
    fn default() -> Self {
        Self { up: 0x00, down: 0xFF }
    }
}

impl SequenceCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance and return the `(up, down)` pair for the next frame
    ///
    /// The pair resets to `(0x00, 0xFF)` once `up` reaches 0xFA or `down`
    /// reaches 0x05, before advancing.
    pub fn next_pair(&mut self) -> (u8, u8) {
        if self.up == 0xFA || self.down == 0x05 {
            *self = Self::default();
        }
        self.up = self.up.wrapping_add(1);
        self.down = self.down.wrapping_sub(1);
        (self.up, self.down)
    }

    pub fn current(&self) -> (u8, u8) {
        (self.up, self.down)
    }
}

/// Append the checksum over `frame[3..]`, low byte first
fn push_crc(frame: &mut Vec<u8>) {
    let crc = crc16_ccitt(frame, CRC_START, frame.len() - CRC_START);
    frame.put_u16_le(crc);
}

/// Build a command frame with an optional text body
///
/// An empty body yields a 9 byte frame. A non-empty body is NUL
/// terminated and its length byte counts the terminator.
///
/// # Arguments
///
/// * `opcode` - Two-byte command opcode
/// * `body` - Optional ASCII body (path names, size arguments)
/// * `seq` - Session sequence counter, advanced by one
///
/// # Returns
///
/// * `Vec<u8>` - Complete frame including the trailing CRC16
///
/// # Examples
///
/// ```no_run
/// use hott_link::hott::command::{build_command, SequenceCounter};
/// use hott_link::hott::crc::verify_checksum;
///
/// let mut seq = SequenceCounter::new();
/// let frame = build_command([0x04, 0x34], None, &mut seq);
/// assert_eq!(frame.len(), 9);
/// assert!(verify_checksum(&frame, 3));
/// ```
pub fn build_command(opcode: [u8; 2], body: Option<&str>, seq: &mut SequenceCounter) -> Vec<u8> {
    let body = body.unwrap_or_default().as_bytes();
    let (up, down) = seq.next_pair();

    let mut frame = Vec::with_capacity(body.len() + 10);
    frame.put_u8(0x00);
    frame.put_u8(up);
    frame.put_u8(down);
    if body.is_empty() {
        frame.put_u8(0x00);
    } else {
        frame.put_u8((body.len() + 1) as u8);
    }
    frame.put_u8(0x00);
    frame.put_slice(&opcode);
    if !body.is_empty() {
        frame.put_slice(body);
        frame.put_u8(0x00);
    }
    push_crc(&mut frame);

    frame
}

/// Build a command carrying binary data (host to SD card file chunks)
///
/// The data is preceded by its size as the 7 ASCII characters `"0x%04x "`
/// and a NUL byte.
pub fn build_data_command(opcode: [u8; 2], data: &[u8], seq: &mut SequenceCounter) -> Vec<u8> {
    let (up, down) = seq.next_pair();

    let mut frame = Vec::with_capacity(data.len() + 17);
    frame.put_u8(0x00);
    frame.put_u8(up);
    frame.put_u8(down);
    frame.put_u16_le((data.len() + 8) as u16);
    frame.put_slice(&opcode);
    frame.put_slice(format!("0x{:04x} ", data.len() & 0xFFFF).as_bytes());
    frame.put_u8(0x00);
    frame.put_slice(data);
    push_crc(&mut frame);

    frame
}

/// Build a raw model-data read request
pub fn build_mdl_read(data: &[u8], seq: &mut SequenceCounter) -> Vec<u8> {
    let (up, down) = seq.next_pair();

    let mut frame = Vec::with_capacity(data.len() + 9);
    frame.put_u8(0x00);
    frame.put_u8(up);
    frame.put_u8(down);
    frame.put_u16_le(data.len() as u16);
    frame.put_slice(&super::protocol::opcode::QUERY_MDL_DATA);
    frame.put_slice(data);
    push_crc(&mut frame);

    frame
}

/// Build a raw model-data write of `data` at model memory `position`
pub fn build_mdl_write(position: u16, data: &[u8], seq: &mut SequenceCounter) -> Vec<u8> {
    let (up, down) = seq.next_pair();

    let mut frame = Vec::with_capacity(data.len() + 13);
    frame.put_u8(0x00);
    frame.put_u8(up);
    frame.put_u8(down);
    frame.put_u16_le((data.len() + 4) as u16);
    frame.put_slice(&super::protocol::opcode::WRITE_MDL_DATA);
    frame.put_u8(0x00);
    frame.put_u16_le(position);
    frame.put_u8(0x00);
    frame.put_slice(data);
    push_crc(&mut frame);

    frame
}
