//! # HoTT Protocol Module
//!
//! Wire-level protocol, frame builders and the sensor frame decoder.
//!
//! This module handles:
//! - CRC16 checksums and command framing
//! - Protocol variants and sensor identifiers
//! - Decoding frames into sparse sample patches
//! - Per-stream GPS and ESC profile resolution

pub mod command;
pub mod crc;
pub mod decoder;
pub mod profile;
pub mod protocol;
pub mod sample;

pub use decoder::{DecodeContext, FrameFormat, Rejected};
pub use protocol::{ProtocolVariant, SensorType};
pub use sample::{Sample, SamplePatch};
