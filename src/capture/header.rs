//! # Capture Header
//!
//! Textual `KEY: value` header at the start of a stored capture file.
//!
//! This module handles:
//! - Scanning header lines up to the first non-header line
//! - Block sizing (raw or ASCII-hex) and the data offset
//! - Time step derived from the `COUNTER` rate
//! - Start time and the detected sensor list

use chrono::NaiveTime;
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::error::{HottError, Result};
use crate::hott::decoder::LOG_BLOCK_SIZE;
use crate::hott::protocol::SensorType;

pub const KEY_CHANNELS: &str = "LOG NOB CHANNEL";
pub const KEY_TYPE: &str = "LOG TYPE";
pub const KEY_RAW_SIZE: &str = "RAW_LOG_SIZE";
pub const KEY_ASCII_SIZE: &str = "ASCII_LOG_SIZE";
pub const KEY_COUNTER: &str = "COUNTER";
pub const KEY_DATA_OFFSET: &str = "LOG DATA OFFSET";
pub const KEY_COUNT: &str = "LOG COUNT";
pub const KEY_START_TIME: &str = "LOG START TIME";
pub const KEY_DETECTED: &str = "DETECTED SENSOR";

/// Header lines are only searched for in the first bytes of a file
const HEADER_SCAN_LIMIT: usize = 8192;

/// Parsed capture header
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureHeader {
    /// Channels stored after the 66 byte sensor part of each block
    pub channel_count: usize,
    pub is_ascii: bool,
    pub raw_block_size: usize,
    pub ascii_block_size: usize,
    /// Nominal time between two consecutive sequence numbers
    pub time_step_ms: u64,
    pub data_offset: usize,
    pub block_count: u64,
    pub start_time: Option<NaiveTime>,
    pub detected_sensors: Vec<SensorType>,
    /// All header entries, verbatim
    pub entries: BTreeMap<String, String>,
}

impl CaptureHeader {
    /// Parse the header at the start of `bytes`
    ///
    /// # Errors
    ///
    /// Returns [`HottError::Capture`] when a required key is missing or a
    /// numeric value does not parse.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let entries = scan_entries(&bytes[..bytes.len().min(HEADER_SCAN_LIMIT)]);
        debug!("Capture header: {:?}", entries);

        let is_ascii = required(&entries, KEY_TYPE)?.to_ascii_uppercase().contains("ASCII");
        let raw_block_size: usize = number(&entries, KEY_RAW_SIZE)?;
        if raw_block_size < LOG_BLOCK_SIZE {
            return Err(HottError::Capture(format!(
                "{} of {} is below the {} byte block minimum",
                KEY_RAW_SIZE, raw_block_size, LOG_BLOCK_SIZE
            )));
        }
        let ascii_block_size = if is_ascii { number(&entries, KEY_ASCII_SIZE)? } else { 0 };
        if is_ascii && ascii_block_size == 0 {
            return Err(HottError::Capture(format!("{} must not be 0", KEY_ASCII_SIZE)));
        }

        let channel_count = match entries.get(KEY_CHANNELS) {
            Some(_) => number(&entries, KEY_CHANNELS)?,
            None => 0,
        };

        let header = CaptureHeader {
            channel_count,
            is_ascii,
            raw_block_size,
            ascii_block_size,
            time_step_ms: time_step(required(&entries, KEY_COUNTER)?)?,
            data_offset: number(&entries, KEY_DATA_OFFSET)?,
            block_count: number(&entries, KEY_COUNT)?,
            start_time: entries.get(KEY_START_TIME).and_then(|value| start_time(value)),
            detected_sensors: entries
                .get(KEY_DETECTED)
                .map(|value| detected_sensors(value))
                .unwrap_or_default(),
            entries,
        };
        Ok(header)
    }

    /// Bytes per stored block
    pub fn block_size(&self) -> usize {
        if self.is_ascii {
            self.ascii_block_size
        } else {
            self.raw_block_size
        }
    }
}

fn scan_entries(bytes: &[u8]) -> BTreeMap<String, String> {
    let mut entries = BTreeMap::new();
    for line in bytes.split(|&b| b == b'\n') {
        let Ok(line) = std::str::from_utf8(line) else {
            break;
        };
        let line = line.trim_end_matches(['\r', '\0']);
        if line.trim().is_empty() {
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            break;
        };
        entries.insert(key.trim().to_string(), value.trim().to_string());
    }
    entries
}

fn required<'a>(entries: &'a BTreeMap<String, String>, key: &str) -> Result<&'a str> {
    entries
        .get(key)
        .map(String::as_str)
        .ok_or_else(|| HottError::Capture(format!("header key {:?} missing", key)))
}

fn number<T: std::str::FromStr>(entries: &BTreeMap<String, String>, key: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    let value = required(entries, key)?;
    value
        .parse()
        .map_err(|e| HottError::Capture(format!("header key {:?} value {:?}: {}", key, value, e)))
}

/// `COUNTER` carries `count/rate Hz`; the time step is one period of the rate
fn time_step(counter: &str) -> Result<u64> {
    let rate = counter
        .split('/')
        .nth(1)
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|rate| rate.parse::<u64>().ok())
        .filter(|&rate| rate > 0)
        .ok_or_else(|| HottError::Capture(format!("no sample rate in {} {:?}", KEY_COUNTER, counter)))?;
    Ok(1000 / rate)
}

fn start_time(value: &str) -> Option<NaiveTime> {
    match NaiveTime::parse_from_str(value.trim(), "%H:%M:%S") {
        Ok(time) => Some(time),
        Err(e) => {
            warn!("Ignoring {} {:?}: {}", KEY_START_TIME, value, e);
            None
        }
    }
}

fn detected_sensors(value: &str) -> Vec<SensorType> {
    value
        .split(',')
        .filter(|name| !name.trim().is_empty())
        .filter_map(|name| {
            let sensor = SensorType::from_detected_name(name);
            if sensor.is_none() {
                debug!("Unknown detected sensor {:?}", name);
            }
            sensor
        })
        .collect()
}


#[cfg(test)]
mod tests {
    use super::test_support::header_text;
    use super::*;

    #[test]
    fn test_parse_binary_header() {
        let header = CaptureHeader::parse(header_text(false, 66, 12, 512).as_bytes()).unwrap();

        assert!(!header.is_ascii);
        assert_eq!(header.raw_block_size, 66);
        assert_eq!(header.block_size(), 66, "binary captures use the raw size");
        assert_eq!(header.time_step_ms, 100);
        assert_eq!(header.data_offset, 512);
        assert_eq!(header.block_count, 12);
        assert_eq!(header.start_time, NaiveTime::from_hms_opt(14, 5, 30));
        assert_eq!(header.detected_sensors, vec![SensorType::Receiver, SensorType::Vario, SensorType::Gps]);
        assert_eq!(header.entries.get("FILE TYPE").map(String::as_str), Some("HoTT capture"));
    }

    #[test]
    fn test_parse_ascii_header() {
        let header = CaptureHeader::parse(header_text(true, 66, 3, 400).as_bytes()).unwrap();
        assert!(header.is_ascii);
        assert_eq!(header.block_size(), 256);
    }

    #[test]
    fn test_scan_stops_at_binary_data() {
        let mut bytes = header_text(false, 66, 1, 300).into_bytes();
        bytes.extend_from_slice(&[0xFF, 0xFE, b':', 0x00, b'\n']);
        bytes.extend_from_slice(b"LATE KEY: 1\n");
        let header = CaptureHeader::parse(&bytes).unwrap();
        assert!(!header.entries.contains_key("LATE KEY"), "lines after binary data are not header lines");
    }

    #[test]
    fn test_missing_key_is_error() {
        let text = header_text(false, 66, 1, 300).replace("LOG COUNT: 1\n", "");
        match CaptureHeader::parse(text.as_bytes()) {
            Err(HottError::Capture(msg)) => assert!(msg.contains("LOG COUNT"), "message: {}", msg),
            other => panic!("Expected Capture error, got: {:?}", other),
        }
    }

    #[test]
    fn test_block_size_below_minimum() {
        let text = header_text(false, 40, 1, 300);
        assert!(matches!(CaptureHeader::parse(text.as_bytes()), Err(HottError::Capture(_))));
    }

    #[test]
    fn test_time_step_from_counter() {
        assert_eq!(time_step("1500/10 Hz").unwrap(), 100);
        assert_eq!(time_step("9/40").unwrap(), 25);
        assert!(time_step("1500").is_err(), "rate is required");
        assert!(time_step("1500/0 Hz").is_err(), "zero rate would divide by zero");
    }

    #[test]
    fn test_invalid_start_time_is_ignored() {
        let text = header_text(false, 66, 1, 300).replace("14:05:30", "noon");
        let header = CaptureHeader::parse(text.as_bytes()).unwrap();
        assert_eq!(header.start_time, None);
    }
}
