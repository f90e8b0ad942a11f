//! # HoTT Protocol Constants and Types
//!
//! Core protocol definitions shared by the live link and the capture reader:
//! protocol variants, sensor types with their wire identifiers and frame
//! lengths, begin/end markers, command opcodes and timing defaults.

use serde::Deserialize;
use std::fmt;

/// Legacy address query byte, also the first byte of every legacy frame
pub const ADDRESS_QUERY: u8 = 0x80;

/// Begin marker of a legacy answer (found at frame offset 2)
pub const DATA_BEGIN: u8 = 0x7C;

/// End marker of a legacy answer (found at frame offset len-2)
pub const DATA_END: u8 = 0x7D;

/// First opcode byte of a fast sensor data query
pub const QUERY_SENSOR_DATA: u8 = 0x04;

/// Second opcode byte of the fast receiver signal (dBm) query
pub const QUERY_RECEIVER_SIGNAL: u8 = 0x33;

/// Answer size of the receiver signal query
pub const RECEIVER_SIGNAL_ANSWER_SIZE: usize = 234;

/// Capture block byte 24 value marking a receiver sensitivity block
pub const SENSITIVITY_BLOCK_MARKER: u8 = 0x1F;

/// Default per-read timeout
pub const READ_TIMEOUT_MS: u64 = 1000;

/// Default timeout of the receiver signal query
pub const DBM_TIMEOUT_MS: u64 = 2000;

/// Default timeout for reading one bulk transfer chunk
pub const TRANSFER_TIMEOUT_MS: u64 = 5000;

/// Gap between two query cycles
pub const QUERY_GAP_MS: u64 = 30;

/// Gap between the two write chunks of a command frame
pub const CMD_GAP_MS: u64 = 5;

/// Gap between address query and sensor byte in the legacy cycle
pub const ECHO_GAP_MS: u64 = 4;

/// Default hard limit of the session transfer error counter
pub const TRANSFER_ERROR_BUDGET: u32 = 1000;

/// Bulk transfer chunk size
pub const FILE_CHUNK_SIZE: usize = 2048;

/// Alignment unit when salvaging a partially received chunk
pub const PARTIAL_CHUNK_ALIGNMENT: usize = 64;

/// Two-byte command opcodes of the fast variant
pub mod opcode {
    pub const QUERY_TX_INFO: [u8; 2] = [0x00, 0x11];
    pub const RESTART_TX: [u8; 2] = [0x00, 0x20];
    pub const PREPARE_FILE_TRANSFER: [u8; 2] = [0x03, 0x30];
    pub const TX_INIT: [u8; 2] = [0x04, 0x31];
    pub const PREPARE_LIST_MDL: [u8; 2] = [0x05, 0x32];
    pub const QUERY_MDL_DATA: [u8; 2] = [0x05, 0x33];
    pub const WRITE_MDL_DATA: [u8; 2] = [0x05, 0x34];
    pub const SELECT_SD_CARD: [u8; 2] = [0x06, 0x30];
    pub const QUERY_SD_SIZES: [u8; 2] = [0x06, 0x33];
    pub const FILE_XFER_INIT: [u8; 2] = [0x06, 0x35];
    pub const FILE_XFER_CLOSE: [u8; 2] = [0x06, 0x36];
    pub const FILE_UPLOAD: [u8; 2] = [0x06, 0x38];
    pub const FILE_DELETE: [u8; 2] = [0x06, 0x39];
    pub const FILE_DOWNLOAD: [u8; 2] = [0x06, 0x3A];
    pub const LIST_DIR: [u8; 2] = [0x06, 0x3C];
    pub const CHANGE_DIR: [u8; 2] = [0x06, 0x3D];
    pub const MK_DIR: [u8; 2] = [0x06, 0x3E];
    pub const FILE_INFO: [u8; 2] = [0x06, 0x3F];
}

/// Wire speed/format family, fixed at session start
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
pub enum ProtocolVariant {
    /// 19200 baud, begin/end markers, short V3 frames
    #[serde(rename = "legacy_v3")]
    Legacy19200V3,
    /// 19200 baud, begin/end markers, 57 byte V4 frames
    #[serde(rename = "legacy_v4")]
    Legacy19200V4,
    /// 115200 baud, command framed queries with CRC16 answers
    #[serde(rename = "fast")]
    Fast115200,
}

impl ProtocolVariant {
    pub fn baud_rate(self) -> u32 {
        match self {
            ProtocolVariant::Legacy19200V3 | ProtocolVariant::Legacy19200V4 => 19_200,
            ProtocolVariant::Fast115200 => 115_200,
        }
    }

    pub fn is_legacy(self) -> bool {
        !matches!(self, ProtocolVariant::Fast115200)
    }
}

impl fmt::Display for ProtocolVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProtocolVariant::Legacy19200V3 => "19200 V3",
            ProtocolVariant::Legacy19200V4 => "19200 V4",
            ProtocolVariant::Fast115200 => "115200",
        };
        f.write_str(name)
    }
}

/// Sensor on the HoTT bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorType {
    Receiver,
    Vario,
    Gps,
    GeneralAir,
    ElectricAir,
    Esc,
    Esc2,
    Esc3,
    Esc4,
    ChannelsMonitor,
}

impl SensorType {
    pub const ALL: [SensorType; 10] = [
        SensorType::Receiver,
        SensorType::Vario,
        SensorType::Gps,
        SensorType::GeneralAir,
        SensorType::ElectricAir,
        SensorType::Esc,
        SensorType::Esc2,
        SensorType::Esc3,
        SensorType::Esc4,
        SensorType::ChannelsMonitor,
    ];

    /// Sensor type byte sent on the wire for `variant`
    ///
    /// Returns `None` for sensors the variant cannot query.
    pub fn wire_byte(self, variant: ProtocolVariant) -> Option<u8> {
        if variant.is_legacy() {
            match self {
                SensorType::Receiver => Some(0x80),
                SensorType::Vario => Some(0x89),
                SensorType::Gps => Some(0x8A),
                SensorType::GeneralAir => Some(0x8D),
                SensorType::ElectricAir => Some(0x8E),
                SensorType::Esc if variant == ProtocolVariant::Legacy19200V4 => Some(0x8C),
                _ => None,
            }
        } else {
            match self {
                SensorType::Receiver => Some(0x34),
                SensorType::GeneralAir => Some(0x35),
                SensorType::ElectricAir => Some(0x36),
                SensorType::Vario => Some(0x37),
                SensorType::Gps => Some(0x38),
                SensorType::Esc => Some(0x39),
                SensorType::ChannelsMonitor => Some(0x40),
                _ => None,
            }
        }
    }

    /// Reverse lookup of [`SensorType::wire_byte`]
    pub fn from_wire_byte(variant: ProtocolVariant, byte: u8) -> Option<SensorType> {
        Self::ALL
            .into_iter()
            .find(|sensor| sensor.wire_byte(variant) == Some(byte))
    }

    /// Sensor answer byte stored at offset 26 of a capture block
    pub fn capture_byte(self) -> Option<u8> {
        match self {
            SensorType::Vario => Some(0x90),
            SensorType::Gps => Some(0xA0),
            SensorType::GeneralAir => Some(0xD0),
            SensorType::ElectricAir => Some(0xE0),
            SensorType::Esc => Some(0xC0),
            SensorType::Esc2 => Some(0x50),
            SensorType::Esc3 => Some(0x60),
            SensorType::Esc4 => Some(0x70),
            SensorType::Receiver | SensorType::ChannelsMonitor => None,
        }
    }

    /// Reverse lookup of [`SensorType::capture_byte`]
    pub fn from_capture_byte(byte: u8) -> Option<SensorType> {
        Self::ALL
            .into_iter()
            .find(|sensor| sensor.capture_byte() == Some(byte))
    }

    /// Number of answer bytes read from the wire after the query
    ///
    /// In slave mode the legacy link only listens, so the whole frame
    /// including the two leading bytes arrives as the answer.
    pub fn answer_length(self, variant: ProtocolVariant, slave_mode: bool) -> Option<usize> {
        let frame = self.frame_length(variant)?;
        match variant {
            ProtocolVariant::Legacy19200V3 | ProtocolVariant::Legacy19200V4 if slave_mode => Some(frame),
            ProtocolVariant::Legacy19200V3 | ProtocolVariant::Legacy19200V4 => Some(frame - 2),
            ProtocolVariant::Fast115200 => Some(frame - 1),
        }
    }

    /// Size of the frame handed to the decoder
    ///
    /// Legacy frames are `[0x80, sensor, answer..]`, fast frames are
    /// `[sensor, answer..]`.
    pub fn frame_length(self, variant: ProtocolVariant) -> Option<usize> {
        match variant {
            ProtocolVariant::Legacy19200V3 => match self {
                SensorType::Receiver => Some(17),
                SensorType::Vario => Some(31),
                SensorType::Gps => Some(40),
                SensorType::GeneralAir => Some(48),
                SensorType::ElectricAir => Some(51),
                _ => None,
            },
            ProtocolVariant::Legacy19200V4 => match self {
                SensorType::Receiver => Some(17),
                SensorType::Vario
                | SensorType::Gps
                | SensorType::GeneralAir
                | SensorType::ElectricAir
                | SensorType::Esc => Some(57),
                _ => None,
            },
            ProtocolVariant::Fast115200 => match self {
                SensorType::Receiver => Some(21),
                SensorType::Vario => Some(51),
                SensorType::Gps => Some(52),
                SensorType::GeneralAir => Some(60),
                SensorType::ElectricAir => Some(66),
                SensorType::Esc => Some(35),
                SensorType::ChannelsMonitor => Some(74),
                _ => None,
            },
        }
    }

    /// Receiver is implicitly active in every session and every capture
    pub fn is_always_active(self) -> bool {
        self == SensorType::Receiver
    }

    /// Whether the sensor counts for telemetry sensor detection
    pub fn is_detectable(self) -> bool {
        !matches!(self, SensorType::Receiver | SensorType::ChannelsMonitor)
    }

    /// ESC instance index 0..=3 for the four ESC sensors
    pub fn esc_instance(self) -> Option<usize> {
        match self {
            SensorType::Esc => Some(0),
            SensorType::Esc2 => Some(1),
            SensorType::Esc3 => Some(2),
            SensorType::Esc4 => Some(3),
            _ => None,
        }
    }

    /// ESC sensor for an instance index 0..=3
    pub fn esc(instance: usize) -> Option<SensorType> {
        match instance {
            0 => Some(SensorType::Esc),
            1 => Some(SensorType::Esc2),
            2 => Some(SensorType::Esc3),
            3 => Some(SensorType::Esc4),
            _ => None,
        }
    }

    /// Parse one entry of a capture header `DETECTED SENSOR` list
    pub fn from_detected_name(name: &str) -> Option<SensorType> {
        match name.trim().to_ascii_uppercase().as_str() {
            "RECEIVER" | "RX" => Some(SensorType::Receiver),
            "VARIO" => Some(SensorType::Vario),
            "GPS" => Some(SensorType::Gps),
            "GAM" | "GENERAL" => Some(SensorType::GeneralAir),
            "EAM" | "ELECTRIC" => Some(SensorType::ElectricAir),
            "ESC" | "ESC1" => Some(SensorType::Esc),
            "ESC2" => Some(SensorType::Esc2),
            "ESC3" => Some(SensorType::Esc3),
            "ESC4" => Some(SensorType::Esc4),
            "CHANNEL" | "CHANNELS" => Some(SensorType::ChannelsMonitor),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SensorType::Receiver => "Receiver",
            SensorType::Vario => "Vario",
            SensorType::Gps => "GPS",
            SensorType::GeneralAir => "General",
            SensorType::ElectricAir => "Electric",
            SensorType::Esc => "ESC",
            SensorType::Esc2 => "ESC2",
            SensorType::Esc3 => "ESC3",
            SensorType::Esc4 => "ESC4",
            SensorType::ChannelsMonitor => "Channels",
        }
    }
}

impl fmt::Display for SensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_constants() {
        assert_eq!(ADDRESS_QUERY, 0x80);
        assert_eq!(DATA_BEGIN, 0x7C);
        assert_eq!(DATA_END, 0x7D);
        assert_eq!(SENSITIVITY_BLOCK_MARKER, 0x1F);
    }

    #[test]
    fn test_legacy_wire_bytes() {
        let v4 = ProtocolVariant::Legacy19200V4;
        assert_eq!(SensorType::Receiver.wire_byte(v4), Some(0x80));
        assert_eq!(SensorType::Vario.wire_byte(v4), Some(0x89));
        assert_eq!(SensorType::Gps.wire_byte(v4), Some(0x8A));
        assert_eq!(SensorType::GeneralAir.wire_byte(v4), Some(0x8D));
        assert_eq!(SensorType::ElectricAir.wire_byte(v4), Some(0x8E));
        assert_eq!(SensorType::Esc.wire_byte(v4), Some(0x8C));
        assert_eq!(SensorType::Esc.wire_byte(ProtocolVariant::Legacy19200V3), None,
            "V3 has no ESC frame layout");
    }

    #[test]
    fn test_fast_wire_bytes_roundtrip() {
        let fast = ProtocolVariant::Fast115200;
        for (sensor, byte) in [
            (SensorType::Receiver, 0x34),
            (SensorType::GeneralAir, 0x35),
            (SensorType::ElectricAir, 0x36),
            (SensorType::Vario, 0x37),
            (SensorType::Gps, 0x38),
            (SensorType::Esc, 0x39),
            (SensorType::ChannelsMonitor, 0x40),
        ] {
            assert_eq!(sensor.wire_byte(fast), Some(byte));
            assert_eq!(SensorType::from_wire_byte(fast, byte), Some(sensor));
        }
        assert_eq!(SensorType::from_wire_byte(fast, 0x99), None);
    }

    #[test]
    fn test_capture_bytes_roundtrip() {
        for sensor in SensorType::ALL {
            if let Some(byte) = sensor.capture_byte() {
                assert_eq!(SensorType::from_capture_byte(byte), Some(sensor));
            }
        }
        assert_eq!(SensorType::from_capture_byte(0x00), None);
    }

    #[test]
    fn test_answer_lengths() {
        let v3 = ProtocolVariant::Legacy19200V3;
        assert_eq!(SensorType::Receiver.answer_length(v3, false), Some(15));
        assert_eq!(SensorType::Receiver.answer_length(v3, true), Some(17));
        assert_eq!(SensorType::ElectricAir.answer_length(v3, false), Some(49));

        let v4 = ProtocolVariant::Legacy19200V4;
        assert_eq!(SensorType::Gps.answer_length(v4, false), Some(55));
        assert_eq!(SensorType::Gps.frame_length(v4), Some(57));

        let fast = ProtocolVariant::Fast115200;
        assert_eq!(SensorType::Receiver.answer_length(fast, false), Some(20));
        assert_eq!(SensorType::Esc.answer_length(fast, false), Some(34));
        assert_eq!(SensorType::ChannelsMonitor.answer_length(fast, false), Some(73));
        assert_eq!(SensorType::Esc2.answer_length(fast, false), None);
    }

    #[test]
    fn test_detection_rules() {
        assert!(SensorType::Receiver.is_always_active());
        assert!(!SensorType::Receiver.is_detectable());
        assert!(!SensorType::ChannelsMonitor.is_detectable(),
            "channels are never a telemetry sensor");
        assert!(SensorType::Esc3.is_detectable());
    }

    #[test]
    fn test_esc_instances() {
        for instance in 0..4 {
            let sensor = SensorType::esc(instance).unwrap();
            assert_eq!(sensor.esc_instance(), Some(instance));
        }
        assert_eq!(SensorType::esc(4), None);
        assert_eq!(SensorType::Vario.esc_instance(), None);
    }

    #[test]
    fn test_detected_names() {
        assert_eq!(SensorType::from_detected_name(" gam "), Some(SensorType::GeneralAir));
        assert_eq!(SensorType::from_detected_name("EAM"), Some(SensorType::ElectricAir));
        assert_eq!(SensorType::from_detected_name("ESC4"), Some(SensorType::Esc4));
        assert_eq!(SensorType::from_detected_name("FOO"), None);
    }

    #[test]
    fn test_variant_baud_rates() {
        assert_eq!(ProtocolVariant::Legacy19200V3.baud_rate(), 19_200);
        assert_eq!(ProtocolVariant::Fast115200.baud_rate(), 115_200);
        assert!(ProtocolVariant::Legacy19200V4.is_legacy());
        assert!(!ProtocolVariant::Fast115200.is_legacy());
    }
}
