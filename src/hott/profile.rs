//! # Stream Profiles
//!
//! GPS and ESC blocks carry a version byte that changes the meaning of a
//! group of slots. The profile is resolved once per stream, when the first
//! block of the sensor is seen, and yields the slot-metadata table a sink
//! uses to label those slots. Decoding itself never consults the profile.

use serde::Serialize;
use std::fmt;
use tracing::info;

use super::protocol::SensorType;

/// Name, unit and display factor of one sensor-relative slot
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SlotInfo {
    pub slot: usize,
    pub name: &'static str,
    pub unit: &'static str,
    pub factor: f64,
}

const fn slot(slot: usize, name: &'static str, unit: &'static str, factor: f64) -> SlotInfo {
    SlotInfo { slot, name, unit, factor }
}

/// GPS payload layout selected by capture byte 65
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GpsProfile {
    /// SM GPS-Logger, version above 100
    SmLogger,
    /// RC Electronics Sparrow, version 4
    Sparrow,
    /// Graupner GPS 33600, version 0
    Graupner,
    /// Graupner GPS 33602/S8437, version 1
    GraupnerExtended,
    /// Unknown version, raw bytes and words
    Raw,
}

const SM_LOGGER_SLOTS: &[SlotInfo] = &[
    slot(16, "Servo impulse", "%", 1.0),
    slot(17, "Air speed", "km/h", 1.0),
    slot(19, "Acceleration X", "g", 0.01),
    slot(20, "Acceleration Y", "g", 0.01),
    slot(21, "Acceleration Z", "g", 0.01),
    slot(22, "ENL", "", 1.0),
];

const SPARROW_SLOTS: &[SlotInfo] = &[
    slot(16, "Servo impulse GPS", "%", 1.0),
    slot(18, "Voltage GPS", "V", 1.0),
    slot(19, "Time GPS", "HH:mm:ss.SSS", 1.0),
    slot(20, "Date GPS", "yy-MM-dd", 1.0),
    slot(21, "Altitude MSL", "m", 1.0),
    slot(22, "ENL", "%", 1.0),
];

const GRAUPNER_SLOTS: &[SlotInfo] = &[
    slot(19, "Time GPS", "HH:mm:ss.SSS", 1.0),
    slot(21, "Altitude MSL", "m", 1.0),
];

const GRAUPNER_EXTENDED_SLOTS: &[SlotInfo] = &[
    slot(16, "velNorth", "mm/s", 1.0),
    slot(18, "speedAcc", "cm/s", 1.0),
    slot(19, "Time GPS", "HH:mm:ss.SSS", 1.0),
    slot(21, "velEast", "mm/s", 1.0),
    slot(22, "HDOP", "dm", 1.0),
];

const RAW_GPS_SLOTS: &[SlotInfo] = &[
    slot(16, "Byte GPS_1", "", 1.0),
    slot(17, "Byte GPS_2", "", 1.0),
    slot(18, "Byte GPS_3", "", 1.0),
    slot(19, "Short GPS_4", "", 1.0),
    slot(20, "Short GPS_5", "", 1.0),
    slot(21, "Short GPS_6", "", 1.0),
    slot(22, "Byte GPS_7", "", 1.0),
];

impl GpsProfile {
    pub fn slots(self) -> &'static [SlotInfo] {
        match self {
            GpsProfile::SmLogger => SM_LOGGER_SLOTS,
            GpsProfile::Sparrow => SPARROW_SLOTS,
            GpsProfile::Graupner => GRAUPNER_SLOTS,
            GpsProfile::GraupnerExtended => GRAUPNER_EXTENDED_SLOTS,
            GpsProfile::Raw => RAW_GPS_SLOTS,
        }
    }
}

impl fmt::Display for GpsProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GpsProfile::SmLogger => "SM GPS-Logger",
            GpsProfile::Sparrow => "RC Electronics Sparrow",
            GpsProfile::Graupner => "Graupner GPS #0",
            GpsProfile::GraupnerExtended => "Graupner GPS #1",
            GpsProfile::Raw => "unknown GPS",
        };
        f.write_str(name)
    }
}

/// Resolve the GPS layout from a capture block's version byte
pub fn resolve_gps_profile(version: u8) -> GpsProfile {
    match version {
        v if v > 100 => GpsProfile::SmLogger,
        4 => GpsProfile::Sparrow,
        1 => GpsProfile::GraupnerExtended,
        0 => GpsProfile::Graupner,
        _ => GpsProfile::Raw,
    }
}

/// ESC vendor layout selected by capture byte 65
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EscProfile {
    Standard,
    /// YGE speed controller, version 3
    Yge,
    /// CB-Electronics turbine ECU, version 128 and above
    CbElectronics,
}

const YGE_SLOTS: &[SlotInfo] = &[
    slot(14, "Speed", "km/h", 1.0),
    slot(15, "Speed max", "km/h", 1.0),
    slot(16, "PWM", "%", 1.0),
    slot(17, "Throttle", "%", 1.0),
    slot(18, "Voltage BEC", "V", 0.1),
    slot(19, "Voltage BEC min", "V", 0.1),
    slot(20, "Current BEC", "A", 0.1),
    slot(21, "Temperature BEC", "°C", 1.0),
    slot(22, "Temperature capacitor", "°C", 1.0),
    slot(23, "Timing", "°", 1.0),
    slot(24, "Temperature 3", "°C", 1.0),
    slot(25, "Gear", "", 1.0),
    slot(26, "YGEGenExt", "", 1.0),
    slot(27, "MotStatEscNr", "#", 1.0),
];

const CB_ELECTRONICS_SLOTS: &[SlotInfo] = &[
    slot(1, "Voltage ECU", "V", 1.0),
    slot(2, "Current ECU", "A", 1.0),
    slot(6, "Temperature EGT 1", "°C", 1.0),
    slot(7, "Temperature EGT 2", "°C", 1.0),
    slot(8, "Voltage ECU_min", "V", 1.0),
    slot(9, "Current ECU_max", "A", 1.0),
    slot(11, "Temperature EGT 1_max", "°C", 1.0),
    slot(12, "Temperature EGT 2_max", "°C", 1.0),
    slot(14, "Air speed", "km/h", 1.0),
    slot(15, "Air speed_max", "km/h", 1.0),
    slot(16, "PWM", "%", 1.0),
    slot(17, "Throttle", "%", 1.0),
    slot(18, "Voltage pump", "V", 0.1),
    slot(19, "Voltage pump_min", "V", 0.1),
    slot(20, "Flow", "ml/min", 0.1),
    slot(21, "Fuel", "ml", 1.0),
    slot(22, "Power", "W", 1.0),
    slot(23, "Thrust", "N", 1.0),
    slot(24, "Temperature pump", "°C", 1.0),
    slot(25, "Engine", "", 1.0),
];

impl EscProfile {
    pub fn slots(self) -> &'static [SlotInfo] {
        match self {
            EscProfile::Standard => &[],
            EscProfile::Yge => YGE_SLOTS,
            EscProfile::CbElectronics => CB_ELECTRONICS_SLOTS,
        }
    }
}

impl fmt::Display for EscProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EscProfile::Standard => "standard ESC",
            EscProfile::Yge => "YGE",
            EscProfile::CbElectronics => "CB-Electronics",
        };
        f.write_str(name)
    }
}

/// Resolve the ESC layout from a capture block's version byte
pub fn resolve_esc_profile(version: u8) -> EscProfile {
    match version {
        3 => EscProfile::Yge,
        v if v >= 128 => EscProfile::CbElectronics,
        _ => EscProfile::Standard,
    }
}

/// Profile resolution state of one stream
#[derive(Debug, Clone, Default)]
pub struct StreamProfile {
    gps: Option<GpsProfile>,
    esc: [Option<EscProfile>; 4],
}

impl StreamProfile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gps(&self) -> Option<GpsProfile> {
        self.gps
    }

    pub fn esc(&self, instance: usize) -> Option<EscProfile> {
        self.esc.get(instance).copied().flatten()
    }

    /// Resolve the profile of `sensor` from its first block
    ///
    /// Returns the slot table when this call performed the resolution, and
    /// `None` when the sensor has no profile or was already resolved.
    pub fn observe(&mut self, sensor: SensorType, version: u8) -> Option<&'static [SlotInfo]> {
        if sensor == SensorType::Gps {
            if self.gps.is_some() {
                return None;
            }
            let profile = resolve_gps_profile(version);
            info!("GPS profile resolved: {} (version {})", profile, version);
            self.gps = Some(profile);
            return Some(profile.slots());
        }

        let instance = sensor.esc_instance()?;
        if self.esc[instance].is_some() {
            return None;
        }
        let profile = resolve_esc_profile(version);
        info!("{} profile resolved: {} (version {})", sensor, profile, version);
        self.esc[instance] = Some(profile);
        Some(profile.slots())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gps_profile_by_version() {
        assert_eq!(resolve_gps_profile(0), GpsProfile::Graupner);
        assert_eq!(resolve_gps_profile(1), GpsProfile::GraupnerExtended);
        assert_eq!(resolve_gps_profile(4), GpsProfile::Sparrow);
        assert_eq!(resolve_gps_profile(125), GpsProfile::SmLogger);
        assert_eq!(resolve_gps_profile(7), GpsProfile::Raw);
        assert_eq!(resolve_gps_profile(100), GpsProfile::Raw, "100 is not an SM version");
    }

    #[test]
    fn test_esc_profile_by_version() {
        assert_eq!(resolve_esc_profile(3), EscProfile::Yge);
        assert_eq!(resolve_esc_profile(128), EscProfile::CbElectronics);
        assert_eq!(resolve_esc_profile(255), EscProfile::CbElectronics);
        assert_eq!(resolve_esc_profile(0), EscProfile::Standard);
        assert!(EscProfile::Standard.slots().is_empty());
    }

    #[test]
    fn test_slot_tables_sorted_and_in_range() {
        let tables: [&[SlotInfo]; 7] = [
            SM_LOGGER_SLOTS,
            SPARROW_SLOTS,
            GRAUPNER_SLOTS,
            GRAUPNER_EXTENDED_SLOTS,
            RAW_GPS_SLOTS,
            YGE_SLOTS,
            CB_ELECTRONICS_SLOTS,
        ];
        for table in tables {
            assert!(table.windows(2).all(|w| w[0].slot < w[1].slot), "slots must be ascending");
            assert!(table.iter().all(|info| info.slot < 30));
        }
    }

    #[test]
    fn test_profile_resolved_once_per_stream() {
        let mut profile = StreamProfile::new();
        assert_eq!(profile.observe(SensorType::Gps, 4), Some(SPARROW_SLOTS));
        assert_eq!(profile.observe(SensorType::Gps, 125), None, "later versions do not re-resolve");
        assert_eq!(profile.gps(), Some(GpsProfile::Sparrow));

        assert!(profile.observe(SensorType::Esc3, 3).is_some());
        assert!(profile.observe(SensorType::Esc3, 200).is_none());
        assert_eq!(profile.esc(2), Some(EscProfile::Yge));
        assert_eq!(profile.esc(0), None, "instances resolve independently");

        assert!(profile.observe(SensorType::Vario, 110).is_none());
    }
}
