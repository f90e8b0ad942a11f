//! Altitude source selection
//!
//! The combined altitude block (altitude, climb 1 s, climb 3 s, climb 10 s)
//! is filled from one sensor family. An explicit selection wins once that
//! sensor has reported; otherwise the highest ranked family seen so far in
//! the stream is used.

use tracing::info;

use crate::hott::protocol::SensorType;
use crate::hott::sample::{Sample, ALTITUDE_SLOTS};

/// Sensor family able to provide altitude and climb values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AltitudeSource {
    Vario,
    Gps,
    GeneralAir,
    ElectricAir,
}

/// Auto selection order
const PRIORITY: [AltitudeSource; 4] = [
    AltitudeSource::Vario,
    AltitudeSource::Gps,
    AltitudeSource::GeneralAir,
    AltitudeSource::ElectricAir,
];

impl AltitudeSource {
    /// Configured selection: 0 auto, 1 Vario, 2 GPS, 3 General, 4 Electric
    pub fn from_selection(selection: u8) -> Option<Self> {
        match selection {
            1 => Some(AltitudeSource::Vario),
            2 => Some(AltitudeSource::Gps),
            3 => Some(AltitudeSource::GeneralAir),
            4 => Some(AltitudeSource::ElectricAir),
            _ => None,
        }
    }

    pub fn from_sensor(sensor: SensorType) -> Option<Self> {
        match sensor {
            SensorType::Vario => Some(AltitudeSource::Vario),
            SensorType::Gps => Some(AltitudeSource::Gps),
            SensorType::GeneralAir => Some(AltitudeSource::GeneralAir),
            SensorType::ElectricAir => Some(AltitudeSource::ElectricAir),
            _ => None,
        }
    }

    pub fn sensor(self) -> SensorType {
        match self {
            AltitudeSource::Vario => SensorType::Vario,
            AltitudeSource::Gps => SensorType::Gps,
            AltitudeSource::GeneralAir => SensorType::GeneralAir,
            AltitudeSource::ElectricAir => SensorType::ElectricAir,
        }
    }

    /// First sensor-relative slot of altitude, climb 1 s and climb 3 s
    fn first_slot(self) -> usize {
        match self {
            AltitudeSource::Vario => 1,
            AltitudeSource::Gps => 3,
            AltitudeSource::GeneralAir => 13,
            AltitudeSource::ElectricAir => 20,
        }
    }

    /// Altitude block as provided by this family; only the vario has climb 10 s
    fn values(self, sample: &Sample) -> [i32; ALTITUDE_SLOTS] {
        let slots = sample.sensor_slots(self.sensor());
        let first = self.first_slot();
        let climb10 = match self {
            AltitudeSource::Vario => slots[first + 3],
            _ => 0,
        };
        [slots[first], slots[first + 1], slots[first + 2], climb10]
    }

    fn index(self) -> usize {
        PRIORITY.iter().position(|&source| source == self).unwrap_or(0)
    }
}

/// Altitude source state of one stream
#[derive(Debug, Clone, Default)]
pub struct AltitudeTracker {
    selection: Option<AltitudeSource>,
    seen: [bool; 4],
    active: Option<AltitudeSource>,
}

impl AltitudeTracker {
    pub fn new(selection: u8) -> Self {
        Self {
            selection: AltitudeSource::from_selection(selection),
            ..Self::default()
        }
    }

    /// Note a successfully decoded frame of `sensor`
    pub fn observe(&mut self, sensor: SensorType) {
        if let Some(source) = AltitudeSource::from_sensor(sensor) {
            self.seen[source.index()] = true;
        }
    }

    /// Source used for the next sample, if any family has reported
    pub fn source(&self) -> Option<AltitudeSource> {
        if let Some(selected) = self.selection {
            if self.seen[selected.index()] {
                return Some(selected);
            }
        }
        PRIORITY.into_iter().find(|source| self.seen[source.index()])
    }

    /// Copy the source's altitude values into the combined altitude block
    pub fn apply(&mut self, sample: &mut Sample) {
        let Some(source) = self.source() else {
            return;
        };
        if self.active != Some(source) {
            info!("Altitude and climb taken from {}", source.sensor());
            self.active = Some(source);
        }
        let values = source.values(sample);
        sample.set_altitude(values);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hott::sample::SamplePatch;

    fn patch(values: &[(usize, i32)]) -> SamplePatch {
        let mut p = SamplePatch::new();
        for &(slot, value) in values {
            p.set(slot, value);
        }
        p
    }

    #[test]
    fn test_no_source_leaves_block() {
        let mut tracker = AltitudeTracker::new(0);
        let mut sample = Sample::new();
        tracker.apply(&mut sample);
        assert_eq!(sample.altitude(), &[0, 0, 0, 0]);
    }

    #[test]
    fn test_auto_prefers_vario() {
        let mut sample = Sample::new();
        sample.apply(SensorType::Vario, &patch(&[(1, 120_000), (2, 500), (3, 300), (4, 100)]));
        sample.apply(SensorType::Gps, &patch(&[(3, 115_000), (4, 400), (5, 200)]));

        let mut tracker = AltitudeTracker::new(0);
        tracker.observe(SensorType::Gps);
        tracker.apply(&mut sample);
        assert_eq!(sample.altitude(), &[115_000, 400, 200, 0], "GPS has no climb 10 s");

        tracker.observe(SensorType::Vario);
        tracker.apply(&mut sample);
        assert_eq!(sample.altitude(), &[120_000, 500, 300, 100]);
    }

    #[test]
    fn test_explicit_selection_overrides_priority() {
        let mut sample = Sample::new();
        sample.apply(SensorType::Vario, &patch(&[(1, 120_000)]));
        sample.apply(SensorType::ElectricAir, &patch(&[(20, 90_000), (21, 10), (22, 20)]));

        let mut tracker = AltitudeTracker::new(4);
        tracker.observe(SensorType::Vario);
        assert_eq!(tracker.source(), Some(AltitudeSource::Vario), "selection unseen, auto applies");

        tracker.observe(SensorType::ElectricAir);
        tracker.apply(&mut sample);
        assert_eq!(tracker.source(), Some(AltitudeSource::ElectricAir));
        assert_eq!(sample.altitude(), &[90_000, 10, 20, 0]);
    }

    #[test]
    fn test_non_altitude_sensors_ignored() {
        let mut tracker = AltitudeTracker::new(0);
        tracker.observe(SensorType::Esc);
        tracker.observe(SensorType::Receiver);
        assert_eq!(tracker.source(), None);
    }

    #[test]
    fn test_selection_mapping() {
        assert_eq!(AltitudeSource::from_selection(0), None);
        assert_eq!(AltitudeSource::from_selection(2), Some(AltitudeSource::Gps));
        assert_eq!(AltitudeSource::from_selection(9), None);
    }
}
