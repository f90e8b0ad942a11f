//! # Samples and Slot Patches
//!
//! A decoder never writes into shared state. It returns a [`SamplePatch`]
//! holding only the slots the frame produced, indexed relative to the
//! sensor. The session or capture reader owns a [`Sample`] and applies the
//! patch at the sensor's slot range, so slots the frame did not produce keep
//! their previous value.
//!
//! Combined slot layout:
//!
//! | Range | Content |
//! |---|---|
//! | 0..10 | receiver |
//! | 10..14 | altitude, climb 1 s, climb 3 s, climb 10 s (from the altitude source) |
//! | 14..27 | vario |
//! | 27..51 | GPS |
//! | 51..77 | general air module |
//! | 77..108 | electric air module |
//! | 108..228 | ESC 1 to 4, 30 slots each |
//! | 228..263 | channels monitor |

use std::ops::Range;

use super::protocol::SensorType;

/// Largest sensor-relative slot count (channels monitor)
pub const PATCH_SLOTS: usize = 35;

pub const RECEIVER_SLOTS: usize = 10;
pub const ALTITUDE_BASE: usize = 10;
pub const ALTITUDE_SLOTS: usize = 4;
pub const VARIO_SLOTS: usize = 13;
pub const GPS_SLOTS: usize = 24;
pub const GENERAL_SLOTS: usize = 26;
pub const ELECTRIC_SLOTS: usize = 31;
pub const ESC_SLOTS: usize = 30;
pub const CHANNEL_SLOTS: usize = PATCH_SLOTS;

const VARIO_BASE: usize = ALTITUDE_BASE + ALTITUDE_SLOTS;
const GPS_BASE: usize = VARIO_BASE + VARIO_SLOTS;
const GENERAL_BASE: usize = GPS_BASE + GPS_SLOTS;
const ELECTRIC_BASE: usize = GENERAL_BASE + GENERAL_SLOTS;
const ESC_BASE: usize = ELECTRIC_BASE + ELECTRIC_SLOTS;
const CHANNEL_BASE: usize = ESC_BASE + 4 * ESC_SLOTS;

/// Total number of slots in a combined sample
pub const SAMPLE_SLOTS: usize = CHANNEL_BASE + CHANNEL_SLOTS;

/// Slot range of an ESC instance 0..=3
pub fn esc_slot_range(instance: usize) -> Range<usize> {
    let base = ESC_BASE + instance.min(3) * ESC_SLOTS;
    base..base + ESC_SLOTS
}

/// Slot range a sensor owns in the combined sample
pub fn slot_range(sensor: SensorType) -> Range<usize> {
    match sensor {
        SensorType::Receiver => 0..RECEIVER_SLOTS,
        SensorType::Vario => VARIO_BASE..VARIO_BASE + VARIO_SLOTS,
        SensorType::Gps => GPS_BASE..GPS_BASE + GPS_SLOTS,
        SensorType::GeneralAir => GENERAL_BASE..GENERAL_BASE + GENERAL_SLOTS,
        SensorType::ElectricAir => ELECTRIC_BASE..ELECTRIC_BASE + ELECTRIC_SLOTS,
        SensorType::Esc | SensorType::Esc2 | SensorType::Esc3 | SensorType::Esc4 => {
            esc_slot_range(sensor.esc_instance().unwrap_or(0))
        }
        SensorType::ChannelsMonitor => CHANNEL_BASE..CHANNEL_BASE + CHANNEL_SLOTS,
    }
}

/// Sparse set of sensor-relative slot updates produced by one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplePatch {
    slots: [Option<i32>; PATCH_SLOTS],
}

impl Default for SamplePatch {
    fn default() -> Self {
        Self { slots: [None; PATCH_SLOTS] }
    }
}

impl SamplePatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a slot; indexes past [`PATCH_SLOTS`] are ignored
    pub fn set(&mut self, slot: usize, value: i32) {
        if let Some(entry) = self.slots.get_mut(slot) {
            *entry = Some(value);
        }
    }

    pub fn get(&self, slot: usize) -> Option<i32> {
        self.slots.get(slot).copied().flatten()
    }

    pub fn clear(&mut self, slot: usize) {
        if let Some(entry) = self.slots.get_mut(slot) {
            *entry = None;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    /// Number of slots set
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Set slots in ascending order
    pub fn iter(&self) -> impl Iterator<Item = (usize, i32)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(slot, value)| value.map(|v| (slot, v)))
    }

    /// Write the set slots onto `target`, leaving every other slot untouched
    ///
    /// Returns the number of slots written.
    pub fn apply_to(&self, target: &mut [i32]) -> usize {
        let mut written = 0;
        for (slot, value) in self.iter() {
            if let Some(point) = target.get_mut(slot) {
                *point = value;
                written += 1;
            }
        }
        written
    }
}

/// Combined points buffer for one logical time step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    points: Vec<i32>,
    elapsed_ms: u64,
}

impl Default for Sample {
    fn default() -> Self {
        Self {
            points: vec![0; SAMPLE_SLOTS],
            elapsed_ms: 0,
        }
    }
}

impl Sample {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn points(&self) -> &[i32] {
        &self.points
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed_ms
    }

    pub fn set_elapsed_ms(&mut self, elapsed_ms: u64) {
        self.elapsed_ms = elapsed_ms;
    }

    /// Slots owned by `sensor`
    pub fn sensor_slots(&self, sensor: SensorType) -> &[i32] {
        &self.points[slot_range(sensor)]
    }

    /// Apply a sensor-relative patch at the sensor's slot range
    pub fn apply(&mut self, sensor: SensorType, patch: &SamplePatch) -> usize {
        patch.apply_to(&mut self.points[slot_range(sensor)])
    }

    /// Altitude block: altitude, climb 1 s, climb 3 s, climb 10 s
    pub fn altitude(&self) -> &[i32] {
        &self.points[ALTITUDE_BASE..ALTITUDE_BASE + ALTITUDE_SLOTS]
    }

    pub fn set_altitude(&mut self, values: [i32; ALTITUDE_SLOTS]) {
        self.points[ALTITUDE_BASE..ALTITUDE_BASE + ALTITUDE_SLOTS].copy_from_slice(&values);
    }
}

/// Value of a channel slot for output
///
/// Channel slots hold microseconds × 1000. With `percent` the value is
/// mapped to ±100 % around the 1500 µs center.
pub fn channel_display_value(raw: i32, percent: bool) -> f64 {
    let micros = raw as f64 / 1000.0;
    if percent && raw != 0 {
        (micros - 1500.0) * 0.25
    } else {
        micros
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_is_contiguous() {
        let mut expected_start = 0;
        for sensor in [
            SensorType::Receiver,
        ] {
            let range = slot_range(sensor);
            assert_eq!(range.start, expected_start);
            expected_start = range.end;
        }
        assert_eq!(expected_start, ALTITUDE_BASE);

        let mut expected_start = ALTITUDE_BASE + ALTITUDE_SLOTS;
        for sensor in [
            SensorType::Vario,
            SensorType::Gps,
            SensorType::GeneralAir,
            SensorType::ElectricAir,
            SensorType::Esc,
            SensorType::Esc2,
            SensorType::Esc3,
            SensorType::Esc4,
            SensorType::ChannelsMonitor,
        ] {
            let range = slot_range(sensor);
            assert_eq!(range.start, expected_start, "{} range must follow its predecessor", sensor);
            expected_start = range.end;
        }
        assert_eq!(expected_start, SAMPLE_SLOTS);
    }

    #[test]
    fn test_esc_instance_ranges() {
        assert_eq!(esc_slot_range(0), slot_range(SensorType::Esc));
        assert_eq!(esc_slot_range(3), slot_range(SensorType::Esc4));
        assert_eq!(esc_slot_range(1).start - esc_slot_range(0).start, ESC_SLOTS);
    }

    #[test]
    fn test_patch_set_get() {
        let mut patch = SamplePatch::new();
        assert!(patch.is_empty());

        patch.set(3, 5000);
        patch.set(PATCH_SLOTS, 1); // out of range, ignored
        assert_eq!(patch.get(3), Some(5000));
        assert_eq!(patch.get(4), None);
        assert_eq!(patch.len(), 1);

        patch.clear(3);
        assert!(patch.is_empty());
    }

    #[test]
    fn test_sparse_apply_keeps_previous_values() {
        let mut sample = Sample::new();
        let mut first = SamplePatch::new();
        first.set(1, 100);
        first.set(2, 200);
        sample.apply(SensorType::Vario, &first);

        let mut second = SamplePatch::new();
        second.set(2, 250);
        sample.apply(SensorType::Vario, &second);

        let vario = sample.sensor_slots(SensorType::Vario);
        assert_eq!(vario[1], 100, "unreported slot must keep its previous value");
        assert_eq!(vario[2], 250);
        assert_eq!(sample.sensor_slots(SensorType::Gps)[1], 0, "other sensors untouched");
    }

    #[test]
    fn test_apply_truncates_to_sensor_range() {
        let mut sample = Sample::new();
        let mut patch = SamplePatch::new();
        patch.set(RECEIVER_SLOTS + 2, 7);
        assert_eq!(sample.apply(SensorType::Receiver, &patch), 0);
        assert!(sample.altitude().iter().all(|&v| v == 0), "receiver patch must not spill into altitude block");
    }

    #[test]
    fn test_channel_display_value() {
        assert_eq!(channel_display_value(1_500_000, false), 1500.0);
        assert_eq!(channel_display_value(1_900_000, true), 100.0);
        assert_eq!(channel_display_value(1_100_000, true), -100.0);
        assert_eq!(channel_display_value(0, true), 0.0);
    }
}
