//! # Sample Sinks
//!
//! Decoded samples leave the crate through a [`SampleSink`]. The capture
//! reader and the live monitor both feed one.
//!
//! This module handles:
//! - The sink trait (profile announcements, samples, end-of-stream summary)
//! - A JSON Lines sink writing one object per line

use serde::Serialize;
use std::io::Write;

use crate::error::Result;
use crate::hott::profile::SlotInfo;
use crate::hott::protocol::SensorType;
use crate::hott::sample::{channel_display_value, slot_range, Sample};
use crate::loss::LossSummary;

/// Consumer of decoded samples
#[cfg_attr(test, mockall::automock)]
pub trait SampleSink {
    /// A GPS or ESC stream profile was resolved; `slots` label the
    /// sensor-relative slots it renames
    fn sensor_profile(&mut self, sensor: SensorType, slots: &'static [SlotInfo]) -> Result<()>;

    /// One combined sample
    fn emit(&mut self, sample: &Sample) -> Result<()>;

    /// End of stream
    fn finish(&mut self, summary: &LossSummary) -> Result<()>;
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Record<'a> {
    Profile {
        sensor: &'static str,
        slots: &'static [SlotInfo],
    },
    Sample {
        elapsed_ms: u64,
        points: &'a [i32],
        #[serde(skip_serializing_if = "Option::is_none")]
        channels: Option<Vec<f64>>,
    },
    Summary {
        loss: &'a LossSummary,
    },
}

/// Writes each record as one JSON object per line
///
/// With channels enabled, sample lines carry the channel slots converted
/// for display, in percent or microseconds.
#[derive(Debug)]
pub struct JsonLinesSink<W: Write> {
    out: W,
    channels: bool,
    channel_percent: bool,
    written: u64,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(out: W, channels: bool, channel_percent: bool) -> Self {
        Self {
            out,
            channels,
            channel_percent,
            written: 0,
        }
    }

    /// Sample lines written so far
    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_record(&mut self, record: &Record<'_>) -> Result<()> {
        serde_json::to_writer(&mut self.out, record).map_err(std::io::Error::from)?;
        self.out.write_all(b"\n")?;
        Ok(())
    }
}

impl<W: Write> SampleSink for JsonLinesSink<W> {
    fn sensor_profile(&mut self, sensor: SensorType, slots: &'static [SlotInfo]) -> Result<()> {
        self.write_record(&Record::Profile {
            sensor: sensor.name(),
            slots,
        })
    }

    fn emit(&mut self, sample: &Sample) -> Result<()> {
        let channels = self.channels.then(|| {
            sample.points()[slot_range(SensorType::ChannelsMonitor)]
                .iter()
                .skip(3)
                .map(|&raw| channel_display_value(raw, self.channel_percent))
                .collect()
        });
        self.write_record(&Record::Sample {
            elapsed_ms: sample.elapsed_ms(),
            points: sample.points(),
            channels,
        })?;
        self.written += 1;
        Ok(())
    }

    fn finish(&mut self, summary: &LossSummary) -> Result<()> {
        self.write_record(&Record::Summary { loss: summary })?;
        self.out.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hott::profile::EscProfile;
    use crate::hott::sample::SamplePatch;
    use crate::loss::PackageLoss;
    use serde_json::Value;

    fn lines(sink: JsonLinesSink<Vec<u8>>) -> Vec<Value> {
        let text = String::from_utf8(sink.into_inner()).unwrap();
        text.lines().map(|line| serde_json::from_str(line).unwrap()).collect()
    }

    #[test]
    fn test_sample_line() {
        let mut sample = Sample::new();
        sample.set_elapsed_ms(1500);
        let mut patch = SamplePatch::new();
        patch.set(6, 4_900);
        sample.apply(SensorType::Receiver, &patch);

        let mut sink = JsonLinesSink::new(Vec::new(), false, false);
        sink.emit(&sample).unwrap();
        assert_eq!(sink.written(), 1);

        let records = lines(sink);
        assert_eq!(records[0]["type"], "sample");
        assert_eq!(records[0]["elapsed_ms"], 1500);
        assert_eq!(records[0]["points"][6], 4_900);
        assert!(records[0].get("channels").is_none(), "channels only when enabled");
    }

    #[test]
    fn test_channel_display() {
        let mut sample = Sample::new();
        let mut patch = SamplePatch::new();
        patch.set(3, 1_900_000);
        patch.set(4, 1_500_000);
        sample.apply(SensorType::ChannelsMonitor, &patch);

        let mut sink = JsonLinesSink::new(Vec::new(), true, true);
        sink.emit(&sample).unwrap();
        let records = lines(sink);
        assert_eq!(records[0]["channels"][0], 100.0);
        assert_eq!(records[0]["channels"][1], 0.0);
    }

    #[test]
    fn test_profile_and_summary_lines() {
        let mut sink = JsonLinesSink::new(Vec::new(), false, false);
        sink.sensor_profile(SensorType::Esc2, EscProfile::Yge.slots()).unwrap();

        let mut loss = PackageLoss::new();
        loss.record(false);
        loss.record(true);
        loss.finalize();
        sink.finish(&loss.summary()).unwrap();

        let records = lines(sink);
        assert_eq!(records[0]["type"], "profile");
        assert_eq!(records[0]["sensor"], SensorType::Esc2.name());
        assert!(records[0]["slots"].as_array().is_some_and(|slots| !slots.is_empty()));
        assert_eq!(records[1]["type"], "summary");
        assert_eq!(records[1]["loss"]["total_lost"], 1);
    }
}
