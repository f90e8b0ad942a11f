//! # Live Monitor
//!
//! Polls a live link and turns each query round into one combined sample.
//!
//! This module handles:
//! - Querying the receiver plus the configured sensors every cycle
//! - Package-loss accounting from the receiver link bytes
//! - Skipping sensors that stay silent for a cycle
//! - Altitude source selection and handing samples to a sink

use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::port_trait::SerialPortIO;
use super::LinkSession;
use crate::capture::{AltitudeTracker, SampleSink};
use crate::config::DecoderConfig;
use crate::error::{HottError, Result};
use crate::hott::decoder::{decode_live_frame, live_frame_sensor, receiver_link_present, DecodeContext};
use crate::hott::protocol::{ProtocolVariant, SensorType};
use crate::hott::sample::Sample;
use crate::loss::{LossSummary, PackageLoss};

/// Sample state of one live session
#[derive(Debug)]
pub struct LiveMonitor {
    base: DecodeContext<'static>,
    variant: ProtocolVariant,
    sensors: Vec<SensorType>,
    sample: Sample,
    loss: PackageLoss,
    altitude: AltitudeTracker,
    sensor_counts: BTreeMap<SensorType, u32>,
    started: Instant,
    cycles: u64,
    rejected: u64,
}

impl LiveMonitor {
    /// Create a monitor polling `sensors` besides the receiver
    ///
    /// Sensors the variant cannot query are dropped with a warning. With
    /// channels enabled the servo positions are polled too, where the
    /// variant offers them.
    pub fn new(config: &DecoderConfig, variant: ProtocolVariant, sensors: &[SensorType]) -> Self {
        let mut polled: Vec<SensorType> = Vec::new();
        let mut wanted = sensors.to_vec();
        if config.channels_enabled {
            wanted.push(SensorType::ChannelsMonitor);
        }
        for sensor in wanted {
            if sensor == SensorType::Receiver || polled.contains(&sensor) {
                continue;
            }
            if sensor.wire_byte(variant).is_none() {
                warn!("{} cannot be queried with protocol {}, skipping it", sensor, variant);
                continue;
            }
            polled.push(sensor);
        }
        info!(
            "Monitoring receiver and {:?} over protocol {}",
            polled.iter().map(|s| s.name()).collect::<Vec<_>>(),
            variant
        );

        Self {
            base: config.context(),
            variant,
            sensors: polled,
            sample: Sample::new(),
            loss: PackageLoss::new(),
            altitude: AltitudeTracker::new(config.altitude_climb_sensor_selection),
            sensor_counts: BTreeMap::new(),
            started: Instant::now(),
            cycles: 0,
            rejected: 0,
        }
    }

    /// Sensors queried after the receiver
    pub fn sensors(&self) -> &[SensorType] {
        &self.sensors
    }

    pub fn sample(&self) -> &Sample {
        &self.sample
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Frames dropped by the plausibility filter
    pub fn rejected(&self) -> u64 {
        self.rejected
    }

    pub fn loss(&self) -> &PackageLoss {
        &self.loss
    }

    /// Run one query round and emit the resulting sample
    ///
    /// A receiver timeout counts as a lost frame; a timeout of any other
    /// sensor leaves its slots unchanged for this round.
    ///
    /// # Errors
    ///
    /// * [`HottError::TransferErrorBudgetExceeded`] once the session gave up
    /// * [`HottError::Interrupted`] if the session's interrupt flag is set
    /// * Any error returned by the sink
    pub async fn cycle<P: SerialPortIO>(
        &mut self,
        session: &mut LinkSession<P>,
        sink: &mut dyn SampleSink,
    ) -> Result<()> {
        match session.query_sensor(SensorType::Receiver).await {
            Ok(frame) => {
                self.loss.record(receiver_link_present(self.variant, &frame));
                let ctx = DecodeContext {
                    loss_permille: self.loss.current_percentage_permille(),
                    ..self.base
                };
                self.apply_frame(&frame, ctx);
            }
            Err(e @ HottError::Timeout { .. }) => {
                warn!("Receiver silent: {}", e);
                self.loss.record(false);
            }
            Err(e) => return Err(e),
        }

        for index in 0..self.sensors.len() {
            let sensor = self.sensors[index];
            match session.query_sensor(sensor).await {
                Ok(frame) => {
                    let count = self.sensor_counts.entry(sensor).or_insert(0);
                    let seen = *count;
                    *count += 1;
                    let ctx = DecodeContext {
                        sensor_samples: seen,
                        ..self.base
                    };
                    if let Some(decoded) = self.apply_frame(&frame, ctx) {
                        self.altitude.observe(decoded);
                    }
                }
                Err(e @ HottError::Timeout { .. }) => {
                    warn!("{} silent this cycle: {}", sensor, e);
                }
                Err(e) => return Err(e),
            }
        }

        self.altitude.apply(&mut self.sample);
        self.sample.set_elapsed_ms(self.started.elapsed().as_millis() as u64);
        self.cycles += 1;
        sink.emit(&self.sample)
    }

    /// Decode a frame by its own sensor byte and apply it
    ///
    /// Returns the decoded sensor when the sample was updated.
    fn apply_frame(&mut self, frame: &[u8], ctx: DecodeContext<'_>) -> Option<SensorType> {
        let Some(sensor) = live_frame_sensor(self.variant, frame) else {
            debug!("Ignoring frame with unknown sensor byte");
            return None;
        };
        let ctx = ctx.with_previous(self.sample.sensor_slots(sensor));
        match decode_live_frame(self.variant, frame, &ctx)? {
            (sensor, Ok(patch)) => {
                self.sample.apply(sensor, &patch);
                Some(sensor)
            }
            (sensor, Err(rejected)) => {
                debug!("{} frame rejected: {}", sensor, rejected);
                self.rejected += 1;
                None
            }
        }
    }

    /// Close the session statistics and hand them to the sink
    pub fn finish(&mut self, sink: &mut dyn SampleSink) -> Result<LossSummary> {
        self.loss.finalize();
        let summary = self.loss.summary();
        info!(
            "Monitor stopped after {} cycles, {} of {} receiver frames lost",
            self.cycles, summary.total_lost, summary.total_samples
        );
        sink.finish(&summary)?;
        Ok(summary)
    }
}
