//! # Capture Reader
//!
//! Replays a stored capture file through the log-block decoders.
//!
//! This module handles:
//! - Header parsing and block slicing (binary or ASCII-hex)
//! - Elapsed time from the block sequence numbers
//! - Skipping blocks before the first RF link, sensitivity and text mode blocks
//! - Package-loss accounting once per block with receiver data
//! - Sensor dispatch, stream profiles and the altitude source
//!
//! A reader is single pass per [`CaptureReader::replay`] call; every call
//! starts from fresh decoder state, so replaying twice yields the same
//! samples.

pub mod altitude;
pub mod ascii;
pub mod header;
pub mod sink;

use serde::Serialize;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::DecoderConfig;
use crate::error::{HottError, Result};
use crate::hott::decoder::{decode, link_quality_only, DecodeContext, FrameFormat};
use crate::hott::profile::StreamProfile;
use crate::hott::protocol::{SensorType, SENSITIVITY_BLOCK_MARKER};
use crate::hott::sample::Sample;
use crate::loss::{LossSummary, PackageLoss};

pub use altitude::{AltitudeSource, AltitudeTracker};
pub use header::CaptureHeader;
pub use sink::{JsonLinesSink, SampleSink};

/// Status byte carrying the transmitter text mode flag
const TEXT_MODE_BYTE: usize = 6;
const TX_DBM_BYTE: usize = 8;
const RX_DBM_BYTE: usize = 9;
const SENSITIVITY_BYTE: usize = 24;
const SENSOR_BYTE: usize = 26;
const VERSION_BYTE: usize = 65;

/// Counters of one replay
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReplaySummary {
    pub blocks: u64,
    pub samples: u64,
    pub leading_skipped: u64,
    pub sensitivity_blocks: u64,
    pub text_mode_blocks: u64,
    pub malformed_blocks: u64,
    pub rejected_frames: u64,
    pub elapsed_ms: u64,
    pub loss: LossSummary,
}

/// Stored capture ready for replay
pub struct CaptureReader {
    header: CaptureHeader,
    data: Vec<u8>,
    config: DecoderConfig,
    interrupted: Arc<AtomicBool>,
}

impl std::fmt::Debug for CaptureReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureReader")
            .field("header", &self.header)
            .field("data_len", &self.data.len())
            .finish_non_exhaustive()
    }
}

impl CaptureReader {
    /// Read a capture file and parse its header
    ///
    /// # Arguments
    ///
    /// * `path` - Capture file
    /// * `config` - Decoder settings used for every replay
    ///
    /// # Errors
    ///
    /// * [`HottError::Io`] if the file cannot be read
    /// * [`HottError::Capture`] if the header is incomplete
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use hott_link::capture::{CaptureReader, JsonLinesSink};
    /// use hott_link::config::DecoderConfig;
    ///
    /// let reader = CaptureReader::open("flight.log".as_ref(), &DecoderConfig::default())?;
    /// let mut sink = JsonLinesSink::new(std::io::stdout().lock(), false, true);
    /// let summary = reader.replay(&mut sink)?;
    /// println!("{} samples", summary.samples);
    /// # Ok::<(), hott_link::error::HottError>(())
    /// ```
    pub fn open(path: &Path, config: &DecoderConfig) -> Result<Self> {
        let data = std::fs::read(path)?;
        info!("Reading capture {} ({} bytes)", path.display(), data.len());
        Self::from_bytes(data, config)
    }

    pub fn from_bytes(data: Vec<u8>, config: &DecoderConfig) -> Result<Self> {
        let header = CaptureHeader::parse(&data)?;
        if header.data_offset > data.len() {
            return Err(HottError::Capture(format!(
                "data offset {} beyond end of file ({} bytes)",
                header.data_offset,
                data.len()
            )));
        }

        let available = (data.len() - header.data_offset) / header.block_size();
        if (available as u64) < header.block_count {
            warn!(
                "Capture truncated: header announces {} blocks, file holds {}",
                header.block_count, available
            );
        }
        info!(
            "{} capture, {} blocks of {} bytes, {} channels, {} ms per step",
            if header.is_ascii { "ASCII" } else { "binary" },
            header.block_count,
            header.block_size(),
            header.channel_count,
            header.time_step_ms
        );

        Ok(Self {
            header,
            data,
            config: config.clone(),
            interrupted: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn header(&self) -> &CaptureHeader {
        &self.header
    }

    /// Flag polled between blocks; set it to stop a replay
    pub fn interrupt_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupted)
    }

    fn blocks(&self) -> impl Iterator<Item = &[u8]> {
        self.data[self.header.data_offset..]
            .chunks_exact(self.header.block_size())
            .take(self.header.block_count as usize)
    }

    fn raw_block<'a>(&self, block: &'a [u8]) -> Result<Cow<'a, [u8]>> {
        if self.header.is_ascii {
            ascii::ascii_block_to_raw(block, self.header.raw_block_size).map(Cow::Owned)
        } else {
            Ok(Cow::Borrowed(block))
        }
    }

    /// Decode every block and hand the samples to `sink`
    ///
    /// Plausibility rejections never stop a replay; sink errors and the
    /// interrupt flag do.
    ///
    /// # Returns
    ///
    /// * `Result<ReplaySummary>` - Block counters and the session loss statistics
    pub fn replay(&self, sink: &mut dyn SampleSink) -> Result<ReplaySummary> {
        let mut state = ReplayState::new(&self.config, &self.header);
        let mut summary = ReplaySummary::default();
        let mut leading = true;
        let mut text_mode_signaled = false;

        for block in self.blocks() {
            if self.interrupted.load(Ordering::Relaxed) {
                info!("Replay interrupted after {} blocks", summary.blocks);
                return Err(HottError::Interrupted);
            }
            summary.blocks += 1;

            let raw = match self.raw_block(block) {
                Ok(raw) => raw,
                Err(e) => {
                    warn!("Skipping block {}: {}", summary.blocks, e);
                    summary.malformed_blocks += 1;
                    continue;
                }
            };
            state.advance_time(&raw);

            if leading {
                if raw[TX_DBM_BYTE] == 0 || raw[RX_DBM_BYTE] == 0 || raw[SENSITIVITY_BYTE] == SENSITIVITY_BLOCK_MARKER {
                    summary.leading_skipped += 1;
                    continue;
                }
                leading = false;
                debug!("RF link established after {} blocks", summary.leading_skipped);
            }

            if self.config.filter_text_mode && raw[TEXT_MODE_BYTE] & 0x01 != 0 {
                if !text_mode_signaled {
                    warn!("Transmitter in text mode, skipping its blocks");
                    text_mode_signaled = true;
                }
                summary.text_mode_blocks += 1;
                continue;
            }

            if raw[SENSITIVITY_BYTE] == SENSITIVITY_BLOCK_MARKER {
                summary.sensitivity_blocks += 1;
                continue;
            }

            let emitted = if raw[TX_DBM_BYTE] != 0 && raw[RX_DBM_BYTE] != 0 {
                state.linked_block(&raw, sink, &mut summary)?
            } else {
                state.lost_block(&raw, sink, &mut summary)?
            };
            if emitted {
                summary.samples += 1;
            }
        }

        state.loss.finalize();
        summary.loss = state.loss.summary();
        summary.elapsed_ms = state.sample.elapsed_ms();
        sink.finish(&summary.loss)?;

        info!(
            "Replay finished: {} samples from {} blocks, {} rejected frames",
            summary.samples, summary.blocks, summary.rejected_frames
        );
        Ok(summary)
    }
}

/// Decoder state of one replay
struct ReplayState {
    base: DecodeContext<'static>,
    channels_enabled: bool,
    time_step_ms: u64,
    sequence: Option<u32>,
    sample: Sample,
    loss: PackageLoss,
    profiles: StreamProfile,
    altitude: AltitudeTracker,
    sensor_counts: BTreeMap<SensorType, u32>,
    receiver_seen: bool,
}

impl ReplayState {
    fn new(config: &DecoderConfig, header: &CaptureHeader) -> Self {
        Self {
            base: DecodeContext {
                channel_count: header.channel_count,
                ..config.context()
            },
            channels_enabled: config.channels_enabled,
            time_step_ms: header.time_step_ms,
            sequence: None,
            sample: Sample::new(),
            loss: PackageLoss::new(),
            profiles: StreamProfile::new(),
            altitude: AltitudeTracker::new(config.altitude_climb_sensor_selection),
            sensor_counts: BTreeMap::new(),
            receiver_seen: false,
        }
    }

    /// Advance by the nominal step times the sequence delta
    fn advance_time(&mut self, raw: &[u8]) {
        let sequence = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
        let delta = match self.sequence {
            None => 1,
            Some(previous) => match sequence.checked_sub(previous) {
                Some(delta) => delta,
                None => {
                    warn!("Sequence number went back from {} to {}", previous, sequence);
                    0
                }
            },
        };
        self.sequence = Some(sequence);
        let elapsed = self.sample.elapsed_ms() + self.time_step_ms * delta as u64;
        self.sample.set_elapsed_ms(elapsed);
    }

    /// Decode one sensor of a block into the sample
    ///
    /// Returns true if the sample was updated.
    fn decode_into(&mut self, sensor: SensorType, raw: &[u8], ctx: DecodeContext<'_>, summary: &mut ReplaySummary) -> bool {
        let result = {
            let ctx = ctx.with_previous(self.sample.sensor_slots(sensor));
            decode(FrameFormat::LogBlock, sensor, raw, &ctx)
        };
        match result {
            Some(Ok(patch)) => {
                self.sample.apply(sensor, &patch);
                true
            }
            Some(Err(rejected)) => {
                debug!("{} block rejected: {}", sensor, rejected);
                summary.rejected_frames += 1;
                false
            }
            None => false,
        }
    }

    fn linked_block(&mut self, raw: &[u8], sink: &mut dyn SampleSink, summary: &mut ReplaySummary) -> Result<bool> {
        self.loss.record(true);
        let ctx = DecodeContext {
            loss_permille: self.loss.current_percentage_permille(),
            ..self.base
        };

        self.decode_into(SensorType::Receiver, raw, ctx, summary);
        self.receiver_seen = true;
        if self.channels_enabled {
            self.decode_into(SensorType::ChannelsMonitor, raw, ctx, summary);
        }

        if let Some(sensor) = SensorType::from_capture_byte(raw[SENSOR_BYTE]) {
            let count = self.sensor_counts.entry(sensor).or_insert(0);
            let seen = *count;
            *count += 1;
            let ctx = DecodeContext {
                sensor_samples: seen,
                ..ctx
            };

            if let Some(slots) = self.profiles.observe(sensor, raw[VERSION_BYTE]) {
                sink.sensor_profile(sensor, slots)?;
            }
            if self.decode_into(sensor, raw, ctx, summary) {
                self.altitude.observe(sensor);
            }
        }

        self.altitude.apply(&mut self.sample);
        sink.emit(&self.sample)?;
        Ok(true)
    }

    /// Block without RF link: counted as lost, emitted only to carry channels
    fn lost_block(&mut self, raw: &[u8], sink: &mut dyn SampleSink, summary: &mut ReplaySummary) -> Result<bool> {
        self.loss.record(false);
        if !self.channels_enabled || !self.receiver_seen {
            return Ok(false);
        }

        self.sample.apply(SensorType::Receiver, &link_quality_only(raw));
        self.decode_into(SensorType::ChannelsMonitor, raw, self.base, summary);
        sink.emit(&self.sample)?;
        Ok(true)
    }
}
