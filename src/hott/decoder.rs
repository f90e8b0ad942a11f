//! # Sensor Frame Decoder
//!
//! Pure per-(format, sensor) decode routines turning a raw frame into a
//! sparse [`SamplePatch`].
//!
//! This module handles:
//! - The `(FrameFormat, SensorType)` dispatch table with minimum lengths
//! - Live wire frames for the 19200 V3, 19200 V4 and 115200 variants
//! - 66 byte capture log blocks, including the GPS and ESC vendor layouts
//! - Plausibility filtering (whole-frame rejection or per-slot skipping)
//!
//! A decoder never touches the caller's sample. Slots it does not set keep
//! their previous value once the caller applies the patch.

use std::fmt;
use tracing::{debug, warn};

use super::protocol::{ProtocolVariant, SensorType};
use super::sample::SamplePatch;

/// Size of one capture log block without channel data
pub const LOG_BLOCK_SIZE: usize = 66;

/// Upper bound of decoded channels
pub const MAX_CHANNELS: usize = 32;

/// Where a frame came from, selecting the byte offset convention
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameFormat {
    /// Live query answer of a protocol variant
    Wire(ProtocolVariant),
    /// One block of a stored capture log
    LogBlock,
}

/// Why a frame produced no patch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejected {
    /// Frame shorter than the sensor's minimum length
    TooShort { expected: usize, actual: usize },
    /// Frame longer than a layout that only accepts one exact size
    WrongLength { expected: usize, actual: usize },
    /// Frame failed the plausibility filter as a whole
    Implausible,
}

impl fmt::Display for Rejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejected::TooShort { expected, actual } => {
                write!(f, "frame too short: expected {} bytes, got {}", expected, actual)
            }
            Rejected::WrongLength { expected, actual } => {
                write!(f, "wrong frame length: expected exactly {} bytes, got {}", expected, actual)
            }
            Rejected::Implausible => f.write_str("implausible frame"),
        }
    }
}

/// Per-call decoder inputs
#[derive(Debug, Clone, Copy)]
pub struct DecodeContext<'a> {
    pub filter_enabled: bool,
    pub latitude_tolerance: f64,
    pub longitude_tolerance: f64,
    pub channels_enabled: bool,
    /// Channels carried by each capture block
    pub channel_count: usize,
    /// Current slot values of the decoded sensor
    pub previous: &'a [i32],
    /// Sliding-window package loss, written to receiver slot 0
    pub loss_permille: i32,
    /// Frames of this sensor seen before this one in the stream
    pub sensor_samples: u32,
}

impl Default for DecodeContext<'_> {
    fn default() -> Self {
        Self {
            filter_enabled: true,
            latitude_tolerance: 50.0,
            longitude_tolerance: 15.0,
            channels_enabled: false,
            channel_count: 0,
            previous: &[],
            loss_permille: 0,
            sensor_samples: 0,
        }
    }
}

impl<'a> DecodeContext<'a> {
    /// Same settings, different previous values
    pub fn with_previous(self, previous: &'a [i32]) -> Self {
        Self { previous, ..self }
    }

    fn prev(&self, slot: usize) -> i32 {
        self.previous.get(slot).copied().unwrap_or(0)
    }
}

pub type DecodeFn = fn(&[u8], &DecodeContext<'_>) -> Result<SamplePatch, Rejected>;

/// One row of the dispatch table
pub struct DecoderEntry {
    pub format: FrameFormat,
    pub sensor: SensorType,
    pub min_len: usize,
    /// Only a frame of exactly `min_len` bytes is decoded
    pub exact: bool,
    pub decode: DecodeFn,
}

impl fmt::Debug for DecoderEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecoderEntry")
            .field("format", &self.format)
            .field("sensor", &self.sensor)
            .field("min_len", &self.min_len)
            .field("exact", &self.exact)
            .finish_non_exhaustive()
    }
}

macro_rules! entry {
    ($format:expr, $sensor:ident, == $len:expr, $decode:path) => {
        DecoderEntry {
            format: $format,
            sensor: SensorType::$sensor,
            min_len: $len,
            exact: true,
            decode: $decode,
        }
    };
    ($format:expr, $sensor:ident, $len:expr, $decode:path) => {
        DecoderEntry {
            format: $format,
            sensor: SensorType::$sensor,
            min_len: $len,
            exact: false,
            decode: $decode,
        }
    };
}

const V3: FrameFormat = FrameFormat::Wire(ProtocolVariant::Legacy19200V3);
const V4: FrameFormat = FrameFormat::Wire(ProtocolVariant::Legacy19200V4);
const FAST: FrameFormat = FrameFormat::Wire(ProtocolVariant::Fast115200);
const LOG: FrameFormat = FrameFormat::LogBlock;

static DECODERS: &[DecoderEntry] = &[
    entry!(V3, Receiver, == 17, v3::receiver),
    entry!(V3, Vario, == 31, v3::vario),
    entry!(V3, Gps, == 40, v3::gps),
    entry!(V3, GeneralAir, == 48, v3::general),
    entry!(V3, ElectricAir, == 51, v3::electric),
    entry!(V4, Receiver, 17, v4::receiver),
    entry!(V4, Vario, == 57, v4::vario),
    entry!(V4, Gps, == 57, v4::gps),
    entry!(V4, GeneralAir, == 57, v4::general),
    entry!(V4, ElectricAir, == 57, v4::electric),
    entry!(V4, Esc, == 57, v4::esc),
    entry!(FAST, Receiver, 21, fast::receiver),
    entry!(FAST, Vario, 51, fast::vario),
    entry!(FAST, Gps, 52, fast::gps),
    entry!(FAST, GeneralAir, 60, fast::general),
    entry!(FAST, ElectricAir, 66, fast::electric),
    entry!(FAST, Esc, 35, fast::esc),
    entry!(FAST, ChannelsMonitor, 74, fast::servo),
    entry!(LOG, Receiver, LOG_BLOCK_SIZE, log::receiver),
    entry!(LOG, Vario, LOG_BLOCK_SIZE, log::vario),
    entry!(LOG, Gps, LOG_BLOCK_SIZE, log::gps),
    entry!(LOG, GeneralAir, LOG_BLOCK_SIZE, log::general),
    entry!(LOG, ElectricAir, LOG_BLOCK_SIZE, log::electric),
    entry!(LOG, Esc, LOG_BLOCK_SIZE, log::esc),
    entry!(LOG, Esc2, LOG_BLOCK_SIZE, log::esc),
    entry!(LOG, Esc3, LOG_BLOCK_SIZE, log::esc),
    entry!(LOG, Esc4, LOG_BLOCK_SIZE, log::esc),
    entry!(LOG, ChannelsMonitor, LOG_BLOCK_SIZE, log::channels),
];

/// Find the decoder for a `(format, sensor)` pair
pub fn lookup(format: FrameFormat, sensor: SensorType) -> Option<&'static DecoderEntry> {
    DECODERS
        .iter()
        .find(|entry| entry.format == format && entry.sensor == sensor)
}

/// Decode one frame of a known sensor
///
/// # Arguments
///
/// * `format` - Live variant or capture block
/// * `sensor` - Sensor the frame belongs to
/// * `frame` - Raw frame bytes
/// * `ctx` - Filter settings and the sensor's previous slot values
///
/// # Returns
///
/// * `None` - No decoder exists for the pair
/// * `Some(Ok(patch))` - Slots to update
/// * `Some(Err(Rejected))` - Frame of the wrong size or implausible, nothing to update
///
/// # Examples
///
/// ```no_run
/// use hott_link::hott::decoder::{decode, DecodeContext, FrameFormat};
/// use hott_link::hott::protocol::{ProtocolVariant, SensorType};
///
/// let frame = [0u8; 17];
/// let format = FrameFormat::Wire(ProtocolVariant::Legacy19200V4);
/// let result = decode(format, SensorType::Receiver, &frame, &DecodeContext::default());
/// assert!(matches!(result, Some(Ok(_))));
/// ```
pub fn decode(
    format: FrameFormat,
    sensor: SensorType,
    frame: &[u8],
    ctx: &DecodeContext<'_>,
) -> Option<Result<SamplePatch, Rejected>> {
    let entry = lookup(format, sensor)?;

    if frame.len() < entry.min_len {
        debug!(
            "{} frame rejected: {} of {} bytes",
            sensor,
            frame.len(),
            entry.min_len
        );
        return Some(Err(Rejected::TooShort {
            expected: entry.min_len,
            actual: frame.len(),
        }));
    }
    if entry.exact && frame.len() != entry.min_len {
        debug!(
            "{} frame rejected: {} bytes, layout needs exactly {}",
            sensor,
            frame.len(),
            entry.min_len
        );
        return Some(Err(Rejected::WrongLength {
            expected: entry.min_len,
            actual: frame.len(),
        }));
    }

    Some((entry.decode)(frame, ctx))
}

/// Sensor tagged in a live frame
///
/// Legacy frames carry the sensor byte at offset 1, fast frames at offset 0.
pub fn live_frame_sensor(variant: ProtocolVariant, frame: &[u8]) -> Option<SensorType> {
    let index = if variant.is_legacy() { 1 } else { 0 };
    frame
        .get(index)
        .and_then(|&byte| SensorType::from_wire_byte(variant, byte))
}

/// Decode a live frame, dispatching on its own sensor byte
///
/// Returns `None` for an unrecognized sensor byte; such frames are ignored.
pub fn decode_live_frame(
    variant: ProtocolVariant,
    frame: &[u8],
    ctx: &DecodeContext<'_>,
) -> Option<(SensorType, Result<SamplePatch, Rejected>)> {
    let sensor = live_frame_sensor(variant, frame)?;
    decode(FrameFormat::Wire(variant), sensor, frame, ctx).map(|result| (sensor, result))
}

/// Whether a live receiver frame reports an established RF link
///
/// Fast frames with both link quality bytes zero are lost frames. Legacy
/// frames only exist once the markers validated.
pub fn receiver_link_present(variant: ProtocolVariant, frame: &[u8]) -> bool {
    match variant {
        ProtocolVariant::Fast115200 => match (frame.get(4), frame.get(5)) {
            (Some(&rx), Some(&tx)) => !(rx == 0 && tx == 0),
            _ => false,
        },
        ProtocolVariant::Legacy19200V3 | ProtocolVariant::Legacy19200V4 => true,
    }
}

/// Bounds-checked by the dispatcher before any decode routine runs
struct Bytes<'a>(&'a [u8]);

impl Bytes<'_> {
    fn b(&self, i: usize) -> i32 {
        self.0[i] as i32
    }

    fn sb(&self, i: usize) -> i32 {
        self.0[i] as i8 as i32
    }

    fn s16(&self, i: usize) -> i32 {
        i16::from_le_bytes([self.0[i], self.0[i + 1]]) as i32
    }

    fn u16(&self, i: usize) -> i32 {
        u16::from_le_bytes([self.0[i], self.0[i + 1]]) as i32
    }
}

fn power(voltage_slot: i32, current_slot: i32) -> i32 {
    (voltage_slot as f64 / 1000.0 * current_slot as f64) as i32
}

/// Spread between the highest and lowest populated cell
fn cell_balance(cells: &[i32]) -> i32 {
    let populated = cells.iter().copied().filter(|&cell| cell > 0);
    match (populated.clone().max(), populated.min()) {
        (Some(max), Some(min)) => max - min,
        _ => 0,
    }
}

fn coordinate(degrees: i32, fraction: i32, direction: i32) -> i32 {
    let value = degrees * 10_000 + fraction;
    if direction == 1 {
        -value
    } else {
        value
    }
}

/// GPS fix character to slot value
fn gps_fix(byte: u8) -> i32 {
    match byte {
        b'-' => 0,
        b'2' => 2000,
        b'3' => 3000,
        b'D' => 4000,
        b'0'..=b'9' => (byte - b'0') as i32 * 1000,
        _ => 1000,
    }
}

/// Event bits of the air modules and ESCs
fn event_flags(f: &Bytes<'_>) -> i32 {
    (f.b(27) + ((f.b(28) & 0x7F) << 8)) * 1000
}

/// Write latitude (slot 1) and longitude (slot 2), dropping jumps
fn set_position(p: &mut SamplePatch, ctx: &DecodeContext<'_>, latitude: i32, longitude: i32) {
    for (slot, value, tolerance) in [
        (1, latitude, ctx.latitude_tolerance),
        (2, longitude, ctx.longitude_tolerance),
    ] {
        let previous = ctx.prev(slot);
        if ctx.filter_enabled && previous != 0 {
            let delta = (value as i64 - previous as i64).abs() as f64;
            if delta > tolerance * 1000.0 {
                debug!("GPS slot {} jump {} -> {} dropped", slot, previous, value);
                continue;
            }
        }
        p.set(slot, value);
    }
}

/// Electric-air-style cells: write, then balance into slot 5
fn set_cells(p: &mut SamplePatch, ctx: &DecodeContext<'_>, values: &[i32], keep_previous: bool, balance_factor: i32) {
    let mut effective = Vec::with_capacity(values.len());
    for (j, &value) in values.iter().enumerate() {
        let slot = 6 + j;
        if keep_previous && value <= 0 {
            effective.push(ctx.prev(slot));
            continue;
        }
        p.set(slot, value);
        effective.push(value);
    }
    p.set(5, cell_balance(&effective) * balance_factor);
}

/// Voltage, current, capacity and power into slots 1 to 4
fn set_power_head(p: &mut SamplePatch, voltage: i32, current: i32, capacity: i32) {
    let voltage = voltage * 1000;
    let current = current * 1000;
    p.set(1, voltage);
    p.set(2, current);
    p.set(3, capacity * 1000);
    p.set(4, power(voltage, current));
}

fn altitude_plausible(height: i32) -> bool {
    height > 10 && height < 5000
}

fn climb_plausible(climb: i32) -> bool {
    climb > 20_000 && climb < 40_000
}

/// Air module whole-frame filter
fn air_module_plausible(capacity_3s: i32, height: i32, voltage_1: i32, voltage_2: i32) -> bool {
    capacity_3s > 30 && altitude_plausible(height) && voltage_1.abs() < 600 && voltage_2.abs() < 600
}

/// ESC whole-frame filter, shared by live and capture decoding
fn esc_plausible(ctx: &DecodeContext<'_>, voltage: i32, current: i32, revolution: i32, fet_temperature: i32) -> bool {
    let previous_temperature = ctx.prev(6);
    let temperature_jump = previous_temperature != 0 && previous_temperature / 1000 - fet_temperature > 20;
    voltage > 0
        && voltage < 1000
        && current > -10
        && current < 4000
        && revolution > -1
        && revolution < 20_000
        && !temperature_jump
}

/// Offsets of the third-party GPS logger fields in the V4 and fast layouts
struct GpsExtension {
    /// Sparrow satellite count, zero for the SM logger
    satellites: usize,
    /// Sparrow date characters follow this byte
    date: usize,
    /// First of three SM signed bytes
    sm_bytes: usize,
    /// Sparrow time bytes or SM words
    words: usize,
}

fn set_gps_extension(p: &mut SamplePatch, f: &Bytes<'_>, ext: &GpsExtension, sparrow_tail: (i32, i32)) {
    let sat = ext.satellites;
    let date = ext.date;
    let sm = ext.sm_bytes;
    let w = ext.words;

    if f.sb(sat) > 40 && f.sb(sat) <= 100 && f.sb(date) > 0 && f.sb(date) <= 100 {
        p.set(16, f.sb(date) * 1000);
        p.set(17, 0);
        p.set(18, f.sb(sat) * 100);
        p.set(19, f.sb(w) * 10_000_000 + f.sb(w + 1) * 100_000 + f.sb(w + 2) * 1000 + f.sb(w + 3) * 10);
        p.set(
            20,
            ((f.sb(date + 1) - 48) * 1_000_000 + (f.sb(date + 3) - 48) * 10_000 + (f.sb(date + 2) - 48) * 100) * 10,
        );
        p.set(21, sparrow_tail.0);
        p.set(22, sparrow_tail.1);
        p.set(23, 4000);
    } else if f.sb(sat) == 0 && f.sb(sm) > -120 && f.sb(sm) <= 120 {
        p.set(16, f.sb(sm) * 1000);
        p.set(17, f.sb(sm + 1) * 1000);
        p.set(18, f.sb(sm + 2) * 1000);
        p.set(19, f.s16(w) * 1000);
        p.set(20, f.s16(w + 2) * 1000);
        p.set(21, f.s16(w + 4) * 1000);
        p.set(22, f.b(w + 6) * 1000);
        p.set(23, 125_000);
    }
}

mod v3 {
    use super::*;

    pub(super) fn receiver(frame: &[u8], _ctx: &DecodeContext<'_>) -> Result<SamplePatch, Rejected> {
        let f = Bytes(frame);
        let mut p = SamplePatch::new();
        // V3 answers carry no link quality for slot 0
        p.set(0, 0);
        p.set(1, f.b(9) * 1000);
        p.set(2, f.b(5) * 1000);
        p.set(3, f.s16(11) * 1000);
        p.set(4, f.b(13) * -1000);
        p.set(5, f.b(9) * -1000);
        p.set(6, f.b(6) * 1000);
        p.set(7, f.b(7) * 1000);
        Ok(p)
    }

    pub(super) fn vario(frame: &[u8], _ctx: &DecodeContext<'_>) -> Result<SamplePatch, Rejected> {
        let f = Bytes(frame);
        let mut p = SamplePatch::new();
        p.set(0, f.b(15) * 1000);
        p.set(1, f.s16(16) * 1000);
        p.set(2, f.s16(22) * 1000);
        p.set(3, f.s16(24) * 1000);
        p.set(4, f.s16(26) * 1000);
        p.set(5, f.b(8) * 1000);
        p.set(6, f.b(5) * 1000);
        Ok(p)
    }

    pub(super) fn gps(frame: &[u8], ctx: &DecodeContext<'_>) -> Result<SamplePatch, Rejected> {
        let f = Bytes(frame);
        let mut p = SamplePatch::new();
        p.set(0, f.b(15) * 1000);
        set_position(
            &mut p,
            ctx,
            coordinate(f.s16(20), f.s16(22), f.sb(19)),
            coordinate(f.s16(25), f.s16(27), f.sb(24)),
        );
        p.set(3, f.s16(31) * 1000);
        p.set(4, f.s16(33) * 1000);
        p.set(5, f.b(35) * 1000);
        p.set(6, f.s16(17) * 1000);
        p.set(7, f.s16(29) * 1000);
        p.set(8, f.b(16) * 1000);
        p.set(9, 0);
        p.set(10, f.b(8) * 1000);
        p.set(11, f.b(5) * 1000);
        Ok(p)
    }

    fn head(p: &mut SamplePatch, f: &Bytes<'_>) {
        p.set(0, f.b(15) * 1000);
        set_power_head(p, f.s16(40), f.s16(38), f.s16(42));
    }

    pub(super) fn general(frame: &[u8], ctx: &DecodeContext<'_>) -> Result<SamplePatch, Rejected> {
        let f = Bytes(frame);
        let mut p = SamplePatch::new();
        head(&mut p, &f);
        let cells: Vec<i32> = (0..6).map(|j| f.b(16 + j) * 1000).collect();
        set_cells(&mut p, ctx, &cells, false, 1);
        p.set(12, f.s16(31) * 1000);
        p.set(13, f.s16(33) * 1000);
        p.set(14, f.s16(35) * 1000);
        p.set(15, f.b(37) * 1000);
        p.set(16, f.s16(29) * 1000);
        p.set(17, f.s16(22) * 1000);
        p.set(18, f.s16(24) * 1000);
        p.set(19, f.b(26) * 1000);
        p.set(20, f.b(27) * 1000);
        Ok(p)
    }

    pub(super) fn electric(frame: &[u8], ctx: &DecodeContext<'_>) -> Result<SamplePatch, Rejected> {
        let f = Bytes(frame);
        let mut p = SamplePatch::new();
        head(&mut p, &f);
        let cells: Vec<i32> = (0..14).map(|j| f.b(16 + j) * 1000).collect();
        set_cells(&mut p, ctx, &cells, false, 1);
        p.set(20, f.s16(36) * 1000);
        p.set(21, f.s16(44) * 1000);
        p.set(22, f.b(46) * 1000);
        p.set(23, f.s16(30) * 1000);
        p.set(24, f.s16(32) * 1000);
        p.set(25, f.b(34) * 1000);
        p.set(26, f.b(35) * 1000);
        Ok(p)
    }
}

mod v4 {
    use super::*;

    pub(super) fn receiver(frame: &[u8], ctx: &DecodeContext<'_>) -> Result<SamplePatch, Rejected> {
        let f = Bytes(frame);
        let loss = f.s16(11);
        let voltage = f.b(6);
        let temperature = f.b(7);
        if ctx.filter_enabled && !(loss > -1 && voltage < 100 && temperature < 120) {
            return Err(Rejected::Implausible);
        }

        let mut p = SamplePatch::new();
        p.set(0, ctx.loss_permille);
        p.set(1, f.b(9) * 1000);
        p.set(2, f.b(5) * 1000);
        p.set(3, loss * 1000);
        p.set(4, f.b(13) * -1000);
        p.set(5, f.b(8) * -1000);
        p.set(6, voltage * 1000);
        p.set(7, (temperature - 20) * 1000);
        p.set(8, f.b(10) * 1000);
        Ok(p)
    }

    pub(super) fn vario(frame: &[u8], ctx: &DecodeContext<'_>) -> Result<SamplePatch, Rejected> {
        let f = Bytes(frame);
        let mut p = SamplePatch::new();
        p.set(0, f.b(9) * 1000);

        let height = f.s16(16);
        if !ctx.filter_enabled || altitude_plausible(height) {
            p.set(1, height * 1000);
            p.set(2, (f.s16(22) - 30_000) * 10);
        }
        let climb3 = f.s16(24);
        let climb10 = f.s16(26);
        if !ctx.filter_enabled || (climb_plausible(climb3) && climb_plausible(climb10)) {
            p.set(3, climb3 * 1000);
            p.set(4, climb10 * 1000);
        }

        p.set(5, f.b(6) * 1000);
        p.set(6, f.b(7) * 1000);
        Ok(p)
    }

    pub(super) fn gps(frame: &[u8], ctx: &DecodeContext<'_>) -> Result<SamplePatch, Rejected> {
        let f = Bytes(frame);
        let latitude = f.s16(20);
        let longitude = f.s16(25);
        let height = f.s16(31);
        let climb3 = f.b(35);
        if ctx.filter_enabled
            && !((latitude == longitude || latitude > 0) && altitude_plausible(height) && climb3 > 80)
        {
            return Err(Rejected::Implausible);
        }

        let mut p = SamplePatch::new();
        p.set(0, f.b(9) * 1000);
        set_position(
            &mut p,
            ctx,
            coordinate(latitude, f.s16(22), f.sb(19)),
            coordinate(longitude, f.s16(27), f.sb(24)),
        );
        p.set(3, height * 1000);
        p.set(4, f.s16(33) * 1000);
        p.set(5, climb3 * 1000);
        p.set(6, f.s16(17) * 1000);
        p.set(7, f.s16(29) * 1000);
        p.set(8, f.b(38) * 1000);
        p.set(9, 0);
        p.set(10, f.b(6) * 1000);
        p.set(11, f.b(7) * 1000);
        p.set(12, f.b(36) * 1000);
        p.set(13, gps_fix(frame[37]));
        p.set(14, f.b(14) * 1000);
        p.set(15, f.b(38) * 1000);

        let ext = GpsExtension {
            satellites: 41,
            date: 47,
            sm_bytes: 39,
            words: 42,
        };
        set_gps_extension(&mut p, &f, &ext, (f.s16(39) * 1000, f.b(46) * 1000));
        Ok(p)
    }

    pub(super) fn general(frame: &[u8], ctx: &DecodeContext<'_>) -> Result<SamplePatch, Rejected> {
        let f = Bytes(frame);
        let mut p = SamplePatch::new();
        p.set(0, f.b(9) * 1000);

        let voltage = f.s16(40);
        let height = f.s16(33);
        let capacity_3s = f.b(37);
        let voltage_1 = f.s16(22);
        let voltage_2 = f.s16(24);
        if ctx.filter_enabled && !air_module_plausible(capacity_3s, height, voltage_1, voltage_2) {
            return Ok(p);
        }

        set_power_head(&mut p, voltage, f.s16(38), f.s16(42));
        if voltage > 0 {
            let cells: Vec<i32> = (0..6).map(|j| f.b(16 + j) * 1000).collect();
            set_cells(&mut p, ctx, &cells, true, 10);
        }
        p.set(12, f.s16(31) * 1000);
        p.set(13, height * 1000);
        p.set(14, f.s16(35) * 1000);
        p.set(15, capacity_3s * 1000);
        p.set(16, f.s16(29) * 1000);
        p.set(17, voltage_1 * 1000);
        p.set(18, voltage_2 * 1000);
        p.set(19, (f.b(26) - 20) * 1000);
        p.set(20, (f.b(27) - 20) * 1000);
        Ok(p)
    }

    pub(super) fn electric(frame: &[u8], ctx: &DecodeContext<'_>) -> Result<SamplePatch, Rejected> {
        let f = Bytes(frame);
        let mut p = SamplePatch::new();
        p.set(0, f.b(9) * 1000);

        let voltage = f.s16(40);
        let height = f.s16(36);
        let capacity_3s = f.b(46);
        let voltage_1 = f.s16(30);
        let voltage_2 = f.s16(32);
        if ctx.filter_enabled && !air_module_plausible(capacity_3s, height, voltage_1, voltage_2) {
            return Ok(p);
        }

        set_power_head(&mut p, voltage, f.s16(38), f.s16(42));
        if voltage > 0 {
            let cells: Vec<i32> = (0..14).map(|j| f.b(16 + j) * 1000).collect();
            set_cells(&mut p, ctx, &cells, true, 10);
        }
        p.set(20, height * 1000);
        p.set(21, f.s16(44) * 1000);
        p.set(22, capacity_3s * 1000);
        p.set(23, voltage_1 * 1000);
        p.set(24, voltage_2 * 1000);
        p.set(25, (f.b(34) - 20) * 1000);
        p.set(26, (f.b(35) - 20) * 1000);
        p.set(27, f.s16(47) * 1000);
        Ok(p)
    }

    pub(super) fn esc(frame: &[u8], ctx: &DecodeContext<'_>) -> Result<SamplePatch, Rejected> {
        let f = Bytes(frame);
        let voltage = f.s16(16);
        let current = f.s16(24);
        let capacity = f.s16(20);
        let revolution = f.s16(28);
        let fet_temperature = f.b(35) + 20;
        let mut p = SamplePatch::new();
        p.set(0, f.b(9) * 1000);
        if ctx.filter_enabled && !esc_plausible(ctx, voltage, current, revolution, fet_temperature) {
            return Ok(p);
        }

        set_power_head(&mut p, voltage, current, capacity);
        p.set(5, revolution * 1000);
        p.set(6, fet_temperature * 1000);
        Ok(p)
    }
}

mod fast {
    use super::*;

    pub(super) fn receiver(frame: &[u8], ctx: &DecodeContext<'_>) -> Result<SamplePatch, Rejected> {
        let f = Bytes(frame);
        let loss = f.s16(12);
        let voltage = f.b(15);
        let temperature = f.s16(10);
        if ctx.filter_enabled && !(loss > -1 && voltage < 100 && temperature < 100) {
            return Err(Rejected::Implausible);
        }

        let mut p = SamplePatch::new();
        p.set(0, ctx.loss_permille);
        p.set(1, f.b(17) * 1000);
        p.set(2, f.b(14) * 1000);
        p.set(3, loss * 1000);
        p.set(4, f.b(5) * -1000);
        p.set(5, f.b(4) * -1000);
        p.set(6, voltage * 1000);
        p.set(7, temperature * 1000);
        p.set(8, f.b(18) * 1000);
        Ok(p)
    }

    pub(super) fn vario(frame: &[u8], ctx: &DecodeContext<'_>) -> Result<SamplePatch, Rejected> {
        let f = Bytes(frame);
        let mut p = SamplePatch::new();
        p.set(0, f.b(3) * 1000);

        let height = f.s16(10) + 500;
        if !ctx.filter_enabled || altitude_plausible(height) {
            p.set(1, height * 1000);
            p.set(2, f.s16(16) * 1000);
        }
        let climb3 = f.s16(18) + 30_000;
        let climb10 = f.s16(20) + 30_000;
        if !ctx.filter_enabled || (climb_plausible(climb3) && climb_plausible(climb10)) {
            p.set(3, climb3 * 1000);
            p.set(4, climb10 * 1000);
        }

        p.set(5, f.sb(4) * 1000);
        p.set(6, (f.sb(5) + 20) * 1000);
        Ok(p)
    }

    pub(super) fn gps(frame: &[u8], ctx: &DecodeContext<'_>) -> Result<SamplePatch, Rejected> {
        let f = Bytes(frame);
        let latitude = f.s16(16);
        let longitude = f.s16(20);
        let height = f.s16(14) + 500;
        let climb3 = f.sb(30) + 120;
        if ctx.filter_enabled
            && !((latitude == longitude || latitude > 0) && altitude_plausible(height) && climb3 > 80)
        {
            return Err(Rejected::Implausible);
        }

        let mut p = SamplePatch::new();
        p.set(0, f.b(3) * 1000);
        set_position(
            &mut p,
            ctx,
            coordinate(latitude, f.s16(18), f.sb(26)),
            coordinate(longitude, f.s16(22), f.sb(27)),
        );
        p.set(3, height * 1000);
        p.set(4, (f.s16(28) + 30_000) * 1000);
        p.set(5, climb3 * 1000);
        p.set(6, f.s16(10) * 1000);
        p.set(7, f.s16(12) * 1000);
        p.set(8, f.s16(24) * 500);
        p.set(9, 0);
        p.set(10, f.sb(4) * 1000);
        p.set(11, (f.sb(5) + 20) * 1000);
        p.set(12, f.b(32) * 1000);
        p.set(13, gps_fix(frame[33]));
        p.set(14, f.b(1) * 1000);
        p.set(15, f.s16(34) * 1000);

        let ext = GpsExtension {
            satellites: 38,
            date: 45,
            sm_bytes: 36,
            words: 40,
        };
        set_gps_extension(&mut p, &f, &ext, (f.s16(39) * 1000, f.b(44) * 1000));
        Ok(p)
    }

    pub(super) fn general(frame: &[u8], ctx: &DecodeContext<'_>) -> Result<SamplePatch, Rejected> {
        let f = Bytes(frame);
        let mut p = SamplePatch::new();
        p.set(0, f.b(3) * 1000);

        let voltage = f.s16(36);
        let height = f.s16(32) + 500;
        let capacity_3s = f.sb(44) + 120;
        let voltage_1 = f.s16(22);
        let voltage_2 = f.s16(24);
        if ctx.filter_enabled && !air_module_plausible(capacity_3s, height, voltage_1, voltage_2) {
            return Ok(p);
        }

        set_power_head(&mut p, voltage, f.s16(34), f.s16(38));
        if voltage > 0 {
            let cells: Vec<i32> = (0..6).map(|j| f.s16(10 + 2 * j) * 500).collect();
            set_cells(&mut p, ctx, &cells, true, 10);
        }
        p.set(12, f.s16(30) * 1000);
        p.set(13, height * 1000);
        p.set(14, (f.s16(42) + 30_000) * 1000);
        p.set(15, capacity_3s * 1000);
        p.set(16, f.s16(40) * 1000);
        p.set(17, voltage_1 * 1000);
        p.set(18, voltage_2 * 1000);
        p.set(19, f.s16(26) * 1000);
        p.set(20, f.s16(28) * 1000);
        Ok(p)
    }

    pub(super) fn electric(frame: &[u8], ctx: &DecodeContext<'_>) -> Result<SamplePatch, Rejected> {
        let f = Bytes(frame);
        let mut p = SamplePatch::new();
        p.set(0, f.b(3) * 1000);

        let voltage = f.s16(50);
        let height = f.s16(46) + 500;
        let capacity_3s = f.sb(56) + 120;
        let voltage_1 = f.s16(38);
        let voltage_2 = f.s16(40);
        if ctx.filter_enabled && !air_module_plausible(capacity_3s, height, voltage_1, voltage_2) {
            return Ok(p);
        }

        set_power_head(&mut p, voltage, f.s16(48), f.s16(52));
        if voltage > 0 {
            let cells: Vec<i32> = (0..14).map(|j| f.s16(10 + 2 * j) * 500).collect();
            set_cells(&mut p, ctx, &cells, true, 10);
        }
        p.set(20, height * 1000);
        p.set(21, (f.s16(54) + 30_000) * 1000);
        p.set(22, (f.sb(46) + 120) * 1000);
        p.set(23, voltage_1 * 1000);
        p.set(24, voltage_2 * 1000);
        p.set(25, f.s16(42) * 1000);
        p.set(26, f.s16(44) * 1000);
        p.set(27, f.s16(58) * 1000);
        Ok(p)
    }

    pub(super) fn esc(frame: &[u8], ctx: &DecodeContext<'_>) -> Result<SamplePatch, Rejected> {
        let f = Bytes(frame);
        let voltage = f.s16(10);
        let current = f.s16(14);
        let capacity = f.s16(22);
        let revolution = f.s16(18);
        let fet_temperature = f.s16(24);
        let mut p = SamplePatch::new();
        p.set(0, f.b(3) * 1000);
        if ctx.filter_enabled && !esc_plausible(ctx, voltage, current, revolution, fet_temperature) {
            return Ok(p);
        }

        set_power_head(&mut p, voltage, current, capacity);
        p.set(5, revolution * 1000);
        p.set(6, fet_temperature * 1000);
        Ok(p)
    }

    /// Servo positions, slots 3.. hold channels 1 to 32
    pub(super) fn servo(frame: &[u8], ctx: &DecodeContext<'_>) -> Result<SamplePatch, Rejected> {
        let f = Bytes(frame);
        let mut p = SamplePatch::new();
        if !ctx.channels_enabled {
            return Ok(p);
        }
        for i in 0..MAX_CHANNELS {
            p.set(3 + i, (f.s16(8 + 2 * i) / 2 + 1500) * 1000);
        }
        Ok(p)
    }
}

mod log {
    use super::*;

    /// Receiver signal strength in percent from a dBm byte
    pub(super) fn rx_strength(raw: u8) -> i32 {
        let dbm = (raw as i8 as i32).abs();
        if dbm <= 30 {
            100
        } else if dbm >= 100 {
            0
        } else {
            (100 - dbm) * 100 / 70
        }
    }

    pub(super) fn receiver(frame: &[u8], ctx: &DecodeContext<'_>) -> Result<SamplePatch, Rejected> {
        let f = Bytes(frame);
        let voltage = f.b(13);
        let temperature = f.b(14);
        if ctx.filter_enabled && !(voltage < 100 && temperature < 120) {
            return Err(Rejected::Implausible);
        }

        let mut p = SamplePatch::new();
        p.set(0, ctx.loss_permille);
        p.set(1, f.b(16) * 1000);
        p.set(2, rx_strength(frame[9]) * 1000);
        p.set(3, f.s16(18) * 1000);
        p.set(4, f.sb(8) * -1000);
        p.set(5, f.sb(9) * -1000);
        p.set(6, voltage * 1000);
        p.set(7, (temperature - 20) * 1000);
        p.set(8, f.b(17) * 1000);

        let warning = f.b(25);
        let alarm = (warning & 0x40) != 0 || ((warning & 0x20) != 0 && temperature >= 70);
        p.set(9, if alarm { (warning & 0x60) * 1000 } else { 0 });
        Ok(p)
    }

    /// Link quality of a block without receiver data
    pub fn link_quality_only(frame: &[u8]) -> SamplePatch {
        let mut p = SamplePatch::new();
        if frame.len() > 9 {
            let f = Bytes(frame);
            p.set(4, f.sb(8) * -1000);
            p.set(5, f.sb(9) * -1000);
        }
        p
    }

    fn sm_text_value(frame: &[u8], indices: [usize; 5], suffix: &str) -> Option<i32> {
        let mut text: String = indices.iter().map(|&i| frame[i] as char).collect();
        text.push_str(suffix);
        match text.trim().parse::<i32>() {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("SM vario text field {:?} not numeric: {}", text, e);
                None
            }
        }
    }

    pub(super) fn vario(frame: &[u8], _ctx: &DecodeContext<'_>) -> Result<SamplePatch, Rejected> {
        let f = Bytes(frame);
        let mut p = SamplePatch::new();
        p.set(0, f.b(16) * 1000);
        p.set(1, (f.s16(28) - 500) * 1000);
        p.set(2, (f.u16(34) - 30_000) * 10);
        p.set(3, (f.u16(36) - 30_000) * 10);
        p.set(4, (f.u16(38) - 30_000) * 10);
        p.set(5, f.b(13) * 1000);
        p.set(6, f.b(14) * 1000);
        p.set(7, (f.b(27) & 0x3F) * 1000);

        let version = f.b(65);
        if version > 100 && version < 120 {
            for (slot, indices) in [
                (8, [40, 41, 42, 44, 45]),
                (9, [47, 48, 49, 51, 52]),
                (10, [54, 55, 56, 58, 59]),
            ] {
                if let Some(value) = sm_text_value(frame, indices, "0") {
                    p.set(slot, value);
                }
            }
            p.set(11, f.b(64) * 1000);
            p.set(12, version * 1000);
        }
        Ok(p)
    }

    fn gps_time(f: &Bytes<'_>, start: usize) -> i32 {
        f.sb(start) * 10_000_000 + f.sb(start + 1) * 100_000 + f.sb(start + 2) * 1000 + f.sb(start + 3) * 10
    }

    pub(super) fn gps(frame: &[u8], ctx: &DecodeContext<'_>) -> Result<SamplePatch, Rejected> {
        let f = Bytes(frame);
        let mut p = SamplePatch::new();
        p.set(0, f.b(16) * 1000);
        set_position(
            &mut p,
            ctx,
            coordinate(f.u16(33), f.u16(35), f.b(32)),
            coordinate(f.u16(38), f.u16(40), f.b(37)),
        );
        p.set(3, (f.s16(44) - 500) * 1000);
        p.set(4, (f.u16(46) - 30_000) * 10);
        p.set(5, (f.b(48) - 120) * 1000);
        p.set(6, f.u16(30) * 1000);
        p.set(7, f.u16(42) * 1000);
        p.set(8, f.b(51) * 1000);
        p.set(9, 0);
        p.set(10, f.b(13) * 1000);
        p.set(11, f.b(14) * 1000);
        p.set(12, f.b(49) * 1000);
        let fix = gps_fix(frame[50]);
        p.set(13, fix);
        p.set(14, f.b(28) * 1000);
        p.set(15, f.b(51) * 1000);

        let version = f.b(65);
        match version {
            v if v > 100 => {
                p.set(16, f.sb(52) * 1000);
                p.set(17, f.u16(53) * 1000);
                p.set(19, f.s16(55) * 1000);
                p.set(20, f.s16(57) * 1000);
                p.set(21, f.s16(59) * 1000);
                p.set(22, f.b(61) * 1000);
            }
            4 => {
                p.set(16, f.sb(60) * 1000);
                p.set(17, 0);
                p.set(18, f.sb(54) * 100);
                if fix > 0 {
                    p.set(19, gps_time(&f, 55));
                    p.set(
                        20,
                        ((f.sb(61) - 48) * 1_000_000 + (f.sb(63) - 48) * 10_000 + (f.sb(62) - 48) * 100) * 10,
                    );
                }
                p.set(21, (f.s16(52) - 500) * 1000);
                p.set(22, f.b(59) * 1000);
            }
            0 | 1 => {
                let extended = ctx.prev(23) == 1000 || (f.b(52) != 0 && f.b(53) != 0 && f.b(54) != 0);
                if extended {
                    p.set(16, f.s16(52) * 1000);
                    p.set(17, 0);
                } else {
                    p.set(16, f.sb(52) * 1000);
                    p.set(17, f.sb(53) * 1000);
                }
                p.set(18, f.sb(54) * 1000);
                p.set(19, gps_time(&f, 55));
                p.set(20, 0);
                p.set(21, f.s16(59) * 1000);
                p.set(22, f.b(61) * 1000);
            }
            _ => {
                p.set(16, f.sb(52) * 1000);
                p.set(17, f.sb(53) * 1000);
                p.set(18, f.sb(54) * 1000);
                p.set(19, f.s16(55) * 1000);
                p.set(20, f.s16(57) * 1000);
                p.set(21, f.s16(59) * 1000);
                p.set(22, f.b(61) * 1000);
            }
        }
        p.set(23, version * 1000);
        Ok(p)
    }

    fn air_head(p: &mut SamplePatch, f: &Bytes<'_>, cells: usize) {
        p.set(0, f.b(16) * 1000);
        set_power_head(p, f.s16(53), f.s16(51), f.s16(55));
        let mut values = Vec::with_capacity(cells);
        for j in 0..cells {
            let value = f.b(29 + j) * 1000;
            p.set(6 + j, value);
            values.push(value);
        }
        p.set(5, cell_balance(&values) * 10);
    }

    pub(super) fn general(frame: &[u8], _ctx: &DecodeContext<'_>) -> Result<SamplePatch, Rejected> {
        let f = Bytes(frame);
        let mut p = SamplePatch::new();
        air_head(&mut p, &f, 6);
        p.set(12, f.u16(44) * 1000);
        p.set(13, (f.s16(46) - 500) * 1000);
        p.set(14, (f.u16(48) - 30_000) * 10);
        p.set(15, (f.b(50) - 120) * 1000);
        p.set(16, f.s16(42) * 1000);
        p.set(17, f.s16(35) * 100);
        p.set(18, f.s16(37) * 100);
        p.set(19, (f.b(39) - 20) * 1000);
        p.set(20, (f.b(40) - 20) * 1000);
        p.set(21, f.u16(57) * 1000);
        p.set(22, f.b(59) * 1000);
        p.set(23, f.b(60) * 1000);
        p.set(24, f.b(64) * 1000);
        p.set(25, event_flags(&f));
        Ok(p)
    }

    pub(super) fn electric(frame: &[u8], _ctx: &DecodeContext<'_>) -> Result<SamplePatch, Rejected> {
        let f = Bytes(frame);
        let mut p = SamplePatch::new();
        air_head(&mut p, &f, 14);
        p.set(20, (f.s16(49) - 500) * 1000);
        p.set(21, (f.u16(57) - 30_000) * 10);
        p.set(22, (f.b(59) - 120) * 1000);
        p.set(23, f.s16(43) * 100);
        p.set(24, f.s16(45) * 100);
        p.set(25, (f.b(47) - 20) * 1000);
        p.set(26, (f.b(48) - 20) * 1000);
        p.set(27, f.u16(60) * 1000);
        p.set(28, (f.b(62) * 60 + f.b(63)) * 1000);
        p.set(29, f.s16(64) * 1000);
        p.set(30, event_flags(&f));
        Ok(p)
    }

    /// Routine shared by all four ESC instances
    pub(super) fn esc(frame: &[u8], ctx: &DecodeContext<'_>) -> Result<SamplePatch, Rejected> {
        let f = Bytes(frame);
        let voltage = f.s16(29);
        let current = f.s16(37);
        let capacity = f.s16(33);
        let revolution = f.u16(41);
        let fet_temperature = f.b(35) - 20;

        let mut p = SamplePatch::new();
        p.set(0, f.b(16) * 1000);
        if !ctx.filter_enabled || esc_plausible(ctx, voltage, current, revolution, fet_temperature) {
            set_power_head(&mut p, voltage, current, capacity);

            let capacity_limit = ctx.prev(3) / 1000 + voltage * current / 2500 + 2;
            let capacity_plausible = !ctx.filter_enabled
                || ctx.sensor_samples <= 20
                || (capacity != 0 && capacity.abs() <= capacity_limit);
            if !capacity_plausible {
                warn!(
                    "ESC capacity {} mAh implausible, limit {} mAh",
                    capacity, capacity_limit
                );
                p.clear(3);
            }

            p.set(5, revolution * 1000);
            p.set(6, fet_temperature * 1000);
            p.set(7, (f.b(45) - 20) * 1000);
            p.set(8, f.s16(31) * 1000);
            p.set(9, f.s16(39) * 1000);
            p.set(10, f.u16(43) * 1000);
            p.set(11, (f.b(36) - 20) * 1000);
            p.set(12, (f.b(46) - 20) * 1000);
        }
        // event flags and the extension slots update even when the filter trips
        p.set(13, event_flags(&f));

        let version = f.b(65);
        if version == 3 {
            p.set(14, f.s16(47) * 1000);
            p.set(15, f.s16(49) * 1000);
            p.set(16, f.b(51) * 1000);
            p.set(17, f.b(52) * 1000);
            p.set(18, f.b(53) * 1000);
            p.set(19, f.b(54) * 1000);
            p.set(20, f.u16(55) * 1000);
            p.set(21, (f.b(57) - 20) * 1000);
            p.set(22, (f.b(58) - 20) * 1000);
            p.set(23, f.b(59) * 1000);
            p.set(24, (f.b(60) - 20) * 1000);
            p.set(25, f.s16(61) * 1000);
            p.set(26, f.b(63) * 1000);
            p.set(27, f.b(64) * 1000);
            p.set(28, 0);
            p.set(29, version * 1000);
        } else if version >= 128 {
            p.set(14, f.s16(47) * 1000);
            p.set(15, f.s16(49) * 1000);
            for (j, slot) in (16..20).enumerate() {
                p.set(slot, f.b(51 + j) * 1000);
            }
            p.set(20, f.u16(55) * 1000);
            p.set(21, f.u16(57) * 1000);
            p.set(22, f.u16(59) * 1000);
            p.set(23, f.u16(61) * 1000);
            p.set(24, (f.b(63) - 20) * 1000);
            p.set(25, f.b(64) * 1000);
            p.set(26, 0);
            p.set(27, 0);
            p.set(28, 0);
            p.set(29, version * 1000);
        }
        Ok(p)
    }

    /// Link quality plus channel values following the 66 byte block
    pub(super) fn channels(frame: &[u8], ctx: &DecodeContext<'_>) -> Result<SamplePatch, Rejected> {
        let count = ctx.channel_count.min(MAX_CHANNELS);
        let expected = LOG_BLOCK_SIZE + 2 * count;
        if frame.len() < expected {
            return Err(Rejected::TooShort {
                expected,
                actual: frame.len(),
            });
        }

        let f = Bytes(frame);
        let mut p = SamplePatch::new();
        p.set(0, f.sb(7) * -1000);
        p.set(1, f.sb(8) * -1000);
        p.set(2, f.sb(9) * -1000);
        for i in 0..count {
            p.set(3 + i, f.u16(LOG_BLOCK_SIZE + 2 * i) / 2 * 1000);
        }
        Ok(p)
    }
}

pub use log::link_quality_only;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hott::sample::Sample;

    const V4_VARIANT: ProtocolVariant = ProtocolVariant::Legacy19200V4;

    fn legacy_frame(sensor: SensorType, variant: ProtocolVariant) -> Vec<u8> {
        let len = sensor.frame_length(variant).unwrap();
        let mut frame = vec![0u8; len];
        frame[0] = 0x80;
        frame[1] = sensor.wire_byte(variant).unwrap();
        frame[2] = 0x7C;
        frame[len - 2] = 0x7D;
        frame
    }

    fn unfiltered() -> DecodeContext<'static> {
        DecodeContext {
            filter_enabled: false,
            ..Default::default()
        }
    }

    #[test]
    fn test_every_pair_has_one_entry() {
        for entry in DECODERS {
            let count = DECODERS
                .iter()
                .filter(|other| other.format == entry.format && other.sensor == entry.sensor)
                .count();
            assert_eq!(count, 1, "duplicate decoder for {:?}", entry);
        }
        assert!(lookup(V3, SensorType::Esc).is_none(), "V3 has no ESC layout");
        assert!(lookup(LOG, SensorType::Esc4).is_some());
    }

    #[test]
    fn test_wire_min_len_matches_frame_length() {
        for variant in [ProtocolVariant::Legacy19200V3, V4_VARIANT, ProtocolVariant::Fast115200] {
            for sensor in SensorType::ALL {
                if let Some(entry) = lookup(FrameFormat::Wire(variant), sensor) {
                    assert_eq!(Some(entry.min_len), sensor.frame_length(variant), "{} {}", variant, sensor);
                }
            }
        }
    }

    #[test]
    fn test_receiver_packet_loss_slot() {
        let mut frame = legacy_frame(SensorType::Receiver, V4_VARIANT);
        let ctx = DecodeContext::default();

        let (sensor, result) = decode_live_frame(V4_VARIANT, &frame, &ctx).unwrap();
        assert_eq!(sensor, SensorType::Receiver);
        assert_eq!(result.unwrap().get(3), Some(0));

        frame[10] = 0x00;
        frame[11] = 0x05;
        let (_, result) = decode_live_frame(V4_VARIANT, &frame, &ctx).unwrap();
        assert_eq!(result.unwrap().get(3), Some(5000), "loss counter is little endian at offset 11");
    }

    #[test]
    fn test_frame_one_byte_short_is_rejected() {
        for variant in [ProtocolVariant::Legacy19200V3, V4_VARIANT, ProtocolVariant::Fast115200] {
            for sensor in SensorType::ALL {
                let Some(entry) = lookup(FrameFormat::Wire(variant), sensor) else {
                    continue;
                };
                let frame = vec![0u8; entry.min_len - 1];
                let result = decode(FrameFormat::Wire(variant), sensor, &frame, &ctx_default());
                assert_eq!(
                    result,
                    Some(Err(Rejected::TooShort {
                        expected: entry.min_len,
                        actual: entry.min_len - 1
                    })),
                    "{} {} must reject a short frame",
                    variant,
                    sensor
                );
            }
        }
        let block = vec![0u8; LOG_BLOCK_SIZE - 1];
        assert!(matches!(
            decode(LOG, SensorType::Gps, &block, &ctx_default()),
            Some(Err(Rejected::TooShort { .. }))
        ));
    }

    fn ctx_default() -> DecodeContext<'static> {
        DecodeContext::default()
    }

    #[test]
    fn test_unknown_sensor_byte_ignored() {
        let mut frame = legacy_frame(SensorType::Vario, V4_VARIANT);
        frame[1] = 0x99;
        assert!(decode_live_frame(V4_VARIANT, &frame, &ctx_default()).is_none());
        assert!(decode_live_frame(ProtocolVariant::Fast115200, &[], &ctx_default()).is_none());
    }

    #[test]
    fn test_zero_altitude_keeps_previous_value() {
        let mut sample = Sample::new();
        let mut frame = legacy_frame(SensorType::Vario, V4_VARIANT);
        frame[16..18].copy_from_slice(&120i16.to_le_bytes());
        let patch = decode(V4, SensorType::Vario, &frame, &ctx_default()).unwrap().unwrap();
        sample.apply(SensorType::Vario, &patch);
        assert_eq!(sample.sensor_slots(SensorType::Vario)[1], 120_000);

        frame[16..18].copy_from_slice(&0i16.to_le_bytes());
        let previous = sample.sensor_slots(SensorType::Vario).to_vec();
        let ctx = ctx_default().with_previous(&previous);
        let patch = decode(V4, SensorType::Vario, &frame, &ctx).unwrap().unwrap();
        assert_eq!(patch.get(1), None, "implausible altitude must not be written");
        sample.apply(SensorType::Vario, &patch);
        assert_eq!(sample.sensor_slots(SensorType::Vario)[1], 120_000, "altitude keeps its previous value");
    }

    #[test]
    fn test_filter_disabled_passes_everything() {
        let mut frame = legacy_frame(SensorType::Receiver, V4_VARIANT);
        frame[6] = 200; // receiver voltage out of range
        assert_eq!(
            decode(V4, SensorType::Receiver, &frame, &ctx_default()),
            Some(Err(Rejected::Implausible))
        );
        let patch = decode(V4, SensorType::Receiver, &frame, &unfiltered()).unwrap().unwrap();
        assert_eq!(patch.get(6), Some(200_000));
    }

    #[test]
    fn test_receiver_slot_zero_is_loss() {
        let ctx = DecodeContext {
            loss_permille: 7000,
            ..Default::default()
        };
        let frame = legacy_frame(SensorType::Receiver, V4_VARIANT);
        let patch = decode(V4, SensorType::Receiver, &frame, &ctx).unwrap().unwrap();
        assert_eq!(patch.get(0), Some(7000));

        let frame = legacy_frame(SensorType::Receiver, ProtocolVariant::Legacy19200V3);
        let patch = decode(V3, SensorType::Receiver, &frame, &ctx).unwrap().unwrap();
        assert_eq!(patch.get(0), Some(0), "V3 has no link quality to report");
    }

    #[test]
    fn test_exact_length_layouts_reject_longer_frames() {
        let mut frame = legacy_frame(SensorType::Receiver, ProtocolVariant::Legacy19200V3);
        frame.push(0);
        assert_eq!(
            decode(V3, SensorType::Receiver, &frame, &ctx_default()),
            Some(Err(Rejected::WrongLength { expected: 17, actual: 18 }))
        );

        let mut frame = legacy_frame(SensorType::Vario, V4_VARIANT);
        frame.push(0);
        assert_eq!(
            decode(V4, SensorType::Vario, &frame, &ctx_default()),
            Some(Err(Rejected::WrongLength { expected: 57, actual: 58 }))
        );

        let mut frame = legacy_frame(SensorType::Receiver, V4_VARIANT);
        frame.push(0);
        assert!(
            matches!(decode(V4, SensorType::Receiver, &frame, &ctx_default()), Some(Ok(_))),
            "V4 receiver accepts trailing bytes"
        );
    }

    #[test]
    fn test_fast_receiver_link_presence() {
        let mut frame = vec![0u8; 21];
        frame[0] = 0x34;
        assert!(!receiver_link_present(ProtocolVariant::Fast115200, &frame));
        frame[4] = 60;
        assert!(receiver_link_present(ProtocolVariant::Fast115200, &frame));
        assert!(receiver_link_present(V4_VARIANT, &[]));
    }

    #[test]
    fn test_gps_coordinates_and_sign() {
        let mut frame = legacy_frame(SensorType::Gps, V4_VARIANT);
        frame[19] = 1; // south
        frame[20..22].copy_from_slice(&4807i16.to_le_bytes());
        frame[22..24].copy_from_slice(&380i16.to_le_bytes());
        frame[25..27].copy_from_slice(&1131i16.to_le_bytes());
        frame[27..29].copy_from_slice(&2000i16.to_le_bytes());
        frame[31..33].copy_from_slice(&150i16.to_le_bytes());
        frame[35] = 120;
        frame[37] = b'3';

        let patch = decode(V4, SensorType::Gps, &frame, &ctx_default()).unwrap().unwrap();
        assert_eq!(patch.get(1), Some(-(4807 * 10_000 + 380)));
        assert_eq!(patch.get(2), Some(1131 * 10_000 + 2000));
        assert_eq!(patch.get(3), Some(150_000));
        assert_eq!(patch.get(13), Some(3000), "3D fix");
    }

    #[test]
    fn test_gps_position_jump_dropped() {
        let mut frame = legacy_frame(SensorType::Gps, V4_VARIANT);
        frame[20..22].copy_from_slice(&4807i16.to_le_bytes());
        frame[25..27].copy_from_slice(&1131i16.to_le_bytes());
        frame[31..33].copy_from_slice(&150i16.to_le_bytes());
        frame[35] = 120;

        let mut previous = vec![0i32; 24];
        previous[1] = 4807 * 10_000 - 100;
        previous[2] = 900 * 10_000;
        let ctx = ctx_default().with_previous(&previous);
        let patch = decode(V4, SensorType::Gps, &frame, &ctx).unwrap().unwrap();
        assert_eq!(patch.get(1), Some(4807 * 10_000), "small latitude change accepted");
        assert_eq!(patch.get(2), None, "longitude jump beyond tolerance dropped");
    }

    #[test]
    fn test_gps_rejected_without_plausible_height() {
        let frame = legacy_frame(SensorType::Gps, V4_VARIANT);
        assert_eq!(
            decode(V4, SensorType::Gps, &frame, &ctx_default()),
            Some(Err(Rejected::Implausible))
        );
    }

    #[test]
    fn test_fast_gps_sm_extension() {
        let mut frame = vec![0u8; 52];
        frame[0] = 0x38;
        frame[14..16].copy_from_slice(&(-400i16).to_le_bytes()); // 100 m after offset
        frame[30] = 0; // climb3 120
        frame[36] = 12;
        frame[46] = 77;

        let patch = decode(FAST, SensorType::Gps, &frame, &ctx_default()).unwrap().unwrap();
        assert_eq!(patch.get(3), Some(100_000));
        assert_eq!(patch.get(16), Some(12_000));
        assert_eq!(patch.get(23), Some(125_000), "SM logger marker");
    }

    #[test]
    fn test_cell_balance_ignores_empty_cells() {
        assert_eq!(cell_balance(&[3900, 0, 4000, 3950]), 100);
        assert_eq!(cell_balance(&[0, 0]), 0);
        assert_eq!(cell_balance(&[]), 0);
    }

    #[test]
    fn test_v4_general_keeps_previous_empty_cell() {
        let mut frame = legacy_frame(SensorType::GeneralAir, V4_VARIANT);
        frame[16] = 40;
        frame[17] = 0;
        frame[18] = 41;
        frame[33..35].copy_from_slice(&100i16.to_le_bytes());
        frame[37] = 50;
        frame[40..42].copy_from_slice(&120i16.to_le_bytes());

        let mut previous = vec![0i32; 26];
        previous[7] = 39_000;
        let ctx = ctx_default().with_previous(&previous);
        let patch = decode(V4, SensorType::GeneralAir, &frame, &ctx).unwrap().unwrap();
        assert_eq!(patch.get(6), Some(40_000));
        assert_eq!(patch.get(7), None, "empty cell keeps its previous value");
        assert_eq!(patch.get(5), Some(2000 * 10), "balance over 39, 40 and 41");
        assert_eq!(patch.get(13), Some(100_000));
    }

    #[test]
    fn test_v4_general_implausible_keeps_only_strength() {
        let mut frame = legacy_frame(SensorType::GeneralAir, V4_VARIANT);
        frame[9] = 77;
        let patch = decode(V4, SensorType::GeneralAir, &frame, &ctx_default()).unwrap().unwrap();
        assert_eq!(patch.len(), 1);
        assert_eq!(patch.get(0), Some(77_000));
    }

    #[test]
    fn test_esc_temperature_jump_skips_measurements() {
        let mut frame = vec![0u8; 35];
        frame[0] = 0x39;
        frame[10..12].copy_from_slice(&120i16.to_le_bytes());
        frame[24..26].copy_from_slice(&30i16.to_le_bytes());

        let patch = decode(FAST, SensorType::Esc, &frame, &ctx_default()).unwrap().unwrap();
        assert_eq!(patch.get(6), Some(30_000));

        frame[3] = 90;
        let mut previous = vec![0i32; 30];
        previous[6] = 80_000;
        let ctx = ctx_default().with_previous(&previous);
        let patch = decode(FAST, SensorType::Esc, &frame, &ctx).unwrap().unwrap();
        assert_eq!(patch.get(6), None, "FET temperature drop of 50 degrees is a glitch");
        assert_eq!(patch.get(0), Some(90_000), "RXSQ still updates");
        assert_eq!(patch.len(), 1);
    }

    #[test]
    fn test_log_esc_implausible_keeps_rxsq_and_events() {
        let mut block = vec![0u8; LOG_BLOCK_SIZE];
        block[16] = 100;
        block[27] = 0x05;
        block[29..31].copy_from_slice(&2000i16.to_le_bytes());
        block[35] = 60;

        let patch = decode(LOG, SensorType::Esc, &block, &ctx_default()).unwrap().unwrap();
        assert_eq!(patch.get(0), Some(100_000));
        assert_eq!(patch.get(13), Some(5000), "event flags bypass the filter");
        assert_eq!(patch.get(1), None, "200 V is not a plausible ESC voltage");
        assert_eq!(patch.get(6), None);

        block[65] = 3;
        block[47..49].copy_from_slice(&42i16.to_le_bytes());
        let patch = decode(LOG, SensorType::Esc, &block, &ctx_default()).unwrap().unwrap();
        assert_eq!(patch.get(14), Some(42_000), "YGE extension bypasses the filter");
        assert_eq!(patch.get(29), Some(3000));
    }

    #[test]
    fn test_v4_esc_implausible_keeps_rxsq() {
        let mut frame = legacy_frame(SensorType::Esc, V4_VARIANT);
        frame[9] = 80;
        let patch = decode(V4, SensorType::Esc, &frame, &ctx_default()).unwrap().unwrap();
        assert_eq!(patch.len(), 1, "zero voltage fails the filter");
        assert_eq!(patch.get(0), Some(80_000));
    }

    #[test]
    fn test_log_esc_capacity_warm_up_boundary() {
        let mut block = vec![0u8; LOG_BLOCK_SIZE];
        block[29..31].copy_from_slice(&120i16.to_le_bytes());
        block[33..35].copy_from_slice(&500i16.to_le_bytes());
        block[35] = 60;

        let previous = vec![0i32; 30];
        let at = |samples| DecodeContext {
            sensor_samples: samples,
            previous: &previous,
            ..Default::default()
        };
        let patch = decode(LOG, SensorType::Esc, &block, &at(20)).unwrap().unwrap();
        assert_eq!(patch.get(3), Some(500_000), "20 earlier frames still warm up");
        let patch = decode(LOG, SensorType::Esc, &block, &at(21)).unwrap().unwrap();
        assert_eq!(patch.get(3), None);
    }

    #[test]
    fn test_servo_only_with_channels_enabled() {
        let mut frame = vec![0u8; 74];
        frame[0] = 0x40;
        frame[8..10].copy_from_slice(&800i16.to_le_bytes());

        let patch = decode(FAST, SensorType::ChannelsMonitor, &frame, &ctx_default()).unwrap().unwrap();
        assert!(patch.is_empty());

        let ctx = DecodeContext {
            channels_enabled: true,
            ..Default::default()
        };
        let patch = decode(FAST, SensorType::ChannelsMonitor, &frame, &ctx).unwrap().unwrap();
        assert_eq!(patch.get(3), Some(1_900_000));
        assert_eq!(patch.get(4), Some(1_500_000));
    }

    #[test]
    fn test_log_receiver() {
        let mut block = vec![0u8; LOG_BLOCK_SIZE];
        block[8] = (-40i8) as u8;
        block[9] = (-65i8) as u8;
        block[13] = 50;
        block[14] = 45;
        block[18..20].copy_from_slice(&3i16.to_le_bytes());

        let ctx = DecodeContext {
            loss_permille: 2000,
            ..Default::default()
        };
        let patch = decode(LOG, SensorType::Receiver, &block, &ctx).unwrap().unwrap();
        assert_eq!(patch.get(0), Some(2000));
        assert_eq!(patch.get(2), Some(50_000), "-65 dBm maps to 50 %");
        assert_eq!(patch.get(3), Some(3000));
        assert_eq!(patch.get(4), Some(40_000));
        assert_eq!(patch.get(5), Some(65_000));
        assert_eq!(patch.get(7), Some(25_000));
        assert_eq!(patch.get(9), Some(0));
    }

    #[test]
    fn test_rx_strength_bounds() {
        assert_eq!(log::rx_strength((-20i8) as u8), 100);
        assert_eq!(log::rx_strength((-100i8) as u8), 0);
        assert_eq!(log::rx_strength((-120i8) as u8), 0);
    }

    #[test]
    fn test_log_vario_sm_text() {
        let mut block = vec![0u8; LOG_BLOCK_SIZE];
        block[28..30].copy_from_slice(&620i16.to_le_bytes());
        block[34..36].copy_from_slice(&30_150u16.to_le_bytes());
        block[40..46].copy_from_slice(b" 12.34");
        block[47..53].copy_from_slice(b"xx.yy ");
        block[65] = 110;

        let patch = decode(LOG, SensorType::Vario, &block, &ctx_default()).unwrap().unwrap();
        assert_eq!(patch.get(1), Some(120_000));
        assert_eq!(patch.get(2), Some(1500));
        assert_eq!(patch.get(8), Some(12340));
        assert_eq!(patch.get(9), None, "non-numeric text field skipped");
        assert_eq!(patch.get(12), Some(110_000));
    }

    #[test]
    fn test_log_gps_sparrow_layout() {
        let mut block = vec![0u8; LOG_BLOCK_SIZE];
        block[50] = b'3';
        block[52..54].copy_from_slice(&600i16.to_le_bytes());
        block[54] = 75;
        block[55] = 12;
        block[56] = 30;
        block[57] = 15;
        block[58] = 50;
        block[65] = 4;

        let patch = decode(LOG, SensorType::Gps, &block, &ctx_default()).unwrap().unwrap();
        assert_eq!(patch.get(18), Some(7500));
        assert_eq!(patch.get(19), Some(12 * 10_000_000 + 30 * 100_000 + 15 * 1000 + 500));
        assert_eq!(patch.get(21), Some(100_000));
        assert_eq!(patch.get(23), Some(4000));
    }

    #[test]
    fn test_log_esc_yge_and_capacity_filter() {
        let mut block = vec![0u8; LOG_BLOCK_SIZE];
        block[29..31].copy_from_slice(&160i16.to_le_bytes());
        block[33..35].copy_from_slice(&900i16.to_le_bytes());
        block[35] = 60;
        block[37..39].copy_from_slice(&50i16.to_le_bytes());
        block[65] = 3;

        let ctx = DecodeContext {
            sensor_samples: 5,
            ..Default::default()
        };
        let patch = decode(LOG, SensorType::Esc2, &block, &ctx).unwrap().unwrap();
        assert_eq!(patch.get(3), Some(900_000), "capacity accepted during warm-up");
        assert_eq!(patch.get(6), Some(40_000));
        assert_eq!(patch.get(29), Some(3000));

        let mut previous = vec![0i32; 30];
        previous[3] = 100_000;
        let ctx = DecodeContext {
            sensor_samples: 50,
            previous: &previous,
            ..Default::default()
        };
        let patch = decode(LOG, SensorType::Esc2, &block, &ctx).unwrap().unwrap();
        assert_eq!(patch.get(3), None, "capacity jump from 100 to 900 mAh dropped");
        assert_eq!(patch.get(1), Some(160_000));
    }

    #[test]
    fn test_log_channels_dynamic_length() {
        let ctx = DecodeContext {
            channel_count: 8,
            ..Default::default()
        };
        let block = vec![0u8; LOG_BLOCK_SIZE + 8];
        assert_eq!(
            decode(LOG, SensorType::ChannelsMonitor, &block, &ctx),
            Some(Err(Rejected::TooShort {
                expected: LOG_BLOCK_SIZE + 16,
                actual: LOG_BLOCK_SIZE + 8
            }))
        );

        let mut block = vec![0u8; LOG_BLOCK_SIZE + 16];
        block[66..68].copy_from_slice(&3000u16.to_le_bytes());
        let patch = decode(LOG, SensorType::ChannelsMonitor, &block, &ctx).unwrap().unwrap();
        assert_eq!(patch.get(3), Some(1_500_000));
        assert_eq!(patch.get(11), None, "only configured channels decoded");
    }

    #[test]
    fn test_link_quality_only() {
        let mut block = vec![0u8; LOG_BLOCK_SIZE];
        block[8] = (-30i8) as u8;
        block[9] = (-50i8) as u8;
        let patch = link_quality_only(&block);
        assert_eq!(patch.get(4), Some(30_000));
        assert_eq!(patch.get(5), Some(50_000));
        assert_eq!(patch.len(), 2);
        assert!(link_quality_only(&[0u8; 4]).is_empty());
    }
}
