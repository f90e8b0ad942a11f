//! # Serial Communication Module
//!
//! Drives the query/answer cycle against a HoTT device over a serial port.
//!
//! This module handles:
//! - Opening the serial port at the protocol variant's baud rate
//! - Legacy (echo + begin/end marker) and fast (command + CRC16) query cycles
//! - Slave-mode resynchronization of rotated answers
//! - Optional receiver signal strength queries and their cache
//! - The bounded error budget and the single timeout retry
//! - Bulk SD card and model-data transfers (see [`transfer`])

pub mod monitor;
pub mod port_trait;
pub mod transfer;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{HottError, Result};
use crate::hott::command::{build_command, SequenceCounter, FIRST_CHUNK_LEN};
use crate::hott::crc::verify_checksum;
use crate::hott::protocol::{
    ProtocolVariant, SensorType, ADDRESS_QUERY, CMD_GAP_MS, DATA_BEGIN, DATA_END,
    DBM_TIMEOUT_MS, ECHO_GAP_MS, QUERY_GAP_MS, QUERY_RECEIVER_SIGNAL, QUERY_SENSOR_DATA,
    READ_TIMEOUT_MS, RECEIVER_SIGNAL_ANSWER_SIZE, TRANSFER_ERROR_BUDGET, TRANSFER_TIMEOUT_MS,
};
use port_trait::{SerialPortIO, TokioSerialPort};

/// Default HoTT adapter device paths to try (in order of preference)
const DEFAULT_DEVICE_PATHS: &[&str] = &[
    "/dev/ttyUSB0", // USB-to-serial adapters
    "/dev/ttyACM0", // USB CDC devices
];

/// Receiver signal queries per cycle before giving up
const DBM_QUERY_ATTEMPTS: usize = 5;

/// Signed dBm samples of the transmitter in a signal answer
const TX_DBM_RANGE: std::ops::Range<usize> = 82..157;

/// Signed dBm samples of the receiver in a signal answer
const RX_DBM_RANGE: std::ops::Range<usize> = 157..232;

/// Delays and timeouts of one session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkTiming {
    pub read_timeout: Duration,
    pub dbm_timeout: Duration,
    pub transfer_timeout: Duration,
    pub query_gap: Duration,
    pub command_gap: Duration,
    pub echo_gap: Duration,
}

impl Default for LinkTiming {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_millis(READ_TIMEOUT_MS),
            dbm_timeout: Duration::from_millis(DBM_TIMEOUT_MS),
            transfer_timeout: Duration::from_millis(TRANSFER_TIMEOUT_MS),
            query_gap: Duration::from_millis(QUERY_GAP_MS),
            command_gap: Duration::from_millis(CMD_GAP_MS),
            echo_gap: Duration::from_millis(ECHO_GAP_MS),
        }
    }
}

impl LinkTiming {
    pub fn from_config(config: &Config) -> Self {
        Self {
            read_timeout: Duration::from_millis(config.serial.read_timeout_ms),
            dbm_timeout: Duration::from_millis(config.serial.dbm_timeout_ms),
            transfer_timeout: Duration::from_millis(config.serial.transfer_timeout_ms),
            query_gap: Duration::from_millis(config.link.query_gap_ms),
            command_gap: Duration::from_millis(config.link.command_gap_ms),
            echo_gap: Duration::from_millis(config.link.echo_gap_ms),
        }
    }

    /// No gaps, for scripted ports
    pub fn immediate() -> Self {
        Self {
            query_gap: Duration::ZERO,
            command_gap: Duration::ZERO,
            echo_gap: Duration::ZERO,
            ..Self::default()
        }
    }
}

/// Session settings fixed at open time
#[derive(Debug, Clone, Copy)]
pub struct LinkSettings {
    pub variant: ProtocolVariant,
    pub slave_mode: bool,
    pub query_dbm: bool,
    pub error_budget: u32,
    pub timing: LinkTiming,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            variant: ProtocolVariant::Fast115200,
            slave_mode: false,
            query_dbm: false,
            error_budget: TRANSFER_ERROR_BUDGET,
            timing: LinkTiming::default(),
        }
    }
}

impl LinkSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            variant: config.link.variant,
            slave_mode: config.link.slave_mode,
            query_dbm: config.link.query_dbm,
            error_budget: config.link.error_budget,
            timing: LinkTiming::from_config(config),
        }
    }
}

/// HoTT link session
///
/// Owns the serial channel, the command sequence counters, the transfer
/// error counter and the receiver signal cache. One session per port.
pub struct LinkSession<P: SerialPortIO = TokioSerialPort> {
    /// Serial port handle
    port: P,
    /// Device path (e.g., /dev/ttyUSB0)
    device_path: String,
    settings: LinkSettings,
    sequence: SequenceCounter,
    error_count: u32,
    /// Last receiver frame carrying signal strength values
    receiver_cache: Option<Vec<u8>>,
    interrupted: Arc<AtomicBool>,
}

impl<P: SerialPortIO> std::fmt::Debug for LinkSession<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkSession")
            .field("device_path", &self.device_path)
            .field("variant", &self.settings.variant)
            .field("error_count", &self.error_count)
            .finish_non_exhaustive()
    }
}

impl LinkSession<TokioSerialPort> {
    /// Open the port named in the configuration
    ///
    /// # Returns
    ///
    /// * `Result<LinkSession>` - Connected session or error
    ///
    /// # Errors
    ///
    /// Returns error if the port cannot be opened
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use hott_link::config::Config;
    /// use hott_link::serial::LinkSession;
    ///
    /// let config = Config::default();
    /// let session = LinkSession::open(&config)?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn open(config: &Config) -> Result<Self> {
        let baud_rate = config.serial.effective_baud_rate(config.link.variant);
        Self::open_with_paths(&[config.serial.port.as_str()], baud_rate, LinkSettings::from_config(config))
    }

    /// Open the first usable default device path
    pub fn open_default(settings: LinkSettings) -> Result<Self> {
        Self::open_with_paths(DEFAULT_DEVICE_PATHS, settings.variant.baud_rate(), settings)
    }

    /// Open a session on the first path that can be opened
    ///
    /// # Arguments
    ///
    /// * `paths` - Device paths to try (e.g., &["/dev/ttyUSB0"])
    /// * `baud_rate` - Line speed
    /// * `settings` - Variant, slave mode and timing
    pub fn open_with_paths(paths: &[&str], baud_rate: u32, settings: LinkSettings) -> Result<Self> {
        for path in paths {
            debug!("Trying to open serial port: {}", path);

            match Self::open_port(path, baud_rate) {
                Ok(port) => {
                    info!("Opened HoTT adapter at {} ({} baud, protocol {})", path, baud_rate, settings.variant);
                    return Ok(LinkSession::new(TokioSerialPort::new(port), path, settings));
                }
                Err(e) => {
                    warn!("Failed to open {}: {}", path, e);
                    continue;
                }
            }
        }

        Err(HottError::SerialPortNotFound(paths.join(", ")))
    }

    /// Open a specific serial port, 8N1 without flow control
    fn open_port(path: &str, baud_rate: u32) -> Result<tokio_serial::SerialStream> {
        let port = tokio_serial::new(path, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| HottError::Serial(format!("Failed to open {}: {}", path, e)))?;

        Ok(port)
    }
}

impl<P: SerialPortIO> LinkSession<P> {
    /// Wrap an already opened port
    pub fn new(port: P, device_path: &str, settings: LinkSettings) -> Self {
        Self {
            port,
            device_path: device_path.to_string(),
            settings,
            sequence: SequenceCounter::new(),
            error_count: 0,
            receiver_cache: None,
            interrupted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Get the device path of the opened serial port
    pub fn device_path(&self) -> &str {
        &self.device_path
    }

    pub fn variant(&self) -> ProtocolVariant {
        self.settings.variant
    }

    pub fn settings(&self) -> &LinkSettings {
        &self.settings
    }

    /// Transfer errors counted so far in this session
    pub fn error_count(&self) -> u32 {
        self.error_count
    }

    /// Flag polled between cycles and transfer chunks
    ///
    /// Setting it makes the next poll fail with [`HottError::Interrupted`].
    pub fn interrupt_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupted)
    }

    fn check_interrupted(&self) -> Result<()> {
        if self.interrupted.load(Ordering::Relaxed) {
            return Err(HottError::Interrupted);
        }
        Ok(())
    }

    /// Query one sensor and return its validated frame
    ///
    /// Invalid frames (markers or checksum) count against the session error
    /// budget and the cycle is repeated after the query gap. A timeout is
    /// retried once; a second consecutive timeout is returned.
    ///
    /// # Arguments
    ///
    /// * `sensor` - Sensor to query; the receiver is always available
    ///
    /// # Returns
    ///
    /// * `Result<Vec<u8>>` - Frame in the variant's layout: `[0x80, sensor, answer..]`
    ///   for legacy, `[sensor, answer..]` for fast
    ///
    /// # Errors
    ///
    /// * [`HottError::Timeout`] after two consecutive timeouts
    /// * [`HottError::TransferErrorBudgetExceeded`] once the error counter passes the budget
    /// * [`HottError::Protocol`] if the sensor has no query byte in this variant
    /// * [`HottError::Interrupted`] if the interrupt flag is set
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use hott_link::config::Config;
    /// use hott_link::hott::protocol::SensorType;
    /// use hott_link::serial::LinkSession;
    ///
    /// #[tokio::main]
    /// async fn main() -> anyhow::Result<()> {
    ///     let mut session = LinkSession::open(&Config::default())?;
    ///     let frame = session.query_sensor(SensorType::Receiver).await?;
    ///     println!("{:02X?}", frame);
    ///     Ok(())
    /// }
    /// ```
    pub async fn query_sensor(&mut self, sensor: SensorType) -> Result<Vec<u8>> {
        let wire_byte = sensor.wire_byte(self.settings.variant).ok_or_else(|| {
            HottError::Protocol(format!(
                "{} has no query byte in protocol {}",
                sensor, self.settings.variant
            ))
        })?;
        let answer_len = sensor
            .answer_length(self.settings.variant, self.settings.slave_mode)
            .ok_or_else(|| HottError::Protocol(format!("{} has no answer length", sensor)))?;

        let mut timed_out = false;
        loop {
            self.check_interrupted()?;

            let attempt = if self.settings.variant.is_legacy() {
                self.legacy_cycle(wire_byte, answer_len).await
            } else {
                self.fast_cycle(wire_byte, answer_len).await
            };

            match attempt {
                Ok(mut frame) => {
                    if self.settings.query_dbm && !self.settings.variant.is_legacy() {
                        self.apply_signal_strength(sensor, &mut frame).await;
                    }
                    debug!("{} frame ({} bytes)", sensor, frame.len());
                    return Ok(frame);
                }
                Err(e @ HottError::Timeout { .. }) => {
                    if timed_out {
                        return Err(e);
                    }
                    timed_out = true;
                    warn!("{} query failed: {}, retrying", sensor, e);
                }
                Err(e) if e.is_recoverable() => {
                    timed_out = false;
                    self.count_transfer_error()?;
                    warn!("{} frame invalid ({}), error {} of {}", sensor, e, self.error_count, self.settings.error_budget);
                }
                Err(e) => return Err(e),
            }

            tokio::time::sleep(self.settings.timing.query_gap).await;
        }
    }

    fn count_transfer_error(&mut self) -> Result<()> {
        self.error_count += 1;
        if self.error_count > self.settings.error_budget {
            error!(
                "Transfer error budget exceeded ({} errors), session must be reopened",
                self.error_count
            );
            return Err(HottError::TransferErrorBudgetExceeded(self.error_count));
        }
        Ok(())
    }

    /// One legacy cycle: address query, sensor byte, answer
    async fn legacy_cycle(&mut self, wire_byte: u8, answer_len: usize) -> Result<Vec<u8>> {
        if self.settings.slave_mode {
            let timeout = self.settings.timing.read_timeout;
            let mut answer = self.read_answer(answer_len, timeout).await?;
            if !sync_answer(&mut answer) {
                warn!("No begin marker in slave answer of {} bytes", answer.len());
            }
            validate_legacy_frame(&answer)?;
            return Ok(answer);
        }

        self.port
            .clear_input()
            .map_err(|e| HottError::Serial(format!("Failed to clear input: {}", e)))?;

        self.write(&[ADDRESS_QUERY]).await?;
        self.read_echo().await;
        tokio::time::sleep(self.settings.timing.echo_gap).await;
        self.write(&[wire_byte]).await?;
        self.read_echo().await;

        let timeout = self.settings.timing.read_timeout;
        let answer = self.read_answer(answer_len, timeout).await?;

        let mut frame = Vec::with_capacity(answer_len + 2);
        frame.push(ADDRESS_QUERY);
        frame.push(wire_byte);
        frame.extend_from_slice(&answer);
        validate_legacy_frame(&frame)?;
        Ok(frame)
    }

    /// Single-wire buses echo every written byte; a missing echo is tolerated
    async fn read_echo(&mut self) {
        let timeout = self.settings.timing.read_timeout;
        if let Err(e) = self.read_answer(1, timeout).await {
            warn!("Echo not received: {}", e);
        }
    }

    /// One fast cycle: command frame, CRC checked answer
    async fn fast_cycle(&mut self, wire_byte: u8, answer_len: usize) -> Result<Vec<u8>> {
        let command = build_command([QUERY_SENSOR_DATA, wire_byte], None, &mut self.sequence);
        self.send_command(&command).await?;

        let timeout = self.settings.timing.read_timeout;
        let answer = self.read_answer(answer_len, timeout).await?;
        validate_fast_answer(&answer)?;

        let mut frame = Vec::with_capacity(answer_len + 1);
        frame.push(wire_byte);
        frame.extend_from_slice(&answer);
        Ok(frame)
    }

    /// Fill the link quality bytes of a fast frame from the signal query
    ///
    /// The receiver frame gets fresh RX/TX dBm means and is cached; frames
    /// of other sensors copy the link bytes from the cached receiver frame.
    async fn apply_signal_strength(&mut self, sensor: SensorType, frame: &mut [u8]) {
        if sensor != SensorType::Receiver {
            if let Some(cache) = &self.receiver_cache {
                if cache.len() > 17 && frame.len() > 5 {
                    frame[3] = cache[17];
                    frame[4] = cache[15];
                    frame[5] = cache[10];
                }
            }
            return;
        }

        for attempt in 1..=DBM_QUERY_ATTEMPTS {
            match self.query_signal().await {
                Ok(answer) => {
                    let (rx, tx) = signal_means(&answer);
                    debug!("Signal strength: RX {} dBm, TX {} dBm", rx, tx);
                    if frame.len() > 5 {
                        frame[4] = rx as u8;
                        frame[5] = tx as u8;
                    }
                    self.receiver_cache = Some(frame.to_vec());
                    return;
                }
                Err(e) => debug!("Signal query attempt {} failed: {}", attempt, e),
            }
        }
        warn!("No valid signal answer after {} attempts", DBM_QUERY_ATTEMPTS);
    }

    async fn query_signal(&mut self) -> Result<Vec<u8>> {
        let command = build_command([QUERY_SENSOR_DATA, QUERY_RECEIVER_SIGNAL], None, &mut self.sequence);
        self.send_command(&command).await?;
        let timeout = self.settings.timing.dbm_timeout;
        let answer = self.read_answer(RECEIVER_SIGNAL_ANSWER_SIZE, timeout).await?;
        if !verify_checksum(&answer, 3) {
            return Err(HottError::ChecksumMismatch);
        }
        Ok(answer)
    }

    /// Write a command frame split after the header, with command gaps
    pub(crate) async fn send_command(&mut self, frame: &[u8]) -> Result<()> {
        self.send_split(frame, FIRST_CHUNK_LEN).await
    }

    pub(crate) async fn send_split(&mut self, frame: &[u8], first_len: usize) -> Result<()> {
        let split = first_len.min(frame.len());
        let gap = self.settings.timing.command_gap;

        self.write(&frame[..split]).await?;
        tokio::time::sleep(gap).await;
        if split < frame.len() {
            self.write(&frame[split..]).await?;
        }
        tokio::time::sleep(gap).await;
        Ok(())
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        self.port
            .write_all(data)
            .await
            .map_err(|e| HottError::Serial(format!("Failed to write {} bytes: {}", data.len(), e)))?;
        self.port
            .flush()
            .await
            .map_err(|e| HottError::Serial(format!("Failed to flush serial port: {}", e)))?;
        Ok(())
    }

    /// Read exactly `len` bytes within `timeout`
    ///
    /// # Errors
    ///
    /// Returns [`HottError::Timeout`] with the number of bytes that did
    /// arrive when the read does not complete in time.
    pub(crate) async fn read_answer(&mut self, len: usize, timeout: Duration) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        let received = self.read_into(&mut buf, timeout).await;
        if received < len {
            return Err(HottError::Timeout { expected: len, received });
        }
        Ok(buf)
    }

    /// Fill `buf` until it is full, the timeout expires or the port fails
    ///
    /// Returns the number of bytes received.
    pub(crate) async fn read_into(&mut self, buf: &mut [u8], timeout: Duration) -> usize {
        let mut received = 0;
        let port = &mut self.port;
        let filled = tokio::time::timeout(timeout, async {
            while received < buf.len() {
                match port.read(&mut buf[received..]).await {
                    Ok(0) => break,
                    Ok(n) => received += n,
                    Err(e) => {
                        debug!("Read stopped after {} of {} bytes: {}", received, buf.len(), e);
                        break;
                    }
                }
            }
        })
        .await;

        if filled.is_err() {
            debug!("Read timed out after {:?}", timeout);
        }
        received
    }

    pub(crate) fn sequence_mut(&mut self) -> &mut SequenceCounter {
        &mut self.sequence
    }

    pub(crate) fn timing(&self) -> LinkTiming {
        self.settings.timing
    }
}

/// Rotate a slave-mode answer so its begin marker sits at offset 2
///
/// Returns false when no usable begin marker was found; the buffer is then
/// left unchanged.
pub fn sync_answer(answer: &mut [u8]) -> bool {
    let len = answer.len();
    if len < 3 {
        return false;
    }
    if answer[2] == DATA_BEGIN && answer[len - 2] == DATA_END {
        return true;
    }
    match answer.iter().position(|&b| b == DATA_BEGIN) {
        Some(index) if index >= 2 => {
            answer.rotate_left(index - 2);
            true
        }
        _ => false,
    }
}

/// Check the begin/end markers of a legacy frame
pub fn validate_legacy_frame(frame: &[u8]) -> Result<()> {
    let len = frame.len();
    if len >= 4 && frame[2] == DATA_BEGIN && frame[len - 2] == DATA_END {
        return Ok(());
    }
    let actual = frame
        .iter()
        .rposition(|&b| b == DATA_END)
        .map(|end| end + 2)
        .unwrap_or(0);
    Err(HottError::FrameLengthMismatch { expected: len, actual })
}

/// Check the header and trailing CRC16 of a fast answer
pub fn validate_fast_answer(answer: &[u8]) -> Result<()> {
    let header_ok = answer.len() > 8
        && answer[0] == 0x00
        && answer[4] == 0x00
        && answer[5] == QUERY_SENSOR_DATA
        && answer[6] == 0x01;
    if !header_ok {
        return Err(HottError::FrameLengthMismatch {
            expected: answer.len(),
            actual: 0,
        });
    }
    if !verify_checksum(answer, 3) {
        return Err(HottError::ChecksumMismatch);
    }
    Ok(())
}

/// Mean receiver and transmitter dBm of a signal answer
pub fn signal_means(answer: &[u8]) -> (i32, i32) {
    let mean = |range: std::ops::Range<usize>| {
        let values = answer.get(range).unwrap_or_default();
        if values.is_empty() {
            return 0;
        }
        values.iter().map(|&b| b as i8 as i32).sum::<i32>() / values.len() as i32
    };
    (mean(RX_DBM_RANGE), mean(TX_DBM_RANGE))
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::hott::crc::crc16_ccitt;
    use port_trait::mocks::MockSerialPort;

    pub fn session(port: &MockSerialPort, variant: ProtocolVariant) -> LinkSession<MockSerialPort> {
        let settings = LinkSettings {
            variant,
            timing: LinkTiming::immediate(),
            ..LinkSettings::default()
        };
        LinkSession::new(port.clone(), "/dev/mock", settings)
    }

    /// Append a valid CRC over `body[3..]`
    pub fn with_crc(mut body: Vec<u8>) -> Vec<u8> {
        let crc = crc16_ccitt(&body, 3, body.len() - 3);
        body.push((crc & 0xFF) as u8);
        body.push((crc >> 8) as u8);
        body
    }

    /// Fast answer of `len` bytes with a valid header and CRC
    pub fn fast_answer(len: usize, fill: u8) -> Vec<u8> {
        let mut body = vec![fill; len - 2];
        body[0] = 0x00;
        body[4] = 0x00;
        body[5] = QUERY_SENSOR_DATA;
        body[6] = 0x01;
        with_crc(body)
    }

    /// Legacy answer (without address and sensor byte) of `len` bytes
    pub fn legacy_answer(len: usize) -> Vec<u8> {
        let mut answer = vec![0u8; len];
        answer[0] = DATA_BEGIN;
        answer[len - 2] = DATA_END;
        answer
    }
}
