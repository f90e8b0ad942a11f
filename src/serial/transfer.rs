//! # Bulk Transfer Commands
//!
//! SD card and model-data commands of the fast protocol, built on the same
//! command framing as the sensor queries.
//!
//! This module handles:
//! - Preparing the transmitter for file transfer and querying card sizes
//! - Directory listing with file dates and sizes
//! - SD card to host uploads in 2048 byte chunks, salvaging partial chunks
//! - Host to SD card downloads with size-acknowledged chunks
//! - File deletion, transmitter info and raw model-data read/write
//!
//! Every chunked operation polls the session interrupt flag between chunks
//! and reports progress through a callback after each chunk.

use std::io::Write;

use tracing::{debug, info, warn};

use super::port_trait::SerialPortIO;
use super::LinkSession;
use crate::error::{HottError, Result};
use crate::hott::command::{
    build_command, build_data_command, build_mdl_read, build_mdl_write, MDL_WRITE_FIRST_CHUNK_LEN,
};
use crate::hott::protocol::{opcode, FILE_CHUNK_SIZE, PARTIAL_CHUNK_ALIGNMENT};

/// Size of a plain command acknowledge
const ACK_LEN: usize = 9;

/// Acknowledge of a chunk request, before the chunk itself
const CHUNK_ACK_LEN: usize = 7;

/// Acknowledge of a downloaded chunk, carrying the accepted size
const DOWNLOAD_ACK_LEN: usize = 15;

const SD_SIZES_ANSWER_LEN: usize = 50;
const LIST_DIR_ANSWER_LEN: usize = 256;
const FILE_INFO_ANSWER_LEN: usize = 100;
const TX_INFO_ANSWER_LEN: usize = 100;
const MODEL_DATA_ANSWER_LEN: usize = 2057;
const MODEL_WRITE_ANSWER_LEN: usize = 11;

const PREPARE_RETRIES: usize = 10;
const QUERY_RETRIES: usize = 3;
const CHUNK_RETRIES: usize = 3;
const MODEL_DATA_ATTEMPTS: usize = 3;

/// SD card capacity in KiB
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SdCardSizes {
    pub total_kb: u64,
    pub free_kb: u64,
}

/// File entry of an SD card directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdFile {
    pub name: String,
    /// `yyyy-mm-dd`
    pub date: String,
    /// `hh:mm`
    pub time: String,
    pub size: u64,
}

/// Content of one SD card directory
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirListing {
    pub folders: Vec<String>,
    pub files: Vec<SdFile>,
}

/// Progress of a chunked transfer, reported after each chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    pub total: u64,
    pub remaining: u64,
}

impl TransferProgress {
    pub fn percent(&self) -> u64 {
        if self.total == 0 {
            return 100;
        }
        (self.total - self.remaining.min(self.total)) * 100 / self.total
    }
}

impl<P: SerialPortIO> LinkSession<P> {
    /// Send a command and read its fixed size answer
    async fn command(&mut self, op: [u8; 2], body: Option<&str>, answer_len: usize) -> Result<Vec<u8>> {
        let frame = build_command(op, body, self.sequence_mut());
        self.send_command(&frame).await?;
        let timeout = self.timing().read_timeout;
        let answer = self.read_answer(answer_len, timeout).await?;
        debug!("Answer to {:02X?}: {} bytes", op, answer.len());
        Ok(answer)
    }

    /// Switch the transmitter into file transfer mode and select the SD card
    ///
    /// Retried up to 10 times.
    pub async fn prepare_sd_card(&mut self) -> Result<()> {
        let mut retries = 0;
        loop {
            match self.try_prepare_sd_card().await {
                Ok(()) => return Ok(()),
                Err(e) if retries < PREPARE_RETRIES && e.is_recoverable() => {
                    retries += 1;
                    warn!("Preparing SD card failed: {}, retry {}", e, retries);
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn try_prepare_sd_card(&mut self) -> Result<()> {
        let gap = self.timing().query_gap;
        let timeout = self.timing().read_timeout;

        let frame = build_command(opcode::PREPARE_FILE_TRANSFER, None, self.sequence_mut());
        self.send_command(&frame).await?;
        tokio::time::sleep(gap).await;
        self.read_answer(ACK_LEN, timeout).await?;

        let frame = build_command(opcode::SELECT_SD_CARD, None, self.sequence_mut());
        self.send_command(&frame).await?;
        tokio::time::sleep(gap).await;
        self.read_answer(ACK_LEN + 1, timeout).await?;
        Ok(())
    }

    /// Total and free space of the SD card
    ///
    /// A card reporting an error status yields zero sizes.
    pub async fn query_sd_sizes(&mut self) -> Result<SdCardSizes> {
        let mut retries = 0;
        loop {
            match self.command(opcode::QUERY_SD_SIZES, None, SD_SIZES_ANSWER_LEN).await {
                Ok(answer) => {
                    if answer[6] == 0x02 {
                        warn!("SD card reports an error, check the card");
                        return Ok(SdCardSizes::default());
                    }
                    let sizes = SdCardSizes {
                        total_kb: hex_field(&answer[9..17])?,
                        free_kb: hex_field(&answer[21..29])?,
                    };
                    info!("SD card: {} KB total, {} KB free", sizes.total_kb, sizes.free_kb);
                    return Ok(sizes);
                }
                Err(e) if retries < QUERY_RETRIES && e.is_recoverable() => {
                    retries += 1;
                    warn!("Querying SD card sizes failed: {}, retry {}", e, retries);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// List folders and files of an SD card directory
    ///
    /// # Arguments
    ///
    /// * `dir` - Directory path with trailing slash (e.g., "/LogData/")
    ///
    /// # Returns
    ///
    /// * `Result<DirListing>` - Folders by name, files with date, time and size
    pub async fn list_dir(&mut self, dir: &str) -> Result<DirListing> {
        let mut retries = 0;
        loop {
            match self.try_list_dir(dir).await {
                Ok(listing) => return Ok(listing),
                Err(e) if retries < QUERY_RETRIES && e.is_recoverable() => {
                    retries += 1;
                    warn!("Listing {} failed: {}, retry {}", dir, e, retries);
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn try_list_dir(&mut self, dir: &str) -> Result<DirListing> {
        self.command(opcode::CHANGE_DIR, Some(dir), SD_SIZES_ANSWER_LEN).await?;

        let mut listing = DirListing::default();
        loop {
            self.check_interrupted()?;
            let answer = self.command(opcode::LIST_DIR, None, LIST_DIR_ANSWER_LEN).await?;
            match parse_dir_entry(&answer) {
                Some(DirEntry::Folder(name)) => listing.folders.push(name),
                Some(DirEntry::File { name, date, time }) => listing.files.push(SdFile {
                    name,
                    date,
                    time,
                    size: 0,
                }),
                None => {}
            }
            if answer[3] == 0x00 {
                break;
            }
        }

        for file in &mut listing.files {
            file.size = self.file_info(&format!("{}{}", dir, file.name)).await?;
        }

        debug!("{}: {} folders, {} files", dir, listing.folders.len(), listing.files.len());
        Ok(listing)
    }

    /// Size in bytes of a file on the SD card
    pub async fn file_info(&mut self, path: &str) -> Result<u64> {
        let mut retries = 0;
        loop {
            match self.command(opcode::FILE_INFO, Some(path), FILE_INFO_ANSWER_LEN).await {
                Ok(answer) => {
                    let size = u32::from_le_bytes([answer[7], answer[8], answer[9], answer[10]]);
                    tokio::time::sleep(self.timing().command_gap).await;
                    return Ok(size as u64);
                }
                Err(e) if retries < QUERY_RETRIES && e.is_recoverable() => {
                    retries += 1;
                    warn!("File info of {} failed: {}, retry {}", path, e, retries);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Delete files of one SD card directory
    pub async fn delete_files(&mut self, dir: &str, files: &[&str]) -> Result<()> {
        for file in files {
            self.check_interrupted()?;
            let path = format!("{}{}", dir, file);
            self.command(opcode::FILE_DELETE, Some(&path), ACK_LEN).await?;
            info!("Deleted {}", path);
        }
        Ok(())
    }

    /// Copy a file from the SD card to the host
    ///
    /// Full chunks are requested while more than 2048 bytes remain. A chunk
    /// that times out after at least 64 bytes is salvaged up to its last
    /// 64 byte boundary and counted as transferred; each chunk may fail up
    /// to three times before the timeout is returned.
    ///
    /// # Arguments
    ///
    /// * `dir` - SD card directory with trailing slash
    /// * `name` - File name
    /// * `out` - Destination of the file content
    /// * `progress` - Called after each chunk
    ///
    /// # Returns
    ///
    /// * `Result<u64>` - Bytes written to `out`
    ///
    /// # Errors
    ///
    /// * [`HottError::Timeout`] when a chunk keeps timing out
    /// * [`HottError::Protocol`] when the card keeps refusing a chunk
    /// * [`HottError::Interrupted`] when the interrupt flag is set between chunks
    pub async fn upload_file<W, F>(&mut self, dir: &str, name: &str, out: &mut W, mut progress: F) -> Result<u64>
    where
        W: Write,
        F: FnMut(TransferProgress),
    {
        let path = format!("{}{}", dir, name);
        let total = self.file_info(&path).await?;
        info!("Uploading {} ({} bytes)", path, total);

        self.command(opcode::FILE_XFER_INIT, Some(&format!("0x01 {}", path)), ACK_LEN).await?;

        let transfer_timeout = self.timing().transfer_timeout;
        let mut remaining = total;
        let mut written = 0u64;
        let mut retries = 0;

        while remaining > FILE_CHUNK_SIZE as u64 {
            if let Err(e) = self.check_interrupted() {
                self.close_transfer().await?;
                return Err(e);
            }

            let request = format!("0x{:04x}", FILE_CHUNK_SIZE);
            let accepted = match self.command(opcode::FILE_UPLOAD, Some(&request), CHUNK_ACK_LEN).await {
                Ok(ack) => ack[5] == 0x06 && ack[6] == 0x01,
                Err(e) if e.is_recoverable() => false,
                Err(e) => return Err(e),
            };
            if !accepted {
                retries += 1;
                if retries > CHUNK_RETRIES {
                    return Err(HottError::Protocol(format!("{}: chunk request refused", name)));
                }
                continue;
            }

            let mut chunk = vec![0u8; FILE_CHUNK_SIZE + 2];
            let received = self.read_into(&mut chunk, transfer_timeout).await;
            if received == chunk.len() {
                out.write_all(&chunk[..FILE_CHUNK_SIZE])?;
                written += FILE_CHUNK_SIZE as u64;
                remaining -= FILE_CHUNK_SIZE as u64;
                retries = 0;
                progress(TransferProgress { total, remaining });
                continue;
            }

            if received >= PARTIAL_CHUNK_ALIGNMENT {
                let keep = salvage_len(&chunk[..received]);
                warn!("{}: write only {} bytes instead of {}", name, keep, FILE_CHUNK_SIZE);
                out.write_all(&chunk[..keep])?;
                written += keep as u64;
                remaining -= FILE_CHUNK_SIZE as u64;
                progress(TransferProgress { total, remaining });
            }
            retries += 1;
            if retries > CHUNK_RETRIES {
                return Err(HottError::Timeout {
                    expected: FILE_CHUNK_SIZE + 2,
                    received,
                });
            }
        }

        let last = remaining as usize;
        let request = format!("0x{:04x}", last);
        self.command(opcode::FILE_UPLOAD, Some(&request), CHUNK_ACK_LEN).await?;
        let read_timeout = self.timing().read_timeout;
        let chunk = self.read_answer(last + 2, read_timeout).await?;
        out.write_all(&chunk[..last])?;
        written += last as u64;
        out.flush()?;

        self.close_transfer().await?;
        progress(TransferProgress { total, remaining: 0 });
        info!("Uploaded {} ({} bytes written)", path, written);
        Ok(written)
    }

    /// Copy host data into a file on the SD card
    ///
    /// The target file is created, closed and reopened for writing. Each
    /// chunk acknowledge carries the number of bytes the card accepted; the
    /// next chunk starts after them.
    ///
    /// # Arguments
    ///
    /// * `dir` - SD card directory with trailing slash
    /// * `name` - File name
    /// * `data` - File content
    /// * `progress` - Called after each chunk
    pub async fn download_file<F>(&mut self, dir: &str, name: &str, data: &[u8], mut progress: F) -> Result<()>
    where
        F: FnMut(TransferProgress),
    {
        let path = format!("{}{}", dir, name);
        let total = data.len() as u64;
        info!("Downloading {} ({} bytes)", path, total);

        self.command(opcode::FILE_XFER_INIT, Some(&format!("0x0b {}", path)), ACK_LEN).await?;
        self.close_transfer().await?;
        self.command(opcode::FILE_XFER_INIT, Some(&format!("0x02 {}", path)), ACK_LEN).await?;

        let read_timeout = self.timing().read_timeout;
        let mut offset = 0usize;
        let mut retries = 0;

        while data.len() - offset > FILE_CHUNK_SIZE {
            if let Err(e) = self.check_interrupted() {
                self.close_transfer().await?;
                return Err(e);
            }

            let chunk = &data[offset..offset + FILE_CHUNK_SIZE];
            let frame = build_data_command(opcode::FILE_DOWNLOAD, chunk, self.sequence_mut());
            self.send_command(&frame).await?;

            let accepted = match self.read_answer(DOWNLOAD_ACK_LEN, read_timeout).await {
                Ok(ack) if ack[5] == 0x06 && ack[6] == 0x01 => accepted_size(&ack, chunk.len()),
                Ok(_) => None,
                Err(e) if e.is_recoverable() => None,
                Err(e) => return Err(e),
            };
            let Some(accepted) = accepted else {
                retries += 1;
                if retries > CHUNK_RETRIES {
                    return Err(HottError::Protocol(format!("{}: chunk at {} refused", name, offset)));
                }
                continue;
            };

            offset += accepted;
            retries = 0;
            progress(TransferProgress {
                total,
                remaining: (data.len() - offset) as u64,
            });
        }

        let frame = build_data_command(opcode::FILE_DOWNLOAD, &data[offset..], self.sequence_mut());
        self.send_command(&frame).await?;
        self.read_answer(DOWNLOAD_ACK_LEN, read_timeout).await?;

        self.close_transfer().await?;
        progress(TransferProgress { total, remaining: 0 });
        info!("Downloaded {}", path);
        Ok(())
    }

    async fn close_transfer(&mut self) -> Result<()> {
        self.command(opcode::FILE_XFER_CLOSE, None, ACK_LEN).await?;
        Ok(())
    }

    /// Transmitter type name (e.g., "mx-20"), queried twice at most
    pub async fn query_tx_info(&mut self) -> Result<String> {
        let answer = match self.command(opcode::QUERY_TX_INFO, None, TX_INFO_ANSWER_LEN).await {
            Ok(answer) => answer,
            Err(e) => {
                warn!("Transmitter info query failed: {}, retrying", e);
                self.command(opcode::QUERY_TX_INFO, None, TX_INFO_ANSWER_LEN).await?
            }
        };
        let name = transmitter_name(&answer);
        info!("Transmitter: {}", name);
        Ok(name)
    }

    /// Raw model-data read, retried on timeout
    ///
    /// Only the framed transfer is handled; the answer is returned as is.
    pub async fn read_model_data(&mut self, request: &[u8]) -> Result<Vec<u8>> {
        let timeout = self.timing().read_timeout;
        let mut attempt = 1;
        loop {
            let frame = build_mdl_read(request, self.sequence_mut());
            self.send_command(&frame).await?;
            match self.read_answer(MODEL_DATA_ANSWER_LEN, timeout).await {
                Ok(answer) => return Ok(answer),
                Err(e @ HottError::Timeout { .. }) if attempt < MODEL_DATA_ATTEMPTS => {
                    warn!("Model data read timed out ({}), attempt {}", e, attempt);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Raw model-data write at `position`, returning the acknowledge
    pub async fn write_model_data(&mut self, position: u16, data: &[u8]) -> Result<Vec<u8>> {
        let frame = build_mdl_write(position, data, self.sequence_mut());
        self.send_split(&frame, MDL_WRITE_FIRST_CHUNK_LEN).await?;
        let timeout = self.timing().read_timeout;
        self.read_answer(MODEL_WRITE_ANSWER_LEN, timeout).await
    }
}

/// Parse an ASCII hex field (e.g., SD card sizes)
fn hex_field(bytes: &[u8]) -> Result<u64> {
    let text = std::str::from_utf8(bytes)
        .map_err(|_| HottError::Protocol(format!("non-ASCII size field {:02X?}", bytes)))?;
    u64::from_str_radix(text.trim(), 16)
        .map_err(|e| HottError::Protocol(format!("invalid size field {:?}: {}", text, e)))
}

#[derive(Debug, PartialEq, Eq)]
enum DirEntry {
    Folder(String),
    File { name: String, date: String, time: String },
}

/// Interpret one LIST_DIR answer; names with a dot are files
fn parse_dir_entry(answer: &[u8]) -> Option<DirEntry> {
    if answer.len() < 21 {
        return None;
    }
    let content: String = answer[19..answer.len() - 2]
        .iter()
        .take_while(|&&b| b != 0)
        .map(|&b| b as char)
        .collect();
    let content = content.trim();
    if content.is_empty() {
        return None;
    }

    if content.find('.').is_some_and(|dot| dot > 0) {
        let c = |i: usize| answer[i] as char;
        Some(DirEntry::File {
            name: content.to_string(),
            date: format!("20{}{}-{}{}-{}{}", c(9), c(10), c(11), c(12), c(13), c(14)),
            time: format!("{}{}:{}{}", c(15), c(16), c(17), c(18)),
        })
    } else {
        Some(DirEntry::Folder(content.to_string()))
    }
}

/// Length of a partial chunk worth keeping
///
/// Cut at the last non-zero byte, rounded down to a 64 byte boundary.
pub fn salvage_len(data: &[u8]) -> usize {
    (1..data.len())
        .rev()
        .find(|&i| data[i] != 0)
        .map(|i| i - i % PARTIAL_CHUNK_ALIGNMENT)
        .unwrap_or(0)
}

/// Accepted size from a download acknowledge, bounded by the chunk length
fn accepted_size(ack: &[u8], chunk_len: usize) -> Option<usize> {
    let text = std::str::from_utf8(&ack[9..13]).ok()?;
    match usize::from_str_radix(text, 16) {
        Ok(0) | Err(_) => None,
        Ok(size) => Some(size.min(chunk_len)),
    }
}

fn transmitter_name(answer: &[u8]) -> String {
    let end = answer.len().min(35);
    answer[23.min(end)..end]
        .iter()
        .map(|&b| b as char)
        .take_while(|&c| c != ' ' && c != '\0')
        .collect::<String>()
        .to_lowercase()
}
