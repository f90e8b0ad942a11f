//! Byte-level port seam between [`super::LinkSession`] and the hardware
//!
//! The session only needs to write, flush, read whatever arrived and drop
//! stale input. Tests script those calls through [`mocks::MockSerialPort`].

use async_trait::async_trait;
use std::io;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{ClearBuffer, SerialPort, SerialStream};

/// Port operations used by a link session
#[async_trait]
pub trait SerialPortIO: Send {
    /// Write every byte of `data`
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    async fn flush(&mut self) -> io::Result<()>;

    /// Read whatever is available into `buf`, at least one byte
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Drop bytes waiting in the input buffer
    fn clear_input(&mut self) -> io::Result<()>;
}

/// Hardware port opened through `tokio-serial`
pub struct TokioSerialPort {
    stream: SerialStream,
}

impl TokioSerialPort {
    pub fn new(stream: SerialStream) -> Self {
        Self { stream }
    }
}

#[async_trait]
impl SerialPortIO for TokioSerialPort {
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        AsyncWriteExt::write_all(&mut self.stream, data).await
    }

    async fn flush(&mut self) -> io::Result<()> {
        AsyncWriteExt::flush(&mut self.stream).await
    }

    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        AsyncReadExt::read(&mut self.stream, buf).await
    }

    fn clear_input(&mut self) -> io::Result<()> {
        self.stream.clear(ClearBuffer::Input).map_err(io::Error::from)
    }
}
