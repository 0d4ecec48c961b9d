//! Serial transport abstraction
//!
//! The engine talks to a scale through [`ScaleLink`], opened by a
//! [`LinkOpener`]. The real implementation sits on the `serialport` crate;
//! simulated scales implement the same traits. Dropping a link closes it.

use std::io::{self, Read, Write};
use std::ops::{Deref, DerefMut};
use std::time::Duration;

use serialport::{ClearBuffer, SerialPort};
use tracing::{trace, warn};

use crate::error::DetectError;
use crate::params::SerialParams;

/// An open, bidirectional connection to a scale
pub trait ScaleLink: Send {
    /// Number of bytes waiting in the input buffer
    ///
    /// Also serves as the liveness check: an error means the device is gone.
    fn bytes_to_read(&mut self) -> io::Result<usize>;

    /// Read up to `buf.len()` bytes, returning 0 when the timeout elapses
    fn read_bytes(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write a complete command
    fn write_bytes(&mut self, data: &[u8]) -> io::Result<()>;

    /// Discard pending input
    fn clear_input(&mut self) -> io::Result<()>;

    /// Discard pending output
    fn clear_output(&mut self) -> io::Result<()>;

    /// Current read timeout
    fn timeout(&self) -> Duration;

    /// Change the read timeout
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()>;
}

/// Opens links for a port name and parameter set
pub trait LinkOpener {
    /// Open `port` with `params`
    fn open(&self, port: &str, params: &SerialParams) -> Result<Box<dyn ScaleLink>, DetectError>;
}

/// [`ScaleLink`] over a native serial port
pub struct SerialLink {
    port: Box<dyn SerialPort>,
}

impl SerialLink {
    /// Wrap an already opened port
    pub fn new(port: Box<dyn SerialPort>) -> Self {
        Self { port }
    }
}

impl ScaleLink for SerialLink {
    fn bytes_to_read(&mut self) -> io::Result<usize> {
        Ok(self.port.bytes_to_read()? as usize)
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.port.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn write_bytes(&mut self, data: &[u8]) -> io::Result<()> {
        self.port.write_all(data)?;
        self.port.flush()
    }

    fn clear_input(&mut self) -> io::Result<()> {
        Ok(self.port.clear(ClearBuffer::Input)?)
    }

    fn clear_output(&mut self) -> io::Result<()> {
        Ok(self.port.clear(ClearBuffer::Output)?)
    }

    fn timeout(&self) -> Duration {
        self.port.timeout()
    }

    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        Ok(self.port.set_timeout(timeout)?)
    }
}

/// Opens native serial ports through the `serialport` crate
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialPortOpener;

impl LinkOpener for SerialPortOpener {
    fn open(&self, port: &str, params: &SerialParams) -> Result<Box<dyn ScaleLink>, DetectError> {
        trace!("Opening {} at {}", port, params);
        let native = serialport::new(port, params.baud_rate)
            .data_bits(params.data_bits.into())
            .parity(params.parity.into())
            .stop_bits(params.stop_bits.into())
            .timeout(params.timeout)
            .open()
            .map_err(|e| DetectError::OpenFailed {
                port: port.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Box::new(SerialLink::new(native)))
    }
}

/// Temporarily overrides a link's read timeout
///
/// The original timeout is put back when the guard drops, whichever way the
/// borrowing scope exits.
pub struct TimeoutGuard<'a> {
    link: &'a mut dyn ScaleLink,
    original: Duration,
}

impl<'a> TimeoutGuard<'a> {
    /// Switch `link` to `timeout` until the guard is dropped
    pub fn acquire(link: &'a mut dyn ScaleLink, timeout: Duration) -> io::Result<Self> {
        let original = link.timeout();
        link.set_timeout(timeout)?;
        Ok(Self { link, original })
    }

    /// Timeout that will be restored
    pub fn original(&self) -> Duration {
        self.original
    }
}

impl<'a> Deref for TimeoutGuard<'a> {
    type Target = dyn ScaleLink + 'a;

    fn deref(&self) -> &Self::Target {
        &*self.link
    }
}

impl<'a> DerefMut for TimeoutGuard<'a> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.link
    }
}

impl Drop for TimeoutGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.link.set_timeout(self.original) {
            warn!("Failed to restore read timeout: {}", e);
        }
    }
}
