//! This module provides the main implementation for the Instrument Interface trait.
//!
//! It can be called with any type that implements [`Port`], i.e., [`std::io::Read`] and
//! [`std::io::Write`] plus a way to apply a timeout, such as [`std::net::TcpStream`] or
//! [`serialport::SerialPort`].

use std::{collections::VecDeque, io, net::TcpStream, time::Duration};

use crate::{InstrumentError, InstrumentInterface};

/// A byte stream that an [`Instrument`] can talk through.
///
/// Next to reading and writing, a port can optionally apply the read/write timeout of the
/// instrument to the underlying stream. The default implementation does nothing, which is fine
/// for in-memory ports.
pub trait Port: io::Read + io::Write {
    /// Apply a new timeout to the underlying stream.
    fn apply_timeout(&mut self, _timeout: Duration) -> io::Result<()> {
        Ok(())
    }
}

impl Port for TcpStream {
    fn apply_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.set_read_timeout(Some(timeout))?;
        self.set_write_timeout(Some(timeout))
    }
}

#[cfg(feature = "serial")]
impl Port for Box<dyn serialport::SerialPort> {
    fn apply_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        serialport::SerialPort::set_timeout(self.as_mut(), timeout).map_err(io::Error::from)
    }
}

impl Port for VecDeque<u8> {}

/// A general instrument interface that can be built with any [`Port`].
///
/// This struct can be used to communicate with instruments over the various interfaces. Handy
/// shortcuts for creating various interfaces are provides as well, see
/// [`crate::TcpIpInterface`] and, with the `serial` feature, `SerialInterface`.
///
/// # Example
///
/// ```no_run
/// use std::{net::TcpStream, time::Duration};
///
/// use instrumentrs::Instrument;
///
/// let my_interface = TcpStream::connect("192.168.10.1:5555").unwrap();
/// let inst_interface = Instrument::new(my_interface, Duration::from_secs(3));
/// ```
pub struct Instrument<P: Port> {
    port: P,
    terminator: String,
    read_terminator: String,
    timeout: Duration,
}

impl<P: Port> Instrument<P> {
    /// Create a new instance of [`Instrument`] with a given port and timeout.
    ///
    /// The terminator for writing and reading is set to `"\n"`.
    pub fn new(port: P, timeout: Duration) -> Self {
        Self {
            port,
            terminator: "\n".to_string(),
            read_terminator: "\n".to_string(),
            timeout,
        }
    }
}

impl<P: Port> InstrumentInterface for Instrument<P> {
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), InstrumentError> {
        self.port.read_exact(buf)?;
        Ok(())
    }

    fn write_raw(&mut self, data: &[u8]) -> Result<(), InstrumentError> {
        self.port.write_all(data)?;
        self.port.flush()?;
        Ok(())
    }

    fn get_terminator(&self) -> &str {
        self.terminator.as_str()
    }

    fn set_terminator(&mut self, terminator: &str) {
        self.terminator = terminator.to_string();
        self.read_terminator = terminator.to_string();
    }

    fn get_read_terminator(&self) -> &str {
        self.read_terminator.as_str()
    }

    fn set_read_terminator(&mut self, terminator: &str) {
        self.read_terminator = terminator.to_string();
    }

    fn get_timeout(&self) -> Duration {
        self.timeout
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<(), InstrumentError> {
        self.port.apply_timeout(timeout)?;
        self.timeout = timeout;
        Ok(())
    }
}
