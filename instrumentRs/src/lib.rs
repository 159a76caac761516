//! InstrumentRs: Talk to your (scientific) equipment from with Rust
//!
//! The InstrumentRs library provides standardized interfaces to talk to scientific equipment via
//! various different ports. To do so, it provides an [`InstrumentInterface`] trait and its
//! implementations, a [`Session`] that manages the lifetime of one addressed connection (retries,
//! timeouts, reconnection, statistics), and an [`InstrumentError`] error type that instrument
//! drivers should return.
//!
//! # Currently implemented interfaces are:
//! - Serial (blocking) using the [`serialport`] crate, enable the `serial` feature.
//! - TCP/IP (blocking) using [`std::net::TcpStream`].
//! - Loopback interfaces for testing your driver without hardware.
//!
//! # Sessions and resources
//!
//! Instruments are usually addressed with VISA-like resource strings, e.g.,
//! `"TCPIP0::192.168.1.100::5555::SOCKET"` or `"ASRL/dev/ttyUSB0::INSTR"`. A [`Session`] takes
//! such a string, opens it with a [`Connector`] (by default the [`ResourceConnector`]), confirms
//! that the instrument answers to `*IDN?`, and from then on provides `write`, `read`, and
//! `query` with a bounded retry policy.
//!
//! ```no_run
//! use instrumentrs::{ResourceConnector, Session, SessionOptions};
//!
//! let mut session = Session::new(ResourceConnector::default());
//! let idn = session
//!     .connect("TCPIP0::192.168.1.100::5555::SOCKET", SessionOptions::default())
//!     .unwrap();
//! println!("Connected to {idn}");
//! session.write(":SYST:REM").unwrap();
//! println!("{}", session.query(":MEAS:SCAL:ALL:DC? CH1").unwrap());
//! ```
//!
//! # Goals and non-goals of this project
//!
//! InstrumentRs shall provide a simple framework that allows you write your own instrument driver
//! and share it with the community. It should allow you to focus on the driver design itself and
//! take care of the interfacing for you. This allows your driver to be flexible, i.e., a serial
//! device can be connected to a computer via RS232, but can also be connected via an ethernet to
//! serial interface. InstrumentRs will take care of sending the correct commands for a specified
//! instrument in the background.
//!
//! Discovering instruments (listing available resources) is not part of this library. The
//! communication is strictly one command in flight at a time.
//!
//! # License
//!
//! Licensed under either of
//!
//! - Apache License, Version 2.0 ([LICENSE-APACHE](http://www.apache.org/licenses/LICENSE-2.0))
//! - MIT license ([LICENSE-MIT](http://opensource.org/licenses/MIT))
//!
//! at your option.

#![warn(missing_docs)]

mod instrument;
mod loopback;
mod resource;
#[cfg(feature = "serial")]
mod serial;
mod session;
mod tcp_ip;

pub use instrument::{Instrument, Port};
pub use loopback::{LoopbackConnector, LoopbackFaults, LoopbackInterfaceString};
pub use resource::{Resource, ResourceConnector};
#[cfg(feature = "serial")]
pub use serial::SerialInterface;
pub use session::{
    Connector, Encoding, RetryPolicy, Session, SessionOptions, SessionState, SessionStatistics,
};
pub use tcp_ip::TcpIpInterface;

use std::time::{Duration, Instant};

use thiserror::Error;

/// The closed set of error categories an [`InstrumentError`] belongs to.
///
/// Callers usually only need to decide between a few recovery strategies: a `Transport` error
/// might go away after [`Session::auto_reconnect`], whereas `Validation` and `Protocol` errors
/// will not go away by retrying.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// I/O failure or timeout at the byte/line level.
    Transport,
    /// The resource could not be opened or did not identify itself.
    Connection,
    /// A parameter was rejected before anything was sent.
    Validation,
    /// A response did not have the expected shape.
    Protocol,
    /// The bring-up sequence after a successful connection failed.
    Initialization,
    /// The instrument itself reported a problem.
    Device,
}

/// The error enum for all instruments.
///
/// For any command sending or querying, your instrument should return either an empty result or a
/// result with the query where this Error is the alternative. [`InstrumentError`] makes it easy to
/// propagate all the sending commands, querying errors forward with the `?` operator such that
/// errors propagate nicely. Use [`InstrumentError::kind`] to decide how to react to an error.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum InstrumentError {
    /// The instrument did not acknowledge the command that was sent. The response received is
    /// returned in the error as a String.
    #[error("Instrument did not acknowledge the command sent, but responded with: {0}")]
    NotAcknowledged(String),
    /// The channel index requested is out of range. The error contains the index requested and
    /// the number of channels that are currently configured.
    #[error(
        "Channel with index {idx} is out of range. Number of channels available: {nof_channels}"
    )]
    ChannelIndexOutOfRange {
        /// Index of the channel that is out of range.
        idx: usize,
        /// Total number of channels.
        nof_channels: usize,
    },
    /// An operation that addresses several channels failed on some of them. The error contains
    /// the operation and the channels on which it did not take effect.
    #[error("{operation} failed on channel(s) {channels:?}")]
    ChannelsFailed {
        /// Name of the operation.
        operation: String,
        /// Channels on which the operation failed.
        channels: Vec<usize>,
    },
    /// The resource could not be opened or did not answer the identification query.
    #[error("Connection to {resource} failed: {source}")]
    Connection {
        /// The resource string that was used.
        resource: String,
        /// The underlying error.
        source: Box<InstrumentError>,
    },
    /// A given float value is out of the specified range. The error contains the value that was
    /// sent, the minimum value that is allowed, and the maximum value that is allowed.
    #[error("Float value {value} is out of range. Allowed range is [{min}, {max}]")]
    FloatValueOutOfRange {
        /// The value that is out of range.
        value: f64,
        /// The minimum value that is allowed.
        min: f64,
        /// The maximum value that is allowed.
        max: f64,
    },
    /// The instrument was connected, but the driver could not bring it into a known state.
    #[error("Initialization failed: {0}")]
    Initialization(#[source] Box<InstrumentError>),
    /// The called command is not supported by this interface.
    #[error("This command is not supported by this interface.")]
    InterfaceCommandNotSupported,
    /// A given integer value is out of the specified range. The error contains the value that was
    /// sent, the minimum value that is allowed, and the maximum value that is allowed.
    #[error("Integer value {value} is out of range. Allowed range is [{min}, {max}]")]
    IntValueOutOfRange {
        /// The value that is out of range.
        value: i64,
        /// The minimum value that is allowed.
        min: i64,
        /// The maximum value that is allowed.
        max: i64,
    },
    /// Error when an invalid argument is passed to a function. This error contains only an error
    /// message, but no arguments. It is intended for the user.
    #[error("{0}")]
    InvalidArgument(String),
    /// Error when reading from/writing to an interface. See [`std::io::Error`] for more details.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// Instrument status is not okay, e.g., a response from the instrument did not succeed with a
    /// given error message. Note that the string is directly displayed without any further
    /// formatting, so you need to ensure that it is descriptive enough for the user.
    #[error("{0}")]
    InstrumentStatus(String),
    /// An operation was requested on a session that is not connected.
    #[error("Not connected to an instrument.")]
    NotConnected,
    /// Instrument response could not be parsed becuase it was unexpected by the driver. This error
    /// contains the response that was received from the instrument.
    #[error("Response from instrument could not be parsed. Response was: {0}")]
    ResponseParseError(String),
    #[cfg(feature = "serial")]
    /// Serial port errors can occur when opening a serial interface. See the [`serialport::Error`]
    /// documentation for more information.
    #[error(transparent)]
    Serialport(#[from] serialport::Error),
    /// Timeout occurred while waiting for a response from the instrument. The error contains the
    /// timeout that was exceeded.
    #[error(
        "Timeout occured while waiting for a response from the instrument. Timeout was set to {0:?}."
    )]
    Timeout(Duration),
    /// Timeout occurred while waiting for a response to a query. The error contains the query
    /// that was sent and the timeout that was exceeded.
    #[error(
        "Timeout occured while waiting for a response to query: {query}. Timeout was set to {timeout:?}."
    )]
    TimeoutQuery {
        /// The query that timed out.
        query: String,
        /// The timeout that was set.
        timeout: Duration,
    },
    /// A write, read, or query still failed after all retry attempts were used up.
    #[error("{operation} of '{command}' failed after {attempts} attempt(s): {source}")]
    Transport {
        /// The operation that failed, i.e., `WRITE`, `READ`, or `QUERY`.
        operation: &'static str,
        /// The command that was sent (empty for plain reads).
        command: String,
        /// Number of attempts that were made.
        attempts: usize,
        /// The error of the last attempt.
        source: Box<InstrumentError>,
    },
    /// The resource string is valid, but the interface it names is not available.
    #[error("Unsupported resource: {0}")]
    UnsupportedResource(String),
}

impl InstrumentError {
    /// Get the category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            InstrumentError::ChannelIndexOutOfRange { .. }
            | InstrumentError::FloatValueOutOfRange { .. }
            | InstrumentError::IntValueOutOfRange { .. }
            | InstrumentError::InvalidArgument(_) => ErrorKind::Validation,
            InstrumentError::NotAcknowledged(_) | InstrumentError::ResponseParseError(_) => {
                ErrorKind::Protocol
            }
            InstrumentError::Connection { .. } | InstrumentError::UnsupportedResource(_) => {
                ErrorKind::Connection
            }
            #[cfg(feature = "serial")]
            InstrumentError::Serialport(_) => ErrorKind::Connection,
            InstrumentError::Initialization(_) => ErrorKind::Initialization,
            InstrumentError::InstrumentStatus(_) => ErrorKind::Device,
            InstrumentError::ChannelsFailed { .. }
            | InstrumentError::InterfaceCommandNotSupported
            | InstrumentError::Io(_)
            | InstrumentError::NotConnected
            | InstrumentError::Timeout(_)
            | InstrumentError::TimeoutQuery { .. }
            | InstrumentError::Transport { .. } => ErrorKind::Transport,
        }
    }

    /// Returns `true` if retrying the same exchange might succeed.
    ///
    /// Only byte/line level failures qualify. Everything else would fail the same way again.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            InstrumentError::Io(_)
                | InstrumentError::Timeout(_)
                | InstrumentError::TimeoutQuery { .. }
        )
    }
}

/// The `InstrumentInterface` trait defines the interface for controlling instruments.
///
/// Implementors only have to provide [`InstrumentInterface::read_exact`] and
/// [`InstrumentInterface::write_raw`]. Sending commands, reading terminated lines, and querying
/// are built on top of these two.
pub trait InstrumentInterface {
    /// Read exactly as many bytes from the instrument as fit into `buf`.
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), InstrumentError>;

    /// Write raw bytes to the instrument and flush the interface.
    fn write_raw(&mut self, data: &[u8]) -> Result<(), InstrumentError>;

    /// Get the terminator that is appended to every command.
    fn get_terminator(&self) -> &str {
        "\n"
    }

    /// Set the terminator of an interface from a `&str`.
    ///
    /// By default, this sets the terminator for writing and reading.
    fn set_terminator(&mut self, _terminator: &str) {}

    /// Get the terminator that ends a response from the instrument.
    fn get_read_terminator(&self) -> &str {
        self.get_terminator()
    }

    /// Set the terminator that ends a response from the instrument.
    fn set_read_terminator(&mut self, _terminator: &str) {}

    /// Get the timeout for reading a response.
    fn get_timeout(&self) -> Duration {
        Duration::from_secs(3)
    }

    /// Set the timeout for reading a response.
    fn set_timeout(&mut self, _timeout: Duration) -> Result<(), InstrumentError> {
        Err(InstrumentError::InterfaceCommandNotSupported)
    }

    /// Send a command to the instrument.
    ///
    /// This function takes the command, appends the terminator, and writes it to the instrument.
    ///
    /// # Arguments:
    /// - `cmd` - A string slice that will be sent to the instrument.
    fn sendcmd(&mut self, cmd: &str) -> Result<(), InstrumentError> {
        let data = format!("{cmd}{}", self.get_terminator());
        self.write_raw(data.as_bytes())
    }

    /// Write a string to the instrument without appending a terminator.
    fn write(&mut self, data: &str) -> Result<(), InstrumentError> {
        self.write_raw(data.as_bytes())
    }

    /// Read from the instrument until the read terminator is found.
    ///
    /// The terminator is stripped and the response trimmed. If no terminator is encountered
    /// within the timeout, [`InstrumentError::Timeout`] is returned. Invalid UTF-8 is replaced.
    fn read_until_terminator(&mut self) -> Result<String, InstrumentError> {
        let terminator = self.get_read_terminator().as_bytes().to_vec();
        let timeout = self.get_timeout();
        let mut response: Vec<u8> = Vec::new();
        let mut single_buf = [0u8];

        let tic = Instant::now();
        while tic.elapsed() < timeout {
            self.read_exact(&mut single_buf)?;
            response.push(single_buf[0]);
            if !terminator.is_empty() && response.ends_with(&terminator) {
                response.truncate(response.len() - terminator.len());
                return Ok(String::from_utf8_lossy(&response).trim().to_string());
            }
        }
        Err(InstrumentError::Timeout(timeout))
    }

    /// Query the instrument with a command and return the response as a String.
    ///
    /// # Arguments
    /// * `cmd` - The command to send to the instrument for which we expect a response.
    fn query(&mut self, cmd: &str) -> Result<String, InstrumentError> {
        self.sendcmd(cmd)?;
        self.read_until_terminator().map_err(|err| match err {
            InstrumentError::Timeout(timeout) => InstrumentError::TimeoutQuery {
                query: cmd.to_string(),
                timeout,
            },
            other => other,
        })
    }

    /// Read one line and make sure it equals the expected acknowledgment.
    fn check_acknowledgment(&mut self, ack: &str) -> Result<(), InstrumentError> {
        let response = self.read_until_terminator()?;
        if response == ack {
            Ok(())
        } else {
            Err(InstrumentError::NotAcknowledged(response))
        }
    }
}

impl<T: InstrumentInterface + ?Sized> InstrumentInterface for Box<T> {
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), InstrumentError> {
        (**self).read_exact(buf)
    }

    fn write_raw(&mut self, data: &[u8]) -> Result<(), InstrumentError> {
        (**self).write_raw(data)
    }

    fn get_terminator(&self) -> &str {
        (**self).get_terminator()
    }

    fn set_terminator(&mut self, terminator: &str) {
        (**self).set_terminator(terminator)
    }

    fn get_read_terminator(&self) -> &str {
        (**self).get_read_terminator()
    }

    fn set_read_terminator(&mut self, terminator: &str) {
        (**self).set_read_terminator(terminator)
    }

    fn get_timeout(&self) -> Duration {
        (**self).get_timeout()
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<(), InstrumentError> {
        (**self).set_timeout(timeout)
    }
}
