//! VISA-style resource strings and a connector that opens them.
//!
//! Only the parsing and opening of a single, known resource is provided. Listing the resources
//! that are available on a system is not.

use std::{fmt::Display, str::FromStr, time::Duration};

use crate::{Connector, InstrumentError, InstrumentInterface, TcpIpInterface};

/// Port of the raw SCPI socket on RIGOL LAN instruments, used when a `TCPIP` resource does not
/// name a port.
const DEFAULT_SOCKET_PORT: u16 = 5555;

/// Baud rate used for `ASRL` resources.
const DEFAULT_BAUD_RATE: u32 = 9600;

/// A parsed instrument resource address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resource {
    /// A raw TCP socket, from `TCPIP[n]::<host>::<port>::SOCKET` or `TCPIP[n]::<host>::INSTR`.
    Tcp {
        /// Host name or IP address.
        host: String,
        /// Port number.
        port: u16,
    },
    /// A serial port, from `ASRL<path>::INSTR` or `ASRL<n>::INSTR`.
    Serial {
        /// Name of the serial port, e.g., `"/dev/ttyUSB0"` or `"COM3"`.
        path: String,
    },
    /// A USBTMC device, e.g., `USB0::0x1AB1::0x0E11::DP2D251800001::INSTR`.
    Usb(String),
    /// A GPIB device, e.g., `GPIB0::5::INSTR`.
    Gpib(String),
}

impl FromStr for Resource {
    type Err = InstrumentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InstrumentError::InvalidArgument(format!("Invalid resource string: {s}"));
        let parts: Vec<&str> = s.trim().split("::").collect();
        let head = parts[0].to_ascii_uppercase();

        if let Some(board) = head.strip_prefix("TCPIP") {
            check_board(board).ok_or_else(invalid)?;
            let host = parts.get(1).filter(|h| !h.is_empty()).ok_or_else(invalid)?;
            let port = match &parts[2..] {
                [] => DEFAULT_SOCKET_PORT,
                [suffix] if suffix.eq_ignore_ascii_case("INSTR") => DEFAULT_SOCKET_PORT,
                [port, suffix] if suffix.eq_ignore_ascii_case("SOCKET") => {
                    port.parse().map_err(|_| invalid())?
                }
                _ => return Err(invalid()),
            };
            return Ok(Resource::Tcp {
                host: host.to_string(),
                port,
            });
        }

        if head.starts_with("ASRL") {
            // keep the original casing of the device path
            let name = &parts[0].trim()[4..];
            if name.is_empty() || parts.len() > 2 {
                return Err(invalid());
            }
            if let Some(suffix) = parts.get(1) {
                if !suffix.eq_ignore_ascii_case("INSTR") {
                    return Err(invalid());
                }
            }
            let path = match name.parse::<u32>() {
                Ok(num) => format!("COM{num}"),
                Err(_) => name.to_string(),
            };
            return Ok(Resource::Serial { path });
        }

        if let Some(board) = head.strip_prefix("USB") {
            check_board(board).ok_or_else(invalid)?;
            if parts.len() < 4 {
                return Err(invalid());
            }
            return Ok(Resource::Usb(s.trim().to_string()));
        }

        if let Some(board) = head.strip_prefix("GPIB") {
            check_board(board).ok_or_else(invalid)?;
            if parts.len() < 2 || parts[1].parse::<u8>().is_err() {
                return Err(invalid());
            }
            return Ok(Resource::Gpib(s.trim().to_string()));
        }

        Err(invalid())
    }
}

impl Display for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Resource::Tcp { host, port } => write!(f, "TCPIP0::{host}::{port}::SOCKET"),
            Resource::Serial { path } => write!(f, "ASRL{path}::INSTR"),
            Resource::Usb(s) | Resource::Gpib(s) => write!(f, "{s}"),
        }
    }
}

/// The board number after the interface type must be empty or numeric.
fn check_board(board: &str) -> Option<()> {
    (board.is_empty() || board.chars().all(|c| c.is_ascii_digit())).then_some(())
}

/// A [`Connector`] that opens [`Resource`] strings with the interfaces of this crate.
///
/// TCP/IP resources are always available, serial resources require the `serial` feature. USB and
/// GPIB resources need a VISA library and are reported as
/// [`InstrumentError::UnsupportedResource`].
#[derive(Debug, Default)]
pub struct ResourceConnector {}

impl Connector for ResourceConnector {
    type Interface = Box<dyn InstrumentInterface + Send>;

    fn open(
        &mut self,
        resource: &str,
        timeout: Duration,
    ) -> Result<Self::Interface, InstrumentError> {
        match resource.parse::<Resource>()? {
            Resource::Tcp { host, port } => Ok(Box::new(TcpIpInterface::full(
                (host.as_str(), port),
                timeout,
            )?)),
            #[cfg(feature = "serial")]
            Resource::Serial { path } => {
                let spb = serialport::new(path, DEFAULT_BAUD_RATE).timeout(timeout);
                Ok(Box::new(crate::SerialInterface::full(spb)?))
            }
            #[cfg(not(feature = "serial"))]
            Resource::Serial { path } => Err(InstrumentError::UnsupportedResource(format!(
                "{path} at {DEFAULT_BAUD_RATE} baud (enable the `serial` feature)"
            ))),
            Resource::Usb(s) | Resource::Gpib(s) => Err(InstrumentError::UnsupportedResource(
                format!("{s} (requires a VISA library)"),
            )),
        }
    }
}
