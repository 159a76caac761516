//! This module provides the implementation for an instrument controlled via TCP/IP.
//!
//! It includes a blocking implementation of the `Instrument` trait using the
//! [`std::net::TcpStream`] struct.

use std::{
    net::{TcpStream, ToSocketAddrs},
    time::Duration,
};

use crate::{Instrument, InstrumentError, Port};

/// A blocking TCP/IP implementation using the [`std::net::TcpStream`] struct.
#[derive(Debug)]
pub struct TcpIpInterface {}

impl TcpIpInterface {
    /// Try to create a new TCP/IP instrument with a timeout of three seconds.
    ///
    /// The terminator is by default set to `"\n"`, but can be changed using the `set_terminator`
    /// function.
    ///
    /// # Arguments
    /// * `sock_addr` - Socket address.
    pub fn simple<A: ToSocketAddrs>(
        sock_addr: A,
    ) -> Result<Instrument<TcpStream>, InstrumentError> {
        Self::full(sock_addr, Duration::from_secs(3))
    }

    /// Try to create a new TCP/IP instrument with a given timeout.
    ///
    /// The timeout is used for establishing the connection, for reads, and for writes. We never
    /// leave the stream without a timeout, as infinitely blocking is not wanted for instrument
    /// communications.
    ///
    /// # Arguments
    /// * `sock_addr` - Socket address.
    /// * `timeout` - Timeout for connecting, reading, and writing.
    pub fn full<A: ToSocketAddrs>(
        sock_addr: A,
        timeout: Duration,
    ) -> Result<Instrument<TcpStream>, InstrumentError> {
        let mut last_err = None;
        for addr in sock_addr.to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(mut stream) => {
                    stream.set_nodelay(true)?;
                    stream.apply_timeout(timeout)?;
                    return Ok(Instrument::new(stream, timeout));
                }
                Err(err) => last_err = Some(err),
            }
        }
        Err(match last_err {
            Some(err) => InstrumentError::Io(err),
            None => InstrumentError::InvalidArgument(
                "Socket address did not resolve to any address".to_string(),
            ),
        })
    }
}
