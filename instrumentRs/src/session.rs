//! A managed connection to one addressed instrument.
//!
//! The [`Session`] owns the interface to exactly one instrument resource. It keeps track of the
//! connection state, retries failing exchanges a bounded number of times, allows scoped timeout
//! overrides, and counts commands and errors.

use std::{
    ops::{Deref, DerefMut},
    thread,
    time::{Duration, Instant},
};

use log::{debug, error, info, warn};

use crate::{InstrumentError, InstrumentInterface};

/// Identification query used to confirm that an instrument is alive.
const IDN_QUERY: &str = "*IDN?";

/// Timeout for the identification query during `connect`.
const CONNECT_IDN_TIMEOUT: Duration = Duration::from_millis(3000);

/// Timeout for the identification query during `check_connection`.
const CHECK_IDN_TIMEOUT: Duration = Duration::from_millis(1000);

/// Opens a resource string into an [`InstrumentInterface`].
///
/// The [`Session`] uses a connector for the initial connection and for every reconnection.
pub trait Connector {
    /// The interface type that is returned for an opened resource.
    type Interface: InstrumentInterface;

    /// Open the given resource.
    ///
    /// # Arguments
    /// * `resource` - The resource string, e.g., `"TCPIP0::192.168.1.100::5555::SOCKET"`.
    /// * `timeout` - Timeout to use while establishing the connection.
    fn open(&mut self, resource: &str, timeout: Duration)
    -> Result<Self::Interface, InstrumentError>;
}

/// Character encoding that commands and responses must conform to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Encoding {
    /// Plain 7-bit ASCII.
    Ascii,
    /// UTF-8.
    #[default]
    Utf8,
}

impl std::str::FromStr for Encoding {
    type Err = InstrumentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "ascii" | "us-ascii" => Ok(Encoding::Ascii),
            "utf-8" | "utf8" => Ok(Encoding::Utf8),
            _ => Err(InstrumentError::InvalidArgument(format!(
                "Unsupported encoding: {s}"
            ))),
        }
    }
}

impl Encoding {
    fn accepts(&self, text: &str) -> bool {
        match self {
            Encoding::Ascii => text.is_ascii(),
            Encoding::Utf8 => true,
        }
    }
}

/// Options that are applied to the interface when connecting.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionOptions {
    /// Timeout for a single read.
    pub timeout: Duration,
    /// Terminator that ends a response.
    pub read_terminator: String,
    /// Terminator that is appended to every command.
    pub write_terminator: String,
    /// Encoding of commands and responses.
    pub encoding: Encoding,
}

impl Default for SessionOptions {
    fn default() -> Self {
        SessionOptions {
            timeout: Duration::from_millis(5000),
            read_terminator: "\n".to_string(),
            write_terminator: "\n".to_string(),
            encoding: Encoding::Utf8,
        }
    }
}

/// How often and how fast failing exchanges are retried.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Number of additional attempts after the first one failed.
    pub max_retries: usize,
    /// Pause between two attempts.
    pub retry_delay: Duration,
    /// Pause between disconnecting and connecting again in `auto_reconnect`.
    pub reconnect_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: 2,
            retry_delay: Duration::from_millis(100),
            reconnect_delay: Duration::from_secs(1),
        }
    }
}

/// Connection state of a [`Session`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SessionState {
    /// No interface is open.
    #[default]
    Disconnected,
    /// An interface is being opened and identified.
    Connecting,
    /// The instrument answered to the identification query.
    Connected,
}

/// A snapshot of the statistics of a [`Session`].
#[derive(Clone, Debug, PartialEq)]
pub struct SessionStatistics {
    /// Whether the session is connected.
    pub connected: bool,
    /// The resource of the last connection attempt.
    pub resource: Option<String>,
    /// Successful writes and queries since the last connection.
    pub command_count: u64,
    /// Failed operations since the last connection.
    pub error_count: u64,
    /// Number of reconnection attempts.
    pub reconnect_count: u64,
    /// Message of the last error.
    pub last_error: Option<String>,
    /// Time it took to establish the current connection.
    pub connection_duration: Option<Duration>,
    /// Current timeout of the interface, if one is open.
    pub timeout: Option<Duration>,
}

/// Applies a timeout to an interface and restores the previous one when dropped.
struct TimeoutGuard<'a, I: InstrumentInterface> {
    interface: &'a mut I,
    original: Option<Duration>,
}

impl<'a, I: InstrumentInterface> TimeoutGuard<'a, I> {
    fn new(interface: &'a mut I, timeout: Option<Duration>) -> Result<Self, InstrumentError> {
        let original = match timeout {
            Some(timeout) => {
                let original = interface.get_timeout();
                interface.set_timeout(timeout)?;
                Some(original)
            }
            None => None,
        };
        Ok(TimeoutGuard {
            interface,
            original,
        })
    }
}

impl<I: InstrumentInterface> Deref for TimeoutGuard<'_, I> {
    type Target = I;

    fn deref(&self) -> &Self::Target {
        self.interface
    }
}

impl<I: InstrumentInterface> DerefMut for TimeoutGuard<'_, I> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.interface
    }
}

impl<I: InstrumentInterface> Drop for TimeoutGuard<'_, I> {
    fn drop(&mut self) {
        if let Some(original) = self.original {
            if let Err(err) = self.interface.set_timeout(original) {
                warn!("Failed to restore timeout of {original:?}: {err}");
            }
        }
    }
}

/// Run `exchange` until it succeeds, fails with a non-transient error, or the attempts run out.
///
/// Returns the number of attempts together with the result.
fn run_with_retry<T>(
    policy: &RetryPolicy,
    operation: &'static str,
    command: &str,
    mut exchange: impl FnMut() -> Result<T, InstrumentError>,
) -> (usize, Result<T, InstrumentError>) {
    let total = policy.max_retries + 1;
    let mut attempt = 0;
    loop {
        attempt += 1;
        let tic = Instant::now();
        match exchange() {
            Ok(value) => {
                debug!("{operation} [{:.3}s]: {command}", tic.elapsed().as_secs_f64());
                return (attempt, Ok(value));
            }
            Err(err) if err.is_transient() && attempt < total => {
                warn!(
                    "{operation} attempt {attempt}/{total} of '{command}' failed after {:.3}s, retrying: {err}",
                    tic.elapsed().as_secs_f64()
                );
                thread::sleep(policy.retry_delay);
            }
            Err(err) => {
                debug!(
                    "{operation} attempt {attempt}/{total} of '{command}' failed after {:.3}s: {err}",
                    tic.elapsed().as_secs_f64()
                );
                return (attempt, Err(err));
            }
        }
    }
}

/// A session with one addressed instrument resource.
///
/// The session is not internally synchronized: all operations take `&mut self`. Wrap it (or the
/// driver owning it) in a mutex if more than one caller needs it.
///
/// # Example
///
/// ```
/// use instrumentrs::{LoopbackConnector, LoopbackInterfaceString, Session, SessionOptions};
///
/// let h2i = vec!["*IDN?".to_string(), ":SYST:REM".to_string()];
/// let i2h = vec!["RIGOL TECHNOLOGIES,DP2031,DP2D251800001,00.01.14".to_string()];
/// let connector = LoopbackConnector::new(vec![LoopbackInterfaceString::new(h2i, i2h, "\n")]);
///
/// let mut session = Session::new(connector);
/// let idn = session.connect("TCPIP0::10.0.0.2::INSTR", SessionOptions::default()).unwrap();
/// assert!(idn.starts_with("RIGOL"));
/// session.write(":SYST:REM").unwrap();
/// ```
pub struct Session<C: Connector> {
    connector: C,
    interface: Option<C::Interface>,
    state: SessionState,
    resource: Option<String>,
    options: SessionOptions,
    retry: RetryPolicy,
    command_count: u64,
    error_count: u64,
    reconnect_count: u64,
    last_error: Option<String>,
    connection_duration: Option<Duration>,
}

impl<C: Connector> Session<C> {
    /// Create a new, disconnected session with the default [`RetryPolicy`].
    pub fn new(connector: C) -> Self {
        Self::with_retry_policy(connector, RetryPolicy::default())
    }

    /// Create a new, disconnected session with a given [`RetryPolicy`].
    pub fn with_retry_policy(connector: C, retry: RetryPolicy) -> Self {
        Session {
            connector,
            interface: None,
            state: SessionState::Disconnected,
            resource: None,
            options: SessionOptions::default(),
            retry,
            command_count: 0,
            error_count: 0,
            reconnect_count: 0,
            last_error: None,
            connection_duration: None,
        }
    }

    /// Get the current connection state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Returns `true` if the session is connected.
    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected && self.interface.is_some()
    }

    /// Get the resource string of the last connection attempt.
    pub fn resource(&self) -> Option<&str> {
        self.resource.as_deref()
    }

    /// Get the options of the last connection attempt.
    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Get the retry policy.
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Set the retry policy.
    pub fn set_retry_policy(&mut self, retry: RetryPolicy) {
        self.retry = retry;
    }

    /// Get the current timeout of the open interface.
    pub fn timeout(&self) -> Option<Duration> {
        self.interface.as_ref().map(|intf| intf.get_timeout())
    }

    /// Get a reference to the connector.
    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Get a mutable reference to the connector.
    pub fn connector_mut(&mut self) -> &mut C {
        &mut self.connector
    }

    /// Connect to an instrument resource.
    ///
    /// Opens the resource, applies the options, and sends an identification query to confirm that
    /// the instrument is alive. If the session is already connected, it is disconnected first. On
    /// success, the statistics are reset, the resource is kept for reconnection, and the
    /// identification string is returned.
    ///
    /// # Arguments
    /// * `resource` - The resource string to open.
    /// * `options` - Timeout, terminators, and encoding for this connection.
    pub fn connect(
        &mut self,
        resource: &str,
        options: SessionOptions,
    ) -> Result<String, InstrumentError> {
        if self.state != SessionState::Disconnected {
            warn!("Already connected, disconnecting first");
            self.disconnect();
        }

        self.resource = Some(resource.to_string());
        self.options = options;
        self.state = SessionState::Connecting;
        let tic = Instant::now();

        match self.open_and_identify(resource) {
            Ok(idn) => {
                let duration = tic.elapsed();
                self.state = SessionState::Connected;
                self.command_count = 0;
                self.error_count = 0;
                self.last_error = None;
                self.connection_duration = Some(duration);
                info!(
                    "Connected to {resource} in {:.3}s, instrument: {idn}",
                    duration.as_secs_f64()
                );
                Ok(idn)
            }
            Err(err) => {
                self.interface = None;
                self.state = SessionState::Disconnected;
                self.error_count += 1;
                self.last_error = Some(err.to_string());
                error!("Failed to connect to {resource}: {err}");
                Err(InstrumentError::Connection {
                    resource: resource.to_string(),
                    source: Box::new(err),
                })
            }
        }
    }

    fn open_and_identify(&mut self, resource: &str) -> Result<String, InstrumentError> {
        let mut intf = self.connector.open(resource, self.options.timeout)?;
        intf.set_terminator(&self.options.write_terminator);
        intf.set_read_terminator(&self.options.read_terminator);
        intf.set_timeout(self.options.timeout)?;
        let (_, result) = {
            let mut guard = TimeoutGuard::new(&mut intf, Some(CONNECT_IDN_TIMEOUT))?;
            run_with_retry(&self.retry, "QUERY", IDN_QUERY, || guard.query(IDN_QUERY))
        };
        let idn = result?;
        self.interface = Some(intf);
        Ok(idn)
    }

    /// Disconnect from the instrument.
    ///
    /// This is idempotent and never fails. The resource string is kept for reconnection.
    pub fn disconnect(&mut self) {
        if self.interface.take().is_some() {
            info!(
                "Instrument connection to {} closed",
                self.resource.as_deref().unwrap_or("<unknown>")
            );
        }
        self.state = SessionState::Disconnected;
    }

    /// Write a command to the instrument, no response is expected.
    ///
    /// Transient failures are retried according to the [`RetryPolicy`]. If all attempts fail, an
    /// [`InstrumentError::Transport`] error is returned and the error counter is increased by one.
    pub fn write(&mut self, cmd: &str) -> Result<(), InstrumentError> {
        self.check_outgoing(cmd)?;
        self.exchange("WRITE", cmd, None, |intf| intf.sendcmd(cmd))?;
        self.command_count += 1;
        Ok(())
    }

    /// Read one line from the instrument.
    pub fn read(&mut self) -> Result<String, InstrumentError> {
        self.ensure_connected()?;
        let response = self.exchange("READ", "", None, |intf| intf.read_until_terminator())?;
        self.check_incoming(response)
    }

    /// Write a command and read the response.
    pub fn query(&mut self, cmd: &str) -> Result<String, InstrumentError> {
        self.query_with_timeout(cmd, None)
    }

    /// Write a command and read the response, with an optional timeout for this call only.
    ///
    /// The original timeout is restored afterwards, also if the query fails.
    pub fn query_with_timeout(
        &mut self,
        cmd: &str,
        timeout: Option<Duration>,
    ) -> Result<String, InstrumentError> {
        self.check_outgoing(cmd)?;
        let response = self.exchange("QUERY", cmd, timeout, |intf| intf.query(cmd))?;
        self.command_count += 1;
        self.check_incoming(response)
    }

    /// Check whether the instrument still answers to an identification query.
    ///
    /// On failure, the session is marked as disconnected. This never returns an error.
    pub fn check_connection(&mut self) -> bool {
        if !self.is_connected() {
            return false;
        }
        match self.query_with_timeout(IDN_QUERY, Some(CHECK_IDN_TIMEOUT)) {
            Ok(_) => true,
            Err(err) => {
                warn!("Connection check failed: {err}");
                self.disconnect();
                false
            }
        }
    }

    /// Disconnect, wait for the reconnect delay, and connect again to the last resource.
    ///
    /// This is never called automatically. Returns `true` if the reconnection succeeded.
    pub fn auto_reconnect(&mut self) -> bool {
        let Some(resource) = self.resource.clone() else {
            error!("No resource string available for reconnection");
            return false;
        };
        info!("Attempting reconnection to {resource}");
        self.reconnect_count += 1;
        self.disconnect();
        thread::sleep(self.retry.reconnect_delay);
        match self.connect(&resource, self.options.clone()) {
            Ok(_) => {
                info!("Automatic reconnection successful");
                true
            }
            Err(err) => {
                error!("Automatic reconnection failed: {err}");
                false
            }
        }
    }

    /// Get a snapshot of the session statistics.
    pub fn statistics(&self) -> SessionStatistics {
        SessionStatistics {
            connected: self.is_connected(),
            resource: self.resource.clone(),
            command_count: self.command_count,
            error_count: self.error_count,
            reconnect_count: self.reconnect_count,
            last_error: self.last_error.clone(),
            connection_duration: self.connection_duration,
            timeout: self.timeout(),
        }
    }

    fn ensure_connected(&self) -> Result<(), InstrumentError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(InstrumentError::NotConnected)
        }
    }

    fn check_outgoing(&self, cmd: &str) -> Result<(), InstrumentError> {
        self.ensure_connected()?;
        if self.options.encoding.accepts(cmd) {
            Ok(())
        } else {
            Err(InstrumentError::InvalidArgument(format!(
                "Command '{cmd}' cannot be encoded as {:?}",
                self.options.encoding
            )))
        }
    }

    fn check_incoming(&self, response: String) -> Result<String, InstrumentError> {
        if self.options.encoding.accepts(&response) {
            Ok(response)
        } else {
            Err(InstrumentError::ResponseParseError(response))
        }
    }

    /// Run one exchange on the open interface with retries and an optional timeout override.
    ///
    /// Failures are counted once per call, not once per attempt.
    fn exchange<T>(
        &mut self,
        operation: &'static str,
        command: &str,
        timeout: Option<Duration>,
        mut f: impl FnMut(&mut C::Interface) -> Result<T, InstrumentError>,
    ) -> Result<T, InstrumentError> {
        let Some(intf) = self.interface.as_mut() else {
            return Err(InstrumentError::NotConnected);
        };
        let (attempts, result) = match TimeoutGuard::new(intf, timeout) {
            Ok(mut guard) => run_with_retry(&self.retry, operation, command, || f(&mut *guard)),
            Err(err) => (0, Err(err)),
        };
        result.map_err(|err| {
            self.error_count += 1;
            self.last_error = Some(err.to_string());
            error!("{operation} of '{command}' failed after {attempts} attempt(s): {err}");
            InstrumentError::Transport {
                operation,
                command: command.to_string(),
                attempts,
                source: Box::new(err),
            }
        })
    }
}

impl<C: Connector> std::fmt::Debug for Session<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("resource", &self.resource)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
