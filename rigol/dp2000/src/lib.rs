//! A rust driver for the RIGOL DP2000 series of programmable DC power supplies.
//!
//! The driver talks SCPI to the instrument through an [`instrumentrs::Session`], which takes care
//! of retries, timeouts, and reconnection. On top of it, this driver validates every parameter
//! before anything is sent, mirrors the instrument state locally (see [`SystemState`] and
//! [`ChannelState`]), and drains the instrument's error queue from time to time.
//!
//! Channels are numbered as on the front panel, starting at 1.
//!
//! # Example
//!
//! ```no_run
//! use rigol_dp2000::{Dp2000, Dp2000Config};
//!
//! let mut inst = Dp2000::try_connect("TCPIP0::192.168.1.100::INSTR", Dp2000Config::default())
//!     .unwrap();
//!
//! let mut ch1 = inst.get_channel(1).unwrap();
//! ch1.set_vi(5.0, 0.5).unwrap();
//! ch1.output(true).unwrap();
//!
//! let meas = ch1.read_all().unwrap();
//! println!("CH1: {:?} / {:?}", meas.voltage, meas.current);
//!
//! // turns all outputs off and returns the instrument to local control
//! inst.close();
//! ```

#![deny(warnings, missing_docs)]

mod commands;
mod config;
mod error_queue;
mod model;

pub use config::{DriverConfig, Dp2000Config, LimitsConfig, RetryConfig, SessionConfig};
pub use error_queue::{DeviceError, MAX_ERROR_QUERIES};
pub use model::{
    ChannelState, MAX_ERROR_LOG, MAX_HISTORY, Measurement, OutputMode, PairMode, ProtectionSettings,
    ProtectionState, SamplingMode, Setpoints, SystemState,
};

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use log::{debug, error, info, warn};
use measurements::{Current, Voltage};

use instrumentrs::{
    Connector, ErrorKind, InstrumentError, ResourceConnector, Session, SessionOptions, SessionStatistics,
};

use error_queue::NEXT_ERROR_QUERY;

/// Outcome of switching several outputs at once.
#[derive(Debug, Default)]
pub struct OutputsReport {
    /// Channels that were switched.
    pub switched: Vec<usize>,
    /// Channels that could not be switched, with the reason.
    pub failed: Vec<(usize, InstrumentError)>,
}

impl OutputsReport {
    /// Returns `true` if no channel failed.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// The channels that could not be switched.
    pub fn failed_channels(&self) -> Vec<usize> {
        self.failed.iter().map(|(ch, _)| *ch).collect()
    }
}

/// Connection overview as returned by [`Dp2000::connection_status`].
#[derive(Clone, Debug)]
pub struct ConnectionStatus {
    /// Whether the instrument is connected.
    pub connected: bool,
    /// Whether the bring-up after connecting completed.
    pub initialized: bool,
    /// Identification string of the instrument.
    pub instrument_id: String,
    /// Statistics of the underlying session.
    pub session: SessionStatistics,
    /// Number of device errors in the system error log.
    pub error_count: usize,
    /// Most recent device error.
    pub last_error: Option<DeviceError>,
}

/// Everything that one logical operation needs exclusive access to.
struct Controller<C: Connector> {
    session: Session<C>,
    options: SessionOptions,
    limits: LimitsConfig,
    channels: Vec<ChannelState>,
    system: SystemState,
    error_check_interval: Duration,
    last_error_check: Instant,
    close_on_drop: bool,
}

impl<C: Connector> Controller<C> {
    fn validate_channel(&self, ch: usize) -> Result<(), InstrumentError> {
        if ch == 0 || ch > self.limits.num_channels {
            return Err(InstrumentError::ChannelIndexOutOfRange {
                idx: ch,
                nof_channels: self.limits.num_channels,
            });
        }
        Ok(())
    }

    fn validate_voltage(&self, volts: f64) -> Result<(), InstrumentError> {
        if !(0.0..=self.limits.max_voltage).contains(&volts) {
            return Err(InstrumentError::FloatValueOutOfRange {
                value: volts,
                min: 0.0,
                max: self.limits.max_voltage,
            });
        }
        Ok(())
    }

    fn validate_current(&self, amperes: f64) -> Result<(), InstrumentError> {
        if !(0.0..=self.limits.max_current).contains(&amperes) {
            return Err(InstrumentError::FloatValueOutOfRange {
                value: amperes,
                min: 0.0,
                max: self.limits.max_current,
            });
        }
        Ok(())
    }

    /// Mirror of a channel, must only be called with a validated channel number.
    fn channel_mut(&mut self, ch: usize) -> &mut ChannelState {
        &mut self.channels[ch - 1]
    }

    fn channel_numbers(&self) -> std::ops::RangeInclusive<usize> {
        1..=self.limits.num_channels
    }

    fn connect(&mut self, resource: &str) -> Result<String, InstrumentError> {
        self.system.connected = false;
        self.system.initialized = false;

        let idn = self.session.connect(resource, self.options.clone())?;
        self.system.connected = true;
        self.system.instrument_id = idn.clone();

        if let Err(err) = self.initialize() {
            error!("Instrument initialization failed: {err}");
            return Err(InstrumentError::Initialization(Box::new(err)));
        }
        self.system.initialized = true;
        info!("Successfully connected to {idn}");
        Ok(idn)
    }

    /// Bring a freshly connected instrument into a known state.
    fn initialize(&mut self) -> Result<(), InstrumentError> {
        self.clear_errors()?;
        self.to_remote()?;
        self.read_stb()?;
        self.read_oper_cond()?;
        for ch in self.channel_numbers() {
            self.read_all(ch)?;
            self.read_output(ch)?;
        }
        self.last_error_check = Instant::now();
        info!("Instrument initialization complete");
        Ok(())
    }

    fn close(&mut self) {
        if self.session.is_connected() {
            let report = self.disable_all_outputs();
            if !report.is_complete() {
                warn!(
                    "Outputs of channel(s) {:?} could not be disabled before closing",
                    report.failed_channels()
                );
            }
            self.to_local();
        }
        self.session.disconnect();
        self.system.connected = false;
        self.system.initialized = false;
        info!("Connection closed");
    }

    fn idn(&mut self) -> Result<String, InstrumentError> {
        let idn = self.session.query(commands::IDN)?;
        self.system.instrument_id = idn.clone();
        Ok(idn)
    }

    fn set_vi(&mut self, ch: usize, volts: f64, amperes: f64) -> Result<(), InstrumentError> {
        self.validate_channel(ch)?;
        self.validate_voltage(volts)?;
        self.validate_current(amperes)?;

        self.session.write(&commands::set_voltage(ch, volts))?;
        self.session.write(&commands::set_current(ch, amperes))?;
        self.channel_mut(ch).setpoints = Setpoints {
            voltage: Voltage::from_volts(volts),
            current: Current::from_amperes(amperes),
        };
        info!("CH{ch}: set to {volts:.3} V, {amperes:.3} A");

        self.check_errors();
        Ok(())
    }

    fn output(&mut self, ch: usize, on: bool) -> Result<(), InstrumentError> {
        self.validate_channel(ch)?;
        self.session.write(&commands::output(ch, on))?;
        self.channel_mut(ch).output_enabled = on;
        info!("CH{ch}: output {}", if on { "ON" } else { "OFF" });

        self.check_errors();
        Ok(())
    }

    fn output_all(&mut self, on: bool) -> Result<OutputsReport, InstrumentError> {
        let report = if on {
            self.session.write(&commands::output_all(true))?;
            let switched: Vec<usize> = self.channel_numbers().collect();
            for state in self.channels.iter_mut() {
                state.output_enabled = true;
            }
            info!("All outputs ON");
            OutputsReport {
                switched,
                failed: Vec::new(),
            }
        } else {
            self.disable_all_outputs()
        };

        self.check_errors();
        Ok(report)
    }

    /// Switch off every channel on its own, a failing channel does not stop the others.
    fn disable_all_outputs(&mut self) -> OutputsReport {
        let mut report = OutputsReport::default();
        for ch in self.channel_numbers() {
            match self.session.write(&commands::output(ch, false)) {
                Ok(()) => {
                    self.channel_mut(ch).output_enabled = false;
                    report.switched.push(ch);
                }
                Err(err) => {
                    warn!("CH{ch}: failed to disable output: {err}");
                    report.failed.push((ch, err));
                }
            }
        }
        info!("Outputs OFF on channel(s) {:?}", report.switched);
        report
    }

    fn emergency_stop(&mut self) -> Result<(), InstrumentError> {
        let report = self.disable_all_outputs();
        if report.is_complete() {
            return Ok(());
        }
        let channels = report.failed_channels();
        error!("Emergency stop did not disable channel(s) {channels:?}");
        Err(InstrumentError::ChannelsFailed {
            operation: "Emergency stop".to_string(),
            channels,
        })
    }

    fn set_ovp(&mut self, ch: usize, volts: f64, on: bool) -> Result<(), InstrumentError> {
        self.validate_channel(ch)?;
        self.validate_voltage(volts)?;

        self.session.write(&commands::ovp_level(ch, volts))?;
        self.session.write(&commands::ovp_state(ch, on))?;
        let protection = &mut self.channel_mut(ch).protection;
        protection.ovp_level = Voltage::from_volts(volts);
        protection.ovp_enabled = on;
        info!("CH{ch}: OVP {volts:.3} V, {}", if on { "ON" } else { "OFF" });

        self.check_errors();
        Ok(())
    }

    fn set_ocp(&mut self, ch: usize, amperes: f64, on: bool) -> Result<(), InstrumentError> {
        self.validate_channel(ch)?;
        self.validate_current(amperes)?;

        self.session.write(&commands::ocp_level(ch, amperes))?;
        self.session.write(&commands::ocp_state(ch, on))?;
        let protection = &mut self.channel_mut(ch).protection;
        protection.ocp_level = Current::from_amperes(amperes);
        protection.ocp_enabled = on;
        info!("CH{ch}: OCP {amperes:.3} A, {}", if on { "ON" } else { "OFF" });

        self.check_errors();
        Ok(())
    }

    /// Both levels are validated before the first write.
    fn apply_protection(
        &mut self,
        ch: usize,
        settings: &ProtectionSettings,
    ) -> Result<(), InstrumentError> {
        let volts = settings.ovp_level.as_volts();
        let amperes = settings.ocp_level.as_amperes();
        self.validate_channel(ch)?;
        self.validate_voltage(volts)?;
        self.validate_current(amperes)?;

        self.session.write(&commands::ovp_level(ch, volts))?;
        self.session.write(&commands::ovp_state(ch, settings.ovp_enabled))?;
        self.session.write(&commands::ocp_level(ch, amperes))?;
        self.session.write(&commands::ocp_state(ch, settings.ocp_enabled))?;
        self.channel_mut(ch).protection = *settings;
        info!(
            "CH{ch}: OVP {volts:.3} V {}, OCP {amperes:.3} A {}",
            if settings.ovp_enabled { "ON" } else { "OFF" },
            if settings.ocp_enabled { "ON" } else { "OFF" }
        );

        self.check_errors();
        Ok(())
    }

    fn clear_trips(&mut self, ch: usize) -> Result<(), InstrumentError> {
        self.validate_channel(ch)?;
        self.session.write(&commands::clear_ovp(ch))?;
        self.session.write(&commands::clear_ocp(ch))?;
        self.channel_mut(ch).protection_state = ProtectionState::Normal;
        info!("CH{ch}: protection trips cleared");

        self.check_errors();
        Ok(())
    }

    fn read_all(&mut self, ch: usize) -> Result<Measurement, InstrumentError> {
        self.validate_channel(ch)?;
        let resp = self.session.query(&commands::measure_all(ch))?;
        let meas = parse_measurement(&resp)?;
        self.channel_mut(ch).add_measurement(meas);
        Ok(meas)
    }

    fn read_v(&mut self, ch: usize) -> Result<Voltage, InstrumentError> {
        self.validate_channel(ch)?;
        let resp = self.session.query(&commands::measure_voltage(ch))?;
        Ok(Voltage::from_volts(parse_float(&resp)?))
    }

    fn read_i(&mut self, ch: usize) -> Result<Current, InstrumentError> {
        self.validate_channel(ch)?;
        let resp = self.session.query(&commands::measure_current(ch))?;
        Ok(Current::from_amperes(parse_float(&resp)?))
    }

    fn read_output(&mut self, ch: usize) -> Result<bool, InstrumentError> {
        self.validate_channel(ch)?;
        let resp = self.session.query(&commands::output_state(ch))?;
        let on = match resp.trim() {
            "1" | "ON" => true,
            "0" | "OFF" => false,
            _ => return Err(InstrumentError::ResponseParseError(resp)),
        };
        self.channel_mut(ch).output_enabled = on;
        Ok(on)
    }

    fn update_all_measurements(&mut self) {
        for ch in self.channel_numbers() {
            if let Err(err) = self.read_all(ch) {
                debug!("Measurement update failed for CH{ch}: {err}");
            }
        }
    }

    fn set_sampling(&mut self, mode: SamplingMode) -> Result<(), InstrumentError> {
        self.session.write(&commands::sampling(mode))?;
        self.system.sampling_mode = mode;
        info!("Sampling mode set to {}", mode.as_scpi());

        self.check_errors();
        Ok(())
    }

    fn set_pair(&mut self, mode: PairMode) {
        match self.session.write(&commands::pair(mode)) {
            Ok(()) => {
                self.system.pair_mode = mode;
                info!("Pair mode set to {}", mode.as_scpi());
                self.check_errors();
            }
            Err(err) => warn!("Pair mode setting may not be supported: {err}"),
        }
    }

    fn set_tracking(&mut self, on: bool) {
        match self.session.write(&commands::tracking(on)) {
            Ok(()) => {
                self.system.tracking_enabled = on;
                info!("Tracking mode: {}", if on { "ON" } else { "OFF" });
                self.check_errors();
            }
            Err(err) => warn!("Tracking mode may not be supported: {err}"),
        }
    }

    fn remote_sense(&mut self, on: bool) {
        let mut any_ok = false;
        for ch in self.channel_numbers() {
            match self.session.write(&commands::remote_sense(ch, on)) {
                Ok(()) => {
                    self.channel_mut(ch).remote_sense = on;
                    any_ok = true;
                }
                Err(err) => warn!("CH{ch}: remote sensing may not be supported: {err}"),
            }
        }
        if any_ok {
            self.check_errors();
        }
    }

    fn to_remote(&mut self) -> Result<(), InstrumentError> {
        self.session.write(commands::REMOTE)?;
        self.system.remote_control = true;
        debug!("Switched to remote control");
        Ok(())
    }

    fn to_local(&mut self) {
        match self.session.write(commands::LOCAL) {
            Ok(()) => {
                self.system.remote_control = false;
                debug!("Returned to local control");
            }
            Err(err) => warn!("Failed to return to local: {err}"),
        }
    }

    fn read_stb(&mut self) -> Result<u8, InstrumentError> {
        let resp = self.session.query(commands::STATUS_BYTE)?;
        let stb = resp
            .trim()
            .parse::<u8>()
            .map_err(|_| InstrumentError::ResponseParseError(resp))?;
        self.system.status_byte = stb;
        Ok(stb)
    }

    fn read_oper_cond(&mut self) -> Result<u16, InstrumentError> {
        let resp = self.session.query(commands::OPERATION_CONDITION)?;
        let oper = resp
            .trim()
            .parse::<u16>()
            .map_err(|_| InstrumentError::ResponseParseError(resp))?;
        self.system.operation_condition = oper;
        Ok(oper)
    }

    fn opc(&mut self) -> Result<(), InstrumentError> {
        self.session.query(commands::OPC)?;
        Ok(())
    }

    fn clear_errors(&mut self) -> Result<(), InstrumentError> {
        self.session.write(commands::CLEAR_STATUS)?;
        self.system.clear_errors();
        debug!("Error queue cleared");
        Ok(())
    }

    /// Drain the instrument's error queue, at most [`MAX_ERROR_QUERIES`] entries.
    fn query_errors(&mut self) -> Vec<DeviceError> {
        let mut errors = Vec::new();
        for _ in 0..MAX_ERROR_QUERIES {
            let entry = match self
                .session
                .query(NEXT_ERROR_QUERY)
                .and_then(|resp| resp.parse::<DeviceError>())
            {
                Ok(entry) => entry,
                Err(err) => {
                    error!("Error while reading error queue: {err}");
                    return errors;
                }
            };
            if entry.is_no_error() {
                return errors;
            }
            self.system.add_error(entry.clone());
            errors.push(entry);
        }
        warn!("Error queue not empty after {MAX_ERROR_QUERIES} queries, giving up");
        errors
    }

    /// Drain the error queue if the last drain is at least the check interval ago.
    fn check_errors(&mut self) {
        if !self.session.is_connected() || self.last_error_check.elapsed() < self.error_check_interval
        {
            return;
        }
        let errors = self.query_errors();
        if !errors.is_empty() {
            warn!("Instrument errors detected: {errors:?}");
        }
        self.last_error_check = Instant::now();
    }

    fn check_connection(&mut self) -> bool {
        let alive = self.session.check_connection();
        if !alive {
            self.system.connected = false;
            self.system.initialized = false;
        }
        alive
    }

    fn auto_reconnect(&mut self) -> bool {
        let ok = self.session.auto_reconnect();
        self.system.connected = ok;
        // the bring-up only runs in `connect`
        self.system.initialized = false;
        ok
    }

    fn connection_status(&self) -> ConnectionStatus {
        ConnectionStatus {
            connected: self.system.connected,
            initialized: self.system.initialized,
            instrument_id: self.system.instrument_id.clone(),
            session: self.session.statistics(),
            error_count: self.system.error_log().len(),
            last_error: self.system.last_error.clone(),
        }
    }
}

impl<C: Connector> Drop for Controller<C> {
    fn drop(&mut self) {
        if self.close_on_drop && self.session.is_connected() {
            info!("Last driver handle dropped, closing the connection");
            self.close();
        }
    }
}

/// Parse a `:MEAS:SCAL:ALL:DC?` reply of the form `<volts>,<amperes>,<watts>`.
fn parse_measurement(resp: &str) -> Result<Measurement, InstrumentError> {
    let err = || InstrumentError::ResponseParseError(resp.to_string());
    let fields: Vec<&str> = resp.trim().trim_matches('"').split(',').collect();
    let &[volts, amperes, watts] = fields.as_slice() else {
        return Err(err());
    };
    let parse = |s: &str| s.trim().parse::<f64>().map_err(|_| err());
    Ok(Measurement::now(
        parse(volts)?,
        parse(amperes)?,
        Some(parse(watts)?),
    ))
}

fn parse_float(resp: &str) -> Result<f64, InstrumentError> {
    resp.trim()
        .trim_matches('"')
        .parse::<f64>()
        .map_err(|_| InstrumentError::ResponseParseError(resp.to_string()))
}

/// A rust driver for the RIGOL DP2000 series.
///
/// The driver can be cloned and its [`Channel`]s can be handed out to other threads. All clones
/// share one session, every operation holds it exclusively from validation until the mirror is
/// updated. See the top-level documentation for an example.
///
/// When the last clone or channel handle is dropped, the driver is closed as with
/// [`Dp2000::close`], unless [`DriverConfig::close_on_drop`] is switched off.
pub struct Dp2000<C: Connector = ResourceConnector> {
    inner: Arc<Mutex<Controller<C>>>,
    num_channels: usize,
}

impl Dp2000<ResourceConnector> {
    /// Create a driver for a resource string and connect to it.
    ///
    /// This is a shortcut for [`Dp2000::try_new`] with a [`ResourceConnector`] followed by
    /// [`Dp2000::connect`].
    pub fn try_connect(resource: &str, config: Dp2000Config) -> Result<Self, InstrumentError> {
        let mut inst = Dp2000::try_new(ResourceConnector::default(), config)?;
        inst.connect(resource)?;
        Ok(inst)
    }
}

impl<C: Connector> Dp2000<C> {
    /// Create a new, disconnected driver.
    ///
    /// # Arguments
    /// * `connector` - Opens resource strings, usually a [`ResourceConnector`].
    /// * `config` - Session options, retry policy, limits, and error check interval.
    pub fn try_new(connector: C, config: Dp2000Config) -> Result<Self, InstrumentError> {
        config.validate()?;
        let options = config.session_options()?;
        let num_channels = config.limits.num_channels;
        let controller = Controller {
            session: Session::with_retry_policy(connector, config.retry_policy()),
            options,
            channels: (1..=num_channels).map(ChannelState::new).collect(),
            system: SystemState::default(),
            error_check_interval: config.error_check_interval(),
            last_error_check: Instant::now(),
            close_on_drop: config.driver.close_on_drop,
            limits: config.limits,
        };
        Ok(Dp2000 {
            inner: Arc::new(Mutex::new(controller)),
            num_channels,
        })
    }

    /// Connect to the instrument and bring it into a known state.
    ///
    /// After the session is connected, the error queue is cleared, the instrument is switched to
    /// remote control, and the status registers, measurements, and output states are read. If
    /// this bring-up fails, an [`InstrumentError::Initialization`] error is returned and the
    /// session stays connected.
    ///
    /// Returns the identification string of the instrument.
    pub fn connect(&mut self, resource: &str) -> Result<String, InstrumentError> {
        self.lock().connect(resource)
    }

    /// Switch off all outputs, return to local control, and disconnect.
    ///
    /// Failures are logged, closing always completes.
    pub fn close(&mut self) {
        self.lock().close()
    }

    /// Get a handle to a channel, channels are numbered from 1.
    pub fn get_channel(&mut self, ch: usize) -> Result<Channel<C>, InstrumentError> {
        if ch == 0 || ch > self.num_channels {
            return Err(InstrumentError::ChannelIndexOutOfRange {
                idx: ch,
                nof_channels: self.num_channels,
            });
        }
        Ok(Channel::new(ch, Arc::clone(&self.inner)))
    }

    /// Number of channels of this instrument.
    pub fn num_channels(&self) -> usize {
        self.num_channels
    }

    /// Query the name of the instrument
    ///
    /// Returns a comma-separated string of manufacturer, model, serial number, and firmware.
    pub fn idn(&mut self) -> Result<String, InstrumentError> {
        self.lock().idn()
    }

    /// Wait until all pending operations of the instrument completed.
    pub fn opc(&mut self) -> Result<(), InstrumentError> {
        self.lock().opc()
    }

    /// Switch all outputs on or off.
    ///
    /// Switching on uses one group command and fails as a whole. Switching off addresses every
    /// channel on its own and carries on if a channel fails: the returned report lists the
    /// channels that could not be switched off, but no error is returned for them.
    pub fn output_all(&mut self, on: bool) -> Result<OutputsReport, InstrumentError> {
        self.lock().output_all(on)
    }

    /// Switch off all outputs as fast as possible.
    ///
    /// Unlike [`Dp2000::output_all`], the error queue is not checked afterwards, and an
    /// [`InstrumentError::ChannelsFailed`] error is returned if any channel could not be switched
    /// off.
    pub fn emergency_stop(&mut self) -> Result<(), InstrumentError> {
        self.lock().emergency_stop()
    }

    /// Set the current sampling mode.
    pub fn set_sampling(&mut self, mode: SamplingMode) -> Result<(), InstrumentError> {
        self.lock().set_sampling(mode)
    }

    /// Set the channel pairing. Not every model supports this, failures are only logged.
    pub fn set_pair(&mut self, mode: PairMode) {
        self.lock().set_pair(mode)
    }

    /// Switch tracking on or off. Not every model supports this, failures are only logged.
    pub fn set_tracking(&mut self, on: bool) {
        self.lock().set_tracking(on)
    }

    /// Switch remote sensing (4-wire) on or off for all channels.
    ///
    /// Not every model supports this, failures are only logged.
    pub fn remote_sense(&mut self, on: bool) {
        self.lock().remote_sense(on)
    }

    /// Switch the instrument to remote control.
    pub fn to_remote(&mut self) -> Result<(), InstrumentError> {
        self.lock().to_remote()
    }

    /// Return the instrument to local control. Failures are only logged.
    pub fn to_local(&mut self) {
        self.lock().to_local()
    }

    /// Read the status byte.
    pub fn read_stb(&mut self) -> Result<u8, InstrumentError> {
        self.lock().read_stb()
    }

    /// Read the operation condition register.
    pub fn read_oper_cond(&mut self) -> Result<u16, InstrumentError> {
        self.lock().read_oper_cond()
    }

    /// Clear the instrument's error queue and the local error log.
    pub fn clear_errors(&mut self) -> Result<(), InstrumentError> {
        self.lock().clear_errors()
    }

    /// Read all entries from the instrument's error queue.
    ///
    /// Stops at the first "no error" entry, but after [`MAX_ERROR_QUERIES`] queries at the latest.
    /// Every entry is also appended to the system error log. Communication failures end the
    /// drain and are logged, the entries read so far are returned.
    pub fn query_errors(&mut self) -> Vec<DeviceError> {
        self.lock().query_errors()
    }

    /// Read the measurements of all channels. Failures are logged.
    pub fn update_all_measurements(&mut self) {
        self.lock().update_all_measurements()
    }

    /// Check that the instrument still answers.
    ///
    /// If it does not, the session is disconnected.
    pub fn check_connection(&mut self) -> bool {
        self.lock().check_connection()
    }

    /// Disconnect and connect again to the last resource.
    ///
    /// This is never done automatically, call it after a transport error if you want to recover,
    /// or use [`Dp2000::with_recovery`]. Only the session is reconnected: the bring-up does not
    /// run again, so [`SystemState::initialized`] is `false` afterwards. Call [`Dp2000::connect`]
    /// instead to clear the error queue and switch to remote control again.
    pub fn auto_reconnect(&mut self) -> bool {
        self.lock().auto_reconnect()
    }

    /// Run `f` and reconnect if it fails with a transport error.
    ///
    /// Returns `Ok(Some(_))` if `f` succeeded and `Ok(None)` if it failed with an
    /// [`ErrorKind::Transport`] error and [`Dp2000::auto_reconnect`] succeeded afterwards; the
    /// operation itself is not repeated. Other errors, and transport errors that could not be
    /// recovered from, are returned unchanged.
    ///
    /// ```no_run
    /// # use rigol_dp2000::{Dp2000, Dp2000Config};
    /// let mut inst = Dp2000::try_connect("TCPIP0::192.168.1.100::INSTR", Dp2000Config::default())
    ///     .unwrap();
    /// if inst.with_recovery(|inst| inst.read_stb()).unwrap().is_none() {
    ///     println!("Connection was lost and restored");
    /// }
    /// ```
    pub fn with_recovery<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, InstrumentError>,
    ) -> Result<Option<T>, InstrumentError> {
        match f(self) {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.kind() == ErrorKind::Transport => {
                warn!("Transport error detected: {err}");
                if self.auto_reconnect() {
                    info!("Recovered from transport error by reconnecting");
                    Ok(None)
                } else {
                    Err(err)
                }
            }
            Err(err) => Err(err),
        }
    }

    /// Get an overview of the connection.
    pub fn connection_status(&self) -> ConnectionStatus {
        self.lock().connection_status()
    }

    /// Returns `true` if the session is connected.
    pub fn is_connected(&self) -> bool {
        self.lock().session.is_connected()
    }

    /// Get the statistics of the underlying session.
    pub fn statistics(&self) -> SessionStatistics {
        self.lock().session.statistics()
    }

    /// Get a copy of the mirrored system state.
    pub fn system_state(&self) -> SystemState {
        self.lock().system.clone()
    }

    /// Run a closure with exclusive access to the underlying session's connector.
    ///
    /// This is mostly useful in tests to prepare the next connection.
    pub fn with_connector<R>(&self, f: impl FnOnce(&mut C) -> R) -> R {
        f(self.lock().session.connector_mut())
    }

    fn lock(&self) -> MutexGuard<'_, Controller<C>> {
        lock(&self.inner)
    }
}

impl<C: Connector> Clone for Dp2000<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            num_channels: self.num_channels,
        }
    }
}

fn lock<C: Connector>(inner: &Mutex<Controller<C>>) -> MutexGuard<'_, Controller<C>> {
    // the mirror is only written after successful commands, so it is consistent after a panic
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Channel structure representing a single output of the DP2000.
///
/// **This structure can only be created through the [`Dp2000`] struct.**
pub struct Channel<C: Connector = ResourceConnector> {
    ch: usize,
    inner: Arc<Mutex<Controller<C>>>,
}

impl<C: Connector> Channel<C> {
    fn new(ch: usize, inner: Arc<Mutex<Controller<C>>>) -> Self {
        Channel { ch, inner }
    }

    /// The channel number, starting at 1.
    pub fn number(&self) -> usize {
        self.ch
    }

    /// Set voltage and current of this channel.
    ///
    /// Both values are checked against the configured limits before anything is sent. The
    /// setpoints in the mirror are only updated after both commands were sent.
    ///
    /// # Arguments
    /// * `volts` - Voltage setpoint in volts, `0..=max_voltage`.
    /// * `amperes` - Current setpoint in amperes, `0..=max_current`.
    pub fn set_vi(&mut self, volts: f64, amperes: f64) -> Result<(), InstrumentError> {
        self.lock().set_vi(self.ch, volts, amperes)
    }

    /// Switch the output of this channel on or off.
    pub fn output(&mut self, on: bool) -> Result<(), InstrumentError> {
        self.lock().output(self.ch, on)
    }

    /// Set the over-voltage protection level and switch it on or off.
    pub fn set_ovp(&mut self, volts: f64, on: bool) -> Result<(), InstrumentError> {
        self.lock().set_ovp(self.ch, volts, on)
    }

    /// Set the over-current protection level and switch it on or off.
    pub fn set_ocp(&mut self, amperes: f64, on: bool) -> Result<(), InstrumentError> {
        self.lock().set_ocp(self.ch, amperes, on)
    }

    /// Apply over-voltage and then over-current protection settings.
    ///
    /// Both levels are checked against the limits before the first command is sent. The mirror is
    /// only updated after all four commands went out.
    pub fn apply_protection(
        &mut self,
        settings: &ProtectionSettings,
    ) -> Result<(), InstrumentError> {
        self.lock().apply_protection(self.ch, settings)
    }

    /// Clear tripped over-voltage and over-current protection.
    pub fn clear_trips(&mut self) -> Result<(), InstrumentError> {
        self.lock().clear_trips(self.ch)
    }

    /// Read voltage, current, and power of this channel.
    ///
    /// The measurement is also stored in the mirror. A reply that does not consist of exactly
    /// three numbers results in an [`InstrumentError::ResponseParseError`].
    pub fn read_all(&mut self) -> Result<Measurement, InstrumentError> {
        self.lock().read_all(self.ch)
    }

    /// Read the voltage of this channel.
    pub fn read_v(&mut self) -> Result<Voltage, InstrumentError> {
        self.lock().read_v(self.ch)
    }

    /// Read the current of this channel.
    pub fn read_i(&mut self) -> Result<Current, InstrumentError> {
        self.lock().read_i(self.ch)
    }

    /// Read whether the output of this channel is on.
    pub fn read_output(&mut self) -> Result<bool, InstrumentError> {
        self.lock().read_output(self.ch)
    }

    /// Get a copy of the mirrored state of this channel.
    pub fn state(&self) -> ChannelState {
        self.lock().channels[self.ch - 1].clone()
    }

    fn lock(&self) -> MutexGuard<'_, Controller<C>> {
        lock(&self.inner)
    }
}

impl<C: Connector> Clone for Channel<C> {
    fn clone(&self) -> Self {
        Self {
            ch: self.ch,
            inner: Arc::clone(&self.inner),
        }
    }
}
