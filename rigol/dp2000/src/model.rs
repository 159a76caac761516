//! Locally mirrored state of the power supply.
//!
//! The driver updates these structures only after a command was confirmed sent, they never hold a
//! value the instrument did not receive.

use std::{collections::VecDeque, fmt, str::FromStr};

use chrono::{DateTime, Utc};
use measurements::{Current, Power, Voltage};

use instrumentrs::InstrumentError;

use crate::DeviceError;

/// Number of measurements that are kept per channel.
pub const MAX_HISTORY: usize = 1000;

/// Number of device errors that are kept in the system error log.
pub const MAX_ERROR_LOG: usize = 100;

/// Regulation mode of a channel output.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputMode {
    /// Constant voltage.
    #[default]
    Cv,
    /// Constant current.
    Cc,
    /// Unregulated.
    Ur,
}

/// Trip state of the channel protection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ProtectionState {
    /// No protection tripped.
    #[default]
    Normal,
    /// Over-voltage protection tripped.
    OvpTrip,
    /// Over-current protection tripped.
    OcpTrip,
    /// Over-temperature protection tripped.
    OtpTrip,
}

/// Current sampling mode of the instrument.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SamplingMode {
    /// Range selected by the instrument.
    #[default]
    Auto,
    /// High current range.
    High,
    /// Low current range.
    Low,
}

impl SamplingMode {
    /// The token used on the wire.
    pub fn as_scpi(&self) -> &'static str {
        match self {
            SamplingMode::Auto => "AUTO",
            SamplingMode::High => "HIGH",
            SamplingMode::Low => "LOW",
        }
    }
}

impl FromStr for SamplingMode {
    type Err = InstrumentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "AUTO" => Ok(SamplingMode::Auto),
            "HIGH" => Ok(SamplingMode::High),
            "LOW" => Ok(SamplingMode::Low),
            _ => Err(InstrumentError::InvalidArgument(format!(
                "Invalid sampling mode: {s}"
            ))),
        }
    }
}

/// How the channels are paired.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PairMode {
    /// Channels are independent.
    #[default]
    None,
    /// Channels are connected in series.
    Series,
    /// Channels are connected in parallel.
    Parallel,
}

impl PairMode {
    /// The token used on the wire.
    pub fn as_scpi(&self) -> &'static str {
        match self {
            PairMode::None => "OFF",
            PairMode::Series => "SER",
            PairMode::Parallel => "PAR",
        }
    }
}

impl FromStr for PairMode {
    type Err = InstrumentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NONE" | "OFF" => Ok(PairMode::None),
            "SER" | "SERIES" => Ok(PairMode::Series),
            "PAR" | "PARALLEL" => Ok(PairMode::Parallel),
            _ => Err(InstrumentError::InvalidArgument(format!(
                "Invalid pair mode: {s}"
            ))),
        }
    }
}

/// One measurement of a channel.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Measurement {
    /// Time the measurement was received.
    pub timestamp: DateTime<Utc>,
    /// Measured voltage.
    pub voltage: Voltage,
    /// Measured current.
    pub current: Current,
    /// Power as reported by the instrument, or voltage times current.
    pub power: Power,
}

impl Measurement {
    /// Create a measurement with the current time as timestamp.
    ///
    /// If no power is given, it is calculated from voltage and current.
    pub fn now(voltage: f64, current: f64, power: Option<f64>) -> Self {
        Measurement {
            timestamp: Utc::now(),
            voltage: Voltage::from_volts(voltage),
            current: Current::from_amperes(current),
            power: Power::from_watts(power.unwrap_or(voltage * current)),
        }
    }
}

/// Voltage and current setpoints of a channel.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Setpoints {
    /// Voltage setpoint.
    pub voltage: Voltage,
    /// Current setpoint.
    pub current: Current,
}

impl Default for Setpoints {
    fn default() -> Self {
        Setpoints {
            voltage: Voltage::from_volts(0.0),
            current: Current::from_amperes(0.0),
        }
    }
}

/// Over-voltage and over-current protection of a channel.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProtectionSettings {
    /// Over-voltage protection level.
    pub ovp_level: Voltage,
    /// Whether over-voltage protection is enabled.
    pub ovp_enabled: bool,
    /// Over-current protection level.
    pub ocp_level: Current,
    /// Whether over-current protection is enabled.
    pub ocp_enabled: bool,
}

impl ProtectionSettings {
    /// Create protection settings, levels must not be negative.
    ///
    /// # Arguments
    /// * `ovp_level` - Over-voltage protection level in volts.
    /// * `ovp_enabled` - Enable over-voltage protection.
    /// * `ocp_level` - Over-current protection level in amperes.
    /// * `ocp_enabled` - Enable over-current protection.
    pub fn try_new(
        ovp_level: f64,
        ovp_enabled: bool,
        ocp_level: f64,
        ocp_enabled: bool,
    ) -> Result<Self, InstrumentError> {
        if ovp_level.is_nan() || ovp_level < 0.0 {
            return Err(InstrumentError::InvalidArgument(format!(
                "OVP level cannot be negative, got {ovp_level}"
            )));
        }
        if ocp_level.is_nan() || ocp_level < 0.0 {
            return Err(InstrumentError::InvalidArgument(format!(
                "OCP level cannot be negative, got {ocp_level}"
            )));
        }
        Ok(ProtectionSettings {
            ovp_level: Voltage::from_volts(ovp_level),
            ovp_enabled,
            ocp_level: Current::from_amperes(ocp_level),
            ocp_enabled,
        })
    }
}

impl Default for ProtectionSettings {
    fn default() -> Self {
        ProtectionSettings {
            ovp_level: Voltage::from_volts(0.0),
            ovp_enabled: false,
            ocp_level: Current::from_amperes(0.0),
            ocp_enabled: false,
        }
    }
}

/// Mirrored state of one channel.
#[derive(Clone, Debug)]
pub struct ChannelState {
    /// Channel number, starting at 1.
    pub channel: usize,
    /// Last setpoints that were sent.
    pub setpoints: Setpoints,
    /// Most recent measurement.
    pub measurement: Option<Measurement>,
    /// Whether the output is on.
    pub output_enabled: bool,
    /// Regulation mode.
    pub output_mode: OutputMode,
    /// Protection settings that were sent.
    pub protection: ProtectionSettings,
    /// Protection trip state.
    pub protection_state: ProtectionState,
    /// Whether remote sensing is on.
    pub remote_sense: bool,
    history: VecDeque<Measurement>,
}

impl ChannelState {
    /// Create the state of a channel as it is before the instrument was read.
    pub fn new(channel: usize) -> Self {
        ChannelState {
            channel,
            setpoints: Setpoints::default(),
            measurement: None,
            output_enabled: false,
            output_mode: OutputMode::default(),
            protection: ProtectionSettings::default(),
            protection_state: ProtectionState::default(),
            remote_sense: false,
            history: VecDeque::new(),
        }
    }

    /// Store a measurement as the most recent one and append it to the history.
    ///
    /// The history keeps at most [`MAX_HISTORY`] entries, older ones are dropped.
    pub fn add_measurement(&mut self, measurement: Measurement) {
        self.measurement = Some(measurement);
        if self.history.len() == MAX_HISTORY {
            self.history.pop_front();
        }
        self.history.push_back(measurement);
    }

    /// The measurement history, oldest first.
    pub fn history(&self) -> &VecDeque<Measurement> {
        &self.history
    }

    /// The `count` most recent measurements, oldest first.
    pub fn recent_measurements(&self, count: usize) -> Vec<Measurement> {
        let skip = self.history.len().saturating_sub(count);
        self.history.iter().skip(skip).copied().collect()
    }

    /// Drop the measurement history, the most recent measurement is kept.
    pub fn clear_history(&mut self) {
        self.history.clear();
    }
}

/// Mirrored state of the whole instrument.
#[derive(Clone, Debug, Default)]
pub struct SystemState {
    /// Whether the session is connected.
    pub connected: bool,
    /// Whether the bring-up after connecting completed.
    pub initialized: bool,
    /// Identification string of the instrument.
    pub instrument_id: String,
    /// Last read status byte.
    pub status_byte: u8,
    /// Last read operation condition register.
    pub operation_condition: u16,
    /// Last read questionable condition register.
    pub questionable_condition: u16,
    /// Current sampling mode.
    pub sampling_mode: SamplingMode,
    /// Channel pairing.
    pub pair_mode: PairMode,
    /// Whether tracking is on.
    pub tracking_enabled: bool,
    /// Whether the instrument is in remote control.
    pub remote_control: bool,
    /// Most recent device error.
    pub last_error: Option<DeviceError>,
    error_log: VecDeque<DeviceError>,
}

impl SystemState {
    /// Append a device error to the log, the oldest entry is dropped once the log is full.
    pub fn add_error(&mut self, error: DeviceError) {
        if self.error_log.len() == MAX_ERROR_LOG {
            self.error_log.pop_front();
        }
        self.error_log.push_back(error.clone());
        self.last_error = Some(error);
    }

    /// The device errors that were drained so far, oldest first.
    pub fn error_log(&self) -> &VecDeque<DeviceError> {
        &self.error_log
    }

    /// Forget all recorded device errors.
    pub fn clear_errors(&mut self) {
        self.error_log.clear();
        self.last_error = None;
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CH{}: {:.3} V / {:.3} A, output {}",
            self.channel,
            self.setpoints.voltage.as_volts(),
            self.setpoints.current.as_amperes(),
            if self.output_enabled { "ON" } else { "OFF" }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_measurement_derives_power() {
        let m = Measurement::now(5.0, 2.0, None);
        assert_eq!(m.power.as_watts(), 10.0);
        let m = Measurement::now(5.0, 2.0, Some(9.5));
        assert_eq!(m.power.as_watts(), 9.5);
    }

    #[test]
    fn test_protection_settings_reject_negative_levels() {
        assert!(ProtectionSettings::try_new(-1.0, true, 1.0, true).is_err());
        assert!(ProtectionSettings::try_new(1.0, true, -0.1, true).is_err());
        let ps = ProtectionSettings::try_new(6.0, true, 0.0, false).unwrap();
        assert_eq!(ps.ovp_level.as_volts(), 6.0);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut ch = ChannelState::new(1);
        for idx in 0..MAX_HISTORY + 5 {
            ch.add_measurement(Measurement::now(idx as f64, 0.0, None));
        }
        assert_eq!(ch.history().len(), MAX_HISTORY);
        assert_eq!(ch.history()[0].voltage.as_volts(), 5.0);
        assert_eq!(ch.recent_measurements(2).len(), 2);

        ch.clear_history();
        assert!(ch.history().is_empty());
        assert!(ch.measurement.is_some());
    }

    #[test]
    fn test_error_log_is_bounded() {
        let mut sys = SystemState::default();
        for code in 1..=(MAX_ERROR_LOG as i32 + 1) {
            sys.add_error(DeviceError {
                code,
                message: "err".to_string(),
            });
        }
        assert_eq!(sys.error_log().len(), MAX_ERROR_LOG);
        assert_eq!(sys.error_log()[0].code, 2);
        assert_eq!(sys.last_error.as_ref().map(|e| e.code), Some(101));

        sys.clear_errors();
        assert!(sys.error_log().is_empty());
        assert!(sys.last_error.is_none());
    }

    #[test]
    fn test_modes_from_str() {
        assert_eq!("high".parse::<SamplingMode>().unwrap(), SamplingMode::High);
        assert_eq!("SER".parse::<PairMode>().unwrap(), PairMode::Series);
        assert_eq!("NONE".parse::<PairMode>().unwrap().as_scpi(), "OFF");
        assert!("MID".parse::<SamplingMode>().is_err());
    }
}
