//! SCPI command strings of the DP2000 series.
//!
//! Numeric values go out with six fractional digits, booleans as `ON`/`OFF`.

use crate::{PairMode, SamplingMode};

pub(crate) const IDN: &str = "*IDN?";
pub(crate) const OPC: &str = "*OPC?";
pub(crate) const CLEAR_STATUS: &str = "*CLS";
pub(crate) const STATUS_BYTE: &str = "*STB?";
pub(crate) const OPERATION_CONDITION: &str = ":STAT:OPER:COND?";
pub(crate) const REMOTE: &str = ":SYST:REM";
pub(crate) const LOCAL: &str = ":SYST:LOC";

fn on_off(on: bool) -> &'static str {
    if on { "ON" } else { "OFF" }
}

pub(crate) fn set_voltage(ch: usize, volts: f64) -> String {
    format!(":SOUR{ch}:VOLT {volts:.6}")
}

pub(crate) fn set_current(ch: usize, amperes: f64) -> String {
    format!(":SOUR{ch}:CURR {amperes:.6}")
}

pub(crate) fn output(ch: usize, on: bool) -> String {
    format!(":OUTP{ch} {}", on_off(on))
}

pub(crate) fn output_all(on: bool) -> String {
    format!(":OUTP:STAT {}", on_off(on))
}

pub(crate) fn output_state(ch: usize) -> String {
    format!(":OUTP{ch}?")
}

pub(crate) fn measure_voltage(ch: usize) -> String {
    format!(":MEAS:SCAL:VOLT:DC? CH{ch}")
}

pub(crate) fn measure_current(ch: usize) -> String {
    format!(":MEAS:SCAL:CURR:DC? CH{ch}")
}

pub(crate) fn measure_all(ch: usize) -> String {
    format!(":MEAS:SCAL:ALL:DC? CH{ch}")
}

pub(crate) fn ovp_level(ch: usize, volts: f64) -> String {
    format!(":SOUR{ch}:VOLT:PROT:LEV {volts:.6}")
}

pub(crate) fn ovp_state(ch: usize, on: bool) -> String {
    format!(":SOUR{ch}:VOLT:PROT:STAT {}", on_off(on))
}

pub(crate) fn ocp_level(ch: usize, amperes: f64) -> String {
    format!(":SOUR{ch}:CURR:PROT:LEV {amperes:.6}")
}

pub(crate) fn ocp_state(ch: usize, on: bool) -> String {
    format!(":SOUR{ch}:CURR:PROT:STAT {}", on_off(on))
}

pub(crate) fn clear_ovp(ch: usize) -> String {
    format!(":OUTP{ch}:OVP:CLEar")
}

pub(crate) fn clear_ocp(ch: usize) -> String {
    format!(":OUTP{ch}:OCP:CLEar")
}

pub(crate) fn sampling(mode: SamplingMode) -> String {
    format!(":SYST:SAMPling {}", mode.as_scpi())
}

pub(crate) fn pair(mode: PairMode) -> String {
    format!(":OUTP:PAIR {}", mode.as_scpi())
}

pub(crate) fn tracking(on: bool) -> String {
    format!(":OUTP:TRACk:STATe {}", on_off(on))
}

pub(crate) fn remote_sense(ch: usize, on: bool) -> String {
    format!(":SOUR{ch}:SENS:REM {}", on_off(on))
}
