//! Tests for the RIGOL DP2000 driver.

use rstest::*;

use instrumentrs::{
    ErrorKind, InstrumentError, LoopbackConnector, LoopbackFaults, LoopbackInterfaceString,
};

use rigol_dp2000::*;

// Type alias for the DP2000 driver with loopback interfaces.
type Dp2000Lbk = Dp2000<LoopbackConnector>;

const RESOURCE: &str = "TCPIP0::192.168.1.100::INSTR";
const IDN: &str = "RIGOL TECHNOLOGIES,DP2031,DP2D251800001,00.01.14";

/// Configuration without delays and with an error check interval that never elapses in a test.
///
/// Dropping the driver does not close it, so scripts only contain what a test sends itself.
fn test_config() -> Dp2000Config {
    let mut config = Dp2000Config::default();
    config.retry.retry_delay_ms = 0;
    config.retry.reconnect_delay_ms = 0;
    config.driver.error_check_interval_ms = 3_600_000;
    config.driver.close_on_drop = false;
    config
}

fn idn_lbk() -> LoopbackInterfaceString {
    LoopbackInterfaceString::new(vec!["*IDN?".to_string()], vec![IDN.to_string()], "\n")
}

/// Commands and replies of the bring-up after connecting, with the given output states.
fn bring_up(outputs: [&'static str; 3]) -> (Vec<String>, Vec<String>) {
    let mut h2i = vec!["*IDN?", "*CLS", ":SYST:REM", "*STB?", ":STAT:OPER:COND?"]
        .into_iter()
        .map(String::from)
        .collect::<Vec<_>>();
    let mut i2h = vec![IDN, "0", "0"]
        .into_iter()
        .map(String::from)
        .collect::<Vec<_>>();
    for (idx, out) in outputs.iter().enumerate() {
        let ch = idx + 1;
        h2i.push(format!(":MEAS:SCAL:ALL:DC? CH{ch}"));
        h2i.push(format!(":OUTP{ch}?"));
        i2h.push("0.000000,0.000000,0.000000".to_string());
        i2h.push(out.to_string());
    }
    (h2i, i2h)
}

/// Create a connected driver. The bring-up is prepended to the given commands.
fn crt_inst_cfg(
    config: Dp2000Config,
    outputs: [&'static str; 3],
    host2inst: Vec<&str>,
    inst2host: Vec<&str>,
) -> (Dp2000Lbk, LoopbackFaults) {
    let _ = env_logger::builder().is_test(true).try_init();
    let (mut h2i, mut i2h) = bring_up(outputs);
    h2i.extend(host2inst.iter().map(|s| s.to_string()));
    i2h.extend(inst2host.iter().map(|s| s.to_string()));
    let lbk = LoopbackInterfaceString::new(h2i, i2h, "\n");
    let faults = lbk.faults();

    let mut inst = Dp2000::try_new(LoopbackConnector::new(vec![lbk]), config).unwrap();
    assert_eq!(inst.connect(RESOURCE).unwrap(), IDN);
    (inst, faults)
}

fn crt_inst(host2inst: Vec<&str>, inst2host: Vec<&str>) -> (Dp2000Lbk, LoopbackFaults) {
    crt_inst_cfg(test_config(), ["0", "0", "0"], host2inst, inst2host)
}

/// A connected driver that sends nothing after the bring-up.
#[fixture]
fn emp_inst() -> Dp2000Lbk {
    crt_inst(vec![], vec![]).0
}

#[rstest]
fn test_connect_bring_up() {
    let (mut inst, _) = crt_inst_cfg(test_config(), ["0", "1", "0"], vec![], vec![]);

    let sys = inst.system_state();
    assert!(sys.connected);
    assert!(sys.initialized);
    assert!(sys.remote_control);
    assert_eq!(sys.instrument_id, IDN);
    assert!(inst.is_connected());

    assert!(!inst.get_channel(1).unwrap().state().output_enabled);
    assert!(inst.get_channel(2).unwrap().state().output_enabled);
    let state = inst.get_channel(3).unwrap().state();
    assert_eq!(state.history().len(), 1);
    assert_eq!(state.measurement.unwrap().voltage.as_volts(), 0.0);
}

/// If the bring-up fails, the session stays connected but the driver is not initialized.
#[rstest]
fn test_connect_initialization_fails() {
    let h2i = ["*IDN?", "*CLS", ":SYST:REM", "*STB?"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let i2h = [IDN, "not a number"].iter().map(|s| s.to_string()).collect();
    let lbk = LoopbackInterfaceString::new(h2i, i2h, "\n");
    let mut inst = Dp2000::try_new(LoopbackConnector::new(vec![lbk]), test_config()).unwrap();

    let err = inst.connect(RESOURCE).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Initialization);
    assert!(inst.is_connected());
    let sys = inst.system_state();
    assert!(sys.connected);
    assert!(!sys.initialized);
}

#[rstest]
fn test_connect_fails() {
    let mut inst = Dp2000::try_new(LoopbackConnector::default(), test_config()).unwrap();

    let err = inst.connect(RESOURCE).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connection);
    assert!(!inst.is_connected());
    assert!(!inst.connection_status().connected);
}

#[rstest]
fn test_idn() {
    let (mut inst, _) = crt_inst(vec!["*IDN?"], vec![IDN]);
    assert_eq!(inst.idn().unwrap(), IDN);
}

/// Valid setpoints are sent with six decimals and end up in the mirror exactly.
#[rstest]
#[case(1, 0.0, 0.0, ":SOUR1:VOLT 0.000000", ":SOUR1:CURR 0.000000")]
#[case(2, 5.0, 1.234567, ":SOUR2:VOLT 5.000000", ":SOUR2:CURR 1.234567")]
#[case(3, 64.0, 10.0, ":SOUR3:VOLT 64.000000", ":SOUR3:CURR 10.000000")]
fn test_set_vi(
    #[case] ch: usize,
    #[case] volts: f64,
    #[case] amperes: f64,
    #[case] cmd_v: &str,
    #[case] cmd_i: &str,
) {
    let (mut inst, _) = crt_inst(vec![cmd_v, cmd_i], vec![]);
    let mut channel = inst.get_channel(ch).unwrap();

    channel.set_vi(volts, amperes).unwrap();
    let setpoints = channel.state().setpoints;
    assert_eq!(setpoints.voltage.as_volts(), volts);
    assert_eq!(setpoints.current.as_amperes(), amperes);
}

/// Out of range values are rejected before anything is sent.
#[rstest]
#[case(-0.1, 1.0)]
#[case(64.000001, 1.0)]
#[case(f64::NAN, 1.0)]
#[case(5.0, -1.0)]
#[case(5.0, 10.5)]
fn test_set_vi_invalid(mut emp_inst: Dp2000Lbk, #[case] volts: f64, #[case] amperes: f64) {
    let before = emp_inst.statistics();
    let mut channel = emp_inst.get_channel(1).unwrap();

    let err = channel.set_vi(volts, amperes).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(emp_inst.statistics().command_count, before.command_count);
    assert_eq!(channel.state().setpoints, Setpoints::default());
}

#[rstest]
#[case(0)]
#[case(4)]
fn test_channel_out_of_range(mut emp_inst: Dp2000Lbk, #[case] ch: usize) {
    match emp_inst.get_channel(ch) {
        Err(InstrumentError::ChannelIndexOutOfRange { idx, nof_channels }) => {
            assert_eq!(idx, ch);
            assert_eq!(nof_channels, 3);
        }
        _ => panic!("Expected channel index out of range"),
    }
}

#[rstest]
#[case(true, ":OUTP1 ON")]
#[case(false, ":OUTP1 OFF")]
fn test_output(#[case] on: bool, #[case] cmd: &str) {
    let (mut inst, _) = crt_inst(vec![cmd], vec![]);
    let mut channel = inst.get_channel(1).unwrap();

    channel.output(on).unwrap();
    assert_eq!(channel.state().output_enabled, on);
}

/// With two retries, a failing write is attempted three times and counted as one error.
#[rstest]
fn test_output_transport_error() {
    let (mut inst, faults) = crt_inst(vec![], vec![]);
    faults.fail_writes(":OUTP1 ON", 3);
    let errors_before = inst.statistics().error_count;
    let mut channel = inst.get_channel(1).unwrap();

    let err = channel.output(true).unwrap_err();
    assert!(matches!(err, InstrumentError::Transport { attempts: 3, .. }));
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert_eq!(inst.statistics().error_count, errors_before + 1);
    assert_eq!(faults.remaining_write_failures(":OUTP1 ON"), 0);
    assert!(!channel.state().output_enabled);
}

/// The current is only sent after the voltage, the mirror is only updated if both went out.
#[rstest]
fn test_set_vi_partial_failure_keeps_mirror() {
    let (mut inst, faults) = crt_inst(vec![":SOUR1:VOLT 5.000000"], vec![]);
    faults.fail_writes(":SOUR1:CURR 1.000000", 3);
    let mut channel = inst.get_channel(1).unwrap();

    assert!(channel.set_vi(5.0, 1.0).is_err());
    assert_eq!(channel.state().setpoints, Setpoints::default());
}

#[rstest]
fn test_output_all_on() {
    let (mut inst, _) = crt_inst(vec![":OUTP:STAT ON"], vec![]);

    let report = inst.output_all(true).unwrap();
    assert!(report.is_complete());
    assert_eq!(report.switched, vec![1, 2, 3]);
    for ch in 1..=3 {
        assert!(inst.get_channel(ch).unwrap().state().output_enabled);
    }
}

/// Switching all outputs off carries on when one channel fails.
#[rstest]
fn test_output_all_off_best_effort() {
    let (mut inst, faults) = crt_inst_cfg(
        test_config(),
        ["1", "1", "1"],
        vec![":OUTP1 OFF", ":OUTP3 OFF"],
        vec![],
    );
    faults.fail_writes(":OUTP2 OFF", 3);

    let report = inst.output_all(false).unwrap();
    assert!(!report.is_complete());
    assert_eq!(report.switched, vec![1, 3]);
    assert_eq!(report.failed_channels(), vec![2]);
    assert_eq!(report.failed[0].1.kind(), ErrorKind::Transport);

    assert!(!inst.get_channel(1).unwrap().state().output_enabled);
    assert!(inst.get_channel(2).unwrap().state().output_enabled);
    assert!(!inst.get_channel(3).unwrap().state().output_enabled);
}

#[rstest]
fn test_emergency_stop() {
    let (mut inst, _) = crt_inst_cfg(
        test_config(),
        ["1", "0", "1"],
        vec![":OUTP1 OFF", ":OUTP2 OFF", ":OUTP3 OFF"],
        vec![],
    );

    inst.emergency_stop().unwrap();
    for ch in 1..=3 {
        assert!(!inst.get_channel(ch).unwrap().state().output_enabled);
    }
}

/// The emergency stop reports channels that could not be switched off.
#[rstest]
fn test_emergency_stop_fails() {
    let (mut inst, faults) = crt_inst_cfg(
        test_config(),
        ["1", "1", "1"],
        vec![":OUTP1 OFF", ":OUTP3 OFF"],
        vec![],
    );
    faults.fail_writes(":OUTP2 OFF", 3);

    match inst.emergency_stop() {
        Err(InstrumentError::ChannelsFailed { channels, .. }) => assert_eq!(channels, vec![2]),
        _ => panic!("Expected the emergency stop to fail on channel 2"),
    }
    assert!(!inst.get_channel(1).unwrap().state().output_enabled);
    assert!(inst.get_channel(2).unwrap().state().output_enabled);
}

#[rstest]
fn test_set_ovp_roundtrip() {
    let (mut inst, _) = crt_inst(
        vec![":SOUR2:VOLT:PROT:LEV 6.000000", ":SOUR2:VOLT:PROT:STAT ON"],
        vec![],
    );
    let mut channel = inst.get_channel(2).unwrap();

    channel.set_ovp(6.0, true).unwrap();
    let protection = channel.state().protection;
    assert_eq!(protection.ovp_level.as_volts(), 6.0);
    assert!(protection.ovp_enabled);
}

#[rstest]
fn test_set_ocp() {
    let (mut inst, _) = crt_inst(
        vec![":SOUR1:CURR:PROT:LEV 2.500000", ":SOUR1:CURR:PROT:STAT OFF"],
        vec![],
    );
    let mut channel = inst.get_channel(1).unwrap();

    channel.set_ocp(2.5, false).unwrap();
    let protection = channel.state().protection;
    assert_eq!(protection.ocp_level.as_amperes(), 2.5);
    assert!(!protection.ocp_enabled);
}

#[rstest]
fn test_set_protection_invalid(mut emp_inst: Dp2000Lbk) {
    let mut channel = emp_inst.get_channel(1).unwrap();
    assert!(matches!(
        channel.set_ovp(70.0, true),
        Err(InstrumentError::FloatValueOutOfRange { .. })
    ));
    assert!(channel.set_ocp(-1.0, true).is_err());
}

/// Protection settings applied to a channel are read back unchanged from the mirror.
#[rstest]
fn test_apply_protection_roundtrip() {
    let (mut inst, _) = crt_inst(
        vec![
            ":SOUR1:VOLT:PROT:LEV 6.000000",
            ":SOUR1:VOLT:PROT:STAT ON",
            ":SOUR1:CURR:PROT:LEV 0.000000",
            ":SOUR1:CURR:PROT:STAT OFF",
        ],
        vec![],
    );
    let settings = ProtectionSettings::try_new(6.0, true, 0.0, false).unwrap();
    let mut channel = inst.get_channel(1).unwrap();

    channel.apply_protection(&settings).unwrap();
    assert_eq!(channel.state().protection, settings);
}

#[rstest]
fn test_clear_trips() {
    let (mut inst, _) = crt_inst(vec![":OUTP3:OVP:CLEar", ":OUTP3:OCP:CLEar"], vec![]);
    let mut channel = inst.get_channel(3).unwrap();

    channel.clear_trips().unwrap();
    assert_eq!(channel.state().protection_state, ProtectionState::Normal);
}

#[rstest]
fn test_read_all() {
    let (mut inst, _) = crt_inst(
        vec![":MEAS:SCAL:ALL:DC? CH1"],
        vec!["5.000000,1.234567,6.172839"],
    );
    let mut channel = inst.get_channel(1).unwrap();

    let meas = channel.read_all().unwrap();
    assert_eq!(meas.voltage.as_volts(), 5.0);
    assert_eq!(meas.current.as_amperes(), 1.234567);
    assert_eq!(meas.power.as_watts(), 6.172839);
    assert_eq!(channel.state().measurement, Some(meas));
}

/// A reply with the wrong number of fields is a protocol error, it is neither retried nor
/// stored in the mirror.
#[rstest]
fn test_read_all_two_fields() {
    let (mut inst, _) = crt_inst(vec![":MEAS:SCAL:ALL:DC? CH1"], vec!["5.000000,1.234567"]);
    let mut channel = inst.get_channel(1).unwrap();
    let before = channel.state().measurement;

    let err = channel.read_all().unwrap_err();
    assert!(matches!(err, InstrumentError::ResponseParseError(_)));
    assert_eq!(err.kind(), ErrorKind::Protocol);
    assert_eq!(channel.state().measurement, before);
}

#[rstest]
fn test_read_v_and_i() {
    let (mut inst, _) = crt_inst(
        vec![":MEAS:SCAL:VOLT:DC? CH2", ":MEAS:SCAL:CURR:DC? CH2"],
        vec!["12.500000", "0.250000"],
    );
    let mut channel = inst.get_channel(2).unwrap();

    assert_eq!(channel.read_v().unwrap().as_volts(), 12.5);
    assert_eq!(channel.read_i().unwrap().as_amperes(), 0.25);
}

#[rstest]
fn test_read_output() {
    let (mut inst, _) = crt_inst(vec![":OUTP1?", ":OUTP1?"], vec!["1", "maybe"]);
    let mut channel = inst.get_channel(1).unwrap();

    assert!(channel.read_output().unwrap());
    assert!(channel.state().output_enabled);
    assert!(channel.read_output().is_err());
}

#[rstest]
fn test_update_all_measurements() {
    let (mut inst, _) = crt_inst(
        vec![
            ":MEAS:SCAL:ALL:DC? CH1",
            ":MEAS:SCAL:ALL:DC? CH2",
            ":MEAS:SCAL:ALL:DC? CH3",
        ],
        vec!["1.0,0.1,0.1", "2.0,0.2,0.4", "3.0,0.3,0.9"],
    );
    inst.update_all_measurements();
    let meas = inst.get_channel(3).unwrap().state().measurement.unwrap();
    assert_eq!(meas.voltage.as_volts(), 3.0);
}

/// The drain stops at the first zero code.
#[rstest]
fn test_query_errors() {
    let (mut inst, _) = crt_inst(
        vec![":SYST:ERR:NEXT?", ":SYST:ERR:NEXT?", ":SYST:ERR:NEXT?"],
        vec![
            "-113,\"Undefined header\"",
            "-222,\"Data out of range\"",
            "0,\"No error\"",
        ],
    );

    let errors = inst.query_errors();
    assert_eq!(errors.len(), 2);
    assert_eq!(errors[0].code, -113);
    assert_eq!(errors[1].message, "Data out of range");

    let status = inst.connection_status();
    assert_eq!(status.error_count, 2);
    assert_eq!(status.last_error.map(|e| e.code), Some(-222));
}

/// A queue that never reports empty is queried exactly the maximum number of times.
#[rstest]
fn test_query_errors_capped() {
    let h2i = vec![":SYST:ERR:NEXT?"; MAX_ERROR_QUERIES];
    let i2h = vec!["-350,\"Queue overflow\""; MAX_ERROR_QUERIES];
    let (mut inst, _) = crt_inst(h2i, i2h);

    assert_eq!(inst.query_errors().len(), MAX_ERROR_QUERIES);
    assert_eq!(inst.system_state().error_log().len(), MAX_ERROR_QUERIES);
}

/// A garbled entry ends the drain without an error.
#[rstest]
fn test_query_errors_garbled() {
    let (mut inst, _) = crt_inst(
        vec![":SYST:ERR:NEXT?", ":SYST:ERR:NEXT?"],
        vec!["-113,\"Undefined header\"", "garbage"],
    );
    assert_eq!(inst.query_errors().len(), 1);
}

/// With a zero interval, the error queue is drained after every state-changing command.
#[rstest]
fn test_check_errors_after_command() {
    let mut config = test_config();
    config.driver.error_check_interval_ms = 0;
    let (mut inst, _) = crt_inst_cfg(
        config,
        ["0", "0", "0"],
        vec![":OUTP1 ON", ":SYST:ERR:NEXT?", ":SYST:ERR:NEXT?"],
        vec!["-221,\"Settings conflict\"", "0,\"No error\""],
    );

    inst.get_channel(1).unwrap().output(true).unwrap();
    let sys = inst.system_state();
    assert_eq!(sys.error_log().len(), 1);
    assert_eq!(sys.last_error.unwrap().code, -221);
}

#[rstest]
fn test_clear_errors() {
    let (mut inst, _) = crt_inst(
        vec![":SYST:ERR:NEXT?", ":SYST:ERR:NEXT?", "*CLS"],
        vec!["-113,\"Undefined header\"", "0,\"No error\""],
    );
    inst.query_errors();

    inst.clear_errors().unwrap();
    assert!(inst.system_state().error_log().is_empty());
}

#[rstest]
fn test_status_registers() {
    let (mut inst, _) = crt_inst(vec!["*STB?", ":STAT:OPER:COND?", "*OPC?"], vec!["16", "1024", "1"]);

    assert_eq!(inst.read_stb().unwrap(), 16);
    assert_eq!(inst.read_oper_cond().unwrap(), 1024);
    inst.opc().unwrap();

    let sys = inst.system_state();
    assert_eq!(sys.status_byte, 16);
    assert_eq!(sys.operation_condition, 1024);
}

#[rstest]
fn test_system_features() {
    let (mut inst, _) = crt_inst(
        vec![
            ":SYST:SAMPling HIGH",
            ":OUTP:PAIR SER",
            ":OUTP:TRACk:STATe ON",
            ":SOUR1:SENS:REM ON",
            ":SOUR2:SENS:REM ON",
            ":SOUR3:SENS:REM ON",
        ],
        vec![],
    );

    inst.set_sampling(SamplingMode::High).unwrap();
    inst.set_pair(PairMode::Series);
    inst.set_tracking(true);
    inst.remote_sense(true);

    let sys = inst.system_state();
    assert_eq!(sys.sampling_mode, SamplingMode::High);
    assert_eq!(sys.pair_mode, PairMode::Series);
    assert!(sys.tracking_enabled);
    assert!(inst.get_channel(2).unwrap().state().remote_sense);
}

/// Pairing and tracking may not be supported, failures are only logged.
#[rstest]
fn test_unsupported_features_are_not_fatal() {
    let (mut inst, faults) = crt_inst(vec![], vec![]);
    faults.fail_writes(":OUTP:PAIR PAR", 3);
    faults.fail_writes(":OUTP:TRACk:STATe ON", 3);

    inst.set_pair(PairMode::Parallel);
    inst.set_tracking(true);

    let sys = inst.system_state();
    assert_eq!(sys.pair_mode, PairMode::None);
    assert!(!sys.tracking_enabled);
}

#[rstest]
fn test_remote_local() {
    let (mut inst, _) = crt_inst(vec![":SYST:LOC", ":SYST:REM"], vec![]);

    inst.to_local();
    assert!(!inst.system_state().remote_control);
    inst.to_remote().unwrap();
    assert!(inst.system_state().remote_control);
}

/// Closing switches all outputs off and returns to local control.
#[rstest]
fn test_close() {
    let (mut inst, _) = crt_inst_cfg(
        test_config(),
        ["1", "1", "0"],
        vec![":OUTP1 OFF", ":OUTP2 OFF", ":OUTP3 OFF", ":SYST:LOC"],
        vec![],
    );

    inst.close();
    assert!(!inst.is_connected());
    assert!(!inst.system_state().connected);
    assert!(!inst.get_channel(1).unwrap().state().output_enabled);

    // nothing is sent when closing again
    inst.close();
}

/// Closing completes even if the instrument does not accept commands anymore.
#[rstest]
fn test_close_with_failures() {
    let (mut inst, faults) = crt_inst(vec![":OUTP1 OFF", ":OUTP3 OFF"], vec![]);
    faults.fail_writes(":OUTP2 OFF", 3);
    faults.fail_writes(":SYST:LOC", 3);

    inst.close();
    assert!(!inst.is_connected());
}

/// Commands on a closed driver fail with a transport error and leave the mirror alone.
#[rstest]
fn test_not_connected() {
    let (mut inst, _) = crt_inst(vec![":OUTP1 OFF", ":OUTP2 OFF", ":OUTP3 OFF", ":SYST:LOC"], vec![]);
    inst.close();

    let mut channel = inst.get_channel(1).unwrap();
    let err = channel.set_vi(1.0, 1.0).unwrap_err();
    assert!(matches!(err, InstrumentError::NotConnected));
    assert_eq!(channel.state().setpoints, Setpoints::default());
    assert!(inst.query_errors().is_empty());
}

#[rstest]
fn test_check_connection() {
    let (mut inst, faults) = crt_inst(vec!["*IDN?", "*IDN?", "*IDN?", "*IDN?"], vec![IDN]);

    assert!(inst.check_connection());
    faults.fail_replies_to("*IDN?", 3);
    assert!(!inst.check_connection());
    assert!(!inst.system_state().connected);
}

#[rstest]
fn test_auto_reconnect() {
    let (mut inst, _) = crt_inst(vec![], vec![]);
    inst.with_connector(|connector| connector.push(idn_lbk()));

    assert!(inst.auto_reconnect());
    assert!(inst.is_connected());
    let status = inst.connection_status();
    assert!(status.connected);
    // the bring-up did not run again
    assert!(!status.initialized);
    assert_eq!(status.session.reconnect_count, 1);
}

/// Clones of the driver and its channels share one session.
#[rstest]
fn test_cloning_shares_session() {
    let (mut inst, _) = crt_inst(vec![":OUTP2 ON"], vec![]);
    let mut clone = inst.clone();
    let mut ch2 = clone.get_channel(2).unwrap();
    let ch2_clone = ch2.clone();

    ch2.output(true).unwrap();
    assert!(ch2_clone.state().output_enabled);
    assert!(inst.get_channel(2).unwrap().state().output_enabled);
    assert_eq!(ch2_clone.number(), 2);
}

/// Channels can be used from another thread.
#[rstest]
fn test_channel_in_thread() {
    let (mut inst, _) = crt_inst(vec![":SOUR1:VOLT 1.000000", ":SOUR1:CURR 0.100000"], vec![]);
    let mut ch1 = inst.get_channel(1).unwrap();

    std::thread::spawn(move || ch1.set_vi(1.0, 0.1).unwrap())
        .join()
        .unwrap();
    let setpoints = inst.get_channel(1).unwrap().state().setpoints;
    assert_eq!(setpoints.voltage.as_volts(), 1.0);
}

/// An invalid OCP level is rejected before the OVP commands are sent.
#[rstest]
fn test_apply_protection_invalid_ocp(mut emp_inst: Dp2000Lbk) {
    let before = emp_inst.statistics().command_count;
    let settings = ProtectionSettings::try_new(6.0, true, 50.0, true).unwrap();
    let mut channel = emp_inst.get_channel(1).unwrap();

    let err = channel.apply_protection(&settings).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(emp_inst.statistics().command_count, before);
    assert_eq!(channel.state().protection, ProtectionSettings::default());
}

/// The error queue is drained once the interval passed, but not before.
#[rstest]
fn test_check_errors_throttled() {
    let mut config = test_config();
    config.driver.error_check_interval_ms = 500;
    let (mut inst, _) = crt_inst_cfg(
        config,
        ["0", "0", "0"],
        vec![":OUTP1 ON", ":OUTP1 OFF", ":SYST:ERR:NEXT?", ":OUTP1 ON"],
        vec!["0,\"No error\""],
    );
    let mut channel = inst.get_channel(1).unwrap();

    channel.output(true).unwrap();
    std::thread::sleep(std::time::Duration::from_millis(600));
    channel.output(false).unwrap();
    channel.output(true).unwrap();
}

/// Dropping the last handle switches all outputs off and returns to local control.
#[rstest]
fn test_close_on_drop() {
    let mut config = test_config();
    config.driver.close_on_drop = true;
    let (mut inst, _) = crt_inst_cfg(
        config,
        ["1", "0", "0"],
        vec![":OUTP2 ON", ":OUTP1 OFF", ":OUTP2 OFF", ":OUTP3 OFF", ":SYST:LOC"],
        vec![],
    );
    let mut ch2 = inst.get_channel(2).unwrap();

    // other handles are still alive, nothing is sent
    drop(inst.clone());
    drop(inst);
    ch2.output(true).unwrap();

    // the scripted close sequence is checked when the loopback is dropped
    drop(ch2);
}

/// A driver that was closed already sends nothing when dropped.
#[rstest]
fn test_drop_after_close() {
    let mut config = test_config();
    config.driver.close_on_drop = true;
    let (mut inst, _) = crt_inst_cfg(
        config,
        ["0", "0", "0"],
        vec![":OUTP1 OFF", ":OUTP2 OFF", ":OUTP3 OFF", ":SYST:LOC"],
        vec![],
    );
    inst.close();
    drop(inst);
}

#[rstest]
fn test_with_recovery_passes_result() {
    let (mut inst, _) = crt_inst(vec!["*STB?"], vec!["16"]);
    assert_eq!(inst.with_recovery(|inst| inst.read_stb()).unwrap(), Some(16));
}

/// A transport error is recovered from by reconnecting, the failed command is not repeated.
#[rstest]
fn test_with_recovery_reconnects() {
    let (mut inst, faults) = crt_inst(vec![], vec![]);
    faults.fail_writes(":OUTP1 ON", 3);
    inst.with_connector(|connector| connector.push(idn_lbk()));

    let res = inst.with_recovery(|inst| inst.get_channel(1)?.output(true));
    assert!(matches!(res, Ok(None)));
    assert!(inst.is_connected());
    assert_eq!(inst.statistics().reconnect_count, 1);
    assert!(!inst.get_channel(1).unwrap().state().output_enabled);
}

/// If reconnecting fails, the original transport error is returned.
#[rstest]
fn test_with_recovery_reconnect_fails() {
    let (mut inst, faults) = crt_inst(vec![], vec![]);
    faults.fail_writes(":OUTP1 ON", 3);

    let err = inst
        .with_recovery(|inst| inst.get_channel(1)?.output(true))
        .unwrap_err();
    assert!(matches!(err, InstrumentError::Transport { attempts: 3, .. }));
    assert!(!inst.is_connected());
}

/// Other errors do not trigger a reconnection.
#[rstest]
fn test_with_recovery_ignores_validation(mut emp_inst: Dp2000Lbk) {
    let err = emp_inst
        .with_recovery(|inst| inst.get_channel(1)?.set_vi(-1.0, 0.0))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(emp_inst.is_connected());
    assert_eq!(emp_inst.with_connector(|connector| connector.opened().len()), 1);
}
