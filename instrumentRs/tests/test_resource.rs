//! Tests for resource strings and the [`ResourceConnector`].

use std::{
    io::{BufRead, BufReader, Write},
    net::TcpListener,
    thread,
    time::Duration,
};

use rstest::*;

use instrumentrs::{
    Connector, ErrorKind, InstrumentError, Resource, ResourceConnector, Session, SessionOptions,
};

#[rstest]
#[case("TCPIP0::192.168.1.100::5555::SOCKET", "192.168.1.100", 5555)]
#[case("TCPIP::10.0.0.2::5025::SOCKET", "10.0.0.2", 5025)]
#[case("TCPIP0::192.168.1.100::INSTR", "192.168.1.100", 5555)]
#[case("tcpip1::dp2031.local", "dp2031.local", 5555)]
fn test_parse_tcp(#[case] s: &str, #[case] host: &str, #[case] port: u16) {
    assert_eq!(
        s.parse::<Resource>().unwrap(),
        Resource::Tcp {
            host: host.to_string(),
            port
        }
    );
}

#[rstest]
#[case("ASRL/dev/ttyUSB0::INSTR", "/dev/ttyUSB0")]
#[case("ASRL3::INSTR", "COM3")]
#[case("ASRLCOM4", "COM4")]
fn test_parse_serial(#[case] s: &str, #[case] path: &str) {
    assert_eq!(
        s.parse::<Resource>().unwrap(),
        Resource::Serial {
            path: path.to_string()
        }
    );
}

#[rstest]
fn test_parse_usb_and_gpib() {
    let usb = "USB0::0x1AB1::0x0E11::DP2D251800001::INSTR";
    assert_eq!(
        usb.parse::<Resource>().unwrap(),
        Resource::Usb(usb.to_string())
    );
    assert_eq!(
        "GPIB0::5::INSTR".parse::<Resource>().unwrap(),
        Resource::Gpib("GPIB0::5::INSTR".to_string())
    );
}

#[rstest]
#[case("")]
#[case("TCPIP0")]
#[case("TCPIP0::::INSTR")]
#[case("TCPIPx::10.0.0.2::INSTR")]
#[case("TCPIP0::10.0.0.2::port::SOCKET")]
#[case("TCPIP0::10.0.0.2::5555::INSTR")]
#[case("ASRL")]
#[case("ASRL1::SOCKET")]
#[case("USB0::0x1AB1")]
#[case("GPIB0::x::INSTR")]
#[case("VXI0::1::INSTR")]
fn test_parse_invalid(#[case] s: &str) {
    let err = s.parse::<Resource>().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[rstest]
#[case("USB0::0x1AB1::0x0E11::DP2D251800001::INSTR")]
#[case("GPIB0::5::INSTR")]
fn test_connector_unsupported(#[case] s: &str) {
    let mut connector = ResourceConnector::default();
    assert!(matches!(
        connector.open(s, Duration::from_millis(100)),
        Err(InstrumentError::UnsupportedResource(_))
    ));
}

/// Connect a session through the resource connector to a local socket that answers `*IDN?`.
#[rstest]
fn test_connect_tcp_socket() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let mut writer = stream;
        let mut line = String::new();
        for reply in ["RIGOL TECHNOLOGIES,DP2031,DP2D0,00.01.14", "0"] {
            line.clear();
            reader.read_line(&mut line).unwrap();
            writer.write_all(format!("{reply}\n").as_bytes()).unwrap();
        }
    });

    let mut session = Session::new(ResourceConnector::default());
    let idn = session
        .connect(
            &format!("TCPIP0::127.0.0.1::{port}::SOCKET"),
            SessionOptions::default(),
        )
        .unwrap();
    assert_eq!(idn, "RIGOL TECHNOLOGIES,DP2031,DP2D0,00.01.14");
    assert_eq!(session.query("*STB?").unwrap(), "0");

    session.disconnect();
    server.join().unwrap();
}
