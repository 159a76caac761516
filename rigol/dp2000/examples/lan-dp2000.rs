use rigol_dp2000::{Dp2000, Dp2000Config};

fn main() {
    // RUST_LOG=debug shows every exchange with the instrument
    env_logger::init();

    let resource = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "TCPIP0::192.168.1.100::INSTR".to_string());

    // An optional configuration file can be given as the second argument
    let config = match std::env::args().nth(2) {
        Some(path) => Dp2000Config::from_file(path).expect("Failed to read configuration"),
        None => Dp2000Config::default(),
    };

    let mut inst = Dp2000::try_connect(&resource, config).expect("Failed to connect");
    println!("Instrument ID: {}", inst.idn().unwrap());

    // Set channel 1 to 5 V with a current limit of 100 mA and protect it
    let mut ch1 = inst.get_channel(1).unwrap();
    ch1.set_vi(5.0, 0.1).unwrap();
    ch1.set_ovp(5.5, true).unwrap();
    ch1.output(true).unwrap();

    println!("Channel 1: {:?}", ch1.read_all().unwrap());

    for err in inst.query_errors() {
        println!("Instrument error: {err}");
    }
    println!("{:?}", inst.connection_status());

    // Switches all outputs off before disconnecting
    inst.close();
}
