use lynxlink::SessionInfo;
use lynxlink_core::ParityMode;

fn main() {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let nodes: usize = match args.next() {
        Some(arg) => match arg.parse() {
            Ok(n) => n,
            Err(_) => {
                eprintln!("Invalid node count '{}'", arg);
                std::process::exit(1);
            }
        },
        None => 2,
    };
    let parity = match args.next().as_deref() {
        None | Some("odd") => ParityMode::Odd,
        Some("even") => ParityMode::Even,
        Some("space") => ParityMode::Space,
        Some("mark") => ParityMode::Mark,
        Some(other) => {
            eprintln!(
                "Unknown parity mode '{}'. Supported: odd, even, space, mark",
                other
            );
            std::process::exit(1);
        }
    };

    log::info!("Loopback session: {nodes} nodes, {parity:?} parity");
    let info = SessionInfo::builder().nodes(nodes).parity(parity).build();
    lynxlink::run_loopback(info).unwrap();
}
