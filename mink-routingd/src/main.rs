//! Routing daemon: accepts peer registrations and routes service traffic between them by
//! weighted round-robin (§4.6). Carries no application payload of its own.
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use slog::{error, info, o};

use mink_gdt::asn1::Endpoint;
use mink_gdt::cli::DaemonArgs;
use mink_gdt::log;
use mink_gdt::session::{Session, SessionConfig};

fn main() {
    let args = DaemonArgs::parse();
    if let Err(err) = args.validate() {
        eprintln!("mink-routingd: {}", err);
        std::process::exit(1);
    }

    let logger = log::root().new(o!("daemon" => "routingd", "id" => args.id.clone()));
    info!(logger, "starting"; "port" => args.port, "router" => true);

    let local = Endpoint::new("router", args.id.clone());
    let config = SessionConfig {
        stream_capacity: args.gdt_streams,
        stream_timeout: Duration::from_secs(args.gdt_stimeout),
        ..SessionConfig::default()
    };
    let session = Session::new(local, true, config);

    if let Err(err) = session.listen(&format!("0.0.0.0:{}", args.port)) {
        error!(logger, "failed to bind listener"; "err" => %err);
        std::process::exit(1);
    }

    for (peer_addr, peer_id) in args.routes.iter().zip(args.peer_ids.iter()) {
        let addr: SocketAddr = match peer_addr.parse() {
            Ok(addr) => addr,
            Err(err) => {
                error!(logger, "invalid -r address"; "addr" => peer_addr, "err" => %err);
                continue;
            }
        };
        match session.connect(addr, "router", args.id.clone()) {
            Ok(_) => info!(logger, "connected to routing peer"; "addr" => peer_addr, "expected_id" => peer_id),
            Err(err) => error!(logger, "failed to connect to routing peer"; "addr" => peer_addr, "err" => ?err),
        }
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGTERM, shutdown.clone())
        .expect("failed to register SIGTERM handler");

    while !shutdown.load(Ordering::Relaxed) {
        std::thread::sleep(Duration::from_millis(200));
    }

    info!(logger, "draining");
    session.stop();
}
