//! System-agent host daemon: exposes the `AgentPlugin` dispatch loop that real plugins (ubus,
//! mqtt, systemd, sqlite auth, cgroup2, lua, sysmon) would implement against. No concrete
//! plugin is registered here — that set is explicitly out of scope (§1, §4.10).
mod host;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use slog::{error, info, o};

use mink_gdt::asn1::Endpoint;
use mink_gdt::cli::DaemonArgs;
use mink_gdt::log;
use mink_gdt::session::{Session, SessionConfig, SessionEvent, SessionHandler};

use host::PluginHost;

const DEST_TYPE: &str = "sysagent";

fn main() {
    let args = DaemonArgs::parse();
    if let Err(err) = args.validate() {
        eprintln!("mink-sysagentd: {}", err);
        std::process::exit(1);
    }

    let logger = log::root().new(o!("daemon" => "sysagentd", "id" => args.id.clone()));
    info!(logger, "starting"; "port" => args.port);

    let host = Arc::new(PluginHost::new(DEST_TYPE));

    let local = Endpoint::new(DEST_TYPE, args.id.clone());
    let config = SessionConfig {
        stream_capacity: args.gdt_streams,
        stream_timeout: Duration::from_secs(args.gdt_stimeout),
        ..SessionConfig::default()
    };
    let session = Session::new(local, args.router, config);

    let host_for_stream = host.clone();
    session.register_callback(
        SessionEvent::StreamNew,
        SessionHandler::Message(Arc::new(move |client, message| {
            host_for_stream.on_stream_new(client, message);
        })),
    );

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
        match session.connect(addr, DEST_TYPE, args.id.clone()) {
            Ok(_) => info!(logger, "connected to peer"; "addr" => peer_addr, "expected_id" => peer_id),
            Err(err) => error!(logger, "failed to connect to peer"; "addr" => peer_addr, "err" => ?err),
        }
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGTERM, shutdown.clone())
        .expect("failed to register SIGTERM handler");

    let tick_shutdown = shutdown.clone();
    let tick_host = host.clone();
    let tick_handle = std::thread::spawn(move || {
        while !tick_shutdown.load(Ordering::Relaxed) {
            std::thread::sleep(Duration::from_secs(1));
            tick_host.tick();
        }
    });

    while !shutdown.load(Ordering::Relaxed) {
        std::thread::sleep(Duration::from_millis(200));
    }

    info!(logger, "draining");
    session.stop();
    let _ = tick_handle.join();
}
