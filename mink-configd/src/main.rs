//! Configuration daemon: wire-level `ConfigMessage` protocol, commit log, and NOTIFY fan-out
//! (§4.9, §6). No CLI grammar or interactive shell — an explicit non-goal.
mod seed;
mod store;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use slog::{error, info, o};

use mink_gdt::asn1::{Body, Endpoint};
use mink_gdt::cli::DaemonArgs;
use mink_gdt::config::ConfigAction;
use mink_gdt::log;
use mink_gdt::session::{Session, SessionConfig, SessionEvent, SessionHandler};

use store::Store;

fn main() {
    let args = DaemonArgs::parse();
    if let Err(err) = args.validate() {
        eprintln!("mink-configd: {}", err);
        std::process::exit(1);
    }

    let logger = log::root().new(o!("daemon" => "configd", "id" => args.id.clone()));
    info!(logger, "starting"; "port" => args.port);

    let store = match Store::open("./commit-log") {
        Ok(store) => Arc::new(store),
        Err(err) => {
            error!(logger, "failed to open commit log"; "err" => %err);
            std::process::exit(1);
        }
    };

    if let Some(path) = &args.contents_file {
        match seed::load(path) {
            Ok(entries) => {
                info!(logger, "seeding store from contents file"; "path" => path, "paths" => entries.len());
                for (entry_path, params) in entries {
                    store.seed(entry_path, params);
                }
            }
            Err(err) => {
                error!(logger, "failed to read contents file"; "path" => path, "err" => %err);
                std::process::exit(1);
            }
        }
    }

    let local = Endpoint::new("configd", args.id.clone());
    let config = SessionConfig {
        stream_capacity: args.gdt_streams,
        stream_timeout: Duration::from_secs(args.gdt_stimeout),
        ..SessionConfig::default()
    };
    let session = Session::new(local, args.router, config);

    let store_for_stream = store.clone();
    let stream_logger = logger.clone();
    let session_for_stream = session.clone();
    session.register_callback(
        SessionEvent::StreamNew,
        SessionHandler::Message(Arc::new(move |client, message| {
            let request = match &message.body {
                Body::Config(request) => request.clone(),
                _ => return,
            };
            let source = message.header.source.clone();
            let in_reply_to = message.header.message_id;
            let (reply, notify_users) = store_for_stream.apply(&request);
            let _ = client.reply_config(source, in_reply_to, reply);

            if !notify_users.is_empty() {
                let mut notify = mink_gdt::config::ConfigMessage::new(ConfigAction::Notify, request.path.clone());
                notify.params = request.params.clone();
                for user in &notify_users {
                    let target = Endpoint::new("user", user.clone());
                    match session_for_stream.client(&target) {
                        Some(target_client) => {
                            let _ = target_client.send_config(target.clone(), notify.clone());
                        }
                        None => {
                            slog::debug!(stream_logger, "no live session for notify target"; "user" => user);
                        }
                    }
                }
            }
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
        match session.connect(addr, "configd", args.id.clone()) {
            Ok(_) => info!(logger, "connected to peer"; "addr" => peer_addr, "expected_id" => peer_id),
            Err(err) => error!(logger, "failed to connect to peer"; "addr" => peer_addr, "err" => ?err),
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
