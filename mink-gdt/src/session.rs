//! Session: the daemon-facing entry point that owns the client table, the routing handler, and
//! the 1 Hz timer thread (§4.3).
use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use slog::{info, warn};

use crate::asn1::{Endpoint, MessageId, MessageIdGenerator};
use crate::client::{Client, ClientConfig, LifecycleCallback, MessageCallback, StreamEndCallback};
use crate::log;
use crate::registration::RegistrationError;
use crate::registry::Registry;
use crate::routing::RoutingHandler;
use crate::transport::framed::TcpFramedTransport;
use crate::transport::Transport;

const DEFAULT_OUTBOUND_CAPACITY: usize = 256;
const DEFAULT_STREAM_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_HEARTBEAT_THRESHOLD: u32 = 3;
const REGISTRATION_TIMEOUT: Duration = Duration::from_secs(10);
const TIMER_TICK: Duration = Duration::from_secs(1);

/// Session-level lifecycle events a caller can subscribe to via [`Session::register_callback`]
/// (§4.4's client-new / client-terminated / client-reconnecting / stream-new table).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    ClientNew,
    ClientTerminated,
    ClientReconnecting,
    StreamNew,
    StreamEnd,
}

pub enum SessionHandler {
    Lifecycle(LifecycleCallback),
    Message(MessageCallback),
    StreamEnd(StreamEndCallback),
}

fn noop_lifecycle() -> LifecycleCallback {
    Arc::new(|_client: &Arc<Client>| {})
}

fn noop_message() -> MessageCallback {
    Arc::new(|_client: &Arc<Client>, _message| {})
}

fn noop_stream_end() -> StreamEndCallback {
    Arc::new(|_client: &Arc<Client>, _stream_id, _status| {})
}

/// Per-stream-capacity and timing knobs exposed on the wire as `--gdt-streams`/`--gdt-stimeout`
/// (§6 "Process interface").
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    pub stream_capacity: usize,
    pub stream_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub heartbeat_threshold: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            stream_capacity: 1024,
            stream_timeout: DEFAULT_STREAM_TIMEOUT,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            heartbeat_threshold: DEFAULT_HEARTBEAT_THRESHOLD,
        }
    }
}

pub struct Session {
    local: Endpoint,
    router_flag: bool,
    config: SessionConfig,
    id_gen: Arc<MessageIdGenerator>,
    clients: RwLock<Registry<Endpoint, Arc<Client>>>,
    pending: Mutex<Vec<Arc<Client>>>,
    routing: Arc<RoutingHandler<Client>>,
    shutdown: Arc<AtomicBool>,
    timer_handle: Mutex<Option<JoinHandle<()>>>,
    listener_handle: Mutex<Option<JoinHandle<()>>>,
    on_client_new: Mutex<LifecycleCallback>,
    on_client_terminated: Mutex<LifecycleCallback>,
    on_client_reconnecting: Mutex<LifecycleCallback>,
    on_stream_new: Mutex<MessageCallback>,
    on_stream_end: Mutex<StreamEndCallback>,
}

impl Session {
    pub fn new(local: Endpoint, router_flag: bool, config: SessionConfig) -> Arc<Session> {
        let session = Arc::new(Session {
            local,
            router_flag,
            config,
            id_gen: Arc::new(MessageIdGenerator::new()),
            clients: RwLock::new(Registry::new()),
            pending: Mutex::new(Vec::new()),
            routing: Arc::new(RoutingHandler::new()),
            shutdown: Arc::new(AtomicBool::new(false)),
            timer_handle: Mutex::new(None),
            listener_handle: Mutex::new(None),
            on_client_new: Mutex::new(noop_lifecycle()),
            on_client_terminated: Mutex::new(noop_lifecycle()),
            on_client_reconnecting: Mutex::new(noop_lifecycle()),
            on_stream_new: Mutex::new(noop_message()),
            on_stream_end: Mutex::new(noop_stream_end()),
        });
        session.start_timer();
        session
    }

    pub fn routing(&self) -> Arc<RoutingHandler<Client>> {
        self.routing.clone()
    }

    /// Attach a session-level handler (§4.3 `register_callback`). Panics if `handler`'s variant
    /// doesn't match `event` — a programmer error, not a runtime condition.
    pub fn register_callback(&self, event: SessionEvent, handler: SessionHandler) {
        match (event, handler) {
            (SessionEvent::ClientNew, SessionHandler::Lifecycle(h)) => *self.on_client_new.lock().unwrap() = h,
            (SessionEvent::ClientTerminated, SessionHandler::Lifecycle(h)) => {
                *self.on_client_terminated.lock().unwrap() = h
            }
            (SessionEvent::ClientReconnecting, SessionHandler::Lifecycle(h)) => {
                *self.on_client_reconnecting.lock().unwrap() = h
            }
            (SessionEvent::StreamNew, SessionHandler::Message(h)) => *self.on_stream_new.lock().unwrap() = h,
            (SessionEvent::StreamEnd, SessionHandler::StreamEnd(h)) => *self.on_stream_end.lock().unwrap() = h,
            _ => panic!("callback handler kind does not match the event it was registered for"),
        }
    }

    fn client_config(self: &Arc<Self>) -> ClientConfig {
        let session_for_new = self.clone();
        let session_for_terminated = self.clone();
        let session_for_reconnecting = self.clone();
        let session_for_stream = self.clone();
        let session_for_stream_end = self.clone();
        let session_for_conflict = self.clone();

        ClientConfig {
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            stream_capacity: self.config.stream_capacity,
            stream_timeout: self.config.stream_timeout,
            heartbeat_interval: self.config.heartbeat_interval,
            heartbeat_threshold: self.config.heartbeat_threshold,
            on_stream_new: Arc::new(move |client, message| {
                (session_for_stream.on_stream_new.lock().unwrap())(client, message);
            }),
            on_stream_end: Arc::new(move |client, stream_id, status| {
                (session_for_stream_end.on_stream_end.lock().unwrap())(client, stream_id, status);
            }),
            on_registered: Arc::new(move |client| session_for_new.handle_client_registered(client)),
            on_terminated: Arc::new(move |client| session_for_terminated.handle_client_terminated(client)),
            on_reconnecting: Arc::new(move |client| session_for_reconnecting.handle_client_reconnecting(client)),
            on_check_conflict: Arc::new(move |peer, candidate| session_for_conflict.has_conflicting_registration(peer, candidate)),
        }
    }

    fn handle_client_registered(self: &Arc<Self>, client: &Arc<Client>) {
        if let Some(peer) = client.peer_endpoint() {
            self.clients.write().unwrap().register(peer.clone(), client.clone());
            if self.router_flag || client.is_router() {
                self.routing.add_node(peer.daemon_type.clone(), peer, client.clone(), 1);
            }
        }
        (self.on_client_new.lock().unwrap())(client);
    }

    /// Whether `peer` is already registered under a client other than `candidate` (§4.3
    /// invariant (a)): the conflict check `Client::handle_registration_request` runs before
    /// accepting a new REQUEST.
    fn has_conflicting_registration(&self, peer: &Endpoint, candidate: &Arc<Client>) -> bool {
        match self.clients.read().unwrap().get(peer) {
            Some(existing) => !Arc::ptr_eq(&*existing.read().unwrap(), candidate),
            None => false,
        }
    }

    /// A heartbeat-miss crossing (§4.7) pulls the client out of the routing table and client
    /// registry just like a terminated client, so `RoutingHandler::get` stops handing it out;
    /// unlike termination, the `Client` itself stays alive and can re-register later (§8
    /// "Heartbeat recovery" re-adds it via `handle_client_registered`).
    fn handle_client_reconnecting(&self, client: &Arc<Client>) {
        if let Some(peer) = client.peer_endpoint() {
            self.clients.write().unwrap().remove(&peer);
            self.routing.remove_node(&peer.daemon_type, &peer);
        }
        (self.on_client_reconnecting.lock().unwrap())(client);
    }

    fn handle_client_terminated(&self, client: &Arc<Client>) {
        if let Some(peer) = client.peer_endpoint() {
            self.clients.write().unwrap().remove(&peer);
            self.routing.remove_node(&peer.daemon_type, &peer);
        }
        (self.on_client_terminated.lock().unwrap())(client);
    }

    /// Look up a registered client by peer endpoint.
    pub fn client(&self, peer: &Endpoint) -> Option<Arc<Client>> {
        self.clients.read().unwrap().get(peer).map(|h| h.read().unwrap().clone())
    }

    /// Accept a connection that already has its transport, driving it as a passive peer that
    /// will send the registration REQUEST (§4.5).
    fn accept(self: &Arc<Self>, transport: Box<dyn Transport>) {
        let client = Client::spawn(transport, self.local.clone(), self.router_flag, self.id_gen.clone(), self.client_config());
        self.pending.lock().unwrap().push(client);
    }

    /// Open a passive transport; every accepted peer becomes a Client (§4.3 `listen`). Returns
    /// the bound address, so a `:0` port request resolves to the address peers should connect
    /// to.
    pub fn listen(self: &Arc<Self>, bind_spec: &str) -> std::io::Result<SocketAddr> {
        let listener = TcpListener::bind(bind_spec)?;
        let local_addr = listener.local_addr()?;
        let session = self.clone();
        let shutdown = self.shutdown.clone();

        let handle = thread::spawn(move || {
            for incoming in listener.incoming() {
                if shutdown.load(Ordering::Acquire) {
                    break;
                }
                match incoming {
                    Ok(stream) => match TcpFramedTransport::new(stream) {
                        Ok(transport) => session.accept(Box::new(transport)),
                        Err(err) => warn!(log::root(), "failed to prepare accepted transport"; "err" => %err),
                    },
                    Err(err) => warn!(log::root(), "accept failed"; "err" => %err),
                }
            }
        });
        *self.listener_handle.lock().unwrap() = Some(handle);
        Ok(local_addr)
    }

    /// Open an active transport, construct a Client, drive the registration handshake, and
    /// return the registered Client or fail (§4.3 `connect`).
    pub fn connect(self: &Arc<Self>, peer_addr: SocketAddr, daemon_type: impl Into<String>, daemon_id: impl Into<String>) -> Result<Arc<Client>, RegistrationError> {
        let transport =
            TcpFramedTransport::connect(peer_addr).map_err(|_| RegistrationError::Timeout)?;
        let client = Client::spawn(
            Box::new(transport),
            self.local.clone(),
            self.router_flag,
            self.id_gen.clone(),
            self.client_config(),
        );

        client.register_as_initiator(daemon_type, daemon_id, self.router_flag, REGISTRATION_TIMEOUT)?;
        Ok(client)
    }

    fn start_timer(self: &Arc<Self>) {
        let session = self.clone();
        let shutdown = self.shutdown.clone();

        let handle = thread::spawn(move || {
            while !shutdown.load(Ordering::Acquire) {
                thread::sleep(TIMER_TICK);
                session.tick(Instant::now());
            }
        });
        *self.timer_handle.lock().unwrap() = Some(handle);
    }

    fn tick(&self, now: Instant) {
        // Clients move out of `pending` into the registered table once their handshake
        // completes (`handle_client_registered`); anything left here is still registering.
        self.pending.lock().unwrap().retain(|c| !c.is_registered());

        let snapshot: Vec<Arc<Client>> = self
            .clients
            .read()
            .unwrap()
            .iter()
            .map(|(_, handle)| handle.read().unwrap().clone())
            .collect();

        for client in snapshot {
            let timed_out = client.poll_timeouts();
            if !timed_out.is_empty() {
                info!(log::root(), "streams timed out"; "count" => timed_out.len());
            }
            client.poll_heartbeat(now);
        }
    }

    /// Idempotent shutdown: stop accept, mark all clients draining, wait briefly, then close
    /// transports (§4.3 `stop`).
    pub fn stop(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }

        for (_, handle) in self.clients.read().unwrap().iter() {
            handle.read().unwrap().stop();
        }
        for client in self.pending.lock().unwrap().iter() {
            client.stop();
        }
    }

    pub fn next_message_id(&self) -> MessageId {
        self.id_gen.next()
    }
}
