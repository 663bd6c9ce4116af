//! Client: one transport connection and the registration/heartbeat/stream state layered on
//! top of it (§4.3, §4.5, §4.7).
//!
//! Per §5 ("each transport connection owns two threads"), `Client::spawn` splits the transport
//! and hands one half to a reader thread, the other to a writer thread draining an outbound
//! queue; both threads hold an `Arc<Client>` and report back through the callbacks the caller
//! supplied, mirroring the push/pull split in the teacher's `net::endpoint::Endpoint`.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex, RwLock, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use slog::{debug, warn};

use crate::asn1::wire::{decode_message, encode_message};
use crate::asn1::{Body, Endpoint, Header, Message, MessageId, MessageIdGenerator};
use crate::heartbeat::{Heartbeat, HeartbeatState};
use crate::log;
use crate::config::ConfigMessage;
use crate::registration::{self, RegAction, RegistrationError, RegistrationMessage};
use crate::service::ServiceMessage;
use crate::spsc;
use crate::stream::{StreamTable, TIMEOUT_STATUS};
use crate::transport::Transport;
use crate::util::ratelimit::RateLimiter;

/// Status returned to a peer that re-sends REG_REQUEST after already completing registration
/// (§8 "Registration idempotence").
const STATUS_ALREADY_REGISTERED: i32 = 2;
/// Status returned when a REQUEST names a (type, id) already registered under a different
/// client in the same session (§4.3 invariant (a)): the newer registration is closed, not the
/// existing one (§4.5 failure modes).
const STATUS_CONFLICTING_ENDPOINT: i32 = 3;

pub type MessageCallback = Arc<dyn Fn(&Arc<Client>, Message) + Send + Sync>;
pub type LifecycleCallback = Arc<dyn Fn(&Arc<Client>) + Send + Sync>;
/// Fired once a stream's terminal frame has been processed (§4.4 "stream-end"), carrying the
/// stream's id and the status the terminal frame closed with.
pub type StreamEndCallback = Arc<dyn Fn(&Arc<Client>, MessageId, i32) + Send + Sync>;
/// Asked by `handle_registration_request` before accepting a REQUEST: true if `peer` is already
/// registered under some other client in the owning session (§4.3 invariant (a)).
pub type ConflictCheckCallback = Arc<dyn Fn(&Endpoint, &Arc<Client>) -> bool + Send + Sync>;

/// Tuning and callback wiring handed to [`Client::spawn`] by the owning `Session`.
pub struct ClientConfig {
    pub outbound_capacity: usize,
    pub stream_capacity: usize,
    pub stream_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub heartbeat_threshold: u32,
    pub on_stream_new: MessageCallback,
    pub on_stream_end: StreamEndCallback,
    pub on_registered: LifecycleCallback,
    pub on_terminated: LifecycleCallback,
    pub on_reconnecting: LifecycleCallback,
    pub on_check_conflict: ConflictCheckCallback,
}

struct UuidSource {
    epoch_nanos: u128,
}

impl UuidSource {
    fn new() -> UuidSource {
        let epoch_nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        UuidSource { epoch_nanos }
    }

    fn next(&self, message_id: MessageId) -> u128 {
        self.epoch_nanos ^ (message_id as u128)
    }
}

/// One transport connection, registered or in the process of registering (§4.3).
pub struct Client {
    self_weak: Weak<Client>,
    local: Endpoint,
    peer: RwLock<Option<Endpoint>>,
    router_flag: AtomicBool,
    registered: AtomicBool,
    uuid_source: UuidSource,
    id_gen: Arc<MessageIdGenerator>,
    streams: Mutex<StreamTable>,
    local_streams: Mutex<StreamTable>,
    late_reply_limiter: Mutex<RateLimiter>,
    stream_timeout: Duration,
    heartbeat: Mutex<Heartbeat>,
    outbound: Mutex<Option<spsc::Producer<Vec<u8>>>>,
    pending_registration: Mutex<Option<mpsc::Sender<RegistrationMessage>>>,
    on_stream_new: MessageCallback,
    on_stream_end: StreamEndCallback,
    on_registered: LifecycleCallback,
    on_terminated: LifecycleCallback,
    on_reconnecting: LifecycleCallback,
    on_check_conflict: ConflictCheckCallback,
    reader_handle: Mutex<Option<JoinHandle<()>>>,
    writer_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Client {
    /// Split `transport` into reader/writer halves and spin up its two threads (§5).
    pub fn spawn(
        transport: Box<dyn Transport>,
        local: Endpoint,
        router_flag: bool,
        id_gen: Arc<MessageIdGenerator>,
        config: ClientConfig,
    ) -> Arc<Client> {
        let (mut reader, mut writer) = transport.split();
        let (producer, consumer) = spsc::channel(config.outbound_capacity);

        let client = Arc::new_cyclic(|weak| Client {
            self_weak: weak.clone(),
            local,
            peer: RwLock::new(None),
            router_flag: AtomicBool::new(router_flag),
            registered: AtomicBool::new(false),
            uuid_source: UuidSource::new(),
            id_gen,
            streams: Mutex::new(StreamTable::new(config.stream_capacity)),
            local_streams: Mutex::new(StreamTable::new(config.stream_capacity)),
            late_reply_limiter: Mutex::new(RateLimiter::new(5, 1)),
            stream_timeout: config.stream_timeout,
            heartbeat: Mutex::new(Heartbeat::new(config.heartbeat_interval, config.heartbeat_threshold)),
            outbound: Mutex::new(Some(producer)),
            pending_registration: Mutex::new(None),
            on_stream_new: config.on_stream_new,
            on_stream_end: config.on_stream_end,
            on_registered: config.on_registered,
            on_terminated: config.on_terminated,
            on_reconnecting: config.on_reconnecting,
            on_check_conflict: config.on_check_conflict,
            reader_handle: Mutex::new(None),
            writer_handle: Mutex::new(None),
        });

        let writer_thread = thread::spawn(move || {
            while let Some(bytes) = consumer.pop_blocking() {
                if writer.send_record(&bytes).is_err() {
                    break;
                }
            }
            writer.shutdown();
        });

        let reader_thread = {
            let client = client.clone();
            thread::spawn(move || {
                loop {
                    match reader.recv_record() {
                        Ok(bytes) => client.on_record(&bytes),
                        Err(err) => {
                            debug!(log::root(), "client reader stopped"; "err" => %err);
                            break;
                        }
                    }
                }
                client.mark_terminated();
            })
        };

        *client.writer_handle.lock().unwrap() = Some(writer_thread);
        *client.reader_handle.lock().unwrap() = Some(reader_thread);

        client
    }

    pub fn local_endpoint(&self) -> &Endpoint {
        &self.local
    }

    pub fn peer_endpoint(&self) -> Option<Endpoint> {
        self.peer.read().unwrap().clone()
    }

    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::Acquire)
    }

    pub fn is_router(&self) -> bool {
        self.router_flag.load(Ordering::Acquire)
    }

    fn next_header(&self, destination: Endpoint, status: i32) -> Header {
        let message_id = self.id_gen.next();
        self.reply_header(destination, message_id, status)
    }

    /// Build a header that closes out `message_id` (§4.4's "outbound request ↔ inbound reply by
    /// message id" correlation) instead of minting a fresh one.
    fn reply_header(&self, destination: Endpoint, message_id: MessageId, status: i32) -> Header {
        Header {
            source: self.local.clone(),
            destination,
            uuid: self.uuid_source.next(message_id),
            message_id,
            sequence_num: 0,
            sequence_flag: true,
            status,
            hop_info: 0,
        }
    }

    /// Encode and hand `message` to the writer thread. Fails if the outbound queue is full or
    /// the client has already been stopped.
    pub fn send(&self, message: &Message) -> Result<(), ()> {
        let bytes = encode_message(message);
        let guard = self.outbound.lock().unwrap();
        match guard.as_ref() {
            Some(producer) => producer.push(bytes).map_err(|_| ()),
            None => Err(()),
        }
    }

    /// Send a service message to `destination`, reserving a fresh stream id for it and tracking
    /// it locally so the reply correlates by message id and a missing reply times out (§4.4).
    pub fn send_service(&self, destination: Endpoint, msg: ServiceMessage) -> Result<MessageId, ()> {
        let header = self.next_header(destination, 0);
        let id = header.message_id;
        let _ = self.local_streams.lock().unwrap().open(id, None);
        let message = Message::new(header, Body::Service(msg));
        self.send(&message)?;
        Ok(id)
    }

    /// Reply to an already-received service stream, reusing its message id so the sender's
    /// stream table correlates the reply instead of mistaking it for a new exchange.
    pub fn reply_service(&self, destination: Endpoint, in_reply_to: MessageId, status: i32, msg: ServiceMessage) -> Result<(), ()> {
        let header = self.reply_header(destination, in_reply_to, status);
        let message = Message::new(header, Body::Service(msg));
        self.send(&message)
    }

    /// Send a configuration protocol message to `destination` (§4.9), mirroring
    /// [`Client::send_service`] for the config body variant.
    pub fn send_config(&self, destination: Endpoint, msg: ConfigMessage) -> Result<MessageId, ()> {
        let header = self.next_header(destination, msg.status);
        let id = header.message_id;
        let _ = self.local_streams.lock().unwrap().open(id, None);
        let message = Message::new(header, Body::Config(msg));
        self.send(&message)?;
        Ok(id)
    }

    /// Reply to an already-received configuration stream, reusing its message id (mirrors
    /// [`Client::reply_service`]).
    pub fn reply_config(&self, destination: Endpoint, in_reply_to: MessageId, msg: ConfigMessage) -> Result<(), ()> {
        let header = self.reply_header(destination, in_reply_to, msg.status);
        let message = Message::new(header, Body::Config(msg));
        self.send(&message)
    }

    /// Drive the initiator side of the registration handshake (§4.5) and block for the result.
    pub fn register_as_initiator(
        &self,
        daemon_type: impl Into<String>,
        daemon_id: impl Into<String>,
        router_flag: bool,
        timeout: Duration,
    ) -> Result<(), RegistrationError> {
        let request = RegistrationMessage::request(daemon_type, daemon_id, router_flag);
        registration::validate(&request)?;

        let (tx, rx) = mpsc::channel();
        *self.pending_registration.lock().unwrap() = Some(tx);

        let header = self.next_header(Endpoint::new("", ""), 0);
        let message = Message::new(header, Body::Registration(request));
        self.send(&message).map_err(|_| RegistrationError::Timeout)?;

        let result = rx.recv_timeout(timeout).map_err(|_| RegistrationError::Timeout)?;
        self.apply_registration_result(result)
    }

    fn apply_registration_result(&self, result: RegistrationMessage) -> Result<(), RegistrationError> {
        if result.is_success() {
            *self.peer.write().unwrap() = Some(Endpoint::new(result.daemon_type, result.daemon_id));
            self.router_flag.store(result.router_flag, Ordering::Release);
            self.registered.store(true, Ordering::Release);
            self.heartbeat.lock().unwrap().on_reregistered();
            if let Some(client) = self.self_weak.upgrade() {
                (self.on_registered)(&client);
            }
            Ok(())
        } else if result.status == STATUS_CONFLICTING_ENDPOINT {
            Err(RegistrationError::ConflictingEndpoint)
        } else {
            Err(RegistrationError::Rejected(result.status))
        }
    }

    fn handle_registration_request(&self, request: RegistrationMessage) {
        if self.is_registered() {
            // §8 "Registration idempotence": a repeated REQUEST after a RESULT is answered with
            // an error and otherwise dropped, not re-processed and not re-fired to on_registered.
            let reply = RegistrationMessage::result(
                self.local.daemon_type.clone(),
                self.local.daemon_id.clone(),
                self.router_flag.load(Ordering::Acquire),
                STATUS_ALREADY_REGISTERED,
            );
            let header = self.next_header(Endpoint::new(request.daemon_type, request.daemon_id), STATUS_ALREADY_REGISTERED);
            let message = Message::new(header, Body::Registration(reply));
            let _ = self.send(&message);
            return;
        }

        let mut status = match registration::validate(&request) {
            Ok(()) => 0,
            Err(_) => 1,
        };

        let candidate_peer = Endpoint::new(request.daemon_type.clone(), request.daemon_id.clone());
        if status == 0 {
            if let Some(candidate) = self.self_weak.upgrade() {
                if (self.on_check_conflict)(&candidate_peer, &candidate) {
                    status = STATUS_CONFLICTING_ENDPOINT;
                }
            }
        }

        if status == 0 {
            *self.peer.write().unwrap() = Some(candidate_peer);
            self.registered.store(true, Ordering::Release);
            self.heartbeat.lock().unwrap().on_reregistered();
        }

        let reply = RegistrationMessage::result(
            self.local.daemon_type.clone(),
            self.local.daemon_id.clone(),
            self.router_flag.load(Ordering::Acquire),
            status,
        );
        let header = self.next_header(Endpoint::new(request.daemon_type, request.daemon_id), status);
        let message = Message::new(header, Body::Registration(reply));
        let _ = self.send(&message);

        if status == 0 {
            if let Some(client) = self.self_weak.upgrade() {
                (self.on_registered)(&client);
            }
        } else {
            self.stop();
        }
    }

    fn on_record(&self, bytes: &[u8]) {
        let message = match decode_message(bytes) {
            Ok(message) => message,
            Err(err) => {
                warn!(log::root(), "dropping malformed record"; "err" => ?err);
                return;
            }
        };

        let handled = match &message.body {
            Body::Registration(request) if request.action == RegAction::Request => {
                self.handle_registration_request(request.clone());
                true
            }
            Body::Registration(result) if result.action == RegAction::Result => {
                if let Some(tx) = self.pending_registration.lock().unwrap().take() {
                    let _ = tx.send(result.clone());
                }
                true
            }
            Body::Heartbeat => {
                self.heartbeat.lock().unwrap().on_reply();
                true
            }
            _ => false,
        };

        if !handled {
            self.dispatch_stream(message);
        }
    }

    fn dispatch_stream(&self, message: Message) {
        let id = message.header.message_id;
        let terminal = message.header.sequence_flag;
        let status = message.header.status;

        let is_reply = {
            let mut local = self.local_streams.lock().unwrap();
            if local.contains(id) {
                local.next(id);
                if terminal {
                    local.end(id, status);
                }
                true
            } else {
                false
            }
        };

        if is_reply {
            if terminal {
                if let Some(client) = self.self_weak.upgrade() {
                    (self.on_stream_end)(&client, id, status);
                }
            }
            return;
        }

        if self.local_streams.lock().unwrap().was_recently_retired(id) {
            if self.late_reply_limiter.lock().unwrap().try_acquire() {
                warn!(log::root(), "dropping reply for a stream that already timed out"; "stream_id" => id);
            }
            return;
        }

        let is_new = {
            let mut streams = self.streams.lock().unwrap();
            if streams.contains(id) {
                streams.next(id);
                false
            } else {
                let _ = streams.open(id, None);
                true
            }
        };

        if is_new {
            if let Some(client) = self.self_weak.upgrade() {
                (self.on_stream_new)(&client, message);
            }
        }

        if terminal {
            self.streams.lock().unwrap().end(id, status);
            if let Some(client) = self.self_weak.upgrade() {
                (self.on_stream_end)(&client, id, status);
            }
        }
    }

    /// Poll both stream tables for timeouts; called from the session timer at 1 Hz. A timed-out
    /// locally-initiated stream fires stream-end with [`crate::stream::TIMEOUT_STATUS`], since no
    /// reply will ever arrive to close it out normally.
    pub fn poll_timeouts(&self) -> Vec<MessageId> {
        let mut timed_out = self.streams.lock().unwrap().poll_timeouts(self.stream_timeout);
        let local_timed_out = self.local_streams.lock().unwrap().poll_timeouts(self.stream_timeout);

        if !local_timed_out.is_empty() {
            if let Some(client) = self.self_weak.upgrade() {
                for &id in &local_timed_out {
                    (self.on_stream_end)(&client, id, TIMEOUT_STATUS);
                }
            }
        }

        timed_out.extend(local_timed_out);
        timed_out
    }

    /// Dispatch a heartbeat probe if due, transitioning to reconnecting on miss (§4.7).
    pub fn poll_heartbeat(&self, now: Instant) {
        if !self.is_registered() {
            return;
        }

        let due = self.heartbeat.lock().unwrap().due(now);
        if !due {
            return;
        }

        let destination = self.peer_endpoint().unwrap_or_else(|| Endpoint::new("", ""));
        let header = self.next_header(destination, 0);
        let message = Message::new(header, Body::Heartbeat);
        let _ = self.send(&message);

        let crossed = self.heartbeat.lock().unwrap().on_sent(now);
        if crossed {
            self.registered.store(false, Ordering::Release);
            if let Some(client) = self.self_weak.upgrade() {
                (self.on_reconnecting)(&client);
            }
        }
    }

    pub fn heartbeat_state(&self) -> HeartbeatState {
        self.heartbeat.lock().unwrap().state()
    }

    fn mark_terminated(&self) {
        self.registered.store(false, Ordering::Release);
        *self.outbound.lock().unwrap() = None;
        if let Some(client) = self.self_weak.upgrade() {
            (self.on_terminated)(&client);
        }
    }

    /// Idempotent shutdown: drops the outbound queue, which drains the writer thread and closes
    /// the socket, which in turn unblocks the reader thread (§5 "Cancellation").
    pub fn stop(&self) {
        *self.outbound.lock().unwrap() = None;
    }
}
