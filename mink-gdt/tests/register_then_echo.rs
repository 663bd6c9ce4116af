//! End-to-end registration-then-echo scenario (§8 concrete scenario 1): node A listens, node B
//! connects and registers, B sends a service message, A echoes it back uppercased, and B's
//! stream ends cleanly.
use std::sync::mpsc;
use std::time::Duration;

use mink_gdt::asn1::{Body, Endpoint};
use mink_gdt::client::StreamEndCallback;
use mink_gdt::service::{ParamValue, ServiceMessage};
use mink_gdt::session::{Session, SessionConfig, SessionEvent, SessionHandler};

#[test]
fn test_register_then_echo() {
    let session_a = Session::new(Endpoint::new("x", "a1"), false, SessionConfig::default());
    let session_b = Session::new(Endpoint::new("y", "b1"), false, SessionConfig::default());

    let (stream_new_tx, stream_new_rx) = mpsc::channel();
    session_a.register_callback(
        SessionEvent::StreamNew,
        SessionHandler::Message(std::sync::Arc::new(move |client, message| {
            let service = match message.body {
                Body::Service(service) => service,
                _ => return,
            };
            if let Some(ParamValue::Utf8(text)) = service.get(101) {
                let mut reply = ServiceMessage::new();
                reply.set(101, ParamValue::Utf8(text.to_uppercase()));
                let _ = client.reply_service(message.header.source.clone(), message.header.message_id, 0, reply);
            }
            let _ = stream_new_tx.send(());
        })),
    );

    let addr = session_a.listen("127.0.0.1:0").expect("listen should bind");

    let client_b = session_b
        .connect(addr, "y", "b1")
        .expect("registration handshake should succeed");
    assert!(client_b.is_registered());
    assert_eq!(
        client_b.peer_endpoint(),
        Some(Endpoint::new("x", "a1"))
    );

    let (stream_end_tx, stream_end_rx) = mpsc::channel();
    let on_stream_end: StreamEndCallback = std::sync::Arc::new(move |_client, _stream_id, status| {
        let _ = stream_end_tx.send(status);
    });
    session_b.register_callback(SessionEvent::StreamEnd, SessionHandler::StreamEnd(on_stream_end));

    let mut request = ServiceMessage::new();
    request.set(101, ParamValue::Utf8("hello".to_string()));
    client_b
        .send_service(Endpoint::new("x", "a1"), request)
        .expect("send should succeed");

    stream_new_rx
        .recv_timeout(Duration::from_secs(2))
        .expect("A's stream-new should fire");

    let status = stream_end_rx
        .recv_timeout(Duration::from_secs(2))
        .expect("B's stream-end should fire");
    assert_eq!(status, 0);

    session_a.stop();
    session_b.stop();
}
