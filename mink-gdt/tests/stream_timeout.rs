//! Stream timeout scenario (§8 concrete scenario 5): B sends a service request with a short
//! stream timeout, A's handler sleeps past it, and B's stream-end fires once with the timeout
//! status. A's late reply must then be dropped rather than reopening a bogus stream on B.
use std::sync::mpsc;
use std::time::Duration;

use mink_gdt::asn1::Endpoint;
use mink_gdt::client::StreamEndCallback;
use mink_gdt::service::{ParamValue, ServiceMessage};
use mink_gdt::session::{Session, SessionConfig, SessionEvent, SessionHandler};
use mink_gdt::stream::TIMEOUT_STATUS;

#[test]
fn test_late_reply_after_timeout_is_dropped() {
    let session_a = Session::new(Endpoint::new("x", "a1"), false, SessionConfig::default());
    let session_b = Session::new(
        Endpoint::new("y", "b1"),
        false,
        SessionConfig { stream_timeout: Duration::from_millis(150), ..SessionConfig::default() },
    );

    session_a.register_callback(
        SessionEvent::StreamNew,
        SessionHandler::Message(std::sync::Arc::new(move |client, message| {
            let source = message.header.source.clone();
            let in_reply_to = message.header.message_id;
            let client = client.clone();
            std::thread::spawn(move || {
                // Long enough that B's 1 Hz timer has already retired the stream by the time
                // this reply lands, so the drop-on-retired path (not the on-time path) is hit.
                std::thread::sleep(Duration::from_millis(1300));
                let mut reply = ServiceMessage::new();
                reply.set(101, ParamValue::Utf8("too late".to_string()));
                let _ = client.reply_service(source, in_reply_to, 0, reply);
            });
        })),
    );

    let addr = session_a.listen("127.0.0.1:0").expect("listen should bind");
    let client_b = session_b.connect(addr, "y", "b1").expect("registration handshake should succeed");

    let (stream_end_tx, stream_end_rx) = mpsc::channel();
    let on_stream_end: StreamEndCallback = std::sync::Arc::new(move |_client, _stream_id, status| {
        let _ = stream_end_tx.send(status);
    });
    session_b.register_callback(SessionEvent::StreamEnd, SessionHandler::StreamEnd(on_stream_end));

    let mut request = ServiceMessage::new();
    request.set(101, ParamValue::Utf8("hello".to_string()));
    client_b.send_service(Endpoint::new("x", "a1"), request).expect("send should succeed");

    let first_status = stream_end_rx
        .recv_timeout(Duration::from_secs(2))
        .expect("B's stream-timeout should fire exactly once");
    assert_eq!(first_status, TIMEOUT_STATUS);

    let second = stream_end_rx.recv_timeout(Duration::from_millis(1800));
    assert!(second.is_err(), "A's late reply must not produce a second stream-end on B");

    session_a.stop();
    session_b.stop();
}
