use criterion::{black_box, criterion_group, criterion_main, Criterion};

use mink_gdt::asn1::wire::{decode_message, encode_message};
use mink_gdt::asn1::{Body, Endpoint, Header, Message};
use mink_gdt::service::{ParamValue, ServiceMessage};

fn sample_message() -> Message {
    let mut service = ServiceMessage::new();
    service.set(1, ParamValue::Utf8("sensor.temperature".into()));
    service.set(2, ParamValue::I32(-7));
    service.set(3, ParamValue::U64(1_690_000_000));
    service.set(4, ParamValue::Octets(vec![0xde, 0xad, 0xbe, 0xef]));

    let header = Header {
        source: Endpoint::new("sysagentd", "sysagent-1"),
        destination: Endpoint::new("routingd", "router-1"),
        uuid: 0x1234_5678_9abc_def0,
        message_id: 42,
        sequence_num: 0,
        sequence_flag: true,
        status: 0,
        hop_info: 0,
    };

    Message::new(header, Body::Service(service))
}

fn encode_bench(c: &mut Criterion) {
    let message = sample_message();
    c.bench_function("encode_message", |b| {
        b.iter(|| {
            let bytes = encode_message(black_box(&message));
            black_box(bytes);
        })
    });
}

fn decode_bench(c: &mut Criterion) {
    let message = sample_message();
    let bytes = encode_message(&message);
    c.bench_function("decode_message", |b| {
        b.iter(|| {
            let decoded = decode_message(black_box(&bytes)).unwrap();
            black_box(decoded);
        })
    });
}

criterion_group!(benches, encode_bench, decode_bench);
criterion_main!(benches);
