use criterion::{black_box, criterion_group, criterion_main, Criterion};

use mink_gdt::asn1::Endpoint;
use mink_gdt::routing::RoutingHandler;
use std::sync::Arc;

struct FakeClient;

fn build_handler(node_count: u32) -> RoutingHandler<FakeClient> {
    let handler = RoutingHandler::new();
    for i in 0..node_count {
        let endpoint = Endpoint::new("svc", format!("node-{}", i));
        handler.add_node("svc", endpoint, Arc::new(FakeClient), (i % 5 + 1) as i64);
    }
    handler
}

fn get_bench(c: &mut Criterion) {
    let handler = build_handler(32);
    c.bench_function("wrr_get_32_nodes", |b| {
        b.iter(|| {
            let picked = handler.get(black_box("svc"));
            black_box(picked);
        })
    });
}

fn add_remove_bench(c: &mut Criterion) {
    let handler = build_handler(32);
    let churn = Endpoint::new("svc", "churn");
    c.bench_function("wrr_add_remove_node", |b| {
        b.iter(|| {
            handler.add_node("svc", churn.clone(), Arc::new(FakeClient), 1);
            handler.remove_node("svc", &churn);
        })
    });
}

criterion_group!(benches, get_bench, add_remove_bench);
criterion_main!(benches);
