use arb_common::message::Message;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn bench_ping_serialize(c: &mut Criterion) {
    let msg = Message::ping("meter1");

    c.bench_function("ping_serialize", |b| {
        b.iter(|| black_box(msg.serialize().unwrap()));
    });
}

fn bench_ping_parse(c: &mut Criterion) {
    let serialized = Message::ping("meter1").serialize().unwrap();

    c.bench_function("ping_parse", |b| {
        b.iter(|| black_box(Message::parse(&serialized).unwrap()));
    });
}

fn bench_report_parse(c: &mut Criterion) {
    let readings: Vec<String> = (0..16).map(|i| format!("sensor{i}=230.{i}")).collect();
    let payload: Vec<&str> = readings.iter().map(String::as_str).collect();
    let serialized = Message::report("meter1", &payload).serialize().unwrap();

    c.bench_function("report_parse_16_fields", |b| {
        b.iter(|| black_box(Message::parse(&serialized).unwrap()));
    });
}

fn bench_max_field_roundtrip(c: &mut Criterion) {
    let big = "x".repeat(arb_common::message::MAX_FIELD_LEN);
    let msg = Message::report("meter1", &[big.as_str()]);

    c.bench_function("report_roundtrip_4kb", |b| {
        b.iter(|| {
            let bytes = msg.serialize().unwrap();
            black_box(Message::parse(&bytes).unwrap())
        });
    });
}

criterion_group!(
    benches,
    bench_ping_serialize,
    bench_ping_parse,
    bench_report_parse,
    bench_max_field_roundtrip,
);
criterion_main!(benches);
