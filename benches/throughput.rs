//! Throughput benchmarks for the storage engine and the wire codec.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use emberkv::protocol::{make_command, FrameParser};
use emberkv::storage::Engine;
use parking_lot::RwLock;
use std::sync::Arc;

/// SET throughput at a few value sizes.
fn bench_set(c: &mut Criterion) {
    let engine = Arc::new(RwLock::new(Engine::new()));

    let mut group = c.benchmark_group("set");
    group.throughput(Throughput::Elements(1));

    group.bench_function("set_small", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = Bytes::from(format!("key:{}", i));
            engine.write().set(key, Bytes::from_static(b"small_value"));
            i += 1;
        });
    });

    group.bench_function("set_medium", |b| {
        let mut i = 0u64;
        let value = Bytes::from("x".repeat(1024));
        b.iter(|| {
            let key = Bytes::from(format!("key:{}", i));
            engine.write().set(key, value.clone());
            i += 1;
        });
    });

    group.finish();
}

/// GET throughput against a populated engine.
fn bench_get(c: &mut Criterion) {
    let engine = Arc::new(RwLock::new(Engine::new()));

    {
        let mut engine = engine.write();
        for i in 0..100_000 {
            engine.set(
                Bytes::from(format!("key:{}", i)),
                Bytes::from(format!("value:{}", i)),
            );
        }
    }

    let mut group = c.benchmark_group("get");
    group.throughput(Throughput::Elements(1));

    group.bench_function("get_existing", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = format!("key:{}", i % 100_000);
            black_box(engine.read().get(key.as_bytes()));
            i += 1;
        });
    });

    group.bench_function("get_missing", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = format!("missing:{}", i);
            black_box(engine.read().get(key.as_bytes()));
            i += 1;
        });
    });

    group.finish();
}

/// Sorted-set insert and range extraction.
fn bench_zset(c: &mut Criterion) {
    let mut group = c.benchmark_group("zset");
    group.throughput(Throughput::Elements(1));

    group.bench_function("zadd", |b| {
        let engine = Arc::new(RwLock::new(Engine::new()));
        let mut i = 0u64;
        b.iter(|| {
            let member = Bytes::from(format!("member:{}", i));
            engine
                .write()
                .zadd(Bytes::from_static(b"board"), vec![(member, i as f64)]);
            i += 1;
        });
    });

    group.bench_function("zrange_100_of_10k", |b| {
        let engine = Arc::new(RwLock::new(Engine::new()));
        {
            let mut engine = engine.write();
            for i in 0..10_000u64 {
                engine.zadd(
                    Bytes::from_static(b"board"),
                    vec![(Bytes::from(format!("member:{}", i)), i as f64)],
                );
            }
        }
        b.iter(|| {
            let engine = engine.read();
            let set = engine.zset(b"board").unwrap();
            black_box(set.range(5000, 5099));
        });
    });

    group.finish();
}

/// KEYS pattern scans.
fn bench_keys(c: &mut Criterion) {
    let engine = Arc::new(RwLock::new(Engine::new()));

    {
        let mut engine = engine.write();
        for i in 0..1_000 {
            engine.set(Bytes::from(format!("user:{}", i)), Bytes::from_static(b"u"));
            engine.set(
                Bytes::from(format!("session:{}", i)),
                Bytes::from_static(b"s"),
            );
        }
    }

    let mut group = c.benchmark_group("keys");

    group.bench_function("keys_pattern", |b| {
        b.iter(|| black_box(engine.read().keys(b"user:*")));
    });

    group.bench_function("keys_all", |b| {
        b.iter(|| black_box(engine.read().keys(b"*")));
    });

    group.finish();
}

/// Codec serialize and parse round trips.
fn bench_codec(c: &mut Criterion) {
    let request = make_command(["SET", "user:1001", "some reasonably sized value"]);
    let frame = request.serialize();

    let mut group = c.benchmark_group("codec");
    group.throughput(Throughput::Bytes(frame.len() as u64));

    group.bench_function("serialize_command", |b| {
        b.iter(|| black_box(request.serialize()));
    });

    group.bench_function("parse_command", |b| {
        b.iter(|| {
            let mut parser = FrameParser::new();
            parser.feed(&frame);
            black_box(parser.try_parse().unwrap())
        });
    });

    group.bench_function("parse_pipelined_16", |b| {
        let mut batch = Vec::new();
        for _ in 0..16 {
            batch.extend_from_slice(&frame);
        }
        b.iter(|| {
            let mut parser = FrameParser::new();
            parser.feed(&batch);
            let mut count = 0;
            while let Ok(Some(message)) = parser.try_parse() {
                black_box(message);
                count += 1;
            }
            assert_eq!(count, 16);
        });
    });

    group.finish();
}

/// Expiry heap churn.
fn bench_expiry(c: &mut Criterion) {
    use std::time::{Duration, Instant};

    let mut group = c.benchmark_group("expiry");
    group.throughput(Throughput::Elements(1));

    group.bench_function("set_with_ttl", |b| {
        let engine = Arc::new(RwLock::new(Engine::new()));
        let mut i = 0u64;
        b.iter(|| {
            let key = Bytes::from(format!("key:{}", i));
            engine.write().set_with_ttl(
                key,
                Bytes::from_static(b"value"),
                Duration::from_secs(3600),
                Instant::now(),
            );
            i += 1;
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_set,
    bench_get,
    bench_zset,
    bench_keys,
    bench_codec,
    bench_expiry,
);

criterion_main!(benches);
