//! Criterion benchmarks for the storage encodings and the snapshot codec.
//!
//! Run with:
//!   cargo bench --bench encodings

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use rdbstore::rio::Rio;
use rdbstore::{Config, Server};

fn bench_hash_encodings(c: &mut Criterion) {
    let mut group = c.benchmark_group("hash_set_field");

    // Below the threshold: packed entry list. Above: hash table.
    for &fields in &[64usize, 2048] {
        group.bench_with_input(BenchmarkId::new("hset", fields), &fields, |b, &fields| {
            b.iter(|| {
                let mut s = Server::new(Config::default());
                for i in 0..fields {
                    s.hset(b"h", format!("field{:05}", i).as_bytes(), b"value").unwrap();
                }
                s
            })
        });
    }
    group.finish();
}

fn bench_zset_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("zset_insert");
    for &members in &[64usize, 4096] {
        group.bench_with_input(BenchmarkId::new("zadd", members), &members, |b, &members| {
            b.iter(|| {
                let mut s = Server::new(Config::default());
                for i in 0..members {
                    s.zadd(b"z", &[((i % 97) as f64, format!("m{:05}", i).as_bytes())])
                        .unwrap();
                }
                s
            })
        });
    }
    group.finish();
}

fn bench_snapshot_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("snapshot");

    let mut s = Server::new(Config::default());
    for i in 0..1000 {
        s.set(format!("string:{}", i).as_bytes(), format!("value number {}", i).as_bytes());
        s.hset(b"big-hash", format!("f{}", i).as_bytes(), b"v").unwrap();
        s.zadd(b"big-zset", &[(i as f64, format!("m{}", i).as_bytes())]).unwrap();
    }

    let mut probe = Rio::buffer();
    rdbstore::rdb::save::save_to_rio(&s, &mut probe).unwrap();
    let image = probe.into_buffer().unwrap();
    group.throughput(Throughput::Bytes(image.len() as u64));

    group.bench_function("save_to_buffer", |b| {
        b.iter(|| {
            let mut rio = Rio::buffer();
            rdbstore::rdb::save::save_to_rio(&s, &mut rio).unwrap();
            rio.into_buffer().unwrap()
        })
    });

    group.bench_function("load_from_buffer", |b| {
        b.iter(|| {
            let mut fresh = Server::new(Config::default());
            let mut rio = Rio::from_buffer(rdbstore::Sds::from_bytes(image.as_bytes()));
            rdbstore::rdb::load::load_from_rio(&mut fresh, &mut rio, false).unwrap();
            fresh
        })
    });
    group.finish();
}

criterion_group!(benches, bench_hash_encodings, bench_zset_insert, bench_snapshot_codec);
criterion_main!(benches);
