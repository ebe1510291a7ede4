//! Benchmarks for the per-tick calculations
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::net::{IpAddr, Ipv4Addr};

use nodeview::epoch::{self, ChainPosition};
use nodeview::genesis::GenesisModel;
use nodeview::network_type::NetworkType;
use nodeview::peers::discovery::dedup;

fn bench_chain_position(c: &mut Criterion) {
    let genesis = GenesisModel::for_network(NetworkType::Mainnet);
    let now = 1_700_000_000u64;

    c.bench_function("chain_position_mainnet", |b| {
        b.iter(|| ChainPosition::at(black_box(&genesis), black_box(now)))
    });

    c.bench_function("epoch_progress_mainnet", |b| {
        b.iter(|| epoch::epoch_progress_percent(black_box(&genesis), black_box(450), 216_000))
    });
}

fn endpoints(count: u32, offset: u32) -> Vec<(IpAddr, u16)> {
    (0..count)
        .map(|i| {
            let ip = Ipv4Addr::from(0x0a00_0000 + offset + i);
            (IpAddr::V4(ip), 3001)
        })
        .collect()
}

fn bench_dedup(c: &mut Criterion) {
    // half of the outbound peers are also inbound
    let inbound = endpoints(100, 0);
    let outbound = endpoints(100, 50);

    c.bench_function("dedup_200_endpoints", |b| {
        b.iter(|| dedup(black_box(&inbound), black_box(&outbound)))
    });
}

criterion_group!(benches, bench_chain_position, bench_dedup);
criterion_main!(benches);
