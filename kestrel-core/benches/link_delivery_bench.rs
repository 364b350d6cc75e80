#[macro_use]
extern crate criterion;

use criterion::{black_box, Criterion};

use kestrel_core::prelude::*;
use kestrel_serialization::{SerResult, Serializable, Serializer};

#[derive(Debug, Default)]
struct Beat(u64);

impl Serializable for Beat {
    fn type_name(&self) -> &'static str {
        "bench.Beat"
    }

    fn serialize_order(&mut self, ser: &mut Serializer) -> SerResult<()> {
        ser.field("n", &mut self.0)
    }
}

/// Events delivered through a self link that reschedules itself.
fn bench_self_link_delivery(c: &mut Criterion) {
    let mut group = c.benchmark_group("link_delivery");

    for events in [1_000u64, 10_000] {
        group.throughput(criterion::Throughput::Elements(events));
        group.bench_function(format!("self_link_{}", events), |b| {
            b.iter(|| {
                let mut partition = Partition::new(PartitionOptions::default()).unwrap();
                let timer = partition.self_link(1).unwrap();
                timer.add_send_latency_tc(1, &TimeConverter::CORE);
                let again = timer.clone();
                timer.set_functor(move |ev: Event| again.send_now(ev));
                partition.finalize_links();
                timer.send_now(Event::new(Beat(0)));
                black_box(partition.run_until(events));
            });
        });
    }
    group.finish();
}

/// Fan-in of many links into one handler with link order enforced.
fn bench_vortex_fan_in(c: &mut Criterion) {
    c.bench_function("vortex_fan_in_64_links", |b| {
        b.iter(|| {
            let mut partition = Partition::new(PartitionOptions::default()).unwrap();
            let mut senders = Vec::new();
            for i in 0..64 {
                let pair = partition.link_pair(2 * i, 2 * i + 1).unwrap();
                pair.right.set_functor(|ev: Event| {
                    black_box(ev.delivery_time());
                });
                senders.push(pair.left);
            }
            partition.finalize_links();
            for round in 0..16 {
                for link in &senders {
                    link.send(round, Event::new(Beat(round)));
                }
            }
            black_box(partition.run_until(16));
        })
    });
}

criterion_group!(benches, bench_self_link_delivery, bench_vortex_fan_in);
criterion_main!(benches);
