//! Experiment document benchmarks.
//!
//! Measures the cost of assembling and serializing an episode with many
//! events over a small set of recurring participants, which is the common
//! shape of a recorded manipulation session.
//!
//! Run with: `cargo bench --bench owl_benchmarks`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use semtrace_individuals::handle::IndividualId;
use semtrace_owl::assembler::EventAssembler;
use semtrace_owl::event::{pair_id, EventKind, EventType, Participant};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn participants(count: u32) -> Vec<Participant> {
    (0..count)
        .map(|i| Participant::new(IndividualId::new(i, 0), format!("obj{i}"), "Thing"))
        .collect()
}

/// Open and close `event_count` contacts cycling through `objects`.
fn assemble(event_count: usize, objects: &[Participant]) -> EventAssembler {
    let mut assembler = EventAssembler::new("bench");
    for i in 0..event_count {
        let first = objects[i % objects.len()].clone();
        let second = objects[(i + 1) % objects.len()].clone();
        let pair = pair_id(EventType::Contact, first.individual, second.individual);
        let start = i as f64 * 0.25;
        if assembler
            .open_event(EventKind::Contact { first, second }, start, pair)
            .is_ok()
        {
            let _ = assembler.close_event(pair, start + 0.5);
        }
    }
    assembler
}

// ---------------------------------------------------------------------------
// Benchmarks
// ---------------------------------------------------------------------------

fn bench_assemble_1k(c: &mut Criterion) {
    let objects = participants(32);
    c.bench_function("assemble_1k_contacts", |b| {
        b.iter(|| black_box(assemble(1_000, &objects)));
    });
}

fn bench_serialize_scaling(c: &mut Criterion) {
    let objects = participants(32);
    let mut group = c.benchmark_group("serialize_scaling");
    for count in [100usize, 1_000, 10_000] {
        let assembler = assemble(count, &objects);
        group.bench_with_input(BenchmarkId::from_parameter(count), &assembler, |b, assembler| {
            b.iter(|| black_box(assembler.serialize()));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_assemble_1k, bench_serialize_scaling);
criterion_main!(benches);
