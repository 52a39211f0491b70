//! Propagation benchmark: one input change flowing through a chain of
//! derived nodes into a bound output.

use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};
use serde_json::json;

use rill_core::{MemorySink, Session};

fn chain_propagation(c: &mut Criterion) {
    let session = Session::new(Arc::new(MemorySink::new()));
    let input = session.cell(0i64);

    // input -> d0 -> d1 -> ... -> d9 -> sink
    let mut tip = {
        let input = input.clone();
        session.derived(move || input.get() + 1)
    };
    for _ in 0..9 {
        let prev = tip.clone();
        tip = session.try_derived(move || Ok(prev.read()? + 1));
    }
    let tip_clone = tip.clone();
    session.bind("tip", move || Ok(json!(tip_clone.read()?)));

    let mut value = 0i64;
    c.bench_function("chain_set_and_refresh", |b| {
        b.iter(|| {
            value += 1;
            input.set(value);
        })
    });
}

fn wide_fanout(c: &mut Criterion) {
    let session = Session::new(Arc::new(MemorySink::new()));
    let input = session.cell(0i64);

    for i in 0..50i64 {
        let input = input.clone();
        session.bind(format!("out_{i}"), move || Ok(json!(input.get() + i)));
    }

    let mut value = 0i64;
    c.bench_function("fanout_set_and_refresh", |b| {
        b.iter(|| {
            value += 1;
            input.set(value);
        })
    });
}

criterion_group!(benches, chain_propagation, wide_fanout);
criterion_main!(benches);
