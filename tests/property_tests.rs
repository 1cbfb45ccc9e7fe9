//! Property-based tests for the fan-in, fan-out and stage invariants
//!
//! Inputs are generated as lists of value sequences, one per source, and
//! the properties check that nothing is lost, duplicated or reordered
//! within a source.

use proptest::prelude::*;
use stage_pipeline::conduit::{self, Receiver};
use stage_pipeline::{
    broadcast, merge, CancellationToken, Runnable, Stage, StageConfig, Transform, WorkerPool,
};
use std::collections::HashMap;
use std::thread;

/// Up to five sources of up to fifty values each
fn sources_strategy() -> impl Strategy<Value = Vec<Vec<u32>>> {
    prop::collection::vec(prop::collection::vec(any::<u32>(), 0..50), 1..5)
}

fn filled(values: &[u32]) -> Receiver<u32> {
    let (tx, rx) = conduit::conduit(values.len() as isize).unwrap();
    for v in values {
        tx.send(*v).unwrap();
    }
    rx
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Merge delivers every value exactly once and keeps per-source order
    #[test]
    fn prop_merge_preserves_per_source_order(
        sources in sources_strategy(),
        buffer in 0isize..4,
    ) {
        // Tag each value with its source so order can be checked per source.
        let inputs: Vec<Receiver<(usize, u32)>> = sources
            .iter()
            .enumerate()
            .map(|(src, values)| {
                let (tx, rx) = conduit::conduit(values.len() as isize).unwrap();
                for v in values {
                    tx.send((src, *v)).unwrap();
                }
                rx
            })
            .collect();

        let merged = merge(&CancellationToken::new(), inputs, buffer).unwrap();
        let mut per_source: HashMap<usize, Vec<u32>> = HashMap::new();
        for (src, v) in merged.iter() {
            per_source.entry(src).or_default().push(v);
        }

        for (src, values) in sources.iter().enumerate() {
            let got = per_source.remove(&src).unwrap_or_default();
            prop_assert_eq!(&got, values);
        }
        prop_assert!(per_source.is_empty());
    }

    /// Broadcast hands every output the same value
    #[test]
    fn prop_broadcast_reaches_every_output(outputs in 1usize..6, value in any::<u64>()) {
        let (senders, receivers): (Vec<_>, Vec<_>) = (0..outputs)
            .map(|_| conduit::conduit::<u64>(1).unwrap())
            .unzip();

        broadcast(&CancellationToken::new(), &senders, value).unwrap();
        for rx in &receivers {
            prop_assert_eq!(rx.try_recv().unwrap(), value);
        }
    }

    /// A transform is order preserving
    #[test]
    fn prop_transform_keeps_order(values in prop::collection::vec(any::<u32>(), 0..100)) {
        let stage = Transform::new(|x: u32| Ok(x.wrapping_mul(3)));
        stage.attach_input(vec![filled(&values)]).unwrap();
        let out = stage.create_output().unwrap();

        let collector = thread::spawn(move || out.iter().collect::<Vec<_>>());
        stage.run(&CancellationToken::new()).unwrap();

        let expected: Vec<u32> = values.iter().map(|x| x.wrapping_mul(3)).collect();
        prop_assert_eq!(collector.join().unwrap(), expected);
    }

    /// A worker pool produces the same multiset of results as a serial map
    #[test]
    fn prop_worker_pool_loses_nothing(
        values in prop::collection::vec(any::<u32>(), 0..100),
        workers in 1isize..8,
    ) {
        let pool = WorkerPool::with_config(
            |x: u32| Ok(u64::from(x) + 1),
            StageConfig::new().with_worker_count(workers),
        );
        pool.attach_input(vec![filled(&values)]).unwrap();
        let out = pool.create_output().unwrap();

        let collector = thread::spawn(move || out.iter().collect::<Vec<_>>());
        pool.run(&CancellationToken::new()).unwrap();

        let mut got = collector.join().unwrap();
        got.sort_unstable();
        let mut expected: Vec<u64> = values.iter().map(|x| u64::from(*x) + 1).collect();
        expected.sort_unstable();
        prop_assert_eq!(got, expected);
    }
}
