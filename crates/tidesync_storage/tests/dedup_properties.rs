//! Property tests for operation-table deduplication and freshness.

use proptest::prelude::*;
use std::collections::HashSet;
use tidesync_storage::{MemoryStore, OperationKey, OperationStatus, OperationStore, UpsertKind};

#[derive(Debug, Clone)]
enum Step {
    Upsert { key: u8, input: u8 },
    Start { key: u8 },
    Finish { key: u8, status: u8 },
    Resume,
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        (0u8..4, any::<u8>()).prop_map(|(key, input)| Step::Upsert { key, input }),
        (0u8..4).prop_map(|key| Step::Start { key }),
        (0u8..4, 0u8..3).prop_map(|(key, status)| Step::Finish { key, status }),
        Just(Step::Resume),
    ]
}

fn key(k: u8) -> OperationKey {
    OperationKey::new("client", "op", format!("k{k}"))
}

proptest! {
    #[test]
    fn one_row_per_key_and_monotonic_freshness(steps in prop::collection::vec(step(), 1..60)) {
        let store = MemoryStore::new();
        let mut last_clock = store.clock();

        for step in steps {
            match step {
                Step::Upsert { key: k, input } => {
                    let before = store.operation_by_key(&key(k)).unwrap();
                    let upserted = store.upsert_operation(&key(k), vec![input]).unwrap();
                    if let Some(before) = before {
                        prop_assert_eq!(upserted.record.id, before.id);
                        if before.status.is_pending() {
                            prop_assert_eq!(upserted.record.input, before.input);
                            prop_assert_eq!(upserted.record.last_updated, before.last_updated);
                        } else {
                            // Recycled: same row, new work.
                            prop_assert_eq!(upserted.kind, UpsertKind::Recycled);
                            prop_assert_eq!(upserted.record.status, OperationStatus::Idle);
                            prop_assert_eq!(&upserted.record.input, &vec![input]);
                            prop_assert_eq!(&upserted.record.output, &None);
                            prop_assert!(upserted.record.last_updated > before.last_updated);
                            let stored = store.operation(before.id).unwrap().unwrap();
                            prop_assert_eq!(stored, upserted.record);
                        }
                    }
                }
                Step::Start { key: k } => {
                    if let Some(op) = store.operation_by_key(&key(k)).unwrap() {
                        let started = store.start_operation(op.id, op.last_updated).unwrap();
                        prop_assert_eq!(started.is_some(), op.status == OperationStatus::Idle);
                    }
                }
                Step::Finish { key: k, status } => {
                    if let Some(op) = store.operation_by_key(&key(k)).unwrap() {
                        let status = match status {
                            0 => OperationStatus::Success,
                            1 => OperationStatus::Failure,
                            _ => OperationStatus::Suspended,
                        };
                        let applied = store
                            .finish_operation(op.id, op.last_updated, status, Some(vec![0xEE]))
                            .unwrap();
                        prop_assert_eq!(applied, op.status == OperationStatus::Started);
                    }
                }
                Step::Resume => {
                    store.resume_suspended("client").unwrap();
                }
            }

            prop_assert!(store.clock() >= last_clock);
            last_clock = store.clock();

            let rows = store.operations();
            let keys: HashSet<_> = rows.iter().map(|r| r.key()).collect();
            prop_assert_eq!(keys.len(), rows.len());
            for row in &rows {
                prop_assert!(row.last_updated <= last_clock);
            }
        }
    }
}
