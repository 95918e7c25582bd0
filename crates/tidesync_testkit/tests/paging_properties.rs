//! Property tests: a session always converges to the remote collection.

use proptest::prelude::*;
use tidesync_testkit::prelude::*;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .start_paused(true)
        .build()
        .expect("Failed to build runtime")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn session_converges_to_remote_collection(
        shape in collection_shape_strategy(),
        failures in failure_script_strategy(),
    ) {
        let (ids, expected, fetched) = runtime().block_on(async {
            let h = PagingHarness::start("feed", shape.total);
            h.seed_cache(shape.cached);
            let source = h.source(PagingConfig::new(shape.page_size));

            let mut failures = failures.into_iter();
            let state = loop {
                if failures.next().unwrap_or(false) {
                    h.remote.fail_next(1);
                }
                source.next();
                let state = wait_until(&source, |s| {
                    !matches!(s.reconciliation, ReconciliationStatus::Reconcile { .. })
                })
                .await;
                if state.reconciliation == ReconciliationStatus::EndOfCollection {
                    break state;
                }
            };
            (visible_ids(&state), h.expected_ids(shape.total), h.remote.call_starts())
        });

        prop_assert_eq!(ids, expected);
        // The cursor never moves backwards between calls.
        prop_assert!(fetched.windows(2).all(|w| w[0] <= w[1]));
    }
}
