use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use concord::ConcordConfig;

use super::helpers::run_group;

/// All ranks must be inside the barrier before any rank leaves it.
async fn check_barrier_synchronizes(strategy: &'static str, world: u32) {
    let config = ConcordConfig {
        barrier: strategy.into(),
        ..ConcordConfig::default()
    };
    let entered = Arc::new(AtomicU32::new(0));
    let entered_ref = Arc::clone(&entered);

    run_group(world, config, move |colls, comm| {
        let entered = Arc::clone(&entered_ref);
        async move {
            entered.fetch_add(1, Ordering::SeqCst);
            colls.barrier(&comm).await.unwrap();
            assert_eq!(
                entered.load(Ordering::SeqCst),
                world,
                "{strategy}: rank {} left the barrier before all ranks entered",
                comm.rank()
            );
        }
    })
    .await;
}

#[tokio::test]
async fn test_flat_barrier() {
    for world in [1u32, 2, 3, 5, 8] {
        check_barrier_synchronizes("flat", world).await;
    }
}

#[tokio::test]
async fn test_nary_tree_barrier() {
    for world in [1u32, 2, 3, 5, 8, 16] {
        check_barrier_synchronizes("nary-tree", world).await;
    }
}

#[tokio::test]
async fn test_dissemination_barrier() {
    for world in [1u32, 2, 3, 5, 8, 16] {
        check_barrier_synchronizes("dissemination", world).await;
    }
}

#[tokio::test]
async fn test_nary_tree_barrier_arity_variants() {
    for arity in [1u32, 2, 3, 8] {
        let config = ConcordConfig {
            barrier: "nary-tree".into(),
            tree_arity: arity,
            ..ConcordConfig::default()
        };
        run_group(6, config, |colls, comm| async move {
            for _ in 0..3 {
                colls.barrier(&comm).await.unwrap();
            }
        })
        .await;
    }
}

#[tokio::test]
async fn test_repeated_barriers_do_not_interfere() {
    let config = ConcordConfig {
        barrier: "dissemination".into(),
        ..ConcordConfig::default()
    };
    run_group(5, config, |colls, comm| async move {
        for _ in 0..10 {
            colls.barrier(&comm).await.unwrap();
        }
    })
    .await;
}
