//! Cross-algorithm equivalence: every registered strategy must produce
//! the same result as a trivial locally-computed reference, across
//! group sizes and message sizes, including the degenerate cases.

use concord::{ByteSpan, ByteSpanMut, ConcordError, ConcordConfig, ReduceOp};

use super::helpers::{
    check_allgather, check_allreduce, check_alltoall, check_broadcast, check_reduce, run_collective,
    run_group, seeded, seeded_pair,
};

const WORLDS: [u32; 8] = [1, 2, 3, 4, 5, 7, 8, 16];
const COUNTS: [usize; 4] = [0, 1, 37, 4096];

#[tokio::test]
async fn test_broadcast_strategies_match_reference() {
    for strategy in [
        "flat",
        "flat-pipelined",
        "binomial",
        "arrival-pattern-aware",
        "scatter-rdb-allgather",
        "smp-binomial",
    ] {
        for world in WORLDS {
            for count in COUNTS {
                check_broadcast(strategy, world, count, world / 2).await;
            }
        }
    }
}

#[tokio::test]
async fn test_broadcast_strategies_nonzero_root() {
    for strategy in [
        "flat",
        "flat-pipelined",
        "binomial",
        "arrival-pattern-aware",
        "scatter-rdb-allgather",
        "smp-binomial",
    ] {
        for world in [3u32, 5, 8] {
            check_broadcast(strategy, world, 37, world - 1).await;
        }
    }
}

#[tokio::test]
async fn test_allgather_strategies_match_reference() {
    for strategy in ["ring", "smp-simple"] {
        for world in WORLDS {
            for count in COUNTS {
                check_allgather(strategy, world, count).await;
            }
        }
    }
}

#[tokio::test]
async fn test_allreduce_strategies_match_reference() {
    for strategy in ["ring", "rab", "smp-binomial"] {
        for world in WORLDS {
            for count in COUNTS {
                check_allreduce(strategy, world, count, ReduceOp::Sum).await;
            }
        }
    }
}

#[tokio::test]
async fn test_alltoall_strategies_match_reference() {
    for strategy in ["ring", "ring-barrier", "ring-light-barrier", "rdb"] {
        for world in WORLDS {
            for per_peer in COUNTS {
                check_alltoall(strategy, world, per_peer).await;
            }
        }
    }
}

#[tokio::test]
async fn test_pairwise_alltoall_on_power_of_two_groups() {
    for world in [1u32, 2, 4, 8, 16] {
        for per_peer in COUNTS {
            check_alltoall("pairwise-one-barrier", world, per_peer).await;
        }
    }
}

#[tokio::test]
async fn test_mesh_alltoall_on_factorable_groups() {
    for world in [8u32, 16] {
        for per_peer in COUNTS {
            check_alltoall("3dmesh", world, per_peer).await;
        }
    }
    check_alltoall("3dmesh", 12, 5).await;
}

#[tokio::test]
async fn test_reduce_strategies_match_reference() {
    for strategy in ["flat", "binomial"] {
        for world in WORLDS {
            for count in COUNTS {
                check_reduce(strategy, world, count, ReduceOp::Sum, world / 2).await;
            }
        }
    }
}

// Strategies with a hard precondition must refuse inapplicable group
// sizes before any exchange, on every rank.

#[tokio::test]
async fn test_pairwise_alltoall_refuses_non_power_of_two() {
    for world in [3u32, 5, 6, 7] {
        let config = ConcordConfig {
            alltoall: "pairwise-one-barrier".into(),
            ..ConcordConfig::default()
        };
        run_group(world, config, move |colls, comm| async move {
            let send = vec![0i32; comm.size() as usize];
            let mut recv = vec![0i32; comm.size() as usize];
            let err = colls
                .alltoall(&comm, ByteSpan::of(&send), ByteSpanMut::of(&mut recv))
                .await
                .unwrap_err();
            assert!(
                matches!(err, ConcordError::Precondition { .. }),
                "world={world}: {err}"
            );
        })
        .await;
    }
}

#[tokio::test]
async fn test_mesh_alltoall_refuses_unfactorable_groups() {
    for world in [2u32, 3, 4, 5, 7] {
        let config = ConcordConfig {
            alltoall: "3dmesh".into(),
            ..ConcordConfig::default()
        };
        run_group(world, config, move |colls, comm| async move {
            let send = vec![0i32; comm.size() as usize];
            let mut recv = vec![0i32; comm.size() as usize];
            let err = colls
                .alltoall(&comm, ByteSpan::of(&send), ByteSpanMut::of(&mut recv))
                .await
                .unwrap_err();
            assert!(
                matches!(err, ConcordError::NotApplicable { .. }),
                "world={world}: {err}"
            );
        })
        .await;
    }
}

// The donation / fold-in fix-up paths must hold up on the group sizes
// that actually exercise them.

#[tokio::test]
async fn test_rdb_alltoall_non_power_of_two_fixup() {
    for world in [5u32, 6, 7] {
        check_alltoall("rdb", world, 37).await;
        check_alltoall("rdb", world, 1).await;
    }
}

#[tokio::test]
async fn test_rab_allreduce_non_power_of_two_fold() {
    for world in [5u32, 6, 7] {
        check_allreduce("rab", world, 37, ReduceOp::Sum).await;
        check_allreduce("rab", world, 1, ReduceOp::Max).await;
        // Counts not divisible by the group size exercise the padding.
        check_allreduce("rab", world, world as usize + 1, ReduceOp::Sum).await;
    }
}

// Degenerate single-rank groups: every kind returns its input unchanged.

#[tokio::test]
async fn test_single_rank_identity_for_every_kind() {
    run_collective(1, |colls, comm| async move {
        let count = 5usize;

        let mut bcast: Vec<i32> = (0..count).map(|i| seeded(0, i)).collect();
        let orig = bcast.clone();
        colls
            .broadcast(&comm, ByteSpanMut::of(&mut bcast), 0)
            .await
            .unwrap();
        assert_eq!(bcast, orig);

        colls.barrier(&comm).await.unwrap();

        let mut gathered = vec![0i32; count];
        colls
            .allgather(&comm, ByteSpan::of(&orig), ByteSpanMut::of(&mut gathered))
            .await
            .unwrap();
        assert_eq!(gathered, orig);

        let mut reduced = vec![0i32; count];
        colls
            .allreduce(
                &comm,
                ByteSpan::of(&orig),
                ByteSpanMut::of(&mut reduced),
                ReduceOp::Sum,
            )
            .await
            .unwrap();
        assert_eq!(reduced, orig);

        let mut exchanged = vec![0i32; count];
        colls
            .alltoall(&comm, ByteSpan::of(&orig), ByteSpanMut::of(&mut exchanged))
            .await
            .unwrap();
        assert_eq!(exchanged, orig);

        let counts = [count];
        let mut vexchanged = vec![0i32; count];
        colls
            .alltoallv(
                &comm,
                ByteSpan::of(&orig),
                &counts,
                ByteSpanMut::of(&mut vexchanged),
                &counts,
            )
            .await
            .unwrap();
        assert_eq!(vexchanged, orig);

        let mut root_out = vec![0i32; count];
        colls
            .reduce(
                &comm,
                ByteSpan::of(&orig),
                Some(ByteSpanMut::of(&mut root_out)),
                ReduceOp::Prod,
                0,
            )
            .await
            .unwrap();
        assert_eq!(root_out, orig);
    })
    .await;
}

// Allgather idempotence: the local slice of the gathered result is the
// rank's original input.

#[tokio::test]
async fn test_allgather_idempotence() {
    for strategy in ["ring", "smp-simple"] {
        for world in [3u32, 5, 8] {
            let config = ConcordConfig {
                allgather: strategy.into(),
                ..ConcordConfig::default()
            };
            run_group(world, config, move |colls, comm| async move {
                let rank = comm.rank();
                let count = 29usize;
                let send: Vec<i32> = (0..count).map(|i| seeded(rank, i)).collect();
                let mut recv = vec![0i32; count * world as usize];
                colls
                    .allgather(&comm, ByteSpan::of(&send), ByteSpanMut::of(&mut recv))
                    .await
                    .unwrap();
                let mine = &recv[rank as usize * count..(rank as usize + 1) * count];
                assert_eq!(mine, &send[..], "strategy {strategy} rank {rank}");
            })
            .await;
        }
    }
}

// Alltoallv with asymmetric per-pair counts.

#[tokio::test]
async fn test_alltoallv_asymmetric_counts() {
    for world in [2u32, 3, 5, 8] {
        run_collective(world, move |colls, comm| async move {
            let rank = comm.rank();
            let pair_count = |src: u32, dst: u32| ((src + 2 * dst) % 4) as usize;

            let send_counts: Vec<usize> = (0..world).map(|dst| pair_count(rank, dst)).collect();
            let recv_counts: Vec<usize> = (0..world).map(|src| pair_count(src, rank)).collect();

            let send: Vec<i32> = (0..world)
                .flat_map(|dst| (0..pair_count(rank, dst)).map(move |i| seeded_pair(rank, dst, i)))
                .collect();
            let mut recv = vec![0i32; recv_counts.iter().sum()];

            colls
                .alltoallv(
                    &comm,
                    ByteSpan::of(&send),
                    &send_counts,
                    ByteSpanMut::of(&mut recv),
                    &recv_counts,
                )
                .await
                .unwrap();

            let expected: Vec<i32> = (0..world)
                .flat_map(|src| (0..pair_count(src, rank)).map(move |i| seeded_pair(src, rank, i)))
                .collect();
            assert_eq!(recv, expected, "world={world} rank={rank}");
        })
        .await;
    }
}
