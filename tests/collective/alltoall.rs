use concord::{ByteSpan, ByteSpanMut, ConcordConfig};

use super::helpers::{check_alltoall, run_group};

/// Three ranks, one element per destination: rank `i` sends `i*10 + j`
/// to rank `j`, so rank `j` must end with `[j, 10+j, 20+j]`.
#[tokio::test]
async fn test_three_rank_exchange_pattern() {
    for strategy in ["ring", "ring-barrier", "ring-light-barrier", "rdb"] {
        let config = ConcordConfig {
            alltoall: strategy.into(),
            ..ConcordConfig::default()
        };
        run_group(3, config, move |colls, comm| async move {
            let rank = comm.rank();
            let send: Vec<i32> = (0..3).map(|j| (rank * 10 + j) as i32).collect();
            let mut recv = vec![0i32; 3];
            colls
                .alltoall(&comm, ByteSpan::of(&send), ByteSpanMut::of(&mut recv))
                .await
                .unwrap();
            let expected: Vec<i32> = (0..3).map(|i| (i * 10 + rank) as i32).collect();
            assert_eq!(recv, expected, "strategy {strategy} rank {rank}");
        })
        .await;
    }
}

#[tokio::test]
async fn test_multi_element_blocks() {
    for strategy in ["ring", "rdb", "ring-light-barrier"] {
        check_alltoall(strategy, 4, 6).await;
    }
    check_alltoall("pairwise-one-barrier", 4, 6).await;
    check_alltoall("3dmesh", 8, 6).await;
}

#[tokio::test]
async fn test_two_rank_exchange() {
    run_group(
        2,
        ConcordConfig {
            alltoall: "ring".into(),
            ..ConcordConfig::default()
        },
        |colls, comm| async move {
            let rank = comm.rank();
            let send: Vec<u16> = vec![rank as u16 * 100, rank as u16 * 100 + 1];
            let mut recv = vec![0u16; 2];
            colls
                .alltoall(&comm, ByteSpan::of(&send), ByteSpanMut::of(&mut recv))
                .await
                .unwrap();
            assert_eq!(recv, vec![rank as u16, 100 + rank as u16], "rank {rank}");
        },
    )
    .await;
}

#[tokio::test]
async fn test_mesh_uses_cube_factorization() {
    // 27 ranks factor as 3*3*3; the mesh must still match the naive
    // exchange on a genuinely three-dimensional geometry.
    check_alltoall("3dmesh", 27, 2).await;
}
