use concord::{ByteSpan, ByteSpanMut, ConcordConfig, ReduceOp};

use super::helpers::{check_reduce, run_group};

#[tokio::test]
async fn test_reduce_to_every_root() {
    for strategy in ["flat", "binomial"] {
        for root in 0..4u32 {
            check_reduce(strategy, 4, 11, ReduceOp::Sum, root).await;
        }
    }
}

#[tokio::test]
async fn test_reduce_min_max() {
    for strategy in ["flat", "binomial"] {
        check_reduce(strategy, 7, 23, ReduceOp::Min, 2).await;
        check_reduce(strategy, 7, 23, ReduceOp::Max, 6).await;
    }
}

#[tokio::test]
async fn test_non_root_ranks_need_no_receive_buffer() {
    let config = ConcordConfig {
        reduce: "binomial".into(),
        ..ConcordConfig::default()
    };
    run_group(5, config, |colls, comm| async move {
        let rank = comm.rank();
        let send = vec![1i32 << rank];
        let mut recv = vec![0i32];
        let recv_span = (rank == 0).then(|| ByteSpanMut::of(&mut recv));
        colls
            .reduce(&comm, ByteSpan::of(&send), recv_span, ReduceOp::BOr, 0)
            .await
            .unwrap();
        if rank == 0 {
            assert_eq!(recv, vec![0b11111]);
        }
    })
    .await;
}
