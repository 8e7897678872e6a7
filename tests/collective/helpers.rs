use std::sync::Arc;

use concord::{ByteSpan, ByteSpanMut, Collectives, Communicator, ConcordConfig, ReduceOp};

/// Run a collective scenario across `world` ranks concurrently, one
/// tokio task per rank, all sharing a dispatcher built from `config`.
pub async fn run_group<F, Fut>(world: u32, config: ConcordConfig, f: F)
where
    F: Fn(Arc<Collectives>, Communicator) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let colls = Arc::new(Collectives::new(config.clone()).expect("dispatcher construction"));
    let comms = Communicator::local_group_with_config(world, config);

    let f = Arc::new(f);
    let mut handles = Vec::new();
    for comm in comms {
        let f = Arc::clone(&f);
        let colls = Arc::clone(&colls);
        handles.push(tokio::spawn(async move { f(colls, comm).await }));
    }
    for h in handles {
        h.await.unwrap();
    }
}

/// Same with the default configuration.
pub async fn run_collective<F, Fut>(world: u32, f: F)
where
    F: Fn(Arc<Collectives>, Communicator) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    run_group(world, ConcordConfig::default(), f).await;
}

/// Deterministic per-rank, per-element test value.
pub fn seeded(rank: u32, i: usize) -> i32 {
    ((rank as i64 * 37 + i as i64 * 11) % 1000 - 250) as i32
}

/// Deterministic value for the block rank `src` sends to rank `dst`.
pub fn seeded_pair(src: u32, dst: u32, i: usize) -> i32 {
    ((src as i64 * 131 + dst as i64 * 17 + i as i64 * 7) % 1000 - 400) as i32
}

/// Fold `world` ranks' seeded inputs in rank order with `op`.
pub fn reference_reduce(world: u32, count: usize, op: ReduceOp) -> Vec<i32> {
    let mut acc: Vec<i32> = (0..count).map(|i| seeded(0, i)).collect();
    for r in 1..world {
        for (i, slot) in acc.iter_mut().enumerate() {
            let b = seeded(r, i);
            *slot = match op {
                ReduceOp::Sum => slot.wrapping_add(b),
                ReduceOp::Prod => slot.wrapping_mul(b),
                ReduceOp::Min => (*slot).min(b),
                ReduceOp::Max => (*slot).max(b),
                ReduceOp::LAnd => i32::from(*slot != 0 && b != 0),
                ReduceOp::LOr => i32::from(*slot != 0 || b != 0),
                ReduceOp::LXor => i32::from((*slot != 0) ^ (b != 0)),
                ReduceOp::BAnd => *slot & b,
                ReduceOp::BOr => *slot | b,
                ReduceOp::BXor => *slot ^ b,
            };
        }
    }
    acc
}

/// Run one broadcast strategy and compare every rank's buffer against
/// the root's input.
pub async fn check_broadcast(strategy: &'static str, world: u32, count: usize, root: u32) {
    let config = ConcordConfig {
        broadcast: strategy.into(),
        ..ConcordConfig::default()
    };
    run_group(world, config, move |colls, comm| async move {
        let rank = comm.rank();
        let mut data: Vec<i32> = if rank == root {
            (0..count).map(|i| seeded(root, i)).collect()
        } else {
            vec![0; count]
        };
        colls
            .broadcast(&comm, ByteSpanMut::of(&mut data), root)
            .await
            .unwrap();
        let expected: Vec<i32> = (0..count).map(|i| seeded(root, i)).collect();
        assert_eq!(
            data, expected,
            "broadcast {strategy} world={world} count={count} rank={rank}"
        );
    })
    .await;
}

/// Run one allgather strategy and compare against the concatenation of
/// every rank's input.
pub async fn check_allgather(strategy: &'static str, world: u32, count: usize) {
    let config = ConcordConfig {
        allgather: strategy.into(),
        ..ConcordConfig::default()
    };
    run_group(world, config, move |colls, comm| async move {
        let rank = comm.rank();
        let send: Vec<i32> = (0..count).map(|i| seeded(rank, i)).collect();
        let mut recv: Vec<i32> = vec![0; count * world as usize];
        colls
            .allgather(&comm, ByteSpan::of(&send), ByteSpanMut::of(&mut recv))
            .await
            .unwrap();
        let expected: Vec<i32> = (0..world)
            .flat_map(|r| (0..count).map(move |i| seeded(r, i)))
            .collect();
        assert_eq!(
            recv, expected,
            "allgather {strategy} world={world} count={count} rank={rank}"
        );
    })
    .await;
}

/// Run one allreduce strategy and compare against the rank-order fold.
pub async fn check_allreduce(strategy: &'static str, world: u32, count: usize, op: ReduceOp) {
    let config = ConcordConfig {
        allreduce: strategy.into(),
        ..ConcordConfig::default()
    };
    run_group(world, config, move |colls, comm| async move {
        let rank = comm.rank();
        let send: Vec<i32> = (0..count).map(|i| seeded(rank, i)).collect();
        let mut recv: Vec<i32> = vec![0; count];
        colls
            .allreduce(&comm, ByteSpan::of(&send), ByteSpanMut::of(&mut recv), op)
            .await
            .unwrap();
        let expected = reference_reduce(world, count, op);
        assert_eq!(
            recv, expected,
            "allreduce {strategy} world={world} count={count} op={op} rank={rank}"
        );
    })
    .await;
}

/// Run one alltoall strategy and verify every received block against
/// its sender's generator.
pub async fn check_alltoall(strategy: &'static str, world: u32, per_peer: usize) {
    let config = ConcordConfig {
        alltoall: strategy.into(),
        ..ConcordConfig::default()
    };
    run_group(world, config, move |colls, comm| async move {
        let rank = comm.rank();
        let send: Vec<i32> = (0..world)
            .flat_map(|dst| (0..per_peer).map(move |i| seeded_pair(rank, dst, i)))
            .collect();
        let mut recv: Vec<i32> = vec![0; per_peer * world as usize];
        colls
            .alltoall(&comm, ByteSpan::of(&send), ByteSpanMut::of(&mut recv))
            .await
            .unwrap();
        let expected: Vec<i32> = (0..world)
            .flat_map(|src| (0..per_peer).map(move |i| seeded_pair(src, rank, i)))
            .collect();
        assert_eq!(
            recv, expected,
            "alltoall {strategy} world={world} per_peer={per_peer} rank={rank}"
        );
    })
    .await;
}

/// Run one reduce strategy and verify the root's result.
pub async fn check_reduce(strategy: &'static str, world: u32, count: usize, op: ReduceOp, root: u32) {
    let config = ConcordConfig {
        reduce: strategy.into(),
        ..ConcordConfig::default()
    };
    run_group(world, config, move |colls, comm| async move {
        let rank = comm.rank();
        let send: Vec<i32> = (0..count).map(|i| seeded(rank, i)).collect();
        let mut recv: Vec<i32> = vec![0; count];
        let recv_span = (rank == root).then(|| ByteSpanMut::of(&mut recv));
        colls
            .reduce(&comm, ByteSpan::of(&send), recv_span, op, root)
            .await
            .unwrap();
        if rank == root {
            let expected = reference_reduce(world, count, op);
            assert_eq!(
                recv, expected,
                "reduce {strategy} world={world} count={count} op={op}"
            );
        }
    })
    .await;
}
