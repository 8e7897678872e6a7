//! Rooted reduce strategies: flat rank-order fold and binomial tree
//! reduction.

use futures::future::{BoxFuture, try_join_all};

use crate::collective::helpers::{
    TAG_REDUCE, collective_recv_exact, collective_send, phase_tag,
};
use crate::error::Result;
use crate::reduce::reduce_slice;
use crate::registry::ReduceAlgorithm;
use crate::transport::Communicator;
use crate::tree::ProcTree;
use crate::types::{DataType, Rank, ReduceOp};

const OP: &str = "reduce";

/// Root receives every contribution and folds them in rank order.
pub(crate) async fn flat_reduce(
    comm: &Communicator,
    send: &[u8],
    recv: &mut [u8],
    count: usize,
    dtype: DataType,
    op: ReduceOp,
    root: Rank,
) -> Result<()> {
    let tag = phase_tag(TAG_REDUCE, 0);
    let rank = comm.rank();
    let size = comm.size();

    if rank != root {
        return collective_send(comm, root, send, OP, tag).await;
    }

    // Gather every contribution first, then fold in rank order so the
    // association matches the trivial sequential reference.
    let recvs = (0..size).filter(|&r| r != root).map(|r| {
        let fut = collective_recv_exact(comm, r, OP, tag, send.len());
        async move { fut.await.map(|bytes| (r, bytes)) }
    });
    let mut parts: Vec<Vec<u8>> = vec![Vec::new(); size as usize];
    parts[root as usize] = send.to_vec();
    for (r, bytes) in try_join_all(recvs).await? {
        parts[r as usize] = bytes.to_vec();
    }

    let mut acc = std::mem::take(&mut parts[0]);
    for part in &parts[1..] {
        reduce_slice(&mut acc, part, count, dtype, op)?;
    }
    recv.copy_from_slice(&acc);
    Ok(())
}

/// Binomial tree reduction toward `root`, reducing on every inbound
/// edge.
pub(crate) async fn binomial_reduce(
    comm: &Communicator,
    send: &[u8],
    recv: &mut [u8],
    count: usize,
    dtype: DataType,
    op: ReduceOp,
    root: Rank,
) -> Result<()> {
    let tree = ProcTree::build(root, comm.rank(), comm.size(), 2)?;
    let mut acc = send.to_vec();
    tree.anti_broadcast(
        comm,
        &mut acc,
        Some((dtype, op, count)),
        OP,
        phase_tag(TAG_REDUCE, 1),
    )
    .await?;
    if tree.is_root() {
        recv.copy_from_slice(&acc);
    }
    Ok(())
}

macro_rules! reduce_strategy {
    ($name:ident, $fn:ident) => {
        pub struct $name;

        impl ReduceAlgorithm for $name {
            fn run<'a>(
                &'a self,
                comm: &'a Communicator,
                send: &'a [u8],
                recv: &'a mut [u8],
                count: usize,
                dtype: DataType,
                op: ReduceOp,
                root: Rank,
            ) -> BoxFuture<'a, Result<()>> {
                Box::pin($fn(comm, send, recv, count, dtype, op, root))
            }
        }
    };
}

reduce_strategy!(FlatReduce, flat_reduce);
reduce_strategy!(BinomialReduce, binomial_reduce);
