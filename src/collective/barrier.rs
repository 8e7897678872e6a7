//! Barrier strategies: flat collect-and-release, the nary-tree token
//! barrier, and the dissemination barrier.

use futures::future::{BoxFuture, try_join_all};

use crate::collective::helpers::{
    TAG_BARRIER, ceil_log2, collective_recv, collective_send, phase_tag, step_tag,
};
use crate::error::Result;
use crate::registry::BarrierAlgorithm;
use crate::transport::Communicator;
use crate::tree::ProcTree;

const OP: &str = "barrier";

/// Every rank reports to rank 0, which releases them all.
pub(crate) async fn flat_barrier(comm: &Communicator) -> Result<()> {
    let up = phase_tag(TAG_BARRIER, 1);
    let down = phase_tag(TAG_BARRIER, 2);
    let rank = comm.rank();
    let size = comm.size();
    if size <= 1 {
        return Ok(());
    }

    if rank == 0 {
        for r in 1..size {
            collective_recv(comm, r, OP, up).await?;
        }
        let releases = (1..size).map(|r| collective_send(comm, r, &[0u8], OP, down));
        try_join_all(releases).await?;
    } else {
        collective_send(comm, 0, &[0u8], OP, up).await?;
        collective_recv(comm, 0, OP, down).await?;
    }
    Ok(())
}

/// Collect a one-byte token up an n-ary tree, then broadcast it back
/// down. A rank may only leave once every other rank has entered.
pub(crate) async fn nary_tree_barrier(comm: &Communicator) -> Result<()> {
    if comm.size() <= 1 {
        return Ok(());
    }
    let arity = comm.config().tree_arity;
    let tree = ProcTree::build(0, comm.rank(), comm.size(), arity)?;
    let mut token = [0u8; 1];
    tree.anti_broadcast(comm, &mut token, None, OP, phase_tag(TAG_BARRIER, 3))
        .await?;
    tree.broadcast(comm, &mut token, OP, phase_tag(TAG_BARRIER, 4))
        .await
}

/// Dissemination barrier: `ceil(log2(N))` symmetric rounds with no
/// coordinator.
///
/// In round r, rank i sends to `(i + 2^r) % N` and receives from
/// `(i - 2^r + N) % N`; afterwards every rank has transitively heard
/// from every other rank.
pub(crate) async fn dissemination_barrier(comm: &Communicator) -> Result<()> {
    let rank = comm.rank();
    let size = comm.size();
    if size <= 1 {
        return Ok(());
    }

    for round in 0..ceil_log2(size) {
        let distance = 1u32 << round;
        let send_to = (rank + distance) % size;
        let recv_from = (rank + size - distance) % size;
        let tag = step_tag(phase_tag(TAG_BARRIER, 5), round as usize);

        tokio::try_join!(
            collective_send(comm, send_to, &[0u8], OP, tag),
            collective_recv(comm, recv_from, OP, tag),
        )?;
    }
    Ok(())
}

macro_rules! barrier_strategy {
    ($name:ident, $fn:ident) => {
        pub struct $name;

        impl BarrierAlgorithm for $name {
            fn run<'a>(&'a self, comm: &'a Communicator) -> BoxFuture<'a, Result<()>> {
                Box::pin($fn(comm))
            }
        }
    };
}

barrier_strategy!(FlatBarrier, flat_barrier);
barrier_strategy!(NaryTreeBarrier, nary_tree_barrier);
barrier_strategy!(DisseminationBarrier, dissemination_barrier);
