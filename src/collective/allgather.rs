//! Allgather strategies: the forwarding ring and the SMP two-level
//! hierarchy.

use futures::future::{BoxFuture, try_join_all};

use crate::collective::helpers::{
    TAG_ALLGATHER, collective_recv_exact, collective_send, collective_sendrecv, phase_tag,
    step_tag, SmpLayout,
};
use crate::error::Result;
use crate::registry::AllgatherAlgorithm;
use crate::transport::Communicator;
use crate::types::DataType;

const OP: &str = "allgather";

/// Ring allgather: N-1 rounds where each rank forwards the latest
/// received block to its successor.
pub(crate) async fn ring_allgather(
    comm: &Communicator,
    send: &[u8],
    recv: &mut [u8],
    _count: usize,
    _dtype: DataType,
) -> Result<()> {
    let size = comm.size() as usize;
    let rank = comm.rank() as usize;
    let chunk = send.len();

    recv[rank * chunk..(rank + 1) * chunk].copy_from_slice(send);
    if size == 1 {
        return Ok(());
    }

    let next = ((rank + 1) % size) as u32;
    let prev = ((rank + size - 1) % size) as u32;

    for step in 0..size - 1 {
        let send_idx = (rank + size - step) % size;
        let recv_idx = (rank + size - step - 1) % size;

        let outgoing = recv[send_idx * chunk..(send_idx + 1) * chunk].to_vec();
        let tag = step_tag(phase_tag(TAG_ALLGATHER, 0), step);
        let (_, received) = tokio::try_join!(
            collective_send(comm, next, &outgoing, OP, tag),
            collective_recv_exact(comm, prev, OP, tag, chunk),
        )?;
        recv[recv_idx * chunk..(recv_idx + 1) * chunk].copy_from_slice(&received);
    }
    Ok(())
}

/// SMP two-level allgather.
///
/// Three phases: an intra-group rotation in which each rank exchanges
/// its own block with every local neighbor, a leader-level exchange of
/// the aggregated per-group blocks, and a leader flood of the assembled
/// buffer back down to its group.
pub(crate) async fn smp_simple_allgather(
    comm: &Communicator,
    send: &[u8],
    recv: &mut [u8],
    _count: usize,
    _dtype: DataType,
) -> Result<()> {
    let size = comm.size();
    let rank = comm.rank();
    let chunk = send.len();
    let layout = SmpLayout::new(size, comm.config().smp_group_size);

    recv[rank as usize * chunk..(rank as usize + 1) * chunk].copy_from_slice(send);
    if size == 1 {
        return Ok(());
    }

    let g = layout.group_of(rank);
    let local = layout.local_index(rank);
    let lsize = layout.group_len(g);
    let group_start = layout.leader_of_group(g) as usize;

    // Phase 1: rotate own block through the local group, exchanging with
    // neighbor +i while receiving from neighbor -i.
    for i in 1..lsize {
        let dst = group_start as u32 + (local + i) % lsize;
        let src = group_start as u32 + (local + lsize - i) % lsize;
        let tag = step_tag(phase_tag(TAG_ALLGATHER, 1), i as usize);
        let received = collective_sendrecv(comm, dst, send, src, OP, tag).await?;
        if received.len() != chunk {
            return Err(crate::error::ConcordError::BufferSizeMismatch {
                expected: chunk,
                actual: received.len(),
            });
        }
        recv[src as usize * chunk..(src as usize + 1) * chunk].copy_from_slice(&received);
    }

    // Phase 2: leaders exchange their groups' aggregated blocks with
    // every other leader, all sends and receives posted as one set.
    if layout.is_leader(rank) {
        let tag = phase_tag(TAG_ALLGATHER, 2);
        let my_block = recv[group_start * chunk..(group_start + lsize as usize) * chunk].to_vec();

        let sends = (0..layout.num_groups()).filter(|&g2| g2 != g).map(|g2| {
            collective_send(comm, layout.leader_of_group(g2), &my_block, OP, tag)
        });
        let recvs = (0..layout.num_groups()).filter(|&g2| g2 != g).map(|g2| {
            let leader = layout.leader_of_group(g2);
            let expected = layout.group_len(g2) as usize * chunk;
            let fut = collective_recv_exact(comm, leader, OP, tag, expected);
            async move { fut.await.map(|bytes| (g2, bytes)) }
        });

        let (_, blocks) = tokio::try_join!(try_join_all(sends), try_join_all(recvs))?;
        for (g2, bytes) in blocks {
            let start = layout.leader_of_group(g2) as usize * chunk;
            recv[start..start + bytes.len()].copy_from_slice(&bytes);
        }
    }

    // Phase 3: leaders flood the assembled buffer to their group.
    let tag = phase_tag(TAG_ALLGATHER, 3);
    if layout.is_leader(rank) {
        let data: &[u8] = recv;
        let sends = layout
            .members(g)
            .filter(|&r| r != rank)
            .map(|r| collective_send(comm, r, data, OP, tag));
        try_join_all(sends).await?;
    } else {
        let received =
            collective_recv_exact(comm, layout.leader_of(rank), OP, tag, recv.len()).await?;
        recv.copy_from_slice(&received);
    }

    Ok(())
}

macro_rules! allgather_strategy {
    ($name:ident, $fn:ident) => {
        pub struct $name;

        impl AllgatherAlgorithm for $name {
            fn run<'a>(
                &'a self,
                comm: &'a Communicator,
                send: &'a [u8],
                recv: &'a mut [u8],
                count: usize,
                dtype: DataType,
            ) -> BoxFuture<'a, Result<()>> {
                Box::pin($fn(comm, send, recv, count, dtype))
            }
        }
    };
}

allgather_strategy!(RingAllgather, ring_allgather);
allgather_strategy!(SmpSimpleAllgather, smp_simple_allgather);
