//! Allreduce strategies: scatter-reduce/allgather ring, recursive
//! halving-doubling with non-power-of-two fold-in, and the SMP
//! four-phase binomial hierarchy.

use futures::future::BoxFuture;

use crate::collective::helpers::{
    ChunkLayout, SmpLayout, TAG_ALLREDUCE, collective_recv, collective_recv_exact,
    collective_send, floor_pow2, phase_tag, step_tag,
};
use crate::error::{ConcordError, Result};
use crate::reduce::reduce_slice;
use crate::registry::AllreduceAlgorithm;
use crate::transport::Communicator;
use crate::tree::{ProcTree, tree_broadcast, tree_anti_broadcast};
use crate::types::{DataType, Rank, ReduceOp};

const OP: &str = "allreduce";

/// Ring allreduce: in-place reduce across all ranks.
///
/// 1. Scatter-reduce: N-1 rounds. Each rank sends one chunk to the next
///    rank and receives one chunk from the previous rank, reducing
///    in place.
/// 2. Allgather: N-1 rounds forwarding the fully reduced chunks.
pub(crate) async fn ring_allreduce(
    comm: &Communicator,
    send: &[u8],
    recv: &mut [u8],
    count: usize,
    dtype: DataType,
    op: ReduceOp,
) -> Result<()> {
    let size = comm.size() as usize;
    let rank = comm.rank() as usize;
    let elem = dtype.size_in_bytes();

    recv.copy_from_slice(send);
    if size == 1 {
        return Ok(());
    }

    let layout = ChunkLayout::new(count, size);
    let next = ((rank + 1) % size) as Rank;
    let prev = ((rank + size - 1) % size) as Rank;

    // Phase 1: scatter-reduce.
    for step in 0..size - 1 {
        let send_idx = (rank + size - step) % size;
        let send_off = layout.offsets[send_idx] * elem;
        let send_len = layout.chunk_count(send_idx) * elem;

        let recv_idx = (rank + size - step - 1) % size;
        let recv_off = layout.offsets[recv_idx] * elem;
        let recv_count = layout.chunk_count(recv_idx);
        let recv_len = recv_count * elem;

        let outgoing = recv[send_off..send_off + send_len].to_vec();
        let tag = step_tag(phase_tag(TAG_ALLREDUCE, 1), step);
        let (_, received) = tokio::try_join!(
            collective_send(comm, next, &outgoing, OP, tag),
            collective_recv_exact(comm, prev, OP, tag, recv_len),
        )?;
        reduce_slice(
            &mut recv[recv_off..recv_off + recv_len],
            &received,
            recv_count,
            dtype,
            op,
        )?;
    }

    // Phase 2: allgather the reduced chunks.
    for step in 0..size - 1 {
        let send_idx = (rank + size + 1 - step) % size;
        let send_off = layout.offsets[send_idx] * elem;
        let send_len = layout.chunk_count(send_idx) * elem;

        let recv_idx = (rank + size - step) % size;
        let recv_off = layout.offsets[recv_idx] * elem;
        let recv_len = layout.chunk_count(recv_idx) * elem;

        let outgoing = recv[send_off..send_off + send_len].to_vec();
        let tag = step_tag(phase_tag(TAG_ALLREDUCE, 2), step);
        let (_, received) = tokio::try_join!(
            collective_send(comm, next, &outgoing, OP, tag),
            collective_recv_exact(comm, prev, OP, tag, recv_len),
        )?;
        recv[recv_off..recv_off + recv_len].copy_from_slice(&received);
    }

    Ok(())
}

/// Recursive halving-doubling allreduce.
///
/// The element count is padded up to a multiple of the group size in a
/// scratch buffer, excess ranks beyond the largest power of two fold
/// their data into a partner first, then `log2` halving rounds
/// reduce-scatter the active range and the mirror-image doubling rounds
/// gather it back. Excess ranks receive the finished result at the end.
pub(crate) async fn rab_allreduce(
    comm: &Communicator,
    send: &[u8],
    recv: &mut [u8],
    count: usize,
    dtype: DataType,
    op: ReduceOp,
) -> Result<()> {
    let size = comm.size() as usize;
    let rank = comm.rank() as usize;
    let elem = dtype.size_in_bytes();

    if size == 1 {
        recv.copy_from_slice(send);
        return Ok(());
    }

    // Padded scratch so every per-rank segment is the same size.
    let padded = count.div_ceil(size) * size;
    let mut buf = vec![0u8; padded * elem];
    buf[..count * elem].copy_from_slice(send);
    let total = padded * elem;

    let p2 = floor_pow2(size as u32) as usize;
    let excess = size - p2;

    let fold_tag = phase_tag(TAG_ALLREDUCE, 3);
    let unfold_tag = phase_tag(TAG_ALLREDUCE, 6);

    // Fold the excess ranks into the power-of-two subset.
    let participates = if rank < excess {
        let partner = (rank + p2) as Rank;
        let received = collective_recv_exact(comm, partner, OP, fold_tag, total).await?;
        reduce_slice(&mut buf, &received, padded, dtype, op)?;
        true
    } else if rank >= p2 {
        let partner = (rank - p2) as Rank;
        collective_send(comm, partner, &buf, OP, fold_tag).await?;
        false
    } else {
        true
    };

    if participates {
        let log2 = p2.trailing_zeros();

        // Reduce-scatter: the active range halves every round, the mask
        // halving with it.
        let mut slice_start = 0usize;
        let mut slice_len = padded;
        let mut masks = Vec::with_capacity(log2 as usize);
        let mut mask = p2 >> 1;
        while mask > 0 {
            masks.push(mask);
            mask >>= 1;
        }

        for (round, &mask) in masks.iter().enumerate() {
            let partner = (rank ^ mask) as Rank;
            let low_len = slice_len / 2;
            let high_len = slice_len - low_len;

            // The lower-indexed side keeps the lower half.
            let (send_start, send_count, keep_start, keep_count) = if rank & mask == 0 {
                (slice_start + low_len, high_len, slice_start, low_len)
            } else {
                (slice_start, low_len, slice_start + low_len, high_len)
            };

            let outgoing = buf[send_start * elem..(send_start + send_count) * elem].to_vec();
            let tag = step_tag(phase_tag(TAG_ALLREDUCE, 4), round);
            let (_, received) = tokio::try_join!(
                collective_send(comm, partner, &outgoing, OP, tag),
                collective_recv_exact(comm, partner, OP, tag, keep_count * elem),
            )?;
            reduce_slice(
                &mut buf[keep_start * elem..(keep_start + keep_count) * elem],
                &received,
                keep_count,
                dtype,
                op,
            )?;

            slice_start = keep_start;
            slice_len = keep_count;
        }

        // Allgather: mirror the halving rounds to rebuild the full
        // range on every participant.
        for (round, &mask) in masks.iter().rev().enumerate() {
            let partner = (rank ^ mask) as Rank;
            let outgoing = buf[slice_start * elem..(slice_start + slice_len) * elem].to_vec();
            let tag = step_tag(phase_tag(TAG_ALLREDUCE, 5), round);
            let (_, received) = tokio::try_join!(
                collective_send(comm, partner, &outgoing, OP, tag),
                collective_recv(comm, partner, OP, tag),
            )?;

            let recv_bytes = received.len();
            if rank & mask == 0 {
                let recv_off = (slice_start + slice_len) * elem;
                if recv_off + recv_bytes > buf.len() {
                    return Err(ConcordError::BufferSizeMismatch {
                        expected: buf.len() - recv_off,
                        actual: recv_bytes,
                    });
                }
                buf[recv_off..recv_off + recv_bytes].copy_from_slice(&received);
                slice_len += recv_bytes / elem;
            } else {
                let recv_count = recv_bytes / elem;
                if recv_count > slice_start {
                    return Err(ConcordError::BufferSizeMismatch {
                        expected: slice_start * elem,
                        actual: recv_bytes,
                    });
                }
                let recv_start = slice_start - recv_count;
                buf[recv_start * elem..slice_start * elem].copy_from_slice(&received);
                slice_start = recv_start;
                slice_len += recv_count;
            }
        }
    }

    // Hand the finished result back to the excess ranks.
    if rank < excess {
        let partner = (rank + p2) as Rank;
        collective_send(comm, partner, &buf, OP, unfold_tag).await?;
    } else if rank >= p2 {
        let partner = (rank - p2) as Rank;
        let received = collective_recv_exact(comm, partner, OP, unfold_tag, total).await?;
        buf.copy_from_slice(&received);
    }

    recv.copy_from_slice(&buf[..count * elem]);
    Ok(())
}

/// SMP four-phase allreduce: binomial reduce-up inside each group, then
/// among leaders, then binomial broadcast-down among leaders and inside
/// each group.
pub(crate) async fn smp_binomial_allreduce(
    comm: &Communicator,
    send: &[u8],
    recv: &mut [u8],
    count: usize,
    dtype: DataType,
    op: ReduceOp,
) -> Result<()> {
    let rank = comm.rank();
    let layout = SmpLayout::new(comm.size(), comm.config().smp_group_size);

    recv.copy_from_slice(send);
    if comm.size() == 1 {
        return Ok(());
    }

    let g = layout.group_of(rank);
    let local = layout.local_index(rank);
    let lsize = layout.group_len(g);
    let group_start = layout.leader_of_group(g);

    // Local tree over the group's local indices, mapped to real ranks.
    let local_tree = ProcTree::build(0, local, lsize, 2)?;
    let local_parent = local_tree.parent.map(|p| group_start + p);
    let local_children: Vec<Rank> =
        local_tree.children.iter().map(|&c| group_start + c).collect();

    // Leader tree over group indices, mapped to leader ranks.
    let leader_arcs = if layout.is_leader(rank) {
        let tree = ProcTree::build(0, g, layout.num_groups(), 2)?;
        let parent = tree.parent.map(|pg| layout.leader_of_group(pg));
        let children: Vec<Rank> = tree
            .children
            .iter()
            .map(|&cg| layout.leader_of_group(cg))
            .collect();
        Some((parent, children))
    } else {
        None
    };

    // Phase 1: reduce up to the group leader.
    tree_anti_broadcast(
        comm,
        local_parent,
        &local_children,
        recv,
        Some((dtype, op, count)),
        OP,
        phase_tag(TAG_ALLREDUCE, 7),
    )
    .await?;

    if let Some((parent, children)) = &leader_arcs {
        // Phase 2: reduce up among the leaders.
        tree_anti_broadcast(
            comm,
            *parent,
            children,
            recv,
            Some((dtype, op, count)),
            OP,
            phase_tag(TAG_ALLREDUCE, 8),
        )
        .await?;

        // Phase 3: broadcast down among the leaders.
        tree_broadcast(comm, *parent, children, recv, OP, phase_tag(TAG_ALLREDUCE, 9)).await?;
    }

    // Phase 4: broadcast down inside the group.
    tree_broadcast(
        comm,
        local_parent,
        &local_children,
        recv,
        OP,
        phase_tag(TAG_ALLREDUCE, 10),
    )
    .await
}

macro_rules! allreduce_strategy {
    ($name:ident, $fn:ident) => {
        pub struct $name;

        impl AllreduceAlgorithm for $name {
            fn run<'a>(
                &'a self,
                comm: &'a Communicator,
                send: &'a [u8],
                recv: &'a mut [u8],
                count: usize,
                dtype: DataType,
                op: ReduceOp,
            ) -> BoxFuture<'a, Result<()>> {
                Box::pin($fn(comm, send, recv, count, dtype, op))
            }
        }
    };
}

allreduce_strategy!(RingAllreduce, ring_allreduce);
allreduce_strategy!(RabAllreduce, rab_allreduce);
allreduce_strategy!(SmpBinomialAllreduce, smp_binomial_allreduce);
