//! Broadcast strategies: flat, pipelined flat, binomial tree,
//! arrival-pattern-aware chains, binomial scatter + recursive-doubling
//! allgather, and the SMP two-level hierarchy.

use futures::future::{BoxFuture, try_join_all};
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;

use crate::collective::helpers::{
    TAG_BROADCAST, collective_recv, collective_recv_exact, collective_send, phase_tag,
    rdb_allgather, step_tag, SmpLayout,
};
use crate::error::{ConcordError, Result};
use crate::registry::BroadcastAlgorithm;
use crate::transport::Communicator;
use crate::tree::{ProcTree, tree_broadcast};
use crate::types::{DataType, Rank};

const OP: &str = "broadcast";

/// Root sends the whole payload directly to every other rank.
pub(crate) async fn flat_bcast(
    comm: &Communicator,
    buf: &mut [u8],
    root: Rank,
) -> Result<()> {
    let tag = phase_tag(TAG_BROADCAST, 0);
    if comm.rank() == root {
        let data: &[u8] = buf;
        let sends = (0..comm.size())
            .filter(|&r| r != root)
            .map(|r| collective_send(comm, r, data, OP, tag));
        try_join_all(sends).await?;
    } else {
        let received = collective_recv_exact(comm, root, OP, tag, buf.len()).await?;
        buf.copy_from_slice(&received);
    }
    Ok(())
}

/// Flat broadcast split into fixed-size segments so transmission to
/// different ranks overlaps in flight.
pub(crate) async fn flat_pipelined_bcast(
    comm: &Communicator,
    buf: &mut [u8],
    root: Rank,
) -> Result<()> {
    let seg = comm.config().pipeline_segment_bytes.max(1);
    let segments: Vec<(usize, usize)> = (0..buf.len())
        .step_by(seg)
        .map(|off| (off, (off + seg).min(buf.len())))
        .collect();

    if comm.rank() == root {
        // Post every (rank, segment) send at once; per-destination
        // segment order is preserved by the distinct per-segment tags.
        let data: &[u8] = buf;
        let sends = (0..comm.size()).filter(|&r| r != root).flat_map(|r| {
            segments.iter().enumerate().map(move |(i, &(lo, hi))| {
                let payload = &data[lo..hi];
                let tag = step_tag(phase_tag(TAG_BROADCAST, 0), i);
                async move { collective_send(comm, r, payload, OP, tag).await }
            })
        });
        try_join_all(sends).await?;
    } else {
        for (i, (lo, hi)) in segments.iter().copied().enumerate() {
            let tag = step_tag(phase_tag(TAG_BROADCAST, 0), i);
            let received = collective_recv_exact(comm, root, OP, tag, hi - lo).await?;
            buf[lo..hi].copy_from_slice(&received);
        }
    }
    Ok(())
}

/// Classic binomial spanning tree of logarithmic depth.
pub(crate) async fn binomial_bcast(
    comm: &Communicator,
    buf: &mut [u8],
    root: Rank,
) -> Result<()> {
    let tree = ProcTree::build(root, comm.rank(), comm.size(), 2)?;
    tree.broadcast(comm, buf, OP, phase_tag(TAG_BROADCAST, 0)).await
}

/// Adaptive broadcast: the root serves consumers in whatever order their
/// ready signals arrive, forwarding each discovered chain through its
/// first member.
///
/// Trades deterministic delivery order for reduced tail latency; ranks
/// whose signals arrive late are served in later chains.
pub(crate) async fn arrival_pattern_aware_bcast(
    comm: &Communicator,
    buf: &mut [u8],
    root: Rank,
) -> Result<()> {
    let ready_tag = phase_tag(TAG_BROADCAST, 1);
    let header_tag = phase_tag(TAG_BROADCAST, 2);
    let data_tag = phase_tag(TAG_BROADCAST, 3);
    let size = comm.size();
    let rank = comm.rank();

    if rank != root {
        collective_send(comm, root, &[0u8], OP, ready_tag).await?;

        // The header arrives from the root or from the previous chain
        // member; the payload follows from the same sender.
        let peers: Vec<Rank> = (0..size).filter(|&r| r != rank).collect();
        let (from, header) = comm
            .recv_any(&peers, header_tag)
            .await
            .map_err(|e| ConcordError::collective(OP, root, e))?;
        let received = collective_recv_exact(comm, from, OP, data_tag, buf.len()).await?;
        buf.copy_from_slice(&received);

        // Forward the rest of the chain, if any.
        if header.len() >= 4 {
            let next = Rank::from_le_bytes([header[0], header[1], header[2], header[3]]);
            tokio::try_join!(
                collective_send(comm, next, &header[4..], OP, header_tag),
                collective_send(comm, next, buf, OP, data_tag),
            )?;
        }
        return Ok(());
    }

    // Root: collect ready signals in arrival order, serving each batch
    // as a forwarding chain headed by its first member.
    let mut pending: FuturesUnordered<_> = (0..size)
        .filter(|&r| r != root)
        .map(|r| {
            let fut = collective_recv(comm, r, OP, ready_tag);
            async move { fut.await.map(|_| r) }
        })
        .collect();

    let mut served = 1u32;
    while served < size {
        let Some(first) = pending.next().await else {
            break;
        };
        let mut batch = vec![first?];
        // Drain whatever other signals have already arrived; this is the
        // probe step that discovers the arrival pattern.
        while let Some(Some(extra)) = pending.next().now_or_never() {
            batch.push(extra?);
        }

        let header: Vec<u8> = batch[1..]
            .iter()
            .flat_map(|r| r.to_le_bytes())
            .collect();
        tokio::try_join!(
            collective_send(comm, batch[0], &header, OP, header_tag),
            collective_send(comm, batch[0], buf, OP, data_tag),
        )?;
        served += batch.len() as u32;
    }
    Ok(())
}

/// Binomial-descent scatter of ceiling-divided chunks.
///
/// Chunk `i` lands at byte offset `i * scatter_size` on the rank at
/// root-relative index `i`; ranks past the end of an uneven division
/// receive nothing.
async fn scatter_for_bcast(
    comm: &Communicator,
    root: Rank,
    nbytes: usize,
    scatter_size: usize,
    buf: &mut [u8],
    tag: u64,
) -> Result<()> {
    let size = comm.size() as usize;
    let rank = comm.rank() as usize;
    let relative = (rank + size - root as usize) % size;

    let mut curr = if rank == root as usize { nbytes } else { 0 };

    let mut mask = 1usize;
    while mask < size {
        if relative & mask != 0 {
            let src = ((rank + size - mask) % size) as Rank;
            let recv_cap = nbytes as i64 - (relative * scatter_size) as i64;
            if recv_cap <= 0 {
                // Uneven division: nothing for this subtree.
                curr = 0;
            } else {
                let received = collective_recv(comm, src, OP, tag).await?;
                if received.len() as i64 > recv_cap {
                    return Err(ConcordError::BufferSizeMismatch {
                        expected: recv_cap as usize,
                        actual: received.len(),
                    });
                }
                let off = relative * scatter_size;
                buf[off..off + received.len()].copy_from_slice(&received);
                curr = received.len();
            }
            break;
        }
        mask <<= 1;
    }

    // This rank now forwards to every subtree below it, peeling off the
    // top half of its holdings each step.
    mask >>= 1;
    while mask > 0 {
        if relative + mask < size {
            let send_size = curr as i64 - (scatter_size * mask) as i64;
            if send_size > 0 {
                let dst = ((rank + mask) % size) as Rank;
                let off = scatter_size * (relative + mask);
                collective_send(comm, dst, &buf[off..off + send_size as usize], OP, tag).await?;
                curr -= send_size as usize;
            }
        }
        mask >>= 1;
    }

    Ok(())
}

/// Scatter + recursive-doubling allgather broadcast.
pub(crate) async fn scatter_rdb_allgather_bcast(
    comm: &Communicator,
    buf: &mut [u8],
    root: Rank,
) -> Result<()> {
    let size = comm.size() as usize;
    let rank = comm.rank() as usize;
    let nbytes = buf.len();
    if size == 1 || nbytes == 0 {
        return Ok(());
    }

    let relative = (rank + size - root as usize) % size;
    let scatter_size = nbytes.div_ceil(size);

    // Scratch padded to a whole number of chunks so the donation pass
    // can address any subtree offset.
    let mut scratch = vec![0u8; scatter_size * size];
    if rank == root as usize {
        scratch[..nbytes].copy_from_slice(buf);
    }

    scatter_for_bcast(
        comm,
        root,
        nbytes,
        scatter_size,
        &mut scratch,
        phase_tag(TAG_BROADCAST, 1),
    )
    .await?;

    // Amount now held at this rank's own chunk offset.
    let curr = (nbytes as i64 - (relative * scatter_size) as i64)
        .clamp(0, scatter_size as i64) as usize;

    let total = rdb_allgather(
        comm,
        &mut scratch,
        scatter_size,
        nbytes,
        root,
        curr,
        OP,
        phase_tag(TAG_BROADCAST, 2),
    )
    .await?;
    if total != nbytes {
        return Err(ConcordError::BufferSizeMismatch {
            expected: nbytes,
            actual: total,
        });
    }

    buf.copy_from_slice(&scratch[..nbytes]);
    Ok(())
}

/// SMP two-level broadcast: binomial exchange among group leaders, then
/// each leader floods its local group.
pub(crate) async fn smp_binomial_bcast(
    comm: &Communicator,
    buf: &mut [u8],
    root: Rank,
) -> Result<()> {
    let rank = comm.rank();
    let layout = SmpLayout::new(comm.size(), comm.config().smp_group_size);
    let leader = layout.leader_of(rank);
    let root_group = layout.group_of(root);
    let root_leader = layout.leader_of_group(root_group);

    // Phase 0: a non-leader root hands the payload to its group leader.
    if root != root_leader {
        let tag = phase_tag(TAG_BROADCAST, 4);
        if rank == root {
            collective_send(comm, root_leader, buf, OP, tag).await?;
        } else if rank == root_leader {
            let received = collective_recv_exact(comm, root, OP, tag, buf.len()).await?;
            buf.copy_from_slice(&received);
        }
    }

    // Phase 1: binomial tree over the group indices, mapped onto leader
    // ranks.
    if layout.is_leader(rank) {
        let g = layout.group_of(rank);
        let tree = ProcTree::build(root_group, g, layout.num_groups(), 2)?;
        let parent = tree.parent.map(|pg| layout.leader_of_group(pg));
        let children: Vec<Rank> = tree
            .children
            .iter()
            .map(|&cg| layout.leader_of_group(cg))
            .collect();
        tree_broadcast(comm, parent, &children, buf, OP, phase_tag(TAG_BROADCAST, 5)).await?;
    }

    // Phase 2: leaders flood their local group.
    let tag = phase_tag(TAG_BROADCAST, 6);
    if layout.is_leader(rank) {
        let data: &[u8] = buf;
        let sends = layout
            .members(layout.group_of(rank))
            .filter(|&r| r != rank)
            .map(|r| collective_send(comm, r, data, OP, tag));
        try_join_all(sends).await?;
    } else {
        let received = collective_recv_exact(comm, leader, OP, tag, buf.len()).await?;
        buf.copy_from_slice(&received);
    }

    Ok(())
}

macro_rules! bcast_strategy {
    ($name:ident, $fn:ident) => {
        pub struct $name;

        impl BroadcastAlgorithm for $name {
            fn run<'a>(
                &'a self,
                comm: &'a Communicator,
                buf: &'a mut [u8],
                _count: usize,
                _dtype: DataType,
                root: Rank,
            ) -> BoxFuture<'a, Result<()>> {
                Box::pin($fn(comm, buf, root))
            }
        }
    };
}

bcast_strategy!(FlatBcast, flat_bcast);
bcast_strategy!(FlatPipelinedBcast, flat_pipelined_bcast);
bcast_strategy!(BinomialBcast, binomial_bcast);
bcast_strategy!(ArrivalPatternAwareBcast, arrival_pattern_aware_bcast);
bcast_strategy!(ScatterRdbAllgatherBcast, scatter_rdb_allgather_bcast);
bcast_strategy!(SmpBinomialBcast, smp_binomial_bcast);
