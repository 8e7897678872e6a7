//! Shared plumbing for the collective algorithms: tag allocation, chunk
//! layouts, SMP group partitioning, error-wrapping send/recv, and the
//! recursive-doubling allgather core.

use bytes::Bytes;

use crate::error::{ConcordError, Result};
use crate::transport::Communicator;
use crate::types::Rank;

// One tag base per collective kind; phases within an algorithm and steps
// within a phase get their own offsets so a message from one phase can
// never be mistaken for a message of another.
pub(crate) const TAG_BROADCAST: u64 = 1 << 32;
pub(crate) const TAG_BARRIER: u64 = 2 << 32;
pub(crate) const TAG_ALLGATHER: u64 = 3 << 32;
pub(crate) const TAG_ALLREDUCE: u64 = 4 << 32;
pub(crate) const TAG_ALLTOALL: u64 = 5 << 32;
pub(crate) const TAG_ALLTOALLV: u64 = 6 << 32;
pub(crate) const TAG_REDUCE: u64 = 7 << 32;

pub(crate) const fn phase_tag(base: u64, phase: u64) -> u64 {
    base | (phase << 16)
}

pub(crate) const fn step_tag(tag: u64, step: usize) -> u64 {
    tag | step as u64
}

/// Integer ceiling of log2(n). Returns 0 for n <= 1.
pub(crate) fn ceil_log2(n: u32) -> u32 {
    if n <= 1 {
        return 0;
    }
    u32::BITS - (n - 1).leading_zeros()
}

/// Largest power of two not exceeding `n` (n >= 1).
pub(crate) fn floor_pow2(n: u32) -> u32 {
    debug_assert!(n >= 1);
    1 << (u32::BITS - 1 - n.leading_zeros())
}

/// Balanced split of `count` elements into `parts` chunks: the first
/// `count % parts` chunks carry one extra element.
pub(crate) struct ChunkLayout {
    pub offsets: Vec<usize>,
    pub counts: Vec<usize>,
}

impl ChunkLayout {
    pub(crate) fn new(count: usize, parts: usize) -> Self {
        let base = count / parts;
        let rem = count % parts;
        let mut offsets = Vec::with_capacity(parts);
        let mut counts = Vec::with_capacity(parts);
        let mut off = 0;
        for i in 0..parts {
            let c = base + usize::from(i < rem);
            offsets.push(off);
            counts.push(c);
            off += c;
        }
        Self { offsets, counts }
    }

    pub(crate) fn chunk_count(&self, i: usize) -> usize {
        self.counts[i]
    }
}

/// Partition of `size` ranks into consecutive local groups of at most
/// `group_size` ranks; the last group may be smaller. The first rank of
/// each group is its leader.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SmpLayout {
    size: u32,
    group: u32,
}

impl SmpLayout {
    pub(crate) fn new(size: u32, group_size: u32) -> Self {
        Self {
            size,
            group: group_size.max(1),
        }
    }

    pub(crate) fn num_groups(&self) -> u32 {
        self.size.div_ceil(self.group)
    }

    pub(crate) fn group_of(&self, rank: Rank) -> u32 {
        rank / self.group
    }

    pub(crate) fn leader_of_group(&self, g: u32) -> Rank {
        g * self.group
    }

    pub(crate) fn leader_of(&self, rank: Rank) -> Rank {
        self.leader_of_group(self.group_of(rank))
    }

    pub(crate) fn is_leader(&self, rank: Rank) -> bool {
        rank == self.leader_of(rank)
    }

    pub(crate) fn local_index(&self, rank: Rank) -> u32 {
        rank % self.group
    }

    pub(crate) fn group_len(&self, g: u32) -> u32 {
        self.group.min(self.size - g * self.group)
    }

    pub(crate) fn members(&self, g: u32) -> std::ops::Range<Rank> {
        let start = g * self.group;
        start..start + self.group_len(g)
    }
}

/// Send wrapped so failures name the collective and the peer.
pub(crate) async fn collective_send(
    comm: &Communicator,
    dest: Rank,
    data: &[u8],
    operation: &'static str,
    tag: u64,
) -> Result<()> {
    comm.send(dest, tag, data)
        .await
        .map_err(|e| ConcordError::collective(operation, dest, e))
}

/// Receive wrapped so failures name the collective and the peer.
pub(crate) async fn collective_recv(
    comm: &Communicator,
    src: Rank,
    operation: &'static str,
    tag: u64,
) -> Result<Bytes> {
    comm.recv(src, tag)
        .await
        .map_err(|e| ConcordError::collective(operation, src, e))
}

/// Receive that also validates the payload length.
pub(crate) async fn collective_recv_exact(
    comm: &Communicator,
    src: Rank,
    operation: &'static str,
    tag: u64,
    expected: usize,
) -> Result<Bytes> {
    let received = collective_recv(comm, src, operation, tag).await?;
    if received.len() != expected {
        return Err(ConcordError::BufferSizeMismatch {
            expected,
            actual: received.len(),
        });
    }
    Ok(received)
}

/// Concurrent send/receive against possibly distinct peers.
pub(crate) async fn collective_sendrecv(
    comm: &Communicator,
    dest: Rank,
    data: &[u8],
    src: Rank,
    operation: &'static str,
    tag: u64,
) -> Result<Bytes> {
    let (_, received) = tokio::try_join!(
        collective_send(comm, dest, data, operation, tag),
        collective_recv(comm, src, operation, tag),
    )?;
    Ok(received)
}

/// Recursive-doubling allgather over root-relative numbering, the shared
/// core of the scatter-rdb-allgather broadcast and the rdb alltoall.
///
/// `buf` is divided into `scatter_size`-byte units; unit `u` belongs to
/// relative rank `u`, and `nbytes` (possibly not a multiple of
/// `scatter_size`) bounds the meaningful prefix of `buf`. On entry this
/// rank holds `curr_size` bytes starting at its tree-root offset; on
/// exit every rank holds all `nbytes` and the total received is
/// returned.
///
/// When the group size is not a power of two, subtrees whose partner
/// falls outside the group receive their missing data through a
/// tree-shaped donation pass from the subtrees that completed the round.
pub(crate) async fn rdb_allgather(
    comm: &Communicator,
    buf: &mut [u8],
    scatter_size: usize,
    nbytes: usize,
    root: Rank,
    mut curr_size: usize,
    operation: &'static str,
    tag: u64,
) -> Result<usize> {
    let size = comm.size() as usize;
    let rank = comm.rank() as usize;
    let root = root as usize;
    let relative = (rank + size - root) % size;

    // Bytes received by the most recent exchange; donation sends forward
    // exactly this amount.
    let mut recv_size = 0usize;

    let mut mask = 1usize;
    let mut i = 0u32;
    while mask < size {
        let rel_dst = relative ^ mask;
        let dst = (rel_dst + root) % size;

        // Zero out the low i bits to find the subtree roots whose data
        // is exchanged this round.
        let dst_tree_root = (rel_dst >> i) << i;
        let my_tree_root = (relative >> i) << i;
        let send_off = my_tree_root * scatter_size;
        let recv_off = dst_tree_root * scatter_size;

        if rel_dst < size {
            let received = collective_sendrecv(
                comm,
                dst as Rank,
                &buf[send_off..send_off + curr_size],
                dst as Rank,
                operation,
                step_tag(tag, i as usize),
            )
            .await?;
            let recv_cap = nbytes.saturating_sub(recv_off);
            if received.len() > recv_cap {
                return Err(ConcordError::BufferSizeMismatch {
                    expected: recv_cap,
                    actual: received.len(),
                });
            }
            buf[recv_off..recv_off + received.len()].copy_from_slice(&received);
            recv_size = received.len();
            curr_size += recv_size;
        }

        // Non-power-of-two fix-up: if some subtree had no partner this
        // round, the haves donate down a halving tree to the have-nots.
        if dst_tree_root + mask > size {
            let nprocs_completed = size as i64 - my_tree_root as i64 - mask as i64;
            let offset = scatter_size * (my_tree_root + mask);
            let mut k = i as i64;
            let mut tmp_mask = mask >> 1;
            while tmp_mask > 0 {
                let rel_dst2 = relative ^ tmp_mask;
                let dst2 = (rel_dst2 + root) % size;
                let tree_root = ((relative as i64) >> k) << k;

                if rel_dst2 > relative
                    && (relative as i64) < tree_root + nprocs_completed
                    && (rel_dst2 as i64) >= tree_root + nprocs_completed
                {
                    // This rank has the data, the partner does not.
                    collective_send(
                        comm,
                        dst2 as Rank,
                        &buf[offset..offset + recv_size],
                        operation,
                        step_tag(tag, i as usize),
                    )
                    .await?;
                } else if rel_dst2 < relative
                    && (rel_dst2 as i64) < tree_root + nprocs_completed
                    && (relative as i64) >= tree_root + nprocs_completed
                {
                    let received = collective_recv(
                        comm,
                        dst2 as Rank,
                        operation,
                        step_tag(tag, i as usize),
                    )
                    .await?;
                    let recv_cap = nbytes.saturating_sub(offset);
                    if received.len() > recv_cap {
                        return Err(ConcordError::BufferSizeMismatch {
                            expected: recv_cap,
                            actual: received.len(),
                        });
                    }
                    buf[offset..offset + received.len()].copy_from_slice(&received);
                    recv_size = received.len();
                    curr_size += recv_size;
                }
                tmp_mask >>= 1;
                k -= 1;
            }
        }

        mask <<= 1;
        i += 1;
    }

    Ok(curr_size)
}
