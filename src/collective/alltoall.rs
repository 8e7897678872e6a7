//! Alltoall strategies: shifted-ring exchanges with three
//! synchronization flavors, XOR pairwise exchange, recursive doubling
//! with a donation fix-up, and the 3-D mesh decomposition.

use futures::future::BoxFuture;

use crate::collective::barrier::nary_tree_barrier;
use crate::collective::helpers::{
    TAG_ALLTOALL, collective_sendrecv, phase_tag, rdb_allgather, step_tag,
};
use crate::error::{ConcordError, Result};
use crate::registry::AlltoallAlgorithm;
use crate::transport::Communicator;
use crate::types::{DataType, Rank};

const OP: &str = "alltoall";

/// Ring alltoall: N-1 steps, step `i` sends to `rank + i` and receives
/// from `rank - i`.
pub(crate) async fn ring_alltoall(
    comm: &Communicator,
    send: &[u8],
    recv: &mut [u8],
    count: usize,
    dtype: DataType,
) -> Result<()> {
    ring_alltoall_inner(comm, send, recv, count, dtype, StepSync::None).await
}

/// Ring alltoall with a full barrier before every step.
pub(crate) async fn ring_barrier_alltoall(
    comm: &Communicator,
    send: &[u8],
    recv: &mut [u8],
    count: usize,
    dtype: DataType,
) -> Result<()> {
    ring_alltoall_inner(comm, send, recv, count, dtype, StepSync::Barrier).await
}

/// Ring alltoall with a one-byte handshake interleaved between
/// consecutive steps, bounding the number of unacknowledged sends in
/// flight without paying for a full barrier.
pub(crate) async fn ring_light_barrier_alltoall(
    comm: &Communicator,
    send: &[u8],
    recv: &mut [u8],
    count: usize,
    dtype: DataType,
) -> Result<()> {
    ring_alltoall_inner(comm, send, recv, count, dtype, StepSync::Handshake).await
}

#[derive(Clone, Copy, PartialEq)]
enum StepSync {
    None,
    Handshake,
    Barrier,
}

async fn ring_alltoall_inner(
    comm: &Communicator,
    send: &[u8],
    recv: &mut [u8],
    count: usize,
    dtype: DataType,
    sync: StepSync,
) -> Result<()> {
    let size = comm.size() as usize;
    let rank = comm.rank() as usize;
    let chunk = count * dtype.size_in_bytes();

    recv[rank * chunk..(rank + 1) * chunk].copy_from_slice(&send[rank * chunk..(rank + 1) * chunk]);

    for i in 1..size {
        let dst = ((rank + i) % size) as Rank;
        let src = ((rank + size - i) % size) as Rank;

        match sync {
            StepSync::Barrier => nary_tree_barrier(comm).await?,
            // Handshake with this step's partners before moving data so
            // no rank runs more than one step ahead of its neighbors.
            StepSync::Handshake if i > 1 => {
                let tag = step_tag(phase_tag(TAG_ALLTOALL, 1), i);
                collective_sendrecv(comm, dst, &[0u8], src, OP, tag).await?;
            }
            _ => {}
        }

        let tag = step_tag(phase_tag(TAG_ALLTOALL, 0), i);
        let dst_off = dst as usize * chunk;
        let received =
            collective_sendrecv(comm, dst, &send[dst_off..dst_off + chunk], src, OP, tag).await?;
        if received.len() != chunk {
            return Err(ConcordError::BufferSizeMismatch {
                expected: chunk,
                actual: received.len(),
            });
        }
        recv[src as usize * chunk..(src as usize + 1) * chunk].copy_from_slice(&received);
    }
    Ok(())
}

/// Pairwise exchange: exactly N steps, step `i` exchanging with
/// `rank XOR i`. A single barrier precedes the loop; the pairwise
/// exchanges themselves are independent.
///
/// Requires a power-of-two group size for XOR to be a permutation.
pub(crate) async fn pairwise_one_barrier_alltoall(
    comm: &Communicator,
    send: &[u8],
    recv: &mut [u8],
    count: usize,
    dtype: DataType,
) -> Result<()> {
    let size = comm.size() as usize;
    let rank = comm.rank() as usize;
    let chunk = count * dtype.size_in_bytes();

    if !size.is_power_of_two() {
        return Err(ConcordError::Precondition {
            algorithm: "alltoall-pairwise-one-barrier",
            requirement: "a power-of-two group size",
            size: comm.size(),
        });
    }

    nary_tree_barrier(comm).await?;

    for step in 0..size {
        let partner = rank ^ step;
        let p_off = partner * chunk;
        if partner == rank {
            recv[p_off..p_off + chunk].copy_from_slice(&send[p_off..p_off + chunk]);
            continue;
        }
        let tag = step_tag(phase_tag(TAG_ALLTOALL, 2), step);
        let received = collective_sendrecv(
            comm,
            partner as Rank,
            &send[p_off..p_off + chunk],
            partner as Rank,
            OP,
            tag,
        )
        .await?;
        if received.len() != chunk {
            return Err(ConcordError::BufferSizeMismatch {
                expected: chunk,
                actual: received.len(),
            });
        }
        recv[p_off..p_off + chunk].copy_from_slice(&received);
    }
    Ok(())
}

/// Recursive-doubling alltoall: every rank's whole send buffer is
/// allgathered in log rounds (with the donation fix-up for
/// non-power-of-two groups), then each rank extracts its own column.
pub(crate) async fn rdb_alltoall(
    comm: &Communicator,
    send: &[u8],
    recv: &mut [u8],
    count: usize,
    dtype: DataType,
) -> Result<()> {
    let size = comm.size() as usize;
    let rank = comm.rank() as usize;
    let chunk = count * dtype.size_in_bytes();
    let block = size * chunk;

    let mut all = vec![0u8; size * block];
    all[rank * block..(rank + 1) * block].copy_from_slice(send);

    let total = rdb_allgather(
        comm,
        &mut all,
        block,
        size * block,
        0,
        block,
        OP,
        phase_tag(TAG_ALLTOALL, 3),
    )
    .await?;
    if total != size * block {
        return Err(ConcordError::BufferSizeMismatch {
            expected: size * block,
            actual: total,
        });
    }

    for src in 0..size {
        let from = src * block + rank * chunk;
        recv[src * chunk..(src + 1) * chunk].copy_from_slice(&all[from..from + chunk]);
    }
    Ok(())
}

/// Factor `n` as `x * x * z` with `x >= 2`, trying `x` from the cube
/// root downward. The degenerate 1*1*n column does not count as a mesh.
pub(crate) fn factor_3d(n: usize) -> Option<(usize, usize, usize)> {
    let mut icbrt = 1usize;
    while (icbrt + 1).pow(3) <= n {
        icbrt += 1;
    }
    for x in (2..=icbrt).rev() {
        if n % (x * x) == 0 {
            return Some((x, x, n / (x * x)));
        }
    }
    None
}

/// 3-D mesh alltoall: the global exchange decomposes into three
/// sequential axis-local gather passes (x rows, then y columns, then z
/// pillars), each aggregating progressively larger blocks, followed by
/// a local reshuffle into destination order.
///
/// Refuses groups with no `x * x * z` factorization rather than running
/// with incorrect geometry.
pub(crate) async fn mesh3d_alltoall(
    comm: &Communicator,
    send: &[u8],
    recv: &mut [u8],
    count: usize,
    dtype: DataType,
) -> Result<()> {
    let size = comm.size() as usize;
    let rank = comm.rank() as usize;
    let chunk = count * dtype.size_in_bytes();
    let block = size * chunk;

    let Some((dx, dy, dz)) = factor_3d(size) else {
        return Err(ConcordError::NotApplicable {
            algorithm: "alltoall-3dmesh",
            size: comm.size(),
            reason: "no x*x*z factorization with x >= 2",
        });
    };

    let cx = rank % dx;
    let cy = (rank / dx) % dy;
    let cz = rank / (dx * dy);

    // Staging buffer holding every rank's send buffer, indexed by rank.
    let mut all = vec![0u8; size * block];
    all[rank * block..(rank + 1) * block].copy_from_slice(send);

    // Pass 1: gather send buffers along the x row (same cy, cz).
    let row_base = rank - cx;
    for i in 1..dx {
        let dst = (row_base + (cx + i) % dx) as Rank;
        let src = (row_base + (cx + dx - i) % dx) as Rank;
        let tag = step_tag(phase_tag(TAG_ALLTOALL, 4), i);
        let received = collective_sendrecv(comm, dst, send, src, OP, tag).await?;
        if received.len() != block {
            return Err(ConcordError::BufferSizeMismatch {
                expected: block,
                actual: received.len(),
            });
        }
        all[src as usize * block..(src as usize + 1) * block].copy_from_slice(&received);
    }

    // Pass 2: exchange whole x rows along the y column (same cx, cz).
    let row_bytes = dx * block;
    let row_off = |cyy: usize| dx * (cyy + dy * cz) * block;
    for i in 1..dy {
        let dst_cy = (cy + i) % dy;
        let src_cy = (cy + dy - i) % dy;
        let dst = (cx + dx * (dst_cy + dy * cz)) as Rank;
        let src = (cx + dx * (src_cy + dy * cz)) as Rank;
        let tag = step_tag(phase_tag(TAG_ALLTOALL, 5), i);
        let outgoing = all[row_off(cy)..row_off(cy) + row_bytes].to_vec();
        let received = collective_sendrecv(comm, dst, &outgoing, src, OP, tag).await?;
        if received.len() != row_bytes {
            return Err(ConcordError::BufferSizeMismatch {
                expected: row_bytes,
                actual: received.len(),
            });
        }
        all[row_off(src_cy)..row_off(src_cy) + row_bytes].copy_from_slice(&received);
    }

    // Pass 3: exchange whole xy planes along the z pillar (same cx, cy).
    let plane_bytes = dx * dy * block;
    let plane_off = |czz: usize| dx * dy * czz * block;
    for i in 1..dz {
        let dst_cz = (cz + i) % dz;
        let src_cz = (cz + dz - i) % dz;
        let dst = (cx + dx * (cy + dy * dst_cz)) as Rank;
        let src = (cx + dx * (cy + dy * src_cz)) as Rank;
        let tag = step_tag(phase_tag(TAG_ALLTOALL, 6), i);
        let outgoing = all[plane_off(cz)..plane_off(cz) + plane_bytes].to_vec();
        let received = collective_sendrecv(comm, dst, &outgoing, src, OP, tag).await?;
        if received.len() != plane_bytes {
            return Err(ConcordError::BufferSizeMismatch {
                expected: plane_bytes,
                actual: received.len(),
            });
        }
        all[plane_off(src_cz)..plane_off(src_cz) + plane_bytes].copy_from_slice(&received);
    }

    // Local reshuffle: pull my column out of every gathered send buffer.
    for src in 0..size {
        let from = src * block + rank * chunk;
        recv[src * chunk..(src + 1) * chunk].copy_from_slice(&all[from..from + chunk]);
    }
    Ok(())
}

macro_rules! alltoall_strategy {
    ($name:ident, $fn:ident) => {
        pub struct $name;

        impl AlltoallAlgorithm for $name {
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

alltoall_strategy!(RingAlltoall, ring_alltoall);
alltoall_strategy!(RingBarrierAlltoall, ring_barrier_alltoall);
alltoall_strategy!(RingLightBarrierAlltoall, ring_light_barrier_alltoall);
alltoall_strategy!(PairwiseOneBarrierAlltoall, pairwise_one_barrier_alltoall);
alltoall_strategy!(RdbAlltoall, rdb_alltoall);
alltoall_strategy!(Mesh3dAlltoall, mesh3d_alltoall);
