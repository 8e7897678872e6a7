//! Alltoallv: the variable-count exchange. One implementation: every
//! per-peer send and receive posted up front and awaited as a set.

use futures::future::{BoxFuture, try_join_all};

use crate::collective::helpers::{
    TAG_ALLTOALLV, collective_recv_exact, collective_send, phase_tag,
};
use crate::error::{ConcordError, Result};
use crate::registry::AlltoallvAlgorithm;
use crate::transport::Communicator;
use crate::types::DataType;

const OP: &str = "alltoallv";

/// Prefix offsets (in bytes) of contiguously packed per-peer blocks.
fn byte_offsets(counts: &[usize], elem: usize) -> Vec<usize> {
    let mut offs = Vec::with_capacity(counts.len());
    let mut off = 0;
    for &c in counts {
        offs.push(off);
        off += c * elem;
    }
    offs
}

/// Basic alltoallv: zero-count peers are skipped symmetrically on both
/// sides; everything else is posted concurrently.
pub(crate) async fn basic_alltoallv(
    comm: &Communicator,
    send: &[u8],
    send_counts: &[usize],
    recv: &mut [u8],
    recv_counts: &[usize],
    dtype: DataType,
) -> Result<()> {
    let size = comm.size() as usize;
    let rank = comm.rank() as usize;
    let elem = dtype.size_in_bytes();
    let tag = phase_tag(TAG_ALLTOALLV, 0);

    if send_counts.len() != size || recv_counts.len() != size {
        return Err(ConcordError::BufferSizeMismatch {
            expected: size,
            actual: send_counts.len().min(recv_counts.len()),
        });
    }
    if send_counts[rank] != recv_counts[rank] {
        return Err(ConcordError::BufferSizeMismatch {
            expected: send_counts[rank] * elem,
            actual: recv_counts[rank] * elem,
        });
    }

    let send_offs = byte_offsets(send_counts, elem);
    let recv_offs = byte_offsets(recv_counts, elem);

    // Local block moves without touching the transport.
    let own = send_counts[rank] * elem;
    recv[recv_offs[rank]..recv_offs[rank] + own]
        .copy_from_slice(&send[send_offs[rank]..send_offs[rank] + own]);

    let sends = (0..size)
        .filter(|&r| r != rank && send_counts[r] > 0)
        .map(|r| {
            let lo = send_offs[r];
            let hi = lo + send_counts[r] * elem;
            collective_send(comm, r as u32, &send[lo..hi], OP, tag)
        });

    let recvs = (0..size)
        .filter(|&r| r != rank && recv_counts[r] > 0)
        .map(|r| {
            let expected = recv_counts[r] * elem;
            let fut = collective_recv_exact(comm, r as u32, OP, tag, expected);
            async move { fut.await.map(|bytes| (r, bytes)) }
        });

    let (_, received) = tokio::try_join!(try_join_all(sends), try_join_all(recvs))?;
    for (r, bytes) in received {
        recv[recv_offs[r]..recv_offs[r] + bytes.len()].copy_from_slice(&bytes);
    }
    Ok(())
}

pub struct BasicAlltoallv;

impl AlltoallvAlgorithm for BasicAlltoallv {
    fn run<'a>(
        &'a self,
        comm: &'a Communicator,
        send: &'a [u8],
        send_counts: &'a [usize],
        recv: &'a mut [u8],
        recv_counts: &'a [usize],
        dtype: DataType,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(basic_alltoallv(
            comm,
            send,
            send_counts,
            recv,
            recv_counts,
            dtype,
        ))
    }
}
