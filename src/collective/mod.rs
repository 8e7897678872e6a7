//! The collective operation families and the dispatcher that fronts
//! them.
//!
//! [`Collectives`] is the single entry point callers use: it resolves
//! configured strategy names once at construction (failing fast on
//! unknown names) and, for kinds configured as `"automatic"`, picks a
//! strategy per call from the message size and group size.

pub(crate) mod allgather;
pub(crate) mod allreduce;
pub(crate) mod alltoall;
pub(crate) mod alltoallv;
pub(crate) mod barrier;
pub(crate) mod broadcast;
pub(crate) mod helpers;
pub(crate) mod reduce;

use std::sync::Arc;

use crate::buffer::{ByteSpan, ByteSpanMut};
use crate::config::ConcordConfig;
use crate::error::{ConcordError, Result};
use crate::registry::{
    AlgorithmTable, AllgatherAlgorithm, AllreduceAlgorithm, AlltoallAlgorithm,
    AlltoallvAlgorithm, BarrierAlgorithm, BroadcastAlgorithm, ReduceAlgorithm, Registry,
    automatic_choice,
};
use crate::transport::Communicator;
use crate::types::{CollectiveKind, Rank, ReduceOp};

/// Strategy resolution for one collective kind: pinned at startup, or
/// chosen per call by the heuristic.
enum Choice<A: ?Sized> {
    Fixed(Arc<A>),
    Automatic,
}

impl<A: ?Sized> Choice<A> {
    fn resolve(table: &AlgorithmTable<A>, name: &str) -> Result<Self> {
        if name == "automatic" {
            Ok(Choice::Automatic)
        } else {
            Ok(Choice::Fixed(table.resolve(name)?))
        }
    }

    fn pick(
        &self,
        table: &AlgorithmTable<A>,
        kind: CollectiveKind,
        bytes_per_rank: usize,
        size: u32,
        config: &ConcordConfig,
    ) -> Result<Arc<A>> {
        match self {
            Choice::Fixed(algo) => Ok(Arc::clone(algo)),
            Choice::Automatic => table.resolve(automatic_choice(
                kind,
                bytes_per_rank,
                size,
                config.thresholds_for(kind),
            )),
        }
    }
}

/// The dispatcher: one uniform entry point per collective kind.
///
/// Every rank participating in one logical collective call must be
/// driven by the same strategy selection (identical configuration and
/// thresholds); several strategies have rank-dependent control flow
/// that deadlocks under mismatched variants.
pub struct Collectives {
    registry: Registry,
    config: Arc<ConcordConfig>,
    broadcast: Choice<dyn BroadcastAlgorithm>,
    barrier: Choice<dyn BarrierAlgorithm>,
    allgather: Choice<dyn AllgatherAlgorithm>,
    allreduce: Choice<dyn AllreduceAlgorithm>,
    alltoall: Choice<dyn AlltoallAlgorithm>,
    alltoallv: Choice<dyn AlltoallvAlgorithm>,
    reduce: Choice<dyn ReduceAlgorithm>,
}

impl std::fmt::Debug for Collectives {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collectives").finish_non_exhaustive()
    }
}

impl Collectives {
    /// Built-in algorithms with the given configuration. Fails with
    /// `UnknownAlgorithm` if any configured name is not registered.
    pub fn new(config: ConcordConfig) -> Result<Self> {
        Self::with_registry(Registry::with_builtins()?, config)
    }

    /// Built-in algorithms configured from the environment.
    pub fn from_env() -> Result<Self> {
        Self::new(ConcordConfig::from_env())
    }

    /// A caller-assembled registry (for custom algorithms) with the
    /// given configuration.
    pub fn with_registry(registry: Registry, config: ConcordConfig) -> Result<Self> {
        let broadcast = Choice::resolve(&registry.broadcast, &config.broadcast)?;
        let barrier = Choice::resolve(&registry.barrier, &config.barrier)?;
        let allgather = Choice::resolve(&registry.allgather, &config.allgather)?;
        let allreduce = Choice::resolve(&registry.allreduce, &config.allreduce)?;
        let alltoall = Choice::resolve(&registry.alltoall, &config.alltoall)?;
        let alltoallv = Choice::resolve(&registry.alltoallv, &config.alltoallv)?;
        let reduce = Choice::resolve(&registry.reduce, &config.reduce)?;
        Ok(Self {
            registry,
            config: Arc::new(config),
            broadcast,
            barrier,
            allgather,
            allreduce,
            alltoall,
            alltoallv,
            reduce,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn config(&self) -> &ConcordConfig {
        &self.config
    }

    /// Broadcast `buf` from `root` to every rank.
    pub async fn broadcast(
        &self,
        comm: &Communicator,
        mut buf: ByteSpanMut<'_>,
        root: Rank,
    ) -> Result<()> {
        if root >= comm.size() {
            return Err(ConcordError::InvalidRank {
                rank: root,
                size: comm.size(),
            });
        }
        if buf.count() == 0 || comm.size() == 1 {
            return Ok(());
        }

        let count = buf.count();
        let dtype = buf.dtype();
        let mut dense = buf.to_dense_vec();
        let algo = self.broadcast.pick(
            &self.registry.broadcast,
            CollectiveKind::Broadcast,
            dense.len(),
            comm.size(),
            &self.config,
        )?;
        algo.run(comm, &mut dense, count, dtype, root).await?;
        buf.write_dense(&dense)
    }

    /// Block until every rank has entered the barrier.
    pub async fn barrier(&self, comm: &Communicator) -> Result<()> {
        if comm.size() == 1 {
            return Ok(());
        }
        let algo = self.barrier.pick(
            &self.registry.barrier,
            CollectiveKind::Barrier,
            1,
            comm.size(),
            &self.config,
        )?;
        algo.run(comm).await
    }

    /// Gather every rank's `send` block into `recv`, ordered by rank,
    /// on every rank.
    pub async fn allgather(
        &self,
        comm: &Communicator,
        send: ByteSpan<'_>,
        mut recv: ByteSpanMut<'_>,
    ) -> Result<()> {
        if send.dtype() != recv.dtype() {
            return Err(ConcordError::DatatypeMismatch {
                send: send.dtype(),
                recv: recv.dtype(),
            });
        }
        let size = comm.size() as usize;
        let elem = send.dtype().size_in_bytes();
        if recv.count() != send.count() * size {
            return Err(ConcordError::BufferSizeMismatch {
                expected: send.count() * size * elem,
                actual: recv.count() * elem,
            });
        }
        if send.count() == 0 {
            return Ok(());
        }

        let sdense = send.to_dense_vec();
        if size == 1 {
            return recv.write_dense(&sdense);
        }
        let mut rdense = vec![0u8; recv.count() * elem];
        let algo = self.allgather.pick(
            &self.registry.allgather,
            CollectiveKind::Allgather,
            sdense.len(),
            comm.size(),
            &self.config,
        )?;
        algo.run(comm, &sdense, &mut rdense, send.count(), send.dtype())
            .await?;
        recv.write_dense(&rdense)
    }

    /// Reduce every rank's `send` buffer elementwise with `op`; the
    /// result lands in `recv` on every rank.
    pub async fn allreduce(
        &self,
        comm: &Communicator,
        send: ByteSpan<'_>,
        mut recv: ByteSpanMut<'_>,
        op: ReduceOp,
    ) -> Result<()> {
        if send.dtype() != recv.dtype() {
            return Err(ConcordError::DatatypeMismatch {
                send: send.dtype(),
                recv: recv.dtype(),
            });
        }
        let elem = send.dtype().size_in_bytes();
        if recv.count() != send.count() {
            return Err(ConcordError::BufferSizeMismatch {
                expected: send.count() * elem,
                actual: recv.count() * elem,
            });
        }
        if send.count() == 0 {
            return Ok(());
        }

        let sdense = send.to_dense_vec();
        if comm.size() == 1 {
            return recv.write_dense(&sdense);
        }
        let mut rdense = vec![0u8; recv.count() * elem];
        let algo = self.allreduce.pick(
            &self.registry.allreduce,
            CollectiveKind::Allreduce,
            sdense.len(),
            comm.size(),
            &self.config,
        )?;
        algo.run(comm, &sdense, &mut rdense, send.count(), send.dtype(), op)
            .await?;
        recv.write_dense(&rdense)
    }

    /// Exchange one block per peer: `send` holds `size` equally sized
    /// blocks by destination, `recv` receives them by source.
    pub async fn alltoall(
        &self,
        comm: &Communicator,
        send: ByteSpan<'_>,
        mut recv: ByteSpanMut<'_>,
    ) -> Result<()> {
        if send.dtype() != recv.dtype() {
            return Err(ConcordError::DatatypeMismatch {
                send: send.dtype(),
                recv: recv.dtype(),
            });
        }
        let size = comm.size() as usize;
        let elem = send.dtype().size_in_bytes();
        if recv.count() != send.count() || send.count() % size != 0 {
            return Err(ConcordError::BufferSizeMismatch {
                expected: send.count() * elem,
                actual: recv.count() * elem,
            });
        }
        if send.count() == 0 {
            return Ok(());
        }

        let per_peer = send.count() / size;
        let sdense = send.to_dense_vec();
        if size == 1 {
            return recv.write_dense(&sdense);
        }
        let mut rdense = vec![0u8; recv.count() * elem];
        let algo = self.alltoall.pick(
            &self.registry.alltoall,
            CollectiveKind::Alltoall,
            per_peer * elem,
            comm.size(),
            &self.config,
        )?;
        algo.run(comm, &sdense, &mut rdense, per_peer, send.dtype())
            .await?;
        recv.write_dense(&rdense)
    }

    /// Variable-count exchange: block `r` of `send` (of
    /// `send_counts[r]` elements) goes to rank `r`; `recv` collects
    /// `recv_counts[r]` elements from each rank `r`. Blocks are packed
    /// contiguously in rank order.
    pub async fn alltoallv(
        &self,
        comm: &Communicator,
        send: ByteSpan<'_>,
        send_counts: &[usize],
        mut recv: ByteSpanMut<'_>,
        recv_counts: &[usize],
    ) -> Result<()> {
        if send.dtype() != recv.dtype() {
            return Err(ConcordError::DatatypeMismatch {
                send: send.dtype(),
                recv: recv.dtype(),
            });
        }
        let size = comm.size() as usize;
        let elem = send.dtype().size_in_bytes();
        let send_total: usize = send_counts.iter().sum();
        let recv_total: usize = recv_counts.iter().sum();
        if send.count() != send_total {
            return Err(ConcordError::BufferSizeMismatch {
                expected: send_total * elem,
                actual: send.count() * elem,
            });
        }
        if recv.count() != recv_total {
            return Err(ConcordError::BufferSizeMismatch {
                expected: recv_total * elem,
                actual: recv.count() * elem,
            });
        }

        let sdense = send.to_dense_vec();
        if size == 1 {
            return recv.write_dense(&sdense);
        }
        let mut rdense = vec![0u8; recv_total * elem];
        let algo = self.alltoallv.pick(
            &self.registry.alltoallv,
            CollectiveKind::Alltoallv,
            send_total * elem / size,
            comm.size(),
            &self.config,
        )?;
        algo.run(
            comm,
            &sdense,
            send_counts,
            &mut rdense,
            recv_counts,
            send.dtype(),
        )
        .await?;
        recv.write_dense(&rdense)
    }

    /// Reduce every rank's `send` buffer elementwise with `op` into
    /// `recv` at `root`. Non-root ranks may pass `None`.
    pub async fn reduce(
        &self,
        comm: &Communicator,
        send: ByteSpan<'_>,
        recv: Option<ByteSpanMut<'_>>,
        op: ReduceOp,
        root: Rank,
    ) -> Result<()> {
        if root >= comm.size() {
            return Err(ConcordError::InvalidRank {
                rank: root,
                size: comm.size(),
            });
        }
        let elem = send.dtype().size_in_bytes();
        let mut recv = match recv {
            Some(span) => {
                if span.dtype() != send.dtype() {
                    return Err(ConcordError::DatatypeMismatch {
                        send: send.dtype(),
                        recv: span.dtype(),
                    });
                }
                if span.count() != send.count() {
                    return Err(ConcordError::BufferSizeMismatch {
                        expected: send.count() * elem,
                        actual: span.count() * elem,
                    });
                }
                Some(span)
            }
            None if comm.rank() == root => {
                return Err(ConcordError::BufferSizeMismatch {
                    expected: send.count() * elem,
                    actual: 0,
                });
            }
            None => None,
        };
        if send.count() == 0 {
            return Ok(());
        }

        let sdense = send.to_dense_vec();
        if comm.size() == 1 {
            if let Some(span) = recv.as_mut() {
                return span.write_dense(&sdense);
            }
            return Ok(());
        }

        let mut rdense = if comm.rank() == root {
            vec![0u8; send.count() * elem]
        } else {
            Vec::new()
        };
        let algo = self.reduce.pick(
            &self.registry.reduce,
            CollectiveKind::Reduce,
            sdense.len(),
            comm.size(),
            &self.config,
        )?;
        algo.run(
            comm,
            &sdense,
            &mut rdense,
            send.count(),
            send.dtype(),
            op,
            root,
        )
        .await?;
        if comm.rank() == root {
            if let Some(span) = recv.as_mut() {
                span.write_dense(&rdense)?;
            }
        }
        Ok(())
    }
}
