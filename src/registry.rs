//! Named algorithm tables, one per collective kind.
//!
//! Every algorithm is a unit struct implementing the kind's strategy
//! trait, registered once at startup under a stable name. Lookups are
//! read-only; the `"automatic"` pseudo-name is resolved by the
//! dispatcher per call through [`automatic_choice`].

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::config::AutoThresholds;
use crate::error::{ConcordError, Result};
use crate::transport::Communicator;
use crate::types::{CollectiveKind, DataType, Rank, ReduceOp};

/// A broadcast strategy. `buf` holds the payload at `root` on entry and
/// on every rank on exit.
pub trait BroadcastAlgorithm: Send + Sync {
    fn run<'a>(
        &'a self,
        comm: &'a Communicator,
        buf: &'a mut [u8],
        count: usize,
        dtype: DataType,
        root: Rank,
    ) -> BoxFuture<'a, Result<()>>;
}

/// A barrier strategy.
pub trait BarrierAlgorithm: Send + Sync {
    fn run<'a>(&'a self, comm: &'a Communicator) -> BoxFuture<'a, Result<()>>;
}

/// An allgather strategy. Each rank contributes `count` elements in
/// `send`; `recv` receives all contributions in rank order.
pub trait AllgatherAlgorithm: Send + Sync {
    fn run<'a>(
        &'a self,
        comm: &'a Communicator,
        send: &'a [u8],
        recv: &'a mut [u8],
        count: usize,
        dtype: DataType,
    ) -> BoxFuture<'a, Result<()>>;
}

/// An allreduce strategy. `recv` holds the elementwise reduction of all
/// ranks' `send` buffers on exit, on every rank.
pub trait AllreduceAlgorithm: Send + Sync {
    fn run<'a>(
        &'a self,
        comm: &'a Communicator,
        send: &'a [u8],
        recv: &'a mut [u8],
        count: usize,
        dtype: DataType,
        op: ReduceOp,
    ) -> BoxFuture<'a, Result<()>>;
}

impl std::fmt::Debug for dyn AllreduceAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn AllreduceAlgorithm")
    }
}

/// An alltoall strategy. `send` holds one `count`-element block per
/// destination rank; `recv` receives one block per source rank.
pub trait AlltoallAlgorithm: Send + Sync {
    fn run<'a>(
        &'a self,
        comm: &'a Communicator,
        send: &'a [u8],
        recv: &'a mut [u8],
        count: usize,
        dtype: DataType,
    ) -> BoxFuture<'a, Result<()>>;
}

/// An alltoallv strategy: like alltoall with per-peer element counts.
/// Blocks are packed contiguously in rank order on both sides.
pub trait AlltoallvAlgorithm: Send + Sync {
    fn run<'a>(
        &'a self,
        comm: &'a Communicator,
        send: &'a [u8],
        send_counts: &'a [usize],
        recv: &'a mut [u8],
        recv_counts: &'a [usize],
        dtype: DataType,
    ) -> BoxFuture<'a, Result<()>>;
}

/// A reduce strategy. The reduction of all ranks' `send` buffers lands
/// in `recv` at `root` only; other ranks may pass an empty `recv`.
pub trait ReduceAlgorithm: Send + Sync {
    fn run<'a>(
        &'a self,
        comm: &'a Communicator,
        send: &'a [u8],
        recv: &'a mut [u8],
        count: usize,
        dtype: DataType,
        op: ReduceOp,
        root: Rank,
    ) -> BoxFuture<'a, Result<()>>;
}

/// A named algorithm registered in a kind's table.
pub struct AlgorithmDescriptor<A: ?Sized> {
    pub name: &'static str,
    pub description: &'static str,
    pub algo: Arc<A>,
}

/// Registration-ordered table of algorithms for one collective kind.
pub struct AlgorithmTable<A: ?Sized> {
    kind: CollectiveKind,
    order: Vec<&'static str>,
    entries: HashMap<&'static str, AlgorithmDescriptor<A>>,
}

impl<A: ?Sized> AlgorithmTable<A> {
    pub fn new(kind: CollectiveKind) -> Self {
        Self {
            kind,
            order: Vec::new(),
            entries: HashMap::new(),
        }
    }

    pub fn kind(&self) -> CollectiveKind {
        self.kind
    }

    /// Add a named algorithm; fails on a name collision.
    pub fn register(
        &mut self,
        name: &'static str,
        description: &'static str,
        algo: Arc<A>,
    ) -> Result<()> {
        if self.entries.contains_key(name) {
            return Err(ConcordError::DuplicateAlgorithm {
                kind: self.kind,
                name,
            });
        }
        self.order.push(name);
        self.entries.insert(
            name,
            AlgorithmDescriptor {
                name,
                description,
                algo,
            },
        );
        Ok(())
    }

    /// Look up an algorithm by name, listing the valid names on failure.
    pub fn resolve(&self, name: &str) -> Result<Arc<A>> {
        match self.entries.get(name) {
            Some(desc) => Ok(Arc::clone(&desc.algo)),
            None => Err(ConcordError::UnknownAlgorithm {
                kind: self.kind,
                name: name.to_string(),
                known: self.order.join(", "),
            }),
        }
    }

    /// Registered names, in registration order.
    pub fn names(&self) -> &[&'static str] {
        &self.order
    }

    /// Registered descriptors, in registration order.
    pub fn descriptors(&self) -> impl Iterator<Item = &AlgorithmDescriptor<A>> {
        self.order.iter().map(|name| &self.entries[name])
    }
}

/// The per-kind algorithm tables, populated once at startup.
pub struct Registry {
    pub broadcast: AlgorithmTable<dyn BroadcastAlgorithm>,
    pub barrier: AlgorithmTable<dyn BarrierAlgorithm>,
    pub allgather: AlgorithmTable<dyn AllgatherAlgorithm>,
    pub allreduce: AlgorithmTable<dyn AllreduceAlgorithm>,
    pub alltoall: AlgorithmTable<dyn AlltoallAlgorithm>,
    pub alltoallv: AlgorithmTable<dyn AlltoallvAlgorithm>,
    pub reduce: AlgorithmTable<dyn ReduceAlgorithm>,
}

impl Registry {
    /// Empty tables, for callers that bring their own algorithms.
    pub fn empty() -> Self {
        Self {
            broadcast: AlgorithmTable::new(CollectiveKind::Broadcast),
            barrier: AlgorithmTable::new(CollectiveKind::Barrier),
            allgather: AlgorithmTable::new(CollectiveKind::Allgather),
            allreduce: AlgorithmTable::new(CollectiveKind::Allreduce),
            alltoall: AlgorithmTable::new(CollectiveKind::Alltoall),
            alltoallv: AlgorithmTable::new(CollectiveKind::Alltoallv),
            reduce: AlgorithmTable::new(CollectiveKind::Reduce),
        }
    }

    /// Tables pre-populated with every built-in algorithm.
    pub fn with_builtins() -> Result<Self> {
        use crate::collective::{allgather, allreduce, alltoall, alltoallv, barrier, broadcast, reduce};

        let mut r = Self::empty();

        r.broadcast.register(
            "flat",
            "root sends directly to every other rank",
            Arc::new(broadcast::FlatBcast),
        )?;
        r.broadcast.register(
            "flat-pipelined",
            "flat sends split into pipeline segments that overlap in flight",
            Arc::new(broadcast::FlatPipelinedBcast),
        )?;
        r.broadcast.register(
            "binomial",
            "binomial spanning tree of logarithmic depth",
            Arc::new(broadcast::BinomialBcast),
        )?;
        r.broadcast.register(
            "arrival-pattern-aware",
            "serves consumers in the order their ready signals arrive",
            Arc::new(broadcast::ArrivalPatternAwareBcast),
        )?;
        r.broadcast.register(
            "scatter-rdb-allgather",
            "binomial scatter followed by a recursive-doubling allgather",
            Arc::new(broadcast::ScatterRdbAllgatherBcast),
        )?;
        r.broadcast.register(
            "smp-binomial",
            "binomial exchange among group leaders, then local flood",
            Arc::new(broadcast::SmpBinomialBcast),
        )?;

        r.barrier.register(
            "flat",
            "collect-then-release through rank 0",
            Arc::new(barrier::FlatBarrier),
        )?;
        r.barrier.register(
            "nary-tree",
            "one-byte token collected and rebroadcast over an n-ary tree",
            Arc::new(barrier::NaryTreeBarrier),
        )?;
        r.barrier.register(
            "dissemination",
            "log-round symmetric token exchange, no coordinator",
            Arc::new(barrier::DisseminationBarrier),
        )?;

        r.allgather.register(
            "ring",
            "N-1 forwarding rounds around a ring",
            Arc::new(allgather::RingAllgather),
        )?;
        r.allgather.register(
            "smp-simple",
            "intra-group rotation, leader exchange, local flood",
            Arc::new(allgather::SmpSimpleAllgather),
        )?;

        r.allreduce.register(
            "ring",
            "scatter-reduce and allgather rings, bandwidth-optimal",
            Arc::new(allreduce::RingAllreduce),
        )?;
        r.allreduce.register(
            "rab",
            "recursive halving reduce-scatter plus doubling allgather",
            Arc::new(allreduce::RabAllreduce),
        )?;
        r.allreduce.register(
            "smp-binomial",
            "binomial reduce and broadcast phases inside and across groups",
            Arc::new(allreduce::SmpBinomialAllreduce),
        )?;

        r.alltoall.register(
            "ring",
            "N-1 shifted exchange steps around a ring",
            Arc::new(alltoall::RingAlltoall),
        )?;
        r.alltoall.register(
            "ring-barrier",
            "ring exchange with a full barrier between steps",
            Arc::new(alltoall::RingBarrierAlltoall),
        )?;
        r.alltoall.register(
            "ring-light-barrier",
            "ring exchange with a one-byte handshake before each step",
            Arc::new(alltoall::RingLightBarrierAlltoall),
        )?;
        r.alltoall.register(
            "pairwise-one-barrier",
            "XOR partner exchange, one barrier before the loop",
            Arc::new(alltoall::PairwiseOneBarrierAlltoall),
        )?;
        r.alltoall.register(
            "rdb",
            "recursive doubling over whole blocks with a donation fix-up",
            Arc::new(alltoall::RdbAlltoall),
        )?;
        r.alltoall.register(
            "3dmesh",
            "three axis-local gather passes over an x*x*z mesh",
            Arc::new(alltoall::Mesh3dAlltoall),
        )?;

        r.alltoallv.register(
            "basic",
            "all per-peer sends and receives posted and awaited as a set",
            Arc::new(alltoallv::BasicAlltoallv),
        )?;

        r.reduce.register(
            "flat",
            "root folds every contribution in rank order",
            Arc::new(reduce::FlatReduce),
        )?;
        r.reduce.register(
            "binomial",
            "binomial tree reduction toward the root",
            Arc::new(reduce::BinomialReduce),
        )?;

        Ok(r)
    }
}

/// Heuristic strategy choice for `"automatic"` selection.
///
/// `bytes_per_rank` is the message size per participant. Thresholds come
/// from the configuration; the returned name is always registered and
/// always valid for the given group size.
pub(crate) fn automatic_choice(
    kind: CollectiveKind,
    bytes_per_rank: usize,
    size: u32,
    t: AutoThresholds,
) -> &'static str {
    let small_msg = bytes_per_rank <= t.small_msg_bytes;
    let large_msg = bytes_per_rank >= t.large_msg_bytes;
    let small_world = size < t.small_world;

    let choice = match kind {
        CollectiveKind::Broadcast => {
            if small_msg || small_world {
                "binomial"
            } else if size.is_power_of_two() && !large_msg {
                "scatter-rdb-allgather"
            } else {
                "flat-pipelined"
            }
        }
        CollectiveKind::Barrier => {
            if small_world {
                "flat"
            } else {
                "dissemination"
            }
        }
        CollectiveKind::Allgather => {
            if small_msg && !small_world {
                "smp-simple"
            } else {
                "ring"
            }
        }
        CollectiveKind::Allreduce => {
            if large_msg || small_world {
                "ring"
            } else {
                "rab"
            }
        }
        CollectiveKind::Alltoall => {
            if large_msg {
                "ring-light-barrier"
            } else if small_msg && !small_world {
                "rdb"
            } else {
                "ring"
            }
        }
        CollectiveKind::Alltoallv => "basic",
        CollectiveKind::Reduce => {
            if small_world {
                "flat"
            } else {
                "binomial"
            }
        }
    };

    tracing::debug!(
        kind = kind.name(),
        bytes_per_rank,
        size,
        choice,
        "automatic strategy selection"
    );
    choice
}
