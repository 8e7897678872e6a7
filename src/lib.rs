//! concord: interchangeable collective communication algorithms for a
//! fixed-size group of cooperating processes, with runtime strategy
//! selection.
//!
//! Every collective kind (broadcast, barrier, allgather, allreduce,
//! alltoall, alltoallv, reduce) has a table of named algorithms; callers
//! go through the [`Collectives`] dispatcher, which resolves a concrete
//! strategy by configured name or by an automatic heuristic over message
//! size and group size. The algorithms themselves ride on the
//! [`PointToPoint`] transport seam and never touch the network directly.

pub mod buffer;
pub mod config;
pub mod error;
pub mod reduce;
pub mod registry;
pub mod transport;
pub mod tree;
pub mod types;

mod collective;

pub use buffer::{ByteSpan, ByteSpanMut};
pub use collective::Collectives;
pub use config::{AutoThresholds, ConcordConfig};
pub use error::{ConcordError, Result};
pub use registry::{AlgorithmDescriptor, AlgorithmTable, Registry};
pub use transport::{Communicator, LocalMesh, PointToPoint, local_mesh};
pub use tree::ProcTree;
pub use types::{CollectiveKind, DataType, Element, Rank, ReduceOp, bytes_of, bytes_of_mut};
