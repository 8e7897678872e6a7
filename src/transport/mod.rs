//! The point-to-point seam the collective algorithms run on.
//!
//! Algorithms only ever issue tagged sends and receives against a
//! [`PointToPoint`] implementation; everything below that trait (wire
//! format, connection management, the network itself) is someone else's
//! problem. The crate ships [`LocalMesh`], an in-process mesh used by
//! `Communicator::local_group` and the test suite.

mod local;

pub use local::{LocalMesh, local_mesh};

use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;

use crate::config::ConcordConfig;
use crate::error::{ConcordError, Result};
use crate::types::Rank;

/// Tagged point-to-point message transport between the ranks of one
/// group.
///
/// Implementations must deliver messages between a fixed (source,
/// destination, tag) triple in the order they were sent; no ordering is
/// assumed across distinct tags or peer pairs. Sends are buffered: a
/// send may complete before the matching receive is posted.
pub trait PointToPoint: Send + Sync {
    /// Send `data` to `dest` under `tag`.
    fn send<'a>(&'a self, dest: Rank, tag: u64, data: &'a [u8]) -> BoxFuture<'a, Result<()>>;

    /// Receive the next message from `src` under `tag`.
    fn recv<'a>(&'a self, src: Rank, tag: u64) -> BoxFuture<'a, Result<Bytes>>;
}

/// One rank's view of a fixed-size group.
///
/// Immutable for the duration of any collective call; cheap to clone.
#[derive(Clone)]
pub struct Communicator {
    rank: Rank,
    size: u32,
    link: Arc<dyn PointToPoint>,
    config: Arc<ConcordConfig>,
}

impl Communicator {
    /// Wrap a transport endpoint with the default configuration.
    pub fn new(rank: Rank, size: u32, link: Arc<dyn PointToPoint>) -> Result<Self> {
        Self::with_config(rank, size, link, Arc::new(ConcordConfig::default()))
    }

    /// Wrap a transport endpoint with an explicit configuration.
    pub fn with_config(
        rank: Rank,
        size: u32,
        link: Arc<dyn PointToPoint>,
        config: Arc<ConcordConfig>,
    ) -> Result<Self> {
        if size == 0 || rank >= size {
            return Err(ConcordError::InvalidRank { rank, size });
        }
        Ok(Self {
            rank,
            size,
            link,
            config,
        })
    }

    /// Build an in-process group of `size` communicators over a
    /// [`LocalMesh`], one per rank.
    pub fn local_group(size: u32) -> Vec<Communicator> {
        Self::local_group_with_config(size, ConcordConfig::default())
    }

    /// Same as [`Communicator::local_group`] with an explicit config.
    pub fn local_group_with_config(size: u32, config: ConcordConfig) -> Vec<Communicator> {
        let config = Arc::new(config);
        local_mesh(size)
            .into_iter()
            .enumerate()
            .map(|(rank, mesh)| Self {
                rank: rank as Rank,
                size,
                link: Arc::new(mesh),
                config: Arc::clone(&config),
            })
            .collect()
    }

    pub fn rank(&self) -> Rank {
        self.rank
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn config(&self) -> &ConcordConfig {
        &self.config
    }

    /// Send `data` to `dest` under `tag`.
    pub async fn send(&self, dest: Rank, tag: u64, data: &[u8]) -> Result<()> {
        if dest >= self.size {
            return Err(ConcordError::InvalidRank {
                rank: dest,
                size: self.size,
            });
        }
        self.link.send(dest, tag, data).await
    }

    /// Receive the next message from `src` under `tag`.
    pub async fn recv(&self, src: Rank, tag: u64) -> Result<Bytes> {
        if src >= self.size {
            return Err(ConcordError::InvalidRank {
                rank: src,
                size: self.size,
            });
        }
        self.link.recv(src, tag).await
    }

    /// Concurrently send to `dest` and receive from `src` under the same
    /// tag, returning the received bytes.
    pub async fn sendrecv(&self, dest: Rank, data: &[u8], src: Rank, tag: u64) -> Result<Bytes> {
        let (_, received) = tokio::try_join!(self.send(dest, tag, data), self.recv(src, tag))?;
        Ok(received)
    }

    /// Receive the next message under `tag` from whichever of `srcs`
    /// delivers first.
    pub(crate) async fn recv_any(&self, srcs: &[Rank], tag: u64) -> Result<(Rank, Bytes)> {
        if srcs.is_empty() {
            return Err(ConcordError::transport("recv_any over an empty source set"));
        }
        let futs: Vec<BoxFuture<'_, Result<(Rank, Bytes)>>> = srcs
            .iter()
            .map(|&src| {
                let fut = self.recv(src, tag);
                Box::pin(async move { fut.await.map(|bytes| (src, bytes)) })
                    as BoxFuture<'_, Result<(Rank, Bytes)>>
            })
            .collect();
        // Unconsumed messages from the dropped futures stay queued in
        // their per-tag channels.
        let (resolved, _, _) = futures::future::select_all(futs).await;
        resolved
    }
}

impl std::fmt::Debug for Communicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Communicator")
            .field("rank", &self.rank)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}
