//! Arity-k spanning trees over a ranked group, plus the generic tree
//! broadcast / anti-broadcast primitives built on them.
//!
//! Trees are ephemeral: built fresh per call from (root, rank, size,
//! arity) by pure index arithmetic, never shared or cached.

use crate::error::{ConcordError, Result};
use crate::reduce::reduce_slice;
use crate::transport::Communicator;
use crate::types::{DataType, Rank, ReduceOp};
use futures::future::try_join_all;

/// One rank's position in an arity-k spanning tree rooted at `root`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcTree {
    pub arity: u32,
    pub root: Rank,
    pub rank: Rank,
    /// This rank's index in root-relative numbering.
    pub index: u32,
    pub parent: Option<Rank>,
    pub children: Vec<Rank>,
    pub size: u32,
}

impl ProcTree {
    /// Build the tree node for `rank` in a group of `size` ranks.
    ///
    /// Rank `r` sits at index `(r - root + size) mod size`; the children
    /// of index `i` are the indices `i*arity + 1 ..= i*arity + arity`
    /// that fall inside the group, and its parent is index
    /// `(i - 1) / arity`.
    pub fn build(root: Rank, rank: Rank, size: u32, arity: u32) -> Result<Self> {
        if arity < 1 {
            return Err(ConcordError::InvalidTree {
                root,
                size,
                arity,
                reason: "arity must be at least 1",
            });
        }
        if size == 0 {
            return Err(ConcordError::InvalidTree {
                root,
                size,
                arity,
                reason: "empty group",
            });
        }
        if rank >= size || root >= size {
            return Err(ConcordError::InvalidTree {
                root,
                size,
                arity,
                reason: "rank outside the group",
            });
        }

        let index = ((rank as u64 + size as u64 - root as u64) % size as u64) as u32;
        let parent = if index == 0 {
            None
        } else {
            Some(((((index - 1) / arity) as u64 + root as u64) % size as u64) as u32)
        };

        let first = index as u64 * arity as u64 + 1;
        let children = (first..first + arity as u64)
            .filter(|&c| c < size as u64)
            .map(|c| ((c + root as u64) % size as u64) as u32)
            .collect();

        Ok(Self {
            arity,
            root,
            rank,
            index,
            parent,
            children,
            size,
        })
    }

    pub fn is_root(&self) -> bool {
        self.index == 0
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Broadcast `buf` down this tree.
    pub async fn broadcast(
        &self,
        comm: &Communicator,
        buf: &mut [u8],
        operation: &'static str,
        tag: u64,
    ) -> Result<()> {
        tree_broadcast(comm, self.parent, &self.children, buf, operation, tag).await
    }

    /// Collect `buf` up this tree, optionally reducing on each inbound
    /// edge.
    pub async fn anti_broadcast(
        &self,
        comm: &Communicator,
        buf: &mut [u8],
        reduce: Option<(DataType, ReduceOp, usize)>,
        operation: &'static str,
        tag: u64,
    ) -> Result<()> {
        tree_anti_broadcast(comm, self.parent, &self.children, buf, reduce, operation, tag).await
    }
}

/// Generic downward tree traversal: receive `buf` from `parent` (if
/// any), then post one send per child and await the whole set.
///
/// The (parent, children) arcs may come from a [`ProcTree`] or from any
/// other spanning structure (the SMP hierarchies map group-index trees
/// onto leader ranks).
pub async fn tree_broadcast(
    comm: &Communicator,
    parent: Option<Rank>,
    children: &[Rank],
    buf: &mut [u8],
    operation: &'static str,
    tag: u64,
) -> Result<()> {
    if let Some(parent) = parent {
        let received = comm
            .recv(parent, tag)
            .await
            .map_err(|e| ConcordError::collective(operation, parent, e))?;
        if received.len() != buf.len() {
            return Err(ConcordError::BufferSizeMismatch {
                expected: buf.len(),
                actual: received.len(),
            });
        }
        buf.copy_from_slice(&received);
    }

    if !children.is_empty() {
        let payload: &[u8] = buf;
        let sends = children.iter().map(|&child| async move {
            comm.send(child, tag, payload)
                .await
                .map_err(|e| ConcordError::collective(operation, child, e))
        });
        try_join_all(sends).await?;
    }

    Ok(())
}

/// Inverse traversal: receive from each child in order, then send the
/// accumulated `buf` to `parent` (if any).
///
/// With `reduce` set, each child's payload is folded into `buf` through
/// the reduction engine; with `None` the payloads are drained and
/// discarded (the one-byte-token barrier case).
pub async fn tree_anti_broadcast(
    comm: &Communicator,
    parent: Option<Rank>,
    children: &[Rank],
    buf: &mut [u8],
    reduce: Option<(DataType, ReduceOp, usize)>,
    operation: &'static str,
    tag: u64,
) -> Result<()> {
    for &child in children {
        let received = comm
            .recv(child, tag)
            .await
            .map_err(|e| ConcordError::collective(operation, child, e))?;
        if let Some((dtype, op, count)) = reduce {
            if received.len() != buf.len() {
                return Err(ConcordError::BufferSizeMismatch {
                    expected: buf.len(),
                    actual: received.len(),
                });
            }
            reduce_slice(buf, &received, count, dtype, op)?;
        }
    }

    if let Some(parent) = parent {
        comm.send(parent, tag, buf)
            .await
            .map_err(|e| ConcordError::collective(operation, parent, e))?;
    }

    Ok(())
}
