//! In-process transport: a full mesh of tag-demultiplexed channels.
//!
//! Every ordered (source, destination) pair owns a mailbox. Frames sent
//! before the matching receiver registers its tag are buffered in the
//! mailbox and flushed once a receiver shows up, so sends never block
//! and per-(source, destination, tag) order is preserved.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use bytes::Bytes;
use futures::future::BoxFuture;
use tokio::sync::{Mutex, mpsc};

use crate::error::{ConcordError, Result};
use crate::types::Rank;

type TagReceiver = Arc<Mutex<mpsc::UnboundedReceiver<Bytes>>>;

struct TagQueue {
    tx: mpsc::UnboundedSender<Bytes>,
    rx: TagReceiver,
}

impl TagQueue {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
        }
    }
}

/// Per-(source, destination) frame store, demultiplexed by tag.
struct Mailbox {
    tags: StdMutex<HashMap<u64, TagQueue>>,
}

impl Mailbox {
    fn new() -> Self {
        Self {
            tags: StdMutex::new(HashMap::new()),
        }
    }

    fn lock_tags(&self) -> std::sync::MutexGuard<'_, HashMap<u64, TagQueue>> {
        // A panicked sender cannot leave the map in a bad state; recover.
        match self.tags.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn push(&self, tag: u64, frame: Bytes) -> Result<()> {
        let mut tags = self.lock_tags();
        let queue = tags.entry(tag).or_insert_with(TagQueue::new);
        queue
            .tx
            .send(frame)
            .map_err(|_| ConcordError::transport("local mesh receiver dropped"))
    }

    /// Per-tag receiver handle, independently lockable so concurrent
    /// tags don't block each other (the lock on `tags` is never held
    /// across an await).
    fn receiver(&self, tag: u64) -> TagReceiver {
        let mut tags = self.lock_tags();
        let queue = tags.entry(tag).or_insert_with(TagQueue::new);
        Arc::clone(&queue.rx)
    }
}

/// One rank's endpoint of an in-process full mesh.
pub struct LocalMesh {
    rank: Rank,
    size: u32,
    /// `boxes[dst][src]` holds frames in flight from `src` to `dst`.
    boxes: Arc<Vec<Vec<Mailbox>>>,
}

/// Build the endpoints of an in-process mesh, one per rank.
pub fn local_mesh(size: u32) -> Vec<LocalMesh> {
    let boxes: Arc<Vec<Vec<Mailbox>>> = Arc::new(
        (0..size)
            .map(|_| (0..size).map(|_| Mailbox::new()).collect())
            .collect(),
    );
    (0..size)
        .map(|rank| LocalMesh {
            rank,
            size,
            boxes: Arc::clone(&boxes),
        })
        .collect()
}

impl super::PointToPoint for LocalMesh {
    fn send<'a>(&'a self, dest: Rank, tag: u64, data: &'a [u8]) -> BoxFuture<'a, Result<()>> {
        let frame = Bytes::copy_from_slice(data);
        Box::pin(async move {
            if dest >= self.size {
                return Err(ConcordError::InvalidRank {
                    rank: dest,
                    size: self.size,
                });
            }
            self.boxes[dest as usize][self.rank as usize].push(tag, frame)
        })
    }

    fn recv<'a>(&'a self, src: Rank, tag: u64) -> BoxFuture<'a, Result<Bytes>> {
        Box::pin(async move {
            if src >= self.size {
                return Err(ConcordError::InvalidRank {
                    rank: src,
                    size: self.size,
                });
            }
            let rx = self.boxes[self.rank as usize][src as usize].receiver(tag);
            let mut rx = rx.lock().await;
            rx.recv()
                .await
                .ok_or(ConcordError::PeerDisconnected { rank: src })
        })
    }
}
