//! Channel-served actors owning the segment store and the meta-index.
//!
//! Each actor runs on its own thread and processes messages sequentially;
//! replies travel on a per-request channel, so no actor ever holds a
//! reference back to its caller.

use crossbeam::channel::{bounded, unbounded, Receiver, Sender};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::warn;
use uuid::Uuid;

use crate::core::error::{Error, ErrorKind, Result};
use crate::core::ids::IdSet;
use crate::data::slice::TableSlice;
use crate::expr::ast::Expression;
use crate::index::MetaIndex;
use crate::storage::segment::Segment;
use crate::storage::store::{SealedPartition, SegmentStore};
use crate::synopsis::PartitionSynopsis;

fn actor_gone<T>(_: T) -> Error {
    Error::new(ErrorKind::Internal, "actor terminated")
}

// -- segment store actor ------------------------------------------------------

pub enum StoreRequest {
    Put {
        slice: TableSlice,
        reply: Sender<Result<Option<SealedPartition>>>,
    },
    Get {
        ids: IdSet,
        reply: Sender<Result<Vec<TableSlice>>>,
    },
    Load {
        id: Uuid,
        reply: Sender<Result<Arc<Segment>>>,
    },
    Erase {
        ids: IdSet,
        reply: Sender<Result<Vec<Uuid>>>,
    },
    Flush {
        reply: Sender<Result<Option<SealedPartition>>>,
    },
    Status {
        reply: Sender<StoreStatus>,
    },
    Shutdown {
        reply: Sender<()>,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreStatus {
    pub segments: usize,
    pub events: u64,
    pub cached_segments: usize,
    pub dirty: bool,
}

#[derive(Clone)]
pub struct StoreHandle {
    sender: Sender<StoreRequest>,
}

impl StoreHandle {
    pub fn put(&self, slice: TableSlice) -> Result<Option<SealedPartition>> {
        let (reply, rx) = bounded(1);
        self.sender
            .send(StoreRequest::Put { slice, reply })
            .map_err(actor_gone)?;
        rx.recv().map_err(actor_gone)?
    }

    pub fn get(&self, ids: IdSet) -> Result<Vec<TableSlice>> {
        let (reply, rx) = bounded(1);
        self.sender
            .send(StoreRequest::Get { ids, reply })
            .map_err(actor_gone)?;
        rx.recv().map_err(actor_gone)?
    }

    /// Queues a segment load and returns the reply channel without waiting,
    /// so callers can keep several loads in flight.
    pub fn load_async(&self, id: Uuid) -> Result<Receiver<Result<Arc<Segment>>>> {
        let (reply, rx) = bounded(1);
        self.sender
            .send(StoreRequest::Load { id, reply })
            .map_err(actor_gone)?;
        Ok(rx)
    }

    pub fn erase(&self, ids: IdSet) -> Result<Vec<Uuid>> {
        let (reply, rx) = bounded(1);
        self.sender
            .send(StoreRequest::Erase { ids, reply })
            .map_err(actor_gone)?;
        rx.recv().map_err(actor_gone)?
    }

    pub fn flush(&self) -> Result<Option<SealedPartition>> {
        let (reply, rx) = bounded(1);
        self.sender
            .send(StoreRequest::Flush { reply })
            .map_err(actor_gone)?;
        rx.recv().map_err(actor_gone)?
    }

    pub fn status(&self) -> Result<StoreStatus> {
        let (reply, rx) = bounded(1);
        self.sender
            .send(StoreRequest::Status { reply })
            .map_err(actor_gone)?;
        rx.recv().map_err(actor_gone)
    }

    pub fn shutdown(&self) -> Result<Receiver<()>> {
        let (reply, rx) = bounded(1);
        self.sender
            .send(StoreRequest::Shutdown { reply })
            .map_err(actor_gone)?;
        Ok(rx)
    }
}

pub fn spawn_store(mut store: SegmentStore) -> (StoreHandle, JoinHandle<()>) {
    let (sender, receiver): (Sender<StoreRequest>, Receiver<StoreRequest>) = unbounded();
    let thread = thread::spawn(move || {
        while let Ok(request) = receiver.recv() {
            match request {
                StoreRequest::Put { slice, reply } => {
                    let _ = reply.send(store.put(slice));
                }
                StoreRequest::Get { ids, reply } => {
                    let _ = reply.send(store.get(&ids));
                }
                StoreRequest::Load { id, reply } => {
                    let _ = reply.send(store.load_segment(&id));
                }
                StoreRequest::Erase { ids, reply } => {
                    let _ = reply.send(store.erase(&ids));
                }
                StoreRequest::Flush { reply } => {
                    let _ = reply.send(store.flush());
                }
                StoreRequest::Status { reply } => {
                    let _ = reply.send(StoreStatus {
                        segments: store.num_segments(),
                        events: store.num_events(),
                        cached_segments: store.cached_segments().len(),
                        dirty: store.dirty(),
                    });
                }
                StoreRequest::Shutdown { reply } => {
                    if let Err(err) = store.flush() {
                        warn!(%err, "failed to flush segment store at shutdown");
                    }
                    let _ = reply.send(());
                    break;
                }
            }
        }
    });
    (StoreHandle { sender }, thread)
}

// -- meta-index actor ---------------------------------------------------------

pub enum MetaRequest {
    Insert {
        partition: Uuid,
        synopsis: Box<PartitionSynopsis>,
        reply: Sender<Result<()>>,
    },
    Erase {
        partition: Uuid,
        reply: Sender<Result<()>>,
    },
    Lookup {
        expr: Expression,
        reply: Sender<Vec<Uuid>>,
    },
    Status {
        reply: Sender<MetaStatus>,
    },
    Shutdown {
        reply: Sender<()>,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct MetaStatus {
    pub partitions: usize,
    pub memusage: usize,
}

#[derive(Clone)]
pub struct MetaHandle {
    sender: Sender<MetaRequest>,
}

impl MetaHandle {
    pub fn insert(&self, partition: Uuid, synopsis: PartitionSynopsis) -> Result<()> {
        let (reply, rx) = bounded(1);
        self.sender
            .send(MetaRequest::Insert {
                partition,
                synopsis: Box::new(synopsis),
                reply,
            })
            .map_err(actor_gone)?;
        rx.recv().map_err(actor_gone)?
    }

    pub fn erase(&self, partition: Uuid) -> Result<()> {
        let (reply, rx) = bounded(1);
        self.sender
            .send(MetaRequest::Erase { partition, reply })
            .map_err(actor_gone)?;
        rx.recv().map_err(actor_gone)?
    }

    pub fn lookup(&self, expr: Expression) -> Result<Vec<Uuid>> {
        let (reply, rx) = bounded(1);
        self.sender
            .send(MetaRequest::Lookup { expr, reply })
            .map_err(actor_gone)?;
        rx.recv().map_err(actor_gone)
    }

    pub fn status(&self) -> Result<MetaStatus> {
        let (reply, rx) = bounded(1);
        self.sender
            .send(MetaRequest::Status { reply })
            .map_err(actor_gone)?;
        rx.recv().map_err(actor_gone)
    }

    pub fn shutdown(&self) -> Result<Receiver<()>> {
        let (reply, rx) = bounded(1);
        self.sender
            .send(MetaRequest::Shutdown { reply })
            .map_err(actor_gone)?;
        Ok(rx)
    }
}

/// Spawns the meta-index actor. `dir` is where partition synopses persist;
/// inserts and erases keep the directory in sync with memory.
pub fn spawn_meta(mut index: MetaIndex, dir: PathBuf) -> (MetaHandle, JoinHandle<()>) {
    let (sender, receiver): (Sender<MetaRequest>, Receiver<MetaRequest>) = unbounded();
    let thread = thread::spawn(move || {
        while let Ok(request) = receiver.recv() {
            match request {
                MetaRequest::Insert {
                    partition,
                    synopsis,
                    reply,
                } => {
                    index.insert(partition, *synopsis);
                    let _ = reply.send(index.persist_partition(&dir, &partition));
                }
                MetaRequest::Erase { partition, reply } => {
                    index.erase(&partition);
                    let _ = reply.send(MetaIndex::remove_partition_file(&dir, &partition));
                }
                MetaRequest::Lookup { expr, reply } => {
                    let _ = reply.send(index.lookup(&expr));
                }
                MetaRequest::Status { reply } => {
                    let _ = reply.send(MetaStatus {
                        partitions: index.len(),
                        memusage: index.memusage(),
                    });
                }
                MetaRequest::Shutdown { reply } => {
                    let _ = reply.send(());
                    break;
                }
            }
        }
    });
    (MetaHandle { sender }, thread)
}
