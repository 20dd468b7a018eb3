use crossbeam::channel::Receiver;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::core::config::Config;
use crate::core::error::Result;
use crate::core::ids::{IdRange, IdSet};
use crate::data::slice::TableSlice;
use crate::engine::actors::{MetaHandle, StoreHandle};
use crate::expr::ast::Expression;
use crate::expr::eval::evaluate;
use crate::query::client::QuerySink;
use crate::storage::segment::Segment;

#[derive(Debug, Clone, Copy)]
pub struct PipelineConfig {
    /// Size of the first evaluation wave.
    pub max_taste_partitions: usize,
    /// Cap on concurrently in-memory shards per query.
    pub max_resident_partitions: usize,
    /// Concurrency cap on active queries.
    pub max_queries: usize,
}

impl From<&Config> for PipelineConfig {
    fn from(config: &Config) -> Self {
        PipelineConfig {
            max_taste_partitions: config.max_taste_partitions,
            max_resident_partitions: config.max_resident_partitions,
            max_queries: config.max_queries,
        }
    }
}

/// FIFO admission: at most `max_queries` queries hold a slot at once. A slot
/// is held from submission until the meta-index phase completes, so queued
/// queries start as soon as a running one gets past candidate selection.
struct Admission {
    state: Mutex<AdmissionState>,
    turn: Condvar,
}

#[derive(Default)]
struct AdmissionState {
    active: usize,
    queue: VecDeque<u64>,
    next_ticket: u64,
}

impl Admission {
    fn new() -> Self {
        Admission {
            state: Mutex::new(AdmissionState::default()),
            turn: Condvar::new(),
        }
    }

    fn acquire(&self, max: usize) {
        let mut state = self.state.lock();
        let ticket = state.next_ticket;
        state.next_ticket += 1;
        state.queue.push_back(ticket);
        while state.queue.front() != Some(&ticket) || state.active >= max {
            self.turn.wait(&mut state);
        }
        state.queue.pop_front();
        state.active += 1;
        self.turn.notify_all();
    }

    fn release(&self) {
        let mut state = self.state.lock();
        state.active -= 1;
        self.turn.notify_all();
    }
}

/// The staged evaluation strategy: candidate selection against the
/// meta-index, a small "taste" wave of shard materializations for early
/// results, then steady progress through the remaining candidates in UUID
/// order, bounded by the resident cap.
pub struct QueryPipeline {
    store: StoreHandle,
    meta: MetaHandle,
    config: PipelineConfig,
    admission: Arc<Admission>,
}

impl QueryPipeline {
    pub fn new(store: StoreHandle, meta: MetaHandle, config: PipelineConfig) -> Self {
        QueryPipeline {
            store,
            meta,
            config,
            admission: Arc::new(Admission::new()),
        }
    }

    /// Runs a query on its own worker thread, streaming matches into
    /// `sink`. The expression must already be resolved and normalized.
    pub fn submit(&self, expr: Expression, sink: QuerySink) {
        let store = self.store.clone();
        let meta = self.meta.clone();
        let config = self.config;
        let admission = self.admission.clone();
        thread::spawn(move || {
            admission.acquire(config.max_queries);
            let candidates = match meta.lookup(expr.clone()) {
                Ok(candidates) => candidates,
                Err(err) => {
                    admission.release();
                    sink.finish(Some(err));
                    return;
                }
            };
            admission.release();
            debug!(candidates = candidates.len(), "query enters evaluation");
            if let Err(err) = run_stages(&store, &config, &expr, candidates, &sink) {
                sink.finish(Some(err));
            }
        });
    }
}

fn run_stages(
    store: &StoreHandle,
    config: &PipelineConfig,
    expr: &Expression,
    candidates: Vec<Uuid>,
    sink: &QuerySink,
) -> Result<()> {
    type PendingLoad = (Uuid, Receiver<Result<Arc<Segment>>>);
    let taste = candidates.len().min(config.max_taste_partitions);
    let mut window = taste.max(1);
    let mut pending: VecDeque<PendingLoad> = VecDeque::new();
    let mut next = 0;
    let mut processed = 0;
    loop {
        // Keep up to `window` shards in flight; stop issuing once cancelled.
        while next < candidates.len() && pending.len() < window && !sink.cancelled() {
            let id = candidates[next];
            pending.push_back((id, store.load_async(id)?));
            next += 1;
        }
        let (id, rx) = match pending.pop_front() {
            Some(load) => load,
            None => break,
        };
        let segment = match rx.recv() {
            Ok(Ok(segment)) => segment,
            Ok(Err(err)) => {
                // A failed materialization aborts the query; loads already
                // in flight are awaited and dropped.
                drain(pending);
                return Err(err);
            }
            Err(_) => {
                drain(pending);
                return Err(crate::core::error::Error::new(
                    crate::core::error::ErrorKind::Internal,
                    "segment store terminated during query",
                ));
            }
        };
        processed += 1;
        if processed == taste {
            // The taste wave is done; widen to the steady-state cap.
            window = config.max_resident_partitions;
        }
        if sink.cancelled() {
            debug!(segment = %id, "dropping slices of cancelled query");
            continue;
        }
        if !stream_matches(expr, &segment, sink) {
            break;
        }
    }
    drain(pending);
    if sink.deadline_exceeded() {
        sink.finish(Some(sink.deadline_error()));
    } else {
        sink.finish(None);
    }
    Ok(())
}

/// Row-evaluates the expression over a materialized shard and streams the
/// matching sub-slices. Returns false when the query should stop.
fn stream_matches(expr: &Expression, segment: &Segment, sink: &QuerySink) -> bool {
    for slice in &segment.slices {
        if sink.cancelled() || sink.deadline_exceeded() {
            return false;
        }
        let matching = matching_ids(expr, slice);
        for sub in slice.select(&matching) {
            if !sink.send_slice(sub) {
                return false;
            }
        }
    }
    true
}

/// The ids of the rows in `slice` that match `expr`, as contiguous runs.
fn matching_ids(expr: &Expression, slice: &TableSlice) -> IdSet {
    let mut run_start = None;
    let mut runs = Vec::new();
    for (i, row) in slice.rows.iter().enumerate() {
        let id = slice.offset + i as u64;
        if evaluate(expr, &slice.layout, row) {
            run_start.get_or_insert(id);
        } else if let Some(start) = run_start.take() {
            runs.push(IdRange::new(start, id));
        }
    }
    if let Some(start) = run_start {
        runs.push(IdRange::new(start, slice.offset + slice.len()));
    }
    runs.into_iter().collect()
}

/// Awaits outstanding loads so the store finishes its reads, then drops the
/// results.
fn drain(pending: VecDeque<(Uuid, Receiver<Result<Arc<Segment>>>)>) {
    for (id, rx) in pending {
        if rx.recv().is_err() {
            warn!(segment = %id, "store went away while draining query");
        }
    }
}
