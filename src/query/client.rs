use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::core::error::{Error, ErrorKind, Result};
use crate::data::slice::TableSlice;

/// What a query streams back to its client.
#[derive(Debug)]
pub enum QueryResponse {
    Slice(TableSlice),
    /// End-of-stream marker; carries the error that cut the stream short,
    /// if any. Results delivered before it remain valid.
    Done(Option<Error>),
}

/// State shared between a query worker and its client handle.
#[derive(Debug)]
struct QueryControl {
    credit: Mutex<i64>,
    credit_granted: Condvar,
    cancelled: AtomicBool,
    deadline: Option<Instant>,
}

/// The client side of a running query. Clients advertise credit (events
/// they can accept); the pipeline does not materialise further shards while
/// outstanding credit is zero.
#[derive(Debug)]
pub struct QueryHandle {
    pub id: Uuid,
    receiver: Receiver<QueryResponse>,
    control: Arc<QueryControl>,
}

impl QueryHandle {
    /// Grants the pipeline credit for `events` more events.
    pub fn request(&self, events: u64) {
        let mut credit = self.control.credit.lock();
        *credit += events as i64;
        self.control.credit_granted.notify_all();
    }

    /// Asks the query to stop. In-flight shard loads complete but their
    /// slices are discarded.
    pub fn cancel(&self) {
        self.control.cancelled.store(true, Ordering::SeqCst);
        self.control.credit_granted.notify_all();
    }

    /// Blocks for the next response; `None` once the worker is gone.
    pub fn recv(&self) -> Option<QueryResponse> {
        self.receiver.recv().ok()
    }

    pub fn try_recv(&self) -> Option<QueryResponse> {
        self.receiver.try_recv().ok()
    }

    /// Drains the whole stream with unbounded credit. Convenience for
    /// callers that want all results at once.
    pub fn collect(self) -> Result<Vec<TableSlice>> {
        self.request(u64::MAX / 2);
        let mut slices = Vec::new();
        loop {
            match self.recv() {
                Some(QueryResponse::Slice(slice)) => slices.push(slice),
                Some(QueryResponse::Done(None)) | None => return Ok(slices),
                Some(QueryResponse::Done(Some(err))) => return Err(err),
            }
        }
    }
}

/// The worker side: streams slices, honoring credit, cancellation, and the
/// client deadline.
pub struct QuerySink {
    sender: Sender<QueryResponse>,
    control: Arc<QueryControl>,
}

impl QuerySink {
    pub fn cancelled(&self) -> bool {
        self.control.cancelled.load(Ordering::SeqCst)
    }

    /// Whether the client-set deadline has passed.
    pub fn deadline_exceeded(&self) -> bool {
        matches!(self.control.deadline, Some(deadline) if Instant::now() > deadline)
    }

    /// Blocks until the client has credit for at least one event. Returns
    /// false when the query was cancelled or timed out while waiting.
    pub fn wait_for_credit(&self) -> bool {
        let mut credit = self.control.credit.lock();
        loop {
            if self.cancelled() || self.deadline_exceeded() {
                return false;
            }
            if *credit > 0 {
                return true;
            }
            if let Some(deadline) = self.control.deadline {
                if self
                    .control
                    .credit_granted
                    .wait_until(&mut credit, deadline)
                    .timed_out()
                {
                    return false;
                }
            } else {
                self.control.credit_granted.wait(&mut credit);
            }
        }
    }

    /// Sends one slice, charging its rows against the client's credit.
    /// Returns false if the client is gone or cancelled.
    pub fn send_slice(&self, slice: TableSlice) -> bool {
        if !self.wait_for_credit() {
            return false;
        }
        {
            let mut credit = self.control.credit.lock();
            *credit -= slice.len() as i64;
        }
        self.sender.send(QueryResponse::Slice(slice)).is_ok()
    }

    /// Terminates the stream. A send failure means the client already went
    /// away, which is fine.
    pub fn finish(&self, error: Option<Error>) {
        let _ = self.sender.send(QueryResponse::Done(error));
    }

    pub fn deadline_error(&self) -> Error {
        Error::new(ErrorKind::DeadlineExceeded, "query exceeded client deadline")
    }
}

/// Creates a connected handle/sink pair for one query.
pub fn query_channel(deadline: Option<Instant>) -> (QueryHandle, QuerySink) {
    let (sender, receiver) = unbounded();
    let control = Arc::new(QueryControl {
        credit: Mutex::new(0),
        credit_granted: Condvar::new(),
        cancelled: AtomicBool::new(false),
        deadline,
    });
    let handle = QueryHandle {
        id: Uuid::new_v4(),
        receiver,
        control: control.clone(),
    };
    let sink = QuerySink { sender, control };
    (handle, sink)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::types::{RecordField, Type};
    use crate::data::value::Value;
    use std::time::Duration;

    fn slice(n: u64) -> TableSlice {
        let layout =
            Type::record(vec![RecordField::new("x", Type::count())]).with_name("test.ev");
        let rows = (0..n).map(|i| vec![Value::Count(i)]).collect();
        TableSlice::new(layout, 0, rows).unwrap()
    }

    #[test]
    fn sends_block_until_credit_arrives() {
        let (handle, sink) = query_channel(None);
        let worker = std::thread::spawn(move || {
            assert!(sink.send_slice(slice(5)));
            sink.finish(None);
        });
        // The worker cannot make progress before credit is granted.
        std::thread::sleep(Duration::from_millis(50));
        assert!(handle.try_recv().is_none());
        handle.request(10);
        match handle.recv() {
            Some(QueryResponse::Slice(s)) => assert_eq!(s.len(), 5),
            other => panic!("expected slice, got {:?}", other),
        }
        worker.join().unwrap();
    }

    #[test]
    fn cancel_unblocks_a_waiting_worker() {
        let (handle, sink) = query_channel(None);
        let worker = std::thread::spawn(move || sink.send_slice(slice(1)));
        std::thread::sleep(Duration::from_millis(50));
        handle.cancel();
        assert!(!worker.join().unwrap());
    }

    #[test]
    fn deadline_cuts_the_wait_short() {
        let deadline = Instant::now() + Duration::from_millis(20);
        let (_handle, sink) = query_channel(Some(deadline));
        assert!(!sink.wait_for_credit());
        assert!(sink.deadline_exceeded());
    }

    #[test]
    fn collect_drains_until_done() {
        let (handle, sink) = query_channel(None);
        let worker = std::thread::spawn(move || {
            assert!(sink.send_slice(slice(3)));
            assert!(sink.send_slice(slice(2)));
            sink.finish(None);
        });
        let slices = handle.collect().unwrap();
        assert_eq!(slices.len(), 2);
        worker.join().unwrap();
    }
}
