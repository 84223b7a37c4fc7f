//! Bounded row queues connecting step copies, plus the shared stop
//! signal.
//!
//! A queue is a fixed-capacity FIFO between exactly one producer copy
//! and one consumer copy. `put` blocks while the queue is full and
//! `get` blocks while it is empty; this blocking is the engine's only
//! backpressure mechanism. No row is ever dropped by the queue itself.
//! End-of-stream is signalled by closing the producer side; consumers
//! drain whatever is buffered and then observe the end.
//!
//! Every blocking operation is a select over the data channel and the
//! pipeline's cancel channel, so a stop request wakes every blocked
//! thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crossbeam_channel::{bounded, Receiver, Select, Sender};
use rowflow_types::{Row, RowSchema};

/// Default queue capacity in rows.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

/// What travels on a queue: the schema frame (at most one, before any
/// row) and then rows conforming to it.
#[derive(Debug, Clone)]
pub(crate) enum Frame {
    Schema(Arc<RowSchema>),
    Row(Row),
}

/// Returned when a blocking queue operation was abandoned: the run was
/// cancelled or the other end of the queue is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueClosed;

impl std::fmt::Display for QueueClosed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("row queue closed")
    }
}

impl std::error::Error for QueueClosed {}

/// Shared stop state for one pipeline run.
///
/// `stop_all` flips the stopped flag and drops the cancel sender,
/// which makes the cancel channel ready in every select and wakes all
/// blocked queue operations. `safe_stop` only flips a flag that source
/// steps observe; buffered rows keep draining.
pub struct StopSignal {
    stopped: AtomicBool,
    safe: AtomicBool,
    cancel_tx: Mutex<Option<Sender<()>>>,
    cancel_rx: Receiver<()>,
}

impl StopSignal {
    #[must_use]
    pub fn new() -> Arc<Self> {
        let (tx, rx) = bounded::<()>(0);
        Arc::new(Self {
            stopped: AtomicBool::new(false),
            safe: AtomicBool::new(false),
            cancel_tx: Mutex::new(Some(tx)),
            cancel_rx: rx,
        })
    }

    /// Request an immediate stop. Idempotent.
    pub fn stop_all(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        if let Ok(mut guard) = self.cancel_tx.lock() {
            guard.take();
        }
    }

    /// Request a graceful stop: sources stop generating, buffered rows
    /// drain. Idempotent.
    pub fn safe_stop(&self) {
        self.safe.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_safe_stop(&self) -> bool {
        self.safe.load(Ordering::SeqCst)
    }

    /// True when any stop (immediate or safe) was requested.
    #[must_use]
    pub fn stop_requested(&self) -> bool {
        self.is_stopped() || self.is_safe_stop()
    }

    pub(crate) fn cancel_token(&self) -> Receiver<()> {
        self.cancel_rx.clone()
    }
}

/// Create one bounded queue between a producer copy and a consumer
/// copy. Capacity is fixed for the life of the queue.
pub(crate) fn row_queue(capacity: usize, cancel: Receiver<()>) -> (RowProducer, RowConsumer) {
    let (tx, rx) = bounded::<Frame>(capacity);
    (
        RowProducer {
            tx: Some(tx),
            cancel: cancel.clone(),
            schema_sent: false,
        },
        RowConsumer {
            rx,
            cancel,
            schema: None,
        },
    )
}

/// Producer end of one queue.
pub(crate) struct RowProducer {
    tx: Option<Sender<Frame>>,
    cancel: Receiver<()>,
    schema_sent: bool,
}

impl RowProducer {
    /// Blocks while the queue is at capacity. Fails when the run was
    /// cancelled or the consumer is gone.
    pub(crate) fn put(&mut self, row: Row) -> Result<(), QueueClosed> {
        self.send(Frame::Row(row))
    }

    /// Deliver the schema frame once, before the first row.
    pub(crate) fn put_schema(&mut self, schema: &Arc<RowSchema>) -> Result<(), QueueClosed> {
        if self.schema_sent {
            return Ok(());
        }
        self.send(Frame::Schema(Arc::clone(schema)))?;
        self.schema_sent = true;
        Ok(())
    }

    fn send(&mut self, frame: Frame) -> Result<(), QueueClosed> {
        let Some(tx) = self.tx.as_ref() else {
            return Err(QueueClosed);
        };
        crossbeam_channel::select! {
            send(tx, frame) -> res => res.map_err(|_| QueueClosed),
            recv(self.cancel) -> _ => Err(QueueClosed),
        }
    }

    /// Signal end-of-stream. Idempotent; wakes blocked consumers.
    /// Buffered rows remain drainable.
    pub(crate) fn close(&mut self) {
        self.tx.take();
    }
}

impl Drop for RowProducer {
    fn drop(&mut self) {
        self.close();
    }
}

/// Consumer end of one queue.
pub(crate) struct RowConsumer {
    rx: Receiver<Frame>,
    cancel: Receiver<()>,
    schema: Option<Arc<RowSchema>>,
}

impl RowConsumer {
    /// Blocks until a row arrives. Returns `None` at end-of-stream
    /// (producer closed and buffer drained) or when the run was
    /// cancelled. Never blocks forever after `close`.
    pub(crate) fn get(&mut self) -> Option<Row> {
        loop {
            let frame = crossbeam_channel::select! {
                recv(self.rx) -> res => res.ok()?,
                recv(self.cancel) -> _ => return None,
            };
            match frame {
                Frame::Schema(s) => self.schema = Some(s),
                Frame::Row(row) => return Some(row),
            }
        }
    }

    /// Number of frames currently buffered.
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.rx.len()
    }

    pub(crate) fn schema(&self) -> Option<&Arc<RowSchema>> {
        self.schema.as_ref()
    }
}

/// All input queues of one step copy. Fan-in is arrival order: rows
/// from multiple upstream copies interleave as they arrive, with no
/// cross-queue ordering guarantee.
pub(crate) struct InputPorts {
    ports: Vec<RowConsumer>,
    cancel: Receiver<()>,
    schema: Option<Arc<RowSchema>>,
}

enum Polled {
    Cancelled,
    Row(Row),
    Schema(Arc<RowSchema>),
    Drained(usize),
}

impl InputPorts {
    pub(crate) fn new(ports: Vec<RowConsumer>, cancel: Receiver<()>) -> Self {
        Self {
            ports,
            cancel,
            schema: None,
        }
    }

    /// Next available row from any input, or `None` once every input
    /// has reached end-of-stream (or the run was cancelled).
    pub(crate) fn get(&mut self) -> Option<Row> {
        loop {
            if self.ports.is_empty() {
                return None;
            }
            let polled = {
                let mut sel = Select::new();
                for port in &self.ports {
                    sel.recv(&port.rx);
                }
                let cancel_idx = sel.recv(&self.cancel);
                let oper = sel.select();
                let idx = oper.index();
                if idx == cancel_idx {
                    let _ = oper.recv(&self.cancel);
                    Polled::Cancelled
                } else {
                    match oper.recv(&self.ports[idx].rx) {
                        Ok(Frame::Schema(s)) => Polled::Schema(s),
                        Ok(Frame::Row(row)) => Polled::Row(row),
                        Err(_) => Polled::Drained(idx),
                    }
                }
            };
            match polled {
                Polled::Cancelled => return None,
                Polled::Row(row) => return Some(row),
                Polled::Schema(s) => self.schema = Some(s),
                // this upstream copy finished; keep listening to the rest
                Polled::Drained(idx) => {
                    self.ports.swap_remove(idx);
                }
            }
        }
    }

    pub(crate) fn schema(&self) -> Option<&Arc<RowSchema>> {
        self.schema.as_ref().or_else(|| {
            self.ports.iter().find_map(RowConsumer::schema)
        })
    }

    pub(crate) fn port_count(&self) -> usize {
        self.ports.len()
    }
}

/// All queues from one producer copy toward the copies of a single
/// downstream step. Rows are distributed round-robin across the
/// copies; with more than one copy the downstream interleave is
/// arrival order, not a deterministic merge.
pub(crate) struct OutputPort {
    target_step: String,
    targets: Vec<RowProducer>,
    next: usize,
    schema: Option<Arc<RowSchema>>,
}

impl OutputPort {
    pub(crate) fn new(target_step: impl Into<String>, targets: Vec<RowProducer>) -> Self {
        Self {
            target_step: target_step.into(),
            targets,
            next: 0,
            schema: None,
        }
    }

    pub(crate) fn target_step(&self) -> &str {
        &self.target_step
    }

    pub(crate) fn set_schema(&mut self, schema: Arc<RowSchema>) {
        self.schema = Some(schema);
    }

    pub(crate) fn put(&mut self, row: Row) -> Result<(), QueueClosed> {
        let n = self.targets.len();
        if n == 0 {
            return Ok(());
        }
        let idx = self.next % n;
        self.next = (self.next + 1) % n;
        let target = &mut self.targets[idx];
        if let Some(schema) = &self.schema {
            target.put_schema(schema)?;
        }
        target.put(row)
    }

    pub(crate) fn close(&mut self) {
        for target in &mut self.targets {
            // deliver the schema even to copies that never saw a row,
            // so downstream first-row setup stays consistent
            if let Some(schema) = &self.schema {
                let _ = target.put_schema(schema);
            }
            target.close();
        }
    }
}
