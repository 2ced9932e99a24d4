//! Bounded row queues connecting step copies.
//!
//! Every hop of a prepared pipeline becomes one [`RowQueue`] per consumer
//! copy. Producers put rows through a [`RowSender`], the consumer takes them
//! through a [`RowReceiver`]. Blocking operations wait on the data channel,
//! the queue's own close signal and the caller's [`StopSignal`] at the same
//! time, so a stop issued from any thread wakes every blocked put or get.
//!
//! # End of stream
//!
//! A queue counts its registered producers. The end-of-stream marker is
//! enqueued by the last producer to finish, behind every row already put,
//! so a consumer never sees end-of-stream before the last row.

use crate::pipeline::schema::{Row, Schema};
use crossbeam_channel::{bounded, Receiver, Select, Sender, TryRecvError, TrySendError};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use thiserror::Error;

/// Queue operation failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// The queue was closed or the caller's stop signal fired.
    #[error("queue operation cancelled")]
    Cancelled,

    #[error("row does not match schema of queue '{queue}': {detail}")]
    SchemaMismatch { queue: String, detail: String },

    /// The consumer side is gone.
    #[error("queue '{0}' has no consumer")]
    Disconnected(String),
}

// ─── Stop signal ────────────────────────────────────────────────────────────

struct StopInner {
    stopped: AtomicBool,
    // Dropped on stop so that selects on `rx` wake up as disconnected.
    tx: Mutex<Option<Sender<()>>>,
    rx: Receiver<()>,
    children: Mutex<Vec<Weak<StopInner>>>,
}

impl StopInner {
    fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        lock(&self.tx).take();
        let children = std::mem::take(&mut *lock(&self.children));
        for child in children.iter().filter_map(Weak::upgrade) {
            child.stop();
        }
    }
}

/// Cooperative, idempotent cancellation flag that can be waited on.
///
/// Clones share the same flag. Linked children are stopped when the parent
/// stops; links are weak, so a dropped child does not leak.
#[derive(Clone)]
pub struct StopSignal {
    inner: Arc<StopInner>,
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, rx) = bounded(0);
        Self {
            inner: Arc::new(StopInner {
                stopped: AtomicBool::new(false),
                tx: Mutex::new(Some(tx)),
                rx,
                children: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Raise the flag. Safe to call any number of times from any thread.
    pub fn stop(&self) {
        self.inner.stop();
    }

    #[inline]
    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Receiver that becomes ready (disconnected) once the signal is stopped.
    pub fn receiver(&self) -> &Receiver<()> {
        &self.inner.rx
    }

    /// Propagate stops from `self` to `child`.
    ///
    /// If `self` is already stopped the child is stopped immediately.
    pub fn link(&self, child: &StopSignal) {
        if Arc::ptr_eq(&self.inner, &child.inner) {
            return;
        }
        if self.is_stopped() {
            child.stop();
            return;
        }
        lock(&self.inner.children).push(Arc::downgrade(&child.inner));
        // A concurrent stop may have drained the child list before the push.
        if self.is_stopped() {
            child.stop();
        }
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StopSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StopSignal")
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

// ─── Pause signal ───────────────────────────────────────────────────────────

/// Shared pause gate for the step copies of a pipeline.
///
/// While paused the gate holds a channel nobody sends on; resuming drops its
/// sender, so every waiter wakes as disconnected. Clones share the gate.
#[derive(Clone, Default)]
pub struct PauseSignal {
    gate: Arc<Mutex<Option<(Sender<()>, Receiver<()>)>>>,
}

impl PauseSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Close the gate. Has no effect when already paused.
    pub fn pause(&self) {
        let mut gate = lock(&self.gate);
        if gate.is_none() {
            *gate = Some(bounded(0));
        }
    }

    /// Open the gate and wake every waiter.
    pub fn resume(&self) {
        lock(&self.gate).take();
    }

    pub fn is_paused(&self) -> bool {
        lock(&self.gate).is_some()
    }

    /// Block while paused. Returns `false` when `stop` fired first.
    pub fn wait(&self, stop: &StopSignal) -> bool {
        loop {
            if stop.is_stopped() {
                return false;
            }
            let Some(rx) = lock(&self.gate).as_ref().map(|(_, rx)| rx.clone()) else {
                return true;
            };
            let mut sel = Select::new();
            let resumed = sel.recv(&rx);
            sel.recv(stop.receiver());
            let oper = sel.select();
            if oper.index() == resumed {
                let _ = oper.recv(&rx);
            } else {
                let _ = oper.recv(stop.receiver());
                return false;
            }
        }
    }
}

impl fmt::Debug for PauseSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PauseSignal")
            .field("paused", &self.is_paused())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ─── Queue ──────────────────────────────────────────────────────────────────

enum QueueMessage {
    Row(Row),
    Finished,
}

struct QueueShared {
    name: String,
    capacity: usize,
    safe_mode: bool,
    schema: OnceLock<Arc<Schema>>,
    registered: AtomicUsize,
    active: AtomicUsize,
    closed: StopSignal,
}

impl QueueShared {
    fn check_schema(&self, schema: &Arc<Schema>, row: &Row) -> Result<(), QueueError> {
        let mismatch = |detail: String| QueueError::SchemaMismatch {
            queue: self.name.clone(),
            detail,
        };
        if row.len() != schema.len() {
            return Err(mismatch(format!(
                "row has {} values but its schema has {} fields",
                row.len(),
                schema.len()
            )));
        }
        let first = self.schema.get_or_init(|| Arc::clone(schema));
        if Arc::ptr_eq(first, schema) {
            return Ok(());
        }
        if first.len() != schema.len() {
            return Err(mismatch(format!(
                "expected {} fields, got {}",
                first.len(),
                schema.len()
            )));
        }
        if self.safe_mode && !first.same_names(schema) {
            return Err(mismatch(format!("expected {}, got {}", first, schema)));
        }
        Ok(())
    }
}

/// A bounded FIFO of rows with producer accounting.
///
/// The queue itself is only a factory: the orchestrator registers senders
/// and hands out the receiver, then drops the queue.
pub struct RowQueue {
    shared: Arc<QueueShared>,
    tx: Sender<QueueMessage>,
    rx: Receiver<QueueMessage>,
}

impl RowQueue {
    /// Create a queue whose close signal follows `stop`.
    pub fn new(name: impl Into<String>, capacity: usize, stop: &StopSignal) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = bounded(capacity);
        let closed = StopSignal::new();
        stop.link(&closed);
        Self {
            shared: Arc::new(QueueShared {
                name: name.into(),
                capacity,
                safe_mode: false,
                schema: OnceLock::new(),
                registered: AtomicUsize::new(0),
                active: AtomicUsize::new(0),
                closed,
            }),
            tx,
            rx,
        }
    }

    /// Also compare field names, not just field counts, on every put.
    pub fn with_safe_mode(mut self, safe_mode: bool) -> Self {
        if let Some(shared) = Arc::get_mut(&mut self.shared) {
            shared.safe_mode = safe_mode;
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Number of producers registered so far.
    pub fn producer_count(&self) -> usize {
        self.shared.registered.load(Ordering::SeqCst)
    }

    /// Register one producer.
    pub fn sender(&self) -> RowSender {
        self.shared.registered.fetch_add(1, Ordering::SeqCst);
        self.shared.active.fetch_add(1, Ordering::SeqCst);
        RowSender {
            shared: Arc::clone(&self.shared),
            tx: self.tx.clone(),
            finished: false,
        }
    }

    /// The consuming end. A queue has exactly one consumer.
    pub fn receiver(&self) -> RowReceiver {
        RowReceiver {
            shared: Arc::clone(&self.shared),
            rx: self.rx.clone(),
            finished: false,
        }
    }

    /// Wake blocked producers and consumers with [`QueueError::Cancelled`].
    pub fn close(&self) {
        self.shared.closed.stop();
    }
}

/// Producer handle of a [`RowQueue`]. Dropping it finishes it.
pub struct RowSender {
    shared: Arc<QueueShared>,
    tx: Sender<QueueMessage>,
    finished: bool,
}

impl RowSender {
    pub fn queue_name(&self) -> &str {
        &self.shared.name
    }

    /// Register another producer on the same queue.
    ///
    /// While this sender is unfinished the end-of-stream marker cannot have
    /// been sent, so the new producer is counted before the stream ends.
    /// Forking a finished sender yields a finished sender.
    pub fn fork(&self) -> RowSender {
        if !self.finished {
            self.shared.registered.fetch_add(1, Ordering::SeqCst);
            self.shared.active.fetch_add(1, Ordering::SeqCst);
        }
        RowSender {
            shared: Arc::clone(&self.shared),
            tx: self.tx.clone(),
            finished: self.finished,
        }
    }

    /// Put a row, blocking while the queue is full.
    pub fn put(&self, schema: &Arc<Schema>, row: Row, stop: &StopSignal) -> Result<(), QueueError> {
        self.shared.check_schema(schema, &row)?;
        if self.shared.closed.is_stopped() || stop.is_stopped() {
            return Err(QueueError::Cancelled);
        }
        match self.tx.try_send(QueueMessage::Row(row)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(msg)) => self.send_blocking(msg, Some(stop)),
            Err(TrySendError::Disconnected(_)) => Err(self.disconnected(Some(stop))),
        }
    }

    fn disconnected(&self, stop: Option<&StopSignal>) -> QueueError {
        // A consumer torn down by a stop is a cancellation, not a wiring fault.
        if self.shared.closed.is_stopped() || stop.is_some_and(StopSignal::is_stopped) {
            QueueError::Cancelled
        } else {
            QueueError::Disconnected(self.shared.name.clone())
        }
    }

    /// Mark this producer done. The last producer to finish enqueues the
    /// end-of-stream marker. Calling this again has no effect.
    pub fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        if self.shared.active.fetch_sub(1, Ordering::SeqCst) != 1 {
            return;
        }
        tracing::trace!("Queue '{}' reached end of stream", self.shared.name);
        let result = match self.tx.try_send(QueueMessage::Finished) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(msg)) => self.send_blocking(msg, None),
            Err(TrySendError::Disconnected(_)) => Ok(()),
        };
        if result.is_err() {
            tracing::trace!(
                "End of stream on '{}' dropped, queue closed",
                self.shared.name
            );
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn send_blocking(&self, msg: QueueMessage, stop: Option<&StopSignal>) -> Result<(), QueueError> {
        let closed = self.shared.closed.receiver();
        let mut sel = Select::new();
        let send_idx = sel.send(&self.tx);
        let closed_idx = sel.recv(closed);
        if let Some(stop) = stop {
            sel.recv(stop.receiver());
        }
        let oper = sel.select();
        let index = oper.index();
        if index == send_idx {
            oper.send(&self.tx, msg).map_err(|_| self.disconnected(stop))
        } else if index == closed_idx {
            let _ = oper.recv(closed);
            Err(QueueError::Cancelled)
        } else {
            if let Some(stop) = stop {
                let _ = oper.recv(stop.receiver());
            }
            Err(QueueError::Cancelled)
        }
    }
}

impl Drop for RowSender {
    fn drop(&mut self) {
        self.finish();
    }
}

/// Consumer handle of a [`RowQueue`].
pub struct RowReceiver {
    shared: Arc<QueueShared>,
    rx: Receiver<QueueMessage>,
    finished: bool,
}

impl RowReceiver {
    pub fn queue_name(&self) -> &str {
        &self.shared.name
    }

    /// Schema recorded from the first row put on this queue.
    pub fn schema(&self) -> Option<Arc<Schema>> {
        self.shared.schema.get().cloned()
    }

    /// True once end-of-stream has been observed.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Number of buffered messages.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Take the next row, blocking while the queue is empty.
    ///
    /// Returns `Ok(None)` at end of stream and on every later call.
    pub fn get(&mut self, stop: &StopSignal) -> Result<Option<Row>, QueueError> {
        if self.finished {
            return Ok(None);
        }
        if self.shared.closed.is_stopped() || stop.is_stopped() {
            return Err(QueueError::Cancelled);
        }
        let received = match self.rx.try_recv() {
            Ok(msg) => Ok(msg),
            Err(TryRecvError::Disconnected) => Err(()),
            Err(TryRecvError::Empty) => {
                let closed = self.shared.closed.receiver();
                let mut sel = Select::new();
                let recv_idx = sel.recv(&self.rx);
                let closed_idx = sel.recv(closed);
                sel.recv(stop.receiver());
                let oper = sel.select();
                let index = oper.index();
                if index == recv_idx {
                    oper.recv(&self.rx).map_err(|_| ())
                } else if index == closed_idx {
                    let _ = oper.recv(closed);
                    return Err(QueueError::Cancelled);
                } else {
                    let _ = oper.recv(stop.receiver());
                    return Err(QueueError::Cancelled);
                }
            }
        };
        Ok(self.accept(received))
    }

    fn accept(&mut self, received: Result<QueueMessage, ()>) -> Option<Row> {
        match received {
            Ok(QueueMessage::Row(row)) => Some(row),
            // Every producer gone without a marker counts as end of stream too.
            Ok(QueueMessage::Finished) | Err(()) => {
                self.finished = true;
                None
            }
        }
    }
}

/// Take the next row from whichever input has one.
///
/// Returns the input index with the row, or `Ok(None)` once every input
/// reached end of stream. There is no ordering guarantee across inputs.
pub fn receive_any(
    inputs: &mut [RowReceiver],
    stop: &StopSignal,
) -> Result<Option<(usize, Row)>, QueueError> {
    loop {
        let live: Vec<usize> = (0..inputs.len())
            .filter(|&i| !inputs[i].finished)
            .collect();
        match live.as_slice() {
            [] => return Ok(None),
            [single] => {
                let single = *single;
                return Ok(inputs[single].get(stop)?.map(|row| (single, row)));
            }
            _ => {}
        }
        if stop.is_stopped() || live.iter().any(|&i| inputs[i].shared.closed.is_stopped()) {
            return Err(QueueError::Cancelled);
        }

        let (input, received) = {
            let mut sel = Select::new();
            for &i in &live {
                sel.recv(&inputs[i].rx);
            }
            let stop_idx = sel.recv(stop.receiver());
            for &i in &live {
                sel.recv(inputs[i].shared.closed.receiver());
            }
            let oper = sel.select();
            let index = oper.index();
            if index < live.len() {
                let input = live[index];
                (input, oper.recv(&inputs[input].rx).map_err(|_| ()))
            } else if index == stop_idx {
                let _ = oper.recv(stop.receiver());
                return Err(QueueError::Cancelled);
            } else {
                let input = live[index - stop_idx - 1];
                let _ = oper.recv(inputs[input].shared.closed.receiver());
                return Err(QueueError::Cancelled);
            }
        };
        if let Some(row) = inputs[input].accept(received) {
            return Ok(Some((input, row)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::value::{Value, ValueType};
    use proptest::prelude::*;
    use std::thread;
    use std::time::Duration;

    fn int_schema() -> Arc<Schema> {
        Arc::new(Schema::of(&[("n", ValueType::Integer)]))
    }

    #[test]
    fn test_stop_signal_is_idempotent_and_propagates() {
        let parent = StopSignal::new();
        let child = StopSignal::new();
        parent.link(&child);
        parent.stop();
        parent.stop();
        assert!(child.is_stopped());
        assert!(parent.receiver().try_recv().is_err());

        let late = StopSignal::new();
        parent.link(&late);
        assert!(late.is_stopped());
    }

    #[test]
    fn test_pause_blocks_until_resume_or_stop() {
        let stop = StopSignal::new();
        let pause = PauseSignal::new();
        assert!(pause.wait(&stop));

        pause.pause();
        pause.pause();
        assert!(pause.is_paused());
        let waiter = {
            let (pause, stop) = (pause.clone(), stop.clone());
            thread::spawn(move || pause.wait(&stop))
        };
        thread::sleep(Duration::from_millis(50));
        assert!(!waiter.is_finished());
        pause.resume();
        assert!(waiter.join().unwrap());
        assert!(!pause.is_paused());

        pause.pause();
        let waiter = {
            let (pause, stop) = (pause.clone(), stop.clone());
            thread::spawn(move || pause.wait(&stop))
        };
        thread::sleep(Duration::from_millis(20));
        stop.stop();
        assert!(!waiter.join().unwrap());
    }

    #[test]
    fn test_end_of_stream_waits_for_every_producer() {
        let stop = StopSignal::new();
        let queue = RowQueue::new("q", 16, &stop);
        let mut a = queue.sender();
        let mut b = queue.sender();
        let mut rx = queue.receiver();
        assert_eq!(queue.producer_count(), 2);
        drop(queue);
        let schema = int_schema();

        a.put(&schema, vec![Value::Integer(1)], &stop).unwrap();
        a.finish();
        a.finish();
        // Only the row is buffered: no marker until `b` finishes.
        assert_eq!(rx.len(), 1);
        b.put(&schema, vec![Value::Integer(2)], &stop).unwrap();
        b.finish();

        assert_eq!(rx.get(&stop).unwrap(), Some(vec![Value::Integer(1)]));
        assert_eq!(rx.get(&stop).unwrap(), Some(vec![Value::Integer(2)]));
        assert_eq!(rx.get(&stop).unwrap(), None);
        assert_eq!(rx.get(&stop).unwrap(), None);
    }

    #[test]
    fn test_first_row_defines_schema() {
        let stop = StopSignal::new();
        let queue = RowQueue::new("q", 4, &stop);
        let tx = queue.sender();
        let rx = queue.receiver();
        tx.put(&int_schema(), vec![Value::Integer(1)], &stop).unwrap();
        assert_eq!(rx.schema().unwrap().len(), 1);

        let wider = Arc::new(Schema::of(&[
            ("n", ValueType::Integer),
            ("m", ValueType::Integer),
        ]));
        let err = tx
            .put(&wider, vec![Value::Integer(1), Value::Integer(2)], &stop)
            .unwrap_err();
        assert!(matches!(err, QueueError::SchemaMismatch { .. }));

        let err = tx.put(&int_schema(), vec![], &stop).unwrap_err();
        assert!(matches!(err, QueueError::SchemaMismatch { .. }));
    }

    #[test]
    fn test_safe_mode_checks_names() {
        let stop = StopSignal::new();
        let queue = RowQueue::new("q", 4, &stop).with_safe_mode(true);
        let tx = queue.sender();
        tx.put(&int_schema(), vec![Value::Integer(1)], &stop).unwrap();
        let other = Arc::new(Schema::of(&[("other", ValueType::Integer)]));
        assert!(tx.put(&other, vec![Value::Integer(2)], &stop).is_err());
    }

    #[test]
    fn test_full_queue_put_unblocked_by_stop() {
        let stop = StopSignal::new();
        let queue = RowQueue::new("q", 1, &stop);
        let tx = queue.sender();
        let _rx = queue.receiver();
        let schema = int_schema();
        tx.put(&schema, vec![Value::Integer(1)], &stop).unwrap();

        let blocked_stop = stop.clone();
        let handle = thread::spawn(move || tx.put(&schema, vec![Value::Integer(2)], &blocked_stop));
        thread::sleep(Duration::from_millis(50));
        assert!(!handle.is_finished());
        stop.stop();
        assert_eq!(handle.join().unwrap(), Err(QueueError::Cancelled));
    }

    #[test]
    fn test_empty_get_unblocked_by_close() {
        let stop = StopSignal::new();
        let queue = RowQueue::new("q", 1, &stop);
        let _tx = queue.sender();
        let mut rx = queue.receiver();
        let caller = StopSignal::new();
        let handle = thread::spawn(move || rx.get(&caller));
        thread::sleep(Duration::from_millis(20));
        queue.close();
        assert_eq!(handle.join().unwrap(), Err(QueueError::Cancelled));
    }

    #[test]
    fn test_full_queue_put_unblocked_by_close() {
        let stop = StopSignal::new();
        let queue = RowQueue::new("q", 2, &stop);
        let tx = queue.sender();
        let _rx = queue.receiver();
        let schema = int_schema();
        tx.put(&schema, vec![Value::Integer(1)], &stop).unwrap();
        tx.put(&schema, vec![Value::Integer(2)], &stop).unwrap();

        let caller = StopSignal::new();
        let handle = thread::spawn(move || tx.put(&schema, vec![Value::Integer(3)], &caller));
        thread::sleep(Duration::from_millis(50));
        assert!(!handle.is_finished());
        queue.close();
        assert_eq!(handle.join().unwrap(), Err(QueueError::Cancelled));
        assert!(!stop.is_stopped());
    }

    #[test]
    fn test_forked_senders_all_finish_before_end_of_stream() {
        let stop = StopSignal::new();
        let queue = RowQueue::new("q", 8, &stop);
        let mut tx = queue.sender();
        let mut fork = tx.fork();
        let mut rx = queue.receiver();
        assert_eq!(queue.producer_count(), 2);
        let schema = int_schema();

        tx.put(&schema, vec![Value::Integer(1)], &stop).unwrap();
        tx.finish();
        assert_eq!(rx.get(&stop).unwrap(), Some(vec![Value::Integer(1)]));
        assert_eq!(rx.len(), 0);

        fork.put(&schema, vec![Value::Integer(2)], &stop).unwrap();
        fork.finish();
        assert_eq!(rx.get(&stop).unwrap(), Some(vec![Value::Integer(2)]));
        assert_eq!(rx.get(&stop).unwrap(), None);

        // A fork of a finished sender does not reopen the stream.
        let late = fork.fork();
        assert!(late.is_finished());
        assert_eq!(queue.producer_count(), 2);
    }

    #[test]
    fn test_dropped_sender_finishes() {
        let stop = StopSignal::new();
        let queue = RowQueue::new("q", 4, &stop);
        let tx = queue.sender();
        let mut rx = queue.receiver();
        drop(tx);
        assert_eq!(rx.get(&stop).unwrap(), None);
        assert!(rx.is_finished());
    }

    #[test]
    fn test_receive_any_drains_all_inputs() {
        let stop = StopSignal::new();
        let schema = int_schema();
        let mut inputs = Vec::new();
        for i in 0..3 {
            let queue = RowQueue::new(format!("q{i}"), 8, &stop);
            let mut tx = queue.sender();
            inputs.push(queue.receiver());
            tx.put(&schema, vec![Value::Integer(i)], &stop).unwrap();
            tx.finish();
        }
        let mut seen = Vec::new();
        while let Some((input, row)) = receive_any(&mut inputs, &stop).unwrap() {
            assert_eq!(row[0], Value::Integer(input as i64));
            seen.push(input);
        }
        seen.sort();
        assert_eq!(seen, vec![0, 1, 2]);
    }

    proptest! {
        #[test]
        fn prop_fifo_then_end_of_stream(values in proptest::collection::vec(any::<i64>(), 0..64)) {
            let stop = StopSignal::new();
            let queue = RowQueue::new("q", 4, &stop);
            let mut tx = queue.sender();
            let mut rx = queue.receiver();
            let schema = int_schema();
            let sent = values.clone();
            let producer_stop = stop.clone();
            let producer = thread::spawn(move || {
                for v in sent {
                    tx.put(&schema, vec![Value::Integer(v)], &producer_stop).unwrap();
                }
                tx.finish();
            });
            let mut received = Vec::new();
            while let Some(row) = rx.get(&stop).unwrap() {
                received.push(row[0].clone());
            }
            producer.join().unwrap();
            let expected: Vec<Value> = values.into_iter().map(Value::Integer).collect();
            prop_assert_eq!(received, expected);
            prop_assert_eq!(rx.get(&stop).unwrap(), None);
        }
    }
}
