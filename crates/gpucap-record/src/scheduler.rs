//! Threaded front end of the ordering state machine.
//!
//! Producers never touch ordering state: [`SchedulerHandle`] only pushes messages onto an
//! unbounded multi-producer channel, so interception threads never block on the recorder. One
//! dedicated consumer thread owns the [`OrderingState`] and the sink, and blocks on the channel
//! while idle.
//!
//! Sends go through a shared gate. The consumer closes it before its final drain, so a send either
//! lands in the channel before that drain and is processed, or fails with
//! [`SchedulerError::Disconnected`]. Nothing accepted is silently lost.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::{
    CommandSink, OrderingState, SchedulerConfig, SchedulerError, SchedulerStats,
    SchedulerStatsSnapshot,
};

enum Message<P> {
    Record { key: u64, payload: P },
    Skip(u64),
    FrameEnd(u64),
    Flush(Sender<()>),
    Shutdown,
}

/// Cloneable producer side of a [`RecordingScheduler`].
pub struct SchedulerHandle<P> {
    tx: Sender<Message<P>>,
    /// `true` while the consumer accepts messages.
    open: Arc<RwLock<bool>>,
    stats: Arc<SchedulerStats>,
}

impl<P> Clone for SchedulerHandle<P> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            open: Arc::clone(&self.open),
            stats: Arc::clone(&self.stats),
        }
    }
}

impl<P> std::fmt::Debug for SchedulerHandle<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerHandle")
            .field("queued", &self.tx.len())
            .finish()
    }
}

impl<P> SchedulerHandle<P> {
    fn send_gated(&self, msg: Message<P>) -> Result<(), SchedulerError> {
        let open = self.open.read();
        if !*open {
            return Err(SchedulerError::Disconnected);
        }
        self.tx.send(msg).map_err(|_| SchedulerError::Disconnected)
    }

    fn send(&self, msg: Message<P>) -> Result<(), SchedulerError> {
        self.send_gated(msg)?;
        self.stats.inc_enqueued();
        Ok(())
    }

    /// Hand the command for `key` to the recorder.
    pub fn record(&self, key: u64, payload: P) -> Result<(), SchedulerError> {
        self.send(Message::Record { key, payload })
    }

    /// Declare that `key` will never be recorded.
    pub fn skip(&self, key: u64) -> Result<(), SchedulerError> {
        self.send(Message::Skip(key))
    }

    /// Request a frame boundary right after `key` is delivered.
    pub fn frame_end(&self, key: u64) -> Result<(), SchedulerError> {
        self.send(Message::FrameEnd(key))
    }

    /// Block until the consumer has processed every message this thread enqueued before the call.
    pub fn flush(&self) -> Result<(), SchedulerError> {
        let (ack_tx, ack_rx) = crossbeam_channel::bounded(1);
        // The gate is released before waiting; the consumer needs it to shut down.
        self.send_gated(Message::Flush(ack_tx))?;
        ack_rx.recv().map_err(|_| SchedulerError::Disconnected)
    }

    pub fn stats(&self) -> SchedulerStatsSnapshot {
        self.stats.snapshot()
    }
}

/// Ordered recorder: a consumer thread delivering commands to `S` in strict key order.
///
/// Dropping the scheduler shuts the consumer down after draining everything already queued;
/// [`Self::finish`] does the same and hands the sink back.
pub struct RecordingScheduler<P, S>
where
    P: Send + 'static,
    S: CommandSink<P> + Send + 'static,
{
    handle: SchedulerHandle<P>,
    worker: Option<JoinHandle<S>>,
}

impl<P, S> RecordingScheduler<P, S>
where
    P: Send + 'static,
    S: CommandSink<P> + Send + 'static,
{
    pub fn new(sink: S, config: SchedulerConfig) -> Result<Self, SchedulerError> {
        let stats = Arc::new(SchedulerStats::new());
        let mut state = OrderingState::with_stats(config.first_key, Arc::clone(&stats));
        state.set_pending_warn_threshold(config.pending_warn_threshold);

        let (tx, rx) = crossbeam_channel::unbounded();
        let open = Arc::new(RwLock::new(true));
        let gate = Arc::clone(&open);
        let worker = thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn(move || consumer_loop(rx, &gate, state, sink))?;
        debug!(
            thread = %config.thread_name,
            first_key = config.first_key,
            "recording scheduler started"
        );

        Ok(Self {
            handle: SchedulerHandle { tx, open, stats },
            worker: Some(worker),
        })
    }

    /// A producer handle that can be moved to other threads.
    pub fn handle(&self) -> SchedulerHandle<P> {
        self.handle.clone()
    }

    pub fn record(&self, key: u64, payload: P) -> Result<(), SchedulerError> {
        self.handle.record(key, payload)
    }

    pub fn skip(&self, key: u64) -> Result<(), SchedulerError> {
        self.handle.skip(key)
    }

    pub fn frame_end(&self, key: u64) -> Result<(), SchedulerError> {
        self.handle.frame_end(key)
    }

    pub fn flush(&self) -> Result<(), SchedulerError> {
        self.handle.flush()
    }

    pub fn stats(&self) -> SchedulerStatsSnapshot {
        self.handle.stats()
    }

    /// Drain everything queued, stop the consumer and return the sink.
    pub fn finish(mut self) -> Result<S, SchedulerError> {
        self.shutdown()?.ok_or(SchedulerError::Disconnected)
    }

    fn shutdown(&mut self) -> Result<Option<S>, SchedulerError> {
        let Some(worker) = self.worker.take() else {
            return Ok(None);
        };
        // A send failure means the consumer already exited; joining reports why.
        let _ = self.handle.tx.send(Message::Shutdown);
        worker
            .join()
            .map(Some)
            .map_err(|_| SchedulerError::WorkerPanicked)
    }
}

impl<P, S> Drop for RecordingScheduler<P, S>
where
    P: Send + 'static,
    S: CommandSink<P> + Send + 'static,
{
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            warn!("recording scheduler shutdown failed: {err}");
        }
    }
}

/// Apply one message. Returns `false` on shutdown.
fn handle_message<P, S>(msg: Message<P>, state: &mut OrderingState<P>, sink: &mut S) -> bool
where
    S: CommandSink<P>,
{
    match msg {
        Message::Record { key, payload } => state.record(key, payload, sink),
        Message::Skip(key) => state.skip(key, sink),
        Message::FrameEnd(key) => state.frame_end(key, sink),
        Message::Flush(ack) => {
            // The flusher may have given up waiting.
            let _ = ack.send(());
        }
        Message::Shutdown => return false,
    }
    true
}

fn consumer_loop<P, S>(
    rx: Receiver<Message<P>>,
    open: &RwLock<bool>,
    mut state: OrderingState<P>,
    mut sink: S,
) -> S
where
    S: CommandSink<P>,
{
    while let Ok(msg) = rx.recv() {
        if !handle_message(msg, &mut state, &mut sink) {
            break;
        }
    }

    // Once the gate is closed no producer can enqueue, so this drain sees everything accepted.
    *open.write() = false;
    for msg in rx.try_iter() {
        handle_message(msg, &mut state, &mut sink);
    }
    drop(rx);

    let stranded = state.pending_len();
    if stranded > 0 {
        warn!(
            stranded,
            next_key = state.next_key(),
            "recording stopped with commands waiting on a key that never arrived"
        );
        state.stats().add_stranded(stranded as u64);
    }
    debug!(next_key = state.next_key(), "recording scheduler stopped");
    sink
}
