//! Threaded runtime around the [`AccessController`].
//!
//! One worker thread analyzes frames, one controller thread owns the
//! controller. Frames, user signals and timer deadlines all reach the
//! controller as messages on a single channel, so every state change happens
//! in one place. Frames wait in a single slot: a new frame replaces one that
//! has not been picked up yet.

use crate::controller::{AccessController, Handoff, Update};
use crate::recognizer::{FaceOverlay, FrameAnalysis, FrameAnalyzer};
use anyhow::{Context, Result};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// User-interface signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Confirm,
    Deny,
    RequestLock,
    TakeBreak,
    EndClass,
    Resume,
}

/// Everything the runtime reports back.
#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    Update(Update),
    Overlays(Vec<FaceOverlay>),
    Handoff(Handoff),
}

enum Message {
    Frame(FrameAnalysis),
    Signal(Signal),
    Shutdown,
}

struct SlotState<F> {
    pending: Option<F>,
    closed: bool,
    superseded: u64,
}

/// Single-frame mailbox between the frame source and the worker.
struct FrameSlot<F> {
    state: Mutex<SlotState<F>>,
    ready: Condvar,
}

impl<F> FrameSlot<F> {
    fn new() -> Self {
        Self {
            state: Mutex::new(SlotState {
                pending: None,
                closed: false,
                superseded: 0,
            }),
            ready: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SlotState<F>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns `true` when an unanalyzed frame was replaced.
    fn put(&self, frame: F) -> bool {
        let mut state = self.lock();
        if state.closed {
            return false;
        }
        let replaced = state.pending.replace(frame).is_some();
        if replaced {
            state.superseded += 1;
            log::trace!("frame superseded ({} so far)", state.superseded);
        }
        drop(state);
        self.ready.notify_one();
        replaced
    }

    /// Block until a frame is available; `None` once closed.
    fn take(&self) -> Option<F> {
        let mut state = self.lock();
        loop {
            if state.closed {
                return None;
            }
            if let Some(frame) = state.pending.take() {
                return Some(frame);
            }
            state = self
                .ready
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        state.pending = None;
        drop(state);
        self.ready.notify_all();
    }

    fn superseded(&self) -> u64 {
        self.lock().superseded
    }
}

/// Session clock: time since the service started.
#[derive(Debug, Clone, Copy)]
struct Clock {
    start: Instant,
}

impl Clock {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }
}

pub struct AccessService<F> {
    slot: Arc<FrameSlot<F>>,
    messages: Sender<Message>,
    worker: Option<JoinHandle<()>>,
    controller: Option<JoinHandle<AccessController>>,
}

impl<F: Send + 'static> AccessService<F> {
    /// Start the worker and controller threads. Status output arrives on the
    /// returned receiver.
    pub fn spawn<A>(controller: AccessController, analyzer: A) -> Result<(Self, Receiver<Output>)>
    where
        A: FrameAnalyzer<Frame = F>,
    {
        let slot = Arc::new(FrameSlot::new());
        let (msg_tx, msg_rx) = mpsc::channel();
        let (out_tx, out_rx) = mpsc::channel();
        let clock = Clock {
            start: Instant::now(),
        };

        let controller = std::thread::Builder::new()
            .name("facegate-controller".into())
            .spawn(move || run_controller(controller, msg_rx, out_tx, clock))
            .context("spawning controller thread")?;

        let worker_slot = Arc::clone(&slot);
        let worker_tx = msg_tx.clone();
        let worker = match std::thread::Builder::new()
            .name("facegate-frames".into())
            .spawn(move || run_worker(analyzer, worker_slot, worker_tx))
        {
            Ok(handle) => handle,
            Err(e) => {
                let _ = msg_tx.send(Message::Shutdown);
                let _ = controller.join();
                return Err(e).context("spawning frame worker thread");
            }
        };

        log::info!("Access service started");
        Ok((
            Self {
                slot,
                messages: msg_tx,
                worker: Some(worker),
                controller: Some(controller),
            },
            out_rx,
        ))
    }

    /// Hand a frame to the worker. Returns `true` when it replaced a frame
    /// the worker had not started on.
    pub fn submit_frame(&self, frame: F) -> bool {
        self.slot.put(frame)
    }

    pub fn signal(&self, signal: Signal) -> Result<()> {
        self.messages
            .send(Message::Signal(signal))
            .map_err(|_| anyhow::anyhow!("access controller has stopped"))
    }

    /// Frames dropped because a newer one arrived first.
    pub fn superseded_frames(&self) -> u64 {
        self.slot.superseded()
    }

    /// Stop both threads, cancel pending timers and return the controller.
    pub fn shutdown(mut self) -> Result<AccessController> {
        self.stop()?
            .ok_or_else(|| anyhow::anyhow!("access service already stopped"))
    }

    fn stop(&mut self) -> Result<Option<AccessController>> {
        self.slot.close();
        // The controller may already be gone after the end of class.
        let _ = self.messages.send(Message::Shutdown);

        if let Some(worker) = self.worker.take() {
            worker
                .join()
                .map_err(|_| anyhow::anyhow!("frame worker panicked"))?;
        }
        let controller = match self.controller.take() {
            Some(handle) => Some(
                handle
                    .join()
                    .map_err(|_| anyhow::anyhow!("controller thread panicked"))?,
            ),
            None => None,
        };
        log::info!("Access service stopped");
        Ok(controller)
    }
}

impl<F> Drop for AccessService<F> {
    fn drop(&mut self) {
        if self.worker.is_none() && self.controller.is_none() {
            return;
        }
        self.slot.close();
        let _ = self.messages.send(Message::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        if let Some(controller) = self.controller.take() {
            let _ = controller.join();
        }
    }
}

fn run_worker<A: FrameAnalyzer>(
    mut analyzer: A,
    slot: Arc<FrameSlot<A::Frame>>,
    tx: Sender<Message>,
) {
    while let Some(frame) = slot.take() {
        let analysis = analyzer.analyze(frame);
        log::debug!(
            "frame: {} (distance {:.4})",
            analysis.result.label,
            analysis.result.distance
        );
        if tx.send(Message::Frame(analysis)).is_err() {
            break;
        }
    }
}

fn publish(out: &Sender<Output>, updates: Vec<Update>) {
    for update in updates {
        let _ = out.send(Output::Update(update));
    }
}

fn run_controller(
    mut ctl: AccessController,
    rx: Receiver<Message>,
    out: Sender<Output>,
    clock: Clock,
) -> AccessController {
    loop {
        publish(&out, ctl.advance(clock.now()));

        let message = match ctl.next_deadline() {
            Some(deadline) => match rx.recv_timeout(deadline.saturating_sub(clock.now())) {
                Ok(message) => message,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            },
            None => match rx.recv() {
                Ok(message) => message,
                Err(_) => break,
            },
        };

        // Timers that expired while waiting go first.
        let now = clock.now();
        publish(&out, ctl.advance(now));

        match message {
            Message::Frame(analysis) => {
                let _ = out.send(Output::Overlays(analysis.overlays));
                let update = ctl.on_frame(now, &analysis.result);
                let _ = out.send(Output::Update(update));
            }
            Message::Signal(signal) => {
                handle_signal(&mut ctl, now, signal, &out);
                if ctl.is_ended() {
                    break;
                }
            }
            Message::Shutdown => break,
        }
    }

    ctl.shutdown();
    ctl
}

fn handle_signal(ctl: &mut AccessController, now: Duration, signal: Signal, out: &Sender<Output>) {
    let update = match signal {
        Signal::Confirm => ctl.confirm(now),
        Signal::Deny => ctl.deny(now),
        Signal::RequestLock => ctl.request_lock(now),
        Signal::Resume => ctl.resume_after_break(now),
        Signal::TakeBreak => {
            if let Some(handoff) = ctl.take_break(now) {
                let _ = out.send(Output::Handoff(handoff));
            }
            None
        }
        Signal::EndClass => {
            if let Some(handoff) = ctl.end_class(now) {
                let _ = out.send(Output::Handoff(handoff));
            }
            None
        }
    };
    if let Some(update) = update {
        let _ = out.send(Output::Update(update));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_keeps_latest_frame() {
        let slot = FrameSlot::new();
        assert!(!slot.put(1));
        assert!(slot.put(2));
        assert!(slot.put(3));
        assert_eq!(slot.superseded(), 2);
        assert_eq!(slot.take(), Some(3));
    }

    #[test]
    fn test_closed_slot_releases_worker() {
        let slot = Arc::new(FrameSlot::<u32>::new());
        let waiter = {
            let slot = Arc::clone(&slot);
            std::thread::spawn(move || slot.take())
        };
        slot.close();
        assert_eq!(waiter.join().unwrap(), None);
        assert!(!slot.put(5));
    }
}
