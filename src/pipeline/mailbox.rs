//! Single-slot latest-wins handoff between grab thread and worker

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};

use crossbeam::utils::CachePadded;
use metrics::counter;

use crate::camera::frame::Frame;

/// Outcome of [`FrameMailbox::take`].
pub enum Take {
    Frame(Frame),
    Closed,
    Cancelled,
}

#[derive(Default)]
struct Slot {
    frame: Option<Frame>,
    closed: bool,
}

#[derive(Default)]
struct Stats {
    frames_put: AtomicUsize,
    frames_taken: AtomicUsize,
    frames_superseded: AtomicUsize,
    frames_rejected: AtomicUsize,
}

/// Handoff cell between one producer (the grab thread) and one consumer
/// (the processing worker). Capacity is exactly one frame: a newer frame
/// replaces an unclaimed one, older frames are never queued behind it.
pub struct FrameMailbox {
    slot: Mutex<Slot>,
    available: Condvar,
    stats: CachePadded<Stats>,
}

impl FrameMailbox {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot::default()),
            available: Condvar::new(),
            stats: CachePadded::new(Stats::default()),
        }
    }

    /// Producer: deposit a frame. Never blocks. A frame already waiting is
    /// superseded; a frame arriving after `close` is discarded. Wakes at
    /// most one waiting consumer.
    pub fn put(&self, frame: Frame) {
        let mut slot = self.slot.lock().unwrap();

        if slot.closed {
            self.stats.frames_rejected.fetch_add(1, Ordering::Relaxed);
            counter!("mailbox_frames_rejected").increment(1);
            return;
        }

        if slot.frame.replace(frame).is_some() {
            self.stats.frames_superseded.fetch_add(1, Ordering::Relaxed);
            counter!("mailbox_frames_superseded").increment(1);
        }
        self.stats.frames_put.fetch_add(1, Ordering::Relaxed);

        self.available.notify_one();
    }

    /// Consumer: claim the pending frame, blocking until one arrives, the
    /// mailbox closes, or `cancel` is raised. The predicate is re-checked
    /// under the slot mutex on every wakeup, cancellation first.
    ///
    /// `cancel` shares the mailbox's condvar: whoever raises it must follow
    /// up with `close()` so a parked waiter is woken (the worker's stop
    /// path does both).
    pub fn take(&self, cancel: &AtomicBool) -> Take {
        let mut slot = self.slot.lock().unwrap();

        loop {
            if cancel.load(Ordering::Acquire) {
                return Take::Cancelled;
            }
            if let Some(frame) = slot.frame.take() {
                self.stats.frames_taken.fetch_add(1, Ordering::Relaxed);
                return Take::Frame(frame);
            }
            if slot.closed {
                return Take::Closed;
            }
            slot = self.available.wait(slot).unwrap();
        }
    }

    /// Idempotent. After this, `put` discards and every blocked `take`
    /// returns.
    pub fn close(&self) {
        let mut slot = self.slot.lock().unwrap();
        if !slot.closed {
            slot.closed = true;
            self.available.notify_all();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.slot.lock().unwrap().closed
    }

    /// (put, taken, superseded, rejected)
    pub fn stats(&self) -> (usize, usize, usize, usize) {
        (
            self.stats.frames_put.load(Ordering::Relaxed),
            self.stats.frames_taken.load(Ordering::Relaxed),
            self.stats.frames_superseded.load(Ordering::Relaxed),
            self.stats.frames_rejected.load(Ordering::Relaxed),
        )
    }
}

impl Default for FrameMailbox {
    fn default() -> Self {
        Self::new()
    }
}
