//! Dedicated consumer thread draining the frame mailbox
//!
//! Exactly one worker runs against a mailbox; the mailbox's wakeup
//! discipline assumes a single consumer. A failing process step is
//! reported to the error sink and the loop moves on to the next frame.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use metrics::counter;
use tracing::{debug, warn};

use crate::camera::frame::Frame;
use crate::pipeline::mailbox::{FrameMailbox, Take};
use crate::pipeline::process::{ErrorSink, ProcessError};

/// Per-frame processing step run by the worker.
pub type ProcessFn = Box<dyn Fn(Frame) -> Result<(), ProcessError> + Send>;

pub struct ProcessingWorker {
    mailbox: Arc<FrameMailbox>,
    cancel: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ProcessingWorker {
    /// Spawn the consumer thread for `mailbox`.
    pub fn spawn(
        mailbox: Arc<FrameMailbox>,
        process: ProcessFn,
        errors: Arc<dyn ErrorSink>,
    ) -> io::Result<Self> {
        let cancel = Arc::new(AtomicBool::new(false));

        let handle = thread::Builder::new().name("frame-worker".into()).spawn({
            let mailbox = Arc::clone(&mailbox);
            let cancel = Arc::clone(&cancel);
            move || worker_loop(&mailbox, &cancel, &process, errors.as_ref())
        })?;

        Ok(Self {
            mailbox,
            cancel,
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Request cancellation, close the mailbox and join the thread. After
    /// this returns no further process call occurs. Idempotent. Must not
    /// be called from the worker thread itself.
    pub fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };

        self.cancel.store(true, Ordering::Release);
        self.mailbox.close();

        if handle.join().is_err() {
            warn!("Frame worker terminated by panic");
        }
    }
}

impl Drop for ProcessingWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(
    mailbox: &FrameMailbox,
    cancel: &AtomicBool,
    process: &ProcessFn,
    errors: &dyn ErrorSink,
) {
    debug!("Frame worker started");

    loop {
        match mailbox.take(cancel) {
            Take::Frame(frame) => match process(frame) {
                Ok(()) => counter!("worker_frames_processed").increment(1),
                Err(e) => {
                    counter!("worker_process_failures").increment(1);
                    errors.report(&e);
                }
            },
            Take::Closed | Take::Cancelled => break,
        }
    }

    debug!("Frame worker exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::frame::test_frame;
    use crate::pipeline::process::test_support::CollectingErrorSink;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;
    use std::time::{Duration, Instant};

    fn wait_until(deadline: Duration, mut done: impl FnMut() -> bool) {
        let end = Instant::now() + deadline;
        while !done() {
            assert!(Instant::now() < end, "condition not reached in time");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn worker_processes_deposited_frames() {
        let mailbox = Arc::new(FrameMailbox::new());
        let (tx, rx) = mpsc::channel();

        let mut worker = ProcessingWorker::spawn(
            Arc::clone(&mailbox),
            Box::new(move |frame| {
                let _ = tx.send(frame.meta.sequence);
                Ok(())
            }),
            Arc::new(CollectingErrorSink::default()),
        )
        .unwrap();

        mailbox.put(test_frame(5));
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), 5);

        worker.stop();
        assert!(!worker.is_running());
    }

    #[test]
    fn no_process_call_after_stop_returns() {
        let mailbox = Arc::new(FrameMailbox::new());
        let processed = Arc::new(AtomicUsize::new(0));

        let mut worker = ProcessingWorker::spawn(
            Arc::clone(&mailbox),
            Box::new({
                let processed = Arc::clone(&processed);
                move |_| {
                    processed.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }),
            Arc::new(CollectingErrorSink::default()),
        )
        .unwrap();

        mailbox.put(test_frame(1));
        wait_until(Duration::from_secs(2), || {
            processed.load(Ordering::SeqCst) == 1
        });

        worker.stop();
        let after_stop = processed.load(Ordering::SeqCst);

        // A burst racing past stop must go nowhere.
        for seq in 0..50u64 {
            mailbox.put(test_frame(seq));
        }
        thread::sleep(Duration::from_millis(100));
        assert_eq!(processed.load(Ordering::SeqCst), after_stop);

        // Second stop is a no-op.
        worker.stop();
    }

    #[test]
    fn failing_process_does_not_kill_the_worker() {
        let mailbox = Arc::new(FrameMailbox::new());
        let errors = Arc::new(CollectingErrorSink::default());

        let mut worker = ProcessingWorker::spawn(
            Arc::clone(&mailbox),
            Box::new(|frame| Err(ProcessError::Failed(format!("frame {}", frame.meta.sequence)))),
            Arc::clone(&errors) as Arc<dyn ErrorSink>,
        )
        .unwrap();

        // Pace the puts so every frame is actually consumed (no supersede),
        // then expect one report per frame.
        for i in 0..5u64 {
            mailbox.put(test_frame(i));
            wait_until(Duration::from_secs(2), || errors.count() == i as usize + 1);
        }

        assert!(worker.is_running());
        worker.stop();
        assert_eq!(errors.count(), 5);
    }

    #[test]
    fn stop_wakes_a_parked_worker() {
        let mailbox = Arc::new(FrameMailbox::new());
        let mut worker = ProcessingWorker::spawn(
            Arc::clone(&mailbox),
            Box::new(|_| Ok(())),
            Arc::new(CollectingErrorSink::default()),
        )
        .unwrap();

        // Worker is parked in take(); stop must return promptly.
        thread::sleep(Duration::from_millis(50));
        let started = Instant::now();
        worker.stop();
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
