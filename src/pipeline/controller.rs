//! Pipeline lifecycle orchestration
//!
//! Ties the camera session to the processing worker: start wires the
//! session's frame tap into a fresh mailbox and spawns the worker; stop
//! unwires the tap, closes the mailbox and joins the worker. The gate is
//! consulted per frame, after the drain, so delivery never stalls while
//! the host is out of production mode or has no tool configured.

use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::{debug, info};

use crate::camera::device::FrameHandler;
use crate::camera::discovery::{discover_all, CameraProvider, DiscoveredCamera};
use crate::camera::frame::Frame;
use crate::camera::session::{CameraSession, SessionError};
use crate::pipeline::mailbox::FrameMailbox;
use crate::pipeline::process::{ErrorSink, FrameProcessor, ProcessGate, SampleSink};
use crate::pipeline::worker::{ProcessFn, ProcessingWorker};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Uninitialized,
    Active,
    ShuttingDown,
    Terminated,
}

struct Inner {
    state: PipelineState,
    mailbox: Option<Arc<FrameMailbox>>,
    worker: Option<ProcessingWorker>,
}

pub struct PipelineController {
    session: Arc<CameraSession>,
    processor: Arc<dyn FrameProcessor>,
    gate: Arc<dyn ProcessGate>,
    samples: Arc<dyn SampleSink>,
    errors: Arc<dyn ErrorSink>,
    inner: Mutex<Inner>,
}

impl PipelineController {
    pub fn new(
        session: Arc<CameraSession>,
        processor: Arc<dyn FrameProcessor>,
        gate: Arc<dyn ProcessGate>,
        samples: Arc<dyn SampleSink>,
        errors: Arc<dyn ErrorSink>,
    ) -> Self {
        Self {
            session,
            processor,
            gate,
            samples,
            errors,
            inner: Mutex::new(Inner {
                state: PipelineState::Uninitialized,
                mailbox: None,
                worker: None,
            }),
        }
    }

    pub fn state(&self) -> PipelineState {
        self.inner.lock().unwrap().state
    }

    /// Bring the pipeline up: mailbox, worker thread, session frame tap.
    /// No-op when already active or already torn down.
    pub fn start(&self) -> Result<(), PipelineError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.state != PipelineState::Uninitialized {
            debug!("Pipeline start ignored in state {:?}", inner.state);
            return Ok(());
        }

        let mailbox = Arc::new(FrameMailbox::new());
        let worker = ProcessingWorker::spawn(
            Arc::clone(&mailbox),
            self.process_step(),
            Arc::clone(&self.errors),
        )?;

        let tap: FrameHandler = {
            let mailbox = Arc::clone(&mailbox);
            Arc::new(move |frame: Frame| mailbox.put(frame))
        };
        self.session.set_frame_tap(Some(tap));

        inner.mailbox = Some(mailbox);
        inner.worker = Some(worker);
        inner.state = PipelineState::Active;
        info!("Pipeline active");
        Ok(())
    }

    /// Tear the pipeline down and join the worker. Idempotent. Must not be
    /// called from the worker thread.
    pub fn stop(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.state != PipelineState::Active {
            debug!("Pipeline stop ignored in state {:?}", inner.state);
            return;
        }
        inner.state = PipelineState::ShuttingDown;

        self.session.set_frame_tap(None);
        if let Some(mut worker) = inner.worker.take() {
            worker.stop();
        }
        inner.mailbox = None;

        inner.state = PipelineState::Terminated;
        info!("Pipeline terminated");
    }

    /// Sweep all providers for cameras, pausing a continuous grab first so
    /// discovery cannot race a live stream on the bound device.
    pub fn discover(
        &self,
        providers: &[Box<dyn CameraProvider>],
    ) -> Result<Vec<DiscoveredCamera>, SessionError> {
        if self.session.is_grabbing_continuous() {
            self.session.stop_continuous()?;
        }
        Ok(discover_all(providers))
    }

    pub fn session(&self) -> &CameraSession {
        &self.session
    }

    /// Mailbox counters (put, taken, superseded, rejected) while active.
    pub fn mailbox_stats(&self) -> Option<(usize, usize, usize, usize)> {
        let inner = self.inner.lock().unwrap();
        inner.mailbox.as_ref().map(|m| m.stats())
    }

    /// The per-frame step run on the worker thread: consult the gate, then
    /// process and publish. A gated-off frame is still drained, just not
    /// forwarded.
    fn process_step(&self) -> ProcessFn {
        let gate = Arc::clone(&self.gate);
        let processor = Arc::clone(&self.processor);
        let samples = Arc::clone(&self.samples);

        Box::new(move |frame: Frame| {
            if !gate.production_mode() || !gate.has_active_tool() {
                return Ok(());
            }
            let sample = processor.process(&frame)?;
            samples.publish(sample);
            Ok(())
        })
    }
}
