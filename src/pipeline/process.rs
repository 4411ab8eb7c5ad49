//! Processing-side boundary contracts
//!
//! The worker hands frames to a [`FrameProcessor`] (the external tool
//! chain), publishes what comes back through a [`SampleSink`] and routes
//! failures to an [`ErrorSink`]. All three are traits so hosts can plug in
//! their own tool chain, viewer and reporting channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use thiserror::Error;
use tracing::error;

use crate::camera::frame::Frame;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("no tool configured")]
    NoTool,
    #[error("pipeline rejected frame: {0}")]
    Rejected(String),
    #[error("processing failed: {0}")]
    Failed(String),
}

/// Result of running one frame through the tool chain.
#[derive(Clone)]
pub struct Sample {
    /// Frame the sample was computed from.
    pub frame: Frame,
    /// Inspection score reported by the tool chain.
    pub score: f64,
    /// Wall time spent inside the processor.
    pub elapsed: Duration,
}

/// External tool chain. May fail on any individual frame; the worker
/// isolates such failures.
pub trait FrameProcessor: Send + Sync {
    fn process(&self, frame: &Frame) -> Result<Sample, ProcessError>;
}

/// Read-only gate consulted before each drained frame is forwarded into
/// the processor.
pub trait ProcessGate: Send + Sync {
    fn production_mode(&self) -> bool;
    fn has_active_tool(&self) -> bool;
}

/// Where processed samples go (e.g. a sample viewer).
pub trait SampleSink: Send + Sync {
    fn publish(&self, sample: Sample);
}

/// User-visible reporting channel for processing failures. Must not block
/// and must be callable from the worker thread.
pub trait ErrorSink: Send + Sync {
    fn report(&self, error: &ProcessError);
}

/// Latest-sample cell for render observers; readable from any thread.
#[derive(Default)]
pub struct SampleViewer {
    current: ArcSwapOption<Sample>,
}

impl SampleViewer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<Arc<Sample>> {
        self.current.load_full()
    }
}

impl SampleSink for SampleViewer {
    fn publish(&self, sample: Sample) {
        self.current.store(Some(Arc::new(sample)));
    }
}

/// Error sink that routes reports to the log.
#[derive(Default)]
pub struct TracingErrorSink;

impl ErrorSink for TracingErrorSink {
    fn report(&self, error: &ProcessError) {
        error!("Processing failed: {error}");
    }
}

/// Gate backed by two flags, flippable at runtime.
pub struct StaticGate {
    production: AtomicBool,
    tool_present: AtomicBool,
}

impl StaticGate {
    pub fn new(production: bool, tool_present: bool) -> Self {
        Self {
            production: AtomicBool::new(production),
            tool_present: AtomicBool::new(tool_present),
        }
    }

    pub fn set_production_mode(&self, on: bool) {
        self.production.store(on, Ordering::Release);
    }

    pub fn set_tool_present(&self, on: bool) {
        self.tool_present.store(on, Ordering::Release);
    }
}

impl ProcessGate for StaticGate {
    fn production_mode(&self) -> bool {
        self.production.load(Ordering::Acquire)
    }

    fn has_active_tool(&self) -> bool {
        self.tool_present.load(Ordering::Acquire)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::frame::test_frame;

    #[test]
    fn sample_viewer_exposes_latest_sample() {
        let viewer = SampleViewer::new();
        assert!(viewer.current().is_none());

        viewer.publish(Sample {
            frame: test_frame(1),
            score: 0.5,
            elapsed: Duration::from_millis(2),
        });
        viewer.publish(Sample {
            frame: test_frame(2),
            score: 0.9,
            elapsed: Duration::from_millis(2),
        });

        let current = viewer.current().unwrap();
        assert_eq!(current.frame.meta.sequence, 2);
        assert!((current.score - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn static_gate_flips_at_runtime() {
        let gate = StaticGate::new(false, true);
        assert!(!gate.production_mode());
        assert!(gate.has_active_tool());

        gate.set_production_mode(true);
        gate.set_tool_present(false);
        assert!(gate.production_mode());
        assert!(!gate.has_active_tool());
    }
}
