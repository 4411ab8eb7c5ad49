pub mod controller;
pub mod mailbox;
pub mod process;
pub mod worker;

pub use controller::{PipelineController, PipelineError, PipelineState};
pub use mailbox::{FrameMailbox, Take};
pub use process::{
    ErrorSink, FrameProcessor, ProcessError, ProcessGate, Sample, SampleSink, SampleViewer,
    StaticGate, TracingErrorSink,
};
pub use worker::{ProcessFn, ProcessingWorker};
