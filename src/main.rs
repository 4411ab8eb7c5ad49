//! Artemis camera control demo
//!
//! Wires the simulated provider through discovery, session and pipeline,
//! then streams until ctrl-c.

use std::sync::Arc;
use std::time::{Duration, Instant};

use artemis::camera::{CameraProvider, CameraSession, Frame, SimProvider};
use artemis::pipeline::{
    FrameProcessor, PipelineController, ProcessError, Sample, SampleSink, SampleViewer,
    StaticGate, TracingErrorSink,
};
use artemis::Config;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use tracing::info;

/// Stand-in tool chain: scores a frame by mean intensity.
struct MeanIntensity;

impl FrameProcessor for MeanIntensity {
    fn process(&self, frame: &Frame) -> Result<Sample, ProcessError> {
        let started = Instant::now();
        if frame.data.is_empty() {
            return Err(ProcessError::Rejected("empty frame".into()));
        }

        let sum: u64 = frame.data.iter().map(|&b| u64::from(b)).sum();
        let score = sum as f64 / frame.data.len() as f64 / 255.0;

        Ok(Sample {
            frame: frame.clone(),
            score,
            elapsed: started.elapsed(),
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter("artemis=debug")
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("Artemis launching...");

    // Load configuration
    let config = Config::load()?;
    artemis::CONFIG.store(Arc::new(config.clone()));

    let session = Arc::new(CameraSession::new());
    let gate = Arc::new(StaticGate::new(
        config.pipeline.production,
        config.pipeline.tool_present,
    ));
    let viewer = Arc::new(SampleViewer::new());

    let controller = PipelineController::new(
        Arc::clone(&session),
        Arc::new(MeanIntensity),
        gate,
        Arc::clone(&viewer) as Arc<dyn SampleSink>,
        Arc::new(TracingErrorSink),
    );
    controller.start()?;

    // Discover and bind the first camera
    let providers: Vec<Box<dyn CameraProvider>> =
        vec![Box::new(SimProvider::new(config.capture.sim_devices))];
    let mut found = controller.discover(&providers)?;
    if found.is_empty() {
        return Err(eyre!("No camera discovered"));
    }
    let entry = found.remove(0);
    info!("Binding {} (provider: {})", entry.camera.name(), entry.provider);
    session.bind(Some(entry.camera))?;
    session.start_continuous()?;

    // Report the latest sample once a second while frames stream
    let reporter = tokio::spawn({
        let viewer = Arc::clone(&viewer);
        async move {
            let mut tick = tokio::time::interval(Duration::from_secs(1));
            loop {
                tick.tick().await;
                if let Some(sample) = viewer.current() {
                    info!(
                        "Sample: frame #{} score {:.3} ({} us)",
                        sample.frame.meta.sequence,
                        sample.score,
                        sample.elapsed.as_micros()
                    );
                }
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Artemis shutting down");
    reporter.abort();

    session.stop_continuous()?;
    session.unbind()?;
    controller.stop();
    Ok(())
}
