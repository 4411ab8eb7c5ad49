//! Simulated camera backend
//!
//! Deterministic pattern generator used by the demo binary and the test
//! suite. It behaves like a real backend: frames are emitted from its own
//! grab thread, parameters persist to a file or to the (simulated)
//! device-resident store.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::camera::device::{Camera, CameraError, CameraParameter, FrameHandler, ParamValue};
use crate::camera::discovery::CameraProvider;
use crate::camera::frame::{Frame, FrameMetadata, PixelFormat};

const PATTERNS: [&str; 3] = ["gradient", "bars", "checker"];

/// Adjustable state of the simulated device; doubles as its parameter
/// store on disk (JSON, format owned by this backend).
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SimParams {
    width: u32,
    height: u32,
    fps: u32,
    exposure_ms: f64,
    gain_db: f64,
    pattern: String,
}

impl Default for SimParams {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            fps: 30,
            exposure_ms: 10.0,
            gain_db: 0.0,
            pattern: "gradient".into(),
        }
    }
}

/// State shared with the grab thread.
struct SharedGrab {
    handler: Mutex<Option<FrameHandler>>,
    sequence: AtomicU64,
}

pub struct SimCamera {
    name: String,
    params: SimParams,
    /// Device-resident parameter store, restored on open.
    saved: Option<SimParams>,
    open: bool,
    shared: Arc<SharedGrab>,
    grab_stop: Option<Arc<AtomicBool>>,
    grab_thread: Option<JoinHandle<()>>,
}

impl SimCamera {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: SimParams::default(),
            saved: None,
            open: false,
            shared: Arc::new(SharedGrab {
                handler: Mutex::new(None),
                sequence: AtomicU64::new(0),
            }),
            grab_stop: None,
            grab_thread: None,
        }
    }

    fn halt_grab_thread(&mut self) {
        if let Some(stop) = self.grab_stop.take() {
            stop.store(true, Ordering::Release);
        }
        if let Some(handle) = self.grab_thread.take() {
            let _ = handle.join();
        }
    }
}

fn synth_frame(params: &SimParams, sequence: u64, started: Instant) -> Frame {
    let (w, h) = (params.width as usize, params.height as usize);
    let mut data = vec![0u8; w * h];
    let shift = sequence as usize;

    for y in 0..h {
        let row = &mut data[y * w..(y + 1) * w];
        for (x, px) in row.iter_mut().enumerate() {
            *px = match params.pattern.as_str() {
                "bars" => (((x + shift) / 32) % 2 * 255) as u8,
                "checker" => ((((x + shift) / 16 + y / 16) % 2) * 255) as u8,
                _ => (x + y + shift) as u8,
            };
        }
    }

    Frame {
        data: Bytes::from(data),
        meta: Arc::new(FrameMetadata {
            sequence,
            width: params.width,
            height: params.height,
            stride: params.width,
            format: PixelFormat::Mono8,
            device_timestamp: Some(started.elapsed()),
        }),
        timestamp: Instant::now(),
    }
}

impl Camera for SimCamera {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&mut self) -> Result<(), CameraError> {
        if self.open {
            return Ok(());
        }
        if let Some(saved) = &self.saved {
            self.params = saved.clone();
        }
        self.open = true;
        info!("{} opened", self.name);
        Ok(())
    }

    fn close(&mut self) -> Result<(), CameraError> {
        if !self.open {
            return Ok(());
        }
        self.halt_grab_thread();
        self.open = false;
        info!("{} closed", self.name);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn set_frame_handler(&mut self, handler: Option<FrameHandler>) {
        *self.shared.handler.lock().unwrap() = handler;
    }

    fn start_grab_continuous(&mut self) -> Result<(), CameraError> {
        if !self.open {
            return Err(CameraError::NotOpen);
        }
        if self.grab_thread.is_some() {
            return Err(CameraError::AlreadyGrabbing);
        }

        let stop = Arc::new(AtomicBool::new(false));
        let shared = Arc::clone(&self.shared);
        let params = self.params.clone();
        let period = Duration::from_secs_f64(1.0 / f64::from(params.fps.max(1)));

        let handle = thread::Builder::new()
            .name(format!("{}-grab", self.name))
            .spawn({
                let stop = Arc::clone(&stop);
                move || {
                    let started = Instant::now();
                    while !stop.load(Ordering::Acquire) {
                        let sequence = shared.sequence.fetch_add(1, Ordering::Relaxed) + 1;
                        let frame = synth_frame(&params, sequence, started);
                        let handler = shared.handler.lock().unwrap().clone();
                        if let Some(handler) = handler {
                            handler(frame);
                        }
                        thread::sleep(period);
                    }
                    debug!("grab thread exited");
                }
            })?;

        self.grab_stop = Some(stop);
        self.grab_thread = Some(handle);
        Ok(())
    }

    fn stop_grab_continuous(&mut self) -> Result<(), CameraError> {
        if self.grab_thread.is_none() {
            return Err(CameraError::NotGrabbing);
        }
        self.halt_grab_thread();
        Ok(())
    }

    fn is_grabbing_continuous(&self) -> bool {
        self.grab_thread.is_some()
    }

    fn grab_single(&mut self) -> Result<Frame, CameraError> {
        if !self.open {
            return Err(CameraError::NotOpen);
        }
        if self.grab_thread.is_some() {
            return Err(CameraError::AlreadyGrabbing);
        }
        let sequence = self.shared.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(synth_frame(&self.params, sequence, Instant::now()))
    }

    fn parameters(&self) -> Vec<CameraParameter> {
        vec![
            CameraParameter {
                name: "size".into(),
                value: ParamValue::Size {
                    width: self.params.width,
                    height: self.params.height,
                },
                choices: Vec::new(),
                read_only: false,
            },
            CameraParameter {
                name: "fps".into(),
                value: ParamValue::Int(i64::from(self.params.fps)),
                choices: Vec::new(),
                read_only: false,
            },
            CameraParameter {
                name: "exposure_ms".into(),
                value: ParamValue::Float(self.params.exposure_ms),
                choices: Vec::new(),
                read_only: false,
            },
            CameraParameter {
                name: "gain_db".into(),
                value: ParamValue::Float(self.params.gain_db),
                choices: Vec::new(),
                read_only: false,
            },
            CameraParameter {
                name: "pattern".into(),
                value: ParamValue::Text(self.params.pattern.clone()),
                choices: PATTERNS
                    .iter()
                    .map(|p| ParamValue::Text((*p).into()))
                    .collect(),
                read_only: false,
            },
            CameraParameter {
                name: "model".into(),
                value: ParamValue::Text("artemis-sim".into()),
                choices: Vec::new(),
                read_only: true,
            },
        ]
    }

    fn set_parameter(&mut self, name: &str, value: ParamValue) -> Result<(), CameraError> {
        // The grab thread snapshots parameters at start; no live retuning.
        if self.grab_thread.is_some() {
            return Err(CameraError::AlreadyGrabbing);
        }

        let invalid = |reason: &str| CameraError::InvalidParameter {
            name: name.to_string(),
            reason: reason.to_string(),
        };

        match (name, value) {
            ("size", ParamValue::Size { width, height }) => {
                if width == 0 || height == 0 {
                    return Err(invalid("dimensions must be non-zero"));
                }
                self.params.width = width;
                self.params.height = height;
            }
            ("fps", ParamValue::Int(fps)) => {
                if !(1..=240).contains(&fps) {
                    return Err(invalid("fps must be in 1..=240"));
                }
                self.params.fps = fps as u32;
            }
            ("exposure_ms", ParamValue::Float(v)) => {
                if v <= 0.0 {
                    return Err(invalid("exposure must be positive"));
                }
                self.params.exposure_ms = v;
            }
            ("gain_db", ParamValue::Float(v)) => self.params.gain_db = v,
            ("pattern", ParamValue::Text(p)) => {
                if !PATTERNS.contains(&p.as_str()) {
                    return Err(invalid("unknown pattern"));
                }
                self.params.pattern = p;
            }
            ("model", _) => return Err(CameraError::ReadOnlyParameter(name.into())),
            ("size" | "fps" | "exposure_ms" | "gain_db" | "pattern", _) => {
                return Err(invalid("wrong value type"));
            }
            _ => return Err(CameraError::UnknownParameter(name.into())),
        }
        Ok(())
    }

    fn save_parameters(&self, path: &Path) -> Result<(), CameraError> {
        let json = serde_json::to_vec_pretty(&self.params)
            .map_err(|e| CameraError::Device(format!("encoding parameters: {e}")))?;
        fs::write(path, json)?;
        debug!("{} parameters saved to {}", self.name, path.display());
        Ok(())
    }

    fn load_parameters(&mut self, path: &Path) -> Result<(), CameraError> {
        if self.grab_thread.is_some() {
            return Err(CameraError::AlreadyGrabbing);
        }
        let json = fs::read(path)?;
        self.params = serde_json::from_slice(&json)
            .map_err(|e| CameraError::Device(format!("decoding parameters: {e}")))?;
        debug!("{} parameters loaded from {}", self.name, path.display());
        Ok(())
    }

    fn save_parameters_to_device(&mut self) -> Result<(), CameraError> {
        self.saved = Some(self.params.clone());
        debug!("{} parameters saved to device store", self.name);
        Ok(())
    }
}

impl Drop for SimCamera {
    fn drop(&mut self) {
        self.halt_grab_thread();
    }
}

/// Provider exposing a fixed number of simulated devices.
pub struct SimProvider {
    count: usize,
}

impl SimProvider {
    pub fn new(count: usize) -> Self {
        Self { count }
    }
}

impl CameraProvider for SimProvider {
    fn name(&self) -> &str {
        "simulated"
    }

    fn discover(&self) -> Vec<Box<dyn Camera>> {
        (0..self.count)
            .map(|i| Box::new(SimCamera::new(format!("sim-{i}"))) as Box<dyn Camera>)
            .collect()
    }
}
