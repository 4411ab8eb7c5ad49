//! Camera device boundary
//!
//! The control surface never talks to hardware directly; it drives any
//! implementation of [`Camera`]. Frame delivery is callback-based with
//! single-handler cardinality: a device carries at most one registered
//! handler, and the handler runs synchronously on the device's own grab
//! thread.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::camera::frame::Frame;

/// Frame delivery callback. Invoked on the device's grab thread; must be
/// fast and non-blocking or it stalls the driver's grab loop.
pub type FrameHandler = Arc<dyn Fn(Frame) + Send + Sync>;

#[derive(Debug, Error)]
pub enum CameraError {
    #[error("device is not open")]
    NotOpen,
    #[error("device is grabbing continuously")]
    AlreadyGrabbing,
    #[error("device is not grabbing continuously")]
    NotGrabbing,
    #[error("unknown parameter: {0}")]
    UnknownParameter(String),
    #[error("parameter {0} is read-only")]
    ReadOnlyParameter(String),
    #[error("invalid value for parameter {name}: {reason}")]
    InvalidParameter { name: String, reason: String },
    #[error("device i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Device(String),
}

/// A typed camera parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Size { width: u32, height: u32 },
    Point { x: f64, y: f64 },
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(v) => write!(f, "{v}"),
            ParamValue::Int(v) => write!(f, "{v}"),
            ParamValue::Float(v) => write!(f, "{v}"),
            ParamValue::Text(v) => write!(f, "{v}"),
            ParamValue::Size { width, height } => write!(f, "{width}x{height}"),
            ParamValue::Point { x, y } => write!(f, "({x}, {y})"),
        }
    }
}

/// Descriptor for one device parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraParameter {
    pub name: String,
    pub value: ParamValue,
    /// Allowed values for selection parameters; empty means free-form.
    pub choices: Vec<ParamValue>,
    pub read_only: bool,
}

/// Device abstraction implemented by camera backends.
///
/// Parameter persistence (`save_parameters` / `load_parameters`) is keyed to
/// a file path but the on-disk format belongs entirely to the
/// implementation; `save_parameters_to_device` targets the device-resident
/// store instead.
pub trait Camera: Send {
    fn name(&self) -> &str;

    fn open(&mut self) -> Result<(), CameraError>;
    fn close(&mut self) -> Result<(), CameraError>;
    fn is_open(&self) -> bool;

    /// Register (`Some`) or remove (`None`) the frame handler. Registering
    /// replaces any previous handler.
    fn set_frame_handler(&mut self, handler: Option<FrameHandler>);

    fn start_grab_continuous(&mut self) -> Result<(), CameraError>;
    fn stop_grab_continuous(&mut self) -> Result<(), CameraError>;
    fn is_grabbing_continuous(&self) -> bool;

    /// Grab one frame synchronously. Does not go through the frame handler.
    fn grab_single(&mut self) -> Result<Frame, CameraError>;

    fn parameters(&self) -> Vec<CameraParameter>;
    fn set_parameter(&mut self, name: &str, value: ParamValue) -> Result<(), CameraError>;
    fn save_parameters(&self, path: &Path) -> Result<(), CameraError>;
    fn load_parameters(&mut self, path: &Path) -> Result<(), CameraError>;
    fn save_parameters_to_device(&mut self) -> Result<(), CameraError>;
}
