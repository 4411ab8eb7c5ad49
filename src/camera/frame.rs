use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Frame data with zero-copy semantics
#[derive(Clone)]
pub struct Frame {
    /// Immutable frame data - can be shared across threads without copying
    pub data: Bytes,

    /// Frame metadata
    pub meta: Arc<FrameMetadata>,

    /// Capture timestamp for latency tracking
    pub timestamp: Instant,
}

impl Frame {
    /// Time elapsed since the frame was captured.
    pub fn age(&self) -> Duration {
        self.timestamp.elapsed()
    }
}

/// Frame metadata
#[derive(Debug, Clone)]
pub struct FrameMetadata {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub format: PixelFormat,
    pub device_timestamp: Option<Duration>, // Hardware timestamp if available
}

/// Pixel formats we support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    Mono8,
    Rgb24,
    Bgr24,
    Yuyv,
}

impl PixelFormat {
    /// Bytes per pixel for packed formats.
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            PixelFormat::Mono8 => 1,
            PixelFormat::Yuyv => 2,
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => 3,
        }
    }
}

#[cfg(test)]
pub(crate) fn test_frame(sequence: u64) -> Frame {
    Frame {
        data: Bytes::from(vec![sequence as u8; 16]),
        meta: Arc::new(FrameMetadata {
            sequence,
            width: 4,
            height: 4,
            stride: 4,
            format: PixelFormat::Mono8,
            device_timestamp: None,
        }),
        timestamp: Instant::now(),
    }
}
