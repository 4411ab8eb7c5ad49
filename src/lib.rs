pub mod camera;
pub mod pipeline;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

use camera::frame::PixelFormat;

/// Global configuration that can be atomically swapped at runtime
pub static CONFIG: once_cell::sync::Lazy<ArcSwap<Config>> =
    once_cell::sync::Lazy::new(|| ArcSwap::from_pointee(Config::default()));

/// System configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub capture: CaptureConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub format: PixelFormat,
    /// Devices exposed by the built-in simulated provider.
    pub sim_devices: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Forward drained frames into the processor.
    pub production: bool,
    /// Report an active tool to the gate.
    pub tool_present: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            capture: CaptureConfig {
                width: 640,
                height: 480,
                fps: 30,
                format: PixelFormat::Mono8,
                sim_devices: 1,
            },
            pipeline: PipelineConfig {
                production: true,
                tool_present: true,
            },
        }
    }
}

impl Config {
    /// Layered load: defaults, then `artemis.toml`, then `ARTEMIS_*`
    /// environment overrides.
    pub fn load() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::Config::try_from(&Config::default())?)
            .add_source(config::File::with_name("artemis").required(false))
            .add_source(config::Environment::with_prefix("ARTEMIS").separator("__"))
            .build()?
            .try_deserialize()
    }
}
