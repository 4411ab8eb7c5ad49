pub mod device;
pub mod discovery;
pub mod frame;
pub mod session;
pub mod sim;

pub use device::{Camera, CameraError, CameraParameter, FrameHandler, ParamValue};
pub use discovery::{discover_all, CameraProvider, DiscoveredCamera};
pub use frame::{Frame, FrameMetadata, PixelFormat};
pub use session::{CameraSession, SessionError};
pub use sim::{SimCamera, SimProvider};
