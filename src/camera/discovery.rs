use tracing::info;

use crate::camera::device::Camera;

/// Discovery backend, typically one per camera vendor SDK or transport.
/// Discovery is synchronous, repeatable and must not disturb devices that
/// are already bound elsewhere.
pub trait CameraProvider: Send {
    fn name(&self) -> &str;
    fn discover(&self) -> Vec<Box<dyn Camera>>;
}

/// A camera found during discovery, tagged with its originating provider.
pub struct DiscoveredCamera {
    pub provider: String,
    pub camera: Box<dyn Camera>,
}

/// Sweep every registered provider and collect what they report.
pub fn discover_all(providers: &[Box<dyn CameraProvider>]) -> Vec<DiscoveredCamera> {
    let mut found = Vec::new();

    for provider in providers {
        let cameras = provider.discover();
        info!(
            "Provider {}: discovered {} camera(s)",
            provider.name(),
            cameras.len()
        );

        found.extend(cameras.into_iter().map(|camera| DiscoveredCamera {
            provider: provider.name().to_string(),
            camera,
        }));
    }

    found
}
