//! Camera session lifecycle
//!
//! Owns the currently bound device and enforces that at most one device is
//! open and delivering frame events at any time. Rebinding tears the old
//! device down (handler removed before close) and only then brings the new
//! one up; if opening fails the session is left with no active device.
//!
//! Frame events from a device that was since unbound are a real race: the
//! driver may already be inside its dispatch when the handler is removed.
//! Every installed handler is therefore tagged with the session generation
//! at bind time, and events carrying a stale generation are dropped.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwapOption;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::camera::device::{Camera, CameraError, CameraParameter, FrameHandler, ParamValue};
use crate::camera::frame::Frame;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no active camera")]
    NoActiveCamera,
    #[error("camera is grabbing continuously")]
    AlreadyGrabbing,
    #[error("camera is not grabbing continuously")]
    NotGrabbing,
    #[error(transparent)]
    Device(#[from] CameraError),
}

/// Downstream observer of session frames; wrapped so it can live in an
/// atomically swappable cell.
struct Tap(FrameHandler);

pub struct CameraSession {
    /// Serializes bind/unbind and all device commands.
    active: Mutex<Option<Box<dyn Camera>>>,
    /// Bumped on every bind; stale frame events are identified by it.
    generation: Arc<AtomicU64>,
    /// Latest frame seen by the handler, readable from any thread.
    current: Arc<ArcSwapOption<Frame>>,
    /// Single downstream frame observer (the pipeline controller's tap).
    tap: Arc<ArcSwapOption<Tap>>,
}

impl CameraSession {
    pub fn new() -> Self {
        Self {
            active: Mutex::new(None),
            generation: Arc::new(AtomicU64::new(0)),
            current: Arc::new(ArcSwapOption::empty()),
            tap: Arc::new(ArcSwapOption::empty()),
        }
    }

    /// Swap the bound device. The old device loses its handler before it is
    /// closed; the new one is opened (if needed) before its handler is
    /// installed. Any failure leaves the session unbound.
    pub fn bind(&self, camera: Option<Box<dyn Camera>>) -> Result<(), SessionError> {
        let mut active = self.active.lock().unwrap();

        // Invalidate handlers of the outgoing generation up front so an
        // event already in flight cannot slip through mid-teardown.
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;

        if let Some(mut old) = active.take() {
            old.set_frame_handler(None);
            if old.is_grabbing_continuous() {
                if let Err(e) = old.stop_grab_continuous() {
                    warn!("Stopping grab on {} during rebind failed: {e}", old.name());
                }
            }
            old.close()?;
        }

        let Some(mut camera) = camera else {
            info!("Camera session unbound");
            return Ok(());
        };

        if !camera.is_open() {
            camera.open()?;
        }
        camera.set_frame_handler(Some(self.handler_for(generation)));

        info!("Camera session bound to {}", camera.name());
        *active = Some(camera);
        Ok(())
    }

    /// Equivalent to `bind(None)`.
    pub fn unbind(&self) -> Result<(), SessionError> {
        self.bind(None)
    }

    pub fn is_bound(&self) -> bool {
        self.active.lock().unwrap().is_some()
    }

    pub fn bound_name(&self) -> Option<String> {
        self.active
            .lock()
            .unwrap()
            .as_ref()
            .map(|c| c.name().to_string())
    }

    pub fn is_grabbing_continuous(&self) -> bool {
        self.active
            .lock()
            .unwrap()
            .as_ref()
            .map(|c| c.is_grabbing_continuous())
            .unwrap_or(false)
    }

    /// Start continuous grabbing on the bound device.
    pub fn start_continuous(&self) -> Result<(), SessionError> {
        let mut active = self.active.lock().unwrap();
        let camera = active.as_mut().ok_or(SessionError::NoActiveCamera)?;
        if camera.is_grabbing_continuous() {
            return Err(SessionError::AlreadyGrabbing);
        }
        camera.start_grab_continuous()?;
        info!("Continuous grab started on {}", camera.name());
        Ok(())
    }

    /// Stop continuous grabbing on the bound device.
    pub fn stop_continuous(&self) -> Result<(), SessionError> {
        let mut active = self.active.lock().unwrap();
        let camera = active.as_mut().ok_or(SessionError::NoActiveCamera)?;
        if !camera.is_grabbing_continuous() {
            return Err(SessionError::NotGrabbing);
        }
        camera.stop_grab_continuous()?;
        info!("Continuous grab stopped on {}", camera.name());
        Ok(())
    }

    /// Grab one frame and route it through the same path as continuous
    /// frames (current-frame cell, then tap).
    pub fn grab_single(&self) -> Result<(), SessionError> {
        let mut active = self.active.lock().unwrap();
        let camera = active.as_mut().ok_or(SessionError::NoActiveCamera)?;
        if camera.is_grabbing_continuous() {
            return Err(SessionError::AlreadyGrabbing);
        }
        let frame = camera.grab_single()?;
        self.dispatch(frame);
        Ok(())
    }

    pub fn parameters(&self) -> Result<Vec<CameraParameter>, SessionError> {
        let active = self.active.lock().unwrap();
        let camera = active.as_ref().ok_or(SessionError::NoActiveCamera)?;
        Ok(camera.parameters())
    }

    pub fn set_parameter(&self, name: &str, value: ParamValue) -> Result<(), SessionError> {
        let mut active = self.active.lock().unwrap();
        let camera = active.as_mut().ok_or(SessionError::NoActiveCamera)?;
        camera.set_parameter(name, value)?;
        Ok(())
    }

    pub fn save_parameters(&self, path: &Path) -> Result<(), SessionError> {
        let active = self.active.lock().unwrap();
        let camera = active.as_ref().ok_or(SessionError::NoActiveCamera)?;
        camera.save_parameters(path)?;
        Ok(())
    }

    /// Load parameters from a file. Rejected while grabbing continuously;
    /// applying a parameter set under a live grab is undefined for most
    /// backends.
    pub fn load_parameters(&self, path: &Path) -> Result<(), SessionError> {
        let mut active = self.active.lock().unwrap();
        let camera = active.as_mut().ok_or(SessionError::NoActiveCamera)?;
        if camera.is_grabbing_continuous() {
            return Err(SessionError::AlreadyGrabbing);
        }
        camera.load_parameters(path)?;
        Ok(())
    }

    pub fn save_parameters_to_device(&self) -> Result<(), SessionError> {
        let mut active = self.active.lock().unwrap();
        let camera = active.as_mut().ok_or(SessionError::NoActiveCamera)?;
        camera.save_parameters_to_device()?;
        Ok(())
    }

    /// Latest frame observed by the session, if any.
    pub fn current_frame(&self) -> Option<Arc<Frame>> {
        self.current.load_full()
    }

    /// Install (`Some`) or remove (`None`) the downstream frame observer.
    /// One observer at a time; installing replaces.
    pub fn set_frame_tap(&self, tap: Option<FrameHandler>) {
        self.tap.store(tap.map(|t| Arc::new(Tap(t))));
    }

    fn dispatch(&self, frame: Frame) {
        self.current.store(Some(Arc::new(frame.clone())));
        if let Some(tap) = self.tap.load_full() {
            (tap.0)(frame);
        }
    }

    fn handler_for(&self, generation: u64) -> FrameHandler {
        let session_generation = Arc::clone(&self.generation);
        let current = Arc::clone(&self.current);
        let tap = Arc::clone(&self.tap);

        Arc::new(move |frame: Frame| {
            if session_generation.load(Ordering::Acquire) != generation {
                debug!("Discarding frame event from stale generation {generation}");
                return;
            }
            current.store(Some(Arc::new(frame.clone())));
            if let Some(tap) = tap.load_full() {
                (tap.0)(frame);
            }
        })
    }
}

impl Default for CameraSession {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::frame::test_frame;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct ScriptedState {
        log: Vec<String>,
        handler: Option<FrameHandler>,
        open: bool,
        grabbing: bool,
    }

    /// Test double recording every device call in order.
    #[derive(Clone)]
    struct Shared(Arc<StdMutex<ScriptedState>>);

    impl Shared {
        fn new() -> Self {
            Shared(Arc::new(StdMutex::new(ScriptedState::default())))
        }

        fn log(&self) -> Vec<String> {
            self.0.lock().unwrap().log.clone()
        }

        fn handler(&self) -> Option<FrameHandler> {
            self.0.lock().unwrap().handler.clone()
        }
    }

    struct ScriptedCamera {
        name: &'static str,
        fail_open: bool,
        shared: Shared,
    }

    impl ScriptedCamera {
        fn new(name: &'static str, shared: Shared) -> Box<Self> {
            Box::new(Self {
                name,
                fail_open: false,
                shared,
            })
        }

        fn failing(name: &'static str, shared: Shared) -> Box<Self> {
            Box::new(Self {
                name,
                fail_open: true,
                shared,
            })
        }
    }

    impl Camera for ScriptedCamera {
        fn name(&self) -> &str {
            self.name
        }

        fn open(&mut self) -> Result<(), CameraError> {
            let mut state = self.shared.0.lock().unwrap();
            state.log.push(format!("{}:open", self.name));
            if self.fail_open {
                return Err(CameraError::Device("scripted open failure".into()));
            }
            state.open = true;
            Ok(())
        }

        fn close(&mut self) -> Result<(), CameraError> {
            let mut state = self.shared.0.lock().unwrap();
            state.log.push(format!("{}:close", self.name));
            state.open = false;
            Ok(())
        }

        fn is_open(&self) -> bool {
            self.shared.0.lock().unwrap().open
        }

        fn set_frame_handler(&mut self, handler: Option<FrameHandler>) {
            let mut state = self.shared.0.lock().unwrap();
            let tag = if handler.is_some() { "set" } else { "clear" };
            state.log.push(format!("{}:handler-{tag}", self.name));
            state.handler = handler;
        }

        fn start_grab_continuous(&mut self) -> Result<(), CameraError> {
            let mut state = self.shared.0.lock().unwrap();
            state.log.push(format!("{}:start-grab", self.name));
            state.grabbing = true;
            Ok(())
        }

        fn stop_grab_continuous(&mut self) -> Result<(), CameraError> {
            let mut state = self.shared.0.lock().unwrap();
            state.log.push(format!("{}:stop-grab", self.name));
            state.grabbing = false;
            Ok(())
        }

        fn is_grabbing_continuous(&self) -> bool {
            self.shared.0.lock().unwrap().grabbing
        }

        fn grab_single(&mut self) -> Result<Frame, CameraError> {
            self.shared
                .0
                .lock()
                .unwrap()
                .log
                .push(format!("{}:grab-single", self.name));
            Ok(test_frame(7))
        }

        fn parameters(&self) -> Vec<CameraParameter> {
            Vec::new()
        }

        fn set_parameter(&mut self, name: &str, _value: ParamValue) -> Result<(), CameraError> {
            Err(CameraError::UnknownParameter(name.into()))
        }

        fn save_parameters(&self, _path: &Path) -> Result<(), CameraError> {
            Ok(())
        }

        fn load_parameters(&mut self, _path: &Path) -> Result<(), CameraError> {
            Ok(())
        }

        fn save_parameters_to_device(&mut self) -> Result<(), CameraError> {
            Ok(())
        }
    }

    #[test]
    fn rebind_tears_down_old_before_bringing_up_new() {
        let shared = Shared::new();
        let session = CameraSession::new();

        session
            .bind(Some(ScriptedCamera::new("a", shared.clone())))
            .unwrap();
        session
            .bind(Some(ScriptedCamera::new("b", shared.clone())))
            .unwrap();

        assert_eq!(
            shared.log(),
            vec![
                "a:open",
                "a:handler-set",
                "a:handler-clear",
                "a:close",
                "b:open",
                "b:handler-set",
            ]
        );
        assert_eq!(session.bound_name().as_deref(), Some("b"));
    }

    #[test]
    fn open_failure_leaves_session_unbound() {
        let shared = Shared::new();
        let session = CameraSession::new();

        session
            .bind(Some(ScriptedCamera::new("a", shared.clone())))
            .unwrap();
        let err = session
            .bind(Some(ScriptedCamera::failing("bad", shared.clone())))
            .unwrap_err();

        assert!(matches!(err, SessionError::Device(_)));
        assert!(!session.is_bound());
        assert!(matches!(
            session.grab_single(),
            Err(SessionError::NoActiveCamera)
        ));
    }

    #[test]
    fn unbind_removes_handler_then_closes() {
        let shared = Shared::new();
        let session = CameraSession::new();

        session
            .bind(Some(ScriptedCamera::new("a", shared.clone())))
            .unwrap();
        session.unbind().unwrap();

        assert_eq!(
            shared.log(),
            vec!["a:open", "a:handler-set", "a:handler-clear", "a:close"]
        );
        assert!(!session.is_bound());
    }

    #[test]
    fn stale_generation_frame_is_discarded() {
        let shared = Shared::new();
        let session = CameraSession::new();
        let seen = Arc::new(StdMutex::new(Vec::new()));

        {
            let seen = Arc::clone(&seen);
            session.set_frame_tap(Some(Arc::new(move |frame: Frame| {
                seen.lock().unwrap().push(frame.meta.sequence);
            })));
        }

        session
            .bind(Some(ScriptedCamera::new("a", shared.clone())))
            .unwrap();
        let stale_handler = shared.handler().expect("handler installed");

        // A frame delivered while bound goes through.
        stale_handler(test_frame(1));
        assert_eq!(seen.lock().unwrap().clone(), vec![1]);

        // The same handler raced past unbind: its generation is stale.
        session.unbind().unwrap();
        stale_handler(test_frame(2));
        assert_eq!(seen.lock().unwrap().clone(), vec![1]);
        assert_eq!(session.current_frame().unwrap().meta.sequence, 1);
    }

    #[test]
    fn grab_single_routes_through_tap_and_current_frame() {
        let shared = Shared::new();
        let session = CameraSession::new();
        let seen = Arc::new(StdMutex::new(Vec::new()));

        {
            let seen = Arc::clone(&seen);
            session.set_frame_tap(Some(Arc::new(move |frame: Frame| {
                seen.lock().unwrap().push(frame.meta.sequence);
            })));
        }

        session
            .bind(Some(ScriptedCamera::new("a", shared.clone())))
            .unwrap();
        session.grab_single().unwrap();

        assert_eq!(seen.lock().unwrap().clone(), vec![7]);
        assert_eq!(session.current_frame().unwrap().meta.sequence, 7);
    }

    #[test]
    fn grab_commands_check_preconditions() {
        let shared = Shared::new();
        let session = CameraSession::new();

        assert!(matches!(
            session.start_continuous(),
            Err(SessionError::NoActiveCamera)
        ));
        assert!(matches!(
            session.grab_single(),
            Err(SessionError::NoActiveCamera)
        ));

        session
            .bind(Some(ScriptedCamera::new("a", shared.clone())))
            .unwrap();

        assert!(matches!(
            session.stop_continuous(),
            Err(SessionError::NotGrabbing)
        ));

        session.start_continuous().unwrap();
        assert!(matches!(
            session.start_continuous(),
            Err(SessionError::AlreadyGrabbing)
        ));
        assert!(matches!(
            session.grab_single(),
            Err(SessionError::AlreadyGrabbing)
        ));

        session.stop_continuous().unwrap();
        assert!(matches!(
            session.stop_continuous(),
            Err(SessionError::NotGrabbing)
        ));
    }

    #[test]
    fn rebind_stops_live_grab_on_old_device() {
        let shared = Shared::new();
        let session = CameraSession::new();

        session
            .bind(Some(ScriptedCamera::new("a", shared.clone())))
            .unwrap();
        session.start_continuous().unwrap();
        session
            .bind(Some(ScriptedCamera::new("b", shared.clone())))
            .unwrap();

        let log = shared.log();
        let stop = log.iter().position(|e| e == "a:stop-grab").unwrap();
        let close = log.iter().position(|e| e == "a:close").unwrap();
        let open_b = log.iter().position(|e| e == "b:open").unwrap();
        assert!(stop < close && close < open_b);
    }
}
