//! Explicit session context shared by the sensor callback thread and the
//! render thread.
//!
//! In-memory state lives behind one mutex that is only held for short
//! transitions; the platform's blocking connect/disconnect calls are made
//! with the lock released because they can fire callbacks that re-enter
//! this context.  The frame-available signal is a lock-free flag so the
//! render thread never waits on the sensor thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use beacon_hal::platform::{PlatformSession, PoseSample};
use beacon_perception::algebra::Pose;
use beacon_perception::frames::{self, CameraKind, DeviceExtrinsics, ScreenRotation};
use beacon_types::{GuidanceError, SessionFaultKind};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug)]
struct SessionState {
    phase: SessionPhase,
    extrinsics: Option<DeviceExtrinsics>,
    latest_pose: Option<PoseSample>,
    display_rotation: i32,
    last_camera_timestamp: Option<f64>,
    /// Set when `disconnect` arrives while a connect is in flight.
    disconnect_requested: bool,
}

/// What the renderer needs for one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderUpdate {
    pub timestamp: f64,
    /// Rendering camera placed at the colour camera.
    pub camera_pose: Pose,
    /// Device pose in the rendering world with the display rotation applied.
    pub device_pose: Pose,
}

pub struct SessionContext {
    platform: Arc<dyn PlatformSession>,
    state: Mutex<SessionState>,
    frame_available: AtomicBool,
}

impl SessionContext {
    pub fn new(platform: Arc<dyn PlatformSession>) -> Self {
        Self {
            platform,
            state: Mutex::new(SessionState {
                phase: SessionPhase::Disconnected,
                extrinsics: None,
                latest_pose: None,
                display_rotation: 0,
                last_camera_timestamp: None,
                disconnect_requested: false,
            }),
            frame_available: AtomicBool::new(false),
        }
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Bring the platform session up and derive the extrinsics.
    ///
    /// Connecting an already connected session returns the existing
    /// extrinsics.  A failure leaves the context disconnected and is not
    /// retried.  If the platform came up but its calibration is unusable,
    /// or a disconnect was requested meanwhile, the platform is torn down
    /// again before returning.
    pub fn connect(&self) -> Result<DeviceExtrinsics, GuidanceError> {
        {
            let mut state = self.state();
            match state.phase {
                SessionPhase::Connected => {
                    if let Some(extrinsics) = state.extrinsics {
                        return Ok(extrinsics);
                    }
                }
                SessionPhase::Connecting => {
                    return Err(GuidanceError::PlatformSession {
                        kind: SessionFaultKind::Invalid,
                        details: "connect already in progress".to_string(),
                    });
                }
                SessionPhase::Disconnected => {}
            }
            state.phase = SessionPhase::Connecting;
            state.disconnect_requested = false;
        }

        let calibration = match self.platform.connect() {
            Ok(calibration) => calibration,
            Err(e) => {
                self.abandon_connect();
                return Err(e);
            }
        };

        let outcome = {
            let mut state = self.state();
            if state.disconnect_requested {
                Err(GuidanceError::PlatformSession {
                    kind: SessionFaultKind::Invalid,
                    details: "disconnect requested while connecting".to_string(),
                })
            } else {
                calibration.extrinsics().inspect(|extrinsics| {
                    state.phase = SessionPhase::Connected;
                    state.extrinsics = Some(*extrinsics);
                })
            }
        };

        match outcome {
            Ok(extrinsics) => {
                info!("session connected");
                Ok(extrinsics)
            }
            Err(e) => {
                self.abandon_connect();
                if let Err(teardown) = self.platform.disconnect() {
                    warn!(error = %teardown, "platform teardown after failed connect");
                }
                Err(e)
            }
        }
    }

    fn abandon_connect(&self) {
        let mut state = self.state();
        state.phase = SessionPhase::Disconnected;
        state.disconnect_requested = false;
    }

    /// Tear the session down. Disconnecting twice is a no-op.
    ///
    /// During a connect the request is recorded and the in-flight connect
    /// tears the platform down instead of committing.
    pub fn disconnect(&self) -> Result<(), GuidanceError> {
        {
            let mut state = self.state();
            match state.phase {
                SessionPhase::Disconnected => return Ok(()),
                SessionPhase::Connecting => {
                    state.disconnect_requested = true;
                    debug!("disconnect deferred until connect returns");
                    return Ok(());
                }
                SessionPhase::Connected => {}
            }
            state.phase = SessionPhase::Disconnected;
            state.latest_pose = None;
            state.last_camera_timestamp = None;
        }
        self.frame_available.store(false, Ordering::Release);
        self.platform.disconnect()?;
        info!("session disconnected");
        Ok(())
    }

    pub fn phase(&self) -> SessionPhase {
        self.state().phase
    }

    pub fn is_connected(&self) -> bool {
        self.phase() == SessionPhase::Connected
    }

    pub fn extrinsics(&self) -> Option<DeviceExtrinsics> {
        self.state().extrinsics
    }

    /// Pose callback. Samples arriving while disconnected are ignored.
    pub fn on_pose_available(&self, sample: PoseSample) {
        let mut state = self.state();
        if state.phase == SessionPhase::Connected {
            state.latest_pose = Some(sample);
        }
    }

    /// Frame callback. Only the colour camera drives rendering, and only
    /// when the platform advertises it.
    pub fn on_frame_available(&self, camera: CameraKind) {
        if camera == CameraKind::Color && self.platform.cameras().contains(&camera) {
            self.frame_available.store(true, Ordering::Release);
        }
    }

    pub fn set_display_rotation(&self, rotation_index: i32) {
        self.state().display_rotation = rotation_index;
    }

    pub fn display_rotation(&self) -> ScreenRotation {
        ScreenRotation::from_index(self.state().display_rotation)
    }

    pub fn latest_pose(&self) -> Option<PoseSample> {
        self.state().latest_pose
    }

    pub fn last_camera_timestamp(&self) -> Option<f64> {
        self.state().last_camera_timestamp
    }

    /// Render-thread tick.
    ///
    /// Consumes the frame-available flag and, when connected with a valid
    /// pose newer than the last placed camera, yields the poses to draw
    /// with.  Returns `Ok(None)` when there is nothing new to draw.
    pub fn render_tick(&self) -> Result<Option<RenderUpdate>, GuidanceError> {
        if self
            .frame_available
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(None);
        }

        let (sample, extrinsics, rotation) = {
            let state = self.state();
            if state.phase != SessionPhase::Connected {
                return Ok(None);
            }
            match (state.latest_pose, state.extrinsics) {
                (Some(sample), Some(extrinsics)) if sample.is_valid() => {
                    if state.last_camera_timestamp.is_some_and(|last| sample.timestamp <= last) {
                        debug!(t = sample.timestamp, "pose not newer than placed camera");
                        return Ok(None);
                    }
                    (sample, extrinsics, state.display_rotation)
                }
                _ => {
                    debug!("frame available without a valid pose");
                    return Ok(None);
                }
            }
        };

        let device = sample.to_pose();
        let camera_pose = frames::to_camera_pose(&device, &extrinsics, CameraKind::Color)?;
        let device_pose = frames::to_render_pose(&device, Some(rotation))?;

        self.state().last_camera_timestamp = Some(sample.timestamp);
        Ok(Some(RenderUpdate {
            timestamp: sample.timestamp,
            camera_pose,
            device_pose,
        }))
    }
}
