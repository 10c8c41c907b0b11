//! Tracking platform boundary.
//!
//! The platform service delivers pose samples and frame-available signals on
//! its own callback thread.  Bringing the session up and down are blocking
//! calls that may themselves fire callbacks, so callers must not hold any
//! lock of theirs across [`PlatformSession::connect`] or
//! [`PlatformSession::disconnect`].

use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use beacon_perception::algebra::{FrameId, Pose, Quaternion, Vec3};
use beacon_perception::frames::{CameraKind, DeviceExtrinsics};
use beacon_types::{GuidanceError, SessionFaultKind};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Tracking status reported alongside each pose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PoseStatus {
    Initializing,
    Valid,
    Invalid,
    Unknown,
}

/// One pose sample as delivered by the sensor stream.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoseSample {
    pub timestamp: f64,
    pub position: [f64; 3],
    /// `x, y, z, w`.
    pub orientation: [f64; 4],
    pub status: PoseStatus,
}

impl PoseSample {
    pub fn valid(timestamp: f64, position: [f64; 3], orientation: [f64; 4]) -> Self {
        Self {
            timestamp,
            position,
            orientation,
            status: PoseStatus::Valid,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.status == PoseStatus::Valid
    }

    /// World-frame device pose carried by this sample.
    pub fn to_pose(&self) -> Pose {
        Pose::new(
            Vec3::from_array(self.position),
            Quaternion::from_xyzw(self.orientation),
            FrameId::World,
        )
    }
}

/// Fixed calibration poses reported at session start, relative to the IMU.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlatformCalibration {
    pub imu_t_device: Pose,
    pub imu_t_color: Pose,
    pub imu_t_depth: Pose,
}

impl PlatformCalibration {
    pub fn extrinsics(&self) -> Result<DeviceExtrinsics, GuidanceError> {
        DeviceExtrinsics::from_imu_poses(&self.imu_t_device, &self.imu_t_color, &self.imu_t_depth)
    }
}

/// The platform tracking session.
pub trait PlatformSession: Send + Sync {
    /// Start tracking and return the session's calibration poses.
    ///
    /// # Errors
    ///
    /// [`GuidanceError::PlatformSession`] when the service is out of date,
    /// the handle is invalid, or the service reports any other failure.
    fn connect(&self) -> Result<PlatformCalibration, GuidanceError>;

    fn disconnect(&self) -> Result<(), GuidanceError>;

    /// Cameras whose frame-available callbacks this session emits.
    fn cameras(&self) -> &[CameraKind] {
        &[CameraKind::Color]
    }
}

/// In-process platform for headless runs and tests.
///
/// Reports a colour camera 5 cm to the right of the device origin and a
/// depth camera 5 cm to the left.
#[derive(Debug)]
pub struct SimulatedPlatform {
    calibration: PlatformCalibration,
    fault: Mutex<Option<SessionFaultKind>>,
    connects: AtomicU32,
    disconnects: AtomicU32,
}

impl Default for SimulatedPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedPlatform {
    pub fn new() -> Self {
        let imu_pose = |x: f64| Pose::new(Vec3::new(x, 0.0, 0.0), Quaternion::identity(), FrameId::Imu);
        Self {
            calibration: PlatformCalibration {
                imu_t_device: imu_pose(0.0),
                imu_t_color: imu_pose(0.05),
                imu_t_depth: imu_pose(-0.05),
            },
            fault: Mutex::new(None),
            connects: AtomicU32::new(0),
            disconnects: AtomicU32::new(0),
        }
    }

    /// Make every later `connect` fail with `kind`; `None` clears the fault.
    pub fn set_fault(&self, kind: Option<SessionFaultKind>) {
        if let Ok(mut fault) = self.fault.lock() {
            *fault = kind;
        }
    }

    pub fn connect_count(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnect_count(&self) -> u32 {
        self.disconnects.load(Ordering::SeqCst)
    }
}

impl PlatformSession for SimulatedPlatform {
    fn connect(&self) -> Result<PlatformCalibration, GuidanceError> {
        let fault = *self.fault.lock().map_err(|_| GuidanceError::PlatformSession {
            kind: SessionFaultKind::Service,
            details: "simulated platform state poisoned".to_string(),
        })?;
        if let Some(kind) = fault {
            return Err(GuidanceError::PlatformSession {
                kind,
                details: "simulated fault".to_string(),
            });
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        info!("simulated platform connected");
        Ok(self.calibration)
    }

    fn disconnect(&self) -> Result<(), GuidanceError> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        info!("simulated platform disconnected");
        Ok(())
    }
}
