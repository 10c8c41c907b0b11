//! Coordinate frame catalog.
//!
//! Fixed transforms between the sensor's world frame (z up), the device and
//! camera frames, and the rendering engine's frames (y up), plus the
//! functions that chain a live device pose through them.

use beacon_types::GuidanceError;
use serde::{Deserialize, Serialize};

use crate::algebra::{FrameId, Matrix4, Pose, Vec3};

/// Below this length the plane basis cross product counts as collinear.
const PLANE_AXIS_EPSILON: f64 = 1e-6;

pub const DEFAULT_NEAR_PLANE: f64 = 0.1;
pub const DEFAULT_FAR_PLANE: f64 = 100.0;

/// Up direction of the sensor world frame.
pub const WORLD_UP: Vec3 = Vec3::new(0.0, 0.0, 1.0);

/// Sensor world (z up) → rendering world (y up): `(x, y, z) ↦ (x, z, −y)`.
pub const RENDER_T_WORLD: Matrix4 = Matrix4::from_rows([
    [1.0, 0.0, 0.0, 0.0],
    [0.0, 0.0, 1.0, 0.0],
    [0.0, -1.0, 0.0, 0.0],
    [0.0, 0.0, 0.0, 1.0],
]);

/// Rendering camera (looks down −z, y up) → colour camera (looks down +z, y down).
pub const COLOR_CAMERA_T_RENDER_CAMERA: Matrix4 = Matrix4::from_rows([
    [1.0, 0.0, 0.0, 0.0],
    [0.0, -1.0, 0.0, 0.0],
    [0.0, 0.0, -1.0, 0.0],
    [0.0, 0.0, 0.0, 1.0],
]);

pub const DEPTH_CAMERA_T_RENDER_CAMERA: Matrix4 = COLOR_CAMERA_T_RENDER_CAMERA;

pub const ROTATION_0: Matrix4 = Matrix4::identity();

pub const ROTATION_90: Matrix4 = Matrix4::from_rows([
    [0.0, 1.0, 0.0, 0.0],
    [-1.0, 0.0, 0.0, 0.0],
    [0.0, 0.0, 1.0, 0.0],
    [0.0, 0.0, 0.0, 1.0],
]);

pub const ROTATION_180: Matrix4 = Matrix4::from_rows([
    [-1.0, 0.0, 0.0, 0.0],
    [0.0, -1.0, 0.0, 0.0],
    [0.0, 0.0, 1.0, 0.0],
    [0.0, 0.0, 0.0, 1.0],
]);

pub const ROTATION_270: Matrix4 = Matrix4::from_rows([
    [0.0, -1.0, 0.0, 0.0],
    [1.0, 0.0, 0.0, 0.0],
    [0.0, 0.0, 1.0, 0.0],
    [0.0, 0.0, 0.0, 1.0],
]);

/// Display rotation reported by the host, in quarter turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ScreenRotation {
    #[default]
    Rotation0,
    Rotation90,
    Rotation180,
    Rotation270,
}

impl ScreenRotation {
    /// Map a host rotation index (0..=3). Unknown indices fall back to 0°.
    pub fn from_index(index: i32) -> Self {
        match index {
            1 => Self::Rotation90,
            2 => Self::Rotation180,
            3 => Self::Rotation270,
            _ => Self::Rotation0,
        }
    }

    pub fn basis(self) -> Matrix4 {
        match self {
            Self::Rotation0 => ROTATION_0,
            Self::Rotation90 => ROTATION_90,
            Self::Rotation180 => ROTATION_180,
            Self::Rotation270 => ROTATION_270,
        }
    }
}

/// Which physical camera a derived pose should be placed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CameraKind {
    Color,
    Depth,
}

impl CameraKind {
    fn render_basis(self) -> &'static Matrix4 {
        match self {
            CameraKind::Color => &COLOR_CAMERA_T_RENDER_CAMERA,
            CameraKind::Depth => &DEPTH_CAMERA_T_RENDER_CAMERA,
        }
    }
}

/// Fixed device → camera transforms for one session.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DeviceExtrinsics {
    pub device_t_color: Matrix4,
    pub device_t_depth: Matrix4,
}

impl DeviceExtrinsics {
    pub fn new(device_t_color: Matrix4, device_t_depth: Matrix4) -> Self {
        Self {
            device_t_color,
            device_t_depth,
        }
    }

    /// Derive the extrinsics from the IMU-relative calibration poses the
    /// platform reports at session start: `device_T_cam = (imu_T_device)⁻¹ · imu_T_cam`.
    pub fn from_imu_poses(
        imu_t_device: &Pose,
        imu_t_color: &Pose,
        imu_t_depth: &Pose,
    ) -> Result<Self, GuidanceError> {
        let device_t_imu = imu_t_device.to_matrix().inverse()?;
        Ok(Self::new(
            device_t_imu.mul(&imu_t_color.to_matrix()),
            device_t_imu.mul(&imu_t_depth.to_matrix()),
        ))
    }

    pub fn device_t(&self, camera: CameraKind) -> &Matrix4 {
        match camera {
            CameraKind::Color => &self.device_t_color,
            CameraKind::Depth => &self.device_t_depth,
        }
    }
}

/// World-frame device pose → rendering-world pose.
///
/// When `rotation_index` is supplied the display rotation basis is applied on
/// the device side; unknown indices use the 0° basis.
pub fn to_render_pose(device_pose: &Pose, rotation_index: Option<i32>) -> Result<Pose, GuidanceError> {
    let mut m = RENDER_T_WORLD.mul(&device_pose.to_matrix());
    if let Some(index) = rotation_index {
        m = m.mul(&ScreenRotation::from_index(index).basis());
    }
    Pose::from_matrix(&m, FrameId::RenderWorld)
}

/// Pose of the rendering camera that sits at `camera` for the given
/// world-frame device pose.
pub fn to_camera_pose(
    device_pose: &Pose,
    extrinsics: &DeviceExtrinsics,
    camera: CameraKind,
) -> Result<Pose, GuidanceError> {
    let m = RENDER_T_WORLD
        .mul(&device_pose.to_matrix())
        .mul(extrinsics.device_t(camera))
        .mul(camera.render_basis());
    Pose::from_matrix(&m, FrameId::RenderCamera)
}

/// Homogeneous transform of a plane whose z axis is `normal`, x axis is
/// perpendicular to `up`, and origin is `point`.
///
/// # Errors
///
/// [`GuidanceError::DegenerateGeometry`] when `normal` is zero or (nearly)
/// parallel to `up`.
pub fn matrix_from_point_normal_up(point: Vec3, normal: Vec3, up: Vec3) -> Result<Matrix4, GuidanceError> {
    let z = normal.normalize()?;
    let x = up.cross(z);
    if x.length() < PLANE_AXIS_EPSILON {
        return Err(GuidanceError::DegenerateGeometry(
            "plane normal is parallel to the up vector".to_string(),
        ));
    }
    let x = x.normalize()?;
    let y = z.cross(x);
    Ok(Matrix4::from_rows([
        [x.x, y.x, z.x, point.x],
        [x.y, y.y, z.y, point.y],
        [x.z, y.z, z.z, point.z],
        [0.0, 0.0, 0.0, 1.0],
    ]))
}

/// Express a plane fitted in the depth camera frame as a world-frame pose.
///
/// `point` and `normal` are in depth camera coordinates; the up reference is
/// [`WORLD_UP`] carried into the depth camera frame at `device_pose`.
pub fn plane_to_world_pose(
    point: Vec3,
    normal: Vec3,
    device_pose: &Pose,
    extrinsics: &DeviceExtrinsics,
) -> Result<Pose, GuidanceError> {
    let world_t_depth = device_pose.to_matrix().mul(&extrinsics.device_t_depth);
    let depth_up = world_t_depth.inverse()?.rotate_vector(WORLD_UP);
    let depth_t_plane = matrix_from_point_normal_up(point, normal, depth_up)?;
    Pose::from_matrix(&world_t_depth.mul(&depth_t_plane), FrameId::World)
}

/// Re-express `point`, given in some sensor frame fixed to the device, in
/// the rendering world.
pub fn point_in_render_frame(point: Vec3, device_t_point_frame: &Matrix4, world_t_device: &Pose) -> Vec3 {
    RENDER_T_WORLD
        .mul(&world_t_device.to_matrix())
        .mul(device_t_point_frame)
        .transform_point(point)
}

/// Pinhole intrinsics of a camera, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    pub width: u32,
    pub height: u32,
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

impl CameraIntrinsics {
    /// OpenGL frustum matching the calibrated camera.
    ///
    /// The colour camera's y axis points down, so the vertical principal
    /// point offset is negated.
    pub fn projection_matrix(&self, near: f64, far: f64) -> Matrix4 {
        let (w, h) = (self.width as f64, self.height as f64);
        let x_scale = near / self.fx;
        let y_scale = near / self.fy;
        let x_offset = (self.cx - w / 2.0) * x_scale;
        let y_offset = -(self.cy - h / 2.0) * y_scale;

        let left = x_scale * -w / 2.0 - x_offset;
        let right = x_scale * w / 2.0 - x_offset;
        let bottom = y_scale * -h / 2.0 - y_offset;
        let top = y_scale * h / 2.0 - y_offset;

        Matrix4::from_rows([
            [2.0 * near / (right - left), 0.0, (right + left) / (right - left), 0.0],
            [0.0, 2.0 * near / (top - bottom), (top + bottom) / (top - bottom), 0.0],
            [
                0.0,
                0.0,
                -(far + near) / (far - near),
                -2.0 * far * near / (far - near),
            ],
            [0.0, 0.0, -1.0, 0.0],
        ])
    }
}
