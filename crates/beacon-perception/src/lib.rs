pub mod algebra;
pub mod frames;
pub mod geometry;
pub mod markers;

pub use algebra::{FrameId, Matrix4, Pose, Quaternion, Vec3};
pub use geometry::TargetGeometry;
