//! `beacon-hal` – boundaries between the guidance core and the outside world.
//!
//! # Modules
//!
//! - [`audio`] – the native audio synthesis boundary and a coalescing
//!   dispatcher that always delivers the latest parameters.
//! - [`telemetry_link`] – best-effort line transport for per-sample records
//!   with a drop-if-busy dispatcher.
//! - [`platform`] – the tracking platform session (connect / disconnect,
//!   calibration poses) and its sensor sample types, plus a simulated
//!   platform for headless hosts and tests.

pub mod audio;
pub mod platform;
pub mod telemetry_link;

pub use audio::{AudioBoundary, AudioCommand, AudioDispatcher, LoggingAudio};
pub use platform::{PlatformCalibration, PlatformSession, PoseSample, PoseStatus, SimulatedPlatform};
pub use telemetry_link::{TcpTelemetryTransport, TelemetryDispatcher, TelemetryStats, TelemetryTransport};
