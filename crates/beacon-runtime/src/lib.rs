//! `beacon-runtime` – the guidance engine.
//!
//! Turns the tracked device pose and a selected target into continuously
//! updated spatial-audio parameters.
//!
//! # Modules
//!
//! - [`calibration`] – [`CalibrationParameters`][calibration::CalibrationParameters],
//!   the derived [`AudioMapping`][calibration::AudioMapping] (elevation to
//!   pitch, distance to gain) and the live
//!   [`CalibrationEngine`][calibration::CalibrationEngine], plus the
//!   persistent [`CalibrationStore`][calibration::CalibrationStore].
//! - [`guidance_loop`] – [`GuidanceLoop`][guidance_loop::GuidanceLoop]:
//!   per-pose orchestration of geometry, mapping, audio dispatch, telemetry
//!   and event publication.
//! - [`session`] – [`SessionContext`][session::SessionContext]: platform
//!   session lifecycle, latest pose and the render-thread tick.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: the global
//!   `tracing` subscriber with an optional OTLP span exporter.

pub mod calibration;
pub mod guidance_loop;
pub mod session;
pub mod telemetry;

pub use calibration::{AudioMapping, CalibrationEngine, CalibrationParameters, CalibrationStore};
pub use guidance_loop::{GuidanceLoop, GuidanceLoopConfig, GuidanceSample};
pub use session::{RenderUpdate, SessionContext, SessionPhase};
