//! [`GuidanceLoop`] – per-pose orchestration.
//!
//! Every pose sample drives one pass:
//!
//! 1. **Target** – read the current world-frame target (eventually
//!    consistent with concurrent target changes).
//! 2. **Geometry** – elevation, bearing offset and distance via
//!    [`TargetGeometry::compute`].
//! 3. **Mapping** – pitch and gain from the live [`AudioMapping`] snapshot.
//! 4. **Dispatch** – the coalescing audio dispatcher, the drop-if-busy
//!    telemetry link and the event bus.
//!
//! A sample with lost tracking, or one whose geometry degenerates, is
//! dropped: nothing is dispatched and the previous audio parameters stay in
//! force.  No per-sample error ever escapes to the sensor callback.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use beacon_hal::{AudioDispatcher, LoggingAudio, PoseSample};
//! use beacon_middleware::EventBus;
//! use beacon_perception::Vec3;
//! use beacon_runtime::calibration::{CalibrationEngine, CalibrationParameters};
//! use beacon_runtime::guidance_loop::{GuidanceLoop, GuidanceLoopConfig};
//!
//! # async fn run() -> Result<(), beacon_types::GuidanceError> {
//! let audio = AudioDispatcher::spawn(Arc::new(LoggingAudio), &tokio::runtime::Handle::current())?;
//! let calibration = Arc::new(CalibrationEngine::new(CalibrationParameters::default())?);
//! let guidance = GuidanceLoop::new(GuidanceLoopConfig::default(), calibration, audio, None, EventBus::default());
//!
//! guidance.on_target_changed(Vec3::new(0.0, 5.0, 0.0));
//! let sample = guidance.on_pose(&PoseSample::valid(0.0, [0.0; 3], [0.0, 0.0, 0.0, 1.0]));
//! assert!(sample.is_some());
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use beacon_hal::audio::{AudioCommand, AudioDispatcher};
use beacon_hal::platform::PoseSample;
use beacon_hal::telemetry_link::TelemetryDispatcher;
use beacon_middleware::{EventBus, Topic};
use beacon_perception::algebra::{Pose, Vec3};
use beacon_perception::geometry::TargetGeometry;
use beacon_types::{Event, EventPayload, GuidanceError, SessionFaultKind, TelemetryRecord};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info_span, trace, warn};

use crate::calibration::{AudioMapping, CalibrationEngine};

/// Configuration bundle for [`GuidanceLoop`].
#[derive(Debug, Clone)]
pub struct GuidanceLoopConfig {
    /// `source` stamped on every event this loop publishes.
    pub event_source: String,
    /// Stream a telemetry record per sample when a dispatcher is attached.
    pub telemetry_enabled: bool,
}

impl Default for GuidanceLoopConfig {
    fn default() -> Self {
        Self {
            event_source: "beacon-runtime::guidance".to_string(),
            telemetry_enabled: true,
        }
    }
}

/// One immutable guidance result.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GuidanceSample {
    pub timestamp: f64,
    pub device_pose: Pose,
    pub target: Vec3,
    pub distance: f64,
    pub elevation: f64,
    pub bearing_offset: f64,
    pub pitch: f64,
    pub gain: f64,
}

impl GuidanceSample {
    /// Compute the sample for a valid pose.
    ///
    /// # Errors
    ///
    /// [`GuidanceError::TrackingLost`] for a sample whose status is not
    /// valid, [`GuidanceError::DegenerateGeometry`] when no direction to the
    /// target exists.
    pub fn compute(sample: &PoseSample, target: Vec3, mapping: &AudioMapping) -> Result<Self, GuidanceError> {
        if !sample.is_valid() {
            return Err(GuidanceError::TrackingLost {
                timestamp: sample.timestamp,
            });
        }
        let device_pose = sample.to_pose();
        let geometry = TargetGeometry::compute(&device_pose, target)?;
        Ok(Self {
            timestamp: sample.timestamp,
            device_pose,
            target,
            distance: geometry.distance,
            elevation: geometry.elevation,
            bearing_offset: geometry.bearing_offset,
            pitch: mapping.pitch(geometry.elevation),
            gain: mapping.gain(geometry.distance),
        })
    }

    /// Synthesizer parameters: the source sits at the target, the listener
    /// at the device, with the lateral axis carrying the bearing offset.
    pub fn audio_command(&self) -> AudioCommand {
        let source = self.target.to_array().map(|v| v as f32);
        let mut listener = self.device_pose.position.to_array().map(|v| v as f32);
        listener[0] = self.bearing_offset as f32;
        AudioCommand {
            source,
            listener,
            gain: self.gain as f32,
            pitch: self.pitch as f32,
        }
    }

    pub fn telemetry_record(&self, vibration_intensity: f64) -> TelemetryRecord {
        TelemetryRecord {
            timestamp: self.timestamp,
            position: self.device_pose.position.to_array(),
            rotation: self.device_pose.orientation.to_xyzw(),
            distance_to_target: self.distance,
            vibration_intensity,
            gain: self.gain,
            pitch: self.pitch,
            target: self.target.to_array(),
        }
    }
}

/// Per-loop counters.
#[derive(Debug, Default)]
pub struct GuidanceStats {
    pub processed: AtomicU64,
    pub tracking_lost: AtomicU64,
    pub degenerate: AtomicU64,
}

/// The guidance orchestrator.
///
/// All entry points take `&self` so the loop can be shared between the
/// sensor callback thread and the host behind an `Arc`.
pub struct GuidanceLoop {
    config: GuidanceLoopConfig,
    calibration: Arc<CalibrationEngine>,
    audio: AudioDispatcher,
    telemetry: Option<TelemetryDispatcher>,
    bus: EventBus,
    target: RwLock<Option<Vec3>>,
    last_sample: Mutex<Option<GuidanceSample>>,
    /// f64 bits of the host-supplied haptic intensity.
    vibration_intensity: AtomicU64,
    stats: GuidanceStats,
}

impl GuidanceLoop {
    pub fn new(
        config: GuidanceLoopConfig,
        calibration: Arc<CalibrationEngine>,
        audio: AudioDispatcher,
        telemetry: Option<TelemetryDispatcher>,
        bus: EventBus,
    ) -> Self {
        Self {
            config,
            calibration,
            audio,
            telemetry,
            bus,
            target: RwLock::new(None),
            last_sample: Mutex::new(None),
            vibration_intensity: AtomicU64::new(0f64.to_bits()),
            stats: GuidanceStats::default(),
        }
    }

    /// Select the world-frame position to guide toward.
    pub fn on_target_changed(&self, target: Vec3) {
        *self.target.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(target);
        debug!(x = target.x, y = target.y, z = target.z, "target changed");
        self.publish(
            Topic::Targets,
            EventPayload::TargetChanged {
                x: target.x,
                y: target.y,
                z: target.z,
            },
        );
    }

    pub fn target(&self) -> Option<Vec3> {
        *self.target.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run one guidance pass for `sample`.
    ///
    /// Returns the new sample, or `None` when it was dropped (no target yet,
    /// tracking lost, degenerate geometry).
    pub fn on_pose(&self, sample: &PoseSample) -> Option<GuidanceSample> {
        let span = info_span!("guidance_pass", t = sample.timestamp);
        let _enter = span.enter();

        let Some(target) = self.target() else {
            trace!("no target selected");
            return None;
        };
        let mapping = self.calibration.snapshot();

        match GuidanceSample::compute(sample, target, &mapping) {
            Ok(guidance) => {
                self.dispatch(&guidance);
                *self.last_sample.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(guidance);
                self.stats.processed.fetch_add(1, Ordering::Relaxed);
                Some(guidance)
            }
            Err(GuidanceError::TrackingLost { timestamp }) => {
                self.stats.tracking_lost.fetch_add(1, Ordering::Relaxed);
                debug!(timestamp, "tracking lost; keeping previous audio");
                self.publish(Topic::SystemAlerts, EventPayload::TrackingLost { timestamp });
                None
            }
            Err(e) if e.is_per_sample() => {
                self.stats.degenerate.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "guidance sample dropped");
                None
            }
            Err(e) => {
                error!(error = %e, "guidance pass failed");
                self.publish(
                    Topic::SystemAlerts,
                    EventPayload::SessionFault {
                        kind: SessionFaultKind::Service,
                        message: e.to_string(),
                    },
                );
                None
            }
        }
    }

    fn dispatch(&self, guidance: &GuidanceSample) {
        self.audio.dispatch(guidance.audio_command());

        let record = guidance.telemetry_record(self.vibration_intensity());
        if self.config.telemetry_enabled {
            if let Some(telemetry) = &self.telemetry {
                telemetry.dispatch(&record);
            }
        }
        self.publish(Topic::Telemetry, EventPayload::Telemetry(record));
    }

    fn publish(&self, topic: Topic, payload: EventPayload) {
        // No subscribers is normal for headless hosts.
        let _ = self
            .bus
            .publish_to(topic, Event::new(self.config.event_source.clone(), payload));
    }

    /// The last sample that reached the audio boundary.
    pub fn last_sample(&self) -> Option<GuidanceSample> {
        *self.last_sample.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_vibration_intensity(&self, intensity: f64) {
        self.vibration_intensity.store(intensity.to_bits(), Ordering::Relaxed);
    }

    pub fn vibration_intensity(&self) -> f64 {
        f64::from_bits(self.vibration_intensity.load(Ordering::Relaxed))
    }

    pub fn calibration(&self) -> &Arc<CalibrationEngine> {
        &self.calibration
    }

    pub fn telemetry(&self) -> Option<&TelemetryDispatcher> {
        self.telemetry.as_ref()
    }

    pub fn stats(&self) -> &GuidanceStats {
        &self.stats
    }

    pub fn bus(&self) -> EventBus {
        self.bus.clone()
    }

    /// Stop producing samples and let the audio call in flight finish.
    pub async fn shutdown(self) {
        self.audio.shutdown().await;
    }
}
