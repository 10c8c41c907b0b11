use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Why the platform tracking session could not be brought up or kept alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionFaultKind {
    /// The platform tracking service is older than the client requires.
    OutOfDate,
    /// The session handle was used after it became invalid.
    Invalid,
    /// Any other error reported by the platform service.
    Service,
}

impl std::fmt::Display for SessionFaultKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionFaultKind::OutOfDate => write!(f, "out-of-date"),
            SessionFaultKind::Invalid => write!(f, "invalid"),
            SessionFaultKind::Service => write!(f, "service"),
        }
    }
}

/// Unified event wrapper for the guidance event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g., "beacon-runtime::guidance"
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    /// Wrap `payload` in a freshly stamped envelope.
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Variants of data that can be routed over the internal event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    /// One guidance sample flattened into its telemetry record.
    Telemetry(TelemetryRecord),
    /// The world-frame target the user is guided toward has changed.
    TargetChanged { x: f64, y: f64, z: f64 },
    /// A pose sample arrived with an invalid tracking status.
    TrackingLost { timestamp: f64 },
    /// The platform session failed and must be torn down.
    SessionFault {
        kind: SessionFaultKind,
        message: String,
    },
}

/// Flat per-sample record streamed to the telemetry sink.
///
/// Field order matches the comma-delimited wire format produced by
/// [`TelemetryRecord::to_csv_line`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub timestamp: f64,
    pub position: [f64; 3],
    /// Device orientation as `x, y, z, w`.
    pub rotation: [f64; 4],
    pub distance_to_target: f64,
    pub vibration_intensity: f64,
    pub gain: f64,
    pub pitch: f64,
    pub target: [f64; 3],
}

impl TelemetryRecord {
    const DELIMITER: &'static str = ",";

    /// Render the record as one newline-terminated CSV line:
    ///
    /// `timestamp,posX,posY,posZ,rotX,rotY,rotZ,rotW,distanceToTarget,vibrationIntensity,gain,pitch,targetX,targetY,targetZ`
    pub fn to_csv_line(&self) -> String {
        let fields: Vec<String> = std::iter::once(self.timestamp)
            .chain(self.position)
            .chain(self.rotation)
            .chain([
                self.distance_to_target,
                self.vibration_intensity,
                self.gain,
                self.pitch,
            ])
            .chain(self.target)
            .map(|v| v.to_string())
            .collect();
        let mut line = fields.join(Self::DELIMITER);
        line.push('\n');
        line
    }
}

/// Global error type spanning degenerate geometry, tracking loss, transport
/// failures, and platform session faults.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GuidanceError {
    #[error("Degenerate geometry: {0}")]
    DegenerateGeometry(String),

    #[error("Tracking lost at t={timestamp}")]
    TrackingLost { timestamp: f64 },

    #[error("Telemetry transport error: {0}")]
    Transport(String),

    #[error("Platform session error ({kind}): {details}")]
    PlatformSession {
        kind: SessionFaultKind,
        details: String,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Calibration storage error: {0}")]
    Storage(String),

    #[error("Channel error: {0}")]
    Channel(String),
}

impl GuidanceError {
    /// `true` for the per-sample errors that only drop the current guidance
    /// tick and leave the stream running.
    pub fn is_per_sample(&self) -> bool {
        matches!(
            self,
            GuidanceError::DegenerateGeometry(_) | GuidanceError::TrackingLost { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> TelemetryRecord {
        TelemetryRecord {
            timestamp: 12.5,
            position: [1.0, 2.0, 3.0],
            rotation: [0.0, 0.0, 0.0, 1.0],
            distance_to_target: 5.0,
            vibration_intensity: 0.0,
            gain: 0.75,
            pitch: 512.0,
            target: [0.0, 5.0, -1.5],
        }
    }

    #[test]
    fn csv_line_has_fifteen_fields_and_newline() {
        let line = sample_record().to_csv_line();
        assert!(line.ends_with('\n'));
        let fields: Vec<&str> = line.trim_end().split(',').collect();
        assert_eq!(fields.len(), 15);
        assert_eq!(fields[0], "12.5");
        assert_eq!(fields[7], "1");
        assert_eq!(fields[10], "0.75");
        assert_eq!(fields[11], "512");
        assert_eq!(fields[14], "-1.5");
    }

    #[test]
    fn event_roundtrip() {
        let event = Event::new(
            "beacon-runtime::guidance",
            EventPayload::Telemetry(sample_record()),
        );
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(event.id, back.id);
        assert_eq!(event.source, back.source);
        match back.payload {
            EventPayload::Telemetry(rec) => assert_eq!(rec, sample_record()),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn guidance_error_display() {
        let err = GuidanceError::PlatformSession {
            kind: SessionFaultKind::OutOfDate,
            details: "service too old".to_string(),
        };
        assert!(err.to_string().contains("out-of-date"));
        assert!(err.to_string().contains("service too old"));

        let err2 = GuidanceError::TrackingLost { timestamp: 3.0 };
        assert!(err2.to_string().contains("t=3"));
    }

    #[test]
    fn only_geometry_and_tracking_are_per_sample() {
        assert!(GuidanceError::DegenerateGeometry("zero".into()).is_per_sample());
        assert!(GuidanceError::TrackingLost { timestamp: 0.0 }.is_per_sample());
        assert!(!GuidanceError::Transport("refused".into()).is_per_sample());
        assert!(!GuidanceError::Configuration("bad".into()).is_per_sample());
    }
}
