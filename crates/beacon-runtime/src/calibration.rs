//! Calibration & mapping engine.
//!
//! Turns target geometry into synthesizer parameters:
//!
//! * **pitch** – a saturating log-linear sweep over elevation, so equal
//!   angular steps sound like equal musical intervals;
//! * **gain** – a saturating linear ramp over absolute distance.
//!
//! The active curves live in an immutable [`AudioMapping`].  The
//! [`CalibrationEngine`] swaps whole snapshots, so a reader on the guidance
//! path sees either the old limits or the new ones, never a mix.
//!
//! # Example
//!
//! ```rust
//! use beacon_runtime::calibration::{AudioMapping, CalibrationParameters};
//!
//! let mapping = AudioMapping::new(CalibrationParameters::default()).unwrap();
//! // Level target: pitch sits halfway between 2^7 and 2^11 in octaves.
//! assert!((mapping.pitch(0.0) - 512.0).abs() < 1e-9);
//! assert!((mapping.gain(6.0) - 1.0).abs() < 1e-12);
//! ```

use std::collections::BTreeMap;
use std::f64::consts::{FRAC_PI_2, PI};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use beacon_types::GuidanceError;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Persisted calibration limits.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationParameters {
    /// Upper pitch limit, in octaves (`pitch = 2^limit`).
    pub pitch_high_limit: f64,
    pub pitch_low_limit: f64,
    pub gain_high_limit: f64,
    pub gain_low_limit: f64,
    pub pitch_distance_high_limit: f64,
    pub pitch_distance_low_limit: f64,
    /// Distance at and beyond which gain saturates at `gain_high_limit`.
    pub gain_distance_high_limit: f64,
    /// Distance at and below which gain saturates at `gain_low_limit`.
    pub gain_distance_low_limit: f64,
    pub vibration_delay_ms: u64,
    /// Obstacle proximity alert distance.
    pub distance_threshold: f64,
    pub voice_timing_ms: u64,
}

impl Default for CalibrationParameters {
    fn default() -> Self {
        Self {
            pitch_high_limit: 11.0,
            pitch_low_limit: 7.0,
            gain_high_limit: 1.0,
            gain_low_limit: 0.5,
            pitch_distance_high_limit: 4.0,
            pitch_distance_low_limit: -4.0,
            gain_distance_high_limit: 6.0,
            gain_distance_low_limit: 0.0,
            vibration_delay_ms: 60,
            distance_threshold: 1.15,
            voice_timing_ms: 5000,
        }
    }
}

type Field = (
    &'static str,
    fn(&CalibrationParameters) -> f64,
    fn(&mut CalibrationParameters, f64),
);

/// Storage keys, in persisted order.
const FIELDS: [Field; 11] = [
    ("pitch_high_limit", |p| p.pitch_high_limit, |p, v| p.pitch_high_limit = v),
    ("pitch_low_limit", |p| p.pitch_low_limit, |p, v| p.pitch_low_limit = v),
    ("gain_high_limit", |p| p.gain_high_limit, |p, v| p.gain_high_limit = v),
    ("gain_low_limit", |p| p.gain_low_limit, |p, v| p.gain_low_limit = v),
    (
        "pitch_distance_high_limit",
        |p| p.pitch_distance_high_limit,
        |p, v| p.pitch_distance_high_limit = v,
    ),
    (
        "pitch_distance_low_limit",
        |p| p.pitch_distance_low_limit,
        |p, v| p.pitch_distance_low_limit = v,
    ),
    (
        "gain_distance_high_limit",
        |p| p.gain_distance_high_limit,
        |p, v| p.gain_distance_high_limit = v,
    ),
    (
        "gain_distance_low_limit",
        |p| p.gain_distance_low_limit,
        |p, v| p.gain_distance_low_limit = v,
    ),
    (
        "vibration_delay_ms",
        |p| p.vibration_delay_ms as f64,
        |p, v| p.vibration_delay_ms = v.max(0.0) as u64,
    ),
    ("distance_threshold", |p| p.distance_threshold, |p, v| p.distance_threshold = v),
    (
        "voice_timing_ms",
        |p| p.voice_timing_ms as f64,
        |p, v| p.voice_timing_ms = v.max(0.0) as u64,
    ),
];

impl CalibrationParameters {
    /// Reject limits that would make the curves divide by zero or go NaN.
    pub fn validate(&self) -> Result<(), GuidanceError> {
        for (key, get, _) in FIELDS {
            let value = get(self);
            if !value.is_finite() {
                return Err(GuidanceError::Configuration(format!("{key} is not finite ({value})")));
            }
        }
        let pairs = [
            ("pitch", self.pitch_low_limit, self.pitch_high_limit),
            ("gain", self.gain_low_limit, self.gain_high_limit),
            ("pitch distance", self.pitch_distance_low_limit, self.pitch_distance_high_limit),
            ("gain distance", self.gain_distance_low_limit, self.gain_distance_high_limit),
        ];
        for (name, low, high) in pairs {
            if low == high {
                return Err(GuidanceError::Configuration(format!(
                    "{name} limits are degenerate: low == high == {low}"
                )));
            }
        }
        Ok(())
    }

    /// Flatten into storage key/value pairs.
    pub fn to_entries(&self) -> BTreeMap<String, f64> {
        FIELDS
            .iter()
            .map(|(key, get, _)| (key.to_string(), get(self)))
            .collect()
    }

    /// Read from storage entries, using defaults for absent keys.
    ///
    /// Also returns the keys that were absent.
    pub fn from_entries(entries: &BTreeMap<String, f64>) -> (Self, Vec<&'static str>) {
        let mut params = Self::default();
        let mut missing = Vec::new();
        for (key, _, set) in FIELDS {
            match entries.get(key) {
                Some(value) => set(&mut params, *value),
                None => missing.push(key),
            }
        }
        (params, missing)
    }
}

/// `y = gradient · x + intercept` through `(low_x, low_y)` and `(high_x, high_y)`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Line {
    gradient: f64,
    intercept: f64,
}

impl Line {
    fn through(low_y: f64, high_y: f64, low_x: f64, high_x: f64) -> Self {
        let gradient = (low_y - high_y) / (low_x - high_x);
        Self {
            gradient,
            intercept: low_y - gradient * low_x,
        }
    }

    fn at(&self, x: f64) -> f64 {
        self.gradient * x + self.intercept
    }
}

/// An immutable, validated calibration snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioMapping {
    params: CalibrationParameters,
    pitch_line: Line,
    gain_line: Line,
}

impl AudioMapping {
    /// # Errors
    ///
    /// [`GuidanceError::Configuration`] when `params` fails validation.
    pub fn new(params: CalibrationParameters) -> Result<Self, GuidanceError> {
        params.validate()?;
        Ok(Self {
            params,
            pitch_line: Line::through(
                params.pitch_low_limit,
                params.pitch_high_limit,
                params.pitch_distance_low_limit,
                params.pitch_distance_high_limit,
            ),
            gain_line: Line::through(
                params.gain_low_limit,
                params.gain_high_limit,
                params.gain_distance_low_limit,
                params.gain_distance_high_limit,
            ),
        })
    }

    pub fn parameters(&self) -> &CalibrationParameters {
        &self.params
    }

    /// Pitch for a signed elevation (radians, `+π/2` straight up).
    ///
    /// Saturates to `2^low` at and above `π/2` and to `2^high` at and below
    /// `-π/2`; lower targets sound higher.
    pub fn pitch(&self, elevation: f64) -> f64 {
        let (low, high) = self.pitch_limits();
        if elevation >= FRAC_PI_2 {
            return low.exp2();
        }
        if elevation <= -FRAC_PI_2 {
            return high.exp2();
        }
        let gradient = ((high - low) / PI).atan().tan();
        let intercept = high - FRAC_PI_2 * gradient;
        (gradient * -elevation + intercept).exp2()
    }

    /// Pitch driven by the planar angle of `listener - source`, without the
    /// mounting compensation.
    pub fn pitch_towards(&self, source: [f64; 2], listener: [f64; 2]) -> f64 {
        let angle = (listener[1] - source[1]).atan2(listener[0] - source[0]);
        self.pitch(angle)
    }

    /// Gain for a distance; only its magnitude matters.
    pub fn gain(&self, distance: f64) -> f64 {
        let d = distance.abs();
        if d >= self.params.gain_distance_high_limit {
            self.params.gain_high_limit
        } else if d <= self.params.gain_distance_low_limit {
            self.params.gain_low_limit
        } else {
            self.gain_line.at(d)
        }
    }

    /// `(low, high)` pitch limits in octaves.
    pub fn pitch_limits(&self) -> (f64, f64) {
        (self.params.pitch_low_limit, self.params.pitch_high_limit)
    }

    /// `(low, high)` gain limits.
    pub fn gain_limits(&self) -> (f64, f64) {
        (self.params.gain_low_limit, self.params.gain_high_limit)
    }

    /// `(gradient, intercept)` of the pitch limits over the pitch distance range.
    pub fn pitch_coefficients(&self) -> (f64, f64) {
        (self.pitch_line.gradient, self.pitch_line.intercept)
    }

    /// `(gradient, intercept)` of the gain ramp.
    pub fn gain_coefficients(&self) -> (f64, f64) {
        (self.gain_line.gradient, self.gain_line.intercept)
    }
}

/// Owner of the live [`AudioMapping`].
#[derive(Debug)]
pub struct CalibrationEngine {
    current: RwLock<Arc<AudioMapping>>,
}

impl CalibrationEngine {
    pub fn new(params: CalibrationParameters) -> Result<Self, GuidanceError> {
        Ok(Self {
            current: RwLock::new(Arc::new(AudioMapping::new(params)?)),
        })
    }

    /// The mapping in force right now.
    pub fn snapshot(&self) -> Arc<AudioMapping> {
        let guard = self.current.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(&guard)
    }

    /// Replace all limits. On error the previous mapping stays in force.
    pub fn update_calibration(&self, params: CalibrationParameters) -> Result<Arc<AudioMapping>, GuidanceError> {
        let next = Arc::new(AudioMapping::new(params)?);
        let mut guard = self.current.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Arc::clone(&next);
        info!(
            pitch_low = params.pitch_low_limit,
            pitch_high = params.pitch_high_limit,
            gain_low = params.gain_low_limit,
            gain_high = params.gain_high_limit,
            "calibration updated"
        );
        Ok(next)
    }

    pub fn update_pitch_limits(&self, low: f64, high: f64) -> Result<Arc<AudioMapping>, GuidanceError> {
        self.modify(|p| {
            p.pitch_low_limit = low;
            p.pitch_high_limit = high;
        })
    }

    pub fn update_gain_limits(&self, low: f64, high: f64) -> Result<Arc<AudioMapping>, GuidanceError> {
        self.modify(|p| {
            p.gain_low_limit = low;
            p.gain_high_limit = high;
        })
    }

    /// Read-modify-write under the write lock so concurrent partial updates
    /// do not overwrite each other.
    fn modify(&self, edit: impl FnOnce(&mut CalibrationParameters)) -> Result<Arc<AudioMapping>, GuidanceError> {
        let mut guard = self.current.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut params = *guard.parameters();
        edit(&mut params);
        let next = Arc::new(AudioMapping::new(params)?);
        *guard = Arc::clone(&next);
        debug!(?params, "calibration limits changed");
        Ok(next)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Storage
// ────────────────────────────────────────────────────────────────────────────

/// Flat key/value store holding the calibration fields.
pub trait CalibrationStore: Send + Sync {
    fn load_all(&self) -> Result<BTreeMap<String, f64>, GuidanceError>;

    /// Replace the stored entries in one write.
    fn store_all(&self, entries: &BTreeMap<String, f64>) -> Result<(), GuidanceError>;
}

/// TOML file of `key = value` lines.
#[derive(Debug, Clone)]
pub struct FileCalibrationStore {
    path: PathBuf,
}

impl FileCalibrationStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CalibrationStore for FileCalibrationStore {
    fn load_all(&self) -> Result<BTreeMap<String, f64>, GuidanceError> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let raw = std::fs::read_to_string(&self.path)
            .map_err(|e| GuidanceError::Storage(format!("read {}: {e}", self.path.display())))?;
        toml::from_str(&raw).map_err(|e| GuidanceError::Storage(format!("parse {}: {e}", self.path.display())))
    }

    fn store_all(&self, entries: &BTreeMap<String, f64>) -> Result<(), GuidanceError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| GuidanceError::Storage(format!("create {}: {e}", parent.display())))?;
        }
        let body = toml::to_string(entries).map_err(|e| GuidanceError::Storage(e.to_string()))?;
        // Write beside the target and rename so readers never see a partial file.
        let staging = self.path.with_extension("toml.tmp");
        std::fs::write(&staging, body)
            .map_err(|e| GuidanceError::Storage(format!("write {}: {e}", staging.display())))?;
        std::fs::rename(&staging, &self.path)
            .map_err(|e| GuidanceError::Storage(format!("rename to {}: {e}", self.path.display())))
    }
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryCalibrationStore {
    entries: Mutex<BTreeMap<String, f64>>,
    writes: Mutex<usize>,
}

impl MemoryCalibrationStore {
    pub fn with_entries(entries: BTreeMap<String, f64>) -> Self {
        Self {
            entries: Mutex::new(entries),
            writes: Mutex::new(0),
        }
    }

    /// Number of `store_all` calls so far.
    pub fn write_count(&self) -> usize {
        self.writes.lock().map(|w| *w).unwrap_or(0)
    }
}

impl CalibrationStore for MemoryCalibrationStore {
    fn load_all(&self) -> Result<BTreeMap<String, f64>, GuidanceError> {
        self.entries
            .lock()
            .map(|e| e.clone())
            .map_err(|_| GuidanceError::Storage("calibration store poisoned".into()))
    }

    fn store_all(&self, entries: &BTreeMap<String, f64>) -> Result<(), GuidanceError> {
        let mut stored = self
            .entries
            .lock()
            .map_err(|_| GuidanceError::Storage("calibration store poisoned".into()))?;
        *stored = entries.clone();
        if let Ok(mut writes) = self.writes.lock() {
            *writes += 1;
        }
        Ok(())
    }
}

/// Load the persisted limits.
///
/// On first run (any key absent) the defaults for the absent keys are
/// written together with the existing values in a single store write.
pub fn load_or_initialize(store: &dyn CalibrationStore) -> Result<CalibrationParameters, GuidanceError> {
    let stored = store.load_all()?;
    let (params, missing) = CalibrationParameters::from_entries(&stored);
    if !missing.is_empty() {
        info!(?missing, "initialising calibration defaults");
        let mut all = stored;
        all.extend(params.to_entries());
        store.store_all(&all)?;
    }
    params.validate()?;
    Ok(params)
}

/// Persist `params` in full.
pub fn save(store: &dyn CalibrationStore, params: &CalibrationParameters) -> Result<(), GuidanceError> {
    store.store_all(&params.to_entries())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_mapping() -> AudioMapping {
        AudioMapping::new(CalibrationParameters::default()).unwrap()
    }

    // ── Pitch ───────────────────────────────────────────────────────────────

    #[test]
    fn level_elevation_gives_midpoint_pitch() {
        assert!((default_mapping().pitch(0.0) - 9f64.exp2()).abs() < 1e-9);
    }

    #[test]
    fn pitch_saturates_beyond_quarter_turns() {
        let m = default_mapping();
        assert_eq!(m.pitch(FRAC_PI_2), 128.0);
        assert_eq!(m.pitch(3.0), 128.0);
        assert_eq!(m.pitch(-FRAC_PI_2), 2048.0);
        assert_eq!(m.pitch(-3.0), 2048.0);
    }

    #[test]
    fn pitch_is_continuous_at_saturation_boundaries() {
        let m = default_mapping();
        let eps = 1e-9;
        assert!((m.pitch(FRAC_PI_2 - eps) - m.pitch(FRAC_PI_2)).abs() < 1e-4);
        assert!((m.pitch(-FRAC_PI_2 + eps) - m.pitch(-FRAC_PI_2)).abs() < 1e-4);
    }

    #[test]
    fn pitch_falls_as_elevation_rises() {
        let m = default_mapping();
        let mut previous = f64::INFINITY;
        for i in -15..=15 {
            let p = m.pitch(i as f64 * 0.1);
            assert!(p < previous);
            previous = p;
        }
    }

    #[test]
    fn pitch_towards_uses_planar_angle() {
        let m = default_mapping();
        // Listener straight "above" the source in the plane: +π/2.
        assert_eq!(m.pitch_towards([0.0, 0.0], [0.0, 1.0]), 128.0);
        assert_eq!(m.pitch_towards([0.0, 0.0], [0.0, -1.0]), 2048.0);
        assert!((m.pitch_towards([0.0, 0.0], [1.0, 0.0]) - 512.0).abs() < 1e-9);
    }

    // ── Gain ────────────────────────────────────────────────────────────────

    #[test]
    fn gain_saturates_outside_distance_range() {
        let m = default_mapping();
        assert_eq!(m.gain(0.0), 0.5);
        assert_eq!(m.gain(6.0), 1.0);
        assert_eq!(m.gain(60.0), 1.0);
        assert_eq!(m.gain(-60.0), 1.0);
    }

    #[test]
    fn gain_is_monotonic_in_absolute_distance() {
        let m = default_mapping();
        let mut previous = m.gain(0.0);
        for i in 1..=70 {
            let d = i as f64 * 0.1;
            let g = m.gain(d);
            assert!(g >= previous, "gain dropped at {d}");
            assert_eq!(g, m.gain(-d));
            previous = g;
        }
        assert!((m.gain(3.0) - 0.75).abs() < 1e-12);
    }

    #[test]
    fn derived_coefficients_follow_limits() {
        let m = default_mapping();
        let (g, i) = m.gain_coefficients();
        assert!((g - 0.5 / 6.0).abs() < 1e-12);
        assert!((i - 0.5).abs() < 1e-12);
        let (g, i) = m.pitch_coefficients();
        assert!((g - 0.5).abs() < 1e-12);
        assert!((i - 9.0).abs() < 1e-12);
    }

    // ── Validation ──────────────────────────────────────────────────────────

    #[test]
    fn degenerate_limits_are_rejected() {
        let mut p = CalibrationParameters::default();
        p.gain_distance_low_limit = p.gain_distance_high_limit;
        assert!(matches!(AudioMapping::new(p), Err(GuidanceError::Configuration(_))));

        let mut p = CalibrationParameters::default();
        p.pitch_high_limit = p.pitch_low_limit;
        assert!(matches!(p.validate(), Err(GuidanceError::Configuration(_))));

        let mut p = CalibrationParameters::default();
        p.gain_low_limit = f64::NAN;
        assert!(matches!(p.validate(), Err(GuidanceError::Configuration(_))));
    }

    // ── Engine ──────────────────────────────────────────────────────────────

    #[test]
    fn update_swaps_snapshot_and_keeps_old_readers_intact() {
        let engine = CalibrationEngine::new(CalibrationParameters::default()).unwrap();
        let before = engine.snapshot();

        engine.update_pitch_limits(6.0, 12.0).unwrap();
        let after = engine.snapshot();

        assert_eq!(before.pitch_limits(), (7.0, 11.0));
        assert_eq!(after.pitch_limits(), (6.0, 12.0));
        assert_eq!(after.gain_limits(), (0.5, 1.0));
    }

    #[test]
    fn rejected_update_leaves_mapping_in_force() {
        let engine = CalibrationEngine::new(CalibrationParameters::default()).unwrap();
        assert!(engine.update_gain_limits(0.8, 0.8).is_err());
        assert_eq!(engine.snapshot().gain_limits(), (0.5, 1.0));

        let mut p = CalibrationParameters::default();
        p.pitch_distance_high_limit = -4.0;
        assert!(engine.update_calibration(p).is_err());
        assert_eq!(*engine.snapshot().parameters(), CalibrationParameters::default());
    }

    #[test]
    fn concurrent_readers_see_whole_snapshots() {
        let engine = Arc::new(CalibrationEngine::new(CalibrationParameters::default()).unwrap());
        let writer = {
            let engine = Arc::clone(&engine);
            std::thread::spawn(move || {
                for i in 0..200 {
                    let low = if i % 2 == 0 { 6.0 } else { 7.0 };
                    engine.update_pitch_limits(low, low + 4.0).unwrap();
                }
            })
        };
        for _ in 0..2000 {
            let (low, high) = engine.snapshot().pitch_limits();
            assert_eq!(high - low, 4.0);
        }
        writer.join().unwrap();
    }

    // ── Storage ─────────────────────────────────────────────────────────────

    #[test]
    fn fresh_store_is_initialised_with_defaults() {
        let store = MemoryCalibrationStore::default();
        let params = load_or_initialize(&store).unwrap();
        assert_eq!(params.pitch_high_limit, 11.0);
        assert_eq!(params.pitch_low_limit, 7.0);
        assert_eq!(params.gain_high_limit, 1.0);
        assert_eq!(params.gain_low_limit, 0.5);
        assert_eq!(store.write_count(), 1);
        assert_eq!(store.load_all().unwrap().len(), FIELDS.len());

        // Second load finds everything and writes nothing.
        load_or_initialize(&store).unwrap();
        assert_eq!(store.write_count(), 1);
    }

    #[test]
    fn partial_store_keeps_existing_values() {
        let mut entries = BTreeMap::new();
        entries.insert("pitch_high_limit".to_string(), 12.0);
        let store = MemoryCalibrationStore::with_entries(entries);

        let params = load_or_initialize(&store).unwrap();
        assert_eq!(params.pitch_high_limit, 12.0);
        assert_eq!(params.pitch_low_limit, 7.0);
        assert_eq!(store.load_all().unwrap()["pitch_high_limit"], 12.0);
        assert_eq!(store.write_count(), 1);
    }

    #[test]
    fn degenerate_stored_limits_fail_fast() {
        let mut entries = CalibrationParameters::default().to_entries();
        entries.insert("gain_distance_high_limit".to_string(), 0.0);
        let store = MemoryCalibrationStore::with_entries(entries);
        assert!(matches!(load_or_initialize(&store), Err(GuidanceError::Configuration(_))));
    }

    #[test]
    fn file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCalibrationStore::new(dir.path().join("nested").join("calibration.toml"));

        let params = load_or_initialize(&store).unwrap();
        assert_eq!(params, CalibrationParameters::default());
        assert!(store.path().exists());

        let mut changed = params;
        changed.gain_low_limit = 0.25;
        changed.voice_timing_ms = 4000;
        save(&store, &changed).unwrap();

        assert_eq!(load_or_initialize(&store).unwrap(), changed);
    }

    #[test]
    fn file_store_accepts_integer_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calibration.toml");
        std::fs::write(&path, "pitch_high_limit = 10\nvibration_delay_ms = 80\n").unwrap();

        let params = load_or_initialize(&FileCalibrationStore::new(&path)).unwrap();
        assert_eq!(params.pitch_high_limit, 10.0);
        assert_eq!(params.vibration_delay_ms, 80);
    }

    #[test]
    fn corrupt_file_is_a_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calibration.toml");
        std::fs::write(&path, "this is = = not toml").unwrap();
        let err = load_or_initialize(&FileCalibrationStore::new(&path)).unwrap_err();
        assert!(matches!(err, GuidanceError::Storage(_)));
    }
}
