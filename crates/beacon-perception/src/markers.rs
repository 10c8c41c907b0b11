//! Registry of fiducial markers seen so far, keyed by their decoded content.
//!
//! Every detection batch creates or updates entries in place. The renderer
//! may attach an opaque handle `H` to an entry (e.g. a scene-node id) which
//! survives later updates of the same marker.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::algebra::{FrameId, Pose, Quaternion, Vec3};

/// One marker as reported by the detector, in world coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerDetection {
    pub content: String,
    pub translation: Vec3,
    pub orientation: Quaternion,
    /// Bottom-left, bottom-right, top-right, top-left.
    pub corners: [Vec3; 4],
}

impl MarkerDetection {
    const TOP_RIGHT: usize = 2;
    const TOP_LEFT: usize = 3;

    /// Edge length, assuming a square marker.
    pub fn size(&self) -> f64 {
        self.corners[Self::TOP_LEFT].distance_to(self.corners[Self::TOP_RIGHT])
    }
}

/// End points of the three drawn marker axes, each a third of the marker size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarkerAxes {
    pub origin: Vec3,
    pub x: Vec3,
    pub y: Vec3,
    pub z: Vec3,
}

impl MarkerAxes {
    fn from_detection(detection: &MarkerDetection, size: f64) -> Self {
        let arm = size / 3.0;
        let tip = |axis: Vec3| detection.translation.add(detection.orientation.rotate(axis.scale(arm)));
        Self {
            origin: detection.translation,
            x: tip(Vec3::new(1.0, 0.0, 0.0)),
            y: tip(Vec3::new(0.0, 1.0, 0.0)),
            z: tip(Vec3::new(0.0, 0.0, 1.0)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarkerEntry<H> {
    pub pose: Pose,
    pub corners: [Vec3; 4],
    pub size: f64,
    pub axes: MarkerAxes,
    pub sightings: u64,
    pub last_seen: f64,
    pub handle: Option<H>,
}

impl<H> MarkerEntry<H> {
    fn refresh(&mut self, detection: &MarkerDetection, timestamp: f64) {
        let size = detection.size();
        self.pose = Pose::new(detection.translation, detection.orientation, FrameId::World);
        self.corners = detection.corners;
        self.size = size;
        self.axes = MarkerAxes::from_detection(detection, size);
        self.sightings += 1;
        self.last_seen = timestamp;
    }
}

#[derive(Debug, Clone)]
pub struct MarkerRegistry<H = ()> {
    entries: HashMap<String, MarkerEntry<H>>,
}

impl<H> Default for MarkerRegistry<H> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<H> MarkerRegistry<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one detection batch. Returns the contents seen for the first time.
    pub fn update(&mut self, batch: &[MarkerDetection], timestamp: f64) -> Vec<String> {
        let mut created = Vec::new();
        for detection in batch {
            match self.entries.get_mut(&detection.content) {
                Some(entry) => entry.refresh(detection, timestamp),
                None => {
                    let size = detection.size();
                    self.entries.insert(
                        detection.content.clone(),
                        MarkerEntry {
                            pose: Pose::new(detection.translation, detection.orientation, FrameId::World),
                            corners: detection.corners,
                            size,
                            axes: MarkerAxes::from_detection(detection, size),
                            sightings: 1,
                            last_seen: timestamp,
                            handle: None,
                        },
                    );
                    debug!(content = %detection.content, size, "new marker");
                    created.push(detection.content.clone());
                }
            }
        }
        created
    }

    pub fn get(&self, content: &str) -> Option<&MarkerEntry<H>> {
        self.entries.get(content)
    }

    /// Attach the renderer's handle; returns the previous one.
    pub fn attach_handle(&mut self, content: &str, handle: H) -> Option<H> {
        self.entries
            .get_mut(content)
            .and_then(|entry| entry.handle.replace(handle))
    }

    pub fn remove(&mut self, content: &str) -> Option<MarkerEntry<H>> {
        self.entries.remove(content)
    }

    /// World position to guide toward when `content` is selected.
    pub fn target_for(&self, content: &str) -> Option<Vec3> {
        self.entries.get(content).map(|entry| entry.pose.position)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &MarkerEntry<H>)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
