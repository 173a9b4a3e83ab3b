//! Touch point markers

use crate::geometry::PointF;
use serde::{Deserialize, Serialize};

/// A marker stays visible this long after its last move
pub const MARKER_ACTIVE_SECS: f64 = 5.0;

/// A marker representing one touch point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Marker {
    pub id: u32,
    /// Normalized wall position
    pub position: PointF,
    /// Synchronized clock time of the last move, in seconds
    pub updated_at: f64,
}

impl Marker {
    /// True if the marker moved during the last [`MARKER_ACTIVE_SECS`]
    pub fn is_active(&self, now: f64) -> bool {
        now - self.updated_at <= MARKER_ACTIVE_SECS
    }
}

/// All touch markers of the wall
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Markers {
    markers: Vec<Marker>,
}

impl Markers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move a marker, adding it if it does not exist yet
    pub fn set_position(&mut self, id: u32, position: PointF, now: f64) {
        match self.markers.iter_mut().find(|m| m.id == id) {
            Some(marker) => {
                marker.position = position;
                marker.updated_at = now;
            }
            None => self.markers.push(Marker {
                id,
                position,
                updated_at: now,
            }),
        }
    }

    pub fn remove(&mut self, id: u32) -> bool {
        let before = self.markers.len();
        self.markers.retain(|m| m.id != id);
        self.markers.len() != before
    }

    pub fn get(&self, id: u32) -> Option<&Marker> {
        self.markers.iter().find(|m| m.id == id)
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    /// Markers to render at time `now`
    pub fn active(&self, now: f64) -> impl Iterator<Item = &Marker> {
        self.markers.iter().filter(move |m| m.is_active(now))
    }
}
