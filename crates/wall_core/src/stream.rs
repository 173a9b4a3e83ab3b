//! Pixel stream frame swap token
//!
//! Each streamed window shows the frame index recorded here. Publishing a new
//! index through the sync group makes every node swap to that frame together.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Latest frame index per stream uri
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamFrames {
    frames: BTreeMap<String, u64>,
}

impl StreamFrames {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the frame to display for a stream
    pub fn set_frame(&mut self, uri: impl Into<String>, frame: u64) {
        self.frames.insert(uri.into(), frame);
    }

    pub fn frame(&self, uri: &str) -> Option<u64> {
        self.frames.get(uri).copied()
    }

    /// Forget a closed stream
    pub fn remove(&mut self, uri: &str) -> Option<u64> {
        self.frames.remove(uri)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}
