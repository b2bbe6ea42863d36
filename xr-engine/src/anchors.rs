//! Spatial anchors kept in a dense arena with generated ids

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::math::{Quat, Vec3};

/// 24 hours
pub const DEFAULT_ANCHOR_LIFETIME_MS: f64 = 24.0 * 60.0 * 60.0 * 1000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AnchorId(u64);

impl AnchorId {
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for AnchorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "anchor-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnchorTrackingState {
    /// Backed by a platform anchor.
    Tracked,
    /// Held by the engine because the platform did not grant anchors.
    Emulated,
    Untracked,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpatialAnchor {
    pub id: AnchorId,
    pub position: Vec3,
    pub rotation: Quat,
    pub label: Option<String>,
    /// Tracking clock time, in milliseconds. `None` until the tracker has seen
    /// its first frame; the anchor is stamped with that frame's time.
    pub created_at: Option<f64>,
    pub lifetime_ms: f64,
    pub tracking_state: AnchorTrackingState,
}

impl SpatialAnchor {
    pub fn age(&self, now: f64) -> f64 {
        self.created_at.map_or(0.0, |created| now - created)
    }

    pub fn is_expired(&self, now: f64) -> bool {
        self.age(now) > self.lifetime_ms
    }
}

#[derive(Debug, Default)]
pub struct AnchorStore {
    anchors: Vec<SpatialAnchor>,
    next_id: u64,
}

impl AnchorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&mut self) -> AnchorId {
        self.next_id += 1;
        AnchorId(self.next_id)
    }

    pub fn insert(&mut self, anchor: SpatialAnchor) {
        self.anchors.push(anchor);
    }

    pub fn remove(&mut self, id: AnchorId) -> Option<SpatialAnchor> {
        let index = self.anchors.iter().position(|a| a.id == id)?;
        Some(self.anchors.swap_remove(index))
    }

    pub fn get(&self, id: AnchorId) -> Option<&SpatialAnchor> {
        self.anchors.iter().find(|a| a.id == id)
    }

    /// Stamp anchors created before the clock had a reading.
    pub fn stamp_pending(&mut self, now: f64) {
        for anchor in self.anchors.iter_mut().filter(|a| a.created_at.is_none()) {
            anchor.created_at = Some(now);
        }
    }

    /// Single pass over the live anchors; returns the ids that were evicted.
    pub fn evict_expired(&mut self, now: f64) -> Vec<AnchorId> {
        let mut evicted = Vec::new();
        self.anchors.retain(|anchor| {
            if anchor.is_expired(now) {
                evicted.push(anchor.id);
                false
            } else {
                true
            }
        });
        evicted
    }

    pub fn iter(&self) -> impl Iterator<Item = &SpatialAnchor> {
        self.anchors.iter()
    }

    pub fn len(&self) -> usize {
        self.anchors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }

    /// Drops every anchor. Ids are never reused.
    pub fn clear(&mut self) {
        self.anchors.clear();
    }
}
