use std::collections::VecDeque;
use std::fmt;

use serde::Serialize;

use crate::mesh::Mesh;
use crate::my_types::*;

/// Stable identity of a tracked mesh, never reused within a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TrackId(pub u64);

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackState {
    /// Matched in the latest frame
    Active,
    /// Unmatched for this many consecutive frames
    Absent(usize),
}

#[derive(Clone, Debug, PartialEq)]
pub struct TrackedMesh {
    pub id: TrackId,
    mesh: Mesh,
    centroid: Vector2d,
    pub length_of_absence: usize,
    /// Centroids of superseded geometries, oldest first
    pub history: VecDeque<Vector2d>,
    /// Reconciliations survived since creation
    pub age: usize,
}

impl TrackedMesh {
    /// The caller guarantees `mesh` is not empty.
    fn new(id: TrackId, mesh: Mesh, centroid: Vector2d) -> Self {
        TrackedMesh {
            id,
            mesh,
            centroid,
            length_of_absence: 0,
            history: VecDeque::new(),
            age: 0,
        }
    }

    pub fn mesh(&self) -> &Mesh {
        &self.mesh
    }

    pub fn centroid(&self) -> Vector2d {
        self.centroid
    }

    pub fn state(&self) -> TrackState {
        if self.length_of_absence == 0 {
            TrackState::Active
        } else {
            TrackState::Absent(self.length_of_absence)
        }
    }

    /// Replace the geometry with a matched detection, remember where the
    /// mesh was and mark it active again.
    pub(crate) fn update(&mut self, mesh: Mesh, centroid: Vector2d, history_length: usize) {
        self.history.push_back(self.centroid);
        while self.history.len() > history_length {
            self.history.pop_front();
        }
        self.mesh = mesh;
        self.centroid = centroid;
        self.length_of_absence = 0;
    }

    pub(crate) fn mark_absent(&mut self) {
        self.length_of_absence += 1;
    }
}

/// Every mesh currently being followed, in insertion order.
///
/// Positions in this collection are only meaningful within one
/// reconciliation; identity across frames is carried by [`TrackId`].
#[derive(Clone, Debug, Default)]
pub struct TrackingRegistry {
    tracks: Vec<TrackedMesh>,
    next_id: u64,
}

impl TrackingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrackedMesh> {
        self.tracks.iter()
    }

    pub fn as_slice(&self) -> &[TrackedMesh] {
        &self.tracks
    }

    pub fn get(&self, id: TrackId) -> Option<&TrackedMesh> {
        self.tracks.iter().find(|t| t.id == id)
    }

    pub fn ids(&self) -> Vec<TrackId> {
        self.tracks.iter().map(|t| t.id).collect()
    }

    /// Start tracking a new mesh. Returns `None` for an empty mesh, which has
    /// no centroid to track.
    pub fn insert(&mut self, mesh: Mesh) -> Option<TrackId> {
        let centroid = mesh.centroid()?;
        let id = TrackId(self.next_id);
        self.next_id += 1;
        self.tracks.push(TrackedMesh::new(id, mesh, centroid));
        Some(id)
    }

    /// Drop every track absent for more than `threshold` frames.
    pub fn evict_absent(&mut self, threshold: usize) -> Vec<TrackId> {
        let mut evicted = vec![];
        self.tracks.retain(|t| {
            if t.length_of_absence > threshold {
                evicted.push(t.id);
                false
            } else {
                true
            }
        });
        evicted
    }

    /// Read-only copy for renderers running beside the tracker
    pub fn snapshot(&self) -> Vec<TrackedMesh> {
        self.tracks.clone()
    }

    /// Forget every track. Identifiers keep counting up.
    pub fn clear(&mut self) {
        self.tracks.clear();
    }

    pub(crate) fn track_mut(&mut self, index: usize) -> &mut TrackedMesh {
        &mut self.tracks[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob(x: f64, y: f64) -> Mesh {
        Mesh::build(&[
            Vector2d::new(x - 1., y - 1.),
            Vector2d::new(x + 1., y - 1.),
            Vector2d::new(x, y + 2.),
        ])
    }

    #[test]
    fn test_insert_allocates_increasing_ids() {
        let mut registry = TrackingRegistry::new();
        let a = registry.insert(blob(0., 0.)).unwrap();
        let b = registry.insert(blob(5., 5.)).unwrap();
        assert!(a < b);
        assert_eq!(registry.ids(), vec![a, b]);
        assert_eq!(registry.get(b).unwrap().state(), TrackState::Active);
        assert!(registry.insert(Mesh::default()).is_none());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_ids_are_not_reused_after_eviction() {
        let mut registry = TrackingRegistry::new();
        let a = registry.insert(blob(0., 0.)).unwrap();
        registry.track_mut(0).mark_absent();
        registry.track_mut(0).mark_absent();
        assert_eq!(registry.get(a).unwrap().state(), TrackState::Absent(2));

        assert!(registry.evict_absent(2).is_empty());
        assert_eq!(registry.evict_absent(1), vec![a]);
        assert!(registry.is_empty());

        let b = registry.insert(blob(0., 0.)).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_update_records_history() {
        let mut registry = TrackingRegistry::new();
        let id = registry.insert(blob(0., 0.)).unwrap();
        for step in 1..=4 {
            let mesh = blob(step as f64, 0.);
            let centroid = mesh.centroid().unwrap();
            let track = registry.track_mut(0);
            track.mark_absent();
            track.update(mesh, centroid, 3);
        }

        let track = registry.get(id).unwrap();
        assert_eq!(track.length_of_absence, 0);
        assert_eq!(track.history.len(), 3);
        assert!((track.history[0] - Vector2d::new(1., 0.)).norm() < 1e-12);
        assert!((track.centroid() - Vector2d::new(4., 0.)).norm() < 1e-12);
        assert_eq!(track.mesh().len(), 3);
    }
}
