//! Append-only modification log: the authority's source of truth for
//! replication and replay.

use crate::ResourceId;
use sdf_shape::Shape;

/// Constructive operator applied by a modification. Wire values are fixed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SdfOp {
    Add,
    Subtract,
}

impl SdfOp {
    #[must_use]
    pub fn to_wire(self) -> u8 {
        match self {
            SdfOp::Add => 0,
            SdfOp::Subtract => 1,
        }
    }

    #[must_use]
    pub fn from_wire(v: u8) -> Option<Self> {
        match v {
            0 => Some(SdfOp::Add),
            1 => Some(SdfOp::Subtract),
            _ => None,
        }
    }
}

/// One accepted `(operator, shape, resource)` triple. Shapes are immutable
/// once logged.
#[derive(Clone, Debug, PartialEq)]
pub struct Modification {
    pub op: SdfOp,
    pub resource: ResourceId,
    pub shape: Shape,
}

/// Ordered log plus the monotonic clear counter. Truncated to empty every
/// time `clear_count` increments.
#[derive(Default)]
pub struct ModificationLog {
    entries: Vec<Modification>,
    clear_count: i32,
}

impl ModificationLog {
    pub fn push(&mut self, m: Modification) {
        self.entries.push(m);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn clear_count(&self) -> i32 {
        self.clear_count
    }

    #[must_use]
    pub fn entries(&self) -> &[Modification] {
        &self.entries
    }

    /// Entries `[start, start + count)`; clamped to the log length.
    #[must_use]
    pub fn range(&self, start: usize, count: usize) -> &[Modification] {
        let start = start.min(self.entries.len());
        let end = (start + count).min(self.entries.len());
        &self.entries[start..end]
    }

    /// World clear: bump the counter, truncate.
    pub fn clear(&mut self) {
        self.clear_count += 1;
        self.entries.clear();
    }

    /// Per-resource clear: bump the counter, keep other resources' entries.
    /// Observers replay the filtered log from scratch.
    pub fn clear_resource(&mut self, resource: ResourceId) {
        self.clear_count += 1;
        self.entries.retain(|m| m.resource != resource);
    }

    /// Observer side: adopt the authority's clear counter during a resync.
    pub fn reset_to_clear_count(&mut self, clear_count: i32) {
        self.clear_count = clear_count;
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn m(resource: u64) -> Modification {
        Modification {
            op: SdfOp::Add,
            resource: ResourceId(resource),
            shape: Shape::Sphere {
                center: Vec3::ZERO,
                radius: 1.0,
            },
        }
    }

    #[test]
    fn clear_truncates_and_counts() {
        let mut log = ModificationLog::default();
        log.push(m(1));
        log.push(m(2));
        assert_eq!(log.len(), 2);
        log.clear();
        assert!(log.is_empty());
        assert_eq!(log.clear_count(), 1);
    }

    #[test]
    fn clear_resource_filters_and_counts() {
        let mut log = ModificationLog::default();
        log.push(m(1));
        log.push(m(2));
        log.push(m(1));
        log.clear_resource(ResourceId(1));
        assert_eq!(log.len(), 1);
        assert_eq!(log.entries()[0].resource, ResourceId(2));
        assert_eq!(log.clear_count(), 1);
    }

    #[test]
    fn range_clamps() {
        let mut log = ModificationLog::default();
        for i in 0..5 {
            log.push(m(i));
        }
        assert_eq!(log.range(3, 64).len(), 2);
        assert_eq!(log.range(9, 4).len(), 0);
    }

    #[test]
    fn op_wire_round_trip() {
        assert_eq!(SdfOp::from_wire(SdfOp::Add.to_wire()), Some(SdfOp::Add));
        assert_eq!(
            SdfOp::from_wire(SdfOp::Subtract.to_wire()),
            Some(SdfOp::Subtract)
        );
        assert_eq!(SdfOp::from_wire(7), None);
    }
}
