//! Server-side replicator: one cursor per observer, one frame per tick.

use crate::{frame, wire};
use std::collections::BTreeMap;
use world_core::World;

/// Hard cap on modifications per frame.
pub const MAX_FRAME_MODIFICATIONS: usize = 64;

/// Stable observer identity, assigned by the transport layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(pub u64);

#[derive(Debug, Clone, Copy, Default)]
struct Cursor {
    clear_count: i32,
    modification_count: usize,
}

/// Per-observer replication state on the authority.
///
/// A cursor advances only after its frame is handed to `send`, so a frame
/// the transport never delivered is re-sent from the same position once the
/// transport reports it (see `nack`).
#[derive(Default)]
pub struct Replicator {
    cursors: BTreeMap<ObserverId, Cursor>,
}

impl Replicator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer starting from an empty world.
    pub fn add_observer(&mut self, id: ObserverId) {
        self.cursors.entry(id).or_default();
    }

    pub fn remove_observer(&mut self, id: ObserverId) {
        self.cursors.remove(&id);
    }

    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.cursors.len()
    }

    /// Pending modifications for an observer, if registered.
    #[must_use]
    pub fn lag(&self, id: ObserverId, world: &World) -> Option<usize> {
        let cur = self.cursors.get(&id)?;
        if cur.clear_count != world.log().clear_count() {
            return Some(world.log().len());
        }
        Some(world.log().len().saturating_sub(cur.modification_count))
    }

    /// Visit every observer and emit at most one frame each.
    ///
    /// A clear-count change forces a frame even when the log is empty, so
    /// observers learn about clears without waiting for the next
    /// modification.
    pub fn server_tick<F>(&mut self, world: &World, mut send: F)
    where
        F: FnMut(ObserverId, Vec<u8>),
    {
        let log = world.log();
        for (id, cur) in &mut self.cursors {
            let mut force = false;
            if cur.clear_count != log.clear_count() {
                cur.clear_count = log.clear_count();
                cur.modification_count = 0;
                force = true;
            }
            let total = log.len();
            if !force && cur.modification_count >= total {
                continue;
            }
            let count = (total - cur.modification_count).min(MAX_FRAME_MODIFICATIONS);
            let payload = wire::encode_frame(log, cur.modification_count, count);
            let mut framed = Vec::new();
            frame::write_msg(&mut framed, &payload);
            send(*id, framed);
            // Advance only after the frame was handed to the transport.
            cur.modification_count += count;
        }
    }

    /// Transport-level negative acknowledgement: rewind the cursor to the
    /// observer's reported log length so the next tick retransmits.
    pub fn nack(&mut self, id: ObserverId, observer_count: usize) {
        if let Some(cur) = self.cursors.get_mut(&id) {
            cur.modification_count = cur.modification_count.min(observer_count);
        }
    }
}
