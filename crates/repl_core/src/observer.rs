//! Observer-side frame application.

use crate::{frame, wire};
use world_core::World;

/// Replication faults an observer can recover from by resync.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Undecodable bytes, including unregistered shape indices.
    #[error("malformed frame: {0}")]
    Malformed(String),
    /// The frame's `previous_count` disagrees with the local log; the frame
    /// is dropped and the authority retransmits from the observer's count.
    #[error("cursor mismatch: frame expects {expected}, local log has {actual}")]
    CursorMismatch { expected: usize, actual: usize },
}

/// Result of a successfully applied frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameApplied {
    /// Modifications applied from this frame.
    pub applied: usize,
    /// Authority log length after this frame's range.
    pub total: usize,
}

/// Apply one framed replication message to an observer world.
///
/// A changed clear counter triggers a local clear first. Nothing from a
/// frame that fails the cursor check is applied.
pub fn apply_frame(world: &mut World, bytes: &[u8]) -> Result<FrameApplied, ProtocolError> {
    let payload = frame::read_msg(bytes).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
    let decoded =
        wire::decode_frame(payload).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

    if decoded.clear_count != world.log().clear_count() {
        world.observer_clear(decoded.clear_count);
    }
    let local = world.log().len();
    if decoded.previous_count as usize != local {
        log::warn!(
            "dropping replication frame: previous_count {} but local log has {local}",
            decoded.previous_count
        );
        return Err(ProtocolError::CursorMismatch {
            expected: decoded.previous_count as usize,
            actual: local,
        });
    }
    let applied = decoded.entries.len();
    for (op, resource, shape) in decoded.entries {
        let _ = world.apply_replicated(op, shape, resource);
    }
    Ok(FrameApplied {
        applied,
        total: decoded.total_count as usize,
    })
}
