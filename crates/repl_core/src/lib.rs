//! repl_core: replication of the world's modification log.
//!
//! Scope
//! - Length-delimited framing with a magic prefix and a hard size cap.
//! - The modification-frame codec: `(clear_count, previous_count,
//!   frame_count <= 64, total_count)` followed by the modifications.
//! - `Replicator`: per-observer cursors driven by the server tick; a cursor
//!   advances only after its frame is handed to the transport.
//! - Observer apply: replays frames into a local world under the
//!   replication scope, dropping frames whose cursor disagrees.
//! - An in-process bytes channel for single-process authority/observer
//!   loops and tests.

#![forbid(unsafe_code)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod channel;
pub mod frame;
pub mod observer;
pub mod server;
pub mod wire;

pub use observer::{apply_frame, FrameApplied, ProtocolError};
pub use server::{ObserverId, Replicator, MAX_FRAME_MODIFICATIONS};
pub use wire::{decode_frame, encode_frame, ModificationFrame};
