//! world_core: the world/chunk scheduler for SDF layers.
//!
//! Scope
//! - `World`: owns every chunk across every layer/volume, accepts ordered
//!   modifications, fans per-chunk work out to background workers, and runs
//!   mesh maintenance under a per-tick main-thread budget.
//! - `Chunk`: one sample array plus its derived render mesh, collision
//!   shape, and optional layer texture.
//! - Host seams (`host`): executor, mesh-writer rental, physics, scene,
//!   texture factory. The core never talks to an engine directly.
//! - `ModificationLog`: the append-only log replication replays.
//!
//! Extending
//! - Interest management (per-observer chunk filtering) belongs above this
//!   crate, next to the replication cursors.

#![forbid(unsafe_code)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod chunk;
pub mod config;
pub mod host;
pub mod modlog;
pub mod task;
pub mod world;

pub use chunk::{Chunk, MainTaskKind, MAIN_TASK_BUDGET};
pub use config::{LayerOptions, QualitySettings, TextureReference};
pub use modlog::{Modification, ModificationLog, SdfOp};
pub use task::{CancelToken, Promise, TaskHandle, TaskState};
pub use world::{affected_chunks, Authority, World};

/// Engine asset reference naming a layer/volume. Stable across peers.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Deserialize,
)]
#[serde(transparent)]
pub struct ResourceId(pub u64);
