//! World: owner of all chunks across all layers, the ordered modification
//! pipeline, and the per-layer mesh-update scheduler.
//!
//! Scheduling model
//! - All public entry points run on the main thread, which owns the layer
//!   map, the modification log, and every `needs_mesh_update` set.
//! - Background workers mutate sample arrays and extract meshes; results
//!   come back over an in-process channel drained on tick.
//! - Modifications are globally serialised: one in flight at a time, in
//!   acceptance order. Mesh rebuilds are not ordered against modifications;
//!   a mesh reflects the counter at the moment its rebuild started.

use crate::chunk::Chunk;
use crate::config::LayerOptions;
use crate::host::{Executor, HostBindings, MeshCpu, MeshWriterPool};
use crate::modlog::{Modification, ModificationLog, SdfOp};
use crate::task::{Promise, TaskHandle};
use crate::ResourceId;
use glam::IVec3;
use sdf_field::{ChunkKey, Dimension, Quality};
use sdf_shape::Shape;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Who is allowed to originate modifications on this world.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Authority {
    /// Owns the log; replicates to observers.
    Server,
    /// Owns the log; no replication.
    LocalOnly,
    /// Replays the authority's log; direct modification is a programmer
    /// error outside the replication scope.
    Observer,
}

/// Background completion messages, stamped with the layer epoch at dispatch
/// so results from before a clear are dropped.
pub(crate) enum WorkerMsg {
    ModificationDone {
        resource: ResourceId,
        key: ChunkKey,
        epoch: u64,
        changed: bool,
    },
    MeshDone {
        resource: ResourceId,
        key: ChunkKey,
        epoch: u64,
        output: Option<MeshOutput>,
    },
}

/// What a finished mesh rebuild hands back for main-thread publication.
pub(crate) struct MeshOutput {
    pub render: Option<MeshCpu>,
    /// Vertices pre-offset to world space.
    pub collision: Option<(Vec<[f32; 3]>, Vec<u32>)>,
}

struct PendingModification {
    op: SdfOp,
    resource: ResourceId,
    shape: Shape,
    promise: Promise<()>,
}

struct InFlight {
    resource: ResourceId,
    remaining: usize,
    changed: Vec<ChunkKey>,
    promise: Promise<()>,
}

struct LayerState {
    options: Arc<LayerOptions>,
    quality: Quality,
    chunks: HashMap<ChunkKey, Chunk>,
    /// Sorted so two runs schedule rebuilds in the same order.
    needs_mesh_update: BTreeSet<(i32, i32, i32)>,
    update_task: TaskHandle<()>,
    mesh_jobs: usize,
    mesh_promise: Option<Promise<()>>,
}

impl LayerState {
    fn new(options: Arc<LayerOptions>) -> Self {
        let quality = options.quality.to_quality();
        Self {
            options,
            quality,
            chunks: HashMap::new(),
            needs_mesh_update: BTreeSet::new(),
            update_task: TaskHandle::done(()),
            mesh_jobs: 0,
            mesh_promise: None,
        }
    }
}

pub struct World {
    authority: Authority,
    options: HashMap<ResourceId, Arc<LayerOptions>>,
    layers: HashMap<ResourceId, LayerState>,
    /// Survives layer destruction; bumped on clear so stale worker results
    /// are dropped.
    layer_epochs: HashMap<ResourceId, u64>,
    log: ModificationLog,
    pending: VecDeque<PendingModification>,
    in_flight: Option<InFlight>,
    tx: Sender<WorkerMsg>,
    rx: Receiver<WorkerMsg>,
    executor: Arc<dyn Executor>,
    writers: Arc<MeshWriterPool>,
    bindings: Box<dyn HostBindings>,
    textures_enabled: bool,
    receiving_modifications: bool,
    /// Main-thread time spent on chunk tasks this tick; reset by `tick`.
    current_tick_chunk_task_duration: Duration,
    /// Source chunks whose fresh texture still has to be bound on
    /// referencing layers.
    texture_fanout: Vec<(ResourceId, ChunkKey)>,
}

impl World {
    #[must_use]
    pub fn new(
        authority: Authority,
        executor: Arc<dyn Executor>,
        writers: Arc<MeshWriterPool>,
        mut bindings: Box<dyn HostBindings>,
    ) -> Self {
        let (tx, rx) = mpsc::channel();
        let textures_enabled = bindings.texture_factory().is_some();
        Self {
            authority,
            options: HashMap::new(),
            layers: HashMap::new(),
            layer_epochs: HashMap::new(),
            log: ModificationLog::default(),
            pending: VecDeque::new(),
            in_flight: None,
            tx,
            rx,
            executor,
            writers,
            bindings,
            textures_enabled,
            receiving_modifications: false,
            current_tick_chunk_task_duration: Duration::ZERO,
            texture_fanout: Vec::new(),
        }
    }

    #[must_use]
    pub fn authority(&self) -> Authority {
        self.authority
    }

    #[must_use]
    pub fn log(&self) -> &ModificationLog {
        &self.log
    }

    /// Main-thread chunk-task time spent this tick, exposed so host code can
    /// account its own promotion work against the same budget.
    #[must_use]
    pub fn current_tick_chunk_task_duration(&self) -> Duration {
        self.current_tick_chunk_task_duration
    }

    /// Bind options to a resource. Quality is immutable once any chunk
    /// exists, so reconfiguring a live layer is a programmer error.
    pub fn configure_layer(&mut self, resource: ResourceId, options: LayerOptions) {
        if self
            .layers
            .get(&resource)
            .is_some_and(|l| !l.chunks.is_empty())
        {
            log::error!("layer {resource:?} reconfigured while chunks exist");
            panic!("layer options are immutable once chunks are bound");
        }
        self.layers.remove(&resource);
        self.options.insert(resource, Arc::new(options));
    }

    #[must_use]
    pub fn layer_options(&self, resource: ResourceId) -> Option<Arc<LayerOptions>> {
        self.options.get(&resource).cloned()
    }

    #[must_use]
    pub fn layer_quality(&self, resource: ResourceId) -> Option<Quality> {
        self.options.get(&resource).map(|o| o.quality.to_quality())
    }

    /// Sorted keys of the chunks currently alive in a layer.
    #[must_use]
    pub fn chunk_keys(&self, resource: ResourceId) -> Vec<ChunkKey> {
        let mut keys: Vec<ChunkKey> = self
            .layers
            .get(&resource)
            .map(|l| l.chunks.keys().copied().collect())
            .unwrap_or_default();
        keys.sort_by_key(|k| (k.x, k.y, k.z));
        keys
    }

    #[must_use]
    pub fn chunk(&self, resource: ResourceId, key: ChunkKey) -> Option<&Chunk> {
        self.layers.get(&resource)?.chunks.get(&key)
    }

    /// Raw samples of one chunk, for convergence checks and tooling.
    #[must_use]
    pub fn sample_bytes(&self, resource: ResourceId, key: ChunkKey) -> Option<Vec<u8>> {
        self.chunk(resource, key).map(Chunk::sample_bytes)
    }

    /// Union `shape` into `resource`'s field. Completes when every affected
    /// chunk has applied the modification.
    pub fn add_async(&mut self, shape: Shape, resource: ResourceId) -> TaskHandle<()> {
        self.modify(SdfOp::Add, shape, resource)
    }

    /// Carve `shape` out of `resource`'s field.
    pub fn subtract_async(&mut self, shape: Shape, resource: ResourceId) -> TaskHandle<()> {
        self.modify(SdfOp::Subtract, shape, resource)
    }

    /// Apply a replicated modification; the only mutation path observers
    /// accept.
    pub fn apply_replicated(
        &mut self,
        op: SdfOp,
        shape: Shape,
        resource: ResourceId,
    ) -> TaskHandle<()> {
        self.receiving_modifications = true;
        let handle = self.modify(op, shape, resource);
        self.receiving_modifications = false;
        handle
    }

    fn modify(&mut self, op: SdfOp, shape: Shape, resource: ResourceId) -> TaskHandle<()> {
        self.assert_can_modify();
        if !self.options.contains_key(&resource) {
            // A local caller naming an unconfigured resource is a programmer
            // error. A replicated one is a peer configuration gap; skipping
            // it would desync the log, so apply it under defaults.
            assert!(
                self.receiving_modifications,
                "layer options not configured for {resource:?}"
            );
            log::warn!(
                "replicated modification for unconfigured {resource:?}; using default options"
            );
            self.options
                .insert(resource, Arc::new(LayerOptions::default()));
        }
        self.log.push(Modification {
            op,
            resource,
            shape: shape.clone(),
        });
        let (promise, handle) = Promise::pair();
        self.pending.push_back(PendingModification {
            op,
            resource,
            shape,
            promise,
        });
        self.start_next_modification();
        handle
    }

    fn assert_can_modify(&self) {
        let permitted = match self.authority {
            Authority::Server | Authority::LocalOnly => true,
            Authority::Observer => self.receiving_modifications,
        };
        if !permitted {
            log::error!("world modified outside the replication scope on an observer");
            panic!("observer worlds only accept replicated modifications");
        }
    }

    /// The single-slot modification chain: pop queued modifications until
    /// one actually dispatches work, then wait for its completions.
    fn start_next_modification(&mut self) {
        while self.in_flight.is_none() {
            let Some(m) = self.pending.pop_front() else {
                return;
            };
            let epoch = self.layer_epochs.get(&m.resource).copied().unwrap_or(0);
            let quality = self.options[&m.resource].quality.to_quality();
            let keys = affected_chunks(&m.shape, &quality);
            let create = matches!(m.op, SdfOp::Add);
            let mut jobs = 0usize;
            if !keys.is_empty() {
                if create && !self.layers.contains_key(&m.resource) {
                    self.layers
                        .insert(m.resource, LayerState::new(self.options[&m.resource].clone()));
                }
                if let Some(layer) = self.layers.get_mut(&m.resource) {
                    for key in &keys {
                        if create && !layer.chunks.contains_key(key) {
                            let chunk = Chunk::new(
                                m.resource,
                                *key,
                                layer.quality,
                                &layer.options,
                                self.bindings.as_mut(),
                            );
                            layer.chunks.insert(*key, chunk);
                        }
                        if let Some(chunk) = layer.chunks.get_mut(key) {
                            chunk.dispatch(&m.shape, m.op, self.executor.as_ref(), &self.tx, epoch);
                            jobs += 1;
                        }
                    }
                }
            }
            if jobs == 0 {
                m.promise.complete(());
                continue;
            }
            self.in_flight = Some(InFlight {
                resource: m.resource,
                remaining: jobs,
                changed: Vec::new(),
                promise: m.promise,
            });
        }
    }

    /// Server tick / client tick entry point. Resets the main-thread budget,
    /// promotes background completions, and advances mesh maintenance.
    pub fn tick(&mut self) {
        self.current_tick_chunk_task_duration = Duration::ZERO;
        self.advance();
    }

    /// Pre-render hook: same maintenance, sharing the tick's budget.
    pub fn pre_render(&mut self) {
        self.advance();
    }

    fn advance(&mut self) {
        self.pump_completions();
        let mut resources: Vec<ResourceId> = self.layers.keys().copied().collect();
        resources.sort_unstable();
        for resource in resources {
            self.dispatch_mesh_update(resource);
        }
        self.drain_main_tasks();
        self.process_texture_fanout();
    }

    fn pump_completions(&mut self) {
        while let Ok(msg) = self.rx.try_recv() {
            match msg {
                WorkerMsg::ModificationDone {
                    resource,
                    key,
                    epoch,
                    changed,
                } => {
                    if self.layer_epochs.get(&resource).copied().unwrap_or(0) != epoch {
                        continue;
                    }
                    let Some(fl) = self.in_flight.as_mut() else {
                        continue;
                    };
                    debug_assert_eq!(fl.resource, resource);
                    if changed {
                        fl.changed.push(key);
                    }
                    fl.remaining -= 1;
                    if fl.remaining == 0 {
                        let fl = self.in_flight.take().expect("in-flight checked above");
                        let resource = fl.resource;
                        if let Some(layer) = self.layers.get_mut(&resource) {
                            for k in &fl.changed {
                                layer.needs_mesh_update.insert((k.x, k.y, k.z));
                            }
                        }
                        fl.promise.complete(());
                        self.dispatch_mesh_update(resource);
                        self.start_next_modification();
                    }
                }
                WorkerMsg::MeshDone {
                    resource,
                    key,
                    epoch,
                    output,
                } => {
                    if self.layer_epochs.get(&resource).copied().unwrap_or(0) != epoch {
                        continue;
                    }
                    let is_source = self.is_texture_source(resource);
                    let mut fanout = false;
                    if let Some(layer) = self.layers.get_mut(&resource) {
                        if let Some(output) = output {
                            if let Some(chunk) = layer.chunks.get_mut(&key) {
                                let options = layer.options.clone();
                                chunk.queue_mesh_results(output, &options);
                                if is_source {
                                    chunk.queue_texture_refresh();
                                    fanout = true;
                                }
                            }
                        }
                        layer.mesh_jobs = layer.mesh_jobs.saturating_sub(1);
                        if layer.mesh_jobs == 0 {
                            if let Some(promise) = layer.mesh_promise.take() {
                                promise.complete(());
                            }
                        }
                    }
                    if fanout {
                        self.texture_fanout.push((resource, key));
                    }
                }
            }
        }
    }

    /// Start a layer mesh-update pass unless the previous one still runs.
    /// Chunks dirtied meanwhile are picked up on the next tick.
    fn dispatch_mesh_update(&mut self, resource: ResourceId) {
        let epoch = self.layer_epochs.get(&resource).copied().unwrap_or(0);
        let is_source = self.is_texture_source(resource);
        let textures_enabled = self.textures_enabled;
        let Some(layer) = self.layers.get_mut(&resource) else {
            return;
        };
        if !layer.update_task.is_completed() || layer.needs_mesh_update.is_empty() {
            return;
        }
        let keys: Vec<ChunkKey> = std::mem::take(&mut layer.needs_mesh_update)
            .into_iter()
            .map(|(x, y, z)| IVec3::new(x, y, z))
            .collect();
        let (promise, handle) = Promise::pair();
        layer.update_task = handle;
        layer.mesh_jobs = 0;
        let options = layer.options.clone();
        let has_mesh_consumers = options.rendering_enabled() || options.collision_enabled();
        let mut fanout: Vec<(ResourceId, ChunkKey)> = Vec::new();
        for key in keys {
            let Some(chunk) = layer.chunks.get_mut(&key) else {
                continue;
            };
            if has_mesh_consumers {
                if chunk.update_mesh(self.executor.as_ref(), &self.writers, &self.tx, epoch, &options)
                {
                    layer.mesh_jobs += 1;
                }
            } else if chunk.mark_mesh_current() && is_source && textures_enabled {
                chunk.queue_texture_refresh();
                fanout.push((resource, key));
            }
        }
        if layer.mesh_jobs == 0 {
            promise.complete(());
        } else {
            layer.mesh_promise = Some(promise);
        }
        self.texture_fanout.extend(fanout);
    }

    fn drain_main_tasks(&mut self) {
        let World {
            layers,
            bindings,
            current_tick_chunk_task_duration: spent,
            ..
        } = self;
        let mut resources: Vec<ResourceId> = layers.keys().copied().collect();
        resources.sort_unstable();
        for resource in resources {
            let Some(layer) = layers.get_mut(&resource) else {
                continue;
            };
            let mut chunk_keys: Vec<ChunkKey> = layer
                .chunks
                .iter()
                .filter(|(_, c)| c.has_pending_main())
                .map(|(k, _)| *k)
                .collect();
            chunk_keys.sort_by_key(|k| (k.x, k.y, k.z));
            for key in chunk_keys {
                if *spent >= crate::chunk::MAIN_TASK_BUDGET {
                    return;
                }
                if let Some(chunk) = layer.chunks.get_mut(&key) {
                    chunk.drain_main_tasks(bindings.as_mut(), spent);
                }
            }
        }
    }

    /// Does any configured layer reference this resource's chunk textures?
    fn is_texture_source(&self, resource: ResourceId) -> bool {
        self.textures_enabled
            && self.options.iter().any(|(r, o)| {
                *r != resource && o.references_texture_of(resource).is_some()
            })
    }

    /// Bind fresh source textures onto referencing layers' chunks at the
    /// same key. Entries wait here until the source chunk's upload task has
    /// actually minted a handle on the main thread.
    fn process_texture_fanout(&mut self) {
        if self.texture_fanout.is_empty() {
            return;
        }
        let entries = std::mem::take(&mut self.texture_fanout);
        let mut waiting = Vec::new();
        for (source, key) in entries {
            let Some(source_layer) = self.layers.get(&source) else {
                continue;
            };
            let source_chunk_size = source_layer.quality.chunk_size;
            let handle = match source_layer.chunks.get(&key) {
                Some(chunk) => match chunk.texture() {
                    Some(h) => h,
                    None => {
                        waiting.push((source, key));
                        continue;
                    }
                },
                None => continue,
            };
            let targets: Vec<(ResourceId, String, f32)> = self
                .layers
                .iter()
                .filter(|(r, _)| **r != source)
                .filter_map(|(r, l)| {
                    l.options
                        .references_texture_of(source)
                        .map(|t| (*r, t.attribute.clone(), l.quality.chunk_size))
                })
                .collect();
            for (target, attribute, chunk_size) in targets {
                if (chunk_size - source_chunk_size).abs() > f32::EPSILON {
                    log::warn!(
                        "layer {target:?} references texture of {source:?} with mismatched \
                         chunk_size ({chunk_size} vs {source_chunk_size}); skipping"
                    );
                    continue;
                }
                if let Some(chunk) = self
                    .layers
                    .get_mut(&target)
                    .and_then(|l| l.chunks.get_mut(&key))
                {
                    chunk.queue_texture_bind(attribute, handle);
                }
            }
        }
        self.texture_fanout.extend(waiting);
    }

    /// Truncate the log, cancel everything queued, and dispose every chunk.
    /// In-flight sample mutations run to completion against detached arrays;
    /// their results are dropped by the epoch bump.
    pub fn clear_async(&mut self) -> TaskHandle<()> {
        self.assert_can_modify();
        self.log.clear();
        self.reset_all_layers();
        TaskHandle::done(())
    }

    /// Per-resource clear: drop one layer's chunks and filter the log to
    /// the other resources. Observers resync through the clear counter.
    pub fn clear_resource_async(&mut self, resource: ResourceId) -> TaskHandle<()> {
        self.assert_can_modify();
        self.log.clear_resource(resource);
        *self.layer_epochs.entry(resource).or_insert(0) += 1;
        if let Some(mut layer) = self.layers.remove(&resource) {
            for (_, mut chunk) in layer.chunks.drain() {
                chunk.dispose();
            }
            if let Some(promise) = layer.mesh_promise.take() {
                promise.cancel();
            }
        }
        let mut kept = VecDeque::new();
        for p in self.pending.drain(..) {
            if p.resource == resource {
                p.promise.cancel();
            } else {
                kept.push_back(p);
            }
        }
        self.pending = kept;
        if self
            .in_flight
            .as_ref()
            .is_some_and(|fl| fl.resource == resource)
        {
            if let Some(fl) = self.in_flight.take() {
                fl.promise.cancel();
            }
            self.start_next_modification();
        }
        self.texture_fanout.retain(|(r, _)| *r != resource);
        TaskHandle::done(())
    }

    /// Observer-side resync: adopt the authority's clear counter and drop
    /// all local state so the replayed log rebuilds it.
    pub fn observer_clear(&mut self, clear_count: i32) {
        self.log.reset_to_clear_count(clear_count);
        self.reset_all_layers();
    }

    /// Observer-side disposal hook for a single chunk.
    pub fn remove_client_chunk(&mut self, resource: ResourceId, key: ChunkKey) {
        if let Some(layer) = self.layers.get_mut(&resource) {
            if let Some(mut chunk) = layer.chunks.remove(&key) {
                chunk.dispose();
            }
            layer.needs_mesh_update.remove(&(key.x, key.y, key.z));
        }
    }

    fn reset_all_layers(&mut self) {
        let resources: Vec<ResourceId> = self.layers.keys().copied().collect();
        for resource in resources {
            *self.layer_epochs.entry(resource).or_insert(0) += 1;
        }
        for (_, mut layer) in self.layers.drain() {
            for (_, mut chunk) in layer.chunks.drain() {
                chunk.dispose();
            }
            if let Some(promise) = layer.mesh_promise.take() {
                promise.cancel();
            }
        }
        for p in self.pending.drain(..) {
            p.promise.cancel();
        }
        if let Some(fl) = self.in_flight.take() {
            fl.promise.cancel();
        }
        self.texture_fanout.clear();
    }

    /// No queued, in-flight, or pending main-thread work anywhere.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.pending.is_empty()
            && self.in_flight.is_none()
            && self.texture_fanout.is_empty()
            && self.layers.values().all(|l| {
                l.update_task.is_completed()
                    && l.needs_mesh_update.is_empty()
                    && l.chunks
                        .values()
                        .all(|c| !c.has_pending_main() && c.update_task().is_completed())
            })
    }

    /// Tick until idle or the timeout elapses. Returns whether idle was
    /// reached. Mainly for tests and tools; engines drive `tick` directly.
    pub fn run_until_idle(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.tick();
            if self.is_idle() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::yield_now();
        }
    }
}

/// Keys of every chunk whose closed extent intersects the shape's bounds.
///
/// Unbounded shapes yield nothing; callers clip them inside a bounded shape
/// (`Intersect`) to make them land somewhere.
#[must_use]
pub fn affected_chunks(shape: &Shape, quality: &Quality) -> Vec<ChunkKey> {
    let Some(bounds) = shape.bounds() else {
        return Vec::new();
    };
    let cs = quality.chunk_size;
    // Closed-interval intersection: a chunk touching the bounds at a face
    // still owns margin samples there.
    let lo = |w: f32| (w / cs).ceil() as i32 - 1;
    let hi = |w: f32| (w / cs).floor() as i32;
    let (z_lo, z_hi) = match quality.dimension {
        Dimension::Two => (0, 0),
        Dimension::Three => (lo(bounds.min.z), hi(bounds.max.z)),
    };
    let mut keys = Vec::new();
    for z in z_lo..=z_hi {
        for y in lo(bounds.min.y)..=hi(bounds.max.y) {
            for x in lo(bounds.min.x)..=hi(bounds.max.x) {
                keys.push(IVec3::new(x, y, z));
            }
        }
    }
    keys
}
