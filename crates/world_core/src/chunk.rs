//! One chunk: a sample array, its derived render/collision meshes, and the
//! machinery that keeps them coherent.
//!
//! A chunk processes at most one background modification at a time and at
//! most one mesh rebuild; a newer rebuild cancels the one in flight. Results
//! cross back to the main thread through a three-slot task queue where a
//! newer task of the same kind supersedes the pending one.

use crate::config::LayerOptions;
use crate::host::{
    AttributeValue, Executor, HostBindings, MeshCpu, MeshWriter, MeshWriterPool, PhysicsBody,
    SceneObject, TextureHandle,
};
use crate::modlog::SdfOp;
use crate::task::{CancelToken, Promise, TaskHandle};
use crate::world::{MeshOutput, WorkerMsg};
use crate::ResourceId;
use glam::Vec3;
use sdf_field::{ChunkKey, FieldMeshWriter, Quality, SampleArray, SampleView};
use sdf_shape::Shape;
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Soft cap on main-thread time spent promoting background results per tick,
/// shared by every chunk of a world.
pub const MAIN_TASK_BUDGET: Duration = Duration::from_millis(1);

/// The three main-thread task kinds. One pending slot each.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MainTaskKind {
    UpdateRenderMeshes = 0,
    UpdateCollisionMesh = 1,
    UpdateLayerTexture = 2,
}

type MainJob = Box<dyn FnOnce(&mut Chunk, &mut dyn HostBindings) + Send>;

struct PendingMainTask {
    job: MainJob,
    promise: Promise<()>,
}

#[derive(Default)]
struct MainTaskSlots {
    slots: [Option<PendingMainTask>; 3],
}

impl MainTaskSlots {
    /// Replace the slot; the superseded task completes as cancelled.
    fn set(&mut self, kind: MainTaskKind, task: PendingMainTask) {
        if let Some(prev) = self.slots[kind as usize].take() {
            prev.promise.cancel();
        }
        self.slots[kind as usize] = Some(task);
    }

    /// Pop in fixed kind order: render, collision, texture.
    fn take_first(&mut self) -> Option<PendingMainTask> {
        self.slots.iter_mut().find_map(Option::take)
    }

    fn any(&self) -> bool {
        self.slots.iter().any(Option::is_some)
    }

    fn cancel_all(&mut self) {
        for slot in &mut self.slots {
            if let Some(task) = slot.take() {
                task.promise.cancel();
            }
        }
    }
}

/// Adapts the host mesh writer onto the sample array's extraction seam.
struct WriterAdapter<'a> {
    writer: &'a mut dyn MeshWriter,
    cancel: &'a CancelToken,
}

impl FieldMeshWriter for WriterAdapter<'_> {
    type Output = anyhow::Result<Option<MeshCpu>>;
    fn write_field(&mut self, view: &SampleView<'_>) -> Self::Output {
        self.writer.write(view, self.cancel)
    }
}

pub struct Chunk {
    resource: ResourceId,
    key: ChunkKey,
    quality: Quality,
    array: Arc<Mutex<SampleArray>>,
    /// Most recent background modification; completed before the next one
    /// dispatches (the world serialises, this records the chain).
    last_modification: TaskHandle<bool>,
    /// Array counter reflected by the current mesh.
    last_mesh_modification_count: u64,
    update_task: TaskHandle<()>,
    update_cancel: CancelToken,
    pending_main: Mutex<MainTaskSlots>,
    scene: Option<Box<dyn SceneObject>>,
    physics: Option<Box<dyn PhysicsBody>>,
    physics_mesh_added: bool,
    texture: Option<TextureHandle>,
}

impl Chunk {
    pub(crate) fn new(
        resource: ResourceId,
        key: ChunkKey,
        quality: Quality,
        options: &LayerOptions,
        bindings: &mut dyn HostBindings,
    ) -> Self {
        let scene = if options.material.is_some() {
            bindings.create_scene_object(resource, key)
        } else {
            None
        };
        let physics = if options.collision_enabled() {
            bindings.create_physics_body(resource, key)
        } else {
            None
        };
        Self {
            resource,
            key,
            quality,
            array: Arc::new(Mutex::new(SampleArray::new(quality))),
            last_modification: TaskHandle::done(false),
            last_mesh_modification_count: 0,
            update_task: TaskHandle::done(()),
            update_cancel: CancelToken::new(),
            pending_main: Mutex::new(MainTaskSlots::default()),
            scene,
            physics,
            physics_mesh_added: false,
            texture: None,
        }
    }

    #[inline]
    #[must_use]
    pub fn resource(&self) -> ResourceId {
        self.resource
    }

    #[inline]
    #[must_use]
    pub fn key(&self) -> ChunkKey {
        self.key
    }

    /// World-space origin: `key * chunk_size`.
    #[must_use]
    pub fn origin(&self) -> Vec3 {
        self.key.as_vec3() * self.quality.chunk_size
    }

    /// Mirror of the sample array's counter.
    #[must_use]
    pub fn modification_count(&self) -> u64 {
        self.array
            .lock()
            .expect("sample array poisoned")
            .modification_count()
    }

    /// Copy of the raw samples, for convergence checks and tooling.
    #[must_use]
    pub fn sample_bytes(&self) -> Vec<u8> {
        self.array
            .lock()
            .expect("sample array poisoned")
            .samples()
            .to_vec()
    }

    #[must_use]
    pub fn texture(&self) -> Option<TextureHandle> {
        self.texture
    }

    #[must_use]
    pub fn has_pending_main(&self) -> bool {
        self.pending_main.lock().expect("main task queue poisoned").any()
    }

    #[must_use]
    pub(crate) fn update_task(&self) -> &TaskHandle<()> {
        &self.update_task
    }

    /// Dispatch one sample mutation to a worker. The shape is moved into the
    /// chunk's local frame first so the array samples purely locally.
    pub(crate) fn dispatch(
        &mut self,
        shape: &Shape,
        op: SdfOp,
        executor: &dyn Executor,
        tx: &Sender<WorkerMsg>,
        epoch: u64,
    ) -> TaskHandle<bool> {
        debug_assert!(
            self.last_modification.is_completed(),
            "per-chunk modifications are serialised by the world"
        );
        let local = shape.clone().translated(-self.origin());
        let (promise, handle) = Promise::pair();
        self.last_modification = handle.clone();
        let array = self.array.clone();
        let tx = tx.clone();
        let (resource, key) = (self.resource, self.key);
        executor.run_in_thread(Box::new(move || {
            // Mutations are never cancelled; the store must stay well-defined.
            let changed = {
                let mut array = array.lock().expect("sample array poisoned");
                match op {
                    SdfOp::Add => array.add(&local),
                    SdfOp::Subtract => array.subtract(&local),
                }
            };
            promise.complete(changed);
            let _ = tx.send(WorkerMsg::ModificationDone {
                resource,
                key,
                epoch,
                changed,
            });
        }));
        handle
    }

    /// Start a mesh rebuild if the array moved past the last meshed counter.
    /// Cancels a rebuild already in flight. Returns whether a job was
    /// dispatched (a `MeshDone` will follow for it).
    pub(crate) fn update_mesh(
        &mut self,
        executor: &dyn Executor,
        writers: &Arc<MeshWriterPool>,
        tx: &Sender<WorkerMsg>,
        epoch: u64,
        options: &LayerOptions,
    ) -> bool {
        let count = self
            .array
            .lock()
            .expect("sample array poisoned")
            .modification_count();
        if count == self.last_mesh_modification_count {
            return false;
        }
        self.update_cancel.cancel();
        let cancel = CancelToken::new();
        self.update_cancel = cancel.clone();
        self.last_mesh_modification_count = count;

        let (promise, handle) = Promise::pair();
        self.update_task = handle;
        let wants_render = options.rendering_enabled();
        let wants_collision = options.collision_enabled();
        let origin = self.origin();
        let array = self.array.clone();
        let writers = writers.clone();
        let tx = tx.clone();
        let (resource, key) = (self.resource, self.key);
        executor.run_in_thread(Box::new(move || {
            let mut writer = writers.rent();
            let result = if cancel.is_cancelled() {
                Ok(None)
            } else {
                let array = array.lock().expect("sample array poisoned");
                let mut adapter = WriterAdapter {
                    writer: writer.as_mut(),
                    cancel: &cancel,
                };
                array.write_to(&mut adapter)
            };
            writers.give_back(writer);
            let output = match result {
                Ok(Some(mesh)) if !cancel.is_cancelled() => {
                    if let Err(e) = mesh.validate() {
                        log::warn!("chunk {resource:?}@{key}: dropping invalid mesh: {e}");
                        promise.cancel();
                        None
                    } else {
                        let collision = wants_collision.then(|| {
                            let mut positions = mesh.positions.clone();
                            for p in &mut positions {
                                p[0] += origin.x;
                                p[1] += origin.y;
                                p[2] += origin.z;
                            }
                            (positions, mesh.indices.clone())
                        });
                        let render = wants_render.then_some(mesh);
                        promise.complete(());
                        Some(MeshOutput { render, collision })
                    }
                }
                Ok(_) => {
                    promise.cancel();
                    None
                }
                Err(e) => {
                    log::warn!("chunk {resource:?}@{key}: mesh extraction failed: {e}");
                    promise.fail(e.to_string());
                    None
                }
            };
            let _ = tx.send(WorkerMsg::MeshDone {
                resource,
                key,
                epoch,
                output,
            });
        }));
        true
    }

    /// Advance the meshed counter without extraction, for layers with no
    /// mesh consumers. Returns whether the counter moved.
    pub(crate) fn mark_mesh_current(&mut self) -> bool {
        let count = self
            .array
            .lock()
            .expect("sample array poisoned")
            .modification_count();
        if count == self.last_mesh_modification_count {
            return false;
        }
        self.last_mesh_modification_count = count;
        true
    }

    /// Promote finished background mesh work into main-thread tasks.
    pub(crate) fn queue_mesh_results(&mut self, output: MeshOutput, options: &LayerOptions) {
        if let Some(mesh) = output.render {
            let material = options.material.clone().unwrap_or_default();
            self.enqueue_main(
                MainTaskKind::UpdateRenderMeshes,
                Box::new(move |chunk, _bindings| {
                    if let Some(scene) = chunk.scene.as_deref_mut() {
                        scene.replace_model(&mesh, &material);
                    }
                }),
            );
        }
        if let Some((positions, indices)) = output.collision {
            let tags = options.split_collision_tags.clone();
            self.enqueue_main(
                MainTaskKind::UpdateCollisionMesh,
                Box::new(move |chunk, _bindings| {
                    let added = chunk.physics_mesh_added;
                    let mut touched = false;
                    if let Some(body) = chunk.physics.as_deref_mut() {
                        if added {
                            body.update_mesh(&positions, &indices);
                        } else {
                            body.add_mesh_shape(&positions, &indices, &tags);
                        }
                        touched = true;
                    }
                    if touched {
                        chunk.physics_mesh_added = true;
                    }
                }),
            );
        }
    }

    /// Re-upload this chunk's samples as a layer texture. The bytes are
    /// captured now; the upload happens on the main thread.
    pub(crate) fn queue_texture_refresh(&mut self) {
        let (data, size) = {
            let array = self.array.lock().expect("sample array poisoned");
            (array.samples().to_vec(), array.size())
        };
        self.enqueue_main(
            MainTaskKind::UpdateLayerTexture,
            Box::new(move |chunk, bindings| {
                let Some(factory) = bindings.texture_factory() else {
                    return;
                };
                match chunk.texture {
                    Some(handle) => factory.update(handle, &data),
                    None => chunk.texture = Some(factory.create(size, &data)),
                }
            }),
        );
    }

    /// Bind another layer's chunk texture onto this chunk's shader attribute.
    pub(crate) fn queue_texture_bind(&mut self, attribute: String, handle: TextureHandle) {
        self.enqueue_main(
            MainTaskKind::UpdateLayerTexture,
            Box::new(move |chunk, _bindings| {
                if let Some(scene) = chunk.scene.as_deref_mut() {
                    scene.set_attribute(&attribute, AttributeValue::Texture(handle));
                }
            }),
        );
    }

    pub(crate) fn enqueue_main(&mut self, kind: MainTaskKind, job: MainJob) -> TaskHandle<()> {
        let (promise, handle) = Promise::pair();
        self.pending_main
            .lock()
            .expect("main task queue poisoned")
            .set(kind, PendingMainTask { job, promise });
        handle
    }

    /// Run pending main-thread tasks until empty or the shared budget is
    /// exhausted. Each task's measured duration is added to `spent`.
    pub(crate) fn drain_main_tasks(
        &mut self,
        bindings: &mut dyn HostBindings,
        spent: &mut Duration,
    ) {
        loop {
            if *spent >= MAIN_TASK_BUDGET {
                return;
            }
            let task = {
                self.pending_main
                    .lock()
                    .expect("main task queue poisoned")
                    .take_first()
            };
            let Some(task) = task else { return };
            let start = Instant::now();
            (task.job)(self, bindings);
            task.promise.complete(());
            *spent += start.elapsed();
        }
    }

    /// Cancel the in-flight rebuild and all pending main-thread follow-ups.
    pub(crate) fn cancel_update(&mut self) {
        self.update_cancel.cancel();
        self.pending_main
            .lock()
            .expect("main task queue poisoned")
            .cancel_all();
    }

    /// Tear down engine-side state. In-flight sample mutations keep their
    /// `Arc` and run to completion against the detached array.
    pub(crate) fn dispose(&mut self) {
        self.cancel_update();
        if let Some(body) = self.physics.as_deref_mut() {
            body.remove();
        }
        self.physics = None;
        self.scene = None;
    }
}
