//! Host-engine seams: everything the world consumes but does not implement.
//!
//! The core schedules work and owns sample state; the embedding engine
//! supplies execution, mesh extraction, physics, scene objects, and texture
//! upload through the traits here. Headless authorities use `NullBindings`.

use crate::task::CancelToken;
use crate::ResourceId;
use anyhow::Result;
use glam::UVec3;
use sdf_field::{ChunkKey, SampleView};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

/// Background job executor.
pub trait Executor: Send + Sync {
    fn run_in_thread(&self, job: Box<dyn FnOnce() + Send>);
}

/// Runs jobs on the calling thread. Deterministic; used by tests and
/// single-threaded hosts.
#[derive(Default)]
pub struct InlineExecutor;

impl Executor for InlineExecutor {
    fn run_in_thread(&self, job: Box<dyn FnOnce() + Send>) {
        job();
    }
}

type Job = Box<dyn FnOnce() + Send>;

/// Fixed-size worker pool over std threads.
pub struct ThreadPool {
    tx: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    #[must_use]
    pub fn new(threads: usize) -> Self {
        let (tx, rx) = mpsc::channel::<Job>();
        let rx = Arc::new(Mutex::new(rx));
        let workers = (0..threads.max(1))
            .map(|i| {
                let rx: Arc<Mutex<Receiver<Job>>> = rx.clone();
                thread::Builder::new()
                    .name(format!("sdf-worker-{i}"))
                    .spawn(move || loop {
                        let job = {
                            let guard = rx.lock().expect("worker queue poisoned");
                            guard.recv()
                        };
                        match job {
                            Ok(job) => job(),
                            Err(_) => break,
                        }
                    })
                    .expect("spawn sdf worker")
            })
            .collect();
        Self {
            tx: Some(tx),
            workers,
        }
    }
}

impl Executor for ThreadPool {
    fn run_in_thread(&self, job: Job) {
        if let Some(tx) = &self.tx {
            // A send failure means the pool is shutting down; the job's
            // promise reports failure through its drop.
            let _ = tx.send(job);
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        drop(self.tx.take());
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

/// CPU mesh buffers produced by a writer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshCpu {
    pub positions: Vec<[f32; 3]>,
    pub normals: Vec<[f32; 3]>,
    pub indices: Vec<u32>,
}

impl MeshCpu {
    /// Check buffer invariants before publication.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.positions.len() == self.normals.len(),
            "pos/normal len mismatch"
        );
        anyhow::ensure!(self.indices.len() % 3 == 0, "indices not multiple of 3");
        let n = self.positions.len() as u32;
        anyhow::ensure!(
            self.indices.iter().all(|&i| i < n),
            "index out of range"
        );
        Ok(())
    }
}

/// External mesh extraction backend. Rented per rebuild from the pool.
///
/// Implementations observe `cancel` between slices and return `Ok(None)`
/// once it is set; a cancelled extraction is not an error.
pub trait MeshWriter: Send {
    fn write(&mut self, view: &SampleView<'_>, cancel: &CancelToken) -> Result<Option<MeshCpu>>;
}

/// Rental pool of mesh writers; grows on demand from the factory.
pub struct MeshWriterPool {
    factory: Box<dyn Fn() -> Box<dyn MeshWriter> + Send + Sync>,
    free: Mutex<Vec<Box<dyn MeshWriter>>>,
}

impl MeshWriterPool {
    #[must_use]
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> Box<dyn MeshWriter> + Send + Sync + 'static,
    {
        Self {
            factory: Box::new(factory),
            free: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn rent(&self) -> Box<dyn MeshWriter> {
        self.free
            .lock()
            .expect("writer pool poisoned")
            .pop()
            .unwrap_or_else(|| (self.factory)())
    }

    pub fn give_back(&self, writer: Box<dyn MeshWriter>) {
        self.free.lock().expect("writer pool poisoned").push(writer);
    }
}

/// Opaque GPU texture identifier minted by the host's factory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub u64);

/// Values a scene object attribute can take.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Texture(TextureHandle),
    Scalar(f32),
}

/// Physics body owned by a chunk while it has collision.
pub trait PhysicsBody: Send {
    fn add_mesh_shape(&mut self, positions: &[[f32; 3]], indices: &[u32], tags: &[String]);
    fn update_mesh(&mut self, positions: &[[f32; 3]], indices: &[u32]);
    fn remove(&mut self);
}

/// Scene-graph object a chunk renders through.
pub trait SceneObject: Send {
    fn set_attribute(&mut self, name: &str, value: AttributeValue);
    fn replace_model(&mut self, mesh: &MeshCpu, material: &str);
}

/// 2D/3D texture factory accepting raw i8/u8 sample data.
pub trait TextureFactory: Send {
    fn create(&mut self, size: UVec3, data: &[u8]) -> TextureHandle;
    fn update(&mut self, handle: TextureHandle, data: &[u8]);
}

/// Per-chunk object construction, supplied by the integrator.
pub trait HostBindings: Send {
    fn create_scene_object(
        &mut self,
        resource: ResourceId,
        key: ChunkKey,
    ) -> Option<Box<dyn SceneObject>>;
    fn create_physics_body(
        &mut self,
        resource: ResourceId,
        key: ChunkKey,
    ) -> Option<Box<dyn PhysicsBody>>;
    fn texture_factory(&mut self) -> Option<&mut dyn TextureFactory>;
}

/// Headless bindings: no scene, no physics, no textures. The usual choice
/// for an authority that only simulates and replicates.
#[derive(Default)]
pub struct NullBindings;

impl HostBindings for NullBindings {
    fn create_scene_object(
        &mut self,
        _resource: ResourceId,
        _key: ChunkKey,
    ) -> Option<Box<dyn SceneObject>> {
        None
    }
    fn create_physics_body(
        &mut self,
        _resource: ResourceId,
        _key: ChunkKey,
    ) -> Option<Box<dyn PhysicsBody>> {
        None
    }
    fn texture_factory(&mut self) -> Option<&mut dyn TextureFactory> {
        None
    }
}
