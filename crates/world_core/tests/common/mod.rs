//! Shared test doubles: a minimal mesh writer and recording host bindings.

// Not every test binary uses every double.
#![allow(dead_code)]

use glam::UVec3;
use sdf_field::{SampleView, ENCODED_ZERO};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use world_core::host::{
    AttributeValue, HostBindings, MeshCpu, MeshWriter, MeshWriterPool, PhysicsBody, SceneObject,
    TextureFactory, TextureHandle,
};
use world_core::task::CancelToken;
use world_core::ResourceId;
use sdf_field::ChunkKey;

/// Emits one degenerate triangle per inside sample. Not a real surface
/// extractor; just enough structure to exercise the pipeline.
pub struct CountingWriter {
    /// Optional artificial latency so tests can race a clear against an
    /// extraction in flight.
    pub delay: std::time::Duration,
}

impl MeshWriter for CountingWriter {
    fn write(
        &mut self,
        view: &SampleView<'_>,
        cancel: &CancelToken,
    ) -> anyhow::Result<Option<MeshCpu>> {
        let mut mesh = MeshCpu::default();
        for z in 0..view.size.z {
            if cancel.is_cancelled() {
                return Ok(None);
            }
            if !self.delay.is_zero() {
                std::thread::sleep(self.delay);
            }
            for y in 0..view.size.y {
                for x in 0..view.size.x {
                    let i = (x + y * view.stride.y + z * view.stride.z) as usize;
                    if view.samples[i] > ENCODED_ZERO {
                        continue;
                    }
                    let m = 1.0; // margin offset in samples
                    let p = [
                        (x as f32 - m) * view.unit_size,
                        (y as f32 - m) * view.unit_size,
                        (z as f32 - m) * view.unit_size,
                    ];
                    let base = mesh.positions.len() as u32;
                    for _ in 0..3 {
                        mesh.positions.push(p);
                        mesh.normals.push([0.0, 1.0, 0.0]);
                    }
                    mesh.indices.extend_from_slice(&[base, base + 1, base + 2]);
                }
            }
        }
        Ok(Some(mesh))
    }
}

pub fn writer_pool(delay: std::time::Duration) -> Arc<MeshWriterPool> {
    Arc::new(MeshWriterPool::new(move || {
        Box::new(CountingWriter { delay }) as Box<dyn MeshWriter>
    }))
}

/// Everything the recording bindings observed, for assertions.
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    ModelReplaced {
        resource: ResourceId,
        key: ChunkKey,
        vertices: usize,
        material: String,
    },
    AttributeSet {
        resource: ResourceId,
        key: ChunkKey,
        name: String,
        value: AttributeValue,
    },
    CollisionAdded {
        resource: ResourceId,
        key: ChunkKey,
        vertices: usize,
        tags: Vec<String>,
        first_vertex: Option<[f32; 3]>,
    },
    CollisionUpdated {
        resource: ResourceId,
        key: ChunkKey,
        vertices: usize,
    },
    CollisionRemoved {
        resource: ResourceId,
        key: ChunkKey,
    },
    TextureCreated {
        handle: TextureHandle,
        size: UVec3,
        bytes: usize,
    },
    TextureUpdated {
        handle: TextureHandle,
        bytes: usize,
    },
}

pub type EventLog = Arc<Mutex<Vec<HostEvent>>>;

struct RecordingScene {
    resource: ResourceId,
    key: ChunkKey,
    events: EventLog,
}

impl SceneObject for RecordingScene {
    fn set_attribute(&mut self, name: &str, value: AttributeValue) {
        self.events.lock().unwrap().push(HostEvent::AttributeSet {
            resource: self.resource,
            key: self.key,
            name: name.to_string(),
            value,
        });
    }
    fn replace_model(&mut self, mesh: &MeshCpu, material: &str) {
        self.events.lock().unwrap().push(HostEvent::ModelReplaced {
            resource: self.resource,
            key: self.key,
            vertices: mesh.positions.len(),
            material: material.to_string(),
        });
    }
}

struct RecordingBody {
    resource: ResourceId,
    key: ChunkKey,
    events: EventLog,
}

impl PhysicsBody for RecordingBody {
    fn add_mesh_shape(&mut self, positions: &[[f32; 3]], _indices: &[u32], tags: &[String]) {
        self.events.lock().unwrap().push(HostEvent::CollisionAdded {
            resource: self.resource,
            key: self.key,
            vertices: positions.len(),
            tags: tags.to_vec(),
            first_vertex: positions.first().copied(),
        });
    }
    fn update_mesh(&mut self, positions: &[[f32; 3]], _indices: &[u32]) {
        self.events.lock().unwrap().push(HostEvent::CollisionUpdated {
            resource: self.resource,
            key: self.key,
            vertices: positions.len(),
        });
    }
    fn remove(&mut self) {
        self.events.lock().unwrap().push(HostEvent::CollisionRemoved {
            resource: self.resource,
            key: self.key,
        });
    }
}

struct RecordingTextures {
    next: AtomicU64,
    events: EventLog,
}

impl TextureFactory for RecordingTextures {
    fn create(&mut self, size: UVec3, data: &[u8]) -> TextureHandle {
        let handle = TextureHandle(self.next.fetch_add(1, Ordering::SeqCst));
        self.events.lock().unwrap().push(HostEvent::TextureCreated {
            handle,
            size,
            bytes: data.len(),
        });
        handle
    }
    fn update(&mut self, handle: TextureHandle, data: &[u8]) {
        self.events.lock().unwrap().push(HostEvent::TextureUpdated {
            handle,
            bytes: data.len(),
        });
    }
}

pub struct RecordingBindings {
    pub events: EventLog,
    textures: RecordingTextures,
}

impl RecordingBindings {
    pub fn new() -> (Self, EventLog) {
        let events: EventLog = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                events: events.clone(),
                textures: RecordingTextures {
                    next: AtomicU64::new(1),
                    events: events.clone(),
                },
            },
            events,
        )
    }
}

impl HostBindings for RecordingBindings {
    fn create_scene_object(
        &mut self,
        resource: ResourceId,
        key: ChunkKey,
    ) -> Option<Box<dyn SceneObject>> {
        Some(Box::new(RecordingScene {
            resource,
            key,
            events: self.events.clone(),
        }))
    }
    fn create_physics_body(
        &mut self,
        resource: ResourceId,
        key: ChunkKey,
    ) -> Option<Box<dyn PhysicsBody>> {
        Some(Box::new(RecordingBody {
            resource,
            key,
            events: self.events.clone(),
        }))
    }
    fn texture_factory(&mut self) -> Option<&mut dyn TextureFactory> {
        Some(&mut self.textures)
    }
}
