//! The resource registry.
//!
//! Every texture source the scene has heard of lives here, whichever plane
//! asked for it first or whether any plane asked at all. Planes look resources
//! up by source identity, so they bind correctly no matter in which order the
//! loader completes.
//!
//! # Lifecycle
//!
//! ```text
//! register ──► Pending ──► Loaded ──► Uploaded
//!                 │           │  ◄──────────┘ context lost
//!                 └─► Failed ◄┘ gpu rejected the pixels
//! ```
//!
//! A resource reaches `Uploaded` at most once per context generation. When the
//! context is lost the handle is forgotten (never destroyed, it is already
//! gone) and the resource drops back to `Loaded`, keeping its pixels so it can
//! be uploaded again after the restore.
//!
//! # Ownership
//!
//! The first plane that binds a resource owns it. When the owner releases it
//! ownership moves to the next plane still using it, or the resource becomes
//! an orphan. Orphans are restored by [`ResourceRegistry::reupload_all_unowned`];
//! owned resources are restored through their plane.

use std::collections::HashMap;
use std::fmt;

use crate::gpu::{GpuBackend, GpuError, TextureHandle};
use crate::loader::ImageData;
use crate::plane::PlaneId;

/// Opaque identifier for a registered resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub(crate) usize);

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "resource#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadState {
    Pending,
    Loaded,
    Uploaded,
    Failed,
}

/// One image or video frame source.
#[derive(Debug)]
pub struct Resource {
    id: ResourceId,
    source: String,
    state: LoadState,
    image: Option<ImageData>,
    handle: Option<TextureHandle>,
    uploaded_generation: Option<u64>,
    owner: Option<PlaneId>,
    users: Vec<PlaneId>,
    failure: Option<String>,
}

impl Resource {
    fn new(id: ResourceId, source: String) -> Self {
        Self {
            id,
            source,
            state: LoadState::Pending,
            image: None,
            handle: None,
            uploaded_generation: None,
            owner: None,
            users: Vec::new(),
            failure: None,
        }
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    /// Source identifier, usually the URL the element declared.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn state(&self) -> LoadState {
        self.state
    }

    pub fn is_uploaded(&self) -> bool {
        self.state == LoadState::Uploaded
    }

    /// GPU handle, only while uploaded.
    pub fn handle(&self) -> Option<TextureHandle> {
        self.handle
    }

    pub fn image(&self) -> Option<&ImageData> {
        self.image.as_ref()
    }

    /// Context generation of the last upload.
    pub fn uploaded_generation(&self) -> Option<u64> {
        self.uploaded_generation
    }

    pub fn owner(&self) -> Option<PlaneId> {
        self.owner
    }

    pub fn is_orphan(&self) -> bool {
        self.owner.is_none()
    }

    /// Planes currently binding this resource, in bind order.
    pub fn users(&self) -> &[PlaneId] {
        &self.users
    }

    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }
}

/// Registry of every known resource, in registration order.
#[derive(Default)]
pub struct ResourceRegistry {
    resources: Vec<Resource>,
    by_source: HashMap<String, ResourceId>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a source, or return the existing entry for it.
    pub fn register(&mut self, source: &str) -> ResourceId {
        if let Some(&id) = self.by_source.get(source) {
            return id;
        }
        let id = ResourceId(self.resources.len());
        self.resources.push(Resource::new(id, source.to_string()));
        self.by_source.insert(source.to_string(), id);
        log::debug!("registered {id} for '{source}'");
        id
    }

    pub fn get(&self, id: ResourceId) -> Option<&Resource> {
        self.resources.get(id.0)
    }

    fn get_mut(&mut self, id: ResourceId) -> Option<&mut Resource> {
        self.resources.get_mut(id.0)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Resource> {
        self.resources.iter()
    }

    /// Number of resources currently on the GPU.
    pub fn uploaded_count(&self) -> usize {
        self.resources.iter().filter(|r| r.is_uploaded()).count()
    }

    /// Exact lookup by source identifier.
    pub fn find(&self, source: &str) -> Option<ResourceId> {
        self.by_source.get(source).copied()
    }

    /// First resource, in registration order, matching `predicate`.
    pub fn find_by_source(&self, mut predicate: impl FnMut(&Resource) -> bool) -> Option<ResourceId> {
        self.resources.iter().find(|r| predicate(r)).map(|r| r.id)
    }

    /// Pending → Loaded. Anything else is logged and ignored.
    pub fn mark_loaded(&mut self, id: ResourceId, image: ImageData) -> bool {
        let Some(resource) = self.get_mut(id) else {
            log::warn!("mark_loaded: unknown {id}");
            return false;
        };
        if resource.state != LoadState::Pending {
            log::warn!(
                "mark_loaded: '{}' is {:?}, ignoring",
                resource.source,
                resource.state
            );
            return false;
        }
        resource.image = Some(image);
        resource.state = LoadState::Loaded;
        true
    }

    /// Loaded → Uploaded for the given context generation.
    ///
    /// Rejected when the resource was never loaded, and when it was already
    /// uploaded in this generation.
    pub fn mark_uploaded(&mut self, id: ResourceId, handle: TextureHandle, generation: u64) -> bool {
        let Some(resource) = self.get_mut(id) else {
            log::warn!("mark_uploaded: unknown {id}");
            return false;
        };
        if resource.state != LoadState::Loaded {
            log::warn!(
                "mark_uploaded: '{}' is {:?}, upload rejected",
                resource.source,
                resource.state
            );
            return false;
        }
        if resource.uploaded_generation == Some(generation) {
            log::warn!(
                "mark_uploaded: '{}' already uploaded in generation {generation}",
                resource.source
            );
            return false;
        }
        resource.handle = Some(handle);
        resource.uploaded_generation = Some(generation);
        resource.state = LoadState::Uploaded;
        true
    }

    /// Pending → Failed, or Loaded → Failed when the pixels cannot be
    /// uploaded.
    pub fn mark_failed(&mut self, id: ResourceId, reason: impl Into<String>) -> bool {
        let Some(resource) = self.get_mut(id) else {
            log::warn!("mark_failed: unknown {id}");
            return false;
        };
        if !matches!(resource.state, LoadState::Pending | LoadState::Loaded) {
            log::warn!(
                "mark_failed: '{}' is {:?}, ignoring",
                resource.source,
                resource.state
            );
            return false;
        }
        resource.failure = Some(reason.into());
        resource.image = None;
        resource.state = LoadState::Failed;
        true
    }

    /// Push a loaded resource to the GPU, or return its handle when it is
    /// already there.
    pub fn upload<G: GpuBackend + ?Sized>(
        &mut self,
        id: ResourceId,
        gpu: &mut G,
        generation: u64,
    ) -> Result<TextureHandle, GpuError> {
        let resource = self.get(id).ok_or(GpuError::InvalidHandle(id.0 as u64))?;
        match resource.state {
            LoadState::Uploaded => {
                return resource.handle.ok_or(GpuError::InvalidHandle(id.0 as u64));
            }
            LoadState::Loaded => {}
            state => {
                return Err(GpuError::Upload(format!(
                    "'{}' cannot be uploaded while {state:?}",
                    resource.source
                )));
            }
        }
        let image = resource
            .image
            .as_ref()
            .ok_or_else(|| GpuError::Upload(format!("'{}' has no pixels", resource.source)))?;
        let handle = gpu.upload_texture(&resource.source, image)?;
        if !self.mark_uploaded(id, handle, generation) {
            gpu.destroy_texture(handle);
            return Err(GpuError::Upload(format!("{id} upload rejected")));
        }
        Ok(handle)
    }

    /// Upload every resource that is loaded but not yet on the GPU.
    ///
    /// Returns the outcome per resource, in registration order.
    pub fn upload_loaded<G: GpuBackend + ?Sized>(
        &mut self,
        gpu: &mut G,
        generation: u64,
    ) -> Vec<(ResourceId, Result<TextureHandle, GpuError>)> {
        let ready: Vec<ResourceId> = self
            .resources
            .iter()
            .filter(|r| r.state == LoadState::Loaded)
            .map(|r| r.id)
            .collect();
        ready
            .into_iter()
            .map(|id| (id, self.upload(id, gpu, generation)))
            .collect()
    }

    /// Re-upload every orphan that still has pixels and is not on the GPU for
    /// this generation. Returns how many were uploaded.
    pub fn reupload_all_unowned<G: GpuBackend + ?Sized>(
        &mut self,
        gpu: &mut G,
        generation: u64,
    ) -> Result<usize, GpuError> {
        let orphans: Vec<ResourceId> = self
            .resources
            .iter()
            .filter(|r| r.is_orphan() && r.state == LoadState::Loaded)
            .filter(|r| r.uploaded_generation != Some(generation))
            .map(|r| r.id)
            .collect();
        for &id in &orphans {
            self.upload(id, gpu, generation)?;
        }
        if !orphans.is_empty() {
            log::debug!("re-uploaded {} orphan textures", orphans.len());
        }
        Ok(orphans.len())
    }

    /// Forget every GPU handle after a context loss.
    pub fn invalidate_gpu_handles(&mut self) {
        for resource in &mut self.resources {
            resource.handle = None;
            if resource.state == LoadState::Uploaded {
                resource.state = LoadState::Loaded;
            }
        }
    }

    /// Destroy the textures uploaded in `generation`, then forget every
    /// handle. Returns how many were destroyed.
    ///
    /// For a restore that failed part way through on a live device.
    pub fn discard_generation<G: GpuBackend + ?Sized>(&mut self, gpu: &mut G, generation: u64) -> usize {
        let mut destroyed = 0;
        for resource in &mut self.resources {
            if resource.uploaded_generation != Some(generation) {
                continue;
            }
            if let Some(handle) = resource.handle.take() {
                gpu.destroy_texture(handle);
                destroyed += 1;
            }
            resource.uploaded_generation = None;
        }
        self.invalidate_gpu_handles();
        destroyed
    }

    /// Record that `plane` binds this resource. The first binder becomes the
    /// owner.
    pub fn claim(&mut self, id: ResourceId, plane: PlaneId) {
        let Some(resource) = self.get_mut(id) else {
            return;
        };
        if !resource.users.contains(&plane) {
            resource.users.push(plane);
        }
        if resource.owner.is_none() {
            resource.owner = Some(plane);
        }
    }

    /// Drop one plane's use of a resource. Never frees the texture.
    pub fn release(&mut self, id: ResourceId, plane: PlaneId) {
        let Some(resource) = self.get_mut(id) else {
            return;
        };
        resource.users.retain(|&p| p != plane);
        if resource.owner == Some(plane) {
            resource.owner = resource.users.first().copied();
        }
    }

    /// Destroy every uploaded texture once and empty the registry.
    pub fn clear<G: GpuBackend + ?Sized>(&mut self, gpu: &mut G) {
        for resource in self.resources.drain(..) {
            if let Some(handle) = resource.handle {
                gpu.destroy_texture(handle);
            }
        }
        self.by_source.clear();
    }
}
