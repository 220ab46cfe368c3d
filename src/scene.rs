//! The scene aggregate.
//!
//! [`Scene`] owns everything that used to be page-wide state: the planes in
//! registration order, the [`ResourceRegistry`], the [`RenderLoopScheduler`],
//! the [`TransitionEngine`] and the [`ContextRecoveryCoordinator`]. The caller
//! owns the scene and drives it with [`Scene::tick`] once per display frame.
//!
//! # Frame order
//!
//! 1. Pick up a context loss reported by the backend.
//! 2. Run a delayed rebuild whose frame delay ran out.
//! 3. Upload resources that finished loading.
//! 4. Run scheduler callbacks, which resolves pending matches.
//! 5. Finish sampler binds that were waiting for an upload.
//! 6. Advance scene decays, run the scene hook, then per plane its hook and
//!    its uniform transitions.
//! 7. Submit draws for bound planes.
//!
//! Steps 3, 5, 6 and 7 only happen while the context is active. Step 4 always
//! runs so bookkeeping keeps going while the context is lost.
//!
//! # Example
//!
//! ```
//! use drape::{HeadlessGpu, ImageData, PlaneElement, PlaneParams, Scene, SceneConfig};
//!
//! let mut scene = Scene::new(HeadlessGpu::new(), SceneConfig::default());
//! let params = PlaneParams::default();
//! let plane = scene
//!     .add_plane(PlaneElement::new("hero").source("img/hero.jpg"), &params)
//!     .unwrap();
//!
//! scene.source_loaded("img/hero.jpg", ImageData::solid(4, 4, [0, 0, 0, 255]));
//! scene.tick();
//!
//! assert!(scene.plane(plane).unwrap().is_drawable());
//! assert_eq!(scene.gpu().draws().len(), 1);
//! ```

use crate::config::{PlaneParams, SceneConfig};
use crate::context::{ContextRecoveryCoordinator, ContextState};
use crate::error::{DrapeError, Result};
use crate::events::{EventBus, SceneEvent};
use crate::geometry::RawGeometry;
use crate::gpu::{DrawCall, GpuBackend, GpuError};
use crate::loader::{AssetLoader, ImageData, LoadEvent};
use crate::plane::{FrameInfo, Plane, PlaneElement, PlaneId, PlaneState};
use crate::resource::{LoadState, ResourceId, ResourceRegistry};
use crate::scheduler::{FrameHandle, RenderLoopScheduler, SchedulerHost};
use crate::transition::{Decay, TransitionEngine};

/// Scene-wide per-frame hook.
pub type SceneHook<G> = Box<dyn FnMut(&mut Scene<G>)>;

struct PendingRebuild {
    elements: Vec<PlaneElement>,
    params: PlaneParams,
    frames_left: Option<u32>,
}

/// Planes, resources and the frame loop that ties them together.
pub struct Scene<G: GpuBackend> {
    gpu: G,
    config: SceneConfig,
    registry: ResourceRegistry,
    scheduler: RenderLoopScheduler<Scene<G>>,
    planes: Vec<Plane>,
    next_plane: usize,
    transitions: TransitionEngine,
    context: ContextRecoveryCoordinator,
    events: EventBus,
    frame: u64,
    draw_enabled: bool,
    render_hook: Option<SceneHook<G>>,
    pending_rebuild: Option<PendingRebuild>,
    /// Planes whose pending match was cancelled by a context loss.
    suspended_matches: Vec<PlaneId>,
}

impl<G: GpuBackend> SchedulerHost for Scene<G> {
    fn scheduler(&mut self) -> &mut RenderLoopScheduler<Self> {
        &mut self.scheduler
    }
}

impl<G: GpuBackend + 'static> Scene<G> {
    pub fn new(gpu: G, config: SceneConfig) -> Self {
        let transitions = TransitionEngine::new(config.snap_threshold, config.default_damping);
        Self {
            gpu,
            draw_enabled: config.draw_enabled,
            config,
            registry: ResourceRegistry::new(),
            scheduler: RenderLoopScheduler::new(),
            planes: Vec::new(),
            next_plane: 0,
            transitions,
            context: ContextRecoveryCoordinator::new(),
            events: EventBus::default(),
            frame: 0,
            render_hook: None,
            pending_rebuild: None,
            suspended_matches: Vec::new(),
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn gpu(&self) -> &G {
        &self.gpu
    }

    pub fn gpu_mut(&mut self) -> &mut G {
        &mut self.gpu
    }

    pub fn config(&self) -> &SceneConfig {
        &self.config
    }

    pub fn registry(&self) -> &ResourceRegistry {
        &self.registry
    }

    pub fn transitions(&self) -> &TransitionEngine {
        &self.transitions
    }

    pub fn context_state(&self) -> ContextState {
        self.context.state()
    }

    pub fn generation(&self) -> u64 {
        self.context.generation()
    }

    /// Frames ticked so far.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Live planes in registration order.
    pub fn planes(&self) -> impl Iterator<Item = &Plane> {
        self.planes.iter()
    }

    pub fn plane_ids(&self) -> Vec<PlaneId> {
        self.planes.iter().map(Plane::id).collect()
    }

    pub fn plane_count(&self) -> usize {
        self.planes.len()
    }

    pub fn plane(&self, id: PlaneId) -> Option<&Plane> {
        self.planes.iter().find(|p| p.id() == id)
    }

    pub fn plane_mut(&mut self, id: PlaneId) -> Option<&mut Plane> {
        self.planes.iter_mut().find(|p| p.id() == id)
    }

    /// Live plane built from the element with this id.
    pub fn find_plane(&self, element_id: &str) -> Option<PlaneId> {
        self.planes
            .iter()
            .find(|p| p.element().id == element_id)
            .map(Plane::id)
    }

    /// State of any plane this scene ever created, removed ones included.
    pub fn plane_state(&self, id: PlaneId) -> Option<PlaneState> {
        match self.plane(id) {
            Some(plane) => Some(plane.state()),
            None if id.0 < self.next_plane => Some(PlaneState::Removed),
            None => None,
        }
    }

    pub fn drain_events(&mut self) -> Vec<SceneEvent> {
        self.events.drain()
    }

    pub fn enable_drawing(&mut self) {
        self.draw_enabled = true;
    }

    /// Stop submitting draws. Hooks, transitions and the scheduler keep
    /// running.
    pub fn disable_drawing(&mut self) {
        self.draw_enabled = false;
    }

    pub fn is_drawing(&self) -> bool {
        self.draw_enabled
    }

    fn index_of(&self, id: PlaneId) -> Result<usize> {
        self.planes
            .iter()
            .position(|p| p.id() == id)
            .ok_or(DrapeError::UnknownPlane(id))
    }

    // ========================================================================
    // Scheduling
    // ========================================================================

    /// Run a callback against the scene on the next tick, or every tick with
    /// `repeat`.
    pub fn schedule(
        &mut self,
        repeat: bool,
        callback: impl FnMut(&mut Scene<G>, &FrameHandle) + 'static,
    ) -> FrameHandle {
        self.scheduler.schedule(repeat, callback)
    }

    pub fn cancel(&mut self, handle: &FrameHandle) {
        self.scheduler.cancel(handle);
    }

    /// Scene-wide hook, run every active frame before the plane hooks.
    pub fn on_scene_render(&mut self, hook: impl FnMut(&mut Scene<G>) + 'static) {
        self.render_hook = Some(Box::new(hook));
    }

    /// Per-frame hook of one plane, run every frame it is bound.
    pub fn on_render(
        &mut self,
        id: PlaneId,
        hook: impl FnMut(&mut Plane, &FrameInfo<'_>) + 'static,
    ) -> Result<()> {
        let index = self.index_of(id)?;
        self.planes[index].hook = Some(Box::new(hook));
        Ok(())
    }

    // ========================================================================
    // Resources
    // ========================================================================

    /// Announce a source whose fetch has begun.
    pub fn register_source(&mut self, source: &str) -> ResourceId {
        self.registry.register(source)
    }

    /// Fetch and decode finished. Registers the source if needed.
    pub fn source_loaded(&mut self, source: &str, image: ImageData) -> ResourceId {
        let id = self.registry.register(source);
        if self.registry.mark_loaded(id, image) {
            self.events.push(SceneEvent::SourceLoaded {
                resource: id,
                source: source.to_string(),
            });
        }
        id
    }

    pub fn source_failed(&mut self, source: &str, reason: &str) -> ResourceId {
        let id = self.registry.register(source);
        if self.registry.mark_failed(id, reason) {
            log::warn!("source '{source}' failed: {reason}");
            self.events.push(SceneEvent::SourceFailed {
                resource: id,
                source: source.to_string(),
                reason: reason.to_string(),
            });
        }
        id
    }

    /// Feed every completed load of `loader` into the registry.
    pub fn poll_loader(&mut self, loader: &mut AssetLoader) -> usize {
        let events = loader.drain();
        let count = events.len();
        for event in events {
            match event {
                LoadEvent::Loaded { source, image } => {
                    self.source_loaded(&source, image);
                }
                LoadEvent::Failed { source, reason } => {
                    self.source_failed(&source, &reason);
                }
            }
        }
        count
    }

    fn upload_loaded_resources(&mut self) {
        let generation = self.context.generation();
        for (id, outcome) in self.registry.upload_loaded(&mut self.gpu, generation) {
            let source = self
                .registry
                .get(id)
                .map(|r| r.source().to_string())
                .unwrap_or_default();
            match outcome {
                Ok(_) => self.events.push(SceneEvent::SourceUploaded {
                    resource: id,
                    source,
                    uploaded: self.registry.uploaded_count(),
                    total: self.registry.len(),
                }),
                Err(GpuError::DeviceUnavailable(reason)) => {
                    // Retried after the context comes back.
                    log::debug!("upload of '{source}' deferred: {reason}");
                }
                Err(err) => {
                    let reason = err.to_string();
                    self.source_failed(&source, &reason);
                }
            }
        }
    }

    // ========================================================================
    // Plane lifecycle
    // ========================================================================

    /// Build a plane from an element.
    ///
    /// Fails with [`DrapeError::InvalidConfig`] for a malformed configuration;
    /// no plane is created in that case. With `autoload_sources` the declared
    /// sources are registered and matched right away.
    pub fn add_plane(&mut self, element: PlaneElement, params: &PlaneParams) -> Result<PlaneId> {
        let id = PlaneId(self.next_plane);
        let mut plane = match Plane::new(id, element, params) {
            Ok(plane) => plane,
            Err(err) => {
                log::warn!("plane rejected: {err}");
                return Err(err);
            }
        };

        if self.context.is_active() {
            let (ws, hs) = plane.segments();
            let geometry = self
                .gpu
                .create_geometry(&plane.element().id, &RawGeometry::plane(ws, hs))?;
            plane.set_geometry(Some(geometry));
            plane.set_state(PlaneState::Ready);
            self.events.push(SceneEvent::PlaneReady { plane: id });
        }

        let autoload = plane.autoloads();
        let sources: Vec<String> = plane.element().sources.iter().map(|s| s.src.clone()).collect();
        self.planes.push(plane);
        self.next_plane += 1;

        if autoload {
            for source in &sources {
                self.registry.register(source);
            }
            self.match_and_bind(id)?;
        }
        self.refresh_plane(id);
        Ok(id)
    }

    /// Attach a resource to a named slot, creating the slot if needed.
    ///
    /// The GPU bind happens now when the resource is uploaded, otherwise as
    /// soon as the upload lands. Rebinding a slot replaces its resource.
    pub fn bind_resource(&mut self, id: PlaneId, slot: &str, resource: ResourceId) -> Result<()> {
        let index = self.index_of(id)?;
        if self.registry.get(resource).is_none() {
            return Err(DrapeError::UnknownResource(resource));
        }

        let previous = self.planes[index].ensure_slot(slot).assign(resource);
        if let Some(previous) = previous.filter(|&p| p != resource) {
            let still_used = self.planes[index]
                .slots()
                .iter()
                .any(|s| s.resource() == Some(previous));
            if !still_used {
                self.registry.release(previous, id);
            }
        }
        self.registry.claim(resource, id);

        self.finish_binds(index)?;
        self.refresh_plane(id);
        Ok(())
    }

    /// Swap the source of an existing slot.
    pub fn set_slot_source(&mut self, id: PlaneId, slot: &str, resource: ResourceId) -> Result<()> {
        let index = self.index_of(id)?;
        if self.planes[index].slot(slot).is_none() {
            return Err(DrapeError::invalid_config(
                &self.planes[index].element().id,
                format!("no sampler slot '{slot}'"),
            ));
        }
        self.bind_resource(id, slot, resource)
    }

    /// Bind a new sampler to the resource of an existing slot. Both samplers
    /// share one GPU texture.
    pub fn bind_from_slot(&mut self, id: PlaneId, new_slot: &str, from_slot: &str) -> Result<()> {
        let index = self.index_of(id)?;
        let plane = &self.planes[index];
        let resource = plane
            .slot(from_slot)
            .and_then(|s| s.resource())
            .ok_or_else(|| {
                DrapeError::invalid_config(
                    &plane.element().id,
                    format!("slot '{from_slot}' has no resource to share"),
                )
            })?;
        self.bind_resource(id, new_slot, resource)
    }

    /// Bind every declared source that is already registered. Whatever is
    /// still missing is retried every frame by a single pending match.
    ///
    /// Returns `true` when every declared source has a resource.
    pub fn match_and_bind(&mut self, id: PlaneId) -> Result<bool> {
        if self.try_match(id)? {
            return Ok(true);
        }
        let index = self.index_of(id)?;
        if self.planes[index].has_pending_match() {
            return Ok(false);
        }

        let handle = self.scheduler.schedule(true, move |scene: &mut Scene<G>, handle| {
            match scene.try_match(id) {
                Ok(true) => handle.stop(),
                Ok(false) => {}
                Err(DrapeError::UnknownPlane(_)) => handle.stop(),
                Err(err) => log::warn!("pending match of {id}: {err}"),
            }
        });
        log::debug!("{id} waits for its sources ({})", handle.id());
        self.planes[index].pending = Some(handle);
        Ok(false)
    }

    fn try_match(&mut self, id: PlaneId) -> Result<bool> {
        let index = self.index_of(id)?;
        for (slot, source) in self.planes[index].unmatched_sources() {
            if let Some(resource) = self.registry.find(&source) {
                self.bind_resource(id, &slot, resource)?;
            }
        }
        Ok(self.planes[index].unmatched_sources().is_empty())
    }

    /// Finish GPU binds of one plane whose resources got uploaded, and flag
    /// slots whose resource failed.
    fn finish_binds(&mut self, index: usize) -> Result<()> {
        let active = self.context.is_active();
        let plane = &mut self.planes[index];
        let id = plane.id();
        let geometry = plane.geometry();
        let mut unavailable = Vec::new();

        for slot in plane.slots_mut() {
            if slot.texture().is_some() {
                continue;
            }
            let Some(resource) = slot.resource().and_then(|r| self.registry.get(r)) else {
                continue;
            };
            match resource.state() {
                LoadState::Uploaded => {
                    if let (true, Some(geometry), Some(texture)) = (active, geometry, resource.handle()) {
                        self.gpu.bind_sampler(geometry, slot.name(), texture)?;
                        slot.set_texture(Some(texture));
                    }
                }
                LoadState::Failed => {
                    if slot.mark_unavailable() {
                        unavailable.push(resource.source().to_string());
                    }
                }
                LoadState::Pending | LoadState::Loaded => {}
            }
        }

        if !unavailable.is_empty() {
            plane.set_fallback(true);
        }
        for source in unavailable {
            log::warn!("{id}: '{source}' unavailable, falling back");
            self.events.push(SceneEvent::ResourceUnavailable { plane: id, source });
        }
        Ok(())
    }

    fn refresh_plane(&mut self, id: PlaneId) {
        let became_bound = self.plane_mut(id).is_some_and(Plane::refresh_state);
        if became_bound {
            self.events.push(SceneEvent::PlaneBound { plane: id });
        }
    }

    /// Tear a plane down.
    ///
    /// Cancels its pending match and transitions, frees its geometry and
    /// releases its slots without destroying any texture. Returns `false` when
    /// the plane was already removed.
    pub fn remove_plane(&mut self, id: PlaneId) -> Result<bool> {
        let Some(index) = self.planes.iter().position(|p| p.id() == id) else {
            return if id.0 < self.next_plane {
                Ok(false)
            } else {
                Err(DrapeError::UnknownPlane(id))
            };
        };

        let mut plane = self.planes.remove(index);
        self.suspended_matches.retain(|&p| p != id);
        if let Some(handle) = plane.pending.take() {
            self.scheduler.cancel(&handle);
        }
        self.transitions.cancel_plane(id);

        for slot in plane.slots_mut() {
            if let Some(resource) = slot.clear() {
                self.registry.release(resource, id);
            }
        }
        if let Some(geometry) = plane.geometry() {
            self.gpu.destroy_geometry(geometry);
            plane.set_geometry(None);
        }
        plane.set_state(PlaneState::Removed);
        self.events.push(SceneEvent::PlaneRemoved { plane: id });
        Ok(true)
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    /// Animate a `1f` uniform of a plane toward `target`.
    ///
    /// Re-targeting a running transition keeps its progress. `damping`
    /// defaults to [`SceneConfig::default_damping`].
    pub fn start_transition(
        &mut self,
        id: PlaneId,
        uniform: &str,
        target: f32,
        damping: Option<f32>,
    ) -> Result<()> {
        let index = self.index_of(id)?;
        let plane = &self.planes[index];
        let current = plane.uniforms().float(uniform).ok_or_else(|| {
            DrapeError::invalid_config(
                &plane.element().id,
                format!("'{uniform}' is not a 1f uniform"),
            )
        })?;
        self.transitions.start(id, uniform, current, target, damping)
    }

    /// Register a scene-wide value that relaxes to zero at `rate` per frame.
    pub fn add_decay(&mut self, name: &str, rate: f32) -> Result<()> {
        self.transitions.add_decay(name, Decay::new(rate)?);
        Ok(())
    }

    pub fn impulse(&mut self, name: &str, amount: f32) {
        self.transitions.impulse(name, amount);
    }

    pub fn decay(&self, name: &str) -> f32 {
        self.transitions.decay(name)
    }

    // ========================================================================
    // Frame loop
    // ========================================================================

    /// Run one frame.
    pub fn tick(&mut self) {
        self.frame += 1;

        if self.gpu.take_context_lost() {
            self.handle_context_lost();
        }
        self.advance_pending_rebuild();

        let active = self.context.is_active();
        if active {
            self.upload_loaded_resources();
        }

        self.tick_scheduler();

        if !self.context.is_active() {
            return;
        }

        for index in 0..self.planes.len() {
            let id = self.planes[index].id();
            if let Err(err) = self.finish_binds(index) {
                log::warn!("{id}: sampler bind failed: {err}");
            }
            self.refresh_plane(id);
        }

        self.transitions.advance_decays();
        if let Some(mut hook) = self.render_hook.take() {
            hook(self);
            if self.render_hook.is_none() {
                self.render_hook = Some(hook);
            }
        }
        self.run_plane_hooks();

        if self.draw_enabled {
            self.submit_draws();
        }
    }

    fn run_plane_hooks(&mut self) {
        for plane in &mut self.planes {
            if plane.state() != PlaneState::Bound {
                continue;
            }
            let id = plane.id();
            if let Some(mut hook) = plane.hook.take() {
                let info = FrameInfo {
                    frame: self.frame,
                    transitions: &self.transitions,
                };
                hook(plane, &info);
                if plane.hook.is_none() {
                    plane.hook = Some(hook);
                }
            }
            if !self.transitions.is_active(id) {
                continue;
            }
            for step in self.transitions.advance_plane(id) {
                plane.uniforms_mut().set_float(&step.uniform, step.value);
                if step.completed {
                    self.events.push(SceneEvent::TransitionCompleted {
                        plane: id,
                        uniform: step.uniform,
                        value: step.value,
                    });
                }
            }
        }
    }

    fn submit_draws(&mut self) {
        for plane in &self.planes {
            if !plane.is_drawable() {
                continue;
            }
            let Some(geometry) = plane.geometry() else {
                continue;
            };
            let samplers = plane.sampler_bindings();
            let call = DrawCall {
                plane: plane.id(),
                geometry,
                model: plane.model_matrix(),
                fov: plane.fov(),
                uniforms: plane.uniforms(),
                samplers: &samplers,
            };
            if let Err(err) = self.gpu.draw(&call) {
                log::warn!("draw of {} failed: {err}", plane.id());
            }
        }
    }

    // ========================================================================
    // Context recovery
    // ========================================================================

    /// The GPU context is gone. Draws stop, pending matches are cancelled
    /// and every GPU handle is forgotten without being freed.
    pub fn handle_context_lost(&mut self) {
        if !self.context.on_lost() {
            return;
        }
        for plane in &mut self.planes {
            if let Some(handle) = plane.pending.take() {
                if !handle.is_done() {
                    self.suspended_matches.push(plane.id());
                }
                self.scheduler.cancel(&handle);
            }
            plane.invalidate_gpu();
        }
        self.registry.invalidate_gpu_handles();
        self.events.push(SceneEvent::ContextLost);
    }

    /// Re-acquire the context and rebuild every GPU object.
    ///
    /// Live planes are restored in registration order: geometry, then the
    /// textures of their slots, then the sampler binds. Orphan resources are
    /// uploaded afterwards. Nothing is uploaded twice. If any step fails the
    /// context goes back to lost and [`DrapeError::ContextLossFatal`] is
    /// returned; there is no retry.
    pub fn handle_context_restored(&mut self) -> Result<()> {
        let Some(generation) = self.context.begin_restore() else {
            return Ok(());
        };

        let restored = self
            .gpu
            .restore()
            .and_then(|()| self.restore_planes(generation))
            .and_then(|()| self.registry.reupload_all_unowned(&mut self.gpu, generation));

        match restored {
            Ok(orphans) => {
                self.context.finish_restore();
                log::debug!(
                    "restored {} planes and {orphans} orphan textures",
                    self.planes.len()
                );
                self.events.push(SceneEvent::ContextRestored { generation });
            }
            Err(err) => {
                // The device may still be alive, so free what this attempt made.
                for plane in &mut self.planes {
                    if let Some(geometry) = plane.geometry() {
                        self.gpu.destroy_geometry(geometry);
                    }
                    plane.invalidate_gpu();
                }
                let discarded = self.registry.discard_generation(&mut self.gpu, generation);
                log::debug!("failed restore discarded {discarded} textures");
                let fatal = self.context.fail_restore(err.to_string());
                self.events.push(SceneEvent::ContextLossFatal {
                    reason: err.to_string(),
                });
                return Err(fatal);
            }
        }

        let suspended = std::mem::take(&mut self.suspended_matches);
        for id in self.plane_ids() {
            let rematch = self.plane(id).is_some_and(Plane::autoloads) || suspended.contains(&id);
            if rematch {
                self.match_and_bind(id)?;
            }
            self.refresh_plane(id);
        }
        Ok(())
    }

    fn restore_planes(&mut self, generation: u64) -> std::result::Result<(), GpuError> {
        for plane in &mut self.planes {
            let (ws, hs) = plane.segments();
            let geometry = self
                .gpu
                .create_geometry(&plane.element().id, &RawGeometry::plane(ws, hs))?;
            plane.set_geometry(Some(geometry));
            plane.set_state(PlaneState::Ready);

            for slot in plane.slots_mut() {
                let Some(resource) = slot.resource() else {
                    continue;
                };
                let state = self.registry.get(resource).map(|r| r.state());
                if !matches!(state, Some(LoadState::Loaded | LoadState::Uploaded)) {
                    continue;
                }
                let texture = self.registry.upload(resource, &mut self.gpu, generation)?;
                self.gpu.bind_sampler(geometry, slot.name(), texture)?;
                slot.set_texture(Some(texture));
            }
        }
        Ok(())
    }

    // ========================================================================
    // Rebuild and teardown
    // ========================================================================

    /// Remove every plane, then build one per element.
    ///
    /// Each element succeeds or fails on its own. Pending matches of the old
    /// planes are cancelled before any new plane exists.
    pub fn rebuild_scene(
        &mut self,
        elements: Vec<PlaneElement>,
        params: &PlaneParams,
    ) -> Vec<Result<PlaneId>> {
        self.pending_rebuild = None;
        for id in self.plane_ids() {
            if let Err(err) = self.remove_plane(id) {
                log::warn!("rebuild: removing {id}: {err}");
            }
        }

        let results: Vec<Result<PlaneId>> = elements
            .into_iter()
            .map(|element| self.add_plane(element, params))
            .collect();
        let failed = results.iter().filter(|r| r.is_err()).count();
        log::info!(
            "scene rebuilt with {} planes ({failed} failed)",
            results.len() - failed
        );
        self.events.push(SceneEvent::SceneRebuilt {
            planes: results.len() - failed,
            failed,
        });
        results
    }

    /// Rebuild once the outgoing content finished its transition: either on
    /// [`content_transition_finished`](Self::content_transition_finished) or
    /// after [`SceneConfig::rebuild_delay_frames`] ticks. A newer request
    /// replaces an older one.
    pub fn request_rebuild(&mut self, elements: Vec<PlaneElement>, params: PlaneParams) {
        self.pending_rebuild = Some(PendingRebuild {
            elements,
            params,
            frames_left: self.config.rebuild_delay_frames,
        });
    }

    pub fn has_pending_rebuild(&self) -> bool {
        self.pending_rebuild.is_some()
    }

    /// External signal: the page finished swapping its content. Runs a
    /// requested rebuild, if any.
    pub fn content_transition_finished(&mut self) -> Option<Vec<Result<PlaneId>>> {
        let pending = self.pending_rebuild.take()?;
        Some(self.rebuild_scene(pending.elements, &pending.params))
    }

    fn advance_pending_rebuild(&mut self) {
        let due = match self.pending_rebuild.as_mut().and_then(|p| p.frames_left.as_mut()) {
            Some(0) => true,
            Some(frames) => {
                *frames -= 1;
                false
            }
            None => false,
        };
        if due {
            if let Some(results) = self.content_transition_finished() {
                for err in results.into_iter().filter_map(|r| r.err()) {
                    log::warn!("delayed rebuild: {err}");
                }
            }
        }
    }

    /// Remove every plane, cancel every scheduler entry and clear the
    /// registry, destroying each texture once.
    pub fn teardown(&mut self) {
        self.pending_rebuild = None;
        for id in self.plane_ids() {
            if let Err(err) = self.remove_plane(id) {
                log::warn!("teardown: removing {id}: {err}");
            }
        }
        self.scheduler.cancel_all();
        self.transitions.clear();
        self.render_hook = None;
        self.registry.clear(&mut self.gpu);
        log::debug!("scene torn down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::HeadlessGpu;

    fn scene() -> Scene<HeadlessGpu> {
        Scene::new(HeadlessGpu::new(), SceneConfig::default())
    }

    fn pixel() -> ImageData {
        ImageData::solid(2, 2, [200, 100, 50, 255])
    }

    #[test]
    fn plane_binds_when_source_arrives_later() {
        let mut scene = scene();
        let id = scene
            .add_plane(PlaneElement::new("a").source("a.jpg"), &PlaneParams::default())
            .unwrap();
        assert_eq!(scene.plane(id).unwrap().state(), PlaneState::Ready);

        scene.tick();
        assert!(scene.gpu().draws().is_empty());

        scene.source_loaded("a.jpg", pixel());
        scene.tick();
        let plane = scene.plane(id).unwrap();
        assert_eq!(plane.state(), PlaneState::Bound);
        assert_eq!(scene.gpu().draws().len(), 1);
        assert_eq!(scene.gpu().draws()[0].samplers[0], ("uSampler0".into(), "a.jpg".into()));
    }

    #[test]
    fn manual_plane_waits_for_explicit_match() {
        let mut scene = scene();
        let params = PlaneParams::default().autoload(false);
        let id = scene
            .add_plane(PlaneElement::new("m").source("m.jpg"), &params)
            .unwrap();
        scene.source_loaded("m.jpg", pixel());
        scene.tick();
        assert_eq!(scene.plane(id).unwrap().state(), PlaneState::Ready);

        assert!(scene.match_and_bind(id).unwrap());
        assert_eq!(scene.plane(id).unwrap().state(), PlaneState::Bound);
    }

    #[test]
    fn only_one_pending_match_per_plane() {
        let mut scene = scene();
        let params = PlaneParams::default().autoload(false);
        let id = scene
            .add_plane(PlaneElement::new("p").source("later.jpg"), &params)
            .unwrap();
        assert!(!scene.match_and_bind(id).unwrap());
        assert!(!scene.match_and_bind(id).unwrap());
        assert_eq!(scene.scheduler.len(), 1);

        scene.register_source("later.jpg");
        scene.tick();
        assert!(scene.scheduler.is_empty());
        assert!(!scene.plane(id).unwrap().has_pending_match());
    }

    #[test]
    fn failed_source_signals_fallback_once() {
        let mut scene = scene();
        let id = scene
            .add_plane(PlaneElement::new("f").source("broken.jpg"), &PlaneParams::default())
            .unwrap();
        scene.source_failed("broken.jpg", "404");
        scene.tick();
        scene.tick();

        let unavailable: Vec<_> = scene
            .drain_events()
            .into_iter()
            .filter(|e| matches!(e, SceneEvent::ResourceUnavailable { .. }))
            .collect();
        assert_eq!(unavailable.len(), 1);
        assert!(scene.plane(id).unwrap().uses_fallback());
        assert!(scene.gpu().draws().is_empty());
    }

    #[test]
    fn invalid_plane_does_not_disturb_others() {
        let mut scene = scene();
        let bad = PlaneParams::default().vertex_shader("void main() {}");
        assert!(matches!(
            scene.add_plane(PlaneElement::new("bad"), &bad),
            Err(DrapeError::InvalidConfig { .. })
        ));
        let good = scene
            .add_plane(PlaneElement::new("good"), &PlaneParams::default())
            .unwrap();
        scene.tick();
        assert_eq!(scene.plane_count(), 1);
        assert_eq!(scene.gpu().draws()[0].plane, good);
    }

    #[test]
    fn derived_slot_shares_the_texture() {
        let mut scene = scene();
        let id = scene
            .add_plane(PlaneElement::new("d").source("a.jpg"), &PlaneParams::default())
            .unwrap();
        scene.source_loaded("a.jpg", pixel());
        scene.tick();

        scene.bind_from_slot(id, "uCopy", "uSampler0").unwrap();
        let plane = scene.plane(id).unwrap();
        assert_eq!(
            plane.slot("uCopy").unwrap().texture(),
            plane.slot("uSampler0").unwrap().texture()
        );
        assert_eq!(scene.gpu().uploads_of("a.jpg"), 1);
        assert!(scene.bind_from_slot(id, "uOther", "uMissing").is_err());
    }

    #[test]
    fn swapping_a_slot_source_orphans_the_old_resource() {
        let mut scene = scene();
        let id = scene
            .add_plane(PlaneElement::new("s").source("a.jpg"), &PlaneParams::default())
            .unwrap();
        let a = scene.source_loaded("a.jpg", pixel());
        let b = scene.source_loaded("b.jpg", pixel());
        scene.tick();

        scene.set_slot_source(id, "uSampler0", b).unwrap();
        let slot = scene.plane(id).unwrap().slot("uSampler0").unwrap();
        assert_eq!(slot.resource(), Some(b));
        assert_eq!(slot.texture(), scene.registry().get(b).unwrap().handle());
        assert!(scene.registry().get(a).unwrap().is_orphan());
        assert_eq!(scene.registry().get(b).unwrap().owner(), Some(id));
        assert!(scene.set_slot_source(id, "uMissing", a).is_err());
    }

    #[test]
    fn removed_planes_report_removed_state() {
        let mut scene = scene();
        let id = scene
            .add_plane(PlaneElement::new("r"), &PlaneParams::default())
            .unwrap();
        assert_eq!(scene.plane_state(id), Some(PlaneState::Bound));
        assert!(scene.remove_plane(id).unwrap());
        assert_eq!(scene.plane_state(id), Some(PlaneState::Removed));
        assert!(!scene.remove_plane(id).unwrap());
        assert_eq!(scene.plane_state(PlaneId(99)), None);
    }

    #[test]
    fn transition_drives_uniform() {
        let mut scene = scene();
        let params = PlaneParams::default().uniform("timer", "uTransitionTimer", "1f", 0.into());
        let id = scene.add_plane(PlaneElement::new("t"), &params).unwrap();
        scene.start_transition(id, "timer", 90.0, Some(0.04)).unwrap();

        for _ in 0..500 {
            scene.tick();
        }
        assert_eq!(scene.plane(id).unwrap().uniforms().float("timer"), Some(90.0));
        let completed = scene
            .drain_events()
            .into_iter()
            .filter(|e| matches!(e, SceneEvent::TransitionCompleted { .. }))
            .count();
        assert_eq!(completed, 1);
        assert!(scene.start_transition(id, "missing", 1.0, None).is_err());
    }

    #[test]
    fn drawing_toggle_keeps_hooks_running() {
        let mut scene = scene();
        let params = PlaneParams::default().uniform("time", "uTime", "1f", 0.into());
        let id = scene.add_plane(PlaneElement::new("h"), &params).unwrap();
        scene
            .on_render(id, |plane, _| {
                let t = plane.uniforms().float("time").unwrap_or(0.0);
                plane.uniforms_mut().set_float("time", t + 1.0);
            })
            .unwrap();

        scene.disable_drawing();
        scene.tick();
        scene.tick();
        assert!(scene.gpu().draws().is_empty());

        scene.enable_drawing();
        scene.tick();
        assert_eq!(scene.gpu().draws()[0].float("time"), Some(3.0));
    }

    #[test]
    fn scene_hook_reads_decay() {
        let mut scene = scene();
        scene.add_decay("rotation", 0.05).unwrap();
        scene.impulse("rotation", 1.0);
        scene.on_scene_render(|scene| {
            for id in scene.plane_ids() {
                let effect = scene.decay("rotation");
                if let Some(plane) = scene.plane_mut(id) {
                    plane.set_rotation(effect);
                }
            }
        });
        let id = scene
            .add_plane(PlaneElement::new("r"), &PlaneParams::default())
            .unwrap();
        scene.tick();
        let rotation = scene.plane(id).unwrap().rotation();
        assert!(rotation > 0.9 && rotation < 1.0);
    }

    #[test]
    fn delayed_rebuild_runs_after_configured_frames() {
        let config = SceneConfig {
            rebuild_delay_frames: Some(2),
            ..SceneConfig::default()
        };
        let mut scene = Scene::new(HeadlessGpu::new(), config);
        scene
            .add_plane(PlaneElement::new("old"), &PlaneParams::default())
            .unwrap();
        scene.request_rebuild(vec![PlaneElement::new("new")], PlaneParams::default());

        scene.tick();
        scene.tick();
        assert!(scene.find_plane("old").is_some());
        scene.tick();
        assert!(scene.find_plane("old").is_none());
        assert!(scene.find_plane("new").is_some());
        assert!(!scene.has_pending_rebuild());
    }

    #[test]
    fn rebuild_waits_for_external_signal_by_default() {
        let mut scene = scene();
        scene.request_rebuild(vec![PlaneElement::new("next")], PlaneParams::default());
        for _ in 0..100 {
            scene.tick();
        }
        assert_eq!(scene.plane_count(), 0);
        let results = scene.content_transition_finished().unwrap();
        assert_eq!(results.len(), 1);
        assert!(scene.content_transition_finished().is_none());
    }
}
