//! Planes: one textured quad grid per HTML element.
//!
//! A [`Plane`] is created from a [`PlaneElement`] (the element id plus the
//! texture sources it declares) and [`PlaneParams`](crate::PlaneParams). The
//! scene drives it through these states:
//!
//! | State          | Meaning                                             |
//! |----------------|-----------------------------------------------------|
//! | `Constructing` | configuration parsed, geometry not on the GPU yet   |
//! | `Ready`        | geometry uploaded, some sampler slot still unbound  |
//! | `Bound`        | every slot has a texture bound on the GPU           |
//! | `Removed`      | GPU geometry released, scheduler entries cancelled  |
//!
//! Only `Bound` planes are submitted for drawing.
//!
//! # Slots
//!
//! Each declared source gets a sampler slot. The slot name is the declared
//! sampler name, or `uSampler{index}` by default. Slots remember which
//! resource they were given even while the texture is not uploaded yet, so
//! the GPU bind can be finished as soon as the upload lands.

use std::fmt;

use glam::{Mat4, Vec3};
use serde::Deserialize;

use crate::config::PlaneParams;
use crate::error::{DrapeError, Result};
use crate::geometry::origin_to_local;
use crate::gpu::{GeometryHandle, TextureHandle};
use crate::resource::ResourceId;
use crate::scheduler::FrameHandle;
use crate::transition::TransitionEngine;
use crate::uniform::Uniforms;

/// Opaque identifier for a plane. Never reused within a scene.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlaneId(pub(crate) usize);

impl fmt::Display for PlaneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "plane#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaneState {
    Constructing,
    Ready,
    Bound,
    Removed,
}

/// Element kind a source came from.
///
/// Kept for the host's own bookkeeping (pausing the video behind a finished
/// crossfade, for one). Both kinds go through the same lifecycle: a video
/// source is one decoded frame, uploaded once per generation like an image.
/// Frame streaming is not done here.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    #[default]
    Image,
    Video,
}

/// A texture source declared by an element (an `<img>` or `<video>` child).
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct SourceDecl {
    pub src: String,
    /// Sampler uniform name, e.g. `uDisplacement`.
    #[serde(default)]
    pub sampler: Option<String>,
    #[serde(default)]
    pub kind: SourceKind,
}

/// What the content boundary knows about one plane element.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct PlaneElement {
    pub id: String,
    #[serde(default)]
    pub sources: Vec<SourceDecl>,
}

impl PlaneElement {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            sources: Vec::new(),
        }
    }

    /// Declare an image source with the default sampler name.
    pub fn source(mut self, src: impl Into<String>) -> Self {
        self.sources.push(SourceDecl {
            src: src.into(),
            sampler: None,
            kind: SourceKind::Image,
        });
        self
    }

    /// Declare a source bound to a named sampler.
    pub fn sampler_source(mut self, sampler: impl Into<String>, src: impl Into<String>) -> Self {
        self.sources.push(SourceDecl {
            src: src.into(),
            sampler: Some(sampler.into()),
            kind: SourceKind::Image,
        });
        self
    }

    /// Declare a video source with the default sampler name. It binds a
    /// single frame, see [`SourceKind`].
    pub fn video(mut self, src: impl Into<String>) -> Self {
        self.sources.push(SourceDecl {
            src: src.into(),
            sampler: None,
            kind: SourceKind::Video,
        });
        self
    }
}

/// One named sampler of a plane.
#[derive(Clone, Debug)]
pub struct Slot {
    name: String,
    /// Source the element declared for this slot, if any.
    declared: Option<String>,
    kind: SourceKind,
    resource: Option<ResourceId>,
    /// Texture bound on the GPU in the current context generation.
    texture: Option<TextureHandle>,
    unavailable: bool,
}

impl Slot {
    pub(crate) fn new(name: String, declared: Option<String>, kind: SourceKind) -> Self {
        Self {
            name,
            declared,
            kind,
            resource: None,
            texture: None,
            unavailable: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn declared_source(&self) -> Option<&str> {
        self.declared.as_deref()
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    pub fn resource(&self) -> Option<ResourceId> {
        self.resource
    }

    pub fn texture(&self) -> Option<TextureHandle> {
        self.texture
    }

    /// A resource is assigned and its texture is bound on the GPU.
    pub fn is_bound(&self) -> bool {
        self.resource.is_some() && self.texture.is_some()
    }

    /// The assigned resource failed to load.
    pub fn is_unavailable(&self) -> bool {
        self.unavailable
    }

    pub(crate) fn assign(&mut self, resource: ResourceId) -> Option<ResourceId> {
        let previous = self.resource.replace(resource);
        if previous != Some(resource) {
            self.texture = None;
            self.unavailable = false;
        }
        previous
    }

    pub(crate) fn set_texture(&mut self, texture: Option<TextureHandle>) {
        self.texture = texture;
    }

    pub(crate) fn mark_unavailable(&mut self) -> bool {
        !std::mem::replace(&mut self.unavailable, true)
    }

    pub(crate) fn clear(&mut self) -> Option<ResourceId> {
        self.texture = None;
        self.unavailable = false;
        self.resource.take()
    }
}

/// Per-frame data handed to plane hooks.
pub struct FrameInfo<'a> {
    pub frame: u64,
    /// Scene-wide transitions, e.g. to read a decay value.
    pub transitions: &'a TransitionEngine,
}

/// Per-frame mutation hook of a plane.
pub type PlaneHook = Box<dyn FnMut(&mut Plane, &FrameInfo<'_>)>;

/// One renderable plane.
pub struct Plane {
    id: PlaneId,
    element: PlaneElement,
    state: PlaneState,
    uniforms: Uniforms,
    width_segments: u32,
    height_segments: u32,
    fov: f32,
    rotation_z: f32,
    transform_origin: Vec3,
    autoload: bool,
    geometry: Option<GeometryHandle>,
    slots: Vec<Slot>,
    pub(crate) pending: Option<FrameHandle>,
    pub(crate) hook: Option<PlaneHook>,
    fallback: bool,
}

impl fmt::Debug for Plane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plane")
            .field("id", &self.id)
            .field("element", &self.element.id)
            .field("state", &self.state)
            .field("slots", &self.slots)
            .finish_non_exhaustive()
    }
}

impl Plane {
    /// Parse the configuration. The plane starts in `Constructing`.
    pub(crate) fn new(id: PlaneId, element: PlaneElement, params: &PlaneParams) -> Result<Self> {
        let uniforms = params.validate(&element.id)?;
        let slots = element
            .sources
            .iter()
            .enumerate()
            .map(|(index, decl)| {
                let name = decl
                    .sampler
                    .clone()
                    .unwrap_or_else(|| format!("uSampler{index}"));
                Slot::new(name, Some(decl.src.clone()), decl.kind)
            })
            .collect::<Vec<_>>();

        for (i, slot) in slots.iter().enumerate() {
            if slots[..i].iter().any(|s| s.name == slot.name) {
                return Err(DrapeError::invalid_config(
                    &element.id,
                    format!("sampler '{}' declared twice", slot.name),
                ));
            }
        }

        Ok(Self {
            id,
            element,
            state: PlaneState::Constructing,
            uniforms,
            width_segments: params.width_segments,
            height_segments: params.height_segments,
            fov: params.fov,
            rotation_z: params.rotation_z,
            transform_origin: params.transform_origin,
            autoload: params.autoload_sources,
            geometry: None,
            slots,
            pending: None,
            hook: None,
            fallback: false,
        })
    }

    pub fn id(&self) -> PlaneId {
        self.id
    }

    pub fn element(&self) -> &PlaneElement {
        &self.element
    }

    pub fn state(&self) -> PlaneState {
        self.state
    }

    pub fn is_removed(&self) -> bool {
        self.state == PlaneState::Removed
    }

    pub fn segments(&self) -> (u32, u32) {
        (self.width_segments, self.height_segments)
    }

    pub fn uniforms(&self) -> &Uniforms {
        &self.uniforms
    }

    pub fn uniforms_mut(&mut self) -> &mut Uniforms {
        &mut self.uniforms
    }

    pub fn fov(&self) -> f32 {
        self.fov
    }

    pub fn rotation(&self) -> f32 {
        self.rotation_z
    }

    /// Rotation around the z axis, in radians, applied around the transform
    /// origin.
    pub fn set_rotation(&mut self, radians: f32) {
        self.rotation_z = radians;
    }

    pub fn transform_origin(&self) -> Vec3 {
        self.transform_origin
    }

    pub fn set_transform_origin(&mut self, origin: Vec3) {
        self.transform_origin = origin;
    }

    /// Model matrix: z-rotation around the transform origin.
    pub fn model_matrix(&self) -> Mat4 {
        let pivot = origin_to_local(self.transform_origin);
        Mat4::from_translation(pivot)
            * Mat4::from_rotation_z(self.rotation_z)
            * Mat4::from_translation(-pivot)
    }

    /// Declared sources are matched automatically.
    pub fn autoloads(&self) -> bool {
        self.autoload
    }

    pub fn geometry(&self) -> Option<GeometryHandle> {
        self.geometry
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn slot(&self, name: &str) -> Option<&Slot> {
        self.slots.iter().find(|s| s.name == name)
    }

    /// The plane is waiting for a resource to show up in the registry.
    pub fn has_pending_match(&self) -> bool {
        self.pending.as_ref().is_some_and(|h| !h.is_done())
    }

    /// Some source failed: the caller should keep the DOM presentation.
    pub fn uses_fallback(&self) -> bool {
        self.fallback
    }

    pub fn has_render_hook(&self) -> bool {
        self.hook.is_some()
    }

    /// Every slot has a texture bound.
    pub fn all_slots_bound(&self) -> bool {
        self.slots.iter().all(Slot::is_bound)
    }

    /// Ready for the draw stage.
    pub fn is_drawable(&self) -> bool {
        self.state == PlaneState::Bound && self.geometry.is_some() && self.all_slots_bound()
    }

    /// Sampler name and texture of every slot, in slot order.
    pub fn sampler_bindings(&self) -> Vec<(String, TextureHandle)> {
        self.slots
            .iter()
            .filter_map(|s| s.texture.map(|t| (s.name.clone(), t)))
            .collect()
    }

    pub(crate) fn set_state(&mut self, state: PlaneState) {
        if self.state != state {
            log::debug!("{} '{}': {:?} -> {:?}", self.id, self.element.id, self.state, state);
            self.state = state;
        }
    }

    pub(crate) fn set_geometry(&mut self, geometry: Option<GeometryHandle>) {
        self.geometry = geometry;
    }

    pub(crate) fn set_fallback(&mut self, fallback: bool) {
        self.fallback = fallback;
    }

    pub(crate) fn slots_mut(&mut self) -> &mut [Slot] {
        &mut self.slots
    }

    /// Get or create the slot called `name`.
    pub(crate) fn ensure_slot(&mut self, name: &str) -> &mut Slot {
        let index = match self.slots.iter().position(|s| s.name == name) {
            Some(index) => index,
            None => {
                self.slots.push(Slot::new(name.to_string(), None, SourceKind::Image));
                self.slots.len() - 1
            }
        };
        &mut self.slots[index]
    }

    /// Slots whose declared source has no resource assigned yet.
    pub(crate) fn unmatched_sources(&self) -> Vec<(String, String)> {
        self.slots
            .iter()
            .filter(|s| s.resource.is_none())
            .filter_map(|s| s.declared.clone().map(|src| (s.name.clone(), src)))
            .collect()
    }

    /// Bind status changed: move between `Ready` and `Bound`.
    pub(crate) fn refresh_state(&mut self) -> bool {
        if matches!(self.state, PlaneState::Constructing | PlaneState::Removed) {
            return false;
        }
        let next = if self.all_slots_bound() {
            PlaneState::Bound
        } else {
            PlaneState::Ready
        };
        let became_bound = next == PlaneState::Bound && self.state != PlaneState::Bound;
        self.set_state(next);
        became_bound
    }

    /// Forget every GPU handle without freeing anything.
    pub(crate) fn invalidate_gpu(&mut self) {
        self.geometry = None;
        for slot in &mut self.slots {
            slot.texture = None;
        }
        if self.state == PlaneState::Bound || self.state == PlaneState::Ready {
            self.state = PlaneState::Constructing;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_2;

    fn plane(element: PlaneElement) -> Plane {
        Plane::new(PlaneId(0), element, &PlaneParams::default()).unwrap()
    }

    #[test]
    fn slots_follow_declared_sources() {
        let p = plane(
            PlaneElement::new("slide")
                .source("img/1.jpg")
                .source("img/2.jpg")
                .sampler_source("uDisplacement", "img/map.jpg"),
        );
        let names: Vec<_> = p.slots().iter().map(Slot::name).collect();
        assert_eq!(names, vec!["uSampler0", "uSampler1", "uDisplacement"]);
        assert_eq!(p.state(), PlaneState::Constructing);
        assert_eq!(p.unmatched_sources().len(), 3);
    }

    #[test]
    fn duplicate_sampler_is_invalid_config() {
        let element = PlaneElement::new("dup")
            .sampler_source("uTex", "a.jpg")
            .sampler_source("uTex", "b.jpg");
        assert!(Plane::new(PlaneId(0), element, &PlaneParams::default()).is_err());
    }

    #[test]
    fn model_matrix_rotates_around_origin() {
        let mut p = plane(PlaneElement::new("r"));
        assert_eq!(p.model_matrix(), Mat4::IDENTITY);

        p.set_transform_origin(Vec3::new(-0.4, 0.5, 0.0));
        p.set_rotation(FRAC_PI_2);
        let pivot = origin_to_local(p.transform_origin());
        let moved = p.model_matrix().transform_point3(pivot);
        assert!((moved - pivot).length() < 1e-5);
    }

    #[test]
    fn plane_without_sources_is_bound_once_ready() {
        let mut p = plane(PlaneElement::new("bare"));
        p.set_state(PlaneState::Ready);
        assert!(p.refresh_state());
        assert_eq!(p.state(), PlaneState::Bound);
        assert!(!p.refresh_state());
    }

    #[test]
    fn reassigning_a_slot_drops_the_stale_texture() {
        let mut p = plane(PlaneElement::new("s").source("a.jpg"));
        let slot = p.ensure_slot("uSampler0");
        slot.assign(ResourceId(0));
        slot.set_texture(Some(TextureHandle::from_raw(7)));
        assert!(slot.is_bound());
        assert_eq!(slot.assign(ResourceId(1)), Some(ResourceId(0)));
        assert!(!slot.is_bound());
    }

    #[test]
    fn element_deserializes_with_defaults() {
        let element: PlaneElement = serde_json::from_str(
            r#"{ "id": "v", "sources": [{ "src": "a.mp4", "kind": "video" }, { "src": "b.jpg" }] }"#,
        )
        .unwrap();
        assert_eq!(element.sources[0].kind, SourceKind::Video);
        assert_eq!(element.sources[1].sampler, None);
    }
}
