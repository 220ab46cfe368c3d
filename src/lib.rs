//! # Drape
//!
//! **Texture lifecycle and transitions for planes described by HTML elements.**
//!
//! Every plane is a tessellated quad standing in for a page element. Its
//! textures arrive asynchronously, in any order, and the GPU context they
//! live in can vanish at any time. Drape keeps the two in sync:
//!
//! - planes find their textures by source identity, whichever finishes first
//! - a lost context is rebuilt plane by plane, orphan textures included
//! - damped transitions drive shader uniforms and always settle
//! - replacing the page content tears the scene down without leaks
//!
//! ## Quick Start
//!
//! ```no_run
//! use drape::*;
//!
//! fn main() -> drape::Result<()> {
//!     init_logging(LoggingConfig::default());
//!
//!     let page = PageDescription::from_json_file("page.json")?;
//!     let mut scene = Scene::new(HeadlessGpu::new(), SceneConfig::default());
//!     for element in page.planes.clone() {
//!         scene.add_plane(element, &page.params)?;
//!     }
//!
//!     let mut loader = AssetLoader::new()?;
//!     for source in page.sources() {
//!         loader.load(source.clone(), source);
//!     }
//!
//!     loop {
//!         scene.poll_loader(&mut loader);
//!         scene.tick();
//!         for event in scene.drain_events() {
//!             println!("{event}");
//!         }
//!     }
//! }
//! ```
//!
//! ## Pieces
//!
//! - [`Scene`] owns the rest and runs the frame loop.
//! - [`ResourceRegistry`] knows every texture source and its load state.
//! - [`RenderLoopScheduler`] runs one-shot and repeating frame callbacks.
//! - [`Plane`] is one element's quad, its uniforms and sampler slots.
//! - [`TransitionEngine`] advances damped transitions and decays.
//! - [`ContextRecoveryCoordinator`] tracks context loss and restore.
//! - [`GpuBackend`] is the boundary to the graphics API, implemented by
//!   [`HeadlessGpu`] and [`WgpuBackend`].

mod config;
mod context;
mod error;
mod events;
mod geometry;
mod gpu;
mod loader;
mod logging;
mod mesh;
mod plane;
mod resource;
mod scene;
mod scheduler;
mod texture;
mod transition;
mod uniform;

pub use config::{
    DEFAULT_REQUIRED_ATTRIBUTES, DEFAULT_VERTEX_SHADER, PageDescription, PlaneParams, SceneConfig,
};
pub use context::{ContextRecoveryCoordinator, ContextState};
pub use error::{DrapeError, Result};
pub use events::{EventBus, SceneEvent};
pub use geometry::{RawGeometry, origin_to_local};
pub use gpu::{
    DrawCall, DrawRecord, GeometryHandle, GpuBackend, GpuContext, GpuError, HeadlessGpu,
    QueuedDraw, TextureHandle, WgpuBackend,
};
pub use loader::{AssetLoader, ImageData, LoadEvent};
pub use logging::{LoggingConfig, init_logging};
pub use mesh::{Mesh, Vertex3d};
pub use plane::{
    FrameInfo, Plane, PlaneElement, PlaneHook, PlaneId, PlaneState, Slot, SourceDecl, SourceKind,
};
pub use resource::{LoadState, Resource, ResourceId, ResourceRegistry};
pub use scene::{Scene, SceneHook};
pub use scheduler::{CallbackId, FrameCallback, FrameHandle, RenderLoopScheduler, SchedulerHost};
pub use texture::Texture;
pub use transition::{
    Crossfade, CrossfadeStatus, Decay, Side, TransitionEngine, TransitionState, TransitionStep,
};
pub use uniform::{Uniform, UniformDecl, UniformValue, Uniforms};

// Re-export glam math types for convenience
pub use glam::{Mat4, Vec2, Vec3, Vec4};
