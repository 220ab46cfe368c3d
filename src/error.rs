//! Error types shared by every part of the crate.
//!
//! The taxonomy mirrors how failures propagate through a scene:
//!
//! - [`DrapeError::InvalidConfig`] is fatal to one plane only. The rest of the
//!   scene keeps rendering.
//! - [`DrapeError::ResourceUnavailable`] is recoverable. The caller is expected
//!   to fall back to the original DOM presentation for the affected plane.
//! - [`DrapeError::ContextLossFatal`] is raised when restoring the GPU context
//!   failed. No retry is attempted; the caller decides what to do.
//!
//! ```ignore
//! use drape::{DrapeError, Result};
//!
//! fn create(scene: &mut Scene, element: PlaneElement) -> Result<PlaneId> {
//!     match scene.add_plane(element, &params) {
//!         Err(DrapeError::InvalidConfig { plane, reason }) => { /* show the html image */ }
//!         other => other,
//!     }
//! }
//! ```

use thiserror::Error;

use crate::gpu::GpuError;
use crate::plane::PlaneId;
use crate::resource::ResourceId;

/// The main error type for scene, resource and context operations.
#[derive(Error, Debug)]
pub enum DrapeError {
    /// Malformed plane configuration. Only the offending plane is rejected.
    #[error("invalid configuration for plane '{plane}': {reason}")]
    InvalidConfig {
        /// Identifier of the element the plane was built from.
        plane: String,
        /// What was wrong with it.
        reason: String,
    },

    /// A texture source failed to load or could not be matched.
    #[error("resource '{source_id}' unavailable: {reason}")]
    ResourceUnavailable {
        /// Source identifier (usually a URL).
        source_id: String,
        /// Failure description reported by the loader or the registry.
        reason: String,
    },

    /// Restoring the GPU context failed.
    #[error("context restoration failed: {0}")]
    ContextLossFatal(String),

    /// The plane id does not refer to a live plane.
    #[error("unknown plane {0}")]
    UnknownPlane(PlaneId),

    /// The resource id does not refer to a registered resource.
    #[error("unknown resource {0}")]
    UnknownResource(ResourceId),

    /// Error reported by the GPU backend.
    #[error("gpu error: {0}")]
    Gpu(#[from] GpuError),

    /// Configuration could not be parsed.
    #[error("configuration parse error: {0}")]
    ConfigParse(#[from] serde_json::Error),

    /// File I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Image decoding error.
    #[error("image decode error: {0}")]
    ImageDecode(#[from] image::ImageError),
}

impl DrapeError {
    pub(crate) fn invalid_config(plane: impl Into<String>, reason: impl Into<String>) -> Self {
        DrapeError::InvalidConfig {
            plane: plane.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn unavailable(source_id: impl Into<String>, reason: impl Into<String>) -> Self {
        DrapeError::ResourceUnavailable {
            source_id: source_id.into(),
            reason: reason.into(),
        }
    }

    /// Returns `true` for failures the caller can recover from by falling back
    /// to non-GPU presentation.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            DrapeError::ResourceUnavailable { .. } | DrapeError::InvalidConfig { .. }
        )
    }
}

/// Alias for `std::result::Result<T, DrapeError>`.
pub type Result<T> = std::result::Result<T, DrapeError>;
