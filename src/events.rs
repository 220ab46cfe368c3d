//! Scene notifications.
//!
//! The scene never calls back into the page. Everything the outside world may
//! want to react to (show a fallback image, update a progress bar, pause a
//! video whose fade finished) is queued as a [`SceneEvent`] and drained with
//! [`Scene::drain_events`](crate::Scene::drain_events).

use std::fmt;

use crate::plane::PlaneId;
use crate::resource::ResourceId;

#[derive(Debug, Clone, PartialEq)]
pub enum SceneEvent {
    PlaneReady { plane: PlaneId },
    PlaneBound { plane: PlaneId },
    PlaneRemoved { plane: PlaneId },
    /// The plane cannot show `source`; fall back to the DOM presentation.
    ResourceUnavailable { plane: PlaneId, source: String },
    SourceLoaded { resource: ResourceId, source: String },
    /// `uploaded` out of `total` registered resources are on the GPU.
    SourceUploaded { resource: ResourceId, source: String, uploaded: usize, total: usize },
    SourceFailed { resource: ResourceId, source: String, reason: String },
    ContextLost,
    ContextRestored { generation: u64 },
    ContextLossFatal { reason: String },
    TransitionCompleted { plane: PlaneId, uniform: String, value: f32 },
    SceneRebuilt { planes: usize, failed: usize },
}

impl fmt::Display for SceneEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SceneEvent::PlaneReady { plane } => write!(f, "PlaneReady {plane}"),
            SceneEvent::PlaneBound { plane } => write!(f, "PlaneBound {plane}"),
            SceneEvent::PlaneRemoved { plane } => write!(f, "PlaneRemoved {plane}"),
            SceneEvent::ResourceUnavailable { plane, source } => {
                write!(f, "ResourceUnavailable {plane} source={source}")
            }
            SceneEvent::SourceLoaded { resource, source } => {
                write!(f, "SourceLoaded {resource} source={source}")
            }
            SceneEvent::SourceUploaded {
                resource,
                source,
                uploaded,
                total,
            } => write!(f, "SourceUploaded {resource} source={source} progress={uploaded}/{total}"),
            SceneEvent::SourceFailed {
                resource,
                source,
                reason,
            } => write!(f, "SourceFailed {resource} source={source} reason={reason}"),
            SceneEvent::ContextLost => write!(f, "ContextLost"),
            SceneEvent::ContextRestored { generation } => {
                write!(f, "ContextRestored generation={generation}")
            }
            SceneEvent::ContextLossFatal { reason } => write!(f, "ContextLossFatal {reason}"),
            SceneEvent::TransitionCompleted { plane, uniform, value } => {
                write!(f, "TransitionCompleted {plane} {uniform}={value:.3}")
            }
            SceneEvent::SceneRebuilt { planes, failed } => {
                write!(f, "SceneRebuilt planes={planes} failed={failed}")
            }
        }
    }
}

#[derive(Default, Debug)]
pub struct EventBus {
    events: Vec<SceneEvent>,
}

impl EventBus {
    pub fn push(&mut self, event: SceneEvent) {
        log::trace!("{event}");
        self.events.push(event);
    }

    pub fn drain(&mut self) -> Vec<SceneEvent> {
        self.events.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SceneEvent> {
        self.events.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_single_line() {
        let event = SceneEvent::SourceUploaded {
            resource: ResourceId(2),
            source: "img/3.jpg".into(),
            uploaded: 3,
            total: 4,
        };
        assert_eq!(
            event.to_string(),
            "SourceUploaded resource#2 source=img/3.jpg progress=3/4"
        );
    }

    #[test]
    fn drain_empties_the_bus() {
        let mut bus = EventBus::default();
        bus.push(SceneEvent::ContextLost);
        bus.push(SceneEvent::PlaneBound { plane: PlaneId(1) });
        assert_eq!(bus.len(), 2);
        assert_eq!(bus.drain().len(), 2);
        assert!(bus.is_empty());
    }
}
