//! Damped transitions.
//!
//! A [`TransitionState`] moves a scalar toward a target a fixed fraction of the
//! remaining distance per frame:
//!
//! ```text
//! progress += (target - progress) * damping
//! ```
//!
//! Plain damping only approaches the target asymptotically, so once progress
//! is within `snap_threshold` of the target it is set to the target exactly.
//! With `damping` in `(0, 1]` and a positive threshold every transition settles
//! in a bounded number of frames and never overshoots.
//!
//! Two compositions sit on top of it:
//!
//! - [`Crossfade`] flips between two textures, targeting `0` or `max`
//!   depending on which side is active, and reports completion once.
//! - [`Decay`] pulls a transient value (wheel or touch velocity) back toward
//!   zero every frame, whatever else is going on.
//!
//! [`TransitionEngine`] keeps the transitions that belong to plane uniforms and
//! the scene-wide decays, and advances them once per tick.

use std::collections::BTreeMap;

use crate::error::{DrapeError, Result};
use crate::plane::PlaneId;

fn check_damping(damping: f32) -> Result<()> {
    if damping > 0.0 && damping <= 1.0 {
        Ok(())
    } else {
        Err(DrapeError::invalid_config(
            "transition",
            format!("damping must be in (0, 1], got {damping}"),
        ))
    }
}

/// One damped scalar.
#[derive(Clone, Debug, PartialEq)]
pub struct TransitionState {
    progress: f32,
    target: f32,
    damping: f32,
    snap_threshold: f32,
    min: f32,
    max: f32,
}

impl TransitionState {
    /// A settled, unbounded transition at `progress`.
    pub fn new(progress: f32) -> Self {
        Self {
            progress,
            target: progress,
            damping: 0.05,
            snap_threshold: 1.0,
            min: f32::NEG_INFINITY,
            max: f32::INFINITY,
        }
    }

    /// Clamp progress (and targets) to `[min, max]`.
    pub fn bounded(mut self, min: f32, max: f32) -> Self {
        self.min = min.min(max);
        self.max = max.max(min);
        self.progress = self.progress.clamp(self.min, self.max);
        self.target = self.target.clamp(self.min, self.max);
        self
    }

    /// Non-positive thresholds are replaced by `f32::EPSILON`.
    pub fn with_snap_threshold(mut self, threshold: f32) -> Self {
        self.snap_threshold = if threshold > 0.0 { threshold } else { f32::EPSILON };
        self
    }

    pub fn with_damping(mut self, damping: f32) -> Result<Self> {
        check_damping(damping)?;
        self.damping = damping;
        Ok(self)
    }

    /// Aim for a new target. Progress is kept so a transition can be
    /// re-triggered halfway.
    pub fn start(&mut self, target: f32, damping: f32) -> Result<()> {
        check_damping(damping)?;
        self.retarget(target);
        self.damping = damping;
        Ok(())
    }

    fn retarget(&mut self, target: f32) {
        self.target = target.clamp(self.min, self.max);
    }

    /// Move one frame toward the target and return the new progress.
    pub fn advance(&mut self) -> f32 {
        if self.progress != self.target {
            let previous = self.progress;
            self.progress += (self.target - self.progress) * self.damping;
            self.progress = self.progress.clamp(self.min, self.max);
            // A step below float resolution would stall short of the target.
            if (self.target - self.progress).abs() <= self.snap_threshold || self.progress == previous {
                self.progress = self.target;
            }
        }
        self.progress
    }

    pub fn progress(&self) -> f32 {
        self.progress
    }

    pub fn target(&self) -> f32 {
        self.target
    }

    pub fn damping(&self) -> f32 {
        self.damping
    }

    pub fn is_settled(&self) -> bool {
        self.progress == self.target
    }

    /// Jump straight to a value, clamped, without animating.
    pub fn set(&mut self, value: f32) {
        self.progress = value.clamp(self.min, self.max);
    }
}

/// Which of two textures is currently shown.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    First,
    Second,
}

impl Side {
    pub fn other(self) -> Side {
        match self {
            Side::First => Side::Second,
            Side::Second => Side::First,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CrossfadeStatus {
    Idle,
    Running,
    /// Reported on the single frame the fade lands. `side` is now fully shown.
    Completed { side: Side },
}

/// Two-texture fade driven by a [`TransitionState`] over `[0, max]`.
///
/// `0` shows [`Side::First`], `max` shows [`Side::Second`].
#[derive(Clone, Debug)]
pub struct Crossfade {
    state: TransitionState,
    active: Side,
    max: f32,
    running: bool,
}

impl Crossfade {
    pub fn new(max: f32, damping: f32, snap_threshold: f32) -> Result<Self> {
        let state = TransitionState::new(0.0)
            .bounded(0.0, max)
            .with_snap_threshold(snap_threshold)
            .with_damping(damping)?;
        Ok(Self {
            state,
            active: Side::First,
            max,
            running: false,
        })
    }

    pub fn active(&self) -> Side {
        self.active
    }

    pub fn progress(&self) -> f32 {
        self.state.progress()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Switch the active side and start fading toward it.
    pub fn toggle(&mut self) -> Side {
        self.active = self.active.other();
        let target = match self.active {
            Side::First => 0.0,
            Side::Second => self.max,
        };
        self.state.retarget(target);
        self.running = !self.state.is_settled();
        self.active
    }

    pub fn advance(&mut self) -> CrossfadeStatus {
        if !self.running {
            return CrossfadeStatus::Idle;
        }
        self.state.advance();
        if self.state.is_settled() {
            self.running = false;
            CrossfadeStatus::Completed { side: self.active }
        } else {
            CrossfadeStatus::Running
        }
    }
}

/// A value that relaxes back to zero every frame.
#[derive(Clone, Debug)]
pub struct Decay {
    state: TransitionState,
}

impl Decay {
    pub fn new(rate: f32) -> Result<Self> {
        let state = TransitionState::new(0.0)
            .with_snap_threshold(1e-4)
            .with_damping(rate)?;
        Ok(Self { state })
    }

    /// Clamp the value to `[-limit, limit]`.
    pub fn limited(mut self, limit: f32) -> Self {
        self.state = self.state.bounded(-limit.abs(), limit.abs());
        self
    }

    /// Add to the current value, e.g. a wheel delta.
    pub fn impulse(&mut self, amount: f32) {
        self.state.set(self.state.progress() + amount);
    }

    pub fn value(&self) -> f32 {
        self.state.progress()
    }

    pub fn advance(&mut self) -> f32 {
        self.state.advance()
    }
}

/// Result of advancing one plane uniform.
#[derive(Clone, Debug, PartialEq)]
pub struct TransitionStep {
    pub uniform: String,
    pub value: f32,
    /// The transition landed on its target this frame.
    pub completed: bool,
}

#[derive(Debug)]
struct PlaneTransition {
    plane: PlaneId,
    uniform: String,
    state: TransitionState,
}

/// Per-plane uniform transitions plus scene-wide decays.
#[derive(Debug)]
pub struct TransitionEngine {
    snap_threshold: f32,
    default_damping: f32,
    transitions: Vec<PlaneTransition>,
    decays: BTreeMap<String, Decay>,
}

impl TransitionEngine {
    pub fn new(snap_threshold: f32, default_damping: f32) -> Self {
        Self {
            snap_threshold,
            default_damping,
            transitions: Vec::new(),
            decays: BTreeMap::new(),
        }
    }

    pub fn default_damping(&self) -> f32 {
        self.default_damping
    }

    /// Start or retarget the transition of one plane uniform.
    ///
    /// `current` seeds the progress of a new transition; a running one keeps
    /// its own progress.
    pub fn start(
        &mut self,
        plane: PlaneId,
        uniform: &str,
        current: f32,
        target: f32,
        damping: Option<f32>,
    ) -> Result<()> {
        let damping = damping.unwrap_or(self.default_damping);
        if let Some(existing) = self
            .transitions
            .iter_mut()
            .find(|t| t.plane == plane && t.uniform == uniform)
        {
            return existing.state.start(target, damping);
        }
        let mut state = TransitionState::new(current).with_snap_threshold(self.snap_threshold);
        state.start(target, damping)?;
        self.transitions.push(PlaneTransition {
            plane,
            uniform: uniform.to_string(),
            state,
        });
        Ok(())
    }

    /// Progress of a running transition.
    pub fn progress(&self, plane: PlaneId, uniform: &str) -> Option<f32> {
        self.transitions
            .iter()
            .find(|t| t.plane == plane && t.uniform == uniform)
            .map(|t| t.state.progress())
    }

    pub fn is_active(&self, plane: PlaneId) -> bool {
        self.transitions.iter().any(|t| t.plane == plane)
    }

    /// Advance every transition of `plane`. Completed ones are dropped after
    /// being reported.
    pub fn advance_plane(&mut self, plane: PlaneId) -> Vec<TransitionStep> {
        let mut steps = Vec::new();
        self.transitions.retain_mut(|t| {
            if t.plane != plane {
                return true;
            }
            let value = t.state.advance();
            let completed = t.state.is_settled();
            steps.push(TransitionStep {
                uniform: t.uniform.clone(),
                value,
                completed,
            });
            !completed
        });
        steps
    }

    /// Drop every transition of a plane without finishing it.
    pub fn cancel_plane(&mut self, plane: PlaneId) {
        self.transitions.retain(|t| t.plane != plane);
    }

    /// Register (or replace) a scene-wide decay.
    pub fn add_decay(&mut self, name: &str, decay: Decay) {
        self.decays.insert(name.to_string(), decay);
    }

    pub fn impulse(&mut self, name: &str, amount: f32) {
        match self.decays.get_mut(name) {
            Some(decay) => decay.impulse(amount),
            None => log::warn!("impulse on unknown decay '{name}'"),
        }
    }

    /// Current value of a decay, zero when unknown.
    pub fn decay(&self, name: &str) -> f32 {
        self.decays.get(name).map_or(0.0, Decay::value)
    }

    pub fn advance_decays(&mut self) {
        for decay in self.decays.values_mut() {
            decay.advance();
        }
    }

    pub fn clear(&mut self) {
        self.transitions.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slideshow_snaps_to_target_without_overshoot() {
        let mut state = TransitionState::new(0.0).with_snap_threshold(1.5);
        state.start(90.0, 0.04).unwrap();

        let mut ticks = 0;
        let mut last = 0.0;
        while !state.is_settled() {
            let value = state.advance();
            assert!(value <= 90.0);
            assert!(value >= last);
            last = value;
            ticks += 1;
            assert!(ticks < 500, "transition did not settle");
        }
        assert_eq!(state.progress(), 90.0);
        assert_eq!(state.advance(), 90.0);
    }

    #[test]
    fn converges_for_any_valid_damping() {
        for damping in [0.001, 0.01, 0.2, 0.5, 1.0] {
            let mut state = TransitionState::new(-40.0).with_snap_threshold(0.01);
            state.start(1000.0, damping).unwrap();
            let mut ticks = 0;
            while !state.is_settled() {
                state.advance();
                ticks += 1;
                assert!(ticks < 20_000);
            }
            assert_eq!(state.progress(), 1000.0);
        }
    }

    #[test]
    fn retarget_keeps_progress() {
        let mut state = TransitionState::new(0.0);
        state.start(100.0, 0.5).unwrap();
        state.advance();
        assert_eq!(state.progress(), 50.0);
        state.start(0.0, 0.5).unwrap();
        assert_eq!(state.progress(), 50.0);
        assert_eq!(state.advance(), 25.0);
    }

    #[test]
    fn invalid_damping_is_rejected() {
        let mut state = TransitionState::new(0.0);
        assert!(state.start(1.0, 0.0).is_err());
        assert!(state.start(1.0, 1.5).is_err());
        assert!(state.start(1.0, f32::NAN).is_err());
    }

    #[test]
    fn bounds_clamp_target_and_progress() {
        let mut state = TransitionState::new(0.0).bounded(0.0, 10.0);
        state.start(50.0, 1.0).unwrap();
        assert_eq!(state.advance(), 10.0);
    }

    #[test]
    fn crossfade_completes_exactly_once() {
        let mut fade = Crossfade::new(60.0, 0.05, 1.0).unwrap();
        assert_eq!(fade.advance(), CrossfadeStatus::Idle);
        assert_eq!(fade.toggle(), Side::Second);

        let mut completions = 0;
        for _ in 0..1000 {
            if let CrossfadeStatus::Completed { side } = fade.advance() {
                assert_eq!(side, Side::Second);
                completions += 1;
            }
        }
        assert_eq!(completions, 1);
        assert_eq!(fade.progress(), 60.0);

        fade.toggle();
        while fade.is_running() {
            fade.advance();
        }
        assert_eq!(fade.progress(), 0.0);
    }

    #[test]
    fn toggle_mid_fade_reverses_with_the_same_damping() {
        let mut fade = Crossfade::new(100.0, 0.5, 1.0).unwrap();
        fade.toggle();
        fade.advance();
        assert_eq!(fade.progress(), 50.0);

        assert_eq!(fade.toggle(), Side::First);
        assert!(fade.is_running());
        fade.advance();
        assert_eq!(fade.progress(), 25.0);
    }

    #[test]
    fn decay_relaxes_to_zero() {
        let mut decay = Decay::new(0.05).unwrap().limited(2.0);
        decay.impulse(5.0);
        assert_eq!(decay.value(), 2.0);
        for _ in 0..1000 {
            decay.advance();
        }
        assert_eq!(decay.value(), 0.0);
    }

    #[test]
    fn engine_reports_completion_and_drops_transition() {
        let mut engine = TransitionEngine::new(1.0, 0.05);
        let plane = PlaneId(0);
        engine.start(plane, "timer", 0.0, 10.0, Some(0.5)).unwrap();
        assert!(engine.is_active(plane));

        let mut done = false;
        for _ in 0..100 {
            let steps = engine.advance_plane(plane);
            if steps.iter().any(|s| s.completed) {
                assert_eq!(steps[0].value, 10.0);
                done = true;
                break;
            }
        }
        assert!(done);
        assert!(!engine.is_active(plane));
        assert!(engine.advance_plane(plane).is_empty());
    }
}
