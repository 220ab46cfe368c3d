//! Frame-driven callback scheduling.
//!
//! [`RenderLoopScheduler`] runs callbacks once per [`tick`](RenderLoopScheduler::tick):
//! one-shot callbacks run on the next tick and are dropped, repeating ones run
//! every tick until they stop themselves or are cancelled.
//!
//! Every registration returns a [`FrameHandle`]. The same handle is passed
//! into the callback, which is how "poll until the condition holds, then stop"
//! is written:
//!
//! ```ignore
//! scheduler.schedule(true, move |scene: &mut Scene<_>, handle| {
//!     if scene.registry().find("img/1.jpg").is_some() {
//!         // bind ...
//!         handle.stop();
//!     }
//! });
//! ```
//!
//! # Ordering
//!
//! Within a tick, callbacks run in registration order. Callbacks scheduled
//! during a tick first run on the next one.
//!
//! # Cancellation
//!
//! [`FrameHandle::cancel`] can be called at any time, including from inside
//! another callback of the same tick. A cancelled callback never runs again,
//! even if it was still queued for the current tick.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

/// Identifies one registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

impl fmt::Display for CallbackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "callback#{}", self.0)
    }
}

#[derive(Debug)]
struct HandleState {
    keep: Cell<bool>,
    cancelled: Cell<bool>,
    finished: Cell<bool>,
}

/// Shared handle to a scheduled callback.
///
/// Cloning is cheap; all clones refer to the same registration.
#[derive(Clone, Debug)]
pub struct FrameHandle {
    id: CallbackId,
    state: Rc<HandleState>,
}

impl FrameHandle {
    fn new(id: CallbackId, repeat: bool) -> Self {
        Self {
            id,
            state: Rc::new(HandleState {
                keep: Cell::new(repeat),
                cancelled: Cell::new(false),
                finished: Cell::new(false),
            }),
        }
    }

    pub fn id(&self) -> CallbackId {
        self.id
    }

    /// Whether a repeating callback will run again.
    pub fn keep(&self) -> bool {
        self.state.keep.get()
    }

    /// Clear the `keep` flag: the callback is dropped after its current run.
    pub fn stop(&self) {
        self.state.keep.set(false);
    }

    /// Prevent any further run, effective immediately.
    pub fn cancel(&self) {
        self.state.cancelled.set(true);
        self.state.keep.set(false);
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.get()
    }

    /// The callback will not run again, whether it completed or was cancelled.
    pub fn is_done(&self) -> bool {
        self.state.cancelled.get() || self.state.finished.get()
    }
}

/// Callback signature. `C` is whatever the ticking code passes in, usually
/// the scene that owns the scheduler.
pub type FrameCallback<C> = Box<dyn FnMut(&mut C, &FrameHandle)>;

struct Entry<C> {
    handle: FrameHandle,
    repeat: bool,
    callback: FrameCallback<C>,
}

/// Registration-ordered list of per-frame callbacks.
pub struct RenderLoopScheduler<C> {
    entries: Vec<Entry<C>>,
    next_id: u64,
}

impl<C> Default for RenderLoopScheduler<C> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            next_id: 0,
        }
    }
}

impl<C> RenderLoopScheduler<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback. With `repeat` it runs every tick until its handle
    /// is stopped or cancelled, otherwise exactly once.
    pub fn schedule(
        &mut self,
        repeat: bool,
        callback: impl FnMut(&mut C, &FrameHandle) + 'static,
    ) -> FrameHandle {
        self.next_id += 1;
        let handle = FrameHandle::new(CallbackId(self.next_id), repeat);
        self.entries.push(Entry {
            handle: handle.clone(),
            repeat,
            callback: Box::new(callback),
        });
        handle
    }

    /// Run once on the next tick.
    pub fn next_tick(&mut self, callback: impl FnMut(&mut C, &FrameHandle) + 'static) -> FrameHandle {
        self.schedule(false, callback)
    }

    /// Remove a callback. Safe to call while a tick is running.
    pub fn cancel(&mut self, handle: &FrameHandle) {
        handle.cancel();
        self.entries.retain(|e| e.handle.id != handle.id);
    }

    /// Cancel every registration.
    pub fn cancel_all(&mut self) {
        for entry in self.entries.drain(..) {
            entry.handle.cancel();
        }
    }

    /// Registrations waiting for the next tick.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_scheduled(&self, handle: &FrameHandle) -> bool {
        self.entries.iter().any(|e| e.handle.id == handle.id)
    }

    /// Run one frame worth of callbacks against an external context.
    pub fn tick(&mut self, ctx: &mut C) {
        let due = std::mem::take(&mut self.entries);
        let retained = run_entries(due, ctx);
        self.merge(retained);
    }

    fn merge(&mut self, mut retained: Vec<Entry<C>>) {
        // A later callback of the same tick may have cancelled one that already ran.
        retained.retain(|e| !e.handle.is_cancelled());
        // Registrations made during the tick go after the ones that survived it.
        retained.append(&mut self.entries);
        self.entries = retained;
    }
}

fn run_entries<C>(due: Vec<Entry<C>>, ctx: &mut C) -> Vec<Entry<C>> {
    let mut retained = Vec::with_capacity(due.len());
    for mut entry in due {
        if entry.handle.is_cancelled() {
            continue;
        }
        (entry.callback)(ctx, &entry.handle);
        if entry.repeat && entry.handle.keep() && !entry.handle.is_cancelled() {
            retained.push(entry);
        } else {
            entry.handle.state.finished.set(true);
        }
    }
    retained
}

/// A context that owns the scheduler its callbacks run against.
///
/// Callbacks get `&mut Self`, so they may schedule or cancel other callbacks
/// through the host while the tick is in progress.
pub trait SchedulerHost: Sized {
    fn scheduler(&mut self) -> &mut RenderLoopScheduler<Self>;

    /// Run one frame worth of the host's own callbacks.
    fn tick_scheduler(&mut self) {
        let due = std::mem::take(&mut self.scheduler().entries);
        let retained = run_entries(due, self);
        self.scheduler().merge(retained);
    }
}
