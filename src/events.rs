//! Events During Integration
//!
//! An [`Event`] binds up to three roles to a point of the integration loop:
//! *save* columns (read the state, append a number to an output buffer), a
//! *set* action (mutate the state or anything the closure captured) and, for
//! the [`Category::Detection`] category, a [`Detection`] that decides whether
//! a condition changed across the last step and locates when.
//!
//! # Categories
//!
//! | Category    | When it runs                                   | `set` |
//! |-------------|------------------------------------------------|-------|
//! | `Start`     | once, before the first step                    | yes   |
//! | `Step`      | after every accepted step                      | yes   |
//! | `Reject`    | after every rejected attempt, before rollback  | no    |
//! | `Call`      | after every right-hand side evaluation         | no    |
//! | `Stop`      | once, after the last step                      | yes   |
//! | `Detection` | at the located crossing time                   | yes   |
//!
//! A set action that changes the solution value records the jump as a
//! zero-length step, so both sides of the discontinuity stay in the history.
//!
//! # Detection
//!
//! A zero crossing of a scalar function `g` is detected from the values at
//! the start and end of the step and located by bisection on the dense
//! interpolant. Boolean switches are handled the same way.
//!
//! ```ignore
//! use rkswitch::{Detection, Event, EventDirection};
//!
//! // record every time x[0] crosses 1 from below
//! let event = Event::detection(Detection::crossing(|p| p.x[0] - 1.0, EventDirection::Rising))
//!     .save(|s| s.t());
//! ```

use crate::state::{Instant, State};
use thiserror::Error;

/// Number of interval halvings used to locate a crossing.
pub const BISECTION_ITERATIONS: usize = 50;

type ScalarFn<const N: usize> = Box<dyn Fn(&Instant<'_, N>) -> f64>;
type ConditionFn<const N: usize> = Box<dyn Fn(&Instant<'_, N>) -> bool>;
type SaveFn<const N: usize> = Box<dyn FnMut(&State<'_, N>) -> f64>;
type SetFn<const N: usize> = Box<dyn FnMut(&mut State<'_, N>)>;

/// Point of the integration loop an event is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// Before integration starts
    Start,
    /// After each accepted step
    Step,
    /// After each rejected attempt
    Reject,
    /// After each right-hand side evaluation
    Call,
    /// After integration stops
    Stop,
    /// When a detection condition changes inside a step
    Detection,
}

/// Direction of zero-crossing to detect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EventDirection {
    /// Detect when g goes from negative to non-negative
    Rising,
    /// Detect when g goes from positive to non-positive
    Falling,
    /// Detect any sign change, or g landing exactly on zero
    #[default]
    Any,
}

/// Invalid event configuration
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventError {
    /// A set action was attached to a category that runs mid-step.
    #[error("{category:?} events cannot carry a set action")]
    SetNotPermitted {
        /// Category of the offending event
        category: Category,
    },
    /// A detection event without a detection.
    #[error("detection event has no detection function")]
    MissingDetection,
}

/// Check if a crossing occurred between `g_prev` and `g_curr` in the
/// specified direction.
pub fn crossing_detected(g_prev: f64, g_curr: f64, direction: EventDirection) -> bool {
    match direction {
        EventDirection::Any => g_curr * g_prev < 0.0 || g_curr == 0.0,
        EventDirection::Rising => g_curr >= 0.0 && g_prev < 0.0,
        EventDirection::Falling => g_curr <= 0.0 && g_prev > 0.0,
    }
}

/// Locate the crossing of `f` in `(lo, hi]` by bisection.
///
/// The side of the crossing is taken from the sign of `f_lo`. Returns the
/// upper end of the final bracket, which is always on the crossed side and
/// strictly greater than `lo`.
pub fn root_by_bisection<F>(f: F, mut lo: f64, mut hi: f64, f_lo: f64) -> f64
where
    F: Fn(f64) -> f64,
{
    debug_assert!(lo < hi, "empty bracket ({}, {}]", lo, hi);
    let from_below = f_lo < 0.0;
    for _ in 0..BISECTION_ITERATIONS {
        let mid = 0.5 * (lo + hi);
        if mid <= lo || mid >= hi {
            break;
        }
        let fm = f(mid);
        let crossed = if from_below { fm >= 0.0 } else { fm <= 0.0 };
        if crossed {
            hi = mid;
        } else {
            lo = mid;
        }
    }
    hi
}

/// Locate the first time in `(lo, hi]` where `c` differs from `c_lo`.
pub fn bool_change_by_bisection<F>(c: F, mut lo: f64, mut hi: f64, c_lo: bool) -> f64
where
    F: Fn(f64) -> bool,
{
    debug_assert!(lo < hi, "empty bracket ({}, {}]", lo, hi);
    for _ in 0..BISECTION_ITERATIONS {
        let mid = 0.5 * (lo + hi);
        if mid <= lo || mid >= hi {
            break;
        }
        if c(mid) != c_lo {
            hi = mid;
        } else {
            lo = mid;
        }
    }
    hi
}

enum Trigger<const N: usize> {
    Zero {
        g: ScalarFn<N>,
        direction: EventDirection,
    },
    Switch(ConditionFn<N>),
}

/// Condition change monitored across every step.
pub struct Detection<const N: usize> {
    trigger: Trigger<N>,
    when: Option<ConditionFn<N>>,
    located_where: Option<ConditionFn<N>>,
}

impl<const N: usize> Detection<N> {
    /// Zero crossing of `g` in the given direction.
    pub fn crossing<G>(g: G, direction: EventDirection) -> Self
    where
        G: Fn(&Instant<'_, N>) -> f64 + 'static,
    {
        Self {
            trigger: Trigger::Zero {
                g: Box::new(g),
                direction,
            },
            when: None,
            located_where: None,
        }
    }

    /// Any zero crossing of `g`.
    pub fn zero<G>(g: G) -> Self
    where
        G: Fn(&Instant<'_, N>) -> f64 + 'static,
    {
        Self::crossing(g, EventDirection::Any)
    }

    /// `g` crossing zero from below.
    pub fn rising<G>(g: G) -> Self
    where
        G: Fn(&Instant<'_, N>) -> f64 + 'static,
    {
        Self::crossing(g, EventDirection::Rising)
    }

    /// `g` crossing zero from above.
    pub fn falling<G>(g: G) -> Self
    where
        G: Fn(&Instant<'_, N>) -> f64 + 'static,
    {
        Self::crossing(g, EventDirection::Falling)
    }

    /// `c` changing its value.
    pub fn switch<C>(c: C) -> Self
    where
        C: Fn(&Instant<'_, N>) -> bool + 'static,
    {
        Self {
            trigger: Trigger::Switch(Box::new(c)),
            when: None,
            located_where: None,
        }
    }

    /// Only detect when `cond` holds at the current or the previous point.
    pub fn when<C>(mut self, cond: C) -> Self
    where
        C: Fn(&Instant<'_, N>) -> bool + 'static,
    {
        self.when = Some(Box::new(cond));
        self
    }

    /// Discard a located crossing unless `cond` holds at the crossing time.
    pub fn located_where<C>(mut self, cond: C) -> Self
    where
        C: Fn(&Instant<'_, N>) -> bool + 'static,
    {
        self.located_where = Some(Box::new(cond));
        self
    }

    /// Did the monitored condition change between `t_prev` and `t_curr`?
    pub fn detect(&self, state: &State<'_, N>) -> bool {
        let curr = state.current();
        let prev = state.previous();
        if let Some(cond) = &self.when {
            if !(cond(&curr) || cond(&prev)) {
                return false;
            }
        }
        match &self.trigger {
            Trigger::Zero { g, direction } => crossing_detected(g(&prev), g(&curr), *direction),
            Trigger::Switch(c) => c(&curr) != c(&prev),
        }
    }

    /// Crossing time in `(t_prev, t_curr]`, or `f64::INFINITY` if there is none.
    pub fn locate(&self, state: &State<'_, N>) -> f64 {
        if !self.detect(state) {
            return f64::INFINITY;
        }
        let (lo, hi) = (state.t_prev(), state.t());
        let t = match &self.trigger {
            Trigger::Zero { g, .. } => {
                let g_lo = g(&state.previous());
                root_by_bisection(|t| g(&state.instant(t)), lo, hi, g_lo)
            }
            Trigger::Switch(c) => {
                let c_lo = c(&state.previous());
                bool_change_by_bisection(|t| c(&state.instant(t)), lo, hi, c_lo)
            }
        };
        if let Some(cond) = &self.located_where {
            if !cond(&state.instant(t)) {
                return f64::INFINITY;
            }
        }
        t
    }
}

/// Callback bundle attached to one [`Category`].
pub struct Event<const N: usize> {
    category: Category,
    detection: Option<Detection<N>>,
    saves: Vec<SaveFn<N>>,
    saved: Vec<Vec<f64>>,
    set: Option<SetFn<N>>,
}

impl<const N: usize> Event<N> {
    fn new(category: Category) -> Self {
        Self {
            category,
            detection: None,
            saves: Vec::new(),
            saved: Vec::new(),
            set: None,
        }
    }

    /// Runs once before the first step.
    pub fn start() -> Self {
        Self::new(Category::Start)
    }

    /// Runs after every accepted step.
    pub fn step() -> Self {
        Self::new(Category::Step)
    }

    /// Runs after every rejected attempt.
    pub fn reject() -> Self {
        Self::new(Category::Reject)
    }

    /// Runs after every right-hand side evaluation.
    pub fn call() -> Self {
        Self::new(Category::Call)
    }

    /// Runs once after the last step.
    pub fn stop() -> Self {
        Self::new(Category::Stop)
    }

    /// Runs at the located time of `detection`.
    pub fn detection(detection: Detection<N>) -> Self {
        Self {
            detection: Some(detection),
            ..Self::new(Category::Detection)
        }
    }

    /// Add a save column.
    pub fn save<F>(mut self, f: F) -> Self
    where
        F: FnMut(&State<'_, N>) -> f64 + 'static,
    {
        self.saves.push(Box::new(f));
        self.saved.push(Vec::new());
        self
    }

    /// Save `t` followed by every coordinate of `x`.
    pub fn save_all(self) -> Self {
        let mut event = self.save(|s| s.t());
        for n in 0..N {
            event = event.save(move |s| s.x()[n]);
        }
        event
    }

    /// Set the action run when the event fires.
    pub fn set<F>(mut self, f: F) -> Self
    where
        F: FnMut(&mut State<'_, N>) + 'static,
    {
        self.set = Some(Box::new(f));
        self
    }

    /// Category this event is attached to.
    pub fn category(&self) -> Category {
        self.category
    }

    /// Detection, for detection events.
    pub fn detector(&self) -> Option<&Detection<N>> {
        self.detection.as_ref()
    }

    /// Saved columns, one per [`save`](Self::save) call.
    pub fn saved(&self) -> &[Vec<f64>] {
        &self.saved
    }

    fn record(&mut self, state: &State<'_, N>) {
        for (save, column) in self.saves.iter_mut().zip(self.saved.iter_mut()) {
            column.push(save(state));
        }
    }

    /// Save, set, save again. Returns `true` when the set action changed `x`.
    pub(crate) fn fire(&mut self, state: &mut State<'_, N>) -> bool {
        self.record(state);
        let Some(set) = self.set.as_mut() else {
            return false;
        };
        let before = *state.x();
        set(state);
        self.record(state);
        before
            .iter()
            .zip(state.x())
            .any(|(a, b)| a.to_bits() != b.to_bits())
    }
}

/// Events grouped by category, declaration order preserved.
#[derive(Default)]
pub struct Events<const N: usize> {
    start: Vec<Event<N>>,
    step: Vec<Event<N>>,
    reject: Vec<Event<N>>,
    call: Vec<Event<N>>,
    stop: Vec<Event<N>>,
    detection: Vec<Event<N>>,
}

impl<const N: usize> Events<N> {
    /// Empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an event to its category.
    pub fn push(&mut self, event: Event<N>) -> Result<(), EventError> {
        match event.category {
            Category::Reject | Category::Call if event.set.is_some() => {
                return Err(EventError::SetNotPermitted {
                    category: event.category,
                });
            }
            Category::Detection if event.detection.is_none() => {
                return Err(EventError::MissingDetection);
            }
            _ => {}
        }
        self.insert(event);
        Ok(())
    }

    /// Add an event built by this crate.
    ///
    /// Only for events whose set action sits in a category that permits it
    /// and whose detection events carry a [`Detection`], which holds for
    /// everything built through [`Event::start`] and [`Event::detection`].
    pub(crate) fn insert(&mut self, event: Event<N>) {
        self.bucket_mut(event.category).push(event);
    }

    /// Builder form of [`push`](Self::push).
    pub fn with(mut self, event: Event<N>) -> Result<Self, EventError> {
        self.push(event)?;
        Ok(self)
    }

    /// Append all events of `other`, category by category.
    pub fn extend(&mut self, other: Events<N>) {
        self.start.extend(other.start);
        self.step.extend(other.step);
        self.reject.extend(other.reject);
        self.call.extend(other.call);
        self.stop.extend(other.stop);
        self.detection.extend(other.detection);
    }

    /// Total number of events.
    pub fn len(&self) -> usize {
        self.start.len()
            + self.step.len()
            + self.reject.len()
            + self.call.len()
            + self.stop.len()
            + self.detection.len()
    }

    /// True if there are no events.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Events of one category in declaration order.
    pub fn category(&self, category: Category) -> &[Event<N>] {
        match category {
            Category::Start => &self.start,
            Category::Step => &self.step,
            Category::Reject => &self.reject,
            Category::Call => &self.call,
            Category::Stop => &self.stop,
            Category::Detection => &self.detection,
        }
    }

    fn bucket_mut(&mut self, category: Category) -> &mut Vec<Event<N>> {
        match category {
            Category::Start => &mut self.start,
            Category::Step => &mut self.step,
            Category::Reject => &mut self.reject,
            Category::Call => &mut self.call,
            Category::Stop => &mut self.stop,
            Category::Detection => &mut self.detection,
        }
    }

    /// All saved columns: Detection, Step, Reject, Call, Start, Stop.
    pub fn saved(&self) -> Vec<Vec<f64>> {
        [
            &self.detection,
            &self.step,
            &self.reject,
            &self.call,
            &self.start,
            &self.stop,
        ]
        .into_iter()
        .flat_map(|events| events.iter())
        .flat_map(|event| event.saved.iter().cloned())
        .collect()
    }

    /// Fire every event of a non-detection category in declaration order.
    ///
    /// Each change of `x` is recorded as a zero-length step. Returns the
    /// number of such jumps.
    pub(crate) fn run(&mut self, category: Category, state: &mut State<'_, N>) -> usize {
        debug_assert_ne!(category, Category::Detection);
        let mut jumps = 0;
        for event in self.bucket_mut(category) {
            if event.fire(state) {
                state.zero_length_step();
                jumps += 1;
            }
        }
        jumps
    }

    /// True if any call events are registered.
    pub(crate) fn has_call_events(&self) -> bool {
        !self.call.is_empty()
    }

    /// Earliest located detection in the current step.
    ///
    /// Ties go to the event declared first.
    pub(crate) fn locate(&self, state: &State<'_, N>) -> Option<(usize, f64)> {
        let mut best: Option<(usize, f64)> = None;
        for (i, event) in self.detection.iter().enumerate() {
            let Some(detection) = &event.detection else {
                continue;
            };
            let t = detection.locate(state);
            if t < best.map_or(f64::INFINITY, |(_, t_best)| t_best) {
                best = Some((i, t));
            }
        }
        best
    }

    /// Re-check and fire detection event `index` at the end of the current step.
    ///
    /// Returns `None` if the detection no longer holds, otherwise whether
    /// the event changed `x`.
    pub(crate) fn dispatch(&mut self, index: usize, state: &mut State<'_, N>) -> Option<bool> {
        let event = &mut self.detection[index];
        let detected = match &event.detection {
            Some(detection) => detection.detect(state),
            None => false,
        };
        if !detected {
            return None;
        }
        Some(event.fire(state))
    }
}
