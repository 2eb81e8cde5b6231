//! Discontinuous Primitives
//!
//! Each switch caches the branch it is on and only flips it at a located
//! crossing, so the right-hand side stays smooth inside every step and the
//! integrator keeps its order across the discontinuity. A switch contributes
//! two kinds of events:
//!
//! * a Start event that initialises the branch from the argument at `t_0`;
//! * one Detection event per breakpoint that flips the branch.
//!
//! Register them through [`Equation::rhs_events`](crate::Equation::rhs_events):
//!
//! ```ignore
//! struct Relay { sign: Sign<1> }
//!
//! impl Equation<1> for Relay {
//!     fn rhs(&self, _s: &State<'_, 1>) -> [f64; 1] {
//!         [1.5 + 0.5 * self.sign.value()]
//!     }
//!     fn ic(&self, t: f64) -> [f64; 1] {
//!         [1.5 * t + 0.5 * t.abs()]
//!     }
//!     fn rhs_events(&self) -> Events<1> {
//!         self.sign.events()
//!     }
//! }
//! ```
//!
//! Switches share their branch through `Rc<Cell<_>>`; cloning a switch
//! clones the handle, not the branch.

use std::cell::Cell;
use std::rc::Rc;

use crate::events::{Detection, Event, Events};
use crate::state::Instant;

/// Argument of a switch, evaluated on trajectory instants.
pub type Argument<const N: usize> = Rc<dyn Fn(&Instant<'_, N>) -> f64>;

/// Collect switch events: one Start event, the rest Detection events.
fn collect<const N: usize>(events: impl IntoIterator<Item = Event<N>>) -> Events<N> {
    let mut all = Events::new();
    for event in events {
        all.insert(event);
    }
    all
}

fn sign(x: f64) -> f64 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        0.0
    }
}

/// `sign(arg)` with values `-1`, `0` (only before the first crossing), `1`.
#[derive(Clone)]
pub struct Sign<const N: usize> {
    arg: Argument<N>,
    branch: Rc<Cell<f64>>,
}

impl<const N: usize> Sign<N> {
    /// Switch on the sign of `arg`.
    pub fn new<F>(arg: F) -> Self
    where
        F: Fn(&Instant<'_, N>) -> f64 + 'static,
    {
        Self {
            arg: Rc::new(arg),
            branch: Rc::new(Cell::new(0.0)),
        }
    }

    /// Current branch.
    pub fn value(&self) -> f64 {
        self.branch.get()
    }

    /// Start and Detection events driving the branch.
    pub fn events(&self) -> Events<N> {
        let (arg, branch) = (self.arg.clone(), self.branch.clone());
        let start = Event::start().set(move |s| branch.set(sign(arg(&s.current()))));

        let (arg, branch) = (self.arg.clone(), self.branch.clone());
        let detect_arg = self.arg.clone();
        let flip = Event::detection(Detection::zero(move |p| detect_arg(p))).set(move |s| {
            let new = sign(arg(&s.current()));
            branch.set(if new != 0.0 { new } else { -branch.get() });
        });
        collect([start, flip])
    }
}

/// Heaviside step: `low` for `arg < 0`, `high` for `arg >= 0`.
#[derive(Clone)]
pub struct Step<const N: usize> {
    arg: Argument<N>,
    low: f64,
    high: f64,
    high_branch: Rc<Cell<bool>>,
}

impl<const N: usize> Step<N> {
    /// Unit step (`0` / `1`).
    pub fn new<F>(arg: F) -> Self
    where
        F: Fn(&Instant<'_, N>) -> f64 + 'static,
    {
        Self::with_levels(arg, 0.0, 1.0)
    }

    /// Step between arbitrary levels.
    pub fn with_levels<F>(arg: F, low: f64, high: f64) -> Self
    where
        F: Fn(&Instant<'_, N>) -> f64 + 'static,
    {
        Self {
            arg: Rc::new(arg),
            low,
            high,
            high_branch: Rc::new(Cell::new(true)),
        }
    }

    /// Current level.
    pub fn value(&self) -> f64 {
        if self.high_branch.get() {
            self.high
        } else {
            self.low
        }
    }

    /// Start and Detection events driving the level.
    pub fn events(&self) -> Events<N> {
        let (arg, branch) = (self.arg.clone(), self.high_branch.clone());
        let start = Event::start().set(move |s| branch.set(arg(&s.current()) >= 0.0));

        let branch = self.high_branch.clone();
        let detect_arg = self.arg.clone();
        let flip = Event::detection(Detection::zero(move |p| detect_arg(p)))
            .set(move |_| branch.set(!branch.get()));
        collect([start, flip])
    }
}

/// `|arg|`, evaluated with a cached sign so it stays smooth inside a step.
#[derive(Clone)]
pub struct Abs<const N: usize> {
    arg: Argument<N>,
    branch: Rc<Cell<f64>>,
}

impl<const N: usize> Abs<N> {
    /// Absolute value of `arg`.
    pub fn new<F>(arg: F) -> Self
    where
        F: Fn(&Instant<'_, N>) -> f64 + 'static,
    {
        Self {
            arg: Rc::new(arg),
            branch: Rc::new(Cell::new(1.0)),
        }
    }

    /// `branch · arg(at)`
    pub fn value(&self, at: &Instant<'_, N>) -> f64 {
        self.branch.get() * (self.arg)(at)
    }

    /// Start and Detection events driving the cached sign.
    pub fn events(&self) -> Events<N> {
        let (arg, branch) = (self.arg.clone(), self.branch.clone());
        let start = Event::start().set(move |s| {
            branch.set(if arg(&s.current()) >= 0.0 { 1.0 } else { -1.0 })
        });

        let branch = self.branch.clone();
        let detect_arg = self.arg.clone();
        let flip = Event::detection(Detection::zero(move |p| detect_arg(p)))
            .set(move |_| branch.set(-branch.get()));
        collect([start, flip])
    }
}

/// `max(arg, 0)` with a cached mask.
#[derive(Clone)]
pub struct Relu<const N: usize> {
    arg: Argument<N>,
    mask: Rc<Cell<f64>>,
}

impl<const N: usize> Relu<N> {
    /// Rectifier of `arg`.
    pub fn new<F>(arg: F) -> Self
    where
        F: Fn(&Instant<'_, N>) -> f64 + 'static,
    {
        Self {
            arg: Rc::new(arg),
            mask: Rc::new(Cell::new(1.0)),
        }
    }

    /// `mask · arg(at)`
    pub fn value(&self, at: &Instant<'_, N>) -> f64 {
        self.mask.get() * (self.arg)(at)
    }

    /// Start and Detection events driving the mask.
    pub fn events(&self) -> Events<N> {
        let (arg, mask) = (self.arg.clone(), self.mask.clone());
        let start =
            Event::start().set(move |s| mask.set(if arg(&s.current()) >= 0.0 { 1.0 } else { 0.0 }));

        let mask = self.mask.clone();
        let detect_arg = self.arg.clone();
        let flip = Event::detection(Detection::zero(move |p| detect_arg(p)))
            .set(move |_| mask.set(1.0 - mask.get()));
        collect([start, flip])
    }
}

/// `arg` clipped to `[min, max]`.
#[derive(Clone)]
pub struct Clip<const N: usize> {
    arg: Argument<N>,
    min: f64,
    max: f64,
    /// 0: below `min`, 1: inside, 2: above `max`
    region: Rc<Cell<u8>>,
}

impl<const N: usize> Clip<N> {
    /// Clip `arg` to `[min, max]`.
    pub fn new<F>(arg: F, min: f64, max: f64) -> Self
    where
        F: Fn(&Instant<'_, N>) -> f64 + 'static,
    {
        debug_assert!(min < max);
        Self {
            arg: Rc::new(arg),
            min,
            max,
            region: Rc::new(Cell::new(1)),
        }
    }

    /// Clipped value at `at`, on the cached region.
    pub fn value(&self, at: &Instant<'_, N>) -> f64 {
        match self.region.get() {
            0 => self.min,
            1 => (self.arg)(at),
            _ => self.max,
        }
    }

    /// Start event and one Detection event per bound.
    pub fn events(&self) -> Events<N> {
        let (arg, region) = (self.arg.clone(), self.region.clone());
        let (min, max) = (self.min, self.max);
        let start = Event::start().set(move |s| {
            let v = arg(&s.current());
            region.set(u8::from(v > min) + u8::from(v >= max));
        });

        let region = self.region.clone();
        let lower_arg = self.arg.clone();
        let lower = Event::detection(Detection::zero(move |p| lower_arg(p) - min)).set(move |_| {
            match region.get() {
                0 => region.set(1),
                1 => region.set(0),
                _ => {}
            }
        });

        let region = self.region.clone();
        let upper_arg = self.arg.clone();
        let upper = Event::detection(Detection::zero(move |p| upper_arg(p) - max)).set(move |_| {
            match region.get() {
                1 => region.set(2),
                2 => region.set(1),
                _ => {}
            }
        });
        collect([start, lower, upper])
    }
}

/// Boolean switch selecting between two branches (piecewise expressions).
#[derive(Clone)]
pub struct BoolSwitch<const N: usize> {
    condition: Rc<dyn Fn(&Instant<'_, N>) -> bool>,
    value: Rc<Cell<bool>>,
}

impl<const N: usize> BoolSwitch<N> {
    /// Switch on `condition`.
    pub fn new<F>(condition: F) -> Self
    where
        F: Fn(&Instant<'_, N>) -> bool + 'static,
    {
        Self {
            condition: Rc::new(condition),
            value: Rc::new(Cell::new(false)),
        }
    }

    /// Cached value of the condition.
    pub fn value(&self) -> bool {
        self.value.get()
    }

    /// Pick `if_true` or `if_false` by the cached condition.
    pub fn select<T>(&self, if_true: T, if_false: T) -> T {
        if self.value.get() {
            if_true
        } else {
            if_false
        }
    }

    /// Start and Detection events driving the cached condition.
    pub fn events(&self) -> Events<N> {
        let (condition, value) = (self.condition.clone(), self.value.clone());
        let start = Event::start().set(move |s| value.set(condition(&s.current())));

        let value = self.value.clone();
        let detect_condition = self.condition.clone();
        let flip = Event::detection(Detection::switch(move |p| detect_condition(p)))
            .set(move |_| value.set(!value.get()));
        collect([start, flip])
    }
}
