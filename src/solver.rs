//! Event-Driven Runge-Kutta Solver
//!
//! The solver advances a [`State`] with an explicit embedded Runge-Kutta
//! method, asks a [`StepsizeController`] to accept or reject every attempt
//! and runs the categorised [`Events`] at their points of the loop:
//!
//! ```text
//! Start, Step
//! while t < t_final:
//!     stages (Call events after every right-hand side evaluation)
//!     controller ── reject ──> Reject events, rollback, retry
//!     locate detections ── found inside ──> rollback, redo landing on t_event
//!     commit, dispatch located detection, Step events
//! Stop
//! ```
//!
//! A located detection shortens the next attempt so that it ends exactly on
//! the crossing. The redone attempt is not judged by the controller (it is
//! shorter than an attempt the controller already accepted), and afterwards
//! stepping resumes with the stepsize the controller proposed before.

use log::{debug, trace, warn};
use thiserror::Error;

use crate::events::{Category, EventError, Events};
use crate::state::{History, State};
use crate::stepsize::StepsizeController;
use crate::tableau::{ButcherTableau, TableauError, DP54};

/// Differential equation with its initial condition.
///
/// The right-hand side receives the whole [`State`], so delayed values and
/// derivatives are available through [`State::value_at`]:
///
/// ```ignore
/// struct Delayed { a: f64, b: f64, tau: f64 }
///
/// impl Equation<1> for Delayed {
///     fn rhs(&self, s: &State<'_, 1>) -> [f64; 1] {
///         [self.a * s.x()[0] + self.b * s.value_at(s.t() - self.tau, 0)[0]]
///     }
///     fn ic(&self, t: f64) -> [f64; 1] {
///         [t.sin()]
///     }
/// }
/// ```
pub trait Equation<const N: usize> {
    /// Right-hand side at the current stage point.
    fn rhs(&self, state: &State<'_, N>) -> [f64; N];

    /// Initial condition, queried at and before the initial time.
    fn ic(&self, t: f64) -> [f64; N];

    /// Exact derivative of the initial condition.
    ///
    /// Returning `None` falls back to finite differences of [`ic`](Self::ic).
    fn ic_derivative(&self, _t: f64, _order: usize) -> Option<[f64; N]> {
        None
    }

    /// Events belonging to the equation (saving output, corrections).
    fn events(&self) -> Result<Events<N>, EventError> {
        Ok(Events::new())
    }

    /// Events registered by discontinuous terms of the right-hand side.
    fn rhs_events(&self) -> Events<N> {
        Events::new()
    }

    /// Highest derivative order the right-hand side queries through
    /// [`State::value_at`]; 1 for neutral equations.
    fn derivative_order(&self) -> usize {
        0
    }

    /// Solve with the default method (Dormand-Prince 5(4)).
    fn solution<C>(
        &self,
        t_init: f64,
        t_final: f64,
        controller: C,
        events: Events<N>,
    ) -> Result<Solution<N>, SolverError>
    where
        Self: Sized,
        C: StepsizeController,
    {
        Solver::default().solve(self, t_init, t_final, controller, events)
    }
}

/// Integration statistics for diagnostics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stats {
    /// Total number of right-hand side evaluations
    pub rhs_evals: u64,
    /// Number of accepted steps
    pub accepted_steps: u64,
    /// Number of rejected steps
    pub rejected_steps: u64,
    /// Number of detection events that fired
    pub events_dispatched: u64,
    /// Number of jumps recorded as zero-length steps
    pub zero_length_steps: u64,
}

/// Errors that can occur during integration
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SolverError {
    /// An attempt was rejected while the stepsize was at its minimum.
    #[error("step size too small at t = {t} (h = {h})")]
    StepSizeTooSmall {
        /// Time at which the failure occurred
        t: f64,
        /// Stepsize of the rejected attempt
        h: f64,
    },
    /// Too many consecutive rejections.
    #[error("{count} consecutive rejected steps at t = {t}")]
    TooManyRejections {
        /// Time at which the failure occurred
        t: f64,
        /// Number of consecutive rejections
        count: usize,
    },
    /// Maximum number of step attempts exceeded
    #[error("maximum number of steps exceeded")]
    MaxStepsExceeded,
    /// Invalid time interval or stepsize.
    #[error("invalid input: {message}")]
    InvalidInput {
        /// Description of the problem
        message: String,
    },
    /// The equation queries derivatives the dense output cannot provide.
    #[error("equation queries derivative order {requested}, {tableau} interpolates up to {supported}")]
    UnsupportedDerivativeOrder {
        /// Method in use
        tableau: &'static str,
        /// Order declared by the equation
        requested: usize,
        /// Degree of the interpolation polynomials
        supported: usize,
    },
    /// Inconsistent tableau.
    #[error(transparent)]
    Tableau(#[from] TableauError),
    /// Invalid event configuration.
    #[error(transparent)]
    Event(#[from] EventError),
}

/// Result of a solve.
#[derive(Debug, Clone)]
pub struct Solution<const N: usize> {
    /// Saved columns: Detection, Step, Reject, Call, Start, Stop events,
    /// declaration order within each category.
    pub saved: Vec<Vec<f64>>,
    /// Final time
    pub t: f64,
    /// Final value
    pub x: [f64; N],
    /// Committed trajectory
    pub history: History<N>,
    /// Solver statistics
    pub stats: Stats,
}

impl<const N: usize> Solution<N> {
    /// Dense output of the computed trajectory, `None` outside `(t_init, t_final]`.
    pub fn value_at(&self, t: f64, derivative: usize) -> Option<[f64; N]> {
        if t > self.t {
            return None;
        }
        self.history.value_at(t, derivative)
    }
}

/// Event-driven explicit Runge-Kutta integrator.
///
/// # Example
/// ```ignore
/// use rkswitch::{AdaptiveStepsize, Equation, Event, Events, Solver, State, DP54};
///
/// struct HarmonicOscillator { omega: f64 }
///
/// impl Equation<2> for HarmonicOscillator {
///     fn rhs(&self, s: &State<'_, 2>) -> [f64; 2] {
///         let [x, v] = *s.x();
///         [v, -self.omega * self.omega * x]
///     }
///     fn ic(&self, _t: f64) -> [f64; 2] {
///         [1.0, 0.0]
///     }
/// }
///
/// let mut solver = Solver::new(&DP54).unwrap();
/// let events = Events::new().with(Event::step().save_all()).unwrap();
/// let sol = solver
///     .solve(&HarmonicOscillator { omega: 1.0 }, 0.0, 10.0, AdaptiveStepsize::new(1e-10, 1e-10), events)
///     .unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct Solver {
    tableau: &'static ButcherTableau,
    /// Maximum number of step attempts before error
    pub max_steps: u64,
    /// Maximum number of consecutive rejections before error
    pub max_rejections: usize,
    /// Statistics of the last solve
    pub stats: Stats,
}

impl Default for Solver {
    fn default() -> Self {
        Self {
            tableau: &DP54,
            max_steps: 10_000_000,
            max_rejections: 50,
            stats: Stats::default(),
        }
    }
}

impl Solver {
    /// Create a solver for the given method.
    pub fn new(tableau: &'static ButcherTableau) -> Result<Self, SolverError> {
        tableau.validate()?;
        Ok(Self {
            tableau,
            ..Default::default()
        })
    }

    /// Method in use.
    pub fn tableau(&self) -> &'static ButcherTableau {
        self.tableau
    }

    /// Reset statistics
    pub fn reset_stats(&mut self) {
        self.stats = Stats::default();
    }

    /// Integrate `equation` from `t_init` to `t_final`.
    ///
    /// `events` are added after the equation's own events and the events
    /// of its discontinuous terms.
    pub fn solve<E, C, const N: usize>(
        &mut self,
        equation: &E,
        t_init: f64,
        t_final: f64,
        mut controller: C,
        events: Events<N>,
    ) -> Result<Solution<N>, SolverError>
    where
        E: Equation<N>,
        C: StepsizeController,
    {
        let h0 = controller.initial_stepsize();
        self.validate_inputs(t_init, t_final, h0)?;
        let requested = equation.derivative_order();
        let supported = self.tableau.dense_degree();
        if requested > supported {
            return Err(SolverError::UnsupportedDerivativeOrder {
                tableau: self.tableau.name,
                requested,
                supported,
            });
        }

        let mut all = equation.events()?;
        all.extend(equation.rhs_events());
        all.extend(events);
        let mut events = all;

        self.reset_stats();
        debug!(
            "{}: solving on [{}, {}], h0 = {}, {} events",
            self.tableau.name,
            t_init,
            t_final,
            h0,
            events.len()
        );

        let mut state = State::new(equation, self.tableau, t_init, h0);
        self.run_events(&mut events, Category::Start, &mut state);
        self.run_events(&mut events, Category::Step, &mut state);

        let stages = self.tableau.stages();
        let min_stepsize = controller.min_stepsize();
        let mut redo: Option<(usize, f64)> = None;
        let mut rejections = 0usize;
        let mut attempts = 0u64;

        while state.t() < t_final {
            attempts += 1;
            if attempts > self.max_steps {
                warn!("maximum number of steps exceeded at t = {}", state.t());
                return Err(SolverError::MaxStepsExceeded);
            }

            state.begin_step();
            let t_prev = state.t_prev();
            let t_end = match redo {
                Some((_, t_event)) => t_event,
                None if t_prev + state.t_step() >= t_final => {
                    // the controller rescales the length actually attempted
                    state.set_t_step(t_final - t_prev);
                    t_final
                }
                None => t_prev + state.t_step(),
            };
            if t_end <= t_prev {
                warn!("step of length {} vanishes at t = {}", state.t_step(), t_prev);
                return Err(SolverError::StepSizeTooSmall {
                    t: t_prev,
                    h: state.t_step(),
                });
            }

            for i in 0..stages {
                state.prepare_stage(i, t_end);
                state.evaluate_stage(i);
                self.stats.rhs_evals += 1;
                if events.has_call_events() {
                    events.run(Category::Call, &mut state);
                }
            }
            state.finish_step(t_end);

            if redo.is_none() {
                let attempted = state.t_step();
                if controller.set_stepsize(&mut state) {
                    self.stats.rejected_steps += 1;
                    rejections += 1;
                    trace!(
                        "rejected step [{}, {}], next stepsize {}",
                        t_prev,
                        t_end,
                        state.t_step()
                    );
                    events.run(Category::Reject, &mut state);
                    state.rollback();
                    if attempted <= min_stepsize {
                        warn!("rejected step at minimum stepsize {} at t = {}", attempted, t_prev);
                        return Err(SolverError::StepSizeTooSmall {
                            t: t_prev,
                            h: attempted,
                        });
                    }
                    if rejections > self.max_rejections {
                        warn!("{} consecutive rejections at t = {}", rejections, t_prev);
                        return Err(SolverError::TooManyRejections {
                            t: t_prev,
                            count: rejections,
                        });
                    }
                    continue;
                }
                rejections = 0;
            }

            let located = match redo.take() {
                Some(located) => Some(located),
                None => match events.locate(&state) {
                    Some((index, t_event)) if t_event < t_end => {
                        trace!(
                            "detection event {} located at t = {}, redoing step from {}",
                            index,
                            t_event,
                            t_prev
                        );
                        state.rollback();
                        redo = Some((index, t_event));
                        continue;
                    }
                    other => other,
                },
            };

            state.commit();
            self.stats.accepted_steps += 1;

            if let Some((index, t_event)) = located {
                match events.dispatch(index, &mut state) {
                    Some(changed) => {
                        self.stats.events_dispatched += 1;
                        debug!("detection event {} dispatched at t = {}", index, t_event);
                        if changed {
                            state.zero_length_step();
                            self.stats.zero_length_steps += 1;
                            debug!("zero-length step at t = {}", t_event);
                        }
                    }
                    None => trace!(
                        "detection event {} no longer holds at t = {}",
                        index,
                        t_event
                    ),
                }
            }

            self.run_events(&mut events, Category::Step, &mut state);
        }

        self.run_events(&mut events, Category::Stop, &mut state);

        debug!(
            "{}: finished at t = {}, {} accepted, {} rejected, {} rhs evaluations",
            self.tableau.name,
            state.t(),
            self.stats.accepted_steps,
            self.stats.rejected_steps,
            self.stats.rhs_evals
        );

        let t = state.t();
        let x = *state.x();
        Ok(Solution {
            saved: events.saved(),
            t,
            x,
            history: state.into_history(),
            stats: self.stats.clone(),
        })
    }

    /// Run a category that may change the state, counting its jumps.
    fn run_events<const N: usize>(
        &mut self,
        events: &mut Events<N>,
        category: Category,
        state: &mut State<'_, N>,
    ) {
        let jumps = events.run(category, state);
        if jumps > 0 {
            debug!(
                "{} zero-length step(s) after {:?} events at t = {}",
                jumps,
                category,
                state.t()
            );
            self.stats.zero_length_steps += jumps as u64;
        }
    }

    /// Validate integration inputs
    fn validate_inputs(&self, t_init: f64, t_final: f64, h0: f64) -> Result<(), SolverError> {
        if !t_init.is_finite() || !t_final.is_finite() {
            return Err(SolverError::InvalidInput {
                message: "t_init and t_final must be finite".to_string(),
            });
        }
        if t_final < t_init {
            return Err(SolverError::InvalidInput {
                message: format!("t_final = {} is before t_init = {}", t_final, t_init),
            });
        }
        if !h0.is_finite() || h0 <= 0.0 {
            return Err(SolverError::InvalidInput {
                message: format!("initial stepsize {} must be positive and finite", h0),
            });
        }
        Ok(())
    }
}
