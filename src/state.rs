//! Trajectory State and History
//!
//! [`History`] is the committed part of the trajectory: an append-only
//! sequence of `(t_i, x_i, K_i)` where `K_i` are the Runge-Kutta stage
//! derivatives of the interval `[t_i, t_{i+1}]`. Together with the tableau's
//! interpolation basis this gives a continuous solution on the whole
//! integrated range.
//!
//! [`State`] adds the step currently being built (`t_prev → t_curr`) and the
//! initial condition, and answers `value_at(t, derivative)` for any time the
//! right-hand side or an event may ask about: before the start (initial
//! condition), inside the committed history (binary search + dense output)
//! or inside the in-flight step.
//!
//! Dense output on an interval of length `h` starting at `(t0, x0)`:
//!
//! ```text
//! x(t)        = x0 + h Σ_s b_s(θ) K_s
//! x^(d)(t)    = h^(1-d) Σ_s b_s^(d)(θ) K_s        (d > 0)
//! θ           = (t - t0) / h
//! ```

use crate::solver::Equation;
use crate::tableau::ButcherTableau;

/// Evaluate the dense-output formula on one interval.
///
/// Both the in-flight path and the history path go through here, so values
/// computed before a step is committed are bitwise identical to the values
/// queried afterwards.
fn interpolate<const N: usize>(
    tableau: &ButcherTableau,
    t0: f64,
    h: f64,
    x0: &[f64; N],
    k: &[[f64; N]],
    t: f64,
    derivative: usize,
) -> [f64; N] {
    let theta = (t - t0) / h;
    let mut sum = [0.0; N];
    for (row, ks) in tableau.dense.iter().zip(k) {
        let w = crate::tableau::poly_derivative(row, theta, derivative);
        if w == 0.0 {
            continue;
        }
        for n in 0..N {
            sum[n] += w * ks[n];
        }
    }
    if derivative == 0 {
        let mut x = [0.0; N];
        for n in 0..N {
            x[n] = x0[n] + h * sum[n];
        }
        x
    } else {
        let scale = h.powi(1 - derivative as i32);
        sum.map(|v| scale * v)
    }
}

/// Central finite difference of order `d`, used when the initial condition
/// has no exact derivative.
fn finite_difference<const N: usize, F>(f: F, t: f64, d: usize) -> [f64; N]
where
    F: Fn(f64) -> [f64; N],
{
    let h = f64::EPSILON.powf(1.0 / (d as f64 + 2.0)) * t.abs().max(1.0);
    let mut res = [0.0; N];
    let mut binom = 1.0;
    for k in 0..=d {
        let sign = if k % 2 == 0 { 1.0 } else { -1.0 };
        let fk = f(t + (d as f64 / 2.0 - k as f64) * h);
        for n in 0..N {
            res[n] += sign * binom * fk[n];
        }
        binom = binom * (d - k) as f64 / (k + 1) as f64;
    }
    let scale = h.powi(d as i32);
    res.map(|v| v / scale)
}

/// Committed trajectory: times, values and per-interval stage derivatives.
#[derive(Debug, Clone)]
pub struct History<const N: usize> {
    tableau: &'static ButcherTableau,
    t: Vec<f64>,
    x: Vec<[f64; N]>,
    /// Flat stage storage, `stages` entries per interval.
    k: Vec<[f64; N]>,
}

impl<const N: usize> History<N> {
    /// Start a history at the initial point.
    pub fn new(tableau: &'static ButcherTableau, t0: f64, x0: [f64; N]) -> Self {
        Self {
            tableau,
            t: vec![t0],
            x: vec![x0],
            k: Vec::new(),
        }
    }

    /// Append the end point of an interval together with the interval's stages.
    ///
    /// `t` must not be smaller than the last committed time.
    pub fn push(&mut self, t: f64, x: [f64; N], k: &[[f64; N]]) {
        debug_assert!(t >= self.last_time(), "history times must not decrease");
        debug_assert_eq!(k.len(), self.tableau.stages());
        self.t.push(t);
        self.x.push(x);
        self.k.extend_from_slice(k);
    }

    /// Number of committed points (including the initial one).
    pub fn len(&self) -> usize {
        self.t.len()
    }

    /// Always false; the initial point is committed on construction.
    pub fn is_empty(&self) -> bool {
        self.t.is_empty()
    }

    /// Committed times.
    pub fn times(&self) -> &[f64] {
        &self.t
    }

    /// Committed values.
    pub fn values(&self) -> &[[f64; N]] {
        &self.x
    }

    /// Stage derivatives of interval `i` (between points `i` and `i + 1`).
    pub fn stages(&self, i: usize) -> &[[f64; N]] {
        let s = self.tableau.stages();
        &self.k[i * s..(i + 1) * s]
    }

    /// First committed time.
    pub fn initial_time(&self) -> f64 {
        self.t[0]
    }

    /// Last committed time.
    pub fn last_time(&self) -> f64 {
        self.t[self.t.len() - 1]
    }

    /// Last committed value.
    pub fn last_value(&self) -> [f64; N] {
        self.x[self.x.len() - 1]
    }

    /// Tableau whose basis interpolates the stored stages.
    pub fn tableau(&self) -> &'static ButcherTableau {
        self.tableau
    }

    /// Dense output of order `derivative` at `t`.
    ///
    /// Returns `None` for `t` at or before the initial time, for NaN, or when
    /// no interval has been committed yet. Times after the last committed point
    /// extrapolate the last non-degenerate interval. At a zero-length step
    /// the value before the jump is returned.
    pub fn value_at(&self, t: f64, derivative: usize) -> Option<[f64; N]> {
        // also catches NaN
        if !(t > self.initial_time()) {
            return None;
        }
        let i = if t > self.last_time() {
            self.last_interval_end()?
        } else {
            // first t_i >= t; t_{i-1} < t so the interval has positive length
            self.t.partition_point(|&ti| ti < t)
        };
        let h = self.t[i] - self.t[i - 1];
        Some(interpolate(
            self.tableau,
            self.t[i - 1],
            h,
            &self.x[i - 1],
            self.stages(i - 1),
            t,
            derivative,
        ))
    }

    /// Index of the end point of the last interval with positive length.
    fn last_interval_end(&self) -> Option<usize> {
        (1..self.t.len()).rev().find(|&i| self.t[i] > self.t[i - 1])
    }
}

/// A point of the trajectory that can still see the rest of it.
///
/// Detection functions receive an `Instant` so the same closure serves the
/// current point, the previous point and interpolated times, and may issue
/// delayed queries through [`Instant::value_at`].
#[derive(Clone, Copy)]
pub struct Instant<'a, const N: usize> {
    /// Time
    pub t: f64,
    /// Solution value at `t`
    pub x: [f64; N],
    state: &'a State<'a, N>,
}

impl<'a, const N: usize> Instant<'a, N> {
    /// Solution (or its derivative) at another time, typically `t - τ`.
    pub fn value_at(&self, t: f64, derivative: usize) -> [f64; N] {
        self.state.value_at(t, derivative)
    }

    /// The state this instant was taken from.
    pub fn state(&self) -> &'a State<'a, N> {
        self.state
    }
}

/// Mutable trajectory record advanced by the solver.
pub struct State<'a, const N: usize> {
    equation: &'a dyn Equation<N>,
    tableau: &'static ButcherTableau,
    history: History<N>,
    t_prev: f64,
    t_curr: f64,
    t_step: f64,
    /// Length of the step in flight, zero when there is none.
    h_curr: f64,
    x_prev: [f64; N],
    x_curr: [f64; N],
    k_curr: Vec<[f64; N]>,
    error_curr: [f64; N],
}

impl<'a, const N: usize> State<'a, N> {
    /// Initialise at `t0` with `x(t0) = equation.ic(t0)`.
    pub fn new(
        equation: &'a dyn Equation<N>,
        tableau: &'static ButcherTableau,
        t0: f64,
        t_step: f64,
    ) -> Self {
        let x0 = equation.ic(t0);
        Self {
            equation,
            tableau,
            history: History::new(tableau, t0, x0),
            t_prev: t0,
            t_curr: t0,
            t_step,
            h_curr: 0.0,
            x_prev: x0,
            x_curr: x0,
            k_curr: vec![[0.0; N]; tableau.stages()],
            error_curr: [0.0; N],
        }
    }

    /// Current (possibly stage or provisional) time.
    pub fn t(&self) -> f64 {
        self.t_curr
    }

    /// Current (possibly stage or provisional) value.
    pub fn x(&self) -> &[f64; N] {
        &self.x_curr
    }

    /// Mutable access to the current value, for event set actions.
    pub fn x_mut(&mut self) -> &mut [f64; N] {
        &mut self.x_curr
    }

    /// Start of the current step.
    pub fn t_prev(&self) -> f64 {
        self.t_prev
    }

    /// Value at the start of the current step.
    pub fn x_prev(&self) -> &[f64; N] {
        &self.x_prev
    }

    /// Trial length of the next attempt.
    pub fn t_step(&self) -> f64 {
        self.t_step
    }

    /// Set the trial length of the next attempt.
    pub fn set_t_step(&mut self, t_step: f64) {
        self.t_step = t_step;
    }

    /// `Δx - Δx̂` of the last completed stage pass.
    pub fn error(&self) -> &[f64; N] {
        &self.error_curr
    }

    /// Stage derivatives of the step being built.
    pub fn stages(&self) -> &[[f64; N]] {
        &self.k_curr
    }

    /// Committed history.
    pub fn history(&self) -> &History<N> {
        &self.history
    }

    /// Method in use.
    pub fn tableau(&self) -> &'static ButcherTableau {
        self.tableau
    }

    /// Snapshot of the current point.
    pub fn current(&self) -> Instant<'_, N> {
        Instant {
            t: self.t_curr,
            x: self.x_curr,
            state: self,
        }
    }

    /// Snapshot of the start of the current step.
    pub fn previous(&self) -> Instant<'_, N> {
        Instant {
            t: self.t_prev,
            x: self.x_prev,
            state: self,
        }
    }

    /// Snapshot of the interpolated trajectory at `t`.
    pub fn instant(&self, t: f64) -> Instant<'_, N> {
        Instant {
            t,
            x: self.value_at(t, 0),
            state: self,
        }
    }

    /// Solution value (`derivative == 0`) or derivative at time `t`.
    ///
    /// * `t <= t_0`: the initial condition, or its derivative (exact when the
    ///   equation provides one, central finite differences otherwise);
    /// * `t_prev < t` while a step is in flight: dense output of that step,
    ///   valid during stage computation and before the step is committed;
    /// * otherwise: dense output of the committed interval containing `t`.
    pub fn value_at(&self, t: f64, derivative: usize) -> [f64; N] {
        if t <= self.history.initial_time() {
            return self.initial_value(t, derivative);
        }
        if self.h_curr > 0.0 && t > self.t_prev {
            return interpolate(
                self.tableau,
                self.t_prev,
                self.h_curr,
                &self.x_prev,
                &self.k_curr,
                t,
                derivative,
            );
        }
        match self.history.value_at(t, derivative) {
            Some(x) => x,
            // nothing committed beyond the initial point
            None => self.initial_value(t, derivative),
        }
    }

    fn initial_value(&self, t: f64, derivative: usize) -> [f64; N] {
        if derivative == 0 {
            return self.equation.ic(t);
        }
        match self.equation.ic_derivative(t, derivative) {
            Some(dx) => dx,
            None => finite_difference(|s| self.equation.ic(s), t, derivative),
        }
    }

    /// Open a new step at the current point.
    pub(crate) fn begin_step(&mut self) {
        self.t_prev = self.t_curr;
        self.x_prev = self.x_curr;
        self.h_curr = 0.0;
    }

    /// Place `t_curr`/`x_curr` at stage `i` of a step ending at `t_end`.
    pub(crate) fn prepare_stage(&mut self, i: usize, t_end: f64) {
        let h = t_end - self.t_prev;
        self.h_curr = h;
        self.t_curr = self.t_prev + self.tableau.c[i] * h;
        let mut x = self.x_prev;
        for (&a, k) in self.tableau.a[i].iter().zip(&self.k_curr) {
            if a == 0.0 {
                continue;
            }
            for n in 0..N {
                x[n] += h * a * k[n];
            }
        }
        self.x_curr = x;
    }

    /// Evaluate the right-hand side at the prepared stage point.
    pub(crate) fn evaluate_stage(&mut self, i: usize) {
        let k = self.equation.rhs(self);
        self.k_curr[i] = k;
    }

    /// Combine the stages into `x_curr` and `error_curr`, landing on `t_end`.
    pub(crate) fn finish_step(&mut self, t_end: f64) {
        let h = t_end - self.t_prev;
        let mut delta = [0.0; N];
        let mut delta_hat = [0.0; N];
        for ((&b, &b_hat), k) in self
            .tableau
            .b
            .iter()
            .zip(self.tableau.b_hat)
            .zip(&self.k_curr)
        {
            for n in 0..N {
                delta[n] += b * k[n];
                delta_hat[n] += b_hat * k[n];
            }
        }
        for n in 0..N {
            delta[n] *= h;
            delta_hat[n] *= h;
            self.x_curr[n] = self.x_prev[n] + delta[n];
            self.error_curr[n] = delta[n] - delta_hat[n];
        }
        self.t_curr = t_end;
        self.h_curr = h;
    }

    /// Undo a rejected or superseded attempt.
    pub(crate) fn rollback(&mut self) {
        self.t_curr = self.t_prev;
        self.x_curr = self.x_prev;
        self.h_curr = 0.0;
    }

    /// Append the current point and its stages to the history.
    pub(crate) fn commit(&mut self) {
        self.history.push(self.t_curr, self.x_curr, &self.k_curr);
    }

    /// Record a jump of `x_curr` at the unchanged, already committed time.
    ///
    /// Appends `(t_curr, x_curr)` as a degenerate interval of zero length
    /// with zero stages, so the values before and after the jump are both
    /// kept and the next interval starts from the new value.
    pub(crate) fn zero_length_step(&mut self) {
        debug_assert_eq!(self.t_curr, self.history.last_time());
        for k in self.k_curr.iter_mut() {
            *k = [0.0; N];
        }
        self.t_prev = self.t_curr;
        self.x_prev = self.x_curr;
        self.h_curr = 0.0;
        self.commit();
    }

    /// Consume the state, keeping the committed history.
    pub(crate) fn into_history(self) -> History<N> {
        self.history
    }
}
