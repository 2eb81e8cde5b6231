//! Stepsize Control
//!
//! A controller inspects a completed stage pass (`x_curr`, `error_curr`),
//! decides whether to reject it and sets the trial length of the next
//! attempt. The solver clamps every trial step so the final time is not
//! overshot; controllers never need to know about it.

use crate::state::State;

/// Decides acceptance and the next trial stepsize.
pub trait StepsizeController {
    /// Trial length of the first attempt.
    fn initial_stepsize(&self) -> f64;

    /// Smallest stepsize the controller will propose.
    ///
    /// A rejection while `t_step` is already at this bound is fatal.
    fn min_stepsize(&self) -> f64 {
        0.0
    }

    /// Update `state.t_step()` and return `true` to reject the step.
    fn set_stepsize<const N: usize>(&mut self, state: &mut State<'_, N>) -> bool;
}

/// Fixed stepsize, never rejects.
#[derive(Debug, Clone, Copy)]
pub struct ConstantStepsize(pub f64);

impl StepsizeController for ConstantStepsize {
    fn initial_stepsize(&self) -> f64 {
        self.0
    }

    fn set_stepsize<const N: usize>(&mut self, _state: &mut State<'_, N>) -> bool {
        false
    }
}

/// Error-per-step controller driven by the embedded pair
///
/// ```text
/// q    = min(order, embedded_order)
/// err  = max_i |e_i| / (atol + rtol |x_i|)
/// fac  = clamp((err · safety)^(-1/(q+1)), 1/max_factor, max_factor)
/// h'   = clamp(h · fac, min_stepsize, max_stepsize)
/// ```
///
/// The step is rejected iff `err > 1`. A larger `safety` makes the
/// controller more cautious.
#[derive(Debug, Clone)]
pub struct AdaptiveStepsize {
    /// Absolute tolerance
    pub atol: f64,
    /// Relative tolerance
    pub rtol: f64,
    /// Multiplies the error before the stepsize update
    pub safety: f64,
    /// Bound on the growth and shrink factor per attempt
    pub max_factor: f64,
    /// Lower bound for proposed stepsizes
    pub min_stepsize: f64,
    /// Upper bound for proposed stepsizes
    pub max_stepsize: f64,
    /// Trial length of the first attempt
    pub initial_stepsize: f64,
}

impl Default for AdaptiveStepsize {
    fn default() -> Self {
        Self {
            atol: 1e-6,
            rtol: 1e-6,
            safety: 2.0,
            max_factor: 5.0,
            min_stepsize: 1e-12,
            max_stepsize: f64::INFINITY,
            initial_stepsize: 1e-2,
        }
    }
}

impl AdaptiveStepsize {
    /// Controller with the given tolerances and default settings otherwise.
    pub fn new(atol: f64, rtol: f64) -> Self {
        Self {
            atol,
            rtol,
            ..Default::default()
        }
    }

    /// Scaled max-norm of the local error estimate.
    pub fn error_norm<const N: usize>(&self, state: &State<'_, N>) -> f64 {
        state
            .error()
            .iter()
            .zip(state.x())
            .fold(0.0_f64, |acc, (e, x)| {
                acc.max(e.abs() / (self.atol + self.rtol * x.abs()))
            })
    }
}

impl StepsizeController for AdaptiveStepsize {
    fn initial_stepsize(&self) -> f64 {
        self.initial_stepsize
    }

    fn min_stepsize(&self) -> f64 {
        self.min_stepsize
    }

    fn set_stepsize<const N: usize>(&mut self, state: &mut State<'_, N>) -> bool {
        let tableau = state.tableau();
        let q = tableau.order.min(tableau.embedded_order) as f64;
        let err = self.error_norm(state);
        if !err.is_finite() {
            // shrink as far as allowed and try again
            let h = (state.t_step() / self.max_factor).clamp(self.min_stepsize, self.max_stepsize);
            state.set_t_step(h);
            return true;
        }
        let fac = (err * self.safety)
            .powf(-1.0 / (q + 1.0))
            .clamp(1.0 / self.max_factor, self.max_factor);
        let h = (state.t_step() * fac).clamp(self.min_stepsize, self.max_stepsize);
        state.set_t_step(h);
        err > 1.0
    }
}
