//! # rkswitch: Event-Driven Runge-Kutta Integration
//!
//! An explicit embedded Runge-Kutta integrator for ordinary, delay and
//! neutral delay differential equations whose right-hand side may switch
//! discontinuously (sign, step, absolute value, relays).
//!
//! ## Features
//!
//! - Embedded pairs with dense output: RK4, Bogacki-Shampine 3(2),
//!   Dormand-Prince 5(4)
//! - Constant or adaptive stepsize control
//! - Continuous history with delayed value and derivative lookups
//! - **Events** at start, step, reject, call and stop points, plus
//!   detection events located by bisection on the dense output
//! - State corrections recorded as zero-length steps, so both sides of a
//!   jump stay in the trajectory
//! - Discontinuous primitives that flip their branch only at located
//!   crossings, keeping the method's order across switches
//!
//! ## Basic Usage
//!
//! ```rust
//! use rkswitch::{AdaptiveStepsize, Equation, Event, Events, Solver, State, DP54};
//!
//! // x'' = -x
//! struct HarmonicOscillator;
//!
//! impl Equation<2> for HarmonicOscillator {
//!     fn rhs(&self, s: &State<'_, 2>) -> [f64; 2] {
//!         let [x, v] = *s.x();
//!         [v, -x]
//!     }
//!     fn ic(&self, _t: f64) -> [f64; 2] {
//!         [1.0, 0.0]
//!     }
//! }
//!
//! let mut solver = Solver::new(&DP54).unwrap();
//! let events = Events::new().with(Event::step().save_all()).unwrap();
//! let sol = solver
//!     .solve(&HarmonicOscillator, 0.0, 1.0, AdaptiveStepsize::new(1e-10, 1e-10), events)
//!     .unwrap();
//!
//! assert!((sol.x[0] - 1.0_f64.cos()).abs() < 1e-8);
//! // columns t, x, v
//! assert_eq!(sol.saved.len(), 3);
//! ```
//!
//! ## Discontinuities
//!
//! ```rust
//! use rkswitch::{ConstantStepsize, Equation, Events, Sign, State};
//!
//! // x' = 1.5 + 0.5 sign(x), exact solution 1.5 t + 0.5 |t|
//! struct Relay {
//!     sign: Sign<1>,
//! }
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
//!
//! let relay = Relay { sign: Sign::new(|p| p.x[0]) };
//! let sol = relay.solution(-1.0, 1.0, ConstantStepsize(0.3), Events::new()).unwrap();
//! assert!((sol.x[0] - 2.0).abs() < 1e-12);
//! ```
//!
//! ## References
//!
//! 1. Hairer, E., Nørsett, S.P., & Wanner, G. (1993). "Solving
//!    Ordinary Differential Equations I: Nonstiff Problems".
//!    Springer.
//!
//! 2. Bellen, A., & Zennaro, M. (2003). "Numerical Methods for Delay
//!    Differential Equations". Oxford University Press.

#![deny(missing_docs)]
#![deny(unsafe_code)]

pub mod events;
pub mod solver;
pub mod state;
pub mod stepsize;
pub mod switches;
pub mod tableau;

pub use events::{
    Category, Detection, Event, EventDirection, EventError, Events, BISECTION_ITERATIONS,
};
pub use solver::{Equation, Solution, Solver, SolverError, Stats};
pub use state::{History, Instant, State};
pub use stepsize::{AdaptiveStepsize, ConstantStepsize, StepsizeController};
pub use switches::{Abs, BoolSwitch, Clip, Relu, Sign, Step};
pub use tableau::{ButcherTableau, TableauError, BS23, DP54, RK4};
