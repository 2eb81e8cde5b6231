//! Delay differential equation with a known solution.
//!
//! With history sin(t), the solution of x'(t) = -x(t - π/2) is sin(t)
//! for all time, so the error of the delayed lookups is directly visible.
//!
//! Run with:
//!   cargo run --example linear_dde

use std::f64::consts::FRAC_PI_2;

use rkswitch::{AdaptiveStepsize, ConstantStepsize, Equation, Events, Solver, State, DP54};

/// x'(t) = -x(t - π/2), history x(t) = sin(t)
struct QuarterPeriodDelay;

impl Equation<1> for QuarterPeriodDelay {
    fn rhs(&self, s: &State<'_, 1>) -> [f64; 1] {
        [-s.value_at(s.t() - FRAC_PI_2, 0)[0]]
    }
    fn ic(&self, t: f64) -> [f64; 1] {
        [t.sin()]
    }
}

fn main() {
    let t_final = 10.0;

    println!("Linear DDE x'(t) = -x(t - π/2)");
    println!();

    for h in [0.2, 0.1, 0.05] {
        let sol = Solver::new(&DP54)
            .unwrap()
            .solve(&QuarterPeriodDelay, 0.0, t_final, ConstantStepsize(h), Events::new())
            .unwrap();
        println!(
            "  constant h = {h:<5} error {:.2e}",
            (sol.x[0] - t_final.sin()).abs()
        );
    }

    let sol = Solver::new(&DP54)
        .unwrap()
        .solve(
            &QuarterPeriodDelay,
            0.0,
            t_final,
            AdaptiveStepsize::new(1e-10, 1e-10),
            Events::new(),
        )
        .unwrap();
    println!(
        "  adaptive          error {:.2e}  ({} steps)",
        (sol.x[0] - t_final.sin()).abs(),
        sol.stats.accepted_steps
    );
}
