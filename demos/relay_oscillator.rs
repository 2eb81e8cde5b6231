//! Relay oscillator x'' = -sign(x).
//!
//! The sign is a cached switch: it only flips at a located zero of x, so
//! every step sees a smooth right-hand side and the pair keeps its order.
//! The exact solution is a chain of parabolas with period 4√2.
//!
//! Run with:
//!   cargo run --example relay_oscillator

use rkswitch::{ConstantStepsize, Equation, Events, Sign, Solver, State, BS23};

struct Relay {
    sign: Sign<2>,
}

impl Equation<2> for Relay {
    fn rhs(&self, s: &State<'_, 2>) -> [f64; 2] {
        [s.x()[1], -self.sign.value()]
    }
    fn ic(&self, _t: f64) -> [f64; 2] {
        [1.0, 0.0]
    }
    fn rhs_events(&self) -> Events<2> {
        self.sign.events()
    }
}

fn main() {
    let period = 4.0 * 2.0_f64.sqrt();

    println!("Relay Oscillator x'' = -sign(x)");
    println!("  Period: {period:.9}");
    println!();

    for h in [0.1, 0.05, 0.025] {
        let relay = Relay {
            sign: Sign::new(|p| p.x[0]),
        };
        let sol = Solver::new(&BS23)
            .unwrap()
            .solve(&relay, 0.0, period, ConstantStepsize(h), Events::new())
            .unwrap();

        let err = (sol.x[0] - 1.0).abs().max(sol.x[1].abs());
        println!(
            "  h = {h:<6} error after one period {:.2e}  ({} switches, {} steps)",
            err, sol.stats.events_dispatched, sol.stats.accepted_steps
        );
    }
}
