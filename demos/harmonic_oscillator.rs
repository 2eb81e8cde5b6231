//! Basic usage: harmonic oscillator with every pair the crate ships.
//!
//! Integrates y'' + ω²y = 0 for one period and compares with the exact solution.
//!
//! Run with:
//!   cargo run --example harmonic_oscillator

use rkswitch::{AdaptiveStepsize, Equation, Events, Solver, State, BS23, DP54, RK4};

/// Simple harmonic oscillator: y'' + ω²y = 0
///
/// State vector: [y, y']
struct HarmonicOscillator {
    omega: f64,
}

impl Equation<2> for HarmonicOscillator {
    fn rhs(&self, s: &State<'_, 2>) -> [f64; 2] {
        let [y, v] = *s.x();
        [v, -self.omega * self.omega * y]
    }
    fn ic(&self, t: f64) -> [f64; 2] {
        [(self.omega * t).cos(), -self.omega * (self.omega * t).sin()]
    }
}

fn main() {
    let omega = 2.0;
    let sys = HarmonicOscillator { omega };
    let period = 2.0 * std::f64::consts::PI / omega;

    println!("Harmonic Oscillator (ω = {omega})");
    println!("  Period: {period:.6} s");
    println!();

    for tableau in [&RK4, &BS23, &DP54] {
        let mut solver = Solver::new(tableau).unwrap();
        let sol = solver
            .solve(
                &sys,
                0.0,
                period,
                AdaptiveStepsize::new(1e-10, 1e-10),
                Events::new(),
            )
            .unwrap();

        let [y_exact, v_exact] = sys.ic(sol.t);
        println!("  {}", tableau.name);
        println!("    Position error: {:.2e}", (sol.x[0] - y_exact).abs());
        println!("    Velocity error: {:.2e}", (sol.x[1] - v_exact).abs());
        println!(
            "    Steps: {} accepted, {} rejected, {} evals",
            sol.stats.accepted_steps, sol.stats.rejected_steps, sol.stats.rhs_evals
        );

        // dense output between steps
        let mid = 0.3 * period;
        if let Some(y) = sol.value_at(mid, 0) {
            println!(
                "    Dense output at t = {mid:.3}: error {:.2e}",
                (y[0] - sys.ic(mid)[0]).abs()
            );
        }
    }
}
