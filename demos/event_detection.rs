//! Event detection: a bouncing ball.
//!
//! Impacts are located on the dense output and the velocity is reversed
//! there. Each correction is stored as a zero-length step, so the history
//! keeps the velocity just before and just after every bounce.
//!
//! Run with:
//!   cargo run --example event_detection

use rkswitch::{AdaptiveStepsize, Detection, Equation, Event, Events, Solver, State, DP54};

const GRAVITY: f64 = 9.81;

/// Free fall: state is [height, velocity].
struct Ball;

impl Equation<2> for Ball {
    fn rhs(&self, s: &State<'_, 2>) -> [f64; 2] {
        [s.x()[1], -GRAVITY]
    }
    fn ic(&self, _t: f64) -> [f64; 2] {
        [1.0, 0.0]
    }
}

fn main() {
    let restitution = 0.7;

    let impact = Event::detection(Detection::falling(|p| p.x[0]))
        .save(|s| s.t())
        .save(|s| s.x()[1])
        .set(move |s| {
            let x = s.x_mut();
            x[0] = 0.0;
            x[1] *= -restitution;
        });
    let events = Events::new().with(impact).unwrap();

    let mut solver = Solver::new(&DP54).unwrap();
    let sol = solver
        .solve(&Ball, 0.0, 2.0, AdaptiveStepsize::new(1e-10, 1e-10), events)
        .unwrap();

    println!("Event Detection: Bouncing Ball (e = {restitution})");
    println!();

    // analytic impact times: first fall, then flights of 2 v_k / g
    let mut t_exact = (2.0 / GRAVITY).sqrt();
    let mut v = GRAVITY * t_exact;
    // an event with a set action saves before and after the correction
    let (times, velocities) = (&sol.saved[0], &sol.saved[1]);
    for (i, (t, v_pair)) in times
        .chunks(2)
        .map(|pair| pair[0])
        .zip(velocities.chunks(2))
        .enumerate()
    {
        println!(
            "  #{}: t = {:.9}  (exact {:.9})  v = {:+.6} -> {:+.6}  err = {:.2e}",
            i + 1,
            t,
            t_exact,
            v_pair[0],
            v_pair[v_pair.len() - 1],
            (t - t_exact).abs()
        );
        v *= restitution;
        t_exact += 2.0 * v / GRAVITY;
    }

    println!();
    println!("  Impacts:           {}", sol.stats.events_dispatched);
    println!("  Zero-length steps: {}", sol.stats.zero_length_steps);
    println!("  Accepted steps:    {}", sol.stats.accepted_steps);
    println!("  History points:    {}", sol.history.len());
}
