//! End-to-end properties of the event-driven integrator.

use rkswitch::{
    Abs, AdaptiveStepsize, BoolSwitch, ButcherTableau, Clip, ConstantStepsize, Detection,
    Equation, Event, Events, Relu, Sign, Solver, State, Step, BS23, DP54, RK4,
};

/// x' = 1 with x(t) = t before the start.
struct Ramp;

impl Equation<1> for Ramp {
    fn rhs(&self, _s: &State<'_, 1>) -> [f64; 1] {
        [1.0]
    }
    fn ic(&self, t: f64) -> [f64; 1] {
        [t]
    }
}

/// x' = -x, x(t) = e^{-t}
struct Decay;

impl Equation<1> for Decay {
    fn rhs(&self, s: &State<'_, 1>) -> [f64; 1] {
        [-s.x()[0]]
    }
    fn ic(&self, t: f64) -> [f64; 1] {
        [(-t).exp()]
    }
}

/// x'' = -x, x(t) = cos t
struct Oscillator;

impl Equation<2> for Oscillator {
    fn rhs(&self, s: &State<'_, 2>) -> [f64; 2] {
        let [x, v] = *s.x();
        [v, -x]
    }
    fn ic(&self, t: f64) -> [f64; 2] {
        [t.cos(), -t.sin()]
    }
}

fn final_error(tableau: &'static ButcherTableau, h: f64) -> f64 {
    let mut solver = Solver::new(tableau).unwrap();
    let sol = solver
        .solve(&Decay, 0.0, 1.0, ConstantStepsize(h), Events::new())
        .unwrap();
    (sol.x[0] - (-1.0_f64).exp()).abs()
}

#[test]
fn order_consistency() {
    let cases: [(&'static ButcherTableau, f64, f64, f64); 3] = [
        (&RK4, 0.1, 12.0, 20.0),
        (&BS23, 0.1, 6.0, 10.0),
        (&DP54, 0.2, 20.0, 45.0),
    ];
    for (tableau, h, lo, hi) in cases {
        let coarse = final_error(tableau, h);
        let fine = final_error(tableau, h / 2.0);
        let ratio = coarse / fine;
        println!(
            "{}: err(h={}) = {:.3e}, err(h/2) = {:.3e}, ratio = {:.2}",
            tableau.name, h, coarse, fine, ratio
        );
        assert!(
            ratio > lo && ratio < hi,
            "{}: error ratio {} outside ({}, {}) for order {}",
            tableau.name,
            ratio,
            lo,
            hi,
            tableau.order
        );
    }
}

#[test]
fn event_timing_precision() {
    let events = Events::<1>::new()
        .with(Event::detection(Detection::zero(|p| p.x[0])).save(|s| s.t()))
        .unwrap();
    let sol = Ramp
        .solution(-1.0, 1.0, ConstantStepsize(0.3), events)
        .unwrap();
    assert_eq!(sol.saved.len(), 1);
    assert_eq!(sol.saved[0].len(), 1, "exactly one crossing");
    let t_event = sol.saved[0][0];
    println!("crossing located at t = {:e}", t_event);
    assert!(t_event.abs() < 1e-10, "crossing at {}, expected 0", t_event);
    assert_eq!(sol.t, 1.0);
}

#[test]
fn zero_length_correction_keeps_both_samples() {
    let events = Events::<1>::new()
        .with(
            Event::detection(Detection::zero(|p| p.x[0]))
                .save(|s| s.t())
                .save(|s| s.x()[0])
                .set(|s| s.x_mut()[0] += 1.0),
        )
        .unwrap();
    let sol = Ramp
        .solution(-1.0, 1.0, ConstantStepsize(0.3), events)
        .unwrap();

    let (t, x) = (&sol.saved[0], &sol.saved[1]);
    assert_eq!(t.len(), 2, "save before and after the set action");
    assert_eq!(t[0], t[1], "both samples at the same time");
    assert!(x[0].abs() < 1e-10, "x before jump = {}", x[0]);
    assert!((x[1] - x[0] - 1.0).abs() < 1e-15, "x after jump = {}", x[1]);

    // the history keeps the jump as a zero-length interval
    let times = sol.history.times();
    let values = sol.history.values();
    let i = times
        .windows(2)
        .position(|w| w[0] == w[1])
        .expect("zero-length interval in history");
    assert_eq!(values[i][0], x[0]);
    assert_eq!(values[i + 1][0], x[1]);
    assert_eq!(sol.stats.zero_length_steps, 1);

    // x(1) = 1 + 1 after the jump
    assert!((sol.x[0] - 2.0).abs() < 1e-10, "x(1) = {}", sol.x[0]);
    // dense output on both sides of the jump
    let left = sol.value_at(-0.5, 0).unwrap()[0];
    let right = sol.value_at(0.5, 0).unwrap()[0];
    assert!((left + 0.5).abs() < 1e-12);
    assert!((right - 1.5).abs() < 1e-10);
}

#[test]
fn earliest_detection_wins() {
    // Both crossings fall inside the step (0.2, 0.5]; the later one is
    // declared first.
    let events = Events::<1>::new()
        .with(Event::detection(Detection::rising(|p| p.x[0] - 0.4)).save(|s| s.t()))
        .unwrap()
        .with(Event::detection(Detection::rising(|p| p.x[0] - 0.3)).save(|s| s.t()))
        .unwrap();
    let sol = Ramp
        .solution(-1.0, 1.0, ConstantStepsize(0.3), events)
        .unwrap();
    let (late, early) = (&sol.saved[0], &sol.saved[1]);
    assert_eq!(early.len(), 1);
    assert_eq!(late.len(), 1);
    assert!((early[0] - 0.3).abs() < 1e-10, "early at {}", early[0]);
    assert!((late[0] - 0.4).abs() < 1e-10, "late at {}", late[0]);
    assert_eq!(sol.stats.events_dispatched, 2);
}

#[test]
fn equal_times_resolved_by_declaration_order() {
    let events = Events::<1>::new()
        .with(Event::detection(Detection::rising(|p| p.x[0] - 0.3)).save(|s| s.t()))
        .unwrap()
        .with(Event::detection(Detection::rising(|p| p.x[0] - 0.3)).save(|s| s.t()))
        .unwrap();
    let sol = Ramp
        .solution(-1.0, 1.0, ConstantStepsize(0.3), events)
        .unwrap();
    assert_eq!(sol.saved[0].len(), 1, "first declared event dispatches");
    assert!(sol.saved[1].is_empty(), "the tied event is not dispatched");
}

#[test]
fn save_only_events_do_not_touch_the_state() {
    let plain = Solver::default()
        .solve(&Oscillator, 0.0, 5.0, AdaptiveStepsize::new(1e-9, 1e-9), Events::new())
        .unwrap();
    let events = Events::<2>::new()
        .with(Event::step().save_all())
        .unwrap()
        .with(Event::start().save(|s| s.x_prev()[0]))
        .unwrap()
        .with(Event::stop().save(|s| s.t()))
        .unwrap();
    let saving = Solver::default()
        .solve(&Oscillator, 0.0, 5.0, AdaptiveStepsize::new(1e-9, 1e-9), events)
        .unwrap();

    assert_eq!(plain.history.times(), saving.history.times());
    for (a, b) in plain.history.values().iter().zip(saving.history.values()) {
        assert_eq!(a[0].to_bits(), b[0].to_bits());
        assert_eq!(a[1].to_bits(), b[1].to_bits());
    }
    assert_eq!(saving.stats.zero_length_steps, 0);
    // t, x, v of every accepted step plus the initial point
    assert_eq!(saving.saved[0].len() as u64, saving.stats.accepted_steps + 1);
    assert_eq!(saving.saved[0], saving.history.times());
}

#[test]
fn rejected_attempts_restart_from_the_committed_point() {
    let events = Events::<2>::new()
        .with(Event::reject().save(|s| s.t_prev()).save(|s| s.x_prev()[0]))
        .unwrap();
    let ctrl = AdaptiveStepsize {
        initial_stepsize: 5.0,
        ..AdaptiveStepsize::new(1e-10, 1e-10)
    };
    let sol = Solver::default()
        .solve(&Oscillator, 0.0, 10.0, ctrl, events)
        .unwrap();
    let (t_rej, x_rej) = (&sol.saved[0], &sol.saved[1]);
    assert!(sol.stats.rejected_steps > 0, "the large first step must be rejected");
    assert_eq!(t_rej.len() as u64, sol.stats.rejected_steps);

    let times = sol.history.times();
    let values = sol.history.values();
    for (&t, &x) in t_rej.iter().zip(x_rej) {
        let i = times
            .iter()
            .position(|&ti| ti.to_bits() == t.to_bits())
            .expect("rejected attempt starts at a committed time");
        assert_eq!(values[i][0].to_bits(), x.to_bits());
    }
}

#[test]
fn dense_output_matches_history_after_commit() {
    let events = Events::<2>::new()
        .with(
            Event::step()
                .save(|s| s.t_prev())
                .save(|s| s.t())
                .save(|s| s.value_at(s.t(), 0)[0])
                .save(|s| s.value_at(0.5 * (s.t_prev() + s.t()), 0)[0])
                .save(|s| s.value_at(0.5 * (s.t_prev() + s.t()), 1)[1]),
        )
        .unwrap();
    let sol = Solver::new(&BS23)
        .unwrap()
        .solve(&Oscillator, 0.0, 3.0, AdaptiveStepsize::new(1e-8, 1e-8), events)
        .unwrap();

    let mut checked = 0;
    for i in 0..sol.saved[0].len() {
        let (t_prev, t) = (sol.saved[0][i], sol.saved[1][i]);
        if t_prev == t {
            continue;
        }
        let mid = 0.5 * (t_prev + t);
        let at_end = sol.history.value_at(t, 0).unwrap()[0];
        let at_mid = sol.history.value_at(mid, 0).unwrap()[0];
        let slope_mid = sol.history.value_at(mid, 1).unwrap()[1];
        assert_eq!(at_end.to_bits(), sol.saved[2][i].to_bits(), "x({})", t);
        assert_eq!(at_mid.to_bits(), sol.saved[3][i].to_bits(), "x({})", mid);
        assert_eq!(slope_mid.to_bits(), sol.saved[4][i].to_bits(), "v'({})", mid);
        checked += 1;
    }
    assert!(checked > 10, "only {} steps checked", checked);
}

/// Relay: x' = (a+b)/2 + (a-b)/2 sign(x), exact solution (a+b)/2 t + (a-b)/2 |t|.
struct Relay {
    a: f64,
    b: f64,
    sign: Sign<1>,
}

impl Relay {
    fn new(a: f64, b: f64) -> Self {
        Self {
            a,
            b,
            sign: Sign::new(|p| p.x[0]),
        }
    }

    fn exact(&self, t: f64) -> f64 {
        0.5 * (self.a + self.b) * t + 0.5 * (self.a - self.b) * t.abs()
    }
}

impl Equation<1> for Relay {
    fn rhs(&self, _s: &State<'_, 1>) -> [f64; 1] {
        [0.5 * (self.a + self.b) + 0.5 * (self.a - self.b) * self.sign.value()]
    }
    fn ic(&self, t: f64) -> [f64; 1] {
        [self.exact(t)]
    }
    fn events(&self) -> Result<Events<1>, rkswitch::EventError> {
        Events::new().with(Event::step().save_all())
    }
    fn rhs_events(&self) -> Events<1> {
        self.sign.events()
    }
}

#[test]
fn relay_switches_exactly_once() {
    let relay = Relay::new(2.0, 1.0);
    let sol = relay
        .solution(-1.0, 1.0, AdaptiveStepsize::new(1e-10, 1e-10), Events::new())
        .unwrap();
    println!("relay: x(1) = {}, stats {:?}", sol.x[0], sol.stats);
    assert!((sol.x[0] - 2.0).abs() < 1e-10, "x(1) = {}", sol.x[0]);
    assert_eq!(sol.stats.events_dispatched, 1);
    assert_eq!(sol.stats.zero_length_steps, 0, "the switch does not move x");
    for (&t, &x) in sol.saved[0].iter().zip(&sol.saved[1]) {
        assert!((x - relay.exact(t)).abs() < 1e-10, "x({}) = {}", t, x);
    }
}

#[test]
fn relay_with_constant_steps() {
    let relay = Relay::new(3.0, 1.0);
    let sol = relay
        .solution(-1.0, 2.0, ConstantStepsize(0.25), Events::new())
        .unwrap();
    assert!((sol.x[0] - relay.exact(2.0)).abs() < 1e-10, "x(2) = {}", sol.x[0]);
}

/// x' = a x + b x(t - τ) with x = sin(k t)
struct LinearDde {
    k: f64,
    tau: f64,
}

impl Equation<1> for LinearDde {
    fn rhs(&self, s: &State<'_, 1>) -> [f64; 1] {
        let a = self.k / (self.k * self.tau).tan();
        let b = -self.k / (self.k * self.tau).sin();
        [a * s.x()[0] + b * s.value_at(s.t() - self.tau, 0)[0]]
    }
    fn ic(&self, t: f64) -> [f64; 1] {
        [(self.k * t).sin()]
    }
}

#[test]
fn linear_dde_follows_exact_solution() {
    let eq = LinearDde { k: 1.0, tau: 1.0 };
    let sol = Solver::default()
        .solve(&eq, 0.0, 5.0, ConstantStepsize(0.05), Events::new())
        .unwrap();
    let err = (sol.x[0] - 5.0_f64.sin()).abs();
    println!("linear DDE: |x(5) - sin 5| = {:.2e}", err);
    assert!(err < 1e-6, "error {}", err);

    let adaptive = Solver::default()
        .solve(&eq, 0.0, 5.0, AdaptiveStepsize::new(1e-10, 1e-10), Events::new())
        .unwrap();
    let err = (adaptive.x[0] - 5.0_f64.sin()).abs();
    assert!(err < 1e-6, "adaptive error {}", err);
}

/// Neutral: x' = -sin(1) x(t - 1) + cos(1) x'(t - 1), with x = sin t
struct LinearNdde {
    exact_ic_derivative: bool,
}

impl Equation<1> for LinearNdde {
    fn rhs(&self, s: &State<'_, 1>) -> [f64; 1] {
        let t = s.t() - 1.0;
        [-(1.0_f64).sin() * s.value_at(t, 0)[0] + (1.0_f64).cos() * s.value_at(t, 1)[0]]
    }
    fn ic(&self, t: f64) -> [f64; 1] {
        [t.sin()]
    }
    fn ic_derivative(&self, t: f64, order: usize) -> Option<[f64; 1]> {
        match (self.exact_ic_derivative, order) {
            (true, 1) => Some([t.cos()]),
            _ => None,
        }
    }
    fn derivative_order(&self) -> usize {
        1
    }
}

#[test]
fn neutral_dde_uses_derivative_lookups() {
    for exact in [true, false] {
        let eq = LinearNdde {
            exact_ic_derivative: exact,
        };
        let sol = Solver::default()
            .solve(&eq, 0.0, 3.0, ConstantStepsize(0.05), Events::new())
            .unwrap();
        let err = (sol.x[0] - 3.0_f64.sin()).abs();
        println!("neutral DDE (exact ic derivative: {}): error {:.2e}", exact, err);
        assert!(err < 1e-5, "error {}", err);
    }
}

/// Integrate a switched scalar f over [-1, 1] with x = 0 before the start.
fn integrate<F: Fn(&State<'_, 1>) -> f64>(f: F, events: Events<1>) -> f64 {
    struct Wrapped<F: Fn(&State<'_, 1>) -> f64> {
        f: F,
        events: std::cell::RefCell<Option<Events<1>>>,
    }
    impl<F: Fn(&State<'_, 1>) -> f64> Equation<1> for Wrapped<F> {
        fn rhs(&self, s: &State<'_, 1>) -> [f64; 1] {
            [(self.f)(s)]
        }
        fn ic(&self, _t: f64) -> [f64; 1] {
            [0.0]
        }
        fn rhs_events(&self) -> Events<1> {
            self.events.borrow_mut().take().unwrap_or_default()
        }
    }
    let eq = Wrapped {
        f,
        events: std::cell::RefCell::new(Some(events)),
    };
    let sol = eq
        .solution(-1.0, 1.0, ConstantStepsize(0.3), Events::new())
        .unwrap();
    assert_eq!(sol.t, 1.0);
    sol.x[0]
}

#[test]
fn abs_switch() {
    // ∫_{-1}^{1} |t| dt = 1
    let abs = Abs::new(|p| p.t);
    let g = abs.clone();
    let x = integrate(move |s| g.value(&s.current()), abs.events());
    assert!((x - 1.0).abs() < 1e-12, "x = {}", x);
}

#[test]
fn relu_switch() {
    // ∫_{-1}^{1} max(t, 0) dt = 1/2
    let relu = Relu::new(|p| p.t);
    let g = relu.clone();
    let x = integrate(move |s| g.value(&s.current()), relu.events());
    assert!((x - 0.5).abs() < 1e-12, "x = {}", x);
}

#[test]
fn step_switch() {
    // level 1 below t = 0.25, level 3 above
    let step = Step::with_levels(|p| p.t - 0.25, 1.0, 3.0);
    let g = step.clone();
    let x = integrate(move |_| g.value(), step.events());
    assert!((x - 3.5).abs() < 1e-12, "x = {}", x);
}

#[test]
fn clip_switch() {
    // clip(t, -1/2, 1/2) is odd: the integral over [-1, 1] vanishes
    let clip = Clip::new(|p| p.t, -0.5, 0.5);
    let g = clip.clone();
    let x = integrate(move |s| g.value(&s.current()), clip.events());
    assert!(x.abs() < 1e-12, "x = {}", x);
}

#[test]
fn bool_switch() {
    let b = BoolSwitch::new(|p| p.t < 0.1);
    let g = b.clone();
    let x = integrate(move |_| g.select(1.0, -1.0), b.events());
    assert!((x - 0.2).abs() < 1e-12, "x = {}", x);
}

#[test]
fn detection_conditions() {
    // x = cos t: zero crossings at π/2, 3π/2, 5π/2 on [0, 8]
    let falling_only = Event::detection(Detection::zero(|p| p.x[0]).when(|p| p.x[1] < 0.0))
        .save(|s| s.t());
    let late_only = Event::detection(Detection::zero(|p| p.x[0]).located_where(|p| p.t > 2.0))
        .save(|s| s.t());
    let events = Events::<2>::new()
        .with(falling_only)
        .unwrap()
        .with(late_only)
        .unwrap();
    let sol = Oscillator
        .solution(0.0, 8.0, AdaptiveStepsize::new(1e-10, 1e-10), events)
        .unwrap();
    let pi = std::f64::consts::PI;

    let falling = &sol.saved[0];
    assert_eq!(falling.len(), 2, "falling crossings: {:?}", falling);
    assert!((falling[0] - 0.5 * pi).abs() < 1e-7);
    assert!((falling[1] - 2.5 * pi).abs() < 1e-7);

    // the tie at 5π/2 goes to the event declared first
    let late = &sol.saved[1];
    assert_eq!(late.len(), 1, "late crossings: {:?}", late);
    assert!((late[0] - 1.5 * pi).abs() < 1e-7);
}

#[test]
fn start_and_stop_corrections() {
    let events = Events::<1>::new()
        .with(Event::start().set(|s| s.x_mut()[0] = 10.0))
        .unwrap()
        .with(Event::stop().save(|s| s.x()[0]).set(|s| s.x_mut()[0] = 0.0))
        .unwrap();
    let sol = Ramp
        .solution(0.0, 1.0, ConstantStepsize(0.25), events)
        .unwrap();
    assert_eq!(sol.saved[0].len(), 2);
    assert!((sol.saved[0][0] - 11.0).abs() < 1e-12);
    assert_eq!(sol.saved[0][1], 0.0);
    assert_eq!(sol.x[0], 0.0);
    assert_eq!(sol.stats.zero_length_steps, 2);
    let times = sol.history.times();
    assert_eq!(times[0], times[1]);
    assert_eq!(times[times.len() - 1], times[times.len() - 2]);
    // dense output right after the start uses the corrected value
    let x = sol.value_at(0.125, 0).unwrap()[0];
    assert!((x - 10.125).abs() < 1e-12, "x(0.125) = {}", x);
}

/// x' = -1 with a delay of sqrt(x): the delay turns NaN once x < 0.
struct ShrinkingDelay;

impl Equation<1> for ShrinkingDelay {
    fn rhs(&self, s: &State<'_, 1>) -> [f64; 1] {
        let tau = s.x()[0].sqrt();
        [-1.0 - 0.0 * s.value_at(s.t() - tau, 0)[0]]
    }
    fn ic(&self, t: f64) -> [f64; 1] {
        [0.5 - t]
    }
}

#[test]
fn nan_delay_propagates_into_the_trajectory() {
    let sol = ShrinkingDelay
        .solution(0.0, 2.0, ConstantStepsize(0.1), Events::new())
        .unwrap();
    println!("x(2) = {}, stats {:?}", sol.x[0], sol.stats);
    assert_eq!(sol.t, 2.0);
    assert!(sol.x[0].is_nan(), "x(2) = {}", sol.x[0]);
    // before x turns negative the delay is finite and the solution exact
    let x = sol.value_at(0.25, 0).unwrap()[0];
    assert!((x - 0.25).abs() < 1e-12, "x(0.25) = {}", x);
}

#[test]
fn call_events_follow_every_evaluation() {
    let events = Events::<2>::new()
        .with(Event::call().save(|s| s.t()))
        .unwrap();
    let ctrl = AdaptiveStepsize {
        initial_stepsize: 5.0,
        ..AdaptiveStepsize::new(1e-10, 1e-10)
    };
    let sol = Solver::default()
        .solve(&Oscillator, 0.0, 10.0, ctrl, events)
        .unwrap();
    assert!(sol.stats.rejected_steps > 0, "rejected attempts are counted too");
    assert_eq!(sol.saved[0].len() as u64, sol.stats.rhs_evals);
    assert_eq!(
        sol.stats.rhs_evals,
        7 * (sol.stats.accepted_steps + sol.stats.rejected_steps),
        "DP54 evaluates seven stages per attempt"
    );
}

#[test]
fn retries_near_the_final_time_shrink() {
    let events = Events::<2>::new()
        .with(Event::reject().save(|s| s.t_prev()).save(|s| s.t()))
        .unwrap();
    let ctrl = AdaptiveStepsize {
        initial_stepsize: 5.0,
        ..AdaptiveStepsize::new(1e-10, 1e-10)
    };
    let sol = Solver::default()
        .solve(&Oscillator, 0.0, 1.0, ctrl, events)
        .unwrap();
    let (starts, ends) = (&sol.saved[0], &sol.saved[1]);
    assert!(!starts.is_empty(), "the clamped first attempt must be rejected");
    assert_eq!(ends[0], 1.0, "first attempt is clamped to the final time");
    for i in 1..starts.len() {
        if starts[i] == starts[i - 1] {
            let (prev, curr) = (ends[i - 1] - starts[i - 1], ends[i] - starts[i]);
            assert!(curr < prev, "retry of length {} after {}", curr, prev);
        }
    }
}
