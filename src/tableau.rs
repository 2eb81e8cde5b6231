//! Butcher Tableaus with Dense Output
//!
//! Coefficient sets for the explicit embedded Runge-Kutta methods the solver
//! can drive. Every method here carries interpolation basis polynomials
//! `b_s(θ)`, because delay lookups and event location evaluate the trajectory
//! between grid points.
//!
//! A stage count of `s` means:
//! * `c` has `s` entries (`c[0] = 0`),
//! * `a[i]` has `i` entries (strictly lower-triangular, explicit methods only),
//! * `b`, `b_hat` and `dense` have `s` entries.
//!
//! `dense[s][j]` is the coefficient of `θ^(j+1)` in `b_s(θ)`, so that
//! `b_s(0) = 0` and `b_s(1) = b[s]`.
//!
//! The FSAL methods (BS23, DP54) list their final "first same as last" stage
//! explicitly; it is evaluated on every step.

use thiserror::Error;

/// Coefficient set of an explicit embedded Runge-Kutta method with dense output.
#[derive(Debug)]
pub struct ButcherTableau {
    /// Human-readable method name.
    pub name: &'static str,
    /// Order of the main formula (used to advance the solution).
    pub order: usize,
    /// Order of the embedded formula (used for the error estimate).
    pub embedded_order: usize,
    /// Stage abscissae.
    pub c: &'static [f64],
    /// Stage coupling, row `i` holds `a[i][0..i]`.
    pub a: &'static [&'static [f64]],
    /// Main weights.
    pub b: &'static [f64],
    /// Embedded weights.
    pub b_hat: &'static [f64],
    /// Interpolation basis coefficients, see the module docs.
    pub dense: &'static [&'static [f64]],
}

/// Inconsistent tableau definition.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TableauError {
    /// The coefficient arrays disagree on the number of stages.
    #[error("tableau {name}: {field} has length {found}, expected {expected}")]
    LengthMismatch {
        /// Tableau name
        name: &'static str,
        /// Offending field
        field: &'static str,
        /// Length found
        found: usize,
        /// Length expected from `b`
        expected: usize,
    },
    /// The method has no stages or no interpolation basis.
    #[error("tableau {name} cannot be used: {reason}")]
    Unusable {
        /// Tableau name
        name: &'static str,
        /// Description of the problem
        reason: &'static str,
    },
}

impl ButcherTableau {
    /// Number of stages.
    pub fn stages(&self) -> usize {
        self.b.len()
    }

    /// Degree of the interpolation polynomials.
    ///
    /// Dense-output derivatives up to this order are meaningful; higher
    /// orders evaluate to zero.
    pub fn dense_degree(&self) -> usize {
        self.dense.iter().map(|row| row.len()).max().unwrap_or(0)
    }

    /// Check that all coefficient arrays agree with the stage count.
    pub fn validate(&self) -> Result<(), TableauError> {
        let s = self.stages();
        if s == 0 {
            return Err(TableauError::Unusable {
                name: self.name,
                reason: "no stages",
            });
        }
        let check = |field: &'static str, found: usize| {
            if found == s {
                Ok(())
            } else {
                Err(TableauError::LengthMismatch {
                    name: self.name,
                    field,
                    found,
                    expected: s,
                })
            }
        };
        check("c", self.c.len())?;
        check("a", self.a.len())?;
        check("b_hat", self.b_hat.len())?;
        check("dense", self.dense.len())?;
        for (i, row) in self.a.iter().enumerate() {
            if row.len() != i {
                return Err(TableauError::LengthMismatch {
                    name: self.name,
                    field: "a[i]",
                    found: row.len(),
                    expected: i,
                });
            }
        }
        if self.dense_degree() == 0 {
            return Err(TableauError::Unusable {
                name: self.name,
                reason: "no dense output",
            });
        }
        Ok(())
    }

    /// Evaluate `b_s^(derivative)(θ)` for every stage into `out`.
    pub fn dense_weights(&self, theta: f64, derivative: usize, out: &mut [f64]) {
        debug_assert_eq!(out.len(), self.stages());
        for (w, row) in out.iter_mut().zip(self.dense) {
            *w = poly_derivative(row, theta, derivative);
        }
    }
}

/// `d`-th derivative of `Σ_j coefs[j] θ^(j+1)`.
pub(crate) fn poly_derivative(coefs: &[f64], theta: f64, d: usize) -> f64 {
    // Horner from the top power down to the power d.
    let mut res = 0.0;
    for (j, &coef) in coefs.iter().enumerate().rev() {
        let power = j + 1;
        if power < d {
            break;
        }
        res = res * theta + coef * falling_factorial(power, d);
    }
    if d == 0 {
        res * theta
    } else {
        res
    }
}

/// `m (m-1) ... (m-d+1)`
fn falling_factorial(m: usize, d: usize) -> f64 {
    (m + 1 - d..=m).fold(1.0, |acc, k| acc * k as f64)
}

/// Classic 4th-order Runge-Kutta method.
///
/// There is no genuine embedded formula: the explicit Euler weights serve as
/// the comparison solution, so adaptive control is crude (`q = 1`). Meant for
/// constant stepsizes. Dense output is the standard cubic continuous
/// extension (order 3).
pub const RK4: ButcherTableau = ButcherTableau {
    name: "RK4",
    order: 4,
    embedded_order: 1,
    c: &[0.0, 0.5, 0.5, 1.0],
    a: &[&[], &[0.5], &[0.0, 0.5], &[0.0, 0.0, 1.0]],
    b: &[1.0 / 6.0, 1.0 / 3.0, 1.0 / 3.0, 1.0 / 6.0],
    b_hat: &[1.0, 0.0, 0.0, 0.0],
    dense: &[
        &[1.0, -3.0 / 2.0, 2.0 / 3.0],
        &[0.0, 1.0, -2.0 / 3.0],
        &[0.0, 1.0, -2.0 / 3.0],
        &[0.0, -1.0 / 2.0, 2.0 / 3.0],
    ],
};

/// Bogacki-Shampine 3(2) pair.
///
/// Steps with the 3rd-order formula; the last stage is the FSAL stage at
/// `c = 1`. Dense output is the cubic Hermite interpolant.
///
/// P. Bogacki, L.F. Shampine, "A 3(2) Pair of Runge-Kutta Formulas",
/// Appl. Math. Lett. Vol. 2, No. 4, pp. 321-325, 1989.
pub const BS23: ButcherTableau = ButcherTableau {
    name: "BS23",
    order: 3,
    embedded_order: 2,
    c: &[0.0, 1.0 / 2.0, 3.0 / 4.0, 1.0],
    a: &[
        &[],
        &[1.0 / 2.0],
        &[0.0, 3.0 / 4.0],
        &[2.0 / 9.0, 1.0 / 3.0, 4.0 / 9.0],
    ],
    b: &[2.0 / 9.0, 1.0 / 3.0, 4.0 / 9.0, 0.0],
    b_hat: &[7.0 / 24.0, 1.0 / 4.0, 1.0 / 3.0, 1.0 / 8.0],
    dense: &[
        &[1.0, -4.0 / 3.0, 5.0 / 9.0],
        &[0.0, 1.0, -2.0 / 3.0],
        &[0.0, 4.0 / 3.0, -8.0 / 9.0],
        &[0.0, -1.0, 1.0],
    ],
};

/// Dormand-Prince 5(4) pair.
///
/// Steps with the 5th-order formula; the 7th stage is the FSAL stage.
/// Dense output is Shampine's quartic interpolant (optimum `c_6`).
///
/// 1. J. R. Dormand, P. J. Prince, "A family of embedded Runge-Kutta
///    formulae", J. Comput. Appl. Math., Vol. 6, No. 1, pp. 19-26, 1980.
/// 2. L. W. Shampine, "Some Practical Runge-Kutta Formulas", Math. Comp.,
///    Vol. 46, No. 173, pp. 135-150, 1986.
pub const DP54: ButcherTableau = ButcherTableau {
    name: "DP54",
    order: 5,
    embedded_order: 4,
    c: &[0.0, 1.0 / 5.0, 3.0 / 10.0, 4.0 / 5.0, 8.0 / 9.0, 1.0, 1.0],
    a: &[
        &[],
        &[1.0 / 5.0],
        &[3.0 / 40.0, 9.0 / 40.0],
        &[44.0 / 45.0, -56.0 / 15.0, 32.0 / 9.0],
        &[19372.0 / 6561.0, -25360.0 / 2187.0, 64448.0 / 6561.0, -212.0 / 729.0],
        &[
            9017.0 / 3168.0,
            -355.0 / 33.0,
            46732.0 / 5247.0,
            49.0 / 176.0,
            -5103.0 / 18656.0,
        ],
        &[
            35.0 / 384.0,
            0.0,
            500.0 / 1113.0,
            125.0 / 192.0,
            -2187.0 / 6784.0,
            11.0 / 84.0,
        ],
    ],
    b: &[
        35.0 / 384.0,
        0.0,
        500.0 / 1113.0,
        125.0 / 192.0,
        -2187.0 / 6784.0,
        11.0 / 84.0,
        0.0,
    ],
    b_hat: &[
        5179.0 / 57600.0,
        0.0,
        7571.0 / 16695.0,
        393.0 / 640.0,
        -92097.0 / 339200.0,
        187.0 / 2100.0,
        1.0 / 40.0,
    ],
    dense: &[
        &[
            1.0,
            -8048581381.0 / 2820520608.0,
            8663915743.0 / 2820520608.0,
            -12715105075.0 / 11282082432.0,
        ],
        &[0.0, 0.0, 0.0, 0.0],
        &[
            0.0,
            131558114200.0 / 32700410799.0,
            -68118460800.0 / 10900136933.0,
            87487479700.0 / 32700410799.0,
        ],
        &[
            0.0,
            -1754552775.0 / 470086768.0,
            14199869525.0 / 1410260304.0,
            -10690763975.0 / 1880347072.0,
        ],
        &[
            0.0,
            127303824393.0 / 49829197408.0,
            -318862633887.0 / 49829197408.0,
            701980252875.0 / 199316789632.0,
        ],
        &[
            0.0,
            -282668133.0 / 205662961.0,
            2019193451.0 / 616988883.0,
            -1453857185.0 / 822651844.0,
        ],
        &[
            0.0,
            40617522.0 / 29380423.0,
            -110615467.0 / 29380423.0,
            69997945.0 / 29380423.0,
        ],
    ],
};
