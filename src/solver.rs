use crate::error::Error;
use nalgebra::{Cholesky, DMatrix, DVector, Dyn};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Options for the operator-splitting solver.
///
/// Passed explicitly at construction; the solver keeps no process-wide
/// state. The defaults suit the small dense programs that arise in
/// per-voxel reconstruction.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SolverSettings {
    /// Constraint penalty weight.
    pub rho: f64,

    /// Proximal regularization; keeps the reduced system positive definite
    /// when the objective is rank deficient.
    pub sigma: f64,

    /// Over-relaxation factor in `[1, 2)`.
    pub alpha: f64,

    /// Absolute tolerance on the primal and dual residuals.
    pub eps_abs: f64,

    /// Relative tolerance on the primal and dual residuals.
    pub eps_rel: f64,

    /// Iteration cap; bounds the time any single voxel can take.
    pub max_iterations: usize,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            rho: 0.1,
            sigma: 1e-6,
            alpha: 1.6,
            eps_abs: 1e-9,
            eps_rel: 1e-9,
            max_iterations: 50_000,
        }
    }
}

/// Convex quadratic program with a non-negativity cone:
///
/// ```text
/// minimize   x' P x / 2 + q' x
/// subject to A x >= 0
/// ```
///
/// Solved by the alternating-direction method of multipliers. `P` and `A`
/// are fixed at construction and the reduced system
/// `P + sigma I + rho A'A` is factored once; solving for a new `q` reuses
/// the factorization, so a field reconstruction pays the factorization
/// cost a single time.
pub struct NonNegativeQp {
    p: DMatrix<f64>,
    a: DMatrix<f64>,
    kkt: Cholesky<f64, Dyn>,
    settings: SolverSettings,
}

impl NonNegativeQp {
    /// Builds the program and factors its reduced system.
    ///
    /// Fails when the shapes are inconsistent or `P` is not positive
    /// semidefinite.
    pub fn new(p: DMatrix<f64>, a: DMatrix<f64>, settings: SolverSettings) -> Result<Self, Error> {
        if p.nrows() != p.ncols() {
            return Err(Error::DimensionMismatch {
                expected: p.nrows(),
                actual: p.ncols(),
            });
        }
        if a.ncols() != p.ncols() {
            return Err(Error::DimensionMismatch {
                expected: p.ncols(),
                actual: a.ncols(),
            });
        }

        let mut reduced = &p + settings.rho * a.tr_mul(&a);
        for i in 0..reduced.nrows() {
            reduced[(i, i)] += settings.sigma;
        }

        let kkt = Cholesky::new(reduced).ok_or(Error::SolverInfeasible { iterations: 0 })?;
        Ok(Self {
            p,
            a,
            kkt,
            settings,
        })
    }

    /// Solves the program for one linear term `q`.
    ///
    /// Returns the optimal point, [`Error::SolverDidNotConverge`] when the
    /// iteration cap runs out, or [`Error::SolverInfeasible`] when the
    /// iterates degenerate.
    pub fn solve(&self, q: &DVector<f64>) -> Result<DVector<f64>, Error> {
        if q.len() != self.p.ncols() {
            return Err(Error::DimensionMismatch {
                expected: self.p.ncols(),
                actual: q.len(),
            });
        }

        let s = &self.settings;
        let mut x = DVector::zeros(self.p.ncols());
        let mut z = DVector::zeros(self.a.nrows());
        let mut y = DVector::zeros(self.a.nrows());

        let mut primal_residual = f64::INFINITY;
        let mut dual_residual = f64::INFINITY;

        for iteration in 1..=s.max_iterations {
            let rhs = s.sigma * &x - q + self.a.tr_mul(&(s.rho * &z - &y));
            let x_tilde = self.kkt.solve(&rhs);
            let z_tilde = &self.a * &x_tilde;

            let z_relaxed = s.alpha * z_tilde + (1.0 - s.alpha) * &z;
            x = s.alpha * x_tilde + (1.0 - s.alpha) * x;
            z = (&z_relaxed + &y / s.rho).map(|v| v.max(0.0));
            y += s.rho * (z_relaxed - &z);

            if !x.iter().all(|v| v.is_finite()) {
                return Err(Error::SolverInfeasible { iterations: iteration });
            }

            let ax = &self.a * &x;
            let px = &self.p * &x;
            let aty = self.a.tr_mul(&y);

            primal_residual = (&ax - &z).amax();
            dual_residual = (&px + q + &aty).amax();

            let eps_primal = s.eps_abs + s.eps_rel * ax.amax().max(z.amax());
            let eps_dual = s.eps_abs + s.eps_rel * px.amax().max(aty.amax()).max(q.amax());
            if primal_residual <= eps_primal && dual_residual <= eps_dual {
                return Ok(x);
            }
        }

        Err(Error::SolverDidNotConverge {
            iterations: s.max_iterations,
            primal_residual,
            dual_residual,
        })
    }
}
