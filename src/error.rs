use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("no spherical harmonic has degree {l} and order {m}")]
    InvalidIndex { l: u32, m: i32 },

    #[error("coefficient index {j} does not address a basis function")]
    InvalidCoefficient { j: i64 },

    #[error("expected a vector of length {expected} but got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("solver produced a non-finite iterate after {iterations} iterations")]
    SolverInfeasible { iterations: usize },

    #[error(
        "solver failed to converge after {iterations} iterations: primal residual {primal_residual}, dual residual {dual_residual}"
    )]
    SolverDidNotConverge {
        iterations: usize,
        primal_residual: f64,
        dual_residual: f64,
    },
}
