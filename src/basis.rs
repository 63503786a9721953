use crate::error::Error;
use crate::harmonic::{j2lm, maxl2maxj, real_sph_harm};
use crate::sphere::{Direction, fibonacci_sphere, hull_triangulation};
use nalgebra::{DMatrix, DVector, Vector3};

/// Relative singular-value cutoff of the pseudo-inverse.
const RCOND: f64 = 1e-15;

/// Discretization of the harmonic basis at a fixed set of sphere directions.
///
/// `B` maps a coefficient vector to the angular density sampled at the
/// directions, `f = B * sh`; its pseudo-inverse `Binv` maps samples back to
/// coefficients. Both are built once per configuration and shared read-only
/// by every voxel reconstruction. The non-negativity constraint of the
/// reconstructor is expressed through `B`: a density is accepted when its
/// samples at all directions are non-negative.
pub struct AngularBasis {
    max_l: u32,
    directions: Vec<Direction>,
    cartesian: Vec<Vector3<f64>>,
    triangles: Vec<[usize; 3]>,
    rank: usize,
    b: DMatrix<f64>,
    binv: DMatrix<f64>,
}

impl AngularBasis {
    /// Builds the basis-to-samples operator for `n` lattice directions and
    /// harmonic bands up to `max_l`.
    pub fn new(n: usize, max_l: u32) -> Self {
        let max_j = maxl2maxj(max_l);
        let directions = fibonacci_sphere(n);

        let b = DMatrix::from_fn(n, max_j, |row, j| {
            let (l, m) = j2lm(j as i64).expect("column index enumerates valid coefficients");
            let dir = &directions[row];
            real_sph_harm(l, m, dir.theta(), dir.phi())
                .expect("band-order indices keep the order within the degree")
        });

        let (binv, rank) = pseudo_inverse(&b);

        let cartesian: Vec<Vector3<f64>> = directions.iter().map(|d| d.to_cartesian()).collect();
        let triangles = hull_triangulation(&cartesian);

        Self {
            max_l,
            directions,
            cartesian,
            triangles,
            rank,
            b,
            binv,
        }
    }

    /// Number of sample directions.
    pub fn n_samples(&self) -> usize {
        self.directions.len()
    }

    pub fn max_l(&self) -> u32 {
        self.max_l
    }

    /// Number of basis coefficients.
    pub fn max_j(&self) -> usize {
        self.b.ncols()
    }

    /// Numerical rank of the discretization matrix.
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Sample directions, in lattice order.
    pub fn directions(&self) -> &[Direction] {
        &self.directions
    }

    /// Cartesian coordinates of the sample directions.
    ///
    /// Auxiliary output for external rendering.
    pub fn cartesian(&self) -> &[Vector3<f64>] {
        &self.cartesian
    }

    /// Convex-hull triangulation of the sample directions.
    ///
    /// Auxiliary output for external rendering.
    pub fn triangles(&self) -> &[[usize; 3]] {
        &self.triangles
    }

    /// The basis-to-samples matrix `B`.
    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.b
    }

    /// The Moore-Penrose pseudo-inverse of `B`.
    pub fn inverse(&self) -> &DMatrix<f64> {
        &self.binv
    }

    /// Samples a coefficient vector at the lattice directions: `f = B * sh`.
    pub fn sample(&self, sh: &DVector<f64>) -> Result<DVector<f64>, Error> {
        if sh.len() != self.max_j() {
            return Err(Error::DimensionMismatch {
                expected: self.max_j(),
                actual: sh.len(),
            });
        }
        Ok(&self.b * sh)
    }

    /// Projects a sampled density onto the basis: `sh = Binv * f`.
    pub fn project(&self, f: &DVector<f64>) -> Result<DVector<f64>, Error> {
        if f.len() != self.n_samples() {
            return Err(Error::DimensionMismatch {
                expected: self.n_samples(),
                actual: f.len(),
            });
        }
        Ok(&self.binv * f)
    }
}

/// Pseudo-inverse with a relative singular-value cutoff.
///
/// A rank-deficient basis is reported as a warning and the truncated
/// pseudo-inverse is used as-is; reconstruction proceeds.
fn pseudo_inverse(b: &DMatrix<f64>) -> (DMatrix<f64>, usize) {
    let svd = b.clone().svd(true, true);
    let cutoff = RCOND * svd.singular_values.max();
    let rank = svd.singular_values.iter().filter(|&&s| s > cutoff).count();

    let full = b.nrows().min(b.ncols());
    if rank < full {
        log::warn!(
            "basis matrix is rank deficient ({rank} of {full}): \
             truncating the pseudo-inverse at cutoff {cutoff:e}"
        );
    }

    let binv = svd
        .pseudo_inverse(cutoff)
        .expect("singular-value cutoff is non-negative");
    (binv, rank)
}
