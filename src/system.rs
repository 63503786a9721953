use crate::error::Error;
use crate::field::{DistributionField, IntensityField};
use crate::harmonic::{j2lm, maxl2maxj, real_sph_harm};
use crate::quadrature::sphere_rule;
use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;

/// Entries whose magnitude falls below this are exactly zero by symmetry;
/// the projection only leaves floating noise there.
const ZERO_SNAP: f64 = 1e-15;

/// Columns with every entry below this magnitude are invisible to the
/// configuration set.
const BLIND_COLUMN: f64 = 1e-10;

/// Quadrature sizes for the response projections, comfortably above the
/// band limits in use.
const N_POLAR: usize = 32;
const N_AZIMUTH: usize = 64;

/// The angular response of one illumination/detection configuration.
///
/// `response` must be pure and evaluable at arbitrary directions; the
/// system matrix builder only ever samples it under numerical integration.
pub trait ResponseFunction {
    /// Sensitivity to a dipole oriented along `(theta, phi)`.
    fn response(&self, theta: f64, phi: f64) -> f64;
}

impl<F: Fn(f64, f64) -> f64> ResponseFunction for F {
    fn response(&self, theta: f64, phi: f64) -> f64 {
        self(theta, phi)
    }
}

/// The forward operator of the microscope.
///
/// Row `i` holds the harmonic-basis projection of configuration `i`'s
/// response function, so `psi * sh` predicts the intensities a density
/// with coefficients `sh` produces across all configurations. Built once
/// per configuration set and immutable afterwards.
pub struct SystemMatrix {
    psi: DMatrix<f64>,
}

impl SystemMatrix {
    /// Projects every configuration's response onto the harmonic basis up
    /// to `max_l`.
    ///
    /// Deterministic for a fixed configuration list and band limit.
    pub fn from_configurations<R>(configurations: &[R], max_l: u32) -> Self
    where
        R: ResponseFunction + Sync,
    {
        log::info!(
            "building system matrix: {} configurations, bands up to {max_l}",
            configurations.len(),
        );

        let max_j = maxl2maxj(max_l);
        let rule = sphere_rule(N_POLAR, N_AZIMUTH);

        let rows: Vec<Vec<f64>> = configurations
            .par_iter()
            .enumerate()
            .map(|(i, configuration)| {
                log::debug!("projecting configuration {i}");
                (0..max_j)
                    .map(|j| {
                        let (l, m) = j2lm(j as i64)
                            .expect("column index enumerates valid coefficients");
                        let projection: f64 = rule
                            .iter()
                            .map(|&(theta, phi, w)| {
                                w * configuration.response(theta, phi)
                                    * real_sph_harm(l, m, theta, phi)
                                        .expect("band-order indices keep the order within the degree")
                            })
                            .sum();
                        match projection.abs() < ZERO_SNAP {
                            true => 0.0,
                            false => projection,
                        }
                    })
                    .collect()
            })
            .collect();

        let psi = DMatrix::from_fn(configurations.len(), max_j, |i, j| rows[i][j]);
        Self { psi }
    }

    /// Number of configurations, one intensity channel each.
    pub fn n_configurations(&self) -> usize {
        self.psi.nrows()
    }

    /// Number of basis coefficients the operator acts on.
    pub fn max_j(&self) -> usize {
        self.psi.ncols()
    }

    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.psi
    }

    /// Singular values of the forward operator, in descending order.
    ///
    /// Read-only diagnostic; external plotting renders the singular
    /// distributions from these.
    pub fn singular_values(&self) -> DVector<f64> {
        self.psi.clone().svd(false, false).singular_values
    }

    /// Marks the basis functions the configuration set is blind to: columns
    /// whose entries all vanish.
    pub fn blind_columns(&self) -> Vec<bool> {
        (0..self.psi.ncols())
            .map(|j| self.psi.column(j).amax() < BLIND_COLUMN)
            .collect()
    }

    /// Predicts the intensities of a single voxel: `g = psi * sh`.
    pub fn predict(&self, sh: &DVector<f64>) -> Result<DVector<f64>, Error> {
        if sh.len() != self.max_j() {
            return Err(Error::DimensionMismatch {
                expected: self.max_j(),
                actual: sh.len(),
            });
        }
        Ok(&self.psi * sh)
    }

    /// Predicts the intensity field of a distribution field.
    ///
    /// The linear map is identical across voxels, so the batch is a
    /// per-voxel matrix-vector product dispatched in parallel.
    pub fn predict_field(&self, field: &DistributionField) -> Result<IntensityField, Error> {
        if field.max_j() != self.max_j() {
            return Err(Error::DimensionMismatch {
                expected: self.max_j(),
                actual: field.max_j(),
            });
        }

        let (nx, ny, nz) = field.dims();
        let coords: Vec<(usize, usize, usize)> = (0..nx)
            .flat_map(|x| (0..ny).flat_map(move |y| (0..nz).map(move |z| (x, y, z))))
            .collect();

        let rows: Vec<Vec<f64>> = coords
            .par_iter()
            .map(|&(x, y, z)| {
                let sh = field
                    .coefficients(x, y, z)
                    .expect("coordinates enumerate the field");
                let g = &self.psi * DVector::from_column_slice(sh);
                g.as_slice().to_vec()
            })
            .collect();

        let mut intensities = IntensityField::zeros(field.dims(), self.n_configurations());
        for (&(x, y, z), row) in coords.iter().zip(rows.iter()) {
            intensities.intensities_mut(x, y, z).copy_from_slice(row);
        }
        Ok(intensities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harmonic::lm2j;
    use approx::assert_relative_eq;

    /// Response functions that are themselves basis functions make the
    /// projection rows unit vectors.
    fn harmonic_responses() -> Vec<Box<dyn Fn(f64, f64) -> f64 + Send + Sync>> {
        [(0, 0), (2, 0), (2, 2), (4, 0)]
            .into_iter()
            .map(|(l, m)| {
                Box::new(move |theta: f64, phi: f64| real_sph_harm(l, m, theta, phi).unwrap())
                    as Box<dyn Fn(f64, f64) -> f64 + Send + Sync>
            })
            .collect()
    }

    #[test]
    fn orthogonal_responses_project_to_unit_rows() {
        let system = SystemMatrix::from_configurations(&harmonic_responses(), 4);

        assert_eq!(system.matrix().shape(), (4, 15));
        for (i, (l, m)) in [(0, 0), (2, 0), (2, 2), (4, 0)].into_iter().enumerate() {
            for j in 0..system.max_j() {
                let expect = match j == lm2j(l, m).unwrap() {
                    true => 1.0,
                    false => 0.0,
                };
                assert_relative_eq!(system.matrix()[(i, j)], expect, epsilon = 1e-10);
            }
        }
    }

    #[test]
    fn symmetry_zeros_are_exact() {
        // A zonal response has no overlap with any m != 0 basis function;
        // those entries must be snapped to exactly zero.
        let zonal = |theta: f64, _phi: f64| theta.cos().powf(2.);
        let system = SystemMatrix::from_configurations(&[zonal], 2);

        for (l, m) in [(2, -2), (2, -1), (2, 1), (2, 2)] {
            assert_eq!(system.matrix()[(0, lm2j(l, m).unwrap())], 0.0);
        }
    }

    #[test]
    fn blind_columns_match_zero_structure() {
        let zonal = |theta: f64, _phi: f64| theta.cos().powf(2.);
        let system = SystemMatrix::from_configurations(&[zonal], 2);

        let blind = system.blind_columns();
        assert_eq!(blind, vec![false, true, true, false, true, true]);
    }

    #[test]
    fn field_prediction_matches_single_voxel() {
        let system = SystemMatrix::from_configurations(&harmonic_responses(), 4);
        let mut field = DistributionField::zeros((2, 1, 1), system.max_j());
        field.coefficients_mut(1, 0, 0)[0] = 1.0;
        field.coefficients_mut(1, 0, 0)[3] = 0.25;

        let intensities = system.predict_field(&field).unwrap();
        let sh = DVector::from_column_slice(field.coefficients(1, 0, 0).unwrap());
        let expect = system.predict(&sh).unwrap();

        assert_eq!(intensities.intensities(1, 0, 0).unwrap(), expect.as_slice());
        assert!(
            intensities
                .intensities(0, 0, 0)
                .unwrap()
                .iter()
                .all(|&g| g == 0.0)
        );
    }

    #[test]
    fn rejects_mismatched_coefficients() {
        let system = SystemMatrix::from_configurations(&harmonic_responses(), 2);
        assert!(system.predict(&DVector::zeros(4)).is_err());
    }
}
