use crate::basis::AngularBasis;
use crate::error::Error;
use crate::field::{Distribution, DistributionField, IntensityField, Mask};
use crate::solver::{NonNegativeQp, SolverSettings};
use crate::system::SystemMatrix;
use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Instant;

/// Amplitude count of the single-direction dictionary.
const PRIOR_AMPLITUDES: usize = 10;

/// Progress notice cadence during field passes.
const PROGRESS_EVERY: usize = 100;

/// How a voxel's intensities are inverted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ReconMode {
    /// Constrained least squares: minimize `|psi sh - g|^2` subject to the
    /// sampled density `B sh` being non-negative everywhere.
    Constrained,

    /// Single-direction prior: picks the best match from a dictionary of
    /// one-direction spikes.
    ///
    /// An approximation for fast qualitative previews, not an optimum of
    /// the constrained objective; final reconstructions should use
    /// [`ReconMode::Constrained`].
    SingleDirectionPrior,
}

/// Inverts measured intensities into angular densities.
///
/// Holds the forward operator, the discretization basis, and the factored
/// quadratic program; all of it is built once and shared read-only across
/// voxels, so a reconstructor can be used from parallel workers freely.
///
/// Each voxel moves through `Pending -> Solving -> Solved | Failed`
/// independently; no state crosses voxels.
pub struct Reconstructor {
    system: SystemMatrix,
    basis: AngularBasis,
    qp: NonNegativeQp,
    prior: PriorDictionary,
}

impl Reconstructor {
    /// Builds a reconstructor around a forward operator and a basis.
    ///
    /// Solver options are explicit here rather than process-global; two
    /// reconstructors with different settings can coexist.
    pub fn new(
        system: SystemMatrix,
        basis: AngularBasis,
        settings: SolverSettings,
    ) -> Result<Self, Error> {
        if system.max_j() != basis.max_j() {
            return Err(Error::DimensionMismatch {
                expected: system.max_j(),
                actual: basis.max_j(),
            });
        }

        let psi = system.matrix();
        let p = 2.0 * psi.tr_mul(psi);
        let qp = NonNegativeQp::new(p, basis.matrix().clone(), settings)?;
        let prior = PriorDictionary::new(&system, &basis);

        Ok(Self {
            system,
            basis,
            qp,
            prior,
        })
    }

    pub fn system(&self) -> &SystemMatrix {
        &self.system
    }

    pub fn basis(&self) -> &AngularBasis {
        &self.basis
    }

    /// Reconstructs one voxel from its measured intensities.
    pub fn reconstruct(&self, g: &DVector<f64>, mode: ReconMode) -> Result<Distribution, Error> {
        if g.len() != self.system.n_configurations() {
            return Err(Error::DimensionMismatch {
                expected: self.system.n_configurations(),
                actual: g.len(),
            });
        }

        match mode {
            ReconMode::Constrained => {
                let q = -2.0 * self.system.matrix().tr_mul(g);
                let sh = self.qp.solve(&q)?;
                Distribution::from_coefficients(sh)
            }
            ReconMode::SingleDirectionPrior => {
                let f = self.prior.best_match(g);
                Distribution::from_samples(&self.basis, &f)
            }
        }
    }
}

/// Dictionary of single-direction spike densities for the fast mode.
///
/// Candidate `c` is a spike at direction `c % n` with amplitude
/// `0.1 * (c / n + 1)`; its predicted intensity is precomputed and
/// normalized by its own maximum.
struct PriorDictionary {
    n_samples: usize,
    predictions: DMatrix<f64>,
}

impl PriorDictionary {
    fn new(system: &SystemMatrix, basis: &AngularBasis) -> Self {
        let h_model = system.matrix() * basis.inverse();
        let n = basis.n_samples();

        let mut predictions = DMatrix::zeros(system.n_configurations(), n * PRIOR_AMPLITUDES);
        for c in 0..predictions.ncols() {
            let amplitude = 0.1 * (c / n + 1) as f64;
            let mut column = amplitude * h_model.column(c % n);
            let peak = column.max();
            if peak > 0.0 {
                column /= peak;
            }
            predictions.set_column(c, &column);
        }

        Self {
            n_samples: n,
            predictions,
        }
    }

    /// Sampled density of the candidate closest to the measurement.
    ///
    /// Ties resolve to the lowest candidate index, so identical inputs
    /// always select the identical candidate.
    fn best_match(&self, g: &DVector<f64>) -> DVector<f64> {
        let mut g = g.clone();
        let peak = g.max();
        if peak > 0.0 {
            g /= peak;
        }

        let mut best = 0;
        let mut best_residual = f64::INFINITY;
        for c in 0..self.predictions.ncols() {
            let residual = (self.predictions.column(c) - &g).norm_squared();
            if residual < best_residual {
                best = c;
                best_residual = residual;
            }
        }

        let mut f = DVector::zeros(self.n_samples);
        f[best % self.n_samples] = 0.1 * (best / self.n_samples + 1) as f64;
        f
    }
}

/// One voxel the field pass could not solve.
#[derive(Debug)]
pub struct VoxelFailure {
    pub voxel: (usize, usize, usize),
    pub error: Error,
}

/// Result of a masked field pass.
///
/// Failed voxels hold zero coefficients in the field and are listed in
/// `failures`; nothing is silently dropped.
#[derive(Debug)]
pub struct FieldReconstruction {
    field: DistributionField,
    failures: Vec<VoxelFailure>,
    solved: usize,
    cancelled: bool,
}

impl FieldReconstruction {
    pub fn field(&self) -> &DistributionField {
        &self.field
    }

    pub fn into_field(self) -> DistributionField {
        self.field
    }

    pub fn failures(&self) -> &[VoxelFailure] {
        &self.failures
    }

    /// Number of voxels that reached `Solved`.
    pub fn solved(&self) -> usize {
        self.solved
    }

    /// Whether the pass was cancelled before finishing.
    pub fn cancelled(&self) -> bool {
        self.cancelled
    }
}

enum VoxelOutcome {
    Solved(Distribution),
    Failed(Error),
    Skipped,
}

/// Applies a [`Reconstructor`] across a masked intensity field.
pub struct FieldReconstructor<'a> {
    recon: &'a Reconstructor,
    mode: ReconMode,
    cancel: Option<Arc<AtomicBool>>,
}

impl<'a> FieldReconstructor<'a> {
    pub fn new(recon: &'a Reconstructor, mode: ReconMode) -> Self {
        Self {
            recon,
            mode,
            cancel: None,
        }
    }

    /// Installs a cooperative cancellation flag, checked between voxels.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Reconstructs every masked voxel of `intensities`.
    ///
    /// Voxels outside the mask receive zero coefficients without invoking
    /// the solver. Masked voxels are enumerated row-major and solved in
    /// parallel; per-voxel solver failures are recorded and substituted
    /// with zeros rather than aborting the pass. Shape inconsistencies
    /// between the operator, the mask, and the field fail the whole call.
    pub fn reconstruct(
        &self,
        intensities: &IntensityField,
        mask: &Mask,
    ) -> Result<FieldReconstruction, Error> {
        if intensities.channels() != self.recon.system.n_configurations() {
            return Err(Error::DimensionMismatch {
                expected: self.recon.system.n_configurations(),
                actual: intensities.channels(),
            });
        }
        if mask.dims() != intensities.dims() {
            let (x, y, z) = intensities.dims();
            let (mx, my, mz) = mask.dims();
            return Err(Error::DimensionMismatch {
                expected: x * y * z,
                actual: mx * my * mz,
            });
        }

        let start = Instant::now();
        let coords = mask.coordinates();
        let total = coords.len();
        log::info!("reconstructing {total} masked voxels");

        let progress = AtomicUsize::new(0);
        let outcomes: Vec<VoxelOutcome> = coords
            .par_iter()
            .map(|&(x, y, z)| {
                if let Some(flag) = &self.cancel
                    && flag.load(Ordering::Relaxed)
                {
                    return VoxelOutcome::Skipped;
                }

                let g = DVector::from_column_slice(
                    intensities
                        .intensities(x, y, z)
                        .expect("mask and field dims agree"),
                );
                let outcome = match self.recon.reconstruct(&g, self.mode) {
                    Ok(dist) => VoxelOutcome::Solved(dist),
                    Err(err) => VoxelOutcome::Failed(err),
                };

                let done = progress.fetch_add(1, Ordering::Relaxed) + 1;
                if done % PROGRESS_EVERY == 0 {
                    log::info!("progress: {done}/{total}");
                }
                outcome
            })
            .collect();

        let mut field = DistributionField::zeros(intensities.dims(), self.recon.system.max_j());
        let mut failures = Vec::new();
        let mut solved = 0;
        let mut cancelled = false;

        for ((x, y, z), outcome) in coords.into_iter().zip(outcomes) {
            match outcome {
                VoxelOutcome::Solved(dist) => {
                    field
                        .coefficients_mut(x, y, z)
                        .copy_from_slice(dist.coefficients().as_slice());
                    solved += 1;
                }
                VoxelOutcome::Failed(error) => failures.push(VoxelFailure {
                    voxel: (x, y, z),
                    error,
                }),
                VoxelOutcome::Skipped => cancelled = true,
            }
        }

        if !failures.is_empty() {
            log::warn!("{} voxels failed to solve", failures.len());
        }
        log::info!("reconstruction time (s): {:.2}", start.elapsed().as_secs_f64());

        Ok(FieldReconstruction {
            field,
            failures,
            solved,
            cancelled,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harmonic::real_sph_harm;

    fn harmonic_responses() -> Vec<Box<dyn Fn(f64, f64) -> f64 + Send + Sync>> {
        [(0, 0), (2, 0), (2, 1), (2, 2)]
            .into_iter()
            .map(|(l, m)| {
                Box::new(move |theta: f64, phi: f64| real_sph_harm(l, m, theta, phi).unwrap())
                    as Box<dyn Fn(f64, f64) -> f64 + Send + Sync>
            })
            .collect()
    }

    fn reconstructor(settings: SolverSettings) -> Reconstructor {
        let system = SystemMatrix::from_configurations(&harmonic_responses(), 2);
        let basis = AngularBasis::new(60, 2);
        Reconstructor::new(system, basis, settings).unwrap()
    }

    #[test]
    fn never_worse_than_planted_truth() {
        let recon = reconstructor(SolverSettings::default());

        // A feasible ground truth: dominant monopole, mild anisotropy.
        let truth = DVector::from_vec(vec![1.0, 0.0, 0.05, 0.1, 0.0, 0.05]);
        assert!(
            recon
                .basis()
                .sample(&truth)
                .unwrap()
                .iter()
                .all(|&f| f >= 0.0)
        );

        let g = recon.system().predict(&truth).unwrap();
        let recovered = recon.reconstruct(&g, ReconMode::Constrained).unwrap();
        let residual = (recon.system().predict(recovered.coefficients()).unwrap() - &g).norm();

        // The planted truth achieves zero residual; the solver may not do
        // worse than tolerance.
        assert!(residual < 1e-6, "residual {residual}");
    }

    #[test]
    fn reconstruction_is_non_negative() {
        let recon = reconstructor(SolverSettings::default());
        let g = DVector::from_vec(vec![1.0, 0.2, -0.1, 0.3]);

        let dist = recon.reconstruct(&g, ReconMode::Constrained).unwrap();
        let f = dist.sample(recon.basis()).unwrap();
        assert!(f.iter().all(|&x| x > -1e-7));
    }

    #[test]
    fn prior_mode_is_deterministic() {
        let recon = reconstructor(SolverSettings::default());
        let g = DVector::from_vec(vec![0.8, 0.1, 0.4, 0.2]);

        let first = recon.reconstruct(&g, ReconMode::SingleDirectionPrior).unwrap();
        let second = recon.reconstruct(&g, ReconMode::SingleDirectionPrior).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn rejects_mismatched_measurement() {
        let recon = reconstructor(SolverSettings::default());
        let g = DVector::zeros(3);

        assert!(matches!(
            recon.reconstruct(&g, ReconMode::Constrained),
            Err(Error::DimensionMismatch {
                expected: 4,
                actual: 3,
            })
        ));
    }

    #[test]
    fn empty_mask_never_solves() {
        // An iteration cap of one makes any real solve fail, so an all-zero
        // outcome proves the solver was never reached.
        let recon = reconstructor(SolverSettings {
            max_iterations: 1,
            ..Default::default()
        });

        let mut intensities = IntensityField::zeros((2, 2, 2), 4);
        for x in 0..2 {
            for y in 0..2 {
                for z in 0..2 {
                    intensities
                        .intensities_mut(x, y, z)
                        .copy_from_slice(&[1.0, 0.5, 0.25, 0.1]);
                }
            }
        }
        let mask = Mask::filled((2, 2, 2), false);

        let result = FieldReconstructor::new(&recon, ReconMode::Constrained)
            .reconstruct(&intensities, &mask)
            .unwrap();

        assert!(result.failures().is_empty());
        assert_eq!(result.solved(), 0);
        for x in 0..2 {
            for y in 0..2 {
                for z in 0..2 {
                    assert!(
                        result
                            .field()
                            .coefficients(x, y, z)
                            .unwrap()
                            .iter()
                            .all(|&c| c == 0.0)
                    );
                }
            }
        }
    }

    #[test]
    fn failed_voxels_are_recorded_and_zeroed() {
        let recon = reconstructor(SolverSettings {
            max_iterations: 1,
            ..Default::default()
        });

        let mut intensities = IntensityField::zeros((1, 1, 2), 4);
        intensities
            .intensities_mut(0, 0, 1)
            .copy_from_slice(&[1.0, 0.3, 0.2, 0.1]);
        let mask = Mask::from_fn((1, 1, 2), |_, _, z| z == 1);

        let result = FieldReconstructor::new(&recon, ReconMode::Constrained)
            .reconstruct(&intensities, &mask)
            .unwrap();

        assert_eq!(result.failures().len(), 1);
        assert_eq!(result.failures()[0].voxel, (0, 0, 1));
        assert!(
            result
                .field()
                .coefficients(0, 0, 1)
                .unwrap()
                .iter()
                .all(|&c| c == 0.0)
        );
    }

    #[test]
    fn cancellation_skips_remaining_voxels() {
        let recon = reconstructor(SolverSettings::default());
        let intensities = IntensityField::zeros((2, 2, 2), 4);
        let mask = Mask::filled((2, 2, 2), true);

        let flag = Arc::new(AtomicBool::new(true));
        let result = FieldReconstructor::new(&recon, ReconMode::Constrained)
            .with_cancel_flag(flag)
            .reconstruct(&intensities, &mask)
            .unwrap();

        assert!(result.cancelled());
        assert_eq!(result.solved(), 0);
        assert!(result.failures().is_empty());
    }

    #[test]
    fn rejects_mask_shape_mismatch() {
        let recon = reconstructor(SolverSettings::default());
        let intensities = IntensityField::zeros((2, 2, 2), 4);
        let mask = Mask::filled((2, 2, 1), true);

        assert!(
            FieldReconstructor::new(&recon, ReconMode::Constrained)
                .reconstruct(&intensities, &mask)
                .is_err()
        );
    }
}
