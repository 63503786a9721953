use crate::basis::AngularBasis;
use crate::error::Error;
use crate::harmonic::enclosing_band;
use nalgebra::DVector;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A single voxel's angular density.
///
/// Stored as a coefficient vector over the real harmonic basis in band
/// order; the sampled form `f = B * sh` is derived on demand through an
/// [`AngularBasis`].
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Distribution {
    sh: DVector<f64>,
}

impl Distribution {
    /// Creates a distribution from harmonic coefficients.
    ///
    /// A coefficient vector whose length is not a full band count is
    /// zero-padded up to the enclosing band.
    pub fn from_coefficients(sh: DVector<f64>) -> Result<Self, Error> {
        let (_, max_j) = enclosing_band(sh.len())?;
        let sh = match sh.len() == max_j {
            true => sh,
            false => {
                let mut padded = DVector::zeros(max_j);
                padded.rows_mut(0, sh.len()).copy_from(&sh);
                padded
            }
        };
        Ok(Self { sh })
    }

    /// Creates a distribution from a density sampled at the basis lattice.
    pub fn from_samples(basis: &AngularBasis, f: &DVector<f64>) -> Result<Self, Error> {
        Ok(Self {
            sh: basis.project(f)?,
        })
    }

    pub fn coefficients(&self) -> &DVector<f64> {
        &self.sh
    }

    /// Samples the density at the basis lattice directions.
    pub fn sample(&self, basis: &AngularBasis) -> Result<DVector<f64>, Error> {
        basis.sample(&self.sh)
    }

    /// The monopole coefficient, proportional to the total density of the
    /// voxel.
    pub fn density(&self) -> f64 {
        self.sh[0]
    }

    /// Generalized fractional anisotropy of the voxel.
    ///
    /// Zero for an isotropic voxel and for an empty one.
    pub fn gfa(&self) -> f64 {
        gfa_of(self.sh.as_slice())
    }
}

fn gfa_of(sh: &[f64]) -> f64 {
    let total: f64 = sh.iter().map(|c| c * c).sum();
    let arg = 1.0 - sh[0] * sh[0] / total;
    match arg.is_finite() && arg > 0.0 {
        true => arg.sqrt(),
        false => 0.0,
    }
}

/// Marks the voxels of a field that should be reconstructed.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Mask {
    dims: (usize, usize, usize),
    inner: Vec<bool>,
}

impl Mask {
    /// A mask with every voxel set to `value`.
    pub fn filled(dims: (usize, usize, usize), value: bool) -> Self {
        Self {
            dims,
            inner: vec![value; dims.0 * dims.1 * dims.2],
        }
    }

    /// Builds a mask by evaluating a predicate at every voxel coordinate.
    pub fn from_fn<F: FnMut(usize, usize, usize) -> bool>(
        dims: (usize, usize, usize),
        mut pred: F,
    ) -> Self {
        let mut inner = Vec::with_capacity(dims.0 * dims.1 * dims.2);
        for x in 0..dims.0 {
            for y in 0..dims.1 {
                for z in 0..dims.2 {
                    inner.push(pred(x, y, z));
                }
            }
        }
        Self { dims, inner }
    }

    pub fn dims(&self) -> (usize, usize, usize) {
        self.dims
    }

    pub fn get(&self, x: usize, y: usize, z: usize) -> Option<bool> {
        in_bounds(self.dims, x, y, z).then(|| self.inner[flat(self.dims, x, y, z)])
    }

    /// Number of marked voxels.
    pub fn count(&self) -> usize {
        self.inner.iter().filter(|&&m| m).count()
    }

    /// Coordinates of the marked voxels in row-major order.
    ///
    /// The order is deterministic for a fixed mask; reconstruction progress
    /// and output reproducibility follow it.
    pub fn coordinates(&self) -> Vec<(usize, usize, usize)> {
        let mut coords = Vec::with_capacity(self.count());
        for x in 0..self.dims.0 {
            for y in 0..self.dims.1 {
                for z in 0..self.dims.2 {
                    if self.inner[flat(self.dims, x, y, z)] {
                        coords.push((x, y, z));
                    }
                }
            }
        }
        coords
    }
}

/// A 3D field of angular densities in coefficient form.
///
/// Flat row-major storage over `[x, y, z, j]`; voxels are spatially
/// independent.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DistributionField {
    dims: (usize, usize, usize),
    max_j: usize,
    sh: Vec<f64>,
}

impl DistributionField {
    /// A field of empty voxels holding `max_j` coefficients each.
    pub fn zeros(dims: (usize, usize, usize), max_j: usize) -> Self {
        Self {
            dims,
            max_j,
            sh: vec![0.0; dims.0 * dims.1 * dims.2 * max_j],
        }
    }

    /// Builds a field by evaluating `fill` at every voxel coordinate.
    ///
    /// Partially filled coefficient vectors are zero-padded up to `max_j`;
    /// a vector longer than `max_j` fails the whole call.
    pub fn from_fn<F: FnMut(usize, usize, usize) -> Vec<f64>>(
        dims: (usize, usize, usize),
        max_j: usize,
        mut fill: F,
    ) -> Result<Self, Error> {
        let mut field = Self::zeros(dims, max_j);
        for x in 0..dims.0 {
            for y in 0..dims.1 {
                for z in 0..dims.2 {
                    let sh = fill(x, y, z);
                    if sh.len() > max_j {
                        return Err(Error::DimensionMismatch {
                            expected: max_j,
                            actual: sh.len(),
                        });
                    }
                    field.coefficients_mut(x, y, z)[..sh.len()].copy_from_slice(&sh);
                }
            }
        }
        Ok(field)
    }

    pub fn dims(&self) -> (usize, usize, usize) {
        self.dims
    }

    pub fn max_j(&self) -> usize {
        self.max_j
    }

    /// Coefficients of a voxel, or `None` outside the field.
    pub fn coefficients(&self, x: usize, y: usize, z: usize) -> Option<&[f64]> {
        in_bounds(self.dims, x, y, z).then(|| {
            let at = flat(self.dims, x, y, z) * self.max_j;
            &self.sh[at..at + self.max_j]
        })
    }

    pub(crate) fn coefficients_mut(&mut self, x: usize, y: usize, z: usize) -> &mut [f64] {
        let at = flat(self.dims, x, y, z) * self.max_j;
        &mut self.sh[at..at + self.max_j]
    }

    /// Extracts one voxel as a [`Distribution`].
    pub fn voxel(&self, x: usize, y: usize, z: usize) -> Option<Distribution> {
        self.coefficients(x, y, z).map(|sh| Distribution {
            sh: DVector::from_column_slice(sh),
        })
    }

    /// The monopole coefficient of every voxel, row-major.
    pub fn density(&self) -> Vec<f64> {
        self.sh.chunks_exact(self.max_j).map(|sh| sh[0]).collect()
    }

    /// Like [`DistributionField::density`], scaled into `[0, 1]` by the
    /// largest voxel.
    pub fn density_normalized(&self) -> Vec<f64> {
        let density = self.density();
        let peak = density.iter().cloned().fold(f64::MIN, f64::max);
        match peak > 0.0 {
            true => density.iter().map(|d| d / peak).collect(),
            false => density,
        }
    }

    /// Generalized fractional anisotropy of every voxel, row-major.
    pub fn gfa(&self) -> Vec<f64> {
        self.sh.chunks_exact(self.max_j).map(gfa_of).collect()
    }

    /// Samples every voxel at the basis lattice directions: the field
    /// counterpart of [`Distribution::sample`].
    pub fn sample(&self, basis: &AngularBasis) -> Result<SampledField, Error> {
        use rayon::prelude::*;

        if basis.max_j() != self.max_j {
            return Err(Error::DimensionMismatch {
                expected: basis.max_j(),
                actual: self.max_j,
            });
        }

        let f: Vec<Vec<f64>> = self
            .sh
            .par_chunks_exact(self.max_j)
            .map(|sh| {
                let f = basis.matrix() * DVector::from_column_slice(sh);
                f.as_slice().to_vec()
            })
            .collect();

        Ok(SampledField {
            dims: self.dims,
            n_samples: basis.n_samples(),
            f: f.concat(),
        })
    }
}

/// A 3D field of angular densities in sampled form, `[x, y, z, n]`.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SampledField {
    dims: (usize, usize, usize),
    n_samples: usize,
    f: Vec<f64>,
}

impl SampledField {
    pub fn dims(&self) -> (usize, usize, usize) {
        self.dims
    }

    pub fn n_samples(&self) -> usize {
        self.n_samples
    }

    /// Sampled density of a voxel, or `None` outside the field.
    pub fn samples(&self, x: usize, y: usize, z: usize) -> Option<&[f64]> {
        in_bounds(self.dims, x, y, z).then(|| {
            let at = flat(self.dims, x, y, z) * self.n_samples;
            &self.f[at..at + self.n_samples]
        })
    }
}

/// A 3D field of measured or predicted intensities, `[x, y, z, i]` with one
/// channel per configuration.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct IntensityField {
    dims: (usize, usize, usize),
    channels: usize,
    g: Vec<f64>,
}

impl IntensityField {
    /// A field of zero intensities with `channels` configurations.
    pub fn zeros(dims: (usize, usize, usize), channels: usize) -> Self {
        Self {
            dims,
            channels,
            g: vec![0.0; dims.0 * dims.1 * dims.2 * channels],
        }
    }

    /// Builds a field by evaluating `fill` at every voxel coordinate; the
    /// returned vector must have one entry per configuration.
    pub fn from_fn<F: FnMut(usize, usize, usize) -> Vec<f64>>(
        dims: (usize, usize, usize),
        channels: usize,
        mut fill: F,
    ) -> Result<Self, Error> {
        let mut g = Vec::with_capacity(dims.0 * dims.1 * dims.2 * channels);
        for x in 0..dims.0 {
            for y in 0..dims.1 {
                for z in 0..dims.2 {
                    let row = fill(x, y, z);
                    if row.len() != channels {
                        return Err(Error::DimensionMismatch {
                            expected: channels,
                            actual: row.len(),
                        });
                    }
                    g.extend_from_slice(&row);
                }
            }
        }
        Ok(Self { dims, channels, g })
    }

    pub fn dims(&self) -> (usize, usize, usize) {
        self.dims
    }

    /// Number of configurations measured per voxel.
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Intensities of a voxel, or `None` outside the field.
    pub fn intensities(&self, x: usize, y: usize, z: usize) -> Option<&[f64]> {
        in_bounds(self.dims, x, y, z).then(|| {
            let at = flat(self.dims, x, y, z) * self.channels;
            &self.g[at..at + self.channels]
        })
    }

    pub(crate) fn intensities_mut(&mut self, x: usize, y: usize, z: usize) -> &mut [f64] {
        let at = flat(self.dims, x, y, z) * self.channels;
        &mut self.g[at..at + self.channels]
    }
}

fn in_bounds(dims: (usize, usize, usize), x: usize, y: usize, z: usize) -> bool {
    x < dims.0 && y < dims.1 && z < dims.2
}

fn flat(dims: (usize, usize, usize), x: usize, y: usize, z: usize) -> usize {
    (x * dims.1 + y) * dims.2 + z
}
