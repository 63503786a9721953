// #![warn(missing_docs)]

//! Spatio-Angular Density Reconstruction
//!
//! Models image formation in a polarized light-field microscope and inverts
//! that model to recover a per-voxel angular density (an orientation
//! distribution function) from measured intensities.
//!
//! The pipeline: [`sphere`] generates a deterministic direction lattice,
//! [`harmonic`] evaluates the real spherical harmonic basis, [`basis`]
//! discretizes it into the sampling operator `B`, and [`system`] projects
//! the microscope's response functions into the forward operator `psi`.
//! [`recon`] inverts measurements per voxel under a non-negativity
//! constraint on the sampled density, solved by the quadratic program in
//! [`solver`], and batches the inversion over masked 3D fields from
//! [`field`].
//!
//! The crate computes; it does not render, plot, or touch files. Rendering
//! inputs (sample coordinates, hull triangulation, singular values) are
//! exposed as read-only data for external consumers.

#[allow(missing_docs)]
pub mod error;

pub mod basis;
pub mod field;
pub mod harmonic;
pub mod quadrature;
pub mod recon;
pub mod solver;
pub mod sphere;
pub mod system;
