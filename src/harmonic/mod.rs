//! Real spherical harmonic basis: band-order indexing and evaluation.

mod eval;
mod index;

pub use eval::real_sph_harm;
pub use index::{enclosing_band, j2lm, lm2j, maxl2maxj};
