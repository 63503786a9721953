use crate::error::Error;
use std::f64::consts::PI;

/// Evaluates the real spherical harmonic basis function `Z_l^m` at a
/// direction given by colatitude `theta` and azimuth `phi`.
///
/// The real basis is assembled from the complex physics-convention
/// spherical harmonic `Y_l^m`:
///
/// ```text
/// m > 0:   Re((Y_l^m + conj(Y_l^m)) / sqrt(2))
/// m == 0:  Re(Y_l^0)
/// m < 0:   Re((Y_l^m - conj(Y_l^m)) / (sqrt(2) i))
/// ```
///
/// This basis is orthonormal under the surface measure of the unit sphere.
/// The discretization and system matrices are built from the same evaluator,
/// which keeps their normalizations mutually consistent.
pub fn real_sph_harm(l: u32, m: i32, theta: f64, phi: f64) -> Result<f64, Error> {
    if m.unsigned_abs() > l {
        return Err(Error::InvalidIndex { l, m });
    }

    let am = m.unsigned_abs();
    let p = norm_legendre(l, am, theta.cos(), theta.sin());
    let mf = am as f64;

    Ok(match m {
        m if m > 0 => 2f64.sqrt() * p * (mf * phi).cos(),
        0 => p,
        // Condon-Shortley phase of Y_l^{-|m|} relative to conj(Y_l^{|m|}).
        _ => 2f64.sqrt() * sign(am + 1) * p * (mf * phi).sin(),
    })
}

fn sign(k: u32) -> f64 {
    match k % 2 {
        0 => 1.0,
        _ => -1.0,
    }
}

/// Fully normalized associated Legendre function at `x = cos(theta)`,
/// including the Condon-Shortley phase and the `1/sqrt(4 pi)` spherical
/// normalization.
///
/// Uses the standard three-term recurrence in the degree, seeded along the
/// sectoral diagonal; stable for the low bands used here and well beyond.
fn norm_legendre(l: u32, m: u32, x: f64, sx: f64) -> f64 {
    // Sectoral seed P_m^m.
    let mut pmm = (1.0 / (4.0 * PI)).sqrt();
    for k in 1..=m {
        pmm *= -((2 * k + 1) as f64 / (2 * k) as f64).sqrt() * sx;
    }
    if l == m {
        return pmm;
    }

    let mut prev = pmm;
    let mut curr = ((2 * m + 3) as f64).sqrt() * x * pmm;
    for ll in (m + 2)..=l {
        let lf = ll as f64;
        let mf = m as f64;
        let a = ((4.0 * lf * lf - 1.0) / (lf * lf - mf * mf)).sqrt();
        let b = (((lf - 1.0) * (lf - 1.0) - mf * mf) / (4.0 * (lf - 1.0) * (lf - 1.0) - 1.0)).sqrt();
        let next = a * (x * curr - b * prev);
        prev = curr;
        curr = next;
    }
    curr
}
