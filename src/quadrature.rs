//! Numerical integration rules over the unit sphere.

use std::f64::consts::PI;

/// Returns the nodes and weights of the `n`-point Gauss-Legendre rule on
/// `[-1, 1]`, nodes in ascending order.
///
/// Exact for polynomials up to degree `2n - 1`.
pub fn gauss_legendre(n: usize) -> (Vec<f64>, Vec<f64>) {
    assert!(n >= 1, "quadrature rule needs at least one node");

    let mut nodes = vec![0.0; n];
    let mut weights = vec![0.0; n];

    for i in 0..n.div_ceil(2) {
        // Chebyshev-based initial guess, refined by Newton iterations.
        let mut x = (PI * (i as f64 + 0.75) / (n as f64 + 0.5)).cos();
        for _ in 0..100 {
            let (p, dp) = legendre_pair(n, x);
            let dx = p / dp;
            x -= dx;
            if dx.abs() < 1e-15 {
                break;
            }
        }

        let (_, dp) = legendre_pair(n, x);
        let w = 2.0 / ((1.0 - x * x) * dp * dp);

        nodes[i] = -x;
        nodes[n - 1 - i] = x;
        weights[i] = w;
        weights[n - 1 - i] = w;
    }

    (nodes, weights)
}

/// Evaluates the Legendre polynomial `P_n` and its derivative at `x`.
fn legendre_pair(n: usize, x: f64) -> (f64, f64) {
    let mut prev = 1.0;
    let mut curr = x;
    if n == 0 {
        return (1.0, 0.0);
    }

    for k in 1..n {
        let kf = k as f64;
        let next = ((2.0 * kf + 1.0) * x * curr - kf * prev) / (kf + 1.0);
        prev = curr;
        curr = next;
    }

    let dp = n as f64 * (x * curr - prev) / (x * x - 1.0);
    (curr, dp)
}

/// Product rule over the sphere: Gauss-Legendre in the polar cosine and a
/// uniform trapezoidal rule in azimuth.
///
/// Returns `(theta, phi, weight)` triples whose weights sum to `4 pi`. The
/// uniform azimuthal rule is spectrally accurate for periodic integrands, so
/// the product rule converges rapidly for smooth response functions.
pub fn sphere_rule(n_polar: usize, n_azimuth: usize) -> Vec<(f64, f64, f64)> {
    let (nodes, weights) = gauss_legendre(n_polar);
    let dphi = 2.0 * PI / n_azimuth as f64;

    let mut rule = Vec::with_capacity(n_polar * n_azimuth);
    for (x, w) in nodes.iter().zip(weights.iter()) {
        let theta = x.acos();
        for p in 0..n_azimuth {
            rule.push((theta, p as f64 * dphi, w * dphi));
        }
    }
    rule
}
