//! Near-uniform direction sets on the unit sphere.

mod hull;

pub use hull::hull_triangulation;

use nalgebra::Vector3;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// A direction on the unit sphere.
///
/// `theta` is the colatitude in `[0, pi]` measured from the +z axis and
/// `phi` is the azimuth measured from the +x axis.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Direction {
    theta: f64,
    phi: f64,
}

impl Direction {
    pub fn new(theta: f64, phi: f64) -> Self {
        Self { theta, phi }
    }

    pub fn theta(&self) -> f64 {
        self.theta
    }

    pub fn phi(&self) -> f64 {
        self.phi
    }

    /// Cartesian unit vector of the direction.
    pub fn to_cartesian(&self) -> Vector3<f64> {
        Vector3::new(
            self.theta.sin() * self.phi.cos(),
            self.theta.sin() * self.phi.sin(),
            self.theta.cos(),
        )
    }
}

/// Generates `n` near-uniform directions with the golden-angle Fibonacci
/// lattice.
///
/// The polar cosines are linearly spaced from `1 - 1/n` down to `-1 + 1/n`
/// and the azimuths advance by the golden angle `pi (3 - sqrt(5))`, wrapped
/// into `(-pi, pi]`. The construction is deterministic: identical `n` always
/// yields the identical direction order, which downstream consumers rely on
/// because discretization rows and the hull triangulation are indexed by it.
pub fn fibonacci_sphere(n: usize) -> Vec<Direction> {
    let golden_angle = PI * (3.0 - 5f64.sqrt());
    let z_first = 1.0 - 1.0 / n as f64;
    let z_step = match n {
        1 => 0.0,
        _ => 2.0 * z_first / (n - 1) as f64,
    };

    (0..n)
        .map(|k| {
            let z = z_first - k as f64 * z_step;
            let mut phi = (golden_angle * k as f64).rem_euclid(2.0 * PI);
            if phi > PI {
                phi -= 2.0 * PI;
            }
            Direction::new(z.acos(), phi)
        })
        .collect()
}
