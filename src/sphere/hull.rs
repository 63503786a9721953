use nalgebra::Vector3;

const EPS: f64 = 1e-12;

/// Triangulates a set of unit-sphere points by their convex hull.
///
/// Every point of a sphere-covering set is a hull vertex, so the hull faces
/// triangulate the sphere surface. Faces are wound with outward normals.
/// The triangulation is an auxiliary output for external rendering; the
/// reconstruction itself never consumes it.
///
/// Returns an empty triangulation for fewer than four points or for
/// degenerate (coplanar) input.
pub fn hull_triangulation(points: &[Vector3<f64>]) -> Vec<[usize; 3]> {
    let Some(seed) = seed_tetrahedron(points) else {
        return Vec::new();
    };

    let interior = seed
        .iter()
        .map(|&i| points[i])
        .sum::<Vector3<f64>>()
        / 4.0;

    let mut faces: Vec<[usize; 3]> = vec![
        [seed[0], seed[1], seed[2]],
        [seed[0], seed[1], seed[3]],
        [seed[0], seed[2], seed[3]],
        [seed[1], seed[2], seed[3]],
    ]
    .into_iter()
    .map(|f| orient_outward(f, points, &interior))
    .collect();

    for p in 0..points.len() {
        if seed.contains(&p) {
            continue;
        }

        let (visible, hidden): (Vec<[usize; 3]>, Vec<[usize; 3]>) = faces
            .iter()
            .copied()
            .partition(|&[a, b, c]| signed_volume(points[a], points[b], points[c], points[p]) > EPS);
        if visible.is_empty() {
            continue;
        }

        // Horizon edges: directed edges of visible faces whose reverse lies
        // in a hidden face. An ordered set keeps the face order, and with it
        // the whole triangulation, deterministic.
        let visible_edges: std::collections::BTreeSet<(usize, usize)> = visible
            .iter()
            .flat_map(|&[a, b, c]| [(a, b), (b, c), (c, a)])
            .collect();

        faces = hidden;
        for &(u, v) in &visible_edges {
            if !visible_edges.contains(&(v, u)) {
                faces.push(orient_outward([u, v, p], points, &interior));
            }
        }
    }

    faces
}

/// Four affinely independent points to grow the hull from.
fn seed_tetrahedron(points: &[Vector3<f64>]) -> Option<[usize; 4]> {
    if points.len() < 4 {
        return None;
    }

    let i0 = 0;
    let i1 = farthest_by(points, |p| (p - points[i0]).norm())?;
    let dir = (points[i1] - points[i0]).normalize();
    let i2 = farthest_by(points, |p| {
        let d = p - points[i0];
        (d - dir * d.dot(&dir)).norm()
    })?;
    let i3 = farthest_by(points, |p| {
        signed_volume(points[i0], points[i1], points[i2], *p).abs()
    })?;

    let volume = signed_volume(points[i0], points[i1], points[i2], points[i3]).abs();
    match volume > EPS {
        true => Some([i0, i1, i2, i3]),
        false => None,
    }
}

fn farthest_by<F: Fn(&Vector3<f64>) -> f64>(points: &[Vector3<f64>], dist: F) -> Option<usize> {
    points
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| dist(a).total_cmp(&dist(b)))
        .map(|(i, _)| i)
}

/// Signed volume of the tetrahedron `(a, b, c, d)`; positive when `d` lies
/// on the positive-normal side of the face `(a, b, c)`.
fn signed_volume(a: Vector3<f64>, b: Vector3<f64>, c: Vector3<f64>, d: Vector3<f64>) -> f64 {
    (b - a).cross(&(c - a)).dot(&(d - a))
}

fn orient_outward(
    face: [usize; 3],
    points: &[Vector3<f64>],
    interior: &Vector3<f64>,
) -> [usize; 3] {
    let [a, b, c] = face;
    match signed_volume(points[a], points[b], points[c], *interior) < 0.0 {
        true => face,
        false => [a, c, b],
    }
}
