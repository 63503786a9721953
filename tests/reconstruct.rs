use nalgebra::DVector;
use spindle::basis::AngularBasis;
use spindle::field::{DistributionField, IntensityField, Mask};
use spindle::harmonic::real_sph_harm;
use spindle::recon::{FieldReconstructor, ReconMode, Reconstructor};
use spindle::solver::SolverSettings;
use spindle::system::SystemMatrix;

/// Four orthogonal synthetic response functions: the harmonic basis
/// functions themselves, so the system matrix rows are unit vectors.
fn responses() -> Vec<Box<dyn Fn(f64, f64) -> f64 + Send + Sync>> {
    [(0, 0), (2, -2), (2, 0), (2, 2)]
        .into_iter()
        .map(|(l, m)| {
            Box::new(move |theta: f64, phi: f64| real_sph_harm(l, m, theta, phi).unwrap())
                as Box<dyn Fn(f64, f64) -> f64 + Send + Sync>
        })
        .collect()
}

fn reconstructor() -> Reconstructor {
    let system = SystemMatrix::from_configurations(&responses(), 4);
    let basis = AngularBasis::new(100, 4);
    let settings = SolverSettings {
        eps_abs: 1e-10,
        eps_rel: 1e-10,
        max_iterations: 500_000,
        ..Default::default()
    };
    Reconstructor::new(system, basis, settings).unwrap()
}

#[test]
fn single_voxel_recovery() {
    let recon = reconstructor();
    assert_eq!(recon.system().matrix().shape(), (4, 15));
    assert_eq!(recon.basis().n_samples(), 100);

    let g = DVector::from_vec(vec![1.0, 0.0, 0.0, 0.0]);
    let dist = recon.reconstruct(&g, ReconMode::Constrained).unwrap();

    // The forward prediction of the recovered density matches the
    // measurement and its sampled density is physical everywhere.
    let predicted = recon.system().predict(dist.coefficients()).unwrap();
    assert!((predicted - &g).norm() < 1e-6);

    let f = dist.sample(recon.basis()).unwrap();
    assert_eq!(f.len(), 100);
    assert!(f.iter().all(|&x| x >= -1e-9));
}

#[test]
fn masked_field_recovery() {
    let recon = reconstructor();

    // Two voxels carry signal, the rest stay outside the mask.
    let dims = (3, 2, 2);
    let marked = [(0, 1, 1), (2, 0, 0)];
    let intensities = IntensityField::from_fn(dims, 4, |x, y, z| {
        match marked.contains(&(x, y, z)) {
            true => vec![1.0, 0.1, 0.0, 0.05],
            false => vec![0.0; 4],
        }
    })
    .unwrap();
    let mask = Mask::from_fn(dims, |x, y, z| marked.contains(&(x, y, z)));

    let result = FieldReconstructor::new(&recon, ReconMode::Constrained)
        .reconstruct(&intensities, &mask)
        .unwrap();

    assert!(result.failures().is_empty());
    assert!(!result.cancelled());
    assert_eq!(result.solved(), 2);

    for (x, y, z) in marked {
        let sh = DVector::from_column_slice(result.field().coefficients(x, y, z).unwrap());
        let predicted = recon.system().predict(&sh).unwrap();
        let g = DVector::from_column_slice(intensities.intensities(x, y, z).unwrap());
        assert!((predicted - g).norm() < 1e-6);
    }

    // Unmasked voxels stay empty.
    assert!(
        result
            .field()
            .coefficients(1, 0, 0)
            .unwrap()
            .iter()
            .all(|&c| c == 0.0)
    );
}

#[test]
fn prior_mode_finds_the_planted_direction() {
    let recon = reconstructor();

    // Measure a spike at one lattice direction and let the dictionary
    // search recover it.
    let mut f = DVector::zeros(100);
    f[42] = 0.5;
    let sh = recon.basis().project(&f).unwrap();
    let g = recon.system().predict(&sh).unwrap();

    let dist = recon
        .reconstruct(&g, ReconMode::SingleDirectionPrior)
        .unwrap();
    let predicted = recon.system().predict(dist.coefficients()).unwrap();

    // The prior mode matches intensity patterns up to scale.
    let scale = g.amax() / predicted.amax();
    assert!((scale * predicted - g).norm() < 1e-8);
}

#[test]
fn field_round_trips_through_the_forward_model() {
    let recon = reconstructor();

    // Feasible planted voxels: dominant monopole with mild anisotropy.
    let field = DistributionField::from_fn((2, 1, 1), 15, |x, _, _| match x {
        0 => vec![1.0, 0.0, 0.0, 0.1, 0.0, 0.05],
        _ => vec![0.5, 0.02, 0.0, 0.0, 0.03, 0.0],
    })
    .unwrap();

    let predicted = recon.system().predict_field(&field).unwrap();
    let mask = Mask::filled((2, 1, 1), true);
    let result = FieldReconstructor::new(&recon, ReconMode::Constrained)
        .reconstruct(&predicted, &mask)
        .unwrap();

    assert!(result.failures().is_empty());
    for x in 0..2 {
        let sh = DVector::from_column_slice(result.field().coefficients(x, 0, 0).unwrap());
        let back = recon.system().predict(&sh).unwrap();
        let expect = DVector::from_column_slice(predicted.intensities(x, 0, 0).unwrap());
        assert!((back - expect).norm() < 1e-6);
    }
}
