use ndarray::{Array1, Array2, ArrayView2, Axis};
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Encoder, FittedDictionary};
use crate::error::{FeaturizationError, Result};
use crate::linalg::{normalize_rows, squared_norms};

/// Outcome of one k-means run.
#[derive(Debug, Clone)]
pub struct Clustering {
    pub centres: Array2<f64>,
    /// Sum of squared distances from every sample to its nearest centre.
    pub distortion: f64,
    pub iterations: usize,
}

/// Squared euclidean distances `[samples, centres]`.
fn squared_distances(x: ArrayView2<f64>, x_norms: &Array1<f64>, centres: ArrayView2<f64>) -> Array2<f64> {
    let c_norms = squared_norms(centres);
    let mut d = x.dot(&centres.t()) * -2.0;
    d += &x_norms.view().insert_axis(Axis(1));
    d += &c_norms.view().insert_axis(Axis(0));
    d.mapv_inplace(|v| v.max(0.0));
    d
}

fn nearest(distances: &Array2<f64>) -> (Vec<usize>, Vec<f64>) {
    distances
        .rows()
        .into_iter()
        .map(|row| {
            row.iter()
                .enumerate()
                .fold((0, f64::INFINITY), |best, (j, &d)| if d < best.1 { (j, d) } else { best })
        })
        .unzip()
}

/// k-means++ seeding.
fn seed_centres(x: ArrayView2<f64>, x_norms: &Array1<f64>, k: usize, rng: &mut StdRng) -> Array2<f64> {
    let n = x.nrows();
    let first = rng.gen_range(0..n);
    let mut chosen = vec![first];
    let mut closest = squared_distances(x, x_norms, x.row(first).insert_axis(Axis(0)))
        .column(0)
        .to_owned();

    while chosen.len() < k {
        let next = match WeightedIndex::new(closest.iter().copied()) {
            Ok(weights) => weights.sample(rng),
            // every sample already coincides with a centre
            Err(_) => rng.gen_range(0..n),
        };
        chosen.push(next);
        let d = squared_distances(x, x_norms, x.row(next).insert_axis(Axis(0)));
        closest.zip_mut_with(&d.column(0), |c, &v| *c = c.min(v));
    }

    x.select(Axis(0), &chosen)
}

fn lloyd(x: ArrayView2<f64>, x_norms: &Array1<f64>, mut centres: Array2<f64>, max_iterations: usize) -> Clustering {
    let n = x.nrows();
    let k = centres.nrows();
    let mut labels = vec![usize::MAX; n];
    let mut iterations = 0;

    for _ in 0..max_iterations {
        let (next, mins) = nearest(&squared_distances(x, x_norms, centres.view()));
        if next == labels {
            break;
        }
        labels = next;
        iterations += 1;

        let mut sums = Array2::<f64>::zeros(centres.raw_dim());
        let mut counts = vec![0usize; k];
        for (i, &label) in labels.iter().enumerate() {
            let mut row = sums.row_mut(label);
            row += &x.row(i);
            counts[label] += 1;
        }

        // empty clusters take over the worst-served samples
        let mut worst: Vec<usize> = (0..n).collect();
        worst.sort_by(|&a, &b| mins[b].total_cmp(&mins[a]));
        let mut spare = worst.into_iter();

        for j in 0..k {
            if counts[j] > 0 {
                centres.row_mut(j).assign(&(&sums.row(j) / counts[j] as f64));
            } else if let Some(i) = spare.next() {
                centres.row_mut(j).assign(&x.row(i));
            }
        }
    }

    let (_, mins) = nearest(&squared_distances(x, x_norms, centres.view()));
    Clustering {
        centres,
        distortion: mins.iter().sum(),
        iterations,
    }
}

/// Best of `restarts` k-means runs by distortion.
pub fn kmeans(
    x: ArrayView2<f64>,
    k: usize,
    restarts: usize,
    max_iterations: usize,
    rng: &mut StdRng,
) -> Result<Clustering> {
    if k == 0 || x.nrows() < k {
        return Err(FeaturizationError::InvalidShape(format!(
            "{} training samples cannot seed {} clusters",
            x.nrows(),
            k
        )));
    }

    let x_norms = squared_norms(x);
    let mut best: Option<Clustering> = None;
    for run in 0..restarts.max(1) {
        let seeds = seed_centres(x, &x_norms, k, rng);
        let clustering = lloyd(x, &x_norms, seeds, max_iterations);
        debug!(run, distortion = clustering.distortion, iterations = clustering.iterations, "k-means run");

        if best.as_ref().map_or(true, |b| clustering.distortion < b.distortion) {
            best = Some(clustering);
        }
    }
    best.ok_or(FeaturizationError::NoPatches)
}

/// Unit-length k-means centres as OMP atoms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterDictionary {
    pub size: usize,
    pub restarts: usize,
    pub active: usize,
    pub max_iterations: usize,
    fitted: Option<FittedDictionary>,
}

impl ClusterDictionary {
    pub fn new(size: usize, restarts: usize, active: usize, max_iterations: usize) -> Self {
        Self {
            size,
            restarts,
            active,
            max_iterations,
            fitted: None,
        }
    }

    pub fn dictionary(&self) -> Option<&FittedDictionary> {
        self.fitted.as_ref()
    }
}

impl Encoder for ClusterDictionary {
    fn fit(&mut self, patches: ArrayView2<f64>, rng: &mut StdRng) -> Result<()> {
        let clustering = kmeans(patches, self.size, self.restarts, self.max_iterations, rng)?;
        let mut centres = clustering.centres;
        normalize_rows(&mut centres);
        self.fitted = Some(FittedDictionary::new(centres));
        Ok(())
    }

    fn encode(&self, patches: ArrayView2<f64>) -> Result<Array2<f64>> {
        self.fitted
            .as_ref()
            .ok_or(FeaturizationError::NotFitted)?
            .encode(patches, self.active)
    }

    fn atoms(&self) -> usize {
        self.size
    }

    fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }

    fn patch_space_atoms(&self) -> Result<Array2<f64>> {
        Ok(self
            .fitted
            .as_ref()
            .ok_or(FeaturizationError::NotFitted)?
            .atoms
            .clone())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use num::Signed;
    use rand::SeedableRng;
    use std::fmt::Debug;

    fn all_close<T, I>(a: T, b: T, tol: I) -> bool
    where
        T: Clone + IntoIterator<Item = I> + Debug,
        I: Signed + PartialOrd,
    {
        a.into_iter().zip(b).map(|(x, y)| (x - y).abs()).all(|x| x < tol)
    }

    fn blobs(rng: &mut StdRng) -> Array2<f64> {
        let centres = [[5.0, 0.0, 0.0], [0.0, 5.0, 0.0], [0.0, 0.0, 5.0]];
        Array2::from_shape_fn((90, 3), |(i, j)| centres[i % 3][j] + rng.gen_range(-0.1..0.1))
    }

    #[test]
    fn test_kmeans_finds_blob_centres() {
        let mut rng = StdRng::seed_from_u64(7);
        let x = blobs(&mut rng);
        let clustering = kmeans(x.view(), 3, 3, 100, &mut rng).unwrap();

        assert!(clustering.distortion < 90.0 * 3.0 * 0.01);
        for expected in [[5.0, 0.0, 0.0], [0.0, 5.0, 0.0], [0.0, 0.0, 5.0]] {
            let found = clustering
                .centres
                .rows()
                .into_iter()
                .any(|c| all_close(c.to_vec(), expected.to_vec(), 0.1));
            assert!(found, "no centre near {:?}", expected);
        }
    }

    #[test]
    fn test_kmeans_rejects_too_few_samples() {
        let mut rng = StdRng::seed_from_u64(0);
        let x = Array2::<f64>::zeros((2, 3));
        assert!(matches!(
            kmeans(x.view(), 3, 1, 10, &mut rng),
            Err(FeaturizationError::InvalidShape(_))
        ));
    }

    #[test]
    fn test_identical_samples_do_not_stall_seeding() {
        let mut rng = StdRng::seed_from_u64(0);
        let x = Array2::<f64>::ones((10, 2));
        let clustering = kmeans(x.view(), 4, 2, 10, &mut rng).unwrap();
        assert_eq!(clustering.centres.dim(), (4, 2));
        assert_eq!(clustering.distortion, 0.0);
    }

    #[test]
    fn test_cluster_dictionary_lifecycle() {
        let mut rng = StdRng::seed_from_u64(1);
        let x = blobs(&mut rng);
        let mut dictionary = ClusterDictionary::new(3, 2, 1, 50);

        assert!(matches!(dictionary.encode(x.view()), Err(FeaturizationError::NotFitted)));

        dictionary.fit(x.view(), &mut rng).unwrap();
        let atoms = dictionary.patch_space_atoms().unwrap();
        for row in atoms.rows() {
            assert!((row.dot(&row) - 1.0).abs() < 1e-12);
        }

        let codes = dictionary.encode(x.view()).unwrap();
        assert_eq!(codes.dim(), (90, 3));
        for row in codes.rows() {
            assert_eq!(row.iter().filter(|v| **v != 0.0).count(), 1);
        }

        let wrong = Array2::<f64>::zeros((1, 4));
        assert!(matches!(dictionary.encode(wrong.view()), Err(FeaturizationError::InvalidShape(_))));
    }

    #[test]
    fn test_refit_replaces_previous_dictionary() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut dictionary = ClusterDictionary::new(2, 1, 1, 20);

        let first = Array2::from_shape_fn((20, 2), |(i, _)| if i % 2 == 0 { 1.0 } else { -1.0 });
        dictionary.fit(first.view(), &mut rng).unwrap();
        let before = dictionary.patch_space_atoms().unwrap();

        let second = Array2::from_shape_fn((20, 2), |(i, j)| if (i + j) % 2 == 0 { 3.0 } else { 0.0 });
        dictionary.fit(second.view(), &mut rng).unwrap();
        let after = dictionary.patch_space_atoms().unwrap();

        assert_ne!(before, after);
    }
}
