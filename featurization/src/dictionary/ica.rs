use ndarray::{Array1, Array2, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{FeaturizationError, Result};
use crate::linalg::{centre_columns, pseudo_inverse, symmetric_decorrelation, symmetric_eigen};

const ICA_MAX_ITERATIONS: usize = 200;
const ICA_TOLERANCE: f64 = 1e-4;
/// Relative eigenvalue floor; centred patches always have one null direction.
const EIGEN_FLOOR: f64 = 1e-8;

/// PCA whitening: zero mean, unit variance, decorrelated components.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Whitener {
    pub mean: Array1<f64>,
    /// `[components, dimension]`
    pub transform: Array2<f64>,
    /// `[dimension, components]`, maps whitened data back.
    pub inverse: Array2<f64>,
}

impl Whitener {
    pub fn fit(x: ArrayView2<f64>, components: usize) -> Result<Self> {
        let (n, dim) = x.dim();
        if n < 2 {
            return Err(FeaturizationError::NoPatches);
        }
        if components == 0 || components > dim {
            return Err(FeaturizationError::InvalidShape(format!(
                "cannot whiten {} dimensions into {} components",
                dim, components
            )));
        }

        let (mean, centred) = centre_columns(x);
        let covariance = centred.t().dot(&centred) / n as f64;
        let (values, vectors) = symmetric_eigen(covariance.view());

        let floor = EIGEN_FLOOR * values[0].max(f64::MIN_POSITIVE);
        let mut transform = Array2::zeros((components, dim));
        let mut inverse = Array2::zeros((dim, components));
        for c in 0..components {
            let std = values[c].max(floor).sqrt();
            let vector = vectors.column(c);
            transform.row_mut(c).assign(&(&vector / std));
            inverse.column_mut(c).assign(&(&vector * std));
        }

        Ok(Self {
            mean,
            transform,
            inverse,
        })
    }

    pub fn components(&self) -> usize {
        self.transform.nrows()
    }

    pub fn apply(&self, x: ArrayView2<f64>) -> Array2<f64> {
        (&x - &self.mean.view().insert_axis(Axis(0))).dot(&self.transform.t())
    }

    pub fn invert(&self, z: ArrayView2<f64>) -> Array2<f64> {
        z.dot(&self.inverse.t()) + &self.mean.view().insert_axis(Axis(0))
    }
}

/// First stage of the cascade: independent components of the patches.
///
/// Sources are `s = unmixing (x - mean)`; `mixing` is the pseudo-inverse
/// of `unmixing` and holds the learned basis patches in its columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IcaStage {
    pub mean: Array1<f64>,
    /// `[components, dimension]`
    pub unmixing: Array2<f64>,
    /// `[dimension, components]`
    pub mixing: Array2<f64>,
}

impl IcaStage {
    /// Symmetric FastICA with the `tanh` contrast function.
    pub fn fit(x: ArrayView2<f64>, components: usize, rng: &mut StdRng) -> Result<Self> {
        let whitener = Whitener::fit(x, components)?;
        let z = whitener.apply(x);
        let n = z.nrows() as f64;

        let init: Array2<f64> = Array2::from_shape_simple_fn((components, components), || StandardNormal.sample(rng));
        let mut w = symmetric_decorrelation(init.view());

        let mut converged = false;
        for iteration in 0..ICA_MAX_ITERATIONS {
            let projected = z.dot(&w.t());
            let g = projected.mapv(f64::tanh);
            let g_prime_mean = g.mapv(|v| 1.0 - v * v).mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(components));

            let update = g.t().dot(&z) / n - &(&w * &g_prime_mean.view().insert_axis(Axis(1)));
            let next = symmetric_decorrelation(update.view());

            let change = next
                .rows()
                .into_iter()
                .zip(w.rows())
                .map(|(a, b)| (a.dot(&b).abs() - 1.0).abs())
                .fold(0.0, f64::max);
            w = next;

            if change < ICA_TOLERANCE {
                debug!(iteration, change, "FastICA converged");
                converged = true;
                break;
            }
        }
        if !converged {
            debug!(iterations = ICA_MAX_ITERATIONS, "FastICA stopped before converging");
        }

        let unmixing = w.dot(&whitener.transform);
        let mixing = pseudo_inverse(unmixing.view())?;

        Ok(Self {
            mean: whitener.mean,
            unmixing,
            mixing,
        })
    }

    pub fn components(&self) -> usize {
        self.unmixing.nrows()
    }

    pub fn dimension(&self) -> usize {
        self.unmixing.ncols()
    }

    pub fn transform(&self, x: ArrayView2<f64>) -> Array2<f64> {
        (&x - &self.mean.view().insert_axis(Axis(0))).dot(&self.unmixing.t())
    }
}
