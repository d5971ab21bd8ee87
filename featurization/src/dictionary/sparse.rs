//! Online dictionary learning with OMP as the sparse coder.
//!
//! Each iteration codes a random mini-batch, accumulates the sufficient
//! statistics `A = sum(a a^T)` and `B = sum(x a^T)`, and refreshes every atom
//! by block coordinate descent. Atoms are kept at unit length throughout.

use ndarray::{Array2, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};
use tracing::debug;

use super::omp;
use crate::error::{FeaturizationError, Result};
use crate::linalg::normalize_rows;

pub const BATCH_SIZE: usize = 256;
/// Atoms used less than this, in accumulated squared coefficient, are reseeded.
const DEAD_ATOM: f64 = 1e-10;

/// Learns `atoms` unit-norm rows over the columns of `x`.
pub fn learn_dictionary(
    x: ArrayView2<f64>,
    atoms: usize,
    active: usize,
    iterations: usize,
    rng: &mut StdRng,
) -> Result<Array2<f64>> {
    let (n, dim) = x.dim();
    if n == 0 {
        return Err(FeaturizationError::NoPatches);
    }
    if atoms == 0 || dim == 0 {
        return Err(FeaturizationError::InvalidShape(format!(
            "cannot learn {} atoms of dimension {}",
            atoms, dim
        )));
    }

    let mut dictionary = initial_atoms(x, atoms, rng);
    let mut a = Array2::<f64>::zeros((atoms, atoms));
    let mut b = Array2::<f64>::zeros((dim, atoms));
    let batch_size = BATCH_SIZE.min(n);

    for iteration in 0..iterations {
        let picks: Vec<usize> = (0..batch_size).map(|_| rng.gen_range(0..n)).collect();
        let batch = x.select(Axis(0), &picks);

        let gram = omp::gram(dictionary.view());
        let codes = omp::encode(batch.view(), dictionary.view(), gram.view(), active)?;
        a += &codes.t().dot(&codes);
        b += &batch.t().dot(&codes);

        let mut reseeded = 0;
        for j in 0..atoms {
            let weight = a[[j, j]];
            if weight < DEAD_ATOM {
                let donor = batch.row(rng.gen_range(0..batch_size));
                if donor.dot(&donor) > 0.0 {
                    dictionary.row_mut(j).assign(&donor);
                    reseeded += 1;
                }
            } else {
                let mut update = &b.column(j) - &dictionary.t().dot(&a.column(j));
                update /= weight;
                update += &dictionary.row(j);
                dictionary.row_mut(j).assign(&update);
            }
            let mut row = dictionary.row_mut(j);
            let norm = row.dot(&row).sqrt();
            if norm > 0.0 {
                row /= norm;
            }
        }

        if reseeded > 0 {
            debug!(iteration, reseeded, "reseeded unused atoms");
        }
    }

    Ok(dictionary)
}

/// Random training samples, with gaussian directions standing in for zero rows.
fn initial_atoms(x: ArrayView2<f64>, atoms: usize, rng: &mut StdRng) -> Array2<f64> {
    let n = x.nrows();
    let picks: Vec<usize> = if n >= atoms {
        rand::seq::index::sample(rng, n, atoms).into_vec()
    } else {
        (0..atoms).map(|_| rng.gen_range(0..n)).collect()
    };

    let mut dictionary = x.select(Axis(0), &picks);
    for mut row in dictionary.rows_mut() {
        if row.dot(&row) == 0.0 {
            row.map_inplace(|v| *v = StandardNormal.sample(rng));
        }
    }
    normalize_rows(&mut dictionary);
    dictionary
}
