//! Orthogonal matching pursuit against a unit-norm dictionary.
//!
//! Uses the precomputed Gram matrix `G = D D^T` so that each greedy step only
//! needs the initial correlations `D x` and a small Cholesky solve over the
//! selected atoms.

use na::DMatrix;
use nalgebra as na;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

#[cfg(feature = "parallel")]
use rayon::prelude::{IntoParallelRefIterator, ParallelIterator};

use crate::error::Result;
use crate::linalg::{argmax_abs, solve_spd};

/// Correlations below this are treated as a perfect reconstruction.
const RESIDUAL_FLOOR: f64 = 1e-12;

pub fn gram(dictionary: ArrayView2<f64>) -> Array2<f64> {
    dictionary.dot(&dictionary.t())
}

/// Sparse code of one signal with at most `active` non-zero entries.
pub fn encode_one(
    x: ArrayView1<f64>,
    dictionary: ArrayView2<f64>,
    gram: ArrayView2<f64>,
    active: usize,
) -> Array1<f64> {
    let atoms = dictionary.nrows();
    let correlations = dictionary.dot(&x);
    let mut residual = correlations.clone();
    let mut selected: Vec<usize> = Vec::with_capacity(active);
    let mut coefficients: Vec<f64> = Vec::new();

    while selected.len() < active.min(atoms) {
        let Some((atom, strength)) = argmax_abs(residual.view(), &selected) else {
            break;
        };
        if strength < RESIDUAL_FLOOR {
            break;
        }
        selected.push(atom);

        let k = selected.len();
        let sub_gram = DMatrix::from_fn(k, k, |i, j| gram[[selected[i], selected[j]]]);
        let rhs: Vec<f64> = selected.iter().map(|&i| correlations[i]).collect();
        let Some(solution) = solve_spd(sub_gram, &rhs) else {
            // the new atom is linearly dependent on the ones already chosen
            selected.pop();
            break;
        };
        coefficients = solution.iter().copied().collect();

        residual.assign(&correlations);
        for (&idx, &coef) in selected.iter().zip(coefficients.iter()) {
            residual.scaled_add(-coef, &gram.row(idx));
        }
    }

    let mut code = Array1::zeros(atoms);
    for (&idx, &coef) in selected.iter().zip(coefficients.iter()) {
        code[idx] = coef;
    }
    code
}

/// Sparse codes of every row of `x`, one row per signal.
pub fn encode(
    x: ArrayView2<f64>,
    dictionary: ArrayView2<f64>,
    gram: ArrayView2<f64>,
    active: usize,
) -> Result<Array2<f64>> {
    let rows: Vec<ArrayView1<f64>> = x.rows().into_iter().collect();
    let fx = |row: &ArrayView1<f64>| encode_one(row.view(), dictionary, gram, active);

    #[cfg(not(feature = "parallel"))]
    let codes: Vec<Array1<f64>> = rows.iter().map(fx).collect();

    #[cfg(feature = "parallel")]
    let codes: Vec<Array1<f64>> = rows.par_iter().map(fx).collect();

    let atoms = dictionary.nrows();
    let flat: Vec<f64> = codes.iter().flat_map(|c| c.iter().copied()).collect();
    Ok(Array2::from_shape_vec((x.nrows(), atoms), flat)?)
}

#[cfg(test)]
mod test {
    use super::*;
    use ndarray::array;

    use crate::linalg::normalize_rows;

    fn dictionary() -> Array2<f64> {
        let mut d = array![
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
            [1.0, 1.0, 0.0, 0.0],
            [0.0, 1.0, 1.0, 1.0],
        ];
        normalize_rows(&mut d);
        d
    }

    #[test]
    fn test_exact_single_atom() {
        let d = dictionary();
        let g = gram(d.view());
        let x = array![0.0, 0.0, 3.0, 0.0];
        let code = encode_one(x.view(), d.view(), g.view(), 2);

        assert!((code[2] - 3.0).abs() < 1e-12);
        assert_eq!(code.iter().filter(|v| **v != 0.0).count(), 1);
    }

    #[test]
    fn test_sparsity_budget_is_respected() {
        let d = dictionary();
        let g = gram(d.view());
        let x = array![0.3, -1.2, 0.7, 2.0];

        for active in 1..=4 {
            let code = encode_one(x.view(), d.view(), g.view(), active);
            assert!(code.iter().filter(|v| **v != 0.0).count() <= active);
        }
    }

    #[test]
    fn test_full_budget_reconstructs() {
        let d = dictionary();
        let g = gram(d.view());
        let x = array![0.3, -1.2, 0.7, 2.0];
        let code = encode_one(x.view(), d.view(), g.view(), 4);
        let reconstruction = d.t().dot(&code);

        for (a, b) in reconstruction.iter().zip(x.iter()) {
            assert!((a - b).abs() < 1e-9);
        }
    }

    #[test]
    fn test_zero_signal_has_zero_code() {
        let d = dictionary();
        let g = gram(d.view());
        let code = encode_one(Array1::zeros(4).view(), d.view(), g.view(), 3);
        assert!(code.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_batch_matches_single() {
        let d = dictionary();
        let g = gram(d.view());
        let x = array![[0.3, -1.2, 0.7, 2.0], [1.0, 1.0, 0.0, 0.0], [0.0, 0.0, 0.0, 0.0]];
        let codes = encode(x.view(), d.view(), g.view(), 2).unwrap();

        assert_eq!(codes.dim(), (3, 6));
        for (row, code) in x.rows().into_iter().zip(codes.rows()) {
            assert_eq!(encode_one(row, d.view(), g.view(), 2), code);
        }
    }
}
