use na::{DMatrix, DVector, SymmetricEigen};
use nalgebra as na;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

use crate::error::{FeaturizationError, Result};

pub fn to_dmatrix(a: ArrayView2<f64>) -> DMatrix<f64> {
    let (rows, cols) = a.dim();
    DMatrix::from_fn(rows, cols, |i, j| a[[i, j]])
}

pub fn from_dmatrix(m: &DMatrix<f64>) -> Array2<f64> {
    Array2::from_shape_fn((m.nrows(), m.ncols()), |(i, j)| m[(i, j)])
}

/// Column means and the centred copy of `x`.
pub fn centre_columns(x: ArrayView2<f64>) -> (Array1<f64>, Array2<f64>) {
    let mean = x
        .mean_axis(Axis(0))
        .unwrap_or_else(|| Array1::zeros(x.ncols()));
    let centred = &x - &mean.view().insert_axis(Axis(0));
    (mean, centred)
}

/// Eigen-decomposition of a symmetric matrix, eigenvalues in descending order.
///
/// Returns the eigenvalues and a matrix whose columns are the eigenvectors.
pub fn symmetric_eigen(a: ArrayView2<f64>) -> (Array1<f64>, Array2<f64>) {
    let SymmetricEigen {
        eigenvalues,
        eigenvectors,
    } = SymmetricEigen::new(to_dmatrix(a));

    let mut order: Vec<usize> = (0..eigenvalues.len()).collect();
    order.sort_by(|&i, &j| eigenvalues[j].total_cmp(&eigenvalues[i]));

    let values = Array1::from_iter(order.iter().map(|&i| eigenvalues[i]));
    let vectors = Array2::from_shape_fn((eigenvectors.nrows(), order.len()), |(r, c)| {
        eigenvectors[(r, order[c])]
    });
    (values, vectors)
}

/// `(w w^T)^{-1/2} w`, making the rows of `w` orthonormal.
pub fn symmetric_decorrelation(w: ArrayView2<f64>) -> Array2<f64> {
    let (values, vectors) = symmetric_eigen(w.dot(&w.t()).view());
    let floor = f64::EPSILON * values.get(0).copied().unwrap_or(1.0).max(1.0);
    let scale = values.mapv(|v| 1.0 / v.max(floor).sqrt());
    let inv_sqrt = (&vectors * &scale.view().insert_axis(Axis(0))).dot(&vectors.t());
    inv_sqrt.dot(&w)
}

pub fn pseudo_inverse(a: ArrayView2<f64>) -> Result<Array2<f64>> {
    let inverse = to_dmatrix(a)
        .pseudo_inverse(1e-12)
        .map_err(|e| FeaturizationError::Linalg(e.to_string()))?;
    Ok(from_dmatrix(&inverse))
}

/// Solve `a x = b` for a symmetric positive definite `a`.
///
/// Returns `None` when `a` is not numerically positive definite.
pub fn solve_spd(a: DMatrix<f64>, b: &[f64]) -> Option<DVector<f64>> {
    let scale = a.diagonal().iter().fold(0.0_f64, |m, v| m.max(v.abs()));
    let cholesky = a.cholesky()?;
    let pivot = cholesky.l_dirty().diagonal().iter().fold(f64::INFINITY, |m, v| m.min(*v));
    if !(pivot * pivot > 1e-10 * scale) {
        return None;
    }
    let x = cholesky.solve(&DVector::from_column_slice(b));
    x.iter().all(|v| v.is_finite()).then_some(x)
}

pub fn squared_norms(x: ArrayView2<f64>) -> Array1<f64> {
    x.map_axis(Axis(1), |row| row.dot(&row))
}

pub fn normalize_rows(x: &mut Array2<f64>) {
    for mut row in x.rows_mut() {
        let norm = row.dot(&row).sqrt();
        if norm > 0.0 {
            row /= norm;
        }
    }
}

pub fn argmax_abs(values: ArrayView1<f64>, skip: &[usize]) -> Option<(usize, f64)> {
    values
        .iter()
        .enumerate()
        .filter(|(i, _)| !skip.contains(i))
        .map(|(i, v)| (i, v.abs()))
        .max_by(|a, b| a.1.total_cmp(&b.1))
}

#[cfg(test)]
mod test {
    use super::*;
    use ndarray::array;

    fn all_close(a: ArrayView2<f64>, b: ArrayView2<f64>, tol: f64) -> bool {
        a.shape() == b.shape() && a.iter().zip(b.iter()).all(|(x, y)| (x - y).abs() < tol)
    }

    #[test]
    fn test_eigen_is_sorted_descending() {
        let a = array![[2.0, 0.0, 0.0], [0.0, 5.0, 0.0], [0.0, 0.0, 1.0]];
        let (values, vectors) = symmetric_eigen(a.view());

        assert_eq!(values.to_vec(), vec![5.0, 2.0, 1.0]);
        assert!((vectors[[1, 0]].abs() - 1.0).abs() < 1e-12);
        assert!((vectors[[0, 1]].abs() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_symmetric_decorrelation_orthonormalises() {
        let w = array![[2.0, 1.0, 0.0], [0.5, 3.0, 1.0], [0.0, 1.0, 4.0]];
        let d = symmetric_decorrelation(w.view());
        assert!(all_close(d.dot(&d.t()).view(), Array2::eye(3).view(), 1e-9));
    }

    #[test]
    fn test_pseudo_inverse_of_square() {
        let a = array![[4.0, 7.0], [2.0, 6.0]];
        let inv = pseudo_inverse(a.view()).unwrap();
        assert!(all_close(a.dot(&inv).view(), Array2::eye(2).view(), 1e-9));
    }

    #[test]
    fn test_solve_spd() {
        let a = DMatrix::from_row_slice(2, 2, &[4.0, 1.0, 1.0, 3.0]);
        let x = solve_spd(a, &[1.0, 2.0]).unwrap();
        assert!((x[0] - 1.0 / 11.0).abs() < 1e-12);
        assert!((x[1] - 7.0 / 11.0).abs() < 1e-12);

        let singular = DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 1.0, 1.0]);
        assert!(solve_spd(singular, &[1.0, 1.0]).is_none());
    }

    #[test]
    fn test_centre_columns() {
        let x = array![[1.0, 10.0], [3.0, 20.0]];
        let (mean, centred) = centre_columns(x.view());
        assert_eq!(mean.to_vec(), vec![2.0, 15.0]);
        assert_eq!(centred, array![[-1.0, -5.0], [1.0, 5.0]]);
    }
}
