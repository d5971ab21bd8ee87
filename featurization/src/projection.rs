use ndarray::{Array1, Array2, ArrayView1, Axis};
use rand::rngs::StdRng;
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};

use crate::error::{FeaturizationError, Result};

/// Fixed gaussian random projection with unit-length columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomProjection {
    /// `[input_dimension, output_dimension]`
    pub matrix: Array2<f64>,
}

impl RandomProjection {
    pub fn generate(input_dimension: usize, output_dimension: usize, rng: &mut StdRng) -> Self {
        let mut matrix: Array2<f64> = Array2::from_shape_simple_fn((input_dimension, output_dimension), || {
            StandardNormal.sample(rng)
        });
        for mut column in matrix.axis_iter_mut(Axis(1)) {
            let norm = column.dot(&column).sqrt();
            if norm > 0.0 {
                column /= norm;
            }
        }
        Self { matrix }
    }

    pub fn input_dimension(&self) -> usize {
        self.matrix.nrows()
    }

    pub fn output_dimension(&self) -> usize {
        self.matrix.ncols()
    }

    pub fn project(&self, v: ArrayView1<f64>) -> Result<Array1<f64>> {
        if v.len() != self.input_dimension() {
            return Err(FeaturizationError::InvalidShape(format!(
                "projection expects length {}, got {}",
                self.input_dimension(),
                v.len()
            )));
        }
        Ok(v.dot(&self.matrix))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_columns_have_unit_length() {
        let mut rng = StdRng::seed_from_u64(12);
        let projection = RandomProjection::generate(50, 7, &mut rng);
        assert_eq!(projection.matrix.dim(), (50, 7));
        for column in projection.matrix.columns() {
            assert!((column.dot(&column) - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_same_seed_same_matrix() {
        let a = RandomProjection::generate(10, 3, &mut StdRng::seed_from_u64(1));
        let b = RandomProjection::generate(10, 3, &mut StdRng::seed_from_u64(1));
        assert_eq!(a, b);
    }

    #[test]
    fn test_project_length() {
        let projection = RandomProjection::generate(10, 4, &mut StdRng::seed_from_u64(0));
        let v = Array1::from_elem(10, 0.5);
        assert_eq!(projection.project(v.view()).unwrap().len(), 4);
        assert!(matches!(
            projection.project(Array1::zeros(3).view()),
            Err(FeaturizationError::InvalidShape(_))
        ));
    }
}
