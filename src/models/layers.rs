//! Dense building blocks with hand-written backward passes.
//!
//! All activations are row-major sequences: a `(rows × width)` matrix holds one
//! time step (or one pooled vector) per row. Every layer keeps its parameters
//! as `DMatrix<f64>` so the optimizer and the checkpoint code can treat the
//! whole model as a flat, ordered list of tensors.

use nalgebra::DMatrix;
use rand::Rng;
use rand_distr::{Distribution, Normal};

use crate::error::AppError;

const LAYER_NORM_EPS: f64 = 1e-5;

/// Xavier/Glorot normal initialization.
pub fn xavier<R: Rng>(rows: usize, cols: usize, rng: &mut R) -> Result<DMatrix<f64>, AppError> {
    let std = (2.0 / (rows + cols) as f64).sqrt();
    let normal = Normal::new(0.0, std)
        .map_err(|e| AppError::numeric(format!("Invalid init distribution: {e}")))?;
    Ok(DMatrix::from_fn(rows, cols, |_, _| normal.sample(&mut *rng)))
}

/// Sum each column into a `1 × cols` matrix.
pub fn column_sums(m: &DMatrix<f64>) -> DMatrix<f64> {
    DMatrix::from_fn(1, m.ncols(), |_, c| m.column(c).sum())
}

pub fn relu(m: &DMatrix<f64>) -> DMatrix<f64> {
    m.map(|x| x.max(0.0))
}

/// Gate `grad` by the sign of the pre-activation.
pub fn relu_backward(pre: &DMatrix<f64>, grad: &DMatrix<f64>) -> DMatrix<f64> {
    grad.zip_map(pre, |g, x| if x > 0.0 { g } else { 0.0 })
}

/// Affine map `y = x W + b` with `W: in × out`, `b: 1 × out`.
#[derive(Debug, Clone, PartialEq)]
pub struct Linear {
    pub weight: DMatrix<f64>,
    pub bias: DMatrix<f64>,
}

impl Linear {
    pub fn new<R: Rng>(input: usize, output: usize, rng: &mut R) -> Result<Self, AppError> {
        Ok(Self {
            weight: xavier(input, output, rng)?,
            bias: DMatrix::zeros(1, output),
        })
    }

    pub fn zeros_like(&self) -> Self {
        Self {
            weight: DMatrix::zeros(self.weight.nrows(), self.weight.ncols()),
            bias: DMatrix::zeros(1, self.bias.ncols()),
        }
    }

    pub fn forward(&self, x: &DMatrix<f64>) -> DMatrix<f64> {
        let mut y = x * &self.weight;
        for (mut col, b) in y.column_iter_mut().zip(self.bias.iter()) {
            col.add_scalar_mut(*b);
        }
        y
    }

    /// Accumulate parameter gradients into `grad` and return `dL/dx`.
    pub fn backward(&self, x: &DMatrix<f64>, dy: &DMatrix<f64>, grad: &mut Linear) -> DMatrix<f64> {
        grad.weight += x.transpose() * dy;
        grad.bias += column_sums(dy);
        dy * self.weight.transpose()
    }

    pub fn tensors(&self) -> Vec<&DMatrix<f64>> {
        vec![&self.weight, &self.bias]
    }

    pub fn tensors_mut(&mut self) -> Vec<&mut DMatrix<f64>> {
        vec![&mut self.weight, &mut self.bias]
    }
}

/// Row-wise layer normalization with learned gain and shift.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerNorm {
    pub gamma: DMatrix<f64>,
    pub beta: DMatrix<f64>,
}

/// Forward intermediates needed by [`LayerNorm::backward`].
#[derive(Debug, Clone)]
pub struct LayerNormCache {
    x_hat: DMatrix<f64>,
    inv_std: Vec<f64>,
}

impl LayerNorm {
    pub fn new(width: usize) -> Self {
        Self {
            gamma: DMatrix::from_element(1, width, 1.0),
            beta: DMatrix::zeros(1, width),
        }
    }

    pub fn zeros_like(&self) -> Self {
        Self {
            gamma: DMatrix::zeros(1, self.gamma.ncols()),
            beta: DMatrix::zeros(1, self.beta.ncols()),
        }
    }

    pub fn forward(&self, x: &DMatrix<f64>) -> (DMatrix<f64>, LayerNormCache) {
        let (rows, width) = x.shape();
        let n = width as f64;
        let mut x_hat = DMatrix::zeros(rows, width);
        let mut inv_std = Vec::with_capacity(rows);

        for r in 0..rows {
            let row = x.row(r);
            let mean = row.sum() / n;
            let var = row.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
            let inv = 1.0 / (var + LAYER_NORM_EPS).sqrt();
            for c in 0..width {
                x_hat[(r, c)] = (x[(r, c)] - mean) * inv;
            }
            inv_std.push(inv);
        }

        let y = DMatrix::from_fn(rows, width, |r, c| {
            x_hat[(r, c)] * self.gamma[(0, c)] + self.beta[(0, c)]
        });
        (y, LayerNormCache { x_hat, inv_std })
    }

    pub fn backward(
        &self,
        cache: &LayerNormCache,
        dy: &DMatrix<f64>,
        grad: &mut LayerNorm,
    ) -> DMatrix<f64> {
        let (rows, width) = dy.shape();
        let n = width as f64;
        let mut dx = DMatrix::zeros(rows, width);

        for r in 0..rows {
            let mut sum_dxh = 0.0;
            let mut sum_dxh_xh = 0.0;
            for c in 0..width {
                let g = dy[(r, c)];
                let xh = cache.x_hat[(r, c)];
                grad.gamma[(0, c)] += g * xh;
                grad.beta[(0, c)] += g;
                let dxh = g * self.gamma[(0, c)];
                sum_dxh += dxh;
                sum_dxh_xh += dxh * xh;
            }
            let inv = cache.inv_std[r];
            for c in 0..width {
                let dxh = dy[(r, c)] * self.gamma[(0, c)];
                let xh = cache.x_hat[(r, c)];
                dx[(r, c)] = inv / n * (n * dxh - sum_dxh - xh * sum_dxh_xh);
            }
        }
        dx
    }

    pub fn tensors(&self) -> Vec<&DMatrix<f64>> {
        vec![&self.gamma, &self.beta]
    }

    pub fn tensors_mut(&mut self) -> Vec<&mut DMatrix<f64>> {
        vec![&mut self.gamma, &mut self.beta]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn linear_adds_bias_per_column() {
        let layer = Linear {
            weight: DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 0.0, 2.0]),
            bias: DMatrix::from_row_slice(1, 2, &[0.5, -1.0]),
        };
        let x = DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 3.0, -1.0]);
        let y = layer.forward(&x);
        assert_eq!(y, DMatrix::from_row_slice(2, 2, &[1.5, 1.0, 3.5, -3.0]));
    }

    #[test]
    fn layer_norm_rows_have_zero_mean_unit_variance() {
        let norm = LayerNorm::new(4);
        let x = DMatrix::from_row_slice(2, 4, &[1.0, 2.0, 3.0, 4.0, -5.0, 0.0, 5.0, 10.0]);
        let (y, _) = norm.forward(&x);
        for r in 0..2 {
            let mean = y.row(r).sum() / 4.0;
            let var = y.row(r).iter().map(|v| (v - mean).powi(2)).sum::<f64>() / 4.0;
            assert!(mean.abs() < 1e-12);
            assert!((var - 1.0).abs() < 1e-3);
        }
    }

    #[test]
    fn layer_norm_backward_matches_finite_differences() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut norm = LayerNorm::new(3);
        norm.gamma = xavier(1, 3, &mut rng).unwrap();
        let x = xavier(2, 3, &mut rng).unwrap();
        let weights = xavier(2, 3, &mut rng).unwrap();
        let loss = |x: &DMatrix<f64>| norm.forward(x).0.component_mul(&weights).sum();

        let mut grad = norm.zeros_like();
        let (_, cache) = norm.forward(&x);
        let dx = norm.backward(&cache, &weights, &mut grad);

        let eps = 1e-6;
        for r in 0..2 {
            for c in 0..3 {
                let mut plus = x.clone();
                plus[(r, c)] += eps;
                let mut minus = x.clone();
                minus[(r, c)] -= eps;
                let numeric = (loss(&plus) - loss(&minus)) / (2.0 * eps);
                assert!((numeric - dx[(r, c)]).abs() < 1e-6, "({r},{c}): {numeric} vs {}", dx[(r, c)]);
            }
        }
    }

    #[test]
    fn xavier_is_seeded() {
        let a = xavier(3, 5, &mut StdRng::seed_from_u64(11)).unwrap();
        let b = xavier(3, 5, &mut StdRng::seed_from_u64(11)).unwrap();
        assert_eq!(a, b);
    }
}
