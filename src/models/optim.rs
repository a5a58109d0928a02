//! Adam optimizer and global gradient clipping.

use nalgebra::DMatrix;

use crate::models::ForecastModel;

const BETA1: f64 = 0.9;
const BETA2: f64 = 0.999;
const EPS: f64 = 1e-8;

#[derive(Debug, Clone)]
pub struct Adam {
    learning_rate: f64,
    step: i32,
    m: Vec<DMatrix<f64>>,
    v: Vec<DMatrix<f64>>,
}

impl Adam {
    pub fn new(model: &ForecastModel, learning_rate: f64) -> Self {
        let zeros: Vec<DMatrix<f64>> = model
            .tensors()
            .iter()
            .map(|t| DMatrix::zeros(t.nrows(), t.ncols()))
            .collect();
        Self {
            learning_rate,
            step: 0,
            m: zeros.clone(),
            v: zeros,
        }
    }

    /// One bias-corrected update of every parameter.
    pub fn step(&mut self, model: &mut ForecastModel, grad: &ForecastModel) {
        self.step += 1;
        let c1 = 1.0 - BETA1.powi(self.step);
        let c2 = 1.0 - BETA2.powi(self.step);
        let lr = self.learning_rate;

        let params = model.tensors_mut();
        let grads = grad.tensors();
        for (((p, g), m), v) in params
            .into_iter()
            .zip(grads)
            .zip(self.m.iter_mut())
            .zip(self.v.iter_mut())
        {
            for i in 0..p.len() {
                let gi = g[i];
                m[i] = BETA1 * m[i] + (1.0 - BETA1) * gi;
                v[i] = BETA2 * v[i] + (1.0 - BETA2) * gi * gi;
                let m_hat = m[i] / c1;
                let v_hat = v[i] / c2;
                p[i] -= lr * m_hat / (v_hat.sqrt() + EPS);
            }
        }
    }
}

/// Rescale `grad` so its global L2 norm is at most `max_norm` (0 disables).
///
/// Returns the norm before clipping.
pub fn clip_grad_norm(grad: &mut ForecastModel, max_norm: f64) -> f64 {
    let norm = grad.squared_norm().sqrt();
    if max_norm > 0.0 && norm > max_norm {
        grad.scale(max_norm / norm);
    }
    norm
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ModelConfig;

    fn model() -> ForecastModel {
        ForecastModel::new(ModelConfig {
            input_dim: 2,
            context_length: 3,
            d_model: 4,
            n_heads: 1,
            n_layers: 1,
            ff_dim: 4,
            decoder_hidden: 4,
            seed: 1,
        })
        .unwrap()
    }

    #[test]
    fn first_adam_step_moves_each_weight_by_lr() {
        let mut m = model();
        let before = m.clone();
        let mut grad = m.zeros_like();
        for t in grad.tensors_mut() {
            t.fill(0.3);
        }
        let mut adam = Adam::new(&m, 0.01);
        adam.step(&mut m, &grad);

        for (after, prev) in m.tensors().iter().zip(before.tensors()) {
            for i in 0..after.len() {
                assert!(((prev[i] - after[i]) - 0.01).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn clipping_caps_the_global_norm() {
        let m = model();
        let mut grad = m.zeros_like();
        for t in grad.tensors_mut() {
            t.fill(1.0);
        }
        let before = clip_grad_norm(&mut grad, 2.0);
        assert!(before > 2.0);
        assert!((grad.squared_norm().sqrt() - 2.0).abs() < 1e-9);

        let untouched = clip_grad_norm(&mut grad, 0.0);
        assert!((untouched - 2.0).abs() < 1e-9);
    }
}
