//! ForecastModel: transformer encoder + two-layer MLP decoder.
//!
//! ```text
//! context (L × F)
//!   → input projection + learned position embedding      (L × d)
//!   → n_layers × EncoderLayer                             (L × d)
//!   → final LayerNorm → mean over time                    (1 × d)
//!   → Linear(d, hidden) → relu → Linear(hidden, 4)        (1 × 4)
//! ```
//!
//! The decoder always emits one value per supported horizon; inactive
//! horizons are masked out of the loss, so the graph is the same for every
//! horizon configuration. Outputs are normalized air temperature.

use nalgebra::DMatrix;
use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::domain::{HORIZON_COUNT, HorizonValues, ModelConfig};
use crate::error::AppError;
use crate::models::encoder::{EncoderCache, EncoderLayer};
use crate::models::layers::{LayerNorm, LayerNormCache, Linear, relu, relu_backward, xavier};

#[derive(Debug, Clone, PartialEq)]
pub struct ForecastModel {
    pub config: ModelConfig,
    pub input: Linear,
    pub position: DMatrix<f64>,
    pub layers: Vec<EncoderLayer>,
    pub final_norm: LayerNorm,
    pub hidden: Linear,
    pub head: Linear,
}

struct ForwardCache {
    layers: Vec<EncoderCache>,
    final_norm: LayerNormCache,
    pooled: DMatrix<f64>,
    pre_relu: DMatrix<f64>,
    activated: DMatrix<f64>,
}

impl ForecastModel {
    /// Fresh model with seeded Xavier weights.
    pub fn new(config: ModelConfig) -> Result<Self, AppError> {
        config.validate()?;
        let mut rng = StdRng::seed_from_u64(config.seed);
        let d = config.d_model;

        let input = Linear::new(config.input_dim, d, &mut rng)?;
        let position = xavier(config.context_length, d, &mut rng)?;
        let layers = (0..config.n_layers)
            .map(|_| EncoderLayer::new(d, config.n_heads, config.ff_dim, &mut rng))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            config,
            input,
            position,
            layers,
            final_norm: LayerNorm::new(d),
            hidden: Linear::new(d, config.decoder_hidden, &mut rng)?,
            head: Linear::new(config.decoder_hidden, HORIZON_COUNT, &mut rng)?,
        })
    }

    /// Same shape, all zeros. Used as the gradient accumulator.
    pub fn zeros_like(&self) -> Self {
        Self {
            config: self.config,
            input: self.input.zeros_like(),
            position: DMatrix::zeros(self.position.nrows(), self.position.ncols()),
            layers: self.layers.iter().map(EncoderLayer::zeros_like).collect(),
            final_norm: self.final_norm.zeros_like(),
            hidden: self.hidden.zeros_like(),
            head: self.head.zeros_like(),
        }
    }

    /// Every parameter tensor in a fixed order (checkpoints and Adam rely on it).
    pub fn tensors(&self) -> Vec<&DMatrix<f64>> {
        let mut out = Vec::new();
        out.extend(self.input.tensors());
        out.push(&self.position);
        for layer in &self.layers {
            out.extend(layer.tensors());
        }
        out.extend(self.final_norm.tensors());
        out.extend(self.hidden.tensors());
        out.extend(self.head.tensors());
        out
    }

    pub fn tensors_mut(&mut self) -> Vec<&mut DMatrix<f64>> {
        let mut out = Vec::new();
        out.extend(self.input.tensors_mut());
        out.push(&mut self.position);
        for layer in &mut self.layers {
            out.extend(layer.tensors_mut());
        }
        out.extend(self.final_norm.tensors_mut());
        out.extend(self.hidden.tensors_mut());
        out.extend(self.head.tensors_mut());
        out
    }

    pub fn parameter_count(&self) -> usize {
        self.tensors().iter().map(|t| t.len()).sum()
    }

    fn forward_cached(&self, context: &DMatrix<f64>) -> (HorizonValues, ForwardCache) {
        let mut h = self.input.forward(context) + &self.position;
        let mut layer_caches = Vec::with_capacity(self.layers.len());
        for layer in &self.layers {
            let (next, cache) = layer.forward(&h);
            layer_caches.push(cache);
            h = next;
        }
        let (normed, final_norm) = self.final_norm.forward(&h);
        let rows = normed.nrows() as f64;
        let pooled = DMatrix::from_fn(1, normed.ncols(), |_, c| normed.column(c).sum() / rows);

        let pre_relu = self.hidden.forward(&pooled);
        let activated = relu(&pre_relu);
        let out = self.head.forward(&activated);

        let mut values = [0.0; HORIZON_COUNT];
        for (slot, v) in values.iter_mut().enumerate() {
            *v = out[(0, slot)];
        }
        let cache = ForwardCache {
            layers: layer_caches,
            final_norm,
            pooled,
            pre_relu,
            activated,
        };
        (values, cache)
    }

    /// Predict normalized temperature for every horizon slot.
    ///
    /// The context must already have passed [`check_context`](super::check_context).
    pub fn forward(&self, context: &DMatrix<f64>) -> HorizonValues {
        self.forward_cached(context).0
    }

    /// Masked squared error for one sample and its gradient (accumulated into `grad`).
    ///
    /// The loss is the mean over active horizons, so samples weigh the same
    /// regardless of how many horizons are configured.
    pub fn loss_and_gradient(
        &self,
        context: &DMatrix<f64>,
        target: &HorizonValues,
        mask: &[bool; HORIZON_COUNT],
        grad: &mut ForecastModel,
    ) -> f64 {
        let active = mask.iter().filter(|m| **m).count();
        if active == 0 {
            return 0.0;
        }
        let (pred, cache) = self.forward_cached(context);

        let mut loss = 0.0;
        let mut d_out = DMatrix::zeros(1, HORIZON_COUNT);
        for slot in 0..HORIZON_COUNT {
            if mask[slot] {
                let err = pred[slot] - target[slot];
                loss += err * err;
                d_out[(0, slot)] = 2.0 * err / active as f64;
            }
        }
        loss /= active as f64;

        let d_act = self.head.backward(&cache.activated, &d_out, &mut grad.head);
        let d_pre = relu_backward(&cache.pre_relu, &d_act);
        let d_pooled = self.hidden.backward(&cache.pooled, &d_pre, &mut grad.hidden);

        let rows = context.nrows();
        let d_normed = DMatrix::from_fn(rows, d_pooled.ncols(), |_, c| d_pooled[(0, c)] / rows as f64);
        let mut dh = self
            .final_norm
            .backward(&cache.final_norm, &d_normed, &mut grad.final_norm);

        for ((layer, layer_cache), layer_grad) in self
            .layers
            .iter()
            .zip(&cache.layers)
            .zip(grad.layers.iter_mut())
            .rev()
        {
            dh = layer.backward(layer_cache, &dh, layer_grad);
        }

        grad.position += &dh;
        self.input.backward(context, &dh, &mut grad.input);
        loss
    }

    /// `self += scale * other`, tensor by tensor.
    pub fn add_scaled(&mut self, other: &ForecastModel, scale: f64) {
        for (p, o) in self.tensors_mut().into_iter().zip(other.tensors()) {
            *p += o * scale;
        }
    }

    pub fn scale(&mut self, factor: f64) {
        for p in self.tensors_mut() {
            *p *= factor;
        }
    }

    pub fn squared_norm(&self) -> f64 {
        self.tensors().iter().map(|t| t.norm_squared()).sum()
    }

    pub fn is_finite(&self) -> bool {
        self.tensors().iter().all(|t| t.iter().all(|v| v.is_finite()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_config() -> ModelConfig {
        ModelConfig {
            input_dim: 3,
            context_length: 4,
            d_model: 4,
            n_heads: 2,
            n_layers: 1,
            ff_dim: 8,
            decoder_hidden: 5,
            seed: 17,
        }
    }

    #[test]
    fn same_seed_same_weights() {
        let a = ForecastModel::new(tiny_config()).unwrap();
        let b = ForecastModel::new(tiny_config()).unwrap();
        assert_eq!(a, b);
        let mut other = tiny_config();
        other.seed = 18;
        assert_ne!(a, ForecastModel::new(other).unwrap());
    }

    #[test]
    fn zeros_like_matches_layout() {
        let model = ForecastModel::new(tiny_config()).unwrap();
        let grad = model.zeros_like();
        assert_eq!(model.tensors().len(), grad.tensors().len());
        assert_eq!(grad.squared_norm(), 0.0);
        for (a, b) in model.tensors().iter().zip(grad.tensors()) {
            assert_eq!(a.shape(), b.shape());
        }
    }

    #[test]
    fn gradients_match_finite_differences() {
        let model = ForecastModel::new(tiny_config()).unwrap();
        let mut rng = StdRng::seed_from_u64(99);
        let context = xavier(4, 3, &mut rng).unwrap() * 3.0;
        let target = [0.5, -1.0, 0.0, 0.0];
        let mask = [true, true, false, false];

        let mut grad = model.zeros_like();
        model.loss_and_gradient(&context, &target, &mask, &mut grad);

        let loss_of = |m: &ForecastModel| {
            let mut scratch = m.zeros_like();
            m.loss_and_gradient(&context, &target, &mask, &mut scratch)
        };

        let eps = 1e-6;
        let n_tensors = model.tensors().len();
        for t in 0..n_tensors {
            let len = model.tensors()[t].len();
            for i in [0, len / 2, len - 1] {
                let mut plus = model.clone();
                plus.tensors_mut()[t][i] += eps;
                let mut minus = model.clone();
                minus.tensors_mut()[t][i] -= eps;
                let numeric = (loss_of(&plus) - loss_of(&minus)) / (2.0 * eps);
                let analytic = grad.tensors()[t][i];
                assert!(
                    (numeric - analytic).abs() < 1e-5 * (1.0 + numeric.abs()),
                    "tensor {t}[{i}]: numeric {numeric} vs analytic {analytic}"
                );
            }
        }
    }

    #[test]
    fn masked_horizons_get_no_gradient_signal() {
        let model = ForecastModel::new(tiny_config()).unwrap();
        let context = DMatrix::from_element(4, 3, 0.25);
        let mut grad = model.zeros_like();
        let loss = model.loss_and_gradient(&context, &[9.0; 4], &[false; 4], &mut grad);
        assert_eq!(loss, 0.0);
        assert_eq!(grad.squared_norm(), 0.0);
    }
}
