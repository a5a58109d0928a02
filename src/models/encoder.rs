//! Pre-norm transformer encoder layer.
//!
//! ```text
//! h1 = x  + Attn(LN1(x))
//! y  = h1 + W2 · relu(W1 · LN2(h1))
//! ```
//!
//! Attention is full (non-causal) over the context window: every position in
//! `[t-L+1, t]` is already in the past relative to the anchor.

use nalgebra::DMatrix;
use rand::Rng;

use crate::error::AppError;
use crate::models::layers::{LayerNorm, LayerNormCache, Linear, relu, relu_backward};

#[derive(Debug, Clone, PartialEq)]
pub struct EncoderLayer {
    pub n_heads: usize,
    pub norm1: LayerNorm,
    pub query: Linear,
    pub key: Linear,
    pub value: Linear,
    pub output: Linear,
    pub norm2: LayerNorm,
    pub ff1: Linear,
    pub ff2: Linear,
}

/// Everything the backward pass needs from one forward pass.
#[derive(Debug, Clone)]
pub struct EncoderCache {
    norm1: LayerNormCache,
    a: DMatrix<f64>,
    q: DMatrix<f64>,
    k: DMatrix<f64>,
    v: DMatrix<f64>,
    /// Attention weights per head, `L × L`.
    weights: Vec<DMatrix<f64>>,
    heads: DMatrix<f64>,
    norm2: LayerNormCache,
    c: DMatrix<f64>,
    pre_relu: DMatrix<f64>,
    hidden: DMatrix<f64>,
}

impl EncoderLayer {
    pub fn new<R: Rng>(
        d_model: usize,
        n_heads: usize,
        ff_dim: usize,
        rng: &mut R,
    ) -> Result<Self, AppError> {
        Ok(Self {
            n_heads,
            norm1: LayerNorm::new(d_model),
            query: Linear::new(d_model, d_model, rng)?,
            key: Linear::new(d_model, d_model, rng)?,
            value: Linear::new(d_model, d_model, rng)?,
            output: Linear::new(d_model, d_model, rng)?,
            norm2: LayerNorm::new(d_model),
            ff1: Linear::new(d_model, ff_dim, rng)?,
            ff2: Linear::new(ff_dim, d_model, rng)?,
        })
    }

    pub fn zeros_like(&self) -> Self {
        Self {
            n_heads: self.n_heads,
            norm1: self.norm1.zeros_like(),
            query: self.query.zeros_like(),
            key: self.key.zeros_like(),
            value: self.value.zeros_like(),
            output: self.output.zeros_like(),
            norm2: self.norm2.zeros_like(),
            ff1: self.ff1.zeros_like(),
            ff2: self.ff2.zeros_like(),
        }
    }

    fn head_dim(&self) -> usize {
        self.query.weight.ncols() / self.n_heads
    }

    pub fn forward(&self, x: &DMatrix<f64>) -> (DMatrix<f64>, EncoderCache) {
        let (a, norm1) = self.norm1.forward(x);
        let q = self.query.forward(&a);
        let k = self.key.forward(&a);
        let v = self.value.forward(&a);

        let dk = self.head_dim();
        let scale = 1.0 / (dk as f64).sqrt();
        let mut heads = DMatrix::zeros(x.nrows(), x.ncols());
        let mut weights = Vec::with_capacity(self.n_heads);
        for h in 0..self.n_heads {
            let qh = q.columns(h * dk, dk);
            let kh = k.columns(h * dk, dk);
            let vh = v.columns(h * dk, dk);
            let scores = (qh * kh.transpose()) * scale;
            let w = softmax_rows(&scores);
            heads.columns_mut(h * dk, dk).copy_from(&(&w * vh));
            weights.push(w);
        }

        let h1 = x + self.output.forward(&heads);
        let (c, norm2) = self.norm2.forward(&h1);
        let pre_relu = self.ff1.forward(&c);
        let hidden = relu(&pre_relu);
        let y = &h1 + self.ff2.forward(&hidden);

        let cache = EncoderCache {
            norm1,
            a,
            q,
            k,
            v,
            weights,
            heads,
            norm2,
            c,
            pre_relu,
            hidden,
        };
        (y, cache)
    }

    pub fn backward(
        &self,
        cache: &EncoderCache,
        dy: &DMatrix<f64>,
        grad: &mut EncoderLayer,
    ) -> DMatrix<f64> {
        // Feed-forward branch.
        let d_hidden = self.ff2.backward(&cache.hidden, dy, &mut grad.ff2);
        let d_pre = relu_backward(&cache.pre_relu, &d_hidden);
        let d_c = self.ff1.backward(&cache.c, &d_pre, &mut grad.ff1);
        let dh1 = dy + self.norm2.backward(&cache.norm2, &d_c, &mut grad.norm2);

        // Attention branch.
        let d_heads = self.output.backward(&cache.heads, &dh1, &mut grad.output);
        let dk = self.head_dim();
        let scale = 1.0 / (dk as f64).sqrt();
        let (rows, width) = dh1.shape();
        let mut dq = DMatrix::zeros(rows, width);
        let mut dkey = DMatrix::zeros(rows, width);
        let mut dv = DMatrix::zeros(rows, width);

        for h in 0..self.n_heads {
            let w = &cache.weights[h];
            let d_out = d_heads.columns(h * dk, dk);
            let qh = cache.q.columns(h * dk, dk);
            let kh = cache.k.columns(h * dk, dk);
            let vh = cache.v.columns(h * dk, dk);

            let dw = d_out * vh.transpose();
            dv.columns_mut(h * dk, dk).copy_from(&(w.transpose() * d_out));
            let d_scores = softmax_rows_backward(w, &dw) * scale;
            dq.columns_mut(h * dk, dk).copy_from(&(&d_scores * kh));
            dkey.columns_mut(h * dk, dk).copy_from(&(d_scores.transpose() * qh));
        }

        let da = self.query.backward(&cache.a, &dq, &mut grad.query)
            + self.key.backward(&cache.a, &dkey, &mut grad.key)
            + self.value.backward(&cache.a, &dv, &mut grad.value);
        dh1 + self.norm1.backward(&cache.norm1, &da, &mut grad.norm1)
    }

    pub fn tensors(&self) -> Vec<&DMatrix<f64>> {
        let mut out = Vec::new();
        out.extend(self.norm1.tensors());
        out.extend(self.query.tensors());
        out.extend(self.key.tensors());
        out.extend(self.value.tensors());
        out.extend(self.output.tensors());
        out.extend(self.norm2.tensors());
        out.extend(self.ff1.tensors());
        out.extend(self.ff2.tensors());
        out
    }

    pub fn tensors_mut(&mut self) -> Vec<&mut DMatrix<f64>> {
        let mut out = Vec::new();
        out.extend(self.norm1.tensors_mut());
        out.extend(self.query.tensors_mut());
        out.extend(self.key.tensors_mut());
        out.extend(self.value.tensors_mut());
        out.extend(self.output.tensors_mut());
        out.extend(self.norm2.tensors_mut());
        out.extend(self.ff1.tensors_mut());
        out.extend(self.ff2.tensors_mut());
        out
    }
}

/// Numerically stable row-wise softmax.
pub fn softmax_rows(scores: &DMatrix<f64>) -> DMatrix<f64> {
    let mut out = scores.clone();
    for r in 0..out.nrows() {
        let max = out.row(r).iter().fold(f64::NEG_INFINITY, |m, &v| m.max(v));
        let mut total = 0.0;
        for c in 0..out.ncols() {
            let e = (out[(r, c)] - max).exp();
            out[(r, c)] = e;
            total += e;
        }
        for c in 0..out.ncols() {
            out[(r, c)] /= total;
        }
    }
    out
}

/// `dS = W ⊙ (dW - rowsum(dW ⊙ W))`.
fn softmax_rows_backward(w: &DMatrix<f64>, dw: &DMatrix<f64>) -> DMatrix<f64> {
    let mut ds = DMatrix::zeros(w.nrows(), w.ncols());
    for r in 0..w.nrows() {
        let dot: f64 = (0..w.ncols()).map(|c| w[(r, c)] * dw[(r, c)]).sum();
        for c in 0..w.ncols() {
            ds[(r, c)] = w[(r, c)] * (dw[(r, c)] - dot);
        }
    }
    ds
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::layers::xavier;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn softmax_rows_sum_to_one() {
        let s = DMatrix::from_row_slice(2, 3, &[1.0, 2.0, 3.0, 1000.0, 1000.0, -1000.0]);
        let w = softmax_rows(&s);
        for r in 0..2 {
            assert!((w.row(r).sum() - 1.0).abs() < 1e-12);
        }
        assert!((w[(1, 0)] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn input_gradient_matches_finite_differences() {
        let mut rng = StdRng::seed_from_u64(5);
        let layer = EncoderLayer::new(4, 2, 6, &mut rng).unwrap();
        let x = xavier(3, 4, &mut rng).unwrap();
        let probe = xavier(3, 4, &mut rng).unwrap();
        let loss = |x: &DMatrix<f64>| layer.forward(x).0.component_mul(&probe).sum();

        let (_, cache) = layer.forward(&x);
        let mut grad = layer.zeros_like();
        let dx = layer.backward(&cache, &probe, &mut grad);

        let eps = 1e-6;
        for r in 0..3 {
            for c in 0..4 {
                let mut plus = x.clone();
                plus[(r, c)] += eps;
                let mut minus = x.clone();
                minus[(r, c)] -= eps;
                let numeric = (loss(&plus) - loss(&minus)) / (2.0 * eps);
                assert!(
                    (numeric - dx[(r, c)]).abs() < 1e-5,
                    "({r},{c}): numeric {numeric} vs analytic {}",
                    dx[(r, c)]
                );
            }
        }
    }
}
