use super::Optimizer;
use crate::tensors::{Tensor, WithGrad};
use crate::variables::{VarId, Variable};
use std::collections::HashMap;

/// Adam hyperparameters other than the learning rate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdamParams {
    pub beta1: f64,
    pub beta2: f64,
    pub eps: f64,
}

impl Default for AdamParams {
    fn default() -> Self {
        Self {
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
        }
    }
}

/// Performs one step of Adam optimization on the given parameter tensor.
///
/// # Arguments
///
/// - `w`: Tensor with gradient to be updated
/// - `m`: First moment estimate (same shape as `w`)
/// - `v`: Second moment estimate (same shape as `w`)
/// - `t`: Current timestep (1-based)
/// - `lr`: Learning rate
///
/// Gradients are zeroed afterwards.
pub fn adam(
    w: &mut WithGrad<Tensor<f64>>,
    m: &mut Tensor<f64>,
    v: &mut Tensor<f64>,
    t: i32,
    lr: f64,
    hp: &AdamParams,
) {
    let bias1 = 1.0 - hp.beta1.powi(t);
    let bias2 = 1.0 - hp.beta2.powi(t);

    #[allow(clippy::suspicious_operation_groupings)]
    for ((param, grad), (m_val, v_val)) in w
        .value
        .data
        .iter_mut()
        .zip(&w.grad.data)
        .zip(m.data.iter_mut().zip(v.data.iter_mut()))
    {
        *m_val = hp.beta1 * *m_val + (1.0 - hp.beta1) * *grad;
        *v_val = hp.beta2 * *v_val + (1.0 - hp.beta2) * (*grad * *grad);

        let m_hat = *m_val / bias1;
        let v_hat = *v_val / bias2;

        *param -= lr * m_hat / (v_hat.sqrt() + hp.eps);
    }

    w.zero_grad();
}

#[derive(Debug, Clone)]
struct Moments {
    m: Tensor<f64>,
    v: Tensor<f64>,
    t: i32,
}

/// Adam with bias-corrected moment estimates kept per variable.
#[derive(Debug, Clone)]
pub struct Adam {
    pub lr: f64,
    pub params: AdamParams,
    moments: HashMap<VarId, Moments>,
}

impl Adam {
    pub fn new(lr: f64) -> Self {
        Self::with_params(lr, AdamParams::default())
    }

    pub fn with_params(lr: f64, params: AdamParams) -> Self {
        Self {
            lr,
            params,
            moments: HashMap::new(),
        }
    }

    /// Number of steps taken for `id`, zero if it was never updated.
    pub fn steps(&self, id: VarId) -> i32 {
        self.moments.get(&id).map_or(0, |s| s.t)
    }

    /// Forgets all moment estimates.
    pub fn reset(&mut self) {
        self.moments.clear();
    }
}

impl Optimizer for Adam {
    fn name(&self) -> &'static str {
        "adam"
    }

    fn learning_rate(&self) -> f64 {
        self.lr
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.lr = lr;
    }

    fn apply_gradients(&mut self, vars: &mut [Variable]) {
        for var in vars.iter_mut().filter(|v| v.trainable) {
            let state = self.moments.entry(var.id()).or_insert_with(|| Moments {
                m: var.param.value.zeros_like(),
                v: var.param.value.zeros_like(),
                t: 0,
            });
            state.t += 1;
            adam(
                &mut var.param,
                &mut state.m,
                &mut state.v,
                state.t,
                self.lr,
                &self.params,
            );
        }
    }
}
