use super::Optimizer;
use crate::tensors::{Tensor, WithGrad};
use crate::variables::Variable;

/// Performs one step of stochastic gradient descent (SGD) on the given parameter tensor.
///
/// # Formula
///
/// $$ w := w - \\text{lr} \\cdot \\frac{\\partial L}{\\partial w} $$
///
/// # Behavior
///
/// - Updates `w.value` in-place
/// - Zeros out `w.grad` after update (gradient reset step)
pub fn sgd(w: &mut WithGrad<Tensor<f64>>, lr: f64) {
    for (param, grad) in w.value.data.iter_mut().zip(&w.grad.data) {
        *param -= lr * *grad;
    }
    w.zero_grad();
}

/// Plain gradient descent with a fixed step size.
#[derive(Debug, Clone, PartialEq)]
pub struct Sgd {
    pub lr: f64,
}

impl Sgd {
    pub fn new(lr: f64) -> Self {
        Self { lr }
    }
}

impl Optimizer for Sgd {
    fn name(&self) -> &'static str {
        "sgd"
    }

    fn learning_rate(&self) -> f64 {
        self.lr
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.lr = lr;
    }

    fn apply_gradients(&mut self, vars: &mut [Variable]) {
        for var in vars.iter_mut().filter(|v| v.trainable) {
            sgd(&mut var.param, self.lr);
        }
    }
}
