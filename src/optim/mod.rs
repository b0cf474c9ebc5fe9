//! Gradient-based optimizers.
//!
//! ## Implemented
//!
//! - [`Sgd`]: `w -= lr * g`
//! - [`Adam`]: bias-corrected first/second moment estimates per variable
//!
//! Each optimizer is a thin stateful wrapper around a free update kernel
//! ([`sgd`], [`adam`]) operating on one `WithGrad<Tensor<f64>>`.
//!
//! [`Optimizer::minimize`] is the one-call training step: evaluate the
//! objective over the variables, backpropagate into the trainable ones, apply
//! the update and hand back the cost.

use crate::backprop::ListFn;
use crate::error::Result;
use crate::graph::{Graph, Var};
use crate::variables::Variable;
use core::fmt;

mod adam;
pub use self::adam::{Adam, AdamParams, adam};

mod sgd;
pub use self::sgd::{Sgd, sgd};

/// A stateful parameter update rule.
pub trait Optimizer {
    /// Short lowercase identifier used in logs and reports.
    fn name(&self) -> &'static str;

    fn learning_rate(&self) -> f64;

    fn set_learning_rate(&mut self, lr: f64);

    /// Consumes the accumulated gradient of every trainable variable and
    /// zeroes it. Frozen variables are left untouched.
    fn apply_gradients(&mut self, vars: &mut [Variable]);

    /// Runs one step on `f` and returns the cost evaluated before the update.
    ///
    /// `f` receives one [`Var`] per entry of `vars`, in order.
    ///
    /// # Errors
    /// Returns [`crate::Error::NotScalar`] if `f` does not produce a single value.
    fn minimize(&mut self, vars: &mut [Variable], f: &ListFn<'_>) -> Result<f64> {
        let cost = compute_gradients(vars, f)?;
        self.apply_gradients(vars);
        Ok(cost)
    }
}

/// Evaluates `f` over `vars` and adds `∂f/∂v` into each trainable variable's gradient.
///
/// # Errors
/// Returns [`crate::Error::NotScalar`] if `f` does not produce a single value.
pub fn compute_gradients(vars: &mut [Variable], f: &ListFn<'_>) -> Result<f64> {
    let graph = Graph::new();
    let inputs: Vec<Var<'_>> = vars.iter().map(|v| graph.input(v.value().clone())).collect();
    let out = f(&inputs);
    let cost = out.item()?;
    let grads = graph.backward(out)?;

    for (var, &input) in vars.iter_mut().zip(&inputs) {
        if var.trainable {
            var.param.accumulate(grads.wrt(input));
        }
    }
    Ok(cost)
}

/// The optimizers selectable from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum OptimizerKind {
    Sgd,
    Adam,
}

impl OptimizerKind {
    /// Every kind, in a stable order.
    pub const ALL: [OptimizerKind; 2] = [OptimizerKind::Sgd, OptimizerKind::Adam];

    /// A fresh optimizer of this kind.
    pub fn build(self, lr: f64) -> Box<dyn Optimizer> {
        match self {
            Self::Sgd => Box::new(Sgd::new(lr)),
            Self::Adam => Box::new(Adam::new(lr)),
        }
    }
}

impl fmt::Display for OptimizerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Sgd => "sgd",
            Self::Adam => "adam",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approx::assert_close;
    use crate::error::Error;
    use crate::tensors::{Tensor, WithGrad};

    fn sum_of_squares<'g>(xs: &[Var<'g>]) -> Var<'g> {
        xs.iter()
            .map(|x| x.square().sum())
            .reduce(|a, b| a + b)
            .expect("at least one variable")
    }

    #[test]
    fn sgd_kernel_steps_and_zeroes() {
        let mut w = WithGrad {
            value: Tensor::vector(vec![1.0, 2.0]),
            grad: Tensor::vector(vec![0.1, 0.2]),
        };
        sgd(&mut w, 0.5);
        assert_close(&w.value, &Tensor::vector(vec![0.95, 1.9]));
        assert_eq!(w.grad.data, vec![0.0, 0.0]);
    }

    #[test]
    fn adam_first_step_moves_by_learning_rate() {
        // with bias correction the first step is lr * g / (|g| + eps)
        let mut w = WithGrad {
            value: Tensor::vector(vec![1.0, -1.0]),
            grad: Tensor::vector(vec![4.0, -0.5]),
        };
        let mut m = w.value.zeros_like();
        let mut v = w.value.zeros_like();
        adam(&mut w, &mut m, &mut v, 1, 0.1, &AdamParams::default());
        assert_close(&w.value, &Tensor::vector(vec![0.9, -0.9]));
        assert_eq!(w.grad.data, vec![0.0, 0.0]);
    }

    #[test]
    fn minimize_returns_cost_before_update() {
        let mut vars = [Variable::new("a", Tensor::scalar(3.0))];
        let mut opt = Sgd::new(0.25);
        let cost = opt.minimize(&mut vars, &sum_of_squares).unwrap();
        assert_eq!(cost, 9.0);
        // a -= 0.25 * 2a
        assert_close(vars[0].value(), &Tensor::scalar(1.5));
        assert_eq!(vars[0].grad().data, vec![0.0]);
    }

    #[test]
    fn frozen_variables_are_not_updated() {
        let mut vars = [
            Variable::new("c", Tensor::scalar(1.0)),
            Variable::new("d", Tensor::scalar(1.0)).frozen(),
        ];
        let mut opt = Adam::new(0.1);
        for _ in 0..5 {
            opt.minimize(&mut vars, &sum_of_squares).unwrap();
        }
        assert!(vars[0].value().item().unwrap() < 1.0);
        assert_eq!(vars[1].value(), &Tensor::scalar(1.0));
        assert_eq!(opt.steps(vars[0].id()), 5);
        assert_eq!(opt.steps(vars[1].id()), 0);
    }

    #[test]
    fn non_scalar_cost_is_rejected() {
        let mut vars = [Variable::new("v", Tensor::vector(vec![1.0, 2.0]))];
        let err = Sgd::new(0.1)
            .minimize(&mut vars, &|xs| xs[0].square())
            .unwrap_err();
        assert_eq!(err, Error::NotScalar(vec![2]));
        assert_eq!(vars[0].value(), &Tensor::vector(vec![1.0, 2.0]));
    }

    #[test]
    fn both_kinds_decrease_a_quadratic() {
        for kind in OptimizerKind::ALL {
            let mut opt = kind.build(0.1);
            let mut vars = [Variable::new("x", Tensor::vector(vec![2.0, -3.0]))];
            let first = opt.minimize(&mut vars, &sum_of_squares).unwrap();
            let mut last = first;
            for _ in 0..50 {
                last = opt.minimize(&mut vars, &sum_of_squares).unwrap();
            }
            assert!(last < first, "{kind} did not decrease the cost");
            assert_eq!(opt.name(), kind.to_string());
        }
    }
}
