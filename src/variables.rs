//! Trainable parameters.
//!
//! A [`Variable`] owns a value and its accumulated gradient. Optimizers key
//! their per-parameter state on [`VarId`]. Every constructor draws a fresh id;
//! a clone keeps the id of its original, so an optimizer treats the two as the
//! same parameter.

use crate::tensors::{Tensor, WithGrad};
use core::sync::atomic::{AtomicU64, Ordering};
use rand::Rng;

static NEXT_ID: AtomicU64 = AtomicU64::new(0);

/// Identifier of a [`Variable`], shared by its clones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(u64);

impl VarId {
    fn fresh() -> Self {
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// A named parameter that optimizers update in place.
#[derive(Debug, Clone)]
pub struct Variable {
    id: VarId,
    pub name: String,
    pub param: WithGrad<Tensor<f64>>,
    /// Frozen variables still feed the objective but are never updated.
    pub trainable: bool,
}

impl Variable {
    /// A trainable variable holding `value`.
    pub fn new(name: impl Into<String>, value: impl Into<Tensor<f64>>) -> Self {
        Self {
            id: VarId::fresh(),
            name: name.into(),
            param: WithGrad::new(value.into()),
            trainable: true,
        }
    }

    /// A trainable scalar drawn uniformly from `[0, 1)`.
    pub fn random_scalar<R: Rng>(name: impl Into<String>, rng: &mut R) -> Self {
        Self::new(name, Tensor::scalar(rng.random::<f64>()))
    }

    /// The same variable, excluded from updates.
    #[must_use]
    pub fn frozen(mut self) -> Self {
        self.trainable = false;
        self
    }

    pub fn id(&self) -> VarId {
        self.id
    }

    pub fn value(&self) -> &Tensor<f64> {
        &self.param.value
    }

    pub fn grad(&self) -> &Tensor<f64> {
        &self.param.grad
    }

    /// Overwrites the value, keeping the shape.
    ///
    /// # Panics
    /// Panics if `value` has a different shape.
    pub fn assign(&mut self, value: Tensor<f64>) {
        self.param.value.update(value);
    }

    /// Copies of the current values, in order.
    pub fn snapshot(vars: &[Variable]) -> Vec<Tensor<f64>> {
        vars.iter().map(|v| v.value().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn ids_are_fresh_per_constructor_and_kept_by_clones() {
        let a = Variable::new("a", Tensor::scalar(1.0));
        let b = Variable::new("b", Tensor::scalar(1.0));
        assert_ne!(a.id(), b.id());
        assert_eq!(a.clone().id(), a.id());
    }

    #[test]
    fn random_scalars_are_in_unit_interval_and_seedable() {
        let mut r1 = StdRng::seed_from_u64(7);
        let mut r2 = StdRng::seed_from_u64(7);
        let a = Variable::random_scalar("a", &mut r1);
        let b = Variable::random_scalar("b", &mut r2);
        let v = a.value().item().unwrap();
        assert!((0.0..1.0).contains(&v));
        assert_eq!(a.value(), b.value());
        assert!(a.trainable);
        assert!(!a.frozen().trainable);
    }

    #[test]
    #[should_panic(expected = "shape mismatch")]
    fn assign_keeps_shape() {
        let mut v = Variable::new("v", Tensor::vector(vec![1.0, 2.0]));
        v.assign(Tensor::scalar(3.0));
    }
}
