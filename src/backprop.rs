//! Gradient transforms over [`Var`] functions.
//!
//! # Calling Conventions
//!
//! Objectives come in three forms:
//! - **unary**: `Fn(Var) -> Var`, differentiated by [`grad`]
//! - **list**: `Fn(&[Var]) -> Var`, differentiated by [`grads`]
//! - **fixed-arity**: `Fn([Var; N]) -> Var`, differentiated by [`grads_n`]
//!
//! [`tuplify`] turns a list objective into a fixed-arity one, so an objective
//! written once over "however many values a shape has" can be handed to code
//! that wants a known argument count.
//!
//! Outputs do not have to be scalars: the upstream gradient is seeded with
//! ones, so a non-scalar output is differentiated as the sum of its elements.
//!
//! ```rust
//! use web_optimizer::backprop::grad;
//! use web_optimizer::tensors::Tensor;
//!
//! let df = grad(|x| x.square());
//! let dx = df(&Tensor::vector(vec![2.0, 3.0])).unwrap();
//! assert_eq!(dx.data, vec![4.0, 6.0]);
//! ```

use crate::error::{Error, Result};
use crate::graph::{Graph, Var};
use crate::tensors::Tensor;

/// A list-form objective behind a pointer.
pub type ListFn<'a> = dyn for<'g> Fn(&[Var<'g>]) -> Var<'g> + 'a;

fn seed_backward(graph: &Graph, out: Var<'_>) -> Result<crate::graph::Gradients> {
    graph.backward_with(out, Tensor::ones(out.shape()))
}

/// Computes `f(x)` and `∂f/∂x` in one forward and one backward pass.
///
/// # Errors
/// Propagates errors from the backward pass.
pub fn value_and_grad<F>(f: &F, x: &Tensor<f64>) -> Result<(Tensor<f64>, Tensor<f64>)>
where
    F: for<'g> Fn(Var<'g>) -> Var<'g> + ?Sized,
{
    let graph = Graph::new();
    let input = graph.input(x.clone());
    let out = f(input);
    let grads = seed_backward(&graph, out)?;
    Ok((out.value(), grads.wrt(input).clone()))
}

/// Returns a function computing `∂f/∂x` for a unary `f`.
pub fn grad<F>(f: F) -> impl Fn(&Tensor<f64>) -> Result<Tensor<f64>>
where
    F: for<'g> Fn(Var<'g>) -> Var<'g>,
{
    move |x: &Tensor<f64>| value_and_grad(&f, x).map(|(_, g)| g)
}

/// Computes `f(xs)` and one gradient per input for a list-form `f`.
///
/// # Errors
/// Propagates errors from the backward pass.
pub fn value_and_grads<F>(f: &F, xs: &[Tensor<f64>]) -> Result<(Tensor<f64>, Vec<Tensor<f64>>)>
where
    F: for<'g> Fn(&[Var<'g>]) -> Var<'g> + ?Sized,
{
    let graph = Graph::new();
    let inputs: Vec<Var<'_>> = xs.iter().map(|x| graph.input(x.clone())).collect();
    let out = f(&inputs);
    let grads = seed_backward(&graph, out)?;
    let per_input = inputs.iter().map(|&v| grads.wrt(v).clone()).collect();
    Ok((out.value(), per_input))
}

/// Returns a function computing the gradient of a list-form `f` with respect
/// to each of its inputs.
pub fn grads<F>(f: F) -> impl Fn(&[Tensor<f64>]) -> Result<Vec<Tensor<f64>>>
where
    F: for<'g> Fn(&[Var<'g>]) -> Var<'g>,
{
    move |xs: &[Tensor<f64>]| value_and_grads(&f, xs).map(|(_, g)| g)
}

/// Computes `f(x₀, …, xₙ₋₁)` and its `N` gradients for a fixed-arity `f`.
///
/// # Errors
/// Propagates errors from the backward pass.
pub fn value_and_grads_n<const N: usize, F>(
    f: &F,
    xs: &[Tensor<f64>; N],
) -> Result<(Tensor<f64>, [Tensor<f64>; N])>
where
    F: for<'g> Fn([Var<'g>; N]) -> Var<'g> + ?Sized,
{
    let graph = Graph::new();
    let inputs: [Var<'_>; N] = core::array::from_fn(|i| graph.input(xs[i].clone()));
    let out = f(inputs);
    let grads = seed_backward(&graph, out)?;
    Ok((out.value(), inputs.map(|v| grads.wrt(v).clone())))
}

/// Fixed-arity counterpart of [`grads`].
pub fn grads_n<const N: usize, F>(f: F) -> impl Fn(&[Tensor<f64>; N]) -> Result<[Tensor<f64>; N]>
where
    F: for<'g> Fn([Var<'g>; N]) -> Var<'g>,
{
    move |xs: &[Tensor<f64>; N]| value_and_grads_n(&f, xs).map(|(_, g)| g)
}

/// Adapts a list-form objective to a fixed-arity one.
///
/// `tuplify::<2, _>(f)` behaves like `|[a, b]| f(&[a, b])`. The argument count
/// has to be known up front; objectives that declare an arity should go
/// through [`Objective::tuplify`], which checks it.
pub fn tuplify<const N: usize, F>(f: F) -> impl for<'g> Fn([Var<'g>; N]) -> Var<'g>
where
    F: for<'g> Fn(&[Var<'g>]) -> Var<'g>,
{
    fixed_arity(move |args| f(args.as_slice()))
}

// pins the closure signature to the higher-ranked form
fn fixed_arity<const N: usize, F>(f: F) -> F
where
    F: for<'g> Fn([Var<'g>; N]) -> Var<'g>,
{
    f
}

/// A named list-form objective with an optional declared argument count.
pub struct Objective {
    name: String,
    arity: Option<usize>,
    f: Box<dyn for<'g> Fn(&[Var<'g>]) -> Var<'g> + Send + Sync>,
}

impl core::fmt::Debug for Objective {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Objective")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish_non_exhaustive()
    }
}

impl Objective {
    /// Wraps `f` under `name`, accepting any number of arguments.
    pub fn new<F>(name: impl Into<String>, f: F) -> Self
    where
        F: for<'g> Fn(&[Var<'g>]) -> Var<'g> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            arity: None,
            f: Box::new(f),
        }
    }

    /// Declares that the objective takes exactly `n` arguments.
    #[must_use]
    pub fn with_arity(mut self, n: usize) -> Self {
        self.arity = Some(n);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arity(&self) -> Option<usize> {
        self.arity
    }

    /// Checks `got` against the declared arity.
    ///
    /// # Errors
    /// Returns [`Error::Arity`] on a mismatch.
    pub fn check_arity(&self, got: usize) -> Result<()> {
        match self.arity {
            Some(expected) if expected != got => Err(Error::Arity {
                name: self.name.clone(),
                expected,
                got,
            }),
            _ => Ok(()),
        }
    }

    /// Evaluates the objective on the tape `args` live on.
    ///
    /// # Errors
    /// Returns [`Error::Arity`] if `args` has the wrong length.
    pub fn eval<'g>(&self, args: &[Var<'g>]) -> Result<Var<'g>> {
        self.check_arity(args.len())?;
        Ok((self.f)(args))
    }

    /// The unchecked function, for callers that validated the arity already.
    pub fn as_fn(&self) -> &ListFn<'_> {
        &*self.f
    }

    /// Value and per-argument gradients at `xs`.
    ///
    /// # Errors
    /// Returns [`Error::Arity`] if `xs` has the wrong length.
    pub fn value_and_grads(&self, xs: &[Tensor<f64>]) -> Result<(Tensor<f64>, Vec<Tensor<f64>>)> {
        self.check_arity(xs.len())?;
        value_and_grads(self.as_fn(), xs)
    }

    /// Fixed-arity view of this objective.
    ///
    /// # Errors
    /// Returns [`Error::Arity`] if the declared arity is not `N`.
    pub fn tuplify<const N: usize>(&self) -> Result<impl for<'g> Fn([Var<'g>; N]) -> Var<'g> + '_> {
        self.check_arity(N)?;
        Ok(fixed_arity(move |args| (self.f)(args.as_slice())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn center_list<'g>(args: &[Var<'g>]) -> Var<'g> {
        args[0].square() + args[1].square()
    }

    #[test]
    fn grad_of_non_scalar_output_seeds_ones() {
        let df = grad(|x| x.square());
        let dx = df(&Tensor::vector(vec![2.0, 3.0])).unwrap();
        assert_eq!(dx.data, vec![4.0, 6.0]);
    }

    #[test]
    fn value_and_grad_returns_forward_value() {
        let (y, dy) = value_and_grad(&|x: Var<'_>| x * x * x, &Tensor::scalar(2.0)).unwrap();
        assert_eq!(y, Tensor::scalar(8.0));
        assert_eq!(dy, Tensor::scalar(12.0));
    }

    #[test]
    fn grads_of_list_objective() {
        let df = grads(center_list);
        let g = df(&[Tensor::scalar(10.0), Tensor::scalar(25.0)]).unwrap();
        assert_eq!(g, vec![Tensor::scalar(20.0), Tensor::scalar(50.0)]);
    }

    #[test]
    fn tuplified_objective_matches_list_form() {
        let tup = tuplify::<2, _>(center_list);
        let xs = [Tensor::scalar(10.0), Tensor::scalar(25.0)];
        let (value, [dx, dy]) = value_and_grads_n(&tup, &xs).unwrap();
        assert_eq!(value, Tensor::scalar(725.0));
        assert_eq!(dx, Tensor::scalar(20.0));
        assert_eq!(dy, Tensor::scalar(50.0));
    }

    #[test]
    fn objective_rejects_wrong_argument_count() {
        let obj = Objective::new("center", center_list).with_arity(2);
        let err = obj.value_and_grads(&[Tensor::scalar(1.0)]).unwrap_err();
        assert_eq!(
            err,
            Error::Arity {
                name: "center".into(),
                expected: 2,
                got: 1
            }
        );
        assert!(obj.tuplify::<3>().is_err());
        assert!(obj.tuplify::<2>().is_ok());
    }
}
