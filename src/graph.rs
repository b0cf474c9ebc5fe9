//! Reverse-mode autodiff tape.
//!
//! Every operation on a [`Var`] computes its forward value immediately and
//! records a backward closure that maps `dL/d(out)` to one gradient per
//! input. The closures capture clones of exactly the values they need, so
//! [`Graph::backward`] only has to walk the tape in reverse and accumulate.
//!
//! ```rust
//! use web_optimizer::graph::Graph;
//! use web_optimizer::tensors::Tensor;
//!
//! let graph = Graph::new();
//! let x = graph.input(Tensor::vector(vec![2.0, 3.0]));
//! let y = x.square().sum();
//! let grads = graph.backward(y).unwrap();
//! assert_eq!(grads.wrt(x).data, vec![4.0, 6.0]);
//! ```
//!
//! ## Usage Guidelines
//!
//! - Element-wise operations **panic** when shapes cannot be broadcast, the
//!   same way tensor constructors panic on bad shapes.
//! - Broadcasting is limited to a single-element operand against any shape.

use crate::error::{Error, Result};
use crate::tensors::Tensor;
use core::cell::RefCell;
use core::fmt;
use core::ops::{Add, Div, Mul, Neg, Sub};

type Backward = Box<dyn Fn(&Tensor<f64>) -> Vec<Tensor<f64>>>;

struct Node {
    value: Tensor<f64>,
    parents: Vec<usize>,
    back: Option<Backward>,
}

/// An append-only record of evaluated operations.
#[derive(Default)]
pub struct Graph {
    nodes: RefCell<Vec<Node>>,
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph")
            .field("nodes", &self.nodes.borrow().len())
            .finish()
    }
}

impl Graph {
    /// An empty tape.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of recorded nodes.
    pub fn len(&self) -> usize {
        self.nodes.borrow().len()
    }

    /// Whether nothing has been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registers a leaf value that gradients can be taken with respect to.
    pub fn input(&self, value: Tensor<f64>) -> Var<'_> {
        self.push(value, Vec::new(), None)
    }

    /// Registers a leaf value whose gradient nobody is going to ask for.
    ///
    /// Identical to [`Graph::input`] on the tape; the distinction is for readers.
    pub fn constant(&self, value: Tensor<f64>) -> Var<'_> {
        self.push(value, Vec::new(), None)
    }

    fn push(&self, value: Tensor<f64>, parents: Vec<usize>, back: Option<Backward>) -> Var<'_> {
        let mut nodes = self.nodes.borrow_mut();
        nodes.push(Node {
            value,
            parents,
            back,
        });
        Var {
            graph: self,
            index: nodes.len() - 1,
        }
    }

    /// Backpropagates from a single-element `output`, seeding `d(output)/d(output) = 1`.
    ///
    /// # Errors
    /// Returns [`Error::NotScalar`] if `output` holds more than one element.
    pub fn backward(&self, output: Var<'_>) -> Result<Gradients> {
        let value = output.value();
        if value.len() != 1 {
            return Err(Error::NotScalar(value.shape));
        }
        self.backward_with(output, Tensor::ones(value.shape))
    }

    /// Backpropagates an upstream gradient `seed` shaped like `output`.
    ///
    /// Seeding a non-scalar output with ones yields the gradient of the sum of
    /// its elements.
    ///
    /// # Errors
    /// Returns [`Error::SeedShape`] if `seed` is not shaped like `output`.
    pub fn backward_with(&self, output: Var<'_>, seed: Tensor<f64>) -> Result<Gradients> {
        let nodes = self.nodes.borrow();
        let out = &nodes[output.index];
        if out.value.shape != seed.shape {
            return Err(Error::SeedShape {
                expected: out.value.shape.clone(),
                got: seed.shape,
            });
        }

        let mut grads: Vec<Option<Tensor<f64>>> = vec![None; nodes.len()];
        grads[output.index] = Some(seed);

        for i in (0..=output.index).rev() {
            let Some(g) = grads[i].take() else {
                continue;
            };
            let node = &nodes[i];
            if let Some(back) = &node.back {
                for (&parent, pg) in node.parents.iter().zip(back(&g)) {
                    if let Some(acc) = grads[parent].as_mut() {
                        for (a, b) in acc.data.iter_mut().zip(&pg.data) {
                            *a += *b;
                        }
                    } else {
                        grads[parent] = Some(pg);
                    }
                }
            }
            grads[i] = Some(g);
        }

        let grads = grads
            .into_iter()
            .zip(nodes.iter())
            .map(|(g, node)| g.unwrap_or_else(|| node.value.zeros_like()))
            .collect();
        Ok(Gradients { grads })
    }
}

/// Gradients of one backward pass, indexed by node.
#[derive(Debug, Clone)]
pub struct Gradients {
    grads: Vec<Tensor<f64>>,
}

impl Gradients {
    /// Gradient of the output with respect to `var`.
    ///
    /// Nodes that do not reach the output have zero gradients.
    pub fn wrt(&self, var: Var<'_>) -> &Tensor<f64> {
        &self.grads[var.index]
    }
}

/// A handle to a node on a [`Graph`].
#[derive(Clone, Copy)]
pub struct Var<'g> {
    graph: &'g Graph,
    index: usize,
}

impl fmt::Debug for Var<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Var")
            .field("index", &self.index)
            .field("value", &self.value())
            .finish()
    }
}

impl<'g> Var<'g> {
    /// The tape this variable lives on.
    pub fn graph(&self) -> &'g Graph {
        self.graph
    }

    /// A copy of the forward value.
    pub fn value(&self) -> Tensor<f64> {
        self.graph.nodes.borrow()[self.index].value.clone()
    }

    /// Shape of the forward value.
    pub fn shape(&self) -> Vec<usize> {
        self.graph.nodes.borrow()[self.index].value.shape.clone()
    }

    /// The forward value of a single-element variable.
    ///
    /// # Errors
    /// Returns [`Error::NotScalar`] for multi-element values.
    pub fn item(&self) -> Result<f64> {
        self.graph.nodes.borrow()[self.index].value.item()
    }

    /// A constant on the same tape.
    pub fn constant(&self, value: Tensor<f64>) -> Var<'g> {
        self.graph.constant(value)
    }

    fn unary<F, B>(self, forward: F, backward: B) -> Var<'g>
    where
        F: Fn(f64) -> f64 + Sync + Send,
        B: Fn(&Tensor<f64>, &Tensor<f64>) -> Tensor<f64> + 'static,
    {
        let x = self.value();
        let out = x.map(forward);
        let back = move |g: &Tensor<f64>| vec![backward(&x, g)];
        self.graph.push(out, vec![self.index], Some(Box::new(back)))
    }

    fn binary<F, B>(self, rhs: Var<'g>, forward: F, backward: B) -> Var<'g>
    where
        F: Fn(f64, f64) -> f64 + Sync + Send,
        B: Fn(&Tensor<f64>, &Tensor<f64>, &Tensor<f64>) -> (Tensor<f64>, Tensor<f64>) + 'static,
    {
        assert!(
            core::ptr::eq(self.graph, rhs.graph),
            "variables belong to different graphs"
        );
        let a = self.value();
        let b = rhs.value();
        let out = a.zip_map(&b, forward);
        let back = move |g: &Tensor<f64>| {
            let (ga, gb) = backward(&a, &b, g);
            vec![ga.reduce_to(&a.shape), gb.reduce_to(&b.shape)]
        };
        self.graph
            .push(out, vec![self.index, rhs.index], Some(Box::new(back)))
    }

    /// `-x`
    pub fn neg(self) -> Var<'g> {
        self.unary(|x| -x, |_, g| g.map(|g| -g))
    }

    /// `x²`
    pub fn square(self) -> Var<'g> {
        self.unary(|x| x * x, |x, g| x.zip_map(g, |x, g| 2.0 * x * g))
    }

    /// `√x`
    pub fn sqrt(self) -> Var<'g> {
        self.unary(f64::sqrt, |x, g| x.zip_map(g, |x, g| g / (2.0 * x.sqrt())))
    }

    /// `eˣ`
    pub fn exp(self) -> Var<'g> {
        self.unary(f64::exp, |x, g| x.zip_map(g, |x, g| g * x.exp()))
    }

    /// Natural logarithm.
    pub fn ln(self) -> Var<'g> {
        self.unary(f64::ln, |x, g| x.zip_map(g, |x, g| g / x))
    }

    /// `xᵖ` for a constant exponent.
    pub fn powf(self, p: f64) -> Var<'g> {
        self.unary(
            move |x| x.powf(p),
            move |x, g| x.zip_map(g, |x, g| g * p * x.powf(p - 1.0)),
        )
    }

    /// `k·x` for a constant factor.
    pub fn scale(self, k: f64) -> Var<'g> {
        self.unary(move |x| k * x, move |_, g| g.map(|g| k * g))
    }

    /// Sum of all elements, as a scalar.
    pub fn sum(self) -> Var<'g> {
        let x = self.value();
        let shape = x.shape.clone();
        let out = Tensor::scalar(x.sum());
        let back = move |g: &Tensor<f64>| vec![Tensor::full(shape.clone(), g.data[0])];
        self.graph.push(out, vec![self.index], Some(Box::new(back)))
    }

    /// Mean of all elements, as a scalar.
    pub fn mean(self) -> Var<'g> {
        let n = self.graph.nodes.borrow()[self.index].value.len().max(1);
        self.sum().scale(1.0 / n as f64)
    }
}

impl<'g> Add for Var<'g> {
    type Output = Var<'g>;

    fn add(self, rhs: Var<'g>) -> Var<'g> {
        self.binary(rhs, |a, b| a + b, |_, _, g| (g.clone(), g.clone()))
    }
}

impl<'g> Sub for Var<'g> {
    type Output = Var<'g>;

    fn sub(self, rhs: Var<'g>) -> Var<'g> {
        self.binary(rhs, |a, b| a - b, |_, _, g| (g.clone(), g.map(|g| -g)))
    }
}

impl<'g> Mul for Var<'g> {
    type Output = Var<'g>;

    fn mul(self, rhs: Var<'g>) -> Var<'g> {
        self.binary(
            rhs,
            |a, b| a * b,
            |a, b, g| (g.zip_map(b, |g, b| g * b), g.zip_map(a, |g, a| g * a)),
        )
    }
}

impl<'g> Div for Var<'g> {
    type Output = Var<'g>;

    fn div(self, rhs: Var<'g>) -> Var<'g> {
        self.binary(
            rhs,
            |a, b| a / b,
            |a, b, g| {
                let ga = g.zip_map(b, |g, b| g / b);
                let gb = g.zip_map(&a.zip_map(b, |a, b| -a / (b * b)), |g, d| g * d);
                (ga, gb)
            },
        )
    }
}

impl<'g> Neg for Var<'g> {
    type Output = Var<'g>;

    fn neg(self) -> Var<'g> {
        Var::neg(self)
    }
}

macro_rules! scalar_rhs {
    ($($trait:ident $method:ident),*) => {$(
        impl<'g> $trait<f64> for Var<'g> {
            type Output = Var<'g>;

            fn $method(self, rhs: f64) -> Var<'g> {
                let rhs = self.constant(Tensor::scalar(rhs));
                $trait::$method(self, rhs)
            }
        }

        impl<'g> $trait<Var<'g>> for f64 {
            type Output = Var<'g>;

            fn $method(self, rhs: Var<'g>) -> Var<'g> {
                let lhs = rhs.constant(Tensor::scalar(self));
                $trait::$method(lhs, rhs)
            }
        }
    )*};
}

scalar_rhs!(Add add, Sub sub, Mul mul, Div div);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approx::assert_close;

    #[test]
    fn square_gradient_is_two_x() {
        let graph = Graph::new();
        let x = graph.input(Tensor::vector(vec![2.0, 3.0]));
        let grads = graph.backward(x.square().sum()).unwrap();
        assert_eq!(grads.wrt(x).data, vec![4.0, 6.0]);
    }

    #[test]
    fn shared_subexpressions_accumulate() {
        // f(x) = x*x + x  =>  f'(x) = 2x + 1
        let graph = Graph::new();
        let x = graph.input(Tensor::scalar(3.0));
        let y = x * x + x;
        let grads = graph.backward(y).unwrap();
        assert_eq!(y.item(), Ok(12.0));
        assert_eq!(grads.wrt(x).data, vec![7.0]);
    }

    #[test]
    fn seed_must_match_output_shape() {
        let graph = Graph::new();
        let x = graph.input(Tensor::vector(vec![2.0, 3.0]));
        let y = x.square();
        assert_eq!(
            graph.backward_with(y, Tensor::scalar(1.0)).unwrap_err(),
            Error::SeedShape {
                expected: vec![2],
                got: vec![],
            }
        );
        let grads = graph.backward_with(y, Tensor::vector(vec![1.0, 0.5])).unwrap();
        assert_eq!(grads.wrt(x).data, vec![4.0, 3.0]);
    }

    #[test]
    fn quotient_rule() {
        let graph = Graph::new();
        let a = graph.input(Tensor::scalar(3.0));
        let b = graph.input(Tensor::scalar(2.0));
        let grads = graph.backward(a / b).unwrap();
        assert_close(grads.wrt(a), &Tensor::scalar(0.5));
        assert_close(grads.wrt(b), &Tensor::scalar(-0.75));
    }

    #[test]
    fn scalar_operands_broadcast_and_reduce() {
        let graph = Graph::new();
        let v = graph.input(Tensor::vector(vec![1.0, 2.0, 3.0]));
        let k = graph.input(Tensor::scalar(2.0));
        let y = (v * k).sum();
        let grads = graph.backward(y).unwrap();
        assert_eq!(y.item(), Ok(12.0));
        assert_eq!(grads.wrt(v).data, vec![2.0, 2.0, 2.0]);
        assert_eq!(grads.wrt(k).data, vec![6.0]);
        assert!(grads.wrt(k).is_scalar());
    }

    #[test]
    fn f64_operands_on_either_side() {
        let graph = Graph::new();
        let x = graph.input(Tensor::scalar(4.0));
        let y = 1.0 - x * 2.0 + x / 4.0;
        let grads = graph.backward(y).unwrap();
        assert_eq!(y.item(), Ok(-6.0));
        assert_close(grads.wrt(x), &Tensor::scalar(-1.75));
    }

    #[test]
    fn transcendental_gradients() {
        let graph = Graph::new();
        let x = graph.input(Tensor::scalar(4.0));
        let y = x.sqrt() + x.ln() + x.exp().scale(0.0) + x.powf(3.0);
        let grads = graph.backward(y).unwrap();
        assert_close(grads.wrt(x), &Tensor::scalar(0.25 + 0.25 + 48.0));
    }

    #[test]
    fn mean_spreads_gradient_evenly() {
        let graph = Graph::new();
        let x = graph.input(Tensor::vector(vec![1.0, 5.0, 9.0, 1.0]));
        let m = x.mean();
        let grads = graph.backward(m).unwrap();
        assert_eq!(m.item(), Ok(4.0));
        assert_eq!(grads.wrt(x).data, vec![0.25; 4]);
    }

    #[test]
    fn unreachable_inputs_get_zero_gradients() {
        let graph = Graph::new();
        let x = graph.input(Tensor::vector(vec![1.0, 2.0]));
        let unused = graph.input(Tensor::vector(vec![7.0, 7.0, 7.0]));
        let grads = graph.backward(x.square().sum()).unwrap();
        assert_eq!(grads.wrt(unused).data, vec![0.0; 3]);
    }

    #[test]
    fn backward_requires_single_element_output() {
        let graph = Graph::new();
        let x = graph.input(Tensor::vector(vec![1.0, 2.0]));
        assert_eq!(
            graph.backward(x.square()).unwrap_err(),
            Error::NotScalar(vec![2])
        );
    }

    #[test]
    #[should_panic(expected = "different graphs")]
    fn mixing_graphs_panics() {
        let g1 = Graph::new();
        let g2 = Graph::new();
        let _ = g1.input(Tensor::scalar(1.0)) + g2.input(Tensor::scalar(1.0));
    }
}
