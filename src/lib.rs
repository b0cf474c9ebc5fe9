//! web_optimizer: gradient-based minimization of small scalar functions.
//!
//! A reverse-mode autodiff tape over `f64` tensors, `grad`/`grads`
//! transforms, SGD and Adam optimizers, and a toy layout objective that pulls
//! shapes toward a target the way a constraint-based diagramming system would.
//!
//! # Modules
//!
//! - [`tensors`] — Tensor data structure, element-wise helpers, console printing.
//! - [`graph`] — The autodiff tape and the [`graph::Var`] handle.
//! - [`backprop`] — `grad`, `grads`, `tuplify` and named objectives.
//! - [`variables`] — Trainable parameters.
//! - [`optim`] — SGD, Adam and the `minimize` step.
//! - [`train`] — Minimization loops, reports and optimizer comparisons.
//! - [`shapes`] — Shapes, the `center` objective and layout problems.
//! - [`approx`] — Graded float comparisons used by the tests.
//! - [`telemetry`] — `tracing` subscriber setup.
//!
//! # Example
//!
//! ```rust
//! use web_optimizer::optim::{Adam, Optimizer};
//! use web_optimizer::tensors::Tensor;
//! use web_optimizer::variables::Variable;
//!
//! let mut vars = [Variable::new("a", Tensor::scalar(0.7))];
//! let mut opt = Adam::new(0.1);
//! let mut cost = f64::INFINITY;
//! for _ in 0..100 {
//!     cost = opt.minimize(&mut vars, &|xs| xs[0].square()).unwrap();
//! }
//! assert!(cost < 0.01);
//! ```

pub mod approx;
pub mod backprop;
pub mod error;
pub mod graph;
pub mod optim;
pub mod shapes;
pub mod telemetry;
pub mod tensors;
pub mod train;
pub mod variables;

pub use error::{Error, Result};
