//! Shape layout objectives.
//!
//! # Layout Problems
//!
//! A layout is a set of graphical primitive instances ([`Gpi`]) plus a list
//! of objective applications ([`ObjectiveFn`]), e.g. "center `circA`". The
//! optimization problem built from them is
//!
//! ```text
//! F[X]  = Σ objective(values of its shapes)
//! dF/dX = [dF/dX1, …, dFn/dXn]
//! ```
//!
//! where `X` are the *varying* values of every shape (its `x` and `y`; the
//! radius stays fixed). Solving the problem minimizes `F` and writes the
//! result back into the shapes.
//!
//! Constraints are not supported: every objective is minimized as a plain
//! penalty.

use crate::backprop::{Objective, value_and_grads};
use crate::error::{Error, Result};
use crate::graph::Var;
use crate::optim::Optimizer;
use crate::tensors::Tensor;
use crate::train::{Report, TrainConfig, optimize};
use crate::variables::Variable;
use briny::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Number of optimized values each shape contributes (`x`, `y`).
pub const VARYING_PER_SHAPE: usize = 2;

/// A graphical primitive instance: a named circle.
#[derive(Debug, Clone, PartialEq)]
pub struct Gpi {
    pub name: String,
    pub x: f64,
    pub y: f64,
    pub r: f64,
}

impl Validate for Gpi {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.name.is_empty()
            || !self.x.is_finite()
            || !self.y.is_finite()
            || !self.r.is_finite()
            || self.r < 0.0
        {
            return Err(ValidationError);
        }
        Ok(())
    }
}

impl Gpi {
    /// A validated shape.
    ///
    /// # Errors
    /// Returns [`Error::InvalidShape`] for an empty name, non-finite
    /// coordinates or a negative radius.
    pub fn new(name: impl Into<String>, x: f64, y: f64, r: f64) -> Result<Self> {
        let name = name.into();
        let raw = Self {
            name: name.clone(),
            x,
            y,
            r,
        };
        let trusted = TrustedData::new(raw).map_err(|_| Error::InvalidShape(name))?;
        Ok(trusted.into_inner())
    }

    /// The values an optimizer may move, as scalars: `[x, y]`.
    pub fn varying_values(&self) -> [Tensor<f64>; VARYING_PER_SHAPE] {
        [Tensor::scalar(self.x), Tensor::scalar(self.y)]
    }

    /// Writes optimized `[x, y]` back.
    ///
    /// # Errors
    /// Returns [`Error::ValueCount`] unless exactly two values are given and
    /// [`Error::NotScalar`] if either holds more than one element.
    pub fn set_varying(&mut self, values: &[Tensor<f64>]) -> Result<()> {
        let [x, y] = values else {
            return Err(Error::ValueCount {
                expected: VARYING_PER_SHAPE,
                got: values.len(),
            });
        };
        self.x = x.item()?;
        self.y = y.item()?;
        Ok(())
    }
}

/// `x² + y²`: pulls a shape toward the origin.
pub fn center<'g>(x: Var<'g>, y: Var<'g>) -> Var<'g> {
    x.square() + y.square()
}

/// [`center`] over a fixed-arity argument array.
pub fn center_tuple<'g>([x, y]: [Var<'g>; 2]) -> Var<'g> {
    center(x, y)
}

/// [`center`] over an argument list `[x, y]`.
///
/// # Panics
/// Panics if fewer than two arguments are given; go through an
/// [`Objective`] to get an error instead.
pub fn center_list<'g>(args: &[Var<'g>]) -> Var<'g> {
    center(args[0], args[1])
}

/// An objective applied to named shapes, e.g. `{ name: "centerFn", args: ["circA"] }`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectiveFn {
    pub name: String,
    pub args: Vec<String>,
}

impl ObjectiveFn {
    pub fn new<I, S>(name: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

/// Named list-form objectives. Arities count values, not shapes.
#[derive(Debug, Clone)]
pub struct ObjectiveRegistry {
    entries: HashMap<String, Arc<Objective>>,
}

impl Default for ObjectiveRegistry {
    /// A registry with `center` (also reachable as `centerFn`).
    fn default() -> Self {
        let center = Arc::new(Objective::new("center", center_list).with_arity(VARYING_PER_SHAPE));
        let mut entries = HashMap::new();
        entries.insert("center".to_owned(), Arc::clone(&center));
        entries.insert("centerFn".to_owned(), center);
        Self { entries }
    }
}

impl ObjectiveRegistry {
    /// A registry with no objectives.
    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Adds or replaces `objective` under its own name.
    pub fn register(&mut self, objective: Objective) {
        self.entries
            .insert(objective.name().to_owned(), Arc::new(objective));
    }

    /// Looks up an objective by name.
    ///
    /// # Errors
    /// Returns [`Error::UnknownObjective`] if nothing is registered under `name`.
    pub fn get(&self, name: &str) -> Result<Arc<Objective>> {
        self.entries
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownObjective(name.to_owned()))
    }
}

#[derive(Debug, Clone)]
struct Term {
    objective: Arc<Objective>,
    /// Indices into the flat varying-value list.
    values: Vec<usize>,
}

/// `F[X] = Σ objective terms` over the varying values of a set of shapes.
#[derive(Debug, Clone)]
pub struct OptProblem {
    shapes: Vec<Gpi>,
    terms: Vec<Term>,
}

impl OptProblem {
    /// Resolves every objective application against `registry` and `shapes`.
    ///
    /// # Errors
    /// - [`Error::EmptyProblem`] without objectives
    /// - [`Error::DuplicateShape`] when two shapes share a name
    /// - [`Error::UnknownObjective`] / [`Error::UnknownShape`] for unresolved names
    /// - [`Error::Arity`] when an objective gets the wrong number of values
    pub fn new(
        shapes: Vec<Gpi>,
        objectives: &[ObjectiveFn],
        registry: &ObjectiveRegistry,
    ) -> Result<Self> {
        if objectives.is_empty() {
            return Err(Error::EmptyProblem);
        }

        let mut index: HashMap<&str, usize> = HashMap::with_capacity(shapes.len());
        for (i, s) in shapes.iter().enumerate() {
            if index.insert(s.name.as_str(), i).is_some() {
                return Err(Error::DuplicateShape(s.name.clone()));
            }
        }

        let terms = objectives
            .iter()
            .map(|app| -> Result<Term> {
                let objective = registry.get(&app.name)?;
                let mut values = Vec::with_capacity(app.args.len() * VARYING_PER_SHAPE);
                for arg in &app.args {
                    let shape = *index
                        .get(arg.as_str())
                        .ok_or_else(|| Error::UnknownShape(arg.clone()))?;
                    values.extend((0..VARYING_PER_SHAPE).map(|k| shape * VARYING_PER_SHAPE + k));
                }
                objective.check_arity(values.len())?;
                Ok(Term { objective, values })
            })
            .collect::<Result<Vec<_>>>()?;
        drop(index);

        Ok(Self { shapes, terms })
    }

    pub fn shapes(&self) -> &[Gpi] {
        &self.shapes
    }

    /// Looks up a shape by name.
    pub fn shape(&self, name: &str) -> Option<&Gpi> {
        self.shapes.iter().find(|s| s.name == name)
    }

    /// The flat varying-value vector `X`, shape by shape.
    pub fn varying_values(&self) -> Vec<Tensor<f64>> {
        self.shapes.iter().flat_map(Gpi::varying_values).collect()
    }

    /// Builds `F` on the tape of `xs`.
    ///
    /// # Panics
    /// Panics if `xs` is shorter than the varying-value vector.
    pub fn energy_of<'g>(&self, xs: &[Var<'g>]) -> Var<'g> {
        self.terms
            .iter()
            .map(|term| {
                let args: Vec<Var<'g>> = term.values.iter().map(|&i| xs[i]).collect();
                (term.objective.as_fn())(&args)
            })
            .reduce(|a, b| a + b)
            .expect("problems always have at least one term")
    }

    fn check_len(&self, values: &[Tensor<f64>]) -> Result<()> {
        let expected = self.shapes.len() * VARYING_PER_SHAPE;
        if values.len() != expected {
            return Err(Error::ValueCount {
                expected,
                got: values.len(),
            });
        }
        Ok(())
    }

    /// `F[X]`.
    ///
    /// # Errors
    /// Returns [`Error::ValueCount`] if `values` does not match the shapes.
    pub fn energy(&self, values: &[Tensor<f64>]) -> Result<f64> {
        self.check_len(values)?;
        let (value, _) = value_and_grads(&|xs| self.energy_of(xs), values)?;
        value.item()
    }

    /// `dF/dX`, one tensor per varying value.
    ///
    /// # Errors
    /// Returns [`Error::ValueCount`] if `values` does not match the shapes.
    pub fn gradient(&self, values: &[Tensor<f64>]) -> Result<Vec<Tensor<f64>>> {
        self.check_len(values)?;
        value_and_grads(&|xs| self.energy_of(xs), values).map(|(_, g)| g)
    }

    /// Minimizes `F` starting from the current shapes and writes the optimum back.
    ///
    /// # Errors
    /// Propagates configuration and objective errors; shapes are only
    /// modified on success.
    pub fn solve(&mut self, opt: &mut dyn Optimizer, config: &TrainConfig) -> Result<Report> {
        let mut vars: Vec<Variable> = self
            .shapes
            .iter()
            .flat_map(|s| {
                let [x, y] = s.varying_values();
                [
                    Variable::new(format!("{}.x", s.name), x),
                    Variable::new(format!("{}.y", s.name), y),
                ]
            })
            .collect();

        let report = optimize(opt, &mut vars, &|xs| self.energy_of(xs), config)?;

        for (shape, chunk) in self.shapes.iter_mut().zip(report.params.chunks(VARYING_PER_SHAPE)) {
            shape.set_varying(chunk)?;
            debug!(shape = %shape.name, x = shape.x, y = shape.y, "updated");
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optim::Sgd;

    fn circ_a() -> Gpi {
        Gpi::new("circA", 10.0, 25.0, 3.0).unwrap()
    }

    #[test]
    fn invalid_shapes_are_rejected() {
        assert_eq!(
            Gpi::new("bad", f64::NAN, 0.0, 1.0),
            Err(Error::InvalidShape("bad".into()))
        );
        assert!(Gpi::new("neg", 0.0, 0.0, -1.0).is_err());
        assert!(Gpi::new("", 0.0, 0.0, 1.0).is_err());
    }

    #[test]
    fn set_varying_round_trips_and_checks_count() {
        let mut s = circ_a();
        s.set_varying(&[Tensor::scalar(1.0), Tensor::scalar(2.0)]).unwrap();
        assert_eq!((s.x, s.y, s.r), (1.0, 2.0, 3.0));
        assert_eq!(
            s.set_varying(&[Tensor::scalar(1.0)]),
            Err(Error::ValueCount {
                expected: 2,
                got: 1
            })
        );
    }

    #[test]
    fn energy_and_gradient_of_centered_circle() {
        let problem = OptProblem::new(
            vec![circ_a()],
            &[ObjectiveFn::new("centerFn", ["circA"])],
            &ObjectiveRegistry::default(),
        )
        .unwrap();
        let x = problem.varying_values();
        assert_eq!(problem.energy(&x).unwrap(), 725.0);
        assert_eq!(
            problem.gradient(&x).unwrap(),
            vec![Tensor::scalar(20.0), Tensor::scalar(50.0)]
        );
        assert!(problem.energy(&x[..1]).is_err());
    }

    #[test]
    fn unresolved_names_fail_construction() {
        let registry = ObjectiveRegistry::default();
        let err = OptProblem::new(vec![circ_a()], &[ObjectiveFn::new("spin", ["circA"])], &registry)
            .unwrap_err();
        assert_eq!(err, Error::UnknownObjective("spin".into()));

        let err = OptProblem::new(vec![circ_a()], &[ObjectiveFn::new("center", ["circB"])], &registry)
            .unwrap_err();
        assert_eq!(err, Error::UnknownShape("circB".into()));

        let other = Gpi::new("circB", 0.0, 0.0, 1.0).unwrap();
        let err = OptProblem::new(
            vec![circ_a(), other],
            &[ObjectiveFn::new("center", ["circA", "circB"])],
            &registry,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Arity { expected: 2, got: 4, .. }));

        assert_eq!(
            OptProblem::new(vec![circ_a()], &[], &registry).unwrap_err(),
            Error::EmptyProblem
        );
    }

    #[test]
    fn duplicate_shape_names_are_rejected() {
        let twin = Gpi::new("circA", 1.0, 1.0, 1.0).unwrap();
        let err = OptProblem::new(
            vec![circ_a(), twin],
            &[ObjectiveFn::new("center", ["circA"])],
            &ObjectiveRegistry::default(),
        )
        .unwrap_err();
        assert_eq!(err, Error::DuplicateShape("circA".into()));
    }

    #[test]
    fn custom_objectives_can_couple_shapes() {
        let mut registry = ObjectiveRegistry::empty();
        // squared distance between two shape centers
        registry.register(
            Objective::new("near", |v| (v[0] - v[2]).square() + (v[1] - v[3]).square())
                .with_arity(4),
        );
        let a = Gpi::new("a", 0.0, 0.0, 1.0).unwrap();
        let b = Gpi::new("b", 3.0, 4.0, 1.0).unwrap();
        let problem =
            OptProblem::new(vec![a, b], &[ObjectiveFn::new("near", ["a", "b"])], &registry)
                .unwrap();
        assert_eq!(problem.energy(&problem.varying_values()).unwrap(), 25.0);
    }

    #[test]
    fn solve_moves_shapes_toward_origin() {
        let mut problem = OptProblem::new(
            vec![circ_a()],
            &[ObjectiveFn::new("center", ["circA"])],
            &ObjectiveRegistry::default(),
        )
        .unwrap();
        let report = problem
            .solve(&mut Sgd::new(0.1), &TrainConfig::default())
            .unwrap();
        let s = problem.shape("circA").unwrap();
        assert!(report.cost < 725.0);
        assert!(s.x.abs() < 1.0 && s.y.abs() < 1.0, "ended at ({}, {})", s.x, s.y);
        assert_eq!(s.r, 3.0);
    }
}
