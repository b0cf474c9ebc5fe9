//! Minimization loops, convergence reports and optimizer comparisons.

use crate::backprop::ListFn;
use crate::error::{Error, Result};
use crate::optim::{Optimizer, OptimizerKind};
use crate::tensors::Tensor;
use crate::variables::Variable;
use core::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, info, info_span, trace};

/// Knobs for a minimization run.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainConfig {
    /// Step size handed to the optimizer.
    pub learning_rate: f64,
    /// Upper bound on the number of steps.
    pub iterations: usize,
    /// Stop early once the cost drops below this value.
    pub tolerance: Option<f64>,
    /// Seed for randomly initialised variables; `None` draws from the OS.
    pub seed: Option<u64>,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            iterations: 100,
            tolerance: None,
            seed: None,
        }
    }
}

impl TrainConfig {
    /// Rejects configurations that cannot make progress.
    ///
    /// # Errors
    /// Returns [`Error::Config`] describing the first offending field.
    pub fn check(&self) -> Result<()> {
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(Error::Config("learning rate must be finite and positive"));
        }
        if self.iterations == 0 {
            return Err(Error::Config("iterations must be at least 1"));
        }
        if self.tolerance.is_some_and(|t| !t.is_finite()) {
            return Err(Error::Config("tolerance must be finite"));
        }
        Ok(())
    }
}

/// Outcome of one minimization run.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub optimizer: &'static str,
    /// Steps actually taken.
    pub steps: usize,
    /// Cost returned by the last step (evaluated before its update).
    pub cost: f64,
    /// Cost per step.
    pub history: Vec<f64>,
    /// Whether the tolerance was reached.
    pub converged: bool,
    pub elapsed: Duration,
    /// Variable values after the run, in order.
    pub params: Vec<Tensor<f64>>,
}

impl Report {
    /// First step at which the cost fell below `threshold`.
    pub fn steps_to(&self, threshold: f64) -> Option<usize> {
        self.history.iter().position(|&c| c < threshold).map(|i| i + 1)
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<6} steps={:<5} cost={:<12.6e} converged={:<5} elapsed={:?}",
            self.optimizer, self.steps, self.cost, self.converged, self.elapsed
        )
    }
}

/// Repeatedly calls [`Optimizer::minimize`] on `f` until the step budget is
/// spent or the cost drops below the tolerance.
///
/// The optimizer's learning rate is replaced by `config.learning_rate` before
/// the first step.
///
/// # Errors
/// Returns [`Error::Config`] for unusable configs and propagates objective errors.
pub fn optimize(
    opt: &mut dyn Optimizer,
    vars: &mut [Variable],
    f: &ListFn<'_>,
    config: &TrainConfig,
) -> Result<Report> {
    config.check()?;
    opt.set_learning_rate(config.learning_rate);

    let span = info_span!("optimize", optimizer = opt.name(), vars = vars.len());
    let _guard = span.enter();

    let start = Instant::now();
    let mut history = Vec::with_capacity(config.iterations);
    let mut converged = false;

    for step in 1..=config.iterations {
        let cost = opt.minimize(vars, f)?;
        trace!(step, cost, "step");
        history.push(cost);

        if config.tolerance.is_some_and(|tol| cost < tol) {
            debug!(step, cost, "tolerance reached");
            converged = true;
            break;
        }
    }

    let elapsed = start.elapsed();
    let cost = history.last().copied().unwrap_or(f64::NAN);
    info!(steps = history.len(), cost, ?elapsed, converged, "finished");

    Ok(Report {
        optimizer: opt.name(),
        steps: history.len(),
        cost,
        history,
        converged,
        elapsed,
        params: Variable::snapshot(vars),
    })
}

/// Runs every optimizer in `kinds` from the same starting point `init`.
///
/// Each run works on its own copy of `init`, so the caller's variables are
/// left untouched.
///
/// # Errors
/// Fails on the first run that fails.
pub fn compare(
    kinds: &[OptimizerKind],
    init: &[Variable],
    f: &ListFn<'_>,
    config: &TrainConfig,
) -> Result<Vec<Report>> {
    kinds
        .iter()
        .map(|kind| {
            let mut vars = init.to_vec();
            let mut opt = kind.build(config.learning_rate);
            optimize(&mut *opt, &mut vars, f, config)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Var;
    use crate::optim::Adam;

    fn square<'g>(xs: &[Var<'g>]) -> Var<'g> {
        xs[0].square()
    }

    #[test]
    fn config_validation() {
        assert!(TrainConfig::default().check().is_ok());
        let bad = TrainConfig {
            iterations: 0,
            ..TrainConfig::default()
        };
        assert_eq!(bad.check(), Err(Error::Config("iterations must be at least 1")));
        let bad = TrainConfig {
            learning_rate: -1.0,
            ..TrainConfig::default()
        };
        assert!(bad.check().is_err());
    }

    #[test]
    fn runs_full_budget_without_tolerance() {
        let mut vars = [Variable::new("a", Tensor::scalar(0.5))];
        let report = optimize(&mut Adam::new(0.1), &mut vars, &square, &TrainConfig::default())
            .unwrap();
        assert_eq!(report.steps, 100);
        assert_eq!(report.history.len(), 100);
        assert!(!report.converged);
        assert!(report.cost < 0.25);
        assert_eq!(report.params, vec![vars[0].value().clone()]);
    }

    #[test]
    fn stops_at_tolerance() {
        let mut vars = [Variable::new("a", Tensor::scalar(0.5))];
        let config = TrainConfig {
            learning_rate: 0.25,
            tolerance: Some(1e-6),
            ..TrainConfig::default()
        };
        let mut opt = crate::optim::Sgd::new(0.0);
        let report = optimize(&mut opt, &mut vars, &square, &config).unwrap();
        // a halves every step: cost 0.25 * 0.25^k
        assert!(report.converged);
        assert!(report.steps < 100);
        assert_eq!(report.steps_to(1e-6), Some(report.steps));
        assert_eq!(opt.lr, 0.25);
    }

    #[test]
    fn compare_leaves_inputs_untouched() {
        let init = [Variable::new("a", Tensor::scalar(0.8))];
        let reports = compare(&OptimizerKind::ALL, &init, &square, &TrainConfig::default())
            .unwrap();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].optimizer, "sgd");
        assert_eq!(reports[1].optimizer, "adam");
        assert_eq!(init[0].value(), &Tensor::scalar(0.8));
    }
}
