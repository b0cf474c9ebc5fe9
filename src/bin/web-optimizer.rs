//! Console walk-through of the gradient and optimizer APIs.
//!
//! Usage:
//!   web-optimizer                      # the full walk-through
//!   web-optimizer compare --tolerance 1e-6
//!   web-optimizer layout --optimizer sgd --iterations 300

use clap::{Args, Parser, Subcommand};
use rand::rngs::StdRng;
use rand::{SeedableRng, rng};
use std::process::ExitCode;
use tracing::{error, info};
use web_optimizer::backprop::{grad, grads, grads_n, tuplify, value_and_grads_n};
use web_optimizer::graph::Var;
use web_optimizer::optim::OptimizerKind;
use web_optimizer::shapes::{
    Gpi, ObjectiveFn, ObjectiveRegistry, OptProblem, center, center_list, center_tuple,
};
use web_optimizer::telemetry;
use web_optimizer::tensors::Tensor;
use web_optimizer::train::{TrainConfig, compare, optimize};
use web_optimizer::variables::Variable;

#[derive(Parser)]
#[command(name = "web-optimizer")]
#[command(about = "Minimize small objectives with autodiff + SGD/Adam", long_about = None)]
struct Cli {
    #[command(flatten)]
    opts: Opts,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args)]
struct Opts {
    /// Learning rate
    #[arg(long, global = true, default_value_t = 0.1)]
    lr: f64,

    /// Steps per minimization run
    #[arg(long, global = true, default_value_t = 100)]
    iterations: usize,

    /// Optimizer used by the walk-through and the layout solver
    #[arg(long, global = true, value_enum, default_value_t = OptimizerKind::Adam)]
    optimizer: OptimizerKind,

    /// Seed for the random initial values
    #[arg(long, global = true)]
    seed: Option<u64>,

    /// Stop a run once the cost drops below this value
    #[arg(long, global = true)]
    tolerance: Option<f64>,
}

impl Opts {
    fn config(&self) -> TrainConfig {
        TrainConfig {
            learning_rate: self.lr,
            iterations: self.iterations,
            tolerance: self.tolerance,
            seed: self.seed,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Gradients, minimize on one and two variables (default)
    Walkthrough,
    /// Race every optimizer on f(a) = a² from the same start
    Compare,
    /// Solve a small layout problem built from the center objective
    Layout,
}

fn square<'g>(x: Var<'g>) -> Var<'g> {
    x.square()
}

fn rng_for(config: &TrainConfig) -> StdRng {
    match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_rng(&mut rng()),
    }
}

fn walkthrough(kind: OptimizerKind, config: &TrainConfig) -> web_optimizer::Result<()> {
    let mut rng = rng_for(config);

    // f(x) = x², f'(x) = 2x
    let g = grad(square);
    let x = Tensor::vector(vec![2.0, 3.0]);
    println!("f'(x) = ");
    println!("{}", g(&x)?);

    // minimize f on a single variable
    let mut opt = kind.build(config.learning_rate);
    let mut a = [Variable::random_scalar("a", &mut rng)];
    let report = optimize(&mut *opt, &mut a, &|xs| square(xs[0]), config)?;
    println!("a: {}", a[0].value().item()?);
    println!("f(a): {}", report.cost);

    // the center objective on a circle
    let gpi = Gpi::new("circA", 10.0, 25.0, 3.0)?;
    let varying = gpi.varying_values();
    let (value, _) = value_and_grads_n(&center_tuple, &varying)?;
    println!("centerFn2(gpi2) = ");
    println!("{value}");

    println!("centerFn3'(gpi2) = ");
    let df = grads(|xs| center(xs[0], xs[1]));
    let d = df(varying.as_slice())?;
    println!("{}", d[0]);
    println!("{}", d[1]);

    // the list-form objective through a fixed-arity adapter
    let f_tup = tuplify::<2, _>(center_list);
    let (f_tup_res, _) = value_and_grads_n(&f_tup, &varying)?;
    println!("fTupRes = ");
    println!("{f_tup_res}");

    println!("centerFn4'(gpi2) = ");
    let [dx4, dy4] = grads_n(f_tup)(&varying)?;
    println!("{dx4}");
    println!("{dy4}");

    // minimize over (c, d) with the same optimizer
    let mut vars = [
        Variable::random_scalar("c", &mut rng),
        Variable::random_scalar("d", &mut rng),
    ];
    let report = optimize(&mut *opt, &mut vars, &center_list, config)?;
    println!(
        "c: {}, d: {}",
        vars[0].value().item()?,
        vars[1].value().item()?
    );
    println!("f(a): {}", report.cost);
    Ok(())
}

fn race(config: &TrainConfig) -> web_optimizer::Result<()> {
    let mut rng = rng_for(config);
    let init = [Variable::random_scalar("a", &mut rng)];
    println!("a0: {}", init[0].value().item()?);

    let reports = compare(&OptimizerKind::ALL, &init, &|xs| square(xs[0]), config)?;
    for report in &reports {
        println!("{report}");
        if let Some(threshold) = config.tolerance {
            match report.steps_to(threshold) {
                Some(n) => println!("       reached {threshold:e} after {n} steps"),
                None => println!("       never reached {threshold:e}"),
            }
        }
    }
    Ok(())
}

fn layout(kind: OptimizerKind, config: &TrainConfig) -> web_optimizer::Result<()> {
    let shapes = vec![
        Gpi::new("circA", 10.0, 25.0, 3.0)?,
        Gpi::new("circB", -40.0, 5.0, 8.0)?,
    ];
    let objectives = [
        ObjectiveFn::new("centerFn", ["circA"]),
        ObjectiveFn::new("center", ["circB"]),
    ];
    let mut problem = OptProblem::new(shapes, &objectives, &ObjectiveRegistry::default())?;

    let x0 = problem.varying_values();
    println!("F[X0] = {}", problem.energy(&x0)?);
    println!("dF/dX0 = ");
    for g in problem.gradient(&x0)? {
        println!("{g}");
    }

    let mut opt = kind.build(config.learning_rate);
    let report = problem.solve(&mut *opt, config)?;
    println!("{report}");
    for s in problem.shapes() {
        println!("{}: x={:.6} y={:.6} r={}", s.name, s.x, s.y, s.r);
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(err) = telemetry::init_tracing() {
        eprintln!("failed to initialise logging: {err}");
    }

    let config = cli.opts.config();
    let kind = cli.opts.optimizer;
    info!(optimizer = %kind, lr = config.learning_rate, iterations = config.iterations, "starting");

    let result = match cli.command.unwrap_or(Commands::Walkthrough) {
        Commands::Walkthrough => walkthrough(kind, &config),
        Commands::Compare => race(&config),
        Commands::Layout => layout(kind, &config),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}
