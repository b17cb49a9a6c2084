#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

use clap::{Args, CommandFactory, Parser, Subcommand};
use itertools::Itertools;
use std::path::PathBuf;
use std::process;

use hazardlik::config::ModelConfig;
use hazardlik::gradcheck::{DEFAULT_STEP, max_gradient_discrepancy};
use hazardlik::table::load_survival_table;

#[derive(Args)]
pub struct ModelArgs {
    /// Path to a TSV file with t, d and optional t0, wt, ctype, ltime, rtime and covariate columns
    #[arg(value_name = "DATA")]
    pub data: PathBuf,

    /// Path to the TOML model description
    #[arg(long, value_name = "TOML")]
    pub config: PathBuf,
}

#[derive(Parser)]
#[command(
    name = "hazardlik",
    about = "Survival-model log-likelihoods with analytic gradients",
    long_about = "Evaluates Weibull, interval-censored Weibull and restricted cubic spline \
                 hazard log-likelihoods on tabular survival data."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate the configured log-likelihood at the configured parameters
    #[command(about = "Evaluate a log-likelihood")]
    Evaluate {
        #[command(flatten)]
        model: ModelArgs,

        /// Also print the gradient, one block per line
        #[arg(long)]
        gradient: bool,
    },

    /// Compare the analytic gradient with central finite differences
    #[command(about = "Check the analytic gradient")]
    CheckGradient {
        #[command(flatten)]
        model: ModelArgs,

        /// Relative finite-difference step
        #[arg(long, default_value_t = DEFAULT_STEP)]
        step: f64,
    },
}

fn evaluate(args: ModelArgs, gradient: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = ModelConfig::load(&args.config)?;
    let table = load_survival_table(
        &args.data,
        &config.covariate_columns(),
        config.model.needs_interval_columns(),
    )?;
    let built = config.build(&table)?;
    let model = built.likelihood(&table.batch)?;
    let state = model.evaluate(&built.params)?;

    println!("log_likelihood\t{:.12}", state.log_likelihood);
    if gradient {
        for (equation, block) in built.design.equations.iter().zip(&state.gradient.blocks) {
            println!(
                "gradient[{}]\t{}",
                equation.name,
                block.iter().map(|g| format!("{g:.12}")).join("\t")
            );
        }
    }
    Ok(())
}

fn check_gradient(args: ModelArgs, step: f64) -> Result<(), Box<dyn std::error::Error>> {
    let config = ModelConfig::load(&args.config)?;
    let table = load_survival_table(
        &args.data,
        &config.covariate_columns(),
        config.model.needs_interval_columns(),
    )?;
    let built = config.build(&table)?;
    let model = built.likelihood(&table.batch)?;
    let report = max_gradient_discrepancy(model.as_ref(), &built.params, step)?;

    println!("index\tanalytic\tnumeric");
    for (j, (a, n)) in report.analytic.iter().zip(report.numeric.iter()).enumerate() {
        println!("{j}\t{a:.10e}\t{n:.10e}");
    }
    println!("max_abs_difference\t{:.3e}", report.max_abs_difference());
    println!("max_relative_difference\t{:.3e}", report.max_relative_difference());
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    let Cli { command } = cli;

    let result = match command {
        Some(Commands::Evaluate { model, gradient }) => evaluate(model, gradient),
        Some(Commands::CheckGradient { model, step }) => check_gradient(model, step),
        None => Cli::command()
            .print_help()
            .map(|_| println!())
            .map_err(Into::into),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
