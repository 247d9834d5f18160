//! Command-line parsing for the voxel-wise kinetic fitter.
//!
//! Argument parsing and command dispatch stay separate from the model and
//! solver code; `app` turns these structs into library calls.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::domain::ModelKind;

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "kfit", version, about = "Parallel voxel-wise compartmental model fitting")]
pub struct Cli {
    /// Log verbosity (error, warn, info, debug, trace).
    #[arg(long, global = true, default_value = "info")]
    pub log_level: tracing::Level,

    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fit every unit of a JSON batch request and write the results.
    Fit(FitArgs),
    /// Evaluate model curves (and optionally the Jacobian) for given parameters.
    Eval(EvalArgs),
    /// Write a synthetic batch request with known ground truth.
    Simulate(SimulateArgs),
}

#[derive(Debug, Args, Clone)]
pub struct FitArgs {
    /// Batch request (JSON).
    #[arg(short, long)]
    pub input: PathBuf,

    /// Result file (JSON).
    #[arg(short, long)]
    pub output: PathBuf,

    /// Replace the request's TACs with the columns of this CSV.
    #[arg(long)]
    pub tac_csv: Option<PathBuf>,

    /// Also export fitted parameters and diagnostics as CSV.
    #[arg(long)]
    pub export_params: Option<PathBuf>,

    /// Also export fitted curves as CSV.
    #[arg(long)]
    pub export_curves: Option<PathBuf>,

    /// Worker threads (0 = auto). Falls back to `KFIT_THREADS`.
    #[arg(short = 'j', long)]
    pub threads: Option<usize>,
}

#[derive(Debug, Args, Clone)]
pub struct EvalArgs {
    /// Evaluation request (JSON).
    #[arg(short, long)]
    pub input: PathBuf,

    /// Evaluation result (JSON).
    #[arg(short, long)]
    pub output: PathBuf,
}

#[derive(Debug, Args, Clone)]
pub struct SimulateArgs {
    #[arg(long, value_enum, default_value_t = ModelKind::OneTissue)]
    pub model: ModelKind,

    /// Number of units (voxels) to generate.
    #[arg(short = 'n', long, default_value_t = 1000)]
    pub units: usize,

    /// Noise scale (0 = noise-free).
    #[arg(long, default_value_t = 0.0)]
    pub noise: f64,

    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Integration step (minutes).
    #[arg(long, default_value_t = 0.01)]
    pub step: f64,

    /// Decay constant (1/min).
    #[arg(long, default_value_t = 0.0)]
    pub decay: f64,

    #[arg(long, default_value_t = 50)]
    pub max_iterations: usize,

    /// Batch request to write (JSON).
    #[arg(short, long)]
    pub output: PathBuf,

    /// Also write the ground-truth parameters (JSON matrix).
    #[arg(long)]
    pub truth: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fit_with_threads() {
        let cli = Cli::parse_from(["kfit", "fit", "-i", "req.json", "-o", "out.json", "-j", "4"]);
        match cli.command {
            Command::Fit(args) => {
                assert_eq!(args.threads, Some(4));
                assert_eq!(args.input, PathBuf::from("req.json"));
                assert!(args.export_params.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert_eq!(cli.log_level, tracing::Level::INFO);
    }

    #[test]
    fn parses_simulate_model_names() {
        let cli = Cli::parse_from([
            "kfit", "--log-level", "debug", "simulate", "--model", "liver", "-n", "8", "-o", "batch.json",
        ]);
        assert_eq!(cli.log_level, tracing::Level::DEBUG);
        match cli.command {
            Command::Simulate(args) => {
                assert_eq!(args.model, ModelKind::Liver);
                assert_eq!(args.units, 8);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
