//! Top-level application orchestration.
//!
//! `src/main.rs` stays tiny; this module is the real main that:
//! - loads `.env` and parses CLI arguments
//! - sets up logging
//! - runs batch fits, curve evaluation or simulation
//! - writes results and optional CSV exports

use std::time::Instant;

use clap::Parser;
use tracing::info;

use crate::cli::{Cli, Command, EvalArgs, FitArgs, SimulateArgs};
use crate::data::{generate_batch, SimulationSpec};
use crate::domain::DispatchOptions;
use crate::error::{FitError, Result};
use crate::fit::fit_batch;
use crate::io::{
    read_eval_request, read_request, read_tac_csv, write_curves_csv, write_eval, write_matrix, write_params_csv,
    write_request, write_result, EvalFile, ResultFile,
};
use crate::models::{evaluate_curves, evaluate_jacobian, ModelConfig};

/// Environment fallback for `--threads`.
pub const THREADS_ENV: &str = "KFIT_THREADS";

/// Entry point for the `kfit` binary.
pub fn run() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(cli.log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Fit(args) => handle_fit(args),
        Command::Eval(args) => handle_eval(args),
        Command::Simulate(args) => handle_simulate(args),
    }
}

fn handle_fit(args: FitArgs) -> Result<()> {
    let mut request = read_request(&args.input)?;
    if let Some(path) = &args.tac_csv {
        let table = read_tac_csv(path)?;
        info!(units = table.units.len(), frames = table.tac.nrows(), "Loaded TACs from {}", path.display());
        request.tac = table.tac;
    }

    let env = std::env::var(THREADS_ENV).ok();
    let opts = dispatch_options(args.threads, env.as_deref())?;

    let started = Instant::now();
    let output = fit_batch(&request, &opts)?;
    let elapsed = started.elapsed();

    write_result(&args.output, &ResultFile::new(request.model, &output))?;
    if let Some(path) = &args.export_params {
        write_params_csv(path, request.model, &output)?;
    }
    if let Some(path) = &args.export_curves {
        write_curves_csv(path, &request.frames, &output)?;
    }

    println!(
        "{}: fitted {} units ({} converged) on {} threads in {:.2}s -> {}",
        request.model.display_name(),
        output.unit_count(),
        output.converged_count(),
        output.threads_used,
        elapsed.as_secs_f64(),
        args.output.display()
    );
    Ok(())
}

fn handle_eval(args: EvalArgs) -> Result<()> {
    let req = read_eval_request(&args.input)?;
    let config = ModelConfig::new(req.model, req.frames, &req.plasma, &req.whole_blood, req.decay, req.step)?;
    let curves = evaluate_curves(&config, &req.params)?;

    let jacobian = if req.jacobian {
        let np = req.params.nrows();
        if req.params.ncols() == 0 {
            return Err(FitError::shape("Jacobian requested but no parameter columns were given."));
        }
        let (_, jac) = evaluate_jacobian(&config, &req.params.as_slice()[..np])?;
        Some(jac)
    } else {
        None
    };

    write_eval(&args.output, &EvalFile::new(req.model, curves, jacobian.as_ref()))?;
    println!(
        "{}: evaluated {} curves -> {}",
        req.model.display_name(),
        req.params.ncols(),
        args.output.display()
    );
    Ok(())
}

fn handle_simulate(args: SimulateArgs) -> Result<()> {
    let spec = SimulationSpec {
        model: args.model,
        units: args.units,
        noise: args.noise,
        seed: args.seed,
        step: args.step,
        decay: args.decay,
        max_iterations: args.max_iterations,
    };
    let data = generate_batch(&spec)?;

    write_request(&args.output, &data.request)?;
    if let Some(path) = &args.truth {
        write_matrix(path, &data.truth)?;
    }

    println!(
        "{}: simulated {} units over {} frames -> {}",
        spec.model.display_name(),
        data.request.unit_count(),
        data.request.frame_count(),
        args.output.display()
    );
    Ok(())
}

/// `--threads` wins over the environment; an unparsable environment value is
/// a configuration error rather than silently ignored.
pub fn dispatch_options(cli_threads: Option<usize>, env_threads: Option<&str>) -> Result<DispatchOptions> {
    let threads = match (cli_threads, env_threads) {
        (Some(n), _) => Some(n),
        (None, Some(raw)) if !raw.trim().is_empty() => Some(raw.trim().parse::<usize>().map_err(|_| {
            FitError::config(format!("{THREADS_ENV} must be a non-negative integer (got '{raw}')."))
        })?),
        _ => None,
    };
    Ok(DispatchOptions { threads })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_threads_override_environment() {
        assert_eq!(dispatch_options(Some(2), Some("8")).unwrap().threads, Some(2));
        assert_eq!(dispatch_options(None, Some(" 8 ")).unwrap().threads, Some(8));
        assert_eq!(dispatch_options(None, None).unwrap().threads, None);
        assert_eq!(dispatch_options(None, Some("")).unwrap().threads, None);
    }

    #[test]
    fn garbage_environment_is_a_config_error() {
        let err = dispatch_options(None, Some("many")).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }
}
