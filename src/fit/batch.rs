//! Batch fitting entry point.
//!
//! Responsibilities, in order:
//!
//! 1. validate every shape and precondition (nothing runs on bad input)
//! 2. build the shared model configuration, bounds and sensitivity mask
//! 3. broadcast initial parameters and weights to one column per unit
//! 4. dispatch the units to worker threads and collect per-unit reports

use nalgebra::DMatrix;
use tracing::{info, warn};

use crate::domain::{BatchOutput, BatchRequest, DispatchOptions, ParamBounds};
use crate::error::{FitError, Result};
use crate::fit::{broadcast_initial, broadcast_weights, dispatch, resolve_threads, SensitivityMask, UnitContext};
use crate::math::LevmarOptions;
use crate::models::ModelConfig;

/// Fit every unit (TAC column) of `request`.
pub fn fit_batch(request: &BatchRequest, opts: &DispatchOptions) -> Result<BatchOutput> {
    let np = request.model.param_count();
    let nf = request.frame_count();
    let units = request.unit_count();

    let config = ModelConfig::new(
        request.model,
        request.frames.clone(),
        &request.plasma,
        &request.whole_blood,
        request.decay,
        request.step,
    )?;
    if config.frame_count() != nf {
        return Err(FitError::shape(format!(
            "TAC has {nf} frames but the frame schedule has {}.",
            config.frame_count()
        )));
    }

    let bounds = checked_bounds(&request.lower, &request.upper, np)?;
    let mask = SensitivityMask::from_flags(&request.sensitivity, np)?;
    let mut params = broadcast_initial(&request.initial, np, units)?;
    let weights = broadcast_weights(&request.weights, nf, units)?;

    let mut curves = DMatrix::zeros(nf, units);
    if units == 0 {
        info!("Empty batch: nothing to fit");
        return Ok(BatchOutput {
            params,
            curves,
            reports: Vec::new(),
            threads_used: 0,
        });
    }

    let threads = resolve_threads(opts, units);
    info!("Total number of threads: {threads}");
    info!(
        model = request.model.display_name(),
        units,
        frames = nf,
        free = mask.free_count(),
        max_iterations = request.max_iterations,
        "Fitting batch"
    );

    let ctx = UnitContext {
        model: config.model(),
        config: &config,
        bounds: &bounds,
        mask: &mask,
        options: LevmarOptions::with_max_iterations(request.max_iterations),
    };
    let reports = dispatch(&ctx, &request.tac, &weights, &mut params, &mut curves, threads)?;

    let output = BatchOutput {
        params,
        curves,
        reports,
        threads_used: threads,
    };
    let not_converged = units - output.converged_count();
    if not_converged > 0 {
        warn!("{not_converged} of {units} units stopped before converging (best-effort parameters returned)");
    }
    Ok(output)
}

fn checked_bounds(lower: &[f64], upper: &[f64], np: usize) -> Result<ParamBounds> {
    if lower.len() != np || upper.len() != np {
        return Err(FitError::shape(format!(
            "Bounds have lengths {} / {}, expected {np} (one per parameter).",
            lower.len(),
            upper.len()
        )));
    }
    if lower.iter().chain(upper).any(|v| v.is_nan()) {
        return Err(FitError::config("Parameter bounds contain NaN."));
    }
    Ok(ParamBounds {
        lower: lower.to_vec(),
        upper: upper.to_vec(),
    })
}
