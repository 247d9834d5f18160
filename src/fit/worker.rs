//! Fitting of one unit (voxel/region) with worker-owned scratch.
//!
//! A [`UnitScratch`] is created once per worker block and reused for every
//! unit the block fits. It owns copies of the unit's TAC, weights and
//! parameters plus all model and solver buffers, so fitting a unit performs
//! no heap allocation. The scratch is dropped when the block finishes, on
//! every exit path including unwinding.

use nalgebra::DMatrix;

use crate::domain::{ParamBounds, UnitReport};
use crate::error::{FitError, Result};
use crate::fit::SensitivityMask;
use crate::math::{levmar, try_zeroed, CurveProblem, LevmarOptions, LevmarWorkspace};
use crate::models::{KineticModel, ModelConfig, ModelScratch};

/// Read-only state shared by every unit (and every thread) in a batch.
#[derive(Clone, Copy)]
pub struct UnitContext<'a> {
    pub model: &'a dyn KineticModel,
    pub config: &'a ModelConfig,
    pub bounds: &'a ParamBounds,
    pub mask: &'a SensitivityMask,
    pub options: LevmarOptions,
}

impl UnitContext<'_> {
    pub fn frame_count(&self) -> usize {
        self.config.frame_count()
    }

    pub fn param_count(&self) -> usize {
        self.model.param_count()
    }
}

/// Thread-private buffers sized `(frames, params)`.
#[derive(Debug)]
pub struct UnitScratch {
    tac: Vec<f64>,
    weights: Vec<f64>,
    params: Vec<f64>,
    fitted: Vec<f64>,
    model: ModelScratch,
    solver: LevmarWorkspace,
}

impl UnitScratch {
    /// Allocate scratch for `worker`, reporting allocation failure as an error.
    pub fn try_new(ctx: &UnitContext<'_>, worker: usize) -> Result<Self> {
        let nf = ctx.frame_count();
        let np = ctx.param_count();
        let alloc = |e: std::collections::TryReserveError| FitError::Allocation {
            worker,
            reason: e.to_string(),
        };
        Ok(Self {
            tac: try_zeroed(nf).map_err(alloc)?,
            weights: try_zeroed(nf).map_err(alloc)?,
            params: try_zeroed(np).map_err(alloc)?,
            fitted: try_zeroed(nf).map_err(alloc)?,
            model: ModelScratch::try_new(ctx.config, np).map_err(alloc)?,
            solver: LevmarWorkspace::try_new(nf, np).map_err(alloc)?,
        })
    }
}

/// Adapter from a kinetic model to the solver's evaluator interface.
struct ModelProblem<'a> {
    model: &'a dyn KineticModel,
    config: &'a ModelConfig,
    scratch: &'a mut ModelScratch,
}

impl CurveProblem for ModelProblem<'_> {
    fn curve(&mut self, params: &[f64], out: &mut [f64]) {
        self.model.curve(params, self.config, &mut self.scratch.grid, out);
    }

    fn jacobian(&mut self, params: &[f64], free: &[bool], curve: &mut [f64], jac: &mut DMatrix<f64>) {
        self.model.jacobian(params, self.config, free, self.scratch, curve, jac);
    }
}

/// Fit one unit.
///
/// `params` holds the unit's initial parameters on entry and the fitted
/// parameters on return; `curve` receives the model at the fitted parameters.
/// Non-convergence is reported in the returned [`UnitReport`], never as an
/// error.
#[allow(clippy::too_many_arguments)]
pub fn fit_unit(
    ctx: &UnitContext<'_>,
    scratch: &mut UnitScratch,
    unit: usize,
    worker: usize,
    tac: &[f64],
    weights: &[f64],
    params: &mut [f64],
    curve: &mut [f64],
) -> UnitReport {
    let UnitScratch {
        tac: tac_buf,
        weights: w_buf,
        params: p_buf,
        fitted,
        model,
        solver,
    } = scratch;

    tac_buf.copy_from_slice(tac);
    w_buf.copy_from_slice(weights);
    p_buf.copy_from_slice(params);

    let mut problem = ModelProblem {
        model: ctx.model,
        config: ctx.config,
        scratch: model,
    };
    let report = levmar(
        &mut problem,
        tac_buf,
        w_buf,
        p_buf,
        ctx.bounds,
        ctx.mask.as_slice(),
        &ctx.options,
        solver,
        fitted,
    );

    params.copy_from_slice(p_buf);
    curve.copy_from_slice(fitted);

    UnitReport {
        unit,
        worker,
        iterations: report.iterations,
        converged: report.converged(),
        cost: report.cost,
        stop: report.stop,
    }
}
