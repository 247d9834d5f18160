//! Shared domain types.
//!
//! These types are intentionally kept lightweight and serializable so they can be:
//!
//! - used in-memory during fitting
//! - read from / written to JSON request and result files
//! - exported to CSV

use clap::ValueEnum;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

/// Which compartmental model to fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
pub enum ModelKind {
    /// One-tissue compartment model, parameters `[vb, K1, k2]`.
    #[serde(rename = "1tcm")]
    #[value(name = "1tcm")]
    OneTissue,
    /// Dual-input liver model, parameters `[vb, K1, k2, k3, k4, ka, fa]`.
    #[serde(rename = "liver")]
    #[value(name = "liver")]
    Liver,
}

impl ModelKind {
    /// Human-readable label for terminal output.
    pub fn display_name(self) -> &'static str {
        match self {
            ModelKind::OneTissue => "1TCM",
            ModelKind::Liver => "Liver (dual input)",
        }
    }

    pub fn param_names(self) -> &'static [&'static str] {
        match self {
            ModelKind::OneTissue => &["vb", "K1", "k2"],
            ModelKind::Liver => &["vb", "K1", "k2", "k3", "k4", "ka", "fa"],
        }
    }

    pub fn param_count(self) -> usize {
        self.param_names().len()
    }

    /// Physiologically plausible starting point.
    pub fn typical_params(self) -> Vec<f64> {
        match self {
            ModelKind::OneTissue => vec![0.05, 0.1, 0.2],
            ModelKind::Liver => vec![0.02, 0.8, 1.0, 0.01, 0.005, 0.8, 0.1],
        }
    }

    pub fn default_bounds(self) -> ParamBounds {
        match self {
            ModelKind::OneTissue => ParamBounds {
                lower: vec![0.0, 0.0, 0.0],
                upper: vec![1.0, 5.0, 5.0],
            },
            ModelKind::Liver => ParamBounds {
                lower: vec![0.0; 7],
                upper: vec![1.0, 10.0, 10.0, 1.0, 1.0, 10.0, 1.0],
            },
        }
    }
}

/// Start/end of one acquisition frame, in minutes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameTiming {
    pub start: f64,
    pub end: f64,
}

impl FrameTiming {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    pub fn mid(&self) -> f64 {
        0.5 * (self.start + self.end)
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// Per-parameter box constraints shared by every unit of a batch.
///
/// `lower[i] <= upper[i]` is the caller's responsibility; the solver clamps
/// with `max(lower)` first, so an inverted pair pins the parameter at `upper`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamBounds {
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

impl ParamBounds {
    pub fn clamp(&self, index: usize, value: f64) -> f64 {
        value.max(self.lower[index]).min(self.upper[index])
    }

    pub fn contains(&self, index: usize, value: f64) -> bool {
        value >= self.lower[index] && value <= self.upper[index]
    }
}

/// Everything the batch entry point needs.
///
/// Matrices are column-major `nalgebra` matrices: one column per unit.
/// `weights` may have a single column (shared by every unit) and `initial`
/// may have a single column (broadcast to every unit).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRequest {
    pub model: ModelKind,
    /// Measured TACs, frames × units.
    #[serde(with = "crate::io::matrix")]
    pub tac: DMatrix<f64>,
    /// Frame weights, frames × 1 or frames × units.
    #[serde(with = "crate::io::matrix")]
    pub weights: DMatrix<f64>,
    pub frames: Vec<FrameTiming>,
    /// Plasma (arterial) input, one frame-averaged sample per frame.
    pub plasma: Vec<f64>,
    /// Whole-blood input, one frame-averaged sample per frame.
    pub whole_blood: Vec<f64>,
    /// Decay constant (1/min); 0 for decay-corrected data.
    #[serde(default)]
    pub decay: f64,
    /// Integration step of the convolution grid (minutes).
    pub step: f64,
    /// Initial parameters, params × 1 or params × units.
    #[serde(with = "crate::io::matrix")]
    pub initial: DMatrix<f64>,
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
    /// Raw sensitivity flags, nonzero = free.
    pub sensitivity: Vec<f64>,
    pub max_iterations: usize,
}

impl BatchRequest {
    pub fn frame_count(&self) -> usize {
        self.tac.nrows()
    }

    pub fn unit_count(&self) -> usize {
        self.tac.ncols()
    }
}

/// Parallelism settings for one dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchOptions {
    /// Requested worker threads; `None` (or `Some(0)`) uses the platform
    /// concurrency. The effective count never exceeds the platform
    /// concurrency or the number of units.
    pub threads: Option<usize>,
}

impl DispatchOptions {
    pub fn with_threads(threads: usize) -> Self {
        Self {
            threads: Some(threads),
        }
    }
}

/// Why the solver stopped for a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Every parameter is fixed; the curve is the model at the initial values.
    NoFreeParameters,
    /// Residual cost is exactly zero.
    ZeroResidual,
    /// Relative cost reduction fell below tolerance.
    CostTolerance,
    /// Relative step length fell below tolerance at moderate damping.
    StepTolerance,
    /// Projected gradient is orthogonal to the residual (bounds active or not).
    GradientTolerance,
    /// No decrease found: damping hit its ceiling or shrank the step to nothing.
    Stalled,
    /// Iteration budget exhausted (best effort result).
    MaxIterations,
}

impl StopReason {
    pub fn is_converged(self) -> bool {
        !matches!(self, StopReason::Stalled | StopReason::MaxIterations)
    }

    pub fn label(self) -> &'static str {
        match self {
            StopReason::NoFreeParameters => "no_free_parameters",
            StopReason::ZeroResidual => "zero_residual",
            StopReason::CostTolerance => "cost_tolerance",
            StopReason::StepTolerance => "step_tolerance",
            StopReason::GradientTolerance => "gradient_tolerance",
            StopReason::Stalled => "stalled",
            StopReason::MaxIterations => "max_iterations",
        }
    }
}

/// Per-unit solver diagnostics.
///
/// These sit beside the parameter/curve matrices and never change them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitReport {
    /// Column index of the unit in the output matrices.
    pub unit: usize,
    /// Worker block that fitted the unit.
    pub worker: usize,
    pub iterations: usize,
    pub converged: bool,
    /// Final weighted sum of squared residuals.
    pub cost: f64,
    pub stop: StopReason,
}

/// Output of one batch fit.
#[derive(Debug, Clone)]
pub struct BatchOutput {
    /// Fitted parameters, params × units.
    pub params: DMatrix<f64>,
    /// Model curves at the fitted parameters, frames × units.
    pub curves: DMatrix<f64>,
    /// One report per unit, in unit order.
    pub reports: Vec<UnitReport>,
    /// Worker threads actually used (0 for an empty batch).
    pub threads_used: usize,
}

impl BatchOutput {
    pub fn unit_count(&self) -> usize {
        self.params.ncols()
    }

    pub fn converged_count(&self) -> usize {
        self.reports.iter().filter(|r| r.converged).count()
    }
}
