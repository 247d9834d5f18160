//! Bounded Levenberg–Marquardt for small weighted curve fits.
//!
//! We minimize
//!
//! ```text
//! cost(p) = Σ w_i (y_i - C_i(p))^2
//! ```
//!
//! over the *free* parameters only (the sensitivity mask), subject to
//! `lower <= p <= upper`. Each iteration
//!
//! 1. builds `H = JᵀWJ` and `g = JᵀW(y - C)` at the current point
//! 2. sets aside free parameters sitting on a bound whose gradient points
//!    out of the box (they cannot move this iteration)
//! 3. solves `(H + λ diag H) δ = g` over the remaining active parameters
//! 4. projects the trial point into the box; a trial is accepted only if it
//!    lowers the cost, otherwise λ grows and the same Jacobian is reused
//!
//! Fixed and pinned parameters enter the system as identity rows with a zero
//! right-hand side, so every matrix keeps its `params × params` shape and the
//! workspace is allocated once per worker and reused for every unit.

use std::collections::TryReserveError;

use nalgebra::linalg::Cholesky;
use nalgebra::{DMatrix, DVector, DVectorView};

use crate::domain::{ParamBounds, StopReason};

/// Damping above which a vanishing step counts as a stall, not convergence.
const STEP_LAMBDA_MAX: f64 = 1.0;

/// Curve/Jacobian evaluator seen by the solver.
pub trait CurveProblem {
    /// Evaluate the model curve at `params` into `out` (len = frames).
    fn curve(&mut self, params: &[f64], out: &mut [f64]);

    /// Evaluate the curve into `curve` and the sensitivity matrix into `jac`
    /// (frames × params). Columns of parameters with `free[j] == false` must
    /// be zero.
    fn jacobian(&mut self, params: &[f64], free: &[bool], curve: &mut [f64], jac: &mut DMatrix<f64>);
}

/// Solver tolerances.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevmarOptions {
    pub max_iterations: usize,
    /// Relative cost reduction below which we stop.
    pub ftol: f64,
    /// Relative step length below which we stop.
    pub xtol: f64,
    /// Largest cosine between the weighted residual and an active Jacobian
    /// column at which we stop.
    pub gtol: f64,
    pub lambda_init: f64,
    pub lambda_max: f64,
}

impl LevmarOptions {
    pub fn with_max_iterations(max_iterations: usize) -> Self {
        Self {
            max_iterations,
            ..Self::default()
        }
    }
}

impl Default for LevmarOptions {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            ftol: 1e-12,
            xtol: 1e-10,
            gtol: 1e-8,
            lambda_init: 1e-3,
            lambda_max: 1e16,
        }
    }
}

/// Result of one solve. Parameters and curve are written in place.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverReport {
    pub iterations: usize,
    pub cost: f64,
    pub stop: StopReason,
}

impl SolverReport {
    pub fn converged(&self) -> bool {
        self.stop.is_converged()
    }
}

/// Reusable solver buffers for a fixed `(frames, params)` shape.
#[derive(Debug)]
pub struct LevmarWorkspace {
    frames: usize,
    params: usize,
    /// Free and not pinned at a bound in the current iteration.
    active: Vec<bool>,
    curve: Vec<f64>,
    trial_curve: Vec<f64>,
    trial: Vec<f64>,
    /// Weighted residual `W(y - C)`.
    resid: DVector<f64>,
    jac: DMatrix<f64>,
    /// `WJ`.
    wjac: DMatrix<f64>,
    normal: DMatrix<f64>,
    damped: DMatrix<f64>,
    grad: DVector<f64>,
    step: DVector<f64>,
}

/// Allocate a zeroed buffer, reporting allocation failure instead of aborting.
pub fn try_zeroed(len: usize) -> Result<Vec<f64>, TryReserveError> {
    let mut v = Vec::new();
    v.try_reserve_exact(len)?;
    v.resize(len, 0.0);
    Ok(v)
}

impl LevmarWorkspace {
    pub fn try_new(frames: usize, params: usize) -> Result<Self, TryReserveError> {
        let mut active = Vec::new();
        active.try_reserve_exact(params)?;
        active.resize(params, false);
        Ok(Self {
            frames,
            params,
            active,
            curve: try_zeroed(frames)?,
            trial_curve: try_zeroed(frames)?,
            trial: try_zeroed(params)?,
            resid: DVector::from_vec(try_zeroed(frames)?),
            jac: DMatrix::from_vec(frames, params, try_zeroed(frames * params)?),
            wjac: DMatrix::from_vec(frames, params, try_zeroed(frames * params)?),
            normal: DMatrix::from_vec(params, params, try_zeroed(params * params)?),
            damped: DMatrix::from_vec(params, params, try_zeroed(params * params)?),
            grad: DVector::from_vec(try_zeroed(params)?),
            step: DVector::from_vec(try_zeroed(params)?),
        })
    }
}

/// Weighted sum of squared residuals.
pub fn weighted_sse(y: &[f64], w: &[f64], c: &[f64]) -> f64 {
    y.iter()
        .zip(w)
        .zip(c)
        .map(|((&yi, &wi), &ci)| {
            let r = yi - ci;
            wi * r * r
        })
        .sum()
}

/// Fit `params` in place and write the final curve into `fitted`.
///
/// # Panics
/// Panics if the buffer lengths disagree with the workspace shape. Callers
/// size the workspace from the same batch dimensions.
#[allow(clippy::too_many_arguments)]
pub fn levmar<P: CurveProblem>(
    problem: &mut P,
    y: &[f64],
    w: &[f64],
    params: &mut [f64],
    bounds: &ParamBounds,
    free: &[bool],
    opts: &LevmarOptions,
    ws: &mut LevmarWorkspace,
    fitted: &mut [f64],
) -> SolverReport {
    assert_eq!(y.len(), ws.frames, "TAC length does not match workspace");
    assert_eq!(w.len(), ws.frames, "weight length does not match workspace");
    assert_eq!(params.len(), ws.params, "parameter length does not match workspace");
    assert_eq!(free.len(), ws.params, "mask length does not match workspace");

    for (i, _) in free.iter().enumerate().filter(|(_, f)| **f) {
        params[i] = bounds.clamp(i, params[i]);
    }

    problem.curve(params, &mut ws.curve);
    let mut cost = weighted_sse(y, w, &ws.curve);

    let report = if !free.contains(&true) {
        SolverReport {
            iterations: 0,
            cost,
            stop: StopReason::NoFreeParameters,
        }
    } else {
        iterate(problem, y, w, params, bounds, free, opts, ws, &mut cost)
    };

    fitted.copy_from_slice(&ws.curve);
    report
}

#[allow(clippy::too_many_arguments)]
fn iterate<P: CurveProblem>(
    problem: &mut P,
    y: &[f64],
    w: &[f64],
    params: &mut [f64],
    bounds: &ParamBounds,
    free: &[bool],
    opts: &LevmarOptions,
    ws: &mut LevmarWorkspace,
    cost: &mut f64,
) -> SolverReport {
    // Retries with larger damping before giving up on an iteration.
    const MAX_REJECTS: usize = 40;

    let mut lambda = opts.lambda_init;
    let mut iterations = 0usize;
    let report = |iterations, cost, stop| SolverReport { iterations, cost, stop };

    while iterations < opts.max_iterations {
        if *cost <= f64::MIN_POSITIVE {
            return report(iterations, *cost, StopReason::ZeroResidual);
        }
        iterations += 1;

        problem.jacobian(params, free, &mut ws.curve, &mut ws.jac);
        build_normal_equations(y, w, ws);
        mark_active(params, bounds, free, ws);
        if projected_gradient_vanishes(ws, *cost, opts.gtol) {
            return report(iterations, *cost, StopReason::GradientTolerance);
        }

        let mut accepted = false;
        for _ in 0..MAX_REJECTS {
            if !solve_damped(ws, lambda) {
                lambda *= 10.0;
                if lambda > opts.lambda_max {
                    break;
                }
                continue;
            }

            ws.trial.copy_from_slice(params);
            let mut step_sq = 0.0;
            let mut norm_sq = 0.0;
            for j in (0..ws.params).filter(|&j| ws.active[j]) {
                let candidate = bounds.clamp(j, params[j] + ws.step[j]);
                let d = candidate - params[j];
                step_sq += d * d;
                norm_sq += params[j] * params[j];
                ws.trial[j] = candidate;
            }

            if step_sq.sqrt() <= opts.xtol * (norm_sq.sqrt() + opts.xtol) {
                let stop = if lambda <= STEP_LAMBDA_MAX {
                    StopReason::StepTolerance
                } else {
                    StopReason::Stalled
                };
                return report(iterations, *cost, stop);
            }

            problem.curve(&ws.trial, &mut ws.trial_curve);
            let trial_cost = weighted_sse(y, w, &ws.trial_curve);

            if trial_cost.is_finite() && trial_cost < *cost {
                let rel = (*cost - trial_cost) / *cost;
                params.copy_from_slice(&ws.trial);
                std::mem::swap(&mut ws.curve, &mut ws.trial_curve);
                *cost = trial_cost;
                lambda = (lambda / 10.0).max(1e-12);
                accepted = true;

                if rel <= opts.ftol {
                    return report(iterations, *cost, StopReason::CostTolerance);
                }
                break;
            }

            lambda *= 10.0;
            if lambda > opts.lambda_max {
                break;
            }
        }

        if !accepted {
            return report(iterations, *cost, StopReason::Stalled);
        }
    }

    report(iterations, *cost, StopReason::MaxIterations)
}

/// Fill `JᵀWJ` and `JᵀW(y - C)` from the current Jacobian and curve.
fn build_normal_equations(y: &[f64], w: &[f64], ws: &mut LevmarWorkspace) {
    for (r, ((&yi, &wi), &ci)) in ws.resid.iter_mut().zip(y.iter().zip(w).zip(&ws.curve)) {
        *r = wi * (yi - ci);
    }
    ws.jac.tr_mul_to(&ws.resid, &mut ws.grad);

    let weights = DVectorView::from_slice(w, ws.frames);
    ws.wjac.copy_from(&ws.jac);
    for mut column in ws.wjac.column_iter_mut() {
        column.component_mul_assign(&weights);
    }
    ws.jac.tr_mul_to(&ws.wjac, &mut ws.normal);
}

/// A free parameter is pinned when it sits on a bound and the descent
/// direction `g` points out of the box.
fn mark_active(params: &[f64], bounds: &ParamBounds, free: &[bool], ws: &mut LevmarWorkspace) {
    for j in 0..ws.params {
        let g = ws.grad[j];
        let pinned_low = params[j] <= bounds.lower[j] && g < 0.0;
        let pinned_high = params[j] >= bounds.upper[j] && g > 0.0;
        ws.active[j] = free[j] && !pinned_low && !pinned_high;
    }
}

/// Every active Jacobian column is (numerically) orthogonal to the weighted
/// residual, i.e. the projected gradient vanishes. True when nothing is
/// active.
fn projected_gradient_vanishes(ws: &LevmarWorkspace, cost: f64, gtol: f64) -> bool {
    (0..ws.params).filter(|&j| ws.active[j]).all(|j| {
        let h = ws.normal[(j, j)];
        h <= 0.0 || ws.grad[j].abs() <= gtol * (h * cost).sqrt()
    })
}

/// Solve the damped normal equations over the active parameters into
/// `ws.step`; inactive entries come out as exactly zero.
///
/// Returns `false` if the damped matrix is not numerically positive definite.
fn solve_damped(ws: &mut LevmarWorkspace, lambda: f64) -> bool {
    ws.damped.copy_from(&ws.normal);
    for j in 0..ws.params {
        if ws.active[j] {
            ws.damped[(j, j)] += lambda * ws.normal[(j, j)].max(1e-12);
            ws.step[j] = ws.grad[j];
        } else {
            ws.damped.row_mut(j).fill(0.0);
            ws.damped.column_mut(j).fill(0.0);
            ws.damped[(j, j)] = 1.0;
            ws.step[j] = 0.0;
        }
    }

    // The factorization takes the buffer by value; it is handed back below.
    let chol = Cholesky::new_unchecked(std::mem::replace(&mut ws.damped, DMatrix::zeros(0, 0)));
    let l = chol.l_dirty();
    let definite = (0..ws.params).all(|j| l[(j, j)].is_finite() && l[(j, j)] > 0.0);
    if definite {
        chol.solve_mut(&mut ws.step);
    }
    ws.damped = chol.unpack_dirty();
    definite
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// `y = a * exp(-b t) + c` on a fixed grid.
    struct ExpDecay {
        t: Vec<f64>,
    }

    impl CurveProblem for ExpDecay {
        fn curve(&mut self, p: &[f64], out: &mut [f64]) {
            for (o, &t) in out.iter_mut().zip(&self.t) {
                *o = p[0] * (-p[1] * t).exp() + p[2];
            }
        }

        fn jacobian(&mut self, p: &[f64], free: &[bool], curve: &mut [f64], jac: &mut DMatrix<f64>) {
            self.curve(p, curve);
            for (m, &t) in self.t.iter().enumerate() {
                let e = (-p[1] * t).exp();
                let cols = [e, -p[0] * t * e, 1.0];
                for (j, v) in cols.iter().enumerate() {
                    jac[(m, j)] = if free[j] { *v } else { 0.0 };
                }
            }
        }
    }

    fn problem() -> (ExpDecay, Vec<f64>) {
        let t: Vec<f64> = (0..30).map(|i| i as f64 * 0.25).collect();
        let mut p = ExpDecay { t };
        let mut y = vec![0.0; 30];
        p.curve(&[3.0, 0.8, 0.5], &mut y);
        (p, y)
    }

    fn loose_bounds() -> ParamBounds {
        ParamBounds {
            lower: vec![0.0, 0.0, -10.0],
            upper: vec![10.0, 10.0, 10.0],
        }
    }

    #[test]
    fn recovers_exact_parameters() {
        let (mut prob, y) = problem();
        let w = vec![1.0; y.len()];
        let mut p = vec![2.0, 0.5, 0.0];
        let mut ws = LevmarWorkspace::try_new(y.len(), 3).unwrap();
        let mut fitted = vec![0.0; y.len()];

        let report = levmar(
            &mut prob,
            &y,
            &w,
            &mut p,
            &loose_bounds(),
            &[true, true, true],
            &LevmarOptions::with_max_iterations(100),
            &mut ws,
            &mut fitted,
        );

        assert!(report.converged(), "{report:?}");
        assert_relative_eq!(p[0], 3.0, max_relative = 1e-8);
        assert_relative_eq!(p[1], 0.8, max_relative = 1e-8);
        assert_relative_eq!(p[2], 0.5, max_relative = 1e-8);
        assert_relative_eq!(fitted[5], y[5], max_relative = 1e-8);
    }

    #[test]
    fn fixed_parameter_is_untouched() {
        let (mut prob, y) = problem();
        let w = vec![1.0; y.len()];
        let mut p = vec![2.0, 0.5, 0.123456789];
        let mut ws = LevmarWorkspace::try_new(y.len(), 3).unwrap();
        let mut fitted = vec![0.0; y.len()];

        levmar(
            &mut prob,
            &y,
            &w,
            &mut p,
            &loose_bounds(),
            &[true, true, false],
            &LevmarOptions::default(),
            &mut ws,
            &mut fitted,
        );

        assert_eq!(p[2], 0.123456789);
    }

    #[test]
    fn active_bound_is_respected() {
        let (mut prob, y) = problem();
        let w = vec![1.0; y.len()];
        let mut p = vec![1.0, 0.5, 0.0];
        let bounds = ParamBounds {
            lower: vec![0.0, 0.0, -10.0],
            upper: vec![2.0, 10.0, 10.0],
        };
        let mut ws = LevmarWorkspace::try_new(y.len(), 3).unwrap();
        let mut fitted = vec![0.0; y.len()];

        levmar(
            &mut prob,
            &y,
            &w,
            &mut p,
            &bounds,
            &[true, true, true],
            &LevmarOptions::default(),
            &mut ws,
            &mut fitted,
        );

        for (i, v) in p.iter().enumerate() {
            assert!(bounds.contains(i, *v), "p[{i}]={v}");
        }
    }

    #[test]
    fn all_fixed_returns_initial_curve() {
        let (mut prob, y) = problem();
        let w = vec![1.0; y.len()];
        let mut p = vec![3.0, 0.8, 0.5];
        let mut ws = LevmarWorkspace::try_new(y.len(), 3).unwrap();
        let mut fitted = vec![0.0; y.len()];

        let report = levmar(
            &mut prob,
            &y,
            &w,
            &mut p,
            &loose_bounds(),
            &[false, false, false],
            &LevmarOptions::default(),
            &mut ws,
            &mut fitted,
        );

        assert_eq!(report.stop, StopReason::NoFreeParameters);
        assert_eq!(report.iterations, 0);
        assert_eq!(fitted, y);
    }

    #[test]
    fn iteration_budget_is_best_effort() {
        let (mut prob, y) = problem();
        let w = vec![1.0; y.len()];
        let mut p = vec![0.5, 3.0, 2.0];
        let mut ws = LevmarWorkspace::try_new(y.len(), 3).unwrap();
        let mut fitted = vec![0.0; y.len()];

        let start_cost = {
            let mut c = vec![0.0; y.len()];
            prob.curve(&p, &mut c);
            weighted_sse(&y, &w, &c)
        };
        let report = levmar(
            &mut prob,
            &y,
            &w,
            &mut p,
            &loose_bounds(),
            &[true, true, true],
            &LevmarOptions::with_max_iterations(1),
            &mut ws,
            &mut fitted,
        );

        assert_eq!(report.iterations, 1);
        assert!(report.cost <= start_cost);
    }

    fn fit(start: [f64; 3], bounds: &ParamBounds, free: [bool; 3]) -> (Vec<f64>, SolverReport) {
        let (mut prob, y) = problem();
        let w = vec![1.0; y.len()];
        let mut p = start.to_vec();
        let mut ws = LevmarWorkspace::try_new(y.len(), 3).unwrap();
        let mut fitted = vec![0.0; y.len()];
        let report = levmar(
            &mut prob,
            &y,
            &w,
            &mut p,
            bounds,
            &free,
            &LevmarOptions::with_max_iterations(200),
            &mut ws,
            &mut fitted,
        );
        (p, report)
    }

    #[test]
    fn pinned_bound_matches_fit_with_parameter_fixed_there() {
        // Truth a = 3 lies above the box, so the constrained optimum has a = 2.
        let bounds = ParamBounds {
            lower: vec![0.0, 0.0, -10.0],
            upper: vec![2.0, 10.0, 10.0],
        };
        let (fixed, fixed_report) = fit([2.0, 0.5, 0.0], &bounds, [false, true, true]);
        assert!(fixed_report.converged(), "{fixed_report:?}");

        for start in [[1.0, 0.5, 0.0], [2.0, 0.5, 0.0], [5.0, 0.5, 0.0]] {
            let (p, report) = fit(start, &bounds, [true, true, true]);
            assert!(report.converged(), "start {start:?}: {report:?}");
            assert_eq!(p[0], 2.0);
            assert_relative_eq!(p[1], fixed[1], max_relative = 1e-5);
            assert_relative_eq!(p[2], fixed[2], max_relative = 1e-5, epsilon = 1e-9);
            assert_relative_eq!(report.cost, fixed_report.cost, max_relative = 1e-8);
        }
    }

    #[test]
    fn pinned_lower_bound_is_released_when_gradient_turns_inward() {
        // Starting on the lower bound of `b` with the optimum far inside: the
        // parameter must leave the bound, not stay pinned.
        let (p, report) = fit([2.0, 0.0, 0.0], &loose_bounds(), [true, true, true]);
        assert!(report.converged(), "{report:?}");
        assert_relative_eq!(p[1], 0.8, max_relative = 1e-6);
    }

    fn workspace_with(normal: &[f64], grad: &[f64], active: &[bool]) -> LevmarWorkspace {
        let n = grad.len();
        let mut ws = LevmarWorkspace::try_new(1, n).unwrap();
        ws.normal = DMatrix::from_row_slice(n, n, normal);
        ws.grad = DVector::from_column_slice(grad);
        ws.active.copy_from_slice(active);
        ws
    }

    #[test]
    fn damped_solve_skips_inactive_parameters() {
        let mut ws = workspace_with(
            &[4.0, 2.0, 1.0, 2.0, 3.0, 1.0, 1.0, 1.0, 99.0],
            &[2.0, 1.0, 7.0],
            &[true, true, false],
        );
        assert!(solve_damped(&mut ws, 0.0));
        assert_relative_eq!(ws.step[0], 0.5, epsilon = 1e-12);
        assert_relative_eq!(ws.step[1], 0.0, epsilon = 1e-12);
        assert_eq!(ws.step[2], 0.0);
        assert_eq!(ws.damped.shape(), (3, 3));
    }

    #[test]
    fn damped_solve_rejects_indefinite_system() {
        let mut ws = workspace_with(&[1.0, 2.0, 2.0, 1.0], &[1.0, 1.0], &[true, true]);
        assert!(!solve_damped(&mut ws, 0.0));
        assert_eq!(ws.damped.shape(), (2, 2));
        // Enough damping makes it definite again.
        assert!(solve_damped(&mut ws, 10.0));
        assert!(ws.step.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn normal_equations_apply_weights() {
        let mut ws = LevmarWorkspace::try_new(3, 2).unwrap();
        ws.jac = DMatrix::from_row_slice(3, 2, &[1.0, 0.0, 1.0, 1.0, 0.0, 2.0]);
        ws.curve.copy_from_slice(&[0.0, 1.0, 1.0]);
        build_normal_equations(&[1.0, 2.0, 3.0], &[2.0, 1.0, 0.5], &mut ws);

        // W(y - C) = [2, 1, 1]
        assert_eq!(ws.grad.as_slice(), &[3.0, 3.0]);
        assert_eq!(ws.normal, DMatrix::from_row_slice(2, 2, &[3.0, 1.0, 1.0, 3.0]));
    }
}
