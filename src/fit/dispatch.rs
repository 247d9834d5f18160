//! Parallel dispatch of independent units.
//!
//! Units are split into one contiguous block per worker (static schedule).
//! Each block owns disjoint column slices of the output parameter and curve
//! matrices, obtained with `split_at_mut`, so workers write results without
//! any locking and the unit → column mapping does not depend on scheduling.
//!
//! Each block allocates its [`UnitScratch`] once when it starts and drops it
//! when it ends. Blocks run on a dedicated rayon pool sized to the resolved
//! thread count; the call returns only after every block has finished.

use std::ops::Range;

use nalgebra::DMatrix;
use rayon::prelude::*;
use tracing::debug;

use crate::domain::{DispatchOptions, UnitReport};
use crate::error::{FitError, Result};
use crate::fit::{fit_unit, UnitContext, UnitScratch};

/// Platform-reported hardware concurrency (at least 1).
pub fn available_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Worker count for `units` units: the requested count (platform concurrency
/// when unset or 0), capped by the platform concurrency and by `units`.
pub fn resolve_threads(opts: &DispatchOptions, units: usize) -> usize {
    if units == 0 {
        return 0;
    }
    let available = available_threads();
    let requested = match opts.threads {
        Some(n) if n > 0 => n,
        _ => available,
    };
    requested.min(available).min(units).max(1)
}

/// Split `0..units` into `workers` contiguous ranges whose sizes differ by at
/// most one (the first `units % workers` blocks get the extra unit).
pub fn partition(units: usize, workers: usize) -> Vec<Range<usize>> {
    if units == 0 || workers == 0 {
        return Vec::new();
    }
    let base = units / workers;
    let extra = units % workers;
    let mut out = Vec::with_capacity(workers);
    let mut start = 0;
    for w in 0..workers {
        let len = base + usize::from(w < extra);
        out.push(start..start + len);
        start += len;
    }
    out
}

/// One worker's share of the batch.
struct Block<'a> {
    worker: usize,
    units: Range<usize>,
    params: &'a mut [f64],
    curves: &'a mut [f64],
}

/// Fit every column of `tac` into the matching columns of `params` (which
/// holds the initial values on entry) and `curves`.
///
/// `weights` must already be broadcast to `frames × units`.
pub fn dispatch(
    ctx: &UnitContext<'_>,
    tac: &DMatrix<f64>,
    weights: &DMatrix<f64>,
    params: &mut DMatrix<f64>,
    curves: &mut DMatrix<f64>,
    threads: usize,
) -> Result<Vec<UnitReport>> {
    let units = tac.ncols();
    if units == 0 {
        return Ok(Vec::new());
    }
    let threads = threads.clamp(1, units);
    let nf = ctx.frame_count();
    let np = ctx.param_count();
    debug_assert_eq!(tac.shape(), (nf, units));
    debug_assert_eq!(weights.shape(), (nf, units));
    debug_assert_eq!(params.shape(), (np, units));
    debug_assert_eq!(curves.shape(), (nf, units));

    let mut blocks = Vec::with_capacity(threads);
    let mut p_rest = params.as_mut_slice();
    let mut c_rest = curves.as_mut_slice();
    for (worker, range) in partition(units, threads).into_iter().enumerate() {
        let (p_block, p_tail) = std::mem::take(&mut p_rest).split_at_mut(range.len() * np);
        let (c_block, c_tail) = std::mem::take(&mut c_rest).split_at_mut(range.len() * nf);
        p_rest = p_tail;
        c_rest = c_tail;
        blocks.push(Block {
            worker,
            units: range,
            params: p_block,
            curves: c_block,
        });
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(|i| format!("kfit-worker-{i}"))
        .build()
        .map_err(|e| FitError::config(format!("Failed to build worker pool: {e}")))?;

    let per_block: Vec<Vec<UnitReport>> = pool.install(|| {
        blocks
            .into_par_iter()
            .map(|block| run_block(ctx, tac, weights, block))
            .collect::<Result<Vec<_>>>()
    })?;

    Ok(per_block.into_iter().flatten().collect())
}

fn run_block(
    ctx: &UnitContext<'_>,
    tac: &DMatrix<f64>,
    weights: &DMatrix<f64>,
    block: Block<'_>,
) -> Result<Vec<UnitReport>> {
    let Block {
        worker,
        units,
        params,
        curves,
    } = block;
    let nf = ctx.frame_count();
    let np = ctx.param_count();

    let mut scratch = UnitScratch::try_new(ctx, worker)?;
    let mut reports = Vec::with_capacity(units.len());
    debug!(worker, first = units.start, count = units.len(), "worker block started");

    for ((unit, p), c) in units
        .clone()
        .zip(params.chunks_exact_mut(np))
        .zip(curves.chunks_exact_mut(nf))
    {
        let tac_col = &tac.as_slice()[unit * nf..(unit + 1) * nf];
        let w_col = &weights.as_slice()[unit * nf..(unit + 1) * nf];
        reports.push(fit_unit(ctx, &mut scratch, unit, worker, tac_col, w_col, p, c));
    }

    debug!(worker, count = reports.len(), "worker block finished");
    Ok(reports)
}
