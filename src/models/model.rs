//! The kinetic-model capability interface.
//!
//! The fitter relies on two primitive operations:
//! - evaluate the frame curve for a parameter vector
//! - evaluate the curve plus its parameter sensitivities (Jacobian)
//!
//! Implementations are stateless unit structs; all per-call buffers come from a
//! caller-owned [`ModelScratch`], so a model can be shared by every worker
//! thread without synchronization.

use std::collections::TryReserveError;

use nalgebra::DMatrix;

use crate::domain::ModelKind;
use crate::math::try_zeroed;
use crate::models::{DualInputLiver, ModelConfig, OneTissue};

/// Number of grid-length work buffers a model may use.
pub const GRID_BUFFERS: usize = 4;

/// Grid-length buffers for convolutions.
#[derive(Debug)]
pub struct GridScratch {
    pub buf: [Vec<f64>; GRID_BUFFERS],
}

/// Frame-length buffers for finite-difference Jacobians.
#[derive(Debug)]
pub struct FdScratch {
    pub params: Vec<f64>,
    pub plus: Vec<f64>,
    pub minus: Vec<f64>,
}

/// All model-side scratch owned by one worker.
#[derive(Debug)]
pub struct ModelScratch {
    pub grid: GridScratch,
    pub fd: FdScratch,
}

impl ModelScratch {
    pub fn try_new(config: &ModelConfig, params: usize) -> Result<Self, TryReserveError> {
        let n = config.grid_len();
        let frames = config.frame_count();
        Ok(Self {
            grid: GridScratch {
                buf: [try_zeroed(n)?, try_zeroed(n)?, try_zeroed(n)?, try_zeroed(n)?],
            },
            fd: FdScratch {
                params: try_zeroed(params)?,
                plus: try_zeroed(frames)?,
                minus: try_zeroed(frames)?,
            },
        })
    }
}

/// A compartmental model: curve and Jacobian evaluators.
///
/// Both evaluators are pure functions of `(params, config)`; the scratch is
/// only working memory.
pub trait KineticModel: Send + Sync {
    fn kind(&self) -> ModelKind;

    fn param_count(&self) -> usize {
        self.kind().param_count()
    }

    /// Frame-averaged model curve (len = frames).
    fn curve(&self, params: &[f64], config: &ModelConfig, grid: &mut GridScratch, out: &mut [f64]);

    /// Curve plus `frames × params` sensitivity matrix; columns of fixed
    /// parameters are zero.
    ///
    /// The default uses central differences with a step scaled to the
    /// parameter magnitude.
    fn jacobian(
        &self,
        params: &[f64],
        config: &ModelConfig,
        free: &[bool],
        scratch: &mut ModelScratch,
        curve: &mut [f64],
        jac: &mut DMatrix<f64>,
    ) {
        let ModelScratch { grid, fd } = scratch;
        self.curve(params, config, grid, curve);

        fd.params.copy_from_slice(params);
        for (j, &is_free) in free.iter().enumerate() {
            if !is_free {
                jac.column_mut(j).fill(0.0);
                continue;
            }
            let h = 1e-6 * params[j].abs().max(1e-3);

            fd.params[j] = params[j] + h;
            self.curve(&fd.params, config, grid, &mut fd.plus);
            fd.params[j] = params[j] - h;
            self.curve(&fd.params, config, grid, &mut fd.minus);
            fd.params[j] = params[j];

            for (m, (p, q)) in fd.plus.iter().zip(&fd.minus).enumerate() {
                jac[(m, j)] = (p - q) / (2.0 * h);
            }
        }
    }
}

impl ModelKind {
    /// Evaluator implementing this model kind.
    pub fn model(self) -> &'static dyn KineticModel {
        match self {
            ModelKind::OneTissue => &OneTissue,
            ModelKind::Liver => &DualInputLiver,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FrameTiming;

    #[test]
    fn kinds_map_to_matching_models() {
        for kind in [ModelKind::OneTissue, ModelKind::Liver] {
            assert_eq!(kind.model().kind(), kind);
            assert_eq!(kind.model().param_count(), kind.param_count());
        }
    }

    #[test]
    fn scratch_is_sized_from_config() {
        let frames = vec![FrameTiming::new(0.0, 1.0), FrameTiming::new(1.0, 3.0)];
        let cfg = ModelConfig::new(ModelKind::OneTissue, frames, &[1.0, 0.5], &[1.0, 0.5], 0.0, 0.5)
            .unwrap();
        let scratch = ModelScratch::try_new(&cfg, 3).unwrap();
        assert!(scratch.grid.buf.iter().all(|b| b.len() == cfg.grid_len()));
        assert_eq!(scratch.fd.plus.len(), 2);
        assert_eq!(scratch.fd.params.len(), 3);
    }
}
