//! Direct model evaluation (no fitting, no parallelism).
//!
//! Used by `kfit eval` and by the synthetic data generator.

use nalgebra::DMatrix;

use crate::error::{FitError, Result};
use crate::models::{ModelConfig, ModelScratch};

fn scratch_for(config: &ModelConfig) -> Result<ModelScratch> {
    ModelScratch::try_new(config, config.model().param_count()).map_err(|e| FitError::Allocation {
        worker: 0,
        reason: e.to_string(),
    })
}

fn check_param_rows(config: &ModelConfig, rows: usize) -> Result<()> {
    let expected = config.model().param_count();
    if rows != expected {
        return Err(FitError::shape(format!(
            "{} takes {expected} parameters, got {rows}.",
            config.kind().display_name()
        )));
    }
    Ok(())
}

/// Evaluate the model curve for every column of `params` (params × units).
///
/// Returns a frames × units matrix.
pub fn evaluate_curves(config: &ModelConfig, params: &DMatrix<f64>) -> Result<DMatrix<f64>> {
    check_param_rows(config, params.nrows())?;
    let model = config.model();
    let mut scratch = scratch_for(config)?;
    let mut curves = DMatrix::zeros(config.frame_count(), params.ncols());

    let np = params.nrows();
    let nf = config.frame_count();
    for (p, c) in params
        .as_slice()
        .chunks_exact(np)
        .zip(curves.as_mut_slice().chunks_exact_mut(nf))
    {
        model.curve(p, config, &mut scratch.grid, c);
    }
    Ok(curves)
}

/// Evaluate the curve and the full (all parameters free) Jacobian for one
/// parameter vector.
pub fn evaluate_jacobian(config: &ModelConfig, params: &[f64]) -> Result<(Vec<f64>, DMatrix<f64>)> {
    check_param_rows(config, params.len())?;
    let model = config.model();
    let mut scratch = scratch_for(config)?;
    let nf = config.frame_count();
    let free = vec![true; params.len()];

    let mut curve = vec![0.0; nf];
    let mut jac = DMatrix::zeros(nf, params.len());
    model.jacobian(params, config, &free, &mut scratch, &mut curve, &mut jac);
    Ok((curve, jac))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FrameTiming, ModelKind};

    fn config() -> ModelConfig {
        let frames = vec![
            FrameTiming::new(0.0, 1.0),
            FrameTiming::new(1.0, 2.0),
            FrameTiming::new(2.0, 5.0),
        ];
        ModelConfig::new(ModelKind::OneTissue, frames, &[4.0, 2.0, 1.0], &[4.0, 2.0, 1.0], 0.0, 0.1)
            .unwrap()
    }

    #[test]
    fn curves_are_column_per_unit() {
        let cfg = config();
        let params = DMatrix::from_column_slice(3, 2, &[0.0, 0.2, 0.1, 1.0, 0.2, 0.1]);
        let curves = evaluate_curves(&cfg, &params).unwrap();
        assert_eq!(curves.shape(), (3, 2));
        // Second unit is pure vascular signal.
        for m in 0..3 {
            assert_eq!(curves[(m, 1)], cfg.frame_whole_blood()[m]);
        }
    }

    #[test]
    fn wrong_parameter_count_is_rejected() {
        let cfg = config();
        let params = DMatrix::zeros(4, 1);
        assert!(matches!(evaluate_curves(&cfg, &params), Err(FitError::ShapeMismatch(_))));
        assert!(evaluate_jacobian(&cfg, &[0.1, 0.2]).is_err());
    }

    #[test]
    fn jacobian_has_frames_by_params_shape() {
        let cfg = config();
        let (curve, jac) = evaluate_jacobian(&cfg, &[0.05, 0.2, 0.1]).unwrap();
        assert_eq!(curve.len(), 3);
        assert_eq!(jac.shape(), (3, 3));
    }
}
