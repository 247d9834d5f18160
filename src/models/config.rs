//! Shared, read-only model configuration.
//!
//! A `ModelConfig` is built once per batch and then borrowed by every worker.
//! Construction validates the frame schedule and input functions and
//! precomputes everything that does not depend on kinetic parameters:
//!
//! - the uniform integration grid `t_n = n * step`
//! - plasma and whole-blood inputs resampled onto that grid
//! - the grid index range of every frame
//! - frame-averaged whole blood (the vascular term of every model)

use crate::domain::{FrameTiming, ModelKind};
use crate::error::{FitError, Result};
use crate::math::{grid_value_at, resample_linear};
use crate::models::KineticModel;

/// Upper limit on grid samples; protects against a tiny step on a long scan.
const MAX_GRID_LEN: usize = 10_000_000;

/// Grid index range `[first, last)` covered by one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
struct FrameBin {
    first: usize,
    last: usize,
    mid: f64,
}

#[derive(Debug, Clone)]
pub struct ModelConfig {
    kind: ModelKind,
    frames: Vec<FrameTiming>,
    decay: f64,
    step: f64,
    grid_plasma: Vec<f64>,
    grid_whole_blood: Vec<f64>,
    bins: Vec<FrameBin>,
    frame_whole_blood: Vec<f64>,
}

impl ModelConfig {
    pub fn new(
        kind: ModelKind,
        frames: Vec<FrameTiming>,
        plasma: &[f64],
        whole_blood: &[f64],
        decay: f64,
        step: f64,
    ) -> Result<Self> {
        if frames.is_empty() {
            return Err(FitError::config("Frame schedule is empty."));
        }
        if plasma.len() != frames.len() {
            return Err(FitError::shape(format!(
                "Plasma input has {} samples, expected one per frame ({}).",
                plasma.len(),
                frames.len()
            )));
        }
        if whole_blood.len() != frames.len() {
            return Err(FitError::shape(format!(
                "Whole-blood input has {} samples, expected one per frame ({}).",
                whole_blood.len(),
                frames.len()
            )));
        }
        if !(decay.is_finite() && decay >= 0.0) {
            return Err(FitError::config(format!(
                "Decay constant must be finite and >= 0, got {decay}."
            )));
        }
        if !(step.is_finite() && step > 0.0) {
            return Err(FitError::config(format!(
                "Integration step must be finite and > 0, got {step}."
            )));
        }
        validate_frames(&frames)?;
        if plasma.iter().chain(whole_blood).any(|v| !v.is_finite()) {
            return Err(FitError::config("Input functions contain non-finite samples."));
        }

        let last_end = frames[frames.len() - 1].end;
        let grid_len_f = (last_end / step).ceil() + 1.0;
        if grid_len_f > MAX_GRID_LEN as f64 {
            return Err(FitError::config(format!(
                "Integration step {step} is too small for a {last_end} min scan \
                 ({grid_len_f} grid samples, limit {MAX_GRID_LEN})."
            )));
        }
        let grid_len = grid_len_f as usize;

        let mids: Vec<f64> = frames.iter().map(FrameTiming::mid).collect();
        let mut grid_plasma = vec![0.0; grid_len];
        let mut grid_whole_blood = vec![0.0; grid_len];
        resample_linear(&mids, plasma, step, &mut grid_plasma);
        resample_linear(&mids, whole_blood, step, &mut grid_whole_blood);

        let bins = frames
            .iter()
            .map(|f| FrameBin {
                first: ((f.start / step).ceil() as usize).min(grid_len),
                last: ((f.end / step).ceil() as usize).min(grid_len),
                mid: f.mid(),
            })
            .collect();

        let mut config = Self {
            kind,
            frames,
            decay,
            step,
            grid_plasma,
            grid_whole_blood,
            bins,
            frame_whole_blood: Vec::new(),
        };
        config.frame_whole_blood = (0..config.frame_count())
            .map(|m| config.bin(m, &config.grid_whole_blood))
            .collect();
        Ok(config)
    }

    pub fn kind(&self) -> ModelKind {
        self.kind
    }

    /// The curve/Jacobian evaluator selected for this batch.
    pub fn model(&self) -> &'static dyn KineticModel {
        self.kind.model()
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn decay(&self) -> f64 {
        self.decay
    }

    pub fn step(&self) -> f64 {
        self.step
    }

    pub fn grid_len(&self) -> usize {
        self.grid_plasma.len()
    }

    pub fn grid_plasma(&self) -> &[f64] {
        &self.grid_plasma
    }

    pub fn frame_whole_blood(&self) -> &[f64] {
        &self.frame_whole_blood
    }

    /// Frame average of a grid signal.
    ///
    /// Frames shorter than one grid step contain no sample; they use the
    /// signal interpolated at the frame mid-time instead.
    pub fn bin(&self, frame: usize, grid: &[f64]) -> f64 {
        let b = self.bins[frame];
        if b.last > b.first {
            let sum: f64 = grid[b.first..b.last].iter().sum();
            sum / (b.last - b.first) as f64
        } else {
            grid_value_at(grid, self.step, b.mid)
        }
    }
}

fn validate_frames(frames: &[FrameTiming]) -> Result<()> {
    let mut prev_mid = f64::NEG_INFINITY;
    for (i, f) in frames.iter().enumerate() {
        if !(f.start.is_finite() && f.end.is_finite() && f.start >= 0.0 && f.end > f.start) {
            return Err(FitError::config(format!(
                "Frame {i} has invalid timing [{}, {}] (need 0 <= start < end).",
                f.start, f.end
            )));
        }
        if f.mid() <= prev_mid {
            return Err(FitError::config(format!(
                "Frame {i} is out of order (mid-times must increase)."
            )));
        }
        prev_mid = f.mid();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn frames() -> Vec<FrameTiming> {
        vec![
            FrameTiming::new(0.0, 1.0),
            FrameTiming::new(1.0, 2.0),
            FrameTiming::new(2.0, 4.0),
        ]
    }

    #[test]
    fn constant_input_bins_to_constant() {
        let cfg = ModelConfig::new(
            ModelKind::OneTissue,
            frames(),
            &[1.0, 1.0, 1.0],
            &[2.0, 2.0, 2.0],
            0.0,
            0.25,
        )
        .unwrap();
        assert_eq!(cfg.grid_len(), 17);
        // Flat input away from t = 0 stays flat after frame averaging.
        assert_relative_eq!(cfg.frame_whole_blood()[2], 2.0, epsilon = 1e-12);
    }

    #[test]
    fn short_frame_falls_back_to_mid_interpolation() {
        let frames = vec![FrameTiming::new(0.1, 0.15), FrameTiming::new(0.15, 1.0)];
        let cfg = ModelConfig::new(ModelKind::OneTissue, frames, &[1.0, 1.0], &[1.0, 1.0], 0.0, 0.5)
            .unwrap();
        let grid = vec![0.0, 1.0, 2.0];
        // Frame 0 covers no sample at t = 0.5 * n; mid = 0.125.
        assert_relative_eq!(cfg.bin(0, &grid), 0.25, epsilon = 1e-12);
    }

    #[test]
    fn rejects_mismatched_input_length() {
        let err = ModelConfig::new(ModelKind::OneTissue, frames(), &[1.0, 1.0], &[1.0; 3], 0.0, 0.1)
            .unwrap_err();
        assert!(matches!(err, FitError::ShapeMismatch(_)));
    }

    #[test]
    fn rejects_bad_step_and_unordered_frames() {
        assert!(matches!(
            ModelConfig::new(ModelKind::OneTissue, frames(), &[1.0; 3], &[1.0; 3], 0.0, 0.0),
            Err(FitError::InvalidConfig(_))
        ));
        let mut bad = frames();
        bad.swap(0, 2);
        assert!(matches!(
            ModelConfig::new(ModelKind::OneTissue, bad, &[1.0; 3], &[1.0; 3], 0.0, 0.1),
            Err(FitError::InvalidConfig(_))
        ));
    }
}
