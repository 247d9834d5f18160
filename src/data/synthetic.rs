//! Synthetic batches for smoke tests and benchmarking.
//!
//! Each unit gets its own ground-truth parameter vector (the model's typical
//! values perturbed by up to ±20%), its noise-free curve from the forward
//! model, and Gaussian noise whose variance scales with activity over frame
//! duration. The plasma input is Feng's three-exponential FDG curve.

use nalgebra::DMatrix;
use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::{Normal, Uniform};

use crate::domain::{BatchRequest, FrameTiming, ModelKind};
use crate::error::{FitError, Result};
use crate::models::{evaluate_curves, ModelConfig};

/// Feng input function coefficients (amplitudes, 1/min rates).
const FENG_A: [f64; 3] = [851.1225, 21.8798, 20.8113];
const FENG_L: [f64; 3] = [-4.133859, -0.1191, -0.0104];

/// Relative half-width of the per-unit truth perturbation.
const TRUTH_SPREAD: f64 = 0.2;

/// Frame protocol as `(count, seconds)` groups.
const PROTOCOL: [(usize, f64); 5] = [(6, 10.0), (4, 30.0), (4, 60.0), (5, 120.0), (8, 300.0)];

#[derive(Debug, Clone)]
pub struct SimulationSpec {
    pub model: ModelKind,
    pub units: usize,
    /// Noise scale; 0 gives noise-free curves.
    pub noise: f64,
    pub seed: u64,
    pub step: f64,
    pub decay: f64,
    pub max_iterations: usize,
}

impl SimulationSpec {
    pub fn new(model: ModelKind, units: usize) -> Self {
        Self {
            model,
            units,
            noise: 0.0,
            seed: 42,
            step: 0.01,
            decay: 0.0,
            max_iterations: 50,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyntheticData {
    pub request: BatchRequest,
    /// Ground-truth parameters, params × units.
    pub truth: DMatrix<f64>,
}

/// Default dynamic frame schedule (minutes), 57 minutes in 27 frames.
pub fn default_frames() -> Vec<FrameTiming> {
    let mut frames = Vec::new();
    let mut t = 0.0;
    for (count, seconds) in PROTOCOL {
        let len = seconds / 60.0;
        for _ in 0..count {
            frames.push(FrameTiming::new(t, t + len));
            t += len;
        }
    }
    frames
}

/// Feng plasma input at time `t` (minutes); zero before injection.
pub fn feng_input(t: f64) -> f64 {
    if t <= 0.0 {
        return 0.0;
    }
    let [a1, a2, a3] = FENG_A;
    let [l1, l2, l3] = FENG_L;
    (a1 * t - a2 - a3) * (l1 * t).exp() + a2 * (l2 * t).exp() + a3 * (l3 * t).exp()
}

pub fn generate_batch(spec: &SimulationSpec) -> Result<SyntheticData> {
    if !(spec.noise.is_finite() && spec.noise >= 0.0) {
        return Err(FitError::config(format!(
            "Noise level must be finite and >= 0 (got {}).",
            spec.noise
        )));
    }

    let model = spec.model;
    let np = model.param_count();
    let frames = default_frames();
    let plasma: Vec<f64> = frames.iter().map(|f| feng_input(f.mid())).collect();
    let whole_blood = plasma.clone();
    let config = ModelConfig::new(model, frames.clone(), &plasma, &whole_blood, spec.decay, spec.step)?;

    let mut rng = StdRng::seed_from_u64(spec.seed);
    let spread = Uniform::new_inclusive(1.0 - TRUTH_SPREAD, 1.0 + TRUTH_SPREAD);
    let normal = Normal::new(0.0, 1.0).map_err(|e| FitError::config(format!("Noise distribution error: {e}")))?;

    let typical = model.typical_params();
    let bounds = model.default_bounds();
    let mut truth = DMatrix::zeros(np, spec.units);
    for mut column in truth.column_iter_mut() {
        for (i, value) in column.iter_mut().enumerate() {
            *value = bounds.clamp(i, typical[i] * spread.sample(&mut rng));
        }
    }

    let mut tac = evaluate_curves(&config, &truth)?;
    if spec.noise > 0.0 {
        for mut column in tac.column_iter_mut() {
            for (value, frame) in column.iter_mut().zip(&frames) {
                let sigma = spec.noise * (value.abs() / frame.duration()).sqrt();
                *value += sigma * normal.sample(&mut rng);
            }
        }
    }

    let weights: Vec<f64> = frames.iter().map(FrameTiming::duration).collect();
    let nf = frames.len();

    let request = BatchRequest {
        model,
        tac,
        weights: DMatrix::from_vec(nf, 1, weights),
        frames,
        plasma,
        whole_blood,
        decay: spec.decay,
        step: spec.step,
        initial: DMatrix::from_vec(np, 1, typical),
        lower: bounds.lower,
        upper: bounds.upper,
        sensitivity: vec![1.0; np],
        max_iterations: spec.max_iterations,
    };

    Ok(SyntheticData { request, truth })
}
