//! One-tissue compartment model (1TCM).
//!
//! ```text
//! C(t) = (1 - vb) * K1 * (exp(-(k2 + dk) t) ⊗ Cp)(t) + vb * Cwb(t)
//! ```
//!
//! Parameters: `[vb, K1, k2]`. The Jacobian is analytic:
//!
//! - `dC/dvb = Cwb - K1 E`
//! - `dC/dK1 = (1 - vb) E`
//! - `dC/dk2 = (1 - vb) K1 dE/dk2`
//!
//! where `E` is the frame-averaged convolution.

use nalgebra::DMatrix;

use crate::domain::ModelKind;
use crate::math::{exp_conv, exp_conv_with_derivative};
use crate::models::{GridScratch, KineticModel, ModelConfig, ModelScratch};

#[derive(Debug, Clone, Copy, Default)]
pub struct OneTissue;

impl KineticModel for OneTissue {
    fn kind(&self) -> ModelKind {
        ModelKind::OneTissue
    }

    fn curve(&self, params: &[f64], config: &ModelConfig, grid: &mut GridScratch, out: &mut [f64]) {
        let (vb, k1, k2) = (params[0], params[1], params[2]);
        let [e, ..] = &mut grid.buf;
        exp_conv(config.grid_plasma(), k2 + config.decay(), config.step(), e);

        let wb = config.frame_whole_blood();
        for (m, o) in out.iter_mut().enumerate() {
            *o = (1.0 - vb) * k1 * config.bin(m, e) + vb * wb[m];
        }
    }

    fn jacobian(
        &self,
        params: &[f64],
        config: &ModelConfig,
        free: &[bool],
        scratch: &mut ModelScratch,
        curve: &mut [f64],
        jac: &mut DMatrix<f64>,
    ) {
        let (vb, k1, k2) = (params[0], params[1], params[2]);
        let [e, de, ..] = &mut scratch.grid.buf;
        exp_conv_with_derivative(config.grid_plasma(), k2 + config.decay(), config.step(), e, de);

        let wb = config.frame_whole_blood();
        for (m, c) in curve.iter_mut().enumerate() {
            let e_m = config.bin(m, e);
            let de_m = config.bin(m, de);
            *c = (1.0 - vb) * k1 * e_m + vb * wb[m];

            let cols = [wb[m] - k1 * e_m, (1.0 - vb) * e_m, (1.0 - vb) * k1 * de_m];
            for (j, v) in cols.into_iter().enumerate() {
                jac[(m, j)] = if free[j] { v } else { 0.0 };
            }
        }
    }
}
