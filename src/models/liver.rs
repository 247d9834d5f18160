//! Dual-input liver model.
//!
//! The liver receives blood from the hepatic artery and the portal vein. The
//! portal input is modelled as the arterial plasma input dispersed through the
//! gut with rate `ka`, and the two are mixed with arterial fraction `fa`:
//!
//! ```text
//! Cpv = ka * (exp(-ka t) ⊗ Cp)
//! Cin = fa * Cp + (1 - fa) * Cpv
//! ```
//!
//! Tissue follows a reversible two-tissue compartment model driven by `Cin`:
//!
//! ```text
//! Ct = K1 / (a2 - a1) * [ (k3 + k4 - a1) e^{-(a1+dk) t} + (a2 - k3 - k4) e^{-(a2+dk) t} ] ⊗ Cin
//! a1,2 = (k2 + k3 + k4 ∓ sqrt((k2 + k3 + k4)^2 - 4 k2 k4)) / 2
//! C = (1 - vb) Ct + vb Cwb
//! ```
//!
//! Parameters: `[vb, K1, k2, k3, k4, ka, fa]`. The Jacobian uses the default
//! central differences.

use crate::domain::ModelKind;
use crate::math::exp_conv;
use crate::models::{GridScratch, KineticModel, ModelConfig};

/// Below this eigenvalue gap the two exponentials are treated as one.
const EIGEN_GAP: f64 = 1e-10;

#[derive(Debug, Clone, Copy, Default)]
pub struct DualInputLiver;

/// Macro-rates `(a1, a2)` of the two-tissue system, `a1 <= a2`.
pub fn two_tissue_rates(k2: f64, k3: f64, k4: f64) -> (f64, f64) {
    let s = k2 + k3 + k4;
    let disc = (s * s - 4.0 * k2 * k4).max(0.0).sqrt();
    (0.5 * (s - disc), 0.5 * (s + disc))
}

impl KineticModel for DualInputLiver {
    fn kind(&self) -> ModelKind {
        ModelKind::Liver
    }

    fn curve(&self, params: &[f64], config: &ModelConfig, grid: &mut GridScratch, out: &mut [f64]) {
        let (vb, k1, k2, k3, k4, ka, fa) = (
            params[0], params[1], params[2], params[3], params[4], params[5], params[6],
        );
        let dt = config.step();
        let dk = config.decay();
        let cp = config.grid_plasma();
        let [cpv, cin, e1, e2] = &mut grid.buf;

        exp_conv(cp, ka, dt, cpv);
        for ((c, &a), &p) in cin.iter_mut().zip(cp.iter()).zip(cpv.iter()) {
            *c = fa * a + (1.0 - fa) * ka * p;
        }

        let (a1, a2) = two_tissue_rates(k2, k3, k4);
        exp_conv(cin, a1 + dk, dt, e1);
        if a2 - a1 > EIGEN_GAP * a2.max(1.0) {
            exp_conv(cin, a2 + dk, dt, e2);
            let c1 = k1 * (k3 + k4 - a1) / (a2 - a1);
            let c2 = k1 * (a2 - k3 - k4) / (a2 - a1);
            for (x, &y) in e1.iter_mut().zip(e2.iter()) {
                *x = c1 * *x + c2 * y;
            }
        } else {
            // k3 = 0 and k2 = k4: a single exponential at rate k2.
            for x in e1.iter_mut() {
                *x *= k1;
            }
        }

        let wb = config.frame_whole_blood();
        for (m, o) in out.iter_mut().enumerate() {
            *o = (1.0 - vb) * config.bin(m, e1) + vb * wb[m];
        }
    }
}
