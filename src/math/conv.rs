//! Exponential-kernel convolution on a uniform time grid.
//!
//! Every compartment in the supported models has an impulse response that is a
//! sum of terms `c * exp(-k t)`. Convolving an input sampled on a uniform grid
//! with such a kernel is done with the rectangle-rule recursion:
//!
//! ```text
//! E[0] = x[0] dt
//! E[n] = a E[n-1] + x[n] dt,      a = exp(-k dt)
//! ```
//!
//! which is `O(n)` per rate instead of `O(n^2)` for a direct sum.
//! Differentiating the recursion w.r.t. `k` gives
//!
//! ```text
//! D[0] = 0
//! D[n] = a D[n-1] - dt a E[n-1]
//! ```
//!
//! so analytic Jacobians match the evaluated curve exactly.

/// `out = exp(-rate t) ⊗ input` on a grid with spacing `dt`.
pub fn exp_conv(input: &[f64], rate: f64, dt: f64, out: &mut [f64]) {
    debug_assert_eq!(input.len(), out.len());
    let a = (-rate * dt).exp();
    let mut acc = 0.0;
    for (o, &x) in out.iter_mut().zip(input) {
        acc = a * acc + x * dt;
        *o = acc;
    }
}

/// Like [`exp_conv`], additionally writing `d/d(rate)` of the result to `dout`.
pub fn exp_conv_with_derivative(
    input: &[f64],
    rate: f64,
    dt: f64,
    out: &mut [f64],
    dout: &mut [f64],
) {
    debug_assert_eq!(input.len(), out.len());
    debug_assert_eq!(input.len(), dout.len());
    let a = (-rate * dt).exp();
    let da = -dt * a;
    let mut acc = 0.0;
    let mut dacc = 0.0;
    for ((o, d), &x) in out.iter_mut().zip(dout.iter_mut()).zip(input) {
        // Derivative uses the previous accumulator, so update it first.
        dacc = a * dacc + da * acc;
        acc = a * acc + x * dt;
        *o = acc;
        *d = dacc;
    }
}

/// Resample piecewise-linear knots `(xs, ys)` onto `t_n = n * dt`.
///
/// An implicit knot `(0, 0)` is added in front (activity is zero before
/// injection) unless the first knot already sits at `t = 0`. Beyond the last
/// knot the last value is held.
pub fn resample_linear(xs: &[f64], ys: &[f64], dt: f64, out: &mut [f64]) {
    debug_assert_eq!(xs.len(), ys.len());
    if xs.is_empty() {
        out.fill(0.0);
        return;
    }

    let mut k = 0usize;
    let mut x0 = 0.0;
    let mut y0 = 0.0;
    if xs[0] <= 0.0 {
        y0 = ys[0];
        k = 1;
    }

    for (n, o) in out.iter_mut().enumerate() {
        let t = n as f64 * dt;
        while k < xs.len() && xs[k] <= t {
            x0 = xs[k];
            y0 = ys[k];
            k += 1;
        }
        *o = if k == xs.len() {
            y0
        } else {
            let x1 = xs[k];
            let y1 = ys[k];
            y0 + (y1 - y0) * (t - x0) / (x1 - x0)
        };
    }
}

/// Linear interpolation of a grid signal at an arbitrary time `t`.
pub fn grid_value_at(values: &[f64], dt: f64, t: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let pos = (t / dt).max(0.0);
    let i = pos.floor() as usize;
    if i + 1 >= values.len() {
        return values[values.len() - 1];
    }
    let frac = pos - i as f64;
    values[i] + (values[i + 1] - values[i]) * frac
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn zero_rate_convolution_is_running_integral() {
        let x = [1.0, 1.0, 1.0, 1.0];
        let mut out = [0.0; 4];
        exp_conv(&x, 0.0, 0.5, &mut out);
        assert_eq!(out, [0.5, 1.0, 1.5, 2.0]);
    }

    #[test]
    fn derivative_matches_finite_difference() {
        let x: Vec<f64> = (0..200).map(|n| (n as f64 * 0.05).sin().abs()).collect();
        let dt = 0.05;
        let k = 0.7;
        let h = 1e-6;

        let mut e = vec![0.0; x.len()];
        let mut d = vec![0.0; x.len()];
        exp_conv_with_derivative(&x, k, dt, &mut e, &mut d);

        let mut plus = vec![0.0; x.len()];
        let mut minus = vec![0.0; x.len()];
        exp_conv(&x, k + h, dt, &mut plus);
        exp_conv(&x, k - h, dt, &mut minus);

        for n in [10, 50, 199] {
            let fd = (plus[n] - minus[n]) / (2.0 * h);
            assert_relative_eq!(d[n], fd, max_relative = 1e-6);
        }
        let mut plain = vec![0.0; x.len()];
        exp_conv(&x, k, dt, &mut plain);
        assert_eq!(plain, e);
    }

    #[test]
    fn resample_adds_origin_and_holds_tail() {
        let xs = [1.0, 3.0];
        let ys = [2.0, 4.0];
        let mut out = [0.0; 6];
        resample_linear(&xs, &ys, 1.0, &mut out);
        assert_eq!(out, [0.0, 2.0, 3.0, 4.0, 4.0, 4.0]);
    }

    #[test]
    fn grid_value_interpolates_between_samples() {
        let v = [0.0, 1.0, 3.0];
        assert_relative_eq!(grid_value_at(&v, 0.5, 0.75), 2.0);
        assert_relative_eq!(grid_value_at(&v, 0.5, 10.0), 3.0);
    }
}
