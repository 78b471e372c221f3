// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kaiser window generation (component B), ported from `window.c`'s
//! `make_kaiser`/`i0`.

/// Modified Bessel function of the first kind, order 0, via its power
/// series. Terms are accumulated until the next one is below `1e-12` of
/// the running sum, matching the original's convergence bound.
fn bessel_i0(x: f64) -> f64 {
    let t = 0.25 * x * x;
    let mut sum = 1.0 + t;
    let mut term = t;
    for k in 2..40 {
        term *= t / (k * k) as f64;
        sum += term;
        if term < 1e-12 * sum {
            break;
        }
    }
    sum
}

/// Generate a symmetric length-`m` Kaiser window for shape parameter `beta`.
///
/// `m` must be at least 2. The window is computed from one half and
/// mirrored; for odd `m` the middle sample is exactly 1.0.
pub fn make_kaiser(beta: f64, m: usize) -> Vec<f64> {
    assert!(m >= 2, "Kaiser window length must be >= 2");
    let mut w = vec![0.0f64; m];
    let inv_denom = 1.0 / bessel_i0(std::f64::consts::PI * beta);
    let pc = 2.0 / (m - 1) as f64;
    for n in 0..m / 2 {
        let p = pc * n as f64 - 1.0;
        let val = bessel_i0(std::f64::consts::PI * beta * (1.0 - p * p).max(0.0).sqrt()) * inv_denom;
        w[n] = val;
        w[m - 1 - n] = val;
    }
    if m % 2 == 1 {
        w[(m - 1) / 2] = 1.0;
    }
    w
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symmetric_and_peak_one() {
        for &beta in &[0.0, 1.5, 3.0, 8.0] {
            for &m in &[2usize, 3, 16, 17, 513] {
                let w = make_kaiser(beta, m);
                for n in 0..m {
                    assert!(
                        (w[n] - w[m - 1 - n]).abs() < 1e-6,
                        "asymmetry at beta={beta} m={m} n={n}"
                    );
                }
                let peak = w.iter().cloned().fold(f64::MIN, f64::max);
                assert!((peak - 1.0).abs() < 1e-6, "peak {peak} at beta={beta} m={m}");
            }
        }
    }

    #[test]
    fn matches_known_values_beta3_m5() {
        let w = make_kaiser(3.0, 5);
        let expected = [0.089, 0.595, 1.000, 0.595, 0.089];
        for (got, want) in w.iter().zip(expected.iter()) {
            assert!((got - want).abs() < 1e-3, "got {got} want {want}");
        }
    }

    #[test]
    fn rectangular_at_beta_zero() {
        let w = make_kaiser(0.0, 8);
        for v in w {
            assert!((v - 1.0).abs() < 1e-6);
        }
    }
}
