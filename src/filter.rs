// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Overlap-save fast-convolution channelizer (component C), ported from
//! `filter.c`/`filter.h`. Forward-transforms a block of `L` new samples
//! together with `M-1` samples of overlap, multiplies per-bin against a
//! frequency-domain response, and inverse-transforms at the decimated
//! size to recover `L/D` filtered, decimated output samples.

use crate::sample::Sample;
use crate::window::make_kaiser;
use log::warn;
use rustfft::{Fft, FftPlanner};
use std::sync::{Arc, Mutex};

/// Whether the filter's time-domain input carries a real or complex signal.
/// Real inputs are represented with an always-zero imaginary part; kept as
/// a separate tag (rather than inferred) because it documents intent at
/// the construction site, matching the original's `REAL`/`COMPLEX` input type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputDomain {
    Real,
    Complex,
}

/// Output shape of the decimated spectrum (§4.C).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputDomain {
    /// Straightforward complex-to-complex decimation.
    Complex,
    /// Only positive frequencies are stored; negatives are reconstructed
    /// implicitly by Hermitian symmetry before the inverse transform, so
    /// the result is real (zero imaginary part).
    Real,
    /// Independent-sideband "cross-conjugate" folding: negative-frequency
    /// energy lands on the real (I) channel, positive on the imaginary
    /// (Q) channel.
    CrossConj,
}

/// Block-convolution overlap-save filter with dynamic Kaiser-windowed
/// response and integer decimation.
pub struct Filter {
    l: usize,
    m: usize,
    n: usize,
    decimation: usize,
    input_domain: InputDomain,
    output_domain: OutputDomain,
    response: Mutex<Arc<Vec<Sample>>>,
    input_ring: Vec<Sample>,
    forward_plan: Arc<dyn Fft<f64>>,
    inverse_plan: Arc<dyn Fft<f64>>,
    kaiser_beta: f64,
    low: f64,
    high: f64,
}

impl std::fmt::Debug for Filter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Filter")
            .field("l", &self.l)
            .field("m", &self.m)
            .field("n", &self.n)
            .field("decimation", &self.decimation)
            .field("input_domain", &self.input_domain)
            .field("output_domain", &self.output_domain)
            .finish()
    }
}

impl Filter {
    /// Create a filter for block size `l`, impulse length `m`, and integer
    /// decimation `d`. `n = l + m - 1` is the FFT size.
    pub fn new(l: usize, m: usize, d: usize, input_domain: InputDomain, output_domain: OutputDomain) -> Self {
        assert!(d >= 1, "decimation must be >= 1");
        let n = l + m - 1;
        if n % d != 0 {
            warn!(
                "filter: N={} is not evenly divisible by decimation D={}; proceeding anyway",
                n, d
            );
        }
        if matches!(output_domain, OutputDomain::Complex | OutputDomain::CrossConj) {
            assert!(
                d % 2 == 0 || d == 1,
                "decimated complex/ISB output requires an even decimation factor to avoid aliasing the Nyquist bin"
            );
        }
        let n_dec = (n / d).max(1);
        let mut planner = FftPlanner::<f64>::new();
        let forward_plan = planner.plan_fft_forward(n);
        let inverse_plan = planner.plan_fft_inverse(n_dec);
        Filter {
            l,
            m,
            n,
            decimation: d,
            input_domain,
            output_domain,
            response: Mutex::new(Arc::new(vec![Sample::new(0.0, 0.0); n])),
            input_ring: vec![Sample::new(0.0, 0.0); n],
            forward_plan,
            inverse_plan,
            kaiser_beta: 0.0,
            low: 0.0,
            high: 0.0,
        }
    }

    pub fn block_size(&self) -> usize {
        self.l
    }

    pub fn output_block_size(&self) -> usize {
        self.n / self.decimation
    }

    pub fn impulse_length(&self) -> usize {
        self.m
    }

    pub fn fft_size(&self) -> usize {
        self.n
    }

    pub fn decimation(&self) -> usize {
        self.decimation
    }

    /// Install a raw frequency-domain response directly, bypassing the
    /// Kaiser-window builder. Used by tests and by callers who precompute
    /// a response (e.g. a notch or an externally designed shape).
    pub fn set_response_raw(&self, response: Vec<Sample>) {
        assert_eq!(response.len(), self.n, "response length must equal N");
        *self.response.lock().unwrap() = Arc::new(response);
    }

    /// Rebuild the frequency response for a new passband `[low, high]`
    /// (Hz, relative to the filter's own input sample rate, bounded by the
    /// decimated Nyquist `samprate/(2*D)`), window shape `beta`, and input
    /// sample rate `samprate`.
    pub fn set_passband(&mut self, low: f64, high: f64, beta: f64, samprate: f64) {
        self.low = low;
        self.high = high;
        self.kaiser_beta = beta;

        let n = self.n;
        let m = self.m;

        // Ideal brick-wall mask in the frequency domain, N bins wide.
        let mut mask = vec![Sample::new(0.0, 0.0); n];
        for k in 0..n {
            let freq = bin_frequency(k, n, samprate);
            if freq >= low && freq <= high {
                mask[k] = Sample::new(1.0, 0.0);
            }
        }
        mask[0] = Sample::new(mask[0].re, 0.0);
        if n % 2 == 0 {
            mask[n / 2] = Sample::new(mask[n / 2].re, 0.0);
        }

        // Inverse-transform to the time domain prototype impulse response.
        let mut impulse = mask;
        self.inverse_fft_full(&mut impulse);
        for v in impulse.iter_mut() {
            *v /= n as f64;
        }

        // Apply a length-M Kaiser taper centered on the impulse's peak
        // (which sits at index 0 after the inverse transform above, so the
        // window is applied circularly-shifted by M/2), then zero-pad back
        // out to N before transforming forward again.
        let kaiser = make_kaiser(beta, m);
        let mut windowed = vec![Sample::new(0.0, 0.0); n];
        for (i, &w) in kaiser.iter().enumerate() {
            let src = (i + n - m / 2) % n;
            windowed[i] = impulse[src] * w;
        }

        self.forward_plan.process(&mut windowed);

        let gain_trim = match self.output_domain {
            OutputDomain::Real | OutputDomain::CrossConj => std::f64::consts::FRAC_1_SQRT_2,
            OutputDomain::Complex => 1.0,
        };
        for v in windowed.iter_mut() {
            *v *= gain_trim;
        }

        self.set_response_raw(windowed);
    }

    /// Fraction of passband power relative to the peak response bin,
    /// expressed as an equivalent noise bandwidth in Hz at `samprate`.
    /// Supplements the core per SPEC_FULL §11; surfaced on the status
    /// channel as `noise_bandwidth`.
    pub fn noise_bandwidth(&self, samprate: f64) -> f64 {
        let response = self.response.lock().unwrap().clone();
        let peak = response.iter().map(|c| c.norm_sqr()).fold(0.0, f64::max);
        if peak <= 0.0 {
            return 0.0;
        }
        let sum: f64 = response.iter().map(|c| c.norm_sqr() / peak).sum();
        sum * samprate / self.n as f64
    }

    /// Process one block of `L` new input samples, returning `L/D`
    /// filtered, decimated output samples.
    pub fn execute(&mut self, new_samples: &[Sample]) -> Vec<Sample> {
        assert_eq!(new_samples.len(), self.l, "execute() requires exactly L new samples");

        // Append the new block; positions [0..M-2] already hold the
        // previous block's tail.
        self.input_ring[self.m - 1..self.n].copy_from_slice(new_samples);
        if self.input_domain == InputDomain::Real {
            for s in self.input_ring.iter_mut() {
                s.im = 0.0;
            }
        }

        let mut fdomain = self.input_ring.clone();
        self.forward_plan.process(&mut fdomain);

        let response = self.response.lock().unwrap().clone();
        let n = self.n;
        let d = self.decimation;
        let n_dec = self.output_block_size();

        let mut spectrum = match self.output_domain {
            OutputDomain::Complex => decimate_complex_spectrum(&fdomain, &response, n, n_dec),
            OutputDomain::Real => decimate_real_spectrum(&fdomain, &response, n, n_dec),
            OutputDomain::CrossConj => decimate_cross_conj_spectrum(&fdomain, &response, n, n_dec),
        };

        self.inverse_plan.process(&mut spectrum);
        for v in spectrum.iter_mut() {
            *v /= n_dec as f64;
        }
        if self.output_domain == OutputDomain::Real {
            for v in spectrum.iter_mut() {
                v.im = 0.0;
            }
        }

        // Preserve the last M-1 samples of this block for next time.
        let tail_start = self.n - (self.m - 1);
        let tail: Vec<Sample> = self.input_ring[tail_start..].to_vec();
        self.input_ring[..self.m - 1].copy_from_slice(&tail);

        let overlap_out = (self.m - 1) / d;
        spectrum.split_off(overlap_out.min(spectrum.len()))
    }

    /// Run the forward FFT plan (size N) in place, used internally and by
    /// callers diagnosing the response.
    fn inverse_fft_full(&self, data: &mut [Sample]) {
        let mut planner = FftPlanner::<f64>::new();
        let plan = planner.plan_fft_inverse(self.n);
        plan.process(data);
    }
}

fn bin_frequency(k: usize, n: usize, samprate: f64) -> f64 {
    if k <= n / 2 {
        k as f64 * samprate / n as f64
    } else {
        (k as f64 - n as f64) * samprate / n as f64
    }
}

fn decimate_complex_spectrum(fdomain: &[Sample], response: &[Sample], n: usize, n_dec: usize) -> Vec<Sample> {
    let mut out = vec![Sample::new(0.0, 0.0); n_dec];
    for k in 0..=n_dec / 2 {
        out[k] = fdomain[k] * response[k];
    }
    for k in 1..n_dec / 2 {
        out[n_dec - k] = fdomain[n - k] * response[n - k];
    }
    out
}

fn decimate_real_spectrum(fdomain: &[Sample], response: &[Sample], n: usize, n_dec: usize) -> Vec<Sample> {
    let mut out = vec![Sample::new(0.0, 0.0); n_dec];
    out[0] = Sample::new((fdomain[0] * response[0]).re, 0.0);
    if n_dec % 2 == 0 {
        out[n_dec / 2] = Sample::new((fdomain[n / 2] * response[n / 2]).re, 0.0);
    }
    for k in 1..n_dec / 2 {
        let p = response[k] * fdomain[k];
        let neg = response[n - k] * fdomain[n - k];
        let val = p + neg.conj();
        out[k] = val;
        out[n_dec - k] = val.conj();
    }
    out
}

fn decimate_cross_conj_spectrum(fdomain: &[Sample], response: &[Sample], n: usize, n_dec: usize) -> Vec<Sample> {
    let mut out = vec![Sample::new(0.0, 0.0); n_dec];
    out[0] = fdomain[0] * response[0];
    if n_dec % 2 == 0 {
        out[n_dec / 2] = fdomain[n / 2] * response[n / 2];
    }
    for k in 1..n_dec / 2 {
        let p = response[k] * fdomain[k];
        let neg = response[n - k] * fdomain[n - k];
        out[k] = p + neg.conj();
        out[n_dec - k] = neg - p.conj();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn straight_through_flat_response_delays_by_overlap() {
        let l = 1024;
        let m = 513;
        let mut filter = Filter::new(l, m, 1, InputDomain::Complex, OutputDomain::Complex);
        let n = filter.fft_size();
        filter.set_response_raw(vec![Sample::new(1.0, 0.0); n]);

        let input: Vec<Sample> = (0..l).map(|i| Sample::new(i as f64, 0.0)).collect();
        let out = filter.execute(&input);

        assert_eq!(out.len(), l);
        // A literal flat (all-ones) response makes the forward/inverse FFT
        // pair an identity transform, so once the overlap-save discard has
        // consumed the first M-1 samples of transient, the straight-through
        // output is the input itself with zero added delay.
        for i in (m..l).step_by(50) {
            let expected = i as f64;
            assert!(
                (out[i].re - expected).abs() < 1e-6,
                "i={i} got {} want {}",
                out[i].re,
                expected
            );
        }
    }

    #[test]
    fn tone_through_decimating_bandpass_preserves_amplitude() {
        let l = 4096;
        let m = 4097;
        let samprate = 48_000.0;
        let mut filter = Filter::new(l, m, 2, InputDomain::Complex, OutputDomain::Complex);
        filter.set_passband(-10_000.0, 10_000.0, 3.0, samprate);

        let tone_freq = 5_000.0;
        let mut phase = 0.0f64;
        let step = 2.0 * std::f64::consts::PI * tone_freq / samprate;

        let mut last_out = Vec::new();
        for _ in 0..6 {
            let block: Vec<Sample> = (0..l)
                .map(|_| {
                    let s = Sample::new(phase.cos(), phase.sin());
                    phase += step;
                    s
                })
                .collect();
            last_out = filter.execute(&block);
        }

        let settled = &last_out[last_out.len() / 2..];
        let avg_amp: f64 = settled.iter().map(|s| s.norm()).sum::<f64>() / settled.len() as f64;
        assert!((avg_amp - 1.0).abs() < 0.1, "avg amplitude {avg_amp}");
    }

    #[test]
    fn decimated_nyquist_bin_does_not_panic_for_even_decimation() {
        let mut filter = Filter::new(256, 65, 4, InputDomain::Complex, OutputDomain::Complex);
        filter.set_passband(-5_000.0, 5_000.0, 2.0, 48_000.0);
        let input = vec![Sample::new(1.0, 0.0); 256];
        let out = filter.execute(&input);
        assert_eq!(out.len(), filter.output_block_size() - (filter.impulse_length() - 1) / filter.decimation());
        assert!(out.iter().all(|s| s.re.is_finite() && s.im.is_finite()));
    }
}
