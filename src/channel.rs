// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Channel slice (component D): pre-processes raw complex baseband from
//! the network before it enters the filter's input ring — DC removal,
//! I/Q gain and phase imbalance correction, spindown by the second LO,
//! and optional Fs/4 pre-rotation.

use crate::oscillator::Oscillator;
use crate::sample::Sample;
use std::sync::Arc;

/// 4-state table for ±pi/2*n pre-rotation, used when the front end was
/// offset by Fs/4 to avoid DC artifacts at the ADC.
const QUARTER_TURNS: [Sample; 4] = [
    Sample { re: 1.0, im: 0.0 },
    Sample { re: 0.0, im: 1.0 },
    Sample { re: -1.0, im: 0.0 },
    Sample { re: 0.0, im: -1.0 },
];

#[derive(Debug, Clone, Copy)]
struct ImbalanceState {
    dc: Sample,
    imb: f64,
    sinphi: f64,
    gain_i: f64,
    gain_q: f64,
    secphi: f64,
    tanphi: f64,
}

impl Default for ImbalanceState {
    fn default() -> Self {
        ImbalanceState {
            dc: Sample::new(0.0, 0.0),
            imb: 1.0,
            sinphi: 0.0,
            gain_i: 1.0,
            gain_q: 1.0,
            secphi: 1.0,
            tanphi: 0.0,
        }
    }
}

/// Pre-processes one channel's raw baseband ahead of the filter.
pub struct ChannelSlice {
    second_lo: Arc<Oscillator>,
    dc_alpha: f64,
    imbalance_rate: f64,
    state: ImbalanceState,
    quarter_turn: usize,
    if_power: f64,
    baseband_power: f64,
}

impl ChannelSlice {
    pub fn new(second_lo: Arc<Oscillator>) -> Self {
        ChannelSlice {
            second_lo,
            dc_alpha: 1e-3,
            imbalance_rate: 1e-3,
            state: ImbalanceState::default(),
            quarter_turn: 0,
            if_power: 0.0,
            baseband_power: 0.0,
        }
    }

    pub fn set_quarter_turn_offset(&mut self, n: usize) {
        self.quarter_turn = n % 4;
    }

    /// Apply this block's corrections to `samples` in place and spin them
    /// down by the second LO, recomputing the DC/gain/phase correction
    /// estimates from this block's pre-mix content for use on the next one.
    pub fn process_block(&mut self, samples: &mut [Sample]) {
        let count = samples.len().max(1) as f64;
        self.if_power = samples.iter().map(|c| c.norm_sqr()).sum::<f64>() / count;

        let s = &mut self.state;
        let mut i_energy = 0.0f64;
        let mut q_energy = 0.0f64;
        let mut iq_sum = 0.0f64;
        let mut power_sum = 0.0f64;
        let mut raw_sum = Sample::new(0.0, 0.0);

        for x in samples.iter_mut() {
            // Front-end I/Q imbalance is a property of the ADC path, not of
            // any downstream per-channel retuning, so every estimator term
            // below is measured ahead of the second-LO mix: the DC sum on
            // the untouched raw sample, the I/Q energies right after DC
            // removal but before gain correction, and the cross term after
            // gain correction but before phase correction.
            raw_sum += *x;

            let mut c = *x - s.dc;
            i_energy += c.re * c.re;
            q_energy += c.im * c.im;

            c.re *= s.gain_i;
            c.im *= s.gain_q;
            iq_sum += c.re * c.im;

            // Remove phase imbalance using the smoothed sin/sec/tan estimates.
            c.im = (c.im - c.re * s.sinphi) * s.secphi;
            let _ = s.tanphi; // retained for diagnostics; folded into secphi/sinphi above

            if self.quarter_turn != 0 {
                c *= QUARTER_TURNS[self.quarter_turn];
            }

            let lo = self.second_lo.step();
            c *= lo.conj();

            power_sum += c.norm_sqr();

            *x = c;
        }

        self.baseband_power = power_sum / count;

        // Update estimates from this block's raw content for use on the
        // *next* block.
        s.dc += Sample::new(
            self.dc_alpha * (raw_sum.re / count - s.dc.re),
            self.dc_alpha * (raw_sum.im / count - s.dc.im),
        );

        if i_energy > 0.0 && q_energy > 0.0 {
            s.imb += self.imbalance_rate * (i_energy / q_energy - s.imb);
            s.gain_i = ((1.0 + 1.0 / s.imb) / 2.0).sqrt();
            s.gain_q = ((1.0 + s.imb) / 2.0).sqrt();

            let new_sin = 2.0 * iq_sum / (i_energy + q_energy);
            s.sinphi += self.imbalance_rate * (new_sin - s.sinphi);
            s.secphi = 1.0 / (1.0 - s.sinphi * s.sinphi).max(1e-9).sqrt();
            s.tanphi = s.sinphi * s.secphi;
        }
    }

    pub fn if_power(&self) -> f64 {
        self.if_power
    }

    pub fn baseband_power(&self) -> f64 {
        self.baseband_power
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removes_dc_offset_over_many_blocks() {
        let lo = Arc::new(Oscillator::with_freq(0.0));
        let mut chan = ChannelSlice::new(lo);
        for _ in 0..2000 {
            let mut block = vec![Sample::new(1.0, 0.5); 64];
            chan.process_block(&mut block);
        }
        let mut probe = vec![Sample::new(1.0, 0.5); 64];
        chan.process_block(&mut probe);
        let mean: Sample = probe.iter().fold(Sample::new(0.0, 0.0), |a, b| a + b) / probe.len() as f64;
        assert!(mean.norm() < 0.05, "residual DC {:?}", mean);
    }

    #[test]
    fn dc_estimate_ignores_second_lo_mixing() {
        // The DC estimator must read the raw (pre-mix) sample, not the
        // post-mix one written back to the block: a nonzero LO spins a
        // constant offset into a rotating tone whose mean is near zero,
        // so an estimator fed post-mix samples would never converge here.
        let lo = Arc::new(Oscillator::with_freq(0.013));
        let mut chan = ChannelSlice::new(lo);
        for _ in 0..5000 {
            let mut block = vec![Sample::new(1.0, 0.5); 64];
            chan.process_block(&mut block);
        }
        let dc = chan.state.dc;
        assert!((dc.re - 1.0).abs() < 0.05, "dc.re {}", dc.re);
        assert!((dc.im - 0.5).abs() < 0.05, "dc.im {}", dc.im);
    }

    #[test]
    fn quarter_turn_rotates_by_90_degrees() {
        let lo = Arc::new(Oscillator::with_freq(0.0));
        let mut chan = ChannelSlice::new(lo);
        chan.set_quarter_turn_offset(1);
        let mut block = vec![Sample::new(1.0, 0.0)];
        chan.process_block(&mut block);
        assert!((block[0].im - 1.0).abs() < 1e-6 || (block[0].re).abs() < 1e-6);
    }
}
