// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Incrementally-stepped complex oscillator (component A).
//!
//! Mirrors `osc.c`/`osc.h` from the original receiver: a unit-modulus
//! phasor is advanced by repeated complex multiplication, which drifts
//! slowly off the unit circle and is renormalized periodically rather than
//! on every step (a `sqrt`/div every 16384 steps is negligible next to the
//! filter cost).

use crate::sample::{cispi, Sample};
use std::sync::Mutex;

/// Steps between forced renormalizations of the phasor magnitude.
const RENORM_RATE: u32 = 16384;

#[derive(Debug, Clone, Copy)]
struct OscState {
    freq: f64,  // cycles/sample
    rate: f64,  // cycles/sample^2
    phasor: Sample,
    phasor_step: Sample,
    phasor_step_step: Sample,
    steps: u32,
}

impl Default for OscState {
    fn default() -> Self {
        OscState {
            freq: 0.0,
            rate: 0.0,
            phasor: Sample::new(f64::NAN, f64::NAN),
            phasor_step: Sample::new(1.0, 0.0),
            phasor_step_step: Sample::new(1.0, 0.0),
            steps: 0,
        }
    }
}

fn is_phasor_init(p: Sample) -> bool {
    !p.re.is_nan() && !p.im.is_nan() && p.norm_sqr() >= 0.9
}

/// A free-running digital oscillator, safe to share between the thread
/// that retunes it and the thread that steps it once per sample.
///
/// Locking follows §5: `set`/`renorm` take the mutex, `step` does not
/// (each oscillator owns its own lock so retuning one channel never
/// blocks another).
#[derive(Debug, Default)]
pub struct Oscillator {
    state: Mutex<OscState>,
}

impl Oscillator {
    pub fn new() -> Self {
        Oscillator::default()
    }

    pub fn with_freq(freq: f64) -> Self {
        let osc = Oscillator::new();
        osc.set(freq, 0.0);
        osc
    }

    /// Set oscillator frequency and sweep rate, in cycles/sample and
    /// cycles/sample^2 respectively.
    pub fn set(&self, freq: f64, rate: f64) {
        let mut s = self.state.lock().unwrap();
        if !is_phasor_init(s.phasor) {
            // Don't jump phase if already initialized.
            s.phasor = Sample::new(1.0, 0.0);
            s.steps = 0;
        }
        s.freq = freq;
        s.rate = rate;
        s.phasor_step = cispi(freq);
        s.phasor_step_step = if rate != 0.0 { cispi(rate) } else { Sample::new(1.0, 0.0) };
    }

    /// Advance one sample and return the phasor value prior to stepping.
    pub fn step(&self) -> Sample {
        let mut s = self.state.lock().unwrap();
        let r = s.phasor;
        if s.rate != 0.0 {
            let step_step = s.phasor_step_step;
            s.phasor_step *= step_step;
        }
        let step = s.phasor_step;
        s.phasor *= step;
        s.steps += 1;
        if s.steps == RENORM_RATE {
            Self::renorm_locked(&mut s);
        }
        r
    }

    /// Force magnitude renormalization now.
    pub fn renorm(&self) {
        let mut s = self.state.lock().unwrap();
        Self::renorm_locked(&mut s);
    }

    fn renorm_locked(s: &mut OscState) {
        s.steps = 0;
        s.phasor /= s.phasor.norm();
        if s.rate != 0.0 {
            s.phasor_step /= s.phasor_step.norm();
        }
    }

    pub fn freq(&self) -> f64 {
        self.state.lock().unwrap().freq
    }

    pub fn rate(&self) -> f64 {
        self.state.lock().unwrap().rate
    }

    pub fn phase(&self) -> f64 {
        self.state.lock().unwrap().phasor.arg()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_initializes_unit_phasor() {
        let osc = Oscillator::new();
        osc.set(0.01, 0.0);
        let p = osc.step();
        assert!((p.norm() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn magnitude_stays_near_unity_across_many_steps() {
        let osc = Oscillator::with_freq(0.013);
        let mut max_err = 0.0f64;
        for _ in 0..1_000_000 {
            let p = osc.step();
            max_err = max_err.max((p.norm() - 1.0).abs());
        }
        assert!(max_err < 1e-5, "max magnitude error {}", max_err);
    }

    #[test]
    fn rate_sweeps_frequency() {
        let osc = Oscillator::new();
        osc.set(0.0, 0.0001);
        let p0 = osc.step();
        for _ in 0..100 {
            osc.step();
        }
        let p1 = osc.step();
        assert_ne!(p0, p1);
    }

    #[test]
    fn renorm_is_idempotent_on_unit_phasor() {
        let osc = Oscillator::with_freq(0.25);
        osc.step();
        osc.renorm();
        let p = osc.step();
        assert!((p.norm() - 1.0).abs() < 1e-12);
    }
}
