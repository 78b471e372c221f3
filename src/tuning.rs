// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Tuning controller (component H, §4.H): owns the dual-LO plane mapping
//! {RF target, first-LO, second-LO, shift, Doppler, calibration}, enforces
//! the usable IF window, and negotiates first-LO changes with the front
//! end. Ported from `radio.c`'s `set_first_LO`/`set_second_LO`/`spindown`.

use crate::oscillator::Oscillator;
use crate::sample::Sample;
use std::sync::{Arc, Mutex};

/// The receiver's only external collaborator: a physical or simulated SDR
/// front end that accepts a first-LO retune command. Mocked in tests via
/// `mockall` rather than exercising real hardware.
#[cfg_attr(test, mockall::automock)]
pub trait FrontEnd: Send + Sync {
    fn set_first_lo(&self, hz: f64);
}

#[derive(Debug, Clone, Copy)]
struct TuningState {
    first_lo: f64,
    second_lo: f64,
    shift: f64,
    doppler: f64,
    doppler_rate: f64,
    calibration: f64,
}

impl Default for TuningState {
    fn default() -> Self {
        TuningState {
            first_lo: 0.0,
            second_lo: 0.0,
            shift: 0.0,
            doppler: 0.0,
            doppler_rate: 0.0,
            calibration: 0.0,
        }
    }
}

/// Owns the tuning plane's LO/Doppler/shift oscillators and the single
/// mutex that guards multi-field consistency across `set_freq`/
/// `set_doppler`/`set_shift` (§5 "Shared resources").
pub struct TuningController {
    state: Mutex<TuningState>,
    second_lo_osc: Arc<Oscillator>,
    shift_osc: Arc<Oscillator>,
    doppler_osc: Arc<Oscillator>,
    samprate: f64,
    min_if: f64,
    max_if: f64,
    passband_width: Mutex<f64>,
    front_end: Arc<dyn FrontEnd>,
}

impl TuningController {
    pub fn new(samprate: f64, min_if: f64, max_if: f64, front_end: Arc<dyn FrontEnd>) -> Self {
        let second_lo_osc = Arc::new(Oscillator::new());
        let shift_osc = Arc::new(Oscillator::new());
        let doppler_osc = Arc::new(Oscillator::new());
        TuningController {
            state: Mutex::new(TuningState::default()),
            second_lo_osc,
            shift_osc,
            doppler_osc,
            samprate,
            min_if,
            max_if,
            passband_width: Mutex::new(0.0),
            front_end,
        }
    }

    pub fn second_lo_oscillator(&self) -> Arc<Oscillator> {
        self.second_lo_osc.clone()
    }

    pub fn shift_oscillator(&self) -> Arc<Oscillator> {
        self.shift_osc.clone()
    }

    pub fn doppler_oscillator(&self) -> Arc<Oscillator> {
        self.doppler_osc.clone()
    }

    pub fn set_passband_width(&self, width: f64) {
        *self.passband_width.lock().unwrap() = width;
    }

    /// True when `candidate` (a prospective second-LO frequency) plus half
    /// the configured passband, and an optional extra margin, fit inside
    /// `[min_IF, max_IF]` without touching either alias edge.
    pub fn lo2_in_range(&self, candidate: f64, allow_margin: f64) -> bool {
        let half_passband = *self.passband_width.lock().unwrap() / 2.0;
        let lo = candidate - half_passband - allow_margin;
        let hi = candidate + half_passband + allow_margin;
        lo >= self.min_if && hi <= self.max_if
    }

    pub fn freq(&self) -> f64 {
        let s = self.state.lock().unwrap();
        s.first_lo * (1.0 + s.calibration) - s.second_lo + s.shift
    }

    pub fn first_lo(&self) -> f64 {
        self.state.lock().unwrap().first_lo
    }

    pub fn second_lo(&self) -> f64 {
        self.state.lock().unwrap().second_lo
    }

    pub fn set_calibration(&self, cal: f64) {
        self.state.lock().unwrap().calibration = cal;
    }

    pub fn calibration(&self) -> f64 {
        self.state.lock().unwrap().calibration
    }

    /// Tune so `target_rf` lands at zero IF. Prefers moving only the
    /// second LO (no device round trip); if that would leave the usable
    /// IF window, nudges the first LO by the minimum amount that restores
    /// range and reissues the command to the front end (§4.H tie-break).
    pub fn set_freq(&self, target_rf: f64) -> f64 {
        let mut s = self.state.lock().unwrap();
        let effective_first_lo = s.first_lo * (1.0 + s.calibration);
        let mut desired_second_lo = effective_first_lo - target_rf + s.shift;

        if !self.lo2_in_range(desired_second_lo, 0.0) {
            // Move the first LO by just enough to bring the candidate
            // second LO back to mid-window, then recompute.
            let half_passband = *self.passband_width.lock().unwrap() / 2.0;
            let window_mid = (self.min_if + self.max_if) / 2.0;
            let correction = desired_second_lo - window_mid;
            let new_first_lo = (effective_first_lo - correction) / (1.0 + s.calibration);
            s.first_lo = new_first_lo;
            self.front_end.set_first_lo(new_first_lo);
            desired_second_lo = new_first_lo * (1.0 + s.calibration) - target_rf + s.shift;
            let _ = half_passband;
        }

        s.second_lo = desired_second_lo;
        drop(s);
        self.second_lo_osc.set(-desired_second_lo / self.samprate, 0.0);
        desired_second_lo
    }

    /// Called when a status packet confirms the front end actually moved
    /// to `confirmed_first_lo`; recomputes the second LO so the effective
    /// center frequency stays at whatever `target_rf` was last requested.
    pub fn confirm_first_lo(&self, confirmed_first_lo: f64, target_rf: f64) {
        let mut s = self.state.lock().unwrap();
        s.first_lo = confirmed_first_lo;
        let effective = confirmed_first_lo * (1.0 + s.calibration);
        s.second_lo = effective - target_rf + s.shift;
        let second_lo = s.second_lo;
        drop(s);
        self.second_lo_osc.set(-second_lo / self.samprate, 0.0);
    }

    pub fn set_shift(&self, delta_hz: f64) {
        let mut s = self.state.lock().unwrap();
        s.shift = delta_hz;
        drop(s);
        self.shift_osc.set(delta_hz / self.samprate, 0.0);
    }

    pub fn shift(&self) -> f64 {
        self.state.lock().unwrap().shift
    }

    pub fn set_doppler(&self, delta_hz: f64, rate_hz_per_sec: f64) {
        let mut s = self.state.lock().unwrap();
        s.doppler = delta_hz;
        s.doppler_rate = rate_hz_per_sec;
        drop(s);
        let rate_per_sample_sq = rate_hz_per_sec / (self.samprate * self.samprate);
        self.doppler_osc.set(delta_hz / self.samprate, rate_per_sample_sq);
    }

    pub fn doppler(&self) -> f64 {
        self.state.lock().unwrap().doppler
    }

    pub fn doppler_rate(&self) -> f64 {
        self.state.lock().unwrap().doppler_rate
    }
}

/// Combines the second-LO, Doppler, and shift phasors into the single
/// per-sample spindown factor the channel slice applies, matching
/// `spindown`'s composition of `second_LO_phase` with a sweep term.
pub fn compose_spindown(second_lo: Sample, doppler: Sample) -> Sample {
    second_lo * doppler
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn freq_reflects_first_lo_second_lo_and_shift() {
        let fe = Arc::new(MockFrontEnd::new());
        let tuner = TuningController::new(192_000.0, -96_000.0, 96_000.0, fe);
        tuner.set_passband_width(16_000.0);
        tuner.set_freq(146_520_000.0);
        assert!((tuner.freq() - 146_520_000.0).abs() < 1e-3);
    }

    #[test]
    fn lo2_in_range_respects_margin() {
        let fe = Arc::new(MockFrontEnd::new());
        let tuner = TuningController::new(192_000.0, -96_000.0, 96_000.0, fe);
        tuner.set_passband_width(10_000.0);
        assert!(tuner.lo2_in_range(0.0, 0.0));
        assert!(!tuner.lo2_in_range(95_000.0, 0.0));
        assert!(!tuner.lo2_in_range(90_000.0, 2_000.0));
    }

    #[test]
    fn retune_nudges_first_lo_when_second_lo_would_exceed_range() {
        let mut mock = MockFrontEnd::new();
        mock.expect_set_first_lo().times(1).returning(|_| ());
        let fe = Arc::new(mock);
        let tuner = TuningController::new(192_000.0, -96_000.0, 96_000.0, fe);
        tuner.set_passband_width(10_000.0);

        // first_LO starts at 0; targeting a far frequency forces second_LO
        // out of the +-96kHz window, which must trigger a first_LO move.
        tuner.set_freq(200_000.0);
        assert!(tuner.lo2_in_range(tuner.second_lo(), 0.0));
        assert_ne!(tuner.first_lo(), 0.0);
    }

    #[test]
    fn set_shift_updates_shift_oscillator_frequency() {
        let fe = Arc::new(MockFrontEnd::new());
        let tuner = TuningController::new(48_000.0, -24_000.0, 24_000.0, fe);
        tuner.set_shift(1_000.0);
        assert_eq!(tuner.shift(), 1_000.0);
        assert!((tuner.shift_oscillator().freq() - 1_000.0 / 48_000.0).abs() < 1e-12);
    }
}
