// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! AM envelope demodulator (component E, §4.E): magnitude, high-pass DC
//! removal tracking the carrier, and carrier-driven AGC with a hang timer.

use super::{Agc, DemodOutput};
use crate::sample::Sample;

pub struct AmDemod {
    dc_alpha: f64,
    dc: f64,
    agc: Agc,
    samprate: f64,
}

impl AmDemod {
    pub fn new(samprate: f64, headroom: f64, hangtime_secs: f64, recovery_db_per_sec: f64) -> Self {
        AmDemod {
            dc_alpha: 1e-4,
            dc: 0.0,
            agc: Agc::new(headroom, hangtime_secs, samprate, recovery_db_per_sec, 0.0),
            samprate,
        }
    }

    pub fn agc(&self) -> &Agc {
        &self.agc
    }

    pub fn demodulate(&mut self, block: &[Sample]) -> DemodOutput {
        let recovery = self.agc.recovery_per_sample(self.samprate);
        let mut audio = Vec::with_capacity(block.len());

        for &x in block {
            let m = x.norm();
            if !m.is_finite() {
                // Numerical degenerate: re-arm from the next sample rather
                // than propagating NaN gain forever (§7).
                self.dc = 0.0;
                self.agc.set_gain(f64::NAN);
                audio.push(0.0);
                continue;
            }
            self.dc += self.dc_alpha * (m - self.dc);
            let gain = self.agc.step(self.dc.max(1e-12), recovery);
            audio.push((m - self.dc) * gain);
        }

        DemodOutput {
            audio,
            channels: 1,
            snr: 0.0,
            freq_offset: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_carrier_and_outputs_bounded_audio() {
        let mut demod = AmDemod::new(48_000.0, 1.0, 0.1, -20.0);
        let block: Vec<Sample> = (0..4800)
            .map(|i| {
                let tone = 1.0 + 0.5 * (2.0 * std::f64::consts::PI * 400.0 * i as f64 / 48_000.0).sin();
                Sample::new(tone, 0.0)
            })
            .collect();
        let out = demod.demodulate(&block);
        assert_eq!(out.audio.len(), block.len());
        assert!(out.audio.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn nan_input_rearms_instead_of_propagating() {
        let mut demod = AmDemod::new(48_000.0, 1.0, 0.1, -20.0);
        let block = vec![Sample::new(f64::NAN, 0.0), Sample::new(1.0, 0.0)];
        let out = demod.demodulate(&block);
        assert!(out.audio[1].is_finite());
    }
}
