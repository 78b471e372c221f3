// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Receiver configuration (SPEC_FULL §10.3): the startup parameters for
//! one channel, expressed so they round-trip through the same TLV codec
//! used on the wire — a config file and a command packet describe the
//! same knobs.

use crate::demod::DemodType;
use crate::status::codec;
use crate::status::table::Tag;

#[derive(Debug, Clone, PartialEq)]
pub struct ReceiverConfig {
    pub input_samprate: f64,
    pub output_samprate: f64,
    pub block_size: usize,
    pub impulse_length: usize,
    pub decimation: usize,
    pub low_edge: f32,
    pub high_edge: f32,
    pub kaiser_beta: f32,
    pub demod_type: DemodType,
    pub headroom_db: f32,
    pub agc_hangtime_secs: f32,
    pub agc_recovery_db_per_sec: f32,
    pub agc_attack_db_per_sec: f32,
    pub output_channels: u8,
    pub pll_enable: bool,
    pub pll_square: bool,
    pub fm_flat: bool,
    pub independent_sideband: bool,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        ReceiverConfig {
            input_samprate: 192_000.0,
            output_samprate: 48_000.0,
            block_size: 4096,
            impulse_length: 4097,
            decimation: 4,
            low_edge: -8_000.0,
            high_edge: 8_000.0,
            kaiser_beta: 3.0,
            demod_type: DemodType::Fm,
            headroom_db: -10.0,
            agc_hangtime_secs: 1.1,
            agc_recovery_db_per_sec: -20.0,
            agc_attack_db_per_sec: 0.0,
            output_channels: 1,
            pll_enable: false,
            pll_square: false,
            fm_flat: false,
            independent_sideband: false,
        }
    }
}

impl ReceiverConfig {
    /// Encode this configuration as the TLV field set a status emit would
    /// send for the same settings (minus the runtime-only meters).
    pub fn to_tlv(&self) -> Vec<u8> {
        let mut out = Vec::new();
        codec::encode_f64(&mut out, Tag::InputSamprate as u8, self.input_samprate);
        codec::encode_f64(&mut out, Tag::OutputSamprate as u8, self.output_samprate);
        codec::encode_u32(&mut out, Tag::FilterBlocksize as u8, self.block_size as u32);
        codec::encode_u32(&mut out, Tag::FilterFirLength as u8, self.impulse_length as u32);
        codec::encode_f32(&mut out, Tag::LowEdge as u8, self.low_edge);
        codec::encode_f32(&mut out, Tag::HighEdge as u8, self.high_edge);
        codec::encode_f32(&mut out, Tag::KaiserBeta as u8, self.kaiser_beta);
        codec::encode_byte(&mut out, Tag::DemodType as u8, demod_type_code(self.demod_type));
        codec::encode_f32(&mut out, Tag::Headroom as u8, self.headroom_db);
        codec::encode_f32(&mut out, Tag::AgcHangtime as u8, self.agc_hangtime_secs);
        codec::encode_f32(&mut out, Tag::AgcRecoveryRate as u8, self.agc_recovery_db_per_sec);
        codec::encode_f32(&mut out, Tag::AgcAttackRate as u8, self.agc_attack_db_per_sec);
        codec::encode_byte(&mut out, Tag::OutputChannels as u8, self.output_channels);
        codec::encode_bool(&mut out, Tag::PllEnable as u8, self.pll_enable);
        codec::encode_bool(&mut out, Tag::PllSquare as u8, self.pll_square);
        codec::encode_bool(&mut out, Tag::FmFlat as u8, self.fm_flat);
        codec::encode_bool(&mut out, Tag::IndependentSideband as u8, self.independent_sideband);
        codec::encode_eol(&mut out);
        out
    }

    /// Decode a previously-encoded configuration, starting from defaults
    /// for any field not present in `body`.
    pub fn from_tlv(body: &[u8]) -> crate::error::Result<Self> {
        let mut cfg = ReceiverConfig::default();
        for tlv in codec::parse_tlvs(body)? {
            let Some(tag) = Tag::from_u8(tlv.tag) else { continue };
            match tag {
                Tag::InputSamprate => cfg.input_samprate = codec::decode_f64(tlv.value),
                Tag::OutputSamprate => cfg.output_samprate = codec::decode_f64(tlv.value),
                Tag::FilterBlocksize => cfg.block_size = codec::decode_u64(tlv.value) as usize,
                Tag::FilterFirLength => cfg.impulse_length = codec::decode_u64(tlv.value) as usize,
                Tag::LowEdge => cfg.low_edge = codec::decode_f32(tlv.value),
                Tag::HighEdge => cfg.high_edge = codec::decode_f32(tlv.value),
                Tag::KaiserBeta => cfg.kaiser_beta = codec::decode_f32(tlv.value),
                Tag::DemodType => cfg.demod_type = demod_type_from_code(codec::decode_u64(tlv.value) as u8),
                Tag::Headroom => cfg.headroom_db = codec::decode_f32(tlv.value),
                Tag::AgcHangtime => cfg.agc_hangtime_secs = codec::decode_f32(tlv.value),
                Tag::AgcRecoveryRate => cfg.agc_recovery_db_per_sec = codec::decode_f32(tlv.value),
                Tag::AgcAttackRate => cfg.agc_attack_db_per_sec = codec::decode_f32(tlv.value),
                Tag::OutputChannels => cfg.output_channels = codec::decode_u64(tlv.value) as u8,
                Tag::PllEnable => cfg.pll_enable = codec::decode_u64(tlv.value) != 0,
                Tag::PllSquare => cfg.pll_square = codec::decode_u64(tlv.value) != 0,
                Tag::FmFlat => cfg.fm_flat = codec::decode_u64(tlv.value) != 0,
                Tag::IndependentSideband => cfg.independent_sideband = codec::decode_u64(tlv.value) != 0,
                _ => {}
            }
        }
        Ok(cfg)
    }
}

fn demod_type_code(t: DemodType) -> u8 {
    // Wire encoding per §6: 0 = linear, 1 = fm; AM is folded into the
    // linear code with envelope detection enabled at the demod layer.
    match t {
        DemodType::Linear | DemodType::Am => 0,
        DemodType::Fm => 1,
    }
}

fn demod_type_from_code(code: u8) -> DemodType {
    match code {
        1 => DemodType::Fm,
        _ => DemodType::Linear,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_tlv() {
        let mut cfg = ReceiverConfig::default();
        cfg.low_edge = -6_000.0;
        cfg.high_edge = 6_000.0;
        cfg.demod_type = DemodType::Fm;
        cfg.pll_enable = true;

        let encoded = cfg.to_tlv();
        let decoded = ReceiverConfig::from_tlv(&encoded).unwrap();

        assert_eq!(decoded.low_edge, cfg.low_edge);
        assert_eq!(decoded.high_edge, cfg.high_edge);
        assert_eq!(decoded.demod_type, cfg.demod_type);
        assert_eq!(decoded.pll_enable, cfg.pll_enable);
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let decoded = ReceiverConfig::from_tlv(&[codec::EOL]).unwrap();
        assert_eq!(decoded, ReceiverConfig::default());
    }
}
