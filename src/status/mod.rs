// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Status/command codec (component I, §4.I): wraps the TLV primitives in
//! `codec` and the delta table in `table` with packet framing, the
//! periodic-refresh cadence, and the command applier that routes
//! recognized tags into the tuning/filter/demod subsystems.

pub mod codec;
pub mod table;

use crate::error::{RadioError, Result};
use codec::RawTlv;
use table::{is_deferred_tuning_tag, recognize, StatusTable, Tag};

pub const DIRECTION_STATUS: u8 = 0;
pub const DIRECTION_COMMAND: u8 = 1;

/// Every tag an incoming command can set routes through this trait, kept
/// separate from the concrete `Receiver` so the applier can be unit
/// tested against a mock (§4.I "Command application").
#[cfg_attr(test, mockall::automock)]
pub trait CommandSink {
    fn apply_radio_frequency(&self, hz: f64);
    fn apply_first_lo(&self, hz: f64);
    /// Returns true if the candidate second LO was in range and applied.
    fn apply_second_lo_if_in_range(&self, hz: f64) -> bool;
    fn set_shift(&self, hz: f64);
    fn set_doppler(&self, hz: f64, rate: f64);
    fn set_calibrate(&self, cal: f64);

    fn set_passband(&self, low: f32, high: f32);
    fn set_kaiser_beta(&self, beta: f32);

    fn set_demod_type(&self, t: u8);
    fn set_independent_sideband(&self, on: bool);
    fn set_pll_enable(&self, on: bool);
    fn set_pll_square(&self, on: bool);
    fn set_fm_flat(&self, on: bool);
    fn set_envelope(&self, on: bool);

    fn set_agc_enable(&self, on: bool);
    fn set_headroom(&self, db: f32);
    fn set_agc_hangtime(&self, secs: f32);
    fn set_agc_recovery_rate(&self, db_per_sec: f32);
    fn set_agc_attack_rate(&self, db_per_sec: f32);
}

/// Decode one command packet (direction byte already stripped) and apply
/// every recognized tag to `sink`. Unknown tags are skipped; a malformed
/// length aborts parsing of the remainder (§7). The three tuning tags
/// are deferred and resolved together once the whole packet is read.
pub fn apply_command(sink: &dyn CommandSink, body: &[u8]) -> Result<()> {
    let tlvs = codec::parse_tlvs(body)?;
    let recognized = recognize(&tlvs);

    let mut explicit_rf: Option<f64> = None;
    let mut explicit_lo1: Option<f64> = None;
    let mut explicit_lo2: Option<f64> = None;

    for (tag, value) in &recognized {
        if is_deferred_tuning_tag(*tag) {
            let hz = codec::decode_f64(value);
            match tag {
                Tag::RadioFrequency => explicit_rf = Some(hz),
                Tag::FirstLoFrequency => explicit_lo1 = Some(hz),
                Tag::SecondLoFrequency => explicit_lo2 = Some(hz),
                _ => unreachable!(),
            }
            continue;
        }
        apply_tag(sink, *tag, value);
    }

    if let Some(rf) = explicit_rf {
        sink.apply_radio_frequency(rf);
    } else if let Some(lo2) = explicit_lo2 {
        if !sink.apply_second_lo_if_in_range(lo2) {
            if let Some(lo1) = explicit_lo1 {
                sink.apply_first_lo(lo1);
            }
        }
    } else if let Some(lo1) = explicit_lo1 {
        sink.apply_first_lo(lo1);
    }

    Ok(())
}

fn apply_tag(sink: &dyn CommandSink, tag: Tag, value: &[u8]) {
    match tag {
        Tag::ShiftFrequency => sink.set_shift(codec::decode_f64(value)),
        Tag::DopplerFrequency => sink.set_doppler(codec::decode_f64(value), 0.0),
        Tag::DopplerFrequencyRate => sink.set_doppler(0.0, codec::decode_f64(value)),
        Tag::Calibrate => sink.set_calibrate(codec::decode_f64(value)),
        Tag::LowEdge => sink.set_passband(codec::decode_f32(value), f32::NAN),
        Tag::HighEdge => sink.set_passband(f32::NAN, codec::decode_f32(value)),
        Tag::KaiserBeta => sink.set_kaiser_beta(codec::decode_f32(value)),
        Tag::DemodType => sink.set_demod_type(codec::decode_u64(value) as u8),
        Tag::IndependentSideband => sink.set_independent_sideband(codec::decode_u64(value) != 0),
        Tag::PllEnable => sink.set_pll_enable(codec::decode_u64(value) != 0),
        Tag::PllSquare => sink.set_pll_square(codec::decode_u64(value) != 0),
        Tag::FmFlat => sink.set_fm_flat(codec::decode_u64(value) != 0),
        Tag::Envelope => sink.set_envelope(codec::decode_u64(value) != 0),
        Tag::AgcEnable => sink.set_agc_enable(codec::decode_u64(value) != 0),
        Tag::Headroom => sink.set_headroom(codec::decode_f32(value)),
        Tag::AgcHangtime => sink.set_agc_hangtime(codec::decode_f32(value)),
        Tag::AgcRecoveryRate => sink.set_agc_recovery_rate(codec::decode_f32(value)),
        Tag::AgcAttackRate => sink.set_agc_attack_rate(codec::decode_f32(value)),
        _ => { /* read-only / status-only tag on the command path */ }
    }
}

pub fn decode_packet(packet: &[u8]) -> Result<(u8, Vec<RawTlv<'_>>)> {
    if packet.is_empty() {
        return Err(RadioError::protocol("empty status/command packet"));
    }
    let direction = packet[0];
    let tlvs = codec::parse_tlvs(&packet[1..])?;
    Ok((direction, tlvs))
}

/// Builds outgoing status packets at the §4.I cadence: a full (`force`)
/// refresh every 10th emit, or immediately after a command is applied.
pub struct StatusEmitter {
    table: StatusTable,
    emit_count: u32,
    force_next: bool,
}

impl Default for StatusEmitter {
    fn default() -> Self {
        StatusEmitter {
            table: StatusTable::new(),
            emit_count: 0,
            force_next: false,
        }
    }
}

impl StatusEmitter {
    pub fn new() -> Self {
        StatusEmitter::default()
    }

    /// A command arrived: the next emit is unconditionally forced.
    pub fn note_command_applied(&mut self) {
        self.force_next = true;
    }

    /// Build one status packet from this emit's `fields`
    /// (tag, full TLV bytes including the tag/len prefix).
    pub fn emit(&mut self, fields: &[(u8, Vec<u8>)]) -> Vec<u8> {
        self.emit_count = self.emit_count.wrapping_add(1);
        let force = self.force_next || self.emit_count % 10 == 0;
        self.force_next = false;

        let mut out = Vec::with_capacity(1 + fields.iter().map(|(_, v)| v.len()).sum::<usize>() + 1);
        out.push(DIRECTION_STATUS);
        out.extend(self.table.compact(fields, force));
        out
    }
}

/// Front-end tags (`ad_level`, `lna_gain`, `mixer_gain`, `if_gain`,
/// `dc_i_offset`, `dc_q_offset`, `iq_imbalance`, `iq_phase`,
/// `direct_conversion`, `gain`) describe hardware this core doesn't own
/// (§1 Non-goals). It still needs to merge them into its own periodic
/// status snapshot, so they're stored opaquely here and forwarded
/// unchanged — no core logic reads or derives anything from them.
#[derive(Debug, Clone, Default)]
pub struct FrontEndReport {
    fields: Vec<(u8, Vec<u8>)>,
}

const FRONT_END_TAGS: [Tag; 10] = [
    Tag::AdLevel,
    Tag::LnaGain,
    Tag::MixerGain,
    Tag::IfGain,
    Tag::DcIOffset,
    Tag::DcQOffset,
    Tag::IqImbalance,
    Tag::IqPhase,
    Tag::DirectConversion,
    Tag::Gain,
];

impl FrontEndReport {
    pub fn new() -> Self {
        FrontEndReport::default()
    }

    /// Record whichever front-end tags are present in an externally
    /// supplied TLV blob, replacing any previously stored value for the
    /// same tag.
    pub fn ingest(&mut self, body: &[u8]) -> Result<()> {
        for tlv in codec::parse_tlvs(body)? {
            if !FRONT_END_TAGS.contains(&match Tag::from_u8(tlv.tag) {
                Some(t) => t,
                None => continue,
            }) {
                continue;
            }
            let mut encoded = Vec::with_capacity(2 + tlv.value.len());
            encoded.push(tlv.tag);
            encoded.push(tlv.value.len() as u8);
            encoded.extend_from_slice(tlv.value);
            self.fields.retain(|(t, _)| *t != tlv.tag);
            self.fields.push((tlv.tag, encoded));
        }
        Ok(())
    }

    /// The last-known front-end fields, ready to append to an outgoing
    /// status emit's field list.
    pub fn fields(&self) -> &[(u8, Vec<u8>)] {
        &self.fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(tag: Tag, value: f64) -> (u8, Vec<u8>) {
        let mut bytes = Vec::new();
        codec::encode_f64(&mut bytes, tag as u8, value);
        (tag as u8, bytes)
    }

    #[test]
    fn explicit_rf_wins_over_both_los() {
        let mut sink = MockCommandSink::new();
        sink.expect_apply_radio_frequency().times(1).return_const(());
        sink.expect_apply_first_lo().times(0);
        sink.expect_apply_second_lo_if_in_range().times(0);

        let mut body = Vec::new();
        codec::encode_f64(&mut body, Tag::RadioFrequency as u8, 146_520_000.0);
        codec::encode_f64(&mut body, Tag::FirstLoFrequency as u8, 144_000_000.0);
        codec::encode_f64(&mut body, Tag::SecondLoFrequency as u8, 2_520_000.0);
        codec::encode_eol(&mut body);

        apply_command(&sink, &body).unwrap();
    }

    #[test]
    fn lo2_wins_over_lo1_when_in_range() {
        let mut sink = MockCommandSink::new();
        sink.expect_apply_second_lo_if_in_range().times(1).return_const(true);
        sink.expect_apply_first_lo().times(0);

        let mut body = Vec::new();
        codec::encode_f64(&mut body, Tag::FirstLoFrequency as u8, 144_000_000.0);
        codec::encode_f64(&mut body, Tag::SecondLoFrequency as u8, 2_520_000.0);
        codec::encode_eol(&mut body);

        apply_command(&sink, &body).unwrap();
    }

    #[test]
    fn falls_back_to_lo1_when_lo2_out_of_range() {
        let mut sink = MockCommandSink::new();
        sink.expect_apply_second_lo_if_in_range().times(1).return_const(false);
        sink.expect_apply_first_lo().times(1).return_const(());

        let mut body = Vec::new();
        codec::encode_f64(&mut body, Tag::FirstLoFrequency as u8, 144_000_000.0);
        codec::encode_f64(&mut body, Tag::SecondLoFrequency as u8, 2_520_000.0);
        codec::encode_eol(&mut body);

        apply_command(&sink, &body).unwrap();
    }

    #[test]
    fn unknown_tag_is_skipped() {
        let sink = MockCommandSink::new();
        let body = vec![250u8, 2, 0xaa, 0xbb, codec::EOL];
        apply_command(&sink, &body).unwrap();
    }

    #[test]
    fn every_tenth_emit_is_forced() {
        let mut emitter = StatusEmitter::new();
        let fields = vec![field(Tag::Gain, 1.0)];
        let first = emitter.emit(&fields);
        assert!(first.len() > 2);
        for _ in 0..8 {
            emitter.emit(&fields);
        }
        let tenth = emitter.emit(&fields);
        assert!(tenth.len() > 2, "10th emit must be forced");
    }

    #[test]
    fn front_end_report_stores_known_tags_and_ignores_others() {
        let mut report = FrontEndReport::new();
        let mut body = Vec::new();
        codec::encode_f32(&mut body, Tag::LnaGain as u8, 12.5);
        codec::encode_f32(&mut body, Tag::RadioFrequency as u8, 146_000_000.0); // not a front-end tag
        codec::encode_eol(&mut body);

        report.ingest(&body).unwrap();

        assert_eq!(report.fields().len(), 1);
        assert_eq!(report.fields()[0].0, Tag::LnaGain as u8);
    }

    #[test]
    fn front_end_report_replaces_stale_value() {
        let mut report = FrontEndReport::new();
        let mut first = Vec::new();
        codec::encode_f32(&mut first, Tag::Gain as u8, 10.0);
        codec::encode_eol(&mut first);
        report.ingest(&first).unwrap();

        let mut second = Vec::new();
        codec::encode_f32(&mut second, Tag::Gain as u8, 20.0);
        codec::encode_eol(&mut second);
        report.ingest(&second).unwrap();

        assert_eq!(report.fields().len(), 1);
        assert_eq!(codec::decode_f32(&report.fields()[0].1[2..]), 20.0);
    }

    #[test]
    fn command_applied_forces_next_emit() {
        let mut emitter = StatusEmitter::new();
        let fields = vec![field(Tag::Gain, 1.0)];
        emitter.emit(&fields);
        let elided = emitter.emit(&fields);
        assert_eq!(elided, vec![DIRECTION_STATUS, codec::EOL]);

        emitter.note_command_applied();
        let forced = emitter.emit(&fields);
        assert!(forced.len() > 2);
    }
}
