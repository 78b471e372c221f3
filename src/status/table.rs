// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The tag registry (§6) and the 256-entry delta-compaction table
//! (§4.I), ported from `status.h`'s `status_type` enum and `status.c`'s
//! `compact_packet`.

use super::codec::RawTlv;

macro_rules! define_tags {
    ($( $name:ident = $val:expr ),+ $(,)?) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum Tag {
            $( $name = $val, )+
        }

        impl Tag {
            pub fn from_u8(v: u8) -> Option<Tag> {
                match v {
                    $( $val => Some(Tag::$name), )+
                    _ => None,
                }
            }
        }
    };
}

define_tags![
    // identity/time
    Description = 1,
    GpsTime = 2,
    CommandTag = 3,
    Commands = 4,

    // transport: input
    InputDataSourceSocket = 5,
    InputDataDestSocket = 6,
    InputMetadataSourceSocket = 7,
    InputMetadataDestSocket = 8,
    InputSsrc = 9,
    InputTtl = 10,
    InputSamprate = 11,
    InputPackets = 12,
    InputSamples = 13,
    InputDrops = 14,
    InputDupes = 15,

    // transport: output
    OutputDataSourceSocket = 16,
    OutputDataDestSocket = 17,
    OutputMetadataSourceSocket = 18,
    OutputMetadataDestSocket = 19,
    OutputSsrc = 20,
    OutputTtl = 21,
    OutputSamprate = 22,
    OutputPackets = 23,
    OutputSamples = 24,
    OutputDrops = 25,
    OutputDupes = 26,

    // tuning
    RadioFrequency = 27,
    FirstLoFrequency = 28,
    SecondLoFrequency = 29,
    ShiftFrequency = 30,
    DopplerFrequency = 31,
    DopplerFrequencyRate = 32,
    Calibrate = 33,

    // front end
    AdLevel = 34,
    LnaGain = 35,
    MixerGain = 36,
    IfGain = 37,
    DcIOffset = 38,
    DcQOffset = 39,
    IqImbalance = 40,
    IqPhase = 41,
    DirectConversion = 42,
    Gain = 43,

    // filtering
    LowEdge = 44,
    HighEdge = 45,
    KaiserBeta = 46,
    FilterBlocksize = 47,
    FilterFirLength = 48,
    NoiseBandwidth = 49,

    // signals
    IfPower = 50,
    BasebandPower = 51,
    NoiseDensity = 52,

    // demod
    DemodType = 53,
    IndependentSideband = 54,
    DemodSnr = 55,
    FreqOffset = 56,
    PeakDeviation = 57,
    PlTone = 58,
    PllLock = 59,
    PllEnable = 60,
    PllSquare = 61,
    PllPhase = 62,
    FmFlat = 63,
    Envelope = 64,

    // output
    OutputChannels = 65,
    OutputLevel = 66,
    Headroom = 67,
    AgcEnable = 68,
    AgcHangtime = 69,
    AgcRecoveryRate = 70,
    AgcAttackRate = 71,
];

/// Three tuning tags whose application must be deferred and resolved
/// together at end-of-packet (§4.I): an explicit RF target wins over an
/// explicit LO, and among the LOs, LO2 wins when it is in range.
pub fn is_deferred_tuning_tag(tag: Tag) -> bool {
    matches!(tag, Tag::RadioFrequency | Tag::FirstLoFrequency | Tag::SecondLoFrequency)
}

#[derive(Debug, Clone, Default)]
struct Entry {
    value: Vec<u8>,
    present: bool,
}

/// Holds the last-transmitted length/bytes for every tag (0..255), used
/// to elide unchanged fields on non-forced emits. Single-writer (the
/// status-out thread), so no internal lock (§5 "Shared resources").
pub struct StatusTable {
    entries: Vec<Entry>,
}

impl Default for StatusTable {
    fn default() -> Self {
        StatusTable {
            entries: vec![Entry::default(); 256],
        }
    }
}

impl StatusTable {
    pub fn new() -> Self {
        StatusTable::default()
    }

    /// Filter `fields` (tag, payload-bytes-including-tag-and-len) down to
    /// those that changed since the last emit (or all of them, if
    /// `force`), updating the table as it goes, then append the EOL byte.
    pub fn compact(&mut self, fields: &[(u8, Vec<u8>)], force: bool) -> Vec<u8> {
        let mut out = Vec::new();
        for (tag, bytes) in fields {
            let entry = &mut self.entries[*tag as usize];
            let changed = force || !entry.present || entry.value != *bytes;
            if changed {
                entry.value = bytes.clone();
                entry.present = true;
                out.extend_from_slice(bytes);
            }
        }
        out.push(super::codec::EOL);
        out
    }

    pub fn reset(&mut self) {
        for e in self.entries.iter_mut() {
            e.present = false;
            e.value.clear();
        }
    }
}

/// Group a raw decoded TLV list by whether it was recognized, returning
/// `(tag, value)` pairs for the recognized ones. Unrecognized tags are
/// silently dropped (their length field already let `parse_tlvs` skip
/// them correctly).
pub fn recognize<'a>(tlvs: &'a [RawTlv<'a>]) -> Vec<(Tag, &'a [u8])> {
    tlvs.iter().filter_map(|t| Tag::from_u8(t.tag).map(|tag| (tag, t.value))).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unchanged_field_is_elided_on_non_forced_emit() {
        let mut table = StatusTable::new();
        let fields = vec![(Tag::RadioFrequency as u8, vec![27, 2, 0x12, 0x34])];
        let first = table.compact(&fields, false);
        assert!(first.len() > 1); // first emit always includes it

        let second = table.compact(&fields, false);
        assert_eq!(second, vec![super::super::codec::EOL]);
    }

    #[test]
    fn forced_emit_always_includes_every_field() {
        let mut table = StatusTable::new();
        let fields = vec![(Tag::RadioFrequency as u8, vec![27, 2, 0x12, 0x34])];
        table.compact(&fields, false);
        let forced = table.compact(&fields, true);
        assert!(forced.len() > 1);
    }

    #[test]
    fn changed_value_is_retransmitted() {
        let mut table = StatusTable::new();
        table.compact(&[(Tag::Gain as u8, vec![43, 1, 1])], false);
        let changed = table.compact(&[(Tag::Gain as u8, vec![43, 1, 2])], false);
        assert!(changed.len() > 1);
    }
}
