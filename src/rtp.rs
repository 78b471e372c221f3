// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! RTP framing (component J, §4.J): 12-byte header encode/decode and
//! per-SSRC sequence/timestamp/drop/dupe tracking. Ported from
//! `multicast.c`'s `ntoh_rtp`/`hton_rtp`/`rtp_process`.

use crate::error::{RadioError, Result};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

pub const RTP_VERSION: u8 = 2;
pub const HEADER_LEN: usize = 12;

pub const PT_IQ16: u8 = 97;
pub const PT_IQ8: u8 = 98;
pub const PT_IQ12: u8 = 99;
pub const PT_PCM_STEREO: u8 = 10;
pub const PT_PCM_MONO: u8 = 11;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpHeader {
    pub padding: bool,
    pub extension: bool,
    pub marker: bool,
    pub payload_type: u8,
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
}

impl RtpHeader {
    pub fn new(payload_type: u8, sequence: u16, timestamp: u32, ssrc: u32) -> Self {
        RtpHeader {
            padding: false,
            extension: false,
            marker: false,
            payload_type,
            sequence,
            timestamp,
            ssrc,
        }
    }

    /// Decode the fixed 12-byte header from `buf`. CSRC entries and a
    /// trailing extension block (if present) are skipped; `buf` must
    /// include them so the returned payload offset is correct.
    pub fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        if buf.len() < HEADER_LEN {
            return Err(RadioError::protocol("RTP header truncated"));
        }
        let mut cur = Cursor::new(buf);
        let w = cur.read_u32::<BigEndian>().map_err(RadioError::Io)?;
        let version = (w >> 30) as u8 & 0x3;
        if version != RTP_VERSION {
            return Err(RadioError::protocol(format!("unsupported RTP version {version}")));
        }
        let padding = (w >> 29) & 1 != 0;
        let extension = (w >> 28) & 1 != 0;
        let cc = ((w >> 24) & 0xf) as usize;
        let marker = (w >> 23) & 1 != 0;
        let payload_type = ((w >> 16) & 0x7f) as u8;
        let sequence = (w & 0xffff) as u16;

        let timestamp = cur.read_u32::<BigEndian>().map_err(RadioError::Io)?;
        let ssrc = cur.read_u32::<BigEndian>().map_err(RadioError::Io)?;

        let mut offset = HEADER_LEN + 4 * cc;
        if offset > buf.len() {
            return Err(RadioError::protocol("RTP header truncated (CSRC overrun)"));
        }
        if extension {
            if offset + 4 > buf.len() {
                return Err(RadioError::protocol("RTP header truncated (extension length)"));
            }
            let ext_words = u16::from_be_bytes([buf[offset + 2], buf[offset + 3]]) as usize;
            offset += 4 + 4 * ext_words;
            if offset > buf.len() {
                return Err(RadioError::protocol("RTP header truncated (extension overrun)"));
            }
        }

        Ok((
            RtpHeader {
                padding,
                extension,
                marker,
                payload_type,
                sequence,
                timestamp,
                ssrc,
            },
            offset,
        ))
    }

    /// Encode the fixed 12-byte header. CSRC and extension blocks are
    /// never emitted (§4.J).
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN);
        let w = ((RTP_VERSION as u32) << 30)
            | ((self.padding as u32) << 29)
            | ((self.extension as u32) << 28)
            | (0u32 << 24) // cc
            | ((self.marker as u32) << 23)
            | ((self.payload_type as u32 & 0x7f) << 16)
            | self.sequence as u32;
        out.write_u32::<BigEndian>(w).unwrap();
        out.write_u32::<BigEndian>(self.timestamp).unwrap();
        out.write_u32::<BigEndian>(self.ssrc).unwrap();
        out
    }
}

/// Outcome of processing one packet against the stream's running state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceOutcome {
    /// Caller must drop the packet (duplicate or stale).
    Drop,
    /// In sequence, no gap.
    InSequence,
    /// A gap of `samples` was found; that many samples' worth of
    /// timestamp advanced without being received.
    Gap { samples: u32 },
}

/// Per-SSRC state: expected_seq, expected_timestamp, packets, drops,
/// dupes, and the init flag that lets a mid-stream SSRC change silently
/// reinitialize rather than being treated as an error (§3 "RTP stream
/// state", §7 "SSRC change").
#[derive(Debug, Clone, Default)]
pub struct RtpState {
    ssrc: u32,
    initialized: bool,
    expected_seq: u16,
    expected_timestamp: u32,
    pub packets: u64,
    pub drops: u64,
    pub dupes: u64,
}

impl RtpState {
    pub fn new() -> Self {
        RtpState::default()
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    /// Process one received header carrying `sample_count` samples of
    /// payload, updating counters and returning how the caller should
    /// treat the packet.
    pub fn process(&mut self, header: &RtpHeader, sample_count: u32) -> SequenceOutcome {
        if !self.initialized || header.ssrc != self.ssrc {
            self.ssrc = header.ssrc;
            self.expected_seq = header.sequence;
            self.expected_timestamp = header.timestamp;
            self.packets = 0;
            self.drops = 0;
            self.dupes = 0;
            self.initialized = true;
        }

        self.packets += 1;

        let seq_step = header.sequence.wrapping_sub(self.expected_seq) as i16;
        if seq_step != 0 {
            if seq_step < 0 {
                self.dupes += 1;
                return SequenceOutcome::Drop;
            }
            self.drops += seq_step as u64;
        }
        self.expected_seq = header.sequence.wrapping_add(1);

        let time_step = header.timestamp.wrapping_sub(self.expected_timestamp) as i32;
        if time_step < 0 {
            return SequenceOutcome::Drop;
        }

        self.expected_timestamp = header.timestamp.wrapping_add(sample_count);

        if time_step == 0 {
            SequenceOutcome::InSequence
        } else {
            SequenceOutcome::Gap { samples: time_step as u32 }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_header_fields() {
        let h = RtpHeader::new(PT_PCM_MONO, 1234, 5_000_000, 0xdeadbeef);
        let wire = h.encode();
        assert_eq!(wire.len(), HEADER_LEN);
        let (decoded, offset) = RtpHeader::decode(&wire).unwrap();
        assert_eq!(offset, HEADER_LEN);
        assert_eq!(decoded.sequence, 1234);
        assert_eq!(decoded.timestamp, 5_000_000);
        assert_eq!(decoded.ssrc, 0xdeadbeef);
        assert_eq!(decoded.payload_type, PT_PCM_MONO);
    }

    #[test]
    fn in_sequence_packets_report_no_gap() {
        let mut state = RtpState::new();
        let h0 = RtpHeader::new(PT_IQ16, 0, 0, 1);
        assert_eq!(state.process(&h0, 480), SequenceOutcome::InSequence);
        let h1 = RtpHeader::new(PT_IQ16, 1, 480, 1);
        assert_eq!(state.process(&h1, 480), SequenceOutcome::InSequence);
        assert_eq!(state.drops, 0);
    }

    #[test]
    fn forward_gap_is_reported_and_counted() {
        let mut state = RtpState::new();
        let h0 = RtpHeader::new(PT_IQ16, 0, 0, 1);
        state.process(&h0, 480);
        let h2 = RtpHeader::new(PT_IQ16, 2, 960, 1);
        let outcome = state.process(&h2, 480);
        assert_eq!(outcome, SequenceOutcome::Gap { samples: 480 });
        assert_eq!(state.drops, 1);
    }

    #[test]
    fn duplicate_packet_is_dropped_and_counted() {
        let mut state = RtpState::new();
        let h0 = RtpHeader::new(PT_IQ16, 5, 0, 1);
        state.process(&h0, 480);
        let h1 = RtpHeader::new(PT_IQ16, 6, 480, 1);
        state.process(&h1, 480);
        let dup = RtpHeader::new(PT_IQ16, 5, 0, 1);
        assert_eq!(state.process(&dup, 480), SequenceOutcome::Drop);
        assert_eq!(state.dupes, 1);
    }

    #[test]
    fn ssrc_change_reinitializes_state_silently() {
        let mut state = RtpState::new();
        let h0 = RtpHeader::new(PT_IQ16, 100, 0, 1);
        state.process(&h0, 480);
        let h1 = RtpHeader::new(PT_IQ16, 0, 0, 2);
        let outcome = state.process(&h1, 480);
        assert_eq!(outcome, SequenceOutcome::InSequence);
        assert_eq!(state.ssrc(), 2);
    }
}
