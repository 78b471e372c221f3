// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! TLV primitive encoders/decoders (§4.I), ported from `status.c`'s
//! `encode_int64`/`decode_int`/family. Integers are big-endian and
//! leading-zero-suppressed; floats/doubles are the IEEE-754 bit pattern
//! of the value, suppressed the same way a zero-valued integer would be.

use crate::error::{RadioError, Result};

pub const EOL: u8 = 0;

/// Append one TLV triple for an already byte-swapped, leading-zero
/// suppressed big-endian integer.
pub fn encode_u64(out: &mut Vec<u8>, tag: u8, value: u64) {
    let bytes = value.to_be_bytes();
    let mut start = 0;
    while start < 7 && bytes[start] == 0 {
        start += 1;
    }
    let payload = &bytes[start..];
    out.push(tag);
    out.push(payload.len() as u8);
    out.extend_from_slice(payload);
}

pub fn encode_u32(out: &mut Vec<u8>, tag: u8, value: u32) {
    encode_u64(out, tag, value as u64);
}

pub fn encode_u16(out: &mut Vec<u8>, tag: u8, value: u16) {
    encode_u64(out, tag, value as u64);
}

pub fn encode_byte(out: &mut Vec<u8>, tag: u8, value: u8) {
    out.push(tag);
    out.push(1);
    out.push(value);
}

pub fn encode_bool(out: &mut Vec<u8>, tag: u8, value: bool) {
    encode_byte(out, tag, value as u8);
}

pub fn encode_f32(out: &mut Vec<u8>, tag: u8, value: f32) {
    encode_u32(out, tag, value.to_bits());
}

pub fn encode_f64(out: &mut Vec<u8>, tag: u8, value: f64) {
    encode_u64(out, tag, value.to_bits());
}

/// Length-prefixed byte string, truncated to 255 bytes, not byte-swapped.
pub fn encode_string(out: &mut Vec<u8>, tag: u8, value: &str) {
    let bytes = &value.as_bytes()[..value.len().min(255)];
    out.push(tag);
    out.push(bytes.len() as u8);
    out.extend_from_slice(bytes);
}

/// A socket address: 6 bytes (IPv4 addr+port) or 10 bytes (IPv6 addr+port).
pub fn encode_socket_v4(out: &mut Vec<u8>, tag: u8, addr: [u8; 4], port: u16) {
    out.push(tag);
    out.push(6);
    out.extend_from_slice(&addr);
    out.extend_from_slice(&port.to_be_bytes());
}

pub fn encode_socket_v6(out: &mut Vec<u8>, tag: u8, addr: [u8; 16], port: u16) {
    out.push(tag);
    out.push(10);
    out.extend_from_slice(&addr[..8]);
    out.extend_from_slice(&port.to_be_bytes());
}

pub fn encode_eol(out: &mut Vec<u8>) {
    out.push(EOL);
}

pub fn decode_u64(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64)
}

pub fn decode_f32(bytes: &[u8]) -> f32 {
    if bytes.len() == 8 {
        return decode_f64(bytes) as f32;
    }
    f32::from_bits(decode_u64(bytes) as u32)
}

pub fn decode_f64(bytes: &[u8]) -> f64 {
    if bytes.len() == 4 {
        return decode_f32(bytes) as f64;
    }
    f64::from_bits(decode_u64(bytes))
}

/// One decoded TLV element: the raw tag byte and a slice of its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawTlv<'a> {
    pub tag: u8,
    pub value: &'a [u8],
}

/// Parse a TLV list up to (but not including) the EOL byte. A length
/// field that would overrun the buffer aborts parsing of the remainder
/// rather than panicking (§7 "Unknown TLV tag").
pub fn parse_tlvs(buf: &[u8]) -> Result<Vec<RawTlv<'_>>> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < buf.len() {
        let tag = buf[i];
        i += 1;
        if tag == EOL {
            return Ok(out);
        }
        if i >= buf.len() {
            return Err(RadioError::protocol("TLV truncated before length byte"));
        }
        let len = buf[i] as usize;
        i += 1;
        if i + len > buf.len() {
            return Err(RadioError::protocol("TLV length overruns packet"));
        }
        out.push(RawTlv { tag, value: &buf[i..i + len] });
        i += len;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_integer_suppresses_to_empty_payload() {
        let mut buf = Vec::new();
        encode_u64(&mut buf, 5, 0);
        assert_eq!(buf, vec![5, 0]);
    }

    #[test]
    fn small_integer_is_one_byte() {
        let mut buf = Vec::new();
        encode_u64(&mut buf, 5, 1);
        assert_eq!(buf, vec![5, 1, 0x01]);
    }

    #[test]
    fn zero_float_suppresses_like_zero_integer() {
        let mut buf = Vec::new();
        encode_f32(&mut buf, 9, 0.0);
        assert_eq!(buf, vec![9, 0]);
    }

    #[test]
    fn float_round_trips_through_bits() {
        let mut buf = Vec::new();
        encode_f64(&mut buf, 2, 146_520_000.5);
        let tlvs = parse_tlvs(&buf).unwrap();
        assert_eq!(tlvs.len(), 1);
        assert_eq!(decode_f64(tlvs[0].value), 146_520_000.5);
    }

    #[test]
    fn truncated_length_aborts_remainder_without_panicking() {
        let buf = vec![7u8, 5, 1, 2]; // claims 5 bytes, only 2 present
        let err = parse_tlvs(&buf);
        assert!(err.is_err());
    }

    #[test]
    fn eol_terminates_parse_early() {
        let buf = vec![3u8, 1, 0x7f, EOL, 9, 9, 9, 9];
        let tlvs = parse_tlvs(&buf).unwrap();
        assert_eq!(tlvs.len(), 1);
    }
}
