//! APDU construction and BER-TLV parsing primitives (component B, §4.1).

use crate::constants::{SW_MORE_DATA_MASK, SW_SUCCESS, VALID_DIGIT_LENGTHS};
use crate::oath::error::ApduError;

/// Builds a short-form command APDU: `CLA INS P1 P2 [Lc data] [Le]`.
pub fn build_apdu(cla: u8, ins: u8, p1: u8, p2: u8, data: &[u8], le: Option<u8>) -> Vec<u8> {
    let mut apdu = Vec::with_capacity(5 + data.len());
    apdu.push(cla);
    apdu.push(ins);
    apdu.push(p1);
    apdu.push(p2);
    if !data.is_empty() {
        apdu.push(data.len() as u8);
        apdu.extend_from_slice(data);
    }
    if let Some(le) = le {
        apdu.push(le);
    }
    apdu
}

/// Encodes one TLV: `tag len value`. Callers are responsible for keeping
/// `value.len() <= 255` (true for every field this applet exchanges).
pub fn encode_tlv(tag: u8, value: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(2 + value.len());
    out.push(tag);
    out.push(value.len() as u8);
    out.extend_from_slice(value);
    out
}

/// One parsed TLV entry: tag plus its value bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tlv {
    pub tag: u8,
    pub value: Vec<u8>,
}

/// Parses a BER-TLV sequence. Never panics: if a declared length would
/// overrun the buffer, parsing stops and the entries accumulated so far are
/// returned. Scanning also stops on encountering the two bytes `0x90 0x00`
/// (the success status word) in tag/length position, since everything after
/// it is the status word, not a TLV.
pub fn parse_tlv(buf: &[u8]) -> Vec<Tlv> {
    let mut out = Vec::new();
    let mut i = 0usize;
    while i + 1 < buf.len() {
        if buf[i] == 0x90 && buf[i + 1] == 0x00 {
            break;
        }
        let tag = buf[i];
        let len = buf[i + 1] as usize;
        let start = i + 2;
        let end = start + len;
        if end > buf.len() {
            break;
        }
        out.push(Tlv { tag, value: buf[start..end].to_vec() });
        i = end;
    }
    out
}

pub fn find_tlv(tlvs: &[Tlv], tag: u8) -> Option<&Tlv> {
    tlvs.iter().find(|t| t.tag == tag)
}

pub fn require_tlv(tlvs: &[Tlv], tag: u8) -> Result<&Tlv, ApduError> {
    find_tlv(tlvs, tag).ok_or(ApduError::TagNotFound { tag })
}

/// The final two bytes of any response; `0` if the response is too short.
pub fn get_status_word(response: &[u8]) -> u16 {
    if response.len() < 2 {
        return 0;
    }
    let n = response.len();
    u16::from_be_bytes([response[n - 2], response[n - 1]])
}

pub fn is_success(sw: u16) -> bool {
    sw == SW_SUCCESS
}

/// `MORE_DATA` is `0x61xx`; the low byte is the remaining-bytes count (`0`
/// means "256 or more").
pub fn has_more_data(sw: u16) -> bool {
    (sw & 0xFF00) == SW_MORE_DATA_MASK
}

/// Strips the trailing status word, returning the data bytes that precede it.
pub fn strip_status_word(response: &[u8]) -> &[u8] {
    if response.len() < 2 {
        response
    } else {
        &response[..response.len() - 2]
    }
}

/// Formats a CALCULATE truncated-response body `{digits, value}` into the
/// displayed code. `digits` must be 6, 7, or 8; anything else is a parse
/// failure rendered as `None` rather than panicking or guessing a width.
pub fn format_code(digits: u8, value: u32) -> Option<String> {
    if !VALID_DIGIT_LENGTHS.contains(&digits) {
        return None;
    }
    let modulus = 10u32.pow(digits as u32);
    let code = value % modulus;
    Some(format!("{code:0width$}", width = digits as usize))
}

/// Parses a CALCULATE/CALCULATE_ALL truncated-response TLV value
/// `{digits: u8, truncated_value: u32 big-endian}`.
pub fn parse_truncated_response(value: &[u8]) -> Option<(u8, u32)> {
    if value.len() != 5 {
        return None;
    }
    let digits = value[0];
    let v = u32::from_be_bytes([value[1], value[2], value[3], value[4]]);
    Some((digits, v))
}

/// TOTP counter for a given unix timestamp and period, serialized as an
/// 8-byte big-endian unsigned integer per RFC 6238.
pub fn totp_counter_bytes(unix_time_seconds: u64, period_seconds: u16) -> [u8; 8] {
    let counter = unix_time_seconds / period_seconds.max(1) as u64;
    counter.to_be_bytes()
}

/// Decodes RFC 4648 Base32 (`A-Z2-7`, case-insensitive, optional `=`
/// padding). Any other character fails the decode; used only when adding a
/// credential.
pub fn base32_decode(input: &str) -> Option<Vec<u8>> {
    let normalized = input.trim_end_matches('=').to_ascii_uppercase();
    if normalized.is_empty() {
        return Some(Vec::new());
    }
    base32::decode(base32::Alphabet::Rfc4648 { padding: false }, &normalized)
}

/// Parsed fields of an on-card credential name: `[period "/"] [issuer ":"]
/// account` for TOTP, `[issuer ":"] account` for HOTP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCredentialId {
    pub period: u16,
    pub issuer: Option<String>,
    pub account: String,
}

pub fn parse_credential_id(raw: &str, is_totp: bool) -> ParsedCredentialId {
    use crate::constants::DEFAULT_TOTP_PERIOD_SECONDS;

    let mut rest = raw;
    let mut period = DEFAULT_TOTP_PERIOD_SECONDS;

    if is_totp {
        if let Some(slash) = rest.find('/') {
            if let Ok(p) = rest[..slash].parse::<u16>() {
                period = p;
                rest = &rest[slash + 1..];
            }
        }
    }

    match rest.split_once(':') {
        Some((issuer, account)) => ParsedCredentialId {
            period,
            issuer: Some(issuer.to_string()),
            account: account.to_string(),
        },
        None => ParsedCredentialId { period, issuer: None, account: rest.to_string() },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tlv_parse_terminates_on_truncated_buffer() {
        let buf = [0x71, 0x05, 0x01, 0x02];
        let tlvs = parse_tlv(&buf);
        assert!(tlvs.is_empty());
    }

    #[test]
    fn tlv_parse_stops_at_success_status_word() {
        let buf = [0x71, 0x02, 0xAA, 0xBB, 0x90, 0x00, 0x71, 0x01, 0xFF];
        let tlvs = parse_tlv(&buf);
        assert_eq!(tlvs.len(), 1);
        assert_eq!(tlvs[0].value, vec![0xAA, 0xBB]);
    }

    #[test]
    fn status_word_helpers() {
        assert_eq!(get_status_word(&[0x01]), 0);
        assert_eq!(get_status_word(&[0x90, 0x00]), 0x9000);
        assert!(is_success(0x9000));
        assert!(has_more_data(0x6110));
        assert!(!has_more_data(0x6985));
    }

    #[test]
    fn format_code_rejects_invalid_digit_counts() {
        assert_eq!(format_code(6, 0x00000F42), Some("003906".to_string()));
        assert_eq!(format_code(5, 123), None);
    }

    #[test]
    fn base32_decode_rejects_bad_alphabet() {
        assert!(base32_decode("invalid!").is_none());
        assert_eq!(base32_decode("").unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn credential_id_parses_period_and_issuer() {
        let parsed = parse_credential_id("60/Google:alice", true);
        assert_eq!(parsed.period, 60);
        assert_eq!(parsed.issuer.as_deref(), Some("Google"));
        assert_eq!(parsed.account, "alice");

        let parsed = parse_credential_id("alice", true);
        assert_eq!(parsed.period, 30);
        assert_eq!(parsed.issuer, None);
        assert_eq!(parsed.account, "alice");

        let parsed = parse_credential_id("Steam:bob", false);
        assert_eq!(parsed.issuer.as_deref(), Some("Steam"));
    }
}
