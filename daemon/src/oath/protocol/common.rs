//! Parsing helpers shared by both brand implementations: the wire format is
//! identical, only which commands/status-words are used differs.

use crate::constants::{
    TAG_ALGORITHM, TAG_CHALLENGE, TAG_HOTP, TAG_NAME, TAG_NAME_LIST, TAG_PROPERTY,
    TAG_SERIAL_NUMBER, TAG_TOUCH, TAG_TRUNCATED_RESPONSE, TAG_VERSION,
};
use crate::oath::apdu::{find_tlv, format_code, parse_truncated_response, Tlv};
use crate::oath::error::ApduError;
use crate::oath::model::{FirmwareVersion, OathAlgorithm};
use crate::oath::protocol::{CalculatedCode, CredentialEntry, SelectInfo};

pub fn parse_select(tlvs: &[Tlv]) -> Result<SelectInfo, ApduError> {
    let name = find_tlv(tlvs, TAG_NAME).ok_or(ApduError::TagNotFound { tag: TAG_NAME })?;
    let firmware = find_tlv(tlvs, TAG_VERSION)
        .filter(|t| t.value.len() == 3)
        .map(|t| FirmwareVersion::new(t.value[0], t.value[1], t.value[2]))
        .unwrap_or(FirmwareVersion::UNKNOWN);
    let challenge = find_tlv(tlvs, TAG_CHALLENGE).map(|t| t.value.clone());
    let serial_from_select = find_tlv(tlvs, TAG_SERIAL_NUMBER)
        .filter(|t| t.value.len() == 4)
        .map(|t| u32::from_be_bytes([t.value[0], t.value[1], t.value[2], t.value[3]]));

    Ok(SelectInfo {
        device_id_bytes: name.value.clone(),
        requires_password: challenge.is_some(),
        challenge,
        firmware,
        serial_from_select,
    })
}

pub fn parse_calculate(tlvs: &[Tlv]) -> Result<CalculatedCode, ApduError> {
    let truncated = find_tlv(tlvs, TAG_TRUNCATED_RESPONSE)
        .or_else(|| find_tlv(tlvs, TAG_HOTP))
        .ok_or(ApduError::TagNotFound { tag: TAG_TRUNCATED_RESPONSE })?;
    let (digits, value) = parse_truncated_response(&truncated.value).ok_or(ApduError::Malformed)?;
    let code = format_code(digits, value).ok_or(ApduError::Malformed)?;
    Ok(CalculatedCode { digits, code })
}

/// Decodes the `name` TLV's one-byte algorithm/type prefix: high nibble is
/// `HOTP(0x10)`/`TOTP(0x20)`, low nibble selects the HMAC algorithm.
fn decode_name_prefix(byte: u8) -> (bool, OathAlgorithm) {
    let is_totp = (byte & 0xF0) == 0x20;
    let algorithm = OathAlgorithm::from_low_nibble(byte & 0x0F).unwrap_or(OathAlgorithm::Sha1);
    (is_totp, algorithm)
}

/// Parses a `NAME_LIST` response (standard LIST): each entry is
/// `{0x72, len, [name_type_byte, name_bytes...]}` with no touch/code
/// information.
pub fn parse_name_list(tlvs: &[Tlv]) -> Vec<CredentialEntry> {
    tlvs.iter()
        .filter(|t| t.tag == TAG_NAME_LIST)
        .filter_map(|t| {
            let (&prefix, rest) = t.value.split_first()?;
            let (is_totp, algorithm) = decode_name_prefix(prefix);
            let name = String::from_utf8_lossy(rest).to_string();
            Some(CredentialEntry { name, algorithm, is_totp, digits: 6, requires_touch: false, code: None })
        })
        .collect()
}

/// Parses a Nitrokey LIST-v1 response: each entry is still `{0x72, len,
/// algoByte, name_bytes..., propertiesByte}` (`NAME_LIST`, not `NAME`) with
/// one extra trailing byte compared to standard LIST, whose bit 0 is
/// `touchRequired`. No codes are returned; only `generateCode` produces one.
pub fn parse_name_list_v1(tlvs: &[Tlv]) -> Vec<CredentialEntry> {
    tlvs.iter()
        .filter(|t| t.tag == TAG_NAME_LIST)
        .filter_map(|t| {
            let (&prefix, rest) = t.value.split_first()?;
            let (&properties, name_bytes) = rest.split_last()?;
            let (is_totp, algorithm) = decode_name_prefix(prefix);
            let requires_touch = properties & 0x01 != 0;
            let name = String::from_utf8_lossy(name_bytes).to_string();
            Some(CredentialEntry { name, algorithm, is_totp, digits: 6, requires_touch, code: None })
        })
        .collect()
}

/// Parses a CALCULATE_ALL response: repeated `{NAME, ALGORITHM?, PROPERTY?,
/// TRUNCATED_RESPONSE | HOTP | TOUCH}` groups. NAME carries the raw,
/// unprefixed credential name — `isTotp` comes from which response tag
/// follows it (`TRUNCATED_RESPONSE`/`TOUCH` => TOTP, `HOTP` => HOTP), never
/// from a byte inside NAME itself.
pub fn parse_calculate_all_entries(buf: &[u8]) -> Vec<CredentialEntry> {
    let mut entries = Vec::new();
    let groups = crate::oath::apdu::parse_tlv(buf);
    let mut i = 0;
    while i < groups.len() {
        let Some(name_tlv) = groups.get(i).filter(|t| t.tag == TAG_NAME) else {
            i += 1;
            continue;
        };
        let name = String::from_utf8_lossy(&name_tlv.value).to_string();

        let mut is_totp = true;
        let mut algorithm = OathAlgorithm::Sha1;
        let mut digits = 6u8;
        let mut requires_touch = false;
        let mut code = None;
        let mut j = i + 1;
        while j < groups.len() && groups[j].tag != TAG_NAME {
            let entry = &groups[j];
            match entry.tag {
                TAG_ALGORITHM => {
                    if let Some(&b) = entry.value.first() {
                        algorithm = OathAlgorithm::from_low_nibble(b & 0x0F).unwrap_or(algorithm);
                    }
                }
                TAG_PROPERTY => {
                    requires_touch = entry.value.first().map(|b| b & 0x01 != 0).unwrap_or(false);
                }
                TAG_TOUCH => {
                    requires_touch = true;
                    is_totp = true;
                }
                TAG_TRUNCATED_RESPONSE => {
                    is_totp = true;
                    if let Some((d, v)) = parse_truncated_response(&entry.value) {
                        digits = d;
                        code = format_code(d, v);
                    }
                }
                TAG_HOTP => {
                    is_totp = false;
                    if let Some((d, v)) = parse_truncated_response(&entry.value) {
                        digits = d;
                        code = format_code(d, v);
                    }
                }
                _ => {}
            }
            j += 1;
        }

        entries.push(CredentialEntry { name, algorithm, is_totp, digits, requires_touch, code });
        i = j;
    }
    entries
}
