//! Nitrokey OATH protocol variant: prefers LIST v1 (falls back to standard
//! LIST when unsupported), touch SW 0x6982, no CALCULATE_ALL command.

use crate::constants::{INS_CALCULATE, INS_LIST, TAG_CHALLENGE, TAG_NAME};
use crate::oath::apdu::{build_apdu, encode_tlv, parse_tlv};
use crate::oath::brand::detect_capabilities;
use crate::oath::error::ApduError;
use crate::oath::model::{Brand, Capabilities};
use crate::oath::protocol::{common, CalculatedCode, CredentialEntry, OathProtocol, SelectInfo};

pub struct NitrokeyProtocol;

impl OathProtocol for NitrokeyProtocol {
    fn brand(&self) -> Brand {
        Brand::Nitrokey
    }

    fn capabilities(&self) -> Capabilities {
        detect_capabilities(Brand::Nitrokey)
    }

    fn build_calculate_command(&self, name: &str, challenge: &[u8]) -> Vec<u8> {
        let mut data = encode_tlv(TAG_NAME, name.as_bytes());
        data.extend(encode_tlv(TAG_CHALLENGE, challenge));
        build_apdu(0x00, INS_CALCULATE, 0x00, 0x01, &data, Some(0x00))
    }

    fn build_calculate_all_command(&self, _challenge: &[u8]) -> Option<Vec<u8>> {
        None
    }

    fn build_list_command(&self) -> Vec<u8> {
        build_apdu(0x00, INS_LIST, 0x00, 0x00, &[], Some(0x00))
    }

    fn parse_select_response(&self, response: &[u8]) -> Result<SelectInfo, ApduError> {
        common::parse_select(&parse_tlv(response))
    }

    fn parse_calculate_response(&self, response: &[u8]) -> Result<CalculatedCode, ApduError> {
        common::parse_calculate(&parse_tlv(response))
    }

    /// Nitrokey has no single CALCULATE_ALL command; LIST v1 fills the same
    /// role for the session layer, returning `NAME_LIST` (0x72) entries with
    /// a trailing properties byte rather than CALCULATE_ALL's `NAME`/
    /// `TRUNCATED_RESPONSE` groups.
    fn parse_calculate_all_response(&self, response: &[u8]) -> Result<Vec<CredentialEntry>, ApduError> {
        Ok(common::parse_name_list_v1(&parse_tlv(response)))
    }

    fn parse_list_response(&self, response: &[u8]) -> Result<Vec<CredentialEntry>, ApduError> {
        Ok(common::parse_name_list(&parse_tlv(response)))
    }
}
