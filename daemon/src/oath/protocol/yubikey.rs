//! YubiKey OATH protocol variant: prefers CALCULATE_ALL, touch SW 0x6985.

use crate::constants::{INS_CALCULATE, INS_CALCULATE_ALL, INS_LIST, TAG_CHALLENGE, TAG_NAME};
use crate::oath::apdu::{build_apdu, encode_tlv, parse_tlv};
use crate::oath::brand::detect_capabilities;
use crate::oath::error::ApduError;
use crate::oath::model::{Brand, Capabilities};
use crate::oath::protocol::{common, CalculatedCode, CredentialEntry, OathProtocol, SelectInfo};

pub struct YubiKeyProtocol;

impl OathProtocol for YubiKeyProtocol {
    fn brand(&self) -> Brand {
        Brand::YubiKey
    }

    fn capabilities(&self) -> Capabilities {
        detect_capabilities(Brand::YubiKey)
    }

    fn build_calculate_command(&self, name: &str, challenge: &[u8]) -> Vec<u8> {
        let mut data = encode_tlv(TAG_NAME, name.as_bytes());
        data.extend(encode_tlv(TAG_CHALLENGE, challenge));
        build_apdu(0x00, INS_CALCULATE, 0x00, 0x01, &data, Some(0x00))
    }

    fn build_calculate_all_command(&self, challenge: &[u8]) -> Option<Vec<u8>> {
        let data = encode_tlv(TAG_CHALLENGE, challenge);
        Some(build_apdu(0x00, INS_CALCULATE_ALL, 0x00, 0x01, &data, Some(0x00)))
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

    fn parse_calculate_all_response(&self, response: &[u8]) -> Result<Vec<CredentialEntry>, ApduError> {
        Ok(common::parse_calculate_all_entries(response))
    }

    fn parse_list_response(&self, response: &[u8]) -> Result<Vec<CredentialEntry>, ApduError> {
        Ok(common::parse_name_list(&parse_tlv(response)))
    }
}
