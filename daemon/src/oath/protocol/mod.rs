//! Brand-polymorphic OATH protocol dispatch (component C, §4.2; §9 design
//! note: "a trait/interface per session is clean; inheritance is
//! unnecessary").

mod common;
mod nitrokey;
mod yubikey;

pub use nitrokey::NitrokeyProtocol;
pub use yubikey::YubiKeyProtocol;

use crate::oath::error::ApduError;
use crate::oath::model::{Brand, Capabilities, FirmwareVersion, OathAlgorithm};

/// Parsed result of a SELECT OATH response.
#[derive(Debug, Clone)]
pub struct SelectInfo {
    pub device_id_bytes: Vec<u8>,
    pub requires_password: bool,
    pub challenge: Option<Vec<u8>>,
    pub firmware: FirmwareVersion,
    pub serial_from_select: Option<u32>,
}

/// One credential entry as parsed from LIST/CALCULATE_ALL.
#[derive(Debug, Clone)]
pub struct CredentialEntry {
    pub name: String,
    pub algorithm: OathAlgorithm,
    pub is_totp: bool,
    pub digits: u8,
    pub requires_touch: bool,
    pub code: Option<String>,
}

/// A single calculated code.
#[derive(Debug, Clone)]
pub struct CalculatedCode {
    pub digits: u8,
    pub code: String,
}

/// Builds and parses the brand-specific shape of the four APDUs this crate
/// issues directly: SELECT, CALCULATE, CALCULATE_ALL/LIST, LIST-v1.
pub trait OathProtocol: Send + Sync {
    fn brand(&self) -> Brand;
    fn capabilities(&self) -> Capabilities;

    fn build_calculate_command(&self, name: &str, challenge: &[u8]) -> Vec<u8>;
    /// `None` when the brand has no single "calculate everything" command
    /// (Nitrokey: caller should use `build_list_command` instead).
    fn build_calculate_all_command(&self, challenge: &[u8]) -> Option<Vec<u8>>;
    fn build_list_command(&self) -> Vec<u8>;

    fn parse_select_response(&self, response: &[u8]) -> Result<SelectInfo, ApduError>;
    fn parse_calculate_response(&self, response: &[u8]) -> Result<CalculatedCode, ApduError>;
    fn parse_calculate_all_response(&self, response: &[u8]) -> Result<Vec<CredentialEntry>, ApduError>;
    fn parse_list_response(&self, response: &[u8]) -> Result<Vec<CredentialEntry>, ApduError>;
}

/// Instantiates the right protocol implementation for a detected brand.
pub fn for_brand(brand: Brand) -> Box<dyn OathProtocol> {
    match brand {
        Brand::Nitrokey => Box::new(NitrokeyProtocol),
        Brand::YubiKey | Brand::Unknown => Box::new(YubiKeyProtocol),
    }
}
