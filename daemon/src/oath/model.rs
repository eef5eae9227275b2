//! Core data model for the OATH device subsystem: identifiers, brand and
//! capability tables, device/credential records, and the device state
//! machine. See module docs in [`super`] for how these compose.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identifier for one physical token, derived from its OATH SELECT
/// response. Stable across connect/disconnect of the same token; unstable
/// across a factory reset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId(pub String);

impl DeviceId {
    pub fn from_hex_bytes(bytes: &[u8]) -> Self {
        Self(hex::encode_upper(bytes))
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Platform string identifying a reader slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReaderName(pub String);

impl fmt::Display for ReaderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ReaderName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Token manufacturer family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Brand {
    Unknown,
    YubiKey,
    Nitrokey,
}

impl fmt::Display for Brand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Brand::Unknown => "Unknown",
            Brand::YubiKey => "YubiKey",
            Brand::Nitrokey => "Nitrokey",
        };
        write!(f, "{s}")
    }
}

/// Brand-derived protocol capabilities (§3, §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub supports_calculate_all: bool,
    pub has_select_serial: bool,
    pub prefer_list: bool,
    pub touch_required_status_word: u16,
}

/// `(major, minor, patch)` with total ordering; `(0, 0, 0)` means "unknown".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FirmwareVersion {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

impl FirmwareVersion {
    pub const UNKNOWN: FirmwareVersion = FirmwareVersion { major: 0, minor: 0, patch: 0 };

    pub fn new(major: u8, minor: u8, patch: u8) -> Self {
        Self { major, minor, patch }
    }

    pub fn is_unknown(&self) -> bool {
        *self == Self::UNKNOWN
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl From<(u8, u8, u8)> for FirmwareVersion {
    fn from(t: (u8, u8, u8)) -> Self {
        Self::new(t.0, t.1, t.2)
    }
}

/// Uniform model description regardless of brand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceModel {
    pub brand: Brand,
    pub model_code: u32,
    pub model_string: String,
    pub form_factor: u8,
    pub capabilities: Vec<String>,
}

// Form factor byte values shared by both brands' model decoding.
pub const FORM_FACTOR_UNKNOWN: u8 = 0x00;
pub const FORM_FACTOR_USB_A_KEYCHAIN: u8 = 0x01;
pub const FORM_FACTOR_USB_A_NANO: u8 = 0x02;
pub const FORM_FACTOR_USB_C_KEYCHAIN: u8 = 0x03;
pub const FORM_FACTOR_USB_C_NANO: u8 = 0x04;
pub const FORM_FACTOR_USB_C_LIGHTNING: u8 = 0x05;

/// Port/capability bitfields packed into [`DeviceModel::model_code`].
pub const PORT_USB_A: u8 = 0x01;
pub const PORT_USB_C: u8 = 0x02;
pub const PORT_LIGHTNING: u8 = 0x04;
pub const PORT_NFC: u8 = 0x08;

pub const CAP_FIDO2: u8 = 0x01;
pub const CAP_U2F: u8 = 0x02;
pub const CAP_OATH: u8 = 0x04;
pub const CAP_PIV: u8 = 0x08;
pub const CAP_OPENPGP: u8 = 0x10;
pub const CAP_OTP: u8 = 0x20;
pub const CAP_HMAC_SHA1: u8 = 0x40;

/// Result of the extended-device-info probe (§4.4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendedDeviceInfo {
    pub serial_number: u32,
    pub firmware_version: FirmwareVersion,
    pub device_model: DeviceModel,
    pub form_factor: u8,
}

/// Credential OTP algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OathAlgorithm {
    Sha1,
    Sha256,
    Sha512,
}

impl OathAlgorithm {
    /// Low nibble of an OATH algorithm byte (`oath_protocol.h` encoding).
    pub fn from_low_nibble(nibble: u8) -> Option<Self> {
        match nibble {
            0x01 => Some(Self::Sha1),
            0x02 => Some(Self::Sha256),
            0x03 => Some(Self::Sha512),
            _ => None,
        }
    }

    pub fn low_nibble(self) -> u8 {
        match self {
            Self::Sha1 => 0x01,
            Self::Sha256 => 0x02,
            Self::Sha512 => 0x03,
        }
    }
}

/// Catalog entry for one OATH credential stored on a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OathCredential {
    pub device_id: DeviceId,
    pub original_name: String,
    pub issuer: Option<String>,
    pub account: String,
    pub is_totp: bool,
    pub algorithm: OathAlgorithm,
    pub digits: u8,
    pub period: u16,
    pub counter: u32,
    pub requires_touch: bool,
    pub code: Option<String>,
    pub valid_until: Option<u64>,
}

/// Mutation payload used when adding a credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OathCredentialData {
    pub device_id: DeviceId,
    pub original_name: String,
    pub issuer: Option<String>,
    pub account: String,
    pub is_totp: bool,
    pub algorithm: OathAlgorithm,
    pub digits: u8,
    pub period: u16,
    pub counter: u32,
    pub requires_touch: bool,
    /// Base32-encoded HMAC secret, used only when adding.
    pub secret: String,
}

/// Per-device state machine (§3). `Connecting`/`Authenticating`/
/// `FetchingCredentials` are the transitional states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceState {
    Disconnected,
    Connecting,
    Authenticating,
    FetchingCredentials,
    Ready,
    Error,
}

impl DeviceState {
    pub fn is_transitional(self) -> bool {
        matches!(
            self,
            DeviceState::Connecting | DeviceState::Authenticating | DeviceState::FetchingCredentials
        )
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeviceState::Disconnected => "Disconnected",
            DeviceState::Connecting => "Connecting",
            DeviceState::Authenticating => "Authenticating",
            DeviceState::FetchingCredentials => "FetchingCredentials",
            DeviceState::Ready => "Ready",
            DeviceState::Error => "Error",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn firmware_version_orders_by_major_then_minor_then_patch() {
        assert!(FirmwareVersion::new(4, 14, 0) > FirmwareVersion::new(4, 13, 9));
        assert!(FirmwareVersion::new(5, 0, 0) > FirmwareVersion::new(4, 14, 0));
        assert!(FirmwareVersion::UNKNOWN.is_unknown());
    }

    #[test]
    fn device_id_renders_upper_hex() {
        let id = DeviceId::from_hex_bytes(&[0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(id.to_string(), "DEADBEEF");
    }

    #[test]
    fn transitional_states_match_spec() {
        assert!(DeviceState::Connecting.is_transitional());
        assert!(DeviceState::Authenticating.is_transitional());
        assert!(DeviceState::FetchingCredentials.is_transitional());
        assert!(!DeviceState::Ready.is_transitional());
        assert!(!DeviceState::Disconnected.is_transitional());
    }
}
