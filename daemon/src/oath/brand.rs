//! Brand detection and model decoding (component E, §4.3).

use crate::constants::{
    CAP_FIDO2, CAP_HMAC_SHA1, CAP_OATH, CAP_OPENPGP, CAP_OTP, CAP_PIV, CAP_U2F,
    FORM_FACTOR_USB_A_KEYCHAIN, FORM_FACTOR_USB_A_NANO, FORM_FACTOR_USB_C_KEYCHAIN,
    FORM_FACTOR_USB_C_LIGHTNING, FORM_FACTOR_USB_C_NANO, NITROKEY_FIRMWARE_FLOOR,
    NITROKEY_NK3C_FIRMWARE_FLOOR, PORT_LIGHTNING, PORT_NFC, PORT_USB_A, PORT_USB_C,
};
use crate::oath::model::{Brand, Capabilities, DeviceModel, FirmwareVersion};
use crate::prelude::*;

/// Brand-detection cascade (§4.3, SPEC_FULL §4.3). Never returns
/// [`Brand::Unknown`] — that variant exists only as a pre-detection
/// placeholder.
pub fn detect_brand(reader_name: &str, firmware: FirmwareVersion, has_select_serial: bool) -> Brand {
    let lower = reader_name.to_ascii_lowercase();
    let floor: FirmwareVersion = NITROKEY_FIRMWARE_FLOOR.into();

    if lower.contains("nitrokey") {
        return Brand::Nitrokey;
    }
    if lower.contains("yubico") || lower.contains("yubikey") {
        return Brand::YubiKey;
    }
    if has_select_serial && firmware >= floor {
        return Brand::Nitrokey;
    }
    if firmware.major == 5 && !has_select_serial {
        return Brand::YubiKey;
    }
    if firmware.major < 5 && !has_select_serial {
        return Brand::YubiKey;
    }
    Brand::YubiKey
}

/// Capability dispatch table (§3). Unknown brand falls back to YubiKey's row.
pub fn detect_capabilities(brand: Brand) -> Capabilities {
    match brand {
        Brand::Nitrokey => Capabilities {
            supports_calculate_all: false,
            has_select_serial: true,
            prefer_list: true,
            touch_required_status_word: 0x6982,
        },
        Brand::YubiKey | Brand::Unknown => Capabilities {
            supports_calculate_all: true,
            has_select_serial: false,
            prefer_list: false,
            touch_required_status_word: 0x6985,
        },
    }
}

pub fn is_touch_required(sw: u16) -> bool {
    sw == 0x6985 || sw == 0x6982
}

/// Parsed result of scanning a reader name for the NEO pattern
/// (`"... NEO ... (NNNNNNNNNN) ..."`, exactly 10 decimal digits).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderNameInfo {
    pub is_neo: bool,
    pub serial_number: u32,
    pub form_factor: u8,
    pub valid: bool,
}

impl ReaderNameInfo {
    const INVALID: ReaderNameInfo =
        ReaderNameInfo { is_neo: false, serial_number: 0, form_factor: 0, valid: false };
}

/// Scans a reader name for the `NEO` substring plus a parenthesized run of
/// exactly 10 decimal digits.
pub fn parse_reader_name(reader_name: &str) -> ReaderNameInfo {
    if !reader_name.to_ascii_uppercase().contains("NEO") {
        return ReaderNameInfo::INVALID;
    }
    let Some(open) = reader_name.find('(') else { return ReaderNameInfo::INVALID };
    let Some(close_rel) = reader_name[open..].find(')') else { return ReaderNameInfo::INVALID };
    let inside = &reader_name[open + 1..open + close_rel];
    if inside.len() != 10 || !inside.bytes().all(|b| b.is_ascii_digit()) {
        return ReaderNameInfo::INVALID;
    }
    match inside.parse::<u32>() {
        Ok(serial) => ReaderNameInfo {
            is_neo: true,
            serial_number: serial,
            form_factor: FORM_FACTOR_USB_A_KEYCHAIN,
            valid: true,
        },
        Err(_) => ReaderNameInfo::INVALID,
    }
}

/// YubiKey model decoding from firmware, management-applet form-factor byte,
/// and NFC-supported flag (§4.3).
pub fn decode_yubikey_model(
    firmware: FirmwareVersion,
    form_factor_byte: u8,
    nfc_supported: bool,
) -> DeviceModel {
    let (form_factor, ports) = match form_factor_byte {
        0x01 => (FORM_FACTOR_USB_A_KEYCHAIN, PORT_USB_A),
        0x02 => (FORM_FACTOR_USB_A_NANO, PORT_USB_A),
        0x03 => (FORM_FACTOR_USB_C_KEYCHAIN, PORT_USB_C),
        0x04 => (FORM_FACTOR_USB_C_NANO, PORT_USB_C),
        0x05 => (FORM_FACTOR_USB_C_LIGHTNING, PORT_USB_C | PORT_LIGHTNING),
        other => (other, PORT_USB_A),
    };
    let ports = if nfc_supported { ports | PORT_NFC } else { ports };

    let mut caps_byte = CAP_OATH | CAP_FIDO2 | CAP_U2F | CAP_PIV | CAP_OPENPGP;
    if firmware.major >= 5 {
        caps_byte |= CAP_OTP;
    }

    let series = firmware.major;
    let model_code =
        u32::from_be_bytes([series, ports, caps_byte, form_factor]);

    let mut capabilities = vec!["OATH".to_string(), "FIDO2".to_string(), "U2F".to_string(), "PIV".to_string(), "OpenPGP".to_string()];
    if firmware.major >= 5 {
        capabilities.push("OTP".to_string());
    }
    if nfc_supported {
        capabilities.push("NFC".to_string());
    }

    DeviceModel {
        brand: Brand::YubiKey,
        model_code,
        model_string: format!("YubiKey {firmware}"),
        form_factor,
        capabilities,
    }
}

/// Nitrokey model decoding from firmware and an NFC heuristic
/// (`minor >= 5 && not mini`).
pub fn decode_nitrokey_model(firmware: FirmwareVersion, is_mini: bool) -> DeviceModel {
    let nk3c_floor: FirmwareVersion = NITROKEY_NK3C_FIRMWARE_FLOOR.into();
    let is_nk3c = firmware >= nk3c_floor;
    let has_nfc = firmware.minor >= 5 && !is_mini;

    let (variant, form_factor, ports) = match (is_nk3c, is_mini) {
        (true, false) => ("NK3C", FORM_FACTOR_USB_C_KEYCHAIN, PORT_USB_C),
        (true, true) => ("NK3C Mini", FORM_FACTOR_USB_C_NANO, PORT_USB_C),
        (false, false) => ("NK3A", FORM_FACTOR_USB_A_KEYCHAIN, PORT_USB_A),
        (false, true) => ("NK3A Mini", FORM_FACTOR_USB_A_NANO, PORT_USB_A),
    };
    let ports = if has_nfc { ports | PORT_NFC } else { ports };

    let caps_byte = CAP_OATH | CAP_FIDO2 | CAP_U2F | CAP_HMAC_SHA1 | CAP_OPENPGP;
    let generation: u8 = 3;
    let model_code = u32::from_be_bytes([generation, ports, caps_byte, form_factor]);

    let mut capabilities =
        vec!["OATH".to_string(), "FIDO2".to_string(), "U2F".to_string(), "HmacSha1".to_string(), "OpenPGP".to_string()];
    if has_nfc {
        capabilities.push("NFC".to_string());
    }

    DeviceModel {
        brand: Brand::Nitrokey,
        model_code,
        model_string: format!("Nitrokey {variant} {firmware}"),
        form_factor,
        capabilities,
    }
}

/// Resolves the Nitrokey `firmware == (1, 0, 0)` ambiguity: the original
/// implementation's heuristics cannot distinguish this from a genuinely
/// unreported firmware, so it is kept as NK3A with a diagnostic (§9).
pub fn decode_nitrokey_model_with_diagnostic(firmware: FirmwareVersion, is_mini: bool) -> DeviceModel {
    if firmware == FirmwareVersion::new(1, 0, 0) {
        warn!("Nitrokey reports firmware 1.0.0; assuming NK3A, model decoding may be inaccurate");
    }
    decode_nitrokey_model(firmware, is_mini)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_brand_prefers_reader_name_substrings() {
        assert_eq!(
            detect_brand("Nitrokey 3 00 00", FirmwareVersion::UNKNOWN, false),
            Brand::Nitrokey
        );
        assert_eq!(
            detect_brand("Yubico YubiKey OTP+CCID 00 00", FirmwareVersion::UNKNOWN, false),
            Brand::YubiKey
        );
    }

    #[test]
    fn detect_brand_falls_back_to_firmware_heuristic() {
        assert_eq!(
            detect_brand("Generic CCID Reader 00 00", FirmwareVersion::new(4, 14, 0), true),
            Brand::Nitrokey
        );
        assert_eq!(
            detect_brand("Generic CCID Reader 00 00", FirmwareVersion::new(5, 4, 3), false),
            Brand::YubiKey
        );
        assert_eq!(
            detect_brand("Generic CCID Reader 00 00", FirmwareVersion::UNKNOWN, false),
            Brand::YubiKey
        );
    }

    #[test]
    fn capabilities_dispatch_by_brand() {
        let nk = detect_capabilities(Brand::Nitrokey);
        assert!(nk.prefer_list);
        assert!(nk.has_select_serial);
        assert_eq!(nk.touch_required_status_word, 0x6982);

        let yk = detect_capabilities(Brand::YubiKey);
        assert!(yk.supports_calculate_all);
        assert_eq!(yk.touch_required_status_word, 0x6985);
    }

    #[test]
    fn is_touch_required_accepts_both_brand_status_words() {
        assert!(is_touch_required(0x6985));
        assert!(is_touch_required(0x6982));
        assert!(!is_touch_required(0x9000));
    }

    #[test]
    fn parse_reader_name_extracts_neo_serial() {
        let info = parse_reader_name("Yubico YubiKey NEO OTP+CCID (0003507404) 00 00");
        assert!(info.valid);
        assert!(info.is_neo);
        assert_eq!(info.serial_number, 3507404);
    }

    #[test]
    fn parse_reader_name_rejects_non_neo() {
        let info = parse_reader_name("Yubico YubiKey OTP+CCID 00 00");
        assert!(!info.valid);
    }

    #[test]
    fn nitrokey_model_decoding_picks_nk3c_above_firmware_floor() {
        let model = decode_nitrokey_model(FirmwareVersion::new(1, 6, 0), false);
        assert!(model.model_string.contains("NK3C"));
        let model = decode_nitrokey_model(FirmwareVersion::new(1, 5, 0), false);
        assert!(model.model_string.contains("NK3A"));
    }
}
