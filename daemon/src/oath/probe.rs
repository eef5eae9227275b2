//! Extended-device-info probe (component D, §4.4).
//!
//! Runs up to four strategies in order, stopping at the first success; each
//! strategy re-SELECTs OATH before returning so the session it borrows is
//! left in the state its owner expects. Only non-zero values from later
//! strategies override earlier ones.

use crate::constants::{
    CMD_MGMT_DEVICE_INFO, CMD_OTP_DEVICE_SERIAL, INS_MGMT_GET_DEVICE_INFO, INS_OTP_CONFIG,
    INS_PIV_GET_SERIAL, MANAGEMENT_AID, MGMT_TAG_FIRMWARE, MGMT_TAG_FORM_FACTOR,
    MGMT_TAG_NFC_SUPPORTED, MGMT_TAG_SERIAL, OATH_AID, OTP_AID, PIV_AID,
};
use crate::oath::apdu::{build_apdu, find_tlv, get_status_word, is_success, parse_tlv};
use crate::oath::brand::{decode_yubikey_model, parse_reader_name};
use crate::oath::model::{DeviceModel, ExtendedDeviceInfo, FirmwareVersion};
use crate::oath::pcsc_context::{CardHandle, CardProtocol, PcscTransport};
use crate::prelude::*;
use std::sync::Arc;

/// Transmits one SELECT + command pair, always re-selecting OATH afterward
/// regardless of the probe command's outcome.
fn probe_applet(
    transport: &Arc<dyn PcscTransport>,
    handle: CardHandle,
    protocol: CardProtocol,
    aid: &[u8],
    command: &[u8],
) -> Option<Vec<u8>> {
    let select = build_apdu(0x00, 0xA4, 0x04, 0x00, aid, Some(0x00));
    let select_response = transport.transmit(handle, protocol, &select).ok()?;
    if !is_success(get_status_word(&select_response)) {
        reselect_oath(transport, handle, protocol);
        return None;
    }
    let response = transport.transmit(handle, protocol, command).ok();
    reselect_oath(transport, handle, protocol);
    response.filter(|r| is_success(get_status_word(r)))
}

fn reselect_oath(transport: &Arc<dyn PcscTransport>, handle: CardHandle, protocol: CardProtocol) {
    let select_oath = build_apdu(0x00, 0xA4, 0x04, 0x00, &OATH_AID, Some(0x00));
    let _ = transport.transmit(handle, protocol, &select_oath);
}

/// Runs the four-strategy probe. `initial_serial` is the serial already
/// known from the initiating OATH SELECT (strategy 1's input), if any.
pub fn get_extended_device_info(
    transport: &Arc<dyn PcscTransport>,
    handle: CardHandle,
    protocol: CardProtocol,
    reader_name: &str,
    initial_serial: Option<u32>,
) -> ExtendedDeviceInfo {
    let mut serial = initial_serial.unwrap_or(0);
    let mut firmware = FirmwareVersion::UNKNOWN;
    let mut form_factor = 0u8;
    let mut nfc_supported = false;

    // Strategy 1: TAG_SERIAL_NUMBER already present from the OATH SELECT.
    if serial != 0 {
        debug!(serial = %crate::tracing_setup::redaction::mask_serial(serial), "extended device info from SELECT");
    } else {
        // Strategy 2: Management GET DEVICE INFO.
        let command = build_apdu(0x00, INS_MGMT_GET_DEVICE_INFO, CMD_MGMT_DEVICE_INFO, 0x00, &[], Some(0x00));
        if let Some(response) = probe_applet(transport, handle, protocol, &MANAGEMENT_AID, &command) {
            let tlvs = parse_tlv(&response);
            if let Some(t) = find_tlv(&tlvs, MGMT_TAG_SERIAL).filter(|t| t.value.len() == 4) {
                let s = u32::from_be_bytes([t.value[0], t.value[1], t.value[2], t.value[3]]);
                if s != 0 {
                    serial = s;
                }
            }
            if let Some(t) = find_tlv(&tlvs, MGMT_TAG_FIRMWARE).filter(|t| t.value.len() == 3) {
                firmware = FirmwareVersion::new(t.value[0], t.value[1], t.value[2]);
            }
            if let Some(t) = find_tlv(&tlvs, MGMT_TAG_FORM_FACTOR).filter(|t| !t.value.is_empty()) {
                form_factor = t.value[0];
            }
            if let Some(t) = find_tlv(&tlvs, MGMT_TAG_NFC_SUPPORTED).filter(|t| !t.value.is_empty()) {
                nfc_supported = t.value[0] != 0;
            }
        }

        // Strategy 3: OTP GET_SERIAL, with the NEO reader-name fallback.
        if serial == 0 {
            let command = build_apdu(0x00, INS_OTP_CONFIG, CMD_OTP_DEVICE_SERIAL, 0x00, &[], Some(0x00));
            if let Some(response) = probe_applet(transport, handle, protocol, &OTP_AID, &command) {
                if response.len() >= 4 {
                    let s = u32::from_be_bytes([response[0], response[1], response[2], response[3]]);
                    if s != 0 {
                        serial = s;
                    }
                }
            }
            if serial == 0 {
                let neo = parse_reader_name(reader_name);
                if neo.valid {
                    serial = neo.serial_number;
                    firmware = FirmwareVersion::new(3, 4, 0);
                    form_factor = neo.form_factor;
                }
            }
        }

        // Strategy 4: PIV GET SERIAL.
        if serial == 0 {
            let command = build_apdu(0x00, INS_PIV_GET_SERIAL, 0x00, 0x00, &[], Some(0x00));
            if let Some(response) = probe_applet(transport, handle, protocol, &PIV_AID, &command) {
                if response.len() >= 4 {
                    let s = u32::from_be_bytes([response[0], response[1], response[2], response[3]]);
                    if s != 0 {
                        serial = s;
                    }
                }
            }
        }
    }

    // Strategy 5: final fallback, use whatever was already gathered.
    let device_model = if firmware.is_unknown() {
        DeviceModel {
            brand: crate::oath::model::Brand::Unknown,
            model_code: 0,
            model_string: "Unknown".to_string(),
            form_factor,
            capabilities: Vec::new(),
        }
    } else {
        decode_yubikey_model(firmware, form_factor, nfc_supported)
    };

    ExtendedDeviceInfo { serial_number: serial, firmware_version: firmware, device_model, form_factor }
}
