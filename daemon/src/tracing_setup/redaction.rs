//! Secure-logging helpers: masking for serials, credential names, and APDUs.
//!
//! Nothing in this crate should format a raw APDU byte string, a raw HMAC
//! response, or a full token serial number into a log line. These helpers are
//! the only sanctioned way to turn that data into something loggable.

use std::fmt;

/// Wraps a value so its `Debug`/`Display` never reveal the inner value.
///
/// Used for device passwords and PBKDF2-derived key material passed into
/// `tracing` field macros, where the default `Debug` derive would otherwise
/// leak secret bytes into the log file.
pub struct Sensitive<T>(pub T);

impl<T> fmt::Debug for Sensitive<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<redacted>")
    }
}

impl<T> fmt::Display for Sensitive<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<redacted>")
    }
}

/// Describes the length of a byte buffer without revealing its contents.
pub fn safe_byte_info(data: &[u8]) -> String {
    format!("[{} bytes]", data.len())
}

/// Masks a 32-bit device serial number, keeping only the last four digits.
///
/// `0` is the crate-wide "unknown serial" sentinel and is rendered as
/// `"(none)"` rather than `"****0000"`.
pub fn mask_serial(serial: u32) -> String {
    if serial == 0 {
        return "(none)".to_string();
    }
    let s = serial.to_string();
    if s.len() <= 4 {
        s
    } else {
        format!("****{}", &s[s.len() - 4..])
    }
}

/// Masks an on-card credential name for logging.
///
/// Names of the form `issuer:account` keep the issuer and redact the account;
/// short names with no separator are kept whole (nothing meaningful to hide);
/// longer unstructured names keep only their first two characters.
pub fn mask_credential_name(name: &str) -> String {
    if name.is_empty() {
        return "(empty)".to_string();
    }
    if let Some((issuer, _account)) = name.split_once(':') {
        return format!("{issuer}:****");
    }
    if name.chars().count() <= 4 {
        name.to_string()
    } else {
        let prefix: String = name.chars().take(2).collect();
        format!("{prefix}****")
    }
}

/// Maps an APDU instruction byte to a human-readable command name.
pub fn apdu_description(ins: u8) -> &'static str {
    match ins {
        0xA4 => "SELECT/CALCULATE_ALL",
        0xA1 => "LIST",
        0xA2 => "CALCULATE",
        0xA3 => "VALIDATE",
        0xA5 => "SEND_REMAINING",
        0x01 => "PUT",
        0x02 => "DELETE",
        0x03 => "SET_CODE",
        0x04 => "RESET",
        _ => "CMD_UNKNOWN",
    }
}

/// Describes an outgoing APDU without leaking its payload bytes.
pub fn safe_apdu_info(command: &[u8]) -> String {
    if command.len() < 4 {
        return format!("[invalid APDU, {} bytes]", command.len());
    }
    format!("{} [{} bytes]", apdu_description(command[1]), command.len())
}

/// Maps a status word to a human-readable name for logging.
pub fn sw_description(sw: u16) -> &'static str {
    match sw {
        0x9000 => "SUCCESS",
        0x6985 => "TOUCH_OR_AUTH_REQUIRED",
        0x6982 => "TOUCH_OR_AUTH_REQUIRED",
        0x6984 => "NOT_FOUND",
        0x6A80 => "INVALID_DATA",
        0x6A84 => "NO_SPACE",
        0x6D00 => "INS_NOT_SUPPORTED",
        0x6E00 => "CLA_NOT_SUPPORTED",
        _ if (sw & 0xFF00) == 0x6100 => "MORE_DATA",
        _ => "SW_UNKNOWN",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_serial_keeps_last_four_digits() {
        assert_eq!(mask_serial(0), "(none)");
        assert_eq!(mask_serial(42), "42");
        assert_eq!(mask_serial(21_852_159), "****2159");
    }

    #[test]
    fn mask_credential_name_splits_on_colon() {
        assert_eq!(mask_credential_name("Google:alice@example.com"), "Google:****");
        assert_eq!(mask_credential_name("abc"), "abc");
        assert_eq!(mask_credential_name("averylongaccountname"), "av****");
        assert_eq!(mask_credential_name(""), "(empty)");
    }

    #[test]
    fn safe_apdu_info_rejects_short_buffers() {
        assert_eq!(safe_apdu_info(&[0x00, 0xA1]), "[invalid APDU, 2 bytes]");
        assert_eq!(safe_apdu_info(&[0x00, 0xA1, 0x00, 0x00]), "LIST [4 bytes]");
    }

    #[test]
    fn sw_description_covers_documented_codes() {
        assert_eq!(sw_description(0x9000), "SUCCESS");
        assert_eq!(sw_description(0x6982), "TOUCH_OR_AUTH_REQUIRED");
        assert_eq!(sw_description(0x6985), "TOUCH_OR_AUTH_REQUIRED");
        assert_eq!(sw_description(0x6110), "MORE_DATA");
        assert_eq!(sw_description(0x1234), "SW_UNKNOWN");
    }
}
