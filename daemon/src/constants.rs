//! Constants used throughout the OATH device daemon
//!
//! This module centralizes magic numbers and protocol constants to improve
//! maintainability and make the APDU/TLV layer reviewable against the applet
//! documentation it implements.

// ============================================================================
// OATH applet identifiers
// ============================================================================

/// OATH application identifier.
pub const OATH_AID: [u8; 7] = [0xA0, 0x00, 0x00, 0x05, 0x27, 0x21, 0x01];

/// Management applet identifier, used to probe device info.
pub const MANAGEMENT_AID: [u8; 8] = [0xA0, 0x00, 0x00, 0x05, 0x27, 0x20, 0x01, 0x01];

/// YubiKey OTP applet identifier, used as a serial-number fallback.
pub const OTP_AID: [u8; 5] = [0xA0, 0x00, 0x00, 0x05, 0x27, 0x20, 0x01];

/// PIV applet identifier, used as a last-resort serial-number fallback.
pub const PIV_AID: [u8; 5] = [0xA0, 0x00, 0x00, 0x03, 0x08];

// ============================================================================
// Instruction codes (CLA is 0x00 for every OATH command)
// ============================================================================

pub const INS_PUT: u8 = 0x01;
pub const INS_DELETE: u8 = 0x02;
pub const INS_SET_CODE: u8 = 0x03;
pub const INS_RESET: u8 = 0x04;
pub const INS_LIST: u8 = 0xA1;
pub const INS_CALCULATE: u8 = 0xA2;
pub const INS_VALIDATE: u8 = 0xA3;
/// Shared with [`INS_CALCULATE_ALL`]; disambiguated by P1 (SELECT uses P1=0x04).
pub const INS_SELECT: u8 = 0xA4;
pub const INS_CALCULATE_ALL: u8 = 0xA4;
pub const INS_SEND_REMAINING: u8 = 0xA5;

pub const INS_MGMT_GET_DEVICE_INFO: u8 = 0x01;
pub const CMD_MGMT_DEVICE_INFO: u8 = 0x13;
pub const INS_OTP_CONFIG: u8 = 0x01;
pub const CMD_OTP_DEVICE_SERIAL: u8 = 0x10;
pub const INS_PIV_GET_SERIAL: u8 = 0xF8;

// ============================================================================
// TLV tags
// ============================================================================

pub const TAG_NAME: u8 = 0x71;
pub const TAG_NAME_LIST: u8 = 0x72;
pub const TAG_KEY: u8 = 0x73;
pub const TAG_CHALLENGE: u8 = 0x74;
pub const TAG_RESPONSE: u8 = 0x75;
pub const TAG_TRUNCATED_RESPONSE: u8 = 0x76;
pub const TAG_HOTP: u8 = 0x77;
pub const TAG_PROPERTY: u8 = 0x78;
pub const TAG_VERSION: u8 = 0x79;
pub const TAG_IMF: u8 = 0x7A;
pub const TAG_ALGORITHM: u8 = 0x7B;
pub const TAG_TOUCH: u8 = 0x7C;
pub const TAG_SERIAL_NUMBER: u8 = 0x8F;

/// Management applet response tags (`GET DEVICE INFO`).
pub const MGMT_TAG_SERIAL: u8 = 0x02;
pub const MGMT_TAG_FORM_FACTOR: u8 = 0x04;
pub const MGMT_TAG_FIRMWARE: u8 = 0x05;
pub const MGMT_TAG_NFC_SUPPORTED: u8 = 0x0D;

// ============================================================================
// Status words
// ============================================================================

pub const SW_SUCCESS: u16 = 0x9000;
pub const SW_SECURITY_STATUS_NOT_SATISFIED: u16 = 0x6982;
pub const SW_NO_SUCH_OBJECT: u16 = 0x6984;
pub const SW_CONDITIONS_NOT_SATISFIED: u16 = 0x6985;
pub const SW_WRONG_DATA: u16 = 0x6A80;
pub const SW_INSUFFICIENT_SPACE: u16 = 0x6A84;
pub const SW_INS_NOT_SUPPORTED: u16 = 0x6D00;
pub const SW_CLA_NOT_SUPPORTED: u16 = 0x6E00;
/// High byte of `MORE_DATA`; the low byte is the remaining-bytes count.
pub const SW_MORE_DATA_MASK: u16 = 0x6100;

// ============================================================================
// Credential formatting
// ============================================================================

/// OATH credential codes are displayed with 6, 7, or 8 digits.
pub const VALID_DIGIT_LENGTHS: [u8; 3] = [6, 7, 8];

/// Default TOTP period in seconds when a credential name carries no `N/` prefix.
pub const DEFAULT_TOTP_PERIOD_SECONDS: u16 = 30;

/// Minimum HMAC key length the PUT command pads shorter secrets up to.
pub const MIN_KEY_LENGTH_BYTES: usize = 14;

// ============================================================================
// PBKDF2 authentication
// ============================================================================

pub const PBKDF2_ITERATIONS: u32 = 1000;
pub const PBKDF2_KEY_LENGTH_BYTES: usize = 16;
pub const CHALLENGE_LENGTH_BYTES: usize = 8;

// ============================================================================
// Brand-detection firmware floors
// ============================================================================

/// Firmware at or above this marks a Nitrokey by elimination when the reader
/// name carries no brand substring (§4.3).
pub const NITROKEY_FIRMWARE_FLOOR: (u8, u8, u8) = (4, 14, 0);

/// Nitrokey firmware at or above this decodes to the NK3C model variant.
pub const NITROKEY_NK3C_FIRMWARE_FLOOR: (u8, u8, u8) = (1, 6, 0);

// ============================================================================
// Reconnect / reader-monitor timing defaults (overridable via OathConfig)
// ============================================================================

pub const DEFAULT_PCSC_RATE_LIMIT_MS: u64 = 0;
pub const DEFAULT_WORKER_POOL_MAX_THREADS: usize = 4;
pub const MIN_WORKER_POOL_THREADS: usize = 1;
pub const MAX_WORKER_POOL_THREADS: usize = 16;
pub const DEFAULT_READER_POLL_INTERVAL_MS: u64 = 500;
pub const DEFAULT_DEVICE_CONNECT_TIMEOUT_MS: u64 = 2000;
pub const DEFAULT_DEVICE_RECONNECT_INITIAL_DELAY_MS: u64 = 10;
pub const DEFAULT_CREDENTIAL_UPDATE_WAIT_MS_ON_DESTROY: u64 = 5000;

/// Device-handle reconnect backoff schedule, capped around ~5 seconds total.
pub const RECONNECT_BACKOFF_MS: [u64; 6] = [50, 100, 200, 400, 800, 1600];

/// Max retries for a single `sendApdu` call after a card-reset rendezvous.
pub const MAX_TRANSMIT_RETRY_COUNT: u8 = 1;
