//! Error taxonomy for the OATH device subsystem (§7).
//!
//! `CardResetDetected` and `SessionLost` are intentionally absent here: they
//! are internal to [`crate::oath::session::OathSession::send_apdu`] and never
//! cross the session's public API, per the design note in SPEC_FULL §9.

use crate::error::StableErrorId;
use thiserror::Error;

/// Errors from the resource-manager binding layer (component A).
#[derive(Debug, Error)]
pub enum PcscError {
    #[error("no PC/SC readers available")]
    NoReadersAvailable,
    #[error("PC/SC resource manager service is not running")]
    NoService,
    #[error("card was removed from the reader")]
    CardRemoved,
    #[error("card state was reset")]
    Reset,
    #[error("operation timed out")]
    Timeout,
    #[error("invalid card handle")]
    InvalidHandle,
    #[error("PC/SC transport error: {0}")]
    Transport(String),
}

/// Errors from APDU/TLV parsing (component B).
#[derive(Debug, Error)]
pub enum ApduError {
    #[error("response too short to contain a status word")]
    ResponseTooShort,
    #[error("TLV tag {tag:#04x} not found in response")]
    TagNotFound { tag: u8 },
    #[error("malformed TLV data")]
    Malformed,
}

/// Public OATH session/device error taxonomy (§7).
#[derive(Debug, Error)]
pub enum OathError {
    #[error("communication error")]
    CommunicationError,
    #[error("invalid response from device")]
    InvalidResponse,
    #[error("device password required")]
    PasswordRequired,
    #[error("authentication failed")]
    AuthenticationFailed,
    #[error("touch required on device")]
    TouchRequired,
    #[error("credential not found")]
    CredentialNotFound,
    #[error("invalid data rejected by device")]
    InvalidData,
    #[error("device has no space for new credential")]
    NoSpace,
    #[error("operation timed out")]
    Timeout,
    #[error("device disconnected")]
    DeviceDisconnected,
    #[error("PC/SC service unavailable")]
    PcscServiceLost,
}

impl StableErrorId for OathError {
    fn error_id(&self) -> &'static str {
        match self {
            OathError::CommunicationError => "OATH_ERROR_COMMUNICATION",
            OathError::InvalidResponse => "OATH_ERROR_INVALID_RESPONSE",
            OathError::PasswordRequired => "OATH_ERROR_PASSWORD_REQUIRED",
            OathError::AuthenticationFailed => "OATH_ERROR_AUTHENTICATION_FAILED",
            OathError::TouchRequired => "OATH_ERROR_TOUCH_REQUIRED",
            OathError::CredentialNotFound => "OATH_ERROR_CREDENTIAL_NOT_FOUND",
            OathError::InvalidData => "OATH_ERROR_INVALID_DATA",
            OathError::NoSpace => "OATH_ERROR_NO_SPACE",
            OathError::Timeout => "OATH_ERROR_TIMEOUT",
            OathError::DeviceDisconnected => "OATH_ERROR_DEVICE_DISCONNECTED",
            OathError::PcscServiceLost => "OATH_ERROR_PCSC_SERVICE_LOST",
        }
    }
}

impl From<PcscError> for OathError {
    fn from(e: PcscError) -> Self {
        match e {
            PcscError::NoService => OathError::PcscServiceLost,
            PcscError::CardRemoved => OathError::DeviceDisconnected,
            PcscError::Timeout => OathError::Timeout,
            PcscError::NoReadersAvailable
            | PcscError::Reset
            | PcscError::InvalidHandle
            | PcscError::Transport(_) => OathError::CommunicationError,
        }
    }
}

impl From<ApduError> for OathError {
    fn from(_: ApduError) -> Self {
        OathError::InvalidResponse
    }
}

/// Device-manager level errors (component L), one layer above [`OathError`].
#[derive(Debug, Error)]
pub enum DeviceManagerError {
    #[error("device {0:?} not found")]
    DeviceNotFound(crate::oath::model::DeviceId),
    #[error(transparent)]
    Oath(#[from] OathError),
    #[error(transparent)]
    Pcsc(#[from] PcscError),
}

pub type PcscResult<T> = Result<T, PcscError>;
pub type OathResult<T> = Result<T, OathError>;
pub type ManagerResult<T> = Result<T, DeviceManagerError>;
