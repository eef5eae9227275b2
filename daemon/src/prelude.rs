//! Project-wide prelude for common imports
//!
//! This module re-exports commonly used items to reduce boilerplate
//! across the codebase. Import with `use crate::prelude::*;`

// Re-export tracing macros for logging
pub use crate::tracing_setup::{debug, error, info, trace, warn};
pub use crate::tracing_setup::{debug_span, error_span, info_span, trace_span, warn_span};
pub use crate::tracing_setup::{event, instrument, span};

// Re-export secure-logging helpers
pub use crate::tracing_setup::redaction::{
    Sensitive, apdu_description, mask_credential_name, mask_serial, safe_apdu_info,
    safe_byte_info, sw_description,
};

pub use crate::error::StableErrorId;

// Common traits used frequently across the OATH subsystem
pub use async_trait::async_trait;
pub use serde::{Deserialize, Serialize};

// Note: we don't re-export Result<T> to avoid conflicts with per-module
// Result aliases (OathResult, PcscResult, ...).
