//! Error taxonomy for the OATH device subsystem.
//!
//! Each layer owns a `thiserror` enum; lower-layer errors convert into the
//! layer above via `#[from]` so a caller never has to pattern-match two
//! levels deep to find the root cause.

mod stable_id;

pub use stable_id::StableErrorId;
