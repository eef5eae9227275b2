// Deny debug and print macros in production code
#![deny(clippy::print_stdout)]
#![deny(clippy::dbg_macro)]

pub mod constants;
pub mod error;
pub mod oath;
pub mod prelude;
pub mod tracing_setup;
