//! OATH device subsystem: PC/SC transport, APDU/TLV codec, brand-polymorphic
//! protocol, session and device state machines, and the process-wide manager
//! that ties them together. See `SPEC_FULL.md` §4 for the component map this
//! module layout mirrors one-to-one.

pub mod apdu;
pub mod brand;
pub mod collaborators;
pub mod config;
pub mod device;
pub mod error;
pub mod events;
pub mod manager;
pub mod model;
pub mod pcsc_context;
pub mod probe;
pub mod protocol;
pub mod reader_monitor;
pub mod reconnect;
pub mod session;
pub mod transaction;
pub mod worker_pool;
