//! Event sink replacing the source's signals/slots (§9 design note, §11).
//!
//! [`OathEventSink`] carries one method per signal named in §4.8/§4.9/§4.11.
//! A [`Device`](crate::oath::device::Device) or the
//! [`DeviceManager`](crate::oath::manager::DeviceManager) hold an
//! `Arc<dyn OathEventSink>` and call straight through; delivery is FIFO
//! per-source but not ordered across sources, matching §5. No implementation
//! against a real IPC backend lives in this crate — only [`NullEventSink`]
//! and the test suite's in-memory spies.

use crate::oath::model::{DeviceId, DeviceState, OathCredential, ReaderName};
use async_trait::async_trait;

/// One priority-tagged APDU command, carried on `cardResetDetected` /
/// `needsReconnect` so the reconnect closure knows what to retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCommand {
    pub description: String,
}

#[async_trait]
pub trait OathEventSink: Send + Sync {
    async fn device_connected(&self, device_id: &DeviceId);
    async fn device_disconnected(&self, device_id: &DeviceId);
    async fn device_forgotten(&self, device_id: &DeviceId);
    async fn credentials_changed(&self, device_id: &DeviceId);
    async fn state_changed(&self, device_id: &DeviceId, state: DeviceState);
    async fn touch_required(&self, device_id: &DeviceId);
    async fn error_occurred(&self, device_id: &DeviceId, message: &str);
    async fn credential_cache_fetched(&self, device_id: &DeviceId, credentials: &[OathCredential]);
    async fn reader_list_changed(&self);
    async fn card_inserted(&self, reader_name: &ReaderName);
    async fn card_removed(&self, reader_name: &ReaderName);
    async fn pcsc_service_lost(&self);
}

/// Sink that drops every event; used when nothing downstream is listening
/// (the standalone binary, and tests that only assert on return values).
pub struct NullEventSink;

#[async_trait]
impl OathEventSink for NullEventSink {
    async fn device_connected(&self, _device_id: &DeviceId) {}
    async fn device_disconnected(&self, _device_id: &DeviceId) {}
    async fn device_forgotten(&self, _device_id: &DeviceId) {}
    async fn credentials_changed(&self, _device_id: &DeviceId) {}
    async fn state_changed(&self, _device_id: &DeviceId, _state: DeviceState) {}
    async fn touch_required(&self, _device_id: &DeviceId) {}
    async fn error_occurred(&self, _device_id: &DeviceId, _message: &str) {}
    async fn credential_cache_fetched(&self, _device_id: &DeviceId, _credentials: &[OathCredential]) {}
    async fn reader_list_changed(&self) {}
    async fn card_inserted(&self, _reader_name: &ReaderName) {}
    async fn card_removed(&self, _reader_name: &ReaderName) {}
    async fn pcsc_service_lost(&self) {}
}
