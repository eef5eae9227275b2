//! Collaborator ports (component P, §11): narrow trait seams for the
//! metadata store, password store, and IPC event sink, all out of scope as
//! implementations. See [`crate::oath::events::OathEventSink`] for the third.

use crate::oath::error::OathResult;
use crate::oath::model::{DeviceId, OathCredential};
use async_trait::async_trait;

/// Persisted device catalog (§6 "Consumes from collaborators").
#[async_trait]
pub trait DeviceMetadataStore: Send + Sync {
    async fn get_all_devices(&self) -> OathResult<Vec<DeviceId>>;
    async fn add_device(&self, device_id: &DeviceId) -> OathResult<()>;
    async fn remove_device(&self, device_id: &DeviceId) -> OathResult<()>;
    async fn update_last_seen(&self, device_id: &DeviceId) -> OathResult<()>;
    async fn set_device_name(&self, device_id: &DeviceId, name: &str) -> OathResult<()>;
    async fn count_devices_with_name_prefix(&self, prefix: &str) -> OathResult<usize>;
    async fn save_credentials(&self, device_id: &DeviceId, credentials: &[OathCredential]) -> OathResult<()>;
    async fn get_credentials(&self, device_id: &DeviceId) -> OathResult<Vec<OathCredential>>;
    async fn clear_credentials(&self, device_id: &DeviceId) -> OathResult<()>;
}

/// Per-device password storage, expected to hold secrets only in
/// wipe-on-drop buffers at the call site (§9 design note).
#[async_trait]
pub trait DevicePasswordStore: Send + Sync {
    async fn load_password(&self, device_id: &DeviceId) -> OathResult<Option<secrecy::SecretString>>;
    async fn save_password(&self, device_id: &DeviceId, password: secrecy::SecretString) -> OathResult<()>;
    async fn delete_password(&self, device_id: &DeviceId) -> OathResult<()>;
}
