//! Device manager (component L, §4.11): owns the process-wide PC/SC context,
//! the reader monitor, the reconnect coordinator, and the device/reader maps.

use crate::oath::brand::{detect_brand, detect_capabilities};
use crate::oath::config::OathConfig;
use crate::oath::device::Device;
use crate::oath::error::ManagerResult;
use crate::oath::events::{NullEventSink, OathEventSink};
use crate::oath::model::{DeviceId, DeviceState, FirmwareVersion, OathCredential, ReaderName};
use crate::oath::pcsc_context::{CardDisposition, PcscContext, PcscTransport};
use crate::oath::protocol::for_brand;
use crate::oath::reconnect::{ReconnectCoordinator, ReconnectFn};
use crate::oath::reader_monitor::ReaderMonitor;
use crate::oath::session::OathSession;
use crate::oath::worker_pool::WorkerPool;
use crate::prelude::*;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use tokio::sync::Mutex;

/// `handlePcscServiceLost` step 4: fixed recovery delay, not one of
/// [`OathConfig`]'s tunables since it is a one-shot backoff, not a rate.
const PCSC_SERVICE_LOST_RETRY_DELAY_MS: u64 = 500;

pub struct DeviceManager {
    config: OathConfig,
    transport: Arc<dyn PcscTransport>,
    external_sink: Arc<dyn OathEventSink>,
    devices: Mutex<HashMap<DeviceId, Arc<Device>>>,
    reader_to_device: Mutex<HashMap<ReaderName, DeviceId>>,
    reader_monitor: ReaderMonitor,
    reconnect: ReconnectCoordinator,
    worker_pool: Arc<WorkerPool>,
}

impl DeviceManager {
    pub async fn new(config: OathConfig) -> ManagerResult<Arc<Self>> {
        Self::with_sink(config, Arc::new(NullEventSink)).await
    }

    pub async fn with_sink(config: OathConfig, external_sink: Arc<dyn OathEventSink>) -> ManagerResult<Arc<Self>> {
        let config = config.normalized();
        let transport: Arc<dyn PcscTransport> = Arc::new(PcscContext::establish()?);
        let worker_pool = Arc::new(WorkerPool::new(config.worker_pool_max_threads));

        let manager = Arc::new_cyclic(|weak: &Weak<DeviceManager>| {
            let internal_sink: Arc<dyn OathEventSink> =
                Arc::new(ManagerSink { manager: weak.clone(), external: external_sink.clone() });
            let reader_monitor = ReaderMonitor::new(transport.clone(), internal_sink, config.reader_poll_interval_ms);
            let reconnect = ReconnectCoordinator::new(
                config.device_reconnect_initial_delay_ms,
                |device_id| debug!(device_id = %device_id, "reconnect started"),
                |device_id, success| debug!(device_id = %device_id, success, "reconnect completed"),
            );

            Self {
                config,
                transport,
                external_sink,
                devices: Mutex::new(HashMap::new()),
                reader_to_device: Mutex::new(HashMap::new()),
                reader_monitor,
                reconnect,
                worker_pool,
            }
        });

        let weak_for_fn = Arc::downgrade(&manager);
        let reconnect_fn: ReconnectFn = Arc::new(move |reader_name: ReaderName| {
            let manager = weak_for_fn.clone();
            Box::pin(async move {
                let Some(manager) = manager.upgrade() else { return Err(()) };
                let device_id = manager.reader_to_device.lock().await.get(&reader_name).cloned();
                let Some(device_id) = device_id else { return Err(()) };
                let device = manager.devices.lock().await.get(&device_id).cloned();
                let Some(device) = device else { return Err(()) };
                device.reconnect_card_handle().await
            })
        });
        manager.reconnect.set_reconnect_fn(reconnect_fn).await;

        Ok(manager)
    }

    /// `startMonitoring` (§4.11): starts the reader monitor and schedules an
    /// async enumerate-and-connect pass; does not block on it.
    pub async fn start_monitoring(self: &Arc<Self>) -> ManagerResult<()> {
        self.reader_monitor.start().await;
        let manager = self.clone();
        tokio::spawn(async move { manager.enumerate_and_connect().await });
        Ok(())
    }

    async fn enumerate_and_connect(self: &Arc<Self>) {
        let readers = match self.transport.list_readers() {
            Ok(readers) => readers,
            Err(e) => {
                warn!(error = %e, "enumerate readers failed");
                return;
            }
        };
        let bound = self.reader_to_device.lock().await;
        let to_connect: Vec<String> =
            readers.into_iter().filter(|r| !bound.contains_key(&ReaderName(r.clone()))).collect();
        drop(bound);
        for reader in to_connect {
            self.connect_to_device(ReaderName(reader)).await;
        }
    }

    /// `connectToDevice` (§4.11).
    async fn connect_to_device(self: &Arc<Self>, reader_name: ReaderName) {
        let (handle, card_protocol) =
            match self.transport.connect(&reader_name.0, self.config.device_connect_timeout_ms) {
                Ok(pair) => pair,
                Err(e) => {
                    debug!(reader = %reader_name, error = %e, "platform-connect failed");
                    return;
                }
            };

        let preliminary_brand = detect_brand(&reader_name.0, FirmwareVersion::UNKNOWN, false);
        let probe_protocol = for_brand(preliminary_brand);
        let probe_session = OathSession::new(
            self.transport.clone(),
            handle,
            card_protocol,
            probe_protocol,
            0,
            Arc::new(|| {}),
            Arc::new(|_msg: String| {}),
            Arc::new(|_cmd: Vec<u8>| Box::pin(async move { false })),
        );

        if probe_session.select_oath_application().await.is_err() {
            let _ = self.transport.disconnect(handle, CardDisposition::ResetCard);
            return;
        }

        let device_id_bytes = probe_session.device_id_bytes().await.unwrap_or_default();
        let requires_password = probe_session.requires_password().await;
        let serial_from_select = probe_session.serial_from_select().await;
        let firmware = probe_session.firmware().await;

        let brand = detect_brand(&reader_name.0, firmware, serial_from_select.is_some());
        let capabilities = detect_capabilities(brand);
        let device_id = DeviceId::from_hex_bytes(&device_id_bytes);

        if let Some(old) = self.devices.lock().await.remove(&device_id) {
            old.disconnect(0).await;
        }

        let device = Device::new(
            device_id.clone(),
            reader_name.clone(),
            brand,
            capabilities,
            requires_password,
            self.transport.clone(),
            handle,
            card_protocol,
            self.config.pcsc_rate_limit_ms,
            self.external_sink.clone(),
            self.worker_pool.clone(),
        )
        .await;

        self.devices.lock().await.insert(device_id.clone(), device);
        self.reader_to_device.lock().await.insert(reader_name, device_id.clone());
        self.external_sink.device_connected(&device_id).await;
    }

    /// `disconnectDevice` (§4.11).
    async fn disconnect_device(&self, device_id: &DeviceId) {
        let device = self.devices.lock().await.remove(device_id);
        self.reader_to_device.lock().await.retain(|_, id| *id != *device_id);
        if let Some(device) = device {
            device.disconnect(self.config.credential_update_wait_ms_on_destroy).await;
        }
        self.external_sink.device_disconnected(device_id).await;
        self.external_sink.credentials_changed(device_id).await;
    }

    /// `forgetDevice` (§4.11): always emits, even when nothing was present.
    pub async fn forget_device(&self, device_id: &DeviceId) {
        if let Some(device) = self.devices.lock().await.remove(device_id) {
            self.reader_to_device.lock().await.retain(|_, id| *id != *device_id);
            device.disconnect(0).await;
        }
        self.external_sink.device_forgotten(device_id).await;
    }

    /// `handlePcscServiceLost` (§4.11): six-step recovery.
    async fn handle_pcsc_service_lost(self: &Arc<Self>) {
        warn!("PC/SC service lost, starting recovery");
        self.reader_monitor.stop_and_reset().await;

        let stale: Vec<DeviceId> = self.devices.lock().await.keys().cloned().collect();
        self.devices.lock().await.clear();
        self.reader_to_device.lock().await.clear();
        for device_id in stale {
            self.external_sink.device_disconnected(&device_id).await;
        }

        let _ = self.transport.release();
        tokio::time::sleep(std::time::Duration::from_millis(PCSC_SERVICE_LOST_RETRY_DELAY_MS)).await;
        if let Err(e) = self.transport.reestablish() {
            error!(error = %e, "failed to re-establish PC/SC context after service loss");
            return;
        }

        self.reader_monitor.start().await;
        let manager = self.clone();
        tokio::spawn(async move { manager.enumerate_and_connect().await });
    }

    /// Compares the live reader set to the current reader-to-device mapping:
    /// devices whose reader vanished are disconnected, new readers are
    /// scheduled for a connect attempt.
    async fn handle_reader_list_changed(self: &Arc<Self>) {
        let readers: HashSet<String> = match self.transport.list_readers() {
            Ok(r) => r.into_iter().collect(),
            Err(_) => return,
        };

        let bound = self.reader_to_device.lock().await.clone();
        for (reader, device_id) in bound.iter() {
            if !readers.contains(&reader.0) {
                self.disconnect_device(device_id).await;
            }
        }

        let new_readers: Vec<String> =
            readers.into_iter().filter(|r| !bound.contains_key(&ReaderName(r.clone()))).collect();
        for reader in new_readers {
            self.connect_to_device(ReaderName(reader)).await;
        }
    }

    /// `cardInserted` (§4.11): ignores a reader already bound to a live
    /// device (a duplicate event).
    async fn on_card_inserted(self: &Arc<Self>, reader_name: ReaderName) {
        if self.reader_to_device.lock().await.contains_key(&reader_name) {
            return;
        }
        self.connect_to_device(reader_name).await;
    }

    /// `cardRemoved` (§4.11).
    async fn on_card_removed(self: &Arc<Self>, reader_name: ReaderName) {
        let device_id = self.reader_to_device.lock().await.get(&reader_name).cloned();
        if let Some(device_id) = device_id {
            self.disconnect_device(&device_id).await;
        }
    }
}

/// Wraps the caller's event sink so reader/card events can drive the
/// manager's own connect/disconnect logic before (and regardless of) being
/// forwarded outward.
struct ManagerSink {
    manager: Weak<DeviceManager>,
    external: Arc<dyn OathEventSink>,
}

#[async_trait]
impl OathEventSink for ManagerSink {
    async fn device_connected(&self, device_id: &DeviceId) {
        self.external.device_connected(device_id).await;
    }

    async fn device_disconnected(&self, device_id: &DeviceId) {
        self.external.device_disconnected(device_id).await;
    }

    async fn device_forgotten(&self, device_id: &DeviceId) {
        self.external.device_forgotten(device_id).await;
    }

    async fn credentials_changed(&self, device_id: &DeviceId) {
        self.external.credentials_changed(device_id).await;
    }

    async fn state_changed(&self, device_id: &DeviceId, state: DeviceState) {
        self.external.state_changed(device_id, state).await;
    }

    async fn touch_required(&self, device_id: &DeviceId) {
        self.external.touch_required(device_id).await;
    }

    async fn error_occurred(&self, device_id: &DeviceId, message: &str) {
        self.external.error_occurred(device_id, message).await;
    }

    async fn credential_cache_fetched(&self, device_id: &DeviceId, credentials: &[OathCredential]) {
        self.external.credential_cache_fetched(device_id, credentials).await;
    }

    async fn reader_list_changed(&self) {
        if let Some(manager) = self.manager.upgrade() {
            manager.handle_reader_list_changed().await;
        }
        self.external.reader_list_changed().await;
    }

    async fn card_inserted(&self, reader_name: &ReaderName) {
        if let Some(manager) = self.manager.upgrade() {
            manager.on_card_inserted(reader_name.clone()).await;
        }
        self.external.card_inserted(reader_name).await;
    }

    async fn card_removed(&self, reader_name: &ReaderName) {
        if let Some(manager) = self.manager.upgrade() {
            manager.on_card_removed(reader_name.clone()).await;
        }
        self.external.card_removed(reader_name).await;
    }

    async fn pcsc_service_lost(&self) {
        if let Some(manager) = self.manager.upgrade() {
            tokio::spawn(async move { manager.handle_pcsc_service_lost().await });
        }
        self.external.pcsc_service_lost().await;
    }
}
