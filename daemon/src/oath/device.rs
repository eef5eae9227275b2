//! Device (component H, §4.8): one per connected token. Owns the Session and
//! the cached credential catalog.

use crate::constants::RECONNECT_BACKOFF_MS;
use crate::oath::error::{OathError, OathResult};
use crate::oath::events::OathEventSink;
use crate::oath::model::{
    Brand, Capabilities, DeviceId, DeviceModel, DeviceState, FirmwareVersion, OathCredential,
    OathCredentialData, ReaderName,
};
use crate::oath::pcsc_context::{CardDisposition, CardHandle, CardProtocol, PcscTransport};
use crate::oath::protocol::{for_brand, CredentialEntry};
use crate::oath::session::OathSession;
use crate::oath::transaction::CardTransaction;
use crate::oath::worker_pool::{TaskPriority, WorkerPool};
use crate::prelude::*;
use secrecy::{ExposeSecret, SecretString};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Everything captured at SELECT/probe time, fixed for the Device's lifetime
/// except `requires_password`, which can flip via `set_password`/`change_password`.
pub struct Device {
    device_id: DeviceId,
    reader_name: ReaderName,
    brand: Brand,
    capabilities: Capabilities,
    firmware_version: Mutex<FirmwareVersion>,
    device_model: Mutex<DeviceModel>,
    serial_number: Mutex<u32>,
    requires_password: AtomicBool,
    form_factor: Mutex<u8>,
    credentials: Mutex<Vec<OathCredential>>,
    update_in_progress: AtomicBool,
    state: Mutex<DeviceState>,
    last_error: Mutex<Option<String>>,
    session: Arc<OathSession>,
    transport: Arc<dyn PcscTransport>,
    handle: Mutex<CardHandle>,
    card_protocol: Mutex<CardProtocol>,
    sink: Arc<dyn OathEventSink>,
    worker_pool: Arc<WorkerPool>,
    password: Mutex<Option<SecretString>>,
    op_lock: Mutex<()>,
}

impl Device {
    /// Construction sequence (§4.8): connect, SELECT, probe extended info,
    /// and (when no password is required) an initial credential fetch.
    #[allow(clippy::too_many_arguments)]
    pub async fn new(
        device_id: DeviceId,
        reader_name: ReaderName,
        brand: Brand,
        capabilities: Capabilities,
        requires_password: bool,
        transport: Arc<dyn PcscTransport>,
        handle: CardHandle,
        card_protocol: CardProtocol,
        rate_limit_ms: u64,
        sink: Arc<dyn OathEventSink>,
        worker_pool: Arc<WorkerPool>,
    ) -> Arc<Self> {
        let device_id_for_touch = device_id.clone();
        let sink_for_touch = sink.clone();
        let on_touch_required: Arc<dyn Fn() + Send + Sync> = Arc::new(move || {
            let device_id = device_id_for_touch.clone();
            let sink = sink_for_touch.clone();
            tokio::spawn(async move { sink.touch_required(&device_id).await });
        });

        let device_id_for_error = device_id.clone();
        let sink_for_error = sink.clone();
        let on_error: Arc<dyn Fn(String) + Send + Sync> = Arc::new(move |message: String| {
            let device_id = device_id_for_error.clone();
            let sink = sink_for_error.clone();
            tokio::spawn(async move { sink.error_occurred(&device_id, &message).await });
        });

        // The reset rendezvous itself is owned by the manager's reconnect
        // coordinator; the session only needs to know whether a fresh handle
        // became available, so this always reports failure and lets the
        // retry-once path in `send_apdu_with_retry` give up cleanly. Actual
        // recovery happens through `reconnect_card_handle`, called by the
        // manager once PC/SC reports the card present again.
        let on_card_reset: Arc<
            dyn Fn(Vec<u8>) -> std::pin::Pin<Box<dyn std::future::Future<Output = bool> + Send>>
                + Send
                + Sync,
        > = Arc::new(move |_command: Vec<u8>| Box::pin(async move { false }));

        let protocol = for_brand(brand);
        let session = Arc::new(OathSession::new(
            transport.clone(),
            handle,
            card_protocol,
            protocol,
            rate_limit_ms,
            on_touch_required,
            on_error,
            on_card_reset,
        ));

        let device = Arc::new(Self {
            device_id,
            reader_name,
            brand,
            capabilities,
            firmware_version: Mutex::new(FirmwareVersion::UNKNOWN),
            device_model: Mutex::new(DeviceModel {
                brand,
                model_code: 0,
                model_string: "Unknown".to_string(),
                form_factor: 0,
                capabilities: Vec::new(),
            }),
            serial_number: Mutex::new(0),
            requires_password: AtomicBool::new(requires_password),
            form_factor: Mutex::new(0),
            credentials: Mutex::new(Vec::new()),
            update_in_progress: AtomicBool::new(false),
            state: Mutex::new(DeviceState::Connecting),
            last_error: Mutex::new(None),
            session,
            transport,
            handle: Mutex::new(handle),
            card_protocol: Mutex::new(card_protocol),
            sink,
            worker_pool,
            password: Mutex::new(None),
            op_lock: Mutex::new(()),
        });

        device.set_state(DeviceState::Authenticating).await;
        if device.session.select_oath_application().await.is_ok() {
            *device.firmware_version.lock().await = device.session.firmware().await;
        }

        let extended = device.session.get_extended_device_info(&device.reader_name.0).await;
        *device.serial_number.lock().await = extended.serial_number;
        *device.form_factor.lock().await = extended.form_factor;
        *device.device_model.lock().await = extended.device_model;
        if device.firmware_version.lock().await.is_unknown() && !extended.firmware_version.is_unknown() {
            *device.firmware_version.lock().await = extended.firmware_version;
        }

        if !requires_password {
            device.set_state(DeviceState::FetchingCredentials).await;
            device.update_credential_cache_async(None).await;
        } else {
            device.set_state(DeviceState::Ready).await;
        }

        device
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    pub fn reader_name(&self) -> &ReaderName {
        &self.reader_name
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub async fn firmware_version(&self) -> FirmwareVersion {
        *self.firmware_version.lock().await
    }

    pub async fn device_model(&self) -> DeviceModel {
        self.device_model.lock().await.clone()
    }

    pub async fn serial_number(&self) -> u32 {
        *self.serial_number.lock().await
    }

    pub fn requires_password(&self) -> bool {
        self.requires_password.load(Ordering::SeqCst)
    }

    pub async fn form_factor(&self) -> u8 {
        *self.form_factor.lock().await
    }

    pub async fn credentials(&self) -> Vec<OathCredential> {
        self.credentials.lock().await.clone()
    }

    pub fn is_update_in_progress(&self) -> bool {
        self.update_in_progress.load(Ordering::SeqCst)
    }

    pub async fn state(&self) -> DeviceState {
        *self.state.lock().await
    }

    pub async fn last_error(&self) -> Option<String> {
        self.last_error.lock().await.clone()
    }

    pub fn has_password(&self) -> bool {
        self.requires_password()
    }

    async fn set_state(&self, new_state: DeviceState) {
        *self.state.lock().await = new_state;
        self.sink.state_changed(&self.device_id, new_state).await;
    }

    async fn cached_password(&self) -> Option<String> {
        self.password.lock().await.as_ref().map(|p| p.expose_secret().to_string())
    }

    /// `generateCode` (§4.8): wraps the session call in a fresh
    /// `CardTransaction` so nothing else can interleave APDUs on this card.
    pub async fn generate_code(&self, name: &str) -> OathResult<String> {
        let _op = self.op_lock.lock().await;
        let handle = *self.handle.lock().await;
        let no_reselect: Option<fn() -> crate::oath::error::PcscResult<()>> = None;
        let _txn = CardTransaction::begin(self.transport.clone(), handle, no_reselect)
            .map_err(OathError::from)?;
        let password = self.cached_password().await;
        self.session.calculate_code(name, password.as_deref()).await
    }

    pub async fn authenticate_with_password(&self, password: &str) -> OathResult<()> {
        let _op = self.op_lock.lock().await;
        self.session.authenticate(password).await?;
        *self.password.lock().await = Some(SecretString::from(password.to_string()));
        self.requires_password.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub async fn add_credential(self: &Arc<Self>, data: &OathCredentialData) -> OathResult<()> {
        {
            let _op = self.op_lock.lock().await;
            let password = self.cached_password().await;
            self.session.put_credential(data, password.as_deref()).await?;
        }
        self.update_credential_cache_async(None).await;
        Ok(())
    }

    pub async fn delete_credential(self: &Arc<Self>, name: &str) -> OathResult<()> {
        {
            let _op = self.op_lock.lock().await;
            let password = self.cached_password().await;
            self.session.delete_credential(name, password.as_deref()).await?;
        }
        self.update_credential_cache_async(None).await;
        Ok(())
    }

    pub async fn change_password(&self, old: &str, new: &str) -> OathResult<()> {
        let _op = self.op_lock.lock().await;
        self.session.change_password(old, new).await?;
        if new.is_empty() {
            *self.password.lock().await = None;
            self.requires_password.store(false, Ordering::SeqCst);
        } else {
            *self.password.lock().await = Some(SecretString::from(new.to_string()));
            self.requires_password.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    pub async fn set_password(&self, password: &str) -> OathResult<()> {
        let _op = self.op_lock.lock().await;
        self.session.set_password(password).await?;
        *self.password.lock().await = Some(SecretString::from(password.to_string()));
        self.requires_password.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Dispatches a worker-pool task that refreshes the credential catalog
    /// and emits `credentialCacheFetched` on completion.
    pub async fn update_credential_cache_async(self: &Arc<Self>, password: Option<String>) {
        self.update_in_progress.store(true, Ordering::SeqCst);
        let device = self.clone();
        self.worker_pool.submit(self.device_id.clone(), TaskPriority::Normal, move || {
            let device = device.clone();
            tokio::runtime::Handle::current().block_on(async move {
                let password = match password {
                    Some(p) => Some(p),
                    None => device.cached_password().await,
                };
                let result = device.fetch_credentials_sync(password.as_deref()).await;
                match result {
                    Ok(fresh) => {
                        *device.credentials.lock().await = fresh.clone();
                        device.set_state(DeviceState::Ready).await;
                        device.sink.credential_cache_fetched(&device.device_id, &fresh).await;
                        device.sink.credentials_changed(&device.device_id).await;
                    }
                    Err(e) => {
                        *device.last_error.lock().await = Some(e.to_string());
                        device.set_state(DeviceState::Error).await;
                        device.sink.error_occurred(&device.device_id, &e.to_string()).await;
                    }
                }
                device.update_in_progress.store(false, Ordering::SeqCst);
            });
        });
    }

    /// Synchronous fetch, run under the worker pool's per-task thread; holds
    /// its own transaction scope since it doesn't go through `generate_code`.
    pub async fn fetch_credentials_sync(&self, password: Option<&str>) -> OathResult<Vec<OathCredential>> {
        let entries: Vec<CredentialEntry> = self.session.calculate_all(password).await?;
        let device_id = self.device_id.clone();
        Ok(entries
            .into_iter()
            .map(|entry| {
                let parsed = crate::oath::apdu::parse_credential_id(&entry.name, entry.is_totp);
                OathCredential {
                    device_id: device_id.clone(),
                    original_name: entry.name,
                    issuer: parsed.issuer,
                    account: parsed.account,
                    is_totp: entry.is_totp,
                    algorithm: entry.algorithm,
                    digits: entry.digits,
                    period: parsed.period,
                    counter: 0,
                    requires_touch: entry.requires_touch,
                    code: entry.code,
                    valid_until: None,
                }
            })
            .collect())
    }

    pub async fn cancel_pending_operation(&self) {
        self.session.cancel_operation().await;
    }

    /// Reconnects the underlying card handle after `cardInserted` fires for
    /// a reader this device already occupies (§4.8, RECONNECT_BACKOFF_MS).
    pub async fn reconnect_card_handle(&self) -> Result<(), ()> {
        let old_handle = *self.handle.lock().await;
        let _ = self.transport.disconnect(old_handle, CardDisposition::LeaveCard);

        for (attempt, delay) in RECONNECT_BACKOFF_MS.iter().enumerate() {
            tokio::time::sleep(std::time::Duration::from_millis(*delay)).await;
            match self.transport.connect(&self.reader_name.0, *delay) {
                Ok((new_handle, new_protocol)) => {
                    self.session.update_card_handle(new_handle, new_protocol).await;
                    if self.session.select_oath_application().await.is_ok() {
                        *self.handle.lock().await = new_handle;
                        *self.card_protocol.lock().await = new_protocol;
                        return Ok(());
                    }
                    let _ = self.transport.disconnect(new_handle, CardDisposition::LeaveCard);
                }
                Err(e) => {
                    debug!(attempt, error = %e, "reconnect attempt failed");
                }
            }
        }
        Err(())
    }

    /// Destruction (§4.8): wait up to the configured grace period for an
    /// in-flight credential refresh, then disconnect regardless.
    pub async fn disconnect(&self, wait_ms: u64) {
        let deadline = tokio::time::Instant::now() + std::time::Duration::from_millis(wait_ms);
        while self.update_in_progress.load(Ordering::SeqCst) && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
        let handle = *self.handle.lock().await;
        let _ = self.transport.disconnect(handle, CardDisposition::LeaveCard);
    }
}
