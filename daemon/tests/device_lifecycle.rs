//! End-to-end device lifecycle: construction, credential cache fetch, code
//! generation, add/delete, and password authentication, all against
//! [`common::FakeTransport`] so no real reader is needed.

mod common;

use common::{FakeCredential, FakeTransport, FakeTransportOptions};
use oath_daemon_lib::oath::device::Device;
use oath_daemon_lib::oath::events::NullEventSink;
use oath_daemon_lib::oath::model::{Brand, DeviceId, DeviceState, OathAlgorithm, OathCredentialData, ReaderName};
use oath_daemon_lib::oath::pcsc_context::{CardHandle, CardProtocol};
use oath_daemon_lib::oath::worker_pool::WorkerPool;
use std::sync::Arc;
use std::time::Duration;

fn yubikey_capabilities() -> oath_daemon_lib::oath::model::Capabilities {
    oath_daemon_lib::oath::brand::detect_capabilities(Brand::YubiKey)
}

async fn build_device(transport: Arc<FakeTransport>, requires_password: bool) -> Arc<Device> {
    let worker_pool = Arc::new(WorkerPool::new(2));
    Device::new(
        DeviceId("DEADBEEF".to_string()),
        ReaderName::from("Fake Reader 0"),
        Brand::YubiKey,
        yubikey_capabilities(),
        requires_password,
        transport,
        CardHandle(1),
        CardProtocol::T1,
        0,
        Arc::new(NullEventSink),
        worker_pool,
    )
    .await
}

async fn wait_until_ready(device: &Device) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while device.state().await != DeviceState::Ready && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn construction_without_password_fetches_credentials_immediately() {
    let transport = Arc::new(FakeTransport::new(FakeTransportOptions {
        credentials: vec![FakeCredential { name: "Example:alice".to_string(), digits: 6, value: 3906, ..Default::default() }],
        ..Default::default()
    }));
    let device = build_device(transport, false).await;

    wait_until_ready(&device).await;
    assert_eq!(device.state().await, DeviceState::Ready);

    let credentials = device.credentials().await;
    assert_eq!(credentials.len(), 1);
    assert_eq!(credentials[0].issuer.as_deref(), Some("Example"));
    assert_eq!(credentials[0].account, "alice");
    assert!(credentials[0].is_totp);
}

#[tokio::test]
async fn generate_code_returns_device_supplied_truncated_value() {
    let transport = Arc::new(FakeTransport::new(FakeTransportOptions {
        credentials: vec![FakeCredential { name: "Example:alice".to_string(), digits: 6, value: 3906, ..Default::default() }],
        ..Default::default()
    }));
    let device = build_device(transport, false).await;
    wait_until_ready(&device).await;

    let code = device.generate_code("Example:alice").await.unwrap();
    assert_eq!(code, "003906");
}

#[tokio::test]
async fn generate_code_reports_credential_not_found() {
    let transport = Arc::new(FakeTransport::new(FakeTransportOptions::default()));
    let device = build_device(transport, false).await;
    wait_until_ready(&device).await;

    let err = device.generate_code("Missing:bob").await.unwrap_err();
    assert!(matches!(err, oath_daemon_lib::oath::error::OathError::CredentialNotFound));
}

#[tokio::test]
async fn add_then_delete_credential_round_trips_through_cache() {
    let transport = Arc::new(FakeTransport::new(FakeTransportOptions::default()));
    let device = build_device(transport, false).await;
    wait_until_ready(&device).await;

    let data = OathCredentialData {
        device_id: device.device_id().clone(),
        original_name: "Example:alice".to_string(),
        issuer: Some("Example".to_string()),
        account: "alice".to_string(),
        is_totp: true,
        algorithm: OathAlgorithm::Sha1,
        digits: 6,
        period: 30,
        counter: 0,
        requires_touch: false,
        secret: "JBSWY3DPEHPK3PXP".to_string(),
    };
    device.add_credential(&data).await.unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while device.credentials().await.is_empty() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(device.credentials().await.len(), 1);

    device.delete_credential("Example:alice").await.unwrap();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !device.credentials().await.is_empty() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(device.credentials().await.is_empty());
}

#[tokio::test]
async fn password_protected_device_requires_authentication_before_generate_code() {
    let transport = Arc::new(FakeTransport::new(FakeTransportOptions {
        requires_password: true,
        password: Some("hunter2".to_string()),
        credentials: vec![FakeCredential { name: "Example:alice".to_string(), digits: 6, value: 42, ..Default::default() }],
        ..Default::default()
    }));
    let device = build_device(transport, true).await;
    assert_eq!(device.state().await, DeviceState::Ready);
    assert!(device.has_password());

    device.authenticate_with_password("hunter2").await.unwrap();
    let code = device.generate_code("Example:alice").await.unwrap();
    assert_eq!(code, "000042");
}

#[tokio::test]
async fn wrong_password_is_rejected() {
    let transport = Arc::new(FakeTransport::new(FakeTransportOptions {
        requires_password: true,
        password: Some("hunter2".to_string()),
        ..Default::default()
    }));
    let device = build_device(transport, true).await;

    let err = device.authenticate_with_password("wrong").await.unwrap_err();
    assert!(matches!(err, oath_daemon_lib::oath::error::OathError::AuthenticationFailed));
}

#[tokio::test]
async fn change_password_clears_requirement_when_new_password_is_empty() {
    let transport = Arc::new(FakeTransport::new(FakeTransportOptions {
        requires_password: true,
        password: Some("hunter2".to_string()),
        ..Default::default()
    }));
    let device = build_device(transport, true).await;

    device.change_password("hunter2", "").await.unwrap();
    assert!(!device.requires_password());
}
