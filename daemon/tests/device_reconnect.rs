//! `Device::reconnect_card_handle` against a transport whose first connect
//! attempts fail, exercising the backoff retry loop.

mod common;

use common::{FakeTransport, FakeTransportOptions};
use oath_daemon_lib::oath::device::Device;
use oath_daemon_lib::oath::events::NullEventSink;
use oath_daemon_lib::oath::model::{Brand, DeviceId, ReaderName};
use oath_daemon_lib::oath::pcsc_context::{CardHandle, CardProtocol};
use oath_daemon_lib::oath::worker_pool::WorkerPool;
use std::sync::Arc;

#[tokio::test]
async fn reconnect_succeeds_after_transient_connect_failures() {
    let transport = Arc::new(FakeTransport::new(FakeTransportOptions {
        connect_failures: 2,
        ..Default::default()
    }));
    let worker_pool = Arc::new(WorkerPool::new(2));
    let device = Device::new(
        DeviceId("DEADBEEF".to_string()),
        ReaderName::from("Fake Reader 0"),
        Brand::YubiKey,
        oath_daemon_lib::oath::brand::detect_capabilities(Brand::YubiKey),
        false,
        transport,
        CardHandle(1),
        CardProtocol::T1,
        0,
        Arc::new(NullEventSink),
        worker_pool,
    )
    .await;

    // The initial connect/select already succeeded at construction time (the
    // fake's `connect_failures` only gates calls made after construction);
    // reconnect re-disconnects and re-dials, so it sees exactly the 2
    // configured failures before succeeding on its third attempt.
    let result = device.reconnect_card_handle().await;
    assert!(result.is_ok());

    let code_result = device.generate_code("anything").await;
    assert!(code_result.is_err(), "no credential named 'anything' exists, but the session should still respond");
}

#[tokio::test]
async fn reconnect_gives_up_after_exhausting_backoff_schedule() {
    let transport = Arc::new(FakeTransport::new(FakeTransportOptions {
        connect_failures: 100,
        ..Default::default()
    }));
    let worker_pool = Arc::new(WorkerPool::new(2));
    let device = Device::new(
        DeviceId("DEADBEEF".to_string()),
        ReaderName::from("Fake Reader 0"),
        Brand::YubiKey,
        oath_daemon_lib::oath::brand::detect_capabilities(Brand::YubiKey),
        false,
        transport,
        CardHandle(1),
        CardProtocol::T1,
        0,
        Arc::new(NullEventSink),
        worker_pool,
    )
    .await;

    let result = device.reconnect_card_handle().await;
    assert!(result.is_err());
}
