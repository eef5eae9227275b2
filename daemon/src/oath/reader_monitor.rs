//! Reader monitor (component I, §4.9).
//!
//! Owns only a borrowed transport handle, its poll timer, and the
//! previous-snapshot state. Never touches card handles.

use crate::oath::events::OathEventSink;
use crate::oath::model::ReaderName;
use crate::oath::pcsc_context::{PcscTransport, ReaderCardState};
use crate::prelude::*;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

struct Snapshot {
    readers: HashSet<String>,
    present: HashSet<String>,
}

pub struct ReaderMonitor {
    transport: Arc<dyn PcscTransport>,
    sink: Arc<dyn OathEventSink>,
    poll_interval_ms: u64,
    snapshot: Arc<Mutex<Snapshot>>,
    running: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ReaderMonitor {
    pub fn new(transport: Arc<dyn PcscTransport>, sink: Arc<dyn OathEventSink>, poll_interval_ms: u64) -> Self {
        Self {
            transport,
            sink,
            poll_interval_ms,
            snapshot: Arc::new(Mutex::new(Snapshot { readers: HashSet::new(), present: HashSet::new() })),
            running: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
        }
    }

    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let transport = self.transport.clone();
        let sink = self.sink.clone();
        let snapshot = self.snapshot.clone();
        let running = self.running.clone();
        let poll_interval = self.poll_interval_ms;

        let handle = tokio::spawn(async move {
            while running.load(Ordering::SeqCst) {
                if let Err(e) = poll_once(&transport, &sink, &snapshot).await {
                    if matches!(e, crate::oath::error::PcscError::NoService) {
                        error!("PC/SC service lost; reader monitor stopping");
                        sink.pcsc_service_lost().await;
                        running.store(false, Ordering::SeqCst);
                        break;
                    }
                    debug!(error = %e, "reader poll failed");
                }
                tokio::time::sleep(std::time::Duration::from_millis(poll_interval)).await;
            }
        });
        *self.handle.lock().await = Some(handle);
    }

    /// Stops the monitor and clears its snapshot, in preparation for a later
    /// `start_monitoring()` after PC/SC-loss recovery.
    pub async fn stop_and_reset(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(h) = self.handle.lock().await.take() {
            h.abort();
        }
        let mut snapshot = self.snapshot.lock().await;
        snapshot.readers.clear();
        snapshot.present.clear();
    }
}

async fn poll_once(
    transport: &Arc<dyn PcscTransport>,
    sink: &Arc<dyn OathEventSink>,
    snapshot: &Arc<Mutex<Snapshot>>,
) -> Result<(), crate::oath::error::PcscError> {
    let readers = transport.list_readers()?;
    let current: HashSet<String> = readers.iter().cloned().collect();

    let mut guard = snapshot.lock().await;
    if current != guard.readers {
        guard.readers = current.clone();
        drop(guard);
        sink.reader_list_changed().await;
        guard = snapshot.lock().await;
    }

    let mut present_now = HashSet::new();
    for reader in &readers {
        if let Ok(ReaderCardState::Present) = transport.reader_card_state(reader) {
            present_now.insert(reader.clone());
        }
    }

    let newly_inserted: Vec<String> = present_now.difference(&guard.present).cloned().collect();
    let newly_removed: Vec<String> = guard.present.difference(&present_now).cloned().collect();
    guard.present = present_now;
    drop(guard);

    for reader in newly_inserted {
        sink.card_inserted(&ReaderName(reader)).await;
    }
    for reader in newly_removed {
        sink.card_removed(&ReaderName(reader)).await;
    }

    Ok(())
}
