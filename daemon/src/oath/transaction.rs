//! Card-transaction guard (component F, §4.5).
//!
//! The only correct way to issue a multi-APDU sequence on a shared reader:
//! other applications may SELECT a different applet between transactions, so
//! every high-level operation opens its own transaction and reselects OATH.

use crate::oath::error::PcscResult;
use crate::oath::pcsc_context::{CardDisposition, CardHandle, PcscTransport};
use crate::prelude::*;
use std::sync::Arc;

/// RAII guard around `beginTransaction`/`endTransaction`. Always ends the
/// transaction on drop, including during unwinding.
pub struct CardTransaction {
    transport: Arc<dyn PcscTransport>,
    handle: CardHandle,
    active: bool,
}

impl CardTransaction {
    /// Opens a transaction. If `reselect_oath` is provided, it is invoked
    /// after the transaction opens; its failure does not prevent the guard
    /// from existing (the transaction remains active and will still be
    /// ended on drop), matching the source's "still active, still cleaned up"
    /// contract.
    pub fn begin(
        transport: Arc<dyn PcscTransport>,
        handle: CardHandle,
        reselect_oath: Option<impl FnOnce() -> PcscResult<()>>,
    ) -> PcscResult<Self> {
        transport.begin_transaction(handle)?;
        let guard = Self { transport, handle, active: true };
        if let Some(reselect) = reselect_oath {
            if let Err(e) = reselect() {
                warn!(error = %e, "re-select OATH failed after opening transaction");
            }
        }
        Ok(guard)
    }
}

impl Drop for CardTransaction {
    fn drop(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        if let Err(e) = self.transport.end_transaction(self.handle, CardDisposition::LeaveCard) {
            warn!(error = %e, "end_transaction failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oath::pcsc_context::{CardProtocol, ReaderCardState};
    use mockall::mock;

    mock! {
        Transport {}

        #[async_trait]
        impl PcscTransport for Transport {
            fn list_readers(&self) -> PcscResult<Vec<String>>;
            fn reader_card_state(&self, reader_name: &str) -> PcscResult<ReaderCardState>;
            fn connect(&self, reader_name: &str, timeout_ms: u64) -> PcscResult<(CardHandle, CardProtocol)>;
            fn reconnect(&self, handle: CardHandle, disposition: CardDisposition) -> PcscResult<CardProtocol>;
            fn disconnect(&self, handle: CardHandle, disposition: CardDisposition) -> PcscResult<()>;
            fn begin_transaction(&self, handle: CardHandle) -> PcscResult<()>;
            fn end_transaction(&self, handle: CardHandle, disposition: CardDisposition) -> PcscResult<()>;
            fn transmit(&self, handle: CardHandle, protocol: CardProtocol, command: &[u8]) -> PcscResult<Vec<u8>>;
            fn release(&self) -> PcscResult<()>;
            fn reestablish(&self) -> PcscResult<()>;
        }
    }

    #[test]
    fn transaction_ends_on_drop_exactly_once() {
        let mut mock = MockTransport::new();
        mock.expect_begin_transaction().times(1).returning(|_| Ok(()));
        mock.expect_end_transaction().times(1).returning(|_, _| Ok(()));
        let transport: Arc<dyn PcscTransport> = Arc::new(mock);
        let no_reselect: Option<fn() -> PcscResult<()>> = None;
        let txn = CardTransaction::begin(transport, CardHandle(1), no_reselect).unwrap();
        drop(txn);
    }
}
