//! Entry point for the OATH device daemon binary.
//!
//! Initializes tracing, builds the device manager, starts reader monitoring,
//! and blocks until interrupted. IPC publication is out of scope: this binary
//! exists to prove the subsystem runs standalone and to host integration
//! smoke tests against a real PC/SC daemon.

use oath_daemon_lib::oath::config::OathConfig;
use oath_daemon_lib::oath::manager::DeviceManager;
use oath_daemon_lib::prelude::*;

#[tokio::main]
async fn main() {
    if let Err(e) = oath_daemon_lib::tracing_setup::init() {
        #[allow(clippy::print_stderr)]
        {
            eprintln!("Failed to initialize tracing: {e:?}");
        }
    }

    info!("OATH daemon starting");

    let config = OathConfig::default();
    let manager = match DeviceManager::new(config).await {
        Ok(manager) => manager,
        Err(e) => {
            error!(error = %e, "Failed to initialize PC/SC resource manager");
            std::process::exit(1);
        }
    };

    if let Err(e) = manager.start_monitoring().await {
        error!(error = %e, "Failed to start reader monitoring");
        std::process::exit(1);
    }

    info!("OATH daemon ready, watching for readers");

    let _ = tokio::signal::ctrl_c().await;
    info!("OATH daemon shutting down");
}
