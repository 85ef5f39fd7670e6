/*
 * SPDX-FileCopyrightText: Copyright (c) 2026 Ferrite Project Contributors
 * SPDX-License-Identifier: Apache-2.0
 */
use std::sync::Arc;

use clap::Parser;
use ferrite::Options;
use tokio_util::sync::CancellationToken;

/// Entry point for the local harness: an in-process store plus the mock
/// BMC fleet (the `redfishLocal` protocol variant). Production transports
/// plug in through the same `run()` wiring.
#[tokio::main]
async fn main() -> eyre::Result<()> {
    let opts = Options::parse();
    ferrite::logging::setup()?;

    let store = store::Store::new();
    let registry = bmc_mock::MockRegistry::new();
    let driver = Arc::new(bmc_mock::MockDriver::new(registry));

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown requested");
                shutdown.cancel();
            }
        });
    }

    ferrite::run(opts, store, driver, shutdown).await;
    Ok(())
}
