/*
 * SPDX-FileCopyrightText: Copyright (c) 2026 Ferrite Project Contributors
 * SPDX-License-Identifier: Apache-2.0
 */
//! Wiring: registers every controller with its watches and runs the
//! runtime to completion.

use std::sync::Arc;

use bmc::BmcDriver;
use store::Store;
use tokio_util::sync::CancellationToken;

use crate::cfg::Options;
use crate::controllers::bios_version::BiosVersionController;
use crate::controllers::bmc::BmcController;
use crate::controllers::bmc_user::BmcUserController;
use crate::controllers::bmc_version::BmcVersionController;
use crate::controllers::context::Context;
use crate::controllers::server::ServerController;
use crate::controllers::server_bios::ServerBiosController;
use crate::controllers::server_cleaning::ServerCleaningController;
use crate::controllers::server_maintenance::ServerMaintenanceController;
use crate::controllers::set::{
    BiosVersionFanOut, BmcUserFanOut, BmcVersionFanOut, ServerMaintenanceFanOut, SetController,
};
use crate::runtime::Runtime;

/// Builds the full controller set over the given store and driver and
/// runs until the token is cancelled.
pub async fn run(
    opts: Options,
    store: Store,
    driver: Arc<dyn BmcDriver>,
    shutdown: CancellationToken,
) {
    let ctx = Context {
        store: store.clone(),
        driver,
        opts: opts.clone(),
    };
    let workers = opts.workers;
    let mut runtime = Runtime::new(store.clone(), opts.backoff(), opts.resync_interval);

    runtime.register(
        BmcController::new(ctx.clone()),
        BmcController::watches(&store),
        workers,
    );
    runtime.register(
        ServerController::new(ctx.clone()),
        ServerController::watches(&store),
        workers,
    );
    runtime.register(
        ServerMaintenanceController::new(ctx.clone()),
        ServerMaintenanceController::watches(&store),
        workers,
    );
    runtime.register(
        BmcVersionController::new(ctx.clone()),
        BmcVersionController::watches(&store),
        workers,
    );
    runtime.register(
        BiosVersionController::new(ctx.clone()),
        BiosVersionController::watches(&store),
        workers,
    );
    runtime.register(
        ServerBiosController::new(ctx.clone()),
        ServerBiosController::watches(&store),
        workers,
    );
    runtime.register(
        BmcUserController::new(ctx.clone()),
        BmcUserController::watches(&store),
        workers,
    );
    runtime.register(
        ServerCleaningController::new(ctx.clone()),
        ServerCleaningController::watches(&store),
        workers,
    );
    runtime.register(
        SetController::<BmcVersionFanOut>::new(ctx.clone()),
        SetController::<BmcVersionFanOut>::watches(&store),
        workers,
    );
    runtime.register(
        SetController::<BiosVersionFanOut>::new(ctx.clone()),
        SetController::<BiosVersionFanOut>::watches(&store),
        workers,
    );
    runtime.register(
        SetController::<BmcUserFanOut>::new(ctx.clone()),
        SetController::<BmcUserFanOut>::watches(&store),
        workers,
    );
    runtime.register(
        SetController::<ServerMaintenanceFanOut>::new(ctx),
        SetController::<ServerMaintenanceFanOut>::watches(&store),
        workers,
    );

    tracing::info!(namespace = opts.namespace, "controllers registered, starting runtime");
    runtime.start(shutdown).await;
}
