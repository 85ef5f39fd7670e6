/*
 * SPDX-FileCopyrightText: Copyright (c) 2026 Ferrite Project Contributors
 * SPDX-License-Identifier: Apache-2.0
 */
//! One module per controlled kind, plus the shared context and the
//! helpers common to the upgrade machines.

pub mod bios_version;
pub mod bmc;
pub mod bmc_user;
pub mod bmc_version;
pub mod context;
pub mod server;
pub mod server_bios;
pub mod server_cleaning;
pub mod server_maintenance;
pub mod set;
pub mod upgrade;
