/*
 * SPDX-FileCopyrightText: Copyright (c) 2026 Ferrite Project Contributors
 * SPDX-License-Identifier: Apache-2.0
 */
//! Configuration knobs of the controller process.

use std::time::Duration;

use clap::Parser;

fn parse_duration(value: &str) -> Result<Duration, String> {
    duration_str::parse(value).map_err(|e| e.to_string())
}

/// Runtime options. Every knob is settable by flag or environment
/// variable; tests build the struct directly.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "ferrite-controller",
    about = "Declarative control plane for fleets of bare-metal servers"
)]
pub struct Options {
    /// Namespace the controllers operate in.
    #[arg(long, env = "FERRITE_NAMESPACE", default_value = "default")]
    pub namespace: String,

    /// How often a healthy resource is re-examined without a triggering
    /// event, and how long to wait before re-probing an unreachable BMC.
    #[arg(long, env = "FERRITE_RESYNC_INTERVAL", default_value = "30s", value_parser = parse_duration)]
    pub resync_interval: Duration,

    /// Deadline for a single driver call against a BMC.
    #[arg(long, env = "FERRITE_REDFISH_TIMEOUT", default_value = "30s", value_parser = parse_duration)]
    pub redfish_timeout: Duration,

    /// Worker tasks per controller.
    #[arg(long, env = "FERRITE_WORKERS", default_value_t = 2)]
    pub workers: usize,

    /// First retry delay after a failed reconcile.
    #[arg(long, env = "FERRITE_BACKOFF_BASE", default_value = "500ms", value_parser = parse_duration)]
    pub backoff_base: Duration,

    /// Upper bound for the retry delay.
    #[arg(long, env = "FERRITE_BACKOFF_CAP", default_value = "5m", value_parser = parse_duration)]
    pub backoff_cap: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            namespace: "default".to_string(),
            resync_interval: Duration::from_secs(30),
            redfish_timeout: Duration::from_secs(30),
            workers: 2,
            backoff_base: Duration::from_millis(500),
            backoff_cap: Duration::from_secs(300),
        }
    }
}

impl Options {
    pub fn backoff(&self) -> crate::runtime::Backoff {
        crate::runtime::Backoff {
            base: self.backoff_base,
            cap: self.backoff_cap,
        }
    }
}
