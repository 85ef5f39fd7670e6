/*
 * SPDX-FileCopyrightText: Copyright (c) 2026 Ferrite Project Contributors
 * SPDX-License-Identifier: Apache-2.0
 */
//! Aggregate status shared by every Set resource.

use serde::{Deserialize, Serialize};

/// Counts aggregated from the children a Set fans out to. `fully_labeled`
/// counts the targets currently matching the selector; the remaining
/// fields bucket the owned children by their reported state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct SetStatus {
    pub fully_labeled: i32,
    pub available: i32,
    pub pending: i32,
    pub in_progress: i32,
    pub completed: i32,
    pub failed: i32,
}
