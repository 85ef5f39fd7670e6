/*
 * SPDX-FileCopyrightText: Copyright (c) 2026 Ferrite Project Contributors
 * SPDX-License-Identifier: Apache-2.0
 */
//! Annotation keys and operation verbs recognised by the controllers.

/// Annotation key carrying an operation request on the target resource.
pub const OPERATION: &str = "metal.dev/operation";

/// Issue a graceful manager reset. Valid on a BMC; cleared once the reset
/// is observed complete.
pub const OPERATION_GRACEFUL_RESTART_BMC: &str = "GracefulRestartBMC";

/// Re-enter `pending` from `failed`. Valid on BMCVersion and BIOSVersion.
pub const OPERATION_RETRY_FAILED: &str = "RetryFailed";

/// Force an immediate credential rotation. Valid on a BMCUser.
pub const OPERATION_ROTATE_CREDENTIALS: &str = "RotateCredentials";

/// Skip reconciliation of the annotated resource until removed.
pub const OPERATION_IGNORE_RECONCILE: &str = "IgnoreReconcile";

/// Annotation key on a ServerClaim approving a pending `ownerApproval`
/// maintenance lease. The recognised value is `"true"`.
pub const SERVER_MAINTENANCE_APPROVAL: &str = "metal.dev/serverMaintenanceApproval";

/// Whether reconciliation of the given annotations is suspended.
pub fn ignore_reconcile(annotations: &std::collections::BTreeMap<String, String>) -> bool {
    annotations
        .get(OPERATION)
        .is_some_and(|v| v == OPERATION_IGNORE_RECONCILE)
}
