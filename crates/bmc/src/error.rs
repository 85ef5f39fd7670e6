/*
 * SPDX-FileCopyrightText: Copyright (c) 2026 Ferrite Project Contributors
 * SPDX-License-Identifier: Apache-2.0
 */
/// Error taxonomy of the driver interface.
///
/// Controllers branch on three distinctions: is the BMC unreachable
/// (retry with backoff), did it reject our credentials (leave effective
/// credentials untouched), and did the vendor reject an operation for good
/// (terminal failure).
#[derive(Debug, thiserror::Error)]
pub enum BmcError {
    /// Connection refused, timeout, 5xx. Always retriable.
    #[error("transport error talking to BMC: {0}")]
    Transport(String),

    /// HTTP 401/403 from the BMC.
    #[error("BMC rejected the credentials")]
    Unauthorized,

    /// The task URI is no longer known to the BMC.
    #[error("task not found on BMC: {0}")]
    TaskNotFound(String),

    /// The vendor rejected the request in a way that retrying cannot fix
    /// (unsupported image, wrong component, downgrade lockout).
    #[error("BMC rejected the request: {0}")]
    VendorRejected(String),

    /// A referenced entity (system, account, attribute) does not exist.
    #[error("not found on BMC: {0}")]
    NotFound(String),

    /// The request was malformed before it left the controller.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl BmcError {
    /// Fatal errors map to terminal `failed` states; everything else is
    /// retried.
    pub fn is_fatal(&self) -> bool {
        matches!(self, BmcError::VendorRejected(_) | BmcError::InvalidRequest(_))
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, BmcError::Unauthorized)
    }

    pub fn is_task_not_found(&self) -> bool {
        matches!(self, BmcError::TaskNotFound(_))
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, BmcError::Transport(_))
    }
}
