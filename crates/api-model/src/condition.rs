/*
 * SPDX-FileCopyrightText: Copyright (c) 2026 Ferrite Project Contributors
 * SPDX-License-Identifier: Apache-2.0
 */
//! Status conditions.
//!
//! The condition list is the authoritative journal of a controller's
//! state-machine progress: a controller that loses its in-memory state must
//! be able to pick up from the conditions alone. `last_transition_time`
//! only moves when status or reason actually change, which is what the
//! stalled-task backoff keys off.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub kind: String,
    pub status: ConditionStatus,
    pub reason: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    pub last_transition_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl Condition {
    pub fn new(kind: impl Into<String>, status: ConditionStatus, reason: impl Into<String>) -> Self {
        Condition {
            kind: kind.into(),
            status,
            reason: reason.into(),
            message: String::new(),
            last_transition_time: Utc::now(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }
}

/// Looks up a condition by type.
pub fn get<'a>(conditions: &'a [Condition], kind: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.kind == kind)
}

/// Whether the condition exists and is `True`.
pub fn is_true(conditions: &[Condition], kind: &str) -> bool {
    get(conditions, kind).is_some_and(Condition::is_true)
}

/// Inserts or updates a condition. The transition timestamp is preserved
/// when status and reason are unchanged, so repeated reconciles do not
/// fabricate progress; the message is refreshed either way.
pub fn set(conditions: &mut Vec<Condition>, condition: Condition) -> bool {
    match conditions.iter_mut().find(|c| c.kind == condition.kind) {
        Some(existing) => {
            let transitioned =
                existing.status != condition.status || existing.reason != condition.reason;
            if !transitioned && existing.message == condition.message {
                return false;
            }
            let last_transition_time = if transitioned {
                condition.last_transition_time
            } else {
                existing.last_transition_time
            };
            *existing = Condition {
                last_transition_time,
                ..condition
            };
            transitioned
        }
        None => {
            conditions.push(condition);
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_preserves_transition_time_without_transition() {
        let mut conditions = Vec::new();
        set(
            &mut conditions,
            Condition::new("Ready", ConditionStatus::True, "AllGood"),
        );
        let first = conditions[0].last_transition_time;

        // Same status and reason, new message: timestamp must not move.
        set(
            &mut conditions,
            Condition::new("Ready", ConditionStatus::True, "AllGood").with_message("still good"),
        );
        assert_eq!(conditions[0].last_transition_time, first);
        assert_eq!(conditions[0].message, "still good");

        // Status flip moves the timestamp.
        set(
            &mut conditions,
            Condition::new("Ready", ConditionStatus::False, "Unreachable"),
        );
        assert!(conditions[0].last_transition_time >= first);
        assert!(!is_true(&conditions, "Ready"));
    }
}
