/*
 * SPDX-FileCopyrightText: Copyright (c) 2026 Ferrite Project Contributors
 * SPDX-License-Identifier: Apache-2.0
 */
//! Label selectors used by the Set resources and ServerCleaning.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Exact-match label selector. An empty selector matches nothing, so a
/// freshly-created Set without a selector cannot fan out over the whole
/// fleet by accident.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct LabelSelector {
    pub match_labels: BTreeMap<String, String>,
}

impl LabelSelector {
    pub fn matching(key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut match_labels = BTreeMap::new();
        match_labels.insert(key.into(), value.into());
        LabelSelector { match_labels }
    }

    pub fn is_empty(&self) -> bool {
        self.match_labels.is_empty()
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        !self.is_empty()
            && self
                .match_labels
                .iter()
                .all(|(k, v)| labels.get(k) == Some(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_matching() {
        let selector = LabelSelector::matching("manufacturer", "bar");

        let mut labels = BTreeMap::new();
        assert!(!selector.matches(&labels));
        labels.insert("manufacturer".to_string(), "bar".to_string());
        assert!(selector.matches(&labels));
        labels.insert("extra".to_string(), "x".to_string());
        assert!(selector.matches(&labels));
        labels.insert("manufacturer".to_string(), "other".to_string());
        assert!(!selector.matches(&labels));
    }

    #[test]
    fn empty_selector_matches_nothing() {
        let selector = LabelSelector::default();
        assert!(!selector.matches(&BTreeMap::new()));
    }
}
