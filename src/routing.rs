//! Channel resolution: maps a source routing key to destination channels.
//!
//! Precedence is explicit match, then the most specific group prefix, then
//! the module default. A mapping entry with an empty channel list never
//! matches, so resolution falls through to the next level.

use std::collections::{BTreeMap, BTreeSet};

/// Per-module channel routing table.
///
/// Built once from configuration and read-only afterwards. Ordered maps keep
/// every lookup deterministic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMapping {
    /// Fallback channel when nothing else matches. Never empty after validation.
    pub default: String,

    /// Exact routing key to channel list.
    pub explicit: BTreeMap<String, Vec<String>>,

    /// Routing key prefix (or host group name) to channel list.
    pub groups: BTreeMap<String, Vec<String>>,
}

impl ChannelMapping {
    /// Create a mapping from its three tables.
    pub fn new(
        default: impl Into<String>,
        explicit: BTreeMap<String, Vec<String>>,
        groups: BTreeMap<String, Vec<String>>,
    ) -> Self {
        Self {
            default: default.into(),
            explicit,
            groups,
        }
    }

    /// Create a mapping that always resolves to `default`.
    pub fn with_default(default: impl Into<String>) -> Self {
        Self {
            default: default.into(),
            explicit: BTreeMap::new(),
            groups: BTreeMap::new(),
        }
    }

    /// Add an explicit entry.
    #[must_use]
    pub fn explicit<I, S>(mut self, key: impl Into<String>, channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.explicit
            .insert(key.into(), channels.into_iter().map(Into::into).collect());
        self
    }

    /// Add a group entry.
    #[must_use]
    pub fn group<I, S>(mut self, key: impl Into<String>, channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups
            .insert(key.into(), channels.into_iter().map(Into::into).collect());
        self
    }

    /// Resolve a routing key using prefix matching on group keys.
    ///
    /// Among all group keys that `routing_key` starts with, the one with the
    /// most `/`-separated segments wins. Equal segment counts go to the
    /// lexicographically smallest key. The result is never empty.
    pub fn resolve(&self, routing_key: &str) -> BTreeSet<String> {
        if let Some(channels) = self.explicit_match(routing_key) {
            return channels;
        }

        let mut best: Option<(usize, &Vec<String>)> = None;
        for (prefix, channels) in &self.groups {
            if channels.is_empty() || !routing_key.starts_with(prefix.as_str()) {
                continue;
            }
            let segments = segment_count(prefix);
            // Strictly greater: the first (smallest) key keeps a tie.
            if best.map_or(true, |(depth, _)| segments > depth) {
                best = Some((segments, channels));
            }
        }

        match best {
            Some((_, channels)) => channels.iter().cloned().collect(),
            None => self.default_set(),
        }
    }

    /// Resolve a routing key using exact group membership.
    ///
    /// Used for sources that report group names alongside the key (Icinga2
    /// host groups). The channels of every matching group are unioned.
    pub fn resolve_with_groups<S: AsRef<str>>(
        &self,
        routing_key: &str,
        memberships: &[S],
    ) -> BTreeSet<String> {
        if let Some(channels) = self.explicit_match(routing_key) {
            return channels;
        }

        let channels: BTreeSet<String> = memberships
            .iter()
            .filter_map(|group| self.groups.get(group.as_ref()))
            .flatten()
            .cloned()
            .collect();

        if channels.is_empty() {
            self.default_set()
        } else {
            channels
        }
    }

    /// Every channel this mapping can resolve to.
    pub fn channel_list(&self) -> BTreeSet<String> {
        self.explicit
            .values()
            .chain(self.groups.values())
            .flatten()
            .cloned()
            .chain(std::iter::once(self.default.clone()))
            .collect()
    }

    fn explicit_match(&self, routing_key: &str) -> Option<BTreeSet<String>> {
        self.explicit
            .get(routing_key)
            .filter(|channels| !channels.is_empty())
            .map(|channels| channels.iter().cloned().collect())
    }

    fn default_set(&self) -> BTreeSet<String> {
        BTreeSet::from([self.default.clone()])
    }
}

fn segment_count(key: &str) -> usize {
    key.split('/').count()
}
