//! Partial-function lookup tables used by the resolver.
//!
//! Each table is a key-unique map whose `get` returns `None` for absent
//! keys. How repeated keys are handled while loading is decided by a
//! [`DuplicatePolicy`] rather than by whichever insert happened last.

use rustc_hash::FxHashMap;
use serde::Deserialize;
use std::collections::hash_map::Entry;

/// Tie-break for a key that appears more than once while loading a table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Keep the value from the first row carrying the key.
    #[default]
    FirstSeenWins,
    /// Overwrite with the value from the last row carrying the key.
    LastWriteWins,
}

/// A key-unique string → string partial function.
#[derive(Debug, Clone, Default)]
pub struct LookupTable {
    entries: FxHashMap<String, String>,
    policy: DuplicatePolicy,
    /// Repeated keys whose value differed from the stored one.
    conflicts: u64,
}

impl LookupTable {
    pub fn new(policy: DuplicatePolicy) -> Self {
        Self {
            entries: FxHashMap::default(),
            policy,
            conflicts: 0,
        }
    }

    /// Insert a row. Empty keys or values are ignored, since an empty id can
    /// never resolve to anything. Returns true if the table changed.
    pub fn insert(&mut self, key: &str, value: &str) -> bool {
        if key.is_empty() || value.is_empty() {
            return false;
        }
        match self.entries.entry(key.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(value.to_string());
                true
            }
            Entry::Occupied(mut slot) => {
                if slot.get() == value {
                    return false;
                }
                self.conflicts += 1;
                match self.policy {
                    DuplicatePolicy::FirstSeenWins => false,
                    DuplicatePolicy::LastWriteWins => {
                        slot.insert(value.to_string());
                        true
                    }
                }
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn conflicts(&self) -> u64 {
        self.conflicts
    }
}

impl<K: AsRef<str>, V: AsRef<str>> FromIterator<(K, V)> for LookupTable {
    /// Collect with the default (first-seen-wins) policy.
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut table = LookupTable::new(DuplicatePolicy::default());
        for (k, v) in iter {
            table.insert(k.as_ref(), v.as_ref());
        }
        table
    }
}

/// recording_msid → recording_mbid, restricted to accepted matches.
#[derive(Debug, Clone, Default)]
pub struct MsidMbidMapping(pub LookupTable);

impl MsidMbidMapping {
    pub fn mbid(&self, msid: &str) -> Option<&str> {
        self.0.get(msid)
    }
}

/// Non-canonical recording_mbid → canonical recording_mbid.
#[derive(Debug, Clone, Default)]
pub struct RedirectMap(pub LookupTable);

impl RedirectMap {
    /// Canonical form of `mbid`. Total: an mbid without a redirect is its
    /// own canonical form. Only one hop is followed.
    pub fn canonical<'a>(&'a self, mbid: &'a str) -> &'a str {
        self.0.get(mbid).unwrap_or(mbid)
    }

    pub fn is_redirected(&self, mbid: &str) -> bool {
        self.0.get(mbid).is_some()
    }
}

/// Canonical recording_mbid → first credited artist_mbid.
#[derive(Debug, Clone, Default)]
pub struct ArtistMetadata(pub LookupTable);

impl ArtistMetadata {
    pub fn artist(&self, canonical_mbid: &str) -> Option<&str> {
        self.0.get(canonical_mbid)
    }

    /// Record a metadata row. Only the first artist of the credit list is
    /// kept; the rest of a multi-artist credit is dropped.
    pub fn insert_credit(&mut self, recording_mbid: &str, artist_mbids: &str) -> bool {
        match first_artist_credit(artist_mbids) {
            Some(artist) => self.0.insert(recording_mbid, artist),
            None => false,
        }
    }
}

/// First entry of a comma-separated artist credit list, trimmed.
pub fn first_artist_credit(artist_mbids: &str) -> Option<&str> {
    let first = artist_mbids.split(',').next()?.trim();
    if first.is_empty() {
        None
    } else {
        Some(first)
    }
}
