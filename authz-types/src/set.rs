// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::Identity;
use crate::Operation;
use crate::PermissionKey;
use crate::PermissionTuple;
use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeMap;
use std::collections::BTreeSet;

/// Deduplicated collection of permissions
///
/// Permissions are keyed by [`PermissionKey`].  Inserting a tuple whose key
/// is already present merges the verb sets, so the set never holds two
/// entries for the same target.  Entries never have an empty verb set.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(from = "Vec<PermissionTuple>", into = "Vec<PermissionTuple>")]
pub struct PermissionSet {
    entries: BTreeMap<PermissionKey, BTreeSet<String>>,
}

impl PermissionSet {
    pub fn new() -> PermissionSet {
        PermissionSet::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Add `tuple`, merging its verbs into any existing entry with the same
    /// key.  Returns true if the set changed.
    pub fn insert(&mut self, tuple: PermissionTuple) -> bool {
        if tuple.verbs.is_empty() {
            return false;
        }
        let existing = self.entries.entry(tuple.key()).or_default();
        let before = existing.len();
        existing.extend(tuple.verbs);
        existing.len() != before
    }

    /// Remove the verbs of `tuple` from the entry with the same key,
    /// dropping the entry if no verbs remain.  Returns true if the set
    /// changed.
    pub fn remove(&mut self, tuple: &PermissionTuple) -> bool {
        let key = tuple.key();
        let Some(existing) = self.entries.get_mut(&key) else {
            return false;
        };
        let before = existing.len();
        existing.retain(|v| !tuple.verbs.contains(v));
        let changed = existing.len() != before;
        if existing.is_empty() {
            self.entries.remove(&key);
        }
        changed
    }

    pub fn verbs(&self, key: &PermissionKey) -> Option<&BTreeSet<String>> {
        self.entries.get(key)
    }

    /// Returns true if this set holds exactly `tuple` (same key, same verbs).
    pub fn contains(&self, tuple: &PermissionTuple) -> bool {
        self.entries.get(&tuple.key()) == Some(&tuple.verbs)
    }

    /// Iterate over entries in key order.
    pub fn iter(
        &self,
    ) -> impl Iterator<Item = (&PermissionKey, &BTreeSet<String>)> + '_ {
        self.entries.iter()
    }

    /// Iterate over entries in key order as owned tuples.
    pub fn tuples(&self) -> impl Iterator<Item = PermissionTuple> + '_ {
        self.entries.iter().map(|(key, verbs)| {
            PermissionTuple::from_parts(key.clone(), verbs.clone())
        })
    }

    /// Returns true if some entry grants `verb` on the described request.
    ///
    /// See [`PermissionKey::covers`] for the matching rules.
    pub fn allows(
        &self,
        verb: &str,
        api_group: &str,
        api_version: &str,
        resource: &str,
        resource_name: Option<&str>,
    ) -> bool {
        self.entries.iter().any(|(key, verbs)| {
            verbs.contains(verb)
                && key.covers(api_group, api_version, resource, resource_name)
        })
    }
}

impl FromIterator<PermissionTuple> for PermissionSet {
    fn from_iter<T: IntoIterator<Item = PermissionTuple>>(iter: T) -> Self {
        let mut set = PermissionSet::new();
        for tuple in iter {
            set.insert(tuple);
        }
        set
    }
}

impl From<Vec<PermissionTuple>> for PermissionSet {
    fn from(tuples: Vec<PermissionTuple>) -> Self {
        tuples.into_iter().collect()
    }
}

impl From<PermissionSet> for Vec<PermissionTuple> {
    fn from(set: PermissionSet) -> Self {
        set.entries
            .into_iter()
            .map(|(key, verbs)| PermissionTuple::from_parts(key, verbs))
            .collect()
    }
}

/// Permissions an identity is required to hold
///
/// This is derived from the current declarations of all requirement
/// providers on every reconciliation pass.  It is never persisted.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct RequirementSet {
    pub identity: Identity,
    pub permissions: PermissionSet,
}

impl RequirementSet {
    pub fn new(identity: Identity) -> RequirementSet {
        RequirementSet { identity, permissions: PermissionSet::new() }
    }

    pub fn with_permissions(
        identity: Identity,
        tuples: impl IntoIterator<Item = PermissionTuple>,
    ) -> RequirementSet {
        RequirementSet { identity, permissions: tuples.into_iter().collect() }
    }

    pub fn insert(&mut self, tuple: PermissionTuple) -> bool {
        self.permissions.insert(tuple)
    }
}

/// Permissions an identity actually holds in the target cluster
///
/// The cluster owns this state.  Values of this type are snapshots read
/// from it; [`GrantRecord::apply()`] models the effect of a successful
/// operation on such a snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct GrantRecord {
    pub identity: Identity,
    pub permissions: PermissionSet,
}

impl GrantRecord {
    /// The record of an identity with no bindings at all.
    pub fn empty(identity: Identity) -> GrantRecord {
        GrantRecord { identity, permissions: PermissionSet::new() }
    }

    pub fn with_permissions(
        identity: Identity,
        tuples: impl IntoIterator<Item = PermissionTuple>,
    ) -> GrantRecord {
        GrantRecord { identity, permissions: tuples.into_iter().collect() }
    }

    /// Update this record as the cluster would after successfully applying
    /// `operation`.  Returns true if the record changed.
    pub fn apply(&mut self, operation: &Operation) -> bool {
        match operation {
            Operation::Grant(tuple) => self.permissions.insert(tuple.clone()),
            Operation::Revoke(tuple) => self.permissions.remove(tuple),
        }
    }

    pub fn allows(
        &self,
        verb: &str,
        api_group: &str,
        api_version: &str,
        resource: &str,
        resource_name: Option<&str>,
    ) -> bool {
        self.permissions.allows(
            verb,
            api_group,
            api_version,
            resource,
            resource_name,
        )
    }

    /// Returns the required permissions this record does not allow.
    ///
    /// Each returned tuple carries only the verbs that are missing.  A
    /// requirement can be satisfied by a broader grant (e.g., an unscoped
    /// grant satisfies a requirement scoped to one name), so this answers
    /// "can the identity do what it needs" rather than "does the record
    /// match exactly"; the latter is what diffing is for.
    pub fn missing(&self, target: &RequirementSet) -> Vec<PermissionTuple> {
        target
            .permissions
            .iter()
            .filter_map(|(key, verbs)| {
                let missing: BTreeSet<String> = verbs
                    .iter()
                    .filter(|verb| {
                        !self.allows(
                            verb,
                            &key.api_group,
                            &key.api_version,
                            &key.resource,
                            key.resource_name.as_deref(),
                        )
                    })
                    .cloned()
                    .collect();
                (!missing.is_empty())
                    .then(|| PermissionTuple::from_parts(key.clone(), missing))
            })
            .collect()
    }
}
