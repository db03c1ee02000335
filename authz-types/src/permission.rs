// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

/// Verbs understood by the Kubernetes RBAC authorizer.
///
/// A grant naming any other verb is structurally invalid.
pub const RECOGNIZED_VERBS: &[&str] = &[
    "get",
    "list",
    "watch",
    "create",
    "update",
    "patch",
    "delete",
    "deletecollection",
    "bind",
    "escalate",
    "impersonate",
    "use",
    "approve",
    "sign",
];

/// Returns true if `verb` is one of [`RECOGNIZED_VERBS`].
pub fn is_recognized_verb(verb: &str) -> bool {
    RECOGNIZED_VERBS.contains(&verb)
}

/// Everything that identifies a permission except its verbs
///
/// Two tuples with the same key describe the same target and their verb sets
/// can be merged.  Note that `resource_name` is part of the key: a grant
/// scoped to one named object never collapses into the unscoped grant on the
/// same resource kind.
#[derive(
    Clone,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Deserialize,
    Serialize,
    JsonSchema,
)]
pub struct PermissionKey {
    /// API group; empty for the core group
    pub api_group: String,
    /// API version; empty matches any version
    pub api_version: String,
    /// plural resource kind, e.g. "deployments"
    pub resource: String,
    /// if present, the single object the permission applies to
    pub resource_name: Option<String>,
}

impl PermissionKey {
    /// Returns true if a grant with this key covers a request against
    /// `resource_name` of `resource` in `api_group`/`api_version`.
    ///
    /// An empty version in the grant matches any requested version, and an
    /// unscoped grant covers every object of its kind.  A scoped grant only
    /// covers requests for that same name.
    pub fn covers(
        &self,
        api_group: &str,
        api_version: &str,
        resource: &str,
        resource_name: Option<&str>,
    ) -> bool {
        if self.api_group != api_group || self.resource != resource {
            return false;
        }
        if !self.api_version.is_empty() && self.api_version != api_version {
            return false;
        }
        match (&self.resource_name, resource_name) {
            (None, _) => true,
            (Some(granted), Some(requested)) => granted == requested,
            (Some(_), None) => false,
        }
    }
}

impl fmt::Display for PermissionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Follow kubectl's `resource.version.group` notation.
        write!(f, "{}", self.resource)?;
        if !self.api_version.is_empty() {
            write!(f, ".{}", self.api_version)?;
        }
        if !self.api_group.is_empty() {
            write!(f, ".{}", self.api_group)?;
        }
        if let Some(name) = &self.resource_name {
            write!(f, "/{}", name)?;
        }
        Ok(())
    }
}

/// One allow-rule: `verbs` on `resource` (optionally a single named object)
/// in `api_group`/`api_version`.
#[derive(
    Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema,
)]
pub struct PermissionTuple {
    pub verbs: BTreeSet<String>,
    #[serde(default)]
    pub api_group: String,
    #[serde(default)]
    pub api_version: String,
    pub resource: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_name: Option<String>,
}

impl PermissionTuple {
    /// Construct an unscoped permission on any version of `resource`.
    pub fn new<I, S>(
        verbs: I,
        api_group: impl Into<String>,
        resource: impl Into<String>,
    ) -> PermissionTuple
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        PermissionTuple {
            verbs: verbs.into_iter().map(Into::into).collect(),
            api_group: api_group.into(),
            api_version: String::new(),
            resource: resource.into(),
            resource_name: None,
        }
    }

    /// Restrict this permission to one version of its API group.
    pub fn with_api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = api_version.into();
        self
    }

    /// Scope this permission to the single object `name`.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.resource_name = Some(name.into());
        self
    }

    pub fn from_parts(
        key: PermissionKey,
        verbs: BTreeSet<String>,
    ) -> PermissionTuple {
        let PermissionKey { api_group, api_version, resource, resource_name } =
            key;
        PermissionTuple {
            verbs,
            api_group,
            api_version,
            resource,
            resource_name,
        }
    }

    pub fn key(&self) -> PermissionKey {
        PermissionKey {
            api_group: self.api_group.clone(),
            api_version: self.api_version.clone(),
            resource: self.resource.clone(),
            resource_name: self.resource_name.clone(),
        }
    }

    /// Check that this tuple is well-formed permission data.
    ///
    /// This is the check applied to provider declarations.  It does not
    /// reject unrecognized verbs; see [`PermissionTuple::unrecognized_verbs`].
    pub fn validate(&self) -> Result<(), InvalidPermission> {
        if self.resource.is_empty() {
            return Err(InvalidPermission::EmptyResource);
        }
        let resource = self.resource.clone();
        if self.verbs.is_empty() {
            return Err(InvalidPermission::NoVerbs { resource });
        }
        if self.verbs.iter().any(|v| v.is_empty()) {
            return Err(InvalidPermission::EmptyVerb { resource });
        }
        if self.resource_name.as_deref() == Some("") {
            return Err(InvalidPermission::EmptyResourceName { resource });
        }

        let wildcard_field = if self.verbs.iter().any(|v| v.contains('*')) {
            Some("verbs")
        } else if self.api_group.contains('*') {
            Some("api_group")
        } else if self.api_version.contains('*') {
            Some("api_version")
        } else if self.resource.contains('*') {
            Some("resource")
        } else if self.resource_name.as_deref().is_some_and(|n| n.contains('*'))
        {
            Some("resource_name")
        } else {
            None
        };
        if let Some(field) = wildcard_field {
            return Err(InvalidPermission::Wildcard { field, resource });
        }

        // RBAC rules have no version field, so a versioned tuple could never
        // be observed back from the cluster.
        if !self.api_version.is_empty() {
            return Err(InvalidPermission::Versioned {
                resource,
                api_version: self.api_version.clone(),
            });
        }
        Ok(())
    }

    /// Returns the verbs in this tuple that are not [`RECOGNIZED_VERBS`].
    pub fn unrecognized_verbs(&self) -> Vec<&str> {
        self.verbs
            .iter()
            .map(String::as_str)
            .filter(|v| !is_recognized_verb(v))
            .collect()
    }
}

impl fmt::Display for PermissionTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verbs = self.verbs.iter().cloned().collect::<Vec<_>>().join(",");
        write!(f, "[{}] {}", verbs, self.key())
    }
}

/// Describes why a [`PermissionTuple`] is not usable permission data
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum InvalidPermission {
    #[error("permission has an empty resource")]
    EmptyResource,
    #[error("permission on {resource:?} has no verbs")]
    NoVerbs { resource: String },
    #[error("permission on {resource:?} has an empty verb")]
    EmptyVerb { resource: String },
    #[error("permission on {resource:?} has an empty resource name")]
    EmptyResourceName { resource: String },
    #[error(
        "permission on {resource:?} uses a wildcard in {field}, which is not \
        supported"
    )]
    Wildcard { field: &'static str, resource: String },
    #[error(
        "permission on {resource:?} names API version {api_version:?}, but \
        grants apply to every version"
    )]
    Versioned { resource: String, api_version: String },
}
