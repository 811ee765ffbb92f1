// ABOUTME: RBAC action model with bitflag action sets and per-organization permission snapshots
// ABOUTME: Snapshots serialize as {resource: [action, ...]} for the rbac:<user>:<org> cache key
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nixopus

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use bitflags::bitflags;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// An operation kind granted per resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Create a resource
    Create,
    /// Read a resource
    Read,
    /// Update a resource
    Update,
    /// Delete a resource
    Delete,
    /// Execute an operation against a resource (default for run-style tools)
    #[default]
    Execute,
}

impl Action {
    /// All grantable actions
    pub const ALL: [Self; 5] = [
        Self::Create,
        Self::Read,
        Self::Update,
        Self::Delete,
        Self::Execute,
    ];

    /// Lowercase wire name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Read => "read",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Execute => "execute",
        }
    }

    /// Whether invoking a tool with this action can change state.
    ///
    /// Audit records of mutating calls are never dropped on queue overflow.
    #[must_use]
    pub const fn is_mutation(self) -> bool {
        !matches!(self, Self::Read)
    }

    const fn flag(self) -> ActionSet {
        match self {
            Self::Create => ActionSet::CREATE,
            Self::Read => ActionSet::READ,
            Self::Update => ActionSet::UPDATE,
            Self::Delete => ActionSet::DELETE,
            Self::Execute => ActionSet::EXECUTE,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown action name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown action '{0}'")]
pub struct UnknownAction(pub String);

impl FromStr for Action {
    type Err = UnknownAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "create" => Ok(Self::Create),
            "read" => Ok(Self::Read),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            "execute" => Ok(Self::Execute),
            _ => Err(UnknownAction(s.to_owned())),
        }
    }
}

bitflags! {
    /// Set of actions granted on one resource
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ActionSet: u8 {
        /// `create`
        const CREATE = 0b0_0001;
        /// `read`
        const READ = 0b0_0010;
        /// `update`
        const UPDATE = 0b0_0100;
        /// `delete`
        const DELETE = 0b0_1000;
        /// `execute`
        const EXECUTE = 0b1_0000;
    }
}

impl ActionSet {
    /// Whether the set grants `action`
    #[must_use]
    pub const fn allows(self, action: Action) -> bool {
        self.contains(action.flag())
    }

    /// Add a single action
    pub fn grant(&mut self, action: Action) {
        self.insert(action.flag());
    }

    /// Actions in canonical order
    pub fn actions(self) -> impl Iterator<Item = Action> {
        Action::ALL.into_iter().filter(move |a| self.allows(*a))
    }
}

impl FromIterator<Action> for ActionSet {
    fn from_iter<I: IntoIterator<Item = Action>>(iter: I) -> Self {
        iter.into_iter()
            .fold(Self::empty(), |set, action| set | action.flag())
    }
}

impl Serialize for ActionSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.actions())
    }
}

impl<'de> Deserialize<'de> for ActionSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let names = Vec::<String>::deserialize(deserializer)?;
        names
            .iter()
            .map(|name| name.parse::<Action>().map_err(D::Error::custom))
            .collect()
    }
}

/// Everything a user may do inside one organization: `resource -> actions`.
///
/// A snapshot answers any RBAC question for the (user, organization) pair
/// without further I/O. Resources absent from the map grant nothing.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionSet(HashMap<String, ActionSet>);

impl PermissionSet {
    /// Empty snapshot (grants nothing)
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant `action` on `resource`
    pub fn grant(&mut self, resource: impl Into<String>, action: Action) {
        self.0.entry(resource.into()).or_default().grant(action);
    }

    /// Builder form of [`Self::grant`]
    #[must_use]
    pub fn with(mut self, resource: impl Into<String>, action: Action) -> Self {
        self.grant(resource, action);
        self
    }

    /// Whether `action` is granted on `resource`
    #[must_use]
    pub fn allows(&self, resource: &str, action: Action) -> bool {
        self.0.get(resource).is_some_and(|set| set.allows(action))
    }

    /// Actions granted on `resource`
    #[must_use]
    pub fn actions_on(&self, resource: &str) -> ActionSet {
        self.0.get(resource).copied().unwrap_or_default()
    }

    /// Number of resources with at least one grant
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the snapshot grants nothing
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
