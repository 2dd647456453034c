// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Entity types under sync control and their snapshots.
//!
//! The sync engine does not interpret entity contents. A snapshot carries the
//! fields as an opaque JSON object plus the references the entity holds to
//! other entities, which is all the engine needs to order and translate them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::version::Version;

/// Kinds of records the productivity tracker syncs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    /// Long-lived objective that sprints and tasks roll up into.
    Goal,
    /// Time-boxed iteration.
    Sprint,
    /// Unit of work, optionally inside a sprint and under a goal.
    Task,
    /// Daily check-in entry.
    Checkup,
    /// Free-form label.
    Tag,
    /// Assignment of a tag to a task.
    TaskTag,
}

impl EntityType {
    /// Every entity type, dependencies first.
    ///
    /// The executor processes types in this order so a referenced record is
    /// pushed before the records that reference it.
    pub const SYNC_ORDER: [EntityType; 6] = [
        EntityType::Goal,
        EntityType::Sprint,
        EntityType::Tag,
        EntityType::Task,
        EntityType::Checkup,
        EntityType::TaskTag,
    ];

    pub fn sync_order() -> &'static [EntityType] {
        &Self::SYNC_ORDER
    }

    /// Entity types this type may reference.
    pub fn dependencies(&self) -> &'static [EntityType] {
        match self {
            EntityType::Goal | EntityType::Tag | EntityType::Checkup => &[],
            EntityType::Sprint => &[EntityType::Goal],
            EntityType::Task => &[EntityType::Sprint, EntityType::Goal],
            EntityType::TaskTag => &[EntityType::Task, EntityType::Tag],
        }
    }

    /// Returns the string representation used in storage and display.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Goal => "goal",
            EntityType::Sprint => "sprint",
            EntityType::Task => "task",
            EntityType::Checkup => "checkup",
            EntityType::Tag => "tag",
            EntityType::TaskTag => "task_tag",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "goal" => Ok(EntityType::Goal),
            "sprint" => Ok(EntityType::Sprint),
            "task" => Ok(EntityType::Task),
            "checkup" => Ok(EntityType::Checkup),
            "tag" => Ok(EntityType::Tag),
            "task_tag" | "task-tag" => Ok(EntityType::TaskTag),
            _ => Err(Error::InvalidEntityType(s.to_string())),
        }
    }
}

/// A reference from one entity to another.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub entity_type: EntityType,
    pub id: String,
}

impl EntityRef {
    pub fn new(entity_type: EntityType, id: impl Into<String>) -> Self {
        EntityRef { entity_type, id: id.into() }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.entity_type, self.id)
    }
}

impl FromStr for EntityRef {
    type Err = Error;

    /// Parses `type:id`.
    fn from_str(s: &str) -> Result<Self> {
        let (kind, id) = s
            .split_once(':')
            .ok_or_else(|| Error::InvalidInput(format!("invalid reference '{s}': expected TYPE:ID")))?;
        if id.is_empty() {
            return Err(Error::InvalidInput(format!("invalid reference '{s}': empty id")));
        }
        Ok(EntityRef::new(kind.parse()?, id))
    }
}

/// The state of one entity on one side at one version.
///
/// Local snapshots carry local ids (in `id` and `refs`); remote snapshots carry
/// remote ids. A snapshot with `deleted` set is a tombstone: the entity is
/// gone, but the version of the deletion is still known.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub entity_type: EntityType,
    pub id: String,
    pub version: Version,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub fields: serde_json::Value,
    #[serde(default)]
    pub refs: Vec<EntityRef>,
}

impl EntitySnapshot {
    pub fn new(
        entity_type: EntityType,
        id: impl Into<String>,
        version: Version,
        fields: serde_json::Value,
    ) -> Self {
        EntitySnapshot {
            entity_type,
            id: id.into(),
            version,
            deleted: false,
            fields,
            refs: Vec::new(),
        }
    }

    /// A deletion marker for the given entity.
    pub fn tombstone(entity_type: EntityType, id: impl Into<String>, version: Version) -> Self {
        EntitySnapshot {
            entity_type,
            id: id.into(),
            version,
            deleted: true,
            fields: serde_json::Value::Null,
            refs: Vec::new(),
        }
    }

    pub fn with_refs(mut self, refs: Vec<EntityRef>) -> Self {
        self.refs = refs;
        self
    }

    /// Returns the snapshot if it describes a live entity.
    pub fn live(&self) -> Option<&EntitySnapshot> {
        (!self.deleted).then_some(self)
    }
}

#[cfg(test)]
#[path = "entity_tests.rs"]
mod tests;
