// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Local identifiers for entities first seen on the remote.

use sha2::{Digest, Sha256};

use crate::entity::EntityType;

/// Derive a local ID for a pulled entity.
/// Format: {type}-{hash} where hash is the first 8 hex chars of SHA256(type + remote_id)
pub fn local_id_for(entity_type: EntityType, remote_id: &str) -> String {
    let input = format!("{}{}", entity_type.as_str(), remote_id);
    let hash = Sha256::digest(input.as_bytes());
    format!("{}-{}", entity_type.as_str(), hex::encode(&hash[..4]))
}

/// Derive a local ID that is not taken yet, appending an incrementing
/// suffix on collision.
pub fn unique_local_id_for<F>(entity_type: EntityType, remote_id: &str, exists: F) -> String
where
    F: Fn(&str) -> bool,
{
    let base_id = local_id_for(entity_type, remote_id);
    if !exists(&base_id) {
        return base_id;
    }

    let mut suffix = 2;
    loop {
        let id = format!("{}-{}", base_id, suffix);
        if !exists(&id) {
            return id;
        }
        suffix += 1;
    }
}

#[cfg(test)]
#[path = "id_tests.rs"]
mod tests;
