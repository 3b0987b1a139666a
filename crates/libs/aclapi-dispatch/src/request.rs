use serde::{Deserialize, Serialize};

use crate::entry::{build_acl_entry, AclAction, AclEntry, EntityType};
use crate::error::ValidationError;

/// Payload of one `ApplyACLEntry` call. Absent fields decode as empty so that
/// they fail validation rather than decoding.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AclRequest {
    pub target_path: String,
    pub entry: AclEntry,
}

impl AclRequest {
    pub fn new(target_path: impl Into<String>, entry: AclEntry) -> Self {
        Self { target_path: target_path.into(), entry }
    }
}

/// Outcome of one dispatch. There is no partial state.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AclResult {
    pub success: bool,
    pub message: String,
}

impl AclResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self { success: true, message: message.into() }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self { success: false, message: message.into() }
    }
}

impl From<ValidationError> for AclResult {
    fn from(err: ValidationError) -> Self {
        Self::failure(err.to_string())
    }
}

/// A request that passed validation, ready for a dispatch strategy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AclCommand {
    pub action: AclAction,
    pub entity_type: EntityType,
    /// Canonical entry string, see [`build_acl_entry`].
    pub entry: String,
    pub path: String,
}

impl AclCommand {
    pub fn prepare(target_path: &str, entry: &AclEntry) -> Result<Self, ValidationError> {
        let action = entry.action.parse::<AclAction>()?;
        let entity_type = entry.entity_type.parse::<EntityType>()?;
        validate_path(target_path)?;
        validate_entity(&entry.entity)?;
        validate_permissions(&entry.permissions, action)?;
        Ok(Self {
            action,
            entity_type,
            entry: build_acl_entry(entry),
            path: target_path.to_string(),
        })
    }
}

fn validate_path(path: &str) -> Result<(), ValidationError> {
    if path.is_empty() {
        return Err(ValidationError::EmptyPath);
    }
    if path.contains('\0') {
        return Err(ValidationError::NulInPath);
    }
    if !path.starts_with('/') {
        return Err(ValidationError::RelativePath(path.to_string()));
    }
    Ok(())
}

fn validate_entity(entity: &str) -> Result<(), ValidationError> {
    let bad = entity
        .chars()
        .any(|ch| ch == ':' || ch == ',' || ch.is_whitespace() || ch.is_control());
    if bad {
        return Err(ValidationError::InvalidEntity(entity.to_string()));
    }
    Ok(())
}

fn validate_permissions(permissions: &str, action: AclAction) -> Result<(), ValidationError> {
    if permissions.is_empty() && action.is_removal() {
        return Ok(());
    }
    let well_formed = (1..=3).contains(&permissions.len())
        && permissions.chars().all(|ch| matches!(ch, 'r' | 'w' | 'x' | '-'));
    if !well_formed {
        return Err(ValidationError::InvalidPermissions(permissions.to_string()));
    }
    Ok(())
}
