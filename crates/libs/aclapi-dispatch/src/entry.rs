use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// One ACL entry as it arrives from a client.
///
/// `entity_type` and `action` stay as raw strings so that an unknown value is
/// reported as a failed ACL result instead of a decode error.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AclEntry {
    pub entity_type: String,
    pub entity: String,
    pub permissions: String,
    pub is_default: bool,
    pub action: String,
}

impl AclEntry {
    pub fn new(
        entity_type: impl Into<String>,
        entity: impl Into<String>,
        permissions: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity: entity.into(),
            permissions: permissions.into(),
            is_default: false,
            action: action.into(),
        }
    }

    pub fn with_default(mut self, is_default: bool) -> Self {
        self.is_default = is_default;
        self
    }

    /// Canonical `[default:]type:entity:perms` form of this entry.
    pub fn canonical(&self) -> String {
        build_acl_entry(self)
    }
}

/// Renders an entry as the single argument handed to the privileged side.
///
/// The output depends on nothing but the entry, so the same entry always
/// produces the same bytes.
pub fn build_acl_entry(entry: &AclEntry) -> String {
    let prefix = if entry.is_default { "default:" } else { "" };
    format!("{}{}:{}:{}", prefix, entry.entity_type, entry.entity, entry.permissions)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    User,
    Group,
    Mask,
    Other,
}

impl EntityType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Group => "group",
            Self::Mask => "mask",
            Self::Other => "other",
        }
    }
}

impl FromStr for EntityType {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "user" => Ok(Self::User),
            "group" => Ok(Self::Group),
            "mask" => Ok(Self::Mask),
            "other" => Ok(Self::Other),
            other => Err(ValidationError::UnsupportedEntityType(other.to_string())),
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to do with an entry. `Add` and `Modify` both set the entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AclAction {
    Add,
    Modify,
    Remove,
}

impl AclAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Modify => "modify",
            Self::Remove => "remove",
        }
    }

    pub fn is_removal(self) -> bool {
        matches!(self, Self::Remove)
    }
}

impl FromStr for AclAction {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "add" => Ok(Self::Add),
            "modify" => Ok(Self::Modify),
            "remove" => Ok(Self::Remove),
            other => Err(ValidationError::UnsupportedAction(other.to_string())),
        }
    }
}

impl fmt::Display for AclAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_form_for_named_user() {
        let entry = AclEntry::new("user", "alice", "rwx", "add");
        assert_eq!(build_acl_entry(&entry), "user:alice:rwx");
    }

    #[test]
    fn default_prefix_only_when_flag_set() {
        let entry = AclEntry::new("group", "staff", "r-x", "modify").with_default(true);
        assert_eq!(entry.canonical(), "default:group:staff:r-x");
        let entry = entry.with_default(false);
        assert_eq!(entry.canonical(), "group:staff:r-x");
    }

    #[test]
    fn empty_entity_renders_as_empty_field() {
        assert_eq!(AclEntry::new("mask", "", "rw-", "add").canonical(), "mask::rw-");
        assert_eq!(
            AclEntry::new("other", "", "---", "add").with_default(true).canonical(),
            "default:other::---"
        );
        assert_eq!(AclEntry::new("user", "", "rwx", "add").canonical(), "user::rwx");
    }

    #[test]
    fn builder_is_deterministic_across_calls() {
        let entry = AclEntry::new("user", "1001", "r--", "add").with_default(true);
        let first = build_acl_entry(&entry);
        for _ in 0..16 {
            assert_eq!(build_acl_entry(&entry.clone()), first);
        }
    }

    #[test]
    fn builder_matches_concatenation_for_varied_entries() {
        let types = ["user", "group", "mask", "other"];
        let entities = ["", "alice", "1000", "dev-team"];
        let perms = ["", "r", "rw-", "rwx", "---"];
        for entity_type in types {
            for entity in entities {
                for permissions in perms {
                    for is_default in [false, true] {
                        let entry = AclEntry::new(entity_type, entity, permissions, "add")
                            .with_default(is_default);
                        let mut expected = String::new();
                        if is_default {
                            expected.push_str("default:");
                        }
                        expected.push_str(&[entity_type, entity, permissions].join(":"));
                        assert_eq!(build_acl_entry(&entry), expected);
                    }
                }
            }
        }
    }

    #[test]
    fn parses_known_actions_and_rejects_others() {
        assert_eq!("add".parse::<AclAction>().expect("add"), AclAction::Add);
        assert_eq!("modify".parse::<AclAction>().expect("modify"), AclAction::Modify);
        assert_eq!("remove".parse::<AclAction>().expect("remove"), AclAction::Remove);
        let err = "delete".parse::<AclAction>().expect_err("unknown action");
        assert_eq!(err, ValidationError::UnsupportedAction("delete".into()));
        assert!("Add".parse::<AclAction>().is_err());
    }

    #[test]
    fn parses_entity_types() {
        for (raw, expected) in [
            ("user", EntityType::User),
            ("group", EntityType::Group),
            ("mask", EntityType::Mask),
            ("other", EntityType::Other),
        ] {
            let parsed = raw.parse::<EntityType>().expect("entity type");
            assert_eq!(parsed, expected);
            assert_eq!(parsed.to_string(), raw);
        }
        assert!("owner".parse::<EntityType>().is_err());
    }

    #[test]
    fn entry_deserializes_with_missing_optional_fields() {
        let entry: AclEntry =
            serde_json::from_str(r#"{"entity_type":"other","action":"remove"}"#).expect("json");
        assert_eq!(entry.entity, "");
        assert_eq!(entry.permissions, "");
        assert!(!entry.is_default);
        assert_eq!(entry.canonical(), "other::");
    }
}
