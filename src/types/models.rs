use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::PermissionLevel;

/// An authenticated identity. Upserted by username on each successful login;
/// never deleted by the vault core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Principal {
    pub id: String,
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Directory-service group names this principal belongs to.
    pub groups: Vec<String>,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A file or folder record in the metadata catalog.
///
/// The logical path is unique within the owner's namespace; two owners may
/// each have a record at the same logical path, resolving to different
/// physical locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: String,
    pub owner_id: String,
    pub filename: String,
    pub path: String,
    pub parent_path: String,
    pub is_folder: bool,
    pub size: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

/// The recipient of a grant: exactly one of a user or a directory group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantTarget {
    User(String),
    Group(String),
}

/// A sharing ACL entry tying a file to a target user or group at a level.
/// At most one grant exists per (file, user) and per (file, group) pair;
/// re-sharing updates the level in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Grant {
    pub id: String,
    pub file_id: String,
    pub granted_by: String,
    pub target: GrantTarget,
    pub level: PermissionLevel,
    pub created_at: DateTime<Utc>,
}

/// How a requester holds a file that appears in a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    Owner,
    Shared(PermissionLevel),
}

impl Access {
    /// The effective level this access mode confers.
    #[must_use]
    pub const fn level(self) -> PermissionLevel {
        match self {
            Self::Owner => PermissionLevel::Full,
            Self::Shared(level) => level,
        }
    }
}

/// A directory listing entry: the record plus who owns it and how the
/// requester holds it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirEntry {
    #[serde(flatten)]
    pub record: FileRecord,
    pub owner_username: String,
    pub access: Access,
}

/// A resolved view of one grant on a file, as shown to the file's owner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareInfo {
    pub grant_id: String,
    pub level: PermissionLevel,
    /// Username of the principal who created the share.
    pub shared_by: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shared_with_username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shared_with_group: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A structured audit record handed to the audit sink. Append-only from the
/// core's point of view; the sink owns persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub principal_id: String,
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_addr: Option<String>,
    pub timestamp: DateTime<Utc>,
}
