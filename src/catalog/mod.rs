mod schema;
mod sqlite;

pub use sqlite::SqliteCatalog;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::*;

/// A listing row as it comes out of the catalog: the record, its owner's
/// username, and the best grant level the requester holds on it.
pub type SharedRow = (FileRecord, String, PermissionLevel);

/// Catalog defines the metadata store interface. It is the single source of
/// truth for logical-to-owner mapping and for grants.
pub trait Catalog: Send + Sync {
    fn initialize(&self) -> Result<()>;

    // Principal operations
    /// Inserts or updates (by username) a principal and returns the stored
    /// row. An existing principal keeps its id; profile fields, groups, and
    /// the admin flag are refreshed.
    fn upsert_principal(&self, principal: &Principal) -> Result<Principal>;
    fn get_principal(&self, id: &str) -> Result<Option<Principal>>;
    fn get_principal_by_username(&self, username: &str) -> Result<Option<Principal>>;

    // File operations
    fn create_file(&self, file: &FileRecord) -> Result<()>;
    fn get_file(&self, id: &str) -> Result<Option<FileRecord>>;
    fn get_file_by_path(&self, owner_id: &str, path: &str) -> Result<Option<FileRecord>>;
    /// All records at a logical path regardless of owner, with each owner's
    /// username. Used by the shared-access fallback.
    fn list_files_at_path(&self, path: &str) -> Result<Vec<(FileRecord, String)>>;
    fn rename_file(
        &self,
        id: &str,
        filename: &str,
        path: &str,
        parent_path: &str,
        modified_at: DateTime<Utc>,
    ) -> Result<()>;
    fn move_file(
        &self,
        id: &str,
        path: &str,
        parent_path: &str,
        modified_at: DateTime<Utc>,
    ) -> Result<()>;
    /// Deletes the record; grants referencing it cascade.
    fn delete_file(&self, id: &str) -> Result<bool>;

    // Listing operations
    fn list_children_owned(&self, owner_id: &str, parent_path: &str) -> Result<Vec<FileRecord>>;
    /// Children of `parent_path` owned by others that the requester can see
    /// via a direct or group grant, deduplicated by file id keeping the
    /// highest-rank level.
    fn list_children_shared(
        &self,
        parent_path: &str,
        requester_id: &str,
        groups: &[String],
    ) -> Result<Vec<SharedRow>>;
    /// A folder record at exactly this path that the requester holds a
    /// direct or group grant on, if any.
    fn find_shared_folder_at(
        &self,
        path: &str,
        requester_id: &str,
        groups: &[String],
    ) -> Result<Option<FileRecord>>;
    /// Everything shared with the requester, newest modified first.
    fn list_shared_with(&self, requester_id: &str, groups: &[String]) -> Result<Vec<SharedRow>>;

    // Grant operations
    fn get_grant(&self, id: &str) -> Result<Option<Grant>>;
    fn get_user_grant(&self, file_id: &str, user_id: &str) -> Result<Option<Grant>>;
    fn get_group_grants(&self, file_id: &str, groups: &[String]) -> Result<Vec<Grant>>;
    /// Creates the grant, or updates the level of the existing grant for the
    /// same (file, target) pair. Returns the stored grant.
    fn upsert_grant(&self, grant: &Grant) -> Result<Grant>;
    fn delete_grant(&self, id: &str) -> Result<bool>;
    fn list_file_shares(&self, file_id: &str) -> Result<Vec<ShareInfo>>;
}
