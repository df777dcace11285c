mod mime;

pub use mime::guess_mime;

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use chrono::Utc;
use tokio::fs;
use tracing::{error, warn};
use uuid::Uuid;

use crate::access::AccessEngine;
use crate::audit::{self, AuditSink};
use crate::catalog::Catalog;
use crate::config::VaultConfig;
use crate::error::{Error, Result};
use crate::identity::{Actor, IdentityClaims};
use crate::paths::PathResolver;
use crate::types::*;

/// The recipient of a new share: exactly one of a username or a directory
/// group name. Mutual exclusivity is enforced by construction.
#[derive(Debug, Clone)]
pub enum ShareTarget {
    User(String),
    Group(String),
}

/// Orchestrates every vault operation as the same pipeline: resolve the
/// target record, authorize via the permission engine, resolve physical
/// paths in the *owner's* namespace, mutate the filesystem, mutate the
/// catalog, emit an audit event.
///
/// A failure before the filesystem step aborts with no side effects. A
/// failure between the filesystem and catalog steps leaves an inconsistency
/// that is logged with full context for manual reconciliation; the two
/// stores are not covered by a joint transaction.
pub struct Vault {
    catalog: Arc<dyn Catalog>,
    resolver: PathResolver,
    access: AccessEngine,
    audit: Arc<dyn AuditSink>,
    max_object_size: u64,
}

impl Vault {
    pub fn new(
        config: &VaultConfig,
        catalog: Arc<dyn Catalog>,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self> {
        std::fs::create_dir_all(&config.storage_root)?;
        Ok(Self {
            access: AccessEngine::new(catalog.clone()),
            resolver: PathResolver::new(config.storage_root.clone()),
            catalog,
            audit,
            max_object_size: config.max_object_size,
        })
    }

    #[must_use]
    pub fn access(&self) -> &AccessEngine {
        &self.access
    }

    #[must_use]
    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    /// Upserts the principal for a successful authentication (by username)
    /// and makes sure their physical namespace exists.
    pub fn register_login(&self, claims: &IdentityClaims) -> Result<Principal> {
        let now = Utc::now();
        let principal = self.catalog.upsert_principal(&Principal {
            id: Uuid::new_v4().to_string(),
            username: claims.username.clone(),
            display_name: claims.display_name.clone(),
            email: claims.email.clone(),
            groups: claims.groups.clone(),
            is_admin: claims.is_admin,
            created_at: now,
            updated_at: now,
        })?;

        // Also validates the username as a physical directory name.
        self.resolver.resolve_physical(&principal.username, "/")?;

        self.emit_audit(&principal.id, "LOGIN", None, None);
        Ok(principal)
    }

    /// Creates a folder in the caller's own namespace.
    pub async fn create_folder(&self, path: &str, owner: &Actor) -> Result<FileRecord> {
        let path = self.resolver.normalize(path)?;
        if path == "/" {
            return Err(Error::AlreadyExists);
        }
        let abs = self.resolver.resolve_physical(&owner.username, &path)?;

        if fs::try_exists(&abs).await? {
            return Err(Error::AlreadyExists);
        }
        fs::create_dir_all(&abs).await?;

        let now = Utc::now();
        let record = FileRecord {
            id: Uuid::new_v4().to_string(),
            owner_id: owner.id.clone(),
            filename: last_segment(&path).to_string(),
            parent_path: self.resolver.parent_of(&path),
            path: path.clone(),
            is_folder: true,
            size: 0,
            mime_type: None,
            created_at: now,
            modified_at: now,
        };
        self.insert_record(&record, &abs, "create_folder")?;

        self.emit_audit(&owner.id, "CREATE_FOLDER", Some(&path), None);
        Ok(record)
    }

    /// Stores an uploaded object in the caller's own namespace. The size cap
    /// is checked before any byte reaches disk.
    pub async fn upload(
        &self,
        data: &[u8],
        parent_path: &str,
        owner: &Actor,
        name: &str,
    ) -> Result<FileRecord> {
        let parent_path = self.resolver.normalize(parent_path)?;
        let path = self.resolver.join_child(&parent_path, name)?;

        let size = data.len() as u64;
        if size > self.max_object_size {
            return Err(Error::TooLarge {
                size,
                max: self.max_object_size,
            });
        }

        if self.catalog.get_file_by_path(&owner.id, &path)?.is_some() {
            return Err(Error::AlreadyExists);
        }

        let abs = self.resolver.resolve_physical(&owner.username, &path)?;
        if let Some(parent) = abs.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&abs, data).await?;

        let now = Utc::now();
        let record = FileRecord {
            id: Uuid::new_v4().to_string(),
            owner_id: owner.id.clone(),
            filename: name.to_string(),
            path: path.clone(),
            parent_path,
            is_folder: false,
            size: size as i64,
            mime_type: Some(guess_mime(name).to_string()),
            created_at: now,
            modified_at: now,
        };
        self.insert_record(&record, &abs, "upload")?;

        self.emit_audit(&owner.id, "UPLOAD", Some(&path), None);
        Ok(record)
    }

    /// Lists a directory: the requester's own children plus children owned
    /// by others that the requester holds a grant on, folders first, then
    /// lexicographic by filename. Listing is filtered, not gated; a path
    /// that is neither the requester's own folder nor a shared folder they
    /// can see is `NotFound`.
    pub async fn list_directory(&self, path: &str, requester: &Actor) -> Result<Vec<DirEntry>> {
        let path = self.resolver.normalize(path)?;

        let abs = self.resolver.resolve_physical(&requester.username, &path)?;
        let is_own_folder = fs::try_exists(&abs).await?;

        if !is_own_folder
            && self
                .catalog
                .find_shared_folder_at(&path, &requester.id, &requester.groups)?
                .is_none()
        {
            return Err(Error::NotFound);
        }

        let mut entries: Vec<DirEntry> = self
            .catalog
            .list_children_owned(&requester.id, &path)?
            .into_iter()
            .map(|record| DirEntry {
                record,
                owner_username: requester.username.clone(),
                access: Access::Owner,
            })
            .collect();

        entries.extend(
            self.catalog
                .list_children_shared(&path, &requester.id, &requester.groups)?
                .into_iter()
                .map(|(record, owner_username, level)| DirEntry {
                    record,
                    owner_username,
                    access: Access::Shared(level),
                }),
        );

        entries.sort_by(|a, b| {
            b.record
                .is_folder
                .cmp(&a.record.is_folder)
                .then_with(|| a.record.filename.cmp(&b.record.filename))
        });
        Ok(entries)
    }

    /// Renames a file or folder in place. Requires write permission; the
    /// physical rename happens in the owner's namespace even when the actor
    /// is a grant holder.
    pub async fn rename(&self, old_path: &str, new_name: &str, actor: &Actor) -> Result<FileRecord> {
        let old_path = self.resolver.normalize(old_path)?;
        let (mut record, owner_username) = self.resolve_target(&old_path, actor)?;
        self.access
            .require(&actor.id, &record.id, PermissionLevel::Write, &actor.groups)?;

        let abs_old = self.resolver.resolve_physical(&owner_username, &old_path)?;
        if !fs::try_exists(&abs_old).await? {
            return Err(Error::NotFound);
        }

        let parent_path = self.resolver.parent_of(&old_path);
        let new_path = self.resolver.join_child(&parent_path, new_name)?;
        let abs_new = self.resolver.resolve_physical(&owner_username, &new_path)?;

        fs::rename(&abs_old, &abs_new).await?;

        let now = Utc::now();
        self.catalog
            .rename_file(&record.id, new_name, &new_path, &parent_path, now)
            .inspect_err(|e| self.log_divergence("rename", &record.id, &abs_new, e))?;

        record.filename = new_name.to_string();
        record.path = new_path;
        record.parent_path = parent_path;
        record.modified_at = now;

        self.emit_audit(&actor.id, "RENAME", Some(&old_path), None);
        Ok(record)
    }

    /// Moves a file or folder to a different parent within the owner's
    /// namespace. Requires write permission.
    pub async fn move_entry(
        &self,
        source_path: &str,
        dest_parent: &str,
        actor: &Actor,
    ) -> Result<FileRecord> {
        let source_path = self.resolver.normalize(source_path)?;
        let dest_parent = self.resolver.normalize(dest_parent)?;

        let (mut record, owner_username) = self.resolve_target(&source_path, actor)?;
        self.access
            .require(&actor.id, &record.id, PermissionLevel::Write, &actor.groups)?;

        let abs_src = self
            .resolver
            .resolve_physical(&owner_username, &source_path)?;
        if !fs::try_exists(&abs_src).await? {
            return Err(Error::NotFound);
        }

        let dest_path = self.resolver.join_child(&dest_parent, &record.filename)?;
        let abs_dest = self.resolver.resolve_physical(&owner_username, &dest_path)?;
        if let Some(parent) = abs_dest.parent() {
            fs::create_dir_all(parent).await?;
        }

        fs::rename(&abs_src, &abs_dest).await?;

        let now = Utc::now();
        self.catalog
            .move_file(&record.id, &dest_path, &dest_parent, now)
            .inspect_err(|e| self.log_divergence("move", &record.id, &abs_dest, e))?;

        record.path = dest_path;
        record.parent_path = dest_parent;
        record.modified_at = now;

        self.emit_audit(&actor.id, "MOVE", Some(&source_path), None);
        Ok(record)
    }

    /// Copies a file or folder into the *requester's own* namespace. Requires
    /// read permission on the source. The copy is owned by the requester and
    /// carries no grants: copying always ends the sharing relationship.
    pub async fn copy(
        &self,
        source_path: &str,
        dest_parent: &str,
        actor: &Actor,
    ) -> Result<FileRecord> {
        let source_path = self.resolver.normalize(source_path)?;
        let dest_parent = self.resolver.normalize(dest_parent)?;

        let (record, owner_username) = self.resolve_target(&source_path, actor)?;
        self.access
            .require(&actor.id, &record.id, PermissionLevel::Read, &actor.groups)?;

        let abs_src = self
            .resolver
            .resolve_physical(&owner_username, &source_path)?;
        if !fs::try_exists(&abs_src).await? {
            return Err(Error::NotFound);
        }

        let dest_path = self.resolver.join_child(&dest_parent, &record.filename)?;
        if self.catalog.get_file_by_path(&actor.id, &dest_path)?.is_some() {
            return Err(Error::AlreadyExists);
        }
        let abs_dest = self.resolver.resolve_physical(&actor.username, &dest_path)?;

        let (size, mime_type) = if record.is_folder {
            copy_dir_recursive(&abs_src, &abs_dest).await?;
            (0, None)
        } else {
            if let Some(parent) = abs_dest.parent() {
                fs::create_dir_all(parent).await?;
            }
            fs::copy(&abs_src, &abs_dest).await?;
            let size = fs::metadata(&abs_dest).await?.len() as i64;
            (size, Some(guess_mime(&record.filename).to_string()))
        };

        let now = Utc::now();
        let copy = FileRecord {
            id: Uuid::new_v4().to_string(),
            owner_id: actor.id.clone(),
            filename: record.filename.clone(),
            path: dest_path,
            parent_path: dest_parent,
            is_folder: record.is_folder,
            size,
            mime_type,
            created_at: now,
            modified_at: now,
        };
        self.insert_record(&copy, &abs_dest, "copy")?;

        self.emit_audit(&actor.id, "COPY", Some(&source_path), None);
        Ok(copy)
    }

    /// Deletes a file or folder (recursively). Requires full permission. The
    /// catalog delete cascades to every grant referencing the record.
    pub async fn delete(&self, path: &str, actor: &Actor) -> Result<()> {
        let path = self.resolver.normalize(path)?;
        let (record, owner_username) = self.resolve_target(&path, actor)?;
        self.access
            .require(&actor.id, &record.id, PermissionLevel::Full, &actor.groups)?;

        let abs = self.resolver.resolve_physical(&owner_username, &path)?;
        if fs::try_exists(&abs).await? {
            if record.is_folder {
                fs::remove_dir_all(&abs).await?;
            } else {
                fs::remove_file(&abs).await?;
            }
        }

        self.catalog
            .delete_file(&record.id)
            .inspect_err(|e| self.log_divergence("delete", &record.id, &abs, e))?;

        self.emit_audit(&actor.id, "DELETE", Some(&path), None);
        Ok(())
    }

    /// Shares a file with a user or group at the given level. The actor must
    /// be the owner or hold a full grant on the file.
    pub fn share(
        &self,
        file_path: &str,
        actor: &Actor,
        target: &ShareTarget,
        level: &str,
    ) -> Result<Grant> {
        let level = PermissionLevel::parse(level)?;
        let file_path = self.resolver.normalize(file_path)?;

        let (record, _) = self.resolve_target(&file_path, actor)?;
        if record.owner_id != actor.id {
            self.access
                .require(&actor.id, &record.id, PermissionLevel::Full, &actor.groups)?;
        }

        let grant_target = match target {
            ShareTarget::User(username) => {
                let grantee = self
                    .catalog
                    .get_principal_by_username(username)?
                    .ok_or(Error::NotFound)?;
                GrantTarget::User(grantee.id)
            }
            ShareTarget::Group(group) => {
                if group.trim().is_empty() {
                    return Err(Error::BadRequest("group name cannot be empty".to_string()));
                }
                GrantTarget::Group(group.clone())
            }
        };

        let grant = self.catalog.upsert_grant(&Grant {
            id: Uuid::new_v4().to_string(),
            file_id: record.id.clone(),
            granted_by: actor.id.clone(),
            target: grant_target,
            level,
            created_at: Utc::now(),
        })?;

        let detail = match target {
            ShareTarget::User(username) => format!("with {username} ({level})"),
            ShareTarget::Group(group) => format!("with group {group} ({level})"),
        };
        self.emit_audit(&actor.id, "SHARE", Some(&file_path), Some(detail));
        Ok(grant)
    }

    /// Removes a share. The actor must be the file's owner, the original
    /// granter, or a full-grant holder on the same file.
    pub fn unshare(&self, grant_id: &str, actor: &Actor) -> Result<()> {
        let grant = self.catalog.get_grant(grant_id)?.ok_or(Error::NotFound)?;
        let file = self
            .catalog
            .get_file(&grant.file_id)?
            .ok_or(Error::NotFound)?;

        let authorized = file.owner_id == actor.id
            || grant.granted_by == actor.id
            || self.access.check_permission(
                &actor.id,
                &file.id,
                PermissionLevel::Full,
                &actor.groups,
            )?;
        if !authorized {
            return Err(Error::Forbidden);
        }

        self.catalog.delete_grant(grant_id)?;

        self.emit_audit(
            &actor.id,
            "UNSHARE",
            Some(&file.path),
            Some(format!("grant {grant_id}")),
        );
        Ok(())
    }

    /// Every grant on a file. The actor must be the owner or hold full.
    pub fn list_shares(&self, file_path: &str, actor: &Actor) -> Result<Vec<ShareInfo>> {
        let file_path = self.resolver.normalize(file_path)?;
        let (record, _) = self.resolve_target(&file_path, actor)?;
        if record.owner_id != actor.id {
            self.access
                .require(&actor.id, &record.id, PermissionLevel::Full, &actor.groups)?;
        }
        self.catalog.list_file_shares(&record.id)
    }

    /// Everything shared with the requester directly or via groups, newest
    /// modified first.
    pub fn shared_with_me(&self, requester: &Actor) -> Result<Vec<DirEntry>> {
        Ok(self
            .catalog
            .list_shared_with(&requester.id, &requester.groups)?
            .into_iter()
            .map(|(record, owner_username, level)| DirEntry {
                record,
                owner_username,
                access: Access::Shared(level),
            })
            .collect())
    }

    /// Fallback resolution for rename/move/copy/delete/share: a record the
    /// actor owns at the path wins; otherwise every record at that path
    /// under any owner is considered, filtered to the ones the actor holds
    /// *some* permission on. Inaccessible candidates are indistinguishable
    /// from absent ones (`NotFound`). If several accessible candidates
    /// remain, the most recently modified wins, tie-broken by id.
    fn resolve_target(&self, path: &str, actor: &Actor) -> Result<(FileRecord, String)> {
        if let Some(record) = self.catalog.get_file_by_path(&actor.id, path)? {
            return Ok((record, actor.username.clone()));
        }

        let mut accessible: Vec<(FileRecord, String)> = Vec::new();
        for (record, owner_username) in self.catalog.list_files_at_path(path)? {
            if record.owner_id == actor.id {
                continue;
            }
            if self
                .access
                .effective_permission(&actor.id, &record.id, &actor.groups)?
                .is_some()
            {
                accessible.push((record, owner_username));
            }
        }

        accessible.sort_by(|a, b| {
            b.0.modified_at
                .cmp(&a.0.modified_at)
                .then_with(|| a.0.id.cmp(&b.0.id))
        });
        accessible.into_iter().next().ok_or(Error::NotFound)
    }

    /// Catalog insert after a physical mutation; a failure here means the
    /// two stores have diverged.
    fn insert_record(&self, record: &FileRecord, abs: &Path, op: &str) -> Result<()> {
        self.catalog
            .create_file(record)
            .inspect_err(|e| self.log_divergence(op, &record.id, abs, e))
    }

    fn log_divergence(&self, op: &str, file_id: &str, physical: &Path, err: &Error) {
        error!(
            op,
            file_id,
            physical = %physical.display(),
            "catalog mutation failed after filesystem mutation, stores may have diverged: {err}"
        );
    }

    fn emit_audit(&self, principal_id: &str, action: &str, resource: Option<&str>, detail: Option<String>) {
        let event = audit::event(principal_id, action, resource, detail);
        if let Err(e) = self.audit.record(event) {
            warn!("audit sink failure ignored: {e}");
        }
    }
}

fn last_segment(normalized: &str) -> &str {
    normalized.rsplit('/').next().unwrap_or(normalized)
}

fn copy_dir_recursive<'a>(
    src: &'a Path,
    dest: &'a Path,
) -> Pin<Box<dyn Future<Output = std::io::Result<()>> + Send + 'a>> {
    Box::pin(async move {
        fs::create_dir_all(dest).await?;
        let mut entries = fs::read_dir(src).await?;
        while let Some(entry) = entries.next_entry().await? {
            let target: PathBuf = dest.join(entry.file_name());
            if entry.file_type().await?.is_dir() {
                copy_dir_recursive(&entry.path(), &target).await?;
            } else {
                fs::copy(entry.path(), &target).await?;
            }
        }
        Ok(())
    })
}
