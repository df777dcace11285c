use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, ToSql, params};

use super::{Catalog, SharedRow};
use super::schema::SCHEMA;
use crate::error::{Error, Result};
use crate::types::*;

pub struct SqliteCatalog {
    conn: Mutex<Connection>,
}

impl SqliteCatalog {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path)?;

        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "journal_mode", "WAL")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// An in-memory catalog, useful for tests.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            // Handle SQLite's default datetime format: "YYYY-MM-DD HH:MM:SS"
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            tracing::error!("Invalid datetime in catalog: '{}' - {}", s, e);
            Utc::now()
        })
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn parse_groups(s: &str) -> Vec<String> {
    serde_json::from_str(s).unwrap_or_else(|e| {
        tracing::error!("Invalid groups column in catalog: '{}' - {}", s, e);
        Vec::new()
    })
}

fn row_to_principal(row: &Row<'_>) -> rusqlite::Result<Principal> {
    Ok(Principal {
        id: row.get(0)?,
        username: row.get(1)?,
        display_name: row.get(2)?,
        email: row.get(3)?,
        groups: parse_groups(&row.get::<_, String>(4)?),
        is_admin: row.get(5)?,
        created_at: parse_datetime(&row.get::<_, String>(6)?),
        updated_at: parse_datetime(&row.get::<_, String>(7)?),
    })
}

const FILE_COLUMNS: &str =
    "id, owner_id, filename, path, parent_path, is_folder, size, mime_type, created_at, modified_at";

fn row_to_file(row: &Row<'_>) -> rusqlite::Result<FileRecord> {
    Ok(FileRecord {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        filename: row.get(2)?,
        path: row.get(3)?,
        parent_path: row.get(4)?,
        is_folder: row.get(5)?,
        size: row.get(6)?,
        mime_type: row.get(7)?,
        created_at: parse_datetime(&row.get::<_, String>(8)?),
        modified_at: parse_datetime(&row.get::<_, String>(9)?),
    })
}

fn row_to_grant(row: &Row<'_>) -> rusqlite::Result<Grant> {
    let grantee_user: Option<String> = row.get(3)?;
    let grantee_group: Option<String> = row.get(4)?;
    let target = match (grantee_user, grantee_group) {
        (Some(user), None) => GrantTarget::User(user),
        (None, Some(group)) => GrantTarget::Group(group),
        // Unreachable under the table's CHECK constraint.
        _ => {
            return Err(rusqlite::Error::InvalidColumnType(
                3,
                "grantee".into(),
                rusqlite::types::Type::Null,
            ));
        }
    };
    Ok(Grant {
        id: row.get(0)?,
        file_id: row.get(1)?,
        granted_by: row.get(2)?,
        target,
        level: row.get(5)?,
        created_at: parse_datetime(&row.get::<_, String>(6)?),
    })
}

const GRANT_COLUMNS: &str =
    "id, file_id, granted_by, grantee_user_id, grantee_group, level, created_at";

/// Builds a `?, ?, ...` placeholder list for dynamic IN clauses; SQLite has
/// no array parameters. An empty list becomes `NULL`, which matches nothing.
fn placeholders(n: usize) -> String {
    if n == 0 {
        "NULL".to_string()
    } else {
        vec!["?"; n].join(", ")
    }
}

/// Collapses grant-match rows to one row per file id, keeping the
/// highest-rank level. Input order is preserved for the surviving rows.
fn dedupe_best(rows: Vec<SharedRow>) -> Vec<SharedRow> {
    let mut best: HashMap<String, usize> = HashMap::new();
    let mut out: Vec<SharedRow> = Vec::new();
    for row in rows {
        match best.get(&row.0.id) {
            Some(&idx) => {
                if row.2 > out[idx].2 {
                    out[idx].2 = row.2;
                }
            }
            None => {
                best.insert(row.0.id.clone(), out.len());
                out.push(row);
            }
        }
    }
    out
}

impl Catalog for SqliteCatalog {
    fn initialize(&self) -> Result<()> {
        self.conn().execute_batch(SCHEMA)?;
        Ok(())
    }

    // Principal operations

    fn upsert_principal(&self, principal: &Principal) -> Result<Principal> {
        let conn = self.conn();
        let groups = serde_json::to_string(&principal.groups)
            .map_err(|e| Error::BadRequest(format!("unserializable groups: {e}")))?;

        conn.execute(
            "INSERT INTO principals (id, username, display_name, email, groups, is_admin, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(username) DO UPDATE SET
                 display_name = excluded.display_name,
                 email = excluded.email,
                 groups = excluded.groups,
                 is_admin = excluded.is_admin,
                 updated_at = excluded.updated_at",
            params![
                principal.id,
                principal.username,
                principal.display_name,
                principal.email,
                groups,
                principal.is_admin,
                format_datetime(&principal.created_at),
                format_datetime(&principal.updated_at),
            ],
        )?;

        conn.query_row(
            "SELECT id, username, display_name, email, groups, is_admin, created_at, updated_at
             FROM principals WHERE username = ?1",
            params![principal.username],
            row_to_principal,
        )
        .map_err(Error::from)
    }

    fn get_principal(&self, id: &str) -> Result<Option<Principal>> {
        self.conn()
            .query_row(
                "SELECT id, username, display_name, email, groups, is_admin, created_at, updated_at
                 FROM principals WHERE id = ?1",
                params![id],
                row_to_principal,
            )
            .optional()
            .map_err(Error::from)
    }

    fn get_principal_by_username(&self, username: &str) -> Result<Option<Principal>> {
        self.conn()
            .query_row(
                "SELECT id, username, display_name, email, groups, is_admin, created_at, updated_at
                 FROM principals WHERE username = ?1",
                params![username],
                row_to_principal,
            )
            .optional()
            .map_err(Error::from)
    }

    // File operations

    fn create_file(&self, file: &FileRecord) -> Result<()> {
        let result = self.conn().execute(
            "INSERT INTO files (id, owner_id, filename, path, parent_path, is_folder, size, mime_type, created_at, modified_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                file.id,
                file.owner_id,
                file.filename,
                file.path,
                file.parent_path,
                file.is_folder,
                file.size,
                file.mime_type,
                format_datetime(&file.created_at),
                format_datetime(&file.modified_at),
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(Error::AlreadyExists)
            }
            Err(e) => Err(Error::from(e)),
        }
    }

    fn get_file(&self, id: &str) -> Result<Option<FileRecord>> {
        self.conn()
            .query_row(
                &format!("SELECT {FILE_COLUMNS} FROM files WHERE id = ?1"),
                params![id],
                row_to_file,
            )
            .optional()
            .map_err(Error::from)
    }

    fn get_file_by_path(&self, owner_id: &str, path: &str) -> Result<Option<FileRecord>> {
        self.conn()
            .query_row(
                &format!("SELECT {FILE_COLUMNS} FROM files WHERE owner_id = ?1 AND path = ?2"),
                params![owner_id, path],
                row_to_file,
            )
            .optional()
            .map_err(Error::from)
    }

    fn list_files_at_path(&self, path: &str) -> Result<Vec<(FileRecord, String)>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT f.id, f.owner_id, f.filename, f.path, f.parent_path, f.is_folder,
                    f.size, f.mime_type, f.created_at, f.modified_at, p.username
             FROM files f
             JOIN principals p ON p.id = f.owner_id
             WHERE f.path = ?1",
        )?;

        let rows = stmt.query_map(params![path], |row| {
            Ok((row_to_file(row)?, row.get::<_, String>(10)?))
        })?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn rename_file(
        &self,
        id: &str,
        filename: &str,
        path: &str,
        parent_path: &str,
        modified_at: DateTime<Utc>,
    ) -> Result<()> {
        let rows = self.conn().execute(
            "UPDATE files SET filename = ?1, path = ?2, parent_path = ?3, modified_at = ?4
             WHERE id = ?5",
            params![filename, path, parent_path, format_datetime(&modified_at), id],
        )?;

        if rows == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    fn move_file(
        &self,
        id: &str,
        path: &str,
        parent_path: &str,
        modified_at: DateTime<Utc>,
    ) -> Result<()> {
        let rows = self.conn().execute(
            "UPDATE files SET path = ?1, parent_path = ?2, modified_at = ?3 WHERE id = ?4",
            params![path, parent_path, format_datetime(&modified_at), id],
        )?;

        if rows == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    fn delete_file(&self, id: &str) -> Result<bool> {
        let rows = self
            .conn()
            .execute("DELETE FROM files WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    // Listing operations

    fn list_children_owned(&self, owner_id: &str, parent_path: &str) -> Result<Vec<FileRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {FILE_COLUMNS} FROM files
             WHERE owner_id = ?1 AND parent_path = ?2
             ORDER BY is_folder DESC, filename ASC"
        ))?;

        let rows = stmt.query_map(params![owner_id, parent_path], row_to_file)?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn list_children_shared(
        &self,
        parent_path: &str,
        requester_id: &str,
        groups: &[String],
    ) -> Result<Vec<SharedRow>> {
        let conn = self.conn();
        let sql = format!(
            "SELECT f.id, f.owner_id, f.filename, f.path, f.parent_path, f.is_folder,
                    f.size, f.mime_type, f.created_at, f.modified_at, p.username, g.level
             FROM files f
             JOIN principals p ON p.id = f.owner_id
             JOIN grants g ON g.file_id = f.id
             WHERE f.parent_path = ? AND f.owner_id <> ?
               AND (g.grantee_user_id = ? OR g.grantee_group IN ({}))
             ORDER BY f.is_folder DESC, f.filename ASC",
            placeholders(groups.len())
        );
        let mut stmt = conn.prepare(&sql)?;

        let mut bind: Vec<&dyn ToSql> = vec![&parent_path, &requester_id, &requester_id];
        for group in groups {
            bind.push(group);
        }

        let rows = stmt.query_map(bind.as_slice(), |row| {
            Ok((
                row_to_file(row)?,
                row.get::<_, String>(10)?,
                row.get::<_, PermissionLevel>(11)?,
            ))
        })?;

        let rows = rows
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)?;
        Ok(dedupe_best(rows))
    }

    fn find_shared_folder_at(
        &self,
        path: &str,
        requester_id: &str,
        groups: &[String],
    ) -> Result<Option<FileRecord>> {
        let conn = self.conn();
        let sql = format!(
            "SELECT {FILE_COLUMNS} FROM files
             WHERE path = ? AND is_folder = 1
               AND id IN (
                   SELECT file_id FROM grants
                   WHERE grantee_user_id = ? OR grantee_group IN ({})
               )
             LIMIT 1",
            placeholders(groups.len())
        );
        let mut stmt = conn.prepare(&sql)?;

        let mut bind: Vec<&dyn ToSql> = vec![&path, &requester_id];
        for group in groups {
            bind.push(group);
        }

        let mut rows = stmt.query_map(bind.as_slice(), row_to_file)?;
        rows.next().transpose().map_err(Error::from)
    }

    fn list_shared_with(&self, requester_id: &str, groups: &[String]) -> Result<Vec<SharedRow>> {
        let conn = self.conn();
        let sql = format!(
            "SELECT f.id, f.owner_id, f.filename, f.path, f.parent_path, f.is_folder,
                    f.size, f.mime_type, f.created_at, f.modified_at, p.username, g.level
             FROM files f
             JOIN principals p ON p.id = f.owner_id
             JOIN grants g ON g.file_id = f.id
             WHERE f.owner_id <> ?
               AND (g.grantee_user_id = ? OR g.grantee_group IN ({}))
             ORDER BY f.modified_at DESC",
            placeholders(groups.len())
        );
        let mut stmt = conn.prepare(&sql)?;

        let mut bind: Vec<&dyn ToSql> = vec![&requester_id, &requester_id];
        for group in groups {
            bind.push(group);
        }

        let rows = stmt.query_map(bind.as_slice(), |row| {
            Ok((
                row_to_file(row)?,
                row.get::<_, String>(10)?,
                row.get::<_, PermissionLevel>(11)?,
            ))
        })?;

        let rows = rows
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)?;
        Ok(dedupe_best(rows))
    }

    // Grant operations

    fn get_grant(&self, id: &str) -> Result<Option<Grant>> {
        self.conn()
            .query_row(
                &format!("SELECT {GRANT_COLUMNS} FROM grants WHERE id = ?1"),
                params![id],
                row_to_grant,
            )
            .optional()
            .map_err(Error::from)
    }

    fn get_user_grant(&self, file_id: &str, user_id: &str) -> Result<Option<Grant>> {
        self.conn()
            .query_row(
                &format!(
                    "SELECT {GRANT_COLUMNS} FROM grants
                     WHERE file_id = ?1 AND grantee_user_id = ?2"
                ),
                params![file_id, user_id],
                row_to_grant,
            )
            .optional()
            .map_err(Error::from)
    }

    fn get_group_grants(&self, file_id: &str, groups: &[String]) -> Result<Vec<Grant>> {
        if groups.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.conn();
        let sql = format!(
            "SELECT {GRANT_COLUMNS} FROM grants
             WHERE file_id = ? AND grantee_group IN ({})",
            placeholders(groups.len())
        );
        let mut stmt = conn.prepare(&sql)?;

        let mut bind: Vec<&dyn ToSql> = vec![&file_id];
        for group in groups {
            bind.push(group);
        }

        let rows = stmt.query_map(bind.as_slice(), row_to_grant)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn upsert_grant(&self, grant: &Grant) -> Result<Grant> {
        let conn = self.conn();

        let existing_id: Option<String> = match &grant.target {
            GrantTarget::User(user_id) => conn
                .query_row(
                    "SELECT id FROM grants WHERE file_id = ?1 AND grantee_user_id = ?2",
                    params![grant.file_id, user_id],
                    |row| row.get(0),
                )
                .optional()?,
            GrantTarget::Group(group) => conn
                .query_row(
                    "SELECT id FROM grants WHERE file_id = ?1 AND grantee_group = ?2",
                    params![grant.file_id, group],
                    |row| row.get(0),
                )
                .optional()?,
        };

        let id = match existing_id {
            Some(id) => {
                conn.execute(
                    "UPDATE grants SET level = ?1, created_at = ?2 WHERE id = ?3",
                    params![grant.level, format_datetime(&grant.created_at), id],
                )?;
                id
            }
            None => {
                let (grantee_user, grantee_group) = match &grant.target {
                    GrantTarget::User(user_id) => (Some(user_id.as_str()), None),
                    GrantTarget::Group(group) => (None, Some(group.as_str())),
                };
                conn.execute(
                    "INSERT INTO grants (id, file_id, granted_by, grantee_user_id, grantee_group, level, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        grant.id,
                        grant.file_id,
                        grant.granted_by,
                        grantee_user,
                        grantee_group,
                        grant.level,
                        format_datetime(&grant.created_at),
                    ],
                )?;
                grant.id.clone()
            }
        };

        conn.query_row(
            &format!("SELECT {GRANT_COLUMNS} FROM grants WHERE id = ?1"),
            params![id],
            row_to_grant,
        )
        .map_err(Error::from)
    }

    fn delete_grant(&self, id: &str) -> Result<bool> {
        let rows = self
            .conn()
            .execute("DELETE FROM grants WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    fn list_file_shares(&self, file_id: &str) -> Result<Vec<ShareInfo>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT g.id, g.level, p_by.username, p_with.username, g.grantee_group, g.created_at
             FROM grants g
             JOIN principals p_by ON g.granted_by = p_by.id
             LEFT JOIN principals p_with ON g.grantee_user_id = p_with.id
             WHERE g.file_id = ?1
             ORDER BY g.created_at DESC",
        )?;

        let rows = stmt.query_map(params![file_id], |row| {
            Ok(ShareInfo {
                grant_id: row.get(0)?,
                level: row.get(1)?,
                shared_by: row.get(2)?,
                shared_with_username: row.get(3)?,
                shared_with_group: row.get(4)?,
                created_at: parse_datetime(&row.get::<_, String>(5)?),
            })
        })?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }
}
