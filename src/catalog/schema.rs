pub const SCHEMA: &str = r#"
-- Principals are authenticated identities, upserted on each login
CREATE TABLE IF NOT EXISTS principals (
    id TEXT PRIMARY KEY,
    username TEXT NOT NULL UNIQUE,
    display_name TEXT,
    email TEXT,
    groups TEXT NOT NULL DEFAULT '[]',  -- JSON array of directory group names
    is_admin INTEGER NOT NULL DEFAULT 0,
    created_at TEXT DEFAULT (datetime('now')),
    updated_at TEXT DEFAULT (datetime('now'))
);

-- File and folder records; logical path is unique per owner, so two owners
-- may each hold a record at the same logical path
CREATE TABLE IF NOT EXISTS files (
    id TEXT PRIMARY KEY,
    owner_id TEXT NOT NULL REFERENCES principals(id) ON DELETE CASCADE,
    filename TEXT NOT NULL,
    path TEXT NOT NULL,
    parent_path TEXT NOT NULL,
    is_folder INTEGER NOT NULL DEFAULT 0,
    size INTEGER NOT NULL DEFAULT 0,
    mime_type TEXT,
    created_at TEXT DEFAULT (datetime('now')),
    modified_at TEXT DEFAULT (datetime('now')),

    UNIQUE(owner_id, path)
);

-- Sharing ACL entries; exactly one of user or group per grant
CREATE TABLE IF NOT EXISTS grants (
    id TEXT PRIMARY KEY,
    file_id TEXT NOT NULL REFERENCES files(id) ON DELETE CASCADE,
    granted_by TEXT NOT NULL REFERENCES principals(id) ON DELETE CASCADE,
    grantee_user_id TEXT REFERENCES principals(id) ON DELETE CASCADE,
    grantee_group TEXT,
    level TEXT NOT NULL CHECK (level IN ('read', 'write', 'full')),
    created_at TEXT DEFAULT (datetime('now')),

    CHECK ((grantee_user_id IS NULL) <> (grantee_group IS NULL))
);

-- Create indexes
CREATE INDEX IF NOT EXISTS idx_files_owner ON files(owner_id);
CREATE INDEX IF NOT EXISTS idx_files_parent ON files(parent_path);
CREATE INDEX IF NOT EXISTS idx_files_path ON files(path);
CREATE UNIQUE INDEX IF NOT EXISTS idx_grants_file_user
    ON grants(file_id, grantee_user_id) WHERE grantee_user_id IS NOT NULL;
CREATE UNIQUE INDEX IF NOT EXISTS idx_grants_file_group
    ON grants(file_id, grantee_group) WHERE grantee_group IS NOT NULL;
CREATE INDEX IF NOT EXISTS idx_grants_user ON grants(grantee_user_id);
CREATE INDEX IF NOT EXISTS idx_grants_group ON grants(grantee_group);
"#;
