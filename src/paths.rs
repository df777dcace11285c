use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Translates logical, user-visible paths into sandboxed physical locations.
///
/// Physical resolution is always keyed by the *resource owner's* username,
/// never the requester's: a grant holder operates on a file that physically
/// lives in the owner's subdirectory, without bytes ever being copied into
/// the requester's namespace.
#[derive(Debug, Clone)]
pub struct PathResolver {
    storage_root: PathBuf,
}

impl PathResolver {
    pub fn new(storage_root: impl Into<PathBuf>) -> Self {
        Self {
            storage_root: storage_root.into(),
        }
    }

    #[must_use]
    pub fn storage_root(&self) -> &Path {
        &self.storage_root
    }

    /// The owner's private subdirectory under the storage root.
    #[must_use]
    pub fn user_root(&self, username: &str) -> PathBuf {
        self.storage_root.join(username)
    }

    /// Normalizes a logical path: forces a leading slash and collapses `.`,
    /// `..`, and redundant separators. A `..` that would climb past the root
    /// is rejected. `"/"` is a valid normalized path. Idempotent.
    ///
    /// Every operation runs this on its path inputs before any other use.
    pub fn normalize(&self, path: &str) -> Result<String> {
        let mut segments: Vec<&str> = Vec::new();

        for segment in path.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    if segments.pop().is_none() {
                        return Err(Error::InvalidPath(path.to_string()));
                    }
                }
                s => segments.push(s),
            }
        }

        if segments.is_empty() {
            return Ok("/".to_string());
        }
        Ok(format!("/{}", segments.join("/")))
    }

    /// Composes the owner's subdirectory with a normalized logical path and
    /// verifies the result is still contained in that subdirectory, resolving
    /// symlinks on the way. Creates the owner's subdirectory if absent.
    pub fn resolve_physical(&self, owner_username: &str, normalized: &str) -> Result<PathBuf> {
        validate_username(owner_username)?;

        let user_root = self.user_root(owner_username);
        std::fs::create_dir_all(&user_root)?;

        let candidate = match normalized.trim_start_matches('/') {
            "" => user_root.clone(),
            rel => user_root.join(rel),
        };

        // Normalization already removed `..`, so the only remaining escape
        // vector is a symlink somewhere along the existing part of the path.
        let canonical_root = user_root.canonicalize()?;
        let resolved_ancestor = nearest_existing_ancestor(&candidate).canonicalize()?;
        if !resolved_ancestor.starts_with(&canonical_root) {
            return Err(Error::InvalidPath(normalized.to_string()));
        }

        Ok(candidate)
    }

    /// Parent of a normalized path: `/` for a single segment, otherwise the
    /// path with the last segment removed.
    #[must_use]
    pub fn parent_of(&self, normalized: &str) -> String {
        match normalized.rfind('/') {
            Some(0) | None => "/".to_string(),
            Some(idx) => normalized[..idx].to_string(),
        }
    }

    /// Appends a single validated name to a normalized parent path.
    pub fn join_child(&self, parent: &str, name: &str) -> Result<String> {
        validate_segment(name)?;
        Ok(format!("{}/{}", parent.trim_end_matches('/'), name))
    }
}

/// Deepest ancestor of `path` (including `path` itself) that exists on disk.
/// `resolve_physical` guarantees at least the user root exists.
fn nearest_existing_ancestor(path: &Path) -> &Path {
    let mut current = path;
    while !current.exists() {
        match current.parent() {
            Some(parent) => current = parent,
            None => return path,
        }
    }
    current
}

fn validate_username(username: &str) -> Result<()> {
    if username.is_empty()
        || username == "."
        || username == ".."
        || username.contains(['/', '\\', '\0'])
    {
        return Err(Error::InvalidPath(format!("bad owner name: {username}")));
    }
    Ok(())
}

fn validate_segment(segment: &str) -> Result<()> {
    if segment.is_empty() || segment == "." || segment == ".." {
        return Err(Error::InvalidPath(format!("bad name: {segment}")));
    }

    if segment.len() > 255 {
        return Err(Error::InvalidPath(
            "name cannot exceed 255 characters".to_string(),
        ));
    }

    const INVALID_CHARS: &[char] = &['/', '\0', '\n', '\r'];
    if segment.chars().any(|c| INVALID_CHARS.contains(&c)) {
        return Err(Error::InvalidPath(format!("bad name: {segment}")));
    }

    Ok(())
}
