use std::sync::Arc;

use crate::catalog::Catalog;
use crate::error::{Error, Result};
use crate::types::PermissionLevel;

/// Computes effective permissions and gates every operation on them.
///
/// The catalog handle is an explicit dependency passed in at construction,
/// so tests can substitute a fake store.
#[derive(Clone)]
pub struct AccessEngine {
    catalog: Arc<dyn Catalog>,
}

impl AccessEngine {
    pub fn new(catalog: Arc<dyn Catalog>) -> Self {
        Self { catalog }
    }

    /// The highest permission a requester can exercise on a file.
    ///
    /// Strict precedence, first match wins, no aggregation across tiers:
    /// owner -> implicit Full; direct grant -> its level; group grants ->
    /// the highest rank among groups the requester belongs to; else None.
    pub fn effective_permission(
        &self,
        requester_id: &str,
        file_id: &str,
        groups: &[String],
    ) -> Result<Option<PermissionLevel>> {
        let Some(file) = self.catalog.get_file(file_id)? else {
            return Ok(None);
        };

        if file.owner_id == requester_id {
            return Ok(Some(PermissionLevel::Full));
        }

        if let Some(grant) = self.catalog.get_user_grant(file_id, requester_id)? {
            return Ok(Some(grant.level));
        }

        if !groups.is_empty() {
            let best = self
                .catalog
                .get_group_grants(file_id, groups)?
                .into_iter()
                .map(|g| g.level)
                .max();
            if best.is_some() {
                return Ok(best);
            }
        }

        Ok(None)
    }

    /// True if the requester's effective permission satisfies `required`.
    pub fn check_permission(
        &self,
        requester_id: &str,
        file_id: &str,
        required: PermissionLevel,
        groups: &[String],
    ) -> Result<bool> {
        Ok(self
            .effective_permission(requester_id, file_id, groups)?
            .is_some_and(|level| level.satisfies(required)))
    }

    /// Like `check_permission`, but a denial is a hard `Forbidden`.
    pub fn require(
        &self,
        requester_id: &str,
        file_id: &str,
        required: PermissionLevel,
        groups: &[String],
    ) -> Result<()> {
        if !self.check_permission(requester_id, file_id, required, groups)? {
            return Err(Error::Forbidden);
        }
        Ok(())
    }
}
