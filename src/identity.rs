use serde::{Deserialize, Serialize};

use crate::types::Principal;

/// What the external directory collaborator supplies for an authenticated
/// request. Credential verification already happened elsewhere; the vault
/// only upserts the principal and trusts the group list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityClaims {
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub is_admin: bool,
}

/// The identity acting in a single vault operation: the resolved principal
/// id, the username keying the actor's own physical namespace, and the
/// directory groups considered for group grants.
#[derive(Debug, Clone)]
pub struct Actor {
    pub id: String,
    pub username: String,
    pub groups: Vec<String>,
}

impl From<&Principal> for Actor {
    fn from(p: &Principal) -> Self {
        Self {
            id: p.id.clone(),
            username: p.username.clone(),
            groups: p.groups.clone(),
        }
    }
}
