//! ACL engine (§2 component 4, §4.2).
//!
//! Interns normalized, deduplicated ACLs and answers the two permission
//! questions the rest of the engine needs: "can this caller touch this
//! one object" (§4.2.6 single-object check) and "which objects can this
//! caller see" (§4.2.6 bulk list clause). Polymorphic principals are a
//! tagged sum (spec §9 design note), matched exhaustively — no
//! inheritance.

mod access;
mod canon;
mod groups;
mod intern;

pub use access::{AccessibleAcls, AclEngine, BulkClause};
pub use canon::{canonicalize, CanonicalAcl};
pub use groups::EffectiveGroupResolver;
pub use intern::AclStore;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Either side of a principal tag (spec §9): a user or a group, never
/// both, matched exhaustively wherever permissions are evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrincipalType {
    User,
    Group,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    Read,
    Write,
}

impl Permission {
    /// `upward_closure` from §4.2.5: the set of stored permissions that
    /// satisfy a required permission. `write` implies `read`, so a
    /// `read` requirement is satisfied by either a `read` or `write`
    /// grant; a `write` requirement needs an explicit `write` grant.
    pub fn upward_closure(self) -> &'static [Permission] {
        match self {
            Permission::Read => &[Permission::Read, Permission::Write],
            Permission::Write => &[Permission::Write],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Permission::Read => "read",
            Permission::Write => "write",
        }
    }
}

/// One ACL entry: a principal granted a permission.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AclEntry {
    pub principal_type: PrincipalType,
    pub principal_id: Uuid,
    pub permission: Permission,
}

impl AclEntry {
    pub fn user(id: Uuid, permission: Permission) -> Self {
        Self {
            principal_type: PrincipalType::User,
            principal_id: id,
            permission,
        }
    }

    pub fn group(id: Uuid, permission: Permission) -> Self {
        Self {
            principal_type: PrincipalType::Group,
            principal_id: id,
            permission,
        }
    }
}

/// Caller-facing ACL spec (§4.2.3): absent means "inherit creator
/// write", `Some(vec![])` means public, `Some(entries)` means exactly
/// those entries plus the implicit creator grant.
pub type AclSpec = Option<Vec<AclEntry>>;

/// §4.2.3 creator-write inheritance.
pub fn resolve_acl_spec(spec: AclSpec, creator_id: Uuid) -> Vec<AclEntry> {
    match spec {
        None => vec![AclEntry::user(creator_id, Permission::Write)],
        Some(entries) if entries.is_empty() => Vec::new(),
        Some(mut entries) => {
            let creator_write = AclEntry::user(creator_id, Permission::Write);
            if !entries.contains(&creator_write) {
                entries.push(creator_write);
            }
            entries
        }
    }
}
