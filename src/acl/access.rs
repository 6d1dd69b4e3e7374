//! Permission evaluation (§4.2.5, §4.2.6): the single-object check and
//! the bulk list clause, including the in-list/in-memory threshold
//! switchover.

use super::groups::EffectiveGroupResolver;
use super::intern::AclStore;
use super::{Permission, PrincipalType};
use crate::error::Result;
use crate::store::{get_i64, Bound, Statement, StorePool};
use std::collections::HashSet;
use uuid::Uuid;

pub struct AclEngine {
    store: AclStore,
    raw_store: StorePool,
    groups: EffectiveGroupResolver,
    bulk_threshold: usize,
}

/// The set of ACL ids a caller can see for a given permission, as
/// computed once and reused across a listing request (§4.2.6).
#[derive(Debug, Clone)]
pub enum AccessibleAcls {
    /// Admin: every object is visible, no filter needed.
    All,
    Ids {
        acl_ids: HashSet<i64>,
        /// Whether the caller can see publicly-readable (NULL `acl_id`)
        /// objects under the permission being evaluated.
        includes_public: bool,
    },
}

/// A materialized bulk-list filter (§4.2.6): either a SQL fragment to
/// splice into a listing query's `WHERE`, or a signal to fall back to
/// in-memory filtering because the accessible set exceeds the
/// threshold `T`.
pub enum BulkClause {
    NoFilter,
    Sql { fragment: String, bindings: Vec<Bound> },
    InMemory(AccessibleAcls),
}

impl AclEngine {
    pub fn new(
        store: AclStore,
        raw_store: StorePool,
        groups: EffectiveGroupResolver,
        bulk_threshold: usize,
    ) -> Self {
        Self {
            store,
            raw_store,
            groups,
            bulk_threshold,
        }
    }

    pub fn acl_store(&self) -> &AclStore {
        &self.store
    }

    /// Exposes §4.2.4 resolution directly for callers (e.g. the group
    /// registry facade) that need "groups containing user
    /// transitively" rather than a permission decision.
    pub async fn effective_groups_for(&self, user_id: Uuid) -> Result<Vec<Uuid>> {
        self.groups.effective_groups(user_id).await
    }

    /// §4.2.5 single-object check. `acl_id = None` is the public
    /// sentinel: readable by anyone, writable by no one via the ACL
    /// path. Admins bypass the ACL entirely.
    pub async fn has_permission(
        &self,
        acl_id: Option<i64>,
        caller_user_id: Option<Uuid>,
        is_admin: bool,
        required: Permission,
    ) -> Result<bool> {
        if is_admin {
            return Ok(true);
        }
        let Some(acl_id) = acl_id else {
            return Ok(required == Permission::Read);
        };
        let Some(user_id) = caller_user_id else {
            return Ok(false);
        };

        let entries = self.store.get_entries(acl_id).await?;
        let allowed_perms = required.upward_closure();
        let direct = entries
            .iter()
            .any(|e| e.principal_type == PrincipalType::User && e.principal_id == user_id && allowed_perms.contains(&e.permission));
        if direct {
            return Ok(true);
        }

        let group_entries: Vec<_> = entries
            .iter()
            .filter(|e| e.principal_type == PrincipalType::Group && allowed_perms.contains(&e.permission))
            .collect();
        if group_entries.is_empty() {
            return Ok(false);
        }
        let effective_groups = self.groups.effective_groups(user_id).await?;
        Ok(group_entries
            .iter()
            .any(|e| effective_groups.contains(&e.principal_id)))
    }

    /// §4.2.6: every ACL id granting `required` to this caller, either
    /// directly or through a transitive group membership, plus whether
    /// the public sentinel also satisfies `required`.
    pub async fn accessible_acls(
        &self,
        caller_user_id: Option<Uuid>,
        is_admin: bool,
        required: Permission,
    ) -> Result<AccessibleAcls> {
        if is_admin {
            return Ok(AccessibleAcls::All);
        }
        let includes_public = required == Permission::Read;
        let Some(user_id) = caller_user_id else {
            return Ok(AccessibleAcls::Ids {
                acl_ids: HashSet::new(),
                includes_public,
            });
        };

        let effective_groups = self.groups.effective_groups(user_id).await?;
        let perms = required.upward_closure();

        let mut principal_binds: Vec<Bound> = vec![Bound::Text(user_id.to_string())];
        let mut group_placeholders = String::new();
        for (i, g) in effective_groups.iter().enumerate() {
            if i > 0 {
                group_placeholders.push(',');
            }
            group_placeholders.push('?');
            principal_binds.push(Bound::Text(g.to_string()));
        }

        let mut perm_placeholders = String::new();
        let mut perm_binds = Vec::with_capacity(perms.len());
        for (i, p) in perms.iter().enumerate() {
            if i > 0 {
                perm_placeholders.push(',');
            }
            perm_placeholders.push('?');
            perm_binds.push(Bound::Text(p.as_str().to_string()));
        }

        let principal_clause = if effective_groups.is_empty() {
            "(principal_type = 'user' AND principal_id = ?)".to_string()
        } else {
            format!(
                "((principal_type = 'user' AND principal_id = ?) OR (principal_type = 'group' AND principal_id IN ({group_placeholders})))"
            )
        };

        let sql = format!(
            "SELECT DISTINCT acl_id FROM acl_entries WHERE permission IN ({perm_placeholders}) AND {principal_clause}"
        );

        let mut bindings = perm_binds;
        bindings.extend(principal_binds);

        let rows = self
            .raw_store
            .fetch_all(&Statement::new(sql, bindings))
            .await?;
        let mut acl_ids = HashSet::with_capacity(rows.len());
        for row in rows {
            acl_ids.insert(get_i64(&row, "acl_id")?);
        }

        Ok(AccessibleAcls::Ids {
            acl_ids,
            includes_public,
        })
    }

    /// §4.2.6: turn an [`AccessibleAcls`] into a usable filter for a
    /// listing query over `column`. Above `bulk_threshold` ids, hands
    /// back [`BulkClause::InMemory`] so the caller fetches candidate
    /// rows without the `IN (...)` blowing up and filters with
    /// [`AclEngine::row_is_accessible`] instead.
    pub fn bulk_clause(&self, column: &str, accessible: &AccessibleAcls) -> BulkClause {
        match accessible {
            AccessibleAcls::All => BulkClause::NoFilter,
            AccessibleAcls::Ids { acl_ids, includes_public } => {
                if acl_ids.len() > self.bulk_threshold {
                    return BulkClause::InMemory(accessible.clone());
                }
                if acl_ids.is_empty() {
                    if *includes_public {
                        return BulkClause::Sql {
                            fragment: format!("{column} IS NULL"),
                            bindings: Vec::new(),
                        };
                    }
                    // Matches nothing: caller has no ACL ids and no
                    // public access, so the clause must exclude every
                    // row including ones with a NULL column.
                    return BulkClause::Sql {
                        fragment: "1 = 0".to_string(),
                        bindings: Vec::new(),
                    };
                }
                let placeholders = std::iter::repeat("?")
                    .take(acl_ids.len())
                    .collect::<Vec<_>>()
                    .join(",");
                let bindings = acl_ids.iter().map(|id| Bound::Int(*id)).collect();
                let fragment = if *includes_public {
                    format!("({column} IS NULL OR {column} IN ({placeholders}))")
                } else {
                    format!("{column} IN ({placeholders})")
                };
                BulkClause::Sql { fragment, bindings }
            }
        }
    }

    /// In-memory counterpart to [`BulkClause::InMemory`] for a single
    /// candidate row's `acl_id` column value.
    pub fn row_is_accessible(accessible: &AccessibleAcls, acl_id: Option<i64>) -> bool {
        match accessible {
            AccessibleAcls::All => true,
            AccessibleAcls::Ids { acl_ids, includes_public } => match acl_id {
                None => *includes_public,
                Some(id) => acl_ids.contains(&id),
            },
        }
    }
}
