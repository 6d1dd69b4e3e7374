//! Group registry (§4.6): CRUD over groups and their membership edges,
//! with cycle rejection on insert. Distinct from
//! [`crate::acl::EffectiveGroupResolver`], which answers "what groups
//! is this user transitively in" for permission evaluation; this
//! module owns the registry and mutation side and bumps the shared
//! [`Generation`] counter so that resolver's cache stays coherent with
//! every `group_members` write (§4.2.4, §5).

use crate::cache::Generation;
use crate::error::{ConflictKind, CoreError, Result};
use crate::ids::IdClock;
use crate::store::{get_i64, get_opt_str, get_str, Bound, Statement, StorePool};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberType {
    User,
    Group,
}

impl MemberType {
    pub fn as_str(self) -> &'static str {
        match self {
            MemberType::User => "user",
            MemberType::Group => "group",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupRow {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub created_at: i64,
    pub created_by: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemberRow {
    pub member_type: MemberType,
    pub member_id: Uuid,
}

pub struct GroupRegistry {
    store: StorePool,
    clock: Arc<dyn IdClock>,
    generation: Arc<Generation>,
    max_depth: u32,
}

impl GroupRegistry {
    pub fn new(store: StorePool, clock: Arc<dyn IdClock>, generation: Arc<Generation>, max_depth: u32) -> Self {
        Self {
            store,
            clock,
            generation,
            max_depth,
        }
    }

    fn row_from(row: &sqlx::sqlite::SqliteRow) -> Result<GroupRow> {
        let id = Uuid::parse_str(&get_str(row, "id")?).map_err(|_| CoreError::internal("bad group id"))?;
        let created_by = get_opt_str(row, "created_by")?
            .map(|s| Uuid::parse_str(&s))
            .transpose()
            .map_err(|_| CoreError::internal("bad group created_by"))?;
        Ok(GroupRow {
            id,
            name: get_str(row, "name")?,
            description: get_opt_str(row, "description")?,
            created_at: get_i64(row, "created_at")?,
            created_by,
        })
    }

    pub async fn create(&self, name: &str, description: Option<String>, creator: Option<Uuid>) -> Result<GroupRow> {
        let id = self.clock.new_id();
        let now = self.clock.now();
        self.store
            .execute(&Statement::new(
                "INSERT INTO groups (id, name, description, created_at, created_by) VALUES (?, ?, ?, ?, ?)",
                vec![
                    Bound::Text(id.to_string()),
                    Bound::Text(name.to_string()),
                    description.clone().map(Bound::Text).unwrap_or(Bound::Null),
                    Bound::Int(now),
                    creator.map(|c| Bound::Text(c.to_string())).unwrap_or(Bound::Null),
                ],
            ))
            .await?;
        Ok(GroupRow {
            id,
            name: name.to_string(),
            description,
            created_at: now,
            created_by: creator,
        })
    }

    pub async fn get(&self, id: Uuid) -> Result<GroupRow> {
        let row = self
            .store
            .fetch_optional(&Statement::new(
                "SELECT * FROM groups WHERE id = ?",
                vec![Bound::Text(id.to_string())],
            ))
            .await?
            .ok_or_else(|| CoreError::not_found(format!("group {id}")))?;
        Self::row_from(&row)
    }

    pub async fn update(&self, id: Uuid, name: Option<String>, description: Option<String>) -> Result<GroupRow> {
        let current = self.get(id).await?;
        let new_name = name.unwrap_or(current.name);
        let new_description = description.or(current.description);
        self.store
            .execute(&Statement::new(
                "UPDATE groups SET name = ?, description = ? WHERE id = ?",
                vec![
                    Bound::Text(new_name),
                    new_description.map(Bound::Text).unwrap_or(Bound::Null),
                    Bound::Text(id.to_string()),
                ],
            ))
            .await?;
        self.get(id).await
    }

    pub async fn delete(&self, id: Uuid) -> Result<()> {
        let direct = self.list_direct_members(id).await?;
        if !direct.is_empty() {
            return Err(CoreError::Conflict(ConflictKind::GroupNotEmpty(id.to_string())));
        }
        let parents = self.direct_parents_of_group(id).await?;
        if !parents.is_empty() {
            return Err(CoreError::Conflict(ConflictKind::GroupInUse(id.to_string())));
        }
        let acl_refs = self
            .store
            .fetch_optional(&Statement::new(
                "SELECT 1 AS x FROM acl_entries WHERE principal_type = 'group' AND principal_id = ? LIMIT 1",
                vec![Bound::Text(id.to_string())],
            ))
            .await?;
        if acl_refs.is_some() {
            return Err(CoreError::Conflict(ConflictKind::GroupInUse(id.to_string())));
        }
        self.store
            .execute(&Statement::new(
                "DELETE FROM groups WHERE id = ?",
                vec![Bound::Text(id.to_string())],
            ))
            .await?;
        Ok(())
    }

    /// §4.6: reject if adding `member` (a group) into `group` would
    /// create a cycle — i.e. `member` is already `group` itself or one
    /// of its ancestors (a group that transitively contains `group`).
    pub async fn add_member(&self, group: Uuid, member_type: MemberType, member_id: Uuid) -> Result<()> {
        if member_type == MemberType::Group {
            if member_id == group {
                return Err(CoreError::Conflict(ConflictKind::GroupInUse(
                    "a group cannot contain itself".to_string(),
                )));
            }
            let ancestors = self.ancestors_of(group).await?;
            if ancestors.contains(&member_id) {
                return Err(CoreError::Conflict(ConflictKind::GroupInUse(format!(
                    "adding {member_id} to {group} would create a membership cycle"
                ))));
            }
        }
        let now = self.clock.now();
        self.store
            .execute(&Statement::new(
                "INSERT OR IGNORE INTO group_members (group_id, member_type, member_id, created_at) VALUES (?, ?, ?, ?)",
                vec![
                    Bound::Text(group.to_string()),
                    Bound::Text(member_type.as_str().to_string()),
                    Bound::Text(member_id.to_string()),
                    Bound::Int(now),
                ],
            ))
            .await?;
        self.generation.bump();
        Ok(())
    }

    pub async fn remove_member(&self, group: Uuid, member_type: MemberType, member_id: Uuid) -> Result<()> {
        self.store
            .execute(&Statement::new(
                "DELETE FROM group_members WHERE group_id = ? AND member_type = ? AND member_id = ?",
                vec![
                    Bound::Text(group.to_string()),
                    Bound::Text(member_type.as_str().to_string()),
                    Bound::Text(member_id.to_string()),
                ],
            ))
            .await?;
        self.generation.bump();
        Ok(())
    }

    pub async fn list_direct_members(&self, group: Uuid) -> Result<Vec<MemberRow>> {
        let rows = self
            .store
            .fetch_all(&Statement::new(
                "SELECT member_type, member_id FROM group_members WHERE group_id = ?",
                vec![Bound::Text(group.to_string())],
            ))
            .await?;
        rows.iter()
            .map(|r| {
                let member_type = match get_str(r, "member_type")?.as_str() {
                    "user" => MemberType::User,
                    "group" => MemberType::Group,
                    other => return Err(CoreError::internal(format!("bad member_type '{other}'"))),
                };
                let member_id = Uuid::parse_str(&get_str(r, "member_id")?)
                    .map_err(|_| CoreError::internal("bad member_id"))?;
                Ok(MemberRow { member_type, member_id })
            })
            .collect()
    }

    /// Recursive expansion (depth ≤ `max_depth`): every user id reached
    /// by walking downward through nested groups.
    pub async fn list_effective_members(&self, group: Uuid) -> Result<Vec<Uuid>> {
        let mut users = HashSet::new();
        let mut visited_groups = HashSet::new();
        visited_groups.insert(group);
        let mut frontier = vec![group];
        let mut depth = 0;
        while !frontier.is_empty() && depth < self.max_depth {
            let mut next = Vec::new();
            for g in frontier {
                for m in self.list_direct_members(g).await? {
                    match m.member_type {
                        MemberType::User => {
                            users.insert(m.member_id);
                        }
                        MemberType::Group => {
                            if visited_groups.insert(m.member_id) {
                                next.push(m.member_id);
                            }
                        }
                    }
                }
            }
            frontier = next;
            depth += 1;
        }
        Ok(users.into_iter().collect())
    }

    /// Groups directly containing `user`.
    pub async fn list_groups_containing_user(&self, user: Uuid) -> Result<Vec<Uuid>> {
        self.direct_parents_of("user", user).await
    }

    async fn direct_parents_of_group(&self, group: Uuid) -> Result<Vec<Uuid>> {
        self.direct_parents_of("group", group).await
    }

    async fn direct_parents_of(&self, member_type: &str, member_id: Uuid) -> Result<Vec<Uuid>> {
        let rows = self
            .store
            .fetch_all(&Statement::new(
                "SELECT group_id FROM group_members WHERE member_type = ? AND member_id = ?",
                vec![
                    Bound::Text(member_type.to_string()),
                    Bound::Text(member_id.to_string()),
                ],
            ))
            .await?;
        rows.iter()
            .map(|r| {
                Uuid::parse_str(&get_str(r, "group_id")?).map_err(|_| CoreError::internal("bad group_id"))
            })
            .collect()
    }

    /// Every group that transitively contains `group` (upward closure),
    /// not including `group` itself. Shares the BFS shape of
    /// [`crate::acl::EffectiveGroupResolver`] but seeded from a group
    /// rather than a user, since cycle detection needs the ancestor set
    /// of a group, not of a user's memberships.
    async fn ancestors_of(&self, group: Uuid) -> Result<HashSet<Uuid>> {
        let mut visited = HashSet::new();
        let mut frontier = vec![group];
        let mut depth = 0;
        while !frontier.is_empty() && depth < self.max_depth {
            let mut next = Vec::new();
            for g in frontier {
                for parent in self.direct_parents_of_group(g).await? {
                    if visited.insert(parent) {
                        next.push(parent);
                    }
                }
            }
            frontier = next;
            depth += 1;
        }
        Ok(visited)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::SystemIdClock;
    use crate::store::run_migrations;

    async fn test_registry() -> GroupRegistry {
        let store = StorePool::connect("sqlite::memory:", 1).await.unwrap();
        run_migrations(&store).await.unwrap();
        GroupRegistry::new(store, Arc::new(SystemIdClock::new()), Arc::new(Generation::new()), 10)
    }

    #[tokio::test]
    async fn rejects_direct_cycle() {
        let reg = test_registry().await;
        let a = reg.create("a", None, None).await.unwrap();
        let b = reg.create("b", None, None).await.unwrap();
        reg.add_member(a.id, MemberType::Group, b.id).await.unwrap();
        let err = reg.add_member(b.id, MemberType::Group, a.id).await.unwrap_err();
        assert!(matches!(err, CoreError::Conflict(ConflictKind::GroupInUse(_))));
    }

    #[tokio::test]
    async fn rejects_self_membership() {
        let reg = test_registry().await;
        let a = reg.create("a", None, None).await.unwrap();
        let err = reg.add_member(a.id, MemberType::Group, a.id).await.unwrap_err();
        assert!(matches!(err, CoreError::Conflict(ConflictKind::GroupInUse(_))));
    }

    #[tokio::test]
    async fn effective_members_expand_nested_groups() {
        let reg = test_registry().await;
        let outer = reg.create("outer", None, None).await.unwrap();
        let inner = reg.create("inner", None, None).await.unwrap();
        let user = Uuid::new_v4();
        reg.add_member(outer.id, MemberType::Group, inner.id).await.unwrap();
        reg.add_member(inner.id, MemberType::User, user).await.unwrap();

        let members = reg.list_effective_members(outer.id).await.unwrap();
        assert_eq!(members, vec![user]);
    }

    #[tokio::test]
    async fn delete_fails_when_nonempty() {
        let reg = test_registry().await;
        let g = reg.create("g", None, None).await.unwrap();
        reg.add_member(g.id, MemberType::User, Uuid::new_v4()).await.unwrap();
        let err = reg.delete(g.id).await.unwrap_err();
        assert!(matches!(err, CoreError::Conflict(ConflictKind::GroupNotEmpty(_))));
    }
}
