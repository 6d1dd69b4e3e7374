//! Effective group membership resolution (§4.2.4).
//!
//! A user's effective groups are the transitive closure of
//! `group_members` reachable by walking "is a member of" edges upward
//! from the user's direct memberships, including groups nested inside
//! other groups. Bounded by `max_group_depth` (I5) so a membership
//! cycle or a very deep nesting can't spin the resolver forever.
//!
//! Cached per user with a TTL plus a shared [`Generation`] counter: any
//! `group_members` write bumps the generation, which invalidates every
//! cached entry immediately regardless of its TTL, since one membership
//! change can affect many users' effective sets at once.

use crate::cache::{Generation, TtlCache};
use crate::store::{get_str, Bound, Statement, StorePool};
use crate::error::Result;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

struct CachedGroups {
    generation: u64,
    groups: Vec<Uuid>,
}

pub struct EffectiveGroupResolver {
    store: StorePool,
    cache: TtlCache<Uuid, CachedGroups>,
    generation: Arc<Generation>,
    max_depth: u32,
}

impl Clone for CachedGroups {
    fn clone(&self) -> Self {
        Self {
            generation: self.generation,
            groups: self.groups.clone(),
        }
    }
}

impl EffectiveGroupResolver {
    pub fn new(
        store: StorePool,
        generation: Arc<Generation>,
        ttl: Duration,
        max_depth: u32,
    ) -> Self {
        Self {
            store,
            cache: TtlCache::new(ttl),
            generation,
            max_depth,
        }
    }

    /// All groups `user_id` is transitively a member of, direct or
    /// nested, not including the user itself.
    pub async fn effective_groups(&self, user_id: Uuid) -> Result<Vec<Uuid>> {
        let current_gen = self.generation.current();
        if let Some(cached) = self.cache.get(&user_id) {
            if cached.generation == current_gen {
                return Ok(cached.groups);
            }
        }

        let groups = self.resolve(user_id).await?;
        self.cache.insert(
            user_id,
            CachedGroups {
                generation: current_gen,
                groups: groups.clone(),
            },
        );
        Ok(groups)
    }

    async fn resolve(&self, user_id: Uuid) -> Result<Vec<Uuid>> {
        let mut visited: HashSet<Uuid> = HashSet::new();
        let mut frontier: VecDeque<(Uuid, &'static str, u32)> = VecDeque::new();
        frontier.push_back((user_id, "user", 0));

        let mut result = Vec::new();
        let mut seen_members: HashSet<(&'static str, Uuid)> = HashSet::new();
        seen_members.insert(("user", user_id));

        while let Some((member_id, member_type, depth)) = frontier.pop_front() {
            if depth >= self.max_depth {
                continue;
            }
            let parents = self.direct_parents(member_id, member_type).await?;
            for parent in parents {
                if visited.contains(&parent) {
                    continue;
                }
                visited.insert(parent);
                result.push(parent);
                let key = ("group", parent);
                if !seen_members.contains(&key) {
                    seen_members.insert(key);
                    frontier.push_back((parent, "group", depth + 1));
                }
            }
        }

        Ok(result)
    }

    async fn direct_parents(&self, member_id: Uuid, member_type: &str) -> Result<Vec<Uuid>> {
        let stmt = Statement::new(
            "SELECT group_id FROM group_members WHERE member_type = ? AND member_id = ?",
            vec![
                Bound::Text(member_type.to_string()),
                Bound::Text(member_id.to_string()),
            ],
        );
        let rows = self.store.fetch_all(&stmt).await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let id = get_str(&row, "group_id")?;
            let id = Uuid::parse_str(&id)
                .map_err(|_| crate::error::CoreError::internal(format!("bad group_id '{id}'")))?;
            out.push(id);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::run_migrations;

    async fn test_store() -> StorePool {
        let store = StorePool::connect("sqlite::memory:", 1).await.unwrap();
        run_migrations(&store).await.unwrap();
        store
    }

    async fn insert_group(store: &StorePool, id: Uuid, name: &str) {
        store
            .execute(&Statement::new(
                "INSERT INTO groups (id, name, created_at) VALUES (?, ?, 0)",
                vec![Bound::Text(id.to_string()), Bound::Text(name.to_string())],
            ))
            .await
            .unwrap();
    }

    async fn insert_member(store: &StorePool, group_id: Uuid, member_type: &str, member_id: Uuid) {
        store
            .execute(&Statement::new(
                "INSERT INTO group_members (group_id, member_type, member_id, created_at) VALUES (?, ?, ?, 0)",
                vec![
                    Bound::Text(group_id.to_string()),
                    Bound::Text(member_type.to_string()),
                    Bound::Text(member_id.to_string()),
                ],
            ))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn resolves_nested_groups_transitively() {
        let store = test_store().await;
        let user = Uuid::new_v4();
        let inner = Uuid::new_v4();
        let outer = Uuid::new_v4();
        insert_group(&store, inner, "inner").await;
        insert_group(&store, outer, "outer").await;
        insert_member(&store, inner, "user", user).await;
        insert_member(&store, outer, "group", inner).await;

        let resolver = EffectiveGroupResolver::new(
            store,
            Arc::new(Generation::new()),
            Duration::from_secs(60),
            10,
        );
        let mut groups = resolver.effective_groups(user).await.unwrap();
        groups.sort();
        let mut expected = vec![inner, outer];
        expected.sort();
        assert_eq!(groups, expected);
    }

    #[tokio::test]
    async fn cycle_does_not_hang() {
        let store = test_store().await;
        let user = Uuid::new_v4();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        insert_group(&store, a, "a").await;
        insert_group(&store, b, "b").await;
        insert_member(&store, a, "user", user).await;
        insert_member(&store, b, "group", a).await;
        insert_member(&store, a, "group", b).await;

        let resolver = EffectiveGroupResolver::new(
            store,
            Arc::new(Generation::new()),
            Duration::from_secs(60),
            10,
        );
        let groups = resolver.effective_groups(user).await.unwrap();
        assert!(groups.len() <= 2);
    }

    #[tokio::test]
    async fn generation_bump_invalidates_cache() {
        let store = test_store().await;
        let user = Uuid::new_v4();
        let g = Uuid::new_v4();
        insert_group(&store, g, "g").await;

        let generation = Arc::new(Generation::new());
        let resolver =
            EffectiveGroupResolver::new(store.clone(), generation.clone(), Duration::from_secs(60), 10);
        assert_eq!(resolver.effective_groups(user).await.unwrap(), Vec::<Uuid>::new());

        insert_member(&store, g, "user", user).await;
        generation.bump();
        assert_eq!(resolver.effective_groups(user).await.unwrap(), vec![g]);
    }
}
