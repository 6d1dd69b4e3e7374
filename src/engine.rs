//! Request/orchestration facade (§4.7).
//!
//! `Engine` wires the store pool, clock, and focused sub-engines
//! together once at startup; the per-component `*Api` structs expose
//! one method per operation named in §4.1–§4.6 and own no algorithmic
//! logic themselves — they resolve permissions and delegate, mirroring
//! the teacher's central-dispatch-calls-into-engines shape.

use crate::acl::{AclEngine, AclSpec, AclStore, EffectiveGroupResolver, Permission, PrincipalType};
use crate::audit::{record_best_effort, AuditSink, TracingAuditSink};
use crate::cache::Generation;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::filter::FilterExpr;
use crate::graph::{self, BfsResult, Direction, NeighborFilter, Neighbor, ShortestPathResult};
use crate::groups::{GroupRegistry, GroupRow, MemberRow, MemberType};
use crate::identity::CallerIdentity;
use crate::ids::{IdClock, SystemIdClock};
use crate::store::{get_opt_str, get_str, run_migrations, Bound, Statement, StorePool};
use crate::types::{TypeCategory, TypeRegistry, TypeRow};
use crate::versioning::{ChainRow, ChainStore, HistoryEntry, Table};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub struct Engine {
    pub entities: EntityApi,
    pub links: LinkApi,
    pub acl: AclApi,
    pub types: TypeApi,
    pub groups: GroupApi,
    pub graph: GraphApi,
}

impl Engine {
    pub async fn connect(config: EngineConfig) -> Result<Self> {
        let store = StorePool::connect(&config.database_url, config.max_connections).await?;
        run_migrations(&store).await?;
        Ok(Self::from_store(store, config, Arc::new(TracingAuditSink)))
    }

    pub fn from_store(store: StorePool, config: EngineConfig, audit: Arc<dyn AuditSink>) -> Self {
        let clock: Arc<dyn IdClock> = Arc::new(SystemIdClock::new());
        let generation = Arc::new(Generation::new());

        let acl_store = AclStore::new(store.clone(), clock.clone());
        let group_resolver = EffectiveGroupResolver::new(
            store.clone(),
            generation.clone(),
            Duration::from_secs(config.group_cache_ttl_secs),
            config.max_group_depth,
        );
        let acl_engine = Arc::new(AclEngine::new(
            acl_store,
            store.clone(),
            group_resolver,
            config.acl_bulk_threshold,
        ));

        let entities = Arc::new(ChainStore::new(
            store.clone(),
            clock.clone(),
            acl_engine.clone(),
            Table::Entities,
            Duration::from_secs(config.entity_cache_ttl_secs),
        ));
        let links = Arc::new(ChainStore::new(
            store.clone(),
            clock.clone(),
            acl_engine.clone(),
            Table::Links,
            Duration::from_secs(config.link_cache_ttl_secs),
        ));

        let type_registry = Arc::new(TypeRegistry::new(
            store.clone(),
            clock.clone(),
            Duration::from_secs(config.type_cache_ttl_secs),
        ));
        let group_registry = Arc::new(GroupRegistry::new(
            store.clone(),
            clock.clone(),
            generation.clone(),
            config.max_group_depth,
        ));

        Self {
            entities: EntityApi {
                chain: entities.clone(),
                audit: audit.clone(),
                max_filter_depth: config.max_filter_depth,
                max_path_depth: config.max_path_depth,
            },
            links: LinkApi {
                chain: links.clone(),
                entities: entities.clone(),
                audit: audit.clone(),
                max_filter_depth: config.max_filter_depth,
                max_path_depth: config.max_path_depth,
            },
            acl: AclApi {
                store: store.clone(),
                acl: acl_engine.clone(),
                entities: entities.clone(),
                links: links.clone(),
            },
            types: TypeApi { registry: type_registry },
            groups: GroupApi {
                registry: group_registry,
                acl: acl_engine.clone(),
            },
            graph: GraphApi {
                store,
                entities,
                links,
                acl: acl_engine,
            },
        }
    }
}

pub struct EntityApi {
    chain: Arc<ChainStore>,
    audit: Arc<dyn AuditSink>,
    max_filter_depth: u32,
    max_path_depth: u32,
}

impl EntityApi {
    pub async fn create(
        &self,
        type_id: Uuid,
        properties: Value,
        acl_spec: AclSpec,
        caller: &CallerIdentity,
    ) -> Result<ChainRow> {
        let row = self.chain.create(type_id, properties, acl_spec, caller, None).await?;
        record_best_effort(self.audit.as_ref(), "entity.create", row.id, caller.user_id, row.properties.clone()).await;
        Ok(row)
    }

    pub async fn update(&self, any_id: Uuid, properties: Value, caller: &CallerIdentity) -> Result<ChainRow> {
        let row = self.chain.update(any_id, properties, caller).await?;
        record_best_effort(self.audit.as_ref(), "entity.update", row.id, caller.user_id, row.properties.clone()).await;
        Ok(row)
    }

    pub async fn soft_delete(&self, any_id: Uuid, caller: &CallerIdentity) -> Result<ChainRow> {
        let row = self.chain.soft_delete(any_id, caller).await?;
        record_best_effort(self.audit.as_ref(), "entity.soft_delete", row.id, caller.user_id, Value::Null).await;
        Ok(row)
    }

    pub async fn restore(&self, any_id: Uuid, caller: &CallerIdentity) -> Result<ChainRow> {
        let row = self.chain.restore(any_id, caller).await?;
        record_best_effort(self.audit.as_ref(), "entity.restore", row.id, caller.user_id, Value::Null).await;
        Ok(row)
    }

    pub async fn set_acl(&self, any_id: Uuid, acl_spec: AclSpec, caller: &CallerIdentity) -> Result<ChainRow> {
        let row = self.chain.set_acl(any_id, acl_spec, caller).await?;
        record_best_effort(self.audit.as_ref(), "entity.set_acl", row.id, caller.user_id, Value::Null).await;
        Ok(row)
    }

    pub async fn get_latest(&self, any_id: Uuid, caller: &CallerIdentity) -> Result<ChainRow> {
        self.chain.get_latest(any_id, caller).await
    }

    pub async fn get_version(&self, chain_any_id: Uuid, version: i64, caller: &CallerIdentity) -> Result<ChainRow> {
        self.chain.get_version(chain_any_id, version, caller).await
    }

    pub async fn list_versions(&self, chain_any_id: Uuid, caller: &CallerIdentity) -> Result<Vec<ChainRow>> {
        self.chain.list_versions(chain_any_id, caller).await
    }

    pub async fn history_with_diffs(&self, chain_any_id: Uuid, caller: &CallerIdentity) -> Result<Vec<HistoryEntry>> {
        self.chain.history_with_diffs(chain_any_id, caller).await
    }

    /// §4.3 search: lists entities the caller can read, optionally
    /// narrowed by a compiled property filter.
    pub async fn search(
        &self,
        filter: Option<&FilterExpr>,
        include_deleted: bool,
        caller: &CallerIdentity,
    ) -> Result<Vec<ChainRow>> {
        self.chain
            .search(filter, include_deleted, self.max_filter_depth, self.max_path_depth, caller)
            .await
    }
}

pub struct LinkApi {
    chain: Arc<ChainStore>,
    entities: Arc<ChainStore>,
    audit: Arc<dyn AuditSink>,
    max_filter_depth: u32,
    max_path_depth: u32,
}

impl LinkApi {
    pub async fn create(
        &self,
        type_id: Uuid,
        source_entity_id: Uuid,
        target_entity_id: Uuid,
        properties: Value,
        acl_spec: AclSpec,
        caller: &CallerIdentity,
    ) -> Result<ChainRow> {
        // Endpoints must resolve to a live chain; §3 "endpoints
        // reference any row id in the target's chain".
        self.entities.resolve_latest(source_entity_id).await?;
        self.entities.resolve_latest(target_entity_id).await?;

        let row = self
            .chain
            .create(
                type_id,
                properties,
                acl_spec,
                caller,
                Some((source_entity_id, target_entity_id)),
            )
            .await?;
        record_best_effort(self.audit.as_ref(), "link.create", row.id, caller.user_id, row.properties.clone()).await;
        Ok(row)
    }

    pub async fn update(&self, any_id: Uuid, properties: Value, caller: &CallerIdentity) -> Result<ChainRow> {
        let row = self.chain.update(any_id, properties, caller).await?;
        record_best_effort(self.audit.as_ref(), "link.update", row.id, caller.user_id, row.properties.clone()).await;
        Ok(row)
    }

    pub async fn soft_delete(&self, any_id: Uuid, caller: &CallerIdentity) -> Result<ChainRow> {
        let row = self.chain.soft_delete(any_id, caller).await?;
        record_best_effort(self.audit.as_ref(), "link.soft_delete", row.id, caller.user_id, Value::Null).await;
        Ok(row)
    }

    pub async fn restore(&self, any_id: Uuid, caller: &CallerIdentity) -> Result<ChainRow> {
        let row = self.chain.restore(any_id, caller).await?;
        record_best_effort(self.audit.as_ref(), "link.restore", row.id, caller.user_id, Value::Null).await;
        Ok(row)
    }

    pub async fn set_acl(&self, any_id: Uuid, acl_spec: AclSpec, caller: &CallerIdentity) -> Result<ChainRow> {
        let row = self.chain.set_acl(any_id, acl_spec, caller).await?;
        record_best_effort(self.audit.as_ref(), "link.set_acl", row.id, caller.user_id, Value::Null).await;
        Ok(row)
    }

    pub async fn get_latest(&self, any_id: Uuid, caller: &CallerIdentity) -> Result<ChainRow> {
        self.chain.get_latest(any_id, caller).await
    }

    pub async fn get_version(&self, chain_any_id: Uuid, version: i64, caller: &CallerIdentity) -> Result<ChainRow> {
        self.chain.get_version(chain_any_id, version, caller).await
    }

    pub async fn list_versions(&self, chain_any_id: Uuid, caller: &CallerIdentity) -> Result<Vec<ChainRow>> {
        self.chain.list_versions(chain_any_id, caller).await
    }

    pub async fn history_with_diffs(&self, chain_any_id: Uuid, caller: &CallerIdentity) -> Result<Vec<HistoryEntry>> {
        self.chain.history_with_diffs(chain_any_id, caller).await
    }

    /// §4.3 search over links.
    pub async fn search(
        &self,
        filter: Option<&FilterExpr>,
        include_deleted: bool,
        caller: &CallerIdentity,
    ) -> Result<Vec<ChainRow>> {
        self.chain
            .search(filter, include_deleted, self.max_filter_depth, self.max_path_depth, caller)
            .await
    }
}

/// §6 ACL wire format: `{"entries": [{principal_type, principal_id, permission}, ...]}`,
/// each entry enriched with the principal's display name / email when
/// the principal is a user and that row exists.
#[derive(Debug, Clone, Serialize)]
pub struct WireAclEntry {
    pub principal_type: PrincipalType,
    pub principal_id: Uuid,
    pub permission: Permission,
    pub display_name: Option<String>,
    pub email: Option<String>,
}

pub struct AclApi {
    store: StorePool,
    acl: Arc<AclEngine>,
    entities: Arc<ChainStore>,
    links: Arc<ChainStore>,
}

impl AclApi {
    pub async fn get_entity_acl(&self, any_id: Uuid, caller: &CallerIdentity) -> Result<Vec<WireAclEntry>> {
        let row = self.entities.get_latest(any_id, caller).await?;
        self.enrich(row.acl_id).await
    }

    pub async fn get_link_acl(&self, any_id: Uuid, caller: &CallerIdentity) -> Result<Vec<WireAclEntry>> {
        let row = self.links.get_latest(any_id, caller).await?;
        self.enrich(row.acl_id).await
    }

    async fn enrich(&self, acl_id: Option<i64>) -> Result<Vec<WireAclEntry>> {
        let Some(acl_id) = acl_id else {
            return Ok(Vec::new());
        };
        let entries = self.acl.acl_store().get_entries(acl_id).await?;
        let mut out = Vec::with_capacity(entries.len());
        for e in entries {
            let (display_name, email) = if e.principal_type == PrincipalType::User {
                self.user_identity(e.principal_id).await?
            } else {
                (None, None)
            };
            out.push(WireAclEntry {
                principal_type: e.principal_type,
                principal_id: e.principal_id,
                permission: e.permission,
                display_name,
                email,
            });
        }
        Ok(out)
    }

    async fn user_identity(&self, user_id: Uuid) -> Result<(Option<String>, Option<String>)> {
        let row = self
            .store
            .fetch_optional(&Statement::new(
                "SELECT display_name, email FROM users WHERE id = ?",
                vec![Bound::Text(user_id.to_string())],
            ))
            .await?;
        match row {
            Some(r) => Ok((get_opt_str(&r, "display_name")?, Some(get_str(&r, "email")?))),
            None => Ok((None, None)),
        }
    }
}

pub struct TypeApi {
    registry: Arc<TypeRegistry>,
}

impl TypeApi {
    pub async fn create(
        &self,
        name: &str,
        category: TypeCategory,
        description: Option<String>,
        json_schema: Option<String>,
        caller: &CallerIdentity,
    ) -> Result<TypeRow> {
        self.registry.create(name, category, description, json_schema, caller.user_id).await
    }

    pub async fn get(&self, id: Uuid) -> Result<TypeRow> {
        self.registry.get(id).await
    }

    pub async fn list(&self) -> Result<Vec<TypeRow>> {
        self.registry.list().await
    }

    pub async fn filter_by_category(&self, category: TypeCategory) -> Result<Vec<TypeRow>> {
        self.registry.filter_by_category(category).await
    }

    pub async fn count_by_category(&self, category: TypeCategory) -> Result<i64> {
        self.registry.count_by_category(category).await
    }

    pub async fn update(&self, id: Uuid, description: Option<String>, json_schema: Option<String>) -> Result<TypeRow> {
        self.registry.update(id, description, json_schema).await
    }

    pub async fn delete(&self, id: Uuid) -> Result<()> {
        self.registry.delete(id).await
    }
}

pub struct GroupApi {
    registry: Arc<GroupRegistry>,
    acl: Arc<AclEngine>,
}

impl GroupApi {
    pub async fn create(&self, name: &str, description: Option<String>, caller: &CallerIdentity) -> Result<GroupRow> {
        self.registry.create(name, description, caller.user_id).await
    }

    pub async fn update(&self, id: Uuid, name: Option<String>, description: Option<String>) -> Result<GroupRow> {
        self.registry.update(id, name, description).await
    }

    pub async fn delete(&self, id: Uuid) -> Result<()> {
        self.registry.delete(id).await
    }

    pub async fn add_member(&self, group: Uuid, member_type: MemberType, member_id: Uuid) -> Result<()> {
        self.registry.add_member(group, member_type, member_id).await
    }

    pub async fn remove_member(&self, group: Uuid, member_type: MemberType, member_id: Uuid) -> Result<()> {
        self.registry.remove_member(group, member_type, member_id).await
    }

    pub async fn list_direct_members(&self, group: Uuid) -> Result<Vec<MemberRow>> {
        self.registry.list_direct_members(group).await
    }

    pub async fn list_effective_members(&self, group: Uuid) -> Result<Vec<Uuid>> {
        self.registry.list_effective_members(group).await
    }

    pub async fn list_groups_containing_user(&self, user: Uuid) -> Result<Vec<Uuid>> {
        self.registry.list_groups_containing_user(user).await
    }

    pub async fn list_groups_containing_user_transitively(&self, user: Uuid) -> Result<Vec<Uuid>> {
        self.acl.effective_groups_for(user).await
    }
}

pub struct GraphApi {
    store: StorePool,
    entities: Arc<ChainStore>,
    links: Arc<ChainStore>,
    acl: Arc<AclEngine>,
}

impl GraphApi {
    pub async fn neighbors(
        &self,
        center_id: Uuid,
        direction: Direction,
        filter: &NeighborFilter<'_>,
        caller: &CallerIdentity,
    ) -> Result<Vec<Neighbor>> {
        let center = self.entities.get_latest(center_id, caller).await?;
        graph::get_neighbors(&self.store, &self.entities, &self.links, &self.acl, &center, direction, filter, caller)
            .await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn bfs(
        &self,
        start_id: Uuid,
        max_depth: u32,
        direction: Direction,
        filter: &NeighborFilter<'_>,
        return_paths: bool,
        node_cap: Option<usize>,
        caller: &CallerIdentity,
    ) -> Result<BfsResult> {
        let max_depth = max_depth.clamp(1, 10);
        graph::bfs(
            &self.store,
            &self.entities,
            &self.links,
            &self.acl,
            start_id,
            max_depth,
            direction,
            filter,
            return_paths,
            node_cap,
            caller,
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn shortest_path(
        &self,
        from: Uuid,
        to: Uuid,
        type_id: Option<Uuid>,
        include_deleted: bool,
        max_depth: u32,
        caller: &CallerIdentity,
    ) -> Result<ShortestPathResult> {
        // `max_depth=0` is a meaningful boundary (spec.md:290): it must
        // reach `graph::shortest_path` unclamped so `from == to`
        // returns the zero-length path and `from != to` returns
        // `NoPathFound` instead of running a real 1-hop search.
        let max_depth = max_depth.min(10);
        graph::shortest_path(
            &self.store,
            &self.entities,
            &self.links,
            &self.acl,
            from,
            to,
            type_id,
            include_deleted,
            max_depth,
            caller,
        )
        .await
    }
}
