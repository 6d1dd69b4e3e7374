//! §4.1 operations, implemented once against whichever [`Table`] the
//! caller selects.

use super::resolve::resolve_latest;
use super::{diff_properties, ChainRow, HistoryEntry, Table};
use crate::acl::{canonicalize, resolve_acl_spec, AclEngine, AclSpec, BulkClause, Permission};
use crate::cache::TtlCache;
use crate::error::{CoreError, ConflictKind, Result};
use crate::filter::{FilterExpr, GeneratedColumns};
use crate::identity::{read_denied, write_denied, CallerIdentity};
use crate::ids::IdClock;
use crate::store::{get_str, Bound, Statement, StorePool};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use uuid::Uuid;

pub struct ChainStore {
    store: StorePool,
    clock: Arc<dyn IdClock>,
    acl: Arc<AclEngine>,
    table: Table,
    generated_columns: OnceCell<GeneratedColumns>,
    /// §5 per-id cache: keyed by either `id` or `chain_id`, both
    /// resolving to the same latest row. Invalidated on any mutation to
    /// the chain (`append`), not just on expiry.
    latest_cache: TtlCache<Uuid, ChainRow>,
    /// §5 per-version cache, keyed by `(chain_id, version)`. A given
    /// version's data never changes once written, except for the
    /// `is_latest` flag on the version that `append` just superseded,
    /// which `append` invalidates explicitly.
    version_cache: TtlCache<(Uuid, i64), ChainRow>,
}

impl ChainStore {
    pub fn new(
        store: StorePool,
        clock: Arc<dyn IdClock>,
        acl: Arc<AclEngine>,
        table: Table,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            acl,
            table,
            generated_columns: OnceCell::new(),
            latest_cache: TtlCache::new(cache_ttl),
            version_cache: TtlCache::new(cache_ttl),
        }
    }

    async fn type_exists(&self, type_id: Uuid) -> Result<bool> {
        let stmt = Statement::new(
            "SELECT category FROM types WHERE id = ?",
            vec![Bound::Text(type_id.to_string())],
        );
        match self.store.fetch_optional(&stmt).await? {
            Some(row) => Ok(get_str(&row, "category")? == self.table.type_category()),
            None => Ok(false),
        }
    }

    /// §4.1 Create. `endpoints` must be `Some((source, target))` for
    /// [`Table::Links`] and `None` for [`Table::Entities`].
    pub async fn create(
        &self,
        type_id: Uuid,
        properties: Value,
        acl_spec: AclSpec,
        caller: &CallerIdentity,
        endpoints: Option<(Uuid, Uuid)>,
    ) -> Result<ChainRow> {
        let creator = caller
            .user_id
            .ok_or_else(|| write_denied(caller, format!("creating a {}", self.table.name())))?;

        if !self.type_exists(type_id).await? {
            return Err(CoreError::not_found(format!("type {type_id}")));
        }

        if matches!(self.table, Table::Links) && endpoints.is_none() {
            return Err(CoreError::internal("link creation requires endpoints"));
        }

        let entries = resolve_acl_spec(acl_spec, creator);
        let canonical = canonicalize(&entries);
        let acl_id = self.acl.acl_store().get_or_create(&canonical).await?;

        let id = self.clock.new_id();
        let now = self.clock.now();

        let row = ChainRow {
            id,
            chain_id: id,
            type_id,
            properties,
            version: 1,
            previous_version_id: None,
            created_at: now,
            created_by: Some(creator),
            is_deleted: false,
            is_latest: true,
            acl_id,
            source_entity_id: endpoints.map(|(s, _)| s),
            target_entity_id: endpoints.map(|(_, t)| t),
        };

        self.insert(&row).await?;
        self.latest_cache.insert(row.id, row.clone());
        self.latest_cache.insert(row.chain_id, row.clone());
        tracing::info!(kind = self.table.name(), chain_id = %row.chain_id, new_version = row.version, "created");
        Ok(row)
    }

    async fn insert(&self, row: &ChainRow) -> Result<()> {
        let sql = match self.table {
            Table::Entities => {
                "INSERT INTO entities (id, chain_id, type_id, properties, version, previous_version_id, created_at, created_by, is_deleted, is_latest, acl_id) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
            }
            Table::Links => {
                "INSERT INTO links (id, chain_id, type_id, properties, version, previous_version_id, created_at, created_by, is_deleted, is_latest, acl_id, source_entity_id, target_entity_id) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
            }
        };
        let mut bindings = vec![
            Bound::Text(row.id.to_string()),
            Bound::Text(row.chain_id.to_string()),
            Bound::Text(row.type_id.to_string()),
            Bound::Text(serde_json::to_string(&row.properties)?),
            Bound::Int(row.version),
            row.previous_version_id
                .map(|id| Bound::Text(id.to_string()))
                .unwrap_or(Bound::Null),
            Bound::Int(row.created_at),
            row.created_by
                .map(|id| Bound::Text(id.to_string()))
                .unwrap_or(Bound::Null),
            Bound::Bool(row.is_deleted),
            Bound::Bool(row.is_latest),
            row.acl_id.map(Bound::Int).unwrap_or(Bound::Null),
        ];
        if matches!(self.table, Table::Links) {
            bindings.push(Bound::Text(row.source_entity_id.unwrap().to_string()));
            bindings.push(Bound::Text(row.target_entity_id.unwrap().to_string()));
        }
        self.store.execute(&Statement::new(sql, bindings)).await?;
        Ok(())
    }

    /// §4.1.1, read-through the per-id TTL cache (§5).
    pub async fn resolve_latest(&self, any_id: Uuid) -> Result<ChainRow> {
        if let Some(row) = self.latest_cache.get(&any_id) {
            return Ok(row);
        }
        let row = resolve_latest(&self.store, self.table, any_id)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("{} {any_id}", self.table.name())))?;
        self.latest_cache.insert(row.id, row.clone());
        self.latest_cache.insert(row.chain_id, row.clone());
        Ok(row)
    }

    /// §4.1 GetLatest, gated by read permission; ACL-invisible objects
    /// surface as `NotFound` per §7.
    pub async fn get_latest(&self, any_id: Uuid, caller: &CallerIdentity) -> Result<ChainRow> {
        let row = self.resolve_latest(any_id).await?;
        self.require_permission(&row, caller, Permission::Read).await?;
        Ok(row)
    }

    pub async fn get_version(
        &self,
        chain_any_id: Uuid,
        version: i64,
        caller: &CallerIdentity,
    ) -> Result<ChainRow> {
        let latest = self.resolve_latest(chain_any_id).await?;
        self.require_permission(&latest, caller, Permission::Read).await?;

        let key = (latest.chain_id, version);
        if let Some(row) = self.version_cache.get(&key) {
            return Ok(row);
        }

        let stmt = Statement::new(
            format!(
                "SELECT * FROM {} WHERE chain_id = ? AND version = ?",
                self.table.name()
            ),
            vec![Bound::Text(latest.chain_id.to_string()), Bound::Int(version)],
        );
        let row = self
            .store
            .fetch_optional(&stmt)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("{} version {version}", self.table.name())))?;
        let decoded = self.table.row_from_sqlite(&row)?;
        self.version_cache.insert(key, decoded.clone());
        Ok(decoded)
    }

    pub async fn list_versions(
        &self,
        chain_any_id: Uuid,
        caller: &CallerIdentity,
    ) -> Result<Vec<ChainRow>> {
        let latest = self.resolve_latest(chain_any_id).await?;
        self.require_permission(&latest, caller, Permission::Read).await?;
        let stmt = Statement::new(
            format!(
                "SELECT * FROM {} WHERE chain_id = ? ORDER BY version ASC",
                self.table.name()
            ),
            vec![Bound::Text(latest.chain_id.to_string())],
        );
        let rows = self.store.fetch_all(&stmt).await?;
        rows.iter().map(|r| self.table.row_from_sqlite(r)).collect()
    }

    pub async fn history_with_diffs(
        &self,
        chain_any_id: Uuid,
        caller: &CallerIdentity,
    ) -> Result<Vec<HistoryEntry>> {
        let versions = self.list_versions(chain_any_id, caller).await?;
        let mut out = Vec::with_capacity(versions.len());
        let mut previous: Option<&Value> = None;
        for row in &versions {
            let d = previous.map(|p| diff_properties(p, &row.properties));
            out.push(HistoryEntry {
                row: row.clone(),
                diff: d,
            });
            previous = Some(&row.properties);
        }
        Ok(out)
    }

    /// §2 "efficient per-user filtering for list queries": combines
    /// the ACL bulk clause (§4.2.6) with the compiled filter tree
    /// (§4.3). `filter = None` lists every object the caller can read.
    pub async fn search(
        &self,
        filter: Option<&FilterExpr>,
        include_deleted: bool,
        max_filter_depth: u32,
        max_path_depth: u32,
        caller: &CallerIdentity,
    ) -> Result<Vec<ChainRow>> {
        let generated = self
            .generated_columns
            .get_or_try_init(|| GeneratedColumns::load(&self.store, self.table.type_category()))
            .await?;

        let accessible = self
            .acl
            .accessible_acls(caller.user_id, caller.is_admin, Permission::Read)
            .await?;
        let bulk = self.acl.bulk_clause("acl_id", &accessible);

        let mut sql = format!("SELECT * FROM {} WHERE is_latest = 1", self.table.name());
        let mut bindings = Vec::new();
        if !include_deleted {
            sql.push_str(" AND is_deleted = 0");
        }
        if let BulkClause::Sql { fragment, bindings: b } = &bulk {
            sql.push_str(" AND ");
            sql.push_str(fragment);
            bindings.extend(b.clone());
        }
        if let Some(expr) = filter {
            let (fragment, binds) =
                crate::filter::compile(expr, "properties", generated, max_filter_depth, max_path_depth)?;
            sql.push_str(" AND ");
            sql.push_str(&fragment);
            bindings.extend(binds);
        }

        let rows = self.store.fetch_all(&Statement::new(sql, bindings)).await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let decoded = self.table.row_from_sqlite(&row)?;
            if let BulkClause::InMemory(ref acc) = bulk {
                if !AclEngine::row_is_accessible(acc, decoded.acl_id) {
                    continue;
                }
            }
            out.push(decoded);
        }
        Ok(out)
    }

    async fn require_permission(
        &self,
        row: &ChainRow,
        caller: &CallerIdentity,
        required: Permission,
    ) -> Result<()> {
        let allowed = self
            .acl
            .has_permission(row.acl_id, caller.user_id, caller.is_admin, required)
            .await?;
        if allowed {
            return Ok(());
        }
        Err(match required {
            Permission::Read => read_denied(caller, format!("{} {}", self.table.name(), row.id)),
            Permission::Write => write_denied(caller, format!("{} {}", self.table.name(), row.id)),
        })
    }

    /// Flip the current latest row's `is_latest` to false and insert
    /// `new_row` in one batch (§4.1.3, §5). Detects a losing race on
    /// the flip (zero rows affected) and surfaces
    /// `ConcurrentModification` rather than committing a half-applied
    /// append.
    async fn append(&self, old_id: Uuid, new_row: &ChainRow) -> Result<()> {
        let table = self.table.name();
        let flip = Statement::new(
            format!("UPDATE {table} SET is_latest = 0 WHERE id = ? AND is_latest = 1"),
            vec![Bound::Text(old_id.to_string())],
        );

        let insert_sql = match self.table {
            Table::Entities => {
                "INSERT INTO entities (id, chain_id, type_id, properties, version, previous_version_id, created_at, created_by, is_deleted, is_latest, acl_id) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
            }
            Table::Links => {
                "INSERT INTO links (id, chain_id, type_id, properties, version, previous_version_id, created_at, created_by, is_deleted, is_latest, acl_id, source_entity_id, target_entity_id) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
            }
        };
        let mut insert_bindings = vec![
            Bound::Text(new_row.id.to_string()),
            Bound::Text(new_row.chain_id.to_string()),
            Bound::Text(new_row.type_id.to_string()),
            Bound::Text(serde_json::to_string(&new_row.properties)?),
            Bound::Int(new_row.version),
            new_row
                .previous_version_id
                .map(|id| Bound::Text(id.to_string()))
                .unwrap_or(Bound::Null),
            Bound::Int(new_row.created_at),
            new_row
                .created_by
                .map(|id| Bound::Text(id.to_string()))
                .unwrap_or(Bound::Null),
            Bound::Bool(new_row.is_deleted),
            Bound::Bool(new_row.is_latest),
            new_row.acl_id.map(Bound::Int).unwrap_or(Bound::Null),
        ];
        if matches!(self.table, Table::Links) {
            insert_bindings.push(Bound::Text(new_row.source_entity_id.unwrap().to_string()));
            insert_bindings.push(Bound::Text(new_row.target_entity_id.unwrap().to_string()));
        }
        let insert = Statement::new(insert_sql, insert_bindings);

        let chain_id = new_row.chain_id;
        self.store
            .batch_with(&[flip, insert], move |i, affected| {
                if i == 0 && affected == 0 {
                    tracing::warn!(%chain_id, "losing race on is_latest flip");
                    return Err(CoreError::Conflict(ConflictKind::ConcurrentModification(
                        chain_id.to_string(),
                    )));
                }
                Ok(())
            })
            .await?;

        // §5 "invalidated on any mutation to that chain": the old row's
        // `id`/`chain_id` keys no longer point at the latest version,
        // and the version it held just lost `is_latest`.
        self.latest_cache.invalidate(&old_id);
        self.latest_cache.invalidate(&chain_id);
        self.latest_cache.insert(new_row.id, new_row.clone());
        self.latest_cache.insert(chain_id, new_row.clone());
        if new_row.version > 1 {
            self.version_cache.invalidate(&(chain_id, new_row.version - 1));
        }

        tracing::info!(kind = table, %chain_id, new_version = new_row.version, "appended");
        Ok(())
    }

    fn next_version(
        &self,
        current: &ChainRow,
        properties: Value,
        is_deleted: bool,
        acl_id: Option<i64>,
    ) -> ChainRow {
        ChainRow {
            id: self.clock.new_id(),
            chain_id: current.chain_id,
            type_id: current.type_id,
            properties,
            version: current.version + 1,
            previous_version_id: Some(current.id),
            created_at: self.clock.now(),
            created_by: current.created_by,
            is_deleted,
            is_latest: true,
            acl_id,
            source_entity_id: current.source_entity_id,
            target_entity_id: current.target_entity_id,
        }
    }

    pub async fn update(
        &self,
        any_id: Uuid,
        properties: Value,
        caller: &CallerIdentity,
    ) -> Result<ChainRow> {
        let current = self.resolve_latest(any_id).await?;
        if current.is_deleted {
            return Err(CoreError::Conflict(ConflictKind::EntityDeletedCannotUpdate(
                current.chain_id.to_string(),
            )));
        }
        self.require_permission(&current, caller, Permission::Write).await?;
        let new_row = self.next_version(&current, properties, false, current.acl_id);
        self.append(current.id, &new_row).await?;
        Ok(new_row)
    }

    pub async fn soft_delete(&self, any_id: Uuid, caller: &CallerIdentity) -> Result<ChainRow> {
        let current = self.resolve_latest(any_id).await?;
        if current.is_deleted {
            return Err(CoreError::Conflict(ConflictKind::AlreadyDeleted(
                current.chain_id.to_string(),
            )));
        }
        self.require_permission(&current, caller, Permission::Write).await?;
        let new_row = self.next_version(&current, current.properties.clone(), true, current.acl_id);
        self.append(current.id, &new_row).await?;
        Ok(new_row)
    }

    pub async fn restore(&self, any_id: Uuid, caller: &CallerIdentity) -> Result<ChainRow> {
        let current = self.resolve_latest(any_id).await?;
        if !current.is_deleted {
            return Err(CoreError::Conflict(ConflictKind::NotDeleted(
                current.chain_id.to_string(),
            )));
        }
        self.require_permission(&current, caller, Permission::Write).await?;
        let new_row = self.next_version(&current, current.properties.clone(), false, current.acl_id);
        self.append(current.id, &new_row).await?;
        Ok(new_row)
    }

    pub async fn set_acl(
        &self,
        any_id: Uuid,
        acl_spec: AclSpec,
        caller: &CallerIdentity,
    ) -> Result<ChainRow> {
        let current = self.resolve_latest(any_id).await?;
        if current.is_deleted {
            return Err(CoreError::Conflict(ConflictKind::AlreadyDeleted(
                current.chain_id.to_string(),
            )));
        }
        // Evaluated against the *current* ACL, per §4.1 SetAcl.
        self.require_permission(&current, caller, Permission::Write).await?;
        let creator = current.created_by.unwrap_or_else(|| self.clock.new_id());
        let entries = resolve_acl_spec(acl_spec, creator);
        let canonical = canonicalize(&entries);
        let acl_id = self.acl.acl_store().get_or_create(&canonical).await?;
        let new_row = self.next_version(&current, current.properties.clone(), false, acl_id);
        self.append(current.id, &new_row).await?;
        Ok(new_row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acl::{AclStore, EffectiveGroupResolver};
    use crate::cache::Generation;
    use crate::ids::SystemIdClock;
    use crate::store::run_migrations;
    use serde_json::json;
    use std::time::Duration;

    async fn test_store() -> StorePool {
        let store = StorePool::connect("sqlite::memory:", 1).await.unwrap();
        run_migrations(&store).await.unwrap();
        store
    }

    async fn seed_entity_type(store: &StorePool, id: Uuid) {
        store
            .execute(&Statement::new(
                "INSERT INTO types (id, name, category, created_at) VALUES (?, 'doc', 'entity', 0)",
                vec![Bound::Text(id.to_string())],
            ))
            .await
            .unwrap();
    }

    fn build_acl_engine(store: StorePool, clock: Arc<dyn IdClock>) -> Arc<AclEngine> {
        let acl_store = AclStore::new(store.clone(), clock);
        let groups = EffectiveGroupResolver::new(
            store.clone(),
            Arc::new(Generation::new()),
            Duration::from_secs(300),
            10,
        );
        Arc::new(AclEngine::new(acl_store, store, groups, 1000))
    }

    #[tokio::test]
    async fn create_then_update_appends_new_version() {
        let store = test_store().await;
        let clock: Arc<dyn IdClock> = Arc::new(SystemIdClock::new());
        let type_id = clock.new_id();
        seed_entity_type(&store, type_id).await;
        let acl = build_acl_engine(store.clone(), clock.clone());
        let chain = ChainStore::new(store, clock.clone(), acl, Table::Entities, Duration::from_secs(60));

        let creator = clock.new_id();
        let caller = CallerIdentity::user(creator);
        let created = chain
            .create(type_id, json!({"name": "a"}), None, &caller, None)
            .await
            .unwrap();
        assert_eq!(created.version, 1);

        let updated = chain
            .update(created.id, json!({"name": "b"}), &caller)
            .await
            .unwrap();
        assert_eq!(updated.version, 2);
        assert_eq!(updated.previous_version_id, Some(created.id));

        let latest = chain.get_latest(created.id, &caller).await.unwrap();
        assert_eq!(latest.id, updated.id);
    }

    #[tokio::test]
    async fn soft_delete_then_update_conflicts() {
        let store = test_store().await;
        let clock: Arc<dyn IdClock> = Arc::new(SystemIdClock::new());
        let type_id = clock.new_id();
        seed_entity_type(&store, type_id).await;
        let acl = build_acl_engine(store.clone(), clock.clone());
        let chain = ChainStore::new(store, clock.clone(), acl, Table::Entities, Duration::from_secs(60));

        let creator = clock.new_id();
        let caller = CallerIdentity::user(creator);
        let created = chain
            .create(type_id, json!({}), None, &caller, None)
            .await
            .unwrap();
        chain.soft_delete(created.id, &caller).await.unwrap();

        let err = chain.update(created.id, json!({"x": 1}), &caller).await.unwrap_err();
        assert!(matches!(
            err,
            CoreError::Conflict(ConflictKind::EntityDeletedCannotUpdate(_))
        ));
    }

    #[tokio::test]
    async fn non_owner_cannot_write() {
        let store = test_store().await;
        let clock: Arc<dyn IdClock> = Arc::new(SystemIdClock::new());
        let type_id = clock.new_id();
        seed_entity_type(&store, type_id).await;
        let acl = build_acl_engine(store.clone(), clock.clone());
        let chain = ChainStore::new(store, clock.clone(), acl, Table::Entities, Duration::from_secs(60));

        let owner = CallerIdentity::user(clock.new_id());
        let stranger = CallerIdentity::user(clock.new_id());
        let created = chain
            .create(type_id, json!({}), None, &owner, None)
            .await
            .unwrap();

        let err = chain
            .update(created.id, json!({"x": 1}), &stranger)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Forbidden(_)));
    }

    #[tokio::test]
    async fn anonymous_read_of_private_object_is_unauthenticated() {
        let store = test_store().await;
        let clock: Arc<dyn IdClock> = Arc::new(SystemIdClock::new());
        let type_id = clock.new_id();
        seed_entity_type(&store, type_id).await;
        let acl = build_acl_engine(store.clone(), clock.clone());
        let chain = ChainStore::new(store, clock.clone(), acl, Table::Entities, Duration::from_secs(60));

        let owner = CallerIdentity::user(clock.new_id());
        let created = chain
            .create(type_id, json!({}), None, &owner, None)
            .await
            .unwrap();

        let anon = CallerIdentity::anonymous();
        let err = chain.get_latest(created.id, &anon).await.unwrap_err();
        assert!(matches!(err, CoreError::Unauthenticated(_)));
    }

    #[tokio::test]
    async fn public_acl_is_readable_by_anyone() {
        let store = test_store().await;
        let clock: Arc<dyn IdClock> = Arc::new(SystemIdClock::new());
        let type_id = clock.new_id();
        seed_entity_type(&store, type_id).await;
        let acl = build_acl_engine(store.clone(), clock.clone());
        let chain = ChainStore::new(store, clock.clone(), acl, Table::Entities, Duration::from_secs(60));

        let owner = CallerIdentity::user(clock.new_id());
        let created = chain
            .create(type_id, json!({}), Some(Vec::new()), &owner, None)
            .await
            .unwrap();
        assert_eq!(created.acl_id, None);

        let anon = CallerIdentity::anonymous();
        let fetched = chain.get_latest(created.id, &anon).await.unwrap();
        assert_eq!(fetched.id, created.id);
    }

    #[tokio::test]
    async fn history_with_diffs_has_null_diff_on_version_one() {
        let store = test_store().await;
        let clock: Arc<dyn IdClock> = Arc::new(SystemIdClock::new());
        let type_id = clock.new_id();
        seed_entity_type(&store, type_id).await;
        let acl = build_acl_engine(store.clone(), clock.clone());
        let chain = ChainStore::new(store, clock.clone(), acl, Table::Entities, Duration::from_secs(60));

        let owner = CallerIdentity::user(clock.new_id());
        let created = chain
            .create(type_id, json!({"a": 1}), None, &owner, None)
            .await
            .unwrap();
        chain
            .update(created.id, json!({"a": 2}), &owner)
            .await
            .unwrap();

        let history = chain.history_with_diffs(created.id, &owner).await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(history[0].diff.is_none());
        assert!(history[1].diff.is_some());
        assert_eq!(
            history[1].diff.as_ref().unwrap().changed.get("a").unwrap().new,
            json!(2)
        );
    }
}
