//! Type registry (§4.5).
//!
//! Types are immutable apart from their descriptive metadata: `name`
//! and `category` are fixed at creation (§4.5 "types are immutable;
//! create a new type with a versioned name" — honored here by simply
//! refusing to touch those two columns from `update`).

use crate::cache::TtlCache;
use crate::error::{ConflictKind, CoreError, Result, ValidationKind};
use crate::ids::IdClock;
use crate::store::{get_i64, get_opt_str, get_str, Bound, Statement, StorePool};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeCategory {
    Entity,
    Link,
}

impl TypeCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            TypeCategory::Entity => "entity",
            TypeCategory::Link => "link",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "entity" => Ok(TypeCategory::Entity),
            "link" => Ok(TypeCategory::Link),
            other => Err(CoreError::Validation(ValidationKind::InvalidFields(format!(
                "unknown type category '{other}'"
            )))),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TypeRow {
    pub id: Uuid,
    pub name: String,
    pub category: TypeCategory,
    pub description: Option<String>,
    pub json_schema: Option<String>,
    pub created_at: i64,
    pub created_by: Option<Uuid>,
}

pub struct TypeRegistry {
    store: StorePool,
    clock: Arc<dyn IdClock>,
    /// §5 per-id cache; invalidated on `update`/`delete`.
    cache: TtlCache<Uuid, TypeRow>,
}

impl TypeRegistry {
    pub fn new(store: StorePool, clock: Arc<dyn IdClock>, cache_ttl: Duration) -> Self {
        Self {
            store,
            clock,
            cache: TtlCache::new(cache_ttl),
        }
    }

    fn row_from(row: &sqlx::sqlite::SqliteRow) -> Result<TypeRow> {
        let id = Uuid::parse_str(&get_str(row, "id")?)
            .map_err(|_| CoreError::internal("bad type id"))?;
        let created_by = get_opt_str(row, "created_by")?
            .map(|s| Uuid::parse_str(&s))
            .transpose()
            .map_err(|_| CoreError::internal("bad type created_by"))?;
        Ok(TypeRow {
            id,
            name: get_str(row, "name")?,
            category: TypeCategory::parse(&get_str(row, "category")?)?,
            description: get_opt_str(row, "description")?,
            json_schema: get_opt_str(row, "json_schema")?,
            created_at: get_i64(row, "created_at")?,
            created_by,
        })
    }

    pub async fn create(
        &self,
        name: &str,
        category: TypeCategory,
        description: Option<String>,
        json_schema: Option<String>,
        creator: Option<Uuid>,
    ) -> Result<TypeRow> {
        let existing = self
            .store
            .fetch_optional(&Statement::new(
                "SELECT id FROM types WHERE name = ?",
                vec![Bound::Text(name.to_string())],
            ))
            .await?;
        if existing.is_some() {
            return Err(CoreError::Validation(ValidationKind::InvalidFields(format!(
                "type name '{name}' already in use"
            ))));
        }

        let id = self.clock.new_id();
        let now = self.clock.now();
        self.store
            .execute(&Statement::new(
                "INSERT INTO types (id, name, category, description, json_schema, created_at, created_by) VALUES (?, ?, ?, ?, ?, ?, ?)",
                vec![
                    Bound::Text(id.to_string()),
                    Bound::Text(name.to_string()),
                    Bound::Text(category.as_str().to_string()),
                    description.clone().map(Bound::Text).unwrap_or(Bound::Null),
                    json_schema.clone().map(Bound::Text).unwrap_or(Bound::Null),
                    Bound::Int(now),
                    creator.map(|c| Bound::Text(c.to_string())).unwrap_or(Bound::Null),
                ],
            ))
            .await?;

        let row = TypeRow {
            id,
            name: name.to_string(),
            category,
            description,
            json_schema,
            created_at: now,
            created_by: creator,
        };
        self.cache.insert(id, row.clone());
        Ok(row)
    }

    /// Read-through the per-id cache (§5).
    pub async fn get(&self, id: Uuid) -> Result<TypeRow> {
        if let Some(row) = self.cache.get(&id) {
            return Ok(row);
        }
        let row = self
            .store
            .fetch_optional(&Statement::new(
                "SELECT * FROM types WHERE id = ?",
                vec![Bound::Text(id.to_string())],
            ))
            .await?
            .ok_or_else(|| CoreError::not_found(format!("type {id}")))?;
        let decoded = Self::row_from(&row)?;
        self.cache.insert(id, decoded.clone());
        Ok(decoded)
    }

    pub async fn list(&self) -> Result<Vec<TypeRow>> {
        let rows = self
            .store
            .fetch_all(&Statement::plain("SELECT * FROM types ORDER BY name ASC"))
            .await?;
        rows.iter().map(Self::row_from).collect()
    }

    pub async fn filter_by_category(&self, category: TypeCategory) -> Result<Vec<TypeRow>> {
        let rows = self
            .store
            .fetch_all(&Statement::new(
                "SELECT * FROM types WHERE category = ? ORDER BY name ASC",
                vec![Bound::Text(category.as_str().to_string())],
            ))
            .await?;
        rows.iter().map(Self::row_from).collect()
    }

    pub async fn count_by_category(&self, category: TypeCategory) -> Result<i64> {
        let row = self
            .store
            .fetch_optional(&Statement::new(
                "SELECT COUNT(*) AS n FROM types WHERE category = ?",
                vec![Bound::Text(category.as_str().to_string())],
            ))
            .await?
            .expect("COUNT always returns one row");
        get_i64(&row, "n")
    }

    /// §4.5 Update: only `description`/`json_schema` may change; `name`
    /// and `category` are immutable by construction (no parameter to
    /// set them).
    pub async fn update(
        &self,
        id: Uuid,
        description: Option<String>,
        json_schema: Option<String>,
    ) -> Result<TypeRow> {
        self.get(id).await?;
        self.store
            .execute(&Statement::new(
                "UPDATE types SET description = ?, json_schema = ? WHERE id = ?",
                vec![
                    description.clone().map(Bound::Text).unwrap_or(Bound::Null),
                    json_schema.clone().map(Bound::Text).unwrap_or(Bound::Null),
                    Bound::Text(id.to_string()),
                ],
            ))
            .await?;
        self.cache.invalidate(&id);
        self.get(id).await
    }

    pub async fn delete(&self, id: Uuid) -> Result<()> {
        let t = self.get(id).await?;
        let in_use_table = match t.category {
            TypeCategory::Entity => "entities",
            TypeCategory::Link => "links",
        };
        let row = self
            .store
            .fetch_optional(&Statement::new(
                format!(
                    "SELECT COUNT(*) AS n FROM {in_use_table} WHERE type_id = ? AND is_latest = 1 AND is_deleted = 0"
                ),
                vec![Bound::Text(id.to_string())],
            ))
            .await?
            .expect("COUNT always returns one row");
        let n = get_i64(&row, "n")?;
        if n > 0 {
            return Err(CoreError::Conflict(ConflictKind::TypeInUse(id.to_string(), n as u64)));
        }
        self.store
            .execute(&Statement::new(
                "DELETE FROM types WHERE id = ?",
                vec![Bound::Text(id.to_string())],
            ))
            .await?;
        self.cache.invalidate(&id);
        Ok(())
    }
}
