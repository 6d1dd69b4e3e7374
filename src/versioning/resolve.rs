//! Latest-resolution protocol (§4.1.1).
//!
//! Resolves any id that may belong to a historical row to the single
//! current `is_latest` row in its chain, by walking `previous_version_id`
//! successors forward with a recursive CTE. Does not trust the
//! `chain_id` supplement column as input here — that column exists to
//! make `ListVersions`/`HistoryWithDiffs` a range scan once the latest
//! row (and therefore the chain id) is already known, not to shortcut
//! resolution from an arbitrary historical id.

use super::Table;
use crate::store::{get_bool, get_i64, get_opt_str, get_str, Bound, Statement, StorePool};
use crate::error::Result;
use uuid::Uuid;

use super::ChainRow;

pub async fn resolve_latest(store: &StorePool, table: Table, any_id: Uuid) -> Result<Option<ChainRow>> {
    let sql = format!(
        "WITH RECURSIVE chain(id) AS ( \
            SELECT id FROM {t} WHERE id = ? \
            UNION \
            SELECT t2.id FROM {t} t2 JOIN chain c ON t2.previous_version_id = c.id \
         ) SELECT {t}.* FROM {t} WHERE id IN (SELECT id FROM chain) AND is_latest = 1",
        t = table.name()
    );
    let stmt = Statement::new(sql, vec![Bound::Text(any_id.to_string())]);
    let row = store.fetch_optional(&stmt).await?;
    row.map(|r| table.row_from_sqlite(&r)).transpose()
}

impl Table {
    /// Decodes one raw row from `self`'s table into a [`ChainRow`].
    /// Exposed beyond `versioning` so the graph module can decode rows
    /// it fetches directly (e.g. one-hop neighbor queries) without
    /// duplicating column parsing.
    pub fn row_from_sqlite(&self, row: &sqlx::sqlite::SqliteRow) -> Result<ChainRow> {
        let parse_uuid = |s: String, what: &str| -> Result<Uuid> {
            Uuid::parse_str(&s)
                .map_err(|_| crate::error::CoreError::internal(format!("bad {what} '{s}'")))
        };
        let id = parse_uuid(get_str(row, "id")?, "id")?;
        let chain_id = parse_uuid(get_str(row, "chain_id")?, "chain_id")?;
        let type_id = parse_uuid(get_str(row, "type_id")?, "type_id")?;
        let properties: serde_json::Value = serde_json::from_str(&get_str(row, "properties")?)?;
        let version = get_i64(row, "version")?;
        let previous_version_id = get_opt_str(row, "previous_version_id")?
            .map(|s| parse_uuid(s, "previous_version_id"))
            .transpose()?;
        let created_at = get_i64(row, "created_at")?;
        let created_by = get_opt_str(row, "created_by")?
            .map(|s| parse_uuid(s, "created_by"))
            .transpose()?;
        let is_deleted = get_bool(row, "is_deleted")?;
        let is_latest = get_bool(row, "is_latest")?;
        let acl_id = {
            use sqlx::Row;
            row.try_get::<Option<i64>, _>("acl_id")
                .map_err(|e| crate::error::CoreError::internal(format!("column acl_id: {e}")))?
        };
        let (source_entity_id, target_entity_id) = if matches!(self, Table::Links) {
            (
                Some(parse_uuid(get_str(row, "source_entity_id")?, "source_entity_id")?),
                Some(parse_uuid(get_str(row, "target_entity_id")?, "target_entity_id")?),
            )
        } else {
            (None, None)
        };

        Ok(ChainRow {
            id,
            chain_id,
            type_id,
            properties,
            version,
            previous_version_id,
            created_at,
            created_by,
            is_deleted,
            is_latest,
            acl_id,
            source_entity_id,
            target_entity_id,
        })
    }
}
