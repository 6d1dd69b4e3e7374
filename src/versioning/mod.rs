//! Version-chain store (§3, §4.1).
//!
//! Entities and links share one versioning algorithm; the only
//! difference is the backing table and the two extra endpoint columns
//! links carry. [`Table`] names which table a call targets, [`ChainRow`]
//! is the shared row shape (endpoint fields are `None` for entities),
//! and [`ChainStore`] in `chain.rs` implements the operations of §4.1
//! once against either.

mod chain;
pub mod diff;
mod resolve;

pub use chain::ChainStore;
pub use diff::{diff as diff_properties, Changed, Diff};

use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Entities,
    Links,
}

impl Table {
    pub fn name(&self) -> &'static str {
        match self {
            Table::Entities => "entities",
            Table::Links => "links",
        }
    }

    pub fn type_category(&self) -> &'static str {
        match self {
            Table::Entities => "entity",
            Table::Links => "link",
        }
    }
}

/// A single version row, shared shape for entities and links.
/// `source_entity_id`/`target_entity_id` are populated only for
/// [`Table::Links`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChainRow {
    pub id: Uuid,
    pub chain_id: Uuid,
    pub type_id: Uuid,
    pub properties: Value,
    pub version: i64,
    pub previous_version_id: Option<Uuid>,
    pub created_at: i64,
    pub created_by: Option<Uuid>,
    pub is_deleted: bool,
    pub is_latest: bool,
    pub acl_id: Option<i64>,
    pub source_entity_id: Option<Uuid>,
    pub target_entity_id: Option<Uuid>,
}

/// One entry of a `HistoryWithDiffs` result (§4.1): the row plus its
/// diff against the previous version, `None` for version 1.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub row: ChainRow,
    pub diff: Option<Diff>,
}
