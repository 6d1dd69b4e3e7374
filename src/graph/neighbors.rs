//! Single-hop neighbor queries (§4.4.1).

use crate::acl::{AclEngine, Permission};
use crate::error::Result;
use crate::identity::CallerIdentity;
use crate::store::{Bound, Statement, StorePool};
use crate::versioning::{ChainRow, ChainStore, Table};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Out,
    In,
    Both,
}

#[derive(Debug, Clone)]
pub struct Neighbor {
    pub link: ChainRow,
    pub peer: ChainRow,
    /// `Out` if the link points away from the center, `In` otherwise.
    pub edge_direction: Direction,
}

#[derive(Debug, Clone, Default)]
pub struct NeighborFilter<'a> {
    pub link_type_ids: Option<&'a [Uuid]>,
    pub entity_type_ids: Option<&'a [Uuid]>,
    pub include_deleted: bool,
}

/// §4.4.1 steps 3–5: joins `links × entities` under `direction`, gates
/// both the link and the peer by read permission, and applies the
/// optional type filters. ACL filtering is done in-memory (post-query)
/// rather than spliced into SQL — acceptable per §4.4.1 step 4's
/// "apply the over-fetch + in-memory ACL filter" allowance, and simpler
/// to keep correct across both endpoint axes at once.
pub async fn get_neighbors(
    store: &StorePool,
    entities: &ChainStore,
    links: &ChainStore,
    acl: &AclEngine,
    center: &ChainRow,
    direction: Direction,
    filter: &NeighborFilter<'_>,
    caller: &CallerIdentity,
) -> Result<Vec<Neighbor>> {
    let mut out = Vec::new();
    if matches!(direction, Direction::Out | Direction::Both) {
        out.extend(
            one_direction(store, entities, links, acl, center, Direction::Out, filter, caller).await?,
        );
    }
    if matches!(direction, Direction::In | Direction::Both) {
        out.extend(
            one_direction(store, entities, links, acl, center, Direction::In, filter, caller).await?,
        );
    }
    Ok(out)
}

async fn one_direction(
    store: &StorePool,
    entities: &ChainStore,
    links: &ChainStore,
    acl: &AclEngine,
    center: &ChainRow,
    direction: Direction,
    filter: &NeighborFilter<'_>,
    caller: &CallerIdentity,
) -> Result<Vec<Neighbor>> {
    let endpoint_col = match direction {
        Direction::Out => "source_entity_id",
        Direction::In => "target_entity_id",
        Direction::Both => unreachable!(),
    };

    let mut sql = format!(
        "SELECT * FROM links WHERE is_latest = 1 AND {endpoint_col} IN (SELECT id FROM entities WHERE chain_id = ?)"
    );
    let mut bindings = vec![Bound::Text(center.chain_id.to_string())];
    if !filter.include_deleted {
        sql.push_str(" AND is_deleted = 0");
    }
    if let Some(type_ids) = filter.link_type_ids {
        if !type_ids.is_empty() {
            let placeholders = std::iter::repeat("?").take(type_ids.len()).collect::<Vec<_>>().join(",");
            sql.push_str(&format!(" AND type_id IN ({placeholders})"));
            bindings.extend(type_ids.iter().map(|id| Bound::Text(id.to_string())));
        }
    }

    sql.push_str(" ORDER BY created_at DESC, id DESC");
    let rows = store.fetch_all(&Statement::new(sql, bindings)).await?;
    let mut out = Vec::with_capacity(rows.len());

    for row in rows {
        let link = Table::Links.row_from_sqlite(&row)?;
        if !acl
            .has_permission(link.acl_id, caller.user_id, caller.is_admin, Permission::Read)
            .await?
        {
            continue;
        }

        let peer_seed = match direction {
            Direction::Out => link.target_entity_id.unwrap(),
            Direction::In => link.source_entity_id.unwrap(),
            Direction::Both => unreachable!(),
        };
        let peer = match entities.resolve_latest(peer_seed).await {
            Ok(p) => p,
            Err(_) => continue,
        };
        if !filter.include_deleted && peer.is_deleted {
            continue;
        }
        if let Some(type_ids) = filter.entity_type_ids {
            if !type_ids.is_empty() && !type_ids.contains(&peer.type_id) {
                continue;
            }
        }
        if !acl
            .has_permission(peer.acl_id, caller.user_id, caller.is_admin, Permission::Read)
            .await?
        {
            continue;
        }

        out.push(Neighbor {
            link,
            peer,
            edge_direction: direction,
        });
    }

    Ok(out)
}
