//! Shortest path (§4.4.3): BFS over outbound edges only, with full
//! path tracking so ties resolve to the most-recently-created edges
//! (the neighbor query is already ordered `created_at DESC, id DESC`).

use super::neighbors::{get_neighbors, Direction, NeighborFilter};
use crate::acl::AclEngine;
use crate::error::{CoreError, Result};
use crate::identity::CallerIdentity;
use crate::store::StorePool;
use crate::versioning::{ChainRow, ChainStore};
use std::collections::{HashSet, VecDeque};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct PathHop {
    pub entity: ChainRow,
    /// The link traversed to reach this hop; `None` for the starting
    /// entity, including the zero-length `from == to` case.
    pub link: Option<ChainRow>,
}

#[derive(Debug, Clone)]
pub struct ShortestPathResult {
    pub hops: Vec<PathHop>,
}

#[allow(clippy::too_many_arguments)]
pub async fn shortest_path(
    store: &StorePool,
    entities: &ChainStore,
    links: &ChainStore,
    acl: &AclEngine,
    from: Uuid,
    to: Uuid,
    type_id: Option<Uuid>,
    include_deleted: bool,
    max_depth: u32,
    caller: &CallerIdentity,
) -> Result<ShortestPathResult> {
    let from_row = entities.get_latest(from, caller).await?;
    let to_row = entities.get_latest(to, caller).await?;

    if from_row.id == to_row.id {
        return Ok(ShortestPathResult {
            hops: vec![PathHop {
                entity: from_row,
                link: None,
            }],
        });
    }

    let type_ids = type_id.map(|t| vec![t]);
    let filter = NeighborFilter {
        link_type_ids: type_ids.as_deref(),
        entity_type_ids: None,
        include_deleted,
    };

    let mut visited: HashSet<Uuid> = HashSet::new();
    visited.insert(from_row.id);

    let mut queue: VecDeque<Vec<PathHop>> = VecDeque::new();
    queue.push_back(vec![PathHop {
        entity: from_row,
        link: None,
    }]);

    while let Some(path) = queue.pop_front() {
        let edges = (path.len() - 1) as u32;
        if edges == max_depth {
            continue;
        }

        let cur = path.last().expect("path always has at least the start").entity.clone();
        let hops = get_neighbors(store, entities, links, acl, &cur, Direction::Out, &filter, caller).await?;

        for hop in hops {
            if hop.peer.id == to_row.id {
                let mut result = path.clone();
                result.push(PathHop {
                    entity: hop.peer,
                    link: Some(hop.link),
                });
                return Ok(ShortestPathResult { hops: result });
            }
            if visited.insert(hop.peer.id) {
                let mut new_path = path.clone();
                new_path.push(PathHop {
                    entity: hop.peer,
                    link: Some(hop.link),
                });
                queue.push_back(new_path);
            }
        }
    }

    Err(CoreError::not_found(format!(
        "no path from {} to {}",
        from, to
    )))
}
