//! Bounded BFS traversal (§4.4.2).

use super::neighbors::{get_neighbors, Direction, NeighborFilter};
use crate::acl::AclEngine;
use crate::error::Result;
use crate::identity::CallerIdentity;
use crate::store::StorePool;
use crate::versioning::{ChainRow, ChainStore};
use std::collections::{HashMap, VecDeque};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct BfsNode {
    pub entity: ChainRow,
    pub depth: u32,
    /// Present only when `return_paths` was requested: every distinct
    /// path (as a sequence of entity ids, including the start) by which
    /// this node was reached.
    pub paths: Option<Vec<Vec<Uuid>>>,
}

#[derive(Debug, Clone)]
pub struct BfsResult {
    pub nodes: Vec<BfsNode>,
}

struct Frontier {
    id: Uuid,
    depth: u32,
    path: Vec<Uuid>,
}

/// §4.4.2. `node_cap` enforces §4.4.4's expansion cap — pass
/// `Some(config.bfs_visualization_node_cap)` for visualization-style
/// callers and `None` for the general depth-capped traversal endpoint.
#[allow(clippy::too_many_arguments)]
pub async fn bfs(
    store: &StorePool,
    entities: &ChainStore,
    links: &ChainStore,
    acl: &AclEngine,
    start_id: Uuid,
    max_depth: u32,
    direction: Direction,
    filter: &NeighborFilter<'_>,
    return_paths: bool,
    node_cap: Option<usize>,
    caller: &CallerIdentity,
) -> Result<BfsResult> {
    let start = entities.get_latest(start_id, caller).await?;

    let mut visited: HashMap<Uuid, BfsNode> = HashMap::new();
    visited.insert(
        start.id,
        BfsNode {
            entity: start.clone(),
            depth: 0,
            paths: return_paths.then(|| vec![vec![start.id]]),
        },
    );

    let mut queue: VecDeque<Frontier> = VecDeque::new();
    queue.push_back(Frontier {
        id: start.id,
        depth: 0,
        path: vec![start.id],
    });

    while let Some(cur) = queue.pop_front() {
        if cur.depth == max_depth {
            continue;
        }
        if let Some(cap) = node_cap {
            if visited.len() >= cap {
                break;
            }
        }

        let cur_row = visited
            .get(&cur.id)
            .map(|n| n.entity.clone())
            .unwrap_or_else(|| start.clone());

        let hops = get_neighbors(store, entities, links, acl, &cur_row, direction, filter, caller).await?;
        for hop in hops {
            let peer_id = hop.peer.id;
            let mut new_path = cur.path.clone();
            new_path.push(peer_id);

            if let Some(existing) = visited.get_mut(&peer_id) {
                if return_paths {
                    existing
                        .paths
                        .get_or_insert_with(Vec::new)
                        .push(new_path);
                }
                continue;
            }

            if let Some(cap) = node_cap {
                if visited.len() >= cap {
                    continue;
                }
            }

            visited.insert(
                peer_id,
                BfsNode {
                    entity: hop.peer,
                    depth: cur.depth + 1,
                    paths: return_paths.then(|| vec![new_path.clone()]),
                },
            );
            queue.push_back(Frontier {
                id: peer_id,
                depth: cur.depth + 1,
                path: new_path,
            });
        }
    }

    let mut nodes: Vec<BfsNode> = visited.into_values().collect();
    nodes.sort_by(|a, b| a.depth.cmp(&b.depth).then(a.entity.id.cmp(&b.entity.id)));
    Ok(BfsResult { nodes })
}
