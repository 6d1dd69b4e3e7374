//! Engine configuration.
//!
//! Mirrors the tunables called out across `spec.md`: the bulk ACL
//! in-list threshold (§4.2.6), group resolution depth (§4.2.4, I5),
//! cache TTLs (§5), and BFS expansion caps (§4.4.4).

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Path to the SQLite database, or `:memory:`.
    pub database_url: String,

    /// Max connections in the store pool.
    pub max_connections: u32,

    /// T in §4.2.6: above this many accessible ACL ids, the bulk list
    /// clause switches from a SQL `IN (...)` to in-memory filtering.
    pub acl_bulk_threshold: usize,

    /// Max transitive depth for group membership resolution (I5).
    pub max_group_depth: u32,

    /// TTL for the effective-group cache (§4.2.4).
    pub group_cache_ttl_secs: u64,

    /// TTL for per-object entity/link caches (§5).
    pub entity_cache_ttl_secs: u64,
    pub link_cache_ttl_secs: u64,
    /// TTL for per-object type caches (§5).
    pub type_cache_ttl_secs: u64,

    /// Recommended cap on nodes expanded by a visualization-oriented BFS
    /// (§4.4.4); the depth-capped traversal endpoint ignores this.
    pub bfs_visualization_node_cap: usize,

    /// Max nesting depth for filter trees (§4.3).
    pub max_filter_depth: u32,

    /// Max levels in a property path (§4.3).
    pub max_path_depth: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            max_connections: 10,
            acl_bulk_threshold: 1000,
            max_group_depth: 10,
            group_cache_ttl_secs: 300,
            entity_cache_ttl_secs: 60,
            link_cache_ttl_secs: 60,
            type_cache_ttl_secs: 300,
            bfs_visualization_node_cap: 100,
            max_filter_depth: 5,
            max_path_depth: 10,
        }
    }
}
