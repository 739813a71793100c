//! `Router` (§4.10): a thin client over a ZooKeeper-shaped coordination
//! service. Connects, lists the cluster/replica/node znode tree under
//! `/SF1R-*/SearchTopology/Replica*/Node*`, parses each node's opaque data
//! blob, and re-arms a watch at every level so a child-change event triggers
//! a full re-scan. Node metadata uses a `key=value` per-line format, parsed
//! by `parse_node_data` below; see DESIGN.md for why.
//!
//! This module is explicitly a thin external collaborator (§1, §4.10): it
//! does not participate in indexing or querying, only in discovering which
//! backend nodes are alive and which collections they serve.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, warn};
use zookeeper::{WatchedEvent, Watcher, ZooKeeper};

use crate::core::error::{Error, ErrorKind, Result};

/// One `Node<N>` znode's parsed metadata (§4.10 "each node publishes the set
/// of collections it serves").
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeInfo {
    pub path: String,
    pub fields: BTreeMap<String, String>,
    pub collections: BTreeSet<String>,
}

/// The in-memory topology snapshot plus the ZooKeeper session backing it.
pub struct Router {
    zk: ZooKeeper,
    topology: RwLock<BTreeMap<String, NodeInfo>>,
}

impl Router {
    /// Connect and perform the initial topology scan (§4.10 "On child-change
    /// events it refreshes the in-memory topology" — the first scan is just
    /// that refresh run once at startup).
    pub fn connect(hosts: &str, session_timeout: Duration) -> Result<Arc<Self>> {
        let zk = ZooKeeper::connect(hosts, session_timeout, SessionWatcher)
            .map_err(|e| Error::new(ErrorKind::Io, format!("zookeeper connect to {hosts} failed: {e}")))?;
        let router = Arc::new(Router {
            zk,
            topology: RwLock::new(BTreeMap::new()),
        });
        router.refresh()?;
        Ok(router)
    }

    /// All currently known live nodes.
    pub fn nodes(&self) -> Vec<NodeInfo> {
        self.topology.read().values().cloned().collect()
    }

    /// Nodes serving `collection` — a pure filter over the cached topology,
    /// no round-trip to the coordination service (§4.10 "Per-collection
    /// routing is a pure filter over node metadata").
    pub fn nodes_for_collection(&self, collection: &str) -> Vec<NodeInfo> {
        self.topology
            .read()
            .values()
            .filter(|n| n.collections.contains(collection))
            .cloned()
            .collect()
    }

    /// Re-list the cluster/replica/node tree and replace the cached
    /// topology wholesale. Each listing call re-arms a watch via a
    /// `ChildWatcher` holding only a weak reference back to this router, so
    /// the background ZooKeeper client thread driving watch callbacks never
    /// keeps the router alive past its last strong reference.
    fn refresh(self: &Arc<Self>) -> Result<()> {
        let watcher = ChildWatcher { router: Arc::downgrade(self) };
        let mut topology = BTreeMap::new();

        let roots = self
            .zk
            .get_children_w("/", watcher.clone())
            .map_err(|e| Error::new(ErrorKind::Io, format!("zookeeper list / failed: {e}")))?;

        for cluster in roots.iter().filter(|name| is_cluster_node(name)) {
            let topology_path = format!("/{cluster}/SearchTopology");
            let replicas = match self.zk.get_children_w(&topology_path, watcher.clone()) {
                Ok(children) => children,
                Err(e) => {
                    debug!(path = %topology_path, error = %e, "no SearchTopology node, skipping cluster");
                    continue;
                }
            };

            for replica in replicas.iter().filter(|name| name.starts_with("Replica")) {
                let replica_path = format!("{topology_path}/{replica}");
                let nodes = match self.zk.get_children_w(&replica_path, watcher.clone()) {
                    Ok(children) => children,
                    Err(e) => {
                        debug!(path = %replica_path, error = %e, "replica listing failed, skipping");
                        continue;
                    }
                };

                for node in nodes.iter().filter(|name| name.starts_with("Node")) {
                    let node_path = format!("{replica_path}/{node}");
                    match self.zk.get_data(&node_path, false) {
                        Ok((bytes, _stat)) => {
                            let raw = String::from_utf8_lossy(&bytes);
                            let fields = parse_node_data(&raw);
                            let collections = fields
                                .get("collection")
                                .map(|v| v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
                                .unwrap_or_default();
                            topology.insert(
                                node_path.clone(),
                                NodeInfo { path: node_path, fields, collections },
                            );
                        }
                        Err(e) => warn!(path = %node_path, error = %e, "failed to read node data, dropping from topology"),
                    }
                }
            }
        }

        *self.topology.write() = topology;
        Ok(())
    }
}

/// `SF1R-<name>[<digits>]` is the only cluster-name shape matched here; no
/// `regex` dependency is pulled in just for this one prefix check.
fn is_cluster_node(name: &str) -> bool {
    name.starts_with("SF1R-")
}

/// One `key=value` pair per line, blank lines ignored. The `collection`
/// key's value is a comma-separated list of collection names.
fn parse_node_data(raw: &str) -> BTreeMap<String, String> {
    let mut fields = BTreeMap::new();
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            fields.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    fields
}

#[derive(Clone)]
struct ChildWatcher {
    router: Weak<Router>,
}

impl Watcher for ChildWatcher {
    fn handle(&self, event: WatchedEvent) {
        if let Some(router) = self.router.upgrade() {
            debug!(path = ?event.path, "topology watch fired, re-scanning");
            if let Err(e) = router.refresh() {
                warn!(error = %e, "topology refresh after watch event failed");
            }
        }
    }
}

/// The session-level watcher passed to `ZooKeeper::connect`. Reconnect
/// handling beyond what the client library already does on its own is out
/// of scope here — per-path `ChildWatcher`s re-arm themselves on every
/// refresh, which is the behavior the rest of this module depends on.
struct SessionWatcher;

impl Watcher for SessionWatcher {
    fn handle(&self, event: WatchedEvent) {
        debug!(state = ?event.keeper_state, "zookeeper session event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_key_value_lines_and_ignores_blanks() {
        let raw = "host=10.0.0.4\nport=18181\n\ncollection=b5product, review\n";
        let fields = parse_node_data(raw);
        assert_eq!(fields.get("host").map(String::as_str), Some("10.0.0.4"));
        assert_eq!(fields.get("port").map(String::as_str), Some("18181"));
        assert_eq!(fields.get("collection").map(String::as_str), Some("b5product, review"));
    }

    #[test]
    fn recognizes_cluster_node_names() {
        assert!(is_cluster_node("SF1R-b5mp1"));
        assert!(is_cluster_node("SF1R-1"));
        assert!(!is_cluster_node("other"));
    }

    #[test]
    fn node_info_filters_by_collection() {
        let mut topology = BTreeMap::new();
        let mut collections_a = BTreeSet::new();
        collections_a.insert("b5product".to_string());
        topology.insert(
            "/SF1R-x/SearchTopology/Replica1/Node1".to_string(),
            NodeInfo {
                path: "/SF1R-x/SearchTopology/Replica1/Node1".to_string(),
                fields: BTreeMap::new(),
                collections: collections_a,
            },
        );
        let mut collections_b = BTreeSet::new();
        collections_b.insert("review".to_string());
        topology.insert(
            "/SF1R-x/SearchTopology/Replica1/Node2".to_string(),
            NodeInfo {
                path: "/SF1R-x/SearchTopology/Replica1/Node2".to_string(),
                fields: BTreeMap::new(),
                collections: collections_b,
            },
        );

        let matches: Vec<&NodeInfo> = topology.values().filter(|n| n.collections.contains("review")).collect();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].path, "/SF1R-x/SearchTopology/Replica1/Node2");
    }
}
