use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering as AtomicOrdering},
    },
};

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use petgraph::Direction;
use petgraph::stable_graph::{EdgeIndex, NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

use super::graph::{
    EdgeDirection, EdgeLabel, EdgeRecord, GraphMutation, GraphQuery, GraphReadResult, GraphStore,
    NodeRecord, WriteSummary,
};
use super::io::{ensure_parent_dir, load_or_default, write_json_file};
use super::StorageResult;

#[derive(Clone, Debug)]
pub struct MemGraphConfig {
    pub working_dir: PathBuf,
    pub namespace: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct GraphSnapshot {
    nodes: Vec<NodeRecord>,
    edges: Vec<EdgeRecord>,
}

#[derive(Default)]
struct GraphInner {
    graph: StableDiGraph<NodeRecord, EdgeRecord>,
    ids: HashMap<String, NodeIndex>,
}

impl GraphInner {
    fn from_snapshot(snapshot: GraphSnapshot) -> Self {
        let mut inner = GraphInner::default();
        for node in snapshot.nodes {
            let id = node.id.clone();
            let idx = inner.graph.add_node(node);
            inner.ids.insert(id, idx);
        }
        for edge in snapshot.edges {
            if let (Some(&from), Some(&to)) =
                (inner.ids.get(&edge.from), inner.ids.get(&edge.to))
            {
                inner.graph.add_edge(from, to, edge);
            }
        }
        inner
    }

    fn snapshot(&self) -> GraphSnapshot {
        let nodes = self
            .graph
            .node_indices()
            .filter_map(|idx| self.graph.node_weight(idx).cloned())
            .collect();
        let edges = self
            .graph
            .edge_indices()
            .filter_map(|idx| self.graph.edge_weight(idx).cloned())
            .collect();
        GraphSnapshot { nodes, edges }
    }

    fn find_edge_by_key(
        &self,
        from: NodeIndex,
        to: NodeIndex,
        label: EdgeLabel,
    ) -> Option<EdgeIndex> {
        self.graph
            .edges_directed(from, Direction::Outgoing)
            .find(|edge| edge.target() == to && edge.weight().label == label)
            .map(|edge| edge.id())
    }

    /// Upsert an edge keyed by `(from, to, label)`. `SimilarTo` edges are
    /// canonicalized to the unordered pair so rewrites merge instead of
    /// duplicating.
    fn merge_edge(&mut self, mut edge: EdgeRecord, summary: &mut WriteSummary) -> StorageResult<()> {
        if edge.label == EdgeLabel::SimilarTo && edge.from > edge.to {
            std::mem::swap(&mut edge.from, &mut edge.to);
        }
        let from = *self
            .ids
            .get(&edge.from)
            .ok_or_else(|| anyhow!("edge endpoint {} not found", edge.from))?;
        let to = *self
            .ids
            .get(&edge.to)
            .ok_or_else(|| anyhow!("edge endpoint {} not found", edge.to))?;

        match self.find_edge_by_key(from, to, edge.label) {
            Some(existing) => {
                if let Some(weight) = self.graph.edge_weight_mut(existing) {
                    merge_props(&mut weight.props, edge.props);
                    summary.properties_set += 1;
                }
            }
            None => {
                self.graph.add_edge(from, to, edge);
                summary.edges_created += 1;
            }
        }
        Ok(())
    }

    fn remove_node(&mut self, idx: NodeIndex, summary: &mut WriteSummary) {
        let incident = self
            .graph
            .edges_directed(idx, Direction::Outgoing)
            .count()
            + self.graph.edges_directed(idx, Direction::Incoming).count();
        if let Some(node) = self.graph.remove_node(idx) {
            self.ids.remove(&node.id);
            summary.nodes_deleted += 1;
            summary.edges_deleted += incident;
        }
    }
}

fn merge_props(target: &mut Value, incoming: Value) {
    match (target, incoming) {
        (Value::Object(existing), Value::Object(new)) => {
            for (key, value) in new {
                existing.insert(key, value);
            }
        }
        (target, incoming) => *target = incoming,
    }
}

/// In-process property-graph store over a petgraph `StableDiGraph`, with a
/// JSON snapshot on disk.
pub struct MemGraphStorage {
    namespace: String,
    file_path: PathBuf,
    inner: Arc<RwLock<GraphInner>>,
    dirty: AtomicBool,
}

impl MemGraphStorage {
    pub fn new(config: MemGraphConfig) -> Self {
        let MemGraphConfig {
            working_dir,
            namespace,
        } = config;
        let file_path = working_dir.join(format!("graph_store_{}.json", namespace));
        Self {
            namespace,
            file_path,
            inner: Arc::new(RwLock::new(GraphInner::default())),
            dirty: AtomicBool::new(false),
        }
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, AtomicOrdering::SeqCst);
    }
}

#[async_trait]
impl GraphStore for MemGraphStorage {
    async fn initialize(&self) -> StorageResult<()> {
        ensure_parent_dir(&self.file_path).await?;
        let snapshot: GraphSnapshot = load_or_default(&self.file_path).await?;
        *self.inner.write().await = GraphInner::from_snapshot(snapshot);
        self.dirty.store(false, AtomicOrdering::SeqCst);
        Ok(())
    }

    async fn finalize(&self) -> StorageResult<()> {
        self.sync_if_dirty().await
    }

    async fn execute_read(&self, query: GraphQuery) -> StorageResult<GraphReadResult> {
        let inner = self.inner.read().await;
        let result = match query {
            GraphQuery::NodeById { id } => {
                let nodes = inner
                    .ids
                    .get(&id)
                    .and_then(|idx| inner.graph.node_weight(*idx).cloned())
                    .into_iter()
                    .collect();
                GraphReadResult::Nodes(nodes)
            }
            GraphQuery::NodesByLabel { tenant_id, label } => {
                let nodes = inner
                    .graph
                    .node_indices()
                    .filter_map(|idx| inner.graph.node_weight(idx))
                    .filter(|node| node.tenant_id == tenant_id && node.label == label)
                    .cloned()
                    .collect();
                GraphReadResult::Nodes(nodes)
            }
            GraphQuery::EdgesOf {
                id,
                label,
                direction,
            } => {
                let Some(&idx) = inner.ids.get(&id) else {
                    return Ok(GraphReadResult::Edges(Vec::new()));
                };
                let mut edges: Vec<EdgeRecord> = Vec::new();
                let directions: &[Direction] = match direction {
                    Some(EdgeDirection::Outgoing) => &[Direction::Outgoing],
                    Some(EdgeDirection::Incoming) => &[Direction::Incoming],
                    None => &[Direction::Outgoing, Direction::Incoming],
                };
                for dir in directions {
                    for edge in inner.graph.edges_directed(idx, *dir) {
                        let weight = edge.weight();
                        if label.is_none_or(|l| weight.label == l) {
                            edges.push(weight.clone());
                        }
                    }
                }
                GraphReadResult::Edges(edges)
            }
            GraphQuery::CountNodes { tenant_id, label } => {
                let count = inner
                    .graph
                    .node_indices()
                    .filter_map(|idx| inner.graph.node_weight(idx))
                    .filter(|node| {
                        tenant_id.as_deref().is_none_or(|t| node.tenant_id == t)
                            && label.is_none_or(|l| node.label == l)
                    })
                    .count();
                GraphReadResult::Count(count)
            }
            GraphQuery::MentionCount { entity_id } => {
                let count = inner
                    .ids
                    .get(&entity_id)
                    .map(|&idx| {
                        inner
                            .graph
                            .edges_directed(idx, Direction::Outgoing)
                            .filter(|edge| edge.weight().label == EdgeLabel::MentionedIn)
                            .count()
                    })
                    .unwrap_or(0);
                GraphReadResult::Count(count)
            }
        };
        Ok(result)
    }

    async fn execute_write(&self, mutation: GraphMutation) -> StorageResult<WriteSummary> {
        let mut summary = WriteSummary::default();
        {
            let mut inner = self.inner.write().await;
            match mutation {
                GraphMutation::MergeNode(node) => {
                    let existing = inner.ids.get(&node.id).copied();
                    match existing {
                        Some(idx) => {
                            if let Some(current) = inner.graph.node_weight_mut(idx) {
                                merge_props(&mut current.props, node.props);
                                current.tenant_id = node.tenant_id;
                                summary.properties_set += 1;
                            }
                        }
                        None => {
                            let id = node.id.clone();
                            let idx = inner.graph.add_node(node);
                            inner.ids.insert(id, idx);
                            summary.nodes_created += 1;
                        }
                    }
                }
                GraphMutation::MergeEdge(edge) => {
                    inner.merge_edge(edge, &mut summary)?;
                }
                GraphMutation::SetNodeProps { id, props } => {
                    let idx = *inner
                        .ids
                        .get(&id)
                        .ok_or_else(|| anyhow!("node {id} not found"))?;
                    if let Some(node) = inner.graph.node_weight_mut(idx) {
                        merge_props(&mut node.props, props);
                        summary.properties_set += 1;
                    }
                }
                GraphMutation::RepointEdges {
                    node,
                    onto,
                    direction,
                } => {
                    let Some(&idx) = inner.ids.get(&node) else {
                        return Ok(summary);
                    };
                    if !inner.ids.contains_key(&onto) {
                        return Err(anyhow!("repoint target {onto} not found"));
                    }
                    let dir = match direction {
                        EdgeDirection::Outgoing => Direction::Outgoing,
                        EdgeDirection::Incoming => Direction::Incoming,
                    };
                    let moved: Vec<(EdgeIndex, EdgeRecord)> = inner
                        .graph
                        .edges_directed(idx, dir)
                        .map(|edge| (edge.id(), edge.weight().clone()))
                        .collect();
                    for (edge_idx, mut record) in moved {
                        inner.graph.remove_edge(edge_idx);
                        summary.edges_deleted += 1;
                        match direction {
                            EdgeDirection::Outgoing => record.from = onto.clone(),
                            EdgeDirection::Incoming => record.to = onto.clone(),
                        }
                        // a source<->target edge would become a self-loop
                        if record.from == record.to {
                            continue;
                        }
                        inner.merge_edge(record, &mut summary)?;
                    }
                }
                GraphMutation::DeleteNode { id, detach } => {
                    let Some(&idx) = inner.ids.get(&id) else {
                        return Ok(summary);
                    };
                    let incident = inner.graph.edges_directed(idx, Direction::Outgoing).count()
                        + inner.graph.edges_directed(idx, Direction::Incoming).count();
                    if incident > 0 && !detach {
                        return Err(anyhow!("node {id} still has {incident} edges"));
                    }
                    inner.remove_node(idx, &mut summary);
                }
                GraphMutation::DeleteTenant { tenant_id } => {
                    let doomed: Vec<NodeIndex> = inner
                        .graph
                        .node_indices()
                        .filter(|idx| {
                            inner
                                .graph
                                .node_weight(*idx)
                                .is_some_and(|node| node.tenant_id == tenant_id)
                        })
                        .collect();
                    for idx in doomed {
                        inner.remove_node(idx, &mut summary);
                    }
                }
            }
        }
        self.mark_dirty();
        self.sync_if_dirty().await?;
        Ok(summary)
    }

    async fn sync_if_dirty(&self) -> StorageResult<()> {
        if !self.dirty.swap(false, AtomicOrdering::SeqCst) {
            return Ok(());
        }

        let snapshot = {
            let inner = self.inner.read().await;
            inner.snapshot()
        };

        write_json_file(&self.file_path, &snapshot)
            .await
            .with_context(|| format!("failed to write graph store {}", self.namespace))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;
    use crate::storage::NodeLabel;

    fn node(id: &str, label: NodeLabel) -> NodeRecord {
        NodeRecord {
            id: id.to_string(),
            label,
            tenant_id: "t1".to_string(),
            props: json!({}),
        }
    }

    fn edge(from: &str, to: &str, label: EdgeLabel) -> EdgeRecord {
        EdgeRecord {
            from: from.to_string(),
            to: to.to_string(),
            label,
            tenant_id: "t1".to_string(),
            props: json!({}),
        }
    }

    async fn store() -> (TempDir, MemGraphStorage) {
        let dir = TempDir::new().expect("create temp dir");
        let storage = MemGraphStorage::new(MemGraphConfig {
            working_dir: dir.path().into(),
            namespace: "test".into(),
        });
        storage.initialize().await.expect("init");
        (dir, storage)
    }

    #[tokio::test]
    async fn similar_to_edges_are_idempotent_across_orderings() -> anyhow::Result<()> {
        let (_dir, storage) = store().await;
        storage
            .execute_write(GraphMutation::MergeNode(node("chunk-a", NodeLabel::Chunk)))
            .await?;
        storage
            .execute_write(GraphMutation::MergeNode(node("chunk-b", NodeLabel::Chunk)))
            .await?;

        let first = storage
            .execute_write(GraphMutation::MergeEdge(edge(
                "chunk-a",
                "chunk-b",
                EdgeLabel::SimilarTo,
            )))
            .await?;
        assert_eq!(first.edges_created, 1);

        // reversed endpoints merge into the same edge
        let second = storage
            .execute_write(GraphMutation::MergeEdge(edge(
                "chunk-b",
                "chunk-a",
                EdgeLabel::SimilarTo,
            )))
            .await?;
        assert_eq!(second.edges_created, 0);

        let edges = storage
            .execute_read(GraphQuery::EdgesOf {
                id: "chunk-a".into(),
                label: Some(EdgeLabel::SimilarTo),
                direction: None,
            })
            .await?
            .into_edges();
        assert_eq!(edges.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn delete_tenant_removes_nodes_and_edges() -> anyhow::Result<()> {
        let (_dir, storage) = store().await;
        storage
            .execute_write(GraphMutation::MergeNode(node("e1", NodeLabel::Entity)))
            .await?;
        storage
            .execute_write(GraphMutation::MergeNode(node("c1", NodeLabel::Chunk)))
            .await?;
        storage
            .execute_write(GraphMutation::MergeEdge(edge(
                "e1",
                "c1",
                EdgeLabel::MentionedIn,
            )))
            .await?;

        let summary = storage
            .execute_write(GraphMutation::DeleteTenant {
                tenant_id: "t1".into(),
            })
            .await?;
        assert_eq!(summary.nodes_deleted, 2);

        let count = storage
            .execute_read(GraphQuery::CountNodes {
                tenant_id: Some("t1".into()),
                label: None,
            })
            .await?
            .count();
        assert_eq!(count, 0);
        Ok(())
    }
}
