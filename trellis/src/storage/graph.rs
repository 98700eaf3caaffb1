use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::StorageResult;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
pub enum NodeLabel {
    Document,
    Chunk,
    Entity,
    Community,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
pub enum EdgeLabel {
    /// Chunk -> Document containment.
    PartOf,
    /// Entity -> Chunk mention.
    MentionedIn,
    /// Entity -> Entity relation.
    RelatesTo,
    /// Chunk <-> Chunk semantic proximity; identity is the unordered pair.
    SimilarTo,
    /// Entity -> Community membership.
    InCommunity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: String,
    pub label: NodeLabel,
    pub tenant_id: String,
    #[serde(default)]
    pub props: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub from: String,
    pub to: String,
    pub label: EdgeLabel,
    pub tenant_id: String,
    #[serde(default)]
    pub props: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeDirection {
    Incoming,
    Outgoing,
}

/// Parameterized read operations the graph adapter executes.
#[derive(Debug, Clone)]
pub enum GraphQuery {
    NodeById {
        id: String,
    },
    NodesByLabel {
        tenant_id: String,
        label: NodeLabel,
    },
    /// Edges touching `id`, optionally restricted by label and direction.
    EdgesOf {
        id: String,
        label: Option<EdgeLabel>,
        direction: Option<EdgeDirection>,
    },
    CountNodes {
        tenant_id: Option<String>,
        label: Option<NodeLabel>,
    },
    /// Number of MentionedIn edges leaving an entity.
    MentionCount {
        entity_id: String,
    },
}

/// Parameterized write operations. Higher-level graph maintenance is
/// composed from these primitives only.
#[derive(Debug, Clone)]
pub enum GraphMutation {
    /// Insert-or-update a node by id; props are merged shallowly.
    MergeNode(NodeRecord),
    /// Insert-or-update an edge keyed by `(from, to, label)`; `SimilarTo`
    /// edges are keyed by the unordered pair so rewrites merge rather than
    /// duplicate.
    MergeEdge(EdgeRecord),
    SetNodeProps {
        id: String,
        props: Value,
    },
    /// Re-point all edges of `direction` touching `node` onto `onto`.
    RepointEdges {
        node: String,
        onto: String,
        direction: EdgeDirection,
    },
    DeleteNode {
        id: String,
        detach: bool,
    },
    /// Detach-delete every node tagged with the tenant.
    DeleteTenant {
        tenant_id: String,
    },
}

#[derive(Debug, Clone)]
pub enum GraphReadResult {
    Nodes(Vec<NodeRecord>),
    Edges(Vec<EdgeRecord>),
    Count(usize),
}

impl GraphReadResult {
    pub fn into_nodes(self) -> Vec<NodeRecord> {
        match self {
            Self::Nodes(nodes) => nodes,
            _ => Vec::new(),
        }
    }

    pub fn into_edges(self) -> Vec<EdgeRecord> {
        match self {
            Self::Edges(edges) => edges,
            _ => Vec::new(),
        }
    }

    pub fn count(&self) -> usize {
        match self {
            Self::Count(n) => *n,
            Self::Nodes(nodes) => nodes.len(),
            Self::Edges(edges) => edges.len(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteSummary {
    pub nodes_created: usize,
    pub nodes_deleted: usize,
    pub edges_created: usize,
    pub edges_deleted: usize,
    pub properties_set: usize,
}

/// Graph store port: a generic executor for parameterized read/write
/// operations; everything else is built on top of these two calls.
#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn initialize(&self) -> StorageResult<()>;
    async fn finalize(&self) -> StorageResult<()>;

    async fn execute_read(&self, query: GraphQuery) -> StorageResult<GraphReadResult>;
    async fn execute_write(&self, mutation: GraphMutation) -> StorageResult<WriteSummary>;

    async fn sync_if_dirty(&self) -> StorageResult<()>;
}
