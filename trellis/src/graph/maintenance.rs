use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use serde_json::{Value, json};
use tracing::info;

use crate::storage::{
    EdgeDirection, EdgeLabel, GraphMutation, GraphQuery, GraphStore, NodeLabel, WriteSummary,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct PruneReport {
    pub documents_removed: usize,
    pub chunks_removed: usize,
    pub entities_removed: usize,
    pub communities_removed: usize,
}

/// Out-of-band graph maintenance, composed entirely from the graph port's
/// read/write primitives.
pub struct GraphMaintenance {
    graph: Arc<dyn GraphStore>,
}

impl GraphMaintenance {
    pub fn new(graph: Arc<dyn GraphStore>) -> Self {
        Self { graph }
    }

    fn prop_str(props: &Value, key: &str) -> Option<String> {
        props.get(key).and_then(Value::as_str).map(str::to_string)
    }

    /// Fold `sources` into `target` as four separate write steps — move
    /// incoming edges, move outgoing edges, merge properties, delete the
    /// source — since the store has no single merge primitive.
    pub async fn merge_nodes(&self, target: &str, sources: &[String]) -> Result<()> {
        let target_node = self
            .graph
            .execute_read(GraphQuery::NodeById {
                id: target.to_string(),
            })
            .await?
            .into_nodes()
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("merge target {target} not found"))?;

        let mut description = Self::prop_str(&target_node.props, "entity_description")
            .unwrap_or_default();
        let mut aliases: Vec<String> = target_node
            .props
            .get("aliases")
            .and_then(Value::as_array)
            .map(|values| {
                values
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        for source in sources {
            if source == target {
                continue;
            }
            let Some(source_node) = self
                .graph
                .execute_read(GraphQuery::NodeById {
                    id: source.clone(),
                })
                .await?
                .into_nodes()
                .into_iter()
                .next()
            else {
                continue;
            };

            // step 1: move-in
            self.graph
                .execute_write(GraphMutation::RepointEdges {
                    node: source.clone(),
                    onto: target.to_string(),
                    direction: EdgeDirection::Incoming,
                })
                .await?;
            // step 2: move-out
            self.graph
                .execute_write(GraphMutation::RepointEdges {
                    node: source.clone(),
                    onto: target.to_string(),
                    direction: EdgeDirection::Outgoing,
                })
                .await?;

            // step 3: merge-properties
            if let Some(source_description) =
                Self::prop_str(&source_node.props, "entity_description")
            {
                if !source_description.is_empty() && !description.contains(&source_description) {
                    if !description.is_empty() {
                        description.push_str(" | ");
                    }
                    description.push_str(&source_description);
                }
            }
            if let Some(source_name) = Self::prop_str(&source_node.props, "entity_name") {
                if !aliases.contains(&source_name) {
                    aliases.push(source_name);
                }
            }
            self.graph
                .execute_write(GraphMutation::SetNodeProps {
                    id: target.to_string(),
                    props: json!({
                        "entity_description": description,
                        "aliases": aliases,
                    }),
                })
                .await?;

            // step 4: delete the drained source
            self.graph
                .execute_write(GraphMutation::DeleteNode {
                    id: source.clone(),
                    detach: true,
                })
                .await?;
        }
        Ok(())
    }

    async fn remove_unlisted(
        &self,
        tenant_id: &str,
        label: NodeLabel,
        keep: &HashSet<String>,
    ) -> Result<usize> {
        let nodes = self
            .graph
            .execute_read(GraphQuery::NodesByLabel {
                tenant_id: tenant_id.to_string(),
                label,
            })
            .await?
            .into_nodes();
        let mut removed = 0usize;
        for node in nodes {
            if !keep.contains(&node.id) {
                self.graph
                    .execute_write(GraphMutation::DeleteNode {
                        id: node.id,
                        detach: true,
                    })
                    .await?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Delete graph projections whose relational source rows are gone. The
    /// order matters: removing document/chunk nodes strands entities, and
    /// removing entities strands communities.
    pub async fn prune_orphans(
        &self,
        tenant_id: &str,
        valid_doc_ids: &HashSet<String>,
        valid_chunk_ids: &HashSet<String>,
    ) -> Result<PruneReport> {
        let mut report = PruneReport::default();

        report.documents_removed = self
            .remove_unlisted(tenant_id, NodeLabel::Document, valid_doc_ids)
            .await?;
        report.chunks_removed = self
            .remove_unlisted(tenant_id, NodeLabel::Chunk, valid_chunk_ids)
            .await?;

        // entities with no remaining mention edges
        let entities = self
            .graph
            .execute_read(GraphQuery::NodesByLabel {
                tenant_id: tenant_id.to_string(),
                label: NodeLabel::Entity,
            })
            .await?
            .into_nodes();
        for entity in entities {
            let mentions = self
                .graph
                .execute_read(GraphQuery::MentionCount {
                    entity_id: entity.id.clone(),
                })
                .await?
                .count();
            if mentions == 0 {
                self.graph
                    .execute_write(GraphMutation::DeleteNode {
                        id: entity.id,
                        detach: true,
                    })
                    .await?;
                report.entities_removed += 1;
            }
        }

        // communities no longer reachable from any entity
        let communities = self
            .graph
            .execute_read(GraphQuery::NodesByLabel {
                tenant_id: tenant_id.to_string(),
                label: NodeLabel::Community,
            })
            .await?
            .into_nodes();
        for community in communities {
            let members = self
                .graph
                .execute_read(GraphQuery::EdgesOf {
                    id: community.id.clone(),
                    label: Some(EdgeLabel::InCommunity),
                    direction: Some(EdgeDirection::Incoming),
                })
                .await?
                .into_edges();
            if members.is_empty() {
                self.graph
                    .execute_write(GraphMutation::DeleteNode {
                        id: community.id,
                        detach: true,
                    })
                    .await?;
                report.communities_removed += 1;
            }
        }

        info!(
            tenant_id,
            documents = report.documents_removed,
            chunks = report.chunks_removed,
            entities = report.entities_removed,
            communities = report.communities_removed,
            "graph orphan pruning finished"
        );
        Ok(report)
    }

    /// Detach-delete every node tagged with the tenant; used by tenant
    /// deletion and by embedding migration.
    pub async fn delete_tenant_data(&self, tenant_id: &str) -> Result<WriteSummary> {
        let summary = self
            .graph
            .execute_write(GraphMutation::DeleteTenant {
                tenant_id: tenant_id.to_string(),
            })
            .await?;
        info!(
            tenant_id,
            nodes = summary.nodes_deleted,
            edges = summary.edges_deleted,
            "tenant graph data deleted"
        );
        Ok(summary)
    }
}
