mod common;

use std::collections::HashSet;

use serde_json::{Value, json};
use tempfile::TempDir;

use trellis::config::ChunkingConfig;
use trellis::graph::GraphMaintenance;
use trellis::storage::{
    EdgeLabel, EdgeRecord, GraphMutation, GraphQuery, GraphStore, NodeLabel, NodeRecord,
};

fn node(id: &str, label: NodeLabel, props: Value) -> NodeRecord {
    NodeRecord {
        id: id.to_string(),
        label,
        tenant_id: "t1".into(),
        props,
    }
}

fn edge(from: &str, to: &str, label: EdgeLabel) -> EdgeRecord {
    EdgeRecord {
        from: from.to_string(),
        to: to.to_string(),
        label,
        tenant_id: "t1".into(),
        props: json!({}),
    }
}

async fn seed_entities(harness: &common::TestHarness) -> anyhow::Result<()> {
    let graph = &harness.graph;
    for n in [
        node(
            "e-target",
            NodeLabel::Entity,
            json!({ "entity_name": "Acme", "entity_description": "a company" }),
        ),
        node(
            "e-source",
            NodeLabel::Entity,
            json!({ "entity_name": "Acme Corp", "entity_description": "full legal name" }),
        ),
        node("e-other", NodeLabel::Entity, json!({ "entity_name": "Supplier" })),
        node("c1", NodeLabel::Chunk, json!({})),
        node("c2", NodeLabel::Chunk, json!({})),
    ] {
        graph.execute_write(GraphMutation::MergeNode(n)).await?;
    }
    // e-source mentions c2, e-other relates to e-source
    graph
        .execute_write(GraphMutation::MergeEdge(edge(
            "e-source",
            "c2",
            EdgeLabel::MentionedIn,
        )))
        .await?;
    graph
        .execute_write(GraphMutation::MergeEdge(edge(
            "e-other",
            "e-source",
            EdgeLabel::RelatesTo,
        )))
        .await?;
    // e-target mentions c1 already
    graph
        .execute_write(GraphMutation::MergeEdge(edge(
            "e-target",
            "c1",
            EdgeLabel::MentionedIn,
        )))
        .await?;
    Ok(())
}

#[tokio::test]
async fn merge_nodes_repoints_edges_and_unions_properties() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let harness = common::harness(&dir, ChunkingConfig::default()).await;
    seed_entities(&harness).await?;

    let maintenance = GraphMaintenance::new(harness.graph.clone());
    maintenance
        .merge_nodes("e-target", &["e-source".to_string()])
        .await?;

    // the source entity is gone
    let gone = harness
        .graph
        .execute_read(GraphQuery::NodeById {
            id: "e-source".into(),
        })
        .await?
        .into_nodes();
    assert!(gone.is_empty());

    // its outgoing mention moved onto the target
    let mentions = harness
        .graph
        .execute_read(GraphQuery::MentionCount {
            entity_id: "e-target".into(),
        })
        .await?
        .count();
    assert_eq!(mentions, 2);

    // its incoming relation moved onto the target
    let incoming = harness
        .graph
        .execute_read(GraphQuery::EdgesOf {
            id: "e-target".into(),
            label: Some(EdgeLabel::RelatesTo),
            direction: None,
        })
        .await?
        .into_edges();
    assert_eq!(incoming.len(), 1);
    assert_eq!(incoming[0].from, "e-other");
    assert_eq!(incoming[0].to, "e-target");

    // properties were concatenated and the source name became an alias
    let target = harness
        .graph
        .execute_read(GraphQuery::NodeById {
            id: "e-target".into(),
        })
        .await?
        .into_nodes()
        .remove(0);
    let description = target.props["entity_description"].as_str().unwrap();
    assert!(description.contains("a company"));
    assert!(description.contains("full legal name"));
    let aliases: Vec<&str> = target.props["aliases"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(Value::as_str)
        .collect();
    assert!(aliases.contains(&"Acme Corp"));
    Ok(())
}

#[tokio::test]
async fn prune_orphans_cascades_in_order() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let harness = common::harness(&dir, ChunkingConfig::default()).await;
    let graph = &harness.graph;

    for n in [
        node("d-live", NodeLabel::Document, json!({})),
        node("d-stale", NodeLabel::Document, json!({})),
        node("c-live", NodeLabel::Chunk, json!({})),
        node("c-stale", NodeLabel::Chunk, json!({})),
        node("e-live", NodeLabel::Entity, json!({})),
        node("e-stale", NodeLabel::Entity, json!({})),
        node("community-live", NodeLabel::Community, json!({})),
        node("community-empty", NodeLabel::Community, json!({})),
    ] {
        graph.execute_write(GraphMutation::MergeNode(n)).await?;
    }
    for e in [
        edge("c-live", "d-live", EdgeLabel::PartOf),
        edge("c-stale", "d-stale", EdgeLabel::PartOf),
        // e-live is mentioned in a surviving chunk, e-stale only in the stale one
        edge("e-live", "c-live", EdgeLabel::MentionedIn),
        edge("e-stale", "c-stale", EdgeLabel::MentionedIn),
        edge("e-live", "community-live", EdgeLabel::InCommunity),
    ] {
        graph.execute_write(GraphMutation::MergeEdge(e)).await?;
    }

    let maintenance = GraphMaintenance::new(harness.graph.clone());
    let keep_docs: HashSet<String> = ["d-live".to_string()].into_iter().collect();
    let keep_chunks: HashSet<String> = ["c-live".to_string()].into_iter().collect();
    let report = maintenance
        .prune_orphans("t1", &keep_docs, &keep_chunks)
        .await?;

    assert_eq!(report.documents_removed, 1);
    assert_eq!(report.chunks_removed, 1);
    // e-stale lost its only mention when c-stale went away
    assert_eq!(report.entities_removed, 1);
    assert_eq!(report.communities_removed, 1);

    for id in ["d-live", "c-live", "e-live", "community-live"] {
        let nodes = harness
            .graph
            .execute_read(GraphQuery::NodeById { id: id.into() })
            .await?
            .into_nodes();
        assert_eq!(nodes.len(), 1, "{id} must survive");
    }
    for id in ["d-stale", "c-stale", "e-stale", "community-empty"] {
        let nodes = harness
            .graph
            .execute_read(GraphQuery::NodeById { id: id.into() })
            .await?
            .into_nodes();
        assert!(nodes.is_empty(), "{id} must be pruned");
    }
    Ok(())
}

#[tokio::test]
async fn delete_tenant_data_is_tenant_scoped() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let harness = common::harness(&dir, ChunkingConfig::default()).await;
    let graph = &harness.graph;

    graph
        .execute_write(GraphMutation::MergeNode(node(
            "mine",
            NodeLabel::Entity,
            json!({}),
        )))
        .await?;
    graph
        .execute_write(GraphMutation::MergeNode(NodeRecord {
            id: "theirs".into(),
            label: NodeLabel::Entity,
            tenant_id: "t2".into(),
            props: json!({}),
        }))
        .await?;

    let maintenance = GraphMaintenance::new(harness.graph.clone());
    let summary = maintenance.delete_tenant_data("t1").await?;
    assert_eq!(summary.nodes_deleted, 1);

    let survivors = harness
        .graph
        .execute_read(GraphQuery::CountNodes {
            tenant_id: Some("t2".into()),
            label: None,
        })
        .await?
        .count();
    assert_eq!(survivors, 1);
    Ok(())
}
