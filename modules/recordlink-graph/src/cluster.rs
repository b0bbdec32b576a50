//! Clustering over the similarity graph via GDS.
//!
//! Two phases: project the similarity subgraph under a name, then run
//! connected-components labeling over it. The two calls are not transactional
//! with each other; a crash in between leaves an orphan projection that must
//! be dropped before retry, which `drop_projection_if_exists` handles.

use neo4rs::query;
use tracing::{info, warn};

use recordlink_common::EntityKind;

use crate::GraphClient;

/// Projection name for the weighted Louvain refinement pass.
const LOUVAIN_PROJECTION: &str = "recordCommunities";

pub struct ClusteringEngine {
    client: GraphClient,
    kind: EntityKind,
}

impl ClusteringEngine {
    pub fn new(client: GraphClient, kind: EntityKind) -> Self {
        Self { client, kind }
    }

    /// Detect and clear a projection left behind by a previous failed run.
    /// Returns whether one existed.
    pub async fn drop_projection_if_exists(&self, name: &str) -> Result<bool, neo4rs::Error> {
        let q = query("CALL gds.graph.exists($name) YIELD exists RETURN exists").param("name", name);
        let mut stream = self.client.graph.execute(q).await?;
        let exists = match stream.next().await? {
            Some(row) => row.get("exists").unwrap_or(false),
            None => false,
        };
        if exists {
            warn!(name, "dropping stale graph projection");
            self.drop_projection(name).await?;
        }
        Ok(exists)
    }

    /// Materialize the similarity subgraph of the given node label as a named
    /// projection. Fails with a name collision if one already exists.
    pub async fn project(&self, name: &str, node_label: &str) -> Result<(), neo4rs::Error> {
        let q = query(
            "CALL gds.graph.project($name, [$node_label], ['IS_SIMILAR_TO'])
             YIELD graphName, nodeCount, relationshipCount
             RETURN graphName, nodeCount, relationshipCount",
        )
        .param("name", name)
        .param("node_label", node_label);

        let mut stream = self.client.graph.execute(q).await?;
        if let Some(row) = stream.next().await? {
            let nodes: i64 = row.get("nodeCount").unwrap_or(0);
            let rels: i64 = row.get("relationshipCount").unwrap_or(0);
            info!(name, nodes, rels, "graph projection created");
        }
        Ok(())
    }

    /// Connected-components labeling, writing componentId onto each node of
    /// the projection. Returns the component count.
    pub async fn write_components(&self, name: &str, node_label: &str) -> Result<u64, neo4rs::Error> {
        let q = query(
            "CALL gds.wcc.write($name, { writeProperty: 'componentId' })
             YIELD nodePropertiesWritten, componentCount
             RETURN componentCount",
        )
        .param("name", name);

        let mut components = 0u64;
        let mut stream = self.client.graph.execute(q).await?;
        if let Some(row) = stream.next().await? {
            let count: i64 = row.get("componentCount").unwrap_or(0);
            components = count as u64;
        }

        // Incremental runs produce epoch-suffixed string ids; keep the
        // property a string in full runs too so the two agree on type.
        let normalize = query(&format!(
            "MATCH (n:{node_label})
             WHERE n.componentId IS NOT NULL
             SET n.componentId = toString(n.componentId)"
        ));
        self.client.graph.run(normalize).await?;

        info!(name, components, "connected components written");
        Ok(components)
    }

    /// Incremental variant: stream components and namespace every id with
    /// the given epoch, so ids from this run never collide with ids computed
    /// in earlier epochs.
    pub async fn write_components_with_epoch(
        &self,
        name: &str,
        epoch_millis: i64,
    ) -> Result<u64, neo4rs::Error> {
        let q = query(
            "CALL gds.wcc.stream($name)
             YIELD nodeId, componentId
             WITH gds.util.asNode(nodeId) AS n, componentId
             SET n.componentId = toString(componentId) + '_' + $epoch
             RETURN count(n) AS updated",
        )
        .param("name", name)
        .param("epoch", epoch_millis.to_string());

        let mut updated = 0u64;
        let mut stream = self.client.graph.execute(q).await?;
        if let Some(row) = stream.next().await? {
            let count: i64 = row.get("updated").unwrap_or(0);
            updated = count as u64;
        }

        info!(name, updated, epoch_millis, "epoch-scoped components written");
        Ok(updated)
    }

    pub async fn drop_projection(&self, name: &str) -> Result<(), neo4rs::Error> {
        let q = query("CALL gds.graph.drop($name)").param("name", name);
        self.client.graph.run(q).await
    }

    /// Weighted community detection over summed similarity scores, for finer
    /// sub-grouping where connected components are too coarse. Used on the
    /// person path only.
    pub async fn refine_communities(&self) -> Result<(), neo4rs::Error> {
        let label = self.kind.record_label();

        let edges = self.count_similarity_edges().await?;
        if edges == 0 {
            info!("no similarity edges, skipping community refinement");
            return Ok(());
        }

        self.drop_projection_if_exists(LOUVAIN_PROJECTION).await?;

        let project = query(&format!(
            "MATCH (source:{label})-[r:IS_SIMILAR_TO]->(target:{label})
             WITH source, target, sum(r.score) AS total_score
             WITH gds.graph.project($name, source, target,
                 {{relationshipProperties: {{total_score: total_score}}}}) AS g
             RETURN g.graphName AS graph, g.nodeCount AS nodes, g.relationshipCount AS rels"
        ))
        .param("name", LOUVAIN_PROJECTION);
        self.client.graph.run(project).await?;

        let louvain = query(
            "CALL gds.louvain.write($name, {
                 relationshipWeightProperty: 'total_score',
                 writeProperty: 'louvainIntermediateCommunities',
                 includeIntermediateCommunities: true
             })
             YIELD communityCount, modularity, modularities
             RETURN communityCount",
        )
        .param("name", LOUVAIN_PROJECTION);
        self.client.graph.run(louvain).await?;

        let assign = query(&format!(
            "MATCH (n:{label})
             WHERE n.louvainIntermediateCommunities IS NOT NULL
             SET n.louvain = toIntegerList(n.louvainIntermediateCommunities)[0]"
        ));
        self.client.graph.run(assign).await?;

        self.drop_projection(LOUVAIN_PROJECTION).await?;
        info!("community refinement complete");
        Ok(())
    }

    async fn count_similarity_edges(&self) -> Result<u64, neo4rs::Error> {
        let label = self.kind.record_label();
        let q = query(&format!(
            "MATCH (:{label})-[r:IS_SIMILAR_TO]->(:{label}) RETURN count(r) AS cnt"
        ));
        let mut stream = self.client.graph.execute(q).await?;
        if let Some(row) = stream.next().await? {
            let cnt: i64 = row.get("cnt").unwrap_or(0);
            return Ok(cnt as u64);
        }
        Ok(0)
    }
}
