//! Canonical-entity materialization.
//!
//! One canonical node per distinct componentId; each record attaches through
//! a resolved edge exactly once, appending its attributes onto the entity's
//! aggregate lists as it does. The existence check on the edge is what keeps
//! repeated runs from double-counting a record.

use neo4rs::query;
use tracing::info;

use recordlink_common::EntityKind;

use crate::batch::{bolt_map, bolt_string, BatchRunner};
use crate::GraphClient;

pub struct ClusterMaterializer {
    client: GraphClient,
    kind: EntityKind,
    batch: BatchRunner,
}

impl ClusterMaterializer {
    pub fn new(client: GraphClient, kind: EntityKind) -> Self {
        Self {
            batch: BatchRunner::new(client.clone()),
            client,
            kind,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch = self.batch.with_batch_size(batch_size);
        self
    }

    /// Materialize canonical entities for every component present among the
    /// source records. Returns the number of distinct clusters.
    pub async fn materialize(&self) -> Result<u64, neo4rs::Error> {
        let ids = self.cluster_ids().await?;
        info!(kind = %self.kind, clusters = ids.len(), "materializing canonical entities");

        self.create_cluster_nodes(&ids).await?;
        self.connect_records_to_clusters(&ids).await?;
        self.assign_display_names(&ids).await?;

        Ok(ids.len() as u64)
    }

    /// Distinct componentIds across all records of this kind.
    async fn cluster_ids(&self) -> Result<Vec<String>, neo4rs::Error> {
        let label = self.kind.record_label();
        let q = query(&format!(
            "MATCH (n:{label})
             WHERE n.componentId IS NOT NULL
             RETURN DISTINCT n.componentId AS id"
        ));

        let mut ids = Vec::new();
        let mut stream = self.client.graph.execute(q).await?;
        while let Some(row) = stream.next().await? {
            let id: String = row.get("id").unwrap_or_default();
            if !id.is_empty() {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    async fn create_cluster_nodes(&self, ids: &[String]) -> Result<(), neo4rs::Error> {
        let cluster = self.kind.cluster_label();
        let template = format!(
            "UNWIND $batch AS item
             MERGE (c:{cluster} {{clusterId: item.id}})"
        );
        self.store_ids(&template, ids).await
    }

    /// Attach records to their cluster and accumulate attributes. The
    /// existence check skips records that already resolved to the cluster,
    /// so each record's attributes are appended at most once.
    async fn connect_records_to_clusters(&self, ids: &[String]) -> Result<(), neo4rs::Error> {
        let template = match self.kind {
            EntityKind::Person => "UNWIND $batch AS item
                 MATCH (p:PersonRecord {componentId: item.id})
                 MATCH (c:Person {clusterId: item.id})
                 WHERE NOT EXISTS { (p)-[:RECORD_RESOLVED_TO]->(c) }
                 MERGE (p)-[:RECORD_RESOLVED_TO]->(c)
                 SET c.fullNames = coalesce(c.fullNames, []) + coalesce(p.fullName, []),
                     c.employerIds = coalesce(c.employerIds, []) + coalesce(p.employerId, []),
                     c.titles = coalesce(c.titles, []) + coalesce(p.title, [])"
                .to_string(),
            EntityKind::Organization => "UNWIND $batch AS item
                 MATCH (p:Organization {componentId: item.id})
                 MATCH (c:OrganizationGroup {clusterId: item.id})
                 WHERE NOT EXISTS { (p)-[:BELONGS_TO_ORG_GROUP]->(c) }
                 MERGE (p)-[:BELONGS_TO_ORG_GROUP]->(c)
                 SET c.ids = CASE WHEN toString(p.id) IN coalesce(c.ids, [])
                                  THEN coalesce(c.ids, [])
                                  ELSE coalesce(c.ids, []) + toString(p.id) END,
                     c.names = CASE WHEN p.name IS NULL OR p.name IN coalesce(c.names, [])
                                    THEN coalesce(c.names, [])
                                    ELSE coalesce(c.names, []) + p.name END,
                     c.sources = CASE WHEN p.source IS NULL OR p.source IN coalesce(c.sources, [])
                                      THEN coalesce(c.sources, [])
                                      ELSE coalesce(c.sources, []) + p.source END"
                .to_string(),
        };
        self.store_ids(&template, ids).await
    }

    /// Pick each cluster's display name: the shortest member name, first
    /// appended winning ties.
    async fn assign_display_names(&self, ids: &[String]) -> Result<(), neo4rs::Error> {
        let cluster = self.kind.cluster_label();
        let names = self.kind.names_property();
        let template = format!(
            "UNWIND $batch AS item
             MATCH (c:{cluster} {{clusterId: item.id}})
             WHERE size(coalesce(c.{names}, [])) > 0
             WITH c, reduce(shortest = head(c.{names}), name IN c.{names} |
                 CASE WHEN size(name) < size(shortest) THEN name ELSE shortest END) AS shortestName
             SET c.name = shortestName"
        );
        self.store_ids(&template, ids).await
    }

    /// Link person clusters to the organizations they accumulated employer
    /// references for. `only_new` restricts to clusters produced by the
    /// current incremental run.
    pub async fn link_clusters_to_employers(&self, only_new: bool) -> Result<(), neo4rs::Error> {
        if self.kind != EntityKind::Person {
            return Ok(());
        }

        let q = query(
            "MATCH (e:Person)
             WHERE ($only_new = false OR e.newCluster IS NOT NULL)
               AND e.employerIds IS NOT NULL
             MATCH (o:Organization)
             WHERE o.id IN e.employerIds
             MERGE (e)-[r:BELONGS_TO_ORG]->(o)
             SET r.roles = e.titles",
        )
        .param("only_new", only_new);

        self.client.graph.run(q).await
    }

    async fn store_ids(&self, template: &str, ids: &[String]) -> Result<(), neo4rs::Error> {
        let rows = ids.iter().map(|id| bolt_map([("id", bolt_string(id))]));
        self.batch.store(template, rows, ids.len()).await?;
        Ok(())
    }
}
