//! Incremental re-resolution driven by change-feed events.
//!
//! A multi-phase pipeline over shared mutable state, coordinated through an
//! explicit state machine so partial-failure resumption stays testable:
//! each operation validates the phase it expects and advances it on success.
//! The pipeline is not atomic end-to-end; every write is existence-guarded
//! so a crashed run can re-enter at the last completed phase.

use chrono::{DateTime, Utc};
use neo4rs::query;
use tracing::info;

use recordlink_common::{ChangeEvent, ChangeOp, EntityKind};

use crate::candidates::CandidateGenerator;
use crate::cdc::ChangeFeedWatcher;
use crate::cluster::ClusteringEngine;
use crate::error::ResolveError;
use crate::GraphClient;

/// Progress of one incremental resolution run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionPhase {
    Clean,
    CdcEnabled,
    RecordsImported,
    SimilarityComputed,
    AffectedMarked,
    StaleRemoved,
    Resolved,
    CdcDisabled,
}

impl std::fmt::Display for ResolutionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ResolutionPhase::Clean => "clean",
            ResolutionPhase::CdcEnabled => "cdc_enabled",
            ResolutionPhase::RecordsImported => "records_imported",
            ResolutionPhase::SimilarityComputed => "similarity_computed",
            ResolutionPhase::AffectedMarked => "affected_marked",
            ResolutionPhase::StaleRemoved => "stale_removed",
            ResolutionPhase::Resolved => "resolved",
            ResolutionPhase::CdcDisabled => "cdc_disabled",
        };
        write!(f, "{name}")
    }
}

/// Bounded-depth closure over the shared-canonical-entity relation: how far
/// the "affected" marking propagates from the endpoints of a new similarity
/// edge. One hop covers every record resolved to the same entity as an
/// endpoint.
#[derive(Debug, Clone, Copy)]
pub struct AffectedClosure {
    pub max_hops: usize,
}

impl Default for AffectedClosure {
    fn default() -> Self {
        Self { max_hops: 1 }
    }
}

/// Re-resolves only the subgraph touched by new or changed records.
/// Currently drives the person pipeline, which is the one fed by batch
/// simulations; organizations resolve in full runs only.
pub struct IncrementalResolver {
    client: GraphClient,
    kind: EntityKind,
    watcher: ChangeFeedWatcher,
    generator: CandidateGenerator,
    engine: ClusteringEngine,
    closure: AffectedClosure,
    phase: ResolutionPhase,
    checkpoint: DateTime<Utc>,
}

impl IncrementalResolver {
    pub fn new(client: GraphClient, watcher: ChangeFeedWatcher) -> Self {
        let kind = EntityKind::Person;
        Self {
            generator: CandidateGenerator::new(client.clone(), kind),
            engine: ClusteringEngine::new(client.clone(), kind),
            client,
            kind,
            watcher,
            closure: AffectedClosure::default(),
            phase: ResolutionPhase::Clean,
            checkpoint: Utc::now(),
        }
    }

    pub fn with_closure(mut self, closure: AffectedClosure) -> Self {
        self.closure = closure;
        self
    }

    pub fn phase(&self) -> ResolutionPhase {
        self.phase
    }

    pub fn checkpoint(&self) -> DateTime<Utc> {
        self.checkpoint
    }

    fn expect(&self, expected: ResolutionPhase) -> Result<(), ResolveError> {
        if self.phase == expected {
            Ok(())
        } else {
            Err(ResolveError::Phase {
                expected,
                found: self.phase,
            })
        }
    }

    /// Events committed since the last checkpoint; advances the checkpoint.
    pub async fn catch_update(&mut self) -> Result<Vec<ChangeEvent>, ResolveError> {
        let events = self.watcher.changes_since(self.checkpoint).await?;
        self.checkpoint = Utc::now();
        Ok(events)
    }

    pub async fn enable_cdc(&mut self) -> Result<(), ResolveError> {
        self.expect(ResolutionPhase::Clean)?;
        self.watcher.enable().await?;
        self.checkpoint = Utc::now();
        self.phase = ResolutionPhase::CdcEnabled;
        Ok(())
    }

    /// The batch itself is imported by the caller through `RecordWriter`;
    /// this transition records that it happened.
    pub fn records_imported(&mut self) -> Result<(), ResolveError> {
        self.expect(ResolutionPhase::CdcEnabled)?;
        self.phase = ResolutionPhase::RecordsImported;
        Ok(())
    }

    /// Compute similarity edges only for the nodes the batch created.
    pub async fn process_new_records(&mut self, events: &[ChangeEvent]) -> Result<u64, ResolveError> {
        self.expect(ResolutionPhase::RecordsImported)?;

        let new_nodes: Vec<String> = events
            .iter()
            .filter(|e| e.is_node_event() && e.op == ChangeOp::Create)
            .filter_map(|e| e.element_id.clone())
            .collect();

        info!(new_nodes = new_nodes.len(), "computing similarity for new records");
        let edges = self.generator.build_similarity_edges(Some(&new_nodes)).await?;

        self.phase = ResolutionPhase::SimilarityComputed;
        Ok(edges)
    }

    /// Mark the endpoints of the new similarity edges, and every record
    /// sharing a canonical entity with them, as Affected; snapshot each
    /// affected record's componentId for rollback.
    pub async fn mark_affected(&mut self, events: &[ChangeEvent]) -> Result<(), ResolveError> {
        self.expect(ResolutionPhase::SimilarityComputed)?;

        let label = self.kind.record_label();
        let created: Vec<&ChangeEvent> = events
            .iter()
            .filter(|e| e.is_relationship_event() && e.op == ChangeOp::Create)
            .collect();
        let start_nodes: Vec<String> = created
            .iter()
            .filter_map(|e| e.start_element_id.clone())
            .collect();
        // End nodes are the query anchors, i.e. the records the batch added.
        let end_nodes: Vec<String> = created
            .iter()
            .filter_map(|e| e.end_element_id.clone())
            .collect();

        let g = &self.client.graph;
        g.run(
            query(&format!(
                "MATCH (n:{label}) WHERE elementId(n) IN $ids SET n:Affected"
            ))
            .param("ids", start_nodes.clone()),
        )
        .await?;
        g.run(
            query(&format!(
                "MATCH (n:{label}) WHERE elementId(n) IN $ids
                 SET n:Affected
                 SET n.newNode = true"
            ))
            .param("ids", end_nodes.clone()),
        )
        .await?;

        // Propagate through shared canonical entities, one hop at a time,
        // up to the configured depth or until nothing new is marked.
        let rel = self.kind.resolved_rel();
        let cluster = self.kind.cluster_label();
        let mut frontier: Vec<String> = start_nodes.into_iter().chain(end_nodes).collect();
        frontier.sort();
        frontier.dedup();

        for hop in 0..self.closure.max_hops {
            if frontier.is_empty() {
                break;
            }
            let q = query(&format!(
                "MATCH (n:{label})-[:{rel}]->(:{cluster})<-[:{rel}]-(x:{label})
                 WHERE elementId(n) IN $frontier AND NOT x:Affected
                 SET x:Affected
                 RETURN collect(DISTINCT elementId(x)) AS next"
            ))
            .param("frontier", frontier.clone());

            let mut next: Vec<String> = Vec::new();
            let mut stream = g.execute(q).await?;
            if let Some(row) = stream.next().await? {
                next = row.get("next").unwrap_or_default();
            }
            info!(hop, marked = next.len(), "affected closure expanded");
            frontier = next;
        }

        // Snapshot for the rollback path.
        g.run(query("MATCH (n:Affected) SET n.oldComponentId = n.componentId"))
            .await?;

        self.phase = ResolutionPhase::AffectedMarked;
        Ok(())
    }

    /// Detach and delete the canonical entities of affected records. The
    /// records themselves survive; their entities are rebuilt next phase.
    pub async fn remove_stale_entities(&mut self) -> Result<(), ResolveError> {
        self.expect(ResolutionPhase::AffectedMarked)?;

        let label = self.kind.record_label();
        let rel = self.kind.resolved_rel();
        let cluster = self.kind.cluster_label();
        self.client
            .graph
            .run(query(&format!(
                "MATCH (n:{label}:Affected)-[:{rel}]->(c:{cluster})
                 DETACH DELETE c"
            )))
            .await?;

        self.phase = ResolutionPhase::StaleRemoved;
        Ok(())
    }

    /// Re-cluster the Affected subgraph with epoch-scoped component ids and
    /// materialize fresh canonical entities for it, clearing the marker.
    pub async fn resolve_affected(&mut self) -> Result<(), ResolveError> {
        self.expect(ResolutionPhase::StaleRemoved)?;

        let name = self.kind.projection_name();
        self.engine.drop_projection_if_exists(name).await?;
        self.engine.project(name, "Affected").await?;
        let epoch = Utc::now().timestamp_millis();
        self.engine.write_components_with_epoch(name, epoch).await?;
        self.engine.drop_projection(name).await?;

        let g = &self.client.graph;
        g.run(query(
            "MATCH (n:PersonRecord:Affected)
             WITH n, n.componentId AS component
             MERGE (e:Person {clusterId: component})
             SET e.newCluster = true
             MERGE (n)-[:RECORD_RESOLVED_TO]->(e)
             SET e.fullNames = coalesce(e.fullNames, []) + coalesce(n.fullName, []),
                 e.employerIds = coalesce(e.employerIds, []) + coalesce(n.employerId, []),
                 e.titles = coalesce(e.titles, []) + coalesce(n.title, [])
             SET e.name = reduce(shortest = head(e.fullNames), name IN e.fullNames |
                 CASE WHEN size(name) < size(shortest) THEN name ELSE shortest END)
             REMOVE n:Affected",
        ))
        .await?;

        // Employer links for the fresh clusters only.
        g.run(query(
            "MATCH (e:Person)
             WHERE e.newCluster IS NOT NULL AND e.employerIds IS NOT NULL
             MATCH (o:Organization)
             WHERE o.id IN e.employerIds
             MERGE (e)-[r:BELONGS_TO_ORG]->(o)
             SET r.roles = e.titles",
        ))
        .await?;

        self.phase = ResolutionPhase::Resolved;
        Ok(())
    }

    pub async fn disable_cdc(&mut self) -> Result<(), ResolveError> {
        self.expect(ResolutionPhase::Resolved)?;
        self.watcher.disable().await?;
        self.phase = ResolutionPhase::CdcDisabled;
        Ok(())
    }

    /// Roll back a simulated batch: delete the records it introduced,
    /// restore affected records' componentId from the snapshot, and rebuild
    /// each touched cluster's aggregates from its surviving members.
    /// Valid from any phase. Assumes the batch touched a single pre-existing
    /// cluster, like the simulation it reverses.
    pub async fn clean_updates(&mut self) -> Result<(), ResolveError> {
        let g = &self.client.graph;

        g.run(query(
            "MATCH (n:PersonRecord) WHERE n.newNode IS NOT NULL DETACH DELETE n",
        ))
        .await?;

        g.run(query(
            "MATCH (p:Person)<-[:RECORD_RESOLVED_TO]-(r:PersonRecord)
             WHERE p.newCluster IS NOT NULL
             SET r.componentId = r.oldComponentId
             REMOVE r.oldComponentId",
        ))
        .await?;

        g.run(query(
            "MATCH (p:Person)<-[:RECORD_RESOLVED_TO]-(r:PersonRecord)
             WHERE p.newCluster IS NOT NULL
             WITH p, collect(r) AS members
             SET p.clusterId = head([m IN members | m.componentId]),
                 p.fullNames = [m IN members WHERE m.fullName IS NOT NULL | m.fullName],
                 p.employerIds = [m IN members WHERE m.employerId IS NOT NULL | m.employerId],
                 p.titles = [m IN members WHERE m.title IS NOT NULL | m.title],
                 p.newCluster = null
             WITH p
             WHERE size(p.fullNames) > 0
             SET p.name = reduce(shortest = head(p.fullNames), name IN p.fullNames |
                 CASE WHEN size(name) < size(shortest) THEN name ELSE shortest END)",
        ))
        .await?;

        // A cluster built purely from deleted records has no members left.
        g.run(query(
            "MATCH (p:Person)
             WHERE p.newCluster IS NOT NULL
               AND NOT EXISTS { (p)<-[:RECORD_RESOLVED_TO]-() }
             DETACH DELETE p",
        ))
        .await?;

        // Stray markers from an interrupted run.
        g.run(query(
            "MATCH (n:Affected) REMOVE n:Affected REMOVE n.oldComponentId",
        ))
        .await?;

        self.phase = ResolutionPhase::Clean;
        Ok(())
    }
}
