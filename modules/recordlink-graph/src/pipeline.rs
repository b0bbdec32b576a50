//! Full (non-incremental) resolution for one entity kind.

use tracing::info;

use recordlink_common::EntityKind;

use crate::candidates::CandidateGenerator;
use crate::cluster::ClusteringEngine;
use crate::materialize::ClusterMaterializer;
use crate::GraphClient;

/// Orchestrates initial resolution end to end:
/// 1. Build similarity edges from unprocessed records
/// 2. Project the similarity graph and compute connected components
/// 3. Materialize one canonical entity per component
/// 4. Refine with weighted communities and link employers (person path)
pub struct ResolutionPipeline {
    kind: EntityKind,
    generator: CandidateGenerator,
    engine: ClusteringEngine,
    materializer: ClusterMaterializer,
}

#[derive(Debug, Default)]
pub struct ResolutionStats {
    pub similarity_edges: u64,
    pub components: u64,
    pub clusters: u64,
}

impl std::fmt::Display for ResolutionStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== Resolution Complete ===")?;
        writeln!(f, "Similarity edges: {}", self.similarity_edges)?;
        writeln!(f, "Components:       {}", self.components)?;
        writeln!(f, "Clusters:         {}", self.clusters)?;
        Ok(())
    }
}

impl ResolutionPipeline {
    pub fn new(client: GraphClient, kind: EntityKind) -> Self {
        Self {
            generator: CandidateGenerator::new(client.clone(), kind),
            engine: ClusteringEngine::new(client.clone(), kind),
            materializer: ClusterMaterializer::new(client, kind),
            kind,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.generator = self.generator.with_batch_size(batch_size);
        self.materializer = self.materializer.with_batch_size(batch_size);
        self
    }

    pub async fn run(&self) -> Result<ResolutionStats, neo4rs::Error> {
        let mut stats = ResolutionStats::default();

        info!(kind = %self.kind, "creating similarity relationships");
        stats.similarity_edges = self.generator.build_similarity_edges(None).await?;

        let name = self.kind.projection_name();
        self.engine.drop_projection_if_exists(name).await?;
        self.engine.project(name, self.kind.record_label()).await?;
        stats.components = self
            .engine
            .write_components(name, self.kind.record_label())
            .await?;
        self.engine.drop_projection(name).await?;

        stats.clusters = self.materializer.materialize().await?;

        if self.kind == EntityKind::Person {
            self.engine.refine_communities().await?;
            self.materializer.link_clusters_to_employers(false).await?;
        }

        info!(
            kind = %self.kind,
            edges = stats.similarity_edges,
            components = stats.components,
            clusters = stats.clusters,
            "resolution complete"
        );
        Ok(stats)
    }
}
