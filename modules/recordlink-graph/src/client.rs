use neo4rs::{ConfigBuilder, Graph};

use recordlink_common::Config;

/// Thin wrapper around neo4rs::Graph providing connection setup.
#[derive(Clone)]
pub struct GraphClient {
    pub(crate) graph: Graph,
}

impl GraphClient {
    /// Connect to Neo4j with the given configuration.
    pub async fn connect(cfg: &Config) -> Result<Self, neo4rs::Error> {
        let config = ConfigBuilder::default()
            .uri(&cfg.neo4j_uri)
            .user(&cfg.neo4j_user)
            .password(&cfg.neo4j_password)
            .db(cfg.neo4j_database.as_str())
            .fetch_size(500)
            .max_connections(10)
            .build()?;
        let graph = Graph::connect(config).await?;
        Ok(Self { graph })
    }

    /// Get a reference to the underlying neo4rs Graph.
    pub fn inner(&self) -> &Graph {
        &self.graph
    }
}
