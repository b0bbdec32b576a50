use neo4rs::query;
use tracing::{info, warn};

use crate::GraphClient;

/// Run idempotent schema migrations: constraints, indexes, full-text indexes.
/// Creation must survive repeated runs, so "already exists" errors are
/// swallowed rather than propagated.
pub async fn migrate(client: &GraphClient) -> Result<(), neo4rs::Error> {
    let g = &client.graph;

    info!("Running schema migrations...");

    // --- Uniqueness constraints ---
    let constraints = [
        "CREATE CONSTRAINT person_record_pk IF NOT EXISTS FOR (node:PersonRecord) REQUIRE node.pk IS UNIQUE",
        "CREATE CONSTRAINT person_id IF NOT EXISTS FOR (node:Person) REQUIRE node.clusterId IS UNIQUE",
        "CREATE CONSTRAINT organization_id IF NOT EXISTS FOR (node:Organization) REQUIRE node.id IS UNIQUE",
        "CREATE CONSTRAINT organization_group_id IF NOT EXISTS FOR (node:OrganizationGroup) REQUIRE node.clusterId IS UNIQUE",
        "CREATE CONSTRAINT address_id IF NOT EXISTS FOR (node:Address) REQUIRE node.id IS UNIQUE",
    ];

    for c in &constraints {
        run_ignoring_exists(g, c).await?;
    }
    info!("Uniqueness constraints created");

    // --- Property indexes ---
    let indexes = [
        "CREATE INDEX person_record_component_id IF NOT EXISTS FOR (node:PersonRecord) ON (node.componentId)",
        "CREATE INDEX person_record_employer_id IF NOT EXISTS FOR (node:PersonRecord) ON (node.employerId)",
        "CREATE INDEX organization_component_id IF NOT EXISTS FOR (node:Organization) ON (node.componentId)",
    ];

    for idx in &indexes {
        run_ignoring_exists(g, idx).await?;
    }
    info!("Property indexes created");

    // --- Full-text indexes for fuzzy candidate retrieval ---
    let fulltext = [
        "CREATE FULLTEXT INDEX person_record_fullName IF NOT EXISTS FOR (node:PersonRecord) ON EACH [node.fullName]",
        "CREATE FULLTEXT INDEX organization_name IF NOT EXISTS FOR (node:Organization) ON EACH [node.name]",
    ];

    for f in &fulltext {
        run_ignoring_exists(g, f).await?;
    }
    info!("Full-text indexes created");

    // Candidate retrieval queries the full-text indexes right after setup;
    // wait for population to finish.
    g.run(query("CALL db.awaitIndexes(300)")).await?;

    info!("Schema migration complete");
    Ok(())
}

/// Run a schema statement, ignoring errors that indicate the constraint or
/// index already exists under another name.
async fn run_ignoring_exists(g: &neo4rs::Graph, cypher: &str) -> Result<(), neo4rs::Error> {
    match g.run(query(cypher)).await {
        Ok(_) => Ok(()),
        Err(e) => {
            let msg = e.to_string().to_lowercase();
            if msg.contains("already exists") || msg.contains("equivalent") {
                warn!(
                    "Already exists (skipped): {}",
                    cypher.chars().take(80).collect::<String>()
                );
                Ok(())
            } else {
                Err(e)
            }
        }
    }
}
