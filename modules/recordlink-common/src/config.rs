use std::env;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Neo4j
    pub neo4j_uri: String,
    pub neo4j_user: String,
    pub neo4j_password: String,
    pub neo4j_database: String,

    // Bulk-write chunk size for UNWIND batches
    pub batch_size: usize,
}

impl Config {
    /// Load configuration from environment variables.
    /// Panics with a clear message if required vars are missing.
    pub fn from_env() -> Self {
        Self {
            neo4j_uri: required_env("NEO4J_URI"),
            neo4j_user: required_env("NEO4J_USER"),
            neo4j_password: required_env("NEO4J_PASSWORD"),
            neo4j_database: env::var("NEO4J_DATABASE").unwrap_or_else(|_| "neo4j".to_string()),
            batch_size: env::var("BATCH_SIZE")
                .unwrap_or_else(|_| "500".to_string())
                .parse()
                .expect("BATCH_SIZE must be a number"),
        }
    }

    /// A config pointing at an explicit bolt endpoint, for tests and tools
    /// that connect to throwaway instances rather than the environment.
    pub fn for_endpoint(uri: &str, user: &str, password: &str) -> Self {
        Self {
            neo4j_uri: uri.to_string(),
            neo4j_user: user.to_string(),
            neo4j_password: password.to_string(),
            neo4j_database: "neo4j".to_string(),
            batch_size: 500,
        }
    }
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}
