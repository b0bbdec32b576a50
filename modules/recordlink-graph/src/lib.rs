pub mod batch;
pub mod candidates;
pub mod cdc;
pub mod client;
pub mod cluster;
pub mod error;
pub mod incremental;
pub mod materialize;
pub mod migrate;
pub mod pipeline;
pub mod writer;

#[cfg(feature = "test-utils")]
pub mod testutil;

pub use candidates::CandidateGenerator;
pub use cdc::ChangeFeedWatcher;
pub use client::GraphClient;
pub use cluster::ClusteringEngine;
pub use error::ResolveError;
pub use incremental::{AffectedClosure, IncrementalResolver, ResolutionPhase};
pub use materialize::ClusterMaterializer;
pub use pipeline::{ResolutionPipeline, ResolutionStats};
pub use writer::RecordWriter;

pub use neo4rs::query;
