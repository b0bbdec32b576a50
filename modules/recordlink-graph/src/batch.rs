//! Chunked `UNWIND $batch` bulk writes.
//!
//! Every bulk operation in the pipeline goes through the same shape: a query
//! template taking a `$batch` list parameter, an iterator of Bolt maps, and
//! a total row count for progress logging. Chunks are submitted one at a
//! time, each as a single server-side transaction.

use neo4rs::{query, BoltFloat, BoltMap, BoltString, BoltType};
use tracing::info;

use crate::GraphClient;

/// Default chunk size for bulk writes.
pub const DEFAULT_BATCH_SIZE: usize = 500;

pub(crate) fn bolt_string(v: &str) -> BoltType {
    BoltType::String(BoltString::from(v))
}

/// Missing values travel as "" and are turned back into nulls by the query
/// template (`CASE WHEN item.x = '' THEN null ...`).
pub(crate) fn bolt_opt_string(v: Option<&str>) -> BoltType {
    bolt_string(v.unwrap_or(""))
}

pub(crate) fn bolt_float(v: f64) -> BoltType {
    BoltType::Float(BoltFloat::new(v))
}

pub(crate) fn bolt_map<const N: usize>(pairs: [(&str, BoltType); N]) -> BoltType {
    BoltType::Map(BoltMap::from_iter(
        pairs
            .into_iter()
            .map(|(k, v)| (BoltString::from(k), v)),
    ))
}

/// Executes a query template over an iterator of rows in fixed-size chunks.
#[derive(Clone)]
pub struct BatchRunner {
    client: GraphClient,
    batch_size: usize,
}

impl BatchRunner {
    pub fn new(client: GraphClient) -> Self {
        Self {
            client,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Store all rows through the template. Returns the number of rows
    /// submitted.
    pub async fn store<I>(&self, template: &str, rows: I, total: usize) -> Result<usize, neo4rs::Error>
    where
        I: IntoIterator<Item = BoltType>,
    {
        let mut stored = 0usize;
        let mut batch: Vec<BoltType> = Vec::with_capacity(self.batch_size);

        for row in rows {
            batch.push(row);
            if batch.len() == self.batch_size {
                let chunk = std::mem::replace(&mut batch, Vec::with_capacity(self.batch_size));
                stored += chunk.len();
                self.flush(template, chunk).await?;
                info!(stored, total, "batch stored");
            }
        }

        if !batch.is_empty() {
            stored += batch.len();
            self.flush(template, batch).await?;
            info!(stored, total, "batch stored");
        }

        Ok(stored)
    }

    async fn flush(&self, template: &str, rows: Vec<BoltType>) -> Result<(), neo4rs::Error> {
        let q = query(template).param("batch", rows);
        self.client.graph.run(q).await
    }
}
