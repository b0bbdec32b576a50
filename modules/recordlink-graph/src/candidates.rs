//! Candidate generation and similarity-edge building.
//!
//! Unprocessed records are used as query anchors against the full-text index
//! with per-token fuzzy tolerance; hits are scored client-side and accepted
//! pairs persisted as `IS_SIMILAR_TO` edges. Anchors are marked
//! `RecordProcessed` before the search runs, so a re-run never rescans a
//! record that has already anchored a query, whatever its outcome was.

use std::collections::HashSet;

use neo4rs::query;
use tracing::{debug, info};

use recordlink_common::{EntityKind, NameMatcher};

use crate::batch::{bolt_float, bolt_map, bolt_string, DEFAULT_BATCH_SIZE};
use crate::GraphClient;

/// A record awaiting similarity search.
#[derive(Debug, Clone)]
pub struct AnchorRecord {
    pub key: String,
    pub name: String,
}

/// An accepted pair: edge runs matched -> anchor, tagged with the score.
#[derive(Debug, Clone)]
pub struct SimilarityPair {
    pub anchor: String,
    pub matched: String,
    pub score: f64,
}

pub struct CandidateGenerator {
    client: GraphClient,
    kind: EntityKind,
    matcher: NameMatcher,
    batch_size: usize,
}

impl CandidateGenerator {
    pub fn new(client: GraphClient, kind: EntityKind) -> Self {
        Self {
            client,
            kind,
            matcher: NameMatcher::new(kind.match_profile()),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Records with a usable name that have not yet anchored a similarity
    /// search, optionally restricted to the given element ids (incremental
    /// resolution scopes the search this way).
    pub async fn unprocessed_records(
        &self,
        scope: Option<&[String]>,
    ) -> Result<Vec<AnchorRecord>, neo4rs::Error> {
        let label = self.kind.record_label();
        let key = self.kind.key_property();
        let name = self.kind.name_property();

        let q = query(&format!(
            "MATCH (n:{label})
             WHERE NOT (n.{name} IS NULL OR n.{name} = ' ' OR n.{name} = '?')
               AND NOT n:RecordProcessed
               AND ($scope IS NULL OR elementId(n) IN $scope)
             RETURN n.{key} AS key, n.{name} AS name"
        ))
        .param("scope", scope.map(|s| s.to_vec()));

        let mut anchors = Vec::new();
        let mut stream = self.client.graph.execute(q).await?;
        while let Some(row) = stream.next().await? {
            let key: String = row.get("key").unwrap_or_default();
            let name: String = row.get("name").unwrap_or_default();
            if !key.is_empty() && !name.is_empty() {
                anchors.push(AnchorRecord { key, name });
            }
        }
        Ok(anchors)
    }

    /// Build similarity edges for every unprocessed record in scope.
    /// Returns the number of accepted pairs merged. Idempotent: edges are
    /// existence-checked per ordered pair and method, and anchors are never
    /// rescanned.
    pub async fn build_similarity_edges(
        &self,
        scope: Option<&[String]>,
    ) -> Result<u64, neo4rs::Error> {
        let anchors = self.unprocessed_records(scope).await?;
        info!(
            kind = %self.kind,
            anchors = anchors.len(),
            "scanning unprocessed records for similarity candidates"
        );

        // One edge per unordered pair: when both records anchor a search in
        // the same run, the second direction is dropped here.
        let mut seen: HashSet<(String, String)> = HashSet::new();

        let mut merged_total = 0u64;
        for chunk in anchors.chunks(self.batch_size) {
            self.mark_processed(chunk).await?;

            let mut pairs: Vec<SimilarityPair> = Vec::new();
            for anchor in chunk {
                let Some(clause) = self.matcher.fulltext_clause(&anchor.name) else {
                    continue;
                };
                for (key, name) in self.search_index(&anchor.key, &clause).await? {
                    if !self.matcher.accepts(&anchor.name, &name) {
                        continue;
                    }
                    let unordered = if anchor.key < key {
                        (anchor.key.clone(), key.clone())
                    } else {
                        (key.clone(), anchor.key.clone())
                    };
                    if !seen.insert(unordered) {
                        continue;
                    }
                    pairs.push(SimilarityPair {
                        anchor: anchor.key.clone(),
                        matched: key,
                        score: self.matcher.score(&anchor.name, &name),
                    });
                }
            }

            debug!(pairs = pairs.len(), "accepted similarity pairs in chunk");
            merged_total += self.merge_edges(&pairs).await?;
        }

        info!(kind = %self.kind, merged = merged_total, "similarity edges written");
        Ok(merged_total)
    }

    /// Mark a chunk of anchors as processed, before any search runs.
    async fn mark_processed(&self, chunk: &[AnchorRecord]) -> Result<(), neo4rs::Error> {
        let label = self.kind.record_label();
        let key = self.kind.key_property();
        let keys: Vec<String> = chunk.iter().map(|a| a.key.clone()).collect();

        let q = query(&format!(
            "UNWIND $batch AS key
             MATCH (n:{label}) WHERE n.{key} = key
             SET n:RecordProcessed"
        ))
        .param("batch", keys);

        self.client.graph.run(q).await
    }

    /// Full-text candidates for one anchor, excluding the anchor itself and
    /// nodes already linked to it.
    async fn search_index(
        &self,
        anchor_key: &str,
        clause: &str,
    ) -> Result<Vec<(String, String)>, neo4rs::Error> {
        let label = self.kind.record_label();
        let key = self.kind.key_property();
        let name = self.kind.name_property();
        let index = self.kind.fulltext_index();

        let q = query(&format!(
            "MATCH (a:{label} {{{key}: $key}})
             CALL db.index.fulltext.queryNodes('{index}', $clause)
             YIELD node, score
             WHERE node <> a AND NOT EXISTS {{ (node)-[:IS_SIMILAR_TO]-(a) }}
             RETURN node.{key} AS key, node.{name} AS name"
        ))
        .param("key", anchor_key)
        .param("clause", clause);

        let mut hits = Vec::new();
        let mut stream = self.client.graph.execute(q).await?;
        while let Some(row) = stream.next().await? {
            let key: String = row.get("key").unwrap_or_default();
            let name: String = row.get("name").unwrap_or_default();
            if !key.is_empty() && !name.is_empty() {
                hits.push((key, name));
            }
        }
        Ok(hits)
    }

    /// Persist accepted pairs as edges. Organizations must share at least one
    /// address node or no edge is created.
    async fn merge_edges(&self, pairs: &[SimilarityPair]) -> Result<u64, neo4rs::Error> {
        if pairs.is_empty() {
            return Ok(0);
        }

        let label = self.kind.record_label();
        let key = self.kind.key_property();
        let address_gate = if self.kind.match_profile().require_shared_address {
            "MATCH (a)-[:HAS_ADDRESS]->(:Address)<-[:HAS_ADDRESS]-(m)
             WITH DISTINCT a, m, pair"
        } else {
            ""
        };

        // The existence check keeps re-runs from duplicating edges that are
        // already in the store, in either direction.
        let template = format!(
            "UNWIND $batch AS pair
             MATCH (a:{label} {{{key}: pair.anchor}})
             MATCH (m:{label} {{{key}: pair.matched}})
             WHERE a <> m AND NOT EXISTS {{ (a)-[:IS_SIMILAR_TO]-(m) }}
             {address_gate}
             MERGE (m)-[r:IS_SIMILAR_TO {{method: $method}}]->(a)
             ON CREATE SET r.score = pair.score
             RETURN count(r) AS merged"
        );

        let mut merged_total = 0u64;
        for chunk in pairs.chunks(self.batch_size) {
            let rows: Vec<neo4rs::BoltType> = chunk
                .iter()
                .map(|p| {
                    bolt_map([
                        ("anchor", bolt_string(&p.anchor)),
                        ("matched", bolt_string(&p.matched)),
                        ("score", bolt_float(p.score)),
                    ])
                })
                .collect();

            let q = query(&template)
                .param("batch", rows)
                .param("method", self.kind.similarity_method());

            let mut stream = self.client.graph.execute(q).await?;
            if let Some(row) = stream.next().await? {
                let merged: i64 = row.get("merged").unwrap_or(0);
                merged_total += merged as u64;
            }
        }

        Ok(merged_total)
    }
}
