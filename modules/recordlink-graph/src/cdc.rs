//! Change-data-capture watcher.
//!
//! Wraps the store's `db.cdc.*` procedures: checkpoint-based change queries
//! for the incremental pipeline and a cursor-owning polling loop for the
//! long-lived daemon. The watcher shares no state with the pipeline beyond
//! the cursor it owns.

use std::time::Duration;

use chrono::{DateTime, Utc};
use neo4rs::{query, BoltType, Row};
use tracing::info;

use recordlink_common::{ChangeEvent, ChangeOp};

use crate::GraphClient;

/// Fixed interval for the polling loop.
pub const POLL_INTERVAL: Duration = Duration::from_secs(5);

pub struct ChangeFeedWatcher {
    client: GraphClient,
    database: String,
    cursor: Option<String>,
    selectors: Vec<BoltType>,
}

impl ChangeFeedWatcher {
    pub fn new(client: GraphClient, database: &str) -> Self {
        Self {
            client,
            database: database.to_string(),
            cursor: None,
            selectors: Vec::new(),
        }
    }

    /// Selector maps are passed through to `db.cdc.query` unchanged.
    pub fn with_selectors(mut self, selectors: Vec<BoltType>) -> Self {
        self.selectors = selectors;
        self
    }

    /// Turn transaction log enrichment on for the watched database.
    pub async fn enable(&self) -> Result<(), neo4rs::Error> {
        let q = query(&format!(
            "ALTER DATABASE {} SET OPTION txLogEnrichment 'FULL'",
            self.database
        ));
        self.client.graph.run_on("system", q).await
    }

    pub async fn disable(&self) -> Result<(), neo4rs::Error> {
        let q = query(&format!(
            "ALTER DATABASE {} SET OPTION txLogEnrichment 'OFF'",
            self.database
        ));
        self.client.graph.run_on("system", q).await
    }

    pub async fn earliest_change_id(&self) -> Result<String, neo4rs::Error> {
        self.change_id("CALL db.cdc.earliest").await
    }

    pub async fn current_change_id(&self) -> Result<String, neo4rs::Error> {
        self.change_id("CALL db.cdc.current").await
    }

    async fn change_id(&self, cypher: &str) -> Result<String, neo4rs::Error> {
        let mut stream = self.client.graph.execute(query(cypher)).await?;
        if let Some(row) = stream.next().await? {
            return Ok(row.get("id").unwrap_or_default());
        }
        Ok(String::new())
    }

    /// All events committed strictly after the checkpoint, newest first.
    /// An empty feed is an empty list, not an error. The comparison is
    /// strict: events committed exactly at the checkpoint are skipped.
    pub async fn changes_since(
        &self,
        checkpoint: DateTime<Utc>,
    ) -> Result<Vec<ChangeEvent>, neo4rs::Error> {
        let q = query(
            "CALL db.cdc.earliest() YIELD id AS earliestId
             CALL db.cdc.query(earliestId) YIELD txId, seq, event, metadata
             WHERE datetime($checkpoint) < datetime(metadata.txCommitTime)
             RETURN txId, seq,
                    event.operation AS operation,
                    event.eventType AS eventType,
                    event.elementId AS elementId,
                    event.start.elementId AS startElementId,
                    event.end.elementId AS endElementId,
                    toString(metadata.txCommitTime) AS commitTime
             ORDER BY metadata.txCommitTime DESC",
        )
        .param("checkpoint", checkpoint.to_rfc3339());

        self.collect_events(q).await
    }

    /// Query events since the owned cursor, then advance it to "current":
    /// at most one delivery per poll window.
    pub async fn poll_once(&mut self) -> Result<Vec<ChangeEvent>, neo4rs::Error> {
        let cursor = match &self.cursor {
            Some(c) => c.clone(),
            None => self.current_change_id().await?,
        };

        let q = query(
            "CALL db.cdc.query($cursor, $selectors) YIELD txId, seq, event, metadata
             RETURN txId, seq,
                    event.operation AS operation,
                    event.eventType AS eventType,
                    event.elementId AS elementId,
                    event.start.elementId AS startElementId,
                    event.end.elementId AS endElementId,
                    toString(metadata.txCommitTime) AS commitTime",
        )
        .param("cursor", cursor)
        .param("selectors", self.selectors.clone());

        let events = self.collect_events(q).await?;
        self.cursor = Some(self.current_change_id().await?);
        Ok(events)
    }

    /// Long-lived polling loop.
    pub async fn run(&mut self, interval: Duration) -> Result<(), neo4rs::Error> {
        info!("Waiting for changes...");
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let events = self.poll_once().await?;
            if !events.is_empty() {
                info!(events = events.len(), "change events observed");
            }
        }
    }

    async fn collect_events(&self, q: neo4rs::Query) -> Result<Vec<ChangeEvent>, neo4rs::Error> {
        let mut events = Vec::new();
        let mut stream = self.client.graph.execute(q).await?;
        while let Some(row) = stream.next().await? {
            if let Some(event) = event_from_row(&row) {
                events.push(event);
            }
        }
        Ok(events)
    }
}

fn event_from_row(row: &Row) -> Option<ChangeEvent> {
    let code: String = row.get("operation").unwrap_or_default();
    let op = ChangeOp::parse(&code)?;
    Some(ChangeEvent {
        tx_id: row.get("txId").unwrap_or(0),
        seq: row.get("seq").unwrap_or(0),
        op,
        event_type: row.get("eventType").unwrap_or_default(),
        element_id: row.get("elementId").ok(),
        start_element_id: row.get("startElementId").ok(),
        end_element_id: row.get("endElementId").ok(),
        commit_time: row.get("commitTime").ok(),
    })
}
