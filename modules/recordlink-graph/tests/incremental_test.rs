#![cfg(feature = "test-utils")]

// Incremental resolution and rollback integration tests.
//
// A fully resolved baseline graph receives one new record under CDC; only
// the component the record joins may change, and the rollback path must
// restore the pre-batch state exactly.
//
// Requirements: Docker (for Neo4j via testcontainers)
//
// Run with: cargo test -p recordlink-graph --features test-utils --test incremental_test

use std::collections::HashSet;

use recordlink_common::{EntityKind, PersonRecordRow};
use recordlink_graph::{
    migrate, query, ChangeFeedWatcher, GraphClient, IncrementalResolver, RecordWriter,
    ResolutionPipeline, ResolveError,
};

async fn setup() -> (impl std::any::Any, GraphClient) {
    let (container, client) = recordlink_graph::testutil::neo4j_container().await;
    migrate::migrate(&client).await.expect("migration failed");
    (container, client)
}

fn person(pk: &str, first: &str, last: &str) -> PersonRecordRow {
    PersonRecordRow {
        pk: pk.to_string(),
        first_name: Some(first.to_string()),
        middle_name: None,
        last_name: Some(last.to_string()),
        source: "OWNERS".to_string(),
        employer_id: None,
        title: None,
    }
}

async fn string_val(client: &GraphClient, cypher: &str) -> String {
    let mut stream = client
        .inner()
        .execute(query(cypher))
        .await
        .expect("query failed");
    match stream.next().await.expect("stream failed") {
        Some(row) => row.get("val").unwrap_or_default(),
        None => String::new(),
    }
}

async fn count(client: &GraphClient, cypher: &str) -> i64 {
    let mut stream = client
        .inner()
        .execute(query(cypher))
        .await
        .expect("query failed");
    match stream.next().await.expect("stream failed") {
        Some(row) => row.get("cnt").unwrap_or(0),
        None => 0,
    }
}

async fn component_of(client: &GraphClient, pk: &str) -> String {
    string_val(
        client,
        &format!("MATCH (n:PersonRecord {{pk: '{pk}'}}) RETURN n.componentId AS val"),
    )
    .await
}

/// Resolve the 3-record baseline: {Jon Smith, Jonathan Smith} and {Amy Lee}.
async fn resolve_baseline(client: &GraphClient) {
    let writer = RecordWriter::new(client.clone());
    let records = vec![
        person("1", "Jon", "Smith"),
        person("2", "Jonathan", "Smith"),
        person("3", "Amy", "Lee"),
    ];
    writer
        .import_person_records(records, 3)
        .await
        .expect("import failed");
    ResolutionPipeline::new(client.clone(), EntityKind::Person)
        .run()
        .await
        .expect("baseline resolution failed");
}

/// Drive one batch of a single new record through the incremental phases.
async fn run_batch(client: &GraphClient, resolver: &mut IncrementalResolver, row: PersonRecordRow) {
    resolver.enable_cdc().await.expect("enable cdc failed");

    let writer = RecordWriter::new(client.clone());
    writer
        .import_person_records(vec![row], 1)
        .await
        .expect("batch import failed");
    resolver.records_imported().expect("phase transition failed");

    let events = resolver.catch_update().await.expect("catch failed");
    assert!(
        events.iter().any(|e| e.is_node_event()),
        "expected node events from the batch import"
    );
    resolver
        .process_new_records(&events)
        .await
        .expect("similarity for new records failed");

    let events = resolver.catch_update().await.expect("catch failed");
    resolver.mark_affected(&events).await.expect("marking failed");
    resolver
        .remove_stale_entities()
        .await
        .expect("stale removal failed");
    resolver.resolve_affected().await.expect("resolution failed");
    resolver.disable_cdc().await.expect("disable cdc failed");
}

#[tokio::test]
async fn incremental_run_rescopes_only_the_affected_component() {
    let (_c, client) = setup().await;
    resolve_baseline(&client).await;

    let smith_before = component_of(&client, "1").await;
    let amy_before = component_of(&client, "3").await;

    let watcher = ChangeFeedWatcher::new(client.clone(), "neo4j");
    let mut resolver = IncrementalResolver::new(client.clone(), watcher);
    run_batch(&client, &mut resolver, person("9000001", "Jon", "Smyth")).await;

    // Amy's component is untouched.
    assert_eq!(component_of(&client, "3").await, amy_before);

    // The Smiths and the new record share one fresh, epoch-scoped component.
    let jon = component_of(&client, "1").await;
    assert_eq!(component_of(&client, "2").await, jon);
    assert_eq!(component_of(&client, "9000001").await, jon);
    assert_ne!(jon, smith_before);
    assert!(jon.contains('_'), "expected an epoch-suffixed id, got {jon}");

    // Exactly one canonical entity for the merged cluster, holding all
    // three names.
    assert_eq!(
        count(
            &client,
            &format!("MATCH (p:Person {{clusterId: '{jon}'}}) RETURN count(p) AS cnt")
        )
        .await,
        1
    );
    assert_eq!(
        count(
            &client,
            &format!("MATCH (p:Person {{clusterId: '{jon}'}}) RETURN size(p.fullNames) AS cnt")
        )
        .await,
        3
    );

    // No Affected markers survive a successful run.
    assert_eq!(count(&client, "MATCH (n:Affected) RETURN count(n) AS cnt").await, 0);
}

#[tokio::test]
async fn rollback_restores_the_pre_batch_state() {
    let (_c, client) = setup().await;
    resolve_baseline(&client).await;

    let smith_before = component_of(&client, "1").await;
    let amy_before = component_of(&client, "3").await;
    let names_before = string_val(
        &client,
        "MATCH (:PersonRecord {pk: '1'})-[:RECORD_RESOLVED_TO]->(c:Person)
         RETURN c.name AS val",
    )
    .await;

    let watcher = ChangeFeedWatcher::new(client.clone(), "neo4j");
    let mut resolver = IncrementalResolver::new(client.clone(), watcher);
    run_batch(&client, &mut resolver, person("9000001", "Jon", "Smyth")).await;

    resolver.clean_updates().await.expect("rollback failed");

    // The simulated record is gone.
    assert_eq!(
        count(
            &client,
            "MATCH (n:PersonRecord {pk: '9000001'}) RETURN count(n) AS cnt"
        )
        .await,
        0
    );

    // Component ids are back to their snapshots.
    assert_eq!(component_of(&client, "1").await, smith_before);
    assert_eq!(component_of(&client, "2").await, smith_before);
    assert_eq!(component_of(&client, "3").await, amy_before);

    // The restored cluster's aggregates match the original membership.
    let mut stream = client
        .inner()
        .execute(query(
            "MATCH (:PersonRecord {pk: '1'})-[:RECORD_RESOLVED_TO]->(c:Person)
             RETURN c.fullNames AS names, c.clusterId AS cluster, c.name AS display",
        ))
        .await
        .expect("query failed");
    let row = stream
        .next()
        .await
        .expect("stream failed")
        .expect("restored cluster missing");
    let names: Vec<String> = row.get("names").unwrap_or_default();
    let cluster: String = row.get("cluster").unwrap_or_default();
    let display: String = row.get("display").unwrap_or_default();

    let names: HashSet<String> = names.into_iter().collect();
    let expected: HashSet<String> = ["Jon Smith".to_string(), "Jonathan Smith".to_string()]
        .into_iter()
        .collect();
    assert_eq!(names, expected);
    assert_eq!(cluster, smith_before);
    assert_eq!(display, names_before);

    // Two canonical entities again, no simulation markers left anywhere.
    assert_eq!(count(&client, "MATCH (p:Person) RETURN count(p) AS cnt").await, 2);
    assert_eq!(
        count(
            &client,
            "MATCH (p:Person) WHERE p.newCluster IS NOT NULL RETURN count(p) AS cnt"
        )
        .await,
        0
    );
    assert_eq!(
        count(
            &client,
            "MATCH (n:PersonRecord) WHERE n.oldComponentId IS NOT NULL RETURN count(n) AS cnt"
        )
        .await,
        0
    );
}

#[tokio::test]
async fn operations_out_of_phase_are_rejected() {
    let (_c, client) = setup().await;

    let watcher = ChangeFeedWatcher::new(client.clone(), "neo4j");
    let mut resolver = IncrementalResolver::new(client.clone(), watcher);

    // Import before CDC is enabled.
    let err = resolver.records_imported().unwrap_err();
    assert!(matches!(err, ResolveError::Phase { .. }));

    // Similarity before anything was imported.
    let err = resolver.process_new_records(&[]).await.unwrap_err();
    assert!(matches!(err, ResolveError::Phase { .. }));

    // Resolution before the affected set exists.
    let err = resolver.resolve_affected().await.unwrap_err();
    assert!(matches!(err, ResolveError::Phase { .. }));
}
