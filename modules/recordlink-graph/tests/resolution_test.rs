#![cfg(feature = "test-utils")]

// End-to-end record-linkage integration tests.
//
// These tests verify that imported records flow through candidate
// generation, clustering, and materialization into the expected canonical
// entities.
//
// Requirements: Docker (for Neo4j via testcontainers)
//
// Run with: cargo test -p recordlink-graph --features test-utils --test resolution_test

use recordlink_common::{EntityKind, OrganizationRow, PersonRecordRow};
use recordlink_graph::{
    migrate, query, CandidateGenerator, ClusteringEngine, ClusterMaterializer, GraphClient,
    RecordWriter, ResolutionPipeline,
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

fn org(id: &str, name: &str, address: &str) -> OrganizationRow {
    OrganizationRow {
        id: id.to_string(),
        name: Some(name.to_string()),
        source: "CONTRACTS".to_string(),
        address: Some(address.to_string()),
        city: Some("Chicago".to_string()),
        state: Some("IL".to_string()),
        postal_code: None,
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

async fn import_baseline_people(client: &GraphClient) {
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
}

#[tokio::test]
async fn resolves_similar_people_into_two_clusters() {
    let (_c, client) = setup().await;
    import_baseline_people(&client).await;

    let pipeline = ResolutionPipeline::new(client.clone(), EntityKind::Person);
    let stats = pipeline.run().await.expect("pipeline failed");

    // Exactly one accepted pair: the two Smiths.
    assert_eq!(stats.similarity_edges, 1);
    assert_eq!(
        count(&client, "MATCH ()-[r:IS_SIMILAR_TO]->() RETURN count(r) AS cnt").await,
        1
    );

    // Two canonical entities: {Jon Smith, Jonathan Smith} and {Amy Lee}.
    assert_eq!(count(&client, "MATCH (p:Person) RETURN count(p) AS cnt").await, 2);

    // The merged cluster picks the shortest member name.
    let smith_name = string_val(
        &client,
        "MATCH (:PersonRecord {pk: '1'})-[:RECORD_RESOLVED_TO]->(c:Person) RETURN c.name AS val",
    )
    .await;
    assert_eq!(smith_name, "Jon Smith");

    // Amy resolves alone.
    let amy_members = count(
        &client,
        "MATCH (:PersonRecord {pk: '3'})-[:RECORD_RESOLVED_TO]->(:Person)<-[:RECORD_RESOLVED_TO]-(x)
         RETURN count(DISTINCT x) AS cnt",
    )
    .await;
    assert_eq!(amy_members, 1);
}

#[tokio::test]
async fn records_share_a_component_iff_connected() {
    let (_c, client) = setup().await;
    import_baseline_people(&client).await;

    ResolutionPipeline::new(client.clone(), EntityKind::Person)
        .run()
        .await
        .expect("pipeline failed");

    let jon = string_val(
        &client,
        "MATCH (n:PersonRecord {pk: '1'}) RETURN n.componentId AS val",
    )
    .await;
    let jonathan = string_val(
        &client,
        "MATCH (n:PersonRecord {pk: '2'}) RETURN n.componentId AS val",
    )
    .await;
    let amy = string_val(
        &client,
        "MATCH (n:PersonRecord {pk: '3'}) RETURN n.componentId AS val",
    )
    .await;

    assert!(!jon.is_empty());
    assert_eq!(jon, jonathan);
    assert_ne!(jon, amy);

    // The shared component is backed by an actual similarity path.
    let connected = count(
        &client,
        "MATCH (:PersonRecord {pk: '1'})-[:IS_SIMILAR_TO*1..]-(m:PersonRecord {pk: '2'})
         RETURN count(m) AS cnt",
    )
    .await;
    assert!(connected > 0);
}

#[tokio::test]
async fn regenerating_similarity_is_idempotent() {
    let (_c, client) = setup().await;
    import_baseline_people(&client).await;

    let generator = CandidateGenerator::new(client.clone(), EntityKind::Person);
    let first = generator
        .build_similarity_edges(None)
        .await
        .expect("first run failed");
    assert_eq!(first, 1);

    // All records anchored a search already; a second pass rescans nothing
    // and the edge set is unchanged.
    let second = generator
        .build_similarity_edges(None)
        .await
        .expect("second run failed");
    assert_eq!(second, 0);
    assert_eq!(
        count(&client, "MATCH ()-[r:IS_SIMILAR_TO]->() RETURN count(r) AS cnt").await,
        1
    );
}

#[tokio::test]
async fn rematerializing_does_not_double_count_attributes() {
    let (_c, client) = setup().await;
    import_baseline_people(&client).await;

    ResolutionPipeline::new(client.clone(), EntityKind::Person)
        .run()
        .await
        .expect("pipeline failed");

    let materializer = ClusterMaterializer::new(client.clone(), EntityKind::Person);
    materializer.materialize().await.expect("rerun failed");

    let names = count(
        &client,
        "MATCH (:PersonRecord {pk: '1'})-[:RECORD_RESOLVED_TO]->(c:Person)
         RETURN size(c.fullNames) AS cnt",
    )
    .await;
    assert_eq!(names, 2);
}

#[tokio::test]
async fn organization_links_require_a_shared_address() {
    let (_c, client) = setup().await;
    let writer = RecordWriter::new(client.clone());
    let orgs = vec![
        org("V1", "Acme Holdings Inc", "12 Main St"),
        org("V2", "Acme Holdings LLC", "12 Main St"),
        org("V3", "Acme Holdings Corp", "500 Oak Ave"),
    ];
    writer.import_organizations(orgs, 3).await.expect("import failed");

    ResolutionPipeline::new(client.clone(), EntityKind::Organization)
        .run()
        .await
        .expect("pipeline failed");

    // V3 has the same cleaned name but no shared address: no edge for it.
    assert_eq!(
        count(&client, "MATCH ()-[r:IS_SIMILAR_TO]->() RETURN count(r) AS cnt").await,
        1
    );

    let v1 = string_val(
        &client,
        "MATCH (n:Organization {id: 'V1'}) RETURN n.componentId AS val",
    )
    .await;
    let v2 = string_val(
        &client,
        "MATCH (n:Organization {id: 'V2'}) RETURN n.componentId AS val",
    )
    .await;
    let v3 = string_val(
        &client,
        "MATCH (n:Organization {id: 'V3'}) RETURN n.componentId AS val",
    )
    .await;
    assert_eq!(v1, v2);
    assert_ne!(v1, v3);

    assert_eq!(
        count(&client, "MATCH (g:OrganizationGroup) RETURN count(g) AS cnt").await,
        2
    );
}

#[tokio::test]
async fn stale_projection_is_detected_and_cleared() {
    let (_c, client) = setup().await;
    import_baseline_people(&client).await;

    let engine = ClusteringEngine::new(client.clone(), EntityKind::Person);
    engine
        .project("personComponents", "PersonRecord")
        .await
        .expect("projection failed");

    // A crash between projection and algorithm leaves this behind; the next
    // run must detect and drop it before re-projecting.
    assert!(engine
        .drop_projection_if_exists("personComponents")
        .await
        .expect("exists check failed"));
    assert!(!engine
        .drop_projection_if_exists("personComponents")
        .await
        .expect("exists check failed"));

    engine
        .project("personComponents", "PersonRecord")
        .await
        .expect("re-projection failed");
    engine
        .drop_projection("personComponents")
        .await
        .expect("drop failed");
}
