//! Record import boundary.
//!
//! The importer hands over a finite row iterator plus a total count; rows
//! land as record nodes through batched MERGE writes. Missing values travel
//! as "" and the templates coalesce them back to nulls, so data-quality gaps
//! never abort an import.

use neo4rs::BoltType;

use recordlink_common::{OrganizationRow, PersonRecordRow};

use crate::batch::{bolt_map, bolt_opt_string, bolt_string, BatchRunner};
use crate::GraphClient;

pub struct RecordWriter {
    batch: BatchRunner,
}

impl RecordWriter {
    pub fn new(client: GraphClient) -> Self {
        Self {
            batch: BatchRunner::new(client),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch = self.batch.with_batch_size(batch_size);
        self
    }

    /// MERGE person records by pk. Re-importing the same rows is a no-op
    /// apart from refreshed properties.
    pub async fn import_person_records<I>(&self, rows: I, total: usize) -> Result<usize, neo4rs::Error>
    where
        I: IntoIterator<Item = PersonRecordRow>,
    {
        let template = "UNWIND $batch AS item
            MERGE (n:PersonRecord {pk: item.pk})
            SET n.firstName = CASE WHEN item.firstName = '' THEN null ELSE item.firstName END,
                n.middleName = CASE WHEN item.middleName = '' THEN null ELSE item.middleName END,
                n.lastName = CASE WHEN item.lastName = '' THEN null ELSE item.lastName END,
                n.fullName = CASE WHEN item.fullName = '' THEN null ELSE item.fullName END,
                n.source = item.source,
                n.employerId = CASE WHEN item.employerId = '' THEN null ELSE item.employerId END,
                n.title = CASE WHEN item.title = '' THEN null ELSE item.title END";

        let rows = rows.into_iter().map(person_row);
        self.batch.store(template, rows, total).await
    }

    /// MERGE organizations with their address nodes and HAS_ADDRESS edges.
    /// The organization display name tracks the shortest name seen so far;
    /// unknown addresses collapse onto a shared "Unknown" node.
    pub async fn import_organizations<I>(&self, rows: I, total: usize) -> Result<usize, neo4rs::Error>
    where
        I: IntoIterator<Item = OrganizationRow>,
    {
        let template = "UNWIND $batch AS item
            MERGE (o:Organization {id: item.id})
            SET o.source = item.source,
                o.names = CASE WHEN item.name = '' OR item.name IN coalesce(o.names, [])
                               THEN coalesce(o.names, [])
                               ELSE coalesce(o.names, []) + item.name END
            WITH o, item
            SET o.name = CASE WHEN size(coalesce(o.names, [])) = 0 THEN 'Unknown'
                              ELSE reduce(shortest = head(o.names), name IN o.names |
                                  CASE WHEN size(name) < size(shortest) THEN name ELSE shortest END)
                         END
            MERGE (a:Address {id: CASE WHEN item.address = '' THEN 'Unknown' ELSE item.address END})
            SET a.addressCity = CASE WHEN item.city = '' THEN null ELSE item.city END,
                a.addressState = CASE WHEN item.state = '' THEN null ELSE item.state END,
                a.addressPostalCode = CASE WHEN item.postalCode = '' THEN null ELSE item.postalCode END
            MERGE (o)-[r:HAS_ADDRESS]->(a)
            SET r.source = item.source";

        let rows = rows.into_iter().map(organization_row);
        self.batch.store(template, rows, total).await
    }
}

fn person_row(row: PersonRecordRow) -> BoltType {
    let full_name = row.full_name();
    bolt_map([
        ("pk", bolt_string(&row.pk)),
        ("firstName", bolt_opt_string(row.first_name.as_deref())),
        ("middleName", bolt_opt_string(row.middle_name.as_deref())),
        ("lastName", bolt_opt_string(row.last_name.as_deref())),
        ("fullName", bolt_opt_string(full_name.as_deref())),
        ("source", bolt_string(&row.source)),
        ("employerId", bolt_opt_string(row.employer_id.as_deref())),
        ("title", bolt_opt_string(row.title.as_deref())),
    ])
}

fn organization_row(row: OrganizationRow) -> BoltType {
    bolt_map([
        ("id", bolt_string(&row.id)),
        ("name", bolt_opt_string(row.name.as_deref())),
        ("source", bolt_string(&row.source)),
        ("address", bolt_opt_string(row.address.as_deref())),
        ("city", bolt_opt_string(row.city.as_deref())),
        ("state", bolt_opt_string(row.state.as_deref())),
        ("postalCode", bolt_opt_string(row.postal_code.as_deref())),
    ])
}
