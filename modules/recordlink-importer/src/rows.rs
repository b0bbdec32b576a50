//! CSV row deserialization for the Chicago source files.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::warn;

use recordlink_common::{OrganizationRow, PersonRecordRow};

/// Synthetic pk base for owner rows without a RECORD_ID column.
const OWNER_PK_BASE: usize = 3_000_000;

#[derive(Debug, Deserialize)]
pub struct OwnerCsvRow {
    #[serde(rename = "RECORD_ID", default)]
    pub record_id: Option<String>,
    #[serde(rename = "Owner First Name", default)]
    pub first_name: Option<String>,
    #[serde(rename = "Owner Middle Initial", default)]
    pub middle_name: Option<String>,
    #[serde(rename = "Owner Last Name", default)]
    pub last_name: Option<String>,
    #[serde(rename = "Account Number", default)]
    pub account_number: Option<String>,
    #[serde(rename = "Title", default)]
    pub title: Option<String>,
}

impl OwnerCsvRow {
    pub fn into_record(self, index: usize) -> PersonRecordRow {
        PersonRecordRow {
            pk: clean(self.record_id)
                .unwrap_or_else(|| (OWNER_PK_BASE + index).to_string()),
            first_name: clean(self.first_name),
            middle_name: clean(self.middle_name),
            last_name: clean(self.last_name),
            source: "OWNERS".to_string(),
            employer_id: clean(self.account_number),
            title: clean(self.title),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ContractCsvRow {
    #[serde(rename = "Vendor ID", default)]
    pub vendor_id: Option<String>,
    #[serde(rename = "Vendor Name", default)]
    pub vendor_name: Option<String>,
    #[serde(rename = "Address 1", default)]
    pub address: Option<String>,
    #[serde(rename = "City", default)]
    pub city: Option<String>,
    #[serde(rename = "State", default)]
    pub state: Option<String>,
    #[serde(rename = "Zip", default)]
    pub zip: Option<String>,
}

impl ContractCsvRow {
    /// Rows without a vendor id cannot be keyed and are skipped.
    pub fn into_organization(self) -> Option<OrganizationRow> {
        Some(OrganizationRow {
            id: clean(self.vendor_id)?,
            name: clean(self.vendor_name),
            source: "CONTRACTS".to_string(),
            address: clean(self.address),
            city: clean(self.city),
            state: clean(self.state),
            postal_code: clean(self.zip),
        })
    }
}

pub fn person_rows(path: &Path) -> Result<Vec<PersonRecordRow>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;

    let mut rows = Vec::new();
    for (index, result) in reader.deserialize::<OwnerCsvRow>().enumerate() {
        let raw = result.with_context(|| format!("bad row {} in {}", index + 1, path.display()))?;
        rows.push(raw.into_record(index));
    }
    Ok(rows)
}

pub fn organization_rows(path: &Path) -> Result<Vec<OrganizationRow>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;

    let mut rows = Vec::new();
    let mut skipped = 0usize;
    for (index, result) in reader.deserialize::<ContractCsvRow>().enumerate() {
        let raw = result.with_context(|| format!("bad row {} in {}", index + 1, path.display()))?;
        match raw.into_organization() {
            Some(org) => rows.push(org),
            None => skipped += 1,
        }
    }
    if skipped > 0 {
        warn!(skipped, "contract rows without a vendor id were skipped");
    }
    Ok(rows)
}

fn clean(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_owners(data: &str) -> Vec<PersonRecordRow> {
        csv::Reader::from_reader(data.as_bytes())
            .deserialize::<OwnerCsvRow>()
            .enumerate()
            .map(|(i, r)| r.expect("row parses").into_record(i))
            .collect()
    }

    #[test]
    fn owner_rows_get_synthetic_pks_when_missing() {
        let rows = parse_owners(
            "Owner First Name,Owner Middle Initial,Owner Last Name,Account Number,Title\n\
             Jon,,Smith,42,CEO\n\
             Amy,,Lee,,\n",
        );
        assert_eq!(rows[0].pk, "3000000");
        assert_eq!(rows[1].pk, "3000001");
        assert_eq!(rows[0].employer_id.as_deref(), Some("42"));
        assert_eq!(rows[1].employer_id, None);
        assert_eq!(rows[0].full_name().as_deref(), Some("Jon Smith"));
    }

    #[test]
    fn owner_rows_keep_source_assigned_ids() {
        let rows = parse_owners(
            "RECORD_ID,Owner First Name,Owner Last Name\n\
             77,Jon,Smith\n",
        );
        assert_eq!(rows[0].pk, "77");
        assert_eq!(rows[0].source, "OWNERS");
    }

    #[test]
    fn contract_rows_without_vendor_id_are_skipped() {
        let data = "Vendor ID,Vendor Name,Address 1,City,State,Zip\n\
                    V1,Acme Holdings Inc,12 Main St,Chicago,IL,60601\n\
                    ,No Vendor,1 Oak Ave,Chicago,IL,60602\n";
        let orgs: Vec<_> = csv::Reader::from_reader(data.as_bytes())
            .deserialize::<ContractCsvRow>()
            .filter_map(|r| r.expect("row parses").into_organization())
            .collect();
        assert_eq!(orgs.len(), 1);
        assert_eq!(orgs[0].id, "V1");
        assert_eq!(orgs[0].address.as_deref(), Some("12 Main St"));
    }
}
