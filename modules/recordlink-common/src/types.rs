use serde::{Deserialize, Serialize};

use crate::matching::{title_case, MatchProfile};

/// Which of the two record-linkage pipelines a component operates on.
/// Everything label- or property-shaped that differs between the person and
/// organization paths hangs off this enum, so the pipeline code itself stays
/// generic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Person,
    Organization,
}

impl EntityKind {
    /// Label of the raw record nodes.
    pub fn record_label(self) -> &'static str {
        match self {
            EntityKind::Person => "PersonRecord",
            EntityKind::Organization => "Organization",
        }
    }

    /// Property holding the stable source-assigned key.
    pub fn key_property(self) -> &'static str {
        match self {
            EntityKind::Person => "pk",
            EntityKind::Organization => "id",
        }
    }

    /// Property holding the display name used for matching.
    pub fn name_property(self) -> &'static str {
        match self {
            EntityKind::Person => "fullName",
            EntityKind::Organization => "name",
        }
    }

    /// Full-text index over the name property.
    pub fn fulltext_index(self) -> &'static str {
        match self {
            EntityKind::Person => "person_record_fullName",
            EntityKind::Organization => "organization_name",
        }
    }

    /// Label of the canonical (cluster) nodes.
    pub fn cluster_label(self) -> &'static str {
        match self {
            EntityKind::Person => "Person",
            EntityKind::Organization => "OrganizationGroup",
        }
    }

    /// Relationship from record to its canonical node.
    pub fn resolved_rel(self) -> &'static str {
        match self {
            EntityKind::Person => "RECORD_RESOLVED_TO",
            EntityKind::Organization => "BELONGS_TO_ORG_GROUP",
        }
    }

    /// List property on the canonical node accumulating member names.
    pub fn names_property(self) -> &'static str {
        match self {
            EntityKind::Person => "fullNames",
            EntityKind::Organization => "names",
        }
    }

    /// Method tag written on similarity edges.
    pub fn similarity_method(self) -> &'static str {
        match self {
            EntityKind::Person => "SIMILAR_NAME",
            EntityKind::Organization => "SIMILAR_NAME+SAME_ADDRESS",
        }
    }

    /// Name of the GDS projection used for component computation.
    pub fn projection_name(self) -> &'static str {
        match self {
            EntityKind::Person => "personComponents",
            EntityKind::Organization => "organizationComponents",
        }
    }

    pub fn match_profile(self) -> MatchProfile {
        match self {
            EntityKind::Person => MatchProfile::person(),
            EntityKind::Organization => MatchProfile::organization(),
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKind::Person => write!(f, "person"),
            EntityKind::Organization => write!(f, "organization"),
        }
    }
}

// --- Import rows ---

/// One raw person observation, as supplied by the importer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonRecordRow {
    pub pk: String,
    pub first_name: Option<String>,
    pub middle_name: Option<String>,
    pub last_name: Option<String>,
    pub source: String,
    pub employer_id: Option<String>,
    pub title: Option<String>,
}

impl PersonRecordRow {
    /// Assemble the display name from the name parts: whitespace collapsed,
    /// capitalized per word. None when all parts are blank.
    pub fn full_name(&self) -> Option<String> {
        let joined = [&self.first_name, &self.middle_name, &self.last_name]
            .iter()
            .filter_map(|part| part.as_deref())
            .collect::<Vec<_>>()
            .join(" ");
        let name = title_case(&joined);
        if name.is_empty() {
            None
        } else {
            Some(name)
        }
    }
}

/// One raw organization observation with its mailing address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganizationRow {
    pub id: String,
    pub name: Option<String>,
    pub source: String,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
}

// --- Change feed ---

/// Operation kind of a change-data-capture event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOp {
    Create,
    Update,
    Delete,
}

impl ChangeOp {
    /// Parse the single-letter operation code the feed emits.
    pub fn parse(code: &str) -> Option<Self> {
        match code {
            "c" => Some(ChangeOp::Create),
            "u" => Some(ChangeOp::Update),
            "d" => Some(ChangeOp::Delete),
            _ => None,
        }
    }
}

/// One committed mutation observed on the change feed. Consumed once,
/// never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub tx_id: i64,
    pub seq: i64,
    pub op: ChangeOp,
    /// "n" for node events, "r" for relationship events.
    pub event_type: String,
    /// Element id of the changed node or relationship.
    pub element_id: Option<String>,
    /// Start node element id, for relationship events.
    pub start_element_id: Option<String>,
    /// End node element id, for relationship events.
    pub end_element_id: Option<String>,
    pub commit_time: Option<String>,
}

impl ChangeEvent {
    pub fn is_node_event(&self) -> bool {
        self.event_type == "n"
    }

    pub fn is_relationship_event(&self) -> bool {
        self.event_type == "r"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_name_collapses_and_capitalizes() {
        let row = PersonRecordRow {
            pk: "1".into(),
            first_name: Some("jON".into()),
            middle_name: None,
            last_name: Some("SMITH".into()),
            source: "OWNERS".into(),
            employer_id: None,
            title: None,
        };
        assert_eq!(row.full_name().as_deref(), Some("Jon Smith"));
    }

    #[test]
    fn full_name_of_blank_parts_is_none() {
        let row = PersonRecordRow {
            pk: "2".into(),
            first_name: Some("   ".into()),
            middle_name: None,
            last_name: None,
            source: "OWNERS".into(),
            employer_id: None,
            title: None,
        };
        assert_eq!(row.full_name(), None);
    }

    #[test]
    fn change_op_parses_feed_codes() {
        assert_eq!(ChangeOp::parse("c"), Some(ChangeOp::Create));
        assert_eq!(ChangeOp::parse("u"), Some(ChangeOp::Update));
        assert_eq!(ChangeOp::parse("d"), Some(ChangeOp::Delete));
        assert_eq!(ChangeOp::parse("x"), None);
    }
}
