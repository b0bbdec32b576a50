//! Name normalization and fuzzy matching for record linkage.
//!
//! All text processing happens client-side: names are cleaned and scored
//! here, and the store is only asked for full-text candidate retrieval.

use strsim::sorensen_dice;

/// Organizational suffixes, stop-words, and Lucene keywords dropped during
/// cleaning. Compared after punctuation is stripped, so "s.a." matches "sa".
const ORG_STOP_WORDS: &[&str] = &[
    "co", "ltd", "inc", "corp", "llc", "llp", "pvt", "gmbh", "sa", "sl", "and", "not",
];

/// Tokens shorter than this never make it into a full-text query.
const MIN_TOKEN_LEN: usize = 3;

/// Per-kind matching knobs. Person and organization matching use different
/// tolerances and thresholds; both are carried as plain values rather than
/// unified.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchProfile {
    /// Per-token edit-distance ratio for the Lucene fuzzy clause.
    pub fuzzy_tolerance: f64,
    /// Acceptance threshold for the Dice coefficient. Strictly greater-than.
    pub similarity_threshold: f64,
    /// Require the two records to share at least one Address node.
    pub require_shared_address: bool,
}

impl MatchProfile {
    pub fn person() -> Self {
        Self {
            fuzzy_tolerance: 0.65,
            similarity_threshold: 0.695,
            require_shared_address: false,
        }
    }

    pub fn organization() -> Self {
        Self {
            fuzzy_tolerance: 0.3,
            similarity_threshold: 0.3,
            require_shared_address: true,
        }
    }
}

/// Lowercase a name, drop punctuation and organizational stop-words,
/// and collapse whitespace. Returns "" when nothing survives.
pub fn clean_name(name: &str) -> String {
    name.to_lowercase()
        .split_whitespace()
        .filter_map(|tok| {
            let bare: String = tok.chars().filter(|c| c.is_ascii_alphanumeric()).collect();
            if bare.is_empty() || ORG_STOP_WORDS.contains(&bare.as_str()) {
                None
            } else {
                Some(bare)
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Tokens of the cleaned name usable as full-text query terms.
/// Tokens shorter than three characters are dropped; an empty result means
/// the record cannot be matched at all.
pub fn query_tokens(name: &str) -> Vec<String> {
    clean_name(name)
        .split_whitespace()
        .filter(|t| t.len() >= MIN_TOKEN_LEN)
        .map(|t| t.to_string())
        .collect()
}

/// Capitalize the first letter of each word, lowercasing the rest.
pub fn title_case(name: &str) -> String {
    name.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => {
                    first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Scores name pairs against a profile. Never fails: names that clean down
/// to nothing simply score as not-similar.
#[derive(Debug, Clone, Copy)]
pub struct NameMatcher {
    profile: MatchProfile,
}

impl NameMatcher {
    pub fn new(profile: MatchProfile) -> Self {
        Self { profile }
    }

    pub fn profile(&self) -> MatchProfile {
        self.profile
    }

    /// Sørensen–Dice bigram coefficient over the cleaned names, in [0, 1].
    pub fn score(&self, left: &str, right: &str) -> f64 {
        sorensen_dice(&clean_name(left), &clean_name(right))
    }

    /// Whether the pair clears the profile threshold. Strict greater-than:
    /// a score exactly at the threshold is rejected. Names with no valid
    /// tokens are never similar.
    pub fn accepts(&self, left: &str, right: &str) -> bool {
        if query_tokens(left).is_empty() || query_tokens(right).is_empty() {
            return false;
        }
        self.score(left, right) > self.profile.similarity_threshold
    }

    /// Lucene clause for `db.index.fulltext.queryNodes`: every token made
    /// fuzzy with the profile tolerance, OR-joined. Retrieval is a recall
    /// prefilter; the Dice threshold is the only acceptance decision.
    /// None when the name has no usable tokens.
    pub fn fulltext_clause(&self, name: &str) -> Option<String> {
        let tokens = query_tokens(name);
        if tokens.is_empty() {
            return None;
        }
        let clause = tokens
            .iter()
            .map(|t| format!("{t}~{}", self.profile.fuzzy_tolerance))
            .collect::<Vec<_>>()
            .join(" OR ");
        Some(clause)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_name_strips_suffixes_and_punctuation() {
        assert_eq!(clean_name("Acme Holdings, Inc."), "acme holdings");
        assert_eq!(clean_name("Smith & Sons Co"), "smith sons");
        assert_eq!(clean_name("Brick S.A."), "brick");
        assert_eq!(clean_name("  Jon   Smith "), "jon smith");
    }

    #[test]
    fn clean_name_can_empty_out() {
        assert_eq!(clean_name("Inc. & Co"), "");
        assert_eq!(clean_name("???"), "");
    }

    #[test]
    fn query_tokens_drop_short_tokens() {
        assert_eq!(query_tokens("James T. Kirk"), vec!["james", "kirk"]);
        assert!(query_tokens("A B C").is_empty());
    }

    #[test]
    fn similar_person_names_clear_the_person_threshold() {
        let matcher = NameMatcher::new(MatchProfile::person());
        assert!(matcher.accepts("Jon Smith", "Jonathan Smith"));
        assert!(matcher.accepts("John Smith", "Jon Smith"));
    }

    #[test]
    fn unrelated_person_names_score_near_zero() {
        let matcher = NameMatcher::new(MatchProfile::person());
        let score = matcher.score("John Smith", "Robert Jones");
        assert!(score < 0.2, "score was {score}");
        assert!(!matcher.accepts("John Smith", "Robert Jones"));
    }

    #[test]
    fn threshold_is_strictly_greater_than() {
        let matcher = NameMatcher::new(MatchProfile::person());
        let score = matcher.score("Jon Smith", "Jonathan Smith");

        // A threshold exactly at the pair's score must exclude the pair.
        let at = NameMatcher::new(MatchProfile {
            similarity_threshold: score,
            ..MatchProfile::person()
        });
        assert!(!at.accepts("Jon Smith", "Jonathan Smith"));

        let below = NameMatcher::new(MatchProfile {
            similarity_threshold: score - 1e-9,
            ..MatchProfile::person()
        });
        assert!(below.accepts("Jon Smith", "Jonathan Smith"));
    }

    #[test]
    fn empty_normalization_is_not_similar_not_an_error() {
        let matcher = NameMatcher::new(MatchProfile::organization());
        assert!(!matcher.accepts("Inc.", "Inc."));
        assert!(!matcher.accepts("", "Acme Holdings"));
    }

    #[test]
    fn fulltext_clause_joins_fuzzy_tokens() {
        let matcher = NameMatcher::new(MatchProfile::person());
        assert_eq!(
            matcher.fulltext_clause("Jon Smith").as_deref(),
            Some("jon~0.65 OR smith~0.65")
        );
        assert_eq!(matcher.fulltext_clause("? !"), None);

        let orgs = NameMatcher::new(MatchProfile::organization());
        assert_eq!(
            orgs.fulltext_clause("Acme Holdings, Inc.").as_deref(),
            Some("acme~0.3 OR holdings~0.3")
        );
    }

    #[test]
    fn title_case_rebuilds_display_names() {
        assert_eq!(title_case("jON  smith"), "Jon Smith");
        assert_eq!(title_case(""), "");
    }
}
