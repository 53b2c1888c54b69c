//! Advisory content scanning for regulated-marketing copy.
//!
//! Detection is case-insensitive substring matching against two curated word
//! lists. Results are recorded in logs by the send path but never block a
//! dispatch.

use serde::Serialize;

/// Word list a flagged term belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentList {
    HealthClaim,
    MinorAppealing,
}

/// One flagged phrase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContentIssue {
    pub list: ContentList,
    pub term: String,
}

/// Scan verdict. `approved` is simply "no issues found".
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContentScan {
    pub approved: bool,
    pub issues: Vec<ContentIssue>,
}

/// Phrases that read as medical or therapeutic claims.
const HEALTH_CLAIM_TERMS: &[&str] = &[
    "cure",
    "cures",
    "heal",
    "heals",
    "treat",
    "treats",
    "treatment",
    "therapeutic",
    "prescription",
    "fda approved",
    "medical benefit",
    "pain relief",
    "anxiety relief",
    "cancer",
];

/// Phrases that read as appealing to minors.
const MINOR_APPEALING_TERMS: &[&str] = &[
    "kid",
    "kids",
    "child",
    "children",
    "teen",
    "candy",
    "cartoon",
    "toy",
    "lollipop",
    "gummy bears",
];

/// Scan message copy against both word lists.
///
/// The `us_state` parameter reserves room for jurisdiction-specific lists; no
/// state currently adds any.
pub fn scan_content(text: &str, _us_state: Option<&str>) -> ContentScan {
    let lowered = text.to_lowercase();
    let mut issues = Vec::new();

    for (list, terms) in [
        (ContentList::HealthClaim, HEALTH_CLAIM_TERMS),
        (ContentList::MinorAppealing, MINOR_APPEALING_TERMS),
    ] {
        for term in terms {
            if lowered.contains(term) {
                issues.push(ContentIssue {
                    list,
                    term: (*term).to_string(),
                });
            }
        }
    }

    ContentScan {
        approved: issues.is_empty(),
        issues,
    }
}
