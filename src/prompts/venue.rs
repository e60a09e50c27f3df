//! Venue screening: one bare Yes/No question per criterion, asked from the
//! bibliographic metadata only (entry type, publisher, venue, series, note).

use crate::task::{Criterion, Query, ScreeningTask};
use crate::verdict::{AggregationPolicy, ParserKind};

/// System prompt shared by the three venue questions
pub const SYSTEM_PROMPT: &str = "You are a helpful research assistant. Your task is to answer classification questions with only 'Yes' or 'No'.";

/// Placeholders: {ENTRYTYPE}, {title}, {isbn}, {publisher}
pub const PRIMARY_SOURCE_TEMPLATE: &str = r#"Is the following a primary research source (like a peer-reviewed journal article or conference paper)? Exclude books, theses (PhD/Master's), and editorials.
- Entry Type: "{ENTRYTYPE}"
- Title: "{title}"
- ISBN: "{isbn}"
- Publisher: "{publisher}"
Answer with only 'Yes' or 'No'."#;

/// Placeholders: {source}, {booktitle}, {series}
pub const VENUE_TYPE_TEMPLATE: &str = r#"Is the publication venue a main conference or journal? Exclude venues that are clearly a workshop, symposium, doctoral consortium, or companion proceeding.
- Source/Journal: "{source}"
- Book Title: "{booktitle}"
- Series: "{series}"
Answer with only 'Yes' or 'No'."#;

/// Placeholders: {ENTRYTYPE}, {note}, {publisher}
pub const PEER_REVIEWED_TEMPLATE: &str = r#"Is this a formal, peer-reviewed publication? Exclude non-refereed grey literature like technical reports or preprints from servers like arXiv.
- Entry Type: "{ENTRYTYPE}"
- Note: "{note}"
- Publisher: "{publisher}"
Answer with only 'Yes' or 'No'."#;

fn yes_no_query(id: &str, column: &str, template: &str) -> Query {
    Query {
        system_prompt: Some(SYSTEM_PROMPT.to_string()),
        template: template.to_string(),
        criteria: vec![Criterion {
            id: id.to_string(),
            verdict_column: column.to_string(),
            comment_column: None,
            marker: None,
            include_token: "Yes".to_string(),
            exclude_token: "No".to_string(),
        }],
        json_mode: false,
        require_nonempty: vec![],
        response_column: None,
    }
}

pub fn task() -> ScreeningTask {
    ScreeningTask {
        name: "venue".to_string(),
        queries: vec![
            yes_no_query("c3", "AI_C3_PrimarySource", PRIMARY_SOURCE_TEMPLATE),
            yes_no_query("c4", "AI_C4_VenueType", VENUE_TYPE_TEMPLATE),
            yes_no_query("c5", "AI_C5_GreyLiterature", PEER_REVIEWED_TEMPLATE),
        ],
        parser: ParserKind::Keyword,
        policy: AggregationPolicy::AllInclude,
        decision_column: "Included_AI_Final".to_string(),
        required_columns: vec!["title".to_string()],
    }
}
