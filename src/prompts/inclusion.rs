//! Inclusion screening: is the paper about FM/LLM agents, in a software
//! engineering context, written in English?
//!
//! One prompt per paper; the model answers one `<marker>: Yes/No` line per criterion.

use crate::task::{Criterion, Query, ScreeningTask};
use crate::verdict::{AggregationPolicy, ParserKind};

/// User prompt template
/// Placeholders: {title}, {abstract}, {keywords}
pub const USER_PROMPT_TEMPLATE: &str = r#"You are a research assistant conducting a systematic literature review (SLR).
Your task is to strictly evaluate the following paper based on its Title, Abstract, and Keywords.

Evaluate the paper against these three criteria:

1.  **FM/LLM Agent Focus**: Does the article explicitly claim that its core subject is the use of a Foundation Model (FM) or Large Language Model (LLM) based agent? A brief mention is not enough. The agent must be central to the paper's contribution.
2.  **Software Engineering Context**: Does the study involve a Software Engineering (SE) task or discuss software/system architecture? SE tasks include requirements, design, coding, testing, maintenance, etc.
3.  **Language**: Is the article written in English?

Your evaluation must be strict. If you are uncertain about any criterion based on the provided text, answer 'No'.

**Paper Details:**
- **Title**: {title}
- **Abstract**: {abstract}
- **Keywords**: {keywords}

**Your Response:**
Respond ONLY in the following format, without any explanations or introductory text:
FM/LLM: <Yes/No>
SE: <Yes/No>
English: <Yes/No>"#;

fn line_criterion(id: &str, marker: &str, column: &str) -> Criterion {
    Criterion {
        id: id.to_string(),
        verdict_column: column.to_string(),
        comment_column: None,
        marker: Some(marker.to_string()),
        include_token: "Yes".to_string(),
        exclude_token: "No".to_string(),
    }
}

pub fn task() -> ScreeningTask {
    ScreeningTask {
        name: "inclusion".to_string(),
        queries: vec![Query {
            system_prompt: None,
            template: USER_PROMPT_TEMPLATE.to_string(),
            criteria: vec![
                line_criterion("fm_llm", "FM/LLM", "fm_llm"),
                line_criterion("se", "SE", "se_related"),
                line_criterion("english", "English", "english"),
            ],
            json_mode: false,
            require_nonempty: vec![],
            response_column: Some("gpt_screening_result".to_string()),
        }],
        parser: ParserKind::Keyword,
        policy: AggregationPolicy::AllInclude,
        decision_column: "included_by_gpt".to_string(),
        required_columns: vec!["title".to_string()],
    }
}
