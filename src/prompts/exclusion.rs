//! Exclusion screening for EC7/EC8 with structured JSON answers.

use crate::task::{Criterion, Query, ScreeningTask};
use crate::verdict::{AggregationPolicy, ParserKind};

/// System prompt for JSON mode
pub const SYSTEM_PROMPT: &str =
    "You are a helpful research assistant that always responds in JSON format.";

/// User prompt template
/// Placeholders: {title}, {abstract}
pub const USER_PROMPT_TEMPLATE: &str = r#"You are a meticulous senior researcher conducting a Systematic Literature Review (SLR) in Software Engineering. Your task is to analyze a research paper based on its title and abstract and decide if it should be excluded according to two specific criteria.

**Research Paper Details:**
- **Title:** "{title}"
- **Abstract:** "{abstract}"

**Exclusion Criteria:**
1.  **EC7:** The article mentions the use of FM-based agents without describing the employed techniques or architecture. (Does the paper seem to focus on *how* the agent works internally, or does it just mention it as a tool?)
2.  **EC8:** The study's primary contribution is the empirical evaluation of an agent's performance on an SE task, rather than a novel contribution to the agent's architectural design, patterns, or principles. (Is the main point "we created a new agent/method" or "we tested an existing agent/method"?)

**Your Task:**
Analyze the paper and provide a structured JSON output. For each criterion, you must provide:
1.  A detailed "comment" explaining your reasoning, as if you were leaving a note for a colleague.
2.  A final "decision" which must be either "Include" (the paper does NOT meet this exclusion criterion) or "Exclude" (the paper DOES meet this exclusion criterion).

**JSON Output Format (MUST follow this structure exactly):**
{
  "EC7_Comment": "Your detailed analysis for EC7 here.",
  "EC7_Decision": "Include or Exclude",
  "EC8_Comment": "Your detailed analysis for EC8 here.",
  "EC8_Decision": "Include or Exclude"
}"#;

fn exclusion_criterion(id: &str) -> Criterion {
    Criterion {
        id: id.to_string(),
        verdict_column: format!("{}_Decision", id),
        comment_column: Some(format!("{}_Comment", id)),
        marker: None,
        include_token: "Include".to_string(),
        exclude_token: "Exclude".to_string(),
    }
}

pub fn task() -> ScreeningTask {
    ScreeningTask {
        name: "exclusion".to_string(),
        queries: vec![Query {
            system_prompt: Some(SYSTEM_PROMPT.to_string()),
            template: USER_PROMPT_TEMPLATE.to_string(),
            criteria: vec![exclusion_criterion("EC7"), exclusion_criterion("EC8")],
            json_mode: true,
            require_nonempty: vec!["title".to_string(), "abstract".to_string()],
            response_column: None,
        }],
        parser: ParserKind::Json,
        policy: AggregationPolicy::ExcludeDominant,
        decision_column: "Overall_Decision".to_string(),
        required_columns: vec!["title".to_string(), "abstract".to_string()],
    }
}
