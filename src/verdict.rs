//! Verdicts, aggregation policies and answer parsers.
//!
//! A [`VerdictParser`] turns the raw text of one LLM answer into one
//! [`CriterionResult`] per criterion the query covered. The screening loop never
//! looks at the answer text itself, so a stricter parser can replace the
//! keyword one without touching the loop.

use crate::task::Criterion;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::info;

/// Per-criterion outcome, always expressed in terms of inclusion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The paper passes this criterion
    Include,
    /// The paper fails this criterion
    Exclude,
    /// The answer did not contain an expected token
    Uncertain,
    /// The call failed after all retries, or the record could not be queried
    Error,
}

/// Overall decision for one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Decision {
    Include,
    Exclude,
    ReviewManually,
}

impl Decision {
    pub fn label(&self) -> &'static str {
        match self {
            Decision::Include => "Include",
            Decision::Exclude => "Exclude",
            Decision::ReviewManually => "Review Manually",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim() {
            "Include" => Some(Decision::Include),
            "Exclude" => Some(Decision::Exclude),
            "Review Manually" => Some(Decision::ReviewManually),
            _ => None,
        }
    }
}

/// How per-criterion verdicts combine into a [`Decision`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AggregationPolicy {
    /// Include only when every criterion includes; anything else excludes.
    AllInclude,
    /// Any exclude wins; all include → include; otherwise manual review.
    ExcludeDominant,
}

impl AggregationPolicy {
    pub fn aggregate(&self, verdicts: &[Verdict]) -> Decision {
        let all_include = !verdicts.is_empty() && verdicts.iter().all(|v| *v == Verdict::Include);
        match self {
            AggregationPolicy::AllInclude => {
                if all_include {
                    Decision::Include
                } else {
                    Decision::Exclude
                }
            }
            AggregationPolicy::ExcludeDominant => {
                if verdicts.contains(&Verdict::Exclude) {
                    Decision::Exclude
                } else if all_include {
                    Decision::Include
                } else {
                    Decision::ReviewManually
                }
            }
        }
    }
}

/// Result for one criterion of one record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CriterionResult {
    pub verdict: Verdict,
    /// Text written to the criterion's comment column, if it has one
    pub comment: String,
}

impl CriterionResult {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Error,
            comment: message.into(),
        }
    }
}

/// Extracts verdicts from the free text returned by the classification service.
pub trait VerdictParser {
    /// Returns exactly one result per criterion, in order.
    fn parse(&self, response: &str, criteria: &[Criterion]) -> Vec<CriterionResult>;
}

/// Which parser a task uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ParserKind {
    Keyword,
    Json,
}

impl ParserKind {
    pub fn parser(&self) -> Box<dyn VerdictParser + Send + Sync> {
        match self {
            ParserKind::Keyword => Box::new(KeywordParser),
            ParserKind::Json => Box::new(JsonFieldParser),
        }
    }
}

/// Case-insensitive substring search for the criterion's answer tokens.
///
/// With a marker the needle is `"<marker>: <token>"` (one answer line per
/// criterion), otherwise the bare token. The include token is tried first.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordParser;

impl VerdictParser for KeywordParser {
    fn parse(&self, response: &str, criteria: &[Criterion]) -> Vec<CriterionResult> {
        let haystack = response.to_lowercase();
        criteria
            .iter()
            .map(|c| {
                let needle = |token: &str| match &c.marker {
                    Some(m) => format!("{}: {}", m, token).to_lowercase(),
                    None => token.to_lowercase(),
                };
                let verdict = if haystack.contains(&needle(&c.include_token)) {
                    Verdict::Include
                } else if haystack.contains(&needle(&c.exclude_token)) {
                    Verdict::Exclude
                } else {
                    Verdict::Uncertain
                };
                CriterionResult {
                    verdict,
                    comment: response.trim().to_string(),
                }
            })
            .collect()
    }
}

/// Reads `<id>_Decision` / `<id>_Comment` style fields from a JSON answer.
///
/// The decision field name is the criterion's verdict column and the comment
/// field its comment column. A response that is not a JSON object makes every
/// criterion `Uncertain`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonFieldParser;

impl VerdictParser for JsonFieldParser {
    fn parse(&self, response: &str, criteria: &[Criterion]) -> Vec<CriterionResult> {
        let json_str = extract_json(response);
        let fields: HashMap<String, serde_json::Value> = match serde_json::from_str(&json_str) {
            Ok(map) => map,
            Err(e) => {
                let preview: String = response.chars().take(200).collect();
                info!(
                    error = %e,
                    content_preview = %preview,
                    "LLM output parse failed - treating as uncertain"
                );
                return criteria
                    .iter()
                    .map(|_| CriterionResult {
                        verdict: Verdict::Uncertain,
                        comment: format!("Parse error: {}", e),
                    })
                    .collect();
            }
        };

        criteria
            .iter()
            .map(|c| {
                let decision = fields.get(&c.verdict_column).and_then(|v| v.as_str()).unwrap_or("");
                let verdict = if decision.eq_ignore_ascii_case(c.include_token.trim()) {
                    Verdict::Include
                } else if decision.eq_ignore_ascii_case(c.exclude_token.trim()) {
                    Verdict::Exclude
                } else {
                    Verdict::Uncertain
                };
                let comment = c
                    .comment_column
                    .as_ref()
                    .and_then(|col| fields.get(col))
                    .and_then(|v| v.as_str())
                    .unwrap_or("Error parsing response.")
                    .to_string();
                CriterionResult { verdict, comment }
            })
            .collect()
    }
}

/// Extract JSON from LLM response (handles markdown code blocks)
pub fn extract_json(content: &str) -> String {
    let trimmed = content.trim();

    if trimmed.starts_with("```") {
        let lines: Vec<&str> = trimmed.lines().collect();
        if lines.len() >= 2 {
            let end = if lines.last().map(|l| l.trim()) == Some("```") {
                lines.len() - 1
            } else {
                lines.len()
            };
            return lines[1..end].join("\n");
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            return trimmed[start..=end].to_string();
        }
    }

    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use Verdict::*;

    fn yes_no(marker: Option<&str>) -> Criterion {
        Criterion {
            id: "c".to_string(),
            verdict_column: "c".to_string(),
            comment_column: None,
            marker: marker.map(str::to_string),
            include_token: "Yes".to_string(),
            exclude_token: "No".to_string(),
        }
    }

    fn ec(id: &str) -> Criterion {
        Criterion {
            id: id.to_string(),
            verdict_column: format!("{}_Decision", id),
            comment_column: Some(format!("{}_Comment", id)),
            marker: None,
            include_token: "Include".to_string(),
            exclude_token: "Exclude".to_string(),
        }
    }

    #[test]
    fn test_policy_all_include() {
        let p = AggregationPolicy::AllInclude;
        assert_eq!(p.aggregate(&[Include, Include, Include]), Decision::Include);
        assert_eq!(p.aggregate(&[Include, Exclude, Include]), Decision::Exclude);
        assert_eq!(p.aggregate(&[Include, Uncertain]), Decision::Exclude);
        assert_eq!(p.aggregate(&[Include, Error]), Decision::Exclude);
    }

    #[test]
    fn test_policy_exclude_dominant() {
        let p = AggregationPolicy::ExcludeDominant;
        for other in [Include, Exclude, Uncertain, Error] {
            assert_eq!(p.aggregate(&[Exclude, other]), Decision::Exclude);
        }
        assert_eq!(p.aggregate(&[Include, Include]), Decision::Include);
        assert_eq!(p.aggregate(&[Include, Uncertain]), Decision::ReviewManually);
        assert_eq!(p.aggregate(&[Error, Include]), Decision::ReviewManually);
    }

    #[test]
    fn test_decision_labels_round_trip() {
        for d in [Decision::Include, Decision::Exclude, Decision::ReviewManually] {
            assert_eq!(Decision::from_label(d.label()), Some(d));
        }
        assert_eq!(Decision::from_label(""), None);
    }

    #[test]
    fn test_keyword_bare_tokens() {
        let c = [yes_no(None)];
        assert_eq!(KeywordParser.parse("Yes.", &c)[0].verdict, Include);
        assert_eq!(KeywordParser.parse("no", &c)[0].verdict, Exclude);
        assert_eq!(KeywordParser.parse("Maybe", &c)[0].verdict, Uncertain);
    }

    #[test]
    fn test_keyword_marker_lines() {
        let criteria = [yes_no(Some("FM/LLM")), yes_no(Some("SE")), yes_no(Some("English"))];
        let reply = "FM/LLM: Yes\nSE: no\nEnglish: YES";
        let verdicts: Vec<Verdict> = KeywordParser
            .parse(reply, &criteria)
            .into_iter()
            .map(|r| r.verdict)
            .collect();
        assert_eq!(verdicts, vec![Include, Exclude, Include]);

        let partial = KeywordParser.parse("FM/LLM: Yes", &criteria);
        assert_eq!(partial[1].verdict, Uncertain);
    }

    #[test]
    fn test_json_fields() {
        let reply = r#"{"EC7_Comment": "describes architecture", "EC7_Decision": "Include",
                        "EC8_Comment": "only evaluation", "EC8_Decision": "exclude"}"#;
        let results = JsonFieldParser.parse(reply, &[ec("EC7"), ec("EC8")]);
        assert_eq!(results[0].verdict, Include);
        assert_eq!(results[0].comment, "describes architecture");
        assert_eq!(results[1].verdict, Exclude);
    }

    #[test]
    fn test_json_missing_field_is_uncertain() {
        let results = JsonFieldParser.parse(r#"{"EC7_Decision": "Include"}"#, &[ec("EC7"), ec("EC8")]);
        assert_eq!(results[0].verdict, Include);
        assert_eq!(results[1].verdict, Uncertain);
        assert_eq!(results[1].comment, "Error parsing response.");
    }

    #[test]
    fn test_json_garbage_is_uncertain() {
        let results = JsonFieldParser.parse("I cannot answer that", &[ec("EC7")]);
        assert_eq!(results[0].verdict, Uncertain);
        assert!(results[0].comment.starts_with("Parse error"));
    }

    #[test]
    fn test_extract_json_code_block() {
        let input = "```json\n{\"EC7_Decision\": \"Include\"}\n```";
        assert_eq!(extract_json(input), "{\"EC7_Decision\": \"Include\"}");
    }

    #[test]
    fn test_extract_json_with_text() {
        let input = r#"Here is the result: {"EC7_Decision": "Exclude"} hope it helps"#;
        let result = extract_json(input);
        assert!(result.starts_with('{'));
        assert!(result.ends_with('}'));
    }
}
