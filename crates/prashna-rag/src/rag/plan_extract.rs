//! Extraction of a structured retrieval plan from free-form model output.
//!
//! Models wrap the requested JSON in commentary, code fences, or stray
//! braces. Nested and escaped braces inside string values make the format
//! non-regular, so the scanner is a small explicit state machine rather
//! than a regex.

use serde_json::Value;

use crate::types::QueryPlan;

/// Scanner state while walking a candidate object.
#[derive(Clone, Copy, PartialEq)]
enum ScanState {
    Normal,
    InString,
    /// Inside a string, the previous character was a backslash; the next
    /// character is consumed verbatim.
    Escaped,
}

/// Return the balanced `{...}` substring starting at byte offset `start`,
/// or None if the text ends before the braces balance.
fn balanced_object(text: &str, start: usize) -> Option<&str> {
    let mut state = ScanState::Normal;
    let mut depth = 0usize;

    for (offset, ch) in text[start..].char_indices() {
        match state {
            ScanState::Escaped => state = ScanState::InString,
            ScanState::InString => match ch {
                '\\' => state = ScanState::Escaped,
                '"' => state = ScanState::Normal,
                _ => {}
            },
            ScanState::Normal => match ch {
                '"' => state = ScanState::InString,
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(&text[start..start + offset + ch.len_utf8()]);
                    }
                }
                _ => {}
            },
        }
    }
    None
}

/// Find the first balanced object in `text` that decodes as JSON.
///
/// Scans every `{` start index in order; at each, the first balanced
/// candidate is taken, and the scan stops at the first candidate that
/// decodes successfully. Braces inside string values never miscount.
pub fn extract_json_object(text: &str) -> Option<Value> {
    for (start, _) in text.match_indices('{') {
        let Some(candidate) = balanced_object(text, start) else {
            continue;
        };
        if let Ok(value) = serde_json::from_str::<Value>(candidate) {
            if value.is_object() {
                return Some(value);
            }
        }
    }
    None
}

/// Normalize a field that may be a JSON list or a delimiter-separated
/// string into unique trimmed strings, first-seen order, empties dropped.
pub fn string_list(value: &Value) -> Vec<String> {
    let raw: Vec<String> = match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str().map(|s| s.to_string()))
            .collect(),
        Value::String(s) => s
            .split(|c| c == ';' || c == '\n' || c == '|')
            .map(|s| s.to_string())
            .collect(),
        _ => Vec::new(),
    };

    let mut seen = std::collections::HashSet::new();
    raw.iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .filter(|s| seen.insert(s.clone()))
        .collect()
}

/// Maximum sub-questions a plan may carry.
const MAX_SUB_QUESTIONS: usize = 3;

/// Assemble a `QueryPlan` from a decoded plan object.
///
/// Query caps: at most 2 queries for level <= 1, at most 4 otherwise.
/// Sub-questions are merged into the query list only at level >= 3. An
/// empty merged list falls back to the original question.
pub fn plan_from_value(value: &Value, question: &str, level: u8) -> QueryPlan {
    let queries = string_list(&value["queries"]);
    let mut sub_questions = string_list(&value["sub_questions"]);
    sub_questions.truncate(MAX_SUB_QUESTIONS);

    let cap = if level <= 1 { 2 } else { 4 };

    let mut merged: Vec<String> = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for q in queries.iter().chain(if level >= 3 {
        sub_questions.iter()
    } else {
        [].iter()
    }) {
        if seen.insert(q.clone()) {
            merged.push(q.clone());
        }
    }
    merged.truncate(cap);

    if merged.is_empty() {
        merged.push(question.to_string());
    }

    let need_retrieval = value["need_retrieval"]
        .as_bool()
        .unwrap_or(!merged.is_empty());

    let follow_up = value["follow_up"]
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    let reason = value["reason"]
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    QueryPlan {
        need_retrieval,
        queries: merged,
        follow_up,
        reason,
        sub_questions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_braces_inside_strings_do_not_miscount() {
        let raw = r#"blah {"a":"}{","b":1} trailing"#;
        let value = extract_json_object(raw).unwrap();
        assert_eq!(value["a"], "}{");
        assert_eq!(value["b"], 1);
    }

    #[test]
    fn test_escaped_quotes_do_not_end_strings() {
        let raw = r#"note {"a":"say \"hi\" {ok}","n":2} done"#;
        let value = extract_json_object(raw).unwrap();
        assert_eq!(value["a"], "say \"hi\" {ok}");
        assert_eq!(value["n"], 2);
    }

    #[test]
    fn test_code_fenced_object_is_found() {
        let raw = "Here is the plan:\n```json\n{\"queries\":[\"x\"]}\n```\nHope that helps!";
        let value = extract_json_object(raw).unwrap();
        assert_eq!(value["queries"][0], "x");
    }

    #[test]
    fn test_invalid_candidate_falls_through_to_next_start() {
        let raw = "{not json at all} {\"a\":1}";
        let value = extract_json_object(raw).unwrap();
        assert_eq!(value["a"], 1);
    }

    #[test]
    fn test_unbalanced_prefix_is_skipped() {
        let raw = "{oops {\"a\":1}";
        // First start never balances within the text; the nested start does.
        let value = extract_json_object(raw).unwrap();
        assert_eq!(value["a"], 1);
    }

    #[test]
    fn test_no_object_returns_none() {
        assert!(extract_json_object("no braces here").is_none());
        assert!(extract_json_object("dangling { only").is_none());
    }

    #[test]
    fn test_string_list_from_array_dedups_and_trims() {
        let value = json!(["  a  ", "b", "a", ""]);
        assert_eq!(string_list(&value), vec!["a", "b"]);
    }

    #[test]
    fn test_string_list_from_delimited_string() {
        let value = json!("first query; second query;; \n third");
        assert_eq!(
            string_list(&value),
            vec!["first query", "second query", "third"]
        );
    }

    #[test]
    fn test_level_one_caps_at_two_queries() {
        let value = json!({"queries": ["q1", "q2", "q3", "q4", "q5"]});
        let plan = plan_from_value(&value, "question", 1);
        assert_eq!(plan.queries.len(), 2);
    }

    #[test]
    fn test_level_three_merges_sub_questions_capped_at_four() {
        let value = json!({
            "queries": ["q1", "q2"],
            "sub_questions": ["s1", "s2", "s3"]
        });
        let plan = plan_from_value(&value, "question", 3);
        assert_eq!(plan.queries, vec!["q1", "q2", "s1", "s2"]);
    }

    #[test]
    fn test_level_two_ignores_sub_questions_in_merge() {
        let value = json!({
            "queries": ["q1"],
            "sub_questions": ["s1", "s2"]
        });
        let plan = plan_from_value(&value, "question", 2);
        assert_eq!(plan.queries, vec!["q1"]);
        // Still carried on the plan for observability.
        assert_eq!(plan.sub_questions.len(), 2);
    }

    #[test]
    fn test_merge_dedups_exact_strings() {
        let value = json!({
            "queries": ["q1", "q1"],
            "sub_questions": ["q1", "s1"]
        });
        let plan = plan_from_value(&value, "question", 3);
        assert_eq!(plan.queries, vec!["q1", "s1"]);
    }

    #[test]
    fn test_empty_queries_fall_back_to_question() {
        let value = json!({"queries": []});
        let plan = plan_from_value(&value, "what is x", 2);
        assert_eq!(plan.queries, vec!["what is x"]);
        assert!(plan.need_retrieval);
    }

    #[test]
    fn test_explicit_need_retrieval_false_is_honored() {
        let value = json!({"need_retrieval": false, "queries": ["q1"], "reason": "chit-chat"});
        let plan = plan_from_value(&value, "hi", 1);
        assert!(!plan.need_retrieval);
        assert_eq!(plan.reason.as_deref(), Some("chit-chat"));
    }

    #[test]
    fn test_blank_follow_up_dropped() {
        let value = json!({"queries": ["q"], "follow_up": "   "});
        let plan = plan_from_value(&value, "q", 1);
        assert!(plan.follow_up.is_none());
    }
}
