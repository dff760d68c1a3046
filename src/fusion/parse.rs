//! Turns free-form oracle answers into a `FusionOutcome`.
//!
//! Nothing in here returns an error: an answer that cannot be understood is an
//! empty record, and the raw text is persisted next to it for review.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::core::model::{FusedTableRecord, FusionOutcome, TableContent};
use crate::fusion::literal::parse_literal;

/// `Final Answer:` in any letter case, followed by a line break.
static SENTINEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)final answer:[ \t]*\r?\n").expect("valid sentinel regex"));

/// First fenced block; the language tag is optional.
static FENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```(?:[A-Za-z0-9_+-]+[ \t]*\r?\n|json|html|python)?\s*(.*?)\s*```")
        .expect("valid fence regex")
});

const NO_CORRECTIONS: &str = "no corrections";

/// Everything after the first sentinel line, trimmed.
pub fn answer_segment(response: &str) -> Option<&str> {
    SENTINEL
        .find(response)
        .map(|m| response[m.end()..].trim())
}

/// Inner text of the first fenced code block, if any.
pub fn fenced_block(text: &str) -> Option<&str> {
    FENCE
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Parses a multi-representation fusion answer.
pub fn parse_fusion_response(response: &str) -> FusionOutcome {
    let Some(segment) = answer_segment(response) else {
        warn!("oracle response has no final-answer line; using empty record");
        return FusionOutcome::Empty;
    };

    let payload = fenced_block(segment).unwrap_or(segment);
    if payload.is_empty() {
        warn!("oracle final answer is blank; using empty record");
        return FusionOutcome::Empty;
    }

    let parsed = serde_json::from_str::<Value>(payload)
        .ok()
        .or_else(|| parse_literal(payload));

    match parsed {
        Some(Value::Object(map)) if map.is_empty() => {
            debug!("oracle reported no usable table");
            FusionOutcome::Empty
        }
        Some(value @ Value::Object(_)) => match serde_json::from_value::<FusedTableRecord>(value) {
            Ok(record) => FusionOutcome::Fused(record),
            Err(err) => {
                warn!(%err, "oracle answer is not a table record; using empty record");
                FusionOutcome::Empty
            }
        },
        Some(other) => {
            warn!(kind = value_kind(&other), "oracle answer is not an object; using empty record");
            FusionOutcome::Empty
        }
        None => {
            warn!("oracle answer is neither JSON nor a literal; using empty record");
            FusionOutcome::Empty
        }
    }
}

/// Parses a single-representation correction answer for `original`.
///
/// "No corrections" anywhere in the answer keeps the original body untouched;
/// otherwise the replacement markup is the first fenced block, or the whole
/// answer when it is not fenced.
pub fn parse_correction_response(response: &str, original: TableContent) -> FusionOutcome {
    if response.to_lowercase().contains(NO_CORRECTIONS) {
        debug!("oracle made no corrections");
        return FusionOutcome::Fused(original.into());
    }

    let trimmed = response.trim();
    let body = fenced_block(trimmed).unwrap_or(trimmed);
    if body.is_empty() {
        warn!("oracle correction is blank; using empty record");
        return FusionOutcome::Empty;
    }

    let mut record = FusedTableRecord::from(original);
    record.table_body = body.to_string();
    FusionOutcome::Fused(record)
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn record(body: &str, caption: &str, footnote: &str, page: &str) -> FusedTableRecord {
        FusedTableRecord {
            table_body: body.to_string(),
            table_caption: caption.to_string(),
            table_footnote: footnote.to_string(),
            page_idx: page.to_string(),
        }
    }

    fn content(body: &str) -> TableContent {
        TableContent {
            table_body: body.to_string(),
            table_caption: "Table 2: Results".to_string(),
            table_footnote: String::new(),
            page_idx: "4".to_string(),
        }
    }

    #[test]
    fn null_text_fields_become_empty_strings() {
        let response = "comparison: ok\nFinal Answer:\n{\"table_body\": \"<table>x</table>\", \"table_caption\": \"Table 1\", \"table_footnote\": null, \"page_idx\": \"0\"}";
        assert_eq!(
            parse_fusion_response(response),
            FusionOutcome::Fused(record("<table>x</table>", "Table 1", "", "0"))
        );

        let literal = "Final Answer:\n{'table_body': '<table>y</table>', 'table_caption': None, 'table_footnote': None, 'page_idx': 2}";
        assert_eq!(
            parse_fusion_response(literal),
            FusionOutcome::Fused(record("<table>y</table>", "", "", "2"))
        );
    }

    #[test]
    fn parses_fenced_json_after_sentinel() {
        let response = "comparison: ok\nFinal Answer:\n```json\n{\"table_body\":\"<table></table>\",\"table_caption\":\"\",\"table_footnote\":\"\",\"page_idx\":\"0\"}\n```";
        assert_eq!(
            parse_fusion_response(response),
            FusionOutcome::Fused(record("<table></table>", "", "", "0"))
        );
    }

    #[test]
    fn no_sentinel_is_empty() {
        let response = "comparison: all three agree.\n{\"table_body\": \"<table></table>\"}";
        assert_eq!(parse_fusion_response(response), FusionOutcome::Empty);
    }

    #[test]
    fn sentinel_needs_line_break() {
        let response = "Final Answer: {\"table_body\": \"<table></table>\"}";
        assert_eq!(parse_fusion_response(response), FusionOutcome::Empty);
    }

    #[test]
    fn accepts_sentinel_case_variants() {
        for sentinel in ["Final answer:", "final answer:", "FINAL ANSWER:"] {
            let response = format!("comparison: x\n{sentinel}\n{{\"table_body\": \"<table>1</table>\", \"page_idx\": 2}}");
            assert_eq!(
                parse_fusion_response(&response),
                FusionOutcome::Fused(record("<table>1</table>", "", "", "2")),
                "sentinel {sentinel:?}"
            );
        }
    }

    #[test]
    fn uses_first_sentinel() {
        let response = "comparison: the text \"Final Answer:\nlater\" appears here\nFinal Answer:\n{}";
        // The first sentinel starts the segment, which is not a parseable payload.
        assert_eq!(parse_fusion_response(response), FusionOutcome::Empty);
        assert_eq!(
            answer_segment(response),
            Some("later\" appears here\nFinal Answer:\n{}")
        );
    }

    #[test]
    fn explicit_empty_object_is_empty() {
        let response = "comparison: none of the candidates is a table.\nFinal Answer:\n{}";
        assert_eq!(parse_fusion_response(response), FusionOutcome::Empty);
    }

    #[test]
    fn falls_back_to_literal_syntax() {
        let response = "comparison: merged caption from docling.\nFinal Answer:\n```\n{'table_body': '<table><tr><td>a</td></tr></table>', 'table_caption': 'Table 1', 'table_footnote': '', 'page_idx': '3',}\n```";
        assert_eq!(
            parse_fusion_response(response),
            FusionOutcome::Fused(record("<table><tr><td>a</td></tr></table>", "Table 1", "", "3"))
        );
    }

    #[test]
    fn unparseable_answer_is_empty() {
        let response = "comparison: x\nFinal Answer:\nI would pick the second table.";
        assert_eq!(parse_fusion_response(response), FusionOutcome::Empty);
    }

    #[test]
    fn non_object_answer_is_empty() {
        let response = "comparison: x\nFinal Answer:\n[\"<table></table>\"]";
        assert_eq!(parse_fusion_response(response), FusionOutcome::Empty);
    }

    #[test]
    fn missing_keys_default_to_empty_strings() {
        let response = "Final Answer:\n{\"table_body\": \"<table></table>\"}";
        assert_eq!(
            parse_fusion_response(response),
            FusionOutcome::Fused(record("<table></table>", "", "", ""))
        );
    }

    #[test]
    fn fence_without_language_tag() {
        assert_eq!(fenced_block("x ```{\"a\": 1}``` y"), Some("{\"a\": 1}"));
        assert_eq!(fenced_block("```json {\"a\": 1}```"), Some("{\"a\": 1}"));
        assert_eq!(fenced_block("```html\n<table></table>\n```"), Some("<table></table>"));
        assert_eq!(fenced_block("no fence here"), None);
    }

    #[test]
    fn no_corrections_keeps_body_verbatim() {
        let body = "<table>\n  <tr><td>  α β </td></tr>\r\n</table>";
        let response = "comparison: The image matches.\n```html\nNo Corrections Needed.\n```";
        let outcome = parse_correction_response(response, content(body));
        assert_eq!(outcome.record().map(|r| r.table_body.as_str()), Some(body));
        assert_eq!(outcome.record().map(|r| r.page_idx.as_str()), Some("4"));
    }

    #[test]
    fn correction_takes_fenced_markup() {
        let response = "comparison: the second header is wrong.\n```html\n<table><tr><th>Name</th></tr></table>\n```";
        let outcome = parse_correction_response(response, content("<table><tr><th>Nme</th></tr></table>"));
        assert_eq!(
            outcome,
            FusionOutcome::Fused(record(
                "<table><tr><th>Name</th></tr></table>",
                "Table 2: Results",
                "",
                "4"
            ))
        );
    }

    #[test]
    fn unfenced_correction_uses_whole_answer() {
        let outcome = parse_correction_response("  <table></table>\n", content("<table>x</table>"));
        assert_eq!(
            outcome.record().map(|r| r.table_body.as_str()),
            Some("<table></table>")
        );
    }

    #[test]
    fn blank_correction_is_empty() {
        assert_eq!(
            parse_correction_response("   ", content("<table></table>")),
            FusionOutcome::Empty
        );
    }
}
