//! Prompt construction and response parsing shared by all engines

use serde_json::Value;

use super::AnalysisRequest;
use crate::error::{RepairError, RepairResult};
use crate::models::{DraftIssue, IssueType, Severity};

pub const SYSTEM_PROMPT: &str = "You are an expert code reviewer. You find crashes, memory \
leaks, ANRs, security holes, performance problems and other defects in source code and \
propose minimal, drop-in fixes. You answer with JSON only.";

/// Build the user prompt for a set of files
pub fn build_prompt(request: &AnalysisRequest, max_file_bytes: usize) -> String {
    let mut prompt = format!(
        "Analyze the following {} files from a {} project.\n\n\
         Return a JSON array. Each element must have these fields:\n\
         - \"type\": one of crash, memory_leak, anr, warning, error, security, performance\n\
         - \"severity\": one of critical, high, medium, low\n\
         - \"title\": short summary\n\
         - \"description\": what is wrong\n\
         - \"file\": the file path exactly as given below\n\
         - \"line\": 1-based line number\n\
         - \"originalCode\": the problematic code\n\
         - \"fixedCode\": the complete corrected content of the file, or \"\" when the \
         file is marked truncated\n\
         - \"explanation\": why the fix works\n\
         - \"impact\": what happens if it is not fixed\n\n\
         Return [] when there are no issues.\n",
        request.files.len(),
        request.platform
    );

    for file in &request.files {
        let content = truncate_at_char_boundary(&file.content, max_file_bytes);
        prompt.push_str(&format!("\n--- FILE: {} ---\n{}\n", file.path, content));
        if content.len() < file.content.len() {
            prompt.push_str("[... truncated ...]\n");
        }
    }

    prompt
}

/// Longest prefix of `text` that fits `max_bytes` without splitting a char
pub fn truncate_at_char_boundary(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Parse an engine response into draft issues.
///
/// Accepts a bare array, an array inside a fenced block, or an object with
/// an `issues` array. Anything else is `AnalysisFailed`.
pub fn parse_issues(response: &str) -> RepairResult<Vec<DraftIssue>> {
    let value = extract_json(response).ok_or_else(|| {
        RepairError::analysis(format!("no JSON issue list in response: {}", excerpt(response)))
    })?;

    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("issues") {
            Some(Value::Array(items)) => items,
            _ => return Err(RepairError::analysis("response object has no 'issues' array")),
        },
        _ => return Err(RepairError::analysis("response is not an issue list")),
    };

    Ok(items.iter().filter_map(draft_from_value).collect())
}

fn extract_json(response: &str) -> Option<Value> {
    let trimmed = response.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }

    if let Some(block) = regex_utils::json_block::extract_fenced(trimmed) {
        if let Ok(value) = serde_json::from_str::<Value>(block) {
            return Some(value);
        }
    }

    for (open, close) in [('[', ']'), ('{', '}')] {
        if let (Some(start), Some(end)) = (trimmed.find(open), trimmed.rfind(close)) {
            if start < end {
                if let Ok(value) = serde_json::from_str::<Value>(&trimmed[start..=end]) {
                    return Some(value);
                }
            }
        }
    }

    None
}

fn draft_from_value(value: &Value) -> Option<DraftIssue> {
    let object = value.as_object()?;
    let text = |keys: &[&str]| -> String {
        keys.iter()
            .find_map(|key| object.get(*key).and_then(Value::as_str))
            .unwrap_or_default()
            .to_string()
    };

    let title = text(&["title", "name"]);
    let file = text(&["file", "filePath", "file_path", "path"]);
    if title.is_empty() && file.is_empty() {
        return None;
    }

    let line = ["line", "lineNumber", "line_number"].iter().find_map(|key| match object.get(*key) {
        Some(Value::Number(n)) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    });

    Some(DraftIssue {
        issue_type: IssueType::parse_lenient(&text(&["type", "issueType", "issue_type"])),
        severity: Severity::parse_lenient(&text(&["severity"])),
        title,
        description: text(&["description", "details"]),
        file,
        line,
        original_code: text(&["originalCode", "original_code", "code"]),
        fixed_code: text(&["fixedCode", "fixed_code", "fix", "suggestedFix"]),
        explanation: text(&["explanation"]),
        impact: text(&["impact"]),
    })
}

fn excerpt(text: &str) -> String {
    truncate_at_char_boundary(text.trim(), 200).to_string()
}
