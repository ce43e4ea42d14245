//! Session log parser
//!
//! Decodes one line-delimited JSON log into [`ParsedMessage`]s.
//!
//! # Error Handling
//!
//! Parsing is tolerant line by line:
//!
//! - **Malformed JSON lines** and lines whose nested `message` cannot be decoded
//!   are logged, recorded in [`LogParse::warnings`] and skipped.
//! - **Non-conversation records** (`progress`, `file-history-snapshot`,
//!   `queue-operation`, ...) are dropped silently.
//! - **Unreadable timestamps** leave the message timestamp unknown and add a warning.
//! - **Oversized lines** are the one fatal case: a line longer than
//!   [`MAX_LINE_BYTES`] aborts the whole parse with [`Error::LineTooLong`].
//!
//! # Tool result correlation
//!
//! Tool results arrive in later user turns than the assistant turn that made the
//! call. Results are collected for the whole file and attached to the matching
//! [`ToolCall`]s in a second pass, so a result may appear any number of lines
//! after its call. Correlation never crosses file boundaries.

use crate::error::{Error, Result};
use crate::format::truncate_with_suffix;
use crate::types::{ParsedMessage, TokenUsage, ToolCall, TurnRole};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

/// Longest accepted log line, in bytes
pub const MAX_LINE_BYTES: usize = 64 * 1024 * 1024;

/// Bytes of raw JSON kept when a tool result has an unrecognized shape
pub const RESULT_FALLBACK_PREVIEW: usize = 500;

/// Output of [`parse_log`].
#[derive(Debug, Default)]
pub struct LogParse {
    /// Conversation turns in file order
    pub messages: Vec<ParsedMessage>,
    /// Non-fatal problems, one entry per skipped line or unreadable timestamp
    pub warnings: Vec<String>,
}

// ============================================
// Raw JSONL record types (serde deserialization)
// ============================================

/// One log line.
///
/// `message` is kept as raw JSON so a bad payload only costs this line.
#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct RawEvent {
    #[serde(rename = "type")]
    event_type: Option<String>,
    agent_id: Option<String>,
    is_sidechain: Option<bool>,
    slug: Option<String>,
    uuid: Option<String>,
    parent_uuid: Option<String>,
    timestamp: Option<String>,
    team_name: Option<String>,
    agent_name: Option<String>,
    message: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawMessage {
    role: Option<String>,
    content: Option<serde_json::Value>,
    usage: Option<RawUsage>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawUsage {
    input_tokens: i64,
    output_tokens: i64,
    cache_creation_input_tokens: i64,
    cache_read_input_tokens: i64,
}

impl From<RawUsage> for TokenUsage {
    fn from(raw: RawUsage) -> Self {
        TokenUsage {
            input: raw.input_tokens,
            output: raw.output_tokens,
            cache_creation: raw.cache_creation_input_tokens,
            cache_read: raw.cache_read_input_tokens,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        #[serde(default)]
        text: String,
    },
    Thinking {
        #[serde(default)]
        thinking: String,
    },
    ToolUse {
        #[serde(default)]
        id: String,
        #[serde(default)]
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },
    ToolResult {
        #[serde(default)]
        tool_use_id: String,
        #[serde(default)]
        content: serde_json::Value,
    },
    // Catch-all for image, document, ... blocks
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct TextFragment {
    #[serde(default)]
    text: String,
}

// ============================================
// Parsing
// ============================================

/// Parse a log file from disk.
pub fn parse_log_file(path: &Path) -> Result<LogParse> {
    let file = File::open(path)?;
    let parsed = parse_log(BufReader::new(file))?;
    for warning in &parsed.warnings {
        tracing::warn!(path = %path.display(), "{}", warning);
    }
    Ok(parsed)
}

/// Parse a log stream.
///
/// Returns an error only for I/O failures and lines over [`MAX_LINE_BYTES`].
pub fn parse_log<R: BufRead>(reader: R) -> Result<LogParse> {
    parse_log_with_limit(reader, MAX_LINE_BYTES)
}

fn parse_log_with_limit<R: BufRead>(mut reader: R, max_line: usize) -> Result<LogParse> {
    let mut result = LogParse::default();
    let mut file_results: HashMap<String, String> = HashMap::new();
    let mut buf = Vec::new();
    let mut line_number = 0usize;

    loop {
        buf.clear();
        // Room for the content plus a CRLF terminator
        let read = (&mut reader)
            .take(max_line as u64 + 2)
            .read_until(b'\n', &mut buf)?;
        if read == 0 {
            break;
        }
        line_number += 1;

        if buf.last() == Some(&b'\n') {
            buf.pop();
        }
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
        if buf.len() > max_line {
            return Err(Error::LineTooLong {
                line: line_number,
                limit: max_line,
            });
        }
        if buf.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        if let Some(message) = parse_line(&buf, line_number, &mut file_results, &mut result.warnings)
        {
            result.messages.push(message);
        }
    }

    associate_tool_results(&mut result.messages, &file_results);
    Ok(result)
}

/// Decode one non-empty line. Returns `None` for skipped lines.
fn parse_line(
    line: &[u8],
    line_number: usize,
    file_results: &mut HashMap<String, String>,
    warnings: &mut Vec<String>,
) -> Option<ParsedMessage> {
    let event: RawEvent = match serde_json::from_slice(line) {
        Ok(e) => e,
        Err(e) => {
            warnings.push(format!("Line {}: malformed JSON: {}", line_number, e));
            return None;
        }
    };

    match event.event_type.as_deref() {
        Some("user") | Some("assistant") => {}
        _ => return None,
    }

    let raw_message = match event.message {
        Some(serde_json::Value::Null) | None => return None,
        Some(value) => value,
    };
    let message: RawMessage = match serde_json::from_value(raw_message) {
        Ok(m) => m,
        Err(e) => {
            warnings.push(format!("Line {}: unreadable message: {}", line_number, e));
            return None;
        }
    };

    let role_str = message.role.as_deref().or(event.event_type.as_deref());
    let role = match role_str.map(str::parse::<TurnRole>) {
        Some(Ok(role)) => role,
        _ => return None,
    };

    let mut parsed = ParsedMessage::new(role);
    parsed.uuid = event.uuid;
    parsed.parent_uuid = event.parent_uuid;
    parsed.agent_id = event.agent_id.filter(|s| !s.is_empty());
    parsed.is_sidechain = event.is_sidechain.unwrap_or(false);
    parsed.slug = event.slug.filter(|s| !s.is_empty());
    parsed.team_name = event.team_name.filter(|s| !s.is_empty());
    parsed.agent_name = event.agent_name.filter(|s| !s.is_empty());

    if let Some(raw_ts) = event.timestamp.as_deref().filter(|s| !s.is_empty()) {
        parsed.timestamp = parse_timestamp(raw_ts);
        if parsed.timestamp.is_none() {
            warnings.push(format!(
                "Line {}: unrecognized timestamp {:?}",
                line_number, raw_ts
            ));
        }
    }

    match role {
        TurnRole::Assistant => {
            parse_assistant_content(&mut parsed, message.content);
            parsed.usage = message.usage.map(TokenUsage::from);
        }
        TurnRole::User => parse_user_content(&mut parsed, message.content, file_results),
    }

    Some(parsed)
}

fn content_blocks(items: Vec<serde_json::Value>) -> impl Iterator<Item = ContentBlock> {
    items
        .into_iter()
        .filter_map(|item| serde_json::from_value::<ContentBlock>(item).ok())
}

fn parse_assistant_content(parsed: &mut ParsedMessage, content: Option<serde_json::Value>) {
    let items = match content {
        Some(serde_json::Value::String(text)) => {
            parsed.content = text;
            return;
        }
        Some(serde_json::Value::Array(items)) => items,
        _ => return,
    };

    let mut texts: Vec<String> = Vec::new();
    let mut thoughts: Vec<String> = Vec::new();

    for block in content_blocks(items) {
        match block {
            ContentBlock::Text { text } if !text.is_empty() => texts.push(text),
            ContentBlock::Thinking { thinking } if !thinking.is_empty() => thoughts.push(thinking),
            ContentBlock::ToolUse { id, name, input } => parsed.tool_calls.push(ToolCall {
                id,
                name,
                input,
                result: None,
            }),
            _ => {}
        }
    }

    parsed.content = texts.join("\n");
    parsed.thinking = thoughts.join("\n\n");
}

fn parse_user_content(
    parsed: &mut ParsedMessage,
    content: Option<serde_json::Value>,
    file_results: &mut HashMap<String, String>,
) {
    let items = match content {
        Some(serde_json::Value::String(text)) => {
            parsed.content = text;
            return;
        }
        Some(serde_json::Value::Array(items)) => items,
        _ => return,
    };

    let mut texts: Vec<String> = Vec::new();

    for block in content_blocks(items) {
        match block {
            ContentBlock::ToolResult {
                tool_use_id,
                content,
            } if !tool_use_id.is_empty() => {
                let result = extract_tool_result_text(&content);
                file_results.insert(tool_use_id.clone(), result.clone());
                parsed.tool_results.insert(tool_use_id, result);
            }
            // Prompts sent alongside attachments arrive as text blocks
            ContentBlock::Text { text } if !text.is_empty() => texts.push(text),
            _ => {}
        }
    }

    parsed.content = texts.join("\n");
}

/// Flatten a tool result's `content` field to text.
///
/// A string is returned as is; a list of `{type, text}` fragments is joined by
/// newlines. Anything else is returned as raw JSON, cut to
/// [`RESULT_FALLBACK_PREVIEW`] bytes.
pub fn extract_tool_result_text(content: &serde_json::Value) -> String {
    match content {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Array(items) => {
            let fragments: Option<Vec<TextFragment>> = items
                .iter()
                .map(|item| serde_json::from_value(item.clone()).ok())
                .collect();
            match fragments {
                Some(fragments) => fragments
                    .into_iter()
                    .map(|f| f.text)
                    .filter(|t| !t.is_empty())
                    .collect::<Vec<_>>()
                    .join("\n"),
                None => raw_preview(content),
            }
        }
        other => raw_preview(other),
    }
}

fn raw_preview(value: &serde_json::Value) -> String {
    truncate_with_suffix(&value.to_string(), RESULT_FALLBACK_PREVIEW, "...")
}

fn associate_tool_results(messages: &mut [ParsedMessage], results: &HashMap<String, String>) {
    for call in messages.iter_mut().flat_map(|m| m.tool_calls.iter_mut()) {
        if let Some(result) = results.get(&call.id) {
            call.result = Some(result.clone());
        }
    }
}

/// Parse a log timestamp.
///
/// Accepts RFC 3339, then `YYYY-MM-DDTHH:MM:SS.mmmZ`, then `YYYY-MM-DDTHH:MM:SSZ`.
/// Returns `None` when no format matches.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.3fZ", "%Y-%m-%dT%H:%M:%SZ"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::io::Cursor;

    fn parse_str(input: &str) -> LogParse {
        parse_log(Cursor::new(input.as_bytes())).unwrap()
    }

    #[test]
    fn test_timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2025, 1, 1, 10, 0, 0).unwrap();
        assert_eq!(parse_timestamp("2025-01-01T10:00:00Z"), Some(expected));
        assert_eq!(parse_timestamp("2025-01-01T12:00:00+02:00"), Some(expected));
        assert_eq!(
            parse_timestamp("2025-01-01T10:00:00.250Z"),
            Some(expected + chrono::Duration::milliseconds(250))
        );
        assert_eq!(parse_timestamp("yesterday"), None);
        assert_eq!(parse_timestamp("2025-01-01 10:00:00"), None);
    }

    #[test]
    fn test_assistant_blocks() {
        let input = r#"{"type":"assistant","uuid":"a1","timestamp":"2025-01-01T10:00:00Z","message":{"role":"assistant","content":[{"type":"thinking","thinking":"first"},{"type":"text","text":"Hello"},{"type":"thinking","thinking":"second"},{"type":"tool_use","id":"t1","name":"Read","input":{"path":"a.rs"}},{"type":"text","text":"World"},{"type":"image","source":{}}],"usage":{"input_tokens":10,"output_tokens":5,"cache_creation_input_tokens":2,"cache_read_input_tokens":1}}}"#;
        let parsed = parse_str(input);

        assert!(parsed.warnings.is_empty());
        let msg = &parsed.messages[0];
        assert_eq!(msg.role, TurnRole::Assistant);
        assert_eq!(msg.content, "Hello\nWorld");
        assert_eq!(msg.thinking, "first\n\nsecond");
        assert_eq!(msg.tool_calls.len(), 1);
        assert_eq!(msg.tool_calls[0].name, "Read");
        assert_eq!(msg.tool_calls[0].input, serde_json::json!({"path": "a.rs"}));
        assert_eq!(msg.tool_calls[0].result, None);
        assert_eq!(
            msg.usage,
            Some(TokenUsage {
                input: 10,
                output: 5,
                cache_creation: 2,
                cache_read: 1
            })
        );
    }

    #[test]
    fn test_string_content() {
        let input = concat!(
            r#"{"type":"user","message":{"role":"user","content":"Fix the bug"}}"#,
            "\n",
            r#"{"type":"assistant","message":{"role":"assistant","content":"On it"}}"#,
        );
        let parsed = parse_str(input);
        assert_eq!(parsed.messages.len(), 2);
        assert_eq!(parsed.messages[0].content, "Fix the bug");
        assert_eq!(parsed.messages[1].content, "On it");
        assert_eq!(parsed.messages[1].timestamp, None);
    }

    #[test]
    fn test_cross_line_correlation() {
        let input = concat!(
            r#"{"type":"assistant","message":{"role":"assistant","content":[{"type":"tool_use","id":"t1","name":"Bash","input":{}}]}}"#,
            "\n",
            r#"{"type":"progress","data":{}}"#,
            "\n",
            r#"{"type":"assistant","message":{"role":"assistant","content":"still working"}}"#,
            "\n",
            r#"{"type":"user","message":{"role":"user","content":[{"type":"tool_result","tool_use_id":"t1","content":"done"}]}}"#,
        );
        let parsed = parse_str(input);

        assert_eq!(parsed.messages.len(), 3);
        assert_eq!(parsed.messages[0].tool_calls[0].result.as_deref(), Some("done"));
        assert_eq!(parsed.messages[2].tool_results.get("t1").map(String::as_str), Some("done"));
        assert_eq!(parsed.messages[2].content, "");
    }

    #[test]
    fn test_tool_result_shapes() {
        assert_eq!(extract_tool_result_text(&serde_json::json!("plain")), "plain");
        assert_eq!(
            extract_tool_result_text(&serde_json::json!([
                {"type": "text", "text": "one"},
                {"type": "text", "text": ""},
                {"type": "text", "text": "two"}
            ])),
            "one\ntwo"
        );
        assert_eq!(extract_tool_result_text(&serde_json::Value::Null), "");

        let odd = serde_json::json!({"exit": 1});
        assert_eq!(extract_tool_result_text(&odd), r#"{"exit":1}"#);

        let big = serde_json::json!({ "blob": "x".repeat(800) });
        let preview = extract_tool_result_text(&big);
        assert!(preview.ends_with("..."));
        assert_eq!(preview.len(), RESULT_FALLBACK_PREVIEW + 3);
    }

    #[test]
    fn test_tool_result_without_id_ignored() {
        let input = r#"{"type":"user","message":{"role":"user","content":[{"type":"tool_result","tool_use_id":"","content":"x"}]}}"#;
        let parsed = parse_str(input);
        assert!(parsed.messages[0].tool_results.is_empty());
    }

    #[test]
    fn test_user_text_blocks_are_visible() {
        let input = r#"{"type":"user","message":{"role":"user","content":[{"type":"image","source":{}},{"type":"text","text":"what is this?"}]}}"#;
        let parsed = parse_str(input);
        assert_eq!(parsed.messages[0].content, "what is this?");
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let input = concat!(
            r#"{"type":"user","message":{"role":"user","content":"one"}}"#,
            "\n",
            "{not json\n",
            "\n",
            r#"{"type":"user","message":"not an object"}"#,
            "\n",
            r#"{"type":"user","message":{"role":"user","content":"two"}}"#,
            "\n",
        );
        let parsed = parse_str(input);

        let contents: Vec<&str> = parsed.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["one", "two"]);
        assert_eq!(parsed.warnings.len(), 2);
        assert!(parsed.warnings[0].starts_with("Line 2"));
    }

    #[test]
    fn test_non_conversation_records_dropped() {
        let input = concat!(
            r#"{"type":"file-history-snapshot","snapshot":{}}"#,
            "\n",
            r#"{"type":"queue-operation","operation":"enqueue"}"#,
            "\n",
            r#"{"type":"system","message":{"role":"system","content":"x"}}"#,
            "\n",
        );
        let parsed = parse_str(input);
        assert!(parsed.messages.is_empty());
        assert!(parsed.warnings.is_empty());
    }

    #[test]
    fn test_role_falls_back_to_event_type() {
        let input = r#"{"type":"assistant","message":{"content":"no role field"}}"#;
        let parsed = parse_str(input);
        assert_eq!(parsed.messages[0].role, TurnRole::Assistant);
    }

    #[test]
    fn test_metadata_fields() {
        let input = r#"{"type":"assistant","uuid":"u2","parentUuid":"u1","agentId":"agent-7","isSidechain":true,"slug":"brave-otter","teamName":"alpha","agentName":"reviewer","timestamp":"2025-01-01T10:00:00.000Z","message":{"role":"assistant","content":"hi"}}"#;
        let msg = &parse_str(input).messages[0];
        assert_eq!(msg.uuid.as_deref(), Some("u2"));
        assert_eq!(msg.parent_uuid.as_deref(), Some("u1"));
        assert_eq!(msg.agent_id.as_deref(), Some("agent-7"));
        assert!(msg.is_sidechain);
        assert_eq!(msg.slug.as_deref(), Some("brave-otter"));
        assert_eq!(msg.team_name.as_deref(), Some("alpha"));
        assert_eq!(msg.agent_name.as_deref(), Some("reviewer"));
        assert!(msg.timestamp.is_some());
    }

    #[test]
    fn test_null_parent_and_bad_timestamp() {
        let input = r#"{"type":"user","parentUuid":null,"isSidechain":null,"timestamp":"soon","message":{"role":"user","content":"hi"}}"#;
        let parsed = parse_str(input);
        assert_eq!(parsed.messages.len(), 1);
        assert_eq!(parsed.messages[0].timestamp, None);
        assert_eq!(parsed.messages[0].parent_uuid, None);
        assert_eq!(parsed.warnings.len(), 1);
    }

    #[test]
    fn test_crlf_line_endings() {
        let input = "{\"type\":\"user\",\"message\":{\"role\":\"user\",\"content\":\"hi\"}}\r\n";
        assert_eq!(parse_str(input).messages.len(), 1);
    }

    #[test]
    fn test_oversized_line_is_fatal() {
        let input = format!(
            "{}\n{}\n",
            r#"{"type":"user","message":{"role":"user","content":"ok"}}"#,
            "x".repeat(200)
        );
        let err = parse_log_with_limit(Cursor::new(input.into_bytes()), 100).unwrap_err();
        assert!(matches!(err, Error::LineTooLong { line: 2, limit: 100 }));

        // exactly at the limit is fine
        let line = format!(r#"{{"type":"user","message":{{"role":"user","content":"{}"}}}}"#, "y");
        let limit = line.len();
        let parsed = parse_log_with_limit(Cursor::new(line.into_bytes()), limit).unwrap();
        assert_eq!(parsed.messages.len(), 1);
    }

    #[test]
    fn test_line_limit_excludes_crlf() {
        let line = r#"{"type":"user","message":{"role":"user","content":"crlf"}}"#;
        let limit = line.len();

        let input = format!("{}\r\n{}\r\n", line, line);
        let parsed = parse_log_with_limit(Cursor::new(input.into_bytes()), limit).unwrap();
        assert_eq!(parsed.messages.len(), 2);

        // one content byte over still fails, CRLF or not
        let longer = format!("{} \r\n", line);
        let err = parse_log_with_limit(Cursor::new(longer.into_bytes()), limit).unwrap_err();
        assert!(matches!(err, Error::LineTooLong { line: 1, .. }));
    }
}
