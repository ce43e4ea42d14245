//! Session assembly from a main log and its sub-agent logs
//!
//! Layout under the session root:
//!
//! ```text
//! root/
//! ├── {session_id}.jsonl                 main log
//! └── {session_id}/subagents/*.jsonl     one log per sub-agent
//! ```

use super::log::{parse_log_file, LogParse};
use crate::error::{Error, Result};
use crate::types::{ParsedAgent, ParsedMessage, ParsedSession};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

const LOG_EXTENSION: &str = "jsonl";

/// Path of a session's main log.
pub fn session_log_path(root: &Path, session_id: &str) -> PathBuf {
    root.join(format!("{}.{}", session_id, LOG_EXTENSION))
}

/// Directory holding a session's sub-agent logs.
pub fn subagents_dir(root: &Path, session_id: &str) -> PathBuf {
    root.join(session_id).join("subagents")
}

/// Session ids of every `*.jsonl` file directly under `root`, sorted.
pub fn scan_sessions(root: &Path) -> Result<Vec<String>> {
    let mut sessions = Vec::new();
    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            continue;
        }
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(LOG_EXTENSION) {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            sessions.push(stem.to_string());
        }
    }
    sessions.sort();
    Ok(sessions)
}

/// Widen `range` to cover every known timestamp in `messages`.
fn widen_range(
    range: &mut (Option<DateTime<Utc>>, Option<DateTime<Utc>>),
    messages: &[ParsedMessage],
) {
    for ts in messages.iter().filter_map(|m| m.timestamp) {
        range.0 = Some(range.0.map_or(ts, |start| start.min(ts)));
        range.1 = Some(range.1.map_or(ts, |end| end.max(ts)));
    }
}

fn first_value<'a>(
    messages: &'a [ParsedMessage],
    field: impl Fn(&'a ParsedMessage) -> Option<&'a String>,
) -> Option<String> {
    messages.iter().find_map(field).cloned()
}

/// Display slug used when no log line carries one.
pub fn fallback_slug(session_id: &str) -> String {
    let prefix: String = session_id.chars().take(8).collect();
    format!("session-{}", prefix)
}

/// Parse a session's main log and all of its sub-agent logs.
///
/// A missing main log is [`Error::SessionNotFound`]. A sub-agent log that fails
/// to parse is logged and left out of the result.
pub fn parse_session(root: &Path, session_id: &str) -> Result<ParsedSession> {
    let main_path = session_log_path(root, session_id);
    let LogParse { messages, .. } = parse_log_file(&main_path).map_err(|e| match e {
        Error::Io(io) if io.kind() == std::io::ErrorKind::NotFound => {
            Error::SessionNotFound(session_id.to_string())
        }
        other => other,
    })?;

    let mut range = (None, None);
    widen_range(&mut range, &messages);

    let slug = first_value(&messages, |m| m.slug.as_ref());
    let team_name = first_value(&messages, |m| m.team_name.as_ref());
    let agent_name = first_value(&messages, |m| m.agent_name.as_ref());

    let mut subagents = Vec::new();
    for path in subagent_files(root, session_id)? {
        let parsed = match parse_log_file(&path) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(
                    session_id,
                    path = %path.display(),
                    error = %e,
                    "Skipping unreadable sub-agent log"
                );
                continue;
            }
        };

        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        // The last agent id written in the file wins over the file name
        let agent_id = parsed
            .messages
            .iter()
            .rev()
            .find_map(|m| m.agent_id.clone())
            .unwrap_or(stem);

        widen_range(&mut range, &parsed.messages);

        subagents.push(ParsedAgent {
            agent_id,
            slug: first_value(&parsed.messages, |m| m.slug.as_ref()),
            messages: parsed.messages,
        });
    }

    tracing::debug!(
        session_id,
        messages = messages.len(),
        subagents = subagents.len(),
        "Parsed session"
    );

    Ok(ParsedSession {
        session_id: session_id.to_string(),
        slug: slug.unwrap_or_else(|| fallback_slug(session_id)),
        team_name,
        agent_name,
        messages,
        subagents,
        start: range.0,
        end: range.1,
    })
}

/// Sub-agent log files in sorted order. A missing directory yields none.
fn subagent_files(root: &Path, session_id: &str) -> Result<Vec<PathBuf>> {
    let dir = subagents_dir(root, session_id);
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let pattern = format!(
        "{}/*.{}",
        glob::Pattern::escape(&dir.to_string_lossy()),
        LOG_EXTENSION
    );
    let entries = glob::glob(&pattern).map_err(|e| Error::Parse {
        path: dir.display().to_string(),
        message: format!("Invalid glob pattern: {}", e),
    })?;

    let mut files: Vec<PathBuf> = entries.flatten().filter(|p| p.is_file()).collect();
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::fs;

    fn line(event_type: &str, extra: &str, ts: &str, content: &str) -> String {
        format!(
            r#"{{"type":"{t}",{extra}"timestamp":"{ts}","message":{{"role":"{t}","content":"{content}"}}}}"#,
            t = event_type,
            extra = extra,
            ts = ts,
            content = content,
        )
    }

    fn write_lines(path: &Path, lines: &[String]) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, lines.join("\n") + "\n").unwrap();
    }

    #[test]
    fn test_scan_sessions_ignores_directories_and_other_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b-session.jsonl"), "").unwrap();
        fs::write(dir.path().join("a-session.jsonl"), "").unwrap();
        fs::write(dir.path().join("notes.txt"), "").unwrap();
        fs::create_dir_all(dir.path().join("dir.jsonl")).unwrap();
        fs::create_dir_all(dir.path().join("a-session/subagents")).unwrap();

        let sessions = scan_sessions(dir.path()).unwrap();
        assert_eq!(sessions, vec!["a-session", "b-session"]);
    }

    #[test]
    fn test_scan_missing_root_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            scan_sessions(&dir.path().join("nope")),
            Err(Error::Io(_))
        ));
    }

    #[test]
    fn test_missing_session_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = parse_session(dir.path(), "ghost").unwrap_err();
        assert!(matches!(err, Error::SessionNotFound(id) if id == "ghost"));
    }

    #[test]
    fn test_metadata_and_range_merge() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write_lines(
            &session_log_path(root, "abcdef123456"),
            &[
                line("user", "", "2025-01-01T10:01:00Z", "start"),
                line(
                    "assistant",
                    r#""slug":"brave-otter","teamName":"alpha","agentName":"lead-dev","#,
                    "2025-01-01T10:02:00Z",
                    "ok",
                ),
                line("user", r#""slug":"other-slug","#, "2025-01-01T10:03:00Z", "more"),
            ],
        );
        write_lines(
            &subagents_dir(root, "abcdef123456").join("agent-a1.jsonl"),
            &[
                line("user", r#""agentId":"a1","#, "2025-01-01T09:59:00Z", "task"),
                line(
                    "assistant",
                    r#""agentId":"a1","slug":"quiet-fox","#,
                    "2025-01-01T10:10:00Z",
                    "done",
                ),
            ],
        );

        let session = parse_session(root, "abcdef123456").unwrap();
        assert_eq!(session.slug, "brave-otter");
        assert_eq!(session.team_name.as_deref(), Some("alpha"));
        assert_eq!(session.agent_name.as_deref(), Some("lead-dev"));
        assert_eq!(session.messages.len(), 3);
        assert_eq!(
            session.start,
            Some(Utc.with_ymd_and_hms(2025, 1, 1, 9, 59, 0).unwrap())
        );
        assert_eq!(
            session.end,
            Some(Utc.with_ymd_and_hms(2025, 1, 1, 10, 10, 0).unwrap())
        );

        assert_eq!(session.subagents.len(), 1);
        assert_eq!(session.subagents[0].agent_id, "a1");
        assert_eq!(session.subagents[0].slug.as_deref(), Some("quiet-fox"));
    }

    #[test]
    fn test_agent_id_defaults_to_file_stem() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write_lines(
            &session_log_path(root, "s1"),
            &[line("user", "", "2025-01-01T10:00:00Z", "hi")],
        );
        let sub = subagents_dir(root, "s1");
        write_lines(
            &sub.join("agent-zz.jsonl"),
            &[line("user", "", "2025-01-01T10:00:00Z", "x")],
        );
        write_lines(
            &sub.join("agent-aa.jsonl"),
            &[line("user", "", "2025-01-01T10:00:00Z", "y")],
        );
        fs::write(sub.join("readme.md"), "ignored").unwrap();

        let session = parse_session(root, "s1").unwrap();
        let ids: Vec<&str> = session
            .subagents
            .iter()
            .map(|a| a.agent_id.as_str())
            .collect();
        assert_eq!(ids, vec!["agent-aa", "agent-zz"]);
    }

    #[test]
    fn test_fallback_slug() {
        assert_eq!(fallback_slug("0123456789abcdef"), "session-01234567");
        assert_eq!(fallback_slug("short"), "session-short");

        let dir = tempfile::tempdir().unwrap();
        write_lines(
            &session_log_path(dir.path(), "0123456789abcdef"),
            &[line("user", "", "", "hi")],
        );
        let session = parse_session(dir.path(), "0123456789abcdef").unwrap();
        assert_eq!(session.slug, "session-01234567");
        assert_eq!(session.start, None);
        assert_eq!(session.end, None);
    }

    #[test]
    fn test_non_file_entries_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write_lines(
            &session_log_path(root, "s2"),
            &[line("user", "", "2025-01-01T10:00:00Z", "hi")],
        );
        fs::create_dir_all(subagents_dir(root, "s2").join("agent-dir.jsonl")).unwrap();
        write_lines(
            &subagents_dir(root, "s2").join("agent-ok.jsonl"),
            &[line("user", "", "2025-01-01T10:00:00Z", "fine")],
        );

        let session = parse_session(root, "s2").unwrap();
        assert_eq!(session.subagents.len(), 1);
        assert_eq!(session.subagents[0].agent_id, "agent-ok");
    }
}
