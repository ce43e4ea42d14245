//! Text shaping helpers shared by the parser and the synchronizer.

/// Returns the longest prefix of `s` that fits in `max_bytes` without
/// splitting a UTF-8 character.
pub fn truncate_str(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Truncates `s` to `max_bytes` and appends `suffix`, but only when something was cut.
pub fn truncate_with_suffix(s: &str, max_bytes: usize, suffix: &str) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    let mut out = String::with_capacity(max_bytes + suffix.len());
    out.push_str(truncate_str(s, max_bytes));
    out.push_str(suffix);
    out
}

/// Short display name for a sub-agent without a slug.
///
/// Strips a leading `agent-` and keeps at most 12 characters.
pub fn short_agent_name(agent_id: &str) -> String {
    let trimmed = agent_id.strip_prefix("agent-").unwrap_or(agent_id);
    trimmed.chars().take(12).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate_str("hello", 10), "hello");
        assert_eq!(truncate_str("hello", 3), "hel");
        // "é" is two bytes; cutting at 1 must back off to 0
        assert_eq!(truncate_str("é", 1), "");
        assert_eq!(truncate_str("aé", 2), "a");
    }

    #[test]
    fn test_truncate_with_suffix_only_when_cut() {
        assert_eq!(truncate_with_suffix("short", 10, "..."), "short");
        assert_eq!(truncate_with_suffix("abcdef", 3, "..."), "abc...");
        let long = "x".repeat(1200);
        let out = truncate_with_suffix(&long, 1000, "...(truncated)");
        assert_eq!(out.len(), 1000 + "...(truncated)".len());
    }

    #[test]
    fn test_short_agent_name() {
        assert_eq!(short_agent_name("agent-a1b2c3d4e5f6g7h8"), "a1b2c3d4e5f6");
        assert_eq!(short_agent_name("worker"), "worker");
    }
}
