//! Sanitization for model-generated text that is echoed back into prompts
//!
//! The vision model's free-text notes are stored in assistant messages, and
//! those messages are replayed to the chat model as history.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// Pattern to detect potential LLM instruction keywords
    static ref INJECTION_PATTERNS: Regex = Regex::new(
        r"(?i)(ignore\s+previous|system:|assistant:|user:|<\|.*?\|>|```|human:|forget\s+all|disregard|new\s+instructions?|忽略(之前|以上|上述)的?(指令|内容|要求)?)"
    ).expect("Failed to compile INJECTION_PATTERNS regex - this is a bug in the hardcoded pattern");

    /// Pattern to detect excessive special characters that might break prompt structure
    static ref EXCESSIVE_SPECIAL_CHARS: Regex = Regex::new(
        r"[{}\[\]<>]{5,}"
    ).expect("Failed to compile EXCESSIVE_SPECIAL_CHARS regex - this is a bug in the hardcoded pattern");
}

/// Longest vision note kept in a summary message
pub const MAX_RATIONALE_CHARS: usize = 300;

/// Strip instruction-like fragments, collapse whitespace and cap the length
/// at `max_chars` characters (not bytes).
pub fn sanitize_text(input: &str, max_chars: usize) -> String {
    let filtered = INJECTION_PATTERNS.replace_all(input, "[filtered]");
    let filtered = EXCESSIVE_SPECIAL_CHARS.replace_all(&filtered, "[chars]");

    let normalized = filtered.split_whitespace().collect::<Vec<_>>().join(" ");

    if normalized.chars().count() <= max_chars {
        return normalized;
    }

    let mut truncated: String = normalized
        .chars()
        .take(max_chars.saturating_sub(3))
        .collect();
    truncated.push_str("...");
    truncated
}
