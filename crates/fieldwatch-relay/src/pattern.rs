//! Channel patterns and the relay allow-list.
//!
//! Subscription patterns use the familiar pub/sub glob syntax:
//!
//! - `*` matches any run of characters, including none
//! - `?` matches exactly one character
//! - `[abc]`, `[a-z]` and `[^abc]` match one character from (or outside) a set
//! - `\x` matches `x` literally

use regex::Regex;

use crate::error::Error;

/// Compile a glob pattern into an anchored regex.
pub fn glob_to_regex(pattern: &str) -> Result<Regex, Error> {
    let mut out = String::with_capacity(pattern.len() * 2 + 2);
    out.push('^');

    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '\\' => match chars.next() {
                Some(escaped) => push_literal(&mut out, escaped),
                None => push_literal(&mut out, '\\'),
            },
            '[' => {
                let mut class = String::from("[");
                let mut closed = false;
                let mut first = true;
                while let Some(c) = chars.next() {
                    match c {
                        ']' if !first => {
                            closed = true;
                            break;
                        }
                        '^' if first => class.push('^'),
                        '\\' => {
                            let escaped = chars.next().unwrap_or('\\');
                            push_class_char(&mut class, escaped);
                        }
                        '-' => class.push('-'),
                        other => push_class_char(&mut class, other),
                    }
                    first = false;
                }
                if !closed {
                    return Err(Error::Config(format!(
                        "unterminated character class in pattern {:?}",
                        pattern
                    )));
                }
                class.push(']');
                out.push_str(&class);
            }
            other => push_literal(&mut out, other),
        }
    }

    out.push('$');
    Regex::new(&out).map_err(|e| Error::Config(format!("invalid pattern {:?}: {}", pattern, e)))
}

/// The literal part of `pattern` before its first wildcard.
pub fn literal_prefix(pattern: &str) -> &str {
    let end = pattern
        .find(&['*', '?', '[', '\\'][..])
        .unwrap_or(pattern.len());
    &pattern[..end]
}

/// Check if `pattern` contains no wildcard at all.
pub fn is_literal(pattern: &str) -> bool {
    literal_prefix(pattern).len() == pattern.len()
}

fn push_literal(out: &mut String, c: char) {
    let mut buf = [0u8; 4];
    out.push_str(&regex::escape(c.encode_utf8(&mut buf)));
}

fn push_class_char(class: &mut String, c: char) {
    if matches!(c, '\\' | '[' | ']' | '^' | '&' | '~' | '-') {
        class.push('\\');
    }
    class.push(c);
}

/// One entry of the relay allow-list.
#[derive(Debug, Clone)]
pub enum RelayFilter {
    /// Event name must match exactly.
    Exact(String),
    /// Event name must match the regex.
    Pattern(Regex),
}

impl RelayFilter {
    /// Exact-name entry.
    pub fn exact(name: impl Into<String>) -> Self {
        RelayFilter::Exact(name.into())
    }

    /// Regex entry.
    pub fn pattern(regex: &str) -> Result<Self, Error> {
        Regex::new(regex)
            .map(RelayFilter::Pattern)
            .map_err(|e| Error::Config(format!("invalid allow-list regex {:?}: {}", regex, e)))
    }

    /// Check if an event name passes this entry.
    pub fn matches(&self, name: &str) -> bool {
        match self {
            RelayFilter::Exact(exact) => exact == name,
            RelayFilter::Pattern(regex) => regex.is_match(name),
        }
    }
}

/// Matches every field event (`updated:<path>`).
pub const FIELD_EVENT_PATTERN: &str = "^updated:.+$";

/// The allow-list used when none is configured.
pub fn default_allow_list() -> Vec<RelayFilter> {
    let field_events = Regex::new(FIELD_EVENT_PATTERN).map(RelayFilter::Pattern);
    let mut list = vec![RelayFilter::exact("created"), RelayFilter::exact("updated")];
    // The constant pattern always compiles.
    if let Ok(filter) = field_events {
        list.push(filter);
    }
    list.push(RelayFilter::exact("removed"));
    list
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(pattern: &str, channel: &str) -> bool {
        glob_to_regex(pattern).unwrap().is_match(channel)
    }

    #[test]
    fn test_star_and_question_mark() {
        assert!(matches("BlogPost.*", "BlogPost.updated:content.k"));
        assert!(matches("BlogPost.*", "BlogPost."));
        assert!(!matches("BlogPost.*", "Comment.created"));
        assert!(matches("*.created", "Comment.created"));
        assert!(matches("Post.remove?", "Post.removed"));
        assert!(!matches("Post.remove?", "Post.remove"));
    }

    #[test]
    fn test_dots_are_literal() {
        assert!(matches("a.b", "a.b"));
        assert!(!matches("a.b", "axb"));
        assert!(matches("Post.updated:content.k", "Post.updated:content.k"));
    }

    #[test]
    fn test_character_classes() {
        assert!(matches("h[ae]llo", "hello"));
        assert!(matches("h[ae]llo", "hallo"));
        assert!(!matches("h[ae]llo", "hillo"));
        assert!(matches("h[^e]llo", "hallo"));
        assert!(!matches("h[^e]llo", "hello"));
        assert!(matches("h[a-c]llo", "hbllo"));
        assert!(matches("x[]]", "x]"));
    }

    #[test]
    fn test_escapes() {
        assert!(matches(r"Post.\*", "Post.*"));
        assert!(!matches(r"Post.\*", "Post.created"));
        assert!(matches(r"what\?", "what?"));
    }

    #[test]
    fn test_unterminated_class() {
        assert!(matches!(glob_to_regex("a[bc"), Err(Error::Config(_))));
    }

    #[test]
    fn test_literal_prefix() {
        assert_eq!(literal_prefix("BlogPost.*"), "BlogPost.");
        assert_eq!(literal_prefix("*"), "");
        assert_eq!(literal_prefix("Post.created"), "Post.created");
        assert_eq!(literal_prefix(r"a\*b"), "a");
        assert!(is_literal("Post.created"));
        assert!(!is_literal("Post.?"));
    }

    #[test]
    fn test_default_allow_list() {
        let list = default_allow_list();
        let allowed = |name: &str| list.iter().any(|f| f.matches(name));

        assert!(allowed("created"));
        assert!(allowed("updated"));
        assert!(allowed("updated:content.k"));
        assert!(allowed("removed"));
        assert!(!allowed("updated:"));
        assert!(!allowed("saved"));
    }
}
