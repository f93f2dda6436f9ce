//! Subscription patterns, channel names and hierarchical paths.

use std::fmt;
use std::str::FromStr;

/// Namespace token prefixed to every notification channel.
pub const CHANNEL_PREFIX: &str = "smax:";

/// Separator between the levels of a hierarchical name.
pub const PATH_SEPARATOR: char = ':';

/// A validated subscription pattern.
///
/// Either an exact `table:key` path, or a path ending in `*` meaning any key
/// hierarchically under that prefix. Examples: `"rx:temp"`, `"test:swarm*"`.
///
/// # Validation Rules
///
/// - Cannot be empty
/// - Cannot contain whitespace or control characters
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pattern(String);

/// Error returned when creating an invalid pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidPattern {
    /// Pattern cannot be empty.
    Empty,
    /// Pattern contains whitespace or control characters.
    InvalidCharacters { value: String },
}

impl fmt::Display for InvalidPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "subscription pattern cannot be empty"),
            Self::InvalidCharacters { value } => {
                write!(f, "subscription pattern '{value}' contains whitespace or control characters")
            }
        }
    }
}

impl std::error::Error for InvalidPattern {}

impl Pattern {
    /// Creates a new pattern after validation.
    ///
    /// # Errors
    ///
    /// Returns an error if the pattern is invalid.
    pub fn new(value: impl Into<String>) -> Result<Self, InvalidPattern> {
        let value = value.into();

        if value.is_empty() {
            return Err(InvalidPattern::Empty);
        }

        if value.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(InvalidPattern::InvalidCharacters { value });
        }

        Ok(Self(value))
    }

    /// Returns the pattern as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true for patterns routed through the store's pattern primitive.
    #[must_use]
    pub fn is_wildcard(&self) -> bool {
        self.0.ends_with('*')
    }

    /// The store channel (or channel pattern) this subscription listens on.
    #[must_use]
    pub fn channel(&self) -> String {
        format!("{CHANNEL_PREFIX}{}", self.0)
    }

    /// Checks an unprefixed channel name against this pattern with shell-style globbing.
    #[must_use]
    pub fn matches(&self, channel: &str) -> bool {
        glob_match(&self.0, channel)
    }

    /// The `(table, key)` a notification on this pattern should pull.
    ///
    /// Exact patterns name their own variable. Wildcard patterns pull the struct
    /// they cover: `"test:swarm*"` pulls `test:swarm`, and `"test:swarm:*"` pulls
    /// the same struct rather than an empty key. Returns `None` when no table
    /// can be derived.
    #[must_use]
    pub fn pull_target(&self) -> Option<(String, String)> {
        let base = self.0.trim_end_matches('*');
        let base = base.strip_suffix(PATH_SEPARATOR).unwrap_or(base);
        split_path(base)
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Pattern {
    type Err = InvalidPattern;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for Pattern {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Strips the namespace token from a raw channel name.
#[must_use]
pub fn strip_channel_prefix(channel: &str) -> Option<&str> {
    channel.strip_prefix(CHANNEL_PREFIX)
}

/// Splits a full name at its last separator into `(table, key)`.
///
/// Returns `None` when the name has no separator or an empty side.
#[must_use]
pub fn split_path(name: &str) -> Option<(String, String)> {
    let (table, key) = name.rsplit_once(PATH_SEPARATOR)?;
    if table.is_empty() || key.is_empty() {
        return None;
    }
    Some((table.to_string(), key.to_string()))
}

/// Joins non-empty path segments with the separator.
#[must_use]
pub fn join_path<I, S>(segments: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let parts: Vec<String> = segments
        .into_iter()
        .map(|s| s.as_ref().trim_matches(PATH_SEPARATOR).to_string())
        .filter(|s| !s.is_empty())
        .collect();
    parts.join(":")
}

/// Shell-style glob matching as used for channel filtering.
///
/// Supports `*` (any run, including separators), `?` (one character),
/// bracket classes `[abc]`, `[a-z]`, negated `[!abc]` or `[^abc]`, and `\`
/// escapes. An unterminated bracket matches a literal `[`.
#[must_use]
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    let (mut p, mut t) = (0, 0);
    // Position after the most recent `*` and the text index it was tried at.
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() {
            match pattern[p] {
                '*' => {
                    p += 1;
                    backtrack = Some((p, t));
                    continue;
                }
                '?' => {
                    p += 1;
                    t += 1;
                    continue;
                }
                '[' => {
                    if let Some((matched, next)) = match_class(&pattern, p, text[t]) {
                        if matched {
                            p = next;
                            t += 1;
                            continue;
                        }
                    } else if text[t] == '[' {
                        p += 1;
                        t += 1;
                        continue;
                    }
                }
                '\\' if p + 1 < pattern.len() => {
                    if pattern[p + 1] == text[t] {
                        p += 2;
                        t += 1;
                        continue;
                    }
                }
                c => {
                    if c == text[t] {
                        p += 1;
                        t += 1;
                        continue;
                    }
                }
            }
        }
        match backtrack {
            Some((star_p, star_t)) => {
                p = star_p;
                t = star_t + 1;
                backtrack = Some((star_p, star_t + 1));
            }
            None => return false,
        }
    }

    pattern[p..].iter().all(|&c| c == '*')
}

/// Evaluates the bracket class starting at `pattern[start] == '['`.
///
/// Returns whether `c` is in the class and the index after the closing `]`,
/// or `None` when the class is unterminated.
fn match_class(pattern: &[char], start: usize, c: char) -> Option<(bool, usize)> {
    let mut i = start + 1;
    let negated = matches!(pattern.get(i), Some('!' | '^'));
    if negated {
        i += 1;
    }
    let mut matched = false;
    let mut first = true;
    loop {
        let current = *pattern.get(i)?;
        if current == ']' && !first {
            return Some((matched != negated, i + 1));
        }
        first = false;
        let (low, consumed) = if current == '\\' {
            (*pattern.get(i + 1)?, 2)
        } else {
            (current, 1)
        };
        i += consumed;
        if pattern.get(i) == Some(&'-') && pattern.get(i + 1).is_some_and(|&n| n != ']') {
            let high = *pattern.get(i + 1)?;
            i += 2;
            if low <= c && c <= high {
                matched = true;
            }
        } else if low == c {
            matched = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_patterns() {
        assert!(Pattern::new("rx:temp").is_ok());
        assert!(Pattern::new("test:swarm*").is_ok());
        assert!(Pattern::new("*").is_ok());
    }

    #[test]
    fn empty_is_invalid() {
        assert!(matches!(Pattern::new(""), Err(InvalidPattern::Empty)));
    }

    #[test]
    fn whitespace_is_invalid() {
        assert!(matches!(
            Pattern::new("rx: temp"),
            Err(InvalidPattern::InvalidCharacters { .. })
        ));
    }

    #[test]
    fn wildcard_detection_and_channel() -> Result<(), InvalidPattern> {
        let exact: Pattern = "rx:temp".parse()?;
        assert!(!exact.is_wildcard());
        assert_eq!(exact.channel(), "smax:rx:temp");

        let wild: Pattern = "test:swarm*".parse()?;
        assert!(wild.is_wildcard());
        assert_eq!(wild.channel(), "smax:test:swarm*");
        Ok(())
    }

    #[test]
    fn pull_targets() -> Result<(), InvalidPattern> {
        let target = |p: &str| Pattern::new(p).map(|p| p.pull_target());
        assert_eq!(target("rx:temp")?, Some(("rx".into(), "temp".into())));
        assert_eq!(target("test:swarm*")?, Some(("test".into(), "swarm".into())));
        assert_eq!(target("test:swarm:*")?, Some(("test".into(), "swarm".into())));
        assert_eq!(target("a:b:c*")?, Some(("a:b".into(), "c".into())));
        assert_eq!(target("lonely*")?, None);
        Ok(())
    }

    #[test]
    fn glob_literal_and_star() {
        assert!(glob_match("rx:temp", "rx:temp"));
        assert!(!glob_match("rx:temp", "rx:temps"));
        assert!(glob_match("test:swarm*", "test:swarm"));
        assert!(glob_match("test:swarm*", "test:swarm:roach2-03:temp"));
        assert!(!glob_match("test:swarm*", "test:swar"));
        assert!(glob_match("*:temp", "a:b:temp"));
        assert!(glob_match("a*b*c", "a__b__c"));
        assert!(!glob_match("a*b*c", "a__b__d"));
    }

    #[test]
    fn glob_question_and_classes() {
        assert!(glob_match("roach2-0?", "roach2-03"));
        assert!(!glob_match("roach2-0?", "roach2-0"));
        assert!(glob_match("roach2-0[34]", "roach2-04"));
        assert!(!glob_match("roach2-0[34]", "roach2-05"));
        assert!(glob_match("roach2-0[0-9]", "roach2-07"));
        assert!(glob_match("roach2-0[!34]", "roach2-05"));
        assert!(!glob_match("roach2-0[!34]", "roach2-03"));
        assert!(glob_match("x[]]", "x]"));
    }

    #[test]
    fn glob_escapes_and_unterminated_class() {
        assert!(glob_match(r"a\*b", "a*b"));
        assert!(!glob_match(r"a\*b", "axb"));
        assert!(glob_match("a[b", "a[b"));
    }

    #[test]
    fn path_helpers() {
        assert_eq!(split_path("a:b:c"), Some(("a:b".into(), "c".into())));
        assert_eq!(split_path("nokey"), None);
        assert_eq!(split_path("trailing:"), None);
        assert_eq!(join_path(["a", "b:", ":c"]), "a:b:c");
        assert_eq!(join_path(["", "x"]), "x");
        assert_eq!(strip_channel_prefix("smax:a:b"), Some("a:b"));
        assert_eq!(strip_channel_prefix("other:a"), None);
    }
}
