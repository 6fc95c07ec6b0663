//! Redis-style glob patterns (`*`, `?`, `[abc]`, `[^a-z]`, `\x`).
//!
//! Patterns are compiled once to an anchored regex and reused for every
//! match, which matters for `PUBLISH` fan-out over many pattern
//! subscriptions.

use regex::Regex;

/// A compiled glob pattern.
#[derive(Debug, Clone)]
pub struct GlobPattern {
    source: String,
    /// `None` when the pattern does not compile; it then matches only
    /// itself.
    regex: Option<Regex>,
}

impl GlobPattern {
    /// Compile a glob pattern. Malformed classes are treated literally.
    pub fn new(pattern: &str) -> Self {
        Self {
            source: pattern.to_string(),
            regex: Regex::new(&translate(pattern)).ok(),
        }
    }

    /// Whether `text` matches the whole pattern.
    pub fn matches(&self, text: &str) -> bool {
        match &self.regex {
            Some(regex) => regex.is_match(text),
            None => text == self.source,
        }
    }

    /// The original glob text.
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl PartialEq for GlobPattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for GlobPattern {}

fn translate(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 8);
    out.push_str("(?s)^");
    let mut chars = pattern.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '\\' => match chars.next() {
                Some(escaped) => out.push_str(&regex::escape(&escaped.to_string())),
                None => out.push_str(r"\\"),
            },
            '[' => {
                let mut class = String::new();
                let mut closed = false;
                if chars.peek() == Some(&'^') {
                    chars.next();
                    class.push('^');
                }
                while let Some(inner) = chars.next() {
                    match inner {
                        ']' => {
                            closed = true;
                            break;
                        }
                        '\\' => {
                            if let Some(escaped) = chars.next() {
                                class.push_str(&regex::escape(&escaped.to_string()));
                            }
                        }
                        '-' => class.push('-'),
                        other => class.push_str(&regex::escape(&other.to_string())),
                    }
                }
                if closed && !class.is_empty() && class != "^" {
                    out.push('[');
                    out.push_str(&class);
                    out.push(']');
                } else {
                    // Unterminated or empty class: match the text literally.
                    out.push_str(&regex::escape("["));
                    out.push_str(&class.replace('^', r"\^"));
                }
            }
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }

    out.push('$');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn star_matches_any_suffix() {
        let p = GlobPattern::new("news.*");
        assert!(p.matches("news.sports"));
        assert!(p.matches("news."));
        assert!(!p.matches("weather.news"));
    }

    #[test]
    fn question_matches_single_char() {
        let p = GlobPattern::new("h?llo");
        assert!(p.matches("hello"));
        assert!(p.matches("hallo"));
        assert!(!p.matches("heello"));
    }

    #[test]
    fn character_classes() {
        let p = GlobPattern::new("h[ae]llo");
        assert!(p.matches("hello"));
        assert!(!p.matches("hillo"));

        let negated = GlobPattern::new("h[^e]llo");
        assert!(negated.matches("hallo"));
        assert!(!negated.matches("hello"));

        let range = GlobPattern::new("user:[0-9]");
        assert!(range.matches("user:7"));
        assert!(!range.matches("user:x"));
    }

    #[test]
    fn escapes_and_regex_metacharacters_are_literal() {
        assert!(GlobPattern::new(r"a\*b").matches("a*b"));
        assert!(!GlobPattern::new(r"a\*b").matches("axb"));
        assert!(GlobPattern::new("price.(usd)+").matches("price.(usd)+"));
    }

    #[test]
    fn unterminated_class_is_literal() {
        assert!(GlobPattern::new("a[bc").matches("a[bc"));
    }

    #[test]
    fn reversed_range_matches_itself() {
        let p = GlobPattern::new("[z-a]");
        assert!(p.matches("[z-a]"));
        assert!(!p.matches("m"));
    }
}
