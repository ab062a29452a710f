//! # Path Pattern Matching
//!
//! Glob patterns compiled into anchored regular expressions.
//!
//! ## Pattern Semantics
//!
//! | Token | Matches |
//! |-------|---------|
//! | `**` | anything, across any number of segments (including none) |
//! | `**/` | zero or more leading directories |
//! | `/**` (trailing) | the directory itself or anything below it |
//! | `*` | anything within a single segment |
//! | `?` | one non-separator character |
//! | other | itself, literally |
//!
//! Paths are normalized before matching: backslashes become `/`, empty and
//! `.` segments are dropped and `..` pops the previous segment. A request
//! for `/src/../etc/passwd` is therefore matched as `/etc/passwd`.
//!
//! ## Example
//!
//! ```rust
//! use warden_auth::pattern::match_path;
//!
//! assert!(match_path("/src/index.js", &["/src/**"]));
//! assert!(!match_path("/etc/passwd", &["/src/**"]));
//! assert!(match_path("/anything", &["**"]));
//! ```

use regex::Regex;

use crate::error::{AuthError, Result};

/// A compiled, anchored path pattern.
#[derive(Debug, Clone)]
pub struct PathPattern {
    source: String,
    regex: Regex,
}

impl PathPattern {
    /// Compiles a glob pattern.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidPattern` for an empty pattern or one whose
    /// translation is rejected by the regex engine.
    pub fn compile(pattern: &str) -> Result<Self> {
        let source = pattern.trim().replace('\\', "/");
        if source.is_empty() {
            return Err(AuthError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: "pattern is empty".to_string(),
            });
        }

        let regex = Regex::new(&glob_to_regex(&source)).map_err(|e| AuthError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self { source, regex })
    }

    /// The pattern as written (separators normalized).
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Tests an already-normalized path.
    #[must_use]
    pub fn matches_normalized(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }

    /// Normalizes `path` and tests it.
    #[must_use]
    pub fn matches(&self, path: &str) -> bool {
        self.matches_normalized(&normalize_path(path))
    }
}

impl std::fmt::Display for PathPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.source)
    }
}

/// Lexically normalizes a resource path.
///
/// Absolute paths stay absolute. `..` at the root is dropped rather than
/// escaping it.
#[must_use]
pub fn normalize_path(path: &str) -> String {
    let unified = path.replace('\\', "/");
    let absolute = unified.starts_with('/');

    let mut segments: Vec<&str> = Vec::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }

    let joined = segments.join("/");
    if absolute {
        format!("/{}", joined)
    } else {
        joined
    }
}

/// Returns true if `path` matches any of `patterns`.
///
/// Patterns that fail to compile never match.
#[must_use]
pub fn match_path<S: AsRef<str>>(path: &str, patterns: &[S]) -> bool {
    let normalized = normalize_path(path);
    patterns.iter().any(|pattern| {
        PathPattern::compile(pattern.as_ref())
            .map(|compiled| compiled.matches_normalized(&normalized))
            .unwrap_or(false)
    })
}

/// Translates a glob into an anchored regex source string.
fn glob_to_regex(glob: &str) -> String {
    let chars: Vec<char> = glob.chars().collect();
    let mut out = String::with_capacity(glob.len() * 2 + 2);
    out.push('^');

    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            // A trailing `/**` also matches the directory itself.
            '/' if chars[i + 1..].iter().all(|c| *c == '*') && chars.len() - i > 2 => {
                out.push_str("(?:/.*)?");
                break;
            }
            '*' if chars.get(i + 1) == Some(&'*') => {
                // Collapse runs like `***` into a single `**`.
                let mut j = i + 2;
                while chars.get(j) == Some(&'*') {
                    j += 1;
                }
                if chars.get(j) == Some(&'/') {
                    out.push_str("(?:.*/)?");
                    i = j + 1;
                } else {
                    out.push_str(".*");
                    i = j;
                }
            }
            '*' => {
                out.push_str("[^/]*");
                i += 1;
            }
            '?' => {
                out.push_str("[^/]");
                i += 1;
            }
            c => {
                let mut buf = [0u8; 4];
                out.push_str(&regex::escape(c.encode_utf8(&mut buf)));
                i += 1;
            }
        }
    }

    out.push('$');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_cases() {
        assert!(match_path("/src/index.js", &["/src/**"]));
        assert!(!match_path("/etc/passwd", &["/src/**"]));
        assert!(match_path("/anything", &["**"]));
    }

    #[test]
    fn test_double_star_spans_segments() {
        let pattern = PathPattern::compile("/src/**").unwrap();
        assert!(pattern.matches("/src/a/b/c/d.rs"));
        assert!(pattern.matches("/src/"));
        assert!(pattern.matches("/src"));
        assert!(!pattern.matches("/srcx/a"));
    }

    #[test]
    fn test_single_star_stays_in_segment() {
        let pattern = PathPattern::compile("/src/*.rs").unwrap();
        assert!(pattern.matches("/src/lib.rs"));
        assert!(!pattern.matches("/src/nested/lib.rs"));
        assert!(!pattern.matches("/src/lib.rs.bak"));
    }

    #[test]
    fn test_leading_globstar_matches_zero_dirs() {
        let pattern = PathPattern::compile("**/tests/**").unwrap();
        assert!(pattern.matches("tests/a.rs"));
        assert!(pattern.matches("/tests/a.rs"));
        assert!(pattern.matches("/home/dev/project/tests/unit/a.rs"));
        assert!(!pattern.matches("/home/dev/project/src/a.rs"));
    }

    #[test]
    fn test_question_mark() {
        let pattern = PathPattern::compile("/logs/day?.txt").unwrap();
        assert!(pattern.matches("/logs/day1.txt"));
        assert!(!pattern.matches("/logs/day10.txt"));
        assert!(!pattern.matches("/logs/day/.txt"));
    }

    #[test]
    fn test_literals_are_escaped() {
        let pattern = PathPattern::compile("/a+b/(c).txt").unwrap();
        assert!(pattern.matches("/a+b/(c).txt"));
        assert!(!pattern.matches("/aab/c.txt"));
    }

    #[test]
    fn test_backslashes_normalized() {
        assert!(match_path("\\src\\main.rs", &["/src/**"]));
        assert!(match_path("/src/main.rs", &["\\src\\**"]));
    }

    #[test]
    fn test_traversal_resolved_before_matching() {
        assert_eq!(normalize_path("/src/../etc/passwd"), "/etc/passwd");
        assert!(!match_path("/src/../etc/passwd", &["/src/**"]));
        assert_eq!(normalize_path("/../../x"), "/x");
        assert_eq!(normalize_path("a/./b//c/"), "a/b/c");
    }

    #[test]
    fn test_empty_pattern_rejected() {
        assert!(PathPattern::compile("  ").is_err());
        assert!(!match_path("/x", &[""]));
    }
}
