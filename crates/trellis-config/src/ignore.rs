//! VCS-style ignore patterns for the project scan.
//!
//! Supported syntax: blank lines and `#` comments are skipped, a trailing
//! `/` restricts the pattern to directories, a leading `/` anchors it to the
//! project root, and `*` matches within a single path segment.

use std::path::Path;

#[derive(Debug, Clone)]
struct Pattern {
    anchored: bool,
    dir_only: bool,
    segments: Vec<String>,
}

/// A parsed set of ignore patterns.
#[derive(Debug, Clone, Default)]
pub struct IgnorePatterns {
    patterns: Vec<Pattern>,
}

impl IgnorePatterns {
    pub fn parse(text: &str) -> Self {
        let patterns = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(|line| {
                let anchored = line.starts_with('/');
                let dir_only = line.ends_with('/');
                let trimmed = line.trim_start_matches('/').trim_end_matches('/');
                Pattern {
                    anchored,
                    dir_only,
                    segments: trimmed.split('/').map(str::to_string).collect(),
                }
            })
            .collect();
        Self { patterns }
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Whether `path` (relative to the project root) is ignored. Matching a
    /// directory ignores its whole subtree.
    pub fn is_ignored(&self, path: &Path, is_dir: bool) -> bool {
        let segments: Vec<&str> = path
            .iter()
            .filter_map(|s| s.to_str())
            .collect();
        if segments.is_empty() {
            return false;
        }
        self.patterns
            .iter()
            .any(|p| pattern_matches(p, &segments, is_dir))
    }
}

fn pattern_matches(pattern: &Pattern, segments: &[&str], is_dir: bool) -> bool {
    let starts: Vec<usize> = if pattern.anchored {
        vec![0]
    } else {
        (0..segments.len()).collect()
    };

    for start in starts {
        let window = &segments[start..];
        if window.len() < pattern.segments.len() {
            continue;
        }
        let matched = pattern
            .segments
            .iter()
            .zip(window.iter())
            .all(|(p, s)| segment_matches(p, s));
        if !matched {
            continue;
        }
        // A full-length match on a file only counts when the pattern is not
        // directory-only; any shorter match means an ancestor directory
        // matched, which ignores the subtree.
        let exact = window.len() == pattern.segments.len();
        if exact && pattern.dir_only && !is_dir {
            continue;
        }
        return true;
    }
    false
}

/// Wildcard match with `*` spanning any run of characters within a segment.
fn segment_matches(pattern: &str, segment: &str) -> bool {
    if !pattern.contains('*') {
        return pattern == segment;
    }
    let parts: Vec<&str> = pattern.split('*').collect();
    let mut remainder = segment;

    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            match remainder.strip_prefix(part) {
                Some(rest) => remainder = rest,
                None => return false,
            }
        } else if i == parts.len() - 1 {
            return remainder.ends_with(part);
        } else {
            match remainder.find(part) {
                Some(pos) => remainder = &remainder[pos + part.len()..],
                None => return false,
            }
        }
    }
    // Trailing `*` (or fully consumed pattern) accepts the rest.
    parts.last().map(|p| p.is_empty()).unwrap_or(false) || remainder.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_plain_name_matches_any_depth() {
        let patterns = IgnorePatterns::parse("node_modules\n");
        assert!(patterns.is_ignored(&PathBuf::from("node_modules"), true));
        assert!(patterns.is_ignored(&PathBuf::from("web/node_modules"), true));
        assert!(!patterns.is_ignored(&PathBuf::from("web/src"), true));
    }

    #[test]
    fn test_anchored_pattern_only_matches_root() {
        let patterns = IgnorePatterns::parse("/dist\n");
        assert!(patterns.is_ignored(&PathBuf::from("dist"), true));
        assert!(!patterns.is_ignored(&PathBuf::from("web/dist"), true));
    }

    #[test]
    fn test_dir_only_pattern_skips_files() {
        let patterns = IgnorePatterns::parse("build/\n");
        assert!(patterns.is_ignored(&PathBuf::from("build"), true));
        assert!(!patterns.is_ignored(&PathBuf::from("build"), false));
    }

    #[test]
    fn test_wildcards_within_segment() {
        let patterns = IgnorePatterns::parse("*.log\ntmp-*\n");
        assert!(patterns.is_ignored(&PathBuf::from("out/server.log"), false));
        assert!(patterns.is_ignored(&PathBuf::from("tmp-cache"), true));
        assert!(!patterns.is_ignored(&PathBuf::from("server.txt"), false));
    }

    #[test]
    fn test_comments_and_blanks_are_skipped() {
        let patterns = IgnorePatterns::parse("# comment\n\nvendor\n");
        assert!(patterns.is_ignored(&PathBuf::from("vendor"), true));
        assert!(!patterns.is_ignored(&PathBuf::from("# comment"), true));
    }

    #[test]
    fn test_multi_segment_pattern() {
        let patterns = IgnorePatterns::parse("docs/generated\n");
        assert!(patterns.is_ignored(&PathBuf::from("docs/generated"), true));
        assert!(patterns.is_ignored(&PathBuf::from("site/docs/generated"), true));
        assert!(!patterns.is_ignored(&PathBuf::from("docs"), true));
    }
}
