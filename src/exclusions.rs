//! Path exclusions: configured rules exempting request paths from
//! authentication.

use regex::Regex;

use crate::error::ConfigurationError;

/// A single exclusion pattern, either a literal path or a wildcard.
///
/// Literal patterns (no `*`) match by exact string equality. Wildcard
/// patterns are compiled to an anchored regex with each `*` replaced by
/// `.*`; the rest of the pattern is passed to the regex engine verbatim, so
/// other regex metacharacters keep their regex meaning. In particular a
/// literal `$` in a path must be escaped as `\$` in the pattern; unescaped
/// it acts as an anchor and the exclusion will generally never match.
///
/// Patterns that would exclude every path (`*`, `/*`, `**`, `*/*` and
/// friends) are rejected at construction since they would disable
/// authentication entirely.
#[derive(Debug, Clone)]
pub struct PathExclusion {
    pattern: String,
    matcher: Option<Regex>,
}

impl PathExclusion {
    pub fn new(pattern: &str) -> Result<Self, ConfigurationError> {
        let trimmed = pattern.trim();
        if trimmed.is_empty() {
            return Err(ConfigurationError::Invalid(
                "exclusion pattern cannot be blank".into(),
            ));
        }
        if trimmed.contains('*') && trimmed.chars().all(|c| c == '*' || c == '/') {
            return Err(ConfigurationError::ExcludesEverything {
                pattern: pattern.to_string(),
            });
        }

        let matcher = if trimmed.contains('*') {
            let regex = format!("^{}$", trimmed.replace('*', ".*"));
            Some(Regex::new(&regex).map_err(|e| ConfigurationError::InvalidExclusion {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })?)
        } else {
            None
        };

        Ok(Self {
            pattern: trimmed.to_string(),
            matcher,
        })
    }

    /// Parses a comma-separated list of exclusion patterns, skipping blank
    /// entries. A blank input yields no exclusions.
    pub fn parse_patterns(patterns: &str) -> Result<Vec<PathExclusion>, ConfigurationError> {
        patterns
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(PathExclusion::new)
            .collect()
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn is_wildcard(&self) -> bool {
        self.matcher.is_some()
    }

    /// Whether the given request path is excluded. Blank paths never match.
    pub fn matches(&self, path: &str) -> bool {
        if path.trim().is_empty() {
            return false;
        }
        match &self.matcher {
            Some(regex) => regex.is_match(path),
            None => self.pattern == path,
        }
    }
}

/// Whether any of the configured exclusions matches the given path.
pub fn is_excluded(exclusions: &[PathExclusion], path: &str) -> bool {
    exclusions.iter().any(|e| e.matches(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_patterns_rejected() {
        assert!(PathExclusion::new("").is_err());
        assert!(PathExclusion::new("    ").is_err());
    }

    #[test]
    fn test_unfinished_regex_clause_rejected() {
        assert!(PathExclusion::new("/path(unfinished_regex_clause*").is_err());
    }

    #[test]
    fn test_exclude_all_patterns_rejected() {
        for pattern in ["*", "/*", "*/", "**", "*/*", " * ", "/*/*", "/*/*/*"] {
            let result = PathExclusion::new(pattern);
            assert!(
                matches!(result, Err(ConfigurationError::ExcludesEverything { .. })),
                "pattern {:?} should be rejected as excluding all paths",
                pattern
            );
        }
    }

    #[test]
    fn test_literal_exclusion() {
        let exclusion = PathExclusion::new("/fixed").unwrap();
        assert!(!exclusion.is_wildcard());
        assert_eq!(exclusion.pattern(), "/fixed");

        assert!(exclusion.matches("/fixed"));
        assert!(!exclusion.matches("/fixed-thing"));
        assert!(!exclusion.matches("/other"));

        assert!(!exclusion.matches(""));
        assert!(!exclusion.matches("   "));
    }

    #[test]
    fn test_wildcard_exclusion() {
        let exclusion = PathExclusion::new("/status/*").unwrap();
        assert!(exclusion.is_wildcard());
        assert_eq!(exclusion.pattern(), "/status/*");

        assert!(exclusion.matches("/status/"));
        assert!(exclusion.matches("/status/healthz"));
        assert!(!exclusion.matches("/fixed"));

        assert!(!exclusion.matches(""));
        assert!(!exclusion.matches("   "));
    }

    #[test]
    fn test_unescaped_regex_chars_keep_regex_meaning() {
        // $ acts as an anchor unless escaped, so this never matches
        let exclusion = PathExclusion::new("/$/status/*").unwrap();
        assert!(!exclusion.matches("/$/status/health"));
    }

    #[test]
    fn test_escaped_regex_chars_match_literally() {
        let exclusion = PathExclusion::new("/\\$/status/*").unwrap();
        assert!(exclusion.matches("/$/status/health"));
    }

    #[test]
    fn test_parse_patterns_blank() {
        assert!(PathExclusion::parse_patterns("").unwrap().is_empty());
        assert!(PathExclusion::parse_patterns("    ").unwrap().is_empty());
        assert!(PathExclusion::parse_patterns(",,,").unwrap().is_empty());
        assert!(PathExclusion::parse_patterns(",  ,  ,").unwrap().is_empty());
    }

    #[test]
    fn test_parse_patterns() {
        let exclusions = PathExclusion::parse_patterns("/fixed,/status/*").unwrap();
        assert_eq!(exclusions.len(), 2);
        assert!(!exclusions[0].is_wildcard());
        assert_eq!(exclusions[0].pattern(), "/fixed");
        assert!(exclusions[1].is_wildcard());
        assert_eq!(exclusions[1].pattern(), "/status/*");
    }

    #[test]
    fn test_parse_patterns_skips_empty_entries() {
        let exclusions = PathExclusion::parse_patterns("/fixed,,/status/*,").unwrap();
        assert_eq!(exclusions.len(), 2);
    }

    #[test]
    fn test_parse_patterns_propagates_invalid_entry() {
        assert!(PathExclusion::parse_patterns("/fixed,*").is_err());
    }

    #[test]
    fn test_is_excluded() {
        let exclusions = PathExclusion::parse_patterns("/fixed,/status/*").unwrap();
        assert!(is_excluded(&exclusions, "/fixed"));
        assert!(is_excluded(&exclusions, "/status/healthz"));
        assert!(!is_excluded(&exclusions, "/reads/sample1"));
        assert!(!is_excluded(&[], "/fixed"));
    }
}
