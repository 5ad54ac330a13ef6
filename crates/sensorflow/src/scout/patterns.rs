//! Base-name pattern matching.
//!
//! Patterns are case-sensitive globs applied to the file's base name only.
//! A pattern without glob metacharacters is a substring match.

use globset::{GlobBuilder, GlobMatcher};

const GLOB_META: &[char] = &['*', '?', '[', '{'];

/// Normalize a raw pattern into a glob.
///
/// Rules:
/// - Empty becomes "*" (match all)
/// - No metacharacter: "Cond" becomes "*Cond*" (substring)
/// - Anything else is used as-is
pub fn normalize_name_pattern(raw: &str) -> String {
    let pattern = raw.trim();
    if pattern.is_empty() {
        "*".to_string()
    } else if pattern.contains(GLOB_META) {
        pattern.to_string()
    } else {
        format!("*{}*", pattern)
    }
}

/// Compiled set of name patterns; a name matches if any pattern does.
#[derive(Debug, Clone)]
pub struct NamePatterns {
    matchers: Vec<GlobMatcher>,
}

impl NamePatterns {
    /// Compile patterns. An empty list matches every name.
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, String> {
        let matchers = patterns
            .iter()
            .map(|raw| {
                let glob = normalize_name_pattern(raw.as_ref());
                GlobBuilder::new(&glob)
                    .literal_separator(true)
                    .build()
                    .map(|g| g.compile_matcher())
                    .map_err(|e| format!("invalid name pattern '{}': {}", raw.as_ref(), e))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { matchers })
    }

    pub fn is_match(&self, base_name: &str) -> bool {
        self.matchers.is_empty() || self.matchers.iter().any(|m| m.is_match(base_name))
    }
}
