//! Include/exclude filename filters
//!
//! Patterns are shell globs matched against the final path component only.
//! A file passes when it matches any include pattern (or no include is
//! given) and matches no exclude pattern.

use glob::{MatchOptions, Pattern};

use crate::error::{Error, Result};

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

#[derive(Debug, Clone, Default)]
pub struct NameFilter {
    includes: Vec<Pattern>,
    excludes: Vec<Pattern>,
}

impl NameFilter {
    /// A filter that passes everything
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from command-line pattern lists
    pub fn from_patterns<I, E>(includes: I, excludes: E) -> Result<Self>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
        E: IntoIterator,
        E::Item: AsRef<str>,
    {
        let mut filter = Self::new();
        for pattern in includes {
            filter = filter.include(pattern.as_ref())?;
        }
        for pattern in excludes {
            filter = filter.exclude(pattern.as_ref())?;
        }
        Ok(filter)
    }

    pub fn include(mut self, pattern: &str) -> Result<Self> {
        self.includes.push(compile(pattern)?);
        Ok(self)
    }

    pub fn exclude(mut self, pattern: &str) -> Result<Self> {
        self.excludes.push(compile(pattern)?);
        Ok(self)
    }

    pub fn is_empty(&self) -> bool {
        self.includes.is_empty() && self.excludes.is_empty()
    }

    /// Test a `/`-separated relative path by its final component
    pub fn matches(&self, relative_path: &str) -> bool {
        let name = super::entry::file_name(relative_path);

        let included = self.includes.is_empty()
            || self
                .includes
                .iter()
                .any(|p| p.matches_with(name, MATCH_OPTIONS));

        included
            && !self
                .excludes
                .iter()
                .any(|p| p.matches_with(name, MATCH_OPTIONS))
    }
}

fn compile(pattern: &str) -> Result<Pattern> {
    let invalid = |reason: String| Error::InvalidFilterPattern {
        pattern: pattern.to_string(),
        reason,
    };

    if pattern.is_empty() {
        return Err(invalid("pattern is empty".into()));
    }
    if pattern.contains('/') || pattern.contains('\\') {
        return Err(invalid(
            "patterns match file names only and must not contain a path separator".into(),
        ));
    }

    // `[^...]` is accepted as a spelling of the glob negation `[!...]`
    let normalized = pattern.replace("[^", "[!");
    Pattern::new(&normalized).map_err(|e| invalid(e.to_string()))
}
