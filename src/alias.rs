//! Mapping of raw host/device strings onto canonical device names.

use regex::{Regex, RegexBuilder};

use crate::error::{Error, Result};

/// One alias group: element 0 is the canonical name, every element
/// (the canonical name included) is a pattern.
#[derive(Debug, Clone)]
struct AliasGroup {
    canonical: String,
    patterns: Vec<Regex>,
}

impl AliasGroup {
    fn matches(&self, raw: &str) -> bool {
        self.patterns.iter().any(|re| re.is_match(raw))
    }
}

/// Ordered alias table.
///
/// Resolution scans every group and the **last** matching group in table
/// order wins. Groups are not short-circuited, so a later, more specific
/// group overrides an earlier catch-all.
#[derive(Debug, Clone, Default)]
pub struct AliasTable {
    groups: Vec<AliasGroup>,
}

fn compile(pattern: &str) -> Result<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .or_else(|_| {
            RegexBuilder::new(&regex::escape(pattern))
                .case_insensitive(true)
                .build()
        })
        .map_err(|e| Error::InvalidPattern(format!("{pattern:?}: {e}")))
}

impl AliasTable {
    /// Builds the table from alias groups as loaded from configuration.
    /// Empty groups are ignored. Patterns that are not valid regular
    /// expressions match as literal substrings.
    pub fn new(groups: &[Vec<String>]) -> Result<Self> {
        let mut compiled = Vec::with_capacity(groups.len());
        for group in groups {
            let Some(canonical) = group.first() else {
                continue;
            };
            let patterns = group
                .iter()
                .map(|p| compile(p))
                .collect::<Result<Vec<_>>>()?;
            compiled.push(AliasGroup {
                canonical: canonical.clone(),
                patterns,
            });
        }
        Ok(Self { groups: compiled })
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Canonical device names in table order.
    pub fn canonical_names(&self) -> impl Iterator<Item = &str> {
        self.groups.iter().map(|g| g.canonical.as_str())
    }

    /// Resolves `raw` to a canonical device name (last match wins).
    pub fn resolve(&self, raw: &str) -> Option<&str> {
        self.groups
            .iter()
            .rev()
            .find(|g| g.matches(raw))
            .map(|g| g.canonical.as_str())
    }
}
