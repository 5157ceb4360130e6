//! Route rules: which rendered pages opt into incremental (ISR) caching.
//!
//! Rules reuse the router's pattern syntax: exact paths (`/about`), named
//! captures (`/pkg/:name`) and prefix wildcards (`/pkg/*`).

use super::Pattern;

/// Resolves whether the route serving a path has cache/ISR behavior enabled.
pub trait RouteRules: Send + Sync {
    /// Returns `true` when full-page renders of `path` may seed the payload cache.
    fn is_cacheable(&self, path: &str) -> bool;
}

/// Ordered table of ISR-enabled route patterns.
///
/// # Examples
///
/// ```
/// use payload_gate::router::{RouteRuleTable, RouteRules};
///
/// let rules = RouteRuleTable::new().isr("/pkg/*").isr("/");
/// assert!(rules.is_cacheable("/pkg/vue"));
/// assert!(rules.is_cacheable("/"));
/// assert!(!rules.is_cacheable("/search"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct RouteRuleTable {
    isr: Vec<Pattern>,
}

impl RouteRuleTable {
    /// Creates a table where no route is cacheable.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks routes matching `pattern` as ISR-enabled.
    #[must_use]
    pub fn isr(mut self, pattern: &str) -> Self {
        self.isr.push(Pattern::parse(pattern));
        self
    }

    /// Builds a table from a list of patterns, typically loaded from settings.
    pub fn from_patterns<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        patterns
            .into_iter()
            .fold(Self::new(), |table, pattern| table.isr(pattern.as_ref()))
    }

    /// Number of registered patterns.
    pub fn len(&self) -> usize {
        self.isr.len()
    }

    pub fn is_empty(&self) -> bool {
        self.isr.is_empty()
    }
}

impl RouteRules for RouteRuleTable {
    fn is_cacheable(&self, path: &str) -> bool {
        self.isr.iter().any(|pattern| pattern.matches(path).is_some())
    }
}
