//! # Route Table
//!
//! Prefix-based path resolution. Policies match on whole path segments
//! (`/api/content` matches `/api/content` and `/api/content/...`, never
//! `/api/contentious`), and when several prefixes could apply the longest
//! one wins. Two distinct prefixes of equal length cannot both match the
//! same path at a segment boundary, so the longest-prefix rule is a total,
//! deterministic tie-break.
//!
//! Matching also produces the rewritten upstream path: the matched prefix
//! is stripped, and a path equal to the prefix becomes `/`.

use crate::core::types::RoutePolicy;

/// A successful path resolution: the winning policy and the path to send
/// upstream.
#[derive(Debug)]
pub struct RouteMatch<'a> {
    pub policy: &'a RoutePolicy,
    pub rewritten_path: String,
}

/// Immutable, ordered collection of route policies.
#[derive(Debug, Clone)]
pub struct RouteTable {
    policies: Vec<RoutePolicy>,
}

impl RouteTable {
    /// Build a table from configured policies.
    pub fn new(mut policies: Vec<RoutePolicy>) -> Self {
        // Longest prefix first, so the first boundary match is the winner.
        policies.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));
        Self { policies }
    }

    /// Resolve a request path to a policy, or `None` when no prefix matches.
    pub fn match_path(&self, path: &str) -> Option<RouteMatch<'_>> {
        self.policies.iter().find_map(|policy| {
            let rest = path.strip_prefix(&policy.prefix)?;
            if !rest.is_empty() && !rest.starts_with('/') {
                return None;
            }

            let rewritten_path = if rest.is_empty() {
                "/".to_string()
            } else {
                rest.to_string()
            };

            Some(RouteMatch {
                policy,
                rewritten_path,
            })
        })
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}
