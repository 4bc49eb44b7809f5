//! Request matching logic.
//!
//! Matches incoming requests against the configured resources. Resources
//! are evaluated in order and the first one whose constraints all hold
//! wins; there is no scoring or priority.

use crate::config::{Config, Resource};
use crate::glob::{GlobExpression, GlobMap};
use crate::request::RequestDescriptor;

/// Index of the first resource matching `request`, if any.
pub fn evaluate(resources: &[Resource], request: &RequestDescriptor) -> Option<usize> {
    resources
        .iter()
        .position(|resource| matches_resource(resource, request))
}

impl Config {
    /// Index of the first resource matching `request`, if any.
    pub fn match_request(&self, request: &RequestDescriptor) -> Option<usize> {
        evaluate(&self.resources, request)
    }
}

/// Whether `request` satisfies every constraint of `resource`.
pub fn matches_resource(resource: &Resource, request: &RequestDescriptor) -> bool {
    // Check method
    let method = request.method();
    if !resource.methods.is_empty() && !resource.methods.iter().any(|m| m.as_str() == method) {
        return false;
    }

    // Check path
    if !resource.path.is_match(request.path()) {
        return false;
    }

    matches_multimap(&resource.headers, request.headers())
        && matches_multimap(&resource.query, request.query())
}

/// Every actual entry whose name matches a configured name glob must carry
/// exactly as many values as configured, each matching positionally.
/// Entries no name glob mentions are unconstrained.
fn matches_multimap(
    expected: &GlobMap<Vec<GlobExpression>>,
    actual: &[(String, Vec<String>)],
) -> bool {
    expected.iter().all(|(name, patterns)| {
        actual
            .iter()
            .filter(|(actual_name, _)| name.is_match(actual_name))
            .all(|(_, values)| matches_values(patterns, values))
    })
}

fn matches_values(patterns: &[GlobExpression], values: &[String]) -> bool {
    patterns.len() == values.len()
        && patterns
            .iter()
            .zip(values)
            .all(|(pattern, value)| pattern.is_match(value))
}
