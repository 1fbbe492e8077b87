//! Per-session tool cache.
//!
//! Built once from a discovery result and never mutated afterwards; the
//! client swaps in a fresh cache on reconnect and an empty one when the
//! session ends. Lookups are lock-free reads through an `Arc`.

use std::collections::HashMap;
use std::sync::Arc;

use super::types::{ToolDescriptor, ToolListing};
use crate::codegen::validate_snapshot;
use crate::errors::ClientError;
use crate::schema::{NormalizationTable, TypeNode};

/// Similarity floor below which a name is not offered as a suggestion.
const SUGGESTION_FLOOR: f64 = 0.3;

/// Maximum suggestions attached to a `ToolNotFound` error.
const MAX_SUGGESTIONS: usize = 3;

/// A cached tool plus its parameter type in canonical field names.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedTool {
    pub descriptor: ToolDescriptor,
    /// `descriptor.params` with field names normalised, checked against
    /// normalised call arguments.
    pub wire_params: TypeNode,
}

/// Discovered tools for one session, in server order.
#[derive(Debug, Default)]
pub struct ToolCache {
    order: Vec<String>,
    tools: HashMap<String, Arc<CachedTool>>,
    /// Tools the server advertised whose schemas could not be modelled.
    rejected: HashMap<String, ClientError>,
}

impl ToolCache {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Infer every tool. A tool that is malformed, fails inference or fails
    /// snapshot validation is recorded as rejected; the rest stay usable.
    /// Duplicate names keep the first readable definition.
    pub fn populate(server: &str, listing: ToolListing, table: &NormalizationTable) -> Self {
        let mut cache = Self::default();
        for def in listing.tools {
            let name = def.name.clone();
            if cache.tools.contains_key(&name) || cache.rejected.contains_key(&name) {
                tracing::warn!(server, tool = %name, "duplicate tool definition ignored");
                continue;
            }

            let checked = ToolDescriptor::from_definition(def).and_then(|descriptor| {
                validate_snapshot(std::slice::from_ref(&descriptor))?;
                Ok(descriptor)
            });
            match checked {
                Ok(descriptor) => {
                    let wire_params = table.normalize_type(&descriptor.params);
                    cache.order.push(name.clone());
                    cache.tools.insert(
                        name,
                        Arc::new(CachedTool {
                            descriptor,
                            wire_params,
                        }),
                    );
                }
                Err(e) => {
                    tracing::warn!(server, tool = %name, error = %e, "tool rejected");
                    cache.rejected.insert(name, e);
                }
            }
        }
        for (name, e) in listing.malformed {
            if cache.tools.contains_key(&name) || cache.rejected.contains_key(&name) {
                continue;
            }
            tracing::warn!(server, tool = %name, error = %e, "malformed tool definition rejected");
            cache.rejected.insert(name, e);
        }
        tracing::info!(
            server,
            tools = cache.tools.len(),
            rejected = cache.rejected.len(),
            "tool cache populated"
        );
        cache
    }

    pub fn get(&self, name: &str) -> Option<Arc<CachedTool>> {
        self.tools.get(name).cloned()
    }

    /// Resolve a tool for a call. Rejected tools yield their recorded
    /// error; unknown names yield `ToolNotFound` with suggestions.
    pub fn lookup(&self, name: &str) -> Result<Arc<CachedTool>, ClientError> {
        if let Some(tool) = self.get(name) {
            return Ok(tool);
        }
        if let Some(err) = self.rejected.get(name) {
            return Err(err.clone());
        }
        Err(ClientError::ToolNotFound {
            tool: name.to_string(),
            suggestions: self.find_similar(name, MAX_SUGGESTIONS),
        })
    }

    /// Usable descriptors in discovery order.
    pub fn list(&self) -> Vec<ToolDescriptor> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| tool.descriptor.clone())
            .collect()
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.order.iter().map(String::as_str).collect()
    }

    /// Rejected tools and why, sorted by name.
    pub fn rejected(&self) -> Vec<(&str, &ClientError)> {
        let mut out: Vec<_> = self.rejected.iter().map(|(n, e)| (n.as_str(), e)).collect();
        out.sort_by_key(|(name, _)| *name);
        out
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Up to `max_results` usable or rejected tool names similar to `name`,
    /// best first. Ties keep discovery order.
    pub fn find_similar(&self, name: &str, max_results: usize) -> Vec<String> {
        let mut rejected: Vec<&String> = self.rejected.keys().collect();
        rejected.sort();

        let mut scored: Vec<(&String, f64)> = self
            .order
            .iter()
            .chain(rejected)
            .map(|candidate| (candidate, similarity(name, candidate)))
            .filter(|(_, score)| *score > SUGGESTION_FLOOR)
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(max_results);
        scored.into_iter().map(|(name, _)| name.clone()).collect()
    }
}

// ─── Edit Distance ──────────────────────────────────────────────────────────

/// Levenshtein distance over bytes, single-row DP.
fn levenshtein(a: &str, b: &str) -> usize {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];

    for i in 1..=a.len() {
        curr[0] = i;
        for j in 1..=b.len() {
            let cost = usize::from(a[i - 1] != b[j - 1]);
            curr[j] = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// 1.0 for identical strings, 0.0 for nothing in common.
fn similarity(a: &str, b: &str) -> f64 {
    let max_len = a.len().max(b.len());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - (levenshtein(a, b) as f64 / max_len as f64)
}

// ─── Tests ───────────────────────────────────────────────────────────────────
