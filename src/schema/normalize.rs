//! Field-name normalization between an external dotted lower-case convention
//! (`system.assignedTo`) and the canonical upstream form (`System.AssignedTo`).
//!
//! Each rule maps an external namespace prefix to its canonical spelling.
//! The remaining dotted segments switch the case of their first letter.
//! When several prefixes match, the longest wins, and a name is rewritten by
//! at most one rule per pass. Arguments whose keys would merge are rejected;
//! response keys that would merge are left as sent.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::inference::join_path;
use super::types::TypeNode;
use crate::errors::ClientError;

/// One prefix mapping, e.g. `microsoft.vsts.common.` → `Microsoft.VSTS.Common.`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizationRule {
    pub external: String,
    pub canonical: String,
}

impl NormalizationRule {
    pub fn new(external: &str, canonical: &str) -> Self {
        Self {
            external: external.to_string(),
            canonical: canonical.to_string(),
        }
    }
}

/// Built-in rules for the work-item reference-name convention.
pub fn default_rules() -> Vec<NormalizationRule> {
    vec![
        NormalizationRule::new("system.", "System."),
        NormalizationRule::new("microsoft.vsts.common.", "Microsoft.VSTS.Common."),
        NormalizationRule::new("microsoft.vsts.scheduling.", "Microsoft.VSTS.Scheduling."),
        NormalizationRule::new("microsoft.", "Microsoft."),
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    ToCanonical,
    ToExternal,
}

impl Direction {
    fn sides(self, rule: &NormalizationRule) -> (&str, &str) {
        match self {
            Direction::ToCanonical => (&rule.external, &rule.canonical),
            Direction::ToExternal => (&rule.canonical, &rule.external),
        }
    }

    fn reverse(self) -> Self {
        match self {
            Direction::ToCanonical => Direction::ToExternal,
            Direction::ToExternal => Direction::ToCanonical,
        }
    }
}

// ─── NormalizationTable ──────────────────────────────────────────────────────

/// Read-only rule table shared across clients.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizationTable {
    rules: Vec<NormalizationRule>,
}

impl NormalizationTable {
    /// Build a table, rejecting malformed or duplicate prefixes.
    pub fn new(rules: Vec<NormalizationRule>) -> Result<Self, ClientError> {
        for (i, rule) in rules.iter().enumerate() {
            for prefix in [&rule.external, &rule.canonical] {
                if prefix.len() < 2 || !prefix.ends_with('.') {
                    return Err(ClientError::Config {
                        reason: format!(
                            "normalization prefix '{prefix}' must be a non-empty namespace ending in '.'"
                        ),
                    });
                }
            }
            if rules[..i].iter().any(|r| r.external == rule.external) {
                return Err(ClientError::Config {
                    reason: format!("duplicate normalization prefix '{}'", rule.external),
                });
            }
        }
        Ok(Self { rules })
    }

    /// A table that rewrites nothing.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The built-in work-item rules from [`default_rules`].
    pub fn standard() -> Self {
        Self {
            rules: default_rules(),
        }
    }

    pub fn rules(&self) -> &[NormalizationRule] {
        &self.rules
    }

    /// External → canonical. Unrecognized names are returned unchanged.
    pub fn normalize_name(&self, name: &str) -> String {
        self.rewrite_checked(name, Direction::ToCanonical)
            .unwrap_or_else(|| name.to_string())
    }

    /// Canonical → external. Unrecognized names are returned unchanged.
    pub fn denormalize_name(&self, name: &str) -> String {
        self.rewrite_checked(name, Direction::ToExternal)
            .unwrap_or_else(|| name.to_string())
    }

    /// Rewrite every object key in `value`, recursing through arrays.
    ///
    /// Fails with `SchemaValidation` when a key would be renamed onto a
    /// sibling key (`system.title` next to `System.Title`), since one of
    /// the two values would be lost.
    pub fn normalize_value(&self, tool: &str, value: &Value) -> Result<Value, ClientError> {
        self.normalize_at(tool, value, "")
    }

    /// Inverse of [`normalize_value`](Self::normalize_value), for responses.
    /// A key whose rewrite would land on a sibling keeps its original name.
    pub fn denormalize_value(&self, value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut out = Map::with_capacity(map.len());
                for (key, inner) in map {
                    let key = self
                        .rewrite_checked(key, Direction::ToExternal)
                        .filter(|renamed| !map.contains_key(renamed))
                        .unwrap_or_else(|| key.clone());
                    out.insert(key, self.denormalize_value(inner));
                }
                Value::Object(out)
            }
            Value::Array(items) => Value::Array(items.iter().map(|v| self.denormalize_value(v)).collect()),
            other => other.clone(),
        }
    }

    /// Rename the fields of an inferred type into canonical form.
    pub fn normalize_type(&self, node: &TypeNode) -> TypeNode {
        node.map_field_names(&|name: &str| self.normalize_name(name))
    }

    fn normalize_at(&self, tool: &str, value: &Value, path: &str) -> Result<Value, ClientError> {
        match value {
            Value::Object(map) => {
                let mut out = Map::with_capacity(map.len());
                for (key, inner) in map {
                    let inner = self.normalize_at(tool, inner, &join_path(path, key))?;
                    let Some(renamed) = self.rewrite_checked(key, Direction::ToCanonical) else {
                        out.insert(key.clone(), inner);
                        continue;
                    };
                    // Rewrites are reversible, so only a sibling spelled in
                    // canonical form can already hold the new name.
                    if map.contains_key(&renamed) {
                        return Err(ClientError::SchemaValidation {
                            tool: tool.to_string(),
                            path: join_path(path, &renamed),
                            reason: format!("'{key}' and '{renamed}' name the same field"),
                        });
                    }
                    out.insert(renamed, inner);
                }
                Ok(Value::Object(out))
            }
            Value::Array(items) => items
                .iter()
                .enumerate()
                .map(|(i, item)| self.normalize_at(tool, item, &format!("{path}[{i}]")))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            other => Ok(other.clone()),
        }
    }

    /// Rewrite only when the opposite direction restores the original name.
    fn rewrite_checked(&self, name: &str, direction: Direction) -> Option<String> {
        let rewritten = self.rewrite(name, direction)?;
        let restored = self.rewrite(&rewritten, direction.reverse())?;
        (restored == name).then_some(rewritten)
    }

    fn rewrite(&self, name: &str, direction: Direction) -> Option<String> {
        let rule = self.longest_match(name, direction)?;
        let (from, to) = direction.sides(rule);
        let rest = &name[from.len()..];
        if rest.is_empty() {
            return None;
        }

        let mut segments = Vec::new();
        for segment in rest.split('.') {
            segments.push(flip_segment(segment, direction)?);
        }
        Some(format!("{to}{}", segments.join(".")))
    }

    fn longest_match(&self, name: &str, direction: Direction) -> Option<&NormalizationRule> {
        let mut best: Option<&NormalizationRule> = None;
        for rule in &self.rules {
            let (from, _) = direction.sides(rule);
            if !name.starts_with(from) {
                continue;
            }
            let longer = best.map_or(true, |b| from.len() > direction.sides(b).0.len());
            if longer {
                best = Some(rule);
            }
        }
        best
    }
}

/// Switch the case of a segment's first letter. The segment must currently
/// be in the source convention (lower-case first letter going canonical,
/// upper-case going external).
fn flip_segment(segment: &str, direction: Direction) -> Option<String> {
    let mut chars = segment.chars();
    let first = chars.next()?;
    let flipped = match direction {
        Direction::ToCanonical if first.is_ascii_lowercase() => first.to_ascii_uppercase(),
        Direction::ToExternal if first.is_ascii_uppercase() => first.to_ascii_lowercase(),
        _ => return None,
    };
    Some(format!("{flipped}{}", chars.as_str()))
}

// ─── Tests ───────────────────────────────────────────────────────────────────
