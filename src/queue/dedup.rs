use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::models::Method;

/// Field name that refers to the admitting owner rather than a payload key.
pub const OWNER_FIELD: &str = "$owner";

/// Which payload fields identify "the same intent" for one action kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupRule {
    pub fields: Vec<String>,
    /// Admissions further apart than this many seconds never collide.
    pub bucket_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DedupRules {
    rules: HashMap<String, DedupRule>,
}

/// Inputs to key derivation, borrowed from an admission request.
pub struct DedupInput<'a> {
    pub action_kind: &'a str,
    pub target_path: &'a str,
    pub method: Method,
    pub payload: &'a Value,
    pub owner_id: Option<&'a str>,
    pub submitted_at: DateTime<Utc>,
}

impl DedupRules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, action_kind: &str, rule: DedupRule) {
        self.rules.insert(action_kind.to_string(), rule);
    }

    pub fn get(&self, action_kind: &str) -> Option<&DedupRule> {
        self.rules.get(action_kind)
    }

    /// Parse `kind=field,field[@secs];kind=...`.
    pub fn parse(spec: &str) -> Result<Self, String> {
        let mut rules = Self::new();

        for entry in spec.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            let (kind, rest) = entry
                .split_once('=')
                .ok_or_else(|| format!("rule '{entry}' is missing '='"))?;
            let kind = kind.trim();
            if kind.is_empty() {
                return Err(format!("rule '{entry}' has an empty action kind"));
            }

            let (fields, bucket_secs) = match rest.split_once('@') {
                Some((fields, secs)) => {
                    let secs: u64 = secs
                        .trim()
                        .parse()
                        .map_err(|e| format!("rule '{entry}' has an invalid bucket: {e}"))?;
                    if secs == 0 {
                        return Err(format!("rule '{entry}' has a zero bucket"));
                    }
                    (fields, Some(secs))
                }
                None => (rest, None),
            };

            let fields: Vec<String> = fields
                .split(',')
                .map(|f| f.trim().to_string())
                .filter(|f| !f.is_empty())
                .collect();
            if fields.is_empty() {
                return Err(format!("rule '{entry}' lists no fields"));
            }

            rules.insert(kind, DedupRule { fields, bucket_secs });
        }

        Ok(rules)
    }

    /// Derive the dedup key for an admission.
    ///
    /// Kinds without a rule, or whose rule names a field the request does not
    /// carry, fall back to hashing the whole request.
    pub fn key(&self, input: &DedupInput<'_>) -> String {
        let material = self
            .get(input.action_kind)
            .and_then(|rule| rule_material(rule, input))
            .unwrap_or_else(|| fallback_material(input));

        let digest = Sha256::digest(material.as_bytes());
        format!("{}:{}", input.action_kind, hex::encode(digest))
    }
}

fn rule_material(rule: &DedupRule, input: &DedupInput<'_>) -> Option<String> {
    let mut parts = Vec::with_capacity(rule.fields.len() + 1);

    for field in &rule.fields {
        let value = if field == OWNER_FIELD {
            input.owner_id.map(normalize_str)?
        } else {
            match input.payload.get(field) {
                None | Some(Value::Null) => return None,
                Some(Value::String(s)) => normalize_str(s),
                Some(other) => other.to_string(),
            }
        };
        parts.push(format!("{field}={value}"));
    }

    if let Some(secs) = rule.bucket_secs {
        let bucket = input.submitted_at.timestamp().div_euclid(secs as i64);
        parts.push(format!("@{bucket}"));
    }

    Some(parts.join("\u{1f}"))
}

fn fallback_material(input: &DedupInput<'_>) -> String {
    // serde_json maps are key-ordered, so this serialization is canonical.
    format!(
        "{}\u{1f}{}\u{1f}{}\u{1f}{}",
        input.method,
        input.target_path,
        input.owner_id.unwrap_or(""),
        input.payload
    )
}

fn normalize_str(s: &str) -> String {
    s.trim().to_lowercase()
}
