//! Fetch requests for the in-memory store.
//!
//! Predicates are compiled against the entity description before any row is
//! read, so a structurally invalid request fails on every execution, even
//! when no rows exist.

use std::cmp::Ordering;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{StoreError, StoreResult};

use super::memory::ObjectRecord;
use super::schema::EntityDescription;

/// Row filter.
#[allow(missing_docs)]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Predicate {
    /// Field equals value. A missing field equals `null`.
    Equals { field: String, value: Value },

    /// String field fully matches a regular expression.
    Matches { field: String, pattern: String },

    /// Relationship holds at least `min` objects.
    RelationshipCountAtLeast { relationship: String, min: usize },

    Not { predicate: Box<Predicate> },

    And { predicates: Vec<Predicate> },

    Or { predicates: Vec<Predicate> },
}

impl Predicate {
    /// `field == value`.
    pub fn equals(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Equals {
            field: field.into(),
            value: value.into(),
        }
    }

    /// `field MATCHES pattern`.
    pub fn matches(field: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::Matches {
            field: field.into(),
            pattern: pattern.into(),
        }
    }

    /// `relationship.@count >= min`.
    pub fn count_at_least(relationship: impl Into<String>, min: usize) -> Self {
        Self::RelationshipCountAtLeast {
            relationship: relationship.into(),
            min,
        }
    }

    /// Negation.
    #[must_use]
    pub fn negate(self) -> Self {
        Self::Not {
            predicate: Box::new(self),
        }
    }

    pub(crate) fn compile(&self, entity: &EntityDescription) -> StoreResult<CompiledPredicate> {
        Ok(match self {
            Self::Equals { field, value } => CompiledPredicate::Equals {
                field: field.clone(),
                value: value.clone(),
            },
            Self::Matches { field, pattern } => {
                let regex = Regex::new(&format!("^(?:{pattern})$")).map_err(|e| StoreError::InvalidPredicate {
                    reason: format!("invalid pattern for '{field}': {e}"),
                })?;
                CompiledPredicate::Matches {
                    field: field.clone(),
                    regex,
                }
            }
            Self::RelationshipCountAtLeast { relationship, min } => {
                entity.require_relationship(relationship)?;
                CompiledPredicate::CountAtLeast {
                    relationship: relationship.clone(),
                    min: *min,
                }
            }
            Self::Not { predicate } => CompiledPredicate::Not(Box::new(predicate.compile(entity)?)),
            Self::And { predicates } => CompiledPredicate::And(
                predicates
                    .iter()
                    .map(|p| p.compile(entity))
                    .collect::<StoreResult<Vec<_>>>()?,
            ),
            Self::Or { predicates } => CompiledPredicate::Or(
                predicates
                    .iter()
                    .map(|p| p.compile(entity))
                    .collect::<StoreResult<Vec<_>>>()?,
            ),
        })
    }
}

#[derive(Debug)]
pub(crate) enum CompiledPredicate {
    Equals { field: String, value: Value },
    Matches { field: String, regex: Regex },
    CountAtLeast { relationship: String, min: usize },
    Not(Box<CompiledPredicate>),
    And(Vec<CompiledPredicate>),
    Or(Vec<CompiledPredicate>),
}

impl CompiledPredicate {
    pub(crate) fn evaluate(&self, record: &ObjectRecord) -> bool {
        match self {
            Self::Equals { field, value } => record.fields.get(field).unwrap_or(&Value::Null) == value,
            Self::Matches { field, regex } => record
                .fields
                .get(field)
                .and_then(Value::as_str)
                .is_some_and(|s| regex.is_match(s)),
            Self::CountAtLeast { relationship, min } => {
                record.relationships.get(relationship).map_or(0, |ids| ids.len()) >= *min
            }
            Self::Not(inner) => !inner.evaluate(record),
            Self::And(all) => all.iter().all(|p| p.evaluate(record)),
            Self::Or(any) => any.iter().any(|p| p.evaluate(record)),
        }
    }
}

/// Sort key.
#[allow(missing_docs)]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SortDescriptor {
    pub field: String,
    pub ascending: bool,
}

/// Query over one entity.
///
/// Results are ordered by the sort descriptors, then by insertion order.
#[allow(missing_docs)]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FetchRequest {
    pub entity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predicate: Option<Predicate>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sort: Vec<SortDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl FetchRequest {
    /// Every object of `entity`.
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            predicate: None,
            sort: Vec::new(),
            limit: None,
        }
    }

    /// Filter rows.
    #[must_use]
    pub fn with_predicate(mut self, predicate: Predicate) -> Self {
        self.predicate = Some(predicate);
        self
    }

    /// Append a sort key.
    #[must_use]
    pub fn sorted_by(mut self, field: impl Into<String>, ascending: bool) -> Self {
        self.sort.push(SortDescriptor {
            field: field.into(),
            ascending,
        });
        self
    }

    /// Cap the number of results.
    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub(crate) fn compare(&self, a: &ObjectRecord, b: &ObjectRecord) -> Ordering {
        for key in &self.sort {
            let left = a.fields.get(&key.field).unwrap_or(&Value::Null);
            let right = b.fields.get(&key.field).unwrap_or(&Value::Null);
            let ord = compare_values(left, right);
            let ord = if key.ascending { ord } else { ord.reverse() };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        a.seq.cmp(&b.seq)
    }
}

fn type_rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order over JSON scalars: null < bool < number < string; containers compare equal.
fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}
