//! Query predicates used as sync filters.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;

/// A comparison applied to one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QueryOperator {
    /// Equal to.
    Eq(Value),
    /// Not equal to.
    Ne(Value),
    /// Greater than.
    Gt(Value),
    /// Greater than or equal to.
    Ge(Value),
    /// Less than.
    Lt(Value),
    /// Less than or equal to.
    Le(Value),
    /// String contains the substring.
    Contains(String),
    /// String starts with the prefix.
    BeginsWith(String),
    /// Inclusive range.
    Between(Value, Value),
}

/// How the predicates of a group are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupKind {
    /// All must hold.
    And,
    /// At least one must hold.
    Or,
    /// None may hold.
    Not,
}

/// A filter over model records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QueryPredicate {
    /// Matches every record.
    All,
    /// A comparison on one field.
    Operation {
        /// Field name.
        field: String,
        /// Comparison.
        operator: QueryOperator,
    },
    /// A group of predicates.
    Group {
        /// Combination rule.
        kind: GroupKind,
        /// Member predicates.
        predicates: Vec<QueryPredicate>,
    },
}

impl QueryPredicate {
    /// Creates a comparison on `field`.
    pub fn field(field: impl Into<String>, operator: QueryOperator) -> Self {
        QueryPredicate::Operation {
            field: field.into(),
            operator,
        }
    }

    /// Combines with another predicate; both must hold.
    #[must_use]
    pub fn and(self, other: QueryPredicate) -> Self {
        match self {
            QueryPredicate::Group {
                kind: GroupKind::And,
                mut predicates,
            } => {
                predicates.push(other);
                QueryPredicate::Group {
                    kind: GroupKind::And,
                    predicates,
                }
            }
            this => QueryPredicate::Group {
                kind: GroupKind::And,
                predicates: vec![this, other],
            },
        }
    }

    /// Combines with another predicate; either may hold.
    #[must_use]
    pub fn or(self, other: QueryPredicate) -> Self {
        match self {
            QueryPredicate::Group {
                kind: GroupKind::Or,
                mut predicates,
            } => {
                predicates.push(other);
                QueryPredicate::Group {
                    kind: GroupKind::Or,
                    predicates,
                }
            }
            this => QueryPredicate::Group {
                kind: GroupKind::Or,
                predicates: vec![this, other],
            },
        }
    }

    /// Negates a predicate.
    pub fn not(predicate: QueryPredicate) -> Self {
        QueryPredicate::Group {
            kind: GroupKind::Not,
            predicates: vec![predicate],
        }
    }

    /// Returns true if this predicate matches every record.
    pub fn is_all(&self) -> bool {
        matches!(self, QueryPredicate::All)
    }

    /// Evaluates the predicate against the fields of a record.
    ///
    /// A comparison on a missing field only matches `Ne`.
    pub fn evaluate(&self, fields: &Map<String, Value>) -> bool {
        match self {
            QueryPredicate::All => true,
            QueryPredicate::Operation { field, operator } => {
                evaluate_operator(operator, fields.get(field).unwrap_or(&Value::Null))
            }
            QueryPredicate::Group { kind, predicates } => match kind {
                GroupKind::And => predicates.iter().all(|p| p.evaluate(fields)),
                GroupKind::Or => predicates.iter().any(|p| p.evaluate(fields)),
                GroupKind::Not => !predicates.iter().any(|p| p.evaluate(fields)),
            },
        }
    }
}

fn evaluate_operator(operator: &QueryOperator, actual: &Value) -> bool {
    match operator {
        QueryOperator::Eq(expected) => compare(actual, expected) == Some(Ordering::Equal),
        QueryOperator::Ne(expected) => compare(actual, expected) != Some(Ordering::Equal),
        QueryOperator::Gt(expected) => compare(actual, expected) == Some(Ordering::Greater),
        QueryOperator::Ge(expected) => matches!(
            compare(actual, expected),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        QueryOperator::Lt(expected) => compare(actual, expected) == Some(Ordering::Less),
        QueryOperator::Le(expected) => matches!(
            compare(actual, expected),
            Some(Ordering::Less | Ordering::Equal)
        ),
        QueryOperator::Contains(needle) => actual
            .as_str()
            .is_some_and(|s| s.contains(needle.as_str())),
        QueryOperator::BeginsWith(prefix) => actual
            .as_str()
            .is_some_and(|s| s.starts_with(prefix.as_str())),
        QueryOperator::Between(low, high) => {
            matches!(compare(actual, low), Some(Ordering::Greater | Ordering::Equal))
                && matches!(compare(actual, high), Some(Ordering::Less | Ordering::Equal))
        }
    }
}

fn compare(actual: &Value, expected: &Value) -> Option<Ordering> {
    match (actual, expected) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

impl Default for QueryPredicate {
    fn default() -> Self {
        QueryPredicate::All
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn all_matches_everything() {
        assert!(QueryPredicate::All.evaluate(&Map::new()));
        assert!(QueryPredicate::default().is_all());
    }

    #[test]
    fn comparisons() {
        let record = fields(json!({"rating": 4, "title": "Hello world"}));

        assert!(QueryPredicate::field("rating", QueryOperator::Gt(json!(3))).evaluate(&record));
        assert!(!QueryPredicate::field("rating", QueryOperator::Lt(json!(4))).evaluate(&record));
        assert!(QueryPredicate::field("rating", QueryOperator::Le(json!(4.0))).evaluate(&record));
        assert!(QueryPredicate::field("title", QueryOperator::BeginsWith("Hell".into()))
            .evaluate(&record));
        assert!(QueryPredicate::field("title", QueryOperator::Contains("world".into()))
            .evaluate(&record));
        assert!(
            QueryPredicate::field("rating", QueryOperator::Between(json!(1), json!(4)))
                .evaluate(&record)
        );
    }

    #[test]
    fn missing_field_only_matches_ne() {
        let record = fields(json!({"title": "x"}));
        assert!(!QueryPredicate::field("rating", QueryOperator::Eq(json!(1))).evaluate(&record));
        assert!(QueryPredicate::field("rating", QueryOperator::Ne(json!(1))).evaluate(&record));
    }

    #[test]
    fn groups() {
        let record = fields(json!({"rating": 4, "draft": false}));
        let high = QueryPredicate::field("rating", QueryOperator::Ge(json!(4)));
        let draft = QueryPredicate::field("draft", QueryOperator::Eq(json!(true)));

        assert!(!high.clone().and(draft.clone()).evaluate(&record));
        assert!(high.clone().or(draft.clone()).evaluate(&record));
        assert!(QueryPredicate::not(draft).evaluate(&record));
    }

    #[test]
    fn chained_and_flattens() {
        let p = QueryPredicate::field("a", QueryOperator::Eq(json!(1)))
            .and(QueryPredicate::field("b", QueryOperator::Eq(json!(2))))
            .and(QueryPredicate::field("c", QueryOperator::Eq(json!(3))));
        match p {
            QueryPredicate::Group { kind, predicates } => {
                assert_eq!(kind, GroupKind::And);
                assert_eq!(predicates.len(), 3);
            }
            other => panic!("unexpected predicate {other:?}"),
        }
    }
}
