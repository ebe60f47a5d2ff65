//! Column lookups and the WHERE tree.
//!
//! [`Lookup`] is a single column-level comparison; [`WhereNode`] combines
//! lookups with AND, OR and NOT. The filter compiler lowers request filters
//! into this tree and the SQL compiler renders it.
//!
//! # Examples
//!
//! ```
//! use cms_rs_db::query::lookups::{Lookup, WhereNode};
//! use cms_rs_db::value::Value;
//!
//! // t0.name = 'Alice'
//! let w = WhereNode::condition("t0.name", Lookup::Exact(Value::from("Alice")));
//!
//! // (t0.name = 'Alice' AND t0.age > 25) OR NOT (t0.active = false)
//! let tree = WhereNode::Or(vec![
//!     WhereNode::And(vec![w, WhereNode::condition("t0.age", Lookup::Gt(Value::from(25)))]),
//!     WhereNode::Not(Box::new(WhereNode::condition(
//!         "t0.active",
//!         Lookup::Exact(Value::from(false)),
//!     ))),
//! ]);
//! assert!(matches!(tree, WhereNode::Or(ref children) if children.len() == 2));
//! ```

use crate::value::Value;

/// A column-level lookup operation.
///
/// Each variant produces one SQL predicate fragment.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    /// Equality (`column = value`, or `IS NULL` for a null operand).
    Exact(Value),
    /// Inequality (`column <> value`, or `IS NOT NULL` for a null operand).
    NotEqual(Value),
    /// Membership (`column IN (values...)`).
    In(Vec<Value>),
    /// Exclusion (`column NOT IN (values...)`).
    NotIn(Vec<Value>),
    /// Greater than.
    Gt(Value),
    /// Greater than or equal.
    Gte(Value),
    /// Less than.
    Lt(Value),
    /// Less than or equal.
    Lte(Value),
    /// Prefix match (`column LIKE 'value%'`).
    StartsWith(String),
    /// Suffix match (`column LIKE '%value'`).
    EndsWith(String),
    /// Substring match (`column LIKE '%value%'`).
    Contains(String),
    /// Negated substring match (`column NOT LIKE '%value%'`).
    NotContains(String),
    /// Range test (`column BETWEEN low AND high`).
    Range(Value, Value),
    /// NULL test (`IS NULL` when `true`, `IS NOT NULL` when `false`).
    IsNull(bool),
}

/// A node of the WHERE tree.
#[derive(Debug, Clone, PartialEq)]
pub enum WhereNode {
    /// A single condition on a qualified column (`alias.column`).
    Condition {
        /// The qualified column name.
        column: String,
        /// The lookup type.
        lookup: Lookup,
    },
    /// Logical AND of conditions. Empty renders as `1=1`.
    And(Vec<WhereNode>),
    /// Logical OR of conditions. Empty renders as `1=0`.
    Or(Vec<WhereNode>),
    /// Logical NOT of a condition.
    Not(Box<WhereNode>),
}

impl WhereNode {
    /// Creates a single-column condition.
    pub fn condition(column: impl Into<String>, lookup: Lookup) -> Self {
        Self::Condition {
            column: column.into(),
            lookup,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name_is(v: &str) -> WhereNode {
        WhereNode::condition("t0.name", Lookup::Exact(Value::from(v)))
    }

    #[test]
    fn test_condition() {
        match name_is("Alice") {
            WhereNode::Condition { column, lookup } => {
                assert_eq!(column, "t0.name");
                assert_eq!(lookup, Lookup::Exact(Value::String("Alice".to_string())));
            }
            other => panic!("Expected Condition, got {other:?}"),
        }
    }

    #[test]
    fn test_in_lookup_keeps_value_order() {
        let node = WhereNode::condition(
            "t1.id",
            Lookup::In(vec![Value::Int(3), Value::Int(1), Value::Int(2)]),
        );
        assert_eq!(
            node,
            WhereNode::Condition {
                column: "t1.id".to_string(),
                lookup: Lookup::In(vec![Value::Int(3), Value::Int(1), Value::Int(2)]),
            }
        );
    }
}
