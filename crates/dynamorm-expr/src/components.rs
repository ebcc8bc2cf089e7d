//! The bundle of rendered expression strings and placeholder maps produced by
//! [`crate::builder::ExpressionBuilder::build`].

use std::collections::BTreeMap;

use dynamorm_core::AttrValue;

/// `SET`/`ADD`/`REMOVE`/`DELETE` clauses, rendered and joined in that fixed
/// keyword order.
#[derive(Debug, Clone, Default)]
pub struct UpdateClauses {
    pub set: Vec<String>,
    pub add: Vec<String>,
    pub remove: Vec<String>,
    pub delete: Vec<String>,
}

impl UpdateClauses {
    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.add.is_empty() && self.remove.is_empty() && self.delete.is_empty()
    }

    /// Renders the full `UpdateExpression`, or `None` if no clause was added.
    pub fn render(&self) -> Option<String> {
        if self.is_empty() {
            return None;
        }
        let mut parts = Vec::new();
        if !self.set.is_empty() {
            parts.push(format!("SET {}", self.set.join(", ")));
        }
        if !self.add.is_empty() {
            parts.push(format!("ADD {}", self.add.join(", ")));
        }
        if !self.remove.is_empty() {
            parts.push(format!("REMOVE {}", self.remove.join(", ")));
        }
        if !self.delete.is_empty() {
            parts.push(format!("DELETE {}", self.delete.join(", ")));
        }
        Some(parts.join(" "))
    }
}

/// Everything a single [`crate::builder::ExpressionBuilder`] compilation
/// produced: rendered expression strings plus the placeholder maps they
/// reference. Placeholder maps are the union across every clause built in
/// this compilation.
#[derive(Debug, Clone, Default)]
pub struct ExpressionComponents {
    pub condition_string: Option<String>,
    pub key_condition_string: Option<String>,
    pub filter_string: Option<String>,
    pub projection_string: Option<String>,
    pub update_clauses: UpdateClauses,
    pub name_placeholders: BTreeMap<String, String>,
    pub value_placeholders: BTreeMap<String, AttrValue>,
}
