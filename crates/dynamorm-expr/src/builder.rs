//! The expression builder: composes condition, key-condition, filter,
//! update, and projection expression strings with placeholder maps, mirroring
//! the teacher's dynamic WHERE-clause assembly (`Vec<String>` clauses plus a
//! monotonic placeholder index) but generalized over every expression kind
//! the backend accepts.

use std::collections::BTreeMap;

use dynamorm_core::AttrValue;

use crate::components::{ExpressionComponents, UpdateClauses};
use crate::error::{ExprError, Result};
use crate::op::{Arity, Op};

const MAX_IN_VALUES: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Connective {
    And,
    Or,
}

#[derive(Debug, Default)]
struct TermList {
    terms: Vec<(Connective, String)>,
}

impl TermList {
    fn push_and(&mut self, term: String) {
        self.terms.push((Connective::And, term));
    }

    fn push_or(&mut self, term: String) {
        self.terms.push((Connective::Or, term));
    }

    fn render(&self) -> Option<String> {
        if self.terms.is_empty() {
            return None;
        }
        let mut out = String::new();
        for (i, (conn, term)) in self.terms.iter().enumerate() {
            if i > 0 {
                out.push_str(match conn {
                    Connective::And => " AND ",
                    Connective::Or => " OR ",
                });
            }
            out.push_str(term);
        }
        Some(out)
    }
}

/// Stateful per single compilation. Every method allocates into shared
/// name/value placeholder tables; `build()` renders the final
/// [`ExpressionComponents`] without resetting state, so callers should treat
/// an instance as single-use.
#[derive(Default)]
pub struct ExpressionBuilder {
    name_table: BTreeMap<String, String>,
    name_counter: usize,
    values: BTreeMap<String, AttrValue>,
    value_counter: usize,
    key_condition: TermList,
    filter: TermList,
    condition: TermList,
    update: UpdateClauses,
    projection: Vec<String>,
    /// Translates a caller-facing field name (e.g. a model's in-memory
    /// field name) to the name actually interned as a placeholder (e.g. its
    /// backend attribute name). Installed once by the caller before any
    /// `add_*`/`set`/`project` call, including those made from inside a
    /// `filter_group`/`or_filter_group` closure, since `GroupBuilder` shares
    /// this table via `render_leaf`.
    name_resolver: Option<Box<dyn Fn(&str) -> String + Send>>,
}

impl std::fmt::Debug for ExpressionBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpressionBuilder")
            .field("name_table", &self.name_table)
            .field("values", &self.values)
            .field("key_condition", &self.key_condition)
            .field("filter", &self.filter)
            .field("condition", &self.condition)
            .field("update", &self.update)
            .field("projection", &self.projection)
            .field("name_resolver", &self.name_resolver.is_some())
            .finish()
    }
}

impl ExpressionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a field-name translator consulted by every subsequent
    /// placeholder allocation, including ones made inside
    /// `filter_group`/`or_filter_group` closures.
    pub fn with_name_resolver<F>(mut self, resolver: F) -> Self
    where
        F: Fn(&str) -> String + Send + 'static,
    {
        self.name_resolver = Some(Box::new(resolver));
        self
    }

    fn intern_name(&mut self, field: &str) -> String {
        let resolved = match &self.name_resolver {
            Some(resolve) => resolve(field),
            None => field.to_string(),
        };
        if let Some(existing) = self.name_table.get(&resolved) {
            return existing.clone();
        }
        let placeholder = format!("#n_{}", self.name_counter);
        self.name_counter += 1;
        self.name_table.insert(resolved, placeholder.clone());
        placeholder
    }

    fn alloc_value(&mut self, value: AttrValue) -> String {
        let placeholder = format!(":v_{}", self.value_counter);
        self.value_counter += 1;
        self.values.insert(placeholder.clone(), value);
        placeholder
    }

    fn check_arity(op: Op, values: &[AttrValue], field: &str) -> Result<()> {
        let ok = match op.arity() {
            Arity::Nullary => values.is_empty(),
            Arity::Unary => values.len() == 1,
            Arity::Binary => values.len() == 2,
            Arity::Variadic => {
                if values.is_empty() {
                    return Err(ExprError::EmptyInList { field: field.to_string() });
                }
                if values.len() > MAX_IN_VALUES {
                    return Err(ExprError::InListTooLarge {
                        field: field.to_string(),
                        max: MAX_IN_VALUES,
                        got: values.len(),
                    });
                }
                true
            }
        };
        if !ok {
            return Err(ExprError::Conversion(dynamorm_core::CoreError::UnsupportedKind(format!(
                "operator {op:?} expects a different argument count for field {field}"
            ))));
        }
        Ok(())
    }

    /// Renders one leaf term (`#n op :v`-shaped) and interns its
    /// placeholders. Shared by filter/condition/key-condition/group paths.
    fn render_leaf(&mut self, field: &str, op: Op, values: Vec<AttrValue>) -> Result<String> {
        Self::check_arity(op, &values, field)?;
        let name = self.intern_name(field);
        Ok(match op {
            Op::Eq => format!("{name} = {}", self.alloc_value(values.into_iter().next().unwrap())),
            Op::Ne => format!("{name} <> {}", self.alloc_value(values.into_iter().next().unwrap())),
            Op::Lt => format!("{name} < {}", self.alloc_value(values.into_iter().next().unwrap())),
            Op::Le => format!("{name} <= {}", self.alloc_value(values.into_iter().next().unwrap())),
            Op::Gt => format!("{name} > {}", self.alloc_value(values.into_iter().next().unwrap())),
            Op::Ge => format!("{name} >= {}", self.alloc_value(values.into_iter().next().unwrap())),
            Op::BeginsWith => {
                format!("begins_with({name}, {})", self.alloc_value(values.into_iter().next().unwrap()))
            }
            Op::Contains => {
                format!("contains({name}, {})", self.alloc_value(values.into_iter().next().unwrap()))
            }
            Op::Exists => format!("attribute_exists({name})"),
            Op::NotExists => format!("attribute_not_exists({name})"),
            Op::Between => {
                let mut it = values.into_iter();
                let lo = self.alloc_value(it.next().unwrap());
                let hi = self.alloc_value(it.next().unwrap());
                format!("{name} BETWEEN {lo} AND {hi}")
            }
            Op::In => {
                let placeholders: Vec<String> = values.into_iter().map(|v| self.alloc_value(v)).collect();
                format!("{name} IN ({})", placeholders.join(", "))
            }
        })
    }

    // ---- key conditions (AND-only) ----

    pub fn add_key_condition(&mut self, field: &str, op: Op, values: Vec<AttrValue>) -> Result<&mut Self> {
        if !op.valid_in_key_condition() {
            return Err(ExprError::InvalidKeyConditionOperator { op });
        }
        let term = self.render_leaf(field, op, values)?;
        self.key_condition.push_and(term);
        Ok(self)
    }

    // ---- filters ----

    pub fn add_filter(&mut self, field: &str, op: Op, values: Vec<AttrValue>) -> Result<&mut Self> {
        let term = self.render_leaf(field, op, values)?;
        self.filter.push_and(term);
        Ok(self)
    }

    pub fn or_filter(&mut self, field: &str, op: Op, values: Vec<AttrValue>) -> Result<&mut Self> {
        let term = self.render_leaf(field, op, values)?;
        self.filter.push_or(term);
        Ok(self)
    }

    pub fn filter_group<F>(&mut self, f: F) -> Result<&mut Self>
    where
        F: FnOnce(&mut GroupBuilder) -> Result<()>,
    {
        let rendered = {
            let mut group = GroupBuilder::new(self);
            f(&mut group)?;
            group.terms.render()
        };
        if let Some(s) = rendered {
            self.filter.push_and(format!("({s})"));
        }
        Ok(self)
    }

    pub fn or_filter_group<F>(&mut self, f: F) -> Result<&mut Self>
    where
        F: FnOnce(&mut GroupBuilder) -> Result<()>,
    {
        let rendered = {
            let mut group = GroupBuilder::new(self);
            f(&mut group)?;
            group.terms.render()
        };
        if let Some(s) = rendered {
            self.filter.push_or(format!("({s})"));
        }
        Ok(self)
    }

    // ---- conditions (write-path ConditionExpression) ----

    pub fn add_condition(&mut self, field: &str, op: Op, values: Vec<AttrValue>) -> Result<&mut Self> {
        let term = self.render_leaf(field, op, values)?;
        self.condition.push_and(term);
        Ok(self)
    }

    pub fn or_condition(&mut self, field: &str, op: Op, values: Vec<AttrValue>) -> Result<&mut Self> {
        let term = self.render_leaf(field, op, values)?;
        self.condition.push_or(term);
        Ok(self)
    }

    /// Advanced escape hatch: a raw template with its own name/value
    /// bindings, appended verbatim (AND-joined) to the condition expression.
    pub fn add_raw_condition(
        &mut self,
        template: &str,
        name_bindings: &[(&str, &str)],
        value_bindings: &[(&str, AttrValue)],
    ) -> &mut Self {
        for (placeholder, field) in name_bindings {
            self.name_table.entry(field.to_string()).or_insert_with(|| placeholder.to_string());
        }
        for (placeholder, value) in value_bindings {
            self.values.insert(placeholder.to_string(), value.clone());
        }
        self.condition.push_and(template.to_string());
        self
    }

    // ---- update mutators ----

    pub fn set(&mut self, path: &str, value: AttrValue) -> &mut Self {
        let name = self.intern_name(path);
        let v = self.alloc_value(value);
        self.update.set.push(format!("{name} = {v}"));
        self
    }

    pub fn set_if_not_exists(&mut self, path: &str, value: AttrValue) -> &mut Self {
        let name = self.intern_name(path);
        let v = self.alloc_value(value);
        self.update.set.push(format!("{name} = if_not_exists({name}, {v})"));
        self
    }

    pub fn add(&mut self, path: &str, number_or_set: AttrValue) -> &mut Self {
        let name = self.intern_name(path);
        let v = self.alloc_value(number_or_set);
        self.update.add.push(format!("{name} {v}"));
        self
    }

    pub fn delete_from_set(&mut self, path: &str, values: AttrValue) -> &mut Self {
        let name = self.intern_name(path);
        let v = self.alloc_value(values);
        self.update.delete.push(format!("{name} {v}"));
        self
    }

    pub fn remove(&mut self, path: &str) -> &mut Self {
        let name = self.intern_name(path);
        self.update.remove.push(name);
        self
    }

    pub fn list_append(&mut self, path: &str, list: AttrValue, prepend: bool) -> &mut Self {
        let name = self.intern_name(path);
        let v = self.alloc_value(list);
        let rendered = if prepend {
            format!("{name} = list_append({v}, {name})")
        } else {
            format!("{name} = list_append({name}, {v})")
        };
        self.update.set.push(rendered);
        self
    }

    pub fn list_set(&mut self, path: &str, index: usize, value: AttrValue) -> &mut Self {
        let name = self.intern_name(path);
        let v = self.alloc_value(value);
        self.update.set.push(format!("{name}[{index}] = {v}"));
        self
    }

    pub fn list_remove_at(&mut self, path: &str, index: usize) -> &mut Self {
        let name = self.intern_name(path);
        self.update.remove.push(format!("{name}[{index}]"));
        self
    }

    // ---- projection ----

    pub fn project(&mut self, fields: &[&str]) -> &mut Self {
        let names: Vec<String> = fields.iter().map(|f| self.intern_name(f)).collect();
        self.projection = names;
        self
    }

    /// Renders the accumulated state into the final bundle. Does not reset
    /// the builder; treat the instance as single-use per compilation.
    pub fn build(&self) -> ExpressionComponents {
        ExpressionComponents {
            condition_string: self.condition.render(),
            key_condition_string: self.key_condition.render(),
            filter_string: self.filter.render(),
            projection_string: if self.projection.is_empty() {
                None
            } else {
                Some(self.projection.join(", "))
            },
            update_clauses: self.update.clone(),
            name_placeholders: self
                .name_table
                .iter()
                .map(|(field, placeholder)| (placeholder.clone(), field.clone()))
                .collect(),
            value_placeholders: self.values.clone(),
        }
    }
}

/// A scoped sub-accumulator handed to `filter_group`/`or_filter_group`
/// closures. Shares the parent's name/value placeholder tables so references
/// to the same field still collapse to one `#n_k`.
pub struct GroupBuilder<'a> {
    parent: &'a mut ExpressionBuilder,
    terms: TermList,
}

impl<'a> GroupBuilder<'a> {
    fn new(parent: &'a mut ExpressionBuilder) -> Self {
        Self {
            parent,
            terms: TermList::default(),
        }
    }

    pub fn and(&mut self, field: &str, op: Op, values: Vec<AttrValue>) -> Result<&mut Self> {
        let term = self.parent.render_leaf(field, op, values)?;
        self.terms.push_and(term);
        Ok(self)
    }

    pub fn or(&mut self, field: &str, op: Op, values: Vec<AttrValue>) -> Result<&mut Self> {
        let term = self.parent.render_leaf(field, op, values)?;
        self.terms.push_or(term);
        Ok(self)
    }
}
