//! Update Builder (C6): accumulates `SET`/`ADD`/`REMOVE`/`DELETE` clauses and
//! conditions, then issues one `UpdateItem` against a bound key. Owned
//! (self-consuming) chaining per design note §9; the Draft → Compiled →
//! Executed/Failed state machine (spec §4.6) is modeled by deferring every
//! fallible accumulation to `execute()`/`execute_with_result()` rather than
//! failing individual builder calls.

use std::marker::PhantomData;
use std::sync::Arc;

use dynamorm_config::RetryPolicy;
use dynamorm_core::{AttrValue, Descriptor, Model, Role};
use dynamorm_expr::{ExpressionBuilder, Op};

use crate::backend::{BackendClient, CompiledWrite, ReturnValues, WriteOp};
use crate::clock::{Clock, SystemClock};
use crate::cursor::KeyMap;
use crate::error::{Error, Result};
use crate::executor::Executor;

enum UpdateAction {
    Set(String, AttrValue),
    SetIfNotExists(String, AttrValue),
    Add(String, AttrValue),
    Remove(String),
    AppendToList(String, AttrValue),
    PrependToList(String, AttrValue),
    SetListElement(String, usize, AttrValue),
    RemoveFromListAt(String, usize),
    DeleteFromSet(String, AttrValue),
}

enum ConditionAction {
    Cmp(String, Op, Vec<AttrValue>),
    Exists(String),
    NotExists(String),
}

/// The fluent update builder, bound to one item's key.
pub struct UpdateBuilder<T: Model> {
    descriptor: Arc<Descriptor>,
    backend: Arc<dyn BackendClient>,
    default_retry: RetryPolicy,
    key: KeyMap,
    actions: Vec<UpdateAction>,
    conditions: Vec<ConditionAction>,
    condition_version: Option<AttrValue>,
    return_values: ReturnValues,
    retry_override: Option<RetryPolicy>,
    clock: Arc<dyn Clock>,
    _marker: PhantomData<T>,
}

impl<T: Model> UpdateBuilder<T> {
    pub(crate) fn new(descriptor: Arc<Descriptor>, backend: Arc<dyn BackendClient>, default_retry: RetryPolicy, key: KeyMap) -> Self {
        Self::with_clock(descriptor, backend, default_retry, key, Arc::new(SystemClock))
    }

    pub(crate) fn with_clock(
        descriptor: Arc<Descriptor>,
        backend: Arc<dyn BackendClient>,
        default_retry: RetryPolicy,
        key: KeyMap,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            descriptor,
            backend,
            default_retry,
            key,
            actions: Vec::new(),
            conditions: Vec::new(),
            condition_version: None,
            return_values: ReturnValues::None,
            retry_override: None,
            clock,
            _marker: PhantomData,
        }
    }

    pub fn set(mut self, path: impl Into<String>, value: AttrValue) -> Self {
        self.actions.push(UpdateAction::Set(path.into(), value));
        self
    }

    /// Sets `path` to `default` only if it's not already present
    /// (`path = if_not_exists(path, :default)`).
    pub fn set_if_not_exists(mut self, path: impl Into<String>, default: AttrValue) -> Self {
        self.actions.push(UpdateAction::SetIfNotExists(path.into(), default));
        self
    }

    pub fn add(mut self, path: impl Into<String>, number_or_set: AttrValue) -> Self {
        self.actions.push(UpdateAction::Add(path.into(), number_or_set));
        self
    }

    pub fn increment(self, path: impl Into<String>) -> Self {
        self.add(path, AttrValue::N("1".to_string()))
    }

    pub fn decrement(self, path: impl Into<String>) -> Self {
        self.add(path, AttrValue::N("-1".to_string()))
    }

    pub fn remove(mut self, path: impl Into<String>) -> Self {
        self.actions.push(UpdateAction::Remove(path.into()));
        self
    }

    pub fn append_to_list(mut self, path: impl Into<String>, items: AttrValue) -> Self {
        self.actions.push(UpdateAction::AppendToList(path.into(), items));
        self
    }

    pub fn prepend_to_list(mut self, path: impl Into<String>, items: AttrValue) -> Self {
        self.actions.push(UpdateAction::PrependToList(path.into(), items));
        self
    }

    pub fn set_list_element(mut self, path: impl Into<String>, index: usize, value: AttrValue) -> Self {
        self.actions.push(UpdateAction::SetListElement(path.into(), index, value));
        self
    }

    pub fn remove_from_list_at(mut self, path: impl Into<String>, index: usize) -> Self {
        self.actions.push(UpdateAction::RemoveFromListAt(path.into(), index));
        self
    }

    pub fn delete_from_set(mut self, path: impl Into<String>, items: AttrValue) -> Self {
        self.actions.push(UpdateAction::DeleteFromSet(path.into(), items));
        self
    }

    pub fn condition(mut self, field: impl Into<String>, op: Op, values: Vec<AttrValue>) -> Self {
        self.conditions.push(ConditionAction::Cmp(field.into(), op, values));
        self
    }

    pub fn condition_exists(mut self, field: impl Into<String>) -> Self {
        self.conditions.push(ConditionAction::Exists(field.into()));
        self
    }

    pub fn condition_not_exists(mut self, field: impl Into<String>) -> Self {
        self.conditions.push(ConditionAction::NotExists(field.into()));
        self
    }

    /// Optimistic-concurrency guard: the condition check uses `expected`, and
    /// a matching `ADD version 1` clause is appended automatically.
    pub fn condition_version(mut self, expected: AttrValue) -> Self {
        self.condition_version = Some(expected);
        self
    }

    pub fn return_values(mut self, mode: ReturnValues) -> Self {
        self.return_values = mode;
        self
    }

    pub fn with_retry(mut self, max: u32, initial_delay: std::time::Duration) -> Self {
        let mut policy = self.retry_override.unwrap_or(self.default_retry);
        policy.max_retries = max;
        policy.initial_delay = initial_delay;
        self.retry_override = Some(policy);
        self
    }

    /// An `ExpressionBuilder` whose placeholder table resolves every
    /// caller-facing field name to its backend attribute name (spec §4
    /// property 2), so `SET`/`ADD`/`REMOVE`/`DELETE`/condition clauses never
    /// leak the Rust struct field name into `ExpressionAttributeNames`.
    fn new_expression_builder(&self) -> ExpressionBuilder {
        let descriptor = self.descriptor.clone();
        ExpressionBuilder::new().with_name_resolver(move |field: &str| {
            descriptor
                .field_by_name(field)
                .map(|fd| fd.dbname.clone())
                .unwrap_or_else(|| field.to_string())
        })
    }

    fn compile(&self) -> Result<CompiledWrite> {
        let mut eb = self.new_expression_builder();

        for field in self.descriptor.attributes() {
            if field.role == Role::UpdatedAt {
                eb.set(field.in_memory_name, AttrValue::S(self.clock.now_utc().to_rfc3339()));
            }
        }

        for action in &self.actions {
            match action {
                UpdateAction::Set(p, v) => {
                    eb.set(p, v.clone());
                }
                UpdateAction::SetIfNotExists(p, v) => {
                    eb.set_if_not_exists(p, v.clone());
                }
                UpdateAction::Add(p, v) => {
                    eb.add(p, v.clone());
                }
                UpdateAction::Remove(p) => {
                    eb.remove(p);
                }
                UpdateAction::AppendToList(p, v) => {
                    eb.list_append(p, v.clone(), false);
                }
                UpdateAction::PrependToList(p, v) => {
                    eb.list_append(p, v.clone(), true);
                }
                UpdateAction::SetListElement(p, idx, v) => {
                    eb.list_set(p, *idx, v.clone());
                }
                UpdateAction::RemoveFromListAt(p, idx) => {
                    eb.list_remove_at(p, *idx);
                }
                UpdateAction::DeleteFromSet(p, v) => {
                    eb.delete_from_set(p, v.clone());
                }
            }
        }

        let version_field = if self.condition_version.is_some() || !self.actions.is_empty() {
            self.descriptor.version_field()
        } else {
            None
        };

        if let Some(expected) = &self.condition_version {
            let field = version_field.ok_or_else(|| Error::validation("condition_version() requires a model with a version field"))?;
            eb.add_condition(field.in_memory_name, Op::Eq, vec![expected.clone()])?;
            eb.add(field.in_memory_name, AttrValue::N("1".to_string()));
        }

        for cond in &self.conditions {
            match cond {
                ConditionAction::Cmp(field, op, values) => {
                    eb.add_condition(field, *op, values.clone())?;
                }
                ConditionAction::Exists(field) => {
                    eb.add_condition(field, Op::Exists, vec![])?;
                }
                ConditionAction::NotExists(field) => {
                    eb.add_condition(field, Op::NotExists, vec![])?;
                }
            }
        }

        let components = eb.build();
        if components.update_clauses.is_empty() {
            return Err(Error::validation("update builder has no accumulated SET/ADD/REMOVE/DELETE clauses"));
        }

        Ok(CompiledWrite {
            table: self.descriptor.table_name.clone(),
            key: self.key.clone(),
            op: WriteOp::Update(components.update_clauses),
            condition: components.condition_string,
            return_values: self.return_values,
            name_placeholders: components.name_placeholders,
            value_placeholders: components.value_placeholders,
        })
    }

    fn executor(&self) -> Executor {
        Executor::new(self.backend.clone(), self.retry_override.unwrap_or(self.default_retry))
    }

    /// Issues the compiled `UpdateItem`, discarding any returned item.
    pub async fn execute(self) -> Result<()> {
        let plan = self.compile()?;
        self.executor().update_item(plan, None).await?;
        Ok(())
    }

    /// Issues the compiled `UpdateItem` and, when `return_values` is
    /// `ALL_NEW`/`UPDATED_NEW`, re-unmarshals the response (spec §4.7).
    pub async fn execute_with_result(self) -> Result<Option<T>> {
        let wants_item = matches!(self.return_values, ReturnValues::AllNew | ReturnValues::UpdatedNew);
        let plan = self.compile()?;
        let item = self.executor().update_item(plan, None).await?;
        if !wants_item {
            return Ok(None);
        }
        match item {
            Some(attrs) => Ok(Some(T::from_attrs(&attrs)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::testing::MockBackend;
    use chrono::{DateTime, Utc};
    use dynamorm_core::{DescriptorBuilder, FieldDescriptor, Role};
    use std::collections::BTreeMap;

    struct Note {
        id: String,
    }

    impl Model for Note {
        const TYPE_NAME: &'static str = "Note";

        fn build_descriptor() -> dynamorm_core::Result<Descriptor> {
            DescriptorBuilder::new(Self::TYPE_NAME, "notes")
                .field(FieldDescriptor {
                    in_memory_name: "id",
                    dbname: "id".to_string(),
                    role: Role::Pk,
                    is_set: false,
                    is_json_blob: false,
                    omit_if_empty: false,
                })
                .field(FieldDescriptor {
                    in_memory_name: "updated_at",
                    dbname: "updated_at".to_string(),
                    role: Role::UpdatedAt,
                    is_set: false,
                    is_json_blob: false,
                    omit_if_empty: false,
                })
                .build()
        }

        fn into_attrs(self) -> BTreeMap<String, AttrValue> {
            let mut m = BTreeMap::new();
            m.insert("id".to_string(), AttrValue::S(self.id));
            m
        }

        fn from_attrs(attrs: &BTreeMap<String, AttrValue>) -> dynamorm_core::Result<Self> {
            match attrs.get("id") {
                Some(AttrValue::S(s)) => Ok(Note { id: s.clone() }),
                _ => Err(dynamorm_core::CoreError::UnsupportedKind("id".into())),
            }
        }
    }

    #[tokio::test]
    async fn every_update_implicitly_bumps_updated_at() {
        let backend = Arc::new(MockBackend::new());
        let key = vec![("id".to_string(), AttrValue::S("a".to_string()))];
        backend.seed("notes", key.clone(), Note { id: "a".into() }.into_attrs());
        let descriptor = Arc::new(Note::build_descriptor().unwrap());
        let fixed = DateTime::parse_from_rfc3339("2024-06-01T00:00:00Z").unwrap().with_timezone(&Utc);
        let clock = Arc::new(FixedClock::new(fixed));

        let builder =
            UpdateBuilder::<Note>::with_clock(descriptor, backend.clone(), RetryPolicy::default(), key.clone(), clock)
                .condition_exists("id");
        builder.execute().await.unwrap();

        let stored = backend.get("notes", &key).unwrap();
        assert_eq!(stored.get("updated_at"), Some(&AttrValue::S(fixed.to_rfc3339())));
    }

    #[test]
    fn set_if_not_exists_takes_a_single_default_value() {
        let descriptor = Arc::new(Note::build_descriptor().unwrap());
        let builder = UpdateBuilder::<Note>::new(
            descriptor,
            Arc::new(MockBackend::new()),
            RetryPolicy::default(),
            vec![("id".to_string(), AttrValue::S("a".to_string()))],
        )
        .set_if_not_exists("count", AttrValue::N("0".to_string()));
        let plan = builder.compile().unwrap();
        match plan.op {
            WriteOp::Update(clauses) => {
                let rendered = clauses.render().unwrap();
                assert!(rendered.contains("if_not_exists"));
            }
            _ => panic!("expected an update op"),
        }
    }
}
