//! Query Builder (C5): the fluent, owned (self-consuming) chain users build
//! reads and conditional writes with. Each method takes `self` by value and
//! returns `Self` (design note §9) so a compiled plan is consumable exactly
//! once; terminals are generic over `T: Model` instead of a `dest: &mut dyn
//! Any` sink.

use std::marker::PhantomData;
use std::sync::Arc;

use dynamorm_config::RetryPolicy;
use dynamorm_core::{AttrValue, Descriptor, Model, Role};
use dynamorm_expr::{ExpressionBuilder, GroupBuilder, Op};

use crate::backend::{BackendClient, CompiledRead, CompiledWrite, GetPlan, Item, ReturnValues, WriteOp};
use crate::clock::{stamp_timestamps, Clock, SystemClock};
use crate::cursor::{self, KeyMap};
use crate::error::{Error, Result};
use crate::executor::Executor;
use crate::planner::{plan_read, KeyCondition, PlanInput, PlannedMode};

type GroupFn = Box<dyn FnOnce(&mut GroupBuilder) -> dynamorm_expr::Result<()> + Send>;

enum FilterAction {
    And(String, Op, Vec<AttrValue>),
    Or(String, Op, Vec<AttrValue>),
    Group(GroupFn),
    OrGroup(GroupFn),
}

enum WriteCondition {
    And(String, Op, Vec<AttrValue>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

/// The fluent query builder for a specific record type `T`.
pub struct QueryBuilder<T: Model> {
    descriptor: Arc<Descriptor>,
    backend: Arc<dyn BackendClient>,
    default_retry: RetryPolicy,
    wheres: Vec<(String, Op, Vec<AttrValue>)>,
    filters: Vec<FilterAction>,
    write_conditions: Vec<WriteCondition>,
    if_not_exists: bool,
    if_exists: bool,
    explicit_index: Option<String>,
    order: Option<(String, Direction)>,
    limit: Option<usize>,
    offset: Option<usize>,
    cursor: Option<String>,
    projection: Vec<String>,
    consistent_read: bool,
    retry_override: Option<RetryPolicy>,
    explicit_scan: bool,
    clock: Arc<dyn Clock>,
    _marker: PhantomData<T>,
}

impl<T: Model> QueryBuilder<T> {
    pub(crate) fn new(descriptor: Arc<Descriptor>, backend: Arc<dyn BackendClient>, default_retry: RetryPolicy) -> Self {
        Self::with_clock(descriptor, backend, default_retry, Arc::new(SystemClock))
    }

    pub(crate) fn with_clock(
        descriptor: Arc<Descriptor>,
        backend: Arc<dyn BackendClient>,
        default_retry: RetryPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            descriptor,
            backend,
            default_retry,
            wheres: Vec::new(),
            filters: Vec::new(),
            write_conditions: Vec::new(),
            if_not_exists: false,
            if_exists: false,
            explicit_index: None,
            order: None,
            limit: None,
            offset: None,
            cursor: None,
            projection: Vec::new(),
            consistent_read: false,
            retry_override: None,
            explicit_scan: false,
            clock,
            _marker: PhantomData,
        }
    }

    /// Equality (or key-operator) condition. A condition on the record's PK
    /// or SK (or an index's key fields) refines the key condition; a
    /// condition on any other attribute is demoted to a filter at compile
    /// time (spec §4.4 edge case).
    pub fn r#where(mut self, field: impl Into<String>, op: Op, values: Vec<AttrValue>) -> Self {
        self.wheres.push((field.into(), op, values));
        self
    }

    pub fn filter(mut self, field: impl Into<String>, op: Op, values: Vec<AttrValue>) -> Self {
        self.filters.push(FilterAction::And(field.into(), op, values));
        self
    }

    pub fn or_filter(mut self, field: impl Into<String>, op: Op, values: Vec<AttrValue>) -> Self {
        self.filters.push(FilterAction::Or(field.into(), op, values));
        self
    }

    pub fn filter_group<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&mut GroupBuilder) -> dynamorm_expr::Result<()> + Send + 'static,
    {
        self.filters.push(FilterAction::Group(Box::new(f)));
        self
    }

    pub fn or_filter_group<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&mut GroupBuilder) -> dynamorm_expr::Result<()> + Send + 'static,
    {
        self.filters.push(FilterAction::OrGroup(Box::new(f)));
        self
    }

    pub fn index(mut self, name: impl Into<String>) -> Self {
        self.explicit_index = Some(name.into());
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, dir: Direction) -> Self {
        self.order = Some((field.into(), dir));
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn offset(mut self, n: usize) -> Self {
        self.offset = Some(n);
        self
    }

    pub fn cursor(mut self, cursor: impl Into<String>) -> Self {
        self.cursor = Some(cursor.into());
        self
    }

    pub fn select(mut self, fields: &[&str]) -> Self {
        self.projection = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    /// Main-table strong consistency. Silently ignored (not an error) when
    /// the compiled plan ends up reading a secondary index (spec §4.5).
    pub fn consistent_read(mut self) -> Self {
        self.consistent_read = true;
        self
    }

    pub fn with_retry(mut self, max: u32, initial_delay: std::time::Duration) -> Self {
        let mut policy = self.retry_override.unwrap_or(self.default_retry);
        policy.max_retries = max;
        policy.initial_delay = initial_delay;
        self.retry_override = Some(policy);
        self
    }

    pub fn if_not_exists(mut self) -> Self {
        self.if_not_exists = true;
        self
    }

    pub fn if_exists(mut self) -> Self {
        self.if_exists = true;
        self
    }

    pub fn with_condition(mut self, field: impl Into<String>, op: Op, values: Vec<AttrValue>) -> Self {
        self.write_conditions.push(WriteCondition::And(field.into(), op, values));
        self
    }

    fn is_key_field(&self, field: &str) -> bool {
        self.descriptor
            .field_by_name(field)
            .map(|f| {
                matches!(
                    f.role,
                    Role::Pk | Role::Sk | Role::GsiPk | Role::GsiSk | Role::LsiSk
                )
            })
            .unwrap_or(false)
    }

    fn apply_filters(&mut self, eb: &mut ExpressionBuilder, actions: Vec<FilterAction>) -> Result<()> {
        for action in actions {
            match action {
                FilterAction::And(f, op, v) => {
                    eb.add_filter(&f, op, v)?;
                }
                FilterAction::Or(f, op, v) => {
                    eb.or_filter(&f, op, v)?;
                }
                FilterAction::Group(f) => {
                    eb.filter_group(f)?;
                }
                FilterAction::OrGroup(f) => {
                    eb.or_filter_group(f)?;
                }
            }
        }
        Ok(())
    }

    fn apply_write_conditions(&self, eb: &mut ExpressionBuilder) -> Result<()> {
        if self.if_not_exists {
            eb.add_condition(&self.descriptor.partition_key.dbname, Op::NotExists, vec![])?;
        }
        if self.if_exists {
            eb.add_condition(&self.descriptor.partition_key.dbname, Op::Exists, vec![])?;
        }
        for cond in &self.write_conditions {
            let WriteCondition::And(field, op, values) = cond;
            eb.add_condition(field, *op, values.clone())?;
        }
        Ok(())
    }

    /// Installs a resolver that translates the user-facing (in-memory)
    /// field name to the backend's stored attribute name, so every
    /// `ExpressionBuilder` placeholder — including ones allocated from
    /// inside a `filter_group`/`or_filter_group` closure — resolves to the
    /// actual dbname (spec §4 property 2), not the Rust struct field name.
    fn new_expression_builder(&self) -> ExpressionBuilder {
        let descriptor = self.descriptor.clone();
        ExpressionBuilder::new().with_name_resolver(move |field: &str| {
            descriptor
                .field_by_name(field)
                .map(|fd| fd.dbname.clone())
                .unwrap_or_else(|| field.to_string())
        })
    }

    /// Classifies accumulated `where` clauses, composes the expression
    /// bundle, and asks the planner for an operation mode.
    fn compile_read(mut self) -> Result<(PlannedMode, dynamorm_expr::ExpressionComponents, KeyMap, Self)> {
        let mut eb = self.new_expression_builder();
        let mut key_conditions = Vec::new();
        let mut key_map: KeyMap = Vec::new();
        let wheres = std::mem::take(&mut self.wheres);
        let mut demoted = Vec::new();

        for (field, op, values) in wheres {
            if self.is_key_field(&field) {
                key_conditions.push(KeyCondition {
                    field: field.clone(),
                    op,
                });
                if op == Op::Eq {
                    if let Some(fd) = self.descriptor.field_by_name(&field) {
                        if let Some(v) = values.first() {
                            key_map.push((fd.dbname.clone(), v.clone()));
                        }
                    }
                }
                eb.add_key_condition(&field, op, values)?;
            } else {
                demoted.push((field, op, values));
            }
        }

        for (field, op, values) in demoted {
            eb.add_filter(&field, op, values)?;
        }

        let filters = std::mem::take(&mut self.filters);
        self.apply_filters(&mut eb, filters)?;

        if !self.projection.is_empty() {
            let refs: Vec<&str> = self.projection.iter().map(|s| s.as_str()).collect();
            eb.project(&refs);
        }

        let components = eb.build();

        let mode = plan_read(PlanInput {
            descriptor: &self.descriptor,
            conditions: &key_conditions,
            explicit_index: self.explicit_index.as_deref(),
            has_filter: components.filter_string.is_some(),
            has_order: self.order.is_some(),
            has_limit: self.limit.is_some(),
            has_cursor: self.cursor.is_some(),
            explicit_scan: self.explicit_scan,
        })?;

        Ok((mode, components, key_map, self))
    }

    fn executor(&self) -> Executor {
        Executor::new(self.backend.clone(), self.retry_override.unwrap_or(self.default_retry))
    }

    fn build_compiled_read(
        &self,
        index: Option<String>,
        components: &dynamorm_expr::ExpressionComponents,
        start_key: Option<KeyMap>,
        count_only: bool,
    ) -> CompiledRead {
        let forward = !matches!(self.order, Some((_, Direction::Desc)));
        CompiledRead {
            table: self.descriptor.table_name.clone(),
            index,
            key_condition: components.key_condition_string.clone(),
            filter: components.filter_string.clone(),
            projection: components.projection_string.clone(),
            limit: self.limit,
            start_key,
            consistent_read: self.consistent_read,
            forward,
            count_only,
            name_placeholders: components.name_placeholders.clone(),
            value_placeholders: components.value_placeholders.clone(),
        }
    }

    /// Plans via the index planner, fails with `ItemNotFound` if the
    /// backend returns no item.
    pub async fn first(self) -> Result<T> {
        let (mode, components, key_map, this) = self.compile_read()?;
        let executor = this.executor();
        let item = match mode {
            PlannedMode::Get => {
                let plan = GetPlan {
                    table: this.descriptor.table_name.clone(),
                    key: key_map,
                    consistent_read: this.consistent_read,
                    projection: components.projection_string.clone(),
                    name_placeholders: components.name_placeholders.clone(),
                };
                executor.get_item(plan, None).await?
            }
            PlannedMode::Query { index } => {
                let plan = this.build_compiled_read(index, &components, cursor_start(&this.cursor)?, false);
                executor.query(plan, None).await?.items.into_iter().next()
            }
            PlannedMode::Scan => {
                let plan = this.build_compiled_read(None, &components, cursor_start(&this.cursor)?, false);
                executor.scan(plan, None, None).await?.items.into_iter().next()
            }
        };
        let item = item.ok_or(Error::ItemNotFound)?;
        T::from_attrs(&item).map_err(Error::from)
    }

    /// Concatenates every page internally; order equals backend order.
    pub async fn all(self) -> Result<Vec<T>> {
        let (mode, components, key_map, this) = self.compile_read()?;
        let executor = this.executor();
        let items = match mode {
            PlannedMode::Get => {
                let plan = GetPlan {
                    table: this.descriptor.table_name.clone(),
                    key: key_map,
                    consistent_read: this.consistent_read,
                    projection: components.projection_string.clone(),
                    name_placeholders: components.name_placeholders.clone(),
                };
                executor.get_item(plan, None).await?.into_iter().collect()
            }
            PlannedMode::Query { index } => {
                fetch_all_pages(&executor, &this, index, &components, false).await?
            }
            PlannedMode::Scan => fetch_all_pages(&executor, &this, None, &components, true).await?,
        };
        let items = apply_offset(items, this.offset);
        items.into_iter().map(|i| T::from_attrs(&i).map_err(Error::from)).collect()
    }

    /// Fetches exactly one backend page.
    pub async fn all_paginated(self) -> Result<(Vec<T>, Option<String>, bool)> {
        let (mode, components, key_map, this) = self.compile_read()?;
        let executor = this.executor();
        let (items, next_cursor) = match mode {
            PlannedMode::Get => {
                let plan = GetPlan {
                    table: this.descriptor.table_name.clone(),
                    key: key_map,
                    consistent_read: this.consistent_read,
                    projection: components.projection_string.clone(),
                    name_placeholders: components.name_placeholders.clone(),
                };
                (executor.get_item(plan, None).await?.into_iter().collect(), None)
            }
            PlannedMode::Query { index } => {
                let start = cursor_start(&this.cursor)?;
                let plan = this.build_compiled_read(index, &components, start, false);
                let page = executor.query(plan, None).await?;
                let next = page.last_evaluated_key.as_ref().map(cursor::encode);
                (page.items, next)
            }
            PlannedMode::Scan => {
                let start = cursor_start(&this.cursor)?;
                let plan = this.build_compiled_read(None, &components, start, false);
                let page = executor.scan(plan, None, None).await?;
                let next = page.last_evaluated_key.as_ref().map(cursor::encode);
                (page.items, next)
            }
        };
        let has_more = next_cursor.is_some();
        let records: Result<Vec<T>> = items.into_iter().map(|i| T::from_attrs(&i).map_err(Error::from)).collect();
        Ok((records?, next_cursor, has_more))
    }

    /// Issues a Count-projection query/scan. For the `Get` fast path this
    /// degenerates to 0 or 1 (no point issuing a count-only request for a
    /// single-item lookup).
    pub async fn count(self) -> Result<usize> {
        let (mode, components, key_map, this) = self.compile_read()?;
        let executor = this.executor();
        let total = match mode {
            PlannedMode::Get => {
                let plan = GetPlan {
                    table: this.descriptor.table_name.clone(),
                    key: key_map,
                    consistent_read: this.consistent_read,
                    projection: components.projection_string.clone(),
                    name_placeholders: components.name_placeholders.clone(),
                };
                usize::from(executor.get_item(plan, None).await?.is_some())
            }
            PlannedMode::Query { index } => count_all_pages(&executor, &this, index, &components, false).await?,
            PlannedMode::Scan => count_all_pages(&executor, &this, None, &components, true).await?,
        };
        Ok(total)
    }

    /// Explicit full-table scan (never implicit from `first`/`all`).
    pub async fn scan(mut self) -> Result<Vec<T>> {
        self.explicit_scan = true;
        self.all().await
    }

    /// Issues one `PutItem` with `attribute_not_exists(PK)` implied only if
    /// `.if_not_exists()` was chained.
    pub async fn create(self, item: T) -> Result<()> {
        let descriptor = self.descriptor.clone();
        let clock = self.clock.clone();
        let mut eb = self.new_expression_builder();
        self.apply_write_conditions(&mut eb)?;
        let components = eb.build();
        let mut attrs = item.into_attrs();
        stamp_timestamps(&descriptor, &mut attrs, clock.as_ref(), true);
        if let Some(version_field) = descriptor.version_field() {
            attrs.insert(version_field.dbname.clone(), AttrValue::N("1".to_string()));
        }
        let key = key_map_from_attrs(&descriptor, &attrs)?;
        let plan = CompiledWrite {
            table: descriptor.table_name.clone(),
            key,
            op: WriteOp::Put(attrs),
            condition: components.condition_string,
            return_values: ReturnValues::None,
            name_placeholders: components.name_placeholders,
            value_placeholders: components.value_placeholders,
        };
        self.executor().put_item(plan, None).await?;
        Ok(())
    }

    /// Issues one `DeleteItem` against the key derived from `item`.
    pub async fn delete(self, item: T) -> Result<()> {
        let descriptor = self.descriptor.clone();
        let mut eb = self.new_expression_builder();
        self.apply_write_conditions(&mut eb)?;
        let components = eb.build();
        let attrs = item.into_attrs();
        let key = key_map_from_attrs(&descriptor, &attrs)?;
        let plan = CompiledWrite {
            table: descriptor.table_name.clone(),
            key,
            op: WriteOp::Delete,
            condition: components.condition_string,
            return_values: ReturnValues::None,
            name_placeholders: components.name_placeholders,
            value_placeholders: components.value_placeholders,
        };
        self.executor().delete_item(plan, None).await?;
        Ok(())
    }
}

fn cursor_start(cursor: &Option<String>) -> Result<Option<KeyMap>> {
    match cursor {
        Some(c) => Ok(Some(cursor::decode(c)?)),
        None => Ok(None),
    }
}

fn apply_offset(items: Vec<Item>, offset: Option<usize>) -> Vec<Item> {
    match offset {
        Some(n) => items.into_iter().skip(n).collect(),
        None => items,
    }
}

pub(crate) fn key_map_from_attrs(descriptor: &Descriptor, attrs: &Item) -> Result<KeyMap> {
    let mut key = Vec::new();
    let pk_dbname = &descriptor.partition_key.dbname;
    let pk_value = attrs
        .get(pk_dbname)
        .ok_or_else(|| Error::validation(format!("record is missing its partition key attribute {pk_dbname:?}")))?;
    key.push((pk_dbname.clone(), pk_value.clone()));
    if let Some(sk) = &descriptor.sort_key {
        let sk_value = attrs
            .get(&sk.dbname)
            .ok_or_else(|| Error::validation(format!("record is missing its sort key attribute {:?}", sk.dbname)))?;
        key.push((sk.dbname.clone(), sk_value.clone()));
    }
    Ok(key)
}

async fn fetch_all_pages<T: Model>(
    executor: &Executor,
    this: &QueryBuilder<T>,
    index: Option<String>,
    components: &dynamorm_expr::ExpressionComponents,
    is_scan: bool,
) -> Result<Vec<Item>> {
    let mut items = Vec::new();
    let mut start = cursor_start(&this.cursor)?;
    loop {
        let plan = this.build_compiled_read(index.clone(), components, start.take(), false);
        let page = if is_scan {
            executor.scan(plan, None, None).await?
        } else {
            executor.query(plan, None).await?
        };
        items.extend(page.items);
        if let Some(limit) = this.limit {
            if items.len() >= limit {
                items.truncate(limit);
                break;
            }
        }
        match page.last_evaluated_key {
            Some(next) => start = Some(next),
            None => break,
        }
    }
    Ok(items)
}

async fn count_all_pages<T: Model>(
    executor: &Executor,
    this: &QueryBuilder<T>,
    index: Option<String>,
    components: &dynamorm_expr::ExpressionComponents,
    is_scan: bool,
) -> Result<usize> {
    let mut total = 0usize;
    let mut start = None;
    loop {
        let plan = this.build_compiled_read(index.clone(), components, start.take(), true);
        let page = if is_scan {
            executor.scan(plan, None, None).await?
        } else {
            executor.query(plan, None).await?
        };
        total += page.count;
        match page.last_evaluated_key {
            Some(next) => start = Some(next),
            None => break,
        }
    }
    Ok(total)
}
