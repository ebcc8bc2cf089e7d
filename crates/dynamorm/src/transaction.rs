//! Transaction Builder (C9): composes up to [`MAX_TRANSACT_OPS`] writes into
//! one `TransactWriteItems` call with all-or-nothing atomicity (spec §4.9).
//!
//! Builder methods accumulate boxed thunks rather than compiling eagerly
//! (the same deferred-validation shape as [`crate::query`]/[`crate::update`]):
//! each thunk closes over its item and resolves the item's [`Descriptor`]
//! against the registry only once `execute()` runs, so a malformed model
//! surfaces at the usual `Result`-returning boundary instead of mid-chain.
//! `update_with_builder` is the one spec-named exception to "every builder
//! method takes `self`, returns `Self`" (design note §9): it alone accepts a
//! closure, because a single update needs its own small sub-chain of
//! `SET`/`ADD`/`REMOVE`/`DELETE` actions.

use std::marker::PhantomData;
use std::sync::Arc;

use dynamorm_config::RetryPolicy;
use dynamorm_core::{AttrValue, Descriptor, Model, Registry, Role};
use dynamorm_expr::{ExpressionBuilder, Op};

use tracing::debug;

use crate::backend::{BackendClient, Item, TransactKind, TransactOp};
use crate::clock::{stamp_timestamps, Clock, SystemClock};
use crate::error::{Error, Result};
use crate::query::key_map_from_attrs;
use crate::retry::with_retry;

/// DynamoDB's own `TransactWriteItems` ceiling; composing more ops than this
/// is a `Validation` error rather than a silently-truncated request.
const MAX_TRANSACT_OPS: usize = 100;

/// `TransactionCanceled` is retried only when every reason is
/// `ThrottlingError`, and only up to this many times (spec §4.9), regardless
/// of the caller's configured retry policy.
const MAX_TRANSACT_RETRIES: u32 = 3;

type Conditions = Vec<(String, Op, Vec<AttrValue>)>;
type OpThunk = Box<dyn FnOnce(&Registry) -> Result<TransactOp> + Send>;

/// A single `SET`/`ADD`/`REMOVE`/`DELETE` action accumulated by
/// [`TxUpdate`], mirroring [`crate::update`]'s private action enum but
/// scoped to one item within a transaction.
enum TxUpdateAction {
    Set(String, AttrValue),
    Add(String, AttrValue),
    Remove(String),
    AppendToList(String, AttrValue),
    PrependToList(String, AttrValue),
    DeleteFromSet(String, AttrValue),
}

/// The short-lived sub-builder `update_with_builder` hands to its closure:
/// the same mutation vocabulary as [`crate::update::UpdateBuilder`], minus
/// the backend/key/retry plumbing a standalone update needs, since execution
/// happens once as part of the whole transaction.
pub struct TxUpdate<T: Model> {
    actions: Vec<TxUpdateAction>,
    conditions: Conditions,
    _marker: PhantomData<T>,
}

impl<T: Model> TxUpdate<T> {
    fn new() -> Self {
        Self {
            actions: Vec::new(),
            conditions: Vec::new(),
            _marker: PhantomData,
        }
    }

    pub fn set(mut self, path: impl Into<String>, value: AttrValue) -> Self {
        self.actions.push(TxUpdateAction::Set(path.into(), value));
        self
    }

    pub fn add(mut self, path: impl Into<String>, number_or_set: AttrValue) -> Self {
        self.actions.push(TxUpdateAction::Add(path.into(), number_or_set));
        self
    }

    pub fn increment(self, path: impl Into<String>) -> Self {
        self.add(path, AttrValue::N("1".to_string()))
    }

    pub fn decrement(self, path: impl Into<String>) -> Self {
        self.add(path, AttrValue::N("-1".to_string()))
    }

    pub fn remove(mut self, path: impl Into<String>) -> Self {
        self.actions.push(TxUpdateAction::Remove(path.into()));
        self
    }

    pub fn append_to_list(mut self, path: impl Into<String>, items: AttrValue) -> Self {
        self.actions.push(TxUpdateAction::AppendToList(path.into(), items));
        self
    }

    pub fn prepend_to_list(mut self, path: impl Into<String>, items: AttrValue) -> Self {
        self.actions.push(TxUpdateAction::PrependToList(path.into(), items));
        self
    }

    pub fn delete_from_set(mut self, path: impl Into<String>, items: AttrValue) -> Self {
        self.actions.push(TxUpdateAction::DeleteFromSet(path.into(), items));
        self
    }

    pub fn condition(mut self, field: impl Into<String>, op: Op, values: Vec<AttrValue>) -> Self {
        self.conditions.push((field.into(), op, values));
        self
    }
}

/// The fluent transaction builder. Not generic over any one record type —
/// each operation carries its own `T` at the call site, erased into an
/// [`OpThunk`] so heterogeneous item types can share one `Vec`.
pub struct TransactionBuilder {
    backend: Arc<dyn BackendClient>,
    registry: Arc<Registry>,
    default_retry: RetryPolicy,
    ops: Vec<OpThunk>,
    idempotency_token: String,
    clock: Arc<dyn Clock>,
}

impl TransactionBuilder {
    pub(crate) fn new(backend: Arc<dyn BackendClient>, registry: Arc<Registry>, default_retry: RetryPolicy) -> Self {
        Self::with_clock(backend, registry, default_retry, Arc::new(SystemClock))
    }

    pub(crate) fn with_clock(backend: Arc<dyn BackendClient>, registry: Arc<Registry>, default_retry: RetryPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            backend,
            registry,
            default_retry,
            ops: Vec::new(),
            idempotency_token: uuid::Uuid::new_v4().to_string(),
            clock,
        }
    }

    /// `PutItem`, unconditionally overwriting any existing item unless
    /// `conditions` says otherwise.
    pub fn put<T: Model + 'static>(mut self, item: T, conditions: Conditions) -> Self {
        let clock = self.clock.clone();
        self.ops.push(Box::new(move |registry| {
            let descriptor = registry.descriptor_for::<T>()?;
            let mut attrs = item.into_attrs();
            stamp_timestamps(&descriptor, &mut attrs, clock.as_ref(), false);
            let key = key_map_from_attrs(&descriptor, &attrs)?;
            let components = compile_conditions(&descriptor, &conditions)?;
            Ok(TransactOp {
                kind: TransactKind::Put,
                table: descriptor.table_name.clone(),
                key,
                item: Some(attrs),
                update_expression: None,
                condition: components.condition_string,
                name_placeholders: components.name_placeholders,
                value_placeholders: components.value_placeholders,
            })
        }));
        self
    }

    /// `PutItem` with an implied `attribute_not_exists(PK)` guard, ANDed
    /// with any explicit `conditions`.
    pub fn create<T: Model + 'static>(mut self, item: T, conditions: Conditions) -> Self {
        let clock = self.clock.clone();
        self.ops.push(Box::new(move |registry| {
            let descriptor = registry.descriptor_for::<T>()?;
            let mut attrs = item.into_attrs();
            stamp_timestamps(&descriptor, &mut attrs, clock.as_ref(), true);
            if let Some(version_field) = descriptor.version_field() {
                attrs.insert(version_field.dbname.clone(), AttrValue::N("1".to_string()));
            }
            let key = key_map_from_attrs(&descriptor, &attrs)?;
            let mut eb = new_expression_builder(&descriptor);
            eb.add_condition(&descriptor.partition_key.dbname, Op::NotExists, vec![])?;
            apply_conditions(&mut eb, &conditions)?;
            let components = eb.build();
            Ok(TransactOp {
                kind: TransactKind::Create,
                table: descriptor.table_name.clone(),
                key,
                item: Some(attrs),
                update_expression: None,
                condition: components.condition_string,
                name_placeholders: components.name_placeholders,
                value_placeholders: components.value_placeholders,
            })
        }));
        self
    }

    /// `UpdateItem` over a fixed set of fields read off `item`'s own
    /// attribute map. When the model carries a version field and
    /// `conditions` gives no explicit condition on it, an
    /// `version = <current>` guard plus a matching `ADD version 1` clause is
    /// implied (spec §4.9).
    pub fn update<T: Model + 'static>(mut self, item: T, fields: &'static [&'static str], conditions: Conditions) -> Self {
        let clock = self.clock.clone();
        self.ops.push(Box::new(move |registry| {
            let descriptor = registry.descriptor_for::<T>()?;
            let attrs = item.into_attrs();
            let key = key_map_from_attrs(&descriptor, &attrs)?;

            let mut eb = new_expression_builder(&descriptor);
            for field in fields {
                let fd = descriptor.field_by_name(field).ok_or_else(|| {
                    Error::validation(format!("model {} has no field named {field:?}", descriptor.type_name))
                })?;
                let value = attrs.get(&fd.dbname).cloned().ok_or_else(|| {
                    Error::validation(format!("item is missing its {field:?} attribute at update time"))
                })?;
                eb.set(field, value);
            }
            if let Some(updated_at) = descriptor.attributes().find(|fd| fd.role == Role::UpdatedAt) {
                eb.set(updated_at.in_memory_name, AttrValue::S(clock.now_utc().to_rfc3339()));
            }

            apply_implied_version(&mut eb, &descriptor, &attrs, &conditions)?;
            apply_conditions(&mut eb, &conditions)?;

            let components = eb.build();
            let update_expression = components.update_clauses.render();
            Ok(TransactOp {
                kind: TransactKind::Update,
                table: descriptor.table_name.clone(),
                key,
                item: None,
                update_expression,
                condition: components.condition_string,
                name_placeholders: components.name_placeholders,
                value_placeholders: components.value_placeholders,
            })
        }));
        self
    }

    /// `UpdateItem` composed via a [`TxUpdate`] sub-chain — the one operation
    /// that needs more than a flat field list (list/set mutations, mixed
    /// `ADD`/`REMOVE`). Same implied-version rule as [`Self::update`].
    pub fn update_with_builder<T, F>(mut self, item: T, f: F) -> Self
    where
        T: Model + 'static,
        F: FnOnce(TxUpdate<T>) -> TxUpdate<T> + Send + 'static,
    {
        let clock = self.clock.clone();
        self.ops.push(Box::new(move |registry| {
            let descriptor = registry.descriptor_for::<T>()?;
            let attrs = item.into_attrs();
            let key = key_map_from_attrs(&descriptor, &attrs)?;
            let built = f(TxUpdate::new());

            let mut eb = new_expression_builder(&descriptor);
            if let Some(updated_at) = descriptor.attributes().find(|fd| fd.role == Role::UpdatedAt) {
                eb.set(updated_at.in_memory_name, AttrValue::S(clock.now_utc().to_rfc3339()));
            }
            for action in built.actions {
                match action {
                    TxUpdateAction::Set(p, v) => {
                        eb.set(&p, v);
                    }
                    TxUpdateAction::Add(p, v) => {
                        eb.add(&p, v);
                    }
                    TxUpdateAction::Remove(p) => {
                        eb.remove(&p);
                    }
                    TxUpdateAction::AppendToList(p, v) => {
                        eb.list_append(&p, v, false);
                    }
                    TxUpdateAction::PrependToList(p, v) => {
                        eb.list_append(&p, v, true);
                    }
                    TxUpdateAction::DeleteFromSet(p, v) => {
                        eb.delete_from_set(&p, v);
                    }
                }
            }

            apply_implied_version(&mut eb, &descriptor, &attrs, &built.conditions)?;
            apply_conditions(&mut eb, &built.conditions)?;

            let components = eb.build();
            if components.update_clauses.is_empty() {
                return Err(Error::validation("update_with_builder produced no SET/ADD/REMOVE/DELETE clauses"));
            }
            let update_expression = components.update_clauses.render();
            Ok(TransactOp {
                kind: TransactKind::Update,
                table: descriptor.table_name.clone(),
                key,
                item: None,
                update_expression,
                condition: components.condition_string,
                name_placeholders: components.name_placeholders,
                value_placeholders: components.value_placeholders,
            })
        }));
        self
    }

    /// `DeleteItem`, with the same implied-version guard as `update` when
    /// the model has a version field and no explicit version condition.
    pub fn delete<T: Model + 'static>(mut self, item: T, conditions: Conditions) -> Self {
        self.ops.push(Box::new(move |registry| {
            let descriptor = registry.descriptor_for::<T>()?;
            let attrs = item.into_attrs();
            let key = key_map_from_attrs(&descriptor, &attrs)?;
            let mut eb = new_expression_builder(&descriptor);
            apply_implied_version(&mut eb, &descriptor, &attrs, &conditions)?;
            apply_conditions(&mut eb, &conditions)?;
            let components = eb.build();
            Ok(TransactOp {
                kind: TransactKind::Delete,
                table: descriptor.table_name.clone(),
                key,
                item: None,
                update_expression: None,
                condition: components.condition_string,
                name_placeholders: components.name_placeholders,
                value_placeholders: components.value_placeholders,
            })
        }));
        self
    }

    /// A no-op write: asserts `conditions` against `item`'s current state
    /// without mutating it, purely to gate the rest of the transaction.
    pub fn condition_check<T: Model + 'static>(mut self, item: T, conditions: Conditions) -> Self {
        self.ops.push(Box::new(move |registry| {
            let descriptor = registry.descriptor_for::<T>()?;
            let attrs = item.into_attrs();
            let key = key_map_from_attrs(&descriptor, &attrs)?;
            let components = compile_conditions(&descriptor, &conditions)?;
            if components.condition_string.is_none() {
                return Err(Error::validation("condition_check requires at least one condition"));
            }
            Ok(TransactOp {
                kind: TransactKind::ConditionCheck,
                table: descriptor.table_name.clone(),
                key,
                item: None,
                update_expression: None,
                condition: components.condition_string,
                name_placeholders: components.name_placeholders,
                value_placeholders: components.value_placeholders,
            })
        }));
        self
    }

    /// Resolves every accumulated thunk against the registry, then issues
    /// `TransactWriteItems`. The same `client_request_token` is reused across
    /// every retry of this composed transaction, so the backend dedupes
    /// against a prior partial success rather than double-applying it.
    pub async fn execute(self) -> Result<()> {
        if self.ops.is_empty() {
            return Err(Error::validation("transaction has no accumulated operations"));
        }
        if self.ops.len() > MAX_TRANSACT_OPS {
            return Err(Error::validation(format!(
                "transaction has {} operations, exceeding the {MAX_TRANSACT_OPS}-operation limit",
                self.ops.len()
            )));
        }

        let registry = self.registry;
        let backend = self.backend;
        let token = self.idempotency_token;
        let compiled: Result<Vec<TransactOp>> = self.ops.into_iter().map(|thunk| thunk(&registry)).collect();
        let compiled = compiled?;
        debug!(op_count = compiled.len(), token = %token, "issuing TransactWriteItems");

        let mut policy = self.default_retry;
        policy.max_retries = policy.max_retries.min(MAX_TRANSACT_RETRIES);

        with_retry(&policy, || {
            let ops = compiled.clone();
            let backend = backend.clone();
            let token = token.clone();
            async move { backend.transact_write_items(ops, token).await }
        })
        .await
    }
}

/// An `ExpressionBuilder` whose placeholder table resolves every
/// caller-facing field name to its backend attribute name (spec §4
/// property 2), mirroring [`crate::query::QueryBuilder::new_expression_builder`]
/// and [`crate::update::UpdateBuilder::new_expression_builder`].
fn new_expression_builder(descriptor: &Arc<Descriptor>) -> ExpressionBuilder {
    let descriptor = descriptor.clone();
    ExpressionBuilder::new().with_name_resolver(move |field: &str| {
        descriptor
            .field_by_name(field)
            .map(|fd| fd.dbname.clone())
            .unwrap_or_else(|| field.to_string())
    })
}

fn apply_conditions(eb: &mut ExpressionBuilder, conditions: &Conditions) -> Result<()> {
    for (field, op, values) in conditions {
        eb.add_condition(field, *op, values.clone())?;
    }
    Ok(())
}

fn compile_conditions(descriptor: &Arc<Descriptor>, conditions: &Conditions) -> Result<dynamorm_expr::ExpressionComponents> {
    let mut eb = new_expression_builder(descriptor);
    apply_conditions(&mut eb, conditions)?;
    Ok(eb.build())
}

/// Implies `version = <current>` (plus `ADD version 1`) when the model has a
/// version field and `conditions` doesn't already reference it (spec §4.9:
/// "Update/Delete get an implied optimistic-concurrency guard").
fn apply_implied_version(eb: &mut ExpressionBuilder, descriptor: &Descriptor, attrs: &Item, conditions: &Conditions) -> Result<()> {
    let Some(version_field) = descriptor.version_field() else {
        return Ok(());
    };
    let already_conditioned = conditions.iter().any(|(field, _, _)| field == version_field.in_memory_name);
    if already_conditioned {
        return Ok(());
    }
    let current = attrs.get(&version_field.dbname).cloned().unwrap_or_else(|| AttrValue::N("0".to_string()));
    eb.add_condition(version_field.in_memory_name, Op::Eq, vec![current])?;
    eb.add(version_field.in_memory_name, AttrValue::N("1".to_string()));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockBackend;
    use dynamorm_core::{DescriptorBuilder, FieldDescriptor, Role};
    use std::collections::BTreeMap;

    #[derive(Clone)]
    struct Account {
        id: String,
        balance: i64,
    }

    impl Model for Account {
        const TYPE_NAME: &'static str = "Account";

        fn build_descriptor() -> dynamorm_core::Result<Descriptor> {
            DescriptorBuilder::new(Self::TYPE_NAME, "accounts")
                .field(FieldDescriptor {
                    in_memory_name: "id",
                    dbname: "id".to_string(),
                    role: Role::Pk,
                    is_set: false,
                    is_json_blob: false,
                    omit_if_empty: false,
                })
                .field(FieldDescriptor {
                    in_memory_name: "balance",
                    dbname: "balance".to_string(),
                    role: Role::Plain,
                    is_set: false,
                    is_json_blob: false,
                    omit_if_empty: false,
                })
                .build()
        }

        fn into_attrs(self) -> BTreeMap<String, AttrValue> {
            let mut m = BTreeMap::new();
            m.insert("id".to_string(), AttrValue::S(self.id));
            m.insert("balance".to_string(), AttrValue::N(self.balance.to_string()));
            m
        }

        fn from_attrs(attrs: &BTreeMap<String, AttrValue>) -> dynamorm_core::Result<Self> {
            let id = match attrs.get("id") {
                Some(AttrValue::S(s)) => s.clone(),
                _ => return Err(dynamorm_core::CoreError::UnsupportedKind("id".into())),
            };
            let balance = match attrs.get("balance") {
                Some(AttrValue::N(n)) => n.parse().unwrap_or(0),
                _ => 0,
            };
            Ok(Account { id, balance })
        }
    }

    fn setup() -> (Arc<MockBackend>, Arc<Registry>) {
        (Arc::new(MockBackend::new()), Arc::new(Registry::new()))
    }

    #[tokio::test]
    async fn transfer_moves_balance_atomically() {
        let (mock, registry) = setup();
        mock.seed(
            "accounts",
            vec![("id".to_string(), AttrValue::S("a".to_string()))],
            Account { id: "a".into(), balance: 100 }.into_attrs(),
        );
        mock.seed(
            "accounts",
            vec![("id".to_string(), AttrValue::S("b".to_string()))],
            Account { id: "b".into(), balance: 0 }.into_attrs(),
        );

        let tx = TransactionBuilder::new(mock.clone(), registry, RetryPolicy::default());
        tx.update_with_builder(Account { id: "a".into(), balance: 100 }, |b| b.add("balance", AttrValue::N("-40".to_string())))
            .update_with_builder(Account { id: "b".into(), balance: 0 }, |b| b.add("balance", AttrValue::N("40".to_string())))
            .execute()
            .await
            .unwrap();

        let a = mock.get("accounts", &vec![("id".to_string(), AttrValue::S("a".to_string()))]).unwrap();
        let b = mock.get("accounts", &vec![("id".to_string(), AttrValue::S("b".to_string()))]).unwrap();
        assert_eq!(a.get("balance"), Some(&AttrValue::N("60".to_string())));
        assert_eq!(b.get("balance"), Some(&AttrValue::N("40".to_string())));
    }

    #[tokio::test]
    async fn failing_condition_leaves_every_item_untouched() {
        let (mock, registry) = setup();
        mock.seed(
            "accounts",
            vec![("id".to_string(), AttrValue::S("a".to_string()))],
            Account { id: "a".into(), balance: 10 }.into_attrs(),
        );
        mock.seed(
            "accounts",
            vec![("id".to_string(), AttrValue::S("b".to_string()))],
            Account { id: "b".into(), balance: 0 }.into_attrs(),
        );

        let tx = TransactionBuilder::new(mock.clone(), registry, RetryPolicy::default());
        let result = tx
            .update_with_builder(Account { id: "a".into(), balance: 10 }, |b| {
                b.add("balance", AttrValue::N("-40".to_string()))
                    .condition("balance", Op::Ge, vec![AttrValue::N("40".to_string())])
            })
            .update_with_builder(Account { id: "b".into(), balance: 0 }, |b| b.add("balance", AttrValue::N("40".to_string())))
            .execute()
            .await;

        assert!(matches!(result, Err(Error::TransactionCanceled { .. })));
        let a = mock.get("accounts", &vec![("id".to_string(), AttrValue::S("a".to_string()))]).unwrap();
        assert_eq!(a.get("balance"), Some(&AttrValue::N("10".to_string())));
    }

    #[tokio::test]
    async fn empty_transaction_is_rejected() {
        let (mock, registry) = setup();
        let tx = TransactionBuilder::new(mock, registry, RetryPolicy::default());
        let result = tx.execute().await;
        assert!(matches!(result, Err(Error::Validation(_))));
    }
}
