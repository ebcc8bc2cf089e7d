//! The external-collaborator seam (spec §6): the wire surface a managed
//! NoSQL backend exposes, modeled as an async trait so the executor and
//! batch engine can suspend only at this boundary (spec §5). Nothing in this
//! crate depends on a concrete SDK type; callers plug in their own
//! [`BackendClient`] implementation (or use [`crate::testing::MockBackend`]
//! for tests).

use std::collections::BTreeMap;

use async_trait::async_trait;
use dynamorm_core::AttrValue;
use dynamorm_expr::UpdateClauses;

use crate::cursor::KeyMap;
use crate::error::Result;

pub type Item = BTreeMap<String, AttrValue>;

/// `ReturnValues` mode for a write, mirroring the wire surface in spec §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReturnValues {
    #[default]
    None,
    AllOld,
    AllNew,
    UpdatedOld,
    UpdatedNew,
}

/// A direct-key `GetItem` request: the executor's fast path, bypassing the
/// expression builder entirely (spec §4.7).
#[derive(Debug, Clone)]
pub struct GetPlan {
    pub table: String,
    pub key: KeyMap,
    pub consistent_read: bool,
    pub projection: Option<String>,
    pub name_placeholders: BTreeMap<String, String>,
}

/// A `Query`/`Scan` request.
#[derive(Debug, Clone, Default)]
pub struct CompiledRead {
    pub table: String,
    pub index: Option<String>,
    pub key_condition: Option<String>,
    pub filter: Option<String>,
    pub projection: Option<String>,
    pub limit: Option<usize>,
    pub start_key: Option<KeyMap>,
    pub consistent_read: bool,
    pub forward: bool,
    pub count_only: bool,
    pub name_placeholders: BTreeMap<String, String>,
    pub value_placeholders: BTreeMap<String, AttrValue>,
}

/// What kind of write a [`CompiledWrite`] performs.
#[derive(Debug, Clone)]
pub enum WriteOp {
    Put(Item),
    Update(UpdateClauses),
    Delete,
}

/// A `PutItem`/`UpdateItem`/`DeleteItem` request.
#[derive(Debug, Clone)]
pub struct CompiledWrite {
    pub table: String,
    pub key: KeyMap,
    pub op: WriteOp,
    pub condition: Option<String>,
    pub return_values: ReturnValues,
    pub name_placeholders: BTreeMap<String, String>,
    pub value_placeholders: BTreeMap<String, AttrValue>,
}

/// A page returned from `Query`/`Scan`.
#[derive(Debug, Clone, Default)]
pub struct QueryPage {
    pub items: Vec<Item>,
    pub last_evaluated_key: Option<KeyMap>,
    pub count: usize,
}

/// A `BatchGetItem` request for one table (one chunk, already bounded to the
/// backend's per-call ceiling by [`crate::batch::BatchEngine`]).
#[derive(Debug, Clone)]
pub struct CompiledBatchGet {
    pub table: String,
    pub keys: Vec<KeyMap>,
    pub consistent_read: bool,
    pub projection: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct BatchGetResult {
    pub items: Vec<Item>,
    pub unprocessed_keys: Vec<KeyMap>,
}

/// A `BatchWriteItem` request for one table (one chunk).
#[derive(Debug, Clone, Default)]
pub struct CompiledBatchWrite {
    pub table: String,
    pub puts: Vec<(KeyMap, Item)>,
    pub deletes: Vec<KeyMap>,
}

#[derive(Debug, Clone, Default)]
pub struct BatchWriteResult {
    pub unprocessed_puts: Vec<(KeyMap, Item)>,
    pub unprocessed_deletes: Vec<KeyMap>,
}

/// One operation within a `TransactWriteItems` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactKind {
    Put,
    Create,
    Update,
    Delete,
    ConditionCheck,
}

#[derive(Debug, Clone)]
pub struct TransactOp {
    pub kind: TransactKind,
    pub table: String,
    pub key: KeyMap,
    pub item: Option<Item>,
    pub update_expression: Option<String>,
    pub condition: Option<String>,
    pub name_placeholders: BTreeMap<String, String>,
    pub value_placeholders: BTreeMap<String, AttrValue>,
}

/// The backend client handle. Thread-safe by contract (spec §5): a single
/// shared handle serves many concurrent callers. Implementations decide how
/// network calls are made; this crate only ever calls through this trait.
#[async_trait]
pub trait BackendClient: Send + Sync {
    async fn get_item(&self, plan: GetPlan) -> Result<Option<Item>>;
    async fn query(&self, plan: CompiledRead) -> Result<QueryPage>;
    async fn scan(&self, plan: CompiledRead, segment: Option<(u32, u32)>) -> Result<QueryPage>;
    async fn put_item(&self, plan: CompiledWrite) -> Result<Option<Item>>;
    async fn update_item(&self, plan: CompiledWrite) -> Result<Option<Item>>;
    async fn delete_item(&self, plan: CompiledWrite) -> Result<Option<Item>>;
    async fn batch_get_item(&self, plan: CompiledBatchGet) -> Result<BatchGetResult>;
    async fn batch_write_item(&self, plan: CompiledBatchWrite) -> Result<BatchWriteResult>;
    async fn transact_write_items(&self, ops: Vec<TransactOp>, client_request_token: String) -> Result<()>;
}
