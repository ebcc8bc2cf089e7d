//! Batch Engine (C8): chunks `BatchGetItem`/`BatchWriteItem` calls to the
//! backend's per-call ceilings, retries unprocessed keys/items with jittered
//! backoff, and offers sequential or bounded-parallel execution (spec §4.8).

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dynamorm_config::RetryPolicy;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::debug;

use crate::backend::{BackendClient, CompiledBatchGet, CompiledBatchWrite, Item};
use crate::cursor::KeyMap;
use crate::error::Result;
use crate::retry::with_retry_while;

const MAX_BATCH_GET: usize = 100;
const MAX_BATCH_WRITE: usize = 25;

/// Cooperative cancellation handle: in-flight chunks run to completion, but
/// no further chunks are scheduled once set (spec §5).
#[derive(Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// How chunks are scheduled against the backend.
pub enum ExecutionMode {
    Sequential,
    Parallel { concurrency: usize },
}

type ProgressCallback = Arc<dyn Fn(usize, usize) + Send + Sync>;
type ErrorHook = Arc<dyn Fn(&crate::error::Error) -> ErrorAction + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    Continue,
    Abort,
}

/// Drives chunked batch operations against a shared backend handle.
pub struct BatchEngine {
    backend: Arc<dyn BackendClient>,
    retry_policy: RetryPolicy,
    mode: ExecutionMode,
    progress_callback: Option<ProgressCallback>,
    on_error: Option<ErrorHook>,
    cancellation: CancellationToken,
}

impl BatchEngine {
    pub fn new(backend: Arc<dyn BackendClient>, retry_policy: RetryPolicy) -> Self {
        Self {
            backend,
            retry_policy,
            mode: ExecutionMode::Sequential,
            progress_callback: None,
            on_error: None,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn parallel(mut self, concurrency: usize) -> Self {
        self.mode = ExecutionMode::Parallel {
            concurrency: concurrency.max(1),
        };
        self
    }

    pub fn progress_callback<F>(mut self, f: F) -> Self
    where
        F: Fn(usize, usize) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Arc::new(f));
        self
    }

    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&crate::error::Error) -> ErrorAction + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(f));
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Chunks `keys` into groups of at most 100, retries each chunk's
    /// `UnprocessedKeys` with jittered backoff, and merges results in chunk
    /// order (preserving intra-chunk order — spec §4.8/§5).
    pub async fn batch_get(&self, table: &str, keys: Vec<KeyMap>, consistent_read: bool, projection: Option<String>) -> Result<Vec<Item>> {
        let chunks: Vec<Vec<KeyMap>> = keys.chunks(MAX_BATCH_GET).map(|c| c.to_vec()).collect();
        let total = keys_len(&chunks);
        let mut retrieved = 0usize;
        let mut results: Vec<Vec<Item>> = Vec::with_capacity(chunks.len());

        match &self.mode {
            ExecutionMode::Sequential => {
                for chunk in chunks {
                    if self.cancellation.is_cancelled() {
                        break;
                    }
                    match self.run_get_chunk(table, chunk, consistent_read, projection.clone()).await {
                        Ok(items) => {
                            retrieved += items.len();
                            if let Some(cb) = &self.progress_callback {
                                cb(retrieved, total);
                            }
                            results.push(items);
                        }
                        Err(e) => {
                            if self.should_abort(&e) {
                                return Err(e);
                            }
                        }
                    }
                }
            }
            ExecutionMode::Parallel { concurrency } => {
                let sem = Arc::new(Semaphore::new(*concurrency));
                let mut set: JoinSet<(usize, Result<Vec<Item>>)> = JoinSet::new();
                for (idx, chunk) in chunks.into_iter().enumerate() {
                    if self.cancellation.is_cancelled() {
                        break;
                    }
                    let sem = sem.clone();
                    let backend = self.backend.clone();
                    let policy = self.retry_policy;
                    let table = table.to_string();
                    let projection = projection.clone();
                    set.spawn(async move {
                        let _permit = sem.acquire_owned().await.expect("semaphore not closed");
                        let result = run_get_chunk_static(&backend, &policy, &table, chunk, consistent_read, projection).await;
                        (idx, result)
                    });
                }
                let mut indexed: Vec<(usize, Result<Vec<Item>>)> = Vec::new();
                while let Some(joined) = set.join_next().await {
                    indexed.push(joined.expect("batch-get task panicked"));
                }
                indexed.sort_by_key(|(idx, _)| *idx);
                for (_, result) in indexed {
                    match result {
                        Ok(items) => {
                            retrieved += items.len();
                            if let Some(cb) = &self.progress_callback {
                                cb(retrieved, total);
                            }
                            results.push(items);
                        }
                        Err(e) => {
                            if self.should_abort(&e) {
                                return Err(e);
                            }
                        }
                    }
                }
            }
        }

        Ok(results.into_iter().flatten().collect())
    }

    async fn run_get_chunk(&self, table: &str, chunk: Vec<KeyMap>, consistent_read: bool, projection: Option<String>) -> Result<Vec<Item>> {
        run_get_chunk_static(&self.backend, &self.retry_policy, table, chunk, consistent_read, projection).await
    }

    fn should_abort(&self, err: &crate::error::Error) -> bool {
        match &self.on_error {
            Some(hook) => hook(err) == ErrorAction::Abort,
            None => true,
        }
    }

    /// Chunks puts/deletes into groups of at most 25, retries
    /// `UnprocessedItems`, never reorders within a chunk.
    pub async fn batch_write(&self, table: &str, puts: Vec<(KeyMap, Item)>, deletes: Vec<KeyMap>) -> Result<()> {
        let mut chunks: Vec<CompiledBatchWrite> = Vec::new();
        let mut current = CompiledBatchWrite {
            table: table.to_string(),
            puts: Vec::new(),
            deletes: Vec::new(),
        };
        for put in puts {
            if current.puts.len() + current.deletes.len() >= MAX_BATCH_WRITE {
                chunks.push(std::mem::replace(
                    &mut current,
                    CompiledBatchWrite {
                        table: table.to_string(),
                        puts: Vec::new(),
                        deletes: Vec::new(),
                    },
                ));
            }
            current.puts.push(put);
        }
        for del in deletes {
            if current.puts.len() + current.deletes.len() >= MAX_BATCH_WRITE {
                chunks.push(std::mem::replace(
                    &mut current,
                    CompiledBatchWrite {
                        table: table.to_string(),
                        puts: Vec::new(),
                        deletes: Vec::new(),
                    },
                ));
            }
            current.deletes.push(del);
        }
        if !current.puts.is_empty() || !current.deletes.is_empty() {
            chunks.push(current);
        }

        match &self.mode {
            ExecutionMode::Sequential => {
                for chunk in chunks {
                    if self.cancellation.is_cancelled() {
                        break;
                    }
                    if let Err(e) = self.run_write_chunk(chunk).await {
                        if self.should_abort(&e) {
                            return Err(e);
                        }
                    }
                }
            }
            ExecutionMode::Parallel { concurrency } => {
                let sem = Arc::new(Semaphore::new(*concurrency));
                let mut set: JoinSet<Result<()>> = JoinSet::new();
                for chunk in chunks {
                    if self.cancellation.is_cancelled() {
                        break;
                    }
                    let sem = sem.clone();
                    let backend = self.backend.clone();
                    let policy = self.retry_policy;
                    set.spawn(async move {
                        let _permit = sem.acquire_owned().await.expect("semaphore not closed");
                        run_write_chunk_static(&backend, &policy, chunk).await
                    });
                }
                while let Some(joined) = set.join_next().await {
                    if let Err(e) = joined.expect("batch-write task panicked") {
                        if self.should_abort(&e) {
                            return Err(e);
                        }
                    }
                }
            }
        }

        Ok(())
    }

    async fn run_write_chunk(&self, chunk: CompiledBatchWrite) -> Result<()> {
        run_write_chunk_static(&self.backend, &self.retry_policy, chunk).await
    }
}

fn keys_len(chunks: &[Vec<KeyMap>]) -> usize {
    chunks.iter().map(|c| c.len()).sum()
}

fn run_get_chunk_static<'a>(
    backend: &'a Arc<dyn BackendClient>,
    policy: &'a RetryPolicy,
    table: &'a str,
    chunk: Vec<KeyMap>,
    consistent_read: bool,
    projection: Option<String>,
) -> Pin<Box<dyn Future<Output = Result<Vec<Item>>> + Send + 'a>> {
    Box::pin(async move {
        // `with_retry_while` re-invokes the closure from scratch on every
        // attempt, so the keys still outstanding and the items collected so
        // far live in this `RefCell`, updated at the end of each attempt and
        // read at the start of the next one.
        let remaining = std::cell::RefCell::new(chunk);
        let collected = std::cell::RefCell::new(Vec::new());
        let result = with_retry_while(
            policy,
            || {
                let keys = remaining.borrow().clone();
                let plan = CompiledBatchGet {
                    table: table.to_string(),
                    keys,
                    consistent_read,
                    projection: projection.clone(),
                };
                async move {
                    let outcome = backend.batch_get_item(plan).await?;
                    collected.borrow_mut().extend(outcome.items.clone());
                    *remaining.borrow_mut() = outcome.unprocessed_keys.clone();
                    Ok(outcome)
                }
            },
            |result| result.unprocessed_keys.is_empty(),
        )
        .await?;
        if !result.unprocessed_keys.is_empty() {
            debug!(count = result.unprocessed_keys.len(), "batch_get chunk exhausted retries with unprocessed keys remaining");
        }
        Ok(collected.into_inner())
    })
}

fn run_write_chunk_static<'a>(
    backend: &'a Arc<dyn BackendClient>,
    policy: &'a RetryPolicy,
    chunk: CompiledBatchWrite,
) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
    Box::pin(async move {
        let table = chunk.table.clone();
        let remaining = std::cell::RefCell::new(chunk);
        let result = with_retry_while(
            policy,
            || {
                let plan = remaining.borrow().clone();
                async move {
                    let outcome = backend.batch_write_item(plan).await?;
                    *remaining.borrow_mut() = CompiledBatchWrite {
                        table: table.clone(),
                        puts: outcome.unprocessed_puts.clone(),
                        deletes: outcome.unprocessed_deletes.clone(),
                    };
                    Ok(outcome)
                }
            },
            |result| result.unprocessed_puts.is_empty() && result.unprocessed_deletes.is_empty(),
        )
        .await?;
        if !result.unprocessed_puts.is_empty() || !result.unprocessed_deletes.is_empty() {
            debug!(
                puts = result.unprocessed_puts.len(),
                deletes = result.unprocessed_deletes.len(),
                "batch_write chunk exhausted retries with unprocessed items remaining"
            );
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockBackend;
    use dynamorm_core::AttrValue;

    fn key(pk: &str) -> KeyMap {
        vec![("id".to_string(), AttrValue::S(pk.to_string()))]
    }

    #[tokio::test]
    async fn batch_write_chunks_at_25_and_applies_all_puts() {
        let mock = Arc::new(MockBackend::new());
        let engine = BatchEngine::new(mock.clone(), RetryPolicy::default());
        let puts: Vec<(KeyMap, Item)> = (0..40)
            .map(|i| {
                let mut item = Item::new();
                item.insert("id".to_string(), AttrValue::S(format!("item#{i}")));
                (key(&format!("item#{i}")), item)
            })
            .collect();
        engine.batch_write("widgets", puts, vec![]).await.unwrap();
        assert_eq!(mock.table_len("widgets"), 40);
    }

    #[tokio::test]
    async fn batch_get_preserves_order_in_sequential_mode() {
        let mock = Arc::new(MockBackend::new());
        for i in 0..5 {
            let mut item = Item::new();
            item.insert("id".to_string(), AttrValue::S(format!("item#{i}")));
            mock.seed("widgets", key(&format!("item#{i}")), item);
        }
        let engine = BatchEngine::new(mock, RetryPolicy::default());
        let keys: Vec<KeyMap> = (0..5).map(|i| key(&format!("item#{i}"))).collect();
        let items = engine.batch_get("widgets", keys, false, None).await.unwrap();
        assert_eq!(items.len(), 5);
    }
}
