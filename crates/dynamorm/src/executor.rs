//! Executor (C7): translates compiled plans 1:1 into backend calls, applying
//! the active retry policy. Only this module and [`crate::batch`] may
//! suspend (spec §5) — everything upstream (registry, converter, expression
//! builder, planner, query/update builders) is synchronous.

use std::sync::Arc;

use dynamorm_config::RetryPolicy;
use tracing::debug;

use crate::backend::{BackendClient, CompiledRead, CompiledWrite, GetPlan, Item, QueryPage};
use crate::error::Result;
use crate::retry::with_retry;

/// Runs compiled plans against a shared backend handle.
pub struct Executor {
    backend: Arc<dyn BackendClient>,
    default_retry: RetryPolicy,
}

impl Executor {
    pub fn new(backend: Arc<dyn BackendClient>, default_retry: RetryPolicy) -> Self {
        Self { backend, default_retry }
    }

    fn policy<'a>(&'a self, override_policy: &'a Option<RetryPolicy>) -> &'a RetryPolicy {
        override_policy.as_ref().unwrap_or(&self.default_retry)
    }

    /// The GetItem fast path: no expression builder invocation, a direct key
    /// map derived from field dbnames (spec §4.7).
    pub async fn get_item(&self, plan: GetPlan, retry_override: Option<RetryPolicy>) -> Result<Option<Item>> {
        debug!(table = %plan.table, "GetItem");
        with_retry(self.policy(&retry_override), || {
            let plan = plan.clone();
            async move { self.backend.get_item(plan).await }
        })
        .await
    }

    pub async fn query(&self, plan: CompiledRead, retry_override: Option<RetryPolicy>) -> Result<QueryPage> {
        debug!(table = %plan.table, index = ?plan.index, "Query");
        with_retry(self.policy(&retry_override), || {
            let plan = plan.clone();
            async move { self.backend.query(plan).await }
        })
        .await
    }

    pub async fn scan(
        &self,
        plan: CompiledRead,
        segment: Option<(u32, u32)>,
        retry_override: Option<RetryPolicy>,
    ) -> Result<QueryPage> {
        debug!(table = %plan.table, ?segment, "Scan");
        with_retry(self.policy(&retry_override), || {
            let plan = plan.clone();
            async move { self.backend.scan(plan, segment).await }
        })
        .await
    }

    pub async fn put_item(&self, plan: CompiledWrite, retry_override: Option<RetryPolicy>) -> Result<Option<Item>> {
        debug!(table = %plan.table, "PutItem");
        with_retry(self.policy(&retry_override), || {
            let plan = plan.clone();
            async move { self.backend.put_item(plan).await }
        })
        .await
    }

    pub async fn update_item(&self, plan: CompiledWrite, retry_override: Option<RetryPolicy>) -> Result<Option<Item>> {
        debug!(table = %plan.table, "UpdateItem");
        with_retry(self.policy(&retry_override), || {
            let plan = plan.clone();
            async move { self.backend.update_item(plan).await }
        })
        .await
    }

    pub async fn delete_item(&self, plan: CompiledWrite, retry_override: Option<RetryPolicy>) -> Result<Option<Item>> {
        debug!(table = %plan.table, "DeleteItem");
        with_retry(self.policy(&retry_override), || {
            let plan = plan.clone();
            async move { self.backend.delete_item(plan).await }
        })
        .await
    }
}
