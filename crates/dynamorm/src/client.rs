//! The single entry point into DynamORM (SPEC_FULL.md Open Question:
//! "Initialization: one path, `DynamormClient::new(backend, config)`").
//! Bundles the shared backend handle, the process-wide model registry, and
//! the runtime configuration read from environment variables (spec §6), and
//! hands out fresh builders for each call — the builders themselves stay
//! cheap, owned, and single-use (design note §9).

use std::sync::Arc;

use dynamorm_config::RuntimeConfig;
use dynamorm_core::{Descriptor, Model, Registry};

use crate::backend::BackendClient;
use crate::batch::BatchEngine;
use crate::clock::{Clock, SystemClock};
use crate::cursor::KeyMap;
use crate::error::{Error, Result};
use crate::key::Key;
use crate::query::QueryBuilder;
use crate::transaction::TransactionBuilder;
use crate::update::UpdateBuilder;

/// Converts the canonical [`Key`] shape into the dbname-keyed [`KeyMap`] the
/// executor/batch engine consume, validating it against `descriptor`'s key
/// schema first.
fn key_to_key_map(key: Key, descriptor: &Descriptor) -> Result<KeyMap> {
    key.validate_against(descriptor)?;
    let mut out = vec![(descriptor.partition_key.dbname.clone(), key.pk().clone())];
    if let (Some(sk_value), Some(sk_field)) = (key.sk(), &descriptor.sort_key) {
        out.push((sk_field.dbname.clone(), sk_value.clone()));
    }
    Ok(out)
}

/// The bundled handle applications construct once and share across requests.
#[derive(Clone)]
pub struct DynamormClient {
    backend: Arc<dyn BackendClient>,
    registry: Arc<Registry>,
    config: RuntimeConfig,
    clock: Arc<dyn Clock>,
}

impl DynamormClient {
    /// The one constructor (SPEC_FULL.md Open Question resolution): no
    /// separate builder, no global singleton. `config` is typically produced
    /// via [`RuntimeConfig::from_env`], but tests may hand-build one.
    pub fn new(backend: Arc<dyn BackendClient>, config: RuntimeConfig) -> Self {
        Self {
            backend,
            registry: Arc::new(Registry::new()),
            config,
            clock: Arc::new(SystemClock),
        }
    }

    /// Same as [`Self::new`], but with an injected [`Clock`] — for tests that
    /// need deterministic `created_at`/`updated_at` stamping.
    pub fn with_clock(backend: Arc<dyn BackendClient>, config: RuntimeConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            backend,
            registry: Arc::new(Registry::new()),
            config,
            clock,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// A fresh [`QueryBuilder`] for `T`, resolving (and caching) its
    /// descriptor on first use.
    pub fn query<T: Model + 'static>(&self) -> Result<QueryBuilder<T>> {
        let descriptor = self.registry.descriptor_for::<T>()?;
        Ok(QueryBuilder::with_clock(descriptor, self.backend.clone(), self.config.retry_policy, self.clock.clone()))
    }

    /// A fresh [`UpdateBuilder`] bound to `key`, the canonical per-item
    /// binding point for C6 (spec §4.6).
    pub fn update_builder_for<T: Model + 'static>(&self, key: Key) -> Result<UpdateBuilder<T>> {
        let descriptor = self.registry.descriptor_for::<T>()?;
        let key_map = key_to_key_map(key, &descriptor)?;
        Ok(UpdateBuilder::with_clock(descriptor, self.backend.clone(), self.config.retry_policy, key_map, self.clock.clone()))
    }

    /// A fresh [`TransactionBuilder`], empty of operations.
    pub fn transact(&self) -> TransactionBuilder {
        TransactionBuilder::with_clock(self.backend.clone(), self.registry.clone(), self.config.retry_policy, self.clock.clone())
    }

    /// A fresh [`BatchEngine`], for callers who want `.parallel()`,
    /// `.progress_callback()`, or `.on_error()` before issuing chunked calls.
    pub fn batch_engine(&self) -> BatchEngine {
        BatchEngine::new(self.backend.clone(), self.config.retry_policy)
    }

    /// Converts a caller-supplied [`Key`] into the [`KeyMap`] shape a
    /// [`BatchEngine`] call expects, validating it against `T`'s key schema.
    pub fn resolve_key<T: Model + 'static>(&self, key: Key) -> Result<KeyMap> {
        let descriptor = self.registry.descriptor_for::<T>()?;
        key_to_key_map(key, &descriptor)
    }

    /// Convenience wrapper around [`Self::batch_engine`] for the common case
    /// of one untuned sequential `BatchGetItem` over `T`'s table.
    pub async fn batch_get<T: Model + 'static>(&self, keys: Vec<Key>, consistent_read: bool) -> Result<Vec<T>> {
        let descriptor = self.registry.descriptor_for::<T>()?;
        let key_maps: Result<Vec<KeyMap>> = keys.into_iter().map(|k| key_to_key_map(k, &descriptor)).collect();
        let items = self
            .batch_engine()
            .batch_get(&descriptor.table_name, key_maps?, consistent_read, None)
            .await?;
        items.into_iter().map(|i| T::from_attrs(&i).map_err(Error::from)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockBackend;
    use dynamorm_core::{AttrValue, DescriptorBuilder, FieldDescriptor, Role};
    use std::collections::BTreeMap;

    struct Widget {
        id: String,
    }

    impl Model for Widget {
        const TYPE_NAME: &'static str = "Widget";

        fn build_descriptor() -> dynamorm_core::Result<Descriptor> {
            DescriptorBuilder::new(Self::TYPE_NAME, "widgets")
                .field(FieldDescriptor {
                    in_memory_name: "id",
                    dbname: "id".to_string(),
                    role: Role::Pk,
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
                Some(AttrValue::S(s)) => Ok(Widget { id: s.clone() }),
                _ => Err(dynamorm_core::CoreError::UnsupportedKind("id".into())),
            }
        }
    }

    #[tokio::test]
    async fn query_resolves_and_caches_descriptor() {
        let backend = Arc::new(MockBackend::new());
        let client = DynamormClient::new(backend, RuntimeConfig::default());
        client.query::<Widget>().unwrap();
        assert_eq!(client.registry().len(), 1);
        client.query::<Widget>().unwrap();
        assert_eq!(client.registry().len(), 1);
    }

    #[tokio::test]
    async fn batch_get_round_trips_through_mock_backend() {
        let backend = Arc::new(MockBackend::new());
        backend.seed(
            "widgets",
            vec![("id".to_string(), AttrValue::S("a".to_string()))],
            Widget { id: "a".into() }.into_attrs(),
        );
        let client = DynamormClient::new(backend, RuntimeConfig::default());
        let found = client.batch_get::<Widget>(vec![Key::Simple(AttrValue::S("a".to_string()))], false).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "a");
    }

    #[test]
    fn composite_key_required_for_model_with_sort_key() {
        let descriptor = DescriptorBuilder::new("Event", "events")
            .field(FieldDescriptor {
                in_memory_name: "id",
                dbname: "id".to_string(),
                role: Role::Pk,
                is_set: false,
                is_json_blob: false,
                omit_if_empty: false,
            })
            .field(FieldDescriptor {
                in_memory_name: "ts",
                dbname: "ts".to_string(),
                role: Role::Sk,
                is_set: false,
                is_json_blob: false,
                omit_if_empty: false,
            })
            .build()
            .unwrap();
        let err = key_to_key_map(Key::Simple(AttrValue::S("a".to_string())), &descriptor);
        assert!(matches!(err, Err(Error::Validation(_))));
    }
}
