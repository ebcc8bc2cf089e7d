//! The model registry: memoizes each record type's [`Descriptor`] behind a
//! `TypeId`-keyed cache, built at most once per process.
//!
//! Grounded on the teacher's connection-wrapping pattern (a `Mutex`/`RwLock`
//! held only across the critical section, never across caller code) in
//! `SqliteStore::lock_conn`.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::info;

use crate::descriptor::Descriptor;
use crate::error::Result;
use crate::model::Model;

/// Process-wide cache of built descriptors, keyed by `TypeId`.
#[derive(Default)]
pub struct Registry {
    cache: RwLock<HashMap<TypeId, Arc<Descriptor>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Returns `T`'s descriptor, building and validating it on first use.
    ///
    /// The write lock is never held while `T::build_descriptor()` runs with
    /// the lock released; instead we optimistically build outside the lock
    /// and only pay the insert cost once, accepting that two racing callers
    /// may both build and one build is discarded — cheaper than holding a
    /// write lock across user-supplied code.
    pub fn descriptor_for<T: Model + 'static>(&self) -> Result<Arc<Descriptor>> {
        let key = TypeId::of::<T>();
        if let Some(found) = self.cache.read().expect("registry lock poisoned").get(&key) {
            return Ok(found.clone());
        }

        let built = Arc::new(T::build_descriptor()?);
        info!(type_name = T::TYPE_NAME, table = %built.table_name, "registered model descriptor");

        let mut guard = self.cache.write().expect("registry lock poisoned");
        let entry = guard.entry(key).or_insert_with(|| built.clone());
        Ok(entry.clone())
    }

    /// Number of distinct types registered so far. Mostly useful for tests.
    pub fn len(&self) -> usize {
        self.cache.read().expect("registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{DescriptorBuilder, FieldDescriptor, Role};
    use std::collections::BTreeMap;

    struct Widget {
        id: String,
    }

    impl Model for Widget {
        const TYPE_NAME: &'static str = "Widget";

        fn build_descriptor() -> Result<Descriptor> {
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

        fn into_attrs(self) -> BTreeMap<String, crate::attr_value::AttrValue> {
            let mut m = BTreeMap::new();
            m.insert("id".to_string(), crate::attr_value::AttrValue::S(self.id));
            m
        }

        fn from_attrs(attrs: &BTreeMap<String, crate::attr_value::AttrValue>) -> Result<Self> {
            let id = match attrs.get("id") {
                Some(crate::attr_value::AttrValue::S(s)) => s.clone(),
                _ => return Err(crate::error::CoreError::UnsupportedKind("id".into())),
            };
            Ok(Widget { id })
        }
    }

    #[test]
    fn caches_descriptor_across_calls() {
        let registry = Registry::new();
        assert!(registry.is_empty());
        let first = registry.descriptor_for::<Widget>().unwrap();
        let second = registry.descriptor_for::<Widget>().unwrap();
        assert_eq!(registry.len(), 1);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.table_name, "widgets");
    }
}
