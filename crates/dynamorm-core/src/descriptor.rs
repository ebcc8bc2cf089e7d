//! The model descriptor: a stable, registry-cached picture of a record type's
//! key schema, secondary indexes, and per-field attribute metadata.
//!
//! Descriptors are produced once per record type (see [`crate::registry`])
//! and never mutated afterwards; every compilation in the query/update/
//! transaction builders borrows one.

use std::collections::HashMap;

use crate::error::{CoreError, Result};

/// The role a field plays with respect to the table's own key schema or the
/// record's lifecycle. A field's index participation (which GSIs/LSIs it
/// backs) is tracked separately in [`Descriptor::global_indexes`] /
/// [`Descriptor::local_indexes`] — a field can be, say, the table's sort key
/// *and* a GSI's partition key at once, so `Role` only records the table-level
/// classification, not every index membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// The table's partition key.
    Pk,
    /// The table's sort key.
    Sk,
    /// Participates in at least one GSI as a partition key (and not PK/SK).
    GsiPk,
    /// Participates in at least one GSI as a sort key (and not PK/SK).
    GsiSk,
    /// Participates in at least one LSI as a sort key (and not PK/SK).
    LsiSk,
    /// A normal, queryable/filterable attribute.
    Plain,
    /// Populated by the core on `create()`.
    CreatedAt,
    /// Populated by the core on every write.
    UpdatedAt,
    /// Optimistic-concurrency counter; integer-typed.
    Version,
    /// Epoch-seconds expiration attribute; integer-typed.
    Ttl,
    /// Opaque to the query engine; an external collaborator owns encrypt/decrypt.
    Encrypted,
    /// Excluded entirely from marshaling (`-` tag).
    Ignored,
}

/// Per-field metadata, keyed both by the in-memory (Rust) field name and by
/// the backend attribute name (`dbname`), which may differ via `attr:<dbname>`.
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    /// The Rust struct field identifier.
    pub in_memory_name: &'static str,
    /// The backend attribute name actually written to/read from the item.
    pub dbname: String,
    pub role: Role,
    /// Marshal a sequence as a typed set (SS/NS/BS) rather than a List.
    pub is_set: bool,
    /// Marshal this field as an opaque JSON-encoded string blob.
    pub is_json_blob: bool,
    /// Omit the attribute entirely when the in-memory value is "empty"
    /// (empty string, empty sequence) rather than writing an empty value.
    pub omit_if_empty: bool,
}

/// A global secondary index's key schema.
#[derive(Debug, Clone)]
pub struct GlobalIndex {
    pub name: String,
    /// In-memory field name backing the index's partition key.
    pub pk_field: &'static str,
    /// In-memory field name backing the index's sort key, if any.
    pub sk_field: Option<&'static str>,
}

/// A local secondary index's key schema. The partition key is always the
/// table's own partition key.
#[derive(Debug, Clone)]
pub struct LocalIndex {
    pub name: String,
    pub sk_field: &'static str,
}

/// A stable, immutable description of a record type's backend shape.
#[derive(Debug, Clone)]
pub struct Descriptor {
    pub type_name: &'static str,
    pub table_name: String,
    pub partition_key: FieldDescriptor,
    pub sort_key: Option<FieldDescriptor>,
    pub global_indexes: Vec<GlobalIndex>,
    pub local_indexes: Vec<LocalIndex>,
    attributes: Vec<FieldDescriptor>,
    by_in_memory_name: HashMap<&'static str, usize>,
    by_dbname: HashMap<String, usize>,
}

impl Descriptor {
    /// Looks up a field by its Rust struct field name.
    pub fn field_by_name(&self, in_memory_name: &str) -> Option<&FieldDescriptor> {
        self.by_in_memory_name
            .get(in_memory_name)
            .map(|&i| &self.attributes[i])
    }

    /// Looks up a field by its backend attribute name.
    pub fn field_by_dbname(&self, dbname: &str) -> Option<&FieldDescriptor> {
        self.by_dbname.get(dbname).map(|&i| &self.attributes[i])
    }

    /// All non-ignored attributes, in declaration order.
    pub fn attributes(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.attributes.iter().filter(|f| f.role != Role::Ignored)
    }

    /// The field tagged `version`, if any.
    pub fn version_field(&self) -> Option<&FieldDescriptor> {
        self.attributes.iter().find(|f| f.role == Role::Version)
    }

    /// The field tagged `ttl`, if any.
    pub fn ttl_field(&self) -> Option<&FieldDescriptor> {
        self.attributes.iter().find(|f| f.role == Role::Ttl)
    }

    /// The index, by name, whose key schema should be searched first for a
    /// planner match: explicit name lookup.
    pub fn global_index(&self, name: &str) -> Option<&GlobalIndex> {
        self.global_indexes.iter().find(|i| i.name == name)
    }

    pub fn local_index(&self, name: &str) -> Option<&LocalIndex> {
        self.local_indexes.iter().find(|i| i.name == name)
    }
}

/// Accumulates fields and index definitions, then validates and freezes them
/// into a [`Descriptor`]. This is the target the `#[derive(Model)]` macro
/// generates code against; it is also usable directly for hand-written models.
pub struct DescriptorBuilder {
    type_name: &'static str,
    table_name: String,
    fields: Vec<FieldDescriptor>,
    global_indexes: Vec<GlobalIndex>,
    local_indexes: Vec<LocalIndex>,
}

impl DescriptorBuilder {
    pub fn new(type_name: &'static str, table_name: impl Into<String>) -> Self {
        Self {
            type_name,
            table_name: table_name.into(),
            fields: Vec::new(),
            global_indexes: Vec::new(),
            local_indexes: Vec::new(),
        }
    }

    pub fn field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }

    pub fn global_index(mut self, index: GlobalIndex) -> Self {
        self.global_indexes.push(index);
        self
    }

    pub fn local_index(mut self, index: LocalIndex) -> Self {
        self.local_indexes.push(index);
        self
    }

    /// Validates the accumulated fields/indexes and produces an immutable
    /// [`Descriptor`], per the invariants in spec §3/§4.1.
    pub fn build(self) -> Result<Descriptor> {
        let mut pk: Option<FieldDescriptor> = None;
        let mut sk: Option<FieldDescriptor> = None;

        for f in &self.fields {
            match f.role {
                Role::Pk => {
                    if pk.is_some() {
                        return Err(CoreError::ConflictingRole {
                            type_name: self.type_name,
                            field: f.in_memory_name,
                            first: Role::Pk,
                            second: Role::Pk,
                        });
                    }
                    pk = Some(f.clone());
                }
                Role::Sk => {
                    if sk.is_some() {
                        return Err(CoreError::ConflictingRole {
                            type_name: self.type_name,
                            field: f.in_memory_name,
                            first: Role::Sk,
                            second: Role::Sk,
                        });
                    }
                    sk = Some(f.clone());
                }
                _ => {}
            }
            if f.role == Role::Encrypted {
                // Encrypted fields must never also serve as a key; callers
                // express that conflict by tagging `index:`/`lsi:`/pk/sk
                // alongside `encrypted`, which the derive macro rejects
                // before it ever reaches here, but hand-built descriptors
                // are checked too.
                if self
                    .global_indexes
                    .iter()
                    .any(|g| g.pk_field == f.in_memory_name || g.sk_field == Some(f.in_memory_name))
                    || self.local_indexes.iter().any(|l| l.sk_field == f.in_memory_name)
                {
                    return Err(CoreError::EncryptedFieldHasKeyRole {
                        type_name: self.type_name,
                        field: f.in_memory_name,
                    });
                }
            }
        }

        let pk = pk.ok_or(CoreError::MissingPartitionKey {
            type_name: self.type_name,
        })?;

        if let Some(v) = self.fields.iter().find(|f| f.role == Role::Version) {
            if v.is_set || v.is_json_blob {
                return Err(CoreError::VersionFieldNotInteger {
                    type_name: self.type_name,
                    field: v.in_memory_name,
                });
            }
        }
        if let Some(t) = self.fields.iter().find(|f| f.role == Role::Ttl) {
            if t.is_set || t.is_json_blob {
                return Err(CoreError::TtlFieldNotInteger {
                    type_name: self.type_name,
                    field: t.in_memory_name,
                });
            }
        }

        let mut seen_names = std::collections::HashSet::new();
        for idx in self.global_indexes.iter().map(|i| i.name.as_str()).chain(
            self.local_indexes.iter().map(|i| i.name.as_str()),
        ) {
            if !seen_names.insert(idx) {
                return Err(CoreError::DuplicateIndexName {
                    type_name: self.type_name,
                    name: idx.to_string(),
                });
            }
        }

        let mut by_in_memory_name = HashMap::new();
        let mut by_dbname = HashMap::new();
        for (i, f) in self.fields.iter().enumerate() {
            by_in_memory_name.insert(f.in_memory_name, i);
            by_dbname.insert(f.dbname.clone(), i);
        }

        Ok(Descriptor {
            type_name: self.type_name,
            table_name: self.table_name,
            partition_key: pk,
            sort_key: sk,
            global_indexes: self.global_indexes,
            local_indexes: self.local_indexes,
            attributes: self.fields,
            by_in_memory_name,
            by_dbname,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(name: &'static str, role: Role) -> FieldDescriptor {
        FieldDescriptor {
            in_memory_name: name,
            dbname: name.to_string(),
            role,
            is_set: false,
            is_json_blob: false,
            omit_if_empty: false,
        }
    }

    #[test]
    fn requires_partition_key() {
        let err = DescriptorBuilder::new("T", "t").field(field("x", Role::Plain)).build();
        assert!(matches!(err, Err(CoreError::MissingPartitionKey { .. })));
    }

    #[test]
    fn builds_with_pk_and_sk() {
        let d = DescriptorBuilder::new("T", "t")
            .field(field("id", Role::Pk))
            .field(field("sort", Role::Sk))
            .field(field("name", Role::Plain))
            .build()
            .unwrap();
        assert_eq!(d.partition_key.in_memory_name, "id");
        assert_eq!(d.sort_key.as_ref().unwrap().in_memory_name, "sort");
        assert!(d.field_by_name("name").is_some());
        assert!(d.field_by_dbname("name").is_some());
    }

    #[test]
    fn rejects_duplicate_index_names() {
        let err = DescriptorBuilder::new("T", "t")
            .field(field("id", Role::Pk))
            .field(field("gk", Role::GsiPk))
            .global_index(GlobalIndex {
                name: "gsi1".into(),
                pk_field: "gk",
                sk_field: None,
            })
            .local_index(LocalIndex {
                name: "gsi1".into(),
                sk_field: "gk",
            })
            .build();
        assert!(matches!(err, Err(CoreError::DuplicateIndexName { .. })));
    }

    #[test]
    fn rejects_non_integer_version() {
        let mut v = field("v", Role::Version);
        v.is_set = true;
        let err = DescriptorBuilder::new("T", "t")
            .field(field("id", Role::Pk))
            .field(v)
            .build();
        assert!(matches!(err, Err(CoreError::VersionFieldNotInteger { .. })));
    }
}
