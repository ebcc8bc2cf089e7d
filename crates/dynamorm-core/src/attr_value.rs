//! The backend-agnostic attribute-value representation and the conversion
//! traits that map Rust types onto it.
//!
//! `AttrValue` deliberately mirrors a managed NoSQL store's attribute-value
//! union (string, number-as-text, binary, bool, list, map, and the typed
//! sets) without depending on any particular SDK's type for it, so the core
//! stays usable behind any [`BackendClient`](../../dynamorm/src/backend.rs)
//! implementation.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use chrono::{DateTime, Utc};

use crate::error::{CoreError, Result};

/// A single attribute value in a record's backend representation.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    /// A UTF-8 string.
    S(String),
    /// A number, carried as its exact decimal text so conversion never loses
    /// precision round-tripping through a float.
    N(String),
    Bool(bool),
    B(Vec<u8>),
    L(Vec<AttrValue>),
    M(BTreeMap<String, AttrValue>),
    Ss(BTreeSet<String>),
    Ns(BTreeSet<String>),
    Bs(Vec<Vec<u8>>),
    Null,
}

impl AttrValue {
    /// A short, stable name for the value's kind, used in error messages and
    /// `UnsupportedKind` diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            AttrValue::S(_) => "S",
            AttrValue::N(_) => "N",
            AttrValue::Bool(_) => "BOOL",
            AttrValue::B(_) => "B",
            AttrValue::L(_) => "L",
            AttrValue::M(_) => "M",
            AttrValue::Ss(_) => "SS",
            AttrValue::Ns(_) => "NS",
            AttrValue::Bs(_) => "BS",
            AttrValue::Null => "NULL",
        }
    }

    pub fn is_empty_for_omission(&self) -> bool {
        match self {
            AttrValue::S(s) => s.is_empty(),
            AttrValue::L(l) => l.is_empty(),
            AttrValue::M(m) => m.is_empty(),
            AttrValue::Ss(s) => s.is_empty(),
            AttrValue::Ns(s) => s.is_empty(),
            AttrValue::Bs(s) => s.is_empty(),
            AttrValue::Null => true,
            _ => false,
        }
    }
}

/// Converts a Rust value into its [`AttrValue`] representation.
pub trait ToAttrValue {
    fn to_attr_value(&self) -> AttrValue;
}

/// Converts an [`AttrValue`] back into a Rust value.
pub trait FromAttrValue: Sized {
    fn from_attr_value(value: &AttrValue) -> Result<Self>;
}

macro_rules! impl_int {
    ($($t:ty),*) => {
        $(
            impl ToAttrValue for $t {
                fn to_attr_value(&self) -> AttrValue {
                    AttrValue::N(self.to_string())
                }
            }
            impl FromAttrValue for $t {
                fn from_attr_value(value: &AttrValue) -> Result<Self> {
                    match value {
                        AttrValue::N(n) => n.parse::<$t>().map_err(|e| CoreError::Conversion {
                            field: stringify!($t).to_string(),
                            reason: e.to_string(),
                        }),
                        other => Err(CoreError::Conversion {
                            field: stringify!($t).to_string(),
                            reason: format!("expected N, got {}", other.kind_name()),
                        }),
                    }
                }
            }
        )*
    };
}

impl_int!(i8, i16, i32, i64, i128, u8, u16, u32, u64, u128, isize, usize);

macro_rules! impl_float {
    ($($t:ty),*) => {
        $(
            impl ToAttrValue for $t {
                fn to_attr_value(&self) -> AttrValue {
                    AttrValue::N(format!("{}", self))
                }
            }
            impl FromAttrValue for $t {
                fn from_attr_value(value: &AttrValue) -> Result<Self> {
                    match value {
                        AttrValue::N(n) => n.parse::<$t>().map_err(|e| CoreError::Conversion {
                            field: stringify!($t).to_string(),
                            reason: e.to_string(),
                        }),
                        other => Err(CoreError::Conversion {
                            field: stringify!($t).to_string(),
                            reason: format!("expected N, got {}", other.kind_name()),
                        }),
                    }
                }
            }
        )*
    };
}

impl_float!(f32, f64);

impl ToAttrValue for String {
    fn to_attr_value(&self) -> AttrValue {
        AttrValue::S(self.clone())
    }
}

impl FromAttrValue for String {
    fn from_attr_value(value: &AttrValue) -> Result<Self> {
        match value {
            AttrValue::S(s) => Ok(s.clone()),
            other => Err(CoreError::Conversion {
                field: "String".to_string(),
                reason: format!("expected S, got {}", other.kind_name()),
            }),
        }
    }
}

impl ToAttrValue for bool {
    fn to_attr_value(&self) -> AttrValue {
        AttrValue::Bool(*self)
    }
}

impl FromAttrValue for bool {
    fn from_attr_value(value: &AttrValue) -> Result<Self> {
        match value {
            AttrValue::Bool(b) => Ok(*b),
            other => Err(CoreError::Conversion {
                field: "bool".to_string(),
                reason: format!("expected BOOL, got {}", other.kind_name()),
            }),
        }
    }
}

impl ToAttrValue for Vec<u8> {
    fn to_attr_value(&self) -> AttrValue {
        AttrValue::B(self.clone())
    }
}

impl FromAttrValue for Vec<u8> {
    fn from_attr_value(value: &AttrValue) -> Result<Self> {
        match value {
            AttrValue::B(b) => Ok(b.clone()),
            other => Err(CoreError::Conversion {
                field: "Vec<u8>".to_string(),
                reason: format!("expected B, got {}", other.kind_name()),
            }),
        }
    }
}

impl ToAttrValue for DateTime<Utc> {
    fn to_attr_value(&self) -> AttrValue {
        AttrValue::S(self.to_rfc3339())
    }
}

impl FromAttrValue for DateTime<Utc> {
    fn from_attr_value(value: &AttrValue) -> Result<Self> {
        match value {
            AttrValue::S(s) => DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| CoreError::Conversion {
                    field: "DateTime<Utc>".to_string(),
                    reason: e.to_string(),
                }),
            other => Err(CoreError::Conversion {
                field: "DateTime<Utc>".to_string(),
                reason: format!("expected S, got {}", other.kind_name()),
            }),
        }
    }
}

impl<T: ToAttrValue> ToAttrValue for Option<T> {
    fn to_attr_value(&self) -> AttrValue {
        match self {
            Some(v) => v.to_attr_value(),
            None => AttrValue::Null,
        }
    }
}

impl<T: FromAttrValue> FromAttrValue for Option<T> {
    fn from_attr_value(value: &AttrValue) -> Result<Self> {
        match value {
            AttrValue::Null => Ok(None),
            other => T::from_attr_value(other).map(Some),
        }
    }
}

impl<T: ToAttrValue> ToAttrValue for Vec<T> {
    fn to_attr_value(&self) -> AttrValue {
        AttrValue::L(self.iter().map(ToAttrValue::to_attr_value).collect())
    }
}

impl<T: FromAttrValue> FromAttrValue for Vec<T> {
    fn from_attr_value(value: &AttrValue) -> Result<Self> {
        match value {
            AttrValue::L(items) => items.iter().map(T::from_attr_value).collect(),
            other => Err(CoreError::Conversion {
                field: "Vec<T>".to_string(),
                reason: format!("expected L, got {}", other.kind_name()),
            }),
        }
    }
}

/// Marshals a `HashSet<String>` as a native string set (`SS`) rather than a
/// `List`. Use this where a field is tagged `set` in its descriptor.
pub fn set_to_attr_value_ss(set: &HashSet<String>) -> AttrValue {
    AttrValue::Ss(set.iter().cloned().collect())
}

pub fn set_from_attr_value_ss(value: &AttrValue) -> Result<HashSet<String>> {
    match value {
        AttrValue::Ss(s) => Ok(s.iter().cloned().collect()),
        other => Err(CoreError::Conversion {
            field: "HashSet<String>".to_string(),
            reason: format!("expected SS, got {}", other.kind_name()),
        }),
    }
}

/// Marshals a JSON-serializable value as an opaque `S` blob, for fields
/// tagged `json`.
pub fn json_to_attr_value<T: serde::Serialize>(value: &T) -> Result<AttrValue> {
    serde_json::to_string(value)
        .map(AttrValue::S)
        .map_err(|e| CoreError::Conversion {
            field: "json".to_string(),
            reason: e.to_string(),
        })
}

pub fn json_from_attr_value<T: serde::de::DeserializeOwned>(value: &AttrValue) -> Result<T> {
    match value {
        AttrValue::S(s) => serde_json::from_str(s).map_err(|e| CoreError::Conversion {
            field: "json".to_string(),
            reason: e.to_string(),
        }),
        other => Err(CoreError::Conversion {
            field: "json".to_string(),
            reason: format!("expected S, got {}", other.kind_name()),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_round_trips() {
        let n: i64 = -42;
        let av = n.to_attr_value();
        assert_eq!(av, AttrValue::N("-42".to_string()));
        assert_eq!(i64::from_attr_value(&av).unwrap(), -42);
    }

    #[test]
    fn string_round_trips() {
        let s = "hello".to_string();
        let av = s.to_attr_value();
        assert_eq!(String::from_attr_value(&av).unwrap(), "hello");
    }

    #[test]
    fn option_none_is_null() {
        let none: Option<i32> = None;
        assert_eq!(none.to_attr_value(), AttrValue::Null);
        assert_eq!(Option::<i32>::from_attr_value(&AttrValue::Null).unwrap(), None);
    }

    #[test]
    fn datetime_round_trips() {
        let now = DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let av = now.to_attr_value();
        assert_eq!(DateTime::<Utc>::from_attr_value(&av).unwrap(), now);
    }

    #[test]
    fn vec_round_trips() {
        let v = vec![1i32, 2, 3];
        let av = v.to_attr_value();
        assert_eq!(Vec::<i32>::from_attr_value(&av).unwrap(), v);
    }

    #[test]
    fn wrong_kind_is_conversion_error() {
        let err = i64::from_attr_value(&AttrValue::S("x".into()));
        assert!(matches!(err, Err(CoreError::Conversion { .. })));
    }
}
