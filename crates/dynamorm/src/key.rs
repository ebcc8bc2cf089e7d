//! The canonical key shape accepted by `batch_get` and friends (open
//! question resolution in SPEC_FULL.md: the source accepted either a raw
//! value or a partial record; this design picks one canonical shape and
//! rejects the other with `Validation`).

use dynamorm_core::AttrValue;

use crate::error::{Error, Result};

/// A primary key, either a bare partition key or a partition+sort pair.
#[derive(Debug, Clone, PartialEq)]
pub enum Key {
    Simple(AttrValue),
    Composite { pk: AttrValue, sk: AttrValue },
}

impl Key {
    pub fn pk(&self) -> &AttrValue {
        match self {
            Key::Simple(pk) => pk,
            Key::Composite { pk, .. } => pk,
        }
    }

    pub fn sk(&self) -> Option<&AttrValue> {
        match self {
            Key::Simple(_) => None,
            Key::Composite { sk, .. } => Some(sk),
        }
    }

    /// Validates this key against a descriptor's key schema: a `Composite`
    /// key requires the model to have a sort key, and vice versa.
    pub fn validate_against(&self, descriptor: &dynamorm_core::Descriptor) -> Result<()> {
        match (self, &descriptor.sort_key) {
            (Key::Simple(_), None) => Ok(()),
            (Key::Composite { .. }, Some(_)) => Ok(()),
            (Key::Simple(_), Some(_)) => Err(Error::validation(format!(
                "model {} has a sort key; a Composite key is required",
                descriptor.type_name
            ))),
            (Key::Composite { .. }, None) => Err(Error::validation(format!(
                "model {} has no sort key; a Simple key is required",
                descriptor.type_name
            ))),
        }
    }
}
