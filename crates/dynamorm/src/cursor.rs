//! Opaque pagination cursors: a base64-url encoding of a deterministic
//! serialization of the backend's last-evaluated-key attribute map (spec
//! §6). Independent of any particular backend's key-map representation —
//! the core only needs a round-trippable serialization of
//! `Vec<(String, AttrValue)>`.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use dynamorm_core::AttrValue;

use crate::error::{Error, Result};

/// A last-evaluated-key map, ordered deterministically for stable encoding.
pub type KeyMap = Vec<(String, AttrValue)>;

fn attr_to_wire(value: &AttrValue) -> serde_json::Value {
    use serde_json::json;
    match value {
        AttrValue::S(s) => json!({"S": s}),
        AttrValue::N(n) => json!({"N": n}),
        AttrValue::Bool(b) => json!({"BOOL": b}),
        AttrValue::B(b) => json!({"B": base64::engine::general_purpose::STANDARD.encode(b)}),
        AttrValue::L(l) => json!({"L": l.iter().map(attr_to_wire).collect::<Vec<_>>()}),
        AttrValue::M(m) => {
            let obj: serde_json::Map<String, serde_json::Value> =
                m.iter().map(|(k, v)| (k.clone(), attr_to_wire(v))).collect();
            json!({"M": obj})
        }
        AttrValue::Ss(s) => json!({"SS": s.iter().collect::<Vec<_>>()}),
        AttrValue::Ns(s) => json!({"NS": s.iter().collect::<Vec<_>>()}),
        AttrValue::Bs(b) => {
            json!({"BS": b.iter().map(|x| base64::engine::general_purpose::STANDARD.encode(x)).collect::<Vec<_>>()})
        }
        AttrValue::Null => json!({"NULL": true}),
    }
}

fn wire_to_attr(value: &serde_json::Value) -> Result<AttrValue> {
    let obj = value
        .as_object()
        .ok_or_else(|| Error::validation("cursor: expected attribute-value object"))?;
    let (kind, inner) = obj
        .iter()
        .next()
        .ok_or_else(|| Error::validation("cursor: empty attribute-value object"))?;
    Ok(match kind.as_str() {
        "S" => AttrValue::S(inner.as_str().unwrap_or_default().to_string()),
        "N" => AttrValue::N(inner.as_str().unwrap_or_default().to_string()),
        "BOOL" => AttrValue::Bool(inner.as_bool().unwrap_or_default()),
        "B" => AttrValue::B(
            base64::engine::general_purpose::STANDARD
                .decode(inner.as_str().unwrap_or_default())
                .map_err(|e| Error::validation(format!("cursor: bad B encoding: {e}")))?,
        ),
        "L" => {
            let items = inner.as_array().ok_or_else(|| Error::validation("cursor: expected L array"))?;
            AttrValue::L(items.iter().map(wire_to_attr).collect::<Result<Vec<_>>>()?)
        }
        "M" => {
            let map = inner.as_object().ok_or_else(|| Error::validation("cursor: expected M object"))?;
            let mut out = std::collections::BTreeMap::new();
            for (k, v) in map {
                out.insert(k.clone(), wire_to_attr(v)?);
            }
            AttrValue::M(out)
        }
        "SS" => AttrValue::Ss(
            inner
                .as_array()
                .ok_or_else(|| Error::validation("cursor: expected SS array"))?
                .iter()
                .map(|v| v.as_str().unwrap_or_default().to_string())
                .collect(),
        ),
        "NS" => AttrValue::Ns(
            inner
                .as_array()
                .ok_or_else(|| Error::validation("cursor: expected NS array"))?
                .iter()
                .map(|v| v.as_str().unwrap_or_default().to_string())
                .collect(),
        ),
        "BS" => {
            let items = inner.as_array().ok_or_else(|| Error::validation("cursor: expected BS array"))?;
            let mut out = Vec::new();
            for item in items {
                let s = item.as_str().unwrap_or_default();
                out.push(
                    base64::engine::general_purpose::STANDARD
                        .decode(s)
                        .map_err(|e| Error::validation(format!("cursor: bad BS encoding: {e}")))?,
                );
            }
            AttrValue::Bs(out)
        }
        "NULL" => AttrValue::Null,
        other => return Err(Error::validation(format!("cursor: unknown attribute kind {other}"))),
    })
}

/// Encodes a last-evaluated-key map into an opaque cursor string.
pub fn encode(key: &KeyMap) -> String {
    let wire: Vec<(String, serde_json::Value)> =
        key.iter().map(|(k, v)| (k.clone(), attr_to_wire(v))).collect();
    let json = serde_json::to_vec(&wire).expect("cursor serialization cannot fail");
    URL_SAFE_NO_PAD.encode(json)
}

/// Decodes a cursor string back into its key map. Fails with `Validation`
/// on malformed input rather than panicking on untrusted caller data.
pub fn decode(cursor: &str) -> Result<KeyMap> {
    let bytes = URL_SAFE_NO_PAD
        .decode(cursor)
        .map_err(|e| Error::validation(format!("malformed cursor: {e}")))?;
    let wire: Vec<(String, serde_json::Value)> =
        serde_json::from_slice(&bytes).map_err(|e| Error::validation(format!("malformed cursor: {e}")))?;
    wire.into_iter().map(|(k, v)| Ok((k, wire_to_attr(&v)?))).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_encode_decode() {
        let key: KeyMap = vec![
            ("pk".to_string(), AttrValue::S("user#1".to_string())),
            ("sk".to_string(), AttrValue::N("42".to_string())),
        ];
        let cursor = encode(&key);
        let decoded = decode(&cursor).unwrap();
        assert_eq!(decoded, key);
    }

    #[test]
    fn rejects_malformed_cursor() {
        assert!(decode("not valid base64!!!").is_err());
    }
}
