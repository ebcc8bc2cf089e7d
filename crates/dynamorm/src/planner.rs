//! Index Planner (C4): decides GetItem vs Query vs Scan, and which secondary
//! index, from the accumulated key-shaped conditions and the model's key
//! schema. Never suspends (spec §5) — purely a function of in-memory state.

use dynamorm_core::Descriptor;
use dynamorm_expr::Op;

use crate::error::{Error, Result};

/// One accumulated condition on a field that is (candidate to be) part of a
/// key schema. Conditions on non-key attributes never reach the planner —
/// the query builder demotes those to filters before calling in.
#[derive(Debug, Clone)]
pub struct KeyCondition {
    pub field: String,
    pub op: Op,
}

/// Everything the planner needs to pick an operation mode.
pub struct PlanInput<'a> {
    pub descriptor: &'a Descriptor,
    pub conditions: &'a [KeyCondition],
    pub explicit_index: Option<&'a str>,
    pub has_filter: bool,
    pub has_order: bool,
    pub has_limit: bool,
    pub has_cursor: bool,
    pub explicit_scan: bool,
}

/// The selected operation mode. `Query`/`table-query` both carry the chosen
/// index (`None` means the table's own key schema).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlannedMode {
    Get,
    Query { index: Option<String> },
    Scan,
}

struct Candidate<'a> {
    index_name: Option<&'a str>,
    pk_field: &'a str,
    sk_field: Option<&'a str>,
    rank: u8,
}

fn eq_condition<'a>(conditions: &'a [KeyCondition], field: &str) -> Option<&'a KeyCondition> {
    conditions.iter().find(|c| c.field == field && c.op == Op::Eq)
}

fn any_condition<'a>(conditions: &'a [KeyCondition], field: &str) -> Option<&'a KeyCondition> {
    conditions.iter().find(|c| c.field == field)
}

/// Picks the operation mode for a read, per spec §4.4's ordered, first-match
/// rules.
pub fn plan_read(input: PlanInput<'_>) -> Result<PlannedMode> {
    if input.explicit_scan {
        return Ok(PlannedMode::Scan);
    }

    let d = input.descriptor;

    if input.explicit_index.is_none()
        && !input.has_filter
        && !input.has_order
        && !input.has_limit
        && !input.has_cursor
    {
        let pk_ok = eq_condition(input.conditions, d.partition_key.in_memory_name).is_some();
        let sk_ok = match &d.sort_key {
            Some(sk) => eq_condition(input.conditions, sk.in_memory_name).is_some(),
            None => true,
        };
        if pk_ok && sk_ok {
            return Ok(PlannedMode::Get);
        }
    }

    if let Some(explicit) = input.explicit_index {
        let candidate = d
            .global_index(explicit)
            .map(|g| Candidate {
                index_name: Some(explicit),
                pk_field: g.pk_field,
                sk_field: g.sk_field,
                rank: 0,
            })
            .or_else(|| {
                d.local_index(explicit).map(|l| Candidate {
                    index_name: Some(explicit),
                    pk_field: d.partition_key.in_memory_name,
                    sk_field: Some(l.sk_field),
                    rank: 0,
                })
            });
        let candidate = candidate.ok_or_else(|| Error::validation(format!("no such index {explicit:?}")))?;
        if eq_condition(input.conditions, candidate.pk_field).is_none() {
            return Err(Error::validation(format!(
                "index {explicit:?} requires an equality condition on its partition key {:?}",
                candidate.pk_field
            )));
        }
        return Ok(PlannedMode::Query {
            index: Some(explicit.to_string()),
        });
    }

    let mut candidates: Vec<Candidate<'_>> = Vec::new();
    for g in &d.global_indexes {
        let both = g.sk_field.is_some();
        candidates.push(Candidate {
            index_name: Some(g.name.as_str()),
            pk_field: g.pk_field,
            sk_field: g.sk_field,
            rank: if both { 1 } else { 2 },
        });
    }
    for l in &d.local_indexes {
        candidates.push(Candidate {
            index_name: Some(l.name.as_str()),
            pk_field: d.partition_key.in_memory_name,
            sk_field: Some(l.sk_field),
            rank: 3,
        });
    }
    candidates.push(Candidate {
        index_name: None,
        pk_field: d.partition_key.in_memory_name,
        sk_field: d.sort_key.as_ref().map(|f| f.in_memory_name),
        rank: 4,
    });

    let mut matching: Vec<&Candidate<'_>> = candidates
        .iter()
        .filter(|c| {
            if eq_condition(input.conditions, c.pk_field).is_none() {
                return false;
            }
            if let Some(sk_field) = c.sk_field {
                if let Some(cond) = any_condition(input.conditions, sk_field) {
                    return cond.op.valid_in_key_condition();
                }
            }
            true
        })
        .collect();

    matching.sort_by(|a, b| {
        a.rank
            .cmp(&b.rank)
            .then_with(|| a.index_name.unwrap_or("").cmp(b.index_name.unwrap_or("")))
    });

    if let Some(best) = matching.first() {
        return Ok(PlannedMode::Query {
            index: best.index_name.map(|s| s.to_string()),
        });
    }

    Err(Error::validation(
        "no key condition satisfies the table's or any index's key schema; call .scan() explicitly for a full-table scan",
    ))
}
