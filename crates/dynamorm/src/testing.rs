//! An in-process [`BackendClient`] for tests, gated behind the `test-util`
//! feature. No network, no persistence, deterministic: good enough to drive
//! the query/update/batch builders in this crate's own tests, and exported
//! for downstream crates that want the same without standing up a real
//! backend.
//!
//! This is a mock, not a second implementation of the wire protocol: it
//! re-derives enough of DynamoDB's expression-language semantics to apply
//! the strings [`dynamorm_expr::ExpressionBuilder`] renders, by pattern
//! matching on the small, fixed set of shapes that builder ever produces
//! (it never sees arbitrary user input). Projection trimming is a no-op —
//! the mock has no descriptor to map an in-memory field name back to a
//! storage dbname, so `all_paginated`/`select` callers see full items in
//! tests.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use async_trait::async_trait;
use dynamorm_core::AttrValue;

use crate::backend::{
    BackendClient, BatchGetResult, BatchWriteResult, CompiledBatchGet, CompiledBatchWrite, CompiledRead, CompiledWrite,
    GetPlan, Item, QueryPage, ReturnValues, TransactKind, TransactOp, WriteOp,
};
use crate::cursor::{self, KeyMap};
use crate::error::{CancellationKind, CancellationReason, Error, Result};

#[derive(Default)]
struct Table {
    items: BTreeMap<String, Item>,
}

/// A fully in-memory [`BackendClient`].
#[derive(Default)]
pub struct MockBackend {
    tables: Mutex<BTreeMap<String, Table>>,
    seen_tokens: Mutex<BTreeSet<String>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds one item directly, bypassing any condition expression.
    pub fn seed(&self, table: &str, key: KeyMap, item: Item) {
        let mut tables = self.tables.lock().unwrap();
        let t = tables.entry(table.to_string()).or_default();
        t.items.insert(storage_key(&key), item);
    }

    pub fn table_len(&self, table: &str) -> usize {
        self.tables.lock().unwrap().get(table).map(|t| t.items.len()).unwrap_or(0)
    }

    pub fn get(&self, table: &str, key: &KeyMap) -> Option<Item> {
        self.tables.lock().unwrap().get(table).and_then(|t| t.items.get(&storage_key(key)).cloned())
    }
}

fn storage_key(key: &KeyMap) -> String {
    cursor::encode(key)
}

fn key_from_item(key: &KeyMap, item: &Item) -> KeyMap {
    key.iter()
        .map(|(k, _)| (k.clone(), item.get(k).cloned().unwrap_or(AttrValue::Null)))
        .collect()
}

fn return_item(return_values: ReturnValues, old: Option<&Item>, new: Option<&Item>) -> Option<Item> {
    match return_values {
        ReturnValues::None => None,
        ReturnValues::AllOld | ReturnValues::UpdatedOld => old.cloned(),
        ReturnValues::AllNew | ReturnValues::UpdatedNew => new.cloned(),
    }
}

#[async_trait]
impl BackendClient for MockBackend {
    async fn get_item(&self, plan: GetPlan) -> Result<Option<Item>> {
        let tables = self.tables.lock().unwrap();
        let item = tables
            .get(&plan.table)
            .and_then(|t| t.items.get(&storage_key(&plan.key)))
            .cloned();
        Ok(item)
    }

    async fn query(&self, plan: CompiledRead) -> Result<QueryPage> {
        Ok(self.run_read(&plan))
    }

    async fn scan(&self, plan: CompiledRead, _segment: Option<(u32, u32)>) -> Result<QueryPage> {
        Ok(self.run_read(&plan))
    }

    async fn put_item(&self, plan: CompiledWrite) -> Result<Option<Item>> {
        let WriteOp::Put(new_item) = &plan.op else {
            return Err(Error::validation("put_item called with a non-Put WriteOp"));
        };
        let mut tables = self.tables.lock().unwrap();
        let table = tables.entry(plan.table.clone()).or_default();
        let storage = storage_key(&plan.key);
        let old = table.items.get(&storage).cloned();
        if !eval_condition(plan.condition.as_deref(), &plan.name_placeholders, &plan.value_placeholders, old.as_ref()) {
            return Err(Error::ConditionFailed);
        }
        table.items.insert(storage, new_item.clone());
        Ok(return_item(plan.return_values, old.as_ref(), Some(new_item)))
    }

    async fn update_item(&self, plan: CompiledWrite) -> Result<Option<Item>> {
        let WriteOp::Update(clauses) = &plan.op else {
            return Err(Error::validation("update_item called with a non-Update WriteOp"));
        };
        let mut tables = self.tables.lock().unwrap();
        let table = tables.entry(plan.table.clone()).or_default();
        let storage = storage_key(&plan.key);
        let old = table.items.get(&storage).cloned();
        if !eval_condition(plan.condition.as_deref(), &plan.name_placeholders, &plan.value_placeholders, old.as_ref()) {
            return Err(Error::ConditionFailed);
        }
        let mut new_item = old.clone().unwrap_or_default();
        for (k, v) in &plan.key {
            new_item.entry(k.clone()).or_insert_with(|| v.clone());
        }
        apply_update(clauses, &plan.name_placeholders, &plan.value_placeholders, &mut new_item);
        table.items.insert(storage, new_item.clone());
        Ok(return_item(plan.return_values, old.as_ref(), Some(&new_item)))
    }

    async fn delete_item(&self, plan: CompiledWrite) -> Result<Option<Item>> {
        let mut tables = self.tables.lock().unwrap();
        let table = tables.entry(plan.table.clone()).or_default();
        let storage = storage_key(&plan.key);
        let old = table.items.get(&storage).cloned();
        if !eval_condition(plan.condition.as_deref(), &plan.name_placeholders, &plan.value_placeholders, old.as_ref()) {
            return Err(Error::ConditionFailed);
        }
        table.items.remove(&storage);
        Ok(return_item(plan.return_values, old.as_ref(), None))
    }

    async fn batch_get_item(&self, plan: CompiledBatchGet) -> Result<BatchGetResult> {
        let tables = self.tables.lock().unwrap();
        let mut items = Vec::new();
        for key in &plan.keys {
            if let Some(item) = tables.get(&plan.table).and_then(|t| t.items.get(&storage_key(key))) {
                items.push(item.clone());
            }
        }
        Ok(BatchGetResult { items, unprocessed_keys: Vec::new() })
    }

    async fn batch_write_item(&self, plan: CompiledBatchWrite) -> Result<BatchWriteResult> {
        let mut tables = self.tables.lock().unwrap();
        let table = tables.entry(plan.table.clone()).or_default();
        for (key, item) in &plan.puts {
            table.items.insert(storage_key(key), item.clone());
        }
        for key in &plan.deletes {
            table.items.remove(&storage_key(key));
        }
        Ok(BatchWriteResult::default())
    }

    async fn transact_write_items(&self, ops: Vec<TransactOp>, client_request_token: String) -> Result<()> {
        {
            let mut seen = self.seen_tokens.lock().unwrap();
            if !seen.insert(client_request_token) {
                return Ok(());
            }
        }

        let mut tables = self.tables.lock().unwrap();
        let mut reasons = Vec::new();
        for (idx, op) in ops.iter().enumerate() {
            let current = tables.get(&op.table).and_then(|t| t.items.get(&storage_key(&op.key)));
            let ok = eval_condition(op.condition.as_deref(), &op.name_placeholders, &op.value_placeholders, current);
            if !ok {
                reasons.push(CancellationReason {
                    index: idx,
                    kind: CancellationKind::ConditionFailed,
                    message: Some(format!("condition check failed for {}/{:?}", op.table, op.key)),
                });
            } else {
                reasons.push(CancellationReason { index: idx, kind: CancellationKind::Other, message: None });
            }
        }
        if reasons.iter().any(|r| r.kind == CancellationKind::ConditionFailed) {
            return Err(Error::TransactionCanceled { reasons });
        }

        for op in ops {
            let table = tables.entry(op.table.clone()).or_default();
            let storage = storage_key(&op.key);
            match op.kind {
                TransactKind::Put | TransactKind::Create => {
                    let item = op.item.unwrap_or_default();
                    table.items.insert(storage, item);
                }
                TransactKind::Update => {
                    let mut item = table.items.get(&storage).cloned().unwrap_or_default();
                    for (k, v) in &op.key {
                        item.entry(k.clone()).or_insert_with(|| v.clone());
                    }
                    if let Some(expr) = &op.update_expression {
                        apply_update(&parse_update_expression(expr), &op.name_placeholders, &op.value_placeholders, &mut item);
                    }
                    table.items.insert(storage, item);
                }
                TransactKind::Delete => {
                    table.items.remove(&storage);
                }
                TransactKind::ConditionCheck => {}
            }
        }
        Ok(())
    }
}

impl MockBackend {
    fn run_read(&self, plan: &CompiledRead) -> QueryPage {
        let tables = self.tables.lock().unwrap();
        let mut candidates: Vec<(&String, &Item)> = tables
            .get(&plan.table)
            .map(|t| t.items.iter().collect())
            .unwrap_or_default();
        candidates.sort_by(|a, b| a.0.cmp(b.0));
        if !plan.forward {
            candidates.reverse();
        }

        let mut matching: Vec<&Item> = candidates
            .into_iter()
            .filter(|(_, item)| {
                eval_condition(plan.key_condition.as_deref(), &plan.name_placeholders, &plan.value_placeholders, Some(item))
                    && eval_condition(plan.filter.as_deref(), &plan.name_placeholders, &plan.value_placeholders, Some(item))
            })
            .map(|(_, item)| item)
            .collect();

        if let Some(start) = &plan.start_key {
            let start_storage = storage_key(start);
            if let Some(pos) = matching.iter().position(|item| storage_key(&key_from_item(start, item)) == start_storage) {
                matching = matching.split_off(pos + 1);
            }
        }

        let total_matching = matching.len();
        let (page, has_more) = match plan.limit {
            Some(n) if n < matching.len() => (matching[..n].to_vec(), true),
            _ => (matching, false),
        };

        let last_evaluated_key = if has_more {
            page.last().map(|item| item.iter().map(|(k, v)| (k.clone(), v.clone())).collect::<KeyMap>())
        } else {
            None
        };

        if plan.count_only {
            QueryPage { items: Vec::new(), last_evaluated_key, count: total_matching.min(plan.limit.unwrap_or(total_matching)) }
        } else {
            let count = page.len();
            QueryPage { items: page.into_iter().cloned().collect(), last_evaluated_key, count }
        }
    }
}

// ---- a tiny, purpose-built reader for the condition/filter/update-clause
// shapes `ExpressionBuilder` renders. Not a general expression-language
// parser; see module docs. ----

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Conn {
    And,
    Or,
}

fn resolve_name(token: &str, names: &BTreeMap<String, String>) -> (String, Option<usize>) {
    if let Some(bracket) = token.find('[') {
        let base = &token[..bracket];
        let idx: usize = token[bracket + 1..token.len() - 1].parse().unwrap_or(0);
        (names.get(base).cloned().unwrap_or_else(|| base.to_string()), Some(idx))
    } else {
        (names.get(token).cloned().unwrap_or_else(|| token.to_string()), None)
    }
}

fn resolve_value(token: &str, values: &BTreeMap<String, AttrValue>) -> AttrValue {
    values.get(token).cloned().unwrap_or(AttrValue::Null)
}

fn split_top_level(expr: &str) -> Vec<(Conn, String)> {
    let mut out = Vec::new();
    let mut depth = 0i32;
    let mut start = 0usize;
    let mut skip_next_and = false;
    let mut pending = Conn::And;
    let mut i = 0usize;
    let bytes = expr.as_bytes();
    while i < expr.len() {
        match bytes[i] {
            b'(' => depth += 1,
            b')' => depth -= 1,
            _ => {}
        }
        if depth == 0 {
            if expr[i..].starts_with("BETWEEN") {
                skip_next_and = true;
            }
            if expr[i..].starts_with(" AND ") {
                if skip_next_and {
                    skip_next_and = false;
                } else {
                    out.push((pending, expr[start..i].to_string()));
                    pending = Conn::And;
                    i += 5;
                    start = i;
                    continue;
                }
            } else if expr[i..].starts_with(" OR ") {
                out.push((pending, expr[start..i].to_string()));
                pending = Conn::Or;
                i += 4;
                start = i;
                continue;
            }
        }
        i += 1;
    }
    out.push((pending, expr[start..].to_string()));
    out
}

fn numeric(v: &AttrValue) -> Option<f64> {
    match v {
        AttrValue::N(n) => n.parse::<f64>().ok(),
        _ => None,
    }
}

fn compare(lhs: &AttrValue, rhs: &AttrValue) -> Option<std::cmp::Ordering> {
    if let (Some(a), Some(b)) = (numeric(lhs), numeric(rhs)) {
        return a.partial_cmp(&b);
    }
    match (lhs, rhs) {
        (AttrValue::S(a), AttrValue::S(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn lookup<'a>(item: Option<&'a Item>, field: &str) -> Option<&'a AttrValue> {
    item.and_then(|i| i.get(field))
}

fn eval_leaf(term: &str, names: &BTreeMap<String, String>, values: &BTreeMap<String, AttrValue>, item: Option<&Item>) -> bool {
    let term = term.trim();
    if let Some(inner) = term.strip_prefix("attribute_exists(").and_then(|s| s.strip_suffix(')')) {
        let (field, _) = resolve_name(inner, names);
        return lookup(item, &field).is_some();
    }
    if let Some(inner) = term.strip_prefix("attribute_not_exists(").and_then(|s| s.strip_suffix(')')) {
        let (field, _) = resolve_name(inner, names);
        return lookup(item, &field).is_none();
    }
    if let Some(inner) = term.strip_prefix("begins_with(").and_then(|s| s.strip_suffix(')')) {
        let (name_tok, value_tok) = inner.split_once(", ").unwrap_or((inner, ""));
        let (field, _) = resolve_name(name_tok, names);
        let needle = resolve_value(value_tok, values);
        return match (lookup(item, &field), &needle) {
            (Some(AttrValue::S(s)), AttrValue::S(prefix)) => s.starts_with(prefix.as_str()),
            _ => false,
        };
    }
    if let Some(inner) = term.strip_prefix("contains(").and_then(|s| s.strip_suffix(')')) {
        let (name_tok, value_tok) = inner.split_once(", ").unwrap_or((inner, ""));
        let (field, _) = resolve_name(name_tok, names);
        let needle = resolve_value(value_tok, values);
        return match lookup(item, &field) {
            Some(AttrValue::S(s)) => matches!(&needle, AttrValue::S(n) if s.contains(n.as_str())),
            Some(AttrValue::Ss(set)) => matches!(&needle, AttrValue::S(n) if set.contains(n)),
            Some(AttrValue::Ns(set)) => matches!(&needle, AttrValue::N(n) if set.contains(n)),
            Some(AttrValue::L(list)) => list.contains(&needle),
            _ => false,
        };
    }
    if term.starts_with('(') && term.ends_with(')') {
        return eval_tree(&term[1..term.len() - 1], names, values, item);
    }
    if let Some((name_tok, rest)) = term.split_once(" BETWEEN ") {
        let (field, _) = resolve_name(name_tok, names);
        let (lo_tok, hi_tok) = rest.split_once(" AND ").unwrap_or((rest, rest));
        let lo = resolve_value(lo_tok, values);
        let hi = resolve_value(hi_tok, values);
        return match lookup(item, &field) {
            Some(v) => compare(v, &lo).map(|o| o.is_ge()).unwrap_or(false) && compare(v, &hi).map(|o| o.is_le()).unwrap_or(false),
            None => false,
        };
    }
    if let Some((name_tok, rest)) = term.split_once(" IN (") {
        let (field, _) = resolve_name(name_tok, names);
        let rest = rest.strip_suffix(')').unwrap_or(rest);
        let options: Vec<AttrValue> = rest.split(", ").map(|t| resolve_value(t, values)).collect();
        return match lookup(item, &field) {
            Some(v) => options.iter().any(|o| o == v),
            None => false,
        };
    }
    let comparisons: [(&str, fn(std::cmp::Ordering) -> bool); 6] = [
        (" <> ", |_| true),
        (" <= ", |o| o.is_le()),
        (" >= ", |o| o.is_ge()),
        (" < ", |o| o.is_lt()),
        (" > ", |o| o.is_gt()),
        (" = ", |o| o.is_eq()),
    ];
    for (op, cmp) in comparisons {
        if let Some((name_tok, value_tok)) = term.split_once(op) {
            let (field, _) = resolve_name(name_tok, names);
            let rhs = resolve_value(value_tok, values);
            let lhs = lookup(item, &field);
            return match lhs {
                Some(v) if op == " <> " => v != &rhs,
                Some(v) => compare(v, &rhs).map(cmp).unwrap_or(false),
                None => op == " <> ",
            };
        }
    }
    false
}

fn eval_tree(expr: &str, names: &BTreeMap<String, String>, values: &BTreeMap<String, AttrValue>, item: Option<&Item>) -> bool {
    let parts = split_top_level(expr);
    let mut acc: Option<bool> = None;
    for (conn, term) in parts {
        let v = eval_leaf(&term, names, values, item);
        acc = Some(match (acc, conn) {
            (None, _) => v,
            (Some(a), Conn::And) => a && v,
            (Some(a), Conn::Or) => a || v,
        });
    }
    acc.unwrap_or(true)
}

fn eval_condition(expr: Option<&str>, names: &BTreeMap<String, String>, values: &BTreeMap<String, AttrValue>, item: Option<&Item>) -> bool {
    match expr {
        Some(e) => eval_tree(e, names, values, item),
        None => true,
    }
}

fn set_list_at(list: &mut AttrValue, index: usize, value: AttrValue) {
    if let AttrValue::L(items) = list {
        if index < items.len() {
            items[index] = value;
        } else {
            items.resize(index + 1, AttrValue::Null);
            items[index] = value;
        }
    }
}

fn apply_update(clauses: &dynamorm_expr::UpdateClauses, names: &BTreeMap<String, String>, values: &BTreeMap<String, AttrValue>, item: &mut Item) {
    for term in &clauses.set {
        let (name_tok, rhs) = match term.split_once(" = ") {
            Some(pair) => pair,
            None => continue,
        };
        let (field, index) = resolve_name(name_tok, names);
        if let Some(inner) = rhs.strip_prefix("if_not_exists(").and_then(|s| s.strip_suffix(')')) {
            let (_, default_tok) = inner.split_once(", ").unwrap_or((inner, rhs));
            if !item.contains_key(&field) {
                item.insert(field, resolve_value(default_tok, values));
            }
            continue;
        }
        if let Some(inner) = rhs.strip_prefix("list_append(").and_then(|s| s.strip_suffix(')')) {
            let (lhs_tok, rhs_tok) = inner.split_once(", ").unwrap_or((inner, inner));
            // `list_append(:v, #n)` is a prepend, `list_append(#n, :v)` is an
            // append (builder.rs's `list_append`); the list's own placeholder
            // always starts with `#`, the value being spliced in with `:`.
            let prepend = lhs_tok.starts_with(':');
            let existing = item.get(&field).cloned().unwrap_or(AttrValue::L(Vec::new()));
            let addition = if prepend { resolve_value(lhs_tok, values) } else { resolve_value(rhs_tok, values) };
            let mut merged = match existing {
                AttrValue::L(l) => l,
                _ => Vec::new(),
            };
            let added = match addition {
                AttrValue::L(l) => l,
                other => vec![other],
            };
            if prepend {
                let mut out = added;
                out.extend(merged);
                merged = out;
            } else {
                merged.extend(added);
            }
            item.insert(field, AttrValue::L(merged));
            continue;
        }
        let value = resolve_value(rhs, values);
        match index {
            Some(idx) => {
                let mut existing = item.get(&field).cloned().unwrap_or(AttrValue::L(Vec::new()));
                set_list_at(&mut existing, idx, value);
                item.insert(field, existing);
            }
            None => {
                item.insert(field, value);
            }
        }
    }

    for term in &clauses.add {
        let (name_tok, value_tok) = match term.split_once(' ') {
            Some(pair) => pair,
            None => continue,
        };
        let (field, _) = resolve_name(name_tok, names);
        let addition = resolve_value(value_tok, values);
        let merged = match (item.get(&field).cloned(), addition) {
            (Some(AttrValue::N(a)), AttrValue::N(b)) => {
                let sum = a.parse::<f64>().unwrap_or(0.0) + b.parse::<f64>().unwrap_or(0.0);
                AttrValue::N(format_number(sum))
            }
            (None, AttrValue::N(b)) => AttrValue::N(b),
            (Some(AttrValue::Ss(mut a)), AttrValue::Ss(b)) => {
                a.extend(b);
                AttrValue::Ss(a)
            }
            (None, AttrValue::Ss(b)) => AttrValue::Ss(b),
            (Some(AttrValue::Ns(mut a)), AttrValue::Ns(b)) => {
                a.extend(b);
                AttrValue::Ns(a)
            }
            (None, AttrValue::Ns(b)) => AttrValue::Ns(b),
            (_, other) => other,
        };
        item.insert(field, merged);
    }

    for term in &clauses.delete {
        let (name_tok, value_tok) = match term.split_once(' ') {
            Some(pair) => pair,
            None => continue,
        };
        let (field, _) = resolve_name(name_tok, names);
        let removal = resolve_value(value_tok, values);
        if let Some(existing) = item.get_mut(&field) {
            match (existing, removal) {
                (AttrValue::Ss(set), AttrValue::Ss(remove)) => set.retain(|v| !remove.contains(v)),
                (AttrValue::Ns(set), AttrValue::Ns(remove)) => set.retain(|v| !remove.contains(v)),
                _ => {}
            }
        }
    }

    for term in &clauses.remove {
        let (field, index) = resolve_name(term, names);
        match index {
            Some(idx) => {
                if let Some(AttrValue::L(list)) = item.get_mut(&field) {
                    if idx < list.len() {
                        list.remove(idx);
                    }
                }
            }
            None => {
                item.remove(&field);
            }
        }
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i128)
    } else {
        n.to_string()
    }
}

/// Parses a raw `UpdateExpression` string (used by the transaction path,
/// which carries a pre-rendered expression rather than [`UpdateClauses`])
/// back into the same shape [`apply_update`] expects.
fn parse_update_expression(expr: &str) -> dynamorm_expr::UpdateClauses {
    let mut out = dynamorm_expr::UpdateClauses::default();
    let mut current: Option<&mut Vec<String>> = None;
    for word in split_update_keywords(expr) {
        match word {
            UpdateSection::Keyword("SET") => current = Some(&mut out.set),
            UpdateSection::Keyword("ADD") => current = Some(&mut out.add),
            UpdateSection::Keyword("REMOVE") => current = Some(&mut out.remove),
            UpdateSection::Keyword("DELETE") => current = Some(&mut out.delete),
            UpdateSection::Keyword(_) => {}
            UpdateSection::Body(body) => {
                if let Some(target) = current.as_deref_mut() {
                    target.extend(body.split(", ").map(|s| s.trim().to_string()));
                }
            }
        }
    }
    out
}

enum UpdateSection<'a> {
    Keyword(&'a str),
    Body(&'a str),
}

fn split_update_keywords(expr: &str) -> Vec<UpdateSection<'_>> {
    let mut out = Vec::new();
    let mut rest = expr;
    for kw in ["SET ", "ADD ", "REMOVE ", "DELETE "] {
        if let Some(pos) = rest.find(kw) {
            let (before, after) = rest.split_at(pos);
            if !before.trim().is_empty() {
                out.push(UpdateSection::Body(before.trim()));
            }
            out.push(UpdateSection::Keyword(kw.trim()));
            rest = &after[kw.len()..];
        }
    }
    if !rest.trim().is_empty() {
        out.push(UpdateSection::Body(rest.trim()));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::GetPlan;

    fn key(pk: &str) -> KeyMap {
        vec![("id".to_string(), AttrValue::S(pk.to_string()))]
    }

    fn item(pk: &str, count: i64) -> Item {
        let mut m = Item::new();
        m.insert("id".to_string(), AttrValue::S(pk.to_string()));
        m.insert("count".to_string(), AttrValue::N(count.to_string()));
        m
    }

    #[tokio::test]
    async fn seeded_item_is_retrievable_via_get_item() {
        let backend = MockBackend::new();
        backend.seed("widgets", key("a"), item("a", 1));
        let got = backend
            .get_item(GetPlan {
                table: "widgets".into(),
                key: key("a"),
                consistent_read: false,
                projection: None,
                name_placeholders: BTreeMap::new(),
            })
            .await
            .unwrap();
        assert_eq!(got, Some(item("a", 1)));
    }

    #[tokio::test]
    async fn put_with_failing_condition_is_condition_failed() {
        let backend = MockBackend::new();
        backend.seed("widgets", key("a"), item("a", 1));
        let mut names = BTreeMap::new();
        names.insert("#n_0".to_string(), "id".to_string());
        let mut values = BTreeMap::new();
        values.insert(":v_0".to_string(), AttrValue::Null);
        let plan = CompiledWrite {
            table: "widgets".into(),
            key: key("a"),
            op: WriteOp::Put(item("a", 2)),
            condition: Some("attribute_not_exists(#n_0)".to_string()),
            return_values: ReturnValues::None,
            name_placeholders: names,
            value_placeholders: values,
        };
        let err = backend.put_item(plan).await.unwrap_err();
        assert!(matches!(err, Error::ConditionFailed));
        assert_eq!(backend.get("widgets", &key("a")), Some(item("a", 1)));
    }

    #[tokio::test]
    async fn update_add_increments_numeric_counter() {
        let backend = MockBackend::new();
        backend.seed("widgets", key("a"), item("a", 1));
        let mut eb = dynamorm_expr::ExpressionBuilder::new();
        eb.add("count", AttrValue::N("5".to_string()));
        let components = eb.build();
        let plan = CompiledWrite {
            table: "widgets".into(),
            key: key("a"),
            op: WriteOp::Update(components.update_clauses),
            condition: None,
            return_values: ReturnValues::AllNew,
            name_placeholders: components.name_placeholders,
            value_placeholders: components.value_placeholders,
        };
        let new_item = backend.update_item(plan).await.unwrap().unwrap();
        assert_eq!(new_item.get("count"), Some(&AttrValue::N("6".to_string())));
    }
}
