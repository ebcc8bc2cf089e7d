//! End-to-end scenario tests against [`dynamorm::testing::MockBackend`],
//! one per literal scenario spelled out in spec §8 (S1-S6). Each seeds the
//! mock with the scenario's starting data, drives it through the public
//! builder surface exactly as an application would, and asserts the
//! documented outcome.

use std::sync::Arc;
use std::time::Duration;

use dynamorm::testing::MockBackend;
use dynamorm::{AttrValue, CancellationKind, Descriptor, Error, Key, Model, Op, Role};
use dynamorm_config::RuntimeConfig;
use dynamorm_core::{CoreError, DescriptorBuilder, FieldDescriptor};
use std::collections::BTreeMap;

fn field(in_memory_name: &'static str, dbname: &str, role: Role) -> FieldDescriptor {
    FieldDescriptor {
        in_memory_name,
        dbname: dbname.to_string(),
        role,
        is_set: false,
        is_json_blob: false,
        omit_if_empty: false,
    }
}

fn str_attr(attrs: &BTreeMap<String, AttrValue>, key: &str) -> Result<String, CoreError> {
    match attrs.get(key) {
        Some(AttrValue::S(s)) => Ok(s.clone()),
        _ => Err(CoreError::Conversion {
            field: key.to_string(),
            reason: "expected a string".to_string(),
        }),
    }
}

fn num_attr(attrs: &BTreeMap<String, AttrValue>, key: &str) -> Result<i64, CoreError> {
    match attrs.get(key) {
        Some(AttrValue::N(n)) => n.parse().map_err(|_| CoreError::Conversion {
            field: key.to_string(),
            reason: "not a valid number".to_string(),
        }),
        _ => Err(CoreError::Conversion {
            field: key.to_string(),
            reason: "expected a number".to_string(),
        }),
    }
}

// ---- S1: conditional create guard -----------------------------------

#[derive(Clone)]
struct User {
    id: String,
    email: String,
    version: i64,
}

impl Model for User {
    const TYPE_NAME: &'static str = "User";

    fn build_descriptor() -> dynamorm_core::Result<Descriptor> {
        DescriptorBuilder::new(Self::TYPE_NAME, "users")
            .field(field("id", "id", Role::Pk))
            .field(field("email", "email", Role::Plain))
            .field(field("version", "version", Role::Version))
            .build()
    }

    fn into_attrs(self) -> BTreeMap<String, AttrValue> {
        let mut m = BTreeMap::new();
        m.insert("id".to_string(), AttrValue::S(self.id));
        m.insert("email".to_string(), AttrValue::S(self.email));
        m.insert("version".to_string(), AttrValue::N(self.version.to_string()));
        m
    }

    fn from_attrs(attrs: &BTreeMap<String, AttrValue>) -> dynamorm_core::Result<Self> {
        Ok(User {
            id: str_attr(attrs, "id")?,
            email: str_attr(attrs, "email")?,
            version: num_attr(attrs, "version")?,
        })
    }
}

#[tokio::test]
async fn s1_conditional_create_guard() {
    let client = dynamorm::DynamormClient::new(Arc::new(MockBackend::new()), RuntimeConfig::default());

    client
        .query::<User>()
        .unwrap()
        .if_not_exists()
        .create(User { id: "u1".into(), email: "a@x".into(), version: 0 })
        .await
        .unwrap();

    let stored_after_first = client
        .query::<User>()
        .unwrap()
        .r#where("id", Op::Eq, vec![AttrValue::S("u1".to_string())])
        .first()
        .await
        .unwrap();
    assert_eq!(stored_after_first.version, 1);

    let err = client
        .query::<User>()
        .unwrap()
        .if_not_exists()
        .create(User { id: "u1".into(), email: "a@x".into(), version: 0 })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ConditionFailed));

    let stored_after_second = client
        .query::<User>()
        .unwrap()
        .r#where("id", Op::Eq, vec![AttrValue::S("u1".to_string())])
        .first()
        .await
        .unwrap();
    assert_eq!(stored_after_second.id, stored_after_first.id);
    assert_eq!(stored_after_second.email, stored_after_first.email);
    assert_eq!(stored_after_second.version, stored_after_first.version);
}

// ---- S2: dual-write transaction --------------------------------------

#[derive(Clone)]
struct Bookmark {
    id: String,
    user_id: String,
}

impl Model for Bookmark {
    const TYPE_NAME: &'static str = "Bookmark";

    fn build_descriptor() -> dynamorm_core::Result<Descriptor> {
        DescriptorBuilder::new(Self::TYPE_NAME, "bookmarks")
            .field(field("id", "id", Role::Pk))
            .field(field("user_id", "user_id", Role::Plain))
            .build()
    }

    fn into_attrs(self) -> BTreeMap<String, AttrValue> {
        let mut m = BTreeMap::new();
        m.insert("id".to_string(), AttrValue::S(self.id));
        m.insert("user_id".to_string(), AttrValue::S(self.user_id));
        m
    }

    fn from_attrs(attrs: &BTreeMap<String, AttrValue>) -> dynamorm_core::Result<Self> {
        Ok(Bookmark { id: str_attr(attrs, "id")?, user_id: str_attr(attrs, "user_id")? })
    }
}

#[derive(Clone)]
struct UserWithCount {
    id: String,
    bookmark_count: i64,
    version: i64,
}

impl Model for UserWithCount {
    const TYPE_NAME: &'static str = "User";

    fn build_descriptor() -> dynamorm_core::Result<Descriptor> {
        DescriptorBuilder::new(Self::TYPE_NAME, "users")
            .field(field("id", "id", Role::Pk))
            .field(field("bookmark_count", "bookmark_count", Role::Plain))
            .field(field("version", "version", Role::Version))
            .build()
    }

    fn into_attrs(self) -> BTreeMap<String, AttrValue> {
        let mut m = BTreeMap::new();
        m.insert("id".to_string(), AttrValue::S(self.id));
        m.insert("bookmark_count".to_string(), AttrValue::N(self.bookmark_count.to_string()));
        m.insert("version".to_string(), AttrValue::N(self.version.to_string()));
        m
    }

    fn from_attrs(attrs: &BTreeMap<String, AttrValue>) -> dynamorm_core::Result<Self> {
        Ok(UserWithCount {
            id: str_attr(attrs, "id")?,
            bookmark_count: num_attr(attrs, "bookmark_count")?,
            version: num_attr(attrs, "version")?,
        })
    }
}

#[tokio::test]
async fn s2_dual_write_transaction() {
    let backend = Arc::new(MockBackend::new());
    let client = dynamorm::DynamormClient::new(backend.clone(), RuntimeConfig::default());
    backend.seed(
        "users",
        vec![("id".to_string(), AttrValue::S("u1".to_string()))],
        UserWithCount { id: "u1".into(), bookmark_count: 10, version: 3 }.into_attrs(),
    );

    // `update_with_builder` carries no explicit version condition here: the
    // implied-version guard (transaction.rs::apply_implied_version) reads the
    // version off the item passed in (3), conditions on it, and bumps it.
    client
        .transact()
        .create(Bookmark { id: "b1".into(), user_id: "u1".into() }, vec![])
        .update_with_builder(UserWithCount { id: "u1".into(), bookmark_count: 10, version: 3 }, |ub| {
            ub.add("bookmark_count", AttrValue::N("1".to_string()))
        })
        .execute()
        .await
        .unwrap();

    let bookmark = backend.get("bookmarks", &vec![("id".to_string(), AttrValue::S("b1".to_string()))]);
    assert!(bookmark.is_some());
    let user = backend.get("users", &vec![("id".to_string(), AttrValue::S("u1".to_string()))]).unwrap();
    assert_eq!(user.get("bookmark_count"), Some(&AttrValue::N("11".to_string())));
    assert_eq!(user.get("version"), Some(&AttrValue::N("4".to_string())));

    let err = client
        .transact()
        .create(Bookmark { id: "b1".into(), user_id: "u1".into() }, vec![])
        .update_with_builder(UserWithCount { id: "u1".into(), bookmark_count: 10, version: 3 }, |ub| {
            ub.add("bookmark_count", AttrValue::N("1".to_string()))
        })
        .execute()
        .await
        .unwrap_err();

    match err {
        Error::TransactionCanceled { reasons } => {
            assert_eq!(reasons.len(), 2);
            assert_eq!(reasons[0].kind, CancellationKind::ConditionFailed);
            assert_eq!(reasons[1].kind, CancellationKind::ConditionFailed);
        }
        other => panic!("expected TransactionCanceled, got {other:?}"),
    }

    let user_after_replay = backend.get("users", &vec![("id".to_string(), AttrValue::S("u1".to_string()))]).unwrap();
    assert_eq!(user_after_replay.get("bookmark_count"), Some(&AttrValue::N("11".to_string())));
    assert_eq!(user_after_replay.get("version"), Some(&AttrValue::N("4".to_string())));
}

// ---- S3: account transfer with guard ----------------------------------

#[derive(Clone)]
struct Acct {
    id: String,
    balance: i64,
    version: i64,
}

impl Model for Acct {
    const TYPE_NAME: &'static str = "Acct";

    fn build_descriptor() -> dynamorm_core::Result<Descriptor> {
        DescriptorBuilder::new(Self::TYPE_NAME, "accts")
            .field(field("id", "id", Role::Pk))
            .field(field("balance", "balance", Role::Plain))
            .field(field("version", "version", Role::Version))
            .build()
    }

    fn into_attrs(self) -> BTreeMap<String, AttrValue> {
        let mut m = BTreeMap::new();
        m.insert("id".to_string(), AttrValue::S(self.id));
        m.insert("balance".to_string(), AttrValue::N(self.balance.to_string()));
        m.insert("version".to_string(), AttrValue::N(self.version.to_string()));
        m
    }

    fn from_attrs(attrs: &BTreeMap<String, AttrValue>) -> dynamorm_core::Result<Self> {
        Ok(Acct { id: str_attr(attrs, "id")?, balance: num_attr(attrs, "balance")?, version: num_attr(attrs, "version")? })
    }
}

#[tokio::test]
async fn s3_account_transfer_with_failing_guard_leaves_balances_untouched() {
    let backend = Arc::new(MockBackend::new());
    let client = dynamorm::DynamormClient::new(backend.clone(), RuntimeConfig::default());
    backend.seed(
        "accts",
        vec![("id".to_string(), AttrValue::S("A".to_string()))],
        Acct { id: "A".into(), balance: 50, version: 1 }.into_attrs(),
    );
    backend.seed(
        "accts",
        vec![("id".to_string(), AttrValue::S("B".to_string()))],
        Acct { id: "B".into(), balance: 100, version: 1 }.into_attrs(),
    );

    let err = client
        .transact()
        .update_with_builder(Acct { id: "A".into(), balance: 50, version: 1 }, |ub| {
            ub.add("balance", AttrValue::N("-100".to_string())).condition("balance", Op::Ge, vec![AttrValue::N("100".to_string())])
        })
        .update_with_builder(Acct { id: "B".into(), balance: 100, version: 1 }, |ub| {
            ub.add("balance", AttrValue::N("100".to_string()))
        })
        .execute()
        .await
        .unwrap_err();

    assert!(matches!(err, Error::TransactionCanceled { .. }));
    let a = backend.get("accts", &vec![("id".to_string(), AttrValue::S("A".to_string()))]).unwrap();
    let b = backend.get("accts", &vec![("id".to_string(), AttrValue::S("B".to_string()))]).unwrap();
    assert_eq!(a.get("balance"), Some(&AttrValue::N("50".to_string())));
    assert_eq!(b.get("balance"), Some(&AttrValue::N("100".to_string())));
}

// ---- S4: batch get with chunking --------------------------------------

#[derive(Clone)]
struct Widget {
    id: String,
}

impl Model for Widget {
    const TYPE_NAME: &'static str = "Widget";

    fn build_descriptor() -> dynamorm_core::Result<Descriptor> {
        DescriptorBuilder::new(Self::TYPE_NAME, "widgets").field(field("id", "id", Role::Pk)).build()
    }

    fn into_attrs(self) -> BTreeMap<String, AttrValue> {
        let mut m = BTreeMap::new();
        m.insert("id".to_string(), AttrValue::S(self.id));
        m
    }

    fn from_attrs(attrs: &BTreeMap<String, AttrValue>) -> dynamorm_core::Result<Self> {
        Ok(Widget { id: str_attr(attrs, "id")? })
    }
}

#[tokio::test]
async fn s4_batch_get_chunks_at_100_and_skips_missing_keys() {
    let backend = Arc::new(MockBackend::new());
    for i in 1..=240 {
        let id = format!("k{i:03}");
        backend.seed("widgets", vec![("id".to_string(), AttrValue::S(id.clone()))], Widget { id }.into_attrs());
    }

    let keys: Vec<dynamorm::Key> = (1..=250).map(|i| Key::Simple(AttrValue::S(format!("k{i:03}")))).collect();
    let client = dynamorm::DynamormClient::new(backend, RuntimeConfig::default());
    let key_maps: Vec<_> = keys.into_iter().map(|k| client.resolve_key::<Widget>(k).unwrap()).collect();

    let chunk_calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let counter = chunk_calls.clone();
    let items = client
        .batch_engine()
        .progress_callback(move |_retrieved, _total| {
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        })
        .batch_get("widgets", key_maps, false, None)
        .await
        .unwrap();

    assert!(chunk_calls.load(std::sync::atomic::Ordering::SeqCst) >= 3);
    assert_eq!(items.len(), 240);
    let mut seen = std::collections::BTreeSet::new();
    for item in &items {
        let id = str_attr(item, "id").unwrap();
        assert!(id.as_str() >= "k001" && id.as_str() <= "k250");
        assert!(seen.insert(id), "duplicate key in batch_get result");
    }
}

// ---- S5: cursor round-trip ---------------------------------------------

#[derive(Clone)]
struct Event {
    user_id: String,
    seq: i64,
}

impl Model for Event {
    const TYPE_NAME: &'static str = "Event";

    fn build_descriptor() -> dynamorm_core::Result<Descriptor> {
        DescriptorBuilder::new(Self::TYPE_NAME, "events")
            .field(field("user_id", "user_id", Role::Pk))
            .field(field("seq", "seq", Role::Sk))
            .build()
    }

    fn into_attrs(self) -> BTreeMap<String, AttrValue> {
        let mut m = BTreeMap::new();
        m.insert("user_id".to_string(), AttrValue::S(self.user_id));
        m.insert("seq".to_string(), AttrValue::N(self.seq.to_string()));
        m
    }

    fn from_attrs(attrs: &BTreeMap<String, AttrValue>) -> dynamorm_core::Result<Self> {
        Ok(Event { user_id: str_attr(attrs, "user_id")?, seq: num_attr(attrs, "seq")? })
    }
}

#[tokio::test]
async fn s5_cursor_round_trip_matches_unpaginated_prefix() {
    let backend = Arc::new(MockBackend::new());
    for seq in 0..30 {
        backend.seed(
            "events",
            vec![
                ("user_id".to_string(), AttrValue::S("u1".to_string())),
                ("seq".to_string(), AttrValue::N(seq.to_string())),
            ],
            Event { user_id: "u1".into(), seq }.into_attrs(),
        );
    }
    let client = dynamorm::DynamormClient::new(backend, RuntimeConfig::default());

    let unpaginated: Vec<Event> = client
        .query::<Event>()
        .unwrap()
        .r#where("user_id", Op::Eq, vec![AttrValue::S("u1".to_string())])
        .all()
        .await
        .unwrap();
    assert_eq!(unpaginated.len(), 30);

    let (first_page, next_cursor, has_more) = client
        .query::<Event>()
        .unwrap()
        .r#where("user_id", Op::Eq, vec![AttrValue::S("u1".to_string())])
        .limit(10)
        .all_paginated()
        .await
        .unwrap();
    assert_eq!(first_page.len(), 10);
    assert!(has_more);
    let cursor = next_cursor.expect("first page must carry a cursor when more items remain");

    let (second_page, _next_cursor, _has_more) = client
        .query::<Event>()
        .unwrap()
        .r#where("user_id", Op::Eq, vec![AttrValue::S("u1".to_string())])
        .cursor(cursor)
        .limit(10)
        .all_paginated()
        .await
        .unwrap();
    assert_eq!(second_page.len(), 10);

    let combined: Vec<i64> = first_page.iter().chain(second_page.iter()).map(|e| e.seq).collect();
    let expected: Vec<i64> = unpaginated.iter().take(20).map(|e| e.seq).collect();
    assert_eq!(combined, expected);
}

// ---- S6: reserved-word attribute ----------------------------------------

#[derive(Clone)]
struct Job {
    id: String,
    status: String,
}

impl Model for Job {
    const TYPE_NAME: &'static str = "Job";

    fn build_descriptor() -> dynamorm_core::Result<Descriptor> {
        DescriptorBuilder::new(Self::TYPE_NAME, "jobs")
            .field(field("id", "id", Role::Pk))
            .field(field("status", "Status", Role::Plain))
            .build()
    }

    fn into_attrs(self) -> BTreeMap<String, AttrValue> {
        let mut m = BTreeMap::new();
        m.insert("id".to_string(), AttrValue::S(self.id));
        m.insert("Status".to_string(), AttrValue::S(self.status));
        m
    }

    fn from_attrs(attrs: &BTreeMap<String, AttrValue>) -> dynamorm_core::Result<Self> {
        Ok(Job { id: str_attr(attrs, "id")?, status: str_attr(attrs, "Status")? })
    }
}

#[tokio::test]
async fn s6_reserved_word_attribute_is_placeholder_encoded() {
    let backend = Arc::new(MockBackend::new());
    backend.seed(
        "jobs",
        vec![("id".to_string(), AttrValue::S("j1".to_string()))],
        Job { id: "j1".into(), status: "active".into() }.into_attrs(),
    );
    let client = dynamorm::DynamormClient::new(backend, RuntimeConfig::default());

    // This plans as a Scan + filter (no PK condition), exercising the same
    // expression-builder path a `KeyConditionExpression` would: the filter
    // string must never contain the literal field name, only `#n_k`
    // placeholders resolved through `ExpressionAttributeNames`.
    let mut eb = dynamorm_expr::ExpressionBuilder::new();
    eb.add_filter("status", Op::Eq, vec![AttrValue::S("active".to_string())]).unwrap();
    let components = eb.build();
    let filter = components.filter_string.expect("expected a rendered filter expression");
    assert!(!filter.contains("Status"));
    assert!(filter.contains("#n_0 = :v_0"));
    assert_eq!(components.name_placeholders.get("#n_0"), Some(&"status".to_string()));
    assert_eq!(components.value_placeholders.get(":v_0"), Some(&AttrValue::S("active".to_string())));

    let found = client
        .query::<Job>()
        .unwrap()
        .r#where("id", Op::Eq, vec![AttrValue::S("j1".to_string())])
        .filter("status", Op::Eq, vec![AttrValue::S("active".to_string())])
        .all()
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].status, "active");
}

#[tokio::test]
async fn with_retry_override_is_accepted_on_the_query_chain() {
    // Sanity check that `with_retry` composes with the rest of the chain
    // used across the scenarios above, since none of S1-S6 exercise it on
    // its own.
    let backend = Arc::new(MockBackend::new());
    backend.seed(
        "widgets",
        vec![("id".to_string(), AttrValue::S("a".to_string()))],
        Widget { id: "a".into() }.into_attrs(),
    );
    let client = dynamorm::DynamormClient::new(backend, RuntimeConfig::default());
    let found = client
        .query::<Widget>()
        .unwrap()
        .with_retry(1, Duration::from_millis(5))
        .r#where("id", Op::Eq, vec![AttrValue::S("a".to_string())])
        .first()
        .await
        .unwrap();
    assert_eq!(found.id, "a");
}
