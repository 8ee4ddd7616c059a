//! Integration tests for the query engine.

use std::collections::BTreeMap;
use std::sync::Arc;

use graphloom_core::catalog::{
    Direction, EntityType, PropertyDef, PropertyType, RelationshipDef, Schema,
};
use graphloom_core::query::{
    CacheKey, Cursor, MemoryGraph, Order, OrderKey, QueryExecutor, QueryOptions, QueryResult,
    RequestCache, SortDirection,
};
use graphloom_core::security::{
    AuthorizationConditionBuilder, AuthorizationConfig, AuthorizationDecl, ParameterMatch,
    RuleContext, RuleDecl, RuleRegistry,
};
use graphloom_core::{Error, FilterExpr};
use graphloom_proto::{Permission, SelectionField, Value};
use serde_json::json;

struct TestContext {
    schema: Arc<Schema>,
    graph: Arc<MemoryGraph>,
    executor: QueryExecutor,
}

impl TestContext {
    fn new() -> Self {
        let schema = Arc::new(fixture_schema());
        let graph = Arc::new(MemoryGraph::new());
        let rules = RuleRegistry::with_builtin_rules().with_rule("always", always);
        let executor = QueryExecutor::new(
            schema.clone(),
            graph.clone(),
            AuthorizationConditionBuilder::new(rules, AuthorizationConfig::default()),
        );
        Self {
            schema,
            graph,
            executor,
        }
    }

    fn insert(&self, entity_type: &str, id: &str, properties: Vec<(&str, Value)>) {
        let entity = self.schema.entity(entity_type).unwrap();
        self.graph.insert(entity, id, properties).unwrap();
    }

    fn link(&self, from: &str, label: &str, to: &str) {
        self.graph.add_edge(from, label, to).unwrap();
    }

    async fn connection(
        &self,
        entity_type: &str,
        field: &SelectionField,
        permission: Option<&Permission>,
    ) -> Result<QueryResult, Error> {
        let cache = RequestCache::new();
        self.executor
            .query_connection(entity_type, field, permission, &cache)
            .await
    }
}

fn always(_: &RuleContext<'_>) -> Result<FilterExpr, Error> {
    Ok(FilterExpr::all())
}

fn fixture_schema() -> Schema {
    Schema::builder()
        .with_entity(
            EntityType::new("Folder")
                .with_property(PropertyDef::new("name", PropertyType::String))
                .with_property(PropertyDef::optional("owner", PropertyType::String))
                .with_relationship(
                    RelationshipDef::many("children", "Folder", "CHILD", Direction::Outgoing)
                        .with_inverse("parent"),
                )
                .with_relationship(
                    RelationshipDef::one("parent", "Folder", "CHILD", Direction::Incoming)
                        .with_inverse("children"),
                )
                .with_relationship(
                    RelationshipDef::many("files", "File", "CONTAINS", Direction::Outgoing)
                        .with_inverse("folder"),
                )
                .with_authorization(
                    AuthorizationDecl::new("read").allow(
                        RuleDecl::new(ParameterMatch::NAME)
                            .with_option("property", "owner")
                            .with_option("parameter", "user"),
                    ),
                ),
        )
        .with_entity(
            EntityType::new("File")
                .with_property(PropertyDef::new("name", PropertyType::String))
                .with_relationship(
                    RelationshipDef::one("folder", "Folder", "CONTAINS", Direction::Incoming)
                        .with_inverse("files"),
                )
                .with_authorization(AuthorizationDecl::new("read").allow_from_related("folder")),
        )
        .with_entity(
            EntityType::new("Secret")
                .with_property(PropertyDef::new("name", PropertyType::String))
                .with_authorization(
                    AuthorizationDecl::new("read")
                        .allow(RuleDecl::new("always"))
                        .disallow(RuleDecl::new("always")),
                ),
        )
        .with_entity(
            EntityType::new("Person")
                .with_property(PropertyDef::new("name", PropertyType::String))
                .with_relationship(
                    RelationshipDef::many("pets", "Animal", "OWNS", Direction::Outgoing)
                        .with_inverse("owner"),
                ),
        )
        .with_entity(
            EntityType::new_abstract("Animal")
                .with_property(PropertyDef::new("name", PropertyType::String))
                .with_relationship(
                    RelationshipDef::one("owner", "Person", "OWNS", Direction::Incoming)
                        .with_inverse("pets"),
                ),
        )
        .with_entity(
            EntityType::new("Dog")
                .with_supertype("Animal")
                .with_relationship(RelationshipDef::many(
                    "toys",
                    "Toy",
                    "PLAYS_WITH",
                    Direction::Outgoing,
                )),
        )
        .with_entity(
            EntityType::new("Cat")
                .with_supertype("Animal")
                .with_relationship(RelationshipDef::many("toys", "Toy", "BATS", Direction::Outgoing)),
        )
        .with_entity(EntityType::new("Toy").with_property(PropertyDef::new("name", PropertyType::String)))
        .build()
        .unwrap()
}

/// Folder `a1` with children named `xa`, `xb` (twice), `xc`, `xe` and `yd`.
fn setup_folders(ctx: &TestContext) {
    ctx.insert(
        "Folder",
        "a1",
        vec![("name", Value::from("root")), ("owner", Value::from("alice"))],
    );
    for (id, name) in [
        ("b1", "xb"),
        ("c1", "xc"),
        ("d1", "yd"),
        ("e1", "xa"),
        ("f1", "xb"),
        ("g1", "xe"),
    ] {
        ctx.insert("Folder", id, vec![("name", Value::from(name))]);
        ctx.link("a1", "CHILD", id);
    }
}

fn children_of_a1(arguments: serde_json::Value) -> SelectionField {
    let mut children = SelectionField::new("children");
    if let serde_json::Value::Object(map) = arguments {
        for (name, value) in map {
            children = children.with_argument(name, value);
        }
    }
    SelectionField::new("folders")
        .with_argument("filter", json!({"id": {"eq": "a1"}}))
        .select(children.select(SelectionField::new("totalCount")))
}

fn nested_children(page: &QueryResult) -> &QueryResult {
    page.items[0]
        .node
        .relationship("children")
        .and_then(|result| result.as_many())
        .unwrap()
}

/// Walk every page forwards with `first`, then backwards with `last`.
async fn walk_pages(
    ctx: &TestContext,
    entity_type: &str,
    base: impl Fn() -> SelectionField,
    size: u64,
) -> (Vec<String>, Vec<String>) {
    let mut forwards = Vec::new();
    let mut after: Option<String> = None;
    loop {
        let mut field = base().with_argument("first", json!(size));
        if let Some(cursor) = &after {
            field = field.with_argument("after", json!(cursor));
        }
        let page = ctx.connection(entity_type, &field, None).await.unwrap();
        forwards.extend(page.ids().into_iter().map(str::to_string));
        if !page.page_info.has_next_page {
            break;
        }
        after = page.page_info.end_cursor.clone();
    }

    let mut backwards: Vec<String> = Vec::new();
    let mut before: Option<String> = None;
    loop {
        let mut field = base().with_argument("last", json!(size));
        if let Some(cursor) = &before {
            field = field.with_argument("before", json!(cursor));
        }
        let page = ctx.connection(entity_type, &field, None).await.unwrap();
        let mut ids: Vec<String> = page.ids().into_iter().map(str::to_string).collect();
        ids.extend(backwards);
        backwards = ids;
        if !page.page_info.has_previous_page {
            break;
        }
        before = page.page_info.start_cursor.clone();
    }
    (forwards, backwards)
}

/// Folders `o1`..`o5`; `o2` and `o4` have no owner.
fn setup_owners(ctx: &TestContext) {
    for (id, owner) in [
        ("o1", Some("alice")),
        ("o2", None),
        ("o3", Some("bob")),
        ("o4", None),
        ("o5", Some("alice")),
    ] {
        let mut properties = vec![("name", Value::from(id))];
        if let Some(owner) = owner {
            properties.push(("owner", Value::from(owner)));
        }
        ctx.insert("Folder", id, properties);
    }
}

// ============== Tests ==============

#[tokio::test]
async fn test_nested_children_first_page_and_continuation() {
    let ctx = TestContext::new();
    setup_folders(&ctx);

    let arguments = json!({
        "filter": {"name": {"startsWith": "x"}},
        "orderBy": {"field": "name"},
        "first": 2
    });
    let page = ctx.connection("Folder", &children_of_a1(arguments), None).await.unwrap();
    assert_eq!(ctx.graph.statements_executed(), 1);

    let children = nested_children(&page);
    assert_eq!(children.ids(), vec!["e1", "b1"]);
    assert_eq!(children.total_count, Some(5));
    assert!(children.page_info.has_next_page);
    assert!(!children.page_info.has_previous_page);

    let after = children.items[1].cursor.clone();
    let arguments = json!({
        "filter": {"name": {"startsWith": "x"}},
        "orderBy": {"field": "name"},
        "first": 2,
        "after": after
    });
    let page = ctx.connection("Folder", &children_of_a1(arguments), None).await.unwrap();
    let children = nested_children(&page);
    assert_eq!(children.ids(), vec!["f1", "c1"]);
    assert!(children.page_info.has_next_page);
    assert!(children.page_info.has_previous_page);

    let after = children.items[1].cursor.clone();
    let arguments = json!({
        "filter": {"name": {"startsWith": "x"}},
        "orderBy": {"field": "name"},
        "first": 2,
        "after": after
    });
    let page = ctx.connection("Folder", &children_of_a1(arguments), None).await.unwrap();
    let children = nested_children(&page);
    assert_eq!(children.ids(), vec!["g1"]);
    assert!(!children.page_info.has_next_page);
}

#[tokio::test]
async fn test_forward_and_backward_pages_stitch() {
    let ctx = TestContext::new();
    setup_folders(&ctx);

    let base = || {
        SelectionField::new("folders")
            .with_argument("filter", json!({"name": {"startsWith": "x"}}))
            .with_argument("orderBy", json!({"field": "name", "direction": "DESC"}))
    };
    let (forwards, backwards) = walk_pages(&ctx, "Folder", base, 2).await;

    assert_eq!(forwards, vec!["g1", "c1", "f1", "b1", "e1"]);
    assert_eq!(backwards, forwards);
}

#[tokio::test]
async fn test_disallow_overrides_allow() {
    let ctx = TestContext::new();
    ctx.insert("Secret", "s1", vec![("name", Value::from("a"))]);
    ctx.insert("Secret", "s2", vec![("name", Value::from("b"))]);

    let permission = Permission::new("read");
    let page = ctx
        .connection("Secret", &SelectionField::new("secrets"), Some(&permission))
        .await
        .unwrap();
    assert!(page.is_empty());

    let page = ctx
        .connection("Secret", &SelectionField::new("secrets"), None)
        .await
        .unwrap();
    assert_eq!(page.len(), 2);
}

#[tokio::test]
async fn test_allow_from_related_folder() {
    let ctx = TestContext::new();
    ctx.insert(
        "Folder",
        "fa",
        vec![("name", Value::from("a")), ("owner", Value::from("alice"))],
    );
    ctx.insert(
        "Folder",
        "fb",
        vec![("name", Value::from("b")), ("owner", Value::from("bob"))],
    );
    for (file, folder) in [("f1", "fa"), ("f2", "fb"), ("f3", "fa")] {
        ctx.insert("File", file, vec![("name", Value::from(file))]);
        ctx.link(folder, "CONTAINS", file);
    }

    let alice = Permission::new("read").with_parameter("user", "alice");
    let files = SelectionField::new("files").select(SelectionField::new("folder"));
    let page = ctx.connection("File", &files, Some(&alice)).await.unwrap();

    assert_eq!(page.ids(), vec!["f1", "f3"]);
    let folder = page.items[0].node.relationship("folder").and_then(|r| r.as_one()).unwrap();
    assert_eq!(folder.id, "fa");
}

#[tokio::test]
async fn test_polymorphic_sub_query() {
    let ctx = TestContext::new();
    ctx.insert("Person", "p1", vec![("name", Value::from("Pat"))]);
    ctx.insert("Dog", "dog1", vec![("name", Value::from("Rex"))]);
    ctx.insert("Cat", "cat1", vec![("name", Value::from("Tom"))]);
    ctx.insert("Toy", "toy1", vec![("name", Value::from("ball"))]);
    ctx.link("p1", "OWNS", "dog1");
    ctx.link("p1", "OWNS", "cat1");
    ctx.link("dog1", "PLAYS_WITH", "toy1");

    let people = SelectionField::new("people").select(
        SelectionField::new("pets")
            .select(SelectionField::new("totalCount"))
            .select(SelectionField::new("toys").on_type("Dog")),
    );
    let page = ctx.connection("Person", &people, None).await.unwrap();
    assert_eq!(ctx.graph.statements_executed(), 1);

    let pets = page.items[0].node.relationship("pets").and_then(|r| r.as_many()).unwrap();
    assert_eq!(pets.total_count, Some(2));
    let by_id: BTreeMap<&str, _> = pets.nodes().map(|node| (node.id.as_str(), node)).collect();

    let dog = by_id["dog1"];
    assert_eq!(dog.type_name, "Dog");
    let toys = dog.relationship("toys").and_then(|r| r.as_many()).unwrap();
    assert_eq!(toys.ids(), vec!["toy1"]);

    let cat = by_id["cat1"];
    assert_eq!(cat.type_name, "Cat");
    assert!(cat.relationship("toys").is_none());
}

#[tokio::test]
async fn test_fragments_resolve_to_their_own_relationship() {
    let ctx = TestContext::new();
    ctx.insert("Person", "p1", vec![("name", Value::from("Pat"))]);
    ctx.insert("Dog", "dog1", vec![("name", Value::from("Rex"))]);
    ctx.insert("Cat", "cat1", vec![("name", Value::from("Tom"))]);
    for (id, name) in [("toy1", "ball"), ("toy2", "bone"), ("toy3", "yarn")] {
        ctx.insert("Toy", id, vec![("name", Value::from(name))]);
    }
    ctx.link("p1", "OWNS", "dog1");
    ctx.link("p1", "OWNS", "cat1");
    ctx.link("dog1", "PLAYS_WITH", "toy1");
    ctx.link("dog1", "PLAYS_WITH", "toy2");
    ctx.link("cat1", "BATS", "toy3");
    ctx.link("cat1", "PLAYS_WITH", "toy1");

    let people = SelectionField::new("people").select(
        SelectionField::new("pets")
            .select(
                SelectionField::new("toys")
                    .on_type("Dog")
                    .with_argument("first", json!(1))
                    .select(SelectionField::new("totalCount")),
            )
            .select(
                SelectionField::new("toys")
                    .on_type("Cat")
                    .select(SelectionField::new("totalCount")),
            ),
    );
    let page = ctx.connection("Person", &people, None).await.unwrap();
    assert_eq!(ctx.graph.statements_executed(), 1);

    let pets = page.items[0].node.relationship("pets").and_then(|r| r.as_many()).unwrap();
    let by_id: BTreeMap<&str, _> = pets.nodes().map(|node| (node.id.as_str(), node)).collect();

    let dog_toys = by_id["dog1"].relationship("toys").and_then(|r| r.as_many()).unwrap();
    assert_eq!(dog_toys.ids(), vec!["toy1"]);
    assert_eq!(dog_toys.total_count, Some(2));
    assert!(dog_toys.page_info.has_next_page);

    let cat_toys = by_id["cat1"].relationship("toys").and_then(|r| r.as_many()).unwrap();
    assert_eq!(cat_toys.ids(), vec!["toy3"]);
    assert_eq!(cat_toys.total_count, Some(1));
    assert!(!cat_toys.page_info.has_next_page);
}

#[tokio::test]
async fn test_paging_over_related_key() {
    let ctx = TestContext::new();
    ctx.insert("Folder", "fa", vec![("name", Value::from("a"))]);
    ctx.insert("Folder", "fb", vec![("name", Value::from("b"))]);
    for (file, folder) in [
        ("f1", Some("fb")),
        ("f2", Some("fa")),
        ("f3", Some("fb")),
        ("f4", Some("fa")),
        ("f5", None),
    ] {
        ctx.insert("File", file, vec![("name", Value::from(file))]);
        if let Some(folder) = folder {
            ctx.link(folder, "CONTAINS", file);
        }
    }

    let base = || {
        SelectionField::new("files").with_argument("orderBy", json!({"field": "folder.name"}))
    };
    let (forwards, backwards) = walk_pages(&ctx, "File", base, 2).await;

    // a file without a folder sorts last
    assert_eq!(forwards, vec!["f2", "f4", "f1", "f3", "f5"]);
    assert_eq!(backwards, forwards);

    let first = ctx
        .connection("File", &base().with_argument("first", json!(2)), None)
        .await
        .unwrap();
    let after = first.page_info.end_cursor.clone().unwrap();
    let keys = Cursor::decode(
        &Order::new(vec![OrderKey::related(
            ctx.schema.entity("File").unwrap().relationship("folder").unwrap().clone(),
            "name",
            SortDirection::Asc,
        )]),
        &after,
    )
    .unwrap();
    assert_eq!(keys["folder.name"], Value::from("a"));
    assert_eq!(keys["id"], Value::from("f4"));
}

#[tokio::test]
async fn test_paging_over_nullable_key() {
    let ctx = TestContext::new();
    setup_owners(&ctx);

    let ascending = || {
        SelectionField::new("folders").with_argument("orderBy", json!({"field": "owner"}))
    };
    let (forwards, backwards) = walk_pages(&ctx, "Folder", ascending, 2).await;
    assert_eq!(forwards, vec!["o1", "o5", "o3", "o2", "o4"]);
    assert_eq!(backwards, forwards);

    let descending = || {
        SelectionField::new("folders")
            .with_argument("orderBy", json!({"field": "owner", "direction": "DESC"}))
    };
    let (forwards, backwards) = walk_pages(&ctx, "Folder", descending, 2).await;
    assert_eq!(forwards, vec!["o4", "o2", "o3", "o5", "o1"]);
    assert_eq!(backwards, forwards);

    // the second ascending page ends on a null key
    let first = ctx
        .connection("Folder", &ascending().with_argument("first", json!(2)), None)
        .await
        .unwrap();
    let second = ctx
        .connection(
            "Folder",
            &ascending()
                .with_argument("first", json!(2))
                .with_argument("after", json!(first.page_info.end_cursor)),
            None,
        )
        .await
        .unwrap();
    assert_eq!(second.ids(), vec!["o3", "o2"]);
    assert!(second.page_info.has_next_page);
}

#[tokio::test]
async fn test_negated_filter_skips_missing_property() {
    let ctx = TestContext::new();
    setup_owners(&ctx);

    let not_bob = SelectionField::new("folders")
        .with_argument("filter", json!({"not": {"owner": {"eq": "bob"}}}));
    let page = ctx.connection("Folder", &not_bob, None).await.unwrap();
    assert_eq!(page.ids(), vec!["o1", "o5"]);

    let unowned = SelectionField::new("folders")
        .with_argument("filter", json!({"owner": {"eq": null}}));
    let page = ctx.connection("Folder", &unowned, None).await.unwrap();
    assert_eq!(page.ids(), vec!["o2", "o4"]);
}

#[tokio::test]
async fn test_reentrant_relationship_load_rejected() {
    let ctx = TestContext::new();
    setup_folders(&ctx);
    let cache = RequestCache::new();

    let page = ctx
        .executor
        .query("Folder", &[], QueryOptions::default(), None, &cache)
        .await
        .unwrap();
    let root = page.nodes().find(|node| node.id == "a1").unwrap();
    let children = SelectionField::new("children");

    let plan = ctx
        .executor
        .planner()
        .plan_relationship("Folder", &Value::from("a1"), &children, None)
        .unwrap();
    let key = CacheKey::for_query(&plan.anchor.as_ref().unwrap().relationship, &plan);
    assert_eq!(key.relationship, "Folder.children");

    let result = root
        .cache()
        .get_or_compute(key, || async {
            let inner = ctx.executor.load_relationship(root, &children, None, &cache).await?;
            Ok::<_, Error>((*inner).clone())
        })
        .await;
    assert!(matches!(result, Err(Error::ReentrantComputation(_))));

    // the failed computation released its slot
    let loaded = ctx
        .executor
        .load_relationship(root, &children, None, &cache)
        .await
        .unwrap();
    assert_eq!(loaded.as_many().map(|page| page.len()), Some(6));
}

#[tokio::test]
async fn test_filter_identity() {
    let ctx = TestContext::new();
    setup_folders(&ctx);

    let all = ctx
        .connection("Folder", &SelectionField::new("folders"), None)
        .await
        .unwrap();
    let empty = ctx
        .connection(
            "Folder",
            &SelectionField::new("folders").with_argument("filter", json!({})),
            None,
        )
        .await
        .unwrap();
    assert_eq!(all.len(), 7);
    assert_eq!(empty.ids(), all.ids());

    let single = ctx
        .connection(
            "Folder",
            &SelectionField::new("folders")
                .with_argument("filter", json!({"and": [{"name": {"startsWith": "x"}}]})),
            None,
        )
        .await
        .unwrap();
    let bare = ctx
        .connection(
            "Folder",
            &SelectionField::new("folders")
                .with_argument("filter", json!({"name": {"startsWith": "x"}})),
            None,
        )
        .await
        .unwrap();
    assert_eq!(single.ids(), bare.ids());
    assert_eq!(bare.len(), 5);
}

#[tokio::test]
async fn test_invalid_arguments_surface() {
    let ctx = TestContext::new();
    setup_folders(&ctx);

    let conflicting = SelectionField::new("folders")
        .with_argument("first", json!(3))
        .with_argument("last", json!(2));
    assert!(matches!(
        ctx.connection("Folder", &conflicting, None).await,
        Err(Error::InvalidQueryOptions(_))
    ));

    let negative = SelectionField::new("folders").with_argument("first", json!(-1));
    assert!(matches!(
        ctx.connection("Folder", &negative, None).await,
        Err(Error::InvalidQueryOptions(_))
    ));

    let garbage = SelectionField::new("folders").with_argument("after", json!("not a cursor"));
    assert!(matches!(
        ctx.connection("Folder", &garbage, None).await,
        Err(Error::InvalidCursor(_))
    ));

    let huge = SelectionField::new("folders").with_argument("first", json!(5000));
    assert!(matches!(
        ctx.connection("Folder", &huge, None).await,
        Err(Error::BudgetExceeded(_))
    ));

    let malformed = SelectionField::new("folders").with_argument("filter", json!({"size": {"eq": 1}}));
    assert!(matches!(
        ctx.connection("Folder", &malformed, None).await,
        Err(Error::MalformedFilter(_))
    ));
    assert_eq!(ctx.graph.statements_executed(), 0);
}

#[test]
fn test_cursor_round_trip_and_rejection() {
    let by_name = Order::new(vec![OrderKey::property("name", SortDirection::Asc)]);
    let observed = BTreeMap::from([
        ("name".to_string(), Value::from("xb")),
        ("id".to_string(), Value::from("b1")),
    ]);

    let cursor = Cursor::encode(&by_name, &observed).unwrap();
    assert_eq!(Cursor::encode(&by_name, &observed).unwrap(), cursor);
    assert_eq!(Cursor::decode(&by_name, &cursor).unwrap(), observed);

    assert!(matches!(
        Cursor::decode(&Order::default(), &cursor),
        Err(Error::InvalidCursor(_))
    ));
}
