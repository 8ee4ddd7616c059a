//! End-to-end tests through the engine facade.

use std::sync::Arc;

use graphloom::{
    AuthorizationDecl, Direction, Engine, EngineConfig, EntityType, Error, MemoryGraph,
    ParameterMatch, Permission, PropertyDef, PropertyType, QueryError, RelationshipDef, RuleDecl,
    RuleRegistry, Schema, SelectionField, Value,
};
use pretty_assertions::assert_eq;
use serde_json::json;

fn folder_schema() -> Schema {
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
                .with_authorization(
                    AuthorizationDecl::new("read").allow(
                        RuleDecl::new(ParameterMatch::NAME)
                            .with_option("property", "owner")
                            .with_option("parameter", "user"),
                    ),
                ),
        )
        .build()
        .unwrap()
}

/// `root` (alice) with children `docs` (alice) and `pics` (bob), and `other` (bob).
fn setup(config: EngineConfig) -> (Engine, Arc<MemoryGraph>) {
    let schema = folder_schema();
    let graph = Arc::new(MemoryGraph::new());
    let folder = schema.entity("Folder").unwrap();
    for (id, name, owner) in [
        ("root", "root", "alice"),
        ("docs", "docs", "alice"),
        ("pics", "pics", "bob"),
        ("other", "other", "bob"),
    ] {
        graph.insert(
            folder,
            id,
            vec![("name", Value::from(name)), ("owner", Value::from(owner))],
        )
        .unwrap();
    }
    graph.add_edge("root", "CHILD", "docs").unwrap();
    graph.add_edge("root", "CHILD", "pics").unwrap();

    let engine = Engine::new(schema, graph.clone(), RuleRegistry::with_builtin_rules(), config);
    (engine, graph)
}

fn root_with_children() -> SelectionField {
    SelectionField::new("folders")
        .with_argument("filter", json!({"id": {"eq": "root"}}))
        .select(SelectionField::new("totalCount"))
        .select(
            SelectionField::new("children")
                .with_argument("orderBy", json!({"field": "name"}))
                .select(SelectionField::new("totalCount")),
        )
}

#[tokio::test]
async fn test_serialized_page_shape() {
    let (engine, graph) = setup(EngineConfig::default());
    let request = engine.request(None);

    let page = request.query_connection("Folder", &root_with_children()).await.unwrap();
    assert_eq!(graph.statements_executed(), 1);

    let json = serde_json::to_value(&page).unwrap();
    assert_eq!(json["totalCount"], json!(1));
    assert_eq!(json["pageInfo"]["hasNextPage"], json!(false));
    let node = &json["items"][0]["node"];
    assert_eq!(node["id"], json!("root"));
    assert_eq!(node["__typename"], json!("Folder"));
    assert_eq!(node["properties"]["owner"], json!("alice"));

    let children = &node["relationships"]["children"];
    assert_eq!(children["totalCount"], json!(2));
    assert_eq!(children["items"][0]["node"]["id"], json!("docs"));
    assert_eq!(children["items"][1]["node"]["id"], json!("pics"));
}

#[tokio::test]
async fn test_permission_scopes_every_level() {
    let (engine, _graph) = setup(EngineConfig::default());
    let alice = Permission::new("read").with_parameter("user", "alice");
    let request = engine.request(Some(alice));
    assert_eq!(request.permission().map(|p| p.name.as_str()), Some("read"));

    let all = SelectionField::new("folders")
        .with_argument("orderBy", json!({"field": "name"}))
        .select(SelectionField::new("children"));
    let page = request.query_connection("Folder", &all).await.unwrap();
    assert_eq!(page.ids(), vec!["docs", "root"]);

    let root = &page.items[1].node;
    let children = root.relationship("children").and_then(|r| r.as_many()).unwrap();
    assert_eq!(children.ids(), vec!["docs"]);
}

#[tokio::test]
async fn test_lazy_load_is_cached_per_request() {
    let (engine, graph) = setup(EngineConfig::default());
    let root_only = SelectionField::new("folders")
        .with_argument("filter", json!({"id": {"eq": "root"}}));
    let children = SelectionField::new("children");

    let request = engine.request(None);
    let page = request.query_connection("Folder", &root_only).await.unwrap();
    let root = &page.items[0].node;
    assert!(root.relationship("children").is_none());

    let first = request.load_relationship(root, &children).await.unwrap();
    let second = request.load_relationship(root, &children).await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.as_many().unwrap().ids(), vec!["docs", "pics"]);
    assert_eq!(graph.statements_executed(), 2);

    let next = engine.request(None);
    let page = next.query_connection("Folder", &root_only).await.unwrap();
    next.load_relationship(&page.items[0].node, &children).await.unwrap();
    assert_eq!(graph.statements_executed(), 4);
}

#[tokio::test]
async fn test_config_budget_applies() {
    let (engine, graph) = setup(EngineConfig::new().with_max_depth(1).with_max_page_size(10));
    let request = engine.request(None);

    let too_deep = SelectionField::new("folders").select(
        SelectionField::new("children").select(SelectionField::new("children")),
    );
    let result = request.query_connection("Folder", &too_deep).await;
    assert!(matches!(
        result,
        Err(Error::Query(QueryError::BudgetExceeded(_)))
    ));

    let too_large = SelectionField::new("folders").with_argument("first", json!(11));
    let result = request.query_connection("Folder", &too_large).await;
    assert!(result.unwrap_err().as_query().is_some());
    assert_eq!(graph.statements_executed(), 0);
}
