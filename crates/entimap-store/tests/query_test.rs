// Integration tests for the query engine over the catalog fixture

mod common;

use common::{create_product, setup, text, Fixture};
use entimap_core::{ExErrorKind, Value};
use entimap_store::{QueryObjects, QueryResult, QueryVars};
use serde_json::json;

fn vars(value: serde_json::Value) -> QueryVars {
    QueryVars::from_json(value).unwrap()
}

fn sorted_names(result: &QueryResult) -> Vec<String> {
    let mut names: Vec<String> = result
        .entities()
        .unwrap()
        .iter()
        .map(|e| text(e, "name"))
        .collect();
    names.sort();
    names
}

fn ordered_names(result: &QueryResult) -> Vec<String> {
    result
        .entities()
        .unwrap()
        .iter()
        .map(|e| text(e, "name"))
        .collect()
}

fn mugs_and_pens(fixture: &Fixture) {
    for (name, stock, color, price) in [
        ("Red Mug", 4, "red", 8.0),
        ("Red Pen", 40, "red", 1.5),
        ("Blue Mug", 9, "blue", 12.0),
    ] {
        create_product(
            fixture,
            &[
                ("name", Value::from(name)),
                ("stock", Value::Int(stock)),
                ("color", Value::from(color)),
                ("price", Value::Float(price)),
            ],
        );
    }
}

#[test]
fn test_search_includes_and_excludes() {
    // Given: Two red products and a blue one
    let fixture = setup();
    mugs_and_pens(&fixture);

    // When: Searching for "red"
    let red = fixture.registry.query("product", &vars(json!({ "s": "red" }))).unwrap();

    // Then: Both red products match
    assert_eq!(sorted_names(&red), vec!["Red Mug", "Red Pen"]);

    // When: Excluding "red"
    let not_red = fixture.registry.query("product", &vars(json!({ "s": "-red" }))).unwrap();

    // Then: Only the blue mug is left
    assert_eq!(sorted_names(&not_red), vec!["Blue Mug"]);
}

#[test]
fn test_multi_term_search_ranks_whole_phrase_first() {
    let fixture = setup();
    mugs_and_pens(&fixture);
    create_product(
        &fixture,
        &[
            ("name", Value::from("Mug Rack")),
            ("summary", Value::from("Fits a red mug")),
        ],
    );

    let result = fixture
        .registry
        .query("product", &vars(json!({ "s": "red mug" })))
        .unwrap();

    // "Red Mug" holds the whole phrase in the first searchable column
    assert_eq!(ordered_names(&result)[0], "Red Mug");
    assert_eq!(result.len(), 2);
}

#[test]
fn test_count_without_pagination_runs_no_count_query() {
    let fixture = setup();
    mugs_and_pens(&fixture);
    fixture.db.clear();

    let result = fixture
        .registry
        .query("product", &vars(json!({ "count": true, "cache_results": false })))
        .unwrap();

    assert_eq!(result.total().unwrap(), 3);
    assert_eq!(result.pages().unwrap(), 1);
    assert!(fixture
        .db
        .statements()
        .iter()
        .all(|sql| !sql.contains("COUNT(*)")));
}

#[test]
fn test_pages_concatenate_to_unpaginated_set() {
    // Given: Seven products
    let fixture = setup();
    for i in 0..7 {
        create_product(
            &fixture,
            &[("name", Value::from(format!("Item {}", i))), ("stock", Value::Int(i % 3))],
        );
    }
    let base = json!({ "fields": "ids", "orderby": "stock", "order": "ASC" });

    // When: Fetching everything at once
    let all = fixture.registry.query("product", &vars(base.clone())).unwrap();

    // And: Fetching it three at a time
    let mut paged = Vec::new();
    let mut pages = 0;
    for page in 1..=3 {
        let mut v = vars(base.clone());
        v.set("per_page", 3);
        v.set("page", page);
        let result = fixture.registry.query("product", &v).unwrap();
        assert_eq!(result.total().unwrap(), 7);
        pages = result.pages().unwrap();
        paged.extend(result.ids());
    }

    // Then: The pages add up to the whole, in the same order
    assert_eq!(pages, 3);
    assert_eq!(paged, all.ids());
    assert_eq!(all.total().unwrap(), 7);
}

#[test]
fn test_offset_without_per_page() {
    let fixture = setup();
    mugs_and_pens(&fixture);

    let result = fixture
        .registry
        .query("product", &vars(json!({ "offset": 1, "order": "ASC", "fields": "ids" })))
        .unwrap();

    assert_eq!(result.ids(), vec![2, 3]);
    assert_eq!(result.total().unwrap(), 3);
}

#[test]
fn test_taxonomy_filters() {
    // Given: Products tagged kitchen, sale or both
    let fixture = setup();
    let kitchen = fixture.terms.insert_term("Kitchen", "", "product_tag").unwrap();
    let sale = fixture.terms.insert_term("Sale", "", "product_tag").unwrap();
    for (name, tags) in [
        ("Mug", vec![kitchen, sale]),
        ("Plate", vec![kitchen]),
        ("Pen", vec![sale]),
        ("Lamp", vec![]),
    ] {
        create_product(
            &fixture,
            &[
                ("name", Value::from(name)),
                ("tags", Value::List(tags.into_iter().map(Value::Int).collect())),
            ],
        );
    }
    let query = |v: serde_json::Value| sorted_names(&fixture.registry.query("product", &vars(v)).unwrap());

    // Then: Slugs select by membership
    assert_eq!(query(json!({ "tags": "kitchen" })), vec!["Mug", "Plate"]);
    assert_eq!(query(json!({ "tags__in": "kitchen sale" })), vec!["Mug", "Pen", "Plate"]);
    assert_eq!(query(json!({ "tags__and": "kitchen,sale" })), vec!["Mug"]);
    assert_eq!(query(json!({ "tags__not_in": ["sale"] })), vec!["Lamp", "Plate"]);

    // And: tax_query supports existence checks
    assert_eq!(
        query(json!({ "tax_query": [{ "taxonomy": "product_tag", "operator": "NOT EXISTS" }] })),
        vec!["Lamp"]
    );
}

#[test]
fn test_meta_query_and_meta_ordering() {
    let fixture = setup();
    mugs_and_pens(&fixture);

    // Numeric comparison on a raw meta key
    let cheap = fixture
        .registry
        .query(
            "product",
            &vars(json!({
                "meta_query": [{ "key": "_price", "value": 10, "compare": "<", "type": "DECIMAL" }],
            })),
        )
        .unwrap();
    assert_eq!(sorted_names(&cheap), vec!["Red Mug", "Red Pen"]);

    // A named clause drives the ordering
    let by_price = fixture
        .registry
        .query(
            "product",
            &vars(json!({
                "meta_query": {
                    "relation": "OR",
                    "priced": { "key": "_price", "compare": "EXISTS", "type": "DECIMAL" },
                },
                "orderby": { "priced": "ASC" },
            })),
        )
        .unwrap();
    assert_eq!(ordered_names(&by_price), vec!["Red Pen", "Red Mug", "Blue Mug"]);

    // Meta props filter and order by name
    let red_by_price = fixture
        .registry
        .query(
            "product",
            &vars(json!({ "color": "red", "orderby": "price", "order": "DESC" })),
        )
        .unwrap();
    assert_eq!(ordered_names(&red_by_price), vec!["Red Mug", "Red Pen"]);
}

#[test]
fn test_meta_value_num_orders_by_primary_clause() {
    let fixture = setup();
    mugs_and_pens(&fixture);

    let result = fixture
        .registry
        .query(
            "product",
            &vars(json!({ "meta_key": "_price", "orderby": "meta_value_num", "order": "DESC" })),
        )
        .unwrap();

    assert_eq!(ordered_names(&result), vec!["Blue Mug", "Red Mug", "Red Pen"]);
}

#[test]
fn test_column_filters_and_include_order() {
    let fixture = setup();
    mugs_and_pens(&fixture);
    let query = |v: serde_json::Value| fixture.registry.query("product", &vars(v)).unwrap();

    assert_eq!(sorted_names(&query(json!({ "stock__gte": 9 }))), vec!["Blue Mug", "Red Pen"]);
    assert_eq!(sorted_names(&query(json!({ "name__like": "mug" }))), vec!["Blue Mug", "Red Mug"]);
    assert_eq!(sorted_names(&query(json!({ "exclude": [1, 2] }))), vec!["Blue Mug"]);
    assert_eq!(
        query(json!({ "include": "3,1", "orderby": "include", "fields": "ids" })).ids(),
        vec![3, 1]
    );
}

#[test]
fn test_date_filters() {
    let fixture = setup();
    for (name, released) in [("Old", "2023-06-01"), ("New", "2024-06-01"), ("Newer", "2024-12-24 18:00:00")] {
        create_product(
            &fixture,
            &[("name", Value::from(name)), ("released", Value::from(released))],
        );
    }
    let query = |v: serde_json::Value| sorted_names(&fixture.registry.query("product", &vars(v)).unwrap());

    assert_eq!(query(json!({ "released__after": "2024-01-01" })), vec!["New", "Newer"]);
    assert_eq!(
        query(json!({ "date_query": [{ "before": "2024-12-24", "inclusive": true, "after": "2024-01-01" }] })),
        vec!["New", "Newer"]
    );
    assert_eq!(query(json!({ "date_query": [{ "year": 2023 }] })), vec!["Old"]);
}

#[test]
fn test_result_cache_hit_and_invalidation() {
    // Given: A query that has run once
    let fixture = setup();
    mugs_and_pens(&fixture);
    let q = vars(json!({ "s": "mug" }));
    let first = fixture.registry.query("product", &q).unwrap();
    assert!(!first.from_cache());

    // When: It runs again unchanged
    let second = fixture.registry.query("product", &q).unwrap();

    // Then: It is served from cache with the same result
    assert!(second.from_cache());
    assert_eq!(second.ids(), first.ids());

    // When: A matching product is written
    create_product(&fixture, &[("name", Value::from("Green Mug"))]);

    // Then: The cached result is no longer used
    let third = fixture.registry.query("product", &q).unwrap();
    assert!(!third.from_cache());
    assert_eq!(third.len(), 3);
}

#[test]
fn test_partial_rows_and_bad_input() {
    let fixture = setup();
    mugs_and_pens(&fixture);

    let rows = fixture
        .registry
        .query("product", &vars(json!({ "fields": "name stock", "order": "ASC" })))
        .unwrap();
    let QueryObjects::Rows(rows) = rows.objects() else {
        panic!("expected rows");
    };
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0].len(), 3);

    let err = fixture
        .registry
        .query("product", &vars(json!({ "status": "archived" })))
        .unwrap_err();
    assert_eq!(err.kind(), ExErrorKind::InvalidInput);

    let err = fixture.registry.query("widget", &QueryVars::new()).unwrap_err();
    assert_eq!(err.kind(), ExErrorKind::SchemaInvalid);
}
