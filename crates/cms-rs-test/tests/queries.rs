//! End-to-end tests for filtering, ordering and pagination through the
//! entity service.

use std::sync::Arc;

use cms_rs_core::{CmsError, QuerySettings};
use cms_rs_db::{EntityService, QueryParams, Record, Value};
use cms_rs_test::catalog::{self, Seeded};
use cms_rs_test::{assert_num_queries, TestDatabase};
use serde_json::json;

async fn setup() -> (TestDatabase, EntityService, Seeded) {
    let db = TestDatabase::new();
    let seeded = catalog::seed(&db).await.unwrap();
    let service = EntityService::new(Arc::new(catalog::registry()), QuerySettings::default());
    (db, service, seeded)
}

fn names(records: &[Record]) -> Vec<String> {
    records
        .iter()
        .map(|r| match r.value("name") {
            Some(Value::String(s)) => s.clone(),
            other => panic!("unexpected name {other:?}"),
        })
        .collect()
}

async fn product_names(
    db: &TestDatabase,
    service: &EntityService,
    params: QueryParams,
) -> Vec<String> {
    names(&service.find(db, catalog::PRODUCT, params).await.unwrap())
}

#[tokio::test]
async fn test_scalar_filters() {
    let (db, service, _) = setup().await;

    let found = product_names(
        &db,
        &service,
        QueryParams::new()
            .filters(json!({ "price": { "$gte": 10 } }))
            .order_by(json!("name")),
    )
    .await;
    assert_eq!(found, vec!["Big Product", "Small Product"]);

    let found = product_names(
        &db,
        &service,
        QueryParams::new().filters(json!({ "published": false })),
    )
    .await;
    assert_eq!(found, vec!["Empty Product"]);

    let found = product_names(
        &db,
        &service,
        QueryParams::new()
            .filters(json!({
                "$or": [
                    { "price": { "$lt": 5 } },
                    { "name": { "$contains": "Small" } }
                ]
            }))
            .order_by(json!({ "price": "asc" })),
    )
    .await;
    assert_eq!(found, vec!["Empty Product", "Small Product"]);

    let found = product_names(
        &db,
        &service,
        QueryParams::new()
            .filters(json!({ "$not": { "name": { "$startsWith": "Big" } } }))
            .order_by(json!("name")),
    )
    .await;
    assert_eq!(found, vec!["Empty Product", "Small Product"]);

    let found = product_names(
        &db,
        &service,
        QueryParams::new().filters(json!({ "price": { "$between": [5, 50] } })),
    )
    .await;
    assert_eq!(found, vec!["Small Product"]);
}

#[tokio::test]
async fn test_relation_filters() {
    let (db, service, seeded) = setup().await;

    let found = product_names(
        &db,
        &service,
        QueryParams::new().filters(json!({ "shops": { "name": "Shop 05" } })),
    )
    .await;
    assert_eq!(found, vec!["Big Product"]);

    // A product matched through several shops is returned once.
    let found = product_names(
        &db,
        &service,
        QueryParams::new()
            .filters(json!({ "shops": { "name": { "$startsWith": "Shop 0" } } }))
            .order_by(json!("name")),
    )
    .await;
    assert_eq!(found, vec!["Big Product", "Small Product"]);

    let found = product_names(
        &db,
        &service,
        QueryParams::new().filters(json!({ "category": seeded.categories[1] })),
    )
    .await;
    assert_eq!(found, vec!["Small Product"]);

    let found = product_names(
        &db,
        &service,
        QueryParams::new().filters(json!({ "category": { "$null": true } })),
    )
    .await;
    assert_eq!(found, vec!["Empty Product"]);

    // Two relation filters constrain the result together.
    let found = product_names(
        &db,
        &service,
        QueryParams::new().filters(json!({
            "shops": { "name": "Shop 01" },
            "categories": { "name": "Category 5" }
        })),
    )
    .await;
    assert_eq!(found, vec!["Big Product"]);
}

#[tokio::test]
async fn test_ordering() {
    let (db, service, _) = setup().await;

    let found = product_names(
        &db,
        &service,
        QueryParams::new().order_by(json!([{ "price": "desc" }])),
    )
    .await;
    assert_eq!(found, vec!["Big Product", "Small Product", "Empty Product"]);

    let found = product_names(
        &db,
        &service,
        QueryParams::new().order_by(json!({ "category": { "name": "desc" } })),
    )
    .await;
    assert_eq!(found, vec!["Small Product", "Big Product", "Empty Product"]);
}

#[tokio::test]
async fn test_find_page_and_count() {
    let (db, service, _) = setup().await;

    let page = service
        .find_page(
            &db,
            catalog::SHOP,
            QueryParams::new().order_by(json!("name")).page(3).page_size(5),
        )
        .await
        .unwrap();
    assert_eq!(names(&page.results), vec!["Shop 11", "Shop 12"]);
    assert_eq!(page.pagination.total, 12);
    assert_eq!(page.pagination.page_count, 3);
    assert_eq!(
        page.to_json()["pagination"],
        json!({ "page": 3, "pageSize": 5, "pageCount": 3, "total": 12 })
    );

    let total = service
        .count(
            &db,
            catalog::PRODUCT,
            QueryParams::new()
                .filters(json!({ "shops": { "name": { "$in": ["Shop 01", "Shop 02"] } } }))
                .page(1)
                .page_size(1),
        )
        .await
        .unwrap();
    assert_eq!(total, 2);
}

#[tokio::test]
async fn test_find_one_and_select() {
    let (db, service, _) = setup().await;

    let record = service
        .find_one(
            &db,
            catalog::PRODUCT,
            QueryParams::new()
                .select(json!(["name", "price"]))
                .order_by(json!({ "price": "desc" })),
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.to_json(), json!({ "name": "Big Product", "price": 99.5 }));

    let none = service
        .find_one(
            &db,
            catalog::PRODUCT,
            QueryParams::new().filters(json!({ "name": "Missing" })),
        )
        .await
        .unwrap();
    assert!(none.is_none());
}

#[tokio::test]
async fn test_invalid_queries_fail_before_any_sql() {
    let (db, service, _) = setup().await;

    let cases = [
        (QueryParams::new().filters(json!({ "$eq": 1 })), "InvalidFilter"),
        (QueryParams::new().filters(json!({ "$nope": 1 })), "UndefinedOperator"),
        (QueryParams::new().filters(json!({ "cover": 1 })), "UnsupportedFilterType"),
        (QueryParams::new().filters(json!({ "supplier": 1 })), "InvalidFilter"),
        (QueryParams::new().order_by(json!("unknownField")), "UnknownAttribute"),
        (QueryParams::new().order_by(json!({ "cover": "asc" })), "UnsupportedOrderType"),
        (QueryParams::new().page(1).page_size(5).limit(3), "InvalidPagination"),
    ];

    for (params, expected) in cases {
        let described = format!("{params:?}");
        assert_num_queries(&db, 0, || async {
            let err = service
                .find(&db, catalog::PRODUCT, params)
                .await
                .unwrap_err();
            assert!(format!("{err:?}").starts_with(expected), "{described}: got {err:?}");
            assert!(err.is_client_error(), "{described}: got {err:?}");
        })
        .await;
    }
}

#[tokio::test]
async fn test_filter_keys_cannot_smuggle_sql() {
    let (db, service, _) = setup().await;

    let found = product_names(
        &db,
        &service,
        QueryParams::new().filters(json!({ "name": "nope" })),
    )
    .await;
    assert!(found.is_empty());

    assert_num_queries(&db, 0, || async {
        let err = service
            .find(
                &db,
                catalog::PRODUCT,
                QueryParams::new().filters(json!({ "name\" = 'nope' OR 1=1 OR \"name": "nope" })),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CmsError::InvalidFilter(_)), "got {err:?}");
        assert!(err.is_client_error());

        let err = service
            .find(
                &db,
                catalog::PRODUCT,
                QueryParams::new().select(json!(["t0.name\" FROM products --"])),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CmsError::InvalidValue(_)), "got {err:?}");
    })
    .await;

    // Well-formed column names that are not attributes still pass through.
    let found = product_names(
        &db,
        &service,
        QueryParams::new()
            .filters(json!({ "t0.category_id": { "$null": true } })),
    )
    .await;
    assert_eq!(found, vec!["Empty Product"]);
}

#[tokio::test]
async fn test_params_from_request_json() {
    let (db, service, _) = setup().await;

    let params = QueryParams::from_json(&json!({
        "where": { "shops": { "name": "Shop 01" } },
        "orderBy": { "name": "asc" },
        "populate": { "shops": { "count": true } },
        "page": 1,
        "pageSize": 10
    }))
    .unwrap();

    let page = service.find_page(&db, catalog::PRODUCT, params).await.unwrap();
    let json = page.to_json();
    assert_eq!(json["results"][0]["name"], "Big Product");
    assert_eq!(json["results"][0]["shops"], json!({ "count": 12 }));
    assert_eq!(json["results"][1]["shops"], json!({ "count": 1 }));
    assert_eq!(json["pagination"]["total"], 2);
}
