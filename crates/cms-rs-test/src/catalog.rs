//! A small sample catalog for exercising relations end to end.
//!
//! Every relation kind appears over both kinds of linkage:
//!
//! | model    | field        | kind         | linkage                        |
//! |----------|--------------|--------------|--------------------------------|
//! | product  | `category`   | many-to-one  | `category_id` column           |
//! | product  | `shops`      | one-to-many  | `products_shops_links`         |
//! | product  | `categories` | one-to-many  | `products_categories_links`    |
//! | product  | `related`    | one-to-many  | products sharing `category_id` |
//! | product  | `supplier`   | many-to-one  | none                           |
//! | shop     | `products`   | many-to-many | `products_shops_links`         |
//! | category | `products`   | one-to-many  | `products.category_id`         |
//! | category | `product`    | many-to-one  | `products_categories_links`    |
//! | category | `featured`   | one-to-one   | `featured_product_id` column   |
//!
//! The seed shares `Shop 01` and `Category 2` between two products, so the
//! inverse sides see several rows per parent.

use cms_rs_core::CmsResult;
use cms_rs_db::{
    Attribute, DbExecutor, JoinColumn, JoinTable, MetadataRegistry, ModelMetadata,
    RelationAttribute, RelationKind, ScalarAttribute, ScalarType, Value,
};

use crate::test_database::TestDatabase;

/// Product model uid.
pub const PRODUCT: &str = "api::product.product";
/// Shop model uid.
pub const SHOP: &str = "api::shop.shop";
/// Category model uid.
pub const CATEGORY: &str = "api::category.category";

/// Builds the catalog registry.
pub fn registry() -> MetadataRegistry {
    let mut registry = MetadataRegistry::new();
    registry.register(
        ModelMetadata::new(CATEGORY, "categories")
            .attribute("name", ScalarAttribute::new(ScalarType::String).required())
            .attribute(
                "products",
                RelationAttribute::new(RelationKind::OneToMany, PRODUCT)
                    .join_column(JoinColumn::new("id", "category_id")),
            )
            .attribute(
                "product",
                RelationAttribute::new(RelationKind::ManyToOne, PRODUCT).join_table(
                    JoinTable::new(
                        "products_categories_links",
                        JoinColumn::new("category_id", "id"),
                        JoinColumn::new("product_id", "id"),
                    ),
                ),
            )
            .attribute(
                "featured",
                RelationAttribute::new(RelationKind::OneToOne, PRODUCT)
                    .join_column(JoinColumn::new("featured_product_id", "id"))
                    .owner(),
            ),
    );
    registry.register(
        ModelMetadata::new(SHOP, "shops")
            .attribute("name", ScalarAttribute::new(ScalarType::String).required())
            .attribute(
                "products",
                RelationAttribute::new(RelationKind::ManyToMany, PRODUCT).join_table(
                    JoinTable::new(
                        "products_shops_links",
                        JoinColumn::new("shop_id", "id"),
                        JoinColumn::new("product_id", "id"),
                    ),
                ),
            ),
    );
    registry.register(
        ModelMetadata::new(PRODUCT, "products")
            .attribute("name", ScalarAttribute::new(ScalarType::String).required())
            .attribute("price", Attribute::scalar(ScalarType::Decimal))
            .attribute("published", Attribute::scalar(ScalarType::Boolean))
            .attribute("cover", Attribute::Media { multiple: false })
            .attribute(
                "category",
                RelationAttribute::new(RelationKind::ManyToOne, CATEGORY)
                    .join_column(JoinColumn::new("category_id", "id"))
                    .owner(),
            )
            .attribute(
                "shops",
                RelationAttribute::new(RelationKind::OneToMany, SHOP)
                    .join_table(JoinTable::new(
                        "products_shops_links",
                        JoinColumn::new("product_id", "id"),
                        JoinColumn::new("shop_id", "id"),
                    ))
                    .owner(),
            )
            .attribute(
                "categories",
                RelationAttribute::new(RelationKind::OneToMany, CATEGORY)
                    .join_table(JoinTable::new(
                        "products_categories_links",
                        JoinColumn::new("product_id", "id"),
                        JoinColumn::new("category_id", "id"),
                    ))
                    .owner(),
            )
            .attribute(
                "related",
                RelationAttribute::new(RelationKind::OneToMany, PRODUCT)
                    .join_column(JoinColumn::new("category_id", "category_id")),
            )
            .attribute("supplier", RelationAttribute::new(RelationKind::ManyToOne, SHOP)),
    );
    registry
}

/// Ids of the seeded rows, in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Seeded {
    /// `Category 1` to `Category 5`.
    pub categories: Vec<i64>,
    /// `Shop 01` to `Shop 12`.
    pub shops: Vec<i64>,
    /// `Big Product`, `Small Product` and `Empty Product`.
    pub products: Vec<i64>,
}

impl Seeded {
    /// The product linked to every shop and every category.
    pub fn big(&self) -> i64 {
        self.products[0]
    }

    /// The product linked to one shop and one category.
    pub fn small(&self) -> i64 {
        self.products[1]
    }

    /// The product without any link.
    pub fn empty(&self) -> i64 {
        self.products[2]
    }
}

/// Creates the catalog schema and seeds it, then resets the query counter.
///
/// - `Big Product` (price 99.5, published) has main category `Category 1`,
///   all 12 shops and all 5 categories;
/// - `Small Product` (price 10, published) has main category `Category 2`,
///   `Shop 01` and `Category 2`;
/// - `Empty Product` (price 1, unpublished) has no category and no links;
/// - `Category 1` features `Big Product`.
///
/// # Errors
///
/// Returns an error if a statement fails.
pub async fn seed(db: &TestDatabase) -> CmsResult<Seeded> {
    db.setup_schema(&registry()).await?;

    let mut seeded = Seeded::default();
    for n in 1..=5 {
        let id = db
            .insert("categories", &[("name", Value::from(format!("Category {n}")))])
            .await?;
        seeded.categories.push(id);
    }
    for n in 1..=12 {
        let id = db
            .insert("shops", &[("name", Value::from(format!("Shop {n:02}")))])
            .await?;
        seeded.shops.push(id);
    }

    let products = [
        ("Big Product", 99.5, true, Some(seeded.categories[0])),
        ("Small Product", 10.0, true, Some(seeded.categories[1])),
        ("Empty Product", 1.0, false, None),
    ];
    for (name, price, published, category) in products {
        let id = db
            .insert(
                "products",
                &[
                    ("name", Value::from(name)),
                    ("price", Value::from(price)),
                    ("published", Value::from(published)),
                    ("category_id", category.map_or(Value::Null, Value::from)),
                ],
            )
            .await?;
        seeded.products.push(id);
    }

    for &shop in &seeded.shops {
        link(db, "products_shops_links", ("product_id", seeded.big()), ("shop_id", shop)).await?;
    }
    for &category in &seeded.categories {
        link(
            db,
            "products_categories_links",
            ("product_id", seeded.big()),
            ("category_id", category),
        )
        .await?;
    }
    link(
        db,
        "products_shops_links",
        ("product_id", seeded.small()),
        ("shop_id", seeded.shops[0]),
    )
    .await?;
    link(
        db,
        "products_categories_links",
        ("product_id", seeded.small()),
        ("category_id", seeded.categories[1]),
    )
    .await?;
    db.execute_sql(
        "UPDATE \"categories\" SET \"featured_product_id\" = ? WHERE \"id\" = ?",
        &[Value::from(seeded.big()), Value::from(seeded.categories[0])],
    )
    .await?;

    tracing::debug!(
        products = seeded.products.len(),
        shops = seeded.shops.len(),
        categories = seeded.categories.len(),
        "seeded catalog"
    );
    db.reset_query_count();
    Ok(seeded)
}

async fn link(
    db: &TestDatabase,
    table: &str,
    (source_column, source): (&str, i64),
    (target_column, target): (&str, i64),
) -> CmsResult<()> {
    db.insert(
        table,
        &[(source_column, Value::from(source)), (target_column, Value::from(target))],
    )
    .await?;
    Ok(())
}
