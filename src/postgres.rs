use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::PgPool;
use std::collections::BTreeMap;

use crate::model::Product;
use crate::store::{ProductStore, StoreError};

pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool, StoreError> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(sqlx::Error::from)?;

    tracing::info!("database connected and migrations applied");
    Ok(pool)
}

/// Round trip used by the connectivity check.
pub async fn ping(pool: &PgPool) -> Result<i64, StoreError> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products").fetch_one(pool).await?;
    Ok(count)
}

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self { Self { pool } }
}

#[derive(Debug, sqlx::FromRow)]
struct ProductRow {
    id: String,
    slug: String,
    title: String,
    description: String,
    content: String,
    category: String,
    tags: Vec<String>,
    price: f64,
    discount: Option<f64>,
    on_sale: Option<bool>,
    rating: f64,
    review_count: i32,
    image_url: String,
    gallery: Vec<String>,
    pros: Vec<String>,
    cons: Vec<String>,
    specifications: Json<BTreeMap<String, String>>,
    meta_title: String,
    meta_description: String,
    keywords: Vec<String>,
    author: String,
    publish_date: DateTime<Utc>,
    last_updated: DateTime<Utc>,
    status: String,
    affiliate_links: Json<BTreeMap<String, String>>,
    asin: Option<String>,
    amazon_url: Option<String>,
    page_link: String,
    extra: Json<serde_json::Map<String, serde_json::Value>>,
}

impl TryFrom<ProductRow> for Product {
    type Error = StoreError;

    fn try_from(r: ProductRow) -> Result<Self, Self::Error> {
        Ok(Product {
            id: r.id,
            title: r.title,
            slug: r.slug,
            description: r.description,
            content: r.content,
            category: r.category.parse()?,
            tags: r.tags,
            price: r.price,
            discount: r.discount,
            on_sale: r.on_sale,
            rating: r.rating,
            review_count: r.review_count.max(0) as u32,
            image_url: r.image_url,
            gallery: r.gallery,
            pros: r.pros,
            cons: r.cons,
            specifications: r.specifications.0,
            meta_title: r.meta_title,
            meta_description: r.meta_description,
            keywords: r.keywords,
            author: r.author,
            publish_date: r.publish_date,
            last_updated: r.last_updated,
            status: r.status.parse()?,
            affiliate_links: r.affiliate_links.0,
            asin: r.asin,
            amazon_url: r.amazon_url,
            page_link: r.page_link,
            extra: r.extra.0,
        })
    }
}

#[async_trait]
impl ProductStore for PgStore {
    async fn insert(&self, p: &Product) -> Result<(), StoreError> {
        p.validate()?;
        let res = sqlx::query(
            "INSERT INTO products (id, slug, title, description, content, category, tags, price, discount, on_sale, \
             rating, review_count, image_url, gallery, pros, cons, specifications, meta_title, meta_description, \
             keywords, author, publish_date, last_updated, status, affiliate_links, asin, amazon_url, page_link, extra) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, \
             $21, $22, $23, $24, $25, $26, $27, $28, $29)",
        )
        .bind(&p.id)
        .bind(&p.slug)
        .bind(&p.title)
        .bind(&p.description)
        .bind(&p.content)
        .bind(p.category.as_str())
        .bind(&p.tags)
        .bind(p.price)
        .bind(p.discount)
        .bind(p.on_sale)
        .bind(p.rating)
        .bind(i32::try_from(p.review_count).unwrap_or(i32::MAX))
        .bind(&p.image_url)
        .bind(&p.gallery)
        .bind(&p.pros)
        .bind(&p.cons)
        .bind(Json(&p.specifications))
        .bind(&p.meta_title)
        .bind(&p.meta_description)
        .bind(&p.keywords)
        .bind(&p.author)
        .bind(p.publish_date)
        .bind(p.last_updated)
        .bind(p.status.as_str())
        .bind(Json(&p.affiliate_links))
        .bind(&p.asin)
        .bind(&p.amazon_url)
        .bind(&p.page_link)
        .bind(Json(&p.extra))
        .execute(&self.pool)
        .await;

        match res {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.code().as_deref() == Some("23505") => {
                Err(StoreError::DuplicateSlug(p.slug.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn contains_slug(&self, slug: &str) -> Result<bool, StoreError> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM products WHERE slug = $1)")
            .bind(slug)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    async fn list(&self) -> Result<Vec<Product>, StoreError> {
        let rows = sqlx::query_as::<_, ProductRow>("SELECT * FROM products ORDER BY publish_date DESC")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Product::try_from).collect()
    }

    fn name(&self) -> &'static str { "postgres" }
}
